//! Filesystem helpers shared by the HealthSim binaries.
//!
//! Export artifacts and request files are written with a temp file in the
//! destination directory followed by a rename, so a crash never leaves a
//! truncated file under the final name.

mod atomic_write;

pub use atomic_write::{
    ArtifactError, Overwrite, SyncPolicy, atomic_write, recover_bak_file, write_artifacts,
};
