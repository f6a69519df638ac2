//! Format codecs for HealthSim entity sets.
//!
//! Each codec maps the canonical model to one wire representation. Codecs are
//! stateless: everything an export depends on arrives through
//! [`ExportOptions`], including the generation timestamp, so the same input
//! always produces the same bytes.
//!
//! Before emitting an entity a codec checks the fields it needs. Problems are
//! recorded in the export's [`ValidationReport`]; entities with errors are
//! skipped and the rest of the export proceeds.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use thiserror::Error;

use healthsim_config::{Hl7Config, NcpdpConfig, PayerInfo, X12Config};
use healthsim_types::{EntitySet, ValidationReport};

mod batch;
mod fhir;
mod hl7v2;
mod ncpdp;
mod sdtm;
mod text;
mod x12;
mod x12_835;
mod x12_837;

pub use batch::{BatchOutcome, ExportJob, export_batch};
pub use fhir::FhirR4;
pub use hl7v2::Hl7V2;
pub use ncpdp::{NcpdpD0, overpunch};
pub use sdtm::Sdtm;
pub use x12_835::X12Remittance;
pub use x12_837::X12Professional;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("codec {codec} does not support import")]
    ImportUnsupported { codec: &'static str },
    #[error("malformed {codec} input at {location}: {message}")]
    Malformed {
        codec: &'static str,
        location: String,
        message: String,
    },
    #[error("unbalanced {level} envelope: opened with {opened}, closed with {closed}")]
    UnbalancedEnvelope {
        level: &'static str,
        opened: String,
        closed: String,
    },
    #[error("unknown codec: {name}")]
    UnknownCodec { name: String },
    #[error("codec already registered: {name}")]
    DuplicateCodec { name: &'static str },
}

impl CodecError {
    pub(crate) fn malformed(
        codec: &'static str,
        location: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CodecError::Malformed {
            codec,
            location: location.into(),
            message: message.into(),
        }
    }
}

/// Inputs every export may draw on besides the entity set.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Stamped into message headers and envelopes.
    pub generated_at: NaiveDateTime,
    pub hl7: Hl7Config,
    pub x12: X12Config,
    pub ncpdp: NcpdpConfig,
    pub payer_id: String,
    pub payer_name: String,
}

impl ExportOptions {
    #[must_use]
    pub fn new(generated_at: NaiveDateTime) -> Self {
        Self {
            generated_at,
            hl7: Hl7Config::default(),
            x12: X12Config::default(),
            ncpdp: NcpdpConfig::default(),
            payer_id: "SIMPAYER01".to_string(),
            payer_name: "Synthetic Health Plan".to_string(),
        }
    }

    #[must_use]
    pub fn with_payer(mut self, payer: &PayerInfo) -> Self {
        self.payer_id = payer.id.clone();
        self.payer_name = payer.name.clone();
        self
    }
}

/// One named output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub name: String,
    pub content: Vec<u8>,
}

/// The artifact of one codec invocation. Most codecs emit one file; tabular
/// codecs emit one file per table.
#[derive(Debug, Clone, Default)]
pub struct Export {
    pub files: Vec<ExportFile>,
    pub report: ValidationReport,
}

impl Export {
    pub(crate) fn single(name: impl Into<String>, content: String, report: ValidationReport) -> Self {
        Self {
            files: vec![ExportFile {
                name: name.into(),
                content: content.into_bytes(),
            }],
            report,
        }
    }

    #[must_use]
    pub fn file(&self, name: &str) -> Option<&ExportFile> {
        self.files.iter().find(|file| file.name == name)
    }

    /// Concatenated file contents, lossily decoded.
    #[must_use]
    pub fn text(&self) -> String {
        self.files
            .iter()
            .map(|file| String::from_utf8_lossy(&file.content))
            .collect()
    }

    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.files.iter().map(|file| file.content.len()).sum()
    }
}

/// Entities reconstructed from wire bytes.
#[derive(Debug, Clone, Default)]
pub struct Import {
    pub entities: EntitySet,
    pub report: ValidationReport,
}

pub trait Codec: Send + Sync {
    /// Registry name, e.g. `fhir-r4`.
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn supports_import(&self) -> bool {
        false
    }
    fn export(&self, entities: &EntitySet, options: &ExportOptions) -> Result<Export, CodecError>;
    fn import(&self, bytes: &[u8]) -> Result<Import, CodecError> {
        let _ = bytes;
        Err(CodecError::ImportUnsupported { codec: self.name() })
    }
}

/// Codecs by registry name.
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: BTreeMap<&'static str, Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// Registry holding every built-in codec.
    #[must_use]
    pub fn standard() -> Self {
        let builtins: [Arc<dyn Codec>; 6] = [
            Arc::new(FhirR4),
            Arc::new(Hl7V2),
            Arc::new(X12Professional),
            Arc::new(X12Remittance),
            Arc::new(NcpdpD0),
            Arc::new(Sdtm),
        ];
        Self {
            codecs: builtins
                .into_iter()
                .map(|codec| (codec.name(), codec))
                .collect(),
        }
    }

    pub fn register(&mut self, codec: Arc<dyn Codec>) -> Result<(), CodecError> {
        let name = codec.name();
        if self.codecs.contains_key(name) {
            return Err(CodecError::DuplicateCodec { name });
        }
        self.codecs.insert(name, codec);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Codec>, CodecError> {
        self.codecs
            .get(name)
            .cloned()
            .ok_or_else(|| CodecError::UnknownCodec {
                name: name.to_string(),
            })
    }

    pub fn codecs(&self) -> impl Iterator<Item = &Arc<dyn Codec>> {
        self.codecs.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.codecs.keys().copied()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.codecs.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{CodecError, CodecRegistry, FhirR4};
    use std::sync::Arc;

    #[test]
    fn standard_registry_lists_every_codec() {
        let registry = CodecRegistry::standard();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(
            names,
            ["fhir-r4", "hl7v2", "ncpdp-d0", "sdtm", "x12-835", "x12-837p"]
        );
        let importers: Vec<_> = registry
            .codecs()
            .filter(|codec| codec.supports_import())
            .map(|codec| codec.name())
            .collect();
        assert_eq!(importers, ["fhir-r4", "x12-837p"]);
    }

    #[test]
    fn lookup_and_duplicate_registration() {
        let mut registry = CodecRegistry::standard();
        assert!(matches!(
            registry.lookup("csv"),
            Err(CodecError::UnknownCodec { .. })
        ));
        assert!(matches!(
            registry.register(Arc::new(FhirR4)),
            Err(CodecError::DuplicateCodec { name: "fhir-r4" })
        ));
    }

    #[test]
    fn export_only_codec_rejects_import() {
        let registry = CodecRegistry::standard();
        let codec = registry.lookup("hl7v2").expect("registered");
        assert!(matches!(
            codec.import(b"MSH|"),
            Err(CodecError::ImportUnsupported { codec: "hl7v2" })
        ));
    }
}
