//! Parallel export of independent codec jobs.
//!
//! Each job runs on the blocking pool. A raised cancel flag stops new jobs
//! from being scheduled; jobs already running finish and keep their output.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tokio::sync::Semaphore;
use tokio::task::{self, JoinHandle};

use healthsim_types::EntitySet;

use crate::{CodecRegistry, Export, ExportOptions};

/// One codec invocation over one entity set.
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub codec: String,
    pub entities: Arc<EntitySet>,
    pub options: ExportOptions,
}

#[derive(Debug)]
pub enum BatchOutcome {
    Completed { codec: String, export: Export },
    Failed { codec: String, message: String },
    /// Not started because the batch was cancelled first.
    Cancelled { codec: String },
}

impl BatchOutcome {
    #[must_use]
    pub fn codec(&self) -> &str {
        match self {
            BatchOutcome::Completed { codec, .. }
            | BatchOutcome::Failed { codec, .. }
            | BatchOutcome::Cancelled { codec } => codec,
        }
    }
}

enum Scheduled {
    Running(String, JoinHandle<BatchOutcome>),
    Done(BatchOutcome),
}

/// Run `jobs` with up to one job per available core. Outcomes are returned
/// in job order.
pub async fn export_batch(
    registry: &CodecRegistry,
    jobs: Vec<ExportJob>,
    cancel: Arc<AtomicBool>,
) -> Vec<BatchOutcome> {
    let limit = thread::available_parallelism().map_or(1, NonZeroUsize::get);
    run(registry, jobs, cancel, limit).await
}

async fn run(
    registry: &CodecRegistry,
    jobs: Vec<ExportJob>,
    cancel: Arc<AtomicBool>,
    limit: usize,
) -> Vec<BatchOutcome> {
    let permits = Arc::new(Semaphore::new(limit.max(1)));
    let mut scheduled = Vec::with_capacity(jobs.len());

    for job in jobs {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            scheduled.push(Scheduled::Done(BatchOutcome::Cancelled { codec: job.codec }));
            continue;
        };
        if cancel.load(Ordering::SeqCst) {
            drop(permit);
            scheduled.push(Scheduled::Done(BatchOutcome::Cancelled { codec: job.codec }));
            continue;
        }
        let codec = match registry.lookup(&job.codec) {
            Ok(codec) => codec,
            Err(err) => {
                scheduled.push(Scheduled::Done(BatchOutcome::Failed {
                    codec: job.codec,
                    message: err.to_string(),
                }));
                continue;
            }
        };

        let name = job.codec.clone();
        let handle = task::spawn_blocking(move || {
            let outcome = match codec.export(&job.entities, &job.options) {
                Ok(export) => BatchOutcome::Completed {
                    codec: job.codec,
                    export,
                },
                Err(err) => BatchOutcome::Failed {
                    codec: job.codec,
                    message: err.to_string(),
                },
            };
            drop(permit);
            outcome
        });
        scheduled.push(Scheduled::Running(name, handle));
    }

    let mut outcomes = Vec::with_capacity(scheduled.len());
    for entry in scheduled {
        let outcome = match entry {
            Scheduled::Done(outcome) => outcome,
            Scheduled::Running(codec, handle) => match handle.await {
                Ok(outcome) => outcome,
                Err(err) => BatchOutcome::Failed {
                    codec,
                    message: format!("export task failed: {err}"),
                },
            },
        };
        if let BatchOutcome::Failed { codec, message } = &outcome {
            tracing::warn!(codec = %codec, error = %message, "Export job failed");
        }
        outcomes.push(outcome);
    }

    let completed = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, BatchOutcome::Completed { .. }))
        .count();
    let cancelled = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, BatchOutcome::Cancelled { .. }))
        .count();
    tracing::info!(
        jobs = outcomes.len(),
        completed,
        cancelled,
        "Batch export finished"
    );
    outcomes
}

#[cfg(test)]
mod tests {
    use super::{BatchOutcome, ExportJob, export_batch, run};
    use crate::{Codec, CodecError, CodecRegistry, Export, ExportOptions};
    use chrono::NaiveDate;
    use healthsim_types::{EntitySet, ValidationReport};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Raises the batch's cancel flag while it runs.
    struct RaiseCancel(Arc<AtomicBool>);

    impl Codec for RaiseCancel {
        fn name(&self) -> &'static str {
            "raise-cancel"
        }

        fn description(&self) -> &'static str {
            "test codec"
        }

        fn export(&self, _: &EntitySet, _: &ExportOptions) -> Result<Export, CodecError> {
            self.0.store(true, Ordering::SeqCst);
            Ok(Export::single("done.txt", "done".to_string(), ValidationReport::new()))
        }
    }

    fn job(codec: &str) -> ExportJob {
        let at = NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("valid timestamp");
        ExportJob {
            codec: codec.to_string(),
            entities: Arc::new(EntitySet::new()),
            options: ExportOptions::new(at),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn jobs_complete_in_order_and_unknown_codecs_fail() {
        let registry = CodecRegistry::standard();
        let cancel = Arc::new(AtomicBool::new(false));
        let outcomes = export_batch(
            &registry,
            vec![job("fhir-r4"), job("csv"), job("sdtm")],
            cancel,
        )
        .await;
        let codecs: Vec<&str> = outcomes.iter().map(BatchOutcome::codec).collect();
        assert_eq!(codecs, ["fhir-r4", "csv", "sdtm"]);
        assert!(matches!(outcomes[0], BatchOutcome::Completed { .. }));
        assert!(matches!(outcomes[1], BatchOutcome::Failed { .. }));
        match &outcomes[2] {
            BatchOutcome::Completed { export, .. } => assert_eq!(export.files.len(), 3),
            other => panic!("expected completed sdtm export, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_stops_scheduling_but_keeps_finished_work() {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut registry = CodecRegistry::standard();
        registry
            .register(Arc::new(RaiseCancel(Arc::clone(&cancel))))
            .expect("registered");

        let outcomes = run(
            &registry,
            vec![job("raise-cancel"), job("fhir-r4"), job("hl7v2")],
            cancel,
            1,
        )
        .await;
        assert!(matches!(outcomes[0], BatchOutcome::Completed { .. }));
        assert!(matches!(outcomes[1], BatchOutcome::Cancelled { .. }));
        assert!(matches!(outcomes[2], BatchOutcome::Cancelled { .. }));
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let cancel = Arc::new(AtomicBool::new(true));
        let outcomes = export_batch(&CodecRegistry::standard(), vec![job("fhir-r4")], cancel).await;
        assert!(matches!(outcomes[0], BatchOutcome::Cancelled { .. }));
    }
}
