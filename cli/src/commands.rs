use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use healthsim_config::{HealthsimConfig, PolicyProfile};
use healthsim_formats::{BatchOutcome, CodecRegistry, Export, ExportJob, ExportOptions, export_batch};
use healthsim_generation::{GenerationRequest, HttpGateway, RetryConfig, generate_into};
use healthsim_session::{CohortManager, CohortStore, Session, SqliteCohortStore};
use healthsim_types::{AppealOutcome, CohortName, EntityId, FillStatus, ValidationReport};
use healthsim_utils::{Overwrite, write_artifacts};

const DATABASE_FILE: &str = "cohorts.db";

pub struct App {
    config: HealthsimConfig,
    data_dir: PathBuf,
    registry: CodecRegistry,
}

impl App {
    pub fn new(config: HealthsimConfig, data_dir: Option<PathBuf>) -> Self {
        let data_dir = data_dir.unwrap_or_else(|| config.data_dir());
        Self {
            config,
            data_dir,
            registry: CodecRegistry::standard(),
        }
    }

    fn cohorts(&self) -> Result<CohortManager<SqliteCohortStore>> {
        let path = self.data_dir.join(DATABASE_FILE);
        let store = SqliteCohortStore::open(&path)
            .with_context(|| format!("Failed to open cohort store at {}", path.display()))?;
        Ok(CohortManager::new(store))
    }

    fn profile(&self) -> Result<PolicyProfile> {
        self.config
            .policy_profile()
            .context("Failed to load payer profile")
    }

    fn export_options(&self, profile: &PolicyProfile) -> ExportOptions {
        let mut options = ExportOptions::new(Utc::now().naive_utc()).with_payer(&profile.payer);
        if let Some(hl7) = &self.config.hl7 {
            options.hl7 = hl7.clone();
        }
        if let Some(x12) = &self.config.x12 {
            options.x12 = x12.clone();
        }
        if let Some(ncpdp) = &self.config.ncpdp {
            options.ncpdp = ncpdp.clone();
        }
        options
    }

    pub fn formats(&self, out: &mut impl Write) -> Result<()> {
        for codec in self.registry.codecs() {
            let direction = if codec.supports_import() {
                "export, import"
            } else {
                "export"
            };
            writeln!(
                out,
                "{:<10} {:<16} {}",
                codec.name(),
                direction,
                codec.description()
            )?;
        }
        Ok(())
    }

    pub fn list_cohorts(&self, out: &mut impl Write) -> Result<()> {
        let cohorts = self.cohorts()?.list()?;
        if cohorts.is_empty() {
            writeln!(out, "No saved cohorts")?;
        }
        for cohort in cohorts {
            writeln!(
                out,
                "{:<24} {:>8} entities  saved {}",
                cohort.name.as_str(),
                cohort.entity_count,
                cohort.saved_at.format("%Y-%m-%d %H:%M:%S UTC")
            )?;
        }
        Ok(())
    }

    pub fn show_cohort(&self, name: &CohortName, out: &mut impl Write) -> Result<()> {
        let cohort = self.cohorts()?.store().get(name)?;
        let set = &cohort.entities;
        writeln!(out, "name:         {}", cohort.name.as_str())?;
        writeln!(out, "saved:        {}", cohort.saved_at.to_rfc3339())?;
        if let Some(description) = &cohort.description {
            writeln!(out, "description:  {description}")?;
        }
        for criterion in &cohort.criteria.inclusion {
            writeln!(out, "include:      {criterion}")?;
        }
        for criterion in &cohort.criteria.exclusion {
            writeln!(out, "exclude:      {criterion}")?;
        }
        let counts = [
            ("persons", set.persons.len()),
            ("identities", set.identities.len()),
            ("encounters", set.encounters.len()),
            ("conditions", set.conditions.len()),
            ("observations", set.observations.len()),
            ("claims", set.claims.len()),
            ("prescriptions", set.prescriptions.len()),
            ("adverse events", set.adverse_events.len()),
        ];
        for (label, count) in counts {
            writeln!(out, "{:<14}{count}", format!("{label}:"))?;
        }
        Ok(())
    }

    pub fn delete_cohort(&self, name: &CohortName, out: &mut impl Write) -> Result<()> {
        self.cohorts()?.delete(name)?;
        writeln!(out, "Deleted {}", name.as_str())?;
        Ok(())
    }

    pub fn query(&self, sql: &str, out: &mut impl Write) -> Result<()> {
        let rows = self.cohorts()?.store().query(sql)?;
        writeln!(out, "{}", rows.columns.join("\t"))?;
        for row in &rows.rows {
            let cells: Vec<String> = row
                .iter()
                .map(|value| match value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect();
            writeln!(out, "{}", cells.join("\t"))?;
        }
        Ok(())
    }

    /// One format runs inline; several run as a cancellable batch.
    pub async fn export(
        &self,
        cohort: &CohortName,
        formats: &[String],
        output: Option<&Path>,
        force: bool,
        cancel: Arc<AtomicBool>,
        out: &mut impl Write,
    ) -> Result<()> {
        let session = self.cohorts()?.load(cohort)?;
        let options = self.export_options(&self.profile()?);

        let exports = if let [codec] = formats {
            vec![(codec.clone(), session.export(&self.registry, codec, &options)?)]
        } else {
            let entities = Arc::new(session.entities().clone());
            let jobs = formats
                .iter()
                .map(|codec| ExportJob {
                    codec: codec.clone(),
                    entities: Arc::clone(&entities),
                    options: options.clone(),
                })
                .collect();
            let mut exports = Vec::new();
            for outcome in export_batch(&self.registry, jobs, cancel).await {
                match outcome {
                    BatchOutcome::Completed { codec, export } => exports.push((codec, export)),
                    BatchOutcome::Failed { codec, message } => {
                        eprintln!("{codec}: failed: {message}");
                    }
                    BatchOutcome::Cancelled { codec } => eprintln!("{codec}: cancelled"),
                }
            }
            exports
        };

        for (codec, export) in &exports {
            print_report(codec, &export.report);
            match output {
                Some(dir) => write_export(dir, export, force, out)?,
                None => out.write_all(export.text().as_bytes())?,
            }
        }
        if exports.len() < formats.len() {
            bail!(
                "{} of {} exports did not complete",
                formats.len() - exports.len(),
                formats.len()
            );
        }
        Ok(())
    }

    pub fn adjudicate(
        &self,
        cohort: &CohortName,
        on: NaiveDate,
        save: bool,
        out: &mut impl Write,
    ) -> Result<()> {
        let cohorts = self.cohorts()?;
        let mut session = cohorts.load(cohort)?;
        let summary = session.adjudicate(&self.profile()?, on);

        for claim in &session.entities().claims {
            writeln!(
                out,
                "{}  {:<16} allowed {:>10}  plan {:>10}  patient {:>10}",
                claim.id(),
                claim.status().as_str(),
                claim.total_allowed(),
                claim.total_plan_paid(),
                claim.total_patient_responsibility()
            )?;
        }
        for fill in &session.entities().prescriptions {
            let Some(outcome) = &fill.outcome else {
                continue;
            };
            let status = match &outcome.status {
                FillStatus::Paid => "paid".to_string(),
                FillStatus::Rejected { code, message } => format!("rejected {code} ({message})"),
            };
            writeln!(out, "{}  {status}", fill.id())?;
            for alert in &outcome.alerts {
                writeln!(
                    out,
                    "    {} {}: {}",
                    alert.severity.as_str(),
                    alert.kind.reason_for_service(),
                    alert.message
                )?;
            }
        }
        for (id, error) in &summary.failures {
            writeln!(out, "{id}  not adjudicated: {error}")?;
        }
        writeln!(
            out,
            "{} claims, {} fills adjudicated, {} failures",
            summary.claims,
            summary.prescriptions,
            summary.failures.len()
        )?;

        if save {
            cohorts.save_as(&mut session, cohort, true)?;
            writeln!(out, "Saved {}", cohort.as_str())?;
        }
        Ok(())
    }

    pub fn file_appeal(
        &self,
        cohort: &CohortName,
        claim: &str,
        on: NaiveDate,
        out: &mut impl Write,
    ) -> Result<()> {
        let claim = parse_id(claim)?;
        let cohorts = self.cohorts()?;
        let mut session = cohorts.load(cohort)?;
        session.file_appeal(&self.profile()?, claim, on)?;
        cohorts.save_as(&mut session, cohort, true)?;
        writeln!(out, "{claim} appealed on {on}")?;
        Ok(())
    }

    pub fn resolve_appeal(
        &self,
        cohort: &CohortName,
        claim: &str,
        outcome: AppealOutcome,
        on: NaiveDate,
        out: &mut impl Write,
    ) -> Result<()> {
        let claim = parse_id(claim)?;
        let cohorts = self.cohorts()?;
        let mut session = cohorts.load(cohort)?;
        session.resolve_appeal(&self.profile()?, claim, outcome, on)?;
        let status = session
            .entities()
            .claim(claim)
            .map(|resolved| resolved.status().as_str())
            .unwrap_or("unknown");
        cohorts.save_as(&mut session, cohort, true)?;
        writeln!(out, "{claim} {status}")?;
        Ok(())
    }

    pub async fn generate(
        &self,
        request: &Path,
        save: &CohortName,
        overwrite: bool,
        retries: u32,
        out: &mut impl Write,
    ) -> Result<()> {
        let request: GenerationRequest = read_json(request)?;
        let config = self
            .config
            .generation
            .clone()
            .unwrap_or_default();
        let gateway = HttpGateway::from_config(&config)
            .context("Set [generation] endpoint in config.toml")?
            .with_retry(RetryConfig::with_retries(retries));

        let mut session = Session::new();
        let report = generate_into(&gateway, &mut session, &request).await?;
        self.save_new(session, &report, save, overwrite, out)
    }

    pub fn ingest(
        &self,
        drafts: &Path,
        save: &CohortName,
        overwrite: bool,
        out: &mut impl Write,
    ) -> Result<()> {
        let drafts: Vec<_> = read_json(drafts)?;
        let mut session = Session::new();
        let report = session.apply_drafts(&drafts);
        self.save_new(session, &report, save, overwrite, out)
    }

    fn save_new(
        &self,
        mut session: Session,
        report: &ValidationReport,
        save: &CohortName,
        overwrite: bool,
        out: &mut impl Write,
    ) -> Result<()> {
        print_report("drafts", report);
        if session.is_empty() {
            bail!("no drafts were accepted; nothing to save");
        }
        self.cohorts()?.save_as(&mut session, save, overwrite)?;
        writeln!(
            out,
            "Saved {} with {} entities ({} drafts skipped)",
            save.as_str(),
            session.len(),
            report.skipped().len()
        )?;
        Ok(())
    }
}

fn parse_id(raw: &str) -> Result<EntityId> {
    raw.parse()
        .with_context(|| format!("{raw:?} is not an entity id"))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_export(dir: &Path, export: &Export, force: bool, out: &mut impl Write) -> Result<()> {
    let mode = if force {
        Overwrite::Replace
    } else {
        Overwrite::Refuse
    };
    let files = export
        .files
        .iter()
        .map(|file| (file.name.as_str(), file.content.as_slice()));
    for path in write_artifacts(dir, files, mode)? {
        writeln!(out, "{}", path.display())?;
    }
    Ok(())
}

fn print_report(source: &str, report: &ValidationReport) {
    for issue in report.issues() {
        eprintln!("{source}: {issue}");
    }
    for skipped in report.skipped() {
        eprintln!("{source}: skipped {}: {}", skipped.subject, skipped.reason);
    }
}
