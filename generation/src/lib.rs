//! The generation collaborator boundary.
//!
//! Content is produced elsewhere. A [`GenerationGateway`] takes a structured
//! [`GenerationRequest`] and returns entity drafts; nothing it returns is
//! trusted. Drafts only become entities through [`Session::apply_drafts`],
//! the same validation path every other input takes.

mod http;
mod retry;
mod scripted;

pub use http::HttpGateway;
pub use retry::RetryConfig;
pub use scripted::ScriptedGateway;

use std::collections::BTreeMap;
use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use healthsim_core::EntityDraft;
use healthsim_session::Session;
use healthsim_types::{CohortCriteria, ProductType, ValidationReport};

/// What the collaborator is asked to produce.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Free-text description of the population, e.g. "adults with type 2 diabetes".
    pub description: String,
    /// Number of individuals to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// Product identities each individual should carry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub products: Vec<ProductType>,
    #[serde(default)]
    pub criteria: CohortCriteria,
    /// Additional structured constraints passed through untouched.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constraints: BTreeMap<String, Value>,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no generation endpoint is configured")]
    NotConfigured,
    #[error("generation service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("generation service unreachable after {attempts} attempt(s): {source}")]
    Transport {
        attempts: u32,
        source: reqwest::Error,
    },
    #[error("generation response could not be decoded: {0}")]
    Decode(String),
    #[error("scripted gateway has no responses left")]
    Exhausted,
    #[error("generation client: {0:#}")]
    Client(#[from] anyhow::Error),
}

/// A producer of entity drafts.
pub trait GenerationGateway: Send + Sync {
    fn generate(
        &self,
        request: &GenerationRequest,
    ) -> impl Future<Output = Result<Vec<EntityDraft>, GenerationError>> + Send;
}

/// Ask `gateway` for drafts and apply them to `session`.
///
/// Gateway failures are errors. Bad drafts are not: they come back in the
/// report and the rest of the batch is kept.
pub async fn generate_into<G: GenerationGateway>(
    gateway: &G,
    session: &mut Session,
    request: &GenerationRequest,
) -> Result<ValidationReport, GenerationError> {
    let drafts = gateway.generate(request).await?;
    tracing::info!(drafts = drafts.len(), "Received generation drafts");

    let report = session.apply_drafts(&drafts);
    for skipped in report.skipped() {
        tracing::warn!(subject = %skipped.subject, reason = %skipped.reason, "Draft rejected");
    }

    if session.description.is_none() && !request.description.trim().is_empty() {
        session.description = Some(request.description.clone());
    }
    if session.criteria == CohortCriteria::default() {
        session.criteria = request.criteria.clone();
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{GenerationRequest, ScriptedGateway, generate_into};
    use healthsim_core::{CorrelationGraph, EntityDraft};
    use healthsim_session::Session;
    use healthsim_types::ProductType;

    fn drafts() -> Vec<EntityDraft> {
        serde_json::from_str(
            r#"[
                {"type": "person", "ref": "p", "given": "Ada", "family": "Stone",
                 "birth_date": "1961-02-14", "sex": "female"},
                {"type": "identity", "ref": "pat", "person": "p", "product": "patient",
                 "local_id": "MRN-1", "effective": "2020-01-01"},
                {"type": "identity", "ref": "mem", "person": "p", "product": "member",
                 "local_id": "M-1", "effective": "2020-01-01",
                 "attributes": {"plan_code": "PPO-GOLD", "group_number": "G1"}},
                {"type": "identity", "ref": "rx", "person": "p", "product": "rx_member",
                 "local_id": "RX-1", "effective": "2020-01-01",
                 "attributes": {"bin": "610014", "pcn": "ADV", "rx_group": "RX1",
                                "plan_code": "PPO-GOLD"}},
                {"type": "encounter", "patient": "ghost", "class": "ambulatory",
                 "start": "2024-01-05T08:00:00"}
            ]"#,
        )
        .expect("drafts parse")
    }

    #[tokio::test]
    async fn drafts_pass_through_the_validation_boundary() {
        let gateway = ScriptedGateway::new([drafts()]);
        let mut session = Session::new();
        let request = GenerationRequest {
            description: "one correlated individual".to_string(),
            count: Some(1),
            products: vec![ProductType::Patient, ProductType::Member, ProductType::RxMember],
            ..GenerationRequest::default()
        };

        let report = generate_into(&gateway, &mut session, &request)
            .await
            .expect("generated");

        assert_eq!(report.skipped().len(), 1);
        assert!(report.skipped()[0].subject.starts_with("encounter"));
        assert_eq!(session.entities().identities.len(), 3);
        let keys: Vec<_> = session
            .entities()
            .identities
            .iter()
            .map(|identity| identity.correlation_key())
            .collect();
        assert!(keys.windows(2).all(|pair| pair[0] == pair[1]));
        assert!(session.entities().verify_correlation().is_ok());
        assert_eq!(
            session.description.as_deref(),
            Some("one correlated individual")
        );
        assert_eq!(gateway.requests(), vec![request]);
    }
}
