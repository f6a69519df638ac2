//! Drafts from a generation service flowing into a saved cohort.

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use healthsim_core::CorrelationGraph;
use healthsim_generation::{
    GenerationError, GenerationRequest, HttpGateway, RetryConfig, generate_into,
};
use healthsim_session::{CohortManager, Session, SqliteCohortStore};
use healthsim_types::{CohortName, ProductType};

fn request() -> GenerationRequest {
    GenerationRequest {
        description: "members with hypertension".to_string(),
        count: Some(1),
        products: vec![ProductType::Patient, ProductType::Member],
        ..GenerationRequest::default()
    }
}

fn drafts() -> serde_json::Value {
    json!({
        "drafts": [
            {"type": "person", "ref": "p", "given": "Mei", "family": "Chen",
             "birth_date": "1966-04-12", "sex": "female"},
            {"type": "identity", "ref": "pat", "person": "p", "product": "patient",
             "local_id": "MRN-42", "effective": "2022-01-01"},
            {"type": "identity", "person": "p", "product": "member",
             "local_id": "W4200", "effective": "2022-01-01",
             "attributes": {"plan_code": "HDHP-BRONZE", "group_number": "GRP-9"}},
            {"type": "condition", "patient": "pat",
             "code": {"system": "icd10-cm", "code": "I10"}, "onset": "2021-06-01",
             "status": "active"},
            {"type": "encounter", "patient": "nobody", "class": "ambulatory",
             "start": "2024-01-05T10:00:00"}
        ]
    })
}

#[tokio::test]
async fn generated_drafts_are_validated_and_saved() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/cohorts"))
        .and(body_partial_json(json!({
            "request": {"description": "members with hypertension", "count": 1}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(drafts()))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = HttpGateway::new(format!("{}/v1/cohorts", server.uri())).expect("gateway");
    let mut session = Session::new();
    let report = generate_into(&gateway, &mut session, &request())
        .await
        .expect("generated");

    assert_eq!(report.skipped().len(), 1, "{report:?}");
    let entities = session.entities();
    assert_eq!(entities.persons.len(), 1);
    assert_eq!(entities.identities.len(), 2);
    assert_eq!(entities.conditions.len(), 1);
    assert!(entities.encounters.is_empty());
    entities.verify_correlation().expect("consistent");
    assert_eq!(session.description.as_deref(), Some("members with hypertension"));

    let dir = tempfile::tempdir().expect("tempdir");
    let cohorts =
        CohortManager::new(SqliteCohortStore::open(dir.path().join("cohorts.db")).expect("store"));
    let name = CohortName::new("htn-members").expect("name");
    cohorts.save_as(&mut session, &name, false).expect("saved");
    assert_eq!(
        cohorts.load(&name).expect("loaded").entities(),
        session.entities()
    );
}

#[tokio::test]
async fn unavailable_service_is_retried_when_asked() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).insert_header("retry-after-ms", "5"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(drafts()))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = HttpGateway::new(server.uri())
        .expect("gateway")
        .with_retry(RetryConfig::with_retries(1));
    let mut session = Session::new();
    generate_into(&gateway, &mut session, &request())
        .await
        .expect("second attempt succeeds");
    assert_eq!(session.entities().persons.len(), 1);
}

#[tokio::test]
async fn failed_generation_leaves_the_session_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model overloaded"))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = HttpGateway::new(server.uri()).expect("gateway");
    let mut session = Session::new();
    let err = generate_into(&gateway, &mut session, &request())
        .await
        .expect_err("server error");
    assert!(matches!(err, GenerationError::Status { status: 500, .. }), "{err:?}");
    assert!(session.is_empty());
    assert!(session.description.is_none());
}
