//! Cloud Dispatch Integration Tests against a Mock Triton Endpoint
//!
//! Each scenario opens a session on its fixture model with `cloud.*` entries
//! pointing at an in-process wiremock server, runs with `use_cloud = "1"`, and
//! checks both the request that reached the endpoint and the decoded result.
//!
//! ## Test Coverage
//!
//! - addf / addf8 / addi4 / and round trips
//! - Request path, bearer header and JSON body
//! - Unversioned route
//! - 401, missing outputs and malformed responses
//! - Readiness probes

use serde_json::json;
use stratus::cloud::triton::TritonTensor;
use stratus::cloud::TritonInvoker;
use stratus::testing::{
    assert_all_close, cloud_scenarios, model_path, CloudScenario, SCENARIO_ATOL, SCENARIO_RTOL,
};
use stratus::{CloudConfig, InferenceSession, SessionOptions, StratusError, Value};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEST_KEY: &str = "test-auth-key";

fn scenario(model: &str) -> CloudScenario {
    cloud_scenarios()
        .into_iter()
        .find(|s| s.model == model)
        .expect("unknown scenario")
}

fn infer_response(s: &CloudScenario) -> serde_json::Value {
    json!({
        "model_name": s.model,
        "model_version": "1",
        "outputs": [TritonTensor::from_value("Z", &s.expected)],
    })
}

/// Open the scenario's session against `uri` and run it with cloud dispatch
///
/// The blocking HTTP client must not run on an async worker thread.
async fn run_scenario(
    s: CloudScenario,
    options: SessionOptions,
    key: &'static str,
) -> stratus::Result<Vec<Value>> {
    tokio::task::spawn_blocking(move || {
        let session = InferenceSession::new(model_path(s.model), options)?;
        session.run(None, &s.inputs(), Some(&s.run_options(key)?))
    })
    .await
    .expect("blocking task panicked")
}

// =============================================================================
// Scenario Round Trips
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_scenarios_against_mock_endpoint() {
    for s in cloud_scenarios() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/v2/models/{}/versions/1/infer", s.model)))
            .and(header("authorization", format!("Bearer {TEST_KEY}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(infer_response(&s)))
            .expect(1)
            .mount(&server)
            .await;

        let options = s.session_options(&server.uri()).unwrap();
        let outputs = run_scenario(s.clone(), options, TEST_KEY)
            .await
            .unwrap_or_else(|e| panic!("scenario {} failed: {e}", s.model));

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].element_type(), s.element_type);
        assert_all_close(&outputs[0], &s.expected, SCENARIO_RTOL, SCENARIO_ATOL);
        server.verify().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_request_body_on_the_wire() {
    let s = scenario("addf");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/models/addf/versions/1/infer"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({
            "inputs": [
                {"name": "X", "shape": [4], "datatype": "FP32", "data": [1.0, 2.0, 3.0, 4.0]},
                {"name": "Y", "shape": [4], "datatype": "FP32", "data": [4.0, 3.0, 2.0, 1.0]},
            ],
            "outputs": [{"name": "Z"}],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(infer_response(&s)))
        .expect(1)
        .mount(&server)
        .await;

    let options = s.session_options(&server.uri()).unwrap();
    let outputs = run_scenario(s.clone(), options, TEST_KEY).await.unwrap();
    assert_eq!(outputs, vec![s.expected]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bool_request_body() {
    let s = scenario("and");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/models/and/versions/1/infer"))
        .and(body_json(json!({
            "inputs": [
                {"name": "X", "shape": [2], "datatype": "BOOL", "data": [true, false]},
                {"name": "Y", "shape": [2], "datatype": "BOOL", "data": [true, true]},
            ],
            "outputs": [{"name": "Z"}],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(infer_response(&s)))
        .expect(1)
        .mount(&server)
        .await;

    let options = s.session_options(&server.uri()).unwrap();
    let outputs = run_scenario(s.clone(), options, TEST_KEY).await.unwrap();
    assert_eq!(outputs, vec![s.expected]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unversioned_route() {
    let s = scenario("addi4");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/models/addi4/infer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(infer_response(&s)))
        .expect(1)
        .mount(&server)
        .await;

    let mut options = SessionOptions::new();
    CloudConfig::triton(server.uri(), "addi4")
        .apply_to(&mut options)
        .unwrap();
    let outputs = run_scenario(s.clone(), options, TEST_KEY).await.unwrap();
    assert_eq!(outputs, vec![s.expected]);
}

// =============================================================================
// Failure Modes
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_unauthorized_is_endpoint_error() {
    let s = scenario("addf8");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
        .expect(1)
        .mount(&server)
        .await;

    let options = s.session_options(&server.uri()).unwrap();
    let err = run_scenario(s, options, "wrong-key").await.unwrap_err();
    assert!(err.is_auth_failure());
    match err {
        StratusError::EndpointError { status, url, body } => {
            assert_eq!(status, 401);
            assert!(url.ends_with("/v2/models/addf8/versions/1/infer"));
            assert_eq!(body, "invalid key");
        },
        other => panic!("expected EndpointError, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_error_is_not_auth_failure() {
    let s = scenario("addf");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let options = s.session_options(&server.uri()).unwrap();
    let err = run_scenario(s, options, TEST_KEY).await.unwrap_err();
    assert!(matches!(err, StratusError::EndpointError { status: 503, .. }));
    assert!(!err.is_auth_failure());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_response_missing_output() {
    let s = scenario("addf");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model_name": "addf",
            "outputs": [TritonTensor::from_value("W", &s.expected)],
        })))
        .mount(&server)
        .await;

    let options = s.session_options(&server.uri()).unwrap();
    let err = run_scenario(s, options, TEST_KEY).await.unwrap_err();
    assert!(matches!(err, StratusError::InferenceError(_)));
    assert!(err.to_string().contains("missing output 'Z'"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_response() {
    let s = scenario("addi4");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model_name": "addi4",
            "outputs": [{"name": "Z", "datatype": "INT32", "shape": [4], "data": [5, 5, 5]}],
        })))
        .mount(&server)
        .await;

    let options = s.session_options(&server.uri()).unwrap();
    let err = run_scenario(s, options, TEST_KEY).await.unwrap_err();
    assert!(matches!(err, StratusError::FormatError { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_response_type_must_match_model() {
    let s = scenario("addf");
    let wrong = scenario("addf8");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(infer_response(&wrong)))
        .mount(&server)
        .await;

    let options = s.session_options(&server.uri()).unwrap();
    let err = run_scenario(s, options, TEST_KEY).await.unwrap_err();
    assert!(matches!(err, StratusError::TypeMismatch { .. }));
}

// =============================================================================
// Readiness Probes
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_readiness_probes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/health/ready"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/models/addf/versions/1/ready"))
        .and(header("authorization", format!("Bearer {TEST_KEY}").as_str()))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = CloudConfig::triton(server.uri(), "addf").with_model_version("1");
    let (server_ready, model_ready) = tokio::task::spawn_blocking(move || {
        let invoker = TritonInvoker::new(&config)?;
        Ok::<_, StratusError>((
            invoker.health_check(None)?,
            invoker.model_ready(Some(TEST_KEY))?,
        ))
    })
    .await
    .unwrap()
    .unwrap();

    assert!(server_ready);
    assert!(!model_ready);
}
