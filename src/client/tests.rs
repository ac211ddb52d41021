use super::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn record(first: &str, domain: &str) -> Record {
    Record {
        first_name: Some(first.to_string()),
        last_name: Some("Lee".to_string()),
        linkedin_url: None,
        organization_name: None,
        domain: Some(domain.to_string()),
    }
}

async fn client_for(server: &MockServer) -> ApolloClient {
    ApolloClient::new(
        format!("{}/api/v1/people/bulk_match", server.uri()),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn test_sends_details_with_key_and_reveal_flags() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/people/bulk_match"))
        .and(query_param("reveal_personal_emails", "true"))
        .and(query_param("reveal_phone_number", "false"))
        .and(header("x-api-key", "secret"))
        .and(header("accept", "application/json"))
        .and(body_partial_json(json!({
            "details": [
                {"first_name": "Ann", "last_name": "Lee", "domain": "foo.com"},
                {"first_name": "Bo", "domain": "bar.com"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "matches": [
                {"email": "ann@foo.com", "name": "Ann Lee"},
                {"email": "bo@bar.com"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let results = client
        .enrich(
            &[record("Ann", "foo.com"), record("Bo", "bar.com")],
            &ApiKey::new("secret"),
        )
        .await
        .unwrap();

    assert_eq!(
        results,
        vec![
            EnrichmentResult::Email("ann@foo.com".to_string()),
            EnrichmentResult::Email("bo@bar.com".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_null_and_missing_emails_become_no_email_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "matches": [null, {"id": "x"}, {"email": null}, {"email": "c@c.com"}]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let batch: Vec<_> = ["a", "b", "c", "d"]
        .iter()
        .map(|n| record(n, "x.com"))
        .collect();
    let results = client.enrich(&batch, &ApiKey::new("k")).await.unwrap();

    assert_eq!(
        results,
        vec![
            EnrichmentResult::NoEmailFound,
            EnrichmentResult::NoEmailFound,
            EnrichmentResult::NoEmailFound,
            EnrichmentResult::Email("c@c.com".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_unprocessable_marks_batch_as_validation_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string("{\"error\":\"bad details\"}"))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let results = client
        .enrich(&[record("a", "a.com"), record("b", "b.com")], &ApiKey::new("k"))
        .await
        .unwrap();

    assert_eq!(results, vec![EnrichmentResult::ValidationError; 2]);
}

#[tokio::test]
async fn test_generic_api_error_is_recoverable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let results = client
        .enrich(&[record("a", "a.com")], &ApiKey::new("k"))
        .await
        .unwrap();

    assert_eq!(results, vec![EnrichmentResult::ApiError]);
}

#[tokio::test]
async fn test_insufficient_credits_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_string("{\"error\":\"Insufficient Credits for this request\"}"),
        )
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client
        .enrich(&[record("a", "a.com")], &ApiKey::new("k"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::QuotaExhausted(_)));
}

#[tokio::test]
async fn test_success_without_matches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let results = client
        .enrich(&[record("a", "a.com"), record("b", "b.com")], &ApiKey::new("k"))
        .await
        .unwrap();

    assert_eq!(results, vec![EnrichmentResult::NoEmailFound; 2]);
}

#[tokio::test]
async fn test_malformed_body_is_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let results = client
        .enrich(&[record("a", "a.com")], &ApiKey::new("k"))
        .await
        .unwrap();

    assert_eq!(results, vec![EnrichmentResult::HttpError]);
}

#[tokio::test]
async fn test_connection_failure_is_http_error() {
    // Bind and drop a listener so the port refuses connections
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = ApolloClient::new(
        format!("http://127.0.0.1:{}/api/v1/people/bulk_match", port),
        Duration::from_secs(2),
    )
    .unwrap();

    let results = client
        .enrich(&[record("a", "a.com"), record("b", "b.com")], &ApiKey::new("k"))
        .await
        .unwrap();

    assert_eq!(results, vec![EnrichmentResult::HttpError; 2]);
}

#[test]
fn test_match_count_is_normalized_to_batch_length() {
    let short = classify_response(StatusCode::OK, r#"{"matches":[{"email":"a@a.com"}]}"#, 3)
        .unwrap();
    assert_eq!(
        short,
        vec![
            EnrichmentResult::Email("a@a.com".to_string()),
            EnrichmentResult::NoEmailFound,
            EnrichmentResult::NoEmailFound,
        ]
    );

    let long = classify_response(
        StatusCode::OK,
        r#"{"matches":[{"email":"a@a.com"},{"email":"b@b.com"}]}"#,
        1,
    )
    .unwrap();
    assert_eq!(long, vec![EnrichmentResult::Email("a@a.com".to_string())]);
}

#[test]
fn test_unprocessable_with_credit_message_is_not_fatal() {
    let results = classify_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "insufficient credits",
        1,
    )
    .unwrap();
    assert_eq!(results, vec![EnrichmentResult::ValidationError]);
}

#[test]
fn test_result_rendering() {
    assert_eq!(EnrichmentResult::NoEmailFound.to_string(), "No email found");
    assert_eq!(EnrichmentResult::ValidationError.to_string(), "Validation Error");
    assert_eq!(EnrichmentResult::ApiError.to_string(), "API Error");
    assert_eq!(EnrichmentResult::HttpError.to_string(), "HTTP Error");
    assert_eq!(
        EnrichmentResult::Email("x@y.z".to_string()).to_string(),
        "x@y.z"
    );
    assert!(EnrichmentResult::HttpError.is_error());
    assert!(!EnrichmentResult::NoEmailFound.is_error());
}

#[test]
fn test_api_key_debug_is_redacted() {
    let key = ApiKey::new("super-secret");
    assert_eq!(format!("{:?}", key), "ApiKey(***)");
}
