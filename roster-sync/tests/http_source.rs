use roster_sync::client::{HttpRosterClient, RosterSource};
use roster_sync::config::{HttpConfig, SourceConfig};
use roster_sync::token::{AccessToken, HttpTokenClient, TokenProvider};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn source(server: &MockServer) -> SourceConfig {
    SourceConfig {
        token_url: format!("{}/token", server.uri()),
        course_url: format!("{}/courses", server.uri()),
        members_url: format!("{}/members", server.uri()),
        client_id: "lms".to_string(),
        selector_id: "spring".to_string(),
        term: Some("2026".to_string())
    }
}

fn http() -> HttpConfig {
    HttpConfig {
        request_timeout_seconds: 5,
        max_retries: 1,
        retry_delay_ms: 10
    }
}

#[tokio::test]
async fn test_token_fetch_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("clientid=lms"))
        .and(body_string_contains("sign="))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": 1, "data": {"token": "tok-123"}}))
        )
        .mount(&server)
        .await;

    let client = HttpTokenClient::new(source(&server), &http()).unwrap();
    let token = client.fetch_token().await.unwrap();
    assert_eq!(token.as_str(), "tok-123");
}

#[tokio::test]
async fn test_token_failure_status_yields_none() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": 0, "data": "bad signature"}))
        )
        .mount(&server)
        .await;

    let client = HttpTokenClient::new(source(&server), &http()).unwrap();
    assert!(client.fetch_token().await.is_none());
}

#[tokio::test]
async fn test_token_server_error_is_retried_then_none() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let client = HttpTokenClient::new(source(&server), &http()).unwrap();
    assert!(client.fetch_token().await.is_none());
}

#[tokio::test]
async fn test_token_malformed_body_yields_none() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let client = HttpTokenClient::new(source(&server), &http()).unwrap();
    assert!(client.fetch_token().await.is_none());
}

#[tokio::test]
async fn test_fetch_members() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/members"))
        .and(body_string_contains("idnumber=CS101"))
        .and(body_string_contains("token=tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "1",
            "data": ["2023001", 2023002, "", null]
        })))
        .mount(&server)
        .await;

    let client = HttpRosterClient::new(source(&server), &http()).unwrap();
    let result = client
        .fetch_members("CS101", &AccessToken::new("tok"))
        .await;

    assert!(result.ok);
    let ids: Vec<_> = result.payload.iter().map(|m| m.identifier.as_str()).collect();
    assert_eq!(ids, vec!["2023001", "2023002"]);
    assert!(result.payload.iter().all(|m| m.role.is_none()));
}

#[tokio::test]
async fn test_fetch_members_degrades_to_empty() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/members"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 0, "data": "token expired"})))
        .mount(&server)
        .await;

    let client = HttpRosterClient::new(source(&server), &http()).unwrap();
    let result = client.fetch_members("CS101", &AccessToken::new("tok")).await;

    assert!(!result.ok);
    assert!(result.payload.is_empty());
}

#[tokio::test]
async fn test_fetch_members_transport_failure() {
    let server = MockServer::start().await;
    let mut config = source(&server);
    config.members_url = "http://127.0.0.1:9/members".to_string();

    let client = HttpRosterClient::new(config, &http()).unwrap();
    let result = client.fetch_members("CS101", &AccessToken::new("tok")).await;

    assert!(!result.ok);
    assert!(result.payload.is_empty());
}

#[tokio::test]
async fn test_fetch_courses_builds_selection_keys() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/courses"))
        .and(body_string_contains("username=t1001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 1,
            "data": [
                {"idnumber": "CS101-02", "category": "Computer Science", "shortname": "Data Structures", "stunum": "120"},
                {"idnumber": 88, "category": "Physics", "shortname": "Optics", "stunum": 45},
                {"category": "no id"}
            ]
        })))
        .mount(&server)
        .await;

    let client = HttpRosterClient::new(source(&server), &http()).unwrap();
    let courses = client.fetch_courses("t1001", &AccessToken::new("tok")).await;

    assert_eq!(courses.len(), 2);
    assert_eq!(
        courses[0].selection_key(),
        "2026~CS101-02~Computer Science~Data Structures~120"
    );
    assert_eq!(courses[1].external_course_id, "88");
    assert_eq!(courses[1].student_capacity, 45);
    assert_eq!(courses[1].label(), "Physics-Optics-45");
}
