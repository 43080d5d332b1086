mod common;

use async_trait::async_trait;
use common::{settings, Canned, FakeResourceManager, ACCESS_TOKEN, CLIENT_SECRET, SUBSCRIPTION_ID, TENANT_ID};
use http_client::{HttpClient, Request, Response};
use http_types::{Method, Url};
use resource_manager_vcr::{
    header_values, ApplicationTokenProvider, ActiveDirectorySettings, CassetteLibrary, Error, ResourceGroup,
    ResourceManagementClient, SessionPhase, StaticTokenProvider, TokenProvider, VcrMode, ACCESS_TOKEN_PLACEHOLDER,
};
use std::sync::Arc;

fn get(url: &str) -> Request {
    Request::new(Method::Get, Url::parse(url).unwrap())
}

#[tokio::test]
async fn persisted_cassette_contains_no_live_secrets() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings();
    let sub = SUBSCRIPTION_ID;
    let fake = FakeResourceManager::new()
        .on(
            "GET",
            &format!("/subscriptions/{sub}/resourcegroups"),
            vec![Canned::new(200, r#"{"value":[]}"#)],
        )
        .on(
            "PUT",
            &format!("/subscriptions/{sub}/resourcegroups/redaction-group"),
            vec![Canned::new(
                201,
                format!(
                    r#"{{"id":"/subscriptions/{sub}/resourceGroups/redaction-group","name":"redaction-group","location":"westus","properties":{{"provisioningState":"Succeeded","credentials":{{"access_token":"abc123","tenant":"{TENANT_ID}"}}}}}}"#
                ),
            )],
        );

    let library = CassetteLibrary::new(dir.path());
    let session = Arc::new(
        library
            .begin_session("Resource_Manager/redaction", VcrMode::RecordOnce)
            .inner_client(Box::new(fake.clone()))
            .resource_manager(&settings)
            .build()
            .unwrap(),
    );
    assert_eq!(session.phase(), SessionPhase::Recording);

    let client = ResourceManagementClient::new(
        session.clone(),
        Arc::new(StaticTokenProvider(ACCESS_TOKEN.to_string())),
        SUBSCRIPTION_ID,
    );
    assert!(client.list_resource_groups().await.unwrap().is_empty());
    let created = client
        .create_or_update_resource_group("redaction-group", &ResourceGroup::new("westus"))
        .await
        .unwrap();

    // The caller still sees the live values.
    assert_eq!(created.properties["credentials"]["access_token"], "abc123");

    session.end_session().await.unwrap();
    assert_eq!(session.stats().await.recorded, 2);

    let text = std::fs::read_to_string(library.path_for("Resource_Manager/redaction")).unwrap();
    assert!(!text.contains("abc123"));
    assert!(text.contains(ACCESS_TOKEN_PLACEHOLDER));
    assert!(!text.to_ascii_lowercase().contains("authorization"));
    assert!(!text.contains(ACCESS_TOKEN));
    assert!(!text.contains(SUBSCRIPTION_ID));
    assert!(!text.contains(TENANT_ID));
    assert!(text.contains("<AZURE_SUBSCRIPTION_ID>"));
    assert!(text.contains("<AZURE_TENANT_ID>"));
}

#[tokio::test]
async fn token_requests_are_recorded_without_the_secret() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings();
    let fake = FakeResourceManager::new().on(
        "POST",
        &format!("/{TENANT_ID}/oauth2/token"),
        vec![common::token_response()],
    );

    let library = CassetteLibrary::new(dir.path());
    let session = Arc::new(
        library
            .begin_session("token", VcrMode::RecordOnce)
            .inner_client(Box::new(fake.clone()))
            .resource_manager(&settings)
            .build()
            .unwrap(),
    );

    let provider =
        ApplicationTokenProvider::new(&settings, ActiveDirectorySettings::default(), session.clone()).unwrap();
    assert_eq!(provider.token().await.unwrap(), ACCESS_TOKEN);
    session.end_session().await.unwrap();

    // The live request carried the real secret.
    assert!(fake.calls()[0].body.contains(CLIENT_SECRET));

    let text = std::fs::read_to_string(library.path_for("token")).unwrap();
    assert!(!text.contains(CLIENT_SECRET));
    assert!(!text.contains(ACCESS_TOKEN));
    assert!(text.contains("<AZURE_CLIENT_SECRET>"));
    assert!(text.contains("/<AZURE_TENANT_ID>/oauth2/token"));
}

#[tokio::test]
async fn accepted_polls_are_returned_but_not_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings();
    let sub = SUBSCRIPTION_ID;
    let poll_path = format!("/subscriptions/{sub}/operationresults/op-1");
    let fake = FakeResourceManager::new().on(
        "GET",
        &poll_path,
        vec![
            Canned::new(202, "").header("Retry-After", "30"),
            Canned::new(202, "").header("Retry-After", "30"),
            Canned::new(200, r#"{"status":"done"}"#).header("retry-after", "30"),
        ],
    );

    let library = CassetteLibrary::new(dir.path());
    let session = library
        .begin_session("polling", VcrMode::RecordOnce)
        .inner_client(Box::new(fake))
        .resource_manager(&settings)
        .build()
        .unwrap();

    let url = format!("https://management.azure.com{poll_path}?api-version=2017-05-10");
    let statuses = [
        u16::from(session.send(get(&url)).await.unwrap().status()),
        u16::from(session.send(get(&url)).await.unwrap().status()),
        u16::from(session.send(get(&url)).await.unwrap().status()),
    ];
    assert_eq!(statuses, [202, 202, 200]);

    let stats = session.stats().await;
    assert_eq!((stats.recorded, stats.suppressed), (1, 2));
    session.end_session().await.unwrap();

    let cassette = library.load("polling").unwrap();
    assert_eq!(cassette.len(), 1);
    let stored = &cassette.interactions[0];
    assert_eq!(stored.response.status, 200);
    assert_eq!(
        header_values(&stored.response.headers, "Retry-After"),
        Some(&vec!["1".to_string()])
    );
}

#[tokio::test]
async fn dropping_a_recording_session_flushes_it() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakeResourceManager::new().on("GET", "/ping", vec![Canned::new(200, "pong")]);
    let library = CassetteLibrary::new(dir.path());

    {
        let session = library
            .begin_session("dropped", VcrMode::RecordOnce)
            .inner_client(Box::new(fake))
            .build()
            .unwrap();
        let mut response = session.send(get("https://example.test/ping")).await.unwrap();
        assert_eq!(response.body_string().await.unwrap(), "pong");
        // No end_session: Drop must persist the interaction.
    }

    let cassette = library.load("dropped").unwrap();
    assert_eq!(cassette.len(), 1);
    assert_eq!(cassette.interactions[0].response.body.as_deref(), Some("pong"));
}

#[tokio::test]
async fn bypass_sessions_write_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let fake = FakeResourceManager::new().on("GET", "/ping", vec![Canned::new(200, "pong")]);
    let library = CassetteLibrary::new(dir.path());

    let session = library
        .begin_session("bypassed", VcrMode::Bypass)
        .inner_client(Box::new(fake.clone()))
        .build()
        .unwrap();
    assert_eq!(session.phase(), SessionPhase::Bypassing);

    let response = session.send(get("https://example.test/ping")).await.unwrap();
    assert_eq!(u16::from(response.status()), 200);
    session.end_session().await.unwrap();
    drop(session);

    assert_eq!(fake.call_count(), 1);
    assert!(!library.exists("bypassed"));
}

#[tokio::test]
async fn empty_recordings_are_not_written() {
    let dir = tempfile::tempdir().unwrap();
    let library = CassetteLibrary::new(dir.path());

    let session = library
        .begin_session("nothing", VcrMode::RecordOnce)
        .inner_client(Box::new(FakeResourceManager::new()))
        .build()
        .unwrap();
    session.end_session().await.unwrap();
    drop(session);

    assert!(!library.exists("nothing"));
}

#[derive(Debug)]
struct ConnectionReset;

#[async_trait]
impl HttpClient for ConnectionReset {
    async fn send(&self, _req: Request) -> Result<Response, http_client::Error> {
        Err(http_client::Error::from_str(502, "connection reset by peer"))
    }
}

#[tokio::test]
async fn transport_failures_surface_and_record_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let library = CassetteLibrary::new(dir.path());

    let session = library
        .begin_session("unreachable", VcrMode::RecordOnce)
        .inner_client(Box::new(ConnectionReset))
        .build()
        .unwrap();
    assert_eq!(session.phase(), SessionPhase::Recording);

    match session.intercept(get("https://example.test/ping")).await.unwrap_err() {
        Error::Transport(message) => assert!(message.contains("connection reset"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
    // The same error survives the HttpClient boundary.
    let wrapped = session.send(get("https://example.test/ping")).await.unwrap_err();
    assert!(matches!(Error::from_http(wrapped), Error::Transport(_)));

    assert_eq!(session.stats().await.recorded, 0);
    session.end_session().await.unwrap();
    drop(session);

    assert!(!library.exists("unreachable"));
}
