mod common;

use common::{Canned, FakeResourceManager};
use http_client::{HttpClient, Request};
use http_types::{Method, Url};
use resource_manager_vcr::{CassetteLibrary, DefaultMatcher, Error, SessionPhase, VcrMode};

fn request(method: Method, url: &str) -> Request {
    Request::new(method, Url::parse(url).unwrap())
}

/// Records `GET /items?b=2&a=1` twice with different bodies, then `POST /items`.
async fn record_items(library: &CassetteLibrary, name: &str) {
    let fake = FakeResourceManager::new()
        .on(
            "GET",
            "/items",
            vec![Canned::new(200, "first"), Canned::new(200, "second")],
        )
        .on("POST", "/items", vec![Canned::new(201, "created")]);

    let session = library
        .begin_session(name, VcrMode::RecordOnce)
        .inner_client(Box::new(fake))
        .build()
        .unwrap();
    assert_eq!(session.phase(), SessionPhase::Recording);

    session
        .send(request(Method::Get, "https://example.test/items?b=2&a=1"))
        .await
        .unwrap();
    session
        .send(request(Method::Get, "https://example.test/items?b=2&a=1"))
        .await
        .unwrap();
    session
        .send(request(Method::Post, "https://example.test/items"))
        .await
        .unwrap();
    session.end_session().await.unwrap();
}

async fn body_of(client: &dyn HttpClient, method: Method, url: &str) -> Result<String, Error> {
    let mut response = client
        .send(request(method, url))
        .await
        .map_err(Error::from_http)?;
    Ok(response.body_string().await.unwrap())
}

#[tokio::test]
async fn replay_serves_interactions_in_recorded_order() {
    let dir = tempfile::tempdir().unwrap();
    let library = CassetteLibrary::new(dir.path());
    record_items(&library, "items").await;

    // Twice over the same cassette, with the query reordered.
    for _ in 0..2 {
        let session = library
            .begin_session("items", VcrMode::ReplayOnly)
            .build()
            .unwrap();
        assert_eq!(session.phase(), SessionPhase::Replaying);

        let bodies = [
            body_of(&session, Method::Get, "https://example.test/items?a=1&b=2").await.unwrap(),
            body_of(&session, Method::Post, "https://example.test/items").await.unwrap(),
            body_of(&session, Method::Get, "https://example.test/items?a=1&b=2").await.unwrap(),
        ];
        assert_eq!(bodies, ["first", "created", "second"]);
        assert_eq!(session.stats().await.replayed, 3);
    }
}

#[tokio::test]
async fn exhausted_interactions_are_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let library = CassetteLibrary::new(dir.path());
    record_items(&library, "exhausted").await;

    let session = library
        .begin_session("exhausted", VcrMode::RecordOnce)
        .build()
        .unwrap();
    assert_eq!(session.phase(), SessionPhase::Replaying);

    session
        .send(request(Method::Post, "https://example.test/items"))
        .await
        .unwrap();
    let err = body_of(&session, Method::Post, "https://example.test/items")
        .await
        .unwrap_err();

    match err {
        Error::NoMatchingInteraction {
            cassette,
            method,
            hint,
            ..
        } => {
            assert_eq!(cassette, "exhausted");
            assert_eq!(method, "POST");
            assert!(hint.contains("GET https://example.test/items"), "{hint}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn playback_repeats_reuse_the_last_match() {
    let dir = tempfile::tempdir().unwrap();
    let library = CassetteLibrary::new(dir.path());
    record_items(&library, "repeats").await;

    let session = library
        .begin_session("repeats", VcrMode::ReplayOnly)
        .allow_playback_repeats(true)
        .build()
        .unwrap();

    let url = "https://example.test/items?a=1&b=2";
    let bodies = [
        body_of(&session, Method::Get, url).await.unwrap(),
        body_of(&session, Method::Get, url).await.unwrap(),
        body_of(&session, Method::Get, url).await.unwrap(),
    ];
    assert_eq!(bodies, ["first", "second", "second"]);
}

#[tokio::test]
async fn ignoring_the_query_matches_any_query() {
    let dir = tempfile::tempdir().unwrap();
    let library = CassetteLibrary::new(dir.path());
    record_items(&library, "query").await;

    let strict = library.begin_session("query", VcrMode::ReplayOnly).build().unwrap();
    assert!(body_of(&strict, Method::Get, "https://example.test/items?page=2")
        .await
        .is_err());

    let relaxed = library
        .begin_session("query", VcrMode::ReplayOnly)
        .matcher(Box::new(DefaultMatcher::new().ignore_query()))
        .build()
        .unwrap();
    assert_eq!(
        body_of(&relaxed, Method::Get, "https://example.test/items?page=2")
            .await
            .unwrap(),
        "first"
    );
}

#[tokio::test]
async fn strict_replay_without_a_cassette_fails() {
    let dir = tempfile::tempdir().unwrap();
    let library = CassetteLibrary::new(dir.path());

    let err = library
        .begin_session("list_resource_groups", VcrMode::ReplayOnly)
        .build()
        .unwrap_err();

    match err {
        Error::CassetteMissing { name, path } => {
            assert_eq!(name, "list_resource_groups");
            assert_eq!(path, dir.path().join("list_resource_groups.yml"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn corrupt_cassettes_name_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let library = CassetteLibrary::new(dir.path());
    let path = library.path_for("corrupt");
    std::fs::write(&path, "interactions:\n  - request: [unterminated\n").unwrap();

    let err = library
        .begin_session("corrupt", VcrMode::RecordOnce)
        .build()
        .unwrap_err();

    match err {
        Error::MalformedCassette { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn replaying_never_touches_the_network() {
    let dir = tempfile::tempdir().unwrap();
    let library = CassetteLibrary::new(dir.path());
    record_items(&library, "offline").await;

    let fake = FakeResourceManager::new();
    let session = library
        .begin_session("offline", VcrMode::RecordOnce)
        .inner_client(Box::new(fake.clone()))
        .build()
        .unwrap();

    assert!(body_of(&session, Method::Delete, "https://example.test/items")
        .await
        .is_err());
    assert_eq!(fake.call_count(), 0);
}

#[tokio::test]
async fn listed_headers_take_part_in_matching() {
    let dir = tempfile::tempdir().unwrap();
    let library = CassetteLibrary::new(dir.path());
    let correlated = |id: &str| {
        let mut req = request(Method::Get, "https://example.test/items");
        req.insert_header("x-ms-correlation-request-id", id).unwrap();
        req
    };

    let fake = FakeResourceManager::new().on("GET", "/items", vec![Canned::new(200, "first")]);
    let recording = library
        .begin_session("correlated", VcrMode::RecordOnce)
        .inner_client(Box::new(fake))
        .build()
        .unwrap();
    recording.send(correlated("a")).await.unwrap();
    recording.end_session().await.unwrap();

    let session = library
        .begin_session("correlated", VcrMode::ReplayOnly)
        .matcher(Box::new(
            DefaultMatcher::new().with_headers(vec!["x-ms-correlation-request-id".to_string()]),
        ))
        .build()
        .unwrap();

    match session.intercept(correlated("b")).await.unwrap_err() {
        Error::NoMatchingInteraction { method, .. } => assert_eq!(method, "GET"),
        other => panic!("unexpected error: {other:?}"),
    }
    let mut response = session.intercept(correlated("a")).await.unwrap();
    assert_eq!(response.body_string().await.unwrap(), "first");
}
