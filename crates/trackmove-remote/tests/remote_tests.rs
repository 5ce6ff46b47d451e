use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use trackmove::test_support::{activity_between, at};
use trackmove::{
    Activity, ActivityId, ActivityKind, Backend, BackendError, Capability, MetadataUpdate, RetryPolicy,
    RetryingBackend, Track,
};
use trackmove_remote::{RemoteBackend, RemoteBackendConfig};
use wiremock::matchers::{body_json, body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> RemoteBackendConfig {
    RemoteBackendConfig {
        label: "tracker".into(),
        base_url: server.uri(),
        username: Some("me".into()),
        token: Some("secret".into()),
        unsupported: Vec::new(),
    }
}

fn backend_for(server: &MockServer) -> RemoteBackend {
    RemoteBackend::new(config_for(server))
}

#[tokio::test]
async fn list_maps_entries_to_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/activities"))
        .and(header("authorization", "Basic bWU6c2VjcmV0"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            include_str!("fixtures/activities.json"),
            "application/json",
        ))
        .mount(&server)
        .await;

    let headers = backend_for(&server).list().await.unwrap();

    assert_eq!(headers.len(), 3);
    let ride = &headers[0];
    assert_eq!(ride.id, ActivityId::new("1001"));
    assert_eq!(ride.title, "Morning ride");
    assert_eq!(ride.keywords, vec!["bike", "gravel"]);
    assert!(ride.public);
    assert_eq!(ride.what, ActivityKind::MountainBiking);
    let summary = ride.summary.unwrap();
    assert_eq!(summary.time_range.start, at("10:00"));
    assert_eq!(summary.point_count, 31);

    let bare = &headers[1];
    assert_eq!(bare.description, "");
    assert_eq!(bare.summary, None);
    assert_eq!(bare.what, ActivityKind::Cycling);

    assert_eq!(headers[2].what, ActivityKind::Cycling);
}

#[tokio::test]
async fn fetch_builds_track_from_points() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/activities/1001/points"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(include_str!("fixtures/points.json"), "application/json"),
        )
        .mount(&server)
        .await;

    let track = backend_for(&server)
        .fetch(&ActivityId::new("1001"))
        .await
        .unwrap();

    assert_eq!(track.len(), 3);
    assert_eq!(track.points()[0].elevation(), Some(410.5));
    assert_eq!(track.points()[1].elevation(), None);
    assert_eq!(track.last_time(), Some(at("10:00:10")));
}

#[tokio::test]
async fn out_of_order_points_are_a_data_integrity_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/activities/5/points"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            include_str!("fixtures/points_out_of_order.json"),
            "application/json",
        ))
        .mount(&server)
        .await;

    let err = backend_for(&server)
        .fetch(&ActivityId::new("5"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::DataIntegrity(_)));
}

#[tokio::test]
async fn save_posts_activity_and_returns_issued_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/activities"))
        .and(body_partial_json(json!({
            "title": "ride",
            "description": "",
            "public": false,
            "what": "Hiking",
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "2001" })))
        .expect(1)
        .mount(&server)
        .await;

    let id = backend_for(&server)
        .save(&activity_between("ride", "10:00", "10:01", 3).with_what(ActivityKind::Hiking))
        .await
        .unwrap();
    assert_eq!(id, ActivityId::new("2001"));
}

#[tokio::test]
async fn empty_activity_is_rejected_without_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let err = backend_for(&server)
        .save(&Activity::new(Track::empty()))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Permanent(_)));
}

#[tokio::test]
async fn missing_activity_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/activities/404/points"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = backend_for(&server)
        .fetch(&ActivityId::new("404"))
        .await
        .unwrap_err();
    assert_eq!(err, BackendError::NotFound(ActivityId::new("404")));
}

#[tokio::test]
async fn rate_limit_and_server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/activities"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/activities"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let backend = backend_for(&server);
    assert!(backend.list().await.unwrap_err().is_transient());
    assert!(backend.list().await.unwrap_err().is_transient());
}

#[tokio::test]
async fn auth_failure_is_permanent_and_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/activities"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
        .expect(1)
        .mount(&server)
        .await;

    let backend = RetryingBackend::new(
        Arc::new(backend_for(&server)),
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        },
    );
    let err = backend.list().await.unwrap_err();
    assert!(matches!(err, BackendError::Permanent(ref msg) if msg.contains("bad credentials")));
}

#[tokio::test]
async fn transient_failure_is_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/activities"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/activities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let backend = RetryingBackend::new(
        Arc::new(backend_for(&server)),
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        },
    );
    assert!(backend.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn undecodable_body_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/activities"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let err = backend_for(&server).list().await.unwrap_err();
    assert!(matches!(err, BackendError::Permanent(_)));
}

#[tokio::test]
async fn unsupported_operations_fail_locally() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let backend = RemoteBackend::new(RemoteBackendConfig {
        unsupported: vec![Capability::Remove, Capability::UpdateVisibility],
        ..config_for(&server)
    });

    let err = backend.remove(&ActivityId::new("1")).await.unwrap_err();
    assert_eq!(err, BackendError::unsupported("tracker", Capability::Remove));

    let update = MetadataUpdate::new().title("Renamed").public(true);
    let err = backend
        .update_metadata(&ActivityId::new("1"), &update)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BackendError::unsupported("tracker", Capability::UpdateVisibility)
    );
}

#[tokio::test]
async fn update_metadata_patches_only_given_fields() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/activities/1001"))
        .and(body_json(json!({ "title": "Renamed", "public": true, "what": "Rowing" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    backend_for(&server)
        .update_metadata(
            &ActivityId::new("1001"),
            &MetadataUpdate::new()
                .title("Renamed")
                .public(true)
                .what(ActivityKind::Rowing),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn remove_deletes_by_id() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/activities/1001"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    backend_for(&server)
        .remove(&ActivityId::new("1001"))
        .await
        .unwrap();
}
