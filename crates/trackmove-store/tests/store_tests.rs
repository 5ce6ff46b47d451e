use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use trackmove::test_support::{InMemoryBackend, activity_between, at, track_between};
use trackmove::{
    Activity, ActivityId, ActivityKind, Backend, BackendError, Collection, MetadataUpdate, Point, SyncOptions,
    Track, sync,
};
use trackmove_store::ActivityStore;

fn create_store() -> ActivityStore {
    ActivityStore::open_in_memory("local").unwrap()
}

#[tokio::test]
async fn list_returns_empty_when_no_activities() {
    let store = create_store();
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn list_reports_summaries_in_time_order() {
    let store = create_store();
    store
        .save(&activity_between("noon", "12:00", "12:20", 21))
        .await
        .unwrap();
    store
        .save(&activity_between("morning", "08:00", "08:30", 31))
        .await
        .unwrap();

    let headers = store.list().await.unwrap();
    let titles: Vec<&str> = headers.iter().map(|h| h.title.as_str()).collect();
    assert_eq!(titles, vec!["morning", "noon"]);

    let summary = headers[0].summary.unwrap();
    assert_eq!(summary.time_range.start, at("08:00"));
    assert_eq!(summary.time_range.end, at("08:30"));
    assert_eq!(summary.point_count, 31);
}

#[tokio::test]
async fn fetch_returns_points_as_saved() {
    let store = create_store();
    let points = vec![
        Point::new(at("10:00"), 47.0, 8.0).with_elevation(410.5),
        Point::new(at("10:00"), 47.0001, 8.0),
        Point::new(at("10:00:01"), 47.0002, 8.0001),
    ];
    let activity = Activity::new(Track::new(points.clone()).unwrap()).with_title("dup");

    let id = store.save(&activity).await.unwrap();
    let track = store.fetch(&id).await.unwrap();

    assert_eq!(track.points(), points.as_slice());
    assert_eq!(track.points()[0].elevation(), Some(410.5));
    assert_eq!(track.points()[1].elevation(), None);
}

#[tokio::test]
async fn sub_second_times_survive() {
    let store = create_store();
    let track = track_between("10:00:00", "10:29:59", 30);
    let id = store.save(&Activity::new(track.clone())).await.unwrap();

    assert_eq!(store.fetch(&id).await.unwrap(), track);
}

#[tokio::test]
async fn metadata_is_stored_with_the_activity() {
    let store = create_store();
    let mut activity = activity_between("ride", "10:00", "10:30", 31)
        .with_description("lake loop")
        .with_what(ActivityKind::MountainBiking);
    activity.set_keywords(["gravel", "bike", "gravel"]).unwrap();
    activity.set_public(true);

    let id = store.save(&activity).await.unwrap();
    let header = store.list().await.unwrap().remove(0);

    assert_eq!(header.id, id);
    assert_eq!(header.title, "ride");
    assert_eq!(header.description, "lake loop");
    assert_eq!(header.keywords, vec!["bike", "gravel"]);
    assert!(header.public);
    assert_eq!(header.what, ActivityKind::MountainBiking);
}

#[tokio::test]
async fn fetch_returns_not_found_for_missing_id() {
    let store = create_store();
    for id in ["42", "not-a-row"] {
        let result = store.fetch(&ActivityId::new(id)).await;
        assert!(matches!(result, Err(BackendError::NotFound(_))));
    }
}

#[tokio::test]
async fn empty_activity_is_stored_without_summary() {
    let store = create_store();
    let id = store.save(&Activity::new(Track::empty())).await.unwrap();

    let header = store.list().await.unwrap().remove(0);
    assert_eq!(header.summary, None);
    assert!(store.fetch(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn remove_deletes_activity_and_points() {
    let store = create_store();
    let id = store
        .save(&activity_between("ride", "10:00", "10:30", 31))
        .await
        .unwrap();

    store.remove(&id).await.unwrap();

    assert!(store.list().await.unwrap().is_empty());
    assert!(matches!(
        store.fetch(&id).await,
        Err(BackendError::NotFound(_))
    ));
    assert!(matches!(
        store.remove(&id).await,
        Err(BackendError::NotFound(_))
    ));
}

#[tokio::test]
async fn update_metadata_changes_only_given_fields() {
    let store = create_store();
    let id = store
        .save(&activity_between("ride", "10:00", "10:30", 31).with_description("keep me"))
        .await
        .unwrap();

    store
        .update_metadata(&id, &MetadataUpdate::new().title("Evening ride").public(true))
        .await
        .unwrap();

    let header = store.list().await.unwrap().remove(0);
    assert_eq!(header.title, "Evening ride");
    assert_eq!(header.description, "keep me");
    assert!(header.public);
    assert_eq!(header.what, ActivityKind::Cycling);

    store
        .update_metadata(&id, &MetadataUpdate::new().what(ActivityKind::Rowing))
        .await
        .unwrap();
    let header = store.list().await.unwrap().remove(0);
    assert_eq!(header.what, ActivityKind::Rowing);
    assert_eq!(header.title, "Evening ride");
}

#[tokio::test]
async fn reserved_keywords_are_rejected() {
    let store = create_store();
    let id = store
        .save(&activity_between("ride", "10:00", "10:30", 31))
        .await
        .unwrap();

    let err = store
        .update_metadata(&id, &MetadataUpdate::new().keywords(["Status:public"]))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Permanent(_)));
    assert!(store.list().await.unwrap()[0].keywords.is_empty());
}

#[tokio::test]
async fn unloaded_activity_cannot_be_saved() {
    let source = Arc::new(InMemoryBackend::new("mem"));
    source.insert(activity_between("ride", "10:00", "10:30", 31));
    let mut collection = Collection::new(source as Arc<dyn Backend>);
    let header_only = collection.get(0).await.unwrap().unwrap();

    let err = create_store().save(header_only).await.unwrap_err();
    assert!(matches!(err, BackendError::Permanent(_)));
}

#[tokio::test]
async fn store_works_as_sync_target() {
    let source = Arc::new(InMemoryBackend::new("tracker"));
    source.insert(activity_between("morning", "10:00", "10:30", 31));
    source.insert(activity_between("noon", "11:00", "11:20", 21));
    let store: Arc<dyn Backend> = Arc::new(create_store());

    let mut from = Collection::new(source as Arc<dyn Backend>);
    let mut to = Collection::new(Arc::clone(&store));
    let token = CancellationToken::new();

    let report = sync(&mut from, &mut to, &SyncOptions::default(), &token)
        .await
        .unwrap();
    assert_eq!(report.copied.len(), 2);
    assert!(report.is_clean());

    let again = sync(&mut from, &mut to, &SyncOptions::default(), &token)
        .await
        .unwrap();
    assert!(again.copied.is_empty());
    assert_eq!(again.skipped.len(), 2);
    assert_eq!(store.list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn file_store_persists_across_opens() {
    let path = std::env::temp_dir().join(format!("trackmove-store-{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let id = {
        let store = ActivityStore::open(&path, "disk").unwrap();
        store
            .save(&activity_between("ride", "10:00", "10:30", 31))
            .await
            .unwrap()
    };

    let reopened = ActivityStore::open(&path, "disk").unwrap();
    assert_eq!(reopened.fetch(&id).await.unwrap().len(), 31);
    assert_eq!(reopened.label(), "disk");

    drop(reopened);
    let _ = std::fs::remove_file(&path);
}
