use super::*;
use flickr_core::{Credentials, Photo, Photoset};
use serde_json::json;
use tempfile::tempdir;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> FlickrClient {
    FlickrClient::with_base_url(&server.uri(), Credentials::new("key", "secret", "token")).unwrap()
}

fn photo(id: &str, title: &str) -> Photo {
    Photo {
        id: PhotoId::from(id),
        title: title.to_string(),
        original_format: Some("jpg".into()),
    }
}

fn photoset(id: &str, title: &str, primary: &str) -> Photoset {
    Photoset {
        id: PhotosetId::from(id),
        primary: Some(PhotoId::from(primary)),
        title: title.to_string(),
    }
}

fn trip_registry() -> Registry {
    Registry::from_remote(vec![(
        photoset("s1", "Trip", "p1"),
        vec![photo("p1", "beach")],
    )])
}

fn engine(server: &MockServer, registry: Registry, root: &Path, mode: UploadMode) -> SyncEngine {
    SyncEngine::new(client_for(server), registry, root.to_path_buf(), mode)
}

fn ok() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "stat": "ok" }))
}

async fn mount_post(server: &MockServer, api_method: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/services/rest/"))
        .and(body_string_contains(format!("method={api_method}")))
        .respond_with(response)
        .mount(server)
        .await;
}

async fn mount_upload(server: &MockServer, xml: &str) {
    Mock::given(method("POST"))
        .and(path("/services/upload/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(xml))
        .mount(server)
        .await;
}

async fn posted_methods(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|request| request.url.path() == "/services/rest/")
        .filter_map(|request| {
            let body = String::from_utf8_lossy(&request.body).to_string();
            url::form_urlencoded::parse(body.as_bytes())
                .find(|(key, _)| key == "method")
                .map(|(_, value)| value.to_string())
        })
        .collect()
}

#[test]
fn upload_mode_parses_case_insensitively() {
    assert_eq!("sync".parse::<UploadMode>().unwrap(), UploadMode::Sync);
    assert_eq!(" ASYNC ".parse::<UploadMode>().unwrap(), UploadMode::Async);
    assert!("later".parse::<UploadMode>().is_err());
    assert_eq!(UploadMode::default(), UploadMode::Async);
}

#[tokio::test]
async fn pass_downloads_remote_item_into_new_directory() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("method", "flickr.photos.getSizes"))
        .and(query_param("photo_id", "p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sizes": { "size": [
                { "label": "Medium", "source": format!("{}/p1_m.jpg", server.uri()) },
                { "label": "Original", "source": format!("{}/p1_o.jpg", server.uri()) }
            ] },
            "stat": "ok"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/p1_o.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"beach-bytes"))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let mut engine = engine(&server, trip_registry(), dir.path(), UploadMode::Sync);

    let report = engine.run_pass().await.unwrap();

    assert_eq!(report.created_dirs, 1);
    assert_eq!(report.downloaded, 1);
    assert_eq!(
        std::fs::read(dir.path().join("Trip/beach.jpg")).unwrap(),
        b"beach-bytes"
    );
    assert_eq!(engine.run_pass().await.unwrap(), PassReport::default());
}

#[tokio::test]
async fn pass_skips_titles_that_cannot_be_paths() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("method", "flickr.photos.getSizes"))
        .and(query_param("photo_id", "p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sizes": { "size": [
                { "label": "Original", "source": format!("{}/p1_o.jpg", server.uri()) }
            ] },
            "stat": "ok"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/p1_o.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"beach-bytes"))
        .mount(&server)
        .await;

    let registry = Registry::from_remote(vec![
        (photoset("s1", "Trip", "p1"), vec![photo("p1", "beach"), photo("p2", "a/b")]),
        (photoset("s2", "2019/2020", "p3"), vec![photo("p3", "party")]),
    ]);
    let dir = tempdir().unwrap();
    let mut engine = engine(&server, registry, dir.path(), UploadMode::Sync);

    let report = engine.run_pass().await.unwrap();

    assert_eq!(report.created_dirs, 1);
    assert_eq!(report.downloaded, 1);
    assert_eq!(report.skipped, 3);
    assert!(dir.path().join("Trip/beach.jpg").is_file());
    assert!(!dir.path().join("2019").exists());
}

#[tokio::test]
async fn pass_uploads_local_extra_into_existing_collection() {
    let server = MockServer::start().await;
    mount_upload(&server, r#"<rsp stat="ok"><photoid>p2</photoid></rsp>"#).await;
    mount_post(&server, "flickr.photosets.addPhoto", ok()).await;

    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("Trip")).unwrap();
    std::fs::write(dir.path().join("Trip/beach.jpg"), b"beach").unwrap();
    std::fs::write(dir.path().join("Trip/cave.jpg"), b"cave").unwrap();
    std::fs::write(dir.path().join("Trip/.DS_Store"), b"").unwrap();
    let mut engine = engine(&server, trip_registry(), dir.path(), UploadMode::Sync);

    let report = engine.run_pass().await.unwrap();

    assert_eq!(report.uploaded, 1);
    assert_eq!(report.downloaded, 0);
    let item = engine.registry().item("Trip", "cave").unwrap();
    assert_eq!(item.id, PhotoId::from("p2"));
    assert_eq!(posted_methods(&server).await, vec!["flickr.photosets.addPhoto"]);
}

#[tokio::test]
async fn first_upload_into_new_directory_creates_collection() {
    let server = MockServer::start().await;
    mount_upload(&server, r#"<rsp stat="ok"><photoid>p9</photoid></rsp>"#).await;
    mount_post(
        &server,
        "flickr.photosets.create",
        ResponseTemplate::new(200).set_body_json(json!({
            "photoset": { "id": "s9" },
            "stat": "ok"
        })),
    )
    .await;
    mount_post(&server, "flickr.photosets.addPhoto", ok()).await;

    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("New")).unwrap();
    std::fs::write(dir.path().join("New/x.jpg"), b"x").unwrap();
    std::fs::write(dir.path().join("New/y.png"), b"y").unwrap();
    let mut engine = engine(&server, Registry::default(), dir.path(), UploadMode::Sync);

    let report = engine.run_pass().await.unwrap();

    assert_eq!(report.uploaded, 2);
    let collection = engine.registry().collection("New").unwrap();
    assert_eq!(collection.id, PhotosetId::from("s9"));
    assert_eq!(collection.primary, Some(PhotoId::from("p9")));
    assert_eq!(
        posted_methods(&server).await,
        vec!["flickr.photosets.create", "flickr.photosets.addPhoto"]
    );
}

#[tokio::test]
async fn upload_skips_titles_already_remote_and_unsupported_files() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    let mut engine = engine(&server, trip_registry(), dir.path(), UploadMode::Sync);

    assert_eq!(
        engine.upload_file("Trip", "beach", ".png").await.unwrap(),
        UploadOutcome::Skipped(SkipReason::AlreadyPresent)
    );
    assert_eq!(
        engine.upload_file("Trip", "notes", ".txt").await.unwrap(),
        UploadOutcome::Skipped(SkipReason::Filtered)
    );
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn async_upload_is_attached_when_ticket_completes() {
    let server = MockServer::start().await;
    mount_upload(&server, r#"<rsp stat="ok"><ticketid>t1</ticketid></rsp>"#).await;
    mount_post(&server, "flickr.photosets.addPhoto", ok()).await;

    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("Trip")).unwrap();
    std::fs::write(dir.path().join("Trip/cave.jpg"), b"cave").unwrap();
    let mut engine = engine(&server, trip_registry(), dir.path(), UploadMode::Async);
    let (intake, mut tickets) = mpsc::unbounded_channel();
    engine.attach_ticket_intake(intake);

    let outcome = engine.upload_file("Trip", "cave", ".jpg").await.unwrap();
    assert_eq!(outcome, UploadOutcome::Ticketed(TicketId::from("t1")));
    assert_eq!(tickets.recv().await.unwrap(), TicketId::from("t1"));
    assert!(!engine.registry().contains_item("Trip", "cave"));
    assert_eq!(
        engine.upload_file("Trip", "cave", ".jpg").await.unwrap(),
        UploadOutcome::Skipped(SkipReason::AlreadyPresent)
    );

    let resolution = engine
        .apply_ticket_status(TicketStatus {
            id: TicketId::from("t1"),
            state: TicketState::Complete(PhotoId::from("p2")),
        })
        .await;

    assert_eq!(
        resolution,
        TicketResolution::Attached(AttachOutcome::AddedToCollection {
            collection: "Trip".into(),
            photo: PhotoId::from("p2"),
        })
    );
    assert_eq!(engine.registry().item("Trip", "cave").unwrap().id, PhotoId::from("p2"));
    assert_eq!(engine.pending_tickets(), 0);
}

#[tokio::test]
async fn async_upload_without_poller_is_an_error() {
    let server = MockServer::start().await;
    mount_upload(&server, r#"<rsp stat="ok"><ticketid>t1</ticketid></rsp>"#).await;

    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("Trip")).unwrap();
    std::fs::write(dir.path().join("Trip/cave.jpg"), b"cave").unwrap();
    let mut engine = engine(&server, trip_registry(), dir.path(), UploadMode::Async);

    let err = engine.upload_file("Trip", "cave", ".jpg").await.unwrap_err();

    assert!(matches!(err, EngineError::TicketIntakeClosed(_)));
}

#[tokio::test]
async fn failed_attach_keeps_photo_as_orphan() {
    let server = MockServer::start().await;
    mount_post(
        &server,
        "flickr.photosets.addPhoto",
        ResponseTemplate::new(200).set_body_json(json!({
            "stat": "fail", "code": 1, "message": "Photoset not found"
        })),
    )
    .await;

    let dir = tempdir().unwrap();
    let mut engine = engine(&server, trip_registry(), dir.path(), UploadMode::Async);
    engine.pending.insert(
        TicketId::from("t1"),
        PendingUpload {
            collection: "Trip".into(),
            title: "cave".into(),
            extension: ".jpg".into(),
        },
    );

    let resolution = engine
        .apply_ticket_status(TicketStatus {
            id: TicketId::from("t1"),
            state: TicketState::Complete(PhotoId::from("p2")),
        })
        .await;

    assert!(matches!(resolution, TicketResolution::AttachFailed { .. }));
    assert!(!engine.registry().contains_item("Trip", "cave"));
    assert_eq!(engine.registry().orphans()[0].id, PhotoId::from("p2"));
}

#[tokio::test]
async fn failed_and_unknown_tickets_leave_registry_untouched() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    let mut engine = engine(&server, trip_registry(), dir.path(), UploadMode::Async);
    engine.pending.insert(
        TicketId::from("t1"),
        PendingUpload {
            collection: "Trip".into(),
            title: "cave".into(),
            extension: ".jpg".into(),
        },
    );

    let failed = engine
        .apply_ticket_status(TicketStatus {
            id: TicketId::from("t1"),
            state: TicketState::Failed,
        })
        .await;
    let unknown = engine
        .apply_ticket_status(TicketStatus {
            id: TicketId::from("t7"),
            state: TicketState::Complete(PhotoId::from("p7")),
        })
        .await;

    assert_eq!(
        failed,
        TicketResolution::UploadFailed {
            collection: "Trip".into(),
            title: "cave".into(),
        }
    );
    assert_eq!(unknown, TicketResolution::Unknown(TicketId::from("t7")));
    assert_eq!(engine.registry().collection("Trip").unwrap().len(), 1);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn pending_status_keeps_ticket_outstanding() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    let mut engine = engine(&server, trip_registry(), dir.path(), UploadMode::Async);
    engine.pending.insert(
        TicketId::from("t1"),
        PendingUpload {
            collection: "Trip".into(),
            title: "cave".into(),
            extension: ".jpg".into(),
        },
    );

    let resolution = engine
        .apply_ticket_status(TicketStatus {
            id: TicketId::from("t1"),
            state: TicketState::Pending,
        })
        .await;

    assert_eq!(resolution, TicketResolution::StillPending(TicketId::from("t1")));
    assert_eq!(engine.pending_tickets(), 1);
    assert_eq!(
        engine.upload_file("Trip", "cave", ".jpg").await.unwrap(),
        UploadOutcome::Skipped(SkipReason::AlreadyPresent)
    );
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn deleting_last_item_drops_collection_without_deleting_photoset() {
    let server = MockServer::start().await;
    mount_post(&server, "flickr.photos.delete", ok()).await;

    let dir = tempdir().unwrap();
    let mut engine = engine(&server, trip_registry(), dir.path(), UploadMode::Sync);

    let outcome = engine.delete_item("Trip", "beach").await.unwrap();

    assert_eq!(
        outcome,
        DeleteOutcome::Deleted {
            collection_dropped: true
        }
    );
    assert!(!engine.registry().contains_collection("Trip"));
    assert_eq!(posted_methods(&server).await, vec!["flickr.photos.delete"]);
}

#[tokio::test]
async fn deleting_untracked_file_does_nothing() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    let mut engine = engine(&server, trip_registry(), dir.path(), UploadMode::Sync);

    let outcome = engine.delete_item("Trip", "ghost").await.unwrap();

    assert_eq!(outcome, DeleteOutcome::NotTracked);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_remote_delete_keeps_registry_entry() {
    let server = MockServer::start().await;
    mount_post(
        &server,
        "flickr.photos.delete",
        ResponseTemplate::new(200).set_body_json(json!({
            "stat": "fail", "code": 1, "message": "Photo not found"
        })),
    )
    .await;

    let dir = tempdir().unwrap();
    let mut engine = engine(&server, trip_registry(), dir.path(), UploadMode::Sync);

    let err = engine.delete_item("Trip", "beach").await.unwrap_err();

    assert!(matches!(err, EngineError::Api(FlickrError::Api { code: 1, .. })));
    assert!(engine.registry().contains_item("Trip", "beach"));
}

#[tokio::test]
async fn rename_within_collection_retitles_photo() {
    let server = MockServer::start().await;
    mount_post(&server, "flickr.photos.setMeta", ok()).await;

    let dir = tempdir().unwrap();
    let mut engine = engine(&server, trip_registry(), dir.path(), UploadMode::Sync);

    let outcome = engine
        .move_item(
            &ItemRef::new("Trip", "beach", ".jpg"),
            &ItemRef::new("Trip", "shore", ".jpg"),
        )
        .await
        .unwrap();

    assert_eq!(outcome, MoveOutcome::Retitled);
    assert!(engine.registry().contains_item("Trip", "shore"));
    assert!(!engine.registry().contains_item("Trip", "beach"));
    assert_eq!(posted_methods(&server).await, vec!["flickr.photos.setMeta"]);
}

#[tokio::test]
async fn rename_onto_existing_title_deletes_replaced_photo() {
    let server = MockServer::start().await;
    mount_post(&server, "flickr.photos.delete", ok()).await;
    mount_post(&server, "flickr.photos.setMeta", ok()).await;

    let registry = Registry::from_remote(vec![(
        photoset("s1", "Trip", "p1"),
        vec![photo("p1", "a"), photo("p2", "b")],
    )]);
    let dir = tempdir().unwrap();
    let mut engine = engine(&server, registry, dir.path(), UploadMode::Sync);

    let outcome = engine
        .move_item(
            &ItemRef::new("Trip", "a", ".jpg"),
            &ItemRef::new("Trip", "b", ".jpg"),
        )
        .await
        .unwrap();

    assert_eq!(outcome, MoveOutcome::Retitled);
    let trip = engine.registry().collection("Trip").unwrap();
    assert_eq!(trip.len(), 1);
    assert_eq!(trip.item("b").unwrap().id, PhotoId::from("p1"));
    assert!(engine.registry().orphans().is_empty());
    let requests = server.received_requests().await.unwrap();
    let delete_body = String::from_utf8_lossy(&requests[0].body).to_string();
    assert!(delete_body.contains("photo_id=p2"));
    assert_eq!(
        posted_methods(&server).await,
        vec!["flickr.photos.delete", "flickr.photos.setMeta"]
    );
}

#[tokio::test]
async fn move_onto_taken_title_in_other_collection_replaces_it() {
    let server = MockServer::start().await;
    mount_post(&server, "flickr.photos.delete", ok()).await;
    mount_post(&server, "flickr.photosets.removePhoto", ok()).await;
    mount_post(&server, "flickr.photosets.addPhoto", ok()).await;

    let registry = Registry::from_remote(vec![
        (photoset("s1", "Trip", "p1"), vec![photo("p1", "beach"), photo("p3", "sofa")]),
        (photoset("s2", "Home", "p2"), vec![photo("p2", "sofa"), photo("p4", "lamp")]),
    ]);
    let dir = tempdir().unwrap();
    let mut engine = engine(&server, registry, dir.path(), UploadMode::Sync);

    engine
        .move_item(
            &ItemRef::new("Trip", "sofa", ".jpg"),
            &ItemRef::new("Home", "sofa", ".jpg"),
        )
        .await
        .unwrap();

    let home = engine.registry().collection("Home").unwrap();
    assert_eq!(home.len(), 2);
    assert_eq!(home.item("sofa").unwrap().id, PhotoId::from("p3"));
    assert!(!engine.registry().contains_item("Trip", "sofa"));
    assert!(engine.registry().orphans().is_empty());
    assert_eq!(
        posted_methods(&server).await,
        vec![
            "flickr.photos.delete",
            "flickr.photosets.removePhoto",
            "flickr.photosets.addPhoto"
        ]
    );
}

#[tokio::test]
async fn move_between_collections_relocates_photo() {
    let server = MockServer::start().await;
    mount_post(&server, "flickr.photosets.removePhoto", ok()).await;
    mount_post(&server, "flickr.photosets.addPhoto", ok()).await;

    let registry = Registry::from_remote(vec![
        (photoset("s1", "Trip", "p1"), vec![photo("p1", "beach"), photo("p3", "dunes")]),
        (photoset("s2", "Home", "p2"), vec![photo("p2", "sofa")]),
    ]);
    let dir = tempdir().unwrap();
    let mut engine = engine(&server, registry, dir.path(), UploadMode::Sync);

    let outcome = engine
        .move_item(
            &ItemRef::new("Trip", "dunes", ".jpg"),
            &ItemRef::new("Home", "dunes", ".jpg"),
        )
        .await
        .unwrap();

    assert_eq!(
        outcome,
        MoveOutcome::Relocated(AttachOutcome::AddedToCollection {
            collection: "Home".into(),
            photo: PhotoId::from("p3"),
        })
    );
    assert!(engine.registry().contains_item("Home", "dunes"));
    assert!(!engine.registry().contains_item("Trip", "dunes"));
    assert_eq!(
        posted_methods(&server).await,
        vec!["flickr.photosets.removePhoto", "flickr.photosets.addPhoto"]
    );
}

#[tokio::test]
async fn moving_untracked_file_uploads_destination() {
    let server = MockServer::start().await;
    mount_upload(&server, r#"<rsp stat="ok"><photoid>p5</photoid></rsp>"#).await;
    mount_post(&server, "flickr.photosets.addPhoto", ok()).await;

    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("Trip")).unwrap();
    std::fs::write(dir.path().join("Trip/cave.jpg"), b"cave").unwrap();
    let mut engine = engine(&server, trip_registry(), dir.path(), UploadMode::Sync);

    let outcome = engine
        .move_item(
            &ItemRef::new("Elsewhere", "cave", ".jpg"),
            &ItemRef::new("Trip", "cave", ".jpg"),
        )
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        MoveOutcome::Uploaded(UploadOutcome::Attached(_))
    ));
    assert!(engine.registry().contains_item("Trip", "cave"));
}

#[tokio::test]
async fn directory_rename_renames_photoset() {
    let server = MockServer::start().await;
    mount_post(&server, "flickr.photosets.editMeta", ok()).await;

    let dir = tempdir().unwrap();
    let mut engine = engine(&server, trip_registry(), dir.path(), UploadMode::Sync);

    assert!(engine.rename_collection("Trip", "Holiday").await.unwrap());
    assert!(!engine.rename_collection("Nope", "Other").await.unwrap());

    assert!(engine.registry().contains_item("Holiday", "beach"));
    assert!(!engine.registry().contains_collection("Trip"));
    assert_eq!(posted_methods(&server).await, vec!["flickr.photosets.editMeta"]);
}

#[tokio::test]
async fn local_events_are_dispatched() {
    let server = MockServer::start().await;
    mount_post(&server, "flickr.photos.delete", ok()).await;

    let dir = tempdir().unwrap();
    let mut engine = engine(&server, trip_registry(), dir.path(), UploadMode::Sync);

    engine
        .handle_local_event(LocalEvent::Deleted(ItemRef::new("Trip", "beach", ".jpg")))
        .await
        .unwrap();

    assert!(!engine.registry().contains_collection("Trip"));
}
