use super::*;
use serde_json::json;
use tempfile::tempdir;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> FlickrClient {
    FlickrClient::with_base_url(&server.uri(), Credentials::new("key", "secret", "token")).unwrap()
}

fn config(root: &Path, upload_mode: UploadMode) -> DaemonConfig {
    DaemonConfig {
        sync_root: root.to_path_buf(),
        upload_mode,
        ticket_poll_interval: Duration::from_millis(10),
        enable_local_watcher: false,
        once: true,
    }
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("GET"))
        .and(query_param("method", "flickr.test.login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user": { "id": "1@N00", "username": { "_content": "alice" } },
            "stat": "ok"
        })))
        .mount(server)
        .await;
}

async fn mount_empty_library(server: &MockServer) {
    Mock::given(method("GET"))
        .and(query_param("method", "flickr.photosets.getList"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "photosets": { "page": 1, "pages": 1, "photoset": [] },
            "stat": "ok"
        })))
        .mount(server)
        .await;
}

#[test]
fn expands_tilde_to_home_sync_dir() {
    let home = PathBuf::from("/tmp/home-user");
    assert_eq!(
        expand_with_home("~/FlickrBox", &home),
        PathBuf::from("/tmp/home-user/FlickrBox")
    );
    assert_eq!(expand_with_home("~", &home), home);
    assert_eq!(
        expand_with_home("/srv/photos", &home),
        PathBuf::from("/srv/photos")
    );
}

#[test]
fn reads_intervals_from_env_or_default() {
    assert_eq!(read_u64_env("NO_SUCH_ENV_FOR_FLICKRBOX_TEST", 42), 42);
}

#[test]
fn local_watcher_is_enabled_by_default() {
    assert!(read_bool_env("NO_SUCH_BOOL_ENV_FOR_FLICKRBOX_TEST", true));
}

#[tokio::test]
async fn rejected_login_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("method", "flickr.test.login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stat": "fail", "code": 98, "message": "Invalid auth token"
        })))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let result = DaemonRuntime::connect(config(dir.path(), UploadMode::Sync), client_for(&server)).await;

    let err = result.err().unwrap();
    assert!(err.to_string().contains("rejected the credentials"));
    let api = err.downcast_ref::<flickr_core::FlickrError>().unwrap();
    assert!(api.is_auth_failure());
}

#[tokio::test]
async fn unreachable_service_is_fatal_without_credential_hint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("method", "flickr.test.login"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let result = DaemonRuntime::connect(config(dir.path(), UploadMode::Sync), client_for(&server)).await;

    let err = result.err().unwrap();
    assert_eq!(err.to_string(), "Flickr authentication failed");
}

#[tokio::test]
async fn once_mode_uploads_new_directory_and_waits_for_tickets() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_empty_library(&server).await;
    Mock::given(method("POST"))
        .and(path("/services/upload/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"<rsp stat="ok"><ticketid>t1</ticketid></rsp>"#),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("method", "flickr.photos.upload.checkTickets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uploader": { "ticket": [ { "id": "t1", "complete": 1, "photoid": "p1" } ] },
            "stat": "ok"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/services/rest/"))
        .and(body_string_contains("method=flickr.photosets.create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "photoset": { "id": "s1" },
            "stat": "ok"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("Trip")).unwrap();
    std::fs::write(dir.path().join("Trip/cave.jpg"), b"cave").unwrap();
    std::fs::write(dir.path().join("Trip/.DS_Store"), b"").unwrap();

    let daemon = DaemonRuntime::connect(config(dir.path(), UploadMode::Async), client_for(&server))
        .await
        .unwrap();
    let engine = daemon.run().await.unwrap();

    let trip = engine.registry().collection("Trip").unwrap();
    assert_eq!(trip.id.as_str(), "s1");
    assert_eq!(trip.item("cave").unwrap().id.as_str(), "p1");
    assert_eq!(engine.pending_tickets(), 0);
}

#[tokio::test]
async fn once_mode_without_work_makes_no_writes() {
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_empty_library(&server).await;

    let dir = tempdir().unwrap();
    let root = dir.path().join("FlickrBox");
    let daemon = DaemonRuntime::connect(config(&root, UploadMode::Sync), client_for(&server))
        .await
        .unwrap();
    daemon.run().await.unwrap();

    assert!(root.is_dir());
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|request| request.method.as_str() == "GET"));
}
