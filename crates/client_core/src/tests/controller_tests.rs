use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex as StdMutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use shared::{domain::ProcessingAction, protocol::UploadResponse};
use storage::{KeyValueStore, MemoryStore, CATALOG_KEY};
use tokio::sync::Notify;

use super::*;
use crate::{error::ApiError, types::SelectedFile, AlwaysConfirm, NoticeLevel};

enum Scripted {
    Status(ImageStatus),
    Unreachable,
}

struct FakeImageApi {
    base_url: Url,
    upload_id: StdMutex<Option<String>>,
    upload_gate: StdMutex<Option<Arc<Notify>>>,
    statuses: StdMutex<VecDeque<Scripted>>,
    delete_ok: AtomicBool,
    uploads: AtomicUsize,
    status_calls: AtomicUsize,
    deletes: AtomicUsize,
}

impl FakeImageApi {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            base_url: Url::parse("http://images.test").expect("url"),
            upload_id: StdMutex::new(Some("img-1".to_string())),
            upload_gate: StdMutex::new(None),
            statuses: StdMutex::new(VecDeque::new()),
            delete_ok: AtomicBool::new(true),
            uploads: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        })
    }

    fn script(&self, steps: impl IntoIterator<Item = Scripted>) {
        self.statuses.lock().expect("statuses").extend(steps);
    }

    fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageApi for FakeImageApi {
    fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn upload(
        &self,
        _file: &SelectedFile,
        _actions: &[ProcessingAction],
    ) -> Result<UploadResponse, ApiError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let gate = self.upload_gate.lock().expect("gate").clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.upload_id.lock().expect("upload id").clone() {
            Some(id) => Ok(UploadResponse {
                id,
                status: Some(ImageStatus::Pending),
                message: None,
            }),
            None => Err(ApiError::Status {
                status: 500,
                message: "Failed to upload image".to_string(),
            }),
        }
    }

    async fn fetch_status(&self, _image_id: &ImageId) -> Result<ImageStatus, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        match self.statuses.lock().expect("statuses").pop_front() {
            Some(Scripted::Status(status)) => Ok(status),
            Some(Scripted::Unreachable) => {
                Err(ApiError::InvalidResponse("connection refused".to_string()))
            }
            None => Ok(ImageStatus::Pending),
        }
    }

    async fn fetch_image(&self, _image_id: &ImageId) -> Result<Vec<u8>, ApiError> {
        Ok(b"png".to_vec())
    }

    async fn delete_image(&self, _image_id: &ImageId) -> Result<(), ApiError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.delete_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ApiError::Status {
                status: 500,
                message: "delete failed".to_string(),
            })
        }
    }
}

struct RefusingConfirmer;

#[async_trait]
impl Confirmer for RefusingConfirmer {
    async fn confirm(&self, _prompt: &str) -> bool {
        false
    }
}

struct Harness {
    api: Arc<FakeImageApi>,
    store: Arc<MemoryStore>,
    controller: Arc<UploadController>,
    events: broadcast::Receiver<ClientEvent>,
}

fn harness_with(confirmer: Arc<dyn Confirmer>, settings: PollSettings) -> Harness {
    let api = FakeImageApi::new();
    let store = Arc::new(MemoryStore::new());
    let controller = UploadController::new(
        api.clone(),
        ImageCatalog::new(store.clone()),
        confirmer,
        settings,
    );
    let events = controller.subscribe_events();
    Harness {
        api,
        store,
        controller,
        events,
    }
}

fn fast_polls(max_attempts: u32) -> PollSettings {
    PollSettings::new(Duration::from_millis(2), max_attempts)
}

fn harness() -> Harness {
    harness_with(Arc::new(AlwaysConfirm), fast_polls(60))
}

fn png(name: &str) -> SelectedFile {
    SelectedFile {
        filename: name.to_string(),
        media_type: Some("image/png".to_string()),
        bytes: vec![1, 2, 3],
    }
}

fn request(actions: Vec<ProcessingAction>) -> UploadRequest {
    UploadRequest::new(png("cat.png"), actions)
}

fn drain_notices(events: &mut broadcast::Receiver<ClientEvent>) -> Vec<Notice> {
    let mut notices = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ClientEvent::Notice(notice) = event {
            notices.push(notice);
        }
    }
    notices
}

async fn wait_idle(controller: &UploadController) {
    tokio::time::timeout(Duration::from_secs(5), controller.wait_for_idle())
        .await
        .expect("polls did not settle");
}

async fn stored_images(store: &Arc<MemoryStore>) -> Vec<ImageRecord> {
    ImageCatalog::new(store.clone()).load().await
}

#[tokio::test]
async fn submit_without_actions_never_reaches_the_server() {
    let mut h = harness();

    let err = h
        .controller
        .submit(request(Vec::new()))
        .await
        .expect_err("must be rejected");

    assert!(matches!(
        err,
        UploadError::Validation(ValidationError::NoActionSelected)
    ));
    assert_eq!(h.api.uploads.load(Ordering::SeqCst), 0);
    assert!(h.controller.images().await.is_empty());
    let notices = drain_notices(&mut h.events);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Error);
}

#[tokio::test]
async fn submit_rejects_missing_file_and_non_images() {
    let h = harness();

    let err = h
        .controller
        .submit(UploadRequest {
            file: None,
            actions: vec![ProcessingAction::Resize],
        })
        .await
        .expect_err("no file");
    assert!(matches!(
        err,
        UploadError::Validation(ValidationError::NoFileSelected)
    ));

    let mut text = png("notes.txt");
    text.media_type = Some("text/plain".to_string());
    let err = h
        .controller
        .submit(UploadRequest::new(text, vec![ProcessingAction::Resize]))
        .await
        .expect_err("not an image");
    assert!(matches!(
        err,
        UploadError::Validation(ValidationError::NotAnImage { .. })
    ));
    assert_eq!(h.api.uploads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn successful_upload_prepends_pending_record_and_starts_polling() {
    let mut h = harness_with(
        Arc::new(AlwaysConfirm),
        PollSettings::new(Duration::from_secs(3600), 60),
    );
    h.store
        .set(
            CATALOG_KEY,
            r#"[{"id":"older","status":"Done","filename":"old.png","actions":["Resize"],"uploadedAt":"2024-01-01T00:00:00.000Z"}]"#,
        )
        .await
        .expect("seed");
    h.controller.restore().await;

    let record = h
        .controller
        .submit(request(vec![
            ProcessingAction::Resize,
            ProcessingAction::Grayscale,
            ProcessingAction::Resize,
        ]))
        .await
        .expect("upload");

    assert_eq!(record.id, ImageId::from("img-1"));
    assert_eq!(record.status, ImageStatus::Pending);
    assert_eq!(record.actions, vec!["Resize", "Grayscale"]);
    let images = h.controller.images().await;
    assert_eq!(images.len(), 2);
    assert_eq!(images[0].id, record.id);
    assert_eq!(images[1].id, ImageId::from("older"));
    assert_eq!(stored_images(&h.store).await, images);
    assert!(h.controller.is_polling(&record.id).await);
    assert!(!h.controller.is_submitting());

    let notices = drain_notices(&mut h.events);
    assert!(notices.contains(&Notice::success(
        "Image uploaded! Applying actions: Resize, Grayscale"
    )));

    h.controller.shutdown().await;
}

#[tokio::test]
async fn submit_guard_is_released_after_upload_failure() {
    let mut h = harness();
    *h.api.upload_id.lock().expect("upload id") = None;

    let err = h
        .controller
        .submit(request(vec![ProcessingAction::Watermark]))
        .await
        .expect_err("server error");

    assert!(matches!(err, UploadError::Api(_)));
    assert!(!h.controller.is_submitting());
    assert!(h.controller.images().await.is_empty());

    let mut busy_changes = Vec::new();
    while let Ok(event) = h.events.try_recv() {
        match event {
            ClientEvent::SubmitStateChanged { busy } => busy_changes.push(busy),
            ClientEvent::Notice(notice) => {
                assert_eq!(notice, Notice::error("Error: Failed to upload image"))
            }
            ClientEvent::ImagesChanged(_) => {}
        }
    }
    assert_eq!(busy_changes, vec![true, false]);
}

#[tokio::test]
async fn upload_response_without_id_is_an_error() {
    let h = harness();
    *h.api.upload_id.lock().expect("upload id") = Some("  ".to_string());

    let err = h
        .controller
        .submit(request(vec![ProcessingAction::Resize]))
        .await
        .expect_err("missing id");

    assert!(matches!(err, UploadError::MissingImageId));
    assert!(h.controller.images().await.is_empty());
    assert_eq!(h.controller.active_poll_count().await, 0);
}

#[tokio::test]
async fn second_submit_is_rejected_while_one_is_in_flight() {
    let h = harness_with(
        Arc::new(AlwaysConfirm),
        PollSettings::new(Duration::from_secs(3600), 60),
    );
    let gate = Arc::new(Notify::new());
    *h.api.upload_gate.lock().expect("gate") = Some(gate.clone());

    let first = {
        let controller = h.controller.clone();
        tokio::spawn(async move {
            controller
                .submit(request(vec![ProcessingAction::Resize]))
                .await
        })
    };
    while !h.controller.is_submitting() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let err = h
        .controller
        .submit(request(vec![ProcessingAction::Resize]))
        .await
        .expect_err("busy");
    assert!(matches!(
        err,
        UploadError::Validation(ValidationError::SubmitInProgress)
    ));

    gate.notify_one();
    first.await.expect("join").expect("first upload");
    assert!(!h.controller.is_submitting());
    assert_eq!(h.api.uploads.load(Ordering::SeqCst), 1);
    h.controller.shutdown().await;
}

#[tokio::test]
async fn polling_the_same_image_twice_keeps_one_task() {
    let h = harness_with(
        Arc::new(AlwaysConfirm),
        PollSettings::new(Duration::from_secs(3600), 60),
    );
    let id = ImageId::from("img-1");

    assert!(h.controller.start_polling(&id).await);
    assert!(!h.controller.start_polling(&id).await);
    assert!(!h.controller.start_polling(&ImageId::from("   ")).await);

    assert_eq!(h.controller.active_poll_count().await, 1);
    h.controller.shutdown().await;
    assert_eq!(h.controller.active_poll_count().await, 0);
}

#[tokio::test]
async fn done_status_finishes_poll_and_persists() {
    let mut h = harness();
    h.api.script([
        Scripted::Status(ImageStatus::Pending),
        Scripted::Status(ImageStatus::Done),
    ]);

    let record = h
        .controller
        .submit(request(vec![ProcessingAction::Resize]))
        .await
        .expect("upload");
    wait_idle(&h.controller).await;

    assert_eq!(h.api.status_calls(), 2);
    let image = h.controller.image(&record.id).await.expect("tracked");
    assert_eq!(image.status, ImageStatus::Done);
    assert_eq!(stored_images(&h.store).await[0].status, ImageStatus::Done);
    assert!(!h.controller.is_polling(&record.id).await);
    assert!(drain_notices(&mut h.events).contains(&Notice::success("Image is ready!")));
}

#[tokio::test]
async fn failed_status_marks_image_failed() {
    let mut h = harness();
    h.api.script([Scripted::Status(ImageStatus::Failed)]);

    let record = h
        .controller
        .submit(request(vec![ProcessingAction::Resize]))
        .await
        .expect("upload");
    wait_idle(&h.controller).await;

    assert_eq!(h.api.status_calls(), 1);
    assert_eq!(
        h.controller.image(&record.id).await.expect("tracked").status,
        ImageStatus::Failed
    );
    assert!(drain_notices(&mut h.events).contains(&Notice::error("Image processing failed")));
}

#[tokio::test]
async fn poll_times_out_after_attempt_ceiling() {
    let mut h = harness();

    let record = h
        .controller
        .submit(request(vec![ProcessingAction::Resize]))
        .await
        .expect("upload");
    wait_idle(&h.controller).await;

    assert_eq!(h.api.status_calls(), 60);
    assert_eq!(
        h.controller.image(&record.id).await.expect("tracked").status,
        ImageStatus::Failed
    );
    let timeouts: Vec<_> = drain_notices(&mut h.events)
        .into_iter()
        .filter(|notice| notice.message == "Timed out waiting for processing")
        .collect();
    assert_eq!(timeouts.len(), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.api.status_calls(), 60);
}

#[tokio::test]
async fn transport_errors_are_retried_until_ceiling() {
    let h = harness_with(Arc::new(AlwaysConfirm), fast_polls(5));
    h.api.script((0..5).map(|_| Scripted::Unreachable));

    let record = h
        .controller
        .submit(request(vec![ProcessingAction::Resize]))
        .await
        .expect("upload");
    wait_idle(&h.controller).await;

    assert_eq!(h.api.status_calls(), 5);
    assert_eq!(
        h.controller.image(&record.id).await.expect("tracked").status,
        ImageStatus::Failed
    );
}

#[tokio::test]
async fn poll_recovers_after_transient_errors() {
    let h = harness();
    h.api.script([
        Scripted::Unreachable,
        Scripted::Unreachable,
        Scripted::Status(ImageStatus::Done),
    ]);

    let record = h
        .controller
        .submit(request(vec![ProcessingAction::Resize]))
        .await
        .expect("upload");
    wait_idle(&h.controller).await;

    assert_eq!(h.api.status_calls(), 3);
    assert_eq!(
        h.controller.image(&record.id).await.expect("tracked").status,
        ImageStatus::Done
    );
}

#[tokio::test]
async fn delete_cancels_active_poll_and_removes_image() {
    let mut h = harness_with(
        Arc::new(AlwaysConfirm),
        PollSettings::new(Duration::from_secs(3600), 60),
    );
    let record = h
        .controller
        .submit(request(vec![ProcessingAction::Resize]))
        .await
        .expect("upload");
    assert!(h.controller.is_polling(&record.id).await);

    let outcome = h.controller.delete_image(&record.id).await.expect("delete");

    assert_eq!(outcome, DeleteOutcome::Deleted);
    assert!(!h.controller.is_polling(&record.id).await);
    assert_eq!(h.controller.active_poll_count().await, 0);
    assert!(h.controller.images().await.is_empty());
    assert!(stored_images(&h.store).await.is_empty());
    assert_eq!(h.api.status_calls(), 0);
    wait_idle(&h.controller).await;
    assert!(drain_notices(&mut h.events).contains(&Notice::success("Image deleted")));
}

#[tokio::test]
async fn declined_delete_changes_nothing() {
    let h = harness_with(
        Arc::new(RefusingConfirmer),
        PollSettings::new(Duration::from_secs(3600), 60),
    );
    let record = h
        .controller
        .submit(request(vec![ProcessingAction::Resize]))
        .await
        .expect("upload");

    let outcome = h.controller.delete_image(&record.id).await.expect("delete");

    assert_eq!(outcome, DeleteOutcome::Cancelled);
    assert_eq!(h.api.deletes.load(Ordering::SeqCst), 0);
    assert_eq!(h.controller.images().await.len(), 1);
    assert!(h.controller.is_polling(&record.id).await);
    h.controller.shutdown().await;
}

#[tokio::test]
async fn failed_delete_leaves_image_and_poll() {
    let mut h = harness_with(
        Arc::new(AlwaysConfirm),
        PollSettings::new(Duration::from_secs(3600), 60),
    );
    h.api.delete_ok.store(false, Ordering::SeqCst);
    let record = h
        .controller
        .submit(request(vec![ProcessingAction::Resize]))
        .await
        .expect("upload");
    drain_notices(&mut h.events);

    let err = h
        .controller
        .delete_image(&record.id)
        .await
        .expect_err("delete fails");

    assert!(matches!(err, DeleteError::Api(_)));
    assert_eq!(h.controller.images().await.len(), 1);
    assert!(h.controller.is_polling(&record.id).await);
    assert_eq!(
        drain_notices(&mut h.events),
        vec![Notice::error("Error: delete failed")]
    );
    h.controller.shutdown().await;
}

#[tokio::test]
async fn start_drops_blank_ids_and_resumes_pending_polls() {
    let h = harness_with(
        Arc::new(AlwaysConfirm),
        PollSettings::new(Duration::from_secs(3600), 60),
    );
    h.store
        .set(
            CATALOG_KEY,
            r#"[
                {"id":"","status":"Pending","filename":"ghost.png","actions":[],"uploadedAt":""},
                {"id":"pending-1","status":"Pending","filename":"a.png","actions":["Resize"],"uploadedAt":"2024-01-01T00:00:00.000Z"},
                {"id":"done-1","status":"Done","filename":"b.png","actions":["Watermark"],"uploadedAt":"2024-01-01T00:00:00.000Z"}
            ]"#,
        )
        .await
        .expect("seed");

    let resumed = h.controller.start().await;

    assert_eq!(resumed, 1);
    assert!(h.controller.is_polling(&ImageId::from("pending-1")).await);
    assert!(!h.controller.is_polling(&ImageId::from("done-1")).await);
    let stored = stored_images(&h.store).await;
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|image| image.id.is_valid()));
    h.controller.shutdown().await;
}

#[tokio::test]
async fn view_is_only_available_once_done() {
    let h = harness_with(
        Arc::new(AlwaysConfirm),
        PollSettings::new(Duration::from_secs(3600), 60),
    );
    h.store
        .set(
            CATALOG_KEY,
            r#"[
                {"id":"ready","status":"Done","filename":"a.png","actions":["Resize"],"uploadedAt":"2024-01-01T00:00:00.000Z"},
                {"id":"busy","status":"Pending","filename":"b.png","actions":["Resize"],"uploadedAt":"2024-01-01T00:00:00.000Z"}
            ]"#,
        )
        .await
        .expect("seed");
    h.controller.restore().await;

    let url = h
        .controller
        .view_url(&ImageId::from("ready"))
        .await
        .expect("view");
    assert_eq!(url.as_str(), "http://images.test/image/ready");
    assert_eq!(
        h.controller
            .download_image(&ImageId::from("ready"))
            .await
            .expect("download"),
        b"png".to_vec()
    );

    assert!(matches!(
        h.controller.view_url(&ImageId::from("busy")).await,
        Err(ViewError::NotReady { .. })
    ));
    assert!(matches!(
        h.controller.view_url(&ImageId::from("gone")).await,
        Err(ViewError::UnknownImage(_))
    ));
}
