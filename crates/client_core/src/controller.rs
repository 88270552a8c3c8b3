use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use chrono::Utc;
use shared::{
    domain::{ImageId, ImageRecord, ImageStatus},
    error::ValidationError,
};
use storage::ImageCatalog;
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    error::{DeleteError, UploadError, ViewError},
    poller::{evaluate_tick, PollOutcome, PollSettings, TickDecision},
    render::{render_images, Gallery},
    transport::{image_url, ImageApi},
    types::UploadRequest,
    ClientEvent, Confirmer, Notice,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Cancelled,
}

struct ControllerState {
    images: Vec<ImageRecord>,
    active_polls: HashMap<ImageId, JoinHandle<()>>,
}

/// Owns the tracked image list and the per-image poll tasks.
///
/// Every mutation of `images` is followed by a save through the catalog
/// while the state lock is still held, so memory and storage never diverge.
pub struct UploadController {
    api: Arc<dyn ImageApi>,
    catalog: ImageCatalog,
    confirmer: Arc<dyn Confirmer>,
    poll_settings: PollSettings,
    inner: Mutex<ControllerState>,
    submitting: AtomicBool,
    active_poll_count: watch::Sender<usize>,
    events: broadcast::Sender<ClientEvent>,
}

/// Marks the submit control busy; dropping it always re-enables the control.
struct SubmitGuard<'a> {
    controller: &'a UploadController,
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        self.controller.submitting.store(false, Ordering::SeqCst);
        self.controller.emit(ClientEvent::SubmitStateChanged { busy: false });
    }
}

impl UploadController {
    pub fn new(
        api: Arc<dyn ImageApi>,
        catalog: ImageCatalog,
        confirmer: Arc<dyn Confirmer>,
        poll_settings: PollSettings,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        let (active_poll_count, _) = watch::channel(0);
        Arc::new(Self {
            api,
            catalog,
            confirmer,
            poll_settings,
            inner: Mutex::new(ControllerState {
                images: Vec::new(),
                active_polls: HashMap::new(),
            }),
            submitting: AtomicBool::new(false),
            active_poll_count,
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn poll_settings(&self) -> PollSettings {
        self.poll_settings
    }

    /// Restores the persisted list and resumes polling for pending images.
    pub async fn start(self: &Arc<Self>) -> usize {
        self.restore().await;
        self.resume_pending_polls().await
    }

    /// Loads the persisted list, drops entries without an id, and writes the
    /// cleaned list back.
    pub async fn restore(&self) -> usize {
        let images = self.catalog.load().await;
        let mut guard = self.inner.lock().await;
        guard.images = images;
        self.persist(&guard.images).await;
        self.emit(ClientEvent::ImagesChanged(guard.images.clone()));
        info!(images = guard.images.len(), "controller: restored tracked images");
        guard.images.len()
    }

    pub async fn resume_pending_polls(self: &Arc<Self>) -> usize {
        let pending: Vec<ImageId> = {
            let guard = self.inner.lock().await;
            guard
                .images
                .iter()
                .filter(|image| image.status == ImageStatus::Pending)
                .map(|image| image.id.clone())
                .collect()
        };

        let mut resumed = 0;
        for image_id in pending {
            debug!(image_id = %image_id, "controller: resuming status poll");
            if self.start_polling(&image_id).await {
                resumed += 1;
            }
        }
        resumed
    }

    pub async fn images(&self) -> Vec<ImageRecord> {
        self.inner.lock().await.images.clone()
    }

    pub async fn image(&self, image_id: &ImageId) -> Option<ImageRecord> {
        self.inner
            .lock()
            .await
            .images
            .iter()
            .find(|image| &image.id == image_id)
            .cloned()
    }

    pub async fn render(&self) -> Gallery {
        let guard = self.inner.lock().await;
        render_images(&guard.images, self.api.base_url())
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting.load(Ordering::SeqCst)
    }

    /// Validates and uploads one image. On success the new record is put
    /// first in the list and its status poll is started.
    pub async fn submit(self: &Arc<Self>, request: UploadRequest) -> Result<ImageRecord, UploadError> {
        let upload = match request.validate() {
            Ok(upload) => upload,
            Err(err) => {
                self.notify(Notice::error(err.to_string()));
                return Err(err.into());
            }
        };
        let _busy = match self.begin_submit() {
            Ok(guard) => guard,
            Err(err) => {
                self.notify(Notice::error(err.to_string()));
                return Err(err.into());
            }
        };

        let response = match self.api.upload(&upload.file, &upload.actions).await {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, filename = %upload.file.filename, "controller: upload failed");
                self.notify(Notice::error(format!("Error: {err}")));
                return Err(err.into());
            }
        };

        let image_id = ImageId::new(response.id);
        if !image_id.is_valid() {
            let err = UploadError::MissingImageId;
            error!(filename = %upload.file.filename, "controller: upload response had no id");
            self.notify(Notice::error(format!("Error: {err}")));
            return Err(err);
        }

        let record = ImageRecord::pending(
            image_id.clone(),
            upload.file.filename.clone(),
            &upload.actions,
            Utc::now(),
        );
        {
            let mut guard = self.inner.lock().await;
            guard.images.insert(0, record.clone());
            self.persist(&guard.images).await;
            self.emit(ClientEvent::ImagesChanged(guard.images.clone()));
        }
        info!(image_id = %image_id, actions = ?record.actions, "controller: image uploaded");
        self.notify(Notice::success(format!(
            "Image uploaded! Applying actions: {}",
            record.actions.join(", ")
        )));

        self.start_polling(&image_id).await;
        Ok(record)
    }

    fn begin_submit(&self) -> Result<SubmitGuard<'_>, ValidationError> {
        self.submitting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ValidationError::SubmitInProgress)?;
        self.emit(ClientEvent::SubmitStateChanged { busy: true });
        Ok(SubmitGuard { controller: self })
    }

    /// Starts the status poll for `image_id`. Returns `false` when the id is
    /// blank or a poll for it is already running.
    pub async fn start_polling(self: &Arc<Self>, image_id: &ImageId) -> bool {
        if !image_id.is_valid() {
            warn!(image_id = %image_id, "controller: refusing to poll blank image id");
            return false;
        }

        let mut guard = self.inner.lock().await;
        if guard.active_polls.contains_key(image_id) {
            debug!(image_id = %image_id, "controller: status poll already running");
            return false;
        }

        let controller = Arc::clone(self);
        let poll_id = image_id.clone();
        // The task cannot deregister itself before the insert below: it needs
        // the state lock held here.
        let handle = tokio::spawn(async move { controller.run_status_poll(poll_id).await });
        guard.active_polls.insert(image_id.clone(), handle);
        self.active_poll_count.send_replace(guard.active_polls.len());
        info!(image_id = %image_id, "controller: started status poll");
        true
    }

    pub async fn is_polling(&self, image_id: &ImageId) -> bool {
        self.inner.lock().await.active_polls.contains_key(image_id)
    }

    pub async fn active_poll_count(&self) -> usize {
        self.inner.lock().await.active_polls.len()
    }

    /// Resolves once no status poll is running.
    pub async fn wait_for_idle(&self) {
        let mut count = self.active_poll_count.subscribe();
        let _ = count.wait_for(|active| *active == 0).await;
    }

    async fn run_status_poll(self: Arc<Self>, image_id: ImageId) {
        let settings = self.poll_settings;
        let mut ticker = interval_at(Instant::now() + settings.interval, settings.interval);
        // A slow request pushes the next tick back instead of bunching ticks.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut attempt = 0;
        loop {
            ticker.tick().await;
            attempt += 1;

            let observed = self.api.fetch_status(&image_id).await;
            match &observed {
                Ok(status) => debug!(image_id = %image_id, attempt, %status, "poll: status"),
                Err(err) => warn!(image_id = %image_id, attempt, error = %err, "poll: status check failed"),
            }

            if let TickDecision::Finish(outcome) =
                evaluate_tick(attempt, settings.max_attempts, &observed)
            {
                self.finish_poll(&image_id, outcome).await;
                return;
            }
        }
    }

    async fn finish_poll(&self, image_id: &ImageId, outcome: PollOutcome) {
        let notice = match outcome {
            PollOutcome::Done => Notice::success("Image is ready!"),
            PollOutcome::Failed => Notice::error("Image processing failed"),
            PollOutcome::TimedOut => Notice::error("Timed out waiting for processing"),
        };

        let mut guard = self.inner.lock().await;
        guard.active_polls.remove(image_id);
        let status = outcome.final_status();
        if let Some(image) = guard.images.iter_mut().find(|image| &image.id == image_id) {
            image.status = status;
            self.persist(&guard.images).await;
            self.emit(ClientEvent::ImagesChanged(guard.images.clone()));
        }
        info!(image_id = %image_id, ?outcome, "controller: status poll finished");
        self.notify(notice);
        // Idle waiters must already see the final status and notice.
        self.active_poll_count.send_replace(guard.active_polls.len());
    }

    /// Deletes an image after confirmation. A failed request leaves the
    /// image and its poll untouched.
    pub async fn delete_image(&self, image_id: &ImageId) -> Result<DeleteOutcome, DeleteError> {
        if !self
            .confirmer
            .confirm(&format!("Delete image {image_id}?"))
            .await
        {
            debug!(image_id = %image_id, "controller: delete cancelled");
            return Ok(DeleteOutcome::Cancelled);
        }

        if let Err(err) = self.api.delete_image(image_id).await {
            error!(image_id = %image_id, error = %err, "controller: delete failed");
            self.notify(Notice::error(format!("Error: {err}")));
            return Err(err.into());
        }

        {
            let mut guard = self.inner.lock().await;
            if let Some(handle) = guard.active_polls.remove(image_id) {
                handle.abort();
                self.active_poll_count.send_replace(guard.active_polls.len());
            }
            guard.images.retain(|image| &image.id != image_id);
            self.persist(&guard.images).await;
            self.emit(ClientEvent::ImagesChanged(guard.images.clone()));
        }

        info!(image_id = %image_id, "controller: image deleted");
        self.notify(Notice::success("Image deleted"));
        Ok(DeleteOutcome::Deleted)
    }

    /// URL of the processed image; only available once processing is done.
    pub async fn view_url(&self, image_id: &ImageId) -> Result<Url, ViewError> {
        let image = self
            .image(image_id)
            .await
            .ok_or_else(|| ViewError::UnknownImage(image_id.clone()))?;
        if image.status != ImageStatus::Done {
            return Err(ViewError::NotReady {
                id: image.id,
                status: image.status,
            });
        }
        Ok(image_url(self.api.base_url(), image_id))
    }

    pub async fn download_image(&self, image_id: &ImageId) -> Result<Vec<u8>, ViewError> {
        self.view_url(image_id).await?;
        self.api.fetch_image(image_id).await.map_err(|err| {
            self.notify(Notice::error(format!("Error: {err}")));
            ViewError::Api(err)
        })
    }

    /// Cancels every running poll. The tracked list stays as persisted.
    pub async fn shutdown(&self) {
        let mut guard = self.inner.lock().await;
        for (image_id, handle) in guard.active_polls.drain() {
            debug!(image_id = %image_id, "controller: cancelling status poll");
            handle.abort();
        }
        self.active_poll_count.send_replace(0);
    }

    async fn persist(&self, images: &[ImageRecord]) {
        if let Err(err) = self.catalog.save(images).await {
            error!(error = %err, "controller: failed to persist tracked images");
        }
    }

    fn notify(&self, notice: Notice) {
        debug!(level = ?notice.level, message = %notice.message, "notice");
        self.emit(ClientEvent::Notice(notice));
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
