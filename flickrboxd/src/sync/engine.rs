use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use flickr_core::{
    FlickrClient, FlickrError, PhotoId, PhotosetId, TicketId, TicketState, TicketStatus,
    UploadReceipt, UploadRequest,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::local_watcher::{ItemRef, LocalEvent};
use super::paths::{
    PathError, collection_dir, download_extension, is_allowed_extension, is_hidden_sentinel,
    item_path,
};
use super::reconcile::{SyncAction, plan};
use super::registry::{ItemHandle, Placement, Registry};
use super::snapshot::scan_local;
use super::transfer::{TransferClient, TransferError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("api error: {0}")]
    Api(#[from] FlickrError),
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("upload ticket {0} received but no ticket poller is running")]
    TicketIntakeClosed(TicketId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadMode {
    /// Wait for the photo id and attach it right away.
    Sync,
    /// Take a ticket and let the poller resolve it.
    #[default]
    Async,
}

#[derive(Debug, Error)]
#[error("unknown upload mode {0:?}, expected \"sync\" or \"async\"")]
pub struct ParseUploadModeError(String);

impl FromStr for UploadMode {
    type Err = ParseUploadModeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sync" => Ok(UploadMode::Sync),
            "async" => Ok(UploadMode::Async),
            _ => Err(ParseUploadModeError(value.to_string())),
        }
    }
}

impl fmt::Display for UploadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UploadMode::Sync => "sync",
            UploadMode::Async => "async",
        })
    }
}

/// Where an uploaded photo ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    AddedToCollection {
        collection: String,
        photo: PhotoId,
    },
    CreatedCollection {
        collection: String,
        photoset: PhotosetId,
        photo: PhotoId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Filtered,
    AlreadyPresent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Attached(AttachOutcome),
    Ticketed(TicketId),
    Skipped(SkipReason),
}

/// Result of feeding one resolved ticket back into the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketResolution {
    Attached(AttachOutcome),
    /// The photo exists remotely but is in no collection; kept as an orphan.
    AttachFailed {
        collection: String,
        item: ItemHandle,
        error: String,
    },
    UploadFailed {
        collection: String,
        title: String,
    },
    /// The poller only forwards finished tickets, but a pending status from
    /// any other caller leaves the ticket outstanding.
    StillPending(TicketId),
    Unknown(TicketId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted { collection_dropped: bool },
    NotTracked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Unchanged,
    Retitled,
    Relocated(AttachOutcome),
    Uploaded(UploadOutcome),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub created_dirs: usize,
    pub downloaded: usize,
    pub uploaded: usize,
    pub ticketed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingUpload {
    collection: String,
    title: String,
    extension: String,
}

pub struct SyncEngine {
    client: FlickrClient,
    transfer: TransferClient,
    registry: Registry,
    root: PathBuf,
    mode: UploadMode,
    pending: HashMap<TicketId, PendingUpload>,
    tickets: Option<mpsc::UnboundedSender<TicketId>>,
}

impl SyncEngine {
    pub fn new(client: FlickrClient, registry: Registry, root: PathBuf, mode: UploadMode) -> Self {
        Self {
            client,
            transfer: TransferClient::new(),
            registry,
            root,
            mode,
            pending: HashMap::new(),
            tickets: None,
        }
    }

    /// Routes upload tickets to a running poller.
    pub fn attach_ticket_intake(&mut self, intake: mpsc::UnboundedSender<TicketId>) {
        self.tickets = Some(intake);
    }

    /// Lets the poller stop once the tickets already handed over resolve.
    pub fn close_ticket_intake(&mut self) {
        self.tickets = None;
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pending_tickets(&self) -> usize {
        self.pending.len()
    }

    /// One reconciliation pass over the current registry and local tree.
    pub async fn run_pass(&mut self) -> Result<PassReport, EngineError> {
        let mut local = scan_local(&self.root).await?;
        let actions = plan(&self.registry.snapshot(), &local);
        info!(actions = actions.len(), "reconciliation planned");

        let mut report = PassReport::default();
        for action in actions {
            match action {
                SyncAction::CreateDir { collection } => {
                    let dir = match collection_dir(&self.root, &collection) {
                        Ok(dir) => dir,
                        Err(err) => {
                            warn!(collection = %collection, error = %err, "collection title is not a usable directory name, skipping");
                            report.skipped += 1;
                            continue;
                        }
                    };
                    tokio::fs::create_dir_all(dir).await?;
                    local.insert_dir(&collection);
                    report.created_dirs += 1;
                }
                SyncAction::Download { collection, item } => {
                    match self.download_item(&collection, &item).await {
                        Ok(file_name) => {
                            local.insert_file(&collection, &file_name);
                            report.downloaded += 1;
                        }
                        Err(EngineError::Path(err)) => {
                            warn!(collection = %collection, title = %item.title, error = %err, "item cannot be stored locally, skipping");
                            report.skipped += 1;
                        }
                        Err(err) => return Err(err),
                    }
                }
                SyncAction::Upload {
                    collection,
                    title,
                    extension,
                } => match self.upload_file(&collection, &title, &extension).await? {
                    UploadOutcome::Attached(_) => report.uploaded += 1,
                    UploadOutcome::Ticketed(_) => report.ticketed += 1,
                    UploadOutcome::Skipped(_) => report.skipped += 1,
                },
            }
        }
        info!(
            created_dirs = report.created_dirs,
            downloaded = report.downloaded,
            uploaded = report.uploaded,
            ticketed = report.ticketed,
            skipped = report.skipped,
            "reconciliation pass complete"
        );
        Ok(report)
    }

    /// Saves the original of `item` under its collection directory and
    /// returns the file name written.
    pub async fn download_item(
        &self,
        collection: &str,
        item: &ItemHandle,
    ) -> Result<String, EngineError> {
        let extension = download_extension(item.original_format.as_deref());
        let target = item_path(&self.root, collection, &item.title, &extension)?;
        info!(collection, title = %item.title, "downloading");
        let url = self.client.original_url(&item.id).await?;
        self.transfer
            .download_to_path(url.as_str(), &target)
            .await?;
        Ok(format!("{}{}", item.title, extension))
    }

    pub async fn upload_file(
        &mut self,
        collection: &str,
        title: &str,
        extension: &str,
    ) -> Result<UploadOutcome, EngineError> {
        if is_hidden_sentinel(title) || !is_allowed_extension(extension) {
            return Ok(UploadOutcome::Skipped(SkipReason::Filtered));
        }
        if self.registry.contains_item(collection, title) || self.is_pending(collection, title) {
            debug!(collection, title, "title already present, not uploading");
            return Ok(UploadOutcome::Skipped(SkipReason::AlreadyPresent));
        }

        let source = item_path(&self.root, collection, title, extension)?;
        let (body, length) = self.transfer.file_body(&source).await?;
        info!(collection, title, mode = %self.mode, "uploading");
        let receipt = self
            .client
            .upload_photo(UploadRequest {
                file_name: format!("{title}{extension}"),
                title: title.to_string(),
                body,
                content_length: Some(length),
                asynchronous: self.mode == UploadMode::Async,
            })
            .await?;

        match receipt {
            UploadReceipt::Photo(photo) => {
                let item = ItemHandle {
                    id: photo,
                    title: title.to_string(),
                    original_format: original_format_of(extension),
                };
                let outcome = self.attach(collection, item).await?;
                info!(collection, title, "upload complete");
                Ok(UploadOutcome::Attached(outcome))
            }
            UploadReceipt::Ticket(ticket) => {
                let intake = self
                    .tickets
                    .as_ref()
                    .ok_or_else(|| EngineError::TicketIntakeClosed(ticket.clone()))?;
                intake
                    .send(ticket.clone())
                    .map_err(|_| EngineError::TicketIntakeClosed(ticket.clone()))?;
                self.pending.insert(
                    ticket.clone(),
                    PendingUpload {
                        collection: collection.to_string(),
                        title: title.to_string(),
                        extension: extension.to_string(),
                    },
                );
                debug!(collection, title, ticket = %ticket, "upload ticketed");
                Ok(UploadOutcome::Ticketed(ticket))
            }
        }
    }

    /// Places an uploaded photo in `collection`, creating the photoset with
    /// the photo as its cover when the collection is not known remotely.
    async fn attach(
        &mut self,
        collection: &str,
        item: ItemHandle,
    ) -> Result<AttachOutcome, FlickrError> {
        let photo = item.id.clone();
        if let Some(existing) = self.registry.collection(collection) {
            let photoset = existing.id.clone();
            self.client.add_to_photoset(&photoset, &photo).await?;
            let placement = self.registry.add_item(collection, item);
            self.keep_displaced(collection, placement);
            return Ok(AttachOutcome::AddedToCollection {
                collection: collection.to_string(),
                photo,
            });
        }

        let photoset = self.client.create_photoset(collection, &photo).await?;
        info!(collection, photoset = %photoset, "created collection");
        self.registry
            .insert_collection(collection, photoset.clone(), item);
        Ok(AttachOutcome::CreatedCollection {
            collection: collection.to_string(),
            photoset,
            photo,
        })
    }

    /// Applies a ticket state reported by the poller.
    pub async fn apply_ticket_status(&mut self, status: TicketStatus) -> TicketResolution {
        let Some(pending) = self.pending.remove(&status.id) else {
            warn!(ticket = %status.id, "resolution for unknown ticket");
            return TicketResolution::Unknown(status.id);
        };
        let photo = match status.state {
            TicketState::Complete(photo) => photo,
            TicketState::Pending => {
                self.pending.insert(status.id.clone(), pending);
                return TicketResolution::StillPending(status.id);
            }
            TicketState::Failed | TicketState::Invalid => {
                warn!(
                    ticket = %status.id,
                    collection = %pending.collection,
                    title = %pending.title,
                    state = ?status.state,
                    "asynchronous upload failed"
                );
                return TicketResolution::UploadFailed {
                    collection: pending.collection,
                    title: pending.title,
                };
            }
        };

        let item = ItemHandle {
            id: photo,
            title: pending.title.clone(),
            original_format: original_format_of(&pending.extension),
        };
        match self.attach(&pending.collection, item.clone()).await {
            Ok(outcome) => {
                info!(collection = %pending.collection, title = %pending.title, "upload complete");
                TicketResolution::Attached(outcome)
            }
            Err(err) => {
                warn!(
                    collection = %pending.collection,
                    title = %pending.title,
                    photo = %item.id,
                    error = %err,
                    "uploaded photo could not be added to its collection"
                );
                self.registry.record_orphan(item.clone());
                TicketResolution::AttachFailed {
                    collection: pending.collection,
                    item,
                    error: err.to_string(),
                }
            }
        }
    }

    /// Deletes the remote photo behind a removed local file.
    pub async fn delete_item(
        &mut self,
        collection: &str,
        title: &str,
    ) -> Result<DeleteOutcome, EngineError> {
        let Some(item) = self.registry.item(collection, title).cloned() else {
            debug!(collection, title, "deleted file has no remote counterpart");
            return Ok(DeleteOutcome::NotTracked);
        };
        info!(collection, title, "deleting");
        self.client.delete_photo(&item.id).await?;
        let collection_dropped = self
            .registry
            .remove_item(collection, title)
            .map(|removed| removed.collection_dropped)
            .unwrap_or(false);
        if collection_dropped {
            info!(collection, "collection is empty, no longer tracked");
        }
        Ok(DeleteOutcome::Deleted { collection_dropped })
    }

    /// Mirrors a rename or move of a local file onto the existing photo.
    pub async fn move_item(
        &mut self,
        from: &ItemRef,
        to: &ItemRef,
    ) -> Result<MoveOutcome, EngineError> {
        let Some(item) = self.registry.item(&from.collection, &from.title).cloned() else {
            debug!(collection = %from.collection, title = %from.title, "moved file is not tracked, uploading destination");
            let outcome = self
                .upload_file(&to.collection, &to.title, &to.extension)
                .await?;
            return Ok(MoveOutcome::Uploaded(outcome));
        };
        let same_collection = from.collection == to.collection;
        let same_title = from.title == to.title;
        if same_collection && same_title {
            return Ok(MoveOutcome::Unchanged);
        }

        info!(
            from_collection = %from.collection,
            from_title = %from.title,
            to_collection = %to.collection,
            to_title = %to.title,
            "moving"
        );
        // The file at the destination was overwritten, so its photo goes too.
        if let Some(replaced) = self.registry.item(&to.collection, &to.title).cloned()
            && replaced.id != item.id
        {
            info!(collection = %to.collection, title = %to.title, photo = %replaced.id, "destination replaced an existing photo, deleting it");
            self.client.delete_photo(&replaced.id).await?;
            self.registry.remove_item(&to.collection, &to.title);
        }
        if !same_title {
            self.client.set_photo_title(&item.id, &to.title).await?;
        }
        if same_collection {
            let placement = self
                .registry
                .retitle_item(&from.collection, &from.title, &to.title);
            self.keep_displaced(&to.collection, placement);
            return Ok(MoveOutcome::Retitled);
        }

        if let Some(source) = self.registry.collection(&from.collection) {
            let photoset = source.id.clone();
            self.client.remove_from_photoset(&photoset, &item.id).await?;
        }
        self.registry.remove_item(&from.collection, &from.title);
        let moved = ItemHandle {
            title: to.title.clone(),
            ..item
        };
        let outcome = self.attach(&to.collection, moved).await?;
        Ok(MoveOutcome::Relocated(outcome))
    }

    /// Renames the photoset behind a renamed collection directory.
    pub async fn rename_collection(&mut self, from: &str, to: &str) -> Result<bool, EngineError> {
        let Some(existing) = self.registry.collection(from) else {
            debug!(from, to, "renamed directory has no remote collection");
            return Ok(false);
        };
        if self.registry.contains_collection(to) {
            warn!(from, to, "collection with the new name already exists, not renaming");
            return Ok(false);
        }
        let photoset = existing.id.clone();
        info!(from, to, "renaming collection");
        self.client.set_photoset_title(&photoset, to).await?;
        Ok(self.registry.rename_collection(from, to))
    }

    pub async fn handle_local_event(&mut self, event: LocalEvent) -> Result<(), EngineError> {
        match event {
            LocalEvent::Created(item) => {
                self.upload_file(&item.collection, &item.title, &item.extension)
                    .await?;
            }
            LocalEvent::Deleted(item) => {
                self.delete_item(&item.collection, &item.title).await?;
            }
            LocalEvent::Moved { from, to } => {
                self.move_item(&from, &to).await?;
            }
            LocalEvent::CollectionRenamed { from, to } => {
                self.rename_collection(&from, &to).await?;
            }
        }
        Ok(())
    }

    fn keep_displaced(&mut self, collection: &str, placement: Placement) {
        if let Placement::Displaced(previous) = placement {
            warn!(collection, title = %previous.title, photo = %previous.id, "title taken by another photo, keeping the old one as an orphan");
            self.registry.record_orphan(previous);
        }
    }

    fn is_pending(&self, collection: &str, title: &str) -> bool {
        self.pending
            .values()
            .any(|pending| pending.collection == collection && pending.title == title)
    }
}

fn original_format_of(extension: &str) -> Option<String> {
    let format = extension.trim_start_matches('.').to_ascii_lowercase();
    (!format.is_empty()).then_some(format)
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
