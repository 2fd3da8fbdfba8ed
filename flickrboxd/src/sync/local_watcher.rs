use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::warn;

use super::paths::{is_allowed_extension, is_hidden_sentinel, split_file_name};

/// A file two levels below the sync root: `<collection>/<title><extension>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRef {
    pub collection: String,
    pub title: String,
    pub extension: String,
}

impl ItemRef {
    pub fn new(collection: &str, title: &str, extension: &str) -> Self {
        Self {
            collection: collection.to_string(),
            title: title.to_string(),
            extension: extension.to_string(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}{}", self.title, self.extension)
    }

    fn is_uploadable(&self) -> bool {
        is_allowed_extension(&self.extension)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEvent {
    Created(ItemRef),
    Deleted(ItemRef),
    Moved { from: ItemRef, to: ItemRef },
    CollectionRenamed { from: String, to: String },
}

/// How long a `From` rename half waits for its `To` partner before it is
/// treated as a move out of the tree.
pub const RENAME_PAIR_WINDOW: Duration = Duration::from_millis(100);

pub fn start_notify_watcher(
    root: &Path,
) -> notify::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<LocalEvent>)> {
    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            let _ = raw_tx.send(event);
        }
        Err(err) => warn!(error = %err, "file watcher error"),
    })?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    tokio::spawn(translate_events(root.to_path_buf(), raw_rx, tx));
    Ok((watcher, rx))
}

async fn translate_events(
    root: PathBuf,
    mut raw: mpsc::UnboundedReceiver<Event>,
    out: mpsc::UnboundedSender<LocalEvent>,
) {
    let mut mapper = EventMapper::default();
    loop {
        let next = if mapper.has_unpaired() {
            match tokio::time::timeout(RENAME_PAIR_WINDOW, raw.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    if !forward(&out, mapper.flush(&root)) {
                        return;
                    }
                    continue;
                }
            }
        } else {
            raw.recv().await
        };
        let Some(event) = next else {
            forward(&out, mapper.flush(&root));
            return;
        };
        if !forward(&out, mapper.map(&root, event)) {
            return;
        }
    }
}

fn forward(out: &mpsc::UnboundedSender<LocalEvent>, events: Vec<LocalEvent>) -> bool {
    events.into_iter().all(|event| out.send(event).is_ok())
}

/// Turns raw notify events into [`LocalEvent`]s.
///
/// Backends report a rename inside the tree as a `From` half, a `To` half and,
/// once both are seen, a `Both` event sharing one tracker. Only `Both` becomes
/// a move. A `To` without a partner is a file arriving from outside, a `From`
/// without one is a file leaving; those are held until [`EventMapper::flush`].
#[derive(Debug, Default)]
struct EventMapper {
    unpaired_from: Vec<(Option<usize>, PathBuf)>,
}

impl EventMapper {
    fn has_unpaired(&self) -> bool {
        !self.unpaired_from.is_empty()
    }

    fn map(&mut self, root: &Path, event: Event) -> Vec<LocalEvent> {
        let tracker = event.attrs.tracker();
        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() >= 2 => {
                self.take_from(tracker, &event.paths[0]);
                map_rename(root, &event.paths[0], &event.paths[1])
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                self.unpaired_from
                    .extend(event.paths.into_iter().map(|path| (tracker, path)));
                Vec::new()
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                if tracker.is_some() && self.take_tracker(tracker) {
                    return Vec::new();
                }
                event
                    .paths
                    .iter()
                    .flat_map(|path| arrived(root, path))
                    .collect()
            }
            // FSEvents reports each side of a rename on its own without saying which.
            EventKind::Modify(ModifyKind::Name(_)) => event
                .paths
                .iter()
                .flat_map(|path| {
                    if path.exists() {
                        arrived(root, path)
                    } else {
                        item_ref(root, path).map(LocalEvent::Deleted).into_iter().collect()
                    }
                })
                .collect(),
            EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => {
                Vec::new()
            }
            EventKind::Create(_) => event
                .paths
                .iter()
                .filter(|path| !path.is_dir())
                .filter_map(|path| item_ref(root, path))
                .filter(ItemRef::is_uploadable)
                .map(LocalEvent::Created)
                .collect(),
            EventKind::Remove(_) => event
                .paths
                .iter()
                .filter_map(|path| item_ref(root, path))
                .map(LocalEvent::Deleted)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Releases `From` halves that never found a partner.
    fn flush(&mut self, root: &Path) -> Vec<LocalEvent> {
        self.unpaired_from
            .drain(..)
            .filter_map(|(_, path)| item_ref(root, &path))
            .map(LocalEvent::Deleted)
            .collect()
    }

    fn take_tracker(&mut self, tracker: Option<usize>) -> bool {
        let before = self.unpaired_from.len();
        self.unpaired_from.retain(|(pending, _)| *pending != tracker);
        self.unpaired_from.len() != before
    }

    fn take_from(&mut self, tracker: Option<usize>, from: &Path) {
        self.unpaired_from
            .retain(|(pending, path)| !(tracker.is_some() && *pending == tracker) && path != from);
    }
}

fn map_rename(root: &Path, from: &Path, to: &Path) -> Vec<LocalEvent> {
    match (item_ref(root, from), item_ref(root, to)) {
        (Some(from), Some(to)) => vec![LocalEvent::Moved { from, to }],
        (Some(from), None) => vec![LocalEvent::Deleted(from)],
        (None, Some(to)) if to.is_uploadable() => vec![LocalEvent::Created(to)],
        (None, Some(_)) => Vec::new(),
        (None, None) => match (dir_name(root, from), dir_name(root, to)) {
            (Some(from), Some(to)) if !root.join(&to).is_file() => {
                vec![LocalEvent::CollectionRenamed { from, to }]
            }
            _ => Vec::new(),
        },
    }
}

// Something appeared under the root from outside: a photo, or a whole
// directory whose photos must be uploaded.
fn arrived(root: &Path, path: &Path) -> Vec<LocalEvent> {
    if path.is_dir() {
        if dir_name(root, path).is_none() {
            return Vec::new();
        }
        let Ok(entries) = std::fs::read_dir(path) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|file| file.is_file())
            .collect();
        files.sort();
        return files
            .iter()
            .filter_map(|file| item_ref(root, file))
            .filter(ItemRef::is_uploadable)
            .map(LocalEvent::Created)
            .collect();
    }
    item_ref(root, path)
        .filter(ItemRef::is_uploadable)
        .map(LocalEvent::Created)
        .into_iter()
        .collect()
}

fn relative_names(root: &Path, path: &Path) -> Option<Vec<String>> {
    let relative = path.strip_prefix(root).ok()?;
    relative
        .components()
        .map(|component| match component {
            Component::Normal(part) => part.to_str().map(str::to_string),
            _ => None,
        })
        .collect()
}

fn item_ref(root: &Path, path: &Path) -> Option<ItemRef> {
    let names = relative_names(root, path)?;
    let [collection, file_name] = names.as_slice() else {
        return None;
    };
    let (title, extension) = split_file_name(file_name);
    if is_hidden_sentinel(title) {
        return None;
    }
    Some(ItemRef::new(collection, title, extension))
}

fn dir_name(root: &Path, path: &Path) -> Option<String> {
    let names = relative_names(root, path)?;
    match names.as_slice() {
        [name] => Some(name.clone()),
        _ => None,
    }
}
