use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;

use flickr_core::{FlickrClient, FlickrError};
use tracing::{debug, info, warn};

use super::registry::{ItemHandle, Registry};

/// Collection name -> items, as known remotely at the start of a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteSnapshot {
    collections: BTreeMap<String, Vec<ItemHandle>>,
}

impl RemoteSnapshot {
    pub fn insert_collection(&mut self, name: &str, items: Vec<ItemHandle>) {
        self.collections.insert(name.to_string(), items);
    }

    pub fn collections(&self) -> impl Iterator<Item = (&str, &[ItemHandle])> {
        self.collections
            .iter()
            .map(|(name, items)| (name.as_str(), items.as_slice()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }
}

/// Subdirectory name -> file names directly inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalSnapshot {
    dirs: BTreeMap<String, BTreeSet<String>>,
}

impl LocalSnapshot {
    pub fn insert_dir(&mut self, name: &str) {
        self.dirs.entry(name.to_string()).or_default();
    }

    pub fn insert_file(&mut self, dir: &str, file_name: &str) {
        self.dirs
            .entry(dir.to_string())
            .or_default()
            .insert(file_name.to_string());
    }

    pub fn files(&self, dir: &str) -> Option<&BTreeSet<String>> {
        self.dirs.get(dir)
    }

    pub fn dirs(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.dirs.iter().map(|(name, files)| (name.as_str(), files))
    }

    pub fn contains_dir(&self, name: &str) -> bool {
        self.dirs.contains_key(name)
    }
}

/// Lists `root`, creating it first when it does not exist yet.
pub async fn scan_local(root: &Path) -> io::Result<LocalSnapshot> {
    tokio::fs::create_dir_all(root).await?;
    let mut snapshot = LocalSnapshot::default();
    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let Some(dir_name) = utf8_name(&entry) else {
            continue;
        };
        snapshot.insert_dir(&dir_name);
        let mut files = tokio::fs::read_dir(entry.path()).await?;
        while let Some(file) = files.next_entry().await? {
            if !file.file_type().await?.is_file() {
                continue;
            }
            if let Some(file_name) = utf8_name(&file) {
                snapshot.insert_file(&dir_name, &file_name);
            }
        }
    }
    debug!(root = %root.display(), dirs = snapshot.dirs.len(), "scanned local tree");
    Ok(snapshot)
}

fn utf8_name(entry: &tokio::fs::DirEntry) -> Option<String> {
    match entry.file_name().into_string() {
        Ok(name) => Some(name),
        Err(raw) => {
            warn!(name = ?raw, "skipping entry with a non UTF-8 name");
            None
        }
    }
}

/// Pulls every photoset and its members into a fresh [`Registry`].
pub async fn fetch_registry(client: &FlickrClient) -> Result<Registry, FlickrError> {
    let sets = client.list_photosets().await?;
    let mut loaded = Vec::with_capacity(sets.len());
    for set in sets {
        let photos = client.list_photoset_photos(&set.id).await?;
        debug!(collection = %set.title, photos = photos.len(), "fetched photoset");
        loaded.push((set, photos));
    }
    info!(collections = loaded.len(), "fetched remote library");
    Ok(Registry::from_remote(loaded))
}
