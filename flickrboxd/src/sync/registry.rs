use std::collections::BTreeMap;

use flickr_core::{Photo, PhotoId, Photoset, PhotosetId};
use tracing::warn;

use super::snapshot::RemoteSnapshot;

/// A remote photo as this process last saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemHandle {
    pub id: PhotoId,
    pub title: String,
    pub original_format: Option<String>,
}

impl ItemHandle {
    /// Untitled photos are keyed by their id so they still get a file name.
    pub fn from_photo(photo: Photo) -> Self {
        let title = if photo.title.trim().is_empty() {
            photo.id.to_string()
        } else {
            photo.title
        };
        Self {
            id: photo.id,
            title,
            original_format: photo.original_format,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Collection {
    pub name: String,
    pub id: PhotosetId,
    pub primary: Option<PhotoId>,
    items: BTreeMap<String, ItemHandle>,
}

impl Collection {
    pub fn items(&self) -> impl Iterator<Item = &ItemHandle> {
        self.items.values()
    }

    pub fn item(&self, title: &str) -> Option<&ItemHandle> {
        self.items.get(title)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// What [`Registry::remove_item`] took out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedItem {
    pub item: ItemHandle,
    pub photoset: PhotosetId,
    pub collection_dropped: bool,
}

/// Result of putting a handle under a title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Placed,
    /// The title was taken; this is the handle that held it.
    Displaced(ItemHandle),
    /// The collection (or, for a retitle, the source item) is not tracked.
    Missing,
}

/// In-process view of the remote library: collection name -> items by title.
///
/// Only collections that exist remotely are tracked. The registry is owned by
/// the sync engine and mutated from a single task.
#[derive(Debug, Default)]
pub struct Registry {
    collections: BTreeMap<String, Collection>,
    orphans: Vec<ItemHandle>,
}

impl Registry {
    pub fn from_remote<I>(sets: I) -> Self
    where
        I: IntoIterator<Item = (Photoset, Vec<Photo>)>,
    {
        let mut registry = Self::default();
        for (set, photos) in sets {
            if registry.collections.contains_key(&set.title) {
                warn!(collection = %set.title, photoset = %set.id, "duplicate photoset title, keeping the first");
                continue;
            }
            let mut items = BTreeMap::new();
            for photo in photos {
                let item = ItemHandle::from_photo(photo);
                if let Some(previous) = items.insert(item.title.clone(), item) {
                    warn!(
                        collection = %set.title,
                        title = %previous.title,
                        photo = %previous.id,
                        "duplicate photo title in photoset, keeping the last"
                    );
                }
            }
            registry.collections.insert(
                set.title.clone(),
                Collection {
                    name: set.title,
                    id: set.id,
                    primary: set.primary,
                    items,
                },
            );
        }
        registry
    }

    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }

    pub fn collections(&self) -> impl Iterator<Item = &Collection> {
        self.collections.values()
    }

    pub fn contains_collection(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    pub fn item(&self, collection: &str, title: &str) -> Option<&ItemHandle> {
        self.collections.get(collection)?.item(title)
    }

    pub fn contains_item(&self, collection: &str, title: &str) -> bool {
        self.item(collection, title).is_some()
    }

    /// Records a freshly created photoset whose first member is `primary`.
    pub fn insert_collection(&mut self, name: &str, id: PhotosetId, primary: ItemHandle) {
        let mut items = BTreeMap::new();
        let primary_id = primary.id.clone();
        items.insert(primary.title.clone(), primary);
        self.collections.insert(
            name.to_string(),
            Collection {
                name: name.to_string(),
                id,
                primary: Some(primary_id),
                items,
            },
        );
    }

    /// Adds `item` to an existing collection.
    pub fn add_item(&mut self, collection: &str, item: ItemHandle) -> Placement {
        match self.collections.get_mut(collection) {
            Some(entry) => place(&mut entry.items, item),
            None => Placement::Missing,
        }
    }

    /// Drops the item; a collection left empty is dropped with it.
    pub fn remove_item(&mut self, collection: &str, title: &str) -> Option<RemovedItem> {
        let entry = self.collections.get_mut(collection)?;
        let item = entry.items.remove(title)?;
        let photoset = entry.id.clone();
        let collection_dropped = entry.items.is_empty();
        if collection_dropped {
            self.collections.remove(collection);
        }
        Some(RemovedItem {
            item,
            photoset,
            collection_dropped,
        })
    }

    pub fn retitle_item(&mut self, collection: &str, from: &str, to: &str) -> Placement {
        let Some(entry) = self.collections.get_mut(collection) else {
            return Placement::Missing;
        };
        let Some(mut item) = entry.items.remove(from) else {
            return Placement::Missing;
        };
        item.title = to.to_string();
        place(&mut entry.items, item)
    }

    pub fn rename_collection(&mut self, from: &str, to: &str) -> bool {
        if self.collections.contains_key(to) {
            return false;
        }
        let Some(mut entry) = self.collections.remove(from) else {
            return false;
        };
        entry.name = to.to_string();
        self.collections.insert(to.to_string(), entry);
        true
    }

    /// Remembers an uploaded photo that could not be placed in any collection.
    pub fn record_orphan(&mut self, item: ItemHandle) {
        self.orphans.push(item);
    }

    pub fn orphans(&self) -> &[ItemHandle] {
        &self.orphans
    }

    pub fn snapshot(&self) -> RemoteSnapshot {
        let mut snapshot = RemoteSnapshot::default();
        for collection in self.collections.values() {
            snapshot.insert_collection(&collection.name, collection.items().cloned().collect());
        }
        snapshot
    }
}

fn place(items: &mut BTreeMap<String, ItemHandle>, item: ItemHandle) -> Placement {
    match items.insert(item.title.clone(), item) {
        Some(previous) => Placement::Displaced(previous),
        None => Placement::Placed,
    }
}
