use std::collections::{BTreeSet, HashSet};

use tracing::debug;

use super::paths::{is_allowed_extension, is_hidden_sentinel, split_file_name};
use super::registry::ItemHandle;
use super::snapshot::{LocalSnapshot, RemoteSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    CreateDir {
        collection: String,
    },
    Download {
        collection: String,
        item: ItemHandle,
    },
    Upload {
        collection: String,
        title: String,
        extension: String,
    },
}

/// Computes the actions that bring both sides to the same membership.
///
/// Items are joined on the file stem, so `sunset.png` locally and a remote
/// `sunset` are the same item whatever their stored formats are. Per remote
/// collection the downloads come first, then the uploads; local directories
/// unknown remotely follow, each upload targeting a collection named after
/// the directory.
pub fn plan(remote: &RemoteSnapshot, local: &LocalSnapshot) -> Vec<SyncAction> {
    let mut actions = Vec::new();

    for (collection, items) in remote.collections() {
        let files = local.files(collection);
        if files.is_none() {
            actions.push(SyncAction::CreateDir {
                collection: collection.to_string(),
            });
        }

        let local_stems: HashSet<&str> = files
            .into_iter()
            .flatten()
            .map(|name| split_file_name(name).0)
            .collect();
        let mut seen_remote = HashSet::with_capacity(items.len());
        for item in items {
            seen_remote.insert(item.title.as_str());
            if !local_stems.contains(item.title.as_str()) {
                actions.push(SyncAction::Download {
                    collection: collection.to_string(),
                    item: item.clone(),
                });
            }
        }

        if let Some(files) = files {
            push_uploads(collection, files, &seen_remote, &mut actions);
        }
    }

    let nothing_remote = HashSet::new();
    for (dir, files) in local.dirs() {
        if remote.contains(dir) {
            continue;
        }
        push_uploads(dir, files, &nothing_remote, &mut actions);
    }

    actions
}

fn push_uploads(
    collection: &str,
    files: &BTreeSet<String>,
    seen_remote: &HashSet<&str>,
    actions: &mut Vec<SyncAction>,
) {
    let mut planned = HashSet::new();
    for name in files {
        let (stem, extension) = split_file_name(name);
        if is_hidden_sentinel(stem) || seen_remote.contains(stem) {
            continue;
        }
        if !is_allowed_extension(extension) {
            debug!(collection, file = %name, "skipping file with unsupported extension");
            continue;
        }
        // Same stem, different extension: the first one wins the title.
        if !planned.insert(stem) {
            debug!(collection, file = %name, "skipping file whose title is already planned");
            continue;
        }
        actions.push(SyncAction::Upload {
            collection: collection.to_string(),
            title: stem.to_string(),
            extension: extension.to_string(),
        });
    }
}
