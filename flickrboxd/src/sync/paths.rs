use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Finder metadata file that must never be synced.
pub const HIDDEN_SENTINEL: &str = ".DS_Store";

/// Raster formats accepted for upload, compared case-insensitively.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".tif", ".tiff", ".webp", ".heic",
];

pub const FALLBACK_EXTENSION: &str = ".jpg";

#[derive(Debug, Error)]
pub enum PathError {
    #[error("name is empty")]
    Empty,
    #[error("name contains unsupported component: {0}")]
    UnsupportedComponent(String),
}

/// Splits `name` into stem and extension (with its leading dot).
///
/// Leading dots do not start an extension, so `.DS_Store` has no extension
/// and `.hidden.png` splits into `.hidden` and `.png`.
pub fn split_file_name(name: &str) -> (&str, &str) {
    let leading = name.len() - name.trim_start_matches('.').len();
    match name[leading..].rfind('.') {
        Some(idx) => name.split_at(leading + idx),
        None => (name, ""),
    }
}

pub fn is_hidden_sentinel(stem: &str) -> bool {
    stem == HIDDEN_SENTINEL
}

pub fn is_allowed_extension(extension: &str) -> bool {
    ALLOWED_EXTENSIONS
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(extension))
}

/// Extension used when writing a downloaded item.
pub fn download_extension(original_format: Option<&str>) -> String {
    match original_format.map(str::trim).filter(|f| !f.is_empty()) {
        Some(format) => format!(".{}", format.trim_start_matches('.').to_ascii_lowercase()),
        None => FALLBACK_EXTENSION.to_string(),
    }
}

pub fn collection_dir(root: &Path, collection: &str) -> Result<PathBuf, PathError> {
    Ok(root.join(single_component(collection)?))
}

/// `<root>/<collection>/<title><extension>`
pub fn item_path(
    root: &Path,
    collection: &str,
    title: &str,
    extension: &str,
) -> Result<PathBuf, PathError> {
    let file_name = format!("{title}{extension}");
    Ok(collection_dir(root, collection)?.join(single_component(&file_name)?))
}

// Collection and file names come from remote titles; keep them to one
// normal path component under the sync root.
fn single_component(name: &str) -> Result<&str, PathError> {
    if name.is_empty() {
        return Err(PathError::Empty);
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains(['/', '\\']) => Ok(name),
        _ => Err(PathError::UnsupportedComponent(name.to_string())),
    }
}
