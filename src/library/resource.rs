use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Sent with `sendfile(2)`.
    Static,
    /// Sent through the io_uring read/send cycle.
    Dynamic,
    None,
}

/// Classifies a decoded request path by its leading folder. `static_folder`
/// and `dynamic_folder` are relative fragments such as `"static/"`.
/// The static check runs first; the two are not expected to overlap.
pub fn classify(path: &str, static_folder: &str, dynamic_folder: &str) -> ResourceKind {
    let Some(relative) = path.strip_prefix('/') else {
        return ResourceKind::None;
    };
    if !static_folder.is_empty() && relative.starts_with(static_folder) {
        return ResourceKind::Static;
    }
    if !dynamic_folder.is_empty() && relative.starts_with(dynamic_folder) {
        return ResourceKind::Dynamic;
    }
    ResourceKind::None
}

/// `document_root` + `path` without its leading slash.
/// Returns `None` when the path climbs out with a `..` segment.
pub fn resolve(document_root: &Path, path: &str) -> Option<PathBuf> {
    let relative: &Path = Path::new(path.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
    {
        return None;
    }
    Some(document_root.join(relative))
}
