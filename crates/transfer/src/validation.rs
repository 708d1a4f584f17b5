use std::path::{Component, Path};

use crate::TransferError;
use crate::session::FileDescriptor;

/// Video container types accepted for upload, with their usual extensions.
pub const SUPPORTED_CONTENT_TYPES: &[(&str, &[&str])] = &[
    ("video/mp4", &["mp4", "m4v"]),
    ("video/webm", &["webm"]),
    ("video/quicktime", &["mov", "qt"]),
    ("video/x-msvideo", &["avi"]),
    ("video/x-matroska", &["mkv"]),
    ("video/mpeg", &["mpeg", "mpg"]),
    ("video/ogg", &["ogv"]),
];

/// Guesses the content type from a file extension.
pub fn content_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    SUPPORTED_CONTENT_TYPES
        .iter()
        .find(|(_, exts)| exts.contains(&ext.as_str()))
        .map(|(mime, _)| *mime)
}

/// Checks a descriptor before any planning or network work.
///
/// The file name is sent to the backend as-is, so it must be a bare name:
/// no directories, no traversal, no prefixes. Sizes are left to the planner.
pub fn validate_descriptor(descriptor: &FileDescriptor) -> Result<(), TransferError> {
    let name = descriptor.file_name.as_str();
    if name.trim().is_empty() {
        return Err(TransferError::InvalidInput("file name is empty".into()));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(TransferError::InvalidInput(format!(
            "file name must not contain path separators: {name}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => {
            return Err(TransferError::InvalidInput(format!(
                "file name is not a plain name: {name}"
            )));
        }
    }

    let content_type = descriptor.content_type.to_ascii_lowercase();
    if !SUPPORTED_CONTENT_TYPES
        .iter()
        .any(|(mime, _)| *mime == content_type)
    {
        return Err(TransferError::InvalidInput(format!(
            "unsupported content type: {}",
            descriptor.content_type
        )));
    }

    Ok(())
}
