use std::path::Path;

pub(crate) const DEFAULT_MIME: &str = "application/octet-stream";

/// Content type for a served file, chosen by its extension.
///
/// Extensions are compared case-insensitively; unknown or missing ones map
/// to `application/octet-stream`.
pub fn from_path(path: &Path) -> &'static str {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return DEFAULT_MIME;
    };

    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "txt" => "text/plain; charset=utf-8",
        "pdf" => "application/pdf",
        _ => DEFAULT_MIME,
    }
}
