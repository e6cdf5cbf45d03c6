use std::path::Path;
use url::Url;

/// Extension used when neither the URL nor the content type says anything useful.
pub const FALLBACK_EXTENSION: &str = ".bin";

const CONTENT_TYPE_EXTENSIONS: [(&str, &str); 16] = [
    ("image/png", ".png"),
    ("image/jpeg", ".jpg"),
    ("image/jpg", ".jpg"),
    ("image/gif", ".gif"),
    ("image/webp", ".webp"),
    ("image/svg+xml", ".svg"),
    ("image/avif", ".avif"),
    ("text/css", ".css"),
    ("application/javascript", ".js"),
    ("text/javascript", ".js"),
    ("font/woff2", ".woff2"),
    ("font/woff", ".woff"),
    ("application/font-woff2", ".woff2"),
    ("application/font-woff", ".woff"),
    ("video/mp4", ".mp4"),
    ("video/webm", ".webm"),
];

/// Picks the local file extension (with leading dot) for a downloaded asset.
///
/// A 2-5 character suffix on the last path segment wins; otherwise the
/// content type is looked up in a fixed table; otherwise `.bin`.
pub fn infer_extension(url: &Url, content_type: &str) -> String {
    if let Some(ext) = extension_from_path(url) {
        return format!(".{}", ext);
    }

    extension_from_content_type(content_type)
        .unwrap_or(FALLBACK_EXTENSION)
        .to_string()
}

fn extension_from_path(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.last()?;
    let ext = Path::new(segment).extension()?.to_str()?;
    let ext = ext.split('?').next().unwrap_or_default().to_lowercase();

    (2..=5).contains(&ext.chars().count()).then_some(ext)
}

fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .parse::<mime::Mime>()
        .map(|m| m.essence_str().to_ascii_lowercase())
        .unwrap_or_else(|_| content_type.trim().to_ascii_lowercase());

    CONTENT_TYPE_EXTENSIONS
        .iter()
        .find(|(mime_type, _)| *mime_type == essence)
        .map(|(_, ext)| *ext)
}
