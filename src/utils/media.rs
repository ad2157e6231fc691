use crate::core::state::Attachment;
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::path::Path;

pub const BASE64_MARKER: &str = "base64,";
pub const CANONICAL_IMAGE_PREFIX: &str = "data:image/png;base64,";
pub const FALLBACK_MIME: &str = "application/octet-stream";

pub fn is_data_url(s: &str) -> bool {
    s.starts_with("data:")
}

/// Case-sensitive, like `is_data_url`.
pub fn is_absolute_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

pub fn encode_data_url(bytes: &[u8], mime: &str) -> String {
    format!("data:{};base64,{}", mime, BASE64.encode(bytes))
}

/// Payload part of a data URL (after the last marker), or the input itself.
pub fn strip_data_url_header(s: &str) -> &str {
    match s.rfind(BASE64_MARKER) {
        Some(idx) if is_data_url(s) => &s[idx + BASE64_MARKER.len()..],
        _ => s,
    }
}

/// Makes a backend-relative image path absolute. Data URLs and absolute URLs
/// are returned as-is; blank input yields `None`.
pub fn absolute_image_url(base: &str, src: Option<&str>) -> Option<String> {
    let s = src?.trim();
    if s.is_empty() {
        return None;
    }
    if is_data_url(s) || is_absolute_url(s) {
        return Some(s.to_string());
    }
    Some(format!(
        "{}/{}",
        base.trim_end_matches('/'),
        s.trim_start_matches('/')
    ))
}

pub fn mime_for_path(path: &str) -> Option<&'static str> {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

/// Reads a local image into an attachment carrying its data URL.
pub async fn read_attachment(path: &Path) -> Result<Attachment> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "image".to_string());
    let mime = mime_for_path(&name).unwrap_or(FALLBACK_MIME).to_string();
    log::debug!("Attached {} ({} bytes, {})", name, bytes.len(), mime);
    Ok(Attachment {
        data_url: encode_data_url(&bytes, &mime),
        name,
        mime,
    })
}
