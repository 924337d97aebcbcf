/// Guess a content type for an object about to be written.
///
/// The extension wins; magic bytes are only consulted when the name says
/// nothing useful.
pub fn guess_content_type(name: &str, bytes: &[u8]) -> Option<String> {
    if let Some(mime) = mime_guess::from_path(name).first_raw() {
        return Some(mime.to_string());
    }

    let sniffed = sniff_mime(bytes);
    if sniffed.is_none() {
        tracing::debug!(
            "No content type for {} (first bytes: {:02X?})",
            name,
            &bytes[..bytes.len().min(4)]
        );
    }
    sniffed.map(str::to_string)
}

pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [0x89, 0x50, 0x4E, 0x47, ..] => Some("image/png"),
        [0x47, 0x49, 0x46, 0x38, ..] => Some("image/gif"),
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Some("image/webp"),
        [0x25, 0x50, 0x44, 0x46, ..] => Some("application/pdf"),
        [0x50, 0x4B, 0x03, 0x04, ..] => Some("application/zip"),
        [0x1F, 0x8B, ..] => Some("application/gzip"),
        _ => None,
    }
}
