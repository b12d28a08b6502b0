use crate::status::MediaKind;

/// Extension used for still images and for raw payloads
pub const JPEG_EXTENSION: &str = "jpg";

/// Content type written with every persisted object
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// JPEG start-of-image marker followed by the first segment marker byte
const JPEG_SOI: [u8; 3] = [0xFF, 0xD8, 0xFF];

/// Map a declared media kind to its file extension and whether it is a still
/// image eligible for persistence
pub fn validate(kind: MediaKind) -> (&'static str, bool) {
    match kind {
        MediaKind::Photo => (JPEG_EXTENSION, true),
        MediaKind::Video => ("mp4", false),
        MediaKind::AnimatedImage => ("gif", false),
        MediaKind::Other => ("err", false),
    }
}

/// Check for the JPEG SOI marker
pub fn looks_like_jpeg(bytes: &[u8]) -> bool {
    bytes.starts_with(&JPEG_SOI)
}
