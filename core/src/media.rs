const IMAGE_TYPES: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/bmp", "image/tiff"];

const AUDIO_TYPES: &[&str] = &[
    "audio/aac",
    "audio/midi",
    "audio/x-midi",
    "audio/mpeg",
    "audio/mp3",
    "audio/ogg",
    "audio/opus",
    "audio/wav",
];

const VIDEO_TYPES: &[&str] = &[
    "video/x-msvideo",
    "video/mpeg",
    "video/mp4",
    "video/quicktime",
    "video/webm",
    "video/x-ms-wmv",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
    Video,
}

fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Matches a client-supplied content type against the fixed allow-lists,
/// ignoring case and parameters. SVG is deliberately absent: inline SVG can
/// carry scripts.
#[must_use]
pub fn classify(content_type: &str) -> Option<MediaKind> {
    let essence = essence(content_type);
    if IMAGE_TYPES.contains(&essence.as_str()) {
        Some(MediaKind::Image)
    } else if AUDIO_TYPES.contains(&essence.as_str()) {
        Some(MediaKind::Audio)
    } else if VIDEO_TYPES.contains(&essence.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

/// Content type safe to echo back when serving an attachment. Anything not
/// on the allow-lists is downgraded to `application/octet-stream`.
#[must_use]
pub fn response_content_type(content_type: &str) -> String {
    let essence = essence(content_type);
    if classify(&essence).is_some() {
        essence
    } else {
        "application/octet-stream".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_types() {
        assert_eq!(classify("image/png"), Some(MediaKind::Image));
        assert_eq!(classify("audio/ogg"), Some(MediaKind::Audio));
        assert_eq!(classify("video/mp4"), Some(MediaKind::Video));
    }

    #[test]
    fn strips_parameters_and_case() {
        assert_eq!(classify("Image/PNG; charset=binary"), Some(MediaKind::Image));
        assert_eq!(classify(" video/webm ;codecs=vp9"), Some(MediaKind::Video));
    }

    #[test]
    fn rejects_scriptable_and_unknown_types() {
        assert_eq!(classify("image/svg+xml"), None);
        assert_eq!(classify("image/svg"), None);
        assert_eq!(classify("text/html"), None);
        assert_eq!(classify("application/pdf"), None);
    }

    #[test]
    fn unlisted_types_are_served_as_octet_stream() {
        assert_eq!(response_content_type("image/png"), "image/png");
        assert_eq!(response_content_type("Audio/MP3;q=1"), "audio/mp3");
        assert_eq!(response_content_type("text/html"), "application/octet-stream");
    }
}
