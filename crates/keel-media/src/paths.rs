//! Object paths used by the application for uploaded media.

use chrono::{DateTime, Utc};

/// Separator between the post id, timestamp and original file name.
const PART_SEPARATOR: &str = "__";

/// Path of a post's cover image: `postCoverImages/{postId}__{millis}__{filename}`.
pub fn cover_image_path(post_id: &str, uploaded_at: DateTime<Utc>, filename: &str) -> String {
    format!(
        "postCoverImages/{}{sep}{}{sep}{}",
        post_id,
        uploaded_at.timestamp_millis(),
        base_name(filename),
        sep = PART_SEPARATOR
    )
}

/// Path of a generated thumbnail: `thumbnails/{postId}-{millis}{ext}`.
///
/// `extension` includes its leading dot, or is empty.
pub fn thumbnail_path(post_id: &str, uploaded_at: DateTime<Utc>, extension: &str) -> String {
    format!(
        "thumbnails/{}-{}{}",
        post_id,
        uploaded_at.timestamp_millis(),
        extension
    )
}

/// Recover the original file name from a cover image URL or path.
///
/// Names that do not carry the post id and timestamp prefix are returned as is.
pub fn media_filename(url: &str) -> String {
    let base = base_name(url);
    let parts: Vec<&str> = base.split(PART_SEPARATOR).collect();
    if parts.len() < 3 {
        return base.to_string();
    }
    parts[2..].join(PART_SEPARATOR)
}

/// Content type inferred from a path's extension.
pub fn content_type_for(path: &str) -> &'static str {
    let extension = base_name(path)
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "avif" => "image/avif",
        "mp4" => "video/mp4",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

fn base_name(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_123).unwrap()
    }

    #[test]
    fn test_cover_image_path_round_trips_filename() {
        let path = cover_image_path("post-1", at(), "my__photo.png");
        assert_eq!(path, "postCoverImages/post-1__1700000000123__my__photo.png");
        assert_eq!(media_filename(&format!("/media/{}", path)), "my__photo.png");
    }

    #[test]
    fn test_thumbnail_path() {
        assert_eq!(
            thumbnail_path("post-1", at(), ".webp"),
            "thumbnails/post-1-1700000000123.webp"
        );
    }

    #[test]
    fn test_media_filename_without_prefix() {
        assert_eq!(media_filename("https://cdn.example.com/a/plain.jpg?x=1"), "plain.jpg");
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("a/b/Cover.JPG"), "image/jpeg");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
