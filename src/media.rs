//! Media attachment handling
//!
//! Turns inline base64 images, uploaded files and remote video references into
//! the ordered list of parts sent to the model: text first, then the image,
//! then the video.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use regex::Regex;
use std::sync::OnceLock;

use crate::error::ApiError;

pub const DEFAULT_IMAGE_MIME: &str = "image/jpeg";
pub const DEFAULT_VIDEO_MIME: &str = "video/mp4";

pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;
pub const MAX_VIDEO_BYTES: usize = 100 * 1024 * 1024;

static DATA_URL_HEADER: OnceLock<Regex> = OnceLock::new();

fn data_url_header() -> &'static Regex {
    DATA_URL_HEADER.get_or_init(|| {
        Regex::new(r"(?i)^data:(?P<mime>[a-z0-9.+-]+/[a-z0-9.+-]+)(?:;[a-z0-9=.+-]+)*$").unwrap()
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    #[must_use]
    pub const fn default_mime(self) -> &'static str {
        match self {
            Self::Image => DEFAULT_IMAGE_MIME,
            Self::Video => DEFAULT_VIDEO_MIME,
        }
    }

    #[must_use]
    pub const fn max_bytes(self) -> usize {
        match self {
            Self::Image => MAX_IMAGE_BYTES,
            Self::Video => MAX_VIDEO_BYTES,
        }
    }

    /// Rejects payloads larger than this kind's limit.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::PayloadTooLarge` naming the limit.
    pub fn check_size(
        self,
        len: usize,
    ) -> Result<(), ApiError> {
        if len > self.max_bytes() {
            return Err(self.too_large());
        }
        Ok(())
    }

    #[must_use]
    pub fn too_large(self) -> ApiError {
        ApiError::payload_too_large(format!(
            "{self} exceeds the {} MiB limit",
            self.max_bytes() / (1024 * 1024)
        ))
    }
}

/// One piece of model input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    InlineData { mime_type: String, data: Vec<u8> },
    FileData { mime_type: String, file_uri: String },
}

/// Raw media bytes with the content type the caller declared, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub mime_type: Option<String>,
    pub data: Vec<u8>,
}

impl MediaFile {
    pub fn new(
        mime_type: Option<String>,
        data: Vec<u8>,
    ) -> Self {
        let mime_type = mime_type.filter(|m| !m.trim().is_empty());
        Self { mime_type, data }
    }

    fn into_part(
        self,
        kind: MediaKind,
    ) -> ContentPart {
        ContentPart::InlineData {
            mime_type: self.mime_type.unwrap_or_else(|| kind.default_mime().to_string()),
            data: self.data,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Attachments {
    pub image: Option<MediaFile>,
    pub video: Option<MediaFile>,
    /// Reference to a video already in the blob store; wins over `video`.
    pub video_uri: Option<String>,
}

impl Attachments {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.image.is_none() && self.video.is_none() && self.video_uri.is_none()
    }
}

/// Decodes a base64 image, optionally prefixed with a `data:<mime>;base64,` header.
///
/// Without a header the whole string is payload and the type is `image/jpeg`.
///
/// # Errors
///
/// Returns `ApiError::BadRequest` for a malformed header or payload, and
/// `ApiError::PayloadTooLarge` when the decoded image exceeds its limit.
pub fn decode_base64_image(input: &str) -> Result<MediaFile, ApiError> {
    let input = input.trim();

    let (mime_type, payload) = match input.split_once(',') {
        Some((header, payload)) => {
            let captures = data_url_header()
                .captures(header.trim())
                .ok_or_else(|| ApiError::bad_request(format!("Invalid image data URL header: {header}")))?;
            (captures["mime"].to_ascii_lowercase(), payload)
        }
        None => (DEFAULT_IMAGE_MIME.to_string(), input),
    };

    let payload: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    let data = BASE64_STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| ApiError::bad_request(format!("Invalid base64 image data: {e}")))?;

    if data.is_empty() {
        return Err(ApiError::bad_request("Image data is empty"));
    }
    MediaKind::Image.check_size(data.len())?;

    Ok(MediaFile::new(Some(mime_type), data))
}

/// Guesses a video content type from the extension of a blob reference.
///
/// Falls back to `video/mp4` when the extension is unknown or not a video type.
#[must_use]
pub fn video_mime_from_uri(uri: &str) -> String {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);

    mime_guess::from_path(path)
        .iter()
        .find(|mime| mime.type_() == mime_guess::mime::VIDEO)
        .map_or_else(|| DEFAULT_VIDEO_MIME.to_string(), |mime| mime.essence_str().to_string())
}

fn validate_video_uri(uri: &str) -> Result<(), ApiError> {
    if uri.starts_with("gs://") || uri.starts_with("https://") {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!(
            "video_uri must be a gs:// or https:// reference, got: {uri}"
        )))
    }
}

/// Builds the ordered model input: text, image, video.
///
/// # Errors
///
/// Returns `ApiError::PayloadTooLarge` when a file exceeds its limit and
/// `ApiError::BadRequest` for an unusable video reference.
pub fn build_parts(
    prompt: String,
    attachments: Attachments,
) -> Result<Vec<ContentPart>, ApiError> {
    let mut parts = vec![ContentPart::Text(prompt)];

    if let Some(image) = attachments.image {
        MediaKind::Image.check_size(image.data.len())?;
        parts.push(image.into_part(MediaKind::Image));
    }

    let video_uri = attachments.video_uri.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());

    match (video_uri, attachments.video) {
        (Some(uri), video) => {
            validate_video_uri(&uri)?;
            if video.is_some() {
                tracing::info!("Both video_uri and an uploaded video were supplied; using {}", uri);
            }
            parts.push(ContentPart::FileData {
                mime_type: video_mime_from_uri(&uri),
                file_uri: uri,
            });
        }
        (None, Some(video)) => {
            MediaKind::Video.check_size(video.data.len())?;
            parts.push(video.into_part(MediaKind::Video));
        }
        (None, None) => {}
    }

    Ok(parts)
}
