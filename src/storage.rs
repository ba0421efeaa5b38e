//! Signed upload URLs for direct-to-bucket media uploads
//!
//! Large videos bypass the server: the client asks for a short-lived `PUT`
//! URL, uploads straight to the bucket, and later hands the returned
//! `gs://` reference to `/chat/multimodal`.

use async_trait::async_trait;
use aws_lc_rs::digest::{SHA256, digest};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::GoogleAuth;

pub const UPLOAD_URL_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_UPLOAD_EXTENSION: &str = "mp4";
pub const UPLOAD_PREFIX: &str = "uploads";

const GCS_HOST: &str = "storage.googleapis.com";
const IAM_CREDENTIALS_URL: &str = "https://iamcredentials.googleapis.com";
const SIGNING_ALGORITHM: &str = "GOOG4-RSA-SHA256";
const SIGNED_HEADERS: &str = "content-type;host";

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Bucket every issued blob lives in.
    fn bucket(&self) -> &str;

    /// Returns a write-only URL for `blob_name`, valid for `expires_in`.
    async fn signed_upload_url(
        &self,
        blob_name: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, String>;
}

/// Extension of `filename`, lowercased; `mp4` when missing or unusable.
#[must_use]
pub fn upload_extension(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.trim().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| DEFAULT_UPLOAD_EXTENSION.to_string())
}

/// A fresh, globally unique blob name for an upload of `filename`.
#[must_use]
pub fn new_blob_name(filename: &str) -> String {
    format!("{UPLOAD_PREFIX}/{}.{}", uuid::Uuid::new_v4(), upload_extension(filename))
}

#[must_use]
pub fn resource_uri(
    bucket: &str,
    blob_name: &str,
) -> String {
    format!("gs://{bucket}/{blob_name}")
}

/// Google Cloud Storage with V4 signatures produced by the IAM `signBlob` API.
pub struct GcsBlobStore {
    http: reqwest::Client,
    auth: Arc<GoogleAuth>,
    bucket: String,
    signer_email: String,
}

impl GcsBlobStore {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        auth: Arc<GoogleAuth>,
        bucket: impl Into<String>,
        signer_email: impl Into<String>,
    ) -> Self {
        Self {
            http,
            auth,
            bucket: bucket.into(),
            signer_email: signer_email.into(),
        }
    }

    async fn sign_blob(
        &self,
        payload: &[u8],
    ) -> Result<Vec<u8>, String> {
        let token = self.auth.access_token().await?;
        let url = format!(
            "{IAM_CREDENTIALS_URL}/v1/projects/-/serviceAccounts/{}:signBlob",
            self.signer_email
        );

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&SignBlobRequest {
                payload: BASE64_STANDARD.encode(payload),
            })
            .send()
            .await
            .map_err(|e| format!("signBlob request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("signBlob returned {status}: {body}"));
        }

        let signed: SignBlobResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse signBlob response: {e}"))?;

        BASE64_STANDARD
            .decode(signed.signed_blob.as_bytes())
            .map_err(|e| format!("signBlob returned an invalid signature: {e}"))
    }
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn signed_upload_url(
        &self,
        blob_name: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, String> {
        let request = V4Request::new(
            &self.bucket,
            blob_name,
            content_type,
            &self.signer_email,
            Utc::now(),
            expires_in,
        );

        let signature = self.sign_blob(request.string_to_sign().as_bytes()).await?;
        tracing::debug!("Signed upload URL for gs://{}/{}", self.bucket, blob_name);

        Ok(request.url(&hex_encode(&signature)))
    }
}

#[derive(Serialize)]
struct SignBlobRequest {
    payload: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignBlobResponse {
    signed_blob: String,
}

/// The canonical pieces of a V4 `PUT` signature, computed before signing.
struct V4Request {
    canonical_uri: String,
    canonical_query: String,
    content_type: String,
    timestamp: String,
    credential_scope: String,
}

impl V4Request {
    fn new(
        bucket: &str,
        blob_name: &str,
        content_type: &str,
        signer_email: &str,
        now: DateTime<Utc>,
        expires_in: Duration,
    ) -> Self {
        let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
        let credential_scope = format!("{}/auto/storage/goog4_request", now.format("%Y%m%d"));
        let credential = format!("{signer_email}/{credential_scope}");

        // Already in sorted order
        let params = [
            ("X-Goog-Algorithm", SIGNING_ALGORITHM.to_string()),
            ("X-Goog-Credential", credential),
            ("X-Goog-Date", timestamp.clone()),
            ("X-Goog-Expires", expires_in.as_secs().to_string()),
            ("X-Goog-SignedHeaders", SIGNED_HEADERS.to_string()),
        ];
        let canonical_query = params
            .iter()
            .map(|(k, v)| format!("{}={}", percent_encode(k, false), percent_encode(v, false)))
            .collect::<Vec<_>>()
            .join("&");

        Self {
            canonical_uri: format!("/{}/{}", percent_encode(bucket, true), percent_encode(blob_name, true)),
            canonical_query,
            content_type: content_type.trim().to_string(),
            timestamp,
            credential_scope,
        }
    }

    fn canonical_request(&self) -> String {
        format!(
            "PUT\n{}\n{}\ncontent-type:{}\nhost:{GCS_HOST}\n\n{SIGNED_HEADERS}\nUNSIGNED-PAYLOAD",
            self.canonical_uri, self.canonical_query, self.content_type
        )
    }

    fn string_to_sign(&self) -> String {
        let hashed = digest(&SHA256, self.canonical_request().as_bytes());
        format!(
            "{SIGNING_ALGORITHM}\n{}\n{}\n{}",
            self.timestamp,
            self.credential_scope,
            hex_encode(hashed.as_ref())
        )
    }

    fn url(
        &self,
        signature_hex: &str,
    ) -> String {
        format!(
            "https://{GCS_HOST}{}?{}&X-Goog-Signature={signature_hex}",
            self.canonical_uri, self.canonical_query
        )
    }
}

/// RFC 3986 percent-encoding; `/` is kept when encoding a path.
fn percent_encode(
    input: &str,
    keep_slash: bool,
) -> String {
    let mut encoded = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => encoded.push(byte as char),
            b'/' if keep_slash => encoded.push('/'),
            _ => {
                let _ = write!(encoded, "%{byte:02X}");
            }
        }
    }
    encoded
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_request() -> V4Request {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 45).unwrap();
        V4Request::new(
            "acme-persona-uploads",
            "uploads/clip 1.mp4",
            "video/mp4",
            "123456789-compute@developer.gserviceaccount.com",
            now,
            UPLOAD_URL_TTL,
        )
    }

    #[test]
    fn test_upload_extension() {
        assert_eq!(upload_extension("launch.MOV"), "mov");
        assert_eq!(upload_extension("archive.tar.gz"), "gz");
        assert_eq!(upload_extension("noextension"), "mp4");
        assert_eq!(upload_extension("trailing."), "mp4");
        assert_eq!(upload_extension("weird.m p4"), "mp4");
        assert_eq!(upload_extension(""), "mp4");
    }

    #[test]
    fn test_blob_names_are_unique() {
        let first = new_blob_name("ad.mp4");
        let second = new_blob_name("ad.mp4");

        assert_ne!(first, second);
        assert!(first.starts_with("uploads/"));
        assert!(first.ends_with(".mp4"));
    }

    #[test]
    fn test_resource_uri() {
        assert_eq!(resource_uri("bucket", "uploads/a.mp4"), "gs://bucket/uploads/a.mp4");
    }

    #[test]
    fn test_percent_encode() {
        assert_eq!(percent_encode("a b/c~", true), "a%20b/c~");
        assert_eq!(percent_encode("a b/c~", false), "a%20b%2Fc~");
        assert_eq!(percent_encode("x@y", false), "x%40y");
    }

    #[test]
    fn test_hex_encode() {
        assert_eq!(hex_encode(&[0x00, 0xab, 0x0f]), "00ab0f");
    }

    #[test]
    fn test_canonical_request() {
        let request = fixed_request();
        let expected = "PUT\n\
            /acme-persona-uploads/uploads/clip%201.mp4\n\
            X-Goog-Algorithm=GOOG4-RSA-SHA256\
            &X-Goog-Credential=123456789-compute%40developer.gserviceaccount.com%2F20240501%2Fauto%2Fstorage%2Fgoog4_request\
            &X-Goog-Date=20240501T123045Z\
            &X-Goog-Expires=900\
            &X-Goog-SignedHeaders=content-type%3Bhost\n\
            content-type:video/mp4\n\
            host:storage.googleapis.com\n\
            \n\
            content-type;host\n\
            UNSIGNED-PAYLOAD";

        assert_eq!(request.canonical_request(), expected);
    }

    #[test]
    fn test_string_to_sign_layout() {
        let request = fixed_request();
        let string_to_sign = request.string_to_sign();
        let lines: Vec<&str> = string_to_sign.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "GOOG4-RSA-SHA256");
        assert_eq!(lines[1], "20240501T123045Z");
        assert_eq!(lines[2], "20240501/auto/storage/goog4_request");
        assert_eq!(lines[3].len(), 64);
        assert!(lines[3].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signed_url_layout() {
        let url = fixed_request().url("deadbeef");

        assert!(url.starts_with("https://storage.googleapis.com/acme-persona-uploads/uploads/clip%201.mp4?"));
        assert!(url.contains("X-Goog-Expires=900"));
        assert!(url.ends_with("&X-Goog-Signature=deadbeef"));
    }
}
