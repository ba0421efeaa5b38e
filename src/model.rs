//! Generative model invocation
//!
//! The façade talks to the model through the [`GenerativeModel`] trait. The
//! production implementation calls the Vertex AI Gemini `generateContent`
//! endpoint with the native async HTTP client.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::auth::GoogleAuth;
use crate::media::ContentPart;

#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Model name reported in logs.
    fn name(&self) -> &str;

    /// Submits the ordered parts and returns the model's text output unchanged.
    async fn generate(
        &self,
        parts: &[ContentPart],
    ) -> Result<String, String>;
}

/// Gemini on Vertex AI, addressed by project and region.
pub struct VertexGemini {
    http: reqwest::Client,
    auth: Arc<GoogleAuth>,
    endpoint: String,
    model: String,
    permits: Semaphore,
}

impl VertexGemini {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        auth: Arc<GoogleAuth>,
        project_id: &str,
        location: &str,
        model: impl Into<String>,
        max_concurrent: usize,
    ) -> Self {
        let model = model.into();
        Self {
            http,
            auth,
            endpoint: Self::endpoint_url(project_id, location, &model),
            model,
            permits: Semaphore::new(max_concurrent.max(1)),
        }
    }

    #[must_use]
    pub fn endpoint_url(
        project_id: &str,
        location: &str,
        model: &str,
    ) -> String {
        format!(
            "https://{location}-aiplatform.googleapis.com/v1/projects/{project_id}/locations/{location}/publishers/google/models/{model}:generateContent"
        )
    }

    fn build_request(parts: &[ContentPart]) -> GenerateContentRequest {
        let parts = parts
            .iter()
            .map(|part| match part {
                ContentPart::Text(text) => Part::Text { text: text.clone() },
                ContentPart::InlineData { mime_type, data } => Part::InlineData {
                    inline_data: InlineData {
                        mime_type: mime_type.clone(),
                        data: BASE64_STANDARD.encode(data),
                    },
                },
                ContentPart::FileData { mime_type, file_uri } => Part::FileData {
                    file_data: FileData {
                        mime_type: mime_type.clone(),
                        file_uri: file_uri.clone(),
                    },
                },
            })
            .collect();

        GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
        }
    }
}

#[async_trait]
impl GenerativeModel for VertexGemini {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        parts: &[ContentPart],
    ) -> Result<String, String> {
        let body = Self::build_request(parts);

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| format!("Generation slots unavailable: {e}"))?;

        let token = self.auth.access_token().await?;

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Request to {} failed: {e}", self.model))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(format!("{} returned {status}: {body}", self.model));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse model response: {e}"))?;

        extract_text(parsed)
    }
}

fn extract_text(response: GenerateContentResponse) -> Result<String, String> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = response
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "no candidates returned".to_string());
        return Err(format!("No response from AI model: {reason}"));
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "empty content".to_string());
        return Err(format!("No text in model response: {reason}"));
    }

    Ok(text)
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    FileData {
        #[serde(rename = "fileData")]
        file_data: FileData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}
