//! Core persona chat functionality
//!
//! [`PersonaAgent`] validates requests, assembles the prompt and media parts,
//! calls the model and issues upload URLs. It is shared by every HTTP worker
//! and holds no per-request state.

use std::sync::Arc;

use crate::auth::GoogleAuth;
use crate::chat::{ChatReply, ChatRequest, ChatTurn, UploadUrlRequest, UploadUrlResponse};
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::media::{self, Attachments, ContentPart};
use crate::model::{GenerativeModel, VertexGemini};
use crate::storage::{self, BlobStore, GcsBlobStore, UPLOAD_URL_TTL};
use crate::template::TemplateEngine;

const MODEL_NOT_CONFIGURED: &str = "Model not configured. Set GCLOUD_PROJECT environment variable.";
const STORAGE_NOT_CONFIGURED: &str =
    "Upload storage not configured. Set GCLOUD_PROJECT and GCLOUD_PROJECT_NUMBER (or SIGNING_SERVICE_ACCOUNT).";

/// Text fields and attachments of a multipart chat request.
///
/// Text fields are optional here because form parts may simply be absent;
/// [`PersonaAgent::chat_multimodal`] rejects missing ones.
#[derive(Debug, Clone, Default)]
pub struct MultimodalChatRequest {
    pub user_prompt: Option<String>,
    pub brand_context: Option<String>,
    pub audience_summary: Option<String>,
    pub history: Vec<ChatTurn>,
    pub attachments: Attachments,
}

pub struct PersonaAgent {
    model: Option<Arc<dyn GenerativeModel>>,
    blob_store: Option<Arc<dyn BlobStore>>,
}

impl PersonaAgent {
    #[must_use]
    pub fn new(
        model: Option<Arc<dyn GenerativeModel>>,
        blob_store: Option<Arc<dyn BlobStore>>,
    ) -> Self {
        Self { model, blob_store }
    }

    /// Builds the model client and blob store from configuration.
    ///
    /// Either collaborator is left out when its settings are missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn from_config(config: &AppConfig) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {e}"))?;

        let auth = Arc::new(GoogleAuth::new(
            http.clone(),
            config.static_access_token.clone(),
            config.metadata_host.clone(),
        ));

        let model: Option<Arc<dyn GenerativeModel>> = match &config.project_id {
            Some(project_id) => {
                tracing::info!(
                    "Model configured: {} in project {} ({})",
                    config.model,
                    project_id,
                    config.location
                );
                Some(Arc::new(VertexGemini::new(
                    http.clone(),
                    Arc::clone(&auth),
                    project_id,
                    &config.location,
                    config.model.clone(),
                    config.max_concurrent_generations,
                )))
            }
            None => {
                tracing::warn!("GCLOUD_PROJECT not set. Model-invoking routes will fail.");
                None
            }
        };

        let blob_store: Option<Arc<dyn BlobStore>> = match (config.upload_bucket(), config.signing_identity()) {
            (Some(bucket), Some(signer)) => {
                tracing::info!("Upload URLs will be signed by {} for bucket {}", signer, bucket);
                Some(Arc::new(GcsBlobStore::new(http, auth, bucket, signer)))
            }
            _ => {
                tracing::warn!("Upload storage not configured. /generate-upload-url will fail.");
                None
            }
        };

        Ok(Self::new(model, blob_store))
    }

    #[must_use]
    pub const fn model_configured(&self) -> bool {
        self.model.is_some()
    }

    /// Fails fast when no model client exists.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Misconfigured` when the model was never configured.
    pub fn require_model(&self) -> Result<&Arc<dyn GenerativeModel>, ApiError> {
        self.model
            .as_ref()
            .ok_or_else(|| ApiError::misconfigured(MODEL_NOT_CONFIGURED))
    }

    /// Handles a JSON chat request with optional inline image and history.
    ///
    /// # Errors
    ///
    /// Returns `Misconfigured` without a model, `BadRequest` for missing text or
    /// undecodable media, `PayloadTooLarge` for oversized media and
    /// `UpstreamFailure` when generation fails.
    pub async fn chat(
        &self,
        request: ChatRequest,
    ) -> Result<ChatReply, ApiError> {
        let model = self.require_model()?;
        validate_prompt(&request.user_prompt)?;

        let image = request
            .image
            .as_deref()
            .filter(|data| !data.trim().is_empty())
            .map(media::decode_base64_image)
            .transpose()?;

        let prompt = TemplateEngine::render_persona_prompt(
            &request.audience_summary,
            &request.brand_context,
            &request.user_prompt,
            &request.history,
        );
        let parts = media::build_parts(
            prompt,
            Attachments {
                image,
                ..Attachments::default()
            },
        )?;

        generate(model.as_ref(), &parts, request.history.len()).await
    }

    /// Handles a multipart chat request with optional image, video and video reference.
    ///
    /// # Errors
    ///
    /// Same as [`PersonaAgent::chat`], plus `BadRequest` for missing form fields.
    pub async fn chat_multimodal(
        &self,
        request: MultimodalChatRequest,
    ) -> Result<ChatReply, ApiError> {
        let model = self.require_model()?;

        let user_prompt = required_field(request.user_prompt, "user_prompt")?;
        let brand_context = required_field(request.brand_context, "brand_context")?;
        let audience_summary = required_field(request.audience_summary, "audience_summary")?;
        validate_prompt(&user_prompt)?;

        let prompt =
            TemplateEngine::render_persona_prompt(&audience_summary, &brand_context, &user_prompt, &request.history);
        let parts = media::build_parts(prompt, request.attachments)?;

        generate(model.as_ref(), &parts, request.history.len()).await
    }

    /// Issues a 15 minute signed `PUT` URL for a direct upload.
    ///
    /// # Errors
    ///
    /// Returns `Misconfigured` without a blob store, `BadRequest` for an empty
    /// content type and `UpstreamFailure` when signing fails.
    pub async fn generate_upload_url(
        &self,
        request: UploadUrlRequest,
    ) -> Result<UploadUrlResponse, ApiError> {
        let store = self
            .blob_store
            .as_ref()
            .ok_or_else(|| ApiError::misconfigured(STORAGE_NOT_CONFIGURED))?;

        let content_type = request.content_type.trim();
        if content_type.is_empty() {
            return Err(ApiError::bad_request("contentType is required"));
        }

        let blob_name = storage::new_blob_name(&request.filename);
        let upload_url = store
            .signed_upload_url(&blob_name, content_type, UPLOAD_URL_TTL)
            .await
            .map_err(|e| {
                tracing::error!("Upload URL generation failed for {}: {}", blob_name, e);
                ApiError::upstream_failure(format!("URL generation failed: {e}"))
            })?;

        tracing::info!("Issued upload URL for {} ({})", blob_name, content_type);

        Ok(UploadUrlResponse {
            upload_url,
            resource_uri: storage::resource_uri(store.bucket(), &blob_name),
            blob_name,
        })
    }
}

async fn generate(
    model: &dyn GenerativeModel,
    parts: &[ContentPart],
    history_len: usize,
) -> Result<ChatReply, ApiError> {
    tracing::info!(
        "Generating with {} ({} parts, {} history turns)",
        model.name(),
        parts.len(),
        history_len
    );

    let agent_response = model.generate(parts).await.map_err(|e| {
        tracing::error!("Generation failed: {}", e);
        ApiError::upstream_failure(format!("Generation failed: {e}"))
    })?;

    Ok(ChatReply { agent_response })
}

fn required_field(
    value: Option<String>,
    name: &str,
) -> Result<String, ApiError> {
    value.ok_or_else(|| ApiError::bad_request(format!("{name} is required")))
}

fn validate_prompt(user_prompt: &str) -> Result<(), ApiError> {
    if user_prompt.trim().is_empty() {
        return Err(ApiError::bad_request("user_prompt must not be empty"));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::{FakeBlobStore, FakeModel};
    use super::*;
    use crate::media::MediaFile;

    fn agent_with(model: &Arc<FakeModel>) -> PersonaAgent {
        let model: Arc<dyn GenerativeModel> = model.clone();
        PersonaAgent::new(Some(model), Some(Arc::new(FakeBlobStore { fail: false })))
    }

    fn chat_request(prompt: &str) -> ChatRequest {
        ChatRequest {
            user_prompt: prompt.to_string(),
            brand_context: "Acme cold brew in cans".to_string(),
            audience_summary: "Night-shift nurses in their thirties".to_string(),
            history: Vec::new(),
            image: None,
        }
    }

    #[tokio::test]
    async fn test_chat_returns_model_text_verbatim() {
        let model = Arc::new(FakeModel::replying("  Honestly? I'd try it.\n"));
        let reply = agent_with(&model).chat(chat_request("Thoughts?")).await.unwrap();

        assert_eq!(reply.agent_response, "  Honestly? I'd try it.\n");
        assert_eq!(model.call_count(), 1);

        let parts = model.last_parts();
        assert_eq!(parts.len(), 1);
        let ContentPart::Text(prompt) = &parts[0] else {
            panic!("first part must be text");
        };
        assert!(prompt.contains("Night-shift nurses"));
        assert!(prompt.contains("User: Thoughts?"));
    }

    #[tokio::test]
    async fn test_chat_attaches_inline_image_after_text() {
        let model = Arc::new(FakeModel::replying("ok"));
        let mut request = chat_request("What about this label?");
        request.image = Some("data:image/png;base64,aGVsbG8=".to_string());

        agent_with(&model).chat(request).await.unwrap();

        let parts = model.last_parts();
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[1],
            ContentPart::InlineData {
                mime_type: "image/png".to_string(),
                data: b"hello".to_vec()
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_image_never_reaches_model() {
        let model = Arc::new(FakeModel::replying("ok"));
        let mut request = chat_request("Look");
        request.image = Some("data:image/png;base64,%%%".to_string());

        let err = agent_with(&model).chat(request).await.unwrap_err();

        assert!(matches!(err, ApiError::BadRequest(_)));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_blank_prompt_rejected() {
        let model = Arc::new(FakeModel::replying("ok"));
        let err = agent_with(&model).chat(chat_request("   ")).await.unwrap_err();

        assert!(matches!(err, ApiError::BadRequest(_)));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_upstream_failure_is_wrapped() {
        let model = Arc::new(FakeModel::failing("429 quota exceeded"));
        let err = agent_with(&model).chat(chat_request("Hi")).await.unwrap_err();

        assert_eq!(err, ApiError::upstream_failure("Generation failed: 429 quota exceeded"));
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_model_is_misconfigured() {
        let agent = PersonaAgent::new(None, None);

        let err = agent.chat(chat_request("Hi")).await.unwrap_err();
        assert!(matches!(err, ApiError::Misconfigured(_)));

        let err = agent
            .chat_multimodal(MultimodalChatRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Misconfigured(_)));
        assert!(!agent.model_configured());
    }

    #[tokio::test]
    async fn test_multimodal_missing_field() {
        let model = Arc::new(FakeModel::replying("ok"));
        let request = MultimodalChatRequest {
            user_prompt: Some("Hi".to_string()),
            audience_summary: Some("Students".to_string()),
            ..MultimodalChatRequest::default()
        };

        let err = agent_with(&model).chat_multimodal(request).await.unwrap_err();

        assert_eq!(err, ApiError::bad_request("brand_context is required"));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_multimodal_prefers_video_reference() {
        let model = Arc::new(FakeModel::replying("ok"));
        let request = MultimodalChatRequest {
            user_prompt: Some("Watch this".to_string()),
            brand_context: Some("Acme".to_string()),
            audience_summary: Some("Students".to_string()),
            history: vec![ChatTurn::user("Hi"), ChatTurn::agent("Hello")],
            attachments: Attachments {
                image: Some(MediaFile::new(Some("image/gif".to_string()), vec![1])),
                video: Some(MediaFile::new(None, vec![2])),
                video_uri: Some("gs://test-bucket/uploads/ad.mp4".to_string()),
            },
        };

        agent_with(&model).chat_multimodal(request).await.unwrap();

        let parts = model.last_parts();
        assert_eq!(parts.len(), 3);
        assert!(matches!(&parts[0], ContentPart::Text(t) if t.contains("Agent: Hello")));
        assert!(matches!(&parts[1], ContentPart::InlineData { mime_type, .. } if mime_type == "image/gif"));
        assert!(matches!(&parts[2], ContentPart::FileData { file_uri, .. } if file_uri == "gs://test-bucket/uploads/ad.mp4"));
    }

    #[tokio::test]
    async fn test_upload_urls_are_unique() {
        let model = Arc::new(FakeModel::replying("ok"));
        let agent = agent_with(&model);
        let request = UploadUrlRequest {
            filename: "spot.mov".to_string(),
            content_type: "video/quicktime".to_string(),
        };

        let first = agent.generate_upload_url(request.clone()).await.unwrap();
        let second = agent.generate_upload_url(request).await.unwrap();

        assert_ne!(first.blob_name, second.blob_name);
        assert_eq!(first.resource_uri, format!("gs://test-bucket/{}", first.blob_name));
        assert_eq!(second.resource_uri, format!("gs://test-bucket/{}", second.blob_name));
        assert!(first.blob_name.ends_with(".mov"));
        assert!(first.upload_url.contains("expires=900"));
    }

    #[tokio::test]
    async fn test_upload_url_errors() {
        let request = UploadUrlRequest {
            filename: "clip".to_string(),
            content_type: "video/mp4".to_string(),
        };

        let unconfigured = PersonaAgent::new(None, None);
        let err = unconfigured.generate_upload_url(request.clone()).await.unwrap_err();
        assert!(matches!(err, ApiError::Misconfigured(_)));

        let failing = PersonaAgent::new(None, Some(Arc::new(FakeBlobStore { fail: true })));
        let err = failing.generate_upload_url(request.clone()).await.unwrap_err();
        assert_eq!(err, ApiError::upstream_failure("URL generation failed: permission denied on signBlob"));

        let ok = PersonaAgent::new(None, Some(Arc::new(FakeBlobStore { fail: false })));
        let err = ok
            .generate_upload_url(UploadUrlRequest {
                content_type: " ".to_string(),
                ..request
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn test_from_config_without_project() {
        let agent = PersonaAgent::from_config(&AppConfig::from_vars(&std::collections::HashMap::new())).unwrap();

        assert!(!agent.model_configured());
        assert!(agent.blob_store.is_none());
    }
}
