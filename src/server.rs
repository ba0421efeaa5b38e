//! HTTP surface
//!
//! Routes, multipart form parsing and the OpenAPI document. Handlers stay thin:
//! they extract input, call [`PersonaAgent`] and let [`ApiError`] render failures.

use actix_cors::Cors;
use actix_multipart::{Field, Multipart, MultipartError};
use actix_web::{HttpRequest, get, post, web};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::chat::{ChatReply, ChatRequest, ChatSender, ChatTurn, UploadUrlRequest, UploadUrlResponse};
use crate::config::AppConfig;
use crate::core::{MultimodalChatRequest, PersonaAgent};
use crate::error::{ApiError, ErrorResponse};
use crate::media::{MediaFile, MediaKind};

/// Room for a maximum-size base64 image plus the text fields.
pub const JSON_BODY_LIMIT: usize = 32 * 1024 * 1024;
pub const TEXT_FIELD_LIMIT: usize = 2 * 1024 * 1024;

#[derive(Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub multimodal: bool,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub project_id: Option<String>,
    pub location: String,
    pub model_configured: bool,
}

/// Shape of the `/chat/multimodal` form, for the OpenAPI document only.
#[allow(dead_code)]
#[derive(ToSchema)]
struct MultimodalChatForm {
    user_prompt: String,
    brand_context: String,
    audience_summary: String,
    /// JSON-encoded array of `ChatTurn`
    history: Option<String>,
    #[schema(value_type = Option<String>, format = Binary)]
    image: Option<Vec<u8>>,
    #[schema(value_type = Option<String>, format = Binary)]
    video: Option<Vec<u8>>,
    /// Reference returned by `/generate-upload-url`; wins over `video`
    video_uri: Option<String>,
}

#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Liveness", body = StatusResponse))
)]
#[get("/")]
async fn index() -> web::Json<StatusResponse> {
    web::Json(StatusResponse {
        status: "Synthetic Persona Agent is running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        multimodal: true,
    })
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Readiness and configuration", body = HealthResponse))
)]
#[get("/health")]
async fn health(
    config: web::Data<AppConfig>,
    agent: web::Data<PersonaAgent>,
) -> web::Json<HealthResponse> {
    web::Json(HealthResponse {
        status: "healthy".to_string(),
        project_id: config.project_id.clone(),
        location: config.location.clone(),
        model_configured: agent.model_configured(),
    })
}

#[utoipa::path(
    post,
    path = "/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Persona reply", body = ChatReply),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 413, description = "Image too large", body = ErrorResponse),
        (status = 502, description = "Generation failed", body = ErrorResponse),
        (status = 503, description = "Model not configured", body = ErrorResponse)
    )
)]
#[post("/chat")]
async fn chat(
    agent: web::Data<PersonaAgent>,
    request: Result<web::Json<ChatRequest>, actix_web::Error>,
) -> Result<web::Json<ChatReply>, actix_web::Error> {
    // Configuration errors take precedence over body errors
    agent.require_model()?;

    let reply = agent.chat(request?.into_inner()).await?;
    Ok(web::Json(reply))
}

#[utoipa::path(
    post,
    path = "/chat/multimodal",
    request_body(content = MultimodalChatForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Persona reply", body = ChatReply),
        (status = 400, description = "Invalid form", body = ErrorResponse),
        (status = 413, description = "Media too large", body = ErrorResponse),
        (status = 502, description = "Generation failed", body = ErrorResponse),
        (status = 503, description = "Model not configured", body = ErrorResponse)
    )
)]
#[post("/chat/multimodal")]
async fn chat_multimodal(
    agent: web::Data<PersonaAgent>,
    payload: Multipart,
) -> Result<web::Json<ChatReply>, ApiError> {
    // Refuse before reading a possibly huge body
    agent.require_model()?;

    let request = read_multimodal_form(payload).await?;
    let reply = agent.chat_multimodal(request).await?;
    Ok(web::Json(reply))
}

#[utoipa::path(
    post,
    path = "/generate-upload-url",
    request_body = UploadUrlRequest,
    responses(
        (status = 200, description = "Signed upload URL", body = UploadUrlResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 502, description = "URL generation failed", body = ErrorResponse),
        (status = 503, description = "Storage not configured", body = ErrorResponse)
    )
)]
#[post("/generate-upload-url")]
async fn upload_url(
    agent: web::Data<PersonaAgent>,
    request: web::Json<UploadUrlRequest>,
) -> Result<web::Json<UploadUrlResponse>, ApiError> {
    let response = agent.generate_upload_url(request.into_inner()).await?;
    Ok(web::Json(response))
}

#[derive(OpenApi)]
#[openapi(
    paths(index, health, chat, chat_multimodal, upload_url),
    components(schemas(
        StatusResponse,
        HealthResponse,
        ChatRequest,
        ChatReply,
        ChatTurn,
        ChatSender,
        MultimodalChatForm,
        UploadUrlRequest,
        UploadUrlResponse,
        ErrorResponse
    ))
)]
pub struct ApiDoc;

/// Registers every route, the JSON extractor settings and Swagger UI.
///
/// Expects `web::Data<PersonaAgent>` and `web::Data<AppConfig>` on the app.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .service(index)
        .service(health)
        .service(chat)
        .service(chat_multimodal)
        .service(upload_url)
        .service(SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-doc/openapi.json", ApiDoc::openapi()));
}

/// CORS policy allowing the configured origins with any method and header.
#[must_use]
pub fn cors(allowed_origins: &[String]) -> Cors {
    let mut cors = Cors::default()
        .allow_any_method()
        .allow_any_header()
        .supports_credentials()
        .max_age(3600);

    for origin in allowed_origins {
        cors = if origin == "*" {
            cors.allow_any_origin()
        } else {
            cors.allowed_origin(origin)
        };
    }
    cors
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(JSON_BODY_LIMIT)
        .error_handler(|err, _req: &HttpRequest| {
            let api_error = match &err {
                actix_web::error::JsonPayloadError::Overflow { .. }
                | actix_web::error::JsonPayloadError::OverflowKnownLength { .. } => ApiError::payload_too_large(format!(
                    "Request body exceeds the {} MiB limit",
                    JSON_BODY_LIMIT / (1024 * 1024)
                )),
                _ => ApiError::bad_request(format!("Invalid JSON body: {err}")),
            };
            tracing::warn!("Rejected JSON body: {}", err);
            api_error.into()
        })
}

fn multipart_error(err: &MultipartError) -> ApiError {
    ApiError::bad_request(format!("Invalid multipart form: {err}"))
}

async fn read_multimodal_form(mut payload: Multipart) -> Result<MultimodalChatRequest, ApiError> {
    let mut request = MultimodalChatRequest::default();
    let mut video_too_large = false;

    while let Some(field) = payload.next().await {
        let mut field = field.map_err(|e| multipart_error(&e))?;
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "image" => {
                let mime_type = field.content_type().map(ToString::to_string);
                let data = read_media(&mut field, MediaKind::Image)
                    .await?
                    .ok_or_else(|| MediaKind::Image.too_large())?;
                // Browsers send an empty part for an unused file input
                if !data.is_empty() {
                    request.attachments.image = Some(MediaFile::new(mime_type, data));
                }
            }
            "video" if has_video_uri(&request) => {
                tracing::debug!("video_uri already supplied; discarding uploaded video");
                drain(&mut field).await?;
            }
            "video" => {
                let mime_type = field.content_type().map(ToString::to_string);
                match read_media(&mut field, MediaKind::Video).await? {
                    Some(data) if data.is_empty() => {}
                    Some(data) => request.attachments.video = Some(MediaFile::new(mime_type, data)),
                    None => video_too_large = true,
                }
            }
            "user_prompt" => request.user_prompt = Some(read_text(&mut field, &name).await?),
            "brand_context" => request.brand_context = Some(read_text(&mut field, &name).await?),
            "audience_summary" => request.audience_summary = Some(read_text(&mut field, &name).await?),
            "video_uri" => request.attachments.video_uri = Some(read_text(&mut field, &name).await?),
            "history" => request.history = parse_history(&read_text(&mut field, &name).await?),
            other => {
                tracing::debug!("Ignoring unknown form field {:?}", other);
                drain(&mut field).await?;
            }
        }
    }

    // An oversized upload only matters when no reference replaces it
    if video_too_large && !has_video_uri(&request) {
        return Err(MediaKind::Video.too_large());
    }

    tracing::debug!(
        "Multipart form read: image={}, video={}, video_uri={}, history={}",
        request.attachments.image.is_some(),
        request.attachments.video.is_some(),
        request.attachments.video_uri.is_some(),
        request.history.len()
    );

    Ok(request)
}

fn has_video_uri(request: &MultimodalChatRequest) -> bool {
    request
        .attachments
        .video_uri
        .as_deref()
        .is_some_and(|uri| !uri.trim().is_empty())
}

/// Reads a file part, or returns `None` once it crosses the kind's limit.
///
/// The rest of an oversized part is consumed without buffering.
async fn read_media(
    field: &mut Field,
    kind: MediaKind,
) -> Result<Option<Vec<u8>>, ApiError> {
    let mut data = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| multipart_error(&e))?;
        if kind.check_size(data.len() + chunk.len()).is_err() {
            drain(field).await?;
            return Ok(None);
        }
        data.extend_from_slice(&chunk);
    }
    Ok(Some(data))
}

async fn drain(field: &mut Field) -> Result<(), ApiError> {
    while let Some(chunk) = field.next().await {
        chunk.map_err(|e| multipart_error(&e))?;
    }
    Ok(())
}

async fn read_text(
    field: &mut Field,
    name: &str,
) -> Result<String, ApiError> {
    let mut data = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| multipart_error(&e))?;
        if data.len() + chunk.len() > TEXT_FIELD_LIMIT {
            return Err(ApiError::payload_too_large(format!(
                "{name} exceeds the {} MiB limit",
                TEXT_FIELD_LIMIT / (1024 * 1024)
            )));
        }
        data.extend_from_slice(&chunk);
    }
    String::from_utf8(data).map_err(|_| ApiError::bad_request(format!("{name} must be UTF-8 text")))
}

/// Parses the JSON-encoded history field.
///
/// A malformed value is logged and treated as no history at all.
#[must_use]
pub fn parse_history(raw: &str) -> Vec<ChatTurn> {
    if raw.trim().is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Vec<ChatTurn>>(raw) {
        Ok(history) => history,
        Err(e) => {
            tracing::warn!("Ignoring unparseable history field: {}", e);
            Vec::new()
        }
    }
}
