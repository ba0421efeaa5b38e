//! # persona-agent
//!
//! A library and REST API that role-plays a consumer persona and answers
//! questions about a brand, using a multimodal Gemini model on Vertex AI.
//!
//! ## Features
//!
//! - **Persona prompts**: Combine an audience summary, brand context and conversation history into one prompt
//! - **Multimodal input**: Attach an inline base64 image, uploaded image/video files, or a stored video reference
//! - **Direct uploads**: Issue short-lived signed `PUT` URLs so large videos never pass through the server
//! - **Stateless**: History is supplied by the caller on every request
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! persona-agent = { version = "1", default-features = false }
//! ```
//!
//! ```rust,no_run
//! use persona_agent::{AppConfig, ChatRequest, ChatTurn, PersonaAgent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let agent = PersonaAgent::from_config(&AppConfig::from_env())?;
//!
//!     let reply = agent
//!         .chat(ChatRequest {
//!             user_prompt: "Would you switch to this brand?".to_string(),
//!             brand_context: "Acme oat milk, barista edition".to_string(),
//!             audience_summary: "Urban coffee enthusiasts aged 25-35".to_string(),
//!             history: vec![ChatTurn::user("Hi"), ChatTurn::agent("Hey there!")],
//!             image: None,
//!         })
//!         .await?;
//!
//!     println!("{}", reply.agent_response);
//!     Ok(())
//! }
//! ```
//!
//! ## Server Mode
//!
//! The `server` feature (enabled by default) adds the actix-web routes and the
//! `persona-agent` binary:
//!
//! ```bash
//! GCLOUD_PROJECT=my-project cargo run
//! ```

// Core modules - always available
pub mod auth;
pub mod chat;
pub mod config;
pub mod core;
pub mod error;
pub mod media;
pub mod model;
pub mod storage;
pub mod template;

// Re-export commonly used types for easier access
pub use chat::{ChatReply, ChatRequest, ChatSender, ChatTurn, UploadUrlRequest, UploadUrlResponse};
pub use config::AppConfig;
pub use crate::core::{MultimodalChatRequest, PersonaAgent};
pub use error::{ApiError, ErrorResponse};
pub use media::{Attachments, ContentPart, MediaFile};
pub use model::GenerativeModel;
pub use storage::BlobStore;

// Server-specific modules - only when server feature is enabled
#[cfg(feature = "server")]
pub mod server;
