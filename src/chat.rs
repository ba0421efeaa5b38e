use serde::{Deserialize, Serialize};
#[cfg(feature = "server")]
use utoipa::ToSchema;

#[cfg_attr(feature = "server", derive(ToSchema))]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatSender {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "agent")]
    Agent,
}

impl ChatSender {
    /// Speaker label used when a turn is rendered into a prompt.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Agent => "Agent",
        }
    }
}

#[cfg_attr(feature = "server", derive(ToSchema))]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub sender: ChatSender,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            sender: ChatSender::User,
            text: text.into(),
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            sender: ChatSender::Agent,
            text: text.into(),
        }
    }
}

/// JSON body of `POST /chat`.
#[cfg_attr(feature = "server", derive(ToSchema))]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ChatRequest {
    pub user_prompt: String,
    pub brand_context: String,
    pub audience_summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<ChatTurn>,
    /// Base64 image, optionally prefixed with a `data:<mime>;base64,` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[cfg_attr(feature = "server", derive(ToSchema))]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub agent_response: String,
}

#[cfg_attr(feature = "server", derive(ToSchema))]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlRequest {
    pub filename: String,
    pub content_type: String,
}

#[cfg_attr(feature = "server", derive(ToSchema))]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlResponse {
    pub upload_url: String,
    pub resource_uri: String,
    pub blob_name: String,
}
