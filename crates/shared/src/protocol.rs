use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        Commission, CommissionDraft, CommissionId, CommissionStatus, FileId, MessageId,
        MessageKind, UserId,
    },
    error::ApiError,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: UserId,
    pub username: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveDraftRequest {
    pub user_id: UserId,
    pub draft: CommissionDraft,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub commission_id: CommissionId,
    pub total_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub user_id: UserId,
    pub status: CommissionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetFinalPriceRequest {
    pub user_id: UserId,
    pub final_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub user_id: UserId,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
}

/// One chat line as served to clients, with the sender's display name
/// already resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub message_id: MessageId,
    pub commission_id: CommissionId,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// Board/list row: the commission plus the owner's display name for the
/// admin surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionListItem {
    #[serde(flatten)]
    pub commission: Commission,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub file_id: FileId,
    pub url: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    MessageCreated {
        message: MessagePayload,
    },
    MessageUpdated {
        message: MessagePayload,
    },
    CommissionUpdated {
        commission: Commission,
    },
    FileStored {
        file_id: FileId,
    },
    Error(ApiError),
}
