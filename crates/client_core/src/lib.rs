use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use shared::{
    domain::{
        Commission, CommissionDraft, CommissionId, CommissionOffer, CommissionStatus, MessageId,
        MessageKind, UserId, UserProfile,
    },
    protocol::{
        CommissionListItem, LoginRequest, LoginResponse, MessagePayload, SaveDraftRequest,
        SendMessageRequest, ServerEvent, SetFinalPriceRequest, SubmitResponse, UpdateStatusRequest,
        UploadResponse,
    },
};
use tokio::sync::broadcast;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::warn;
use url::Url;

pub mod cache;
pub mod chat;
pub mod filters;
pub mod form;
pub mod kanban;

pub use cache::{DraftCache, MemoryCache};
pub use filters::{AdminFilter, FilterTab, SortKey};
pub use chat::{message_group_starts, ChatSession, MessageCache, UserDirectory, PAGE_SIZE};
pub use form::{FormEngine, FormPhase};
pub use kanban::{KanbanBoard, StatusChange, STATUS_ORDER};

/// Everything the client-side engines need from the server. The HTTP
/// implementation lives below; tests substitute in-memory fakes.
#[async_trait]
pub trait CommissionBackend: Send + Sync {
    async fn list_offers(&self) -> Result<Vec<CommissionOffer>>;
    async fn fetch_draft(&self, user_id: UserId, id: CommissionId) -> Result<CommissionDraft>;
    async fn save_draft(&self, user_id: UserId, draft: &CommissionDraft) -> Result<Commission>;
    async fn submit(&self, user_id: UserId, draft: &CommissionDraft) -> Result<SubmitResponse>;
    async fn list_commissions(&self, user_id: UserId) -> Result<Vec<Commission>>;
    async fn list_all_commissions(&self, user_id: UserId) -> Result<Vec<CommissionListItem>>;
    async fn update_status(
        &self,
        user_id: UserId,
        id: CommissionId,
        status: CommissionStatus,
    ) -> Result<Commission>;
    async fn fetch_messages(
        &self,
        user_id: UserId,
        id: CommissionId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<MessagePayload>>;
    async fn send_message(
        &self,
        user_id: UserId,
        id: CommissionId,
        kind: MessageKind,
        content: Option<String>,
        file_url: Option<String>,
    ) -> Result<MessagePayload>;
    async fn fetch_user(&self, id: UserId) -> Result<UserProfile>;
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    Server(ServerEvent),
    Error(String),
}

pub struct HttpBackend {
    http: Client,
    server_url: Url,
    events: broadcast::Sender<ClientEvent>,
}

impl HttpBackend {
    pub fn new(server_url: &str) -> Result<Self> {
        let server_url = Url::parse(server_url)
            .with_context(|| format!("invalid server url '{server_url}'"))?;
        if !matches!(server_url.scheme(), "http" | "https") {
            return Err(anyhow!("server url must use http:// or https://"));
        }
        let (events, _) = broadcast::channel(1024);
        Ok(Self {
            http: Client::new(),
            server_url,
            events,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.server_url.as_str().trim_end_matches('/'))
    }

    pub async fn login(&self, username: &str) -> Result<LoginResponse> {
        let response: LoginResponse = self
            .http
            .post(self.endpoint("/login"))
            .json(&LoginRequest {
                username: username.to_string(),
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response)
    }

    pub async fn upload_file(
        &self,
        user_id: UserId,
        commission_id: Option<CommissionId>,
        filename: &str,
        mime_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<UploadResponse> {
        let mut query: Vec<(&str, String)> = vec![
            ("user_id", user_id.0.to_string()),
            ("filename", filename.to_string()),
        ];
        if let Some(id) = commission_id {
            query.push(("commission_id", id.0.to_string()));
        }
        if let Some(mime) = mime_type {
            query.push(("mime_type", mime.to_string()));
        }

        let response: UploadResponse = self
            .http
            .post(self.endpoint("/files/upload"))
            .query(&query)
            .body(bytes)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response)
    }

    pub async fn set_final_price(
        &self,
        user_id: UserId,
        id: CommissionId,
        final_price: f64,
    ) -> Result<Commission> {
        Ok(self
            .http
            .post(self.endpoint(&format!("/commissions/{}/final_price", id.0)))
            .json(&SetFinalPriceRequest {
                user_id,
                final_price,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Opens the realtime feed and fans server events out to every
    /// subscriber. Scoping to one commission narrows the message traffic
    /// to that chat; commission updates always come through.
    pub fn spawn_ws_events(
        self: &Arc<Self>,
        user_id: UserId,
        commission_id: Option<CommissionId>,
    ) -> Result<()> {
        let mut ws_url = match self.server_url.scheme() {
            "https" => self
                .server_url
                .as_str()
                .replacen("https://", "wss://", 1),
            "http" => self.server_url.as_str().replacen("http://", "ws://", 1),
            other => return Err(anyhow!("cannot derive ws url from scheme '{other}'")),
        };
        ws_url = format!(
            "{}/ws?user_id={}",
            ws_url.trim_end_matches('/'),
            user_id.0
        );
        if let Some(id) = commission_id {
            ws_url.push_str(&format!("&commission_id={}", id.0));
        }

        let backend = Arc::clone(self);
        tokio::spawn(async move {
            let (ws_stream, _) = match connect_async(ws_url.as_str()).await {
                Ok(connected) => connected,
                Err(err) => {
                    let _ = backend.events.send(ClientEvent::Error(format!(
                        "failed to connect websocket {ws_url}: {err}"
                    )));
                    return;
                }
            };
            let (_, mut ws_reader) = ws_stream.split();

            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            let _ = backend.events.send(ClientEvent::Server(event));
                        }
                        Err(err) => {
                            let _ = backend
                                .events
                                .send(ClientEvent::Error(format!("invalid server event: {err}")));
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        let _ = backend.events.send(ClientEvent::Error(format!(
                            "websocket receive failed: {err}"
                        )));
                        break;
                    }
                }
            }
            warn!("realtime feed closed");
        });

        Ok(())
    }
}

#[async_trait]
impl CommissionBackend for HttpBackend {
    async fn list_offers(&self) -> Result<Vec<CommissionOffer>> {
        Ok(self
            .http
            .get(self.endpoint("/offers"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn fetch_draft(&self, user_id: UserId, id: CommissionId) -> Result<CommissionDraft> {
        Ok(self
            .http
            .get(self.endpoint("/api/commissions/draft"))
            .query(&[("id", id.0), ("user_id", user_id.0)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn save_draft(&self, user_id: UserId, draft: &CommissionDraft) -> Result<Commission> {
        Ok(self
            .http
            .post(self.endpoint("/commissions/draft"))
            .json(&SaveDraftRequest {
                user_id,
                draft: draft.clone(),
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn submit(&self, user_id: UserId, draft: &CommissionDraft) -> Result<SubmitResponse> {
        Ok(self
            .http
            .post(self.endpoint("/commissions/submit"))
            .json(&SaveDraftRequest {
                user_id,
                draft: draft.clone(),
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn list_commissions(&self, user_id: UserId) -> Result<Vec<Commission>> {
        Ok(self
            .http
            .get(self.endpoint("/commissions"))
            .query(&[("user_id", user_id.0)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn list_all_commissions(&self, user_id: UserId) -> Result<Vec<CommissionListItem>> {
        Ok(self
            .http
            .get(self.endpoint("/admin/commissions"))
            .query(&[("user_id", user_id.0)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn update_status(
        &self,
        user_id: UserId,
        id: CommissionId,
        status: CommissionStatus,
    ) -> Result<Commission> {
        Ok(self
            .http
            .post(self.endpoint(&format!("/commissions/{}/status", id.0)))
            .json(&UpdateStatusRequest { user_id, status })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn fetch_messages(
        &self,
        user_id: UserId,
        id: CommissionId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<MessagePayload>> {
        let mut query: Vec<(&str, i64)> = vec![("user_id", user_id.0), ("limit", limit as i64)];
        if let Some(before_id) = before {
            query.push(("before", before_id.0));
        }
        Ok(self
            .http
            .get(self.endpoint(&format!("/commissions/{}/messages", id.0)))
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn send_message(
        &self,
        user_id: UserId,
        id: CommissionId,
        kind: MessageKind,
        content: Option<String>,
        file_url: Option<String>,
    ) -> Result<MessagePayload> {
        let event: ServerEvent = self
            .http
            .post(self.endpoint(&format!("/commissions/{}/messages", id.0)))
            .json(&SendMessageRequest {
                user_id,
                kind,
                content,
                file_url,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        match event {
            ServerEvent::MessageCreated { message } => Ok(message),
            other => Err(anyhow!("unexpected response to send_message: {other:?}")),
        }
    }

    async fn fetch_user(&self, id: UserId) -> Result<UserProfile> {
        Ok(self
            .http
            .get(self.endpoint(&format!("/users/{}", id.0)))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_server_urls() {
        assert!(HttpBackend::new("ftp://example.com").is_err());
        assert!(HttpBackend::new("not a url").is_err());
        assert!(HttpBackend::new("http://localhost:8090").is_ok());
    }

    #[test]
    fn endpoint_joins_without_double_slashes() {
        let backend = HttpBackend::new("http://localhost:8090/").expect("backend");
        assert_eq!(
            backend.endpoint("/offers"),
            "http://localhost:8090/offers"
        );
    }
}
