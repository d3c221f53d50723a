use async_trait::async_trait;
use log::debug;
use reqwest::Client as HttpClient;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use crate::api::models::{Attachment, ChatsData, ChatsPage, Envelope, HistoryPage, MessageRecord, PageMeta};
use crate::error::ApiError;

/// REST collaborators of the sync core.
#[async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    async fn fetch_conversations(&self, page: u32, limit: u32) -> Result<ChatsPage, ApiError>;

    async fn fetch_messages(&self, conversation_id: &str) -> Result<HistoryPage, ApiError>;

    async fn send_message(
        &self,
        conversation_id: &str,
        body: &str,
        attachments: &[Attachment],
    ) -> Result<MessageRecord, ApiError>;
}

pub struct ApiClient {
    pub http: HttpClient,
    base_api: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, ApiError> {
        let http = HttpClient::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_api: Self::base_api(base_url),
            token,
        })
    }

    fn base_api(base_url: &str) -> String {
        let trimmed = base_url.trim_end_matches('/');
        if trimmed.ends_with("/api/v1") {
            trimmed.to_string()
        } else if trimmed.ends_with("/api") {
            format!("{}/v1", trimmed)
        } else {
            format!("{}/api/v1", trimmed)
        }
    }

    fn with_auth(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(t) = self.token.as_deref() {
            req = req.header("Authorization", format!("Bearer {}", t));
        }
        req
    }

    async fn unwrap_envelope<T: DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<(T, Option<PageMeta>), ApiError> {
        if !resp.status().is_success() {
            return Err(ApiError::Status(resp.status().as_u16()));
        }
        let json: Value = resp.json().await?;
        let envelope: Envelope<T> = serde_json::from_value(json)?;
        if !envelope.success {
            return Err(ApiError::Rejected(envelope.message));
        }
        let data = envelope
            .data
            .ok_or_else(|| ApiError::Rejected("response carries no data".into()))?;
        Ok((data, envelope.meta))
    }
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn fetch_conversations(&self, page: u32, limit: u32) -> Result<ChatsPage, ApiError> {
        let endpoint = format!("{}/chats?page={}&limit={}", self.base_api, page, limit);
        debug!("GET {endpoint}");
        let resp = self.with_auth(self.http.get(&endpoint)).send().await?;
        let (data, meta): (ChatsData, _) = Self::unwrap_envelope(resp).await?;
        Ok(ChatsPage {
            chats: data.chats,
            unread_chats_count: data.unread_chats_count,
            total_unread_messages: data.total_unread_messages,
            meta: meta.unwrap_or_default(),
        })
    }

    async fn fetch_messages(&self, conversation_id: &str) -> Result<HistoryPage, ApiError> {
        let endpoint = format!("{}/messages/{}", self.base_api, conversation_id);
        debug!("GET {endpoint}");
        let resp = self.with_auth(self.http.get(&endpoint)).send().await?;
        let (data, _) = Self::unwrap_envelope(resp).await?;
        Ok(data)
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        body: &str,
        attachments: &[Attachment],
    ) -> Result<MessageRecord, ApiError> {
        let endpoint = format!("{}/messages/send-message/{}", self.base_api, conversation_id);
        let mut form = Form::new().text("data", serde_json::json!({ "text": body }).to_string());
        for attachment in attachments {
            let part = Part::bytes(attachment.bytes.clone())
                .file_name(attachment.file_name.clone())
                .mime_str(&attachment.content_type)?;
            form = form.part("image", part);
        }
        debug!("POST {endpoint} ({} attachments)", attachments.len());
        let resp = self
            .with_auth(self.http.post(&endpoint))
            .multipart(form)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ApiError::Status(resp.status().as_u16()));
        }
        // Some deployments answer with the bare record instead of the envelope.
        let json: Value = resp.json().await?;
        match json.get("data").filter(|d| d.is_object()) {
            Some(data) => Ok(serde_json::from_value(data.clone())?),
            None => Ok(serde_json::from_value(json)?),
        }
    }
}
