//! HTTP persistence backend.
//!
//! Deltas go up as one multipart request: scalar fields as text parts, the
//! compressed messages and snapshot as gzip file parts.

use reqwest::{Client, Response};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use shipwright_types::ChatId;

use crate::SyncError;
use crate::backend::{BackendFut, PersistenceBackend};
use crate::payload::SyncDelta;

const GZIP_MIME: &str = "application/gzip";

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AllocateRequest<'a> {
    chat_id: &'a str,
    hint: &'a str,
}

#[derive(Deserialize)]
struct AllocateResponse {
    id: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn form(delta: &SyncDelta) -> Result<Form, SyncError> {
        let mut form = Form::new()
            .text("chatId", delta.chat_id.to_string())
            .text("sessionId", delta.session_id.to_string())
            .text("lastMessageRank", delta.last_message_rank().to_string())
            .text("partIndex", delta.part_index().to_string())
            .text("subchatIndex", delta.subchat_index.to_string());
        if let Some(messages) = &delta.messages {
            let part = Part::bytes(messages.clone())
                .file_name("messages.json.gz")
                .mime_str(GZIP_MIME)?;
            form = form.part("messages", part);
        }
        if let Some(snapshot) = &delta.snapshot {
            let part = Part::bytes(snapshot.clone())
                .file_name("snapshot.json.gz")
                .mime_str(GZIP_MIME)?;
            form = form.part("snapshot", part);
        }
        Ok(form)
    }
}

async fn check_status(response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::Status {
        status: status.as_u16(),
        body,
    })
}

impl PersistenceBackend for HttpBackend {
    fn upload<'a>(&'a self, delta: &'a SyncDelta) -> BackendFut<'a, ()> {
        Box::pin(async move {
            let form = Self::form(delta)?;
            let response = self
                .client
                .post(format!("{}/sync", self.base_url))
                .multipart(form)
                .send()
                .await?;
            check_status(response).await?;
            Ok(())
        })
    }

    fn allocate_id<'a>(&'a self, chat_id: &'a ChatId, hint: &'a str) -> BackendFut<'a, String> {
        Box::pin(async move {
            let response = self
                .client
                .post(format!("{}/allocate-id", self.base_url))
                .json(&AllocateRequest {
                    chat_id: chat_id.as_str(),
                    hint,
                })
                .send()
                .await?;
            let allocated: AllocateResponse = check_status(response).await?.json().await?;
            Ok(allocated.id)
        })
    }
}
