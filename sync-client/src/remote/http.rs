//! HTTP implementation of the remote event log.

use super::{Credentials, RemoteLog};
use crate::config::RemoteConfig;
use crate::error::RemoteError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use chatsync_types::{ConversationId, ConversationSnapshot, Event, EventBody, Version};

/// Remote log backed by the chat REST API.
///
/// Every request carries the bearer token from [`Credentials`]. 401 and 403
/// map to [`RemoteError::Unauthorized`]; connection failures and timeouts map
/// to [`RemoteError::Network`].
pub struct HttpRemote {
    client: Client,
    base_url: String,
    credentials: Arc<dyn Credentials>,
}

impl HttpRemote {
    /// Build a client for `config.base_url`.
    pub fn new(config: &RemoteConfig, credentials: Arc<dyn Credentials>) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("chatsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        let request = match self.credentials.bearer_token().await {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), "remote request rejected");
            return Err(RemoteError::from_status(status.as_u16(), body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn post_event(&self, path: &str, event: &Event) -> Result<Event, RemoteError> {
        self.execute(self.client.post(self.url(path)).json(event)).await
    }
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_decode() {
        RemoteError::Decode(err.to_string())
    } else {
        RemoteError::Network(err.to_string())
    }
}

#[async_trait]
impl RemoteLog for HttpRemote {
    async fn list_account_events(
        &self,
        after: Version,
        limit: u32,
    ) -> Result<Vec<Event>, RemoteError> {
        let request = self
            .client
            .get(self.url("events"))
            .query(&[("after", after.value()), ("limit", u64::from(limit))]);
        self.execute(request).await
    }

    async fn list_conversation_events(
        &self,
        conversation: ConversationId,
        at_version: Version,
    ) -> Result<Vec<Event>, RemoteError> {
        let request = self
            .client
            .get(self.url(&format!("conversations/{conversation}/events")))
            .query(&[("at_version", at_version.value())]);
        self.execute(request).await
    }

    async fn list_conversations(
        &self,
        after_version: Version,
        anchor: Option<ConversationId>,
    ) -> Result<Vec<ConversationSnapshot>, RemoteError> {
        let mut request = self
            .client
            .get(self.url("conversations"))
            .query(&[("after_version", after_version.value())]);
        if let Some(anchor) = anchor {
            request = request.query(&[("anchor", anchor.to_string())]);
        }
        self.execute(request).await
    }

    async fn send_text(&self, event: &Event) -> Result<Event, RemoteError> {
        self.post_event("events/text", event).await
    }

    async fn send_icon(&self, event: &Event) -> Result<Event, RemoteError> {
        self.post_event("events/icon", event).await
    }

    async fn send_seen(&self, event: &Event) -> Result<Event, RemoteError> {
        self.post_event("events/seen", event).await
    }

    async fn send_image(&self, event: &Event, bytes: Vec<u8>) -> Result<Event, RemoteError> {
        let EventBody::Image(image) = &event.body else {
            return Err(RemoteError::Protocol(format!(
                "{} event sent to image endpoint",
                event.kind()
            )));
        };

        let metadata =
            serde_json::to_string(event).map_err(|e| RemoteError::Decode(e.to_string()))?;
        let form = Form::new()
            .text("event", metadata)
            .part("file", Part::bytes(bytes).file_name(image.filename.clone()));

        self.execute(self.client.post(self.url("events/image")).multipart(form))
            .await
    }
}
