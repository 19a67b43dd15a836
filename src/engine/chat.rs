use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::engine::lifecycle::RequestLifecycle;
use crate::engine::listener::Listener;
use crate::error::AppError;
use crate::models::identity::Identity;
use crate::models::message::ChatMessage;
use crate::observability::metrics::Metrics;
use crate::store::{paths, DataStore};

pub struct ChatChannel {
    store: Arc<dyn DataStore>,
    lifecycle: Arc<RequestLifecycle>,
    metrics: Metrics,
    max_message_len: usize,
}

impl ChatChannel {
    pub fn new(
        store: Arc<dyn DataStore>,
        lifecycle: Arc<RequestLifecycle>,
        metrics: Metrics,
        max_message_len: usize,
    ) -> Self {
        Self {
            store,
            lifecycle,
            metrics,
            max_message_len,
        }
    }

    pub async fn is_chat_enabled(&self, request_id: &str) -> Result<bool, AppError> {
        Ok(self.lifecycle.get(request_id).await?.chat_enabled())
    }

    pub async fn send_message(
        &self,
        identity: &Identity,
        request_id: &str,
        text: &str,
    ) -> Result<ChatMessage, AppError> {
        let request = self.lifecycle.get(request_id).await?;

        if !request.chat_enabled() {
            self.metrics
                .chat_messages_total
                .with_label_values(&["disabled"])
                .inc();
            return Err(AppError::ChatDisabled(request_id.to_string()));
        }
        request.require_participant(identity)?;

        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::BadRequest("message cannot be empty".to_string()));
        }
        if text.chars().count() > self.max_message_len {
            return Err(AppError::BadRequest(format!(
                "message longer than {} characters",
                self.max_message_len
            )));
        }

        let key = self.store.push(&paths::messages(request_id)?).await?;
        let message = ChatMessage {
            id: key,
            request_id: request_id.to_string(),
            sender_id: identity.user_id.clone(),
            text: text.to_string(),
            sent_at: Utc::now(),
        };

        self.store
            .set(
                &paths::message(request_id, &message.id)?,
                serde_json::to_value(&message)?,
            )
            .await?;

        self.metrics
            .chat_messages_total
            .with_label_values(&["sent"])
            .inc();
        debug!(request_id, sender_id = %message.sender_id, "chat message appended");

        Ok(message)
    }

    pub async fn messages(
        &self,
        identity: &Identity,
        request_id: &str,
    ) -> Result<Vec<ChatMessage>, AppError> {
        self.lifecycle
            .get(request_id)
            .await?
            .require_participant(identity)?;

        load_messages(self.store.as_ref(), request_id).await
    }

    pub async fn subscribe_messages<U>(
        &self,
        identity: &Identity,
        request_id: &str,
        on_update: U,
    ) -> Result<Listener, AppError>
    where
        U: Fn(Vec<ChatMessage>) + Send + 'static,
    {
        self.lifecycle
            .get(request_id)
            .await?
            .require_participant(identity)?;

        let subscription = self.store.subscribe(&paths::messages(request_id)?).await?;
        info!(
            request_id,
            user_id = %identity.user_id,
            subscription_id = subscription.id.0,
            "message listener registered"
        );

        let store = self.store.clone();
        let request_id = request_id.to_string();
        Ok(Listener::spawn(
            self.store.clone(),
            self.metrics.clone(),
            subscription,
            move || {
                let store = store.clone();
                let request_id = request_id.clone();
                async move { load_messages(store.as_ref(), &request_id).await }
            },
            on_update,
        ))
    }
}

async fn load_messages(
    store: &dyn DataStore,
    request_id: &str,
) -> Result<Vec<ChatMessage>, AppError> {
    store
        .list(&paths::messages(request_id)?)
        .await?
        .into_iter()
        .map(|(_, raw)| serde_json::from_value(raw).map_err(AppError::from))
        .collect()
}
