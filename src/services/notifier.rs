//! Job status fan-out.
//!
//! Both processes publish [`UserEvent`]s on a Redis pub/sub channel. The API
//! process runs [`run_relay`], which forwards every event into an in-process
//! [`NotificationHub`]; each WebSocket holds a [`UserSubscription`] that only
//! yields its own user's events. Delivery is best effort: a lagging socket
//! skips what it missed and converges on the next update.

use futures::StreamExt;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::job::{Job, ViewType};
use crate::models::responses::JobResponse;
use crate::services::auth::MediaUrls;

pub const UPDATES_CHANNEL: &str = "getravio:job_updates";

const HUB_CAPACITY: usize = 256;
const RELAY_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const RELAY_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Messages sent to WebSocket clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionEstablished {
        message: String,
    },
    JobUpdate {
        job: JobResponse,
    },
    ProgressUpdate {
        job_id: Uuid,
        view: ViewType,
        step: u32,
        total_steps: u32,
        percentage: u8,
    },
    Pong,
}

impl ServerMessage {
    pub fn progress(job_id: Uuid, view: ViewType, step: u32, total_steps: u32) -> Self {
        let percentage = if total_steps == 0 {
            0
        } else {
            (u64::from(step.min(total_steps)) * 100 / u64::from(total_steps)) as u8
        };
        ServerMessage::ProgressUpdate {
            job_id,
            view,
            step,
            total_steps,
            percentage,
        }
    }
}

/// Envelope published on the Redis channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEvent {
    pub user_id: Uuid,
    pub event: ServerMessage,
}

/// Publishing side, used by the API and the worker.
pub struct Notifier {
    client: redis::Client,
}

impl Notifier {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    pub async fn publish(&self, event: &UserEvent) -> Result<(), NotifyError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(event)?;
        conn.publish::<_, _, ()>(UPDATES_CHANNEL, payload).await?;
        Ok(())
    }

    /// Push the current state of a job to its owner. Failures are logged only.
    pub async fn job_updated(&self, job: &Job, media: &MediaUrls) {
        let response = match JobResponse::build(job, media) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Could not serialize job update");
                return;
            }
        };
        let event = UserEvent {
            user_id: job.owner.id,
            event: ServerMessage::JobUpdate { job: response },
        };
        if let Err(e) = self.publish(&event).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to publish job update");
        }
    }

    pub async fn progress(&self, user_id: Uuid, job_id: Uuid, view: ViewType, step: u32, total: u32) {
        let event = UserEvent {
            user_id,
            event: ServerMessage::progress(job_id, view, step, total),
        };
        if let Err(e) = self.publish(&event).await {
            tracing::debug!(job_id = %job_id, error = %e, "Failed to publish progress");
        }
    }
}

/// In-process fan-out of relayed events.
#[derive(Clone)]
pub struct NotificationHub {
    sender: broadcast::Sender<Arc<UserEvent>>,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(HUB_CAPACITY);
        Self { sender }
    }

    /// Returns the number of connections that received the event.
    pub fn deliver(&self, event: UserEvent) -> usize {
        self.sender.send(Arc::new(event)).unwrap_or(0)
    }

    pub fn subscribe(&self, user_id: Uuid) -> UserSubscription {
        UserSubscription {
            user_id,
            receiver: self.sender.subscribe(),
        }
    }
}

pub struct UserSubscription {
    user_id: Uuid,
    receiver: broadcast::Receiver<Arc<UserEvent>>,
}

impl UserSubscription {
    /// Next event for this user, or `None` once the hub is gone.
    pub async fn next(&mut self) -> Option<ServerMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.user_id == self.user_id => return Some(event.event.clone()),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(user_id = %self.user_id, skipped, "WebSocket subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Forward Redis pub/sub events into the hub forever, reconnecting with backoff.
pub async fn run_relay(client: redis::Client, hub: NotificationHub) {
    let mut backoff = RELAY_INITIAL_BACKOFF;
    loop {
        match relay_once(&client, &hub, &mut backoff).await {
            Ok(()) => tracing::warn!("Notification subscription ended, reconnecting"),
            Err(e) => tracing::warn!(error = %e, retry_in_secs = backoff.as_secs(), "Notification relay error"),
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(RELAY_MAX_BACKOFF);
    }
}

async fn relay_once(
    client: &redis::Client,
    hub: &NotificationHub,
    backoff: &mut Duration,
) -> Result<(), NotifyError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(UPDATES_CHANNEL).await?;
    *backoff = RELAY_INITIAL_BACKOFF;
    tracing::info!(channel = UPDATES_CHANNEL, "Subscribed to job notifications");

    let mut messages = pubsub.on_message();
    while let Some(msg) = messages.next().await {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable notification payload");
                continue;
            }
        };
        match serde_json::from_str::<UserEvent>(&payload) {
            Ok(event) => {
                hub.deliver(event);
            }
            Err(e) => tracing::warn!(error = %e, "Malformed notification payload"),
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percentage() {
        let id = Uuid::nil();
        match ServerMessage::progress(id, ViewType::Rear, 15, 30) {
            ServerMessage::ProgressUpdate { percentage, .. } => assert_eq!(percentage, 50),
            other => panic!("unexpected {other:?}"),
        }
        match ServerMessage::progress(id, ViewType::Rear, 45, 30) {
            ServerMessage::ProgressUpdate { percentage, .. } => assert_eq!(percentage, 100),
            other => panic!("unexpected {other:?}"),
        }
        match ServerMessage::progress(id, ViewType::Side, 3, 0) {
            ServerMessage::ProgressUpdate { percentage, .. } => assert_eq!(percentage, 0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_wire_format_is_tagged() {
        let msg = ServerMessage::progress(Uuid::nil(), ViewType::Side, 1, 4);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "progress_update");
        assert_eq!(value["view"], "side");
        assert_eq!(value["percentage"], 25);

        let pong = serde_json::to_value(ServerMessage::Pong).unwrap();
        assert_eq!(pong["type"], "pong");
    }

    #[tokio::test]
    async fn test_hub_delivers_only_to_owner() {
        let hub = NotificationHub::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut alice_sub = hub.subscribe(alice);
        let mut bob_sub = hub.subscribe(bob);

        hub.deliver(UserEvent {
            user_id: bob,
            event: ServerMessage::progress(Uuid::nil(), ViewType::Rear, 1, 10),
        });
        hub.deliver(UserEvent {
            user_id: alice,
            event: ServerMessage::Pong,
        });

        assert!(matches!(alice_sub.next().await, Some(ServerMessage::Pong)));
        assert!(matches!(
            bob_sub.next().await,
            Some(ServerMessage::ProgressUpdate { step: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_subscription_ends_when_hub_dropped() {
        let hub = NotificationHub::new();
        let mut sub = hub.subscribe(Uuid::new_v4());
        drop(hub);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_deliver_without_subscribers() {
        let hub = NotificationHub::new();
        let delivered = hub.deliver(UserEvent {
            user_id: Uuid::new_v4(),
            event: ServerMessage::Pong,
        });
        assert_eq!(delivered, 0);
    }
}
