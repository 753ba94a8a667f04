// libs/booking-cell/src/services/events.rs
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::BookingEvent;

/// One-way notification emission over Redis pub/sub, one topic per
/// recipient. Delivery (sockets, push, whatever) belongs to a separate
/// component subscribed on the other side; the booking flow never waits on
/// it and never fails because of it.
pub struct BookingEventPublisher {
    pool: Option<Pool>,
}

impl BookingEventPublisher {
    pub fn new(config: &AppConfig) -> Self {
        let pool = match &config.redis_url {
            Some(url) => {
                match Config::from_url(url.clone()).create_pool(Some(Runtime::Tokio1)) {
                    Ok(pool) => Some(pool),
                    Err(e) => {
                        warn!("Failed to create Redis pool, event publishing disabled: {}", e);
                        None
                    }
                }
            }
            None => {
                debug!("REDIS_URL not set, event publishing disabled");
                None
            }
        };

        Self { pool }
    }

    pub fn is_enabled(&self) -> bool {
        self.pool.is_some()
    }

    /// Fire-and-forget publish to `notifications:{recipient}`. Failures are
    /// logged and swallowed.
    pub async fn publish(&self, recipient: Uuid, event: &BookingEvent) {
        let Some(pool) = &self.pool else {
            return;
        };

        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize booking event: {}", e);
                return;
            }
        };

        let channel = format!("notifications:{}", recipient);

        let mut conn = match pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Failed to get Redis connection for event publish: {}", e);
                return;
            }
        };

        match conn.publish::<_, _, ()>(&channel, &payload).await {
            Ok(()) => debug!("Published booking event to {}", channel),
            Err(e) => warn!("Failed to publish booking event to {}: {}", channel, e),
        }
    }
}
