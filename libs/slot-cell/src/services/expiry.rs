// libs/slot-cell/src/services/expiry.rs
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, error, info, instrument};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::SlotError;

/// Moves stale `available` slots to `expired`. Listings already treat
/// `available && start_time < now` as expired at read time; the sweep keeps
/// the stored rows in agreement.
pub struct SlotExpiryService {
    supabase: Arc<SupabaseClient>,
}

impl SlotExpiryService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    /// One conditional UPDATE over every matching row; the status predicate
    /// means a slot reserved or booked mid-sweep is left alone.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<u32, SlotError> {
        let now = Utc::now();

        let path = format!(
            "/rest/v1/slots?status=eq.available&start_time=lt.{}",
            urlencoding::encode(&now.to_rfc3339()),
        );

        let update = json!({
            "status": "expired",
            "updated_at": now.to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            None,
            Some(update),
            Some(headers),
        ).await.map_err(|e| SlotError::DatabaseError(e.to_string()))?;

        let expired_count = result.len() as u32;
        if expired_count > 0 {
            info!("Expired {} stale slots", expired_count);
        } else {
            debug!("No stale slots to expire");
        }

        Ok(expired_count)
    }

    /// Periodic sweep loop, spawned by the api binary.
    pub async fn run(&self, interval_seconds: u64) {
        info!("Slot expiry sweep running every {}s", interval_seconds);

        loop {
            tokio::time::sleep(Duration::from_secs(interval_seconds)).await;

            if let Err(e) = self.sweep_expired().await {
                error!("Expiry sweep failed: {}", e);
            }
        }
    }
}
