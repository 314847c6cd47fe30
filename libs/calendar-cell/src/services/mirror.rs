// libs/calendar-cell/src/services/mirror.rs
//
// One-way, best-effort mirror into an external calendar. Pushes happen on a
// spawned task after the appointment write has committed; a mirror failure
// never fails the booking, it only leaves the link row marked failed for a
// later reconciliation job to pick up.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::StoreClient;

use crate::models::{CalendarAction, CalendarError, CalendarPush, CalendarSyncStatus};

const PUSH_TIMEOUT_SECONDS: u64 = 10;

pub struct CalendarMirrorService {
    store: Arc<StoreClient>,
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl CalendarMirrorService {
    pub fn new(config: &AppConfig, store: Arc<StoreClient>) -> Self {
        Self {
            store,
            client: reqwest::Client::new(),
            base_url: config.calendar_api_url.clone(),
            token: config.calendar_api_token.clone(),
        }
    }

    fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.token.is_empty()
    }

    /// Fire-and-forget entry point used by the booking service. The caller
    /// never waits on, nor hears about, the outcome.
    pub fn spawn_push(self: Arc<Self>, push: CalendarPush) {
        if !self.is_configured() {
            debug!(
                "Calendar mirror not configured, skipping push for appointment {}",
                push.appointment_id
            );
            return;
        }
        tokio::spawn(async move {
            let bound = Duration::from_secs(PUSH_TIMEOUT_SECONDS);
            match tokio::time::timeout(bound, self.push(&push)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        "Calendar push failed for appointment {} rev {}: {}",
                        push.appointment_id, push.revision, e
                    );
                }
                Err(_) => {
                    warn!(
                        "Calendar push timed out for appointment {} rev {}",
                        push.appointment_id, push.revision
                    );
                    let _ = self
                        .record_link(&push, None, CalendarSyncStatus::Failed)
                        .await;
                }
            }
        });
    }

    pub async fn push(&self, push: &CalendarPush) -> Result<(), CalendarError> {
        if !self.is_configured() {
            return Err(CalendarError::NotConfigured);
        }
        match push.action {
            CalendarAction::Upsert => self.push_upsert(push).await,
            CalendarAction::Invalidate => self.push_invalidate(push).await,
        }
    }

    async fn push_upsert(&self, push: &CalendarPush) -> Result<(), CalendarError> {
        let url = format!("{}/events", self.base_url);
        let body = json!({
            "doctor_id": push.doctor_id,
            "start": push.start_time.to_rfc3339(),
            "end": push.end_time.to_rfc3339(),
            "summary": push.summary,
        });

        let result = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Idempotency-Key", push.idempotency_key())
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                let payload: Value = response
                    .json()
                    .await
                    .map_err(|e| CalendarError::Transport(e.to_string()))?;
                let event_id = payload["id"].as_str().map(|s| s.to_string());
                self.record_link(push, event_id, CalendarSyncStatus::Synced)
                    .await
            }
            Ok(response) => {
                let status = response.status();
                self.record_link(push, None, CalendarSyncStatus::Failed)
                    .await?;
                Err(CalendarError::Transport(format!(
                    "calendar answered {}",
                    status
                )))
            }
            Err(e) => {
                self.record_link(push, None, CalendarSyncStatus::Failed)
                    .await?;
                Err(CalendarError::Transport(e.to_string()))
            }
        }
    }

    async fn push_invalidate(&self, push: &CalendarPush) -> Result<(), CalendarError> {
        let Some(event_id) = self.find_event_id(push.appointment_id).await? else {
            // Nothing was ever mirrored; nothing to tear down.
            debug!(
                "No calendar link for appointment {}, invalidation is a no-op",
                push.appointment_id
            );
            return Ok(());
        };

        let url = format!("{}/events/{}", self.base_url, event_id);
        let result = self
            .client
            .delete(&url)
            .bearer_auth(&self.token)
            .header("Idempotency-Key", push.idempotency_key())
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() || response.status().as_u16() == 404 => {
                self.record_link(push, Some(event_id), CalendarSyncStatus::Invalidated)
                    .await
            }
            Ok(response) => {
                let status = response.status();
                self.record_link(push, Some(event_id), CalendarSyncStatus::Failed)
                    .await?;
                Err(CalendarError::Transport(format!(
                    "calendar answered {}",
                    status
                )))
            }
            Err(e) => {
                self.record_link(push, Some(event_id), CalendarSyncStatus::Failed)
                    .await?;
                Err(CalendarError::Transport(e.to_string()))
            }
        }
    }

    async fn find_event_id(&self, appointment_id: Uuid) -> Result<Option<String>, CalendarError> {
        let path = format!(
            "/rest/v1/calendar_links?appointment_id=eq.{}&select=external_event_id",
            appointment_id
        );
        let rows = self
            .store
            .select(&path)
            .await
            .map_err(|e| CalendarError::DatabaseError(e.to_string()))?;
        Ok(rows
            .first()
            .and_then(|row| row["external_event_id"].as_str())
            .map(|s| s.to_string()))
    }

    /// Upsert of the single link row an appointment may have.
    async fn record_link(
        &self,
        push: &CalendarPush,
        event_id: Option<String>,
        status: CalendarSyncStatus,
    ) -> Result<(), CalendarError> {
        let now = Utc::now().to_rfc3339();
        let patch_path = format!(
            "/rest/v1/calendar_links?appointment_id=eq.{}",
            push.appointment_id
        );
        let body = json!({
            "external_event_id": event_id,
            "last_synced_revision": push.revision,
            "sync_status": status,
            "updated_at": now,
        });

        let updated = self
            .store
            .update_where(&patch_path, body.clone())
            .await
            .map_err(|e| CalendarError::DatabaseError(e.to_string()))?;
        if !updated.is_empty() {
            return Ok(());
        }

        let mut insert_body = body;
        insert_body["id"] = json!(Uuid::new_v4());
        insert_body["appointment_id"] = json!(push.appointment_id);
        self.store
            .insert_ignore_duplicates("/rest/v1/calendar_links", insert_body)
            .await
            .map_err(|e| CalendarError::DatabaseError(e.to_string()))?;
        Ok(())
    }
}
