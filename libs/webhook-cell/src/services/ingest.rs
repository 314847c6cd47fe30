// libs/webhook-cell/src/services/ingest.rs
//
// Inbound provider callbacks. Signature failure is the only rejection; any
// error past that point is logged and swallowed so the provider never
// retries a payload we already acted on. Idempotency comes from the
// webhook_events dedup table keyed on (provider_message_id, event_kind).

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use appointment_cell::models::AppointmentEvent;
use appointment_cell::AppointmentBookingService;
use shared_config::AppConfig;
use shared_database::StoreClient;
use shared_utils::signature::verify_signature;

use crate::models::{
    IngestReport, InboundMessage, ReplyAction, StatusUpdate, WebhookEnvelope, WebhookError,
};

const CANCEL_REASON: &str = "patient_whatsapp_reply";

pub struct WebhookIngestService {
    store: Arc<StoreClient>,
    booking: AppointmentBookingService,
    webhook_secret: String,
}

impl WebhookIngestService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            store: Arc::new(StoreClient::new(config)),
            booking: AppointmentBookingService::new(config),
            webhook_secret: config.whatsapp_webhook_secret.clone(),
        }
    }

    /// Verify and process one callback. Only a bad signature is an error;
    /// the report carries everything else.
    pub async fn ingest(
        &self,
        raw_body: &[u8],
        signature_header: &str,
    ) -> Result<IngestReport, WebhookError> {
        if !verify_signature(&self.webhook_secret, raw_body, signature_header) {
            return Err(WebhookError::InvalidSignature);
        }

        let envelope: WebhookEnvelope = serde_json::from_slice(raw_body)
            .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

        let mut report = IngestReport::default();
        for entry in envelope.entry {
            for change in entry.changes {
                for status in change.value.statuses {
                    self.process_status(&status, &mut report).await;
                }
                for message in change.value.messages {
                    self.process_message(&message, &mut report).await;
                }
            }
        }

        info!(
            "Webhook processed: statuses={} replies={} duplicates={} errors={}",
            report.statuses_recorded,
            report.replies_processed,
            report.duplicates_skipped,
            report.errors_logged
        );
        Ok(report)
    }

    // ==========================================================================
    // STATUS CALLBACKS
    // ==========================================================================

    async fn process_status(&self, status: &StatusUpdate, report: &mut IngestReport) {
        let delivery_status = match status.status.as_str() {
            "sent" | "accepted" => "accepted",
            "delivered" => "delivered",
            "read" => "read",
            "failed" => "failed",
            other => {
                debug!("Ignoring unknown provider status '{}'", other);
                return;
            }
        };

        match self.claim_event(&status.id, &status.status).await {
            Ok(true) => {}
            Ok(false) => {
                report.duplicates_skipped += 1;
                return;
            }
            Err(e) => {
                warn!("Webhook event dedup failed for {}: {}", status.id, e);
                report.errors_logged += 1;
                return;
            }
        }

        let path = format!(
            "/rest/v1/reminders?provider_message_id=eq.{}",
            status.id
        );
        let result = self
            .store
            .update_where(&path, json!({ "delivery_status": delivery_status }))
            .await;
        match result {
            Ok(rows) if rows.is_empty() => {
                // Status for a message we did not send (or a legacy-path
                // send); recorded in the dedup table, nothing to update.
                debug!("No reminder carries provider message id {}", status.id);
            }
            Ok(_) => report.statuses_recorded += 1,
            Err(e) => {
                warn!("Failed to record status for {}: {}", status.id, e);
                report.errors_logged += 1;
            }
        }
    }

    // ==========================================================================
    // INTERACTIVE REPLIES
    // ==========================================================================

    async fn process_message(&self, message: &InboundMessage, report: &mut IngestReport) {
        let Some(reply) = message
            .interactive
            .as_ref()
            .and_then(|i| i.button_reply.as_ref())
        else {
            debug!("Ignoring non-interactive inbound message {}", message.id);
            return;
        };
        let Some((action, embedded_id)) = reply.parse_action() else {
            debug!("Ignoring unknown button id '{}'", reply.id);
            return;
        };

        match self.claim_event(&message.id, action.event_kind()).await {
            Ok(true) => {}
            Ok(false) => {
                report.duplicates_skipped += 1;
                return;
            }
            Err(e) => {
                warn!("Webhook event dedup failed for {}: {}", message.id, e);
                report.errors_logged += 1;
                return;
            }
        }

        let appointment_id = match embedded_id {
            Some(id) => Some(id),
            None => match &message.context {
                Some(context) => self.appointment_for_message(&context.id).await,
                None => None,
            },
        };
        let Some(appointment_id) = appointment_id else {
            warn!(
                "Could not correlate reply {} from {:?} to an appointment",
                message.id, message.from
            );
            report.errors_logged += 1;
            return;
        };

        let event = match action {
            ReplyAction::Confirm => AppointmentEvent::PatientConfirm,
            ReplyAction::Cancel => AppointmentEvent::PatientCancel {
                reason: CANCEL_REASON.to_string(),
            },
        };

        match self.booking.apply_event(appointment_id, event).await {
            Ok(_) => report.replies_processed += 1,
            Err(e) => {
                // An already-confirmed or already-cancelled appointment is
                // a stale reply, not a provider problem; answer 200 either
                // way.
                warn!(
                    "Reply {} could not drive appointment {}: {}",
                    message.id, appointment_id, e
                );
                report.errors_logged += 1;
            }
        }
    }

    /// Correlate a replied-to provider message id back to the appointment
    /// through the reminder that carried it.
    async fn appointment_for_message(&self, provider_message_id: &str) -> Option<Uuid> {
        let path = format!(
            "/rest/v1/reminders?provider_message_id=eq.{}&select=appointment_id",
            provider_message_id
        );
        match self.store.select(&path).await {
            Ok(rows) => rows
                .first()
                .and_then(|row| row["appointment_id"].as_str())
                .and_then(|s| Uuid::parse_str(s).ok()),
            Err(e) => {
                warn!(
                    "Reminder lookup failed for provider message {}: {}",
                    provider_message_id, e
                );
                None
            }
        }
    }

    /// Dedup insert: true when this (provider_message_id, event_kind) pair
    /// is new, false when the provider redelivered.
    async fn claim_event(
        &self,
        provider_message_id: &str,
        event_kind: &str,
    ) -> Result<bool, WebhookError> {
        let row = json!([{
            "id": Uuid::new_v4(),
            "provider_message_id": provider_message_id,
            "event_kind": event_kind,
            "received_at": Utc::now().to_rfc3339(),
        }]);
        let inserted = self
            .store
            .insert_ignore_duplicates("/rest/v1/webhook_events", row)
            .await
            .map_err(|e| WebhookError::DatabaseError(e.to_string()))?;
        Ok(!inserted.is_empty())
    }
}
