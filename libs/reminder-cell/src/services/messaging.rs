// libs/reminder-cell/src/services/messaging.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use shared_config::AppConfig;

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("provider request failed: {0}")]
    Transport(String),

    #[error("provider rejected message: {0}")]
    Rejected(String),

    #[error("provider not configured")]
    NotConfigured,
}

/// Outbound WhatsApp seam. The dispatcher only needs "send this text to
/// this phone and give me the provider message id"; provider specifics
/// (Meta Graph vs Twilio) stay behind this trait.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_text(&self, to_phone: &str, body: &str) -> Result<String, MessagingError>;
}

pub struct WhatsAppClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl WhatsAppClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.whatsapp_api_url.clone(),
            token: config.whatsapp_api_token.clone(),
        }
    }
}

#[async_trait]
impl MessagingPort for WhatsAppClient {
    async fn send_text(&self, to_phone: &str, body: &str) -> Result<String, MessagingError> {
        if self.base_url.is_empty() || self.token.is_empty() {
            return Err(MessagingError::NotConfigured);
        }

        let url = format!("{}/messages", self.base_url);
        debug!("Sending WhatsApp message to {}", to_phone);

        let payload = json!({
            "messaging_product": "whatsapp",
            "to": to_phone,
            "type": "text",
            "text": { "body": body },
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MessagingError::Transport(e.to_string()))?;

        let status = response.status();
        let value: Value = response
            .json()
            .await
            .map_err(|e| MessagingError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(MessagingError::Rejected(format!("{}: {}", status, value)));
        }

        value["messages"][0]["id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| MessagingError::Rejected("response carried no message id".to_string()))
    }
}

/// Render the Spanish reminder body sent over WhatsApp. The patient can
/// answer with the interactive buttons handled by the webhook ingestor.
pub fn render_reminder_message(
    patient_name: &str,
    doctor_name: &str,
    start_local: DateTime<chrono_tz::Tz>,
) -> String {
    format!(
        "Hola {}, le recordamos su cita con {} el {} a las {}. \
         Responda \"confirmar\" para confirmar o \"cancelar\" para cancelar.",
        patient_name,
        doctor_name,
        start_local.format("%d/%m/%Y"),
        start_local.format("%H:%M"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use availability_cell::services::clock::ClockService;
    use chrono::TimeZone;

    #[test]
    fn message_renders_local_wall_time() {
        let tz = ClockService::parse_tz("America/Mexico_City").unwrap();
        let start_utc: DateTime<Utc> = "2025-06-02T17:00:00Z".parse().unwrap();
        let local = tz.from_utc_datetime(&start_utc.naive_utc());
        let body = render_reminder_message("Juan Pérez", "Dra. Elena Ruiz", local);
        assert!(body.contains("02/06/2025"));
        assert!(body.contains("11:00"));
        assert!(body.contains("confirmar"));
    }
}
