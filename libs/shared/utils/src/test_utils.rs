use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;

/// Configuration pointing every collaborator at a local mock server.
pub struct TestConfig {
    pub database_url: String,
    pub internal_api_key: String,
    pub whatsapp_webhook_secret: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            database_url: "http://localhost:54321".to_string(),
            internal_api_key: "test-internal-key".to_string(),
            whatsapp_webhook_secret: "test-webhook-secret".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_store_url(url: &str) -> Self {
        Self {
            database_url: url.to_string(),
            ..Default::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            database_url: self.database_url.clone(),
            database_service_key: "test-service-key".to_string(),
            internal_api_key: self.internal_api_key.clone(),
            default_timezone: "America/Mexico_City".to_string(),
            reminder_grace_minutes: 360,
            reminder_dispatch_timeout_seconds: 30,
            whatsapp_api_url: String::new(),
            whatsapp_api_token: String::new(),
            whatsapp_webhook_secret: self.whatsapp_webhook_secret.clone(),
            calendar_api_url: String::new(),
            calendar_api_token: String::new(),
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

/// Canned store rows matching the relational layout.
pub struct MockStoreRows;

impl MockStoreRows {
    pub fn doctor(id: Uuid, office_id: Uuid) -> Value {
        json!({
            "id": id,
            "display_name": "Dra. Elena Ruiz",
            "default_duration_minutes": 30,
            "default_office_id": office_id,
            "is_active": true
        })
    }

    pub fn office(id: Uuid, doctor_id: Uuid, timezone: &str) -> Value {
        json!({
            "id": id,
            "doctor_id": doctor_id,
            "timezone": timezone,
            "is_virtual": false,
            "address": "Av. Reforma 123, CDMX",
            "is_active": true,
            "created_at": null
        })
    }

    pub fn patient(id: Uuid) -> Value {
        json!({
            "id": id,
            "full_name": "Juan Pérez",
            "phone": "+5215512345678",
            "is_active": true
        })
    }

    pub fn license(doctor_id: Uuid, expires_at: Option<&str>) -> Value {
        json!({
            "id": Uuid::new_v4(),
            "doctor_id": doctor_id,
            "license_number": "1234567",
            "expires_at": expires_at,
            "is_active": true
        })
    }

    pub fn availability_template(doctor_id: Uuid, day_of_week: i32) -> Value {
        json!({
            "id": Uuid::new_v4(),
            "doctor_id": doctor_id,
            "day_of_week": day_of_week,
            "start_time": "09:00:00",
            "end_time": "18:00:00",
            "slot_duration_minutes": 30,
            "lunch_start": "14:00:00",
            "lunch_end": "15:00:00",
            "sub_blocks": null,
            "is_active": true
        })
    }

    pub fn appointment(
        id: Uuid,
        doctor_id: Uuid,
        patient_id: Uuid,
        office_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        status: &str,
    ) -> Value {
        json!({
            "id": id,
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "office_id": office_id,
            "appointment_type": "consulta",
            "start_time": start.to_rfc3339(),
            "end_time": end.to_rfc3339(),
            "status": status,
            "reason": "Consulta general",
            "notes": null,
            "cancellation_reason": null,
            "auto_reminder_enabled": false,
            "auto_reminder_offset_minutes": null,
            "reminder_sent": false,
            "reminder_sent_at": null,
            "created_by": "patient",
            "revision": 1,
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339(),
            "confirmed_at": null,
            "cancelled_at": null
        })
    }

    pub fn reminder(
        id: Uuid,
        appointment_id: Uuid,
        ordinal: i32,
        offset_minutes: i64,
        sent: bool,
    ) -> Value {
        json!({
            "id": id,
            "appointment_id": appointment_id,
            "ordinal": ordinal,
            "offset_minutes": offset_minutes,
            "enabled": true,
            "sent": sent,
            "sent_at": null,
            "provider_message_id": null,
            "delivery_status": null,
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        })
    }
}
