// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    routing::{delete, get, patch, post, put},
    Router,
};

use shared_config::AppConfig;

use crate::handlers;

pub fn appointment_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(handlers::list_appointments))
        .route("/", post(handlers::create_appointment))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}", put(handlers::update_appointment))
        .route("/{appointment_id}", delete(handlers::cancel_appointment))
        .route(
            "/{appointment_id}/reschedule",
            patch(handlers::reschedule_appointment),
        )
        // Reminder subresource; the handlers live with the reminder cell.
        .route(
            "/{appointment_id}/reminders",
            get(reminder_cell::handlers::list_appointment_reminders),
        )
        .route(
            "/{appointment_id}/reminders/{ordinal}",
            put(reminder_cell::handlers::update_appointment_reminder),
        )
        .with_state(state)
}
