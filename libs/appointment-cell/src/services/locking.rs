// libs/appointment-cell/src/services/locking.rs
//
// Doctor-day advisory lock rows. Creation's overlap check and the insert
// must observe the same snapshot; the unique `lock_key` insert serializes
// concurrent bookings for the same doctor and day the way a predicate lock
// would in direct SQL.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::{StoreClient, StoreError};

use crate::models::AppointmentError;

const LOCK_TIMEOUT_SECONDS: i64 = 30;

pub struct SchedulingLockService {
    store: Arc<StoreClient>,
}

impl SchedulingLockService {
    pub fn new(store: Arc<StoreClient>) -> Self {
        Self { store }
    }

    pub fn lock_key(doctor_id: Uuid, day: NaiveDate) -> String {
        format!("doctor:{}:day:{}", doctor_id, day)
    }

    /// Try to take the lock. Returns false when another worker holds it.
    /// Stale locks past their expiry are reaped first so a crashed worker
    /// cannot block a doctor's day forever.
    pub async fn acquire(
        &self,
        lock_key: &str,
        doctor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, AppointmentError> {
        self.reap_expired(lock_key, now).await?;

        let row = json!({
            "id": Uuid::new_v4(),
            "lock_key": lock_key,
            "doctor_id": doctor_id,
            "acquired_at": now.to_rfc3339(),
            "expires_at": (now + Duration::seconds(LOCK_TIMEOUT_SECONDS)).to_rfc3339(),
        });

        let inserted = self
            .store
            .insert_ignore_duplicates("/rest/v1/scheduling_locks", json!([row]))
            .await
            .map_err(map_store_error)?;

        let acquired = !inserted.is_empty();
        if !acquired {
            debug!("Scheduling lock {} already held", lock_key);
        }
        Ok(acquired)
    }

    pub async fn release(&self, lock_key: &str) -> Result<(), AppointmentError> {
        let path = format!(
            "/rest/v1/scheduling_locks?lock_key=eq.{}",
            urlencoding::encode(lock_key)
        );
        self.store.delete_where(&path).await.map_err(|e| {
            warn!("Failed to release scheduling lock {}: {}", lock_key, e);
            map_store_error(e)
        })
    }

    async fn reap_expired(
        &self,
        lock_key: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        let path = format!(
            "/rest/v1/scheduling_locks?lock_key=eq.{}&expires_at=lt.{}",
            urlencoding::encode(lock_key),
            urlencoding::encode(&now.to_rfc3339()),
        );
        self.store.delete_where(&path).await.map_err(map_store_error)
    }
}

pub(crate) fn map_store_error(e: StoreError) -> AppointmentError {
    match e {
        StoreError::Conflict(_) => AppointmentError::Conflict,
        other => AppointmentError::DatabaseError(other.to_string()),
    }
}
