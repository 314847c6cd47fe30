// libs/appointment-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use crate::models::{AppointmentError, AppointmentEvent, AppointmentStatus};

/// What the booking service must do to the calendar mirror after a
/// committed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarSync {
    None,
    Push,
    /// Push the cancellation and mark the CalendarLink invalid.
    Invalidate,
}

/// Declarative outcome of a transition. The state machine performs no I/O;
/// the booking service executes these effects against the store.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub new_status: AppointmentStatus,
    pub set_confirmed_at: bool,
    pub set_cancelled_at: bool,
    pub cancellation_reason: Option<String>,
    /// Unsent reminders are disabled both on cancellation and when the
    /// appointment reaches a terminal outcome (freeze).
    pub disable_unsent_reminders: bool,
    pub calendar_sync: CalendarSync,
}

pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate an event against the current status and produce the
    /// transition outcome. Terminal states accept nothing.
    pub fn apply(
        &self,
        current: AppointmentStatus,
        event: &AppointmentEvent,
    ) -> Result<TransitionOutcome, AppointmentError> {
        debug!("Applying event {} in status {}", event.name(), current);

        use AppointmentEvent::*;
        use AppointmentStatus::*;

        let outcome = match (current, event) {
            (PendingConfirmation, PatientConfirm) | (PendingConfirmation, DoctorConfirm) => {
                TransitionOutcome {
                    new_status: Confirmed,
                    set_confirmed_at: true,
                    set_cancelled_at: false,
                    cancellation_reason: None,
                    disable_unsent_reminders: false,
                    calendar_sync: CalendarSync::None,
                }
            }
            (PendingConfirmation, PatientCancel { reason })
            | (PendingConfirmation, DoctorCancel { reason })
            | (Confirmed, PatientCancel { reason })
            | (Confirmed, DoctorCancel { reason }) => TransitionOutcome {
                new_status: Cancelled,
                set_confirmed_at: false,
                set_cancelled_at: true,
                cancellation_reason: Some(reason.clone()),
                disable_unsent_reminders: true,
                calendar_sync: CalendarSync::Invalidate,
            },
            (PendingConfirmation, AutoExpire) => TransitionOutcome {
                new_status: Cancelled,
                set_confirmed_at: false,
                set_cancelled_at: true,
                cancellation_reason: Some("auto_expired".to_string()),
                disable_unsent_reminders: true,
                calendar_sync: CalendarSync::Invalidate,
            },
            (Confirmed, Complete) => TransitionOutcome {
                new_status: Completed,
                set_confirmed_at: false,
                set_cancelled_at: false,
                cancellation_reason: None,
                disable_unsent_reminders: true,
                calendar_sync: CalendarSync::Push,
            },
            (Confirmed, MarkNoShow) => TransitionOutcome {
                new_status: NoShow,
                set_confirmed_at: false,
                set_cancelled_at: false,
                cancellation_reason: None,
                disable_unsent_reminders: true,
                calendar_sync: CalendarSync::None,
            },
            (from, event) => {
                warn!("Illegal transition attempted: {} on {}", event.name(), from);
                return Err(AppointmentError::IllegalTransition {
                    from,
                    event: event.name().to_string(),
                });
            }
        };

        Ok(outcome)
    }

    /// The status a fresh appointment starts in: booked by the doctor it is
    /// already confirmed, otherwise it awaits confirmation.
    pub fn initial_status(booked_by_doctor: bool) -> AppointmentStatus {
        if booked_by_doctor {
            AppointmentStatus::Confirmed
        } else {
            AppointmentStatus::PendingConfirmation
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AppointmentEvent::*;
    use AppointmentStatus::*;

    fn machine() -> AppointmentLifecycleService {
        AppointmentLifecycleService::new()
    }

    fn cancel(reason: &str) -> AppointmentEvent {
        PatientCancel {
            reason: reason.to_string(),
        }
    }

    #[test]
    fn pending_confirms_and_sets_timestamp() {
        let outcome = machine().apply(PendingConfirmation, &PatientConfirm).unwrap();
        assert_eq!(outcome.new_status, Confirmed);
        assert!(outcome.set_confirmed_at);
        assert!(!outcome.disable_unsent_reminders);
    }

    #[test]
    fn cancellation_disables_reminders_and_invalidates_calendar() {
        for from in [PendingConfirmation, Confirmed] {
            let outcome = machine().apply(from, &cancel("patient asked")).unwrap();
            assert_eq!(outcome.new_status, Cancelled);
            assert!(outcome.set_cancelled_at);
            assert_eq!(outcome.cancellation_reason.as_deref(), Some("patient asked"));
            assert!(outcome.disable_unsent_reminders);
            assert_eq!(outcome.calendar_sync, CalendarSync::Invalidate);
        }
    }

    #[test]
    fn auto_expire_only_from_pending() {
        assert!(machine().apply(PendingConfirmation, &AutoExpire).is_ok());
        assert!(machine().apply(Confirmed, &AutoExpire).is_err());
    }

    #[test]
    fn complete_and_no_show_freeze_reminders() {
        let done = machine().apply(Confirmed, &Complete).unwrap();
        assert_eq!(done.new_status, Completed);
        assert!(done.disable_unsent_reminders);

        let missed = machine().apply(Confirmed, &MarkNoShow).unwrap();
        assert_eq!(missed.new_status, NoShow);
        assert!(missed.disable_unsent_reminders);
    }

    #[test]
    fn pending_cannot_complete_or_no_show() {
        assert!(machine().apply(PendingConfirmation, &Complete).is_err());
        assert!(machine().apply(PendingConfirmation, &MarkNoShow).is_err());
    }

    #[test]
    fn terminal_states_reject_everything() {
        let events = [
            PatientConfirm,
            DoctorConfirm,
            cancel("x"),
            AutoExpire,
            Complete,
            MarkNoShow,
        ];
        for terminal in [Cancelled, Completed, NoShow] {
            for event in &events {
                let result = machine().apply(terminal, event);
                assert!(
                    matches!(result, Err(AppointmentError::IllegalTransition { .. })),
                    "{:?} accepted {} unexpectedly",
                    terminal,
                    event.name()
                );
            }
        }
    }

    #[test]
    fn initial_status_depends_on_creator() {
        assert_eq!(
            AppointmentLifecycleService::initial_status(true),
            Confirmed
        );
        assert_eq!(
            AppointmentLifecycleService::initial_status(false),
            PendingConfirmation
        );
    }
}
