pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::*;
pub use services::clock::{Clock, ClockService, FixedClock, SystemClock, WallClockAdjustment};
pub use services::slots::AvailabilityService;
