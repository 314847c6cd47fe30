pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::*;
pub use services::dispatcher::ReminderDispatcherService;
pub use services::messaging::{MessagingError, MessagingPort, WhatsAppClient};
pub use services::policy::ReminderPolicyService;
