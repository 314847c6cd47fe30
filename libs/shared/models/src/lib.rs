pub mod clinic;
pub mod error;

pub use clinic::{Doctor, DoctorLicense, Office};
pub use error::AppError;
