pub mod booking;
pub mod lifecycle;
pub mod locking;
