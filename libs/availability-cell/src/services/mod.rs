pub mod clock;
pub mod slots;
