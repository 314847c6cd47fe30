pub mod internal;
pub mod signature;
pub mod test_utils;
