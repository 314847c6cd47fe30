pub mod dispatcher;
pub mod messaging;
pub mod policy;
