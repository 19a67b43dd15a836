pub mod identity;
pub mod location;
pub mod message;
pub mod request;
