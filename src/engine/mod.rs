pub mod chat;
pub mod lifecycle;
pub mod listener;
pub mod tracker;
