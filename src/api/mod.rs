pub mod identity;
pub mod rest;
