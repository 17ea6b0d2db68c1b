//! Persistent client storage

pub mod layout;
pub mod settings;
