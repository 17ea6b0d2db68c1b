//! Authentication

pub mod access_token;
pub mod credentials;
pub mod flow;
pub mod session;
