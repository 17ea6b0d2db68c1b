//! JStratusD Client Library
//!
//! Session handling, deployment cache and live log tailing for the
//! JStratusD deployment service.

pub mod app;
pub mod authn;
pub mod cache;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod storage;
pub mod utils;
pub mod workers;
