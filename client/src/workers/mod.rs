//! Background workers

pub mod mutations;
pub mod plan;
pub mod poller;
