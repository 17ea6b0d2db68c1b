//! Client wiring

pub mod options;
pub mod state;
