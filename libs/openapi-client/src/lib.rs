//! Wire models for the JStratusD gateway.

pub mod models;
