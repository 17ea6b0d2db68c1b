//! Client-side models

pub mod branch;
pub mod deployment;
