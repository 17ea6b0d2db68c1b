//! Client-side caches

pub mod deployment;
