//! HTTP plumbing: transport, request augmentation and the session guard

pub mod augmenter;
pub mod auth;
pub mod client;
pub mod deployments;
pub mod guard;
pub mod navigator;
pub mod request;
pub mod transport;
