//! Pressforge daemon library.
//!
//! Exposes internal modules for integration testing. In production,
//! `pressforge-daemon` is used as a binary (main.rs).

pub mod cli;
pub mod logging;
pub mod metrics_server;
pub mod orchestrator;
