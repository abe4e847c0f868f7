//! Test Helper Utilities
//!
//! Shared utilities for testing payee-resolver

#![allow(dead_code)]

pub mod classifier;
pub mod fake_provider;
pub mod fixtures;
pub mod log_capture;

pub use classifier::ScriptedClassifier;
pub use fake_provider::FakeProvider;
pub use fixtures::{
    build_client, build_orchestrator, fast_settings, payees, provider_config, suppliers,
};
pub use log_capture::{capture_logs, LogCapture};
