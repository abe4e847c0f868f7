//! # Payee Common Library
//!
//! Shared code for the payee resolution crates:
//! - Error and result types
//! - Configuration file discovery, TOML loading and secret resolution
//! - Tracing initialisation
//! - Deterministic payee name normalization

pub mod config;
pub mod error;
pub mod normalize;

pub use error::{Error, Result};
pub use normalize::{normalize_name, tokens, BOUNDARY_CHARS};
