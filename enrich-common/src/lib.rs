//! # Enrich Common Library
//!
//! Shared code for the catalog enrichment crates including:
//! - Error types
//! - Bootstrap configuration loading (TOML)
//! - Tracing initialization
//! - Research event types and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
