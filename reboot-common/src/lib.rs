//! # ReBOOT Common Library
//!
//! Shared code for ReBOOT services including:
//! - Shoe domain models and the `shoes` table schema
//! - Event types (ReBootEvent enum) and the EventBus
//! - Configuration loading and root folder resolution
//! - SSE stream helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
