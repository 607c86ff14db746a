//! Marionette Common Library
//!
//! This crate provides shared types and configuration primitives for all
//! Marionette workspace crates.
//!
//! # Module Structure
//!
//! - [`channel`] - Channel limits table (per-servo hard bounds and safe positions)
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - System-wide constants
//! - [`sink`] - Actuator sink trait (the hardware boundary)
//! - [`status`] - Playback status, alert flags, and status snapshots
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```toml
//! [dependencies]
//! marionette_common = { path = "../marionette_common" }
//! ```

pub mod channel;
pub mod config;
pub mod consts;
pub mod prelude;
pub mod sink;
pub mod status;
