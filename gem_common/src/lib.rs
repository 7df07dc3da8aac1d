//! GEM Common Library
//!
//! This crate provides the shared model for the GEM equipment bridge: the
//! configuration loaders, the equipment document, the value model and the
//! two collaborator traits the engine is written against.
//!
//! # Module Structure
//!
//! - [`config`] - Configuration loading traits and the bridge settings file
//! - [`equipment`] - Equipment document (variables, events, signals, call-backs)
//! - [`value`] - Runtime values, host value types and controller data types
//! - [`controller`] - Controller capability trait and communication errors
//! - [`host`] - Host-protocol collaborator trait and report payloads
//! - [`consts`] - Well-known names and timing defaults
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use gem_common::prelude::*;
//! ```

pub mod config;
pub mod consts;
pub mod controller;
pub mod equipment;
pub mod host;
pub mod prelude;
pub mod value;
