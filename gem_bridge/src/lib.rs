//! # GEM Bridge Library
//!
//! Signal monitoring and call-back execution engine between a PLC and a
//! SECS/GEM style host session.
//!
//! # Module Structure
//!
//! - [`engine`] - Engine assembly and worker start/stop
//! - [`registry`] - Status variable / data value / equipment constant registry
//! - [`interpreter`] - Call-back list interpreter (read, write, wait, save)
//! - [`monitor`] - Edge-triggered monitors for `loop` signals
//! - [`state_watch`] - Control-state and machine-state watchers
//! - [`heartbeat`] - Heartbeat toggle and reconnect wait
//! - [`alarm`] - Alarm table and alarm set/clear lifecycle
//! - [`dispatcher`] - Collection event and alarm report queue
//! - [`requests`] - Inbound host requests
//! - [`recipe`] - Recipe registry
//! - [`persistence`] - Equipment document persistence
//! - [`supervisor`] - Named worker threads with stop tokens
//! - [`stats`] - Per-worker counters
//! - [`driver_registry`] - Controller driver factories
//! - [`drivers`] - Controller driver implementations
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Engine                                │
//! │  ┌──────────────┐   ┌───────────────┐   ┌─────────────────────┐  │
//! │  │ Monitors /   │──►│  Call-back    │──►│  Variable Registry  │  │
//! │  │ Watchers     │   │  Interpreter  │   │                     │  │
//! │  └──────┬───────┘   └───────┬───────┘   └──────────┬──────────┘  │
//! │         │                   │                      │             │
//! │         ▼                   ▼                      ▼             │
//! │  ┌──────────────┐   ┌───────────────┐   ┌─────────────────────┐  │
//! │  │  Controller  │   │  Dispatcher   │──►│  HostProtocol       │  │
//! │  │  (trait)     │   │  (worker)     │   │  (trait)            │  │
//! │  └──────────────┘   └───────────────┘   └─────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod alarm;
pub mod dispatcher;
pub mod driver_registry;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod heartbeat;
pub mod interpreter;
pub mod monitor;
pub mod persistence;
pub mod recipe;
pub mod registry;
pub mod requests;
pub mod state_watch;
pub mod stats;
pub mod supervisor;

pub use crate::driver_registry::ControllerRegistry;
pub use crate::engine::{Diagnostics, Engine};
pub use crate::error::{BridgeError, BridgeResult};
