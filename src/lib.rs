//! Supervised container lifecycle engine.
//!
//! The crate drives OS-level containers on a Linux host through a pluggable
//! low-level runtime: creation, the start pipeline with its reverse-order
//! failure cleanup, graceful and forced stops, exec sessions with FIFO or
//! vsock I/O wiring, idempotent deletion and the exit monitor finalising
//! state when a container's init process dies. Image, volume, network,
//! sandbox and plugin subsystems stay behind contracts defined here.

pub mod attach;
pub mod config;
pub mod container;
pub mod defaults;
pub mod error;
pub mod image;
pub mod mount;
pub mod network;
pub mod oci_spec;
pub mod plugin;
pub mod quantity;
pub mod runtime;
pub mod sandbox;
pub mod service;
pub mod spec_update;
pub mod supervisor;
pub mod volume;

pub use config::Config;
pub use error::{EngineError, Result};
pub use service::{CreateRequest, LifecycleService};
