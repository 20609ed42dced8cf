//! # stateviz-runtime
//!
//! Async runtime for the stateviz inspector.
//!
//! This crate provides:
//! - A single-owner interpreter service driven by a command queue
//! - Delayed transition scheduling
//! - Snapshot broadcasting to subscribers
//! - YAML + environment configuration

pub mod broadcast;
pub mod config;
pub mod error;
pub mod service;

pub use broadcast::{Snapshot, SnapshotBroadcaster, SnapshotCause, SnapshotFilter, SnapshotReceiver};
pub use config::{Config, ConfigError};
pub use error::RuntimeError;
pub use service::{spawn, Preview, ServiceHandle};
