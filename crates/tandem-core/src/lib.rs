//! Tandem Core - pairing protocols and trust state machines.
//!
//! This crate implements:
//! - QR payload codec for both pairing versions
//! - Pairing V1 (legacy master-key transfer)
//! - Pairing V2 (device-rooted pairwise trust)
//! - Trusted-device records and device roles
//! - Web-session authorization (`pending -> active -> expired`)
//! - Persistent storage abstraction (in-memory and SQLite)
//! - Long-term key storage, configuration and logging setup

#![forbid(unsafe_code)]

// Protocols
pub mod qr;
pub mod pairing_v1;
pub mod pairing_v2;
pub mod web_session;

// Domain types
pub mod trust;
pub mod clock;

// Infrastructure
pub mod store;
pub mod keystore;
pub mod config;
pub mod logging;

// Supporting modules
pub mod errors;
pub mod harness;

// Optional storage implementations
#[cfg(feature = "sqlite")]
pub mod sqlite_store;

#[cfg(test)]
mod proptests;

pub use errors::{CoreError, PairingError, ValidationError, WebSessionError};
pub use qr::PairingPayload;
pub use store::{open_store, InMemoryStore, Store, StoreError};
pub use trust::{DeviceRole, LocalDevice, TrustedDeviceInfo};
pub use web_session::{AuthorizeRequest, WebSessionManager};
