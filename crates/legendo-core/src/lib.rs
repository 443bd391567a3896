//! legendo-core: an in-memory, encrypted-at-rest cache with age-based expiry.
//!
//! - `crypto`     AES-256-GCM seal/open with detached nonce and tag
//! - `store`      keyed entry storage behind the `EntryStore` trait
//! - `sweeper`    periodic removal of expired entries
//! - `cache`      `SecureCache`, the facade composing the three above
//! - `config`     durations and key resolution
//! - `ipc`        local control protocol (server side) and `ipc_client`
//! - `gateway`    payment gateway boundary types

pub mod cache;
pub mod config;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod ipc;
pub mod ipc_client;
pub mod paths;
pub mod store;
pub mod sweeper;

pub use cache::{CacheStatus, SecureCache, SweepStats};
pub use crypto::CipherKey;
pub use error::CacheError;
pub use store::EntryId;
