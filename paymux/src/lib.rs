#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Payment-manager lifecycle and x402 flow coordination.
//!
//! An application that accepts payment through several widgets shares the
//! heavyweight clients behind each payment rail (card SDK, paywall HTTP
//! client, Solana RPC connection) between every widget whose configuration
//! identifies the same tenant, and keeps everything else apart.
//!
//! # Modules
//!
//! - [`config`] - [`PaymentConfig`] and its TOML loader
//! - [`fingerprint`] - Stable cache keys over the identity fields of a config
//! - [`manager`] - The [`ManagerBundle`] and [`BundleFactory`] traits
//! - [`cache`] - Reference-counted [`ManagerCache`] with RAII leases
//! - [`pool`] - Per-context [`WalletPool`]s, never shared
//! - [`context`] - [`PaymentContext`], a lease plus a wallet pool
//! - [`capability`] - Injected capability probes
//! - [`dedup`] - Click/request deduplication
//! - [`wallet`] - The [`WalletAdapter`] abstraction
//! - [`scheme`] - Scheme clients and payment selection policies
//! - [`proto`] - Wire types of the paywall endpoints and x402 headers
//! - [`flow`] - The x402 state machine and its async driver
//! - [`error`] - Error codes and categories
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation for debugging and monitoring

pub mod cache;
pub mod capability;
pub mod config;
pub mod context;
pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod flow;
pub mod manager;
pub mod pool;
pub mod proto;
pub mod scheme;
pub mod wallet;

#[cfg(test)]
mod testing;

pub use cache::{CacheError, CacheStats, ManagerCache, ManagerLease};
pub use capability::{Capability, CapabilityProbe, StaticProbe};
pub use config::{ConfigError, PaymentConfig, SolanaCluster};
pub use context::{ContextError, PaymentContext};
pub use dedup::{DedupOptions, DedupRegistry, GuardedAction, Invocation};
pub use error::{ErrorCategory, ErrorCode, PaymentError};
pub use fingerprint::Fingerprint;
pub use flow::{PaymentFlow, PaymentReceipt, PaymentRequest, PaymentStatus};
pub use manager::{BundleFactory, ManagerBundle};
pub use pool::{PoolError, PoolId, WalletPool};
pub use scheme::{PaymentSelector, SchemeClient};
pub use wallet::{WalletAdapter, WalletError, WalletFactory, WalletReadyState};
