#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP rail clients for paymux.
//!
//! Talks to a paywall server: x402 quotes and verification, cart quotes,
//! subscription lookups and card checkout sessions. Also provides the
//! concrete manager bundle that payment contexts share.
//!
//! # Modules
//!
//! - [`constants`] - HTTP header names, status codes, endpoint paths
//! - [`headers`] - Base64 encoding/decoding for x402 HTTP headers
//! - [`error`] - Header codec error types
//! - [`paywall`] - [`PaywallClient`], the HTTP [`paymux::flow::PaywallTransport`]
//! - [`stripe`] - [`StripeManager`], card checkout sessions
//! - [`managers`] - [`PaymentManagers`], [`HttpBundleFactory`] and the shared cache
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation for debugging and monitoring

pub mod constants;
pub mod error;
pub mod headers;
pub mod managers;
pub mod paywall;
pub mod stripe;

#[cfg(test)]
mod testing;

pub use error::HttpError;
pub use managers::{HttpBundleFactory, HttpManagerCache, PaymentManagers, shared_cache};
pub use paywall::{PaywallClient, PaywallClientError};
pub use stripe::{CardSessionError, StripeManager};
