#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Solana rail for paymux.
//!
//! Builds SPL token transfers for x402 `exact` requirements and has the
//! connected wallet sign them.
//!
//! # Modules
//!
//! - [`networks`] - Well-known Solana networks and USDC deployments
//! - [`rpc`] - The RPC calls transfer building depends on
//! - [`transfer`] - Mint lookup, fee estimation and transaction building
//! - [`scheme`] - [`SolanaExactScheme`], a [`paymux::SchemeClient`]
//! - [`keypair`] - [`KeypairWallet`], a [`paymux::WalletAdapter`] over a local keypair
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation for debugging and monitoring

pub mod error;
pub mod keypair;
pub mod networks;
pub mod rpc;
pub mod scheme;
pub mod transfer;

#[cfg(test)]
mod testing;

pub use error::SolanaSchemeError;
pub use keypair::KeypairWallet;
pub use networks::{SOLANA, SOLANA_DEVNET, SolanaNetwork};
pub use rpc::RpcClientLike;
pub use scheme::SolanaExactScheme;
