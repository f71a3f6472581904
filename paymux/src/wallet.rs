//! Wallet adapter abstraction.
//!
//! Browser-extension, mobile and keypair wallets are consumed through the
//! [`WalletAdapter`] trait. Adapters are chain-agnostic at this level: public
//! keys are strings and transactions are opaque serialized bytes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{ErrorCode, PaymentError};

/// Availability of a wallet adapter, as reported by the wallet itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WalletReadyState {
    /// The wallet is installed and can be connected.
    Installed,
    /// The wallet can be loaded on demand (e.g. a hosted wallet).
    Loadable,
    /// The wallet was not detected.
    NotDetected,
    /// The wallet cannot run in this environment.
    Unsupported,
}

impl WalletReadyState {
    /// Whether a connection can be attempted.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Installed | Self::Loadable)
    }
}

/// Errors reported by wallet adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    /// The wallet is not installed or cannot run here.
    #[error("wallet {name} is not ready")]
    NotReady {
        /// Adapter name.
        name: String,
    },
    /// An operation needed a connected wallet.
    #[error("wallet is not connected")]
    NotConnected,
    /// The user declined the prompt.
    #[error("user rejected the request: {reason}")]
    Rejected {
        /// Wallet-provided reason.
        reason: String,
    },
    /// Connecting failed for a reason other than a user decision.
    #[error("wallet connection failed: {reason}")]
    Connection {
        /// Wallet-provided reason.
        reason: String,
    },
    /// The wallet could not sign the transaction.
    #[error("wallet signing failed: {reason}")]
    Signing {
        /// Wallet-provided reason.
        reason: String,
    },
}

impl WalletError {
    /// Whether the user actively declined.
    #[must_use]
    pub const fn is_user_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

impl From<WalletError> for PaymentError {
    fn from(err: WalletError) -> Self {
        let code = match &err {
            WalletError::NotReady { .. } => ErrorCode::WalletNotInstalled,
            WalletError::NotConnected | WalletError::Connection { .. } => {
                ErrorCode::WalletNotConnected
            }
            WalletError::Rejected { .. } => ErrorCode::UserDeclined,
            WalletError::Signing { .. } => ErrorCode::SigningFailed,
        };
        Self::new(code, err.to_string())
    }
}

/// A wallet that can connect and sign transactions.
pub trait WalletAdapter: Send + Sync {
    /// Display name, unique within a pool.
    fn name(&self) -> &str;

    /// Current availability.
    fn ready_state(&self) -> WalletReadyState;

    /// Public key of the connected account, if connected.
    fn public_key(&self) -> Option<String>;

    /// Connects and returns the account public key.
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<String, WalletError>> + Send + '_>>;

    /// Disconnects. Disconnecting a disconnected wallet is a no-op.
    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), WalletError>> + Send + '_>>;

    /// Signs a serialized transaction and returns the signed serialization.
    fn sign_transaction(
        &self,
        transaction: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, WalletError>> + Send + '_>>;
}

/// Builds wallet adapters for a [`WalletPool`](crate::pool::WalletPool).
///
/// Every pool asks its factories for new adapters, so two pools never hold
/// the same instance. Closures returning `Arc<dyn WalletAdapter>` are
/// factories.
pub trait WalletFactory: Send + Sync {
    /// Builds an adapter no one else references.
    fn create(&self) -> Arc<dyn WalletAdapter>;
}

impl<F> WalletFactory for F
where
    F: Fn() -> Arc<dyn WalletAdapter> + Send + Sync,
{
    fn create(&self) -> Arc<dyn WalletAdapter> {
        self()
    }
}
