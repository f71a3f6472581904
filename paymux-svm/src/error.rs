//! Errors of the Solana rail.

use paymux::WalletError;
use paymux::scheme::SchemeError;
use solana_client::client_error::ClientError;
use solana_pubkey::Pubkey;

/// Errors produced while building or signing a Solana payment.
#[derive(Debug, thiserror::Error)]
pub enum SolanaSchemeError {
    /// A requirement field is missing or malformed.
    #[error("invalid {field}: {reason}")]
    InvalidRequirement {
        /// Requirement field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
    /// An RPC call failed.
    #[error("{context}: {source}")]
    Rpc {
        /// Which call failed.
        context: &'static str,
        /// Client error.
        #[source]
        source: Box<ClientError>,
    },
    /// The asset account is not a mint.
    #[error("failed to unpack mint {mint}: {reason}")]
    Mint {
        /// Mint address.
        mint: Pubkey,
        /// Why unpacking failed.
        reason: String,
    },
    /// Instruction or message construction failed.
    #[error("{context}: {reason}")]
    Build {
        /// Which step failed.
        context: &'static str,
        /// Underlying error text.
        reason: String,
    },
    /// Transaction (de)serialization failed.
    #[error("{context}: {source}")]
    Serialization {
        /// Which step failed.
        context: &'static str,
        /// bincode error.
        #[source]
        source: bincode::Error,
    },
    /// The wallet failed or refused to sign.
    #[error(transparent)]
    Wallet(#[from] WalletError),
}

impl SolanaSchemeError {
    pub(crate) fn rpc(context: &'static str, source: ClientError) -> Self {
        Self::Rpc {
            context,
            source: Box::new(source),
        }
    }
}

impl From<SolanaSchemeError> for SchemeError {
    fn from(err: SolanaSchemeError) -> Self {
        match err {
            SolanaSchemeError::Wallet(wallet) => Self::Wallet(wallet),
            SolanaSchemeError::InvalidRequirement { .. } => Self::InvalidRequirements {
                reason: err.to_string(),
            },
            SolanaSchemeError::Rpc { .. } => Self::Rpc {
                reason: err.to_string(),
            },
            SolanaSchemeError::Mint { .. }
            | SolanaSchemeError::Build { .. }
            | SolanaSchemeError::Serialization { .. } => Self::Build {
                reason: err.to_string(),
            },
        }
    }
}
