//! Client-side payment schemes and selection.
//!
//! A [`SchemeClient`] knows how to pay one scheme on one network: it
//! recognizes matching [`PaymentRequirements`] and produces a signed
//! transaction through the connected wallet.
//!
//! When a quote offers several acceptable requirements, every
//! (requirement, client) pair becomes a [`PaymentCandidate`] and a
//! [`PaymentSelector`] picks one ([`FirstMatch`], [`PreferNetwork`],
//! [`MaxAmount`]).

use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{ErrorCode, PaymentError};
use crate::proto::PaymentRequirements;
use crate::wallet::{WalletAdapter, WalletError};

/// Canonical name of the exact-amount scheme.
pub const EXACT_SCHEME: &str = "exact";

/// Errors produced while building or signing a payment.
#[derive(Debug, thiserror::Error)]
pub enum SchemeError {
    /// The wallet refused or failed to sign.
    #[error(transparent)]
    Wallet(#[from] WalletError),
    /// The requirements cannot be paid as stated.
    #[error("invalid payment requirements: {reason}")]
    InvalidRequirements {
        /// What is wrong.
        reason: String,
    },
    /// Building the transaction failed.
    #[error("failed to build transaction: {reason}")]
    Build {
        /// What went wrong.
        reason: String,
    },
    /// A chain RPC call failed.
    #[error("rpc error: {reason}")]
    Rpc {
        /// RPC error text.
        reason: String,
    },
}

impl From<SchemeError> for PaymentError {
    fn from(err: SchemeError) -> Self {
        let code = match err {
            SchemeError::Wallet(wallet) => return wallet.into(),
            SchemeError::Rpc { .. } => ErrorCode::Network,
            SchemeError::InvalidRequirements { .. } | SchemeError::Build { .. } => {
                ErrorCode::SigningFailed
            }
        };
        Self::new(code, err.to_string())
    }
}

/// Pays one scheme on one network.
pub trait SchemeClient: Send + Sync {
    /// Scheme name, e.g. [`EXACT_SCHEME`].
    fn scheme(&self) -> &str;

    /// Network name, e.g. `solana-devnet`.
    fn network(&self) -> &str;

    /// Whether this client can pay `requirements`.
    fn accepts(&self, requirements: &PaymentRequirements) -> bool {
        requirements.scheme == self.scheme() && requirements.network == self.network()
    }

    /// Builds a transaction for `requirements`, has `wallet` sign it and
    /// returns the base64 serialized signed transaction.
    fn sign<'a>(
        &'a self,
        requirements: &'a PaymentRequirements,
        wallet: &'a dyn WalletAdapter,
    ) -> Pin<Box<dyn Future<Output = Result<String, SchemeError>> + Send + 'a>>;
}

/// A requirement paired with a client able to pay it.
pub struct PaymentCandidate<'a> {
    /// The offered requirement.
    pub requirements: &'a PaymentRequirements,
    /// Parsed amount.
    pub amount: u64,
    /// The client that will sign.
    pub client: &'a Arc<dyn SchemeClient>,
}

impl Debug for PaymentCandidate<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentCandidate")
            .field("scheme", &self.requirements.scheme)
            .field("network", &self.requirements.network)
            .field("asset", &self.requirements.asset)
            .field("amount", &self.amount)
            .finish_non_exhaustive()
    }
}

/// Pairs each offered requirement, in server order, with the first
/// registered client that accepts it. Requirements with an unparsable
/// amount are skipped.
#[must_use]
pub fn candidates<'a>(
    accepts: &'a [PaymentRequirements],
    clients: &'a [Arc<dyn SchemeClient>],
) -> Vec<PaymentCandidate<'a>> {
    accepts
        .iter()
        .filter_map(|requirements| {
            let client = clients.iter().find(|c| c.accepts(requirements))?;
            let Some(amount) = requirements.amount() else {
                #[cfg(feature = "telemetry")]
                tracing::warn!(
                    amount = %requirements.max_amount_required,
                    "skipping requirement with unparsable amount"
                );
                return None;
            };
            Some(PaymentCandidate {
                requirements,
                amount,
                client,
            })
        })
        .collect()
}

/// Chooses among payment candidates.
pub trait PaymentSelector: Send + Sync {
    /// Picks a candidate, or none if nothing is acceptable.
    fn select<'c, 'a>(
        &self,
        candidates: &'c [PaymentCandidate<'a>],
    ) -> Option<&'c PaymentCandidate<'a>>;
}

/// Picks the first candidate, i.e. the server's preferred requirement.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstMatch;

impl PaymentSelector for FirstMatch {
    fn select<'c, 'a>(
        &self,
        candidates: &'c [PaymentCandidate<'a>],
    ) -> Option<&'c PaymentCandidate<'a>> {
        candidates.first()
    }
}

/// Prefers networks in the given order, falling back to the first candidate.
#[derive(Debug, Clone)]
pub struct PreferNetwork(Vec<String>);

impl PreferNetwork {
    /// Creates a preference list.
    pub fn new<I, S>(networks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(networks.into_iter().map(Into::into).collect())
    }
}

impl PaymentSelector for PreferNetwork {
    fn select<'c, 'a>(
        &self,
        candidates: &'c [PaymentCandidate<'a>],
    ) -> Option<&'c PaymentCandidate<'a>> {
        self.0
            .iter()
            .find_map(|network| {
                candidates
                    .iter()
                    .find(|c| c.requirements.network == *network)
            })
            .or_else(|| candidates.first())
    }
}

/// Accepts only candidates up to a spending cap.
#[derive(Debug, Clone, Copy)]
pub struct MaxAmount(pub u64);

impl PaymentSelector for MaxAmount {
    fn select<'c, 'a>(
        &self,
        candidates: &'c [PaymentCandidate<'a>],
    ) -> Option<&'c PaymentCandidate<'a>> {
        candidates.iter().find(|c| c.amount <= self.0)
    }
}
