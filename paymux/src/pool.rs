//! Per-context wallet pools.
//!
//! A [`WalletPool`] belongs to exactly one payment context. Pools are never
//! looked up by fingerprint and never shared, even between contexts with
//! identical configuration: a wallet connected in one tenant must not be
//! visible to another. Pools build their adapters from
//! [`WalletFactory`]s and refuse adapters that are referenced elsewhere.

use std::fmt::{self, Debug, Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::wallet::{WalletAdapter, WalletFactory};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique pool identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(u64);

impl PoolId {
    fn next() -> Self {
        Self(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl Display for PoolId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "wallet-pool-{}", self.0)
    }
}

/// Errors from building a [`WalletPool`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// A factory returned an adapter that something else still references.
    #[error("wallet factory returned a shared adapter: {name}")]
    SharedAdapter {
        /// Adapter name.
        name: String,
    },
}

/// Registry of wallet adapters owned by one context.
pub struct WalletPool {
    id: PoolId,
    wallets: Vec<Arc<dyn WalletAdapter>>,
    destroyed: AtomicBool,
}

impl WalletPool {
    /// Creates an empty pool with a fresh id.
    #[must_use]
    pub fn create() -> Self {
        Self::new(Vec::new())
    }

    /// Creates a pool with one new adapter from each of `factories`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::SharedAdapter`] if a factory hands out an
    /// adapter that is already referenced outside the pool.
    pub fn from_factories(factories: &[Arc<dyn WalletFactory>]) -> Result<Self, PoolError> {
        let wallets = factories
            .iter()
            .map(|factory| {
                let wallet = factory.create();
                if Arc::strong_count(&wallet) == 1 {
                    Ok(wallet)
                } else {
                    Err(PoolError::SharedAdapter {
                        name: wallet.name().to_owned(),
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(wallets))
    }

    fn new(wallets: Vec<Arc<dyn WalletAdapter>>) -> Self {
        let id = PoolId::next();
        #[cfg(feature = "telemetry")]
        tracing::debug!(pool = %id, wallets = wallets.len(), "wallet pool created");
        Self {
            id,
            wallets,
            destroyed: AtomicBool::new(false),
        }
    }

    /// Returns the pool id.
    #[must_use]
    pub const fn id(&self) -> PoolId {
        self.id
    }

    /// Returns every adapter in the pool.
    #[must_use]
    pub fn wallets(&self) -> &[Arc<dyn WalletAdapter>] {
        &self.wallets
    }

    /// Looks up an adapter by name.
    #[must_use]
    pub fn wallet(&self, name: &str) -> Option<Arc<dyn WalletAdapter>> {
        self.wallets.iter().find(|w| w.name() == name).cloned()
    }

    /// Returns the first connected adapter, or else the first ready one.
    #[must_use]
    pub fn preferred(&self) -> Option<Arc<dyn WalletAdapter>> {
        self.wallets
            .iter()
            .find(|w| w.public_key().is_some())
            .or_else(|| self.wallets.iter().find(|w| w.ready_state().is_ready()))
            .cloned()
    }

    /// Whether [`Self::destroy`] has run.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Disconnects every adapter. Only the first call does anything.
    ///
    /// Disconnect failures are logged and otherwise ignored so that one
    /// misbehaving adapter cannot keep the others connected.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        for wallet in &self.wallets {
            if wallet.public_key().is_none() {
                continue;
            }
            let _result = wallet.disconnect().await;
            #[cfg(feature = "telemetry")]
            if let Err(err) = _result {
                tracing::warn!(pool = %self.id, wallet = wallet.name(), error = %err, "wallet disconnect failed");
            }
        }
        #[cfg(feature = "telemetry")]
        tracing::debug!(pool = %self.id, "wallet pool destroyed");
    }
}

impl Debug for WalletPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletPool")
            .field("id", &self.id)
            .field(
                "wallets",
                &self.wallets.iter().map(|w| w.name()).collect::<Vec<_>>(),
            )
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
