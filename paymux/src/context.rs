//! Payment contexts.
//!
//! A [`PaymentContext`] is what a mounted payment provider holds: a lease on
//! the shared manager bundle for its configuration and a wallet pool of its
//! own. [`PaymentContext::open`] acquires both, [`PaymentContext::close`]
//! destroys the pool and releases the lease.

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use crate::cache::{CacheError, ManagerCache, ManagerLease};
use crate::config::PaymentConfig;
use crate::fingerprint::Fingerprint;
use crate::manager::BundleFactory;
use crate::pool::{PoolError, WalletPool};
use crate::wallet::WalletFactory;

/// Errors from [`PaymentContext::open`].
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// The wallet pool could not be built.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// The manager bundle could not be acquired.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// One provider's share of the payment infrastructure.
pub struct PaymentContext<F: BundleFactory> {
    config: PaymentConfig,
    lease: ManagerLease<F>,
    pool: Arc<WalletPool>,
}

impl<F: BundleFactory> PaymentContext<F> {
    /// Acquires the bundle for `config` from `cache` and creates a fresh
    /// wallet pool with one new adapter per entry of `wallets`.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Pool`] if a factory hands out a shared
    /// adapter and [`ContextError::Cache`] if the bundle cannot be created.
    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(name = "paymux.context.open", skip_all, err)
    )]
    pub async fn open(
        cache: &ManagerCache<F>,
        config: PaymentConfig,
        wallets: &[Arc<dyn WalletFactory>],
    ) -> Result<Self, ContextError> {
        let pool = Arc::new(WalletPool::from_factories(wallets)?);
        let lease = cache.acquire(&config).await?;
        #[cfg(feature = "telemetry")]
        tracing::debug!(
            fingerprint = %lease.fingerprint().short(),
            pool = %pool.id(),
            "payment context opened"
        );
        Ok(Self {
            config,
            lease,
            pool,
        })
    }

    /// The configuration this context was opened with.
    #[must_use]
    pub const fn config(&self) -> &PaymentConfig {
        &self.config
    }

    /// Fingerprint of the shared bundle.
    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        self.lease.fingerprint()
    }

    /// The shared manager bundle.
    #[must_use]
    pub fn managers(&self) -> &Arc<F::Bundle> {
        self.lease.managers()
    }

    /// The context's own wallet pool.
    #[must_use]
    pub const fn wallet_pool(&self) -> &Arc<WalletPool> {
        &self.pool
    }

    /// Destroys the wallet pool and releases the bundle lease.
    pub async fn close(self) -> Result<(), CacheError> {
        self.pool.destroy().await;
        #[cfg(feature = "telemetry")]
        tracing::debug!(pool = %self.pool.id(), "payment context closed");
        self.lease.release()
    }
}

impl<F: BundleFactory> Debug for PaymentContext<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentContext")
            .field("fingerprint", self.lease.fingerprint())
            .field("pool", &self.pool.id())
            .finish_non_exhaustive()
    }
}
