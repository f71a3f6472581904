//! The concrete manager bundle behind every payment widget.
//!
//! [`HttpBundleFactory`] turns a [`PaymentConfig`] into [`PaymentManagers`]:
//! a [`PaywallClient`] for the server, a [`StripeManager`] when a card key is
//! configured, and a nonblocking Solana [`RpcClient`]. One bundle exists per
//! configuration fingerprint; [`shared_cache`] is the process-wide cache of
//! them.
//!
//! Only identity fields shape a bundle. Behavior fields such as the request
//! timeout are applied per context through [`PaymentManagers::paywall_for`],
//! [`PaymentManagers::card_for`] and [`PaymentManagers::flow`].
//!
//! Disposal marks a bundle but does not tear it down. Flows and handles
//! cloned out of it keep their clients alive until they are dropped.

use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use paymux::flow::PaymentFlow;
use paymux::manager::BoxError;
use paymux::scheme::SchemeClient;
use paymux::wallet::WalletAdapter;
use paymux::{BundleFactory, ManagerBundle, ManagerCache, PaymentConfig};
use paymux_svm::SolanaExactScheme;
use paymux_svm::networks::{SolanaNetwork, default_rpc_url, network_for_cluster};
use solana_client::nonblocking::rpc_client::RpcClient;

use crate::paywall::PaywallClient;
use crate::stripe::StripeManager;

/// Cache of [`PaymentManagers`] keyed by configuration fingerprint.
pub type HttpManagerCache = ManagerCache<HttpBundleFactory>;

static SHARED_CACHE: LazyLock<HttpManagerCache> =
    LazyLock::new(|| ManagerCache::new(HttpBundleFactory::default()));

/// The process-wide manager cache.
///
/// Contexts opened against it share bundles with every other context in the
/// process whose configuration has the same fingerprint.
pub fn shared_cache() -> &'static HttpManagerCache {
    &SHARED_CACHE
}

/// Managers for one configuration fingerprint.
pub struct PaymentManagers {
    card: Option<Arc<StripeManager>>,
    paywall: Arc<PaywallClient>,
    solana_rpc: Arc<RpcClient>,
    network: Option<&'static SolanaNetwork>,
    disposed: AtomicBool,
}

impl PaymentManagers {
    /// Builds the managers for `config` using `http` for server calls.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate or the server
    /// URL cannot host the paywall endpoints.
    pub fn from_config(config: &PaymentConfig, http: reqwest::Client) -> Result<Self, BoxError> {
        config.validate()?;
        let paywall = Arc::new(PaywallClient::try_new(config.server_url()?)?.with_client(http));
        let card = config
            .stripe_public_key
            .as_ref()
            .map(|key| Arc::new(StripeManager::new(key.clone(), Arc::clone(&paywall))));
        let rpc_url = config
            .solana_endpoint
            .clone()
            .unwrap_or_else(|| default_rpc_url(config.solana_cluster).to_owned());
        Ok(Self {
            card,
            paywall,
            solana_rpc: Arc::new(RpcClient::new(rpc_url)),
            network: network_for_cluster(config.solana_cluster),
            disposed: AtomicBool::new(false),
        })
    }

    /// Card manager, present when a publishable key is configured.
    #[must_use]
    pub const fn card(&self) -> Option<&Arc<StripeManager>> {
        self.card.as_ref()
    }

    /// Paywall client, without any per-context timeout.
    #[must_use]
    pub const fn paywall(&self) -> &Arc<PaywallClient> {
        &self.paywall
    }

    /// Paywall client for a context opened with `config`.
    ///
    /// With a request timeout configured this is a copy of the shared client
    /// carrying that timeout; the HTTP connection pool stays shared.
    #[must_use]
    pub fn paywall_for(&self, config: &PaymentConfig) -> Arc<PaywallClient> {
        match config.request_timeout() {
            Some(timeout) => Arc::new(self.paywall.as_ref().clone().with_timeout(timeout)),
            None => Arc::clone(&self.paywall),
        }
    }

    /// Card manager for a context opened with `config`, using
    /// [`Self::paywall_for`].
    #[must_use]
    pub fn card_for(&self, config: &PaymentConfig) -> Option<Arc<StripeManager>> {
        let card = self.card.as_ref()?;
        if config.request_timeout().is_none() {
            return Some(Arc::clone(card));
        }
        Some(Arc::new(StripeManager::new(
            card.publishable_key(),
            self.paywall_for(config),
        )))
    }

    /// Whether the cache has disposed of this bundle.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Solana RPC connection.
    #[must_use]
    pub const fn solana_rpc(&self) -> &Arc<RpcClient> {
        &self.solana_rpc
    }

    /// x402 network of the configured cluster.
    #[must_use]
    pub const fn network(&self) -> Option<&'static SolanaNetwork> {
        self.network
    }

    /// `exact` scheme client on the configured cluster, sharing the RPC
    /// connection. Clusters without an x402 network have none.
    #[must_use]
    pub fn solana_scheme(&self) -> Option<Arc<dyn SchemeClient>> {
        self.network.map(|network| {
            Arc::new(SolanaExactScheme::new(network, Arc::clone(&self.solana_rpc)))
                as Arc<dyn SchemeClient>
        })
    }

    /// A payment flow for `wallet` over these managers.
    ///
    /// The bundle is shared, the flow is not: every widget gets its own
    /// flow and the wallet comes from the widget's own pool. Behavior
    /// settings, the request timeout included, are read from `config`.
    #[must_use]
    pub fn flow(&self, config: &PaymentConfig, wallet: Arc<dyn WalletAdapter>) -> PaymentFlow {
        let transport = self.paywall_for(config);
        let mut flow = PaymentFlow::new(transport, wallet)
            .with_auto_check_subscription(config.auto_check_subscription);
        if let Some(scheme) = self.solana_scheme() {
            flow = flow.with_scheme(scheme);
        }
        flow
    }
}

impl Debug for PaymentManagers {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentManagers")
            .field("server", &self.paywall.base_url().as_str())
            .field("card", &self.card.is_some())
            .field("network", &self.network.map(|n| n.name))
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl ManagerBundle for PaymentManagers {
    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        #[cfg(feature = "telemetry")]
        tracing::debug!(server = %self.paywall.base_url(), "payment managers disposed");
    }
}

/// Builds [`PaymentManagers`], sharing one HTTP connection pool between
/// every bundle it creates.
#[derive(Debug, Clone, Default)]
pub struct HttpBundleFactory {
    http: reqwest::Client,
}

impl HttpBundleFactory {
    /// Uses `http` for every paywall client the factory builds.
    #[must_use]
    pub const fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl BundleFactory for HttpBundleFactory {
    type Bundle = PaymentManagers;

    fn create(
        &self,
        config: &PaymentConfig,
    ) -> Pin<Box<dyn Future<Output = Result<PaymentManagers, BoxError>> + Send + 'static>> {
        let config = config.clone();
        let http = self.http.clone();
        Box::pin(async move {
            #[cfg(feature = "telemetry")]
            tracing::info!(
                fingerprint = %config.fingerprint().short(),
                cluster = %config.solana_cluster,
                "creating payment managers"
            );
            PaymentManagers::from_config(&config, http)
        })
    }
}
