//! Manager bundles and the factories that build them.

use std::future::Future;
use std::pin::Pin;

use crate::config::PaymentConfig;

/// Boxed error returned by bundle factories.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The heavyweight clients behind the payment rails of one configuration.
///
/// A bundle is created once per fingerprint and shared by reference between
/// every context holding a lease on it. Its configuration is fixed at
/// creation.
pub trait ManagerBundle: Send + Sync + 'static {
    /// Called once, after the last lease on the bundle is released.
    fn dispose(&self) {}
}

/// Builds a [`ManagerBundle`] for a configuration.
pub trait BundleFactory: Send + Sync + 'static {
    /// The bundle type produced.
    type Bundle: ManagerBundle;

    /// Starts creating a bundle for `config`.
    ///
    /// The returned future must own everything it needs: the cache may poll
    /// it from whichever acquirer is still waiting.
    fn create(
        &self,
        config: &PaymentConfig,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Bundle, BoxError>> + Send + 'static>>;
}
