//! Capability detection.
//!
//! Whether a wallet (or any other rail prerequisite) is usable is decided by
//! an injected [`CapabilityProbe`] rather than by poking at globals, so the
//! same flow runs unchanged in tests, servers and embedded hosts.

use crate::pool::WalletPool;

/// Result of a capability probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// The capability is present.
    Available,
    /// The capability is missing.
    Unavailable {
        /// Why it is missing, for diagnostics.
        reason: String,
    },
}

impl Capability {
    /// Whether the capability is present.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

/// Answers "can this rail be used right now".
pub trait CapabilityProbe: Send + Sync {
    /// Probes the capability.
    fn probe(&self) -> Capability;
}

/// A probe with a fixed answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticProbe(pub Capability);

impl StaticProbe {
    /// A probe that always reports [`Capability::Available`].
    #[must_use]
    pub const fn available() -> Self {
        Self(Capability::Available)
    }

    /// A probe that always reports [`Capability::Unavailable`].
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self(Capability::Unavailable {
            reason: reason.into(),
        })
    }
}

impl CapabilityProbe for StaticProbe {
    fn probe(&self) -> Capability {
        self.0.clone()
    }
}

/// A pool is capable when at least one of its adapters is installed or loadable.
impl CapabilityProbe for WalletPool {
    fn probe(&self) -> Capability {
        if self.wallets().iter().any(|w| w.ready_state().is_ready()) {
            Capability::Available
        } else if self.wallets().is_empty() {
            Capability::Unavailable {
                reason: "no wallet adapters registered".to_owned(),
            }
        } else {
            Capability::Unavailable {
                reason: "no wallet adapter detected".to_owned(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::ScriptedFactory;
    use crate::wallet::WalletFactory;

    #[test]
    fn empty_pool_is_unavailable() {
        assert!(!WalletPool::create().probe().is_available());
    }

    #[test]
    fn pool_with_undetected_wallet_is_unavailable() {
        let factory: Arc<dyn WalletFactory> = ScriptedFactory::undetected("k");
        let pool = WalletPool::from_factories(&[factory]).unwrap();
        assert_eq!(
            pool.probe(),
            Capability::Unavailable {
                reason: "no wallet adapter detected".to_owned()
            }
        );
    }

    #[test]
    fn pool_with_installed_wallet_is_available() {
        let factory: Arc<dyn WalletFactory> = ScriptedFactory::disconnected("k");
        let pool = WalletPool::from_factories(&[factory]).unwrap();
        assert!(pool.probe().is_available());
    }

    #[test]
    fn static_probe_answers_verbatim() {
        assert!(StaticProbe::available().probe().is_available());
        assert!(!StaticProbe::unavailable("headless").probe().is_available());
    }
}
