//! Reference-counted manager cache.
//!
//! [`ManagerCache`] maps a configuration [`Fingerprint`] to one shared
//! [`ManagerBundle`]. Contexts whose identity configuration is equal receive
//! the same bundle instance; any difference in an identity field yields a
//! separate entry.
//!
//! Every successful [`ManagerCache::acquire`] returns a [`ManagerLease`].
//! The lease releases its reference exactly once, either through
//! [`ManagerLease::release`] or on drop. When the last reference goes away
//! the entry is removed and the bundle disposed.
//!
//! Concurrent acquisitions of a fingerprint whose bundle is still being
//! created join the in-flight creation instead of starting a new one. A
//! failed creation leaves no entry behind, so the next acquire retries.

use std::fmt::{self, Debug, Formatter};
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::config::PaymentConfig;
use crate::fingerprint::Fingerprint;
use crate::manager::{BundleFactory, ManagerBundle};

/// Creation error shared between every waiter of one in-flight creation.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

type Creation<B> = Shared<BoxFuture<'static, Result<Arc<B>, SharedError>>>;

/// Errors reported by [`ManagerCache`].
///
/// Release errors indicate unbalanced acquire/release pairs; they are
/// programmer errors and are also logged at error level.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Release of a fingerprint the cache does not know.
    #[error("release of unknown fingerprint {fingerprint}")]
    UnknownFingerprint {
        /// The fingerprint that was released.
        fingerprint: Fingerprint,
    },
    /// Release of a lease whose entry was replaced (e.g. after [`ManagerCache::reset`]).
    #[error("release of stale lease for fingerprint {fingerprint}")]
    StaleLease {
        /// The fingerprint of the stale lease.
        fingerprint: Fingerprint,
    },
    /// More releases than acquisitions.
    #[error("over-release of fingerprint {fingerprint}")]
    OverRelease {
        /// The fingerprint that was released.
        fingerprint: Fingerprint,
    },
    /// The bundle factory failed.
    #[error("manager bundle creation failed for {fingerprint}: {source}")]
    Creation {
        /// The fingerprint being created.
        fingerprint: Fingerprint,
        /// Factory error.
        #[source]
        source: SharedError,
    },
}

enum Slot<B> {
    Creating(Creation<B>),
    Ready(Arc<B>),
}

struct CacheEntry<B> {
    ref_count: usize,
    generation: u64,
    slot: Slot<B>,
}

struct Inner<F: BundleFactory> {
    factory: F,
    entries: DashMap<Fingerprint, CacheEntry<F::Bundle>>,
    generations: AtomicU64,
}

/// Snapshot of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStats {
    /// Entry fingerprint.
    pub key: Fingerprint,
    /// Outstanding references.
    pub ref_count: usize,
    /// Whether the bundle is still being created.
    pub creating: bool,
}

/// Snapshot of the whole cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of live entries.
    pub entries: usize,
    /// Per-entry details, ordered by fingerprint.
    pub details: Vec<EntryStats>,
}

/// Process-wide table of shared manager bundles.
///
/// Cloning is cheap; clones share the same table.
pub struct ManagerCache<F: BundleFactory> {
    inner: Arc<Inner<F>>,
}

impl<F: BundleFactory> Clone for ManagerCache<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: BundleFactory> Debug for ManagerCache<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerCache")
            .field("entries", &self.inner.entries.len())
            .finish_non_exhaustive()
    }
}

impl<F: BundleFactory> ManagerCache<F> {
    /// Creates an empty cache backed by `factory`.
    pub fn new(factory: F) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                entries: DashMap::new(),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the bundle factory.
    #[must_use]
    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    /// Acquires the bundle for `config`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Creation`] if the factory fails. No entry is
    /// left behind in that case.
    pub async fn acquire(&self, config: &PaymentConfig) -> Result<ManagerLease<F>, CacheError> {
        let fingerprint = config.fingerprint();

        let (generation, creation) = {
            let mut entry = self
                .inner
                .entries
                .entry(fingerprint.clone())
                .or_insert_with(|| {
                    #[cfg(feature = "telemetry")]
                    tracing::debug!(fingerprint = fingerprint.short(), "creating manager bundle");
                    let creation = self
                        .inner
                        .factory
                        .create(config)
                        .map(|result| result.map(Arc::new).map_err(SharedError::from))
                        .boxed()
                        .shared();
                    CacheEntry {
                        ref_count: 0,
                        generation: self.inner.generations.fetch_add(1, Ordering::Relaxed),
                        slot: Slot::Creating(creation),
                    }
                });
            entry.ref_count += 1;

            #[cfg(feature = "telemetry")]
            tracing::debug!(
                fingerprint = fingerprint.short(),
                ref_count = entry.ref_count,
                "manager cache acquire"
            );

            match &entry.slot {
                Slot::Ready(bundle) => {
                    return Ok(ManagerLease {
                        cache: self.clone(),
                        fingerprint: fingerprint.clone(),
                        generation: entry.generation,
                        bundle: Arc::clone(bundle),
                        released: false,
                    });
                }
                Slot::Creating(creation) => (entry.generation, creation.clone()),
            }
        };

        let guard = PendingAcquire {
            cache: self,
            fingerprint: &fingerprint,
            generation,
            armed: true,
        };
        let outcome = creation.await;
        guard.disarm();

        match outcome {
            Ok(bundle) => {
                if let Some(mut entry) = self.inner.entries.get_mut(&fingerprint)
                    && entry.generation == generation
                    && matches!(entry.slot, Slot::Creating(_))
                {
                    entry.slot = Slot::Ready(Arc::clone(&bundle));
                }
                Ok(ManagerLease {
                    cache: self.clone(),
                    fingerprint,
                    generation,
                    bundle,
                    released: false,
                })
            }
            Err(source) => {
                let _removed = self
                    .inner
                    .entries
                    .remove_if(&fingerprint, |_, entry| entry.generation == generation);
                #[cfg(feature = "telemetry")]
                if _removed.is_some() {
                    tracing::warn!(
                        fingerprint = fingerprint.short(),
                        error = %source,
                        "manager bundle creation failed"
                    );
                }
                Err(CacheError::Creation {
                    fingerprint,
                    source,
                })
            }
        }
    }

    /// Releases one reference on the bundle for `config`.
    ///
    /// Only for references obtained through [`ManagerLease::detach`]; a live
    /// lease releases itself.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::UnknownFingerprint`] or [`CacheError::OverRelease`]
    /// on unbalanced calls.
    pub fn release(&self, config: &PaymentConfig) -> Result<(), CacheError> {
        let fingerprint = config.fingerprint();
        self.release_entry(&fingerprint, None)
            .map(|_| ())
            .inspect_err(report_release_error)
    }

    fn release_lease(&self, fingerprint: &Fingerprint, generation: u64) -> Result<(), CacheError> {
        self.release_entry(fingerprint, Some(generation))
            .map(|_| ())
            .inspect_err(report_release_error)
    }

    /// Decrements the entry and removes it at zero. Returns the remaining count.
    fn release_entry(
        &self,
        fingerprint: &Fingerprint,
        generation: Option<u64>,
    ) -> Result<usize, CacheError> {
        let removed = match self.inner.entries.entry(fingerprint.clone()) {
            Entry::Vacant(_) => {
                return Err(CacheError::UnknownFingerprint {
                    fingerprint: fingerprint.clone(),
                });
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if generation.is_some_and(|generation| generation != entry.generation) {
                    return Err(CacheError::StaleLease {
                        fingerprint: fingerprint.clone(),
                    });
                }
                if entry.ref_count == 0 {
                    return Err(CacheError::OverRelease {
                        fingerprint: fingerprint.clone(),
                    });
                }
                entry.ref_count -= 1;

                #[cfg(feature = "telemetry")]
                tracing::debug!(
                    fingerprint = fingerprint.short(),
                    ref_count = entry.ref_count,
                    "manager cache release"
                );

                if entry.ref_count > 0 {
                    return Ok(entry.ref_count);
                }
                occupied.remove()
            }
        };

        if let Slot::Ready(bundle) = removed.slot {
            #[cfg(feature = "telemetry")]
            tracing::debug!(fingerprint = fingerprint.short(), "disposing manager bundle");
            bundle.dispose();
        }
        Ok(0)
    }

    /// Returns a snapshot of the cache.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let mut details: Vec<EntryStats> = self
            .inner
            .entries
            .iter()
            .map(|entry| EntryStats {
                key: entry.key().clone(),
                ref_count: entry.ref_count,
                creating: matches!(entry.slot, Slot::Creating(_)),
            })
            .collect();
        details.sort_by(|a, b| a.key.cmp(&b.key));
        CacheStats {
            entries: details.len(),
            details,
        }
    }

    /// Forgets every entry.
    ///
    /// Bundles are not disposed: outstanding leases keep theirs alive and
    /// report [`CacheError::StaleLease`] or [`CacheError::UnknownFingerprint`]
    /// when released.
    pub fn reset(&self) {
        #[cfg(feature = "telemetry")]
        tracing::info!(entries = self.inner.entries.len(), "manager cache reset");
        self.inner.entries.clear();
    }
}

fn report_release_error(err: &CacheError) {
    #[cfg(feature = "telemetry")]
    tracing::error!(error = %err, "unbalanced manager cache release");
    #[cfg(not(feature = "telemetry"))]
    let _ = err;
}

/// Gives back the reference taken by an acquire that never completed.
struct PendingAcquire<'a, F: BundleFactory> {
    cache: &'a ManagerCache<F>,
    fingerprint: &'a Fingerprint,
    generation: u64,
    armed: bool,
}

impl<F: BundleFactory> PendingAcquire<'_, F> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<F: BundleFactory> Drop for PendingAcquire<'_, F> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self
                .cache
                .release_entry(self.fingerprint, Some(self.generation));
        }
    }
}

/// One counted reference on a cached bundle.
pub struct ManagerLease<F: BundleFactory> {
    cache: ManagerCache<F>,
    fingerprint: Fingerprint,
    generation: u64,
    bundle: Arc<F::Bundle>,
    released: bool,
}

impl<F: BundleFactory> ManagerLease<F> {
    /// Returns the fingerprint this lease is keyed by.
    #[must_use]
    pub const fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Returns the shared bundle.
    #[must_use]
    pub const fn managers(&self) -> &Arc<F::Bundle> {
        &self.bundle
    }

    /// Releases the reference now.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the entry disappeared (e.g. after a reset).
    pub fn release(mut self) -> Result<(), CacheError> {
        self.released = true;
        self.cache.release_lease(&self.fingerprint, self.generation)
    }

    /// Turns the lease into a bare bundle handle. The reference stays
    /// counted until [`ManagerCache::release`] is called for the same
    /// configuration.
    #[must_use]
    pub fn detach(mut self) -> Arc<F::Bundle> {
        self.released = true;
        Arc::clone(&self.bundle)
    }
}

impl<F: BundleFactory> Deref for ManagerLease<F> {
    type Target = F::Bundle;

    fn deref(&self) -> &Self::Target {
        &self.bundle
    }
}

impl<F: BundleFactory> Debug for ManagerLease<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerLease")
            .field("fingerprint", &self.fingerprint)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl<F: BundleFactory> Drop for ManagerLease<F> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            let _ = self.cache.release_lease(&self.fingerprint, self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering::SeqCst;
    use std::time::Duration;

    use super::*;
    use crate::testing::{CountingFactory, config};

    #[tokio::test]
    async fn equal_configs_share_one_bundle() {
        let factory = CountingFactory::default();
        let counters = factory.counters();
        let cache = ManagerCache::new(factory);

        let a = cache.acquire(&config("https://a.example")).await.unwrap();
        let b = cache
            .acquire(&config("https://a.example").with_theme("dark"))
            .await
            .unwrap();

        assert!(Arc::ptr_eq(a.managers(), b.managers()));
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.details[0].ref_count, 2);
        assert!(!stats.details[0].creating);
        assert_eq!(counters.created.load(SeqCst), 1);
    }

    #[tokio::test]
    async fn different_configs_are_isolated() {
        let cache = ManagerCache::new(CountingFactory::default());

        let a = cache.acquire(&config("https://a.example")).await.unwrap();
        let b = cache
            .acquire(&config("https://a.example").with_tenant_id("other"))
            .await
            .unwrap();

        assert!(!Arc::ptr_eq(a.managers(), b.managers()));
        assert_ne!(a.fingerprint(), b.fingerprint());
        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert!(stats.details.iter().all(|d| d.ref_count == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquires_join_one_creation() {
        let factory = CountingFactory::with_delay(Duration::from_millis(50));
        let counters = factory.counters();
        let cache = ManagerCache::new(factory);
        let cfg = config("https://a.example");

        let (a, b, c) = tokio::join!(cache.acquire(&cfg), cache.acquire(&cfg), cache.acquire(&cfg));
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

        assert!(Arc::ptr_eq(a.managers(), b.managers()));
        assert!(Arc::ptr_eq(b.managers(), c.managers()));
        assert_eq!(counters.created.load(SeqCst), 1);
        assert_eq!(cache.stats().details[0].ref_count, 3);
    }

    #[tokio::test]
    async fn last_release_removes_and_disposes() {
        let factory = CountingFactory::default();
        let counters = factory.counters();
        let cache = ManagerCache::new(factory);
        let cfg = config("https://a.example");

        let a = cache.acquire(&cfg).await.unwrap();
        let b = cache.acquire(&cfg).await.unwrap();
        a.release().unwrap();
        assert_eq!(cache.stats().details[0].ref_count, 1);
        assert_eq!(counters.disposed.load(SeqCst), 0);

        b.release().unwrap();
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(counters.disposed.load(SeqCst), 1);
    }

    #[tokio::test]
    async fn rapid_cycles_leave_no_entries() {
        let factory = CountingFactory::default();
        let counters = factory.counters();
        let cache = ManagerCache::new(factory);
        let cfg = config("https://a.example");

        for _ in 0..10 {
            let a = cache.acquire(&cfg).await.unwrap();
            let b = cache.acquire(&cfg).await.unwrap();
            drop(a);
            b.release().unwrap();
        }

        assert_eq!(cache.stats().entries, 0);
        assert_eq!(counters.created.load(SeqCst), 10);
        assert_eq!(counters.disposed.load(SeqCst), 10);
    }

    #[tokio::test]
    async fn failed_creation_leaves_nothing_and_next_acquire_retries() {
        let factory = CountingFactory::failing(1);
        let counters = factory.counters();
        let cache = ManagerCache::new(factory);
        let cfg = config("https://a.example");

        let err = cache.acquire(&cfg).await.unwrap_err();
        assert!(matches!(err, CacheError::Creation { .. }));
        assert_eq!(cache.stats().entries, 0);

        let lease = cache.acquire(&cfg).await.unwrap();
        assert_eq!(lease.server_url, "https://a.example");
        assert_eq!(counters.created.load(SeqCst), 1);
        assert_eq!(cache.stats().details[0].ref_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waiters_all_see_the_failure() {
        let factory = CountingFactory::failing(1).delayed(Duration::from_millis(20));
        let cache = ManagerCache::new(factory);
        let cfg = config("https://a.example");

        let (a, b) = tokio::join!(cache.acquire(&cfg), cache.acquire(&cfg));
        assert!(a.is_err());
        assert!(b.is_err());
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_acquire_gives_back_its_reference() {
        let cache = ManagerCache::new(CountingFactory::with_delay(Duration::from_millis(50)));
        let cfg = config("https://a.example");

        let timed_out =
            tokio::time::timeout(Duration::from_millis(10), cache.acquire(&cfg)).await;
        assert!(timed_out.is_err());
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn unknown_release_is_an_error() {
        let cache = ManagerCache::new(CountingFactory::default());
        let err = cache.release(&config("https://a.example")).unwrap_err();
        assert!(matches!(err, CacheError::UnknownFingerprint { .. }));
    }

    #[tokio::test]
    async fn release_after_reset_is_reported() {
        let cache = ManagerCache::new(CountingFactory::default());
        let lease = cache.acquire(&config("https://a.example")).await.unwrap();
        cache.reset();
        assert_eq!(cache.stats().entries, 0);
        assert!(matches!(
            lease.release(),
            Err(CacheError::UnknownFingerprint { .. })
        ));
    }

    #[tokio::test]
    async fn stale_lease_does_not_touch_new_entry() {
        let cache = ManagerCache::new(CountingFactory::default());
        let cfg = config("https://a.example");
        let stale = cache.acquire(&cfg).await.unwrap();
        cache.reset();
        let fresh = cache.acquire(&cfg).await.unwrap();

        assert!(matches!(stale.release(), Err(CacheError::StaleLease { .. })));
        assert_eq!(cache.stats().details[0].ref_count, 1);
        fresh.release().unwrap();
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn detached_reference_is_released_by_config() {
        let cache = ManagerCache::new(CountingFactory::default());
        let cfg = config("https://a.example");
        let bundle = cache.acquire(&cfg).await.unwrap().detach();
        assert_eq!(bundle.server_url, "https://a.example");
        assert_eq!(cache.stats().details[0].ref_count, 1);

        cache.release(&cfg).unwrap();
        assert_eq!(cache.stats().entries, 0);
        assert!(matches!(
            cache.release(&cfg),
            Err(CacheError::UnknownFingerprint { .. })
        ));
    }
}
