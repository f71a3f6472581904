//! Click and request deduplication.
//!
//! [`DedupRegistry::wrap`] turns an async action into a [`GuardedAction`]
//! keyed by an action identity. Two rules apply per key:
//!
//! - **Cooldown.** An invocation within `cooldown` of the last execution
//!   does not execute.
//! - **Result sharing.** With a non-zero `dedup_window`, callers arriving
//!   while an execution is in flight, or within `dedup_window` after it
//!   resolved, receive that execution's result instead of being turned
//!   away. With a zero window every permitted call executes afresh, which
//!   crypto payment flows rely on: a signed payload is never replayed.
//!
//! State is process-wide by default ([`DedupRegistry::global`]) and
//! partitioned by key. A key whose cooldown and window have both lapsed,
//! with nothing in flight, is swept on the next invocation of any key.
//! [`DedupRegistry::clear`] drops all of it.

use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;
use tokio::time::Instant;

type SharedValue = Arc<dyn Any + Send + Sync>;
type InFlight = Shared<BoxFuture<'static, SharedValue>>;

/// Timing options for a guarded action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupOptions {
    /// Minimum delay between two executions.
    pub cooldown: Duration,
    /// How long a result stays shareable. Zero disables sharing.
    pub dedup_window: Duration,
}

impl DedupOptions {
    /// Creates options from a cooldown and a sharing window.
    #[must_use]
    pub const fn new(cooldown: Duration, dedup_window: Duration) -> Self {
        Self {
            cooldown,
            dedup_window,
        }
    }

    /// Cooldown only; results are never shared.
    #[must_use]
    pub const fn cooldown_only(cooldown: Duration) -> Self {
        Self::new(cooldown, Duration::ZERO)
    }
}

impl Default for DedupOptions {
    fn default() -> Self {
        Self::cooldown_only(Duration::from_millis(200))
    }
}

/// Outcome of [`GuardedAction::invoke`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation<T> {
    /// This call ran the action.
    Executed(T),
    /// This call received the result of another call's execution.
    Shared(T),
    /// This call was inside the cooldown and did nothing.
    Suppressed,
}

impl<T> Invocation<T> {
    /// Returns the value, if any.
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Executed(value) | Self::Shared(value) => Some(value),
            Self::Suppressed => None,
        }
    }

    /// Whether the call was suppressed.
    pub const fn is_suppressed(&self) -> bool {
        matches!(self, Self::Suppressed)
    }
}

#[derive(Default)]
struct DedupEntry {
    cooldown_until: Option<Instant>,
    in_flight: Option<InFlight>,
    settled: Option<(Instant, SharedValue)>,
}

impl DedupEntry {
    fn is_stale(&self, now: Instant) -> bool {
        self.in_flight.is_none()
            && self.cooldown_until.is_none_or(|until| now >= until)
            && self
                .settled
                .as_ref()
                .is_none_or(|(expires_at, _)| now >= *expires_at)
    }
}

/// Per-key dedup state.
#[derive(Clone, Default)]
pub struct DedupRegistry {
    entries: Arc<DashMap<String, DedupEntry>>,
}

static GLOBAL_REGISTRY: LazyLock<DedupRegistry> = LazyLock::new(DedupRegistry::new);

impl DedupRegistry {
    /// Creates an isolated registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide registry.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL_REGISTRY
    }

    /// Wraps `action` under `key`.
    pub fn wrap<A>(&self, key: impl Into<String>, action: A, options: DedupOptions) -> GuardedAction<A> {
        GuardedAction {
            registry: self.clone(),
            key: Arc::from(key.into()),
            action,
            options,
        }
    }

    /// Drops every key's state.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of keys with live state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sweep(Instant::now());
        self.entries.len()
    }

    /// Whether no key has live state.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops keys whose cooldown and window have lapsed.
    fn sweep(&self, now: Instant) {
        self.entries.retain(|_, entry| !entry.is_stale(now));
    }
}

impl Debug for DedupRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedupRegistry")
            .field("keys", &self.entries.len())
            .finish()
    }
}

/// Wraps `action` under `key` in the process-wide registry.
pub fn wrap<A>(key: impl Into<String>, action: A, options: DedupOptions) -> GuardedAction<A> {
    DedupRegistry::global().wrap(key, action, options)
}

/// An action guarded by cooldown and result sharing.
pub struct GuardedAction<A> {
    registry: DedupRegistry,
    key: Arc<str>,
    action: A,
    options: DedupOptions,
}

impl<A> Debug for GuardedAction<A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedAction")
            .field("key", &self.key)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

type ExecutionSender = oneshot::Sender<BoxFuture<'static, SharedValue>>;

enum Plan<T> {
    Join(InFlight),
    Reuse(T),
    Suppress,
    Run,
    RunShared(InFlight, ExecutionSender),
}

impl<A, Fut, T> GuardedAction<A>
where
    A: Fn() -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Returns the action key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Invokes the action subject to cooldown and sharing.
    pub async fn invoke(&self) -> Invocation<T> {
        match self.plan() {
            Plan::Suppress => {
                #[cfg(feature = "telemetry")]
                tracing::trace!(key = %self.key, "invocation suppressed by cooldown");
                Invocation::Suppressed
            }
            Plan::Reuse(value) => Invocation::Shared(value),
            Plan::Join(in_flight) => match downcast::<T>(&in_flight.await) {
                Some(value) => Invocation::Shared(value),
                None => Invocation::Executed((self.action)().await),
            },
            Plan::Run => Invocation::Executed((self.action)().await),
            Plan::RunShared(in_flight, execution) => {
                // No registry guard is held past `plan`.
                let _ = execution.send(
                    (self.action)()
                        .map(|value| Arc::new(value) as SharedValue)
                        .boxed(),
                );
                match downcast::<T>(&in_flight.await) {
                    Some(value) => Invocation::Executed(value),
                    None => Invocation::Executed((self.action)().await),
                }
            }
        }
    }

    fn plan(&self) -> Plan<T> {
        let now = Instant::now();
        let sharing = !self.options.dedup_window.is_zero();
        self.registry.sweep(now);
        let mut entry = self
            .registry
            .entries
            .entry(self.key.to_string())
            .or_default();

        if sharing {
            if let Some(in_flight) = &entry.in_flight {
                return Plan::Join(in_flight.clone());
            }
            if let Some((expires_at, value)) = &entry.settled
                && now < *expires_at
                && let Some(value) = downcast::<T>(value)
            {
                return Plan::Reuse(value);
            }
        }

        if entry.cooldown_until.is_some_and(|until| now < until) {
            return Plan::Suppress;
        }
        entry.cooldown_until = Some(now + self.options.cooldown);

        if !sharing {
            return Plan::Run;
        }
        let (sender, in_flight) = self.pending_execution();
        entry.in_flight = Some(in_flight.clone());
        entry.settled = None;
        Plan::RunShared(in_flight, sender)
    }

    /// An in-flight slot that runs whatever execution is sent into it.
    ///
    /// If the sender is dropped unused, joiners resolve to `()` and fall
    /// back to running the action themselves.
    fn pending_execution(&self) -> (ExecutionSender, InFlight) {
        let (sender, receiver) = oneshot::channel::<BoxFuture<'static, SharedValue>>();
        let entries = Arc::clone(&self.registry.entries);
        let key = Arc::clone(&self.key);
        let window = self.options.dedup_window;
        let in_flight = async move {
            let settled = match receiver.await {
                Ok(execution) => Some(execution.await),
                Err(_) => None,
            };
            if let Some(mut entry) = entries.get_mut(&*key) {
                entry.in_flight = None;
                entry.settled = settled
                    .as_ref()
                    .map(|value| (Instant::now() + window, Arc::clone(value)));
            }
            settled.unwrap_or_else(|| Arc::new(()))
        }
        .boxed()
        .shared();
        (sender, in_flight)
    }
}

fn downcast<T: Clone + 'static>(value: &SharedValue) -> Option<T> {
    value.downcast_ref::<T>().cloned()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering::SeqCst;

    use super::*;

    fn counting_action(
        calls: &Arc<AtomicUsize>,
        latency: Duration,
    ) -> impl Fn() -> BoxFuture<'static, usize> + use<> {
        let calls = Arc::clone(calls);
        move || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, SeqCst) + 1;
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                n
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_calls_inside_cooldown_execute_once() {
        let registry = DedupRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let pay = registry.wrap(
            "pay:article-1",
            counting_action(&calls, Duration::ZERO),
            DedupOptions::new(Duration::from_millis(200), Duration::ZERO),
        );

        let mut outcomes = Vec::new();
        for _ in 0..5 {
            outcomes.push(pay.invoke().await);
            tokio::time::advance(Duration::from_millis(10)).await;
        }

        assert_eq!(calls.load(SeqCst), 1);
        assert_eq!(outcomes[0], Invocation::Executed(1));
        assert!(outcomes[1..].iter().all(Invocation::is_suppressed));

        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(pay.invoke().await, Invocation::Executed(2));
    }

    #[tokio::test(start_paused = true)]
    async fn window_shares_in_flight_and_fresh_results() {
        let registry = DedupRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let quote = registry.wrap(
            "quote:article-1",
            counting_action(&calls, Duration::from_millis(50)),
            DedupOptions::new(Duration::ZERO, Duration::from_millis(100)),
        );

        let (a, b, c) = tokio::join!(quote.invoke(), quote.invoke(), quote.invoke());
        assert_eq!(a, Invocation::Executed(1));
        assert_eq!(b, Invocation::Shared(1));
        assert_eq!(c, Invocation::Shared(1));

        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(quote.invoke().await, Invocation::Shared(1));

        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(quote.invoke().await, Invocation::Executed(2));
        assert_eq!(calls.load(SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_window_never_shares() {
        let registry = DedupRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let sign = registry.wrap(
            "sign:article-1",
            counting_action(&calls, Duration::from_millis(5)),
            DedupOptions::new(Duration::ZERO, Duration::ZERO),
        );

        let (a, b) = tokio::join!(sign.invoke(), sign.invoke());
        assert!(matches!(a, Invocation::Executed(_)));
        assert!(matches!(b, Invocation::Executed(_)));
        assert_eq!(calls.load(SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_drops_cooldowns() {
        let registry = DedupRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let pay = registry.wrap(
            "pay:cart",
            counting_action(&calls, Duration::ZERO),
            DedupOptions::cooldown_only(Duration::from_secs(5)),
        );

        assert_eq!(pay.invoke().await, Invocation::Executed(1));
        assert!(pay.invoke().await.is_suppressed());
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(pay.invoke().await, Invocation::Executed(2));
    }

    #[tokio::test(start_paused = true)]
    async fn lapsed_keys_are_swept() {
        let registry = DedupRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = DedupOptions::new(Duration::from_millis(200), Duration::from_millis(300));
        let quote = registry.wrap("quote:a", counting_action(&calls, Duration::ZERO), options);
        let pay = registry.wrap(
            "pay:b",
            counting_action(&calls, Duration::ZERO),
            DedupOptions::cooldown_only(Duration::from_millis(200)),
        );

        assert_eq!(quote.invoke().await, Invocation::Executed(1));
        assert_eq!(pay.invoke().await, Invocation::Executed(2));
        assert_eq!(registry.len(), 2);

        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(registry.len(), 1, "shared result still inside its window");

        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(registry.len(), 0);
        assert!(registry.is_empty());
        assert_eq!(quote.invoke().await, Invocation::Executed(3));
    }

    #[tokio::test(start_paused = true)]
    async fn shared_action_may_use_its_registry() {
        let registry = DedupRegistry::new();
        let inner = registry.clone();
        let quote = registry.wrap(
            "quote:nested",
            move || {
                let keys = inner.len();
                async move { keys }.boxed()
            },
            DedupOptions::new(Duration::ZERO, Duration::from_millis(100)),
        );

        assert_eq!(quote.invoke().await, Invocation::Executed(1));
        assert_eq!(quote.invoke().await, Invocation::Shared(1));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let registry = DedupRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = DedupOptions::cooldown_only(Duration::from_secs(1));
        let first = registry.wrap("pay:a", counting_action(&calls, Duration::ZERO), options);
        let second = registry.wrap("pay:b", counting_action(&calls, Duration::ZERO), options);

        assert!(matches!(first.invoke().await, Invocation::Executed(_)));
        assert!(matches!(second.invoke().await, Invocation::Executed(_)));
        assert_eq!(calls.load(SeqCst), 2);
    }
}
