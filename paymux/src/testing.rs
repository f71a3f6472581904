//! Test doubles shared by the unit tests of this crate.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;

use crate::config::PaymentConfig;
use crate::flow::transport::{Endpoint, PaywallTransport, TransportError};
use crate::manager::{BoxError, BundleFactory, ManagerBundle};
use crate::proto::{
    CartQuote, CartQuoteRequest, PaymentPayload, PaymentRequired, PaymentRequirements,
    SettlementResponse, SubscriptionStatus, X402_VERSION,
};
use crate::scheme::{EXACT_SCHEME, SchemeClient, SchemeError};
use crate::wallet::{WalletAdapter, WalletError, WalletFactory, WalletReadyState};

pub fn config(server_url: &str) -> PaymentConfig {
    PaymentConfig::new(server_url)
}

#[derive(Debug, Default)]
pub struct Counters {
    pub created: AtomicUsize,
    pub disposed: AtomicUsize,
    failures_left: AtomicUsize,
}

#[derive(Debug)]
pub struct TestBundle {
    pub server_url: String,
    counters: Arc<Counters>,
}

impl ManagerBundle for TestBundle {
    fn dispose(&self) {
        self.counters.disposed.fetch_add(1, SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct CountingFactory {
    counters: Arc<Counters>,
    delay: Option<Duration>,
}

impl CountingFactory {
    pub fn with_delay(delay: Duration) -> Self {
        Self::default().delayed(delay)
    }

    pub fn failing(times: usize) -> Self {
        let factory = Self::default();
        factory.counters.failures_left.store(times, SeqCst);
        factory
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }
}

impl BundleFactory for CountingFactory {
    type Bundle = TestBundle;

    fn create(
        &self,
        config: &PaymentConfig,
    ) -> Pin<Box<dyn Future<Output = Result<TestBundle, BoxError>> + Send + 'static>> {
        let counters = Arc::clone(&self.counters);
        let delay = self.delay;
        let server_url = config.server_url.clone();
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let failing = counters
                .failures_left
                .fetch_update(SeqCst, SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err("rpc unreachable".into());
            }
            counters.created.fetch_add(1, SeqCst);
            Ok(TestBundle {
                server_url,
                counters,
            })
        })
    }
}

/// Builds a fresh [`ScriptedWallet`] per call and remembers what it built.
#[derive(Debug)]
pub struct ScriptedFactory {
    key: String,
    connected: bool,
    ready_state: WalletReadyState,
    built: Mutex<Vec<Weak<ScriptedWallet>>>,
}

impl ScriptedFactory {
    fn new(key: &str, connected: bool) -> Self {
        Self {
            key: key.to_owned(),
            connected,
            ready_state: WalletReadyState::Installed,
            built: Mutex::new(Vec::new()),
        }
    }

    pub fn connected(key: &str) -> Arc<Self> {
        Arc::new(Self::new(key, true))
    }

    pub fn disconnected(key: &str) -> Arc<Self> {
        Arc::new(Self::new(key, false))
    }

    pub fn undetected(key: &str) -> Arc<Self> {
        let mut factory = Self::new(key, false);
        factory.ready_state = WalletReadyState::NotDetected;
        Arc::new(factory)
    }

    /// Adapters built so far that are still alive.
    pub fn built(&self) -> Vec<Arc<ScriptedWallet>> {
        self.built
            .lock()
            .unwrap()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

impl WalletFactory for ScriptedFactory {
    fn create(&self) -> Arc<dyn WalletAdapter> {
        let wallet = Arc::new(
            ScriptedWallet::new(&self.key, self.connected).with_ready_state(self.ready_state),
        );
        self.built.lock().unwrap().push(Arc::downgrade(&wallet));
        wallet
    }
}

/// A wallet whose answers are fixed up front.
#[derive(Debug)]
pub struct ScriptedWallet {
    key: String,
    ready_state: WalletReadyState,
    connected: Mutex<bool>,
    reject_connect: bool,
    reject_sign: bool,
    connect_delay: Option<Duration>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    signs: AtomicUsize,
}

impl ScriptedWallet {
    fn new(key: &str, connected: bool) -> Self {
        Self {
            key: key.to_owned(),
            ready_state: WalletReadyState::Installed,
            connected: Mutex::new(connected),
            reject_connect: false,
            reject_sign: false,
            connect_delay: None,
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            signs: AtomicUsize::new(0),
        }
    }

    pub fn connected(key: &str) -> Self {
        Self::new(key, true)
    }

    pub fn disconnected(key: &str) -> Self {
        Self::new(key, false)
    }

    pub fn with_ready_state(mut self, state: WalletReadyState) -> Self {
        self.ready_state = state;
        self
    }

    pub fn reject_connect(mut self) -> Self {
        self.reject_connect = true;
        self
    }

    pub fn reject_sign(mut self) -> Self {
        self.reject_sign = true;
        self
    }

    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(SeqCst)
    }

    pub fn signs(&self) -> usize {
        self.signs.load(SeqCst)
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }
}

impl WalletAdapter for ScriptedWallet {
    fn name(&self) -> &str {
        "scripted"
    }

    fn ready_state(&self) -> WalletReadyState {
        self.ready_state
    }

    fn public_key(&self) -> Option<String> {
        self.is_connected().then(|| self.key.clone())
    }

    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<String, WalletError>> + Send + '_>> {
        Box::pin(async move {
            self.connects.fetch_add(1, SeqCst);
            if let Some(delay) = self.connect_delay {
                tokio::time::sleep(delay).await;
            }
            if self.reject_connect {
                return Err(WalletError::Rejected {
                    reason: "User rejected the request.".to_owned(),
                });
            }
            *self.connected.lock().unwrap() = true;
            Ok(self.key.clone())
        })
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), WalletError>> + Send + '_>> {
        Box::pin(async move {
            let mut connected = self.connected.lock().unwrap();
            if *connected {
                *connected = false;
                self.disconnects.fetch_add(1, SeqCst);
            }
            Ok(())
        })
    }

    fn sign_transaction(
        &self,
        transaction: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, WalletError>> + Send + '_>> {
        Box::pin(async move {
            if !self.is_connected() {
                return Err(WalletError::NotConnected);
            }
            if self.reject_sign {
                return Err(WalletError::Rejected {
                    reason: "User rejected the request.".to_owned(),
                });
            }
            self.signs.fetch_add(1, SeqCst);
            let mut signed = transaction;
            signed.extend_from_slice(b":signed");
            Ok(signed)
        })
    }
}

/// An `exact` scheme client that signs an opaque byte string.
#[derive(Debug)]
pub struct StubScheme {
    network: String,
}

impl StubScheme {
    pub fn new(network: &str) -> Self {
        Self {
            network: network.to_owned(),
        }
    }
}

impl SchemeClient for StubScheme {
    fn scheme(&self) -> &str {
        EXACT_SCHEME
    }

    fn network(&self) -> &str {
        &self.network
    }

    fn sign<'a>(
        &'a self,
        requirements: &'a PaymentRequirements,
        wallet: &'a dyn WalletAdapter,
    ) -> Pin<Box<dyn Future<Output = Result<String, SchemeError>> + Send + 'a>> {
        Box::pin(async move {
            let unsigned = format!("{}->{}", requirements.max_amount_required, requirements.pay_to);
            let signed = wallet.sign_transaction(unsigned.into_bytes()).await?;
            Ok(BASE64_STANDARD.encode(signed))
        })
    }
}

pub fn requirement(network: &str, amount: &str) -> PaymentRequirements {
    PaymentRequirements {
        scheme: EXACT_SCHEME.to_owned(),
        network: network.to_owned(),
        max_amount_required: amount.to_owned(),
        resource: "article-1".to_owned(),
        description: "Premium article".to_owned(),
        mime_type: "text/html".to_owned(),
        pay_to: "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin".to_owned(),
        max_timeout_seconds: 300,
        asset: "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU".to_owned(),
        extra: None,
    }
}

/// An in-memory paywall server.
#[derive(Debug)]
pub struct MockTransport {
    quote: Result<PaymentRequired, TransportError>,
    settlement: Result<SettlementResponse, TransportError>,
    subscription: Result<SubscriptionStatus, TransportError>,
    quote_delay: Option<Duration>,
    pub quotes: AtomicUsize,
    pub verifies: AtomicUsize,
    pub carts: AtomicUsize,
    last_coupon: Mutex<Option<String>>,
    last_payload: Mutex<Option<PaymentPayload>>,
    last_subscription_query: Mutex<Option<(String, String)>>,
}

impl MockTransport {
    /// Quotes one requirement on `network` and settles with `tx_hash`.
    pub fn paying(network: &str, amount: &str, tx_hash: &str) -> Self {
        Self {
            quote: Ok(PaymentRequired {
                x402_version: X402_VERSION,
                error: Some("Payment required".to_owned()),
                accepts: vec![requirement(network, amount)],
            }),
            settlement: Ok(SettlementResponse {
                success: true,
                error: None,
                tx_hash: Some(tx_hash.to_owned()),
                network_id: Some(network.to_owned()),
                metadata: None,
            }),
            subscription: Ok(SubscriptionStatus {
                active: false,
                status: "none".to_owned(),
                expires_at: None,
                interval: None,
            }),
            quote_delay: None,
            quotes: AtomicUsize::new(0),
            verifies: AtomicUsize::new(0),
            carts: AtomicUsize::new(0),
            last_coupon: Mutex::new(None),
            last_payload: Mutex::new(None),
            last_subscription_query: Mutex::new(None),
        }
    }

    pub fn with_settlement(mut self, settlement: Result<SettlementResponse, TransportError>) -> Self {
        self.settlement = settlement;
        self
    }

    pub fn with_subscription(
        mut self,
        subscription: Result<SubscriptionStatus, TransportError>,
    ) -> Self {
        self.subscription = subscription;
        self
    }

    pub fn with_quote_delay(mut self, delay: Duration) -> Self {
        self.quote_delay = Some(delay);
        self
    }

    pub fn last_coupon(&self) -> Option<String> {
        self.last_coupon.lock().unwrap().clone()
    }

    pub fn last_payload(&self) -> Option<PaymentPayload> {
        self.last_payload.lock().unwrap().clone()
    }

    pub fn last_subscription_query(&self) -> Option<(String, String)> {
        self.last_subscription_query.lock().unwrap().clone()
    }
}

impl PaywallTransport for MockTransport {
    fn quote<'a>(
        &'a self,
        _endpoint: &'a Endpoint,
        coupon: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<PaymentRequired, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            self.quotes.fetch_add(1, SeqCst);
            *self.last_coupon.lock().unwrap() = coupon.map(str::to_owned);
            if let Some(delay) = self.quote_delay {
                tokio::time::sleep(delay).await;
            }
            self.quote.clone()
        })
    }

    fn verify<'a>(
        &'a self,
        _endpoint: &'a Endpoint,
        payload: &'a PaymentPayload,
    ) -> Pin<Box<dyn Future<Output = Result<SettlementResponse, TransportError>> + Send + 'a>>
    {
        Box::pin(async move {
            self.verifies.fetch_add(1, SeqCst);
            *self.last_payload.lock().unwrap() = Some(payload.clone());
            self.settlement.clone()
        })
    }

    fn create_cart<'a>(
        &'a self,
        _request: &'a CartQuoteRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CartQuote, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let n = self.carts.fetch_add(1, SeqCst) + 1;
            Ok(CartQuote {
                cart_id: format!("cart-{n}"),
                expires_at: None,
            })
        })
    }

    fn subscription_status<'a>(
        &'a self,
        resource: &'a str,
        user_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SubscriptionStatus, TransportError>> + Send + 'a>>
    {
        Box::pin(async move {
            *self.last_subscription_query.lock().unwrap() =
                Some((resource.to_owned(), user_id.to_owned()));
            self.subscription.clone()
        })
    }
}
