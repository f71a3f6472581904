//! The async driver around the payment state machine.

use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::capability::{Capability, CapabilityProbe};
use crate::error::{ErrorCode, PaymentError};
use crate::flow::machine::{
    Effect, FlowEvent, FlowState, Intent, PaymentReceipt, PaymentRequest, PaymentTarget,
    Transition, transition,
};
use crate::flow::transport::{Endpoint, PaywallTransport, TransportError};
use crate::proto::{CartQuoteRequest, ExactPayload, PaymentPayload, SubscriptionStatus, X402_VERSION};
use crate::scheme::{FirstMatch, PaymentSelector, SchemeClient, candidates};
use crate::wallet::WalletAdapter;

/// Metadata key under which the coupon code travels in the payment payload.
pub const COUPON_METADATA_KEY: &str = "couponCode";

/// One payment widget's flow: wallet connection, quote, signature and
/// verification against a paywall server.
///
/// At most one attempt runs at a time; a second [`pay`](Self::pay) while one
/// is running fails with [`ErrorCode::AttemptInProgress`]. Every attempt
/// builds and signs a fresh transaction; nothing signed is ever resent.
///
/// State is published through a [`watch`] channel. After
/// [`unmount`](Self::unmount) in-flight calls run to completion but no longer
/// publish. After [`disconnect_wallet`](Self::disconnect_wallet) the attempt
/// that was running no longer touches the state at all.
pub struct PaymentFlow {
    transport: Arc<dyn PaywallTransport>,
    wallet: Arc<dyn WalletAdapter>,
    schemes: Vec<Arc<dyn SchemeClient>>,
    selector: Box<dyn PaymentSelector>,
    probe: Option<Arc<dyn CapabilityProbe>>,
    auto_check_subscription: bool,
    machine: Mutex<FlowState>,
    state: watch::Sender<FlowState>,
    alive: AtomicBool,
    epoch: AtomicU64,
    attempt: tokio::sync::Mutex<()>,
}

impl Debug for PaymentFlow {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentFlow")
            .field("wallet", &self.wallet.name())
            .field("schemes", &self.schemes.len())
            .field("alive", &self.alive.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl PaymentFlow {
    /// Creates a mounted, idle flow with no scheme clients.
    pub fn new(transport: Arc<dyn PaywallTransport>, wallet: Arc<dyn WalletAdapter>) -> Self {
        let (state, _) = watch::channel(FlowState::default());
        Self {
            transport,
            wallet,
            schemes: Vec::new(),
            selector: Box::new(FirstMatch),
            probe: None,
            auto_check_subscription: false,
            machine: Mutex::new(FlowState::default()),
            state,
            alive: AtomicBool::new(true),
            epoch: AtomicU64::new(0),
            attempt: tokio::sync::Mutex::new(()),
        }
    }

    /// Registers a scheme client. Clients are tried in registration order.
    #[must_use]
    pub fn with_scheme(mut self, client: Arc<dyn SchemeClient>) -> Self {
        self.schemes.push(client);
        self
    }

    /// Replaces the default [`FirstMatch`] selection policy.
    #[must_use]
    pub fn with_selector(mut self, selector: impl PaymentSelector + 'static) -> Self {
        self.selector = Box::new(selector);
        self
    }

    /// Probes wallet availability before connecting.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn CapabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Checks the subscription on [`mount`](Self::mount) when a wallet is
    /// already connected.
    #[must_use]
    pub const fn with_auto_check_subscription(mut self, enabled: bool) -> Self {
        self.auto_check_subscription = enabled;
        self
    }

    /// Subscribes to state updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<FlowState> {
        self.state.subscribe()
    }

    /// Last published state.
    #[must_use]
    pub fn state(&self) -> FlowState {
        self.state.borrow().clone()
    }

    /// Whether state updates are published.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Public key the flow considers connected.
    #[must_use]
    pub fn public_key(&self) -> Option<String> {
        self.lock_machine().public_key.clone()
    }

    /// Marks the flow mounted and, with auto-check enabled and a wallet
    /// already connected, checks the subscription to `resource`.
    ///
    /// The current state is published first, so a remount shows whatever
    /// happened while unmounted.
    pub async fn mount(&self, resource: &str) -> Option<Result<SubscriptionStatus, PaymentError>> {
        {
            let machine = self.lock_machine();
            self.alive.store(true, Ordering::SeqCst);
            self.state.send_replace(machine.clone());
        }
        let epoch = self.epoch.load(Ordering::SeqCst);
        if self.public_key().is_none()
            && let Some(public_key) = self.wallet.public_key()
        {
            self.dispatch(epoch, FlowEvent::WalletConnected { public_key });
        }
        if !self.auto_check_subscription || self.public_key().is_none() {
            return None;
        }
        Some(self.check_subscription(resource).await)
    }

    /// Stops publishing state. In-flight calls are not aborted.
    pub fn unmount(&self) {
        self.alive.store(false, Ordering::SeqCst);
        #[cfg(feature = "telemetry")]
        tracing::debug!(wallet = self.wallet.name(), "payment flow unmounted");
    }

    /// Connects the wallet outside of a payment.
    pub async fn connect_wallet(&self) -> Result<String, PaymentError> {
        let Ok(_attempt) = self.attempt.try_lock() else {
            return Err(attempt_in_progress());
        };
        let epoch = self.epoch.load(Ordering::SeqCst);
        let public_key = self.wallet.connect().await?;
        self.dispatch(
            epoch,
            FlowEvent::WalletConnected {
                public_key: public_key.clone(),
            },
        );
        Ok(public_key)
    }

    /// Disconnects the wallet and returns the flow to idle. An attempt that
    /// is still running keeps going but can no longer change the state.
    pub async fn disconnect_wallet(&self) -> Result<(), PaymentError> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self.wallet.disconnect().await;
        self.dispatch(epoch, FlowEvent::WalletDisconnected);
        result.map_err(PaymentError::from)
    }

    /// Returns the flow to idle, clearing the last error or receipt.
    pub fn reset(&self) {
        let epoch = self.epoch.load(Ordering::SeqCst);
        self.dispatch(epoch, FlowEvent::Reset);
    }

    /// Runs one payment attempt to completion.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "paymux.flow.pay", skip_all, err, fields(wallet = self.wallet.name()))
    )]
    pub async fn pay(&self, request: PaymentRequest) -> Result<PaymentReceipt, PaymentError> {
        let Ok(_attempt) = self.attempt.try_lock() else {
            return Err(attempt_in_progress());
        };
        let epoch = self.begin(Intent::Pay(request.clone())).await?;
        let result = self.execute_payment(epoch, &request).await;
        match &result {
            Ok(receipt) => {
                #[cfg(feature = "telemetry")]
                tracing::info!(
                    tx = %receipt.transaction_id,
                    network = %receipt.network,
                    endpoint = %receipt.endpoint,
                    "payment settled"
                );
                self.dispatch(epoch, FlowEvent::Settled(receipt.clone()));
            }
            Err(err) => self.fail(epoch, err.clone()),
        }
        result
    }

    /// Checks whether the connected wallet holds a subscription to
    /// `resource`, connecting first if needed.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "paymux.flow.check_subscription", skip(self), err)
    )]
    pub async fn check_subscription(&self, resource: &str) -> Result<SubscriptionStatus, PaymentError> {
        let Ok(_attempt) = self.attempt.try_lock() else {
            return Err(attempt_in_progress());
        };
        let epoch = self
            .begin(Intent::CheckSubscription {
                resource: resource.to_owned(),
            })
            .await?;
        let result = self.execute_check(resource).await;
        match &result {
            Ok(status) => {
                self.dispatch(epoch, FlowEvent::SubscriptionResolved(status.clone()));
            }
            Err(err) => self.fail(epoch, err.clone()),
        }
        result
    }

    /// Enters the intent into the machine, connecting the wallet first when
    /// needed. Returns the epoch the attempt runs under.
    async fn begin(&self, intent: Intent) -> Result<u64, PaymentError> {
        let epoch = self.epoch.load(Ordering::SeqCst);

        if self.public_key().is_none()
            && let Some(probe) = &self.probe
            && let Capability::Unavailable { reason } = probe.probe()
        {
            let err = PaymentError::new(ErrorCode::WalletNotInstalled, reason);
            self.fail(epoch, err.clone());
            return Err(err);
        }

        match self.dispatch(epoch, FlowEvent::Requested(intent)) {
            Some(Effect::Run(_)) => Ok(epoch),
            Some(Effect::ConnectWallet) => {
                #[cfg(feature = "telemetry")]
                tracing::debug!(wallet = self.wallet.name(), "connecting wallet before attempt");
                let public_key = match self.wallet.connect().await {
                    Ok(key) => key,
                    Err(err) => {
                        let err = PaymentError::from(err);
                        self.fail(epoch, err.clone());
                        return Err(err);
                    }
                };
                match self.dispatch(epoch, FlowEvent::WalletConnected { public_key }) {
                    Some(Effect::Run(_)) => Ok(epoch),
                    _ => Err(PaymentError::new(
                        ErrorCode::WalletNotConnected,
                        "wallet disconnected while connecting",
                    )),
                }
            }
            None => Err(attempt_in_progress()),
        }
    }

    async fn execute_payment(
        &self,
        epoch: u64,
        request: &PaymentRequest,
    ) -> Result<PaymentReceipt, PaymentError> {
        let endpoint = match &request.target {
            PaymentTarget::Resource(id) => Endpoint::Resource(id.clone()),
            PaymentTarget::Cart(items) => {
                let cart = CartQuoteRequest {
                    items: items.clone(),
                    coupon_code: request.coupon.clone(),
                    metadata: request.metadata.clone(),
                };
                let quote = self
                    .transport
                    .create_cart(&cart)
                    .await
                    .map_err(|e| e.into_payment_error(ErrorCode::InvalidPaymentRequired))?;
                Endpoint::Cart(quote.cart_id)
            }
        };

        let required = self
            .transport
            .quote(&endpoint, request.coupon.as_deref())
            .await
            .map_err(|e| e.into_payment_error(ErrorCode::InvalidPaymentRequired))?;
        if required.accepts.is_empty() {
            return Err(PaymentError::new(
                ErrorCode::InvalidPaymentRequired,
                required
                    .error
                    .unwrap_or_else(|| "quote offered no payment requirements".to_owned()),
            ));
        }

        let found = candidates(&required.accepts, &self.schemes);
        let Some(chosen) = self.selector.select(&found) else {
            let offered: Vec<String> = required
                .accepts
                .iter()
                .map(|r| format!("{}/{}", r.scheme, r.network))
                .collect();
            return Err(PaymentError::new(
                ErrorCode::UnsupportedScheme,
                format!("no supported payment requirement among [{}]", offered.join(", ")),
            ));
        };
        #[cfg(feature = "telemetry")]
        tracing::debug!(candidate = ?chosen, %endpoint, "payment requirement selected");
        self.dispatch(epoch, FlowEvent::QuoteReceived);

        let transaction = chosen
            .client
            .sign(chosen.requirements, self.wallet.as_ref())
            .await?;
        self.dispatch(epoch, FlowEvent::Signed);

        let mut metadata = request.metadata.clone();
        if let Some(coupon) = &request.coupon {
            metadata.insert(COUPON_METADATA_KEY.to_owned(), coupon.clone());
        }
        let payload = PaymentPayload {
            x402_version: X402_VERSION,
            scheme: chosen.requirements.scheme.clone(),
            network: chosen.requirements.network.clone(),
            payload: ExactPayload {
                transaction,
                metadata,
            },
        };

        let settlement = self
            .transport
            .verify(&endpoint, &payload)
            .await
            .map_err(verify_error)?;
        if !settlement.success {
            return Err(PaymentError::new(
                ErrorCode::PaymentRejected,
                settlement
                    .error
                    .unwrap_or_else(|| "payment was not settled".to_owned()),
            ));
        }
        let Some(transaction_id) = settlement.tx_hash.filter(|hash| !hash.is_empty()) else {
            return Err(PaymentError::new(
                ErrorCode::InvalidSettlement,
                "settlement carries no transaction hash",
            ));
        };
        Ok(PaymentReceipt {
            transaction_id,
            network: settlement
                .network_id
                .unwrap_or_else(|| payload.network.clone()),
            endpoint,
            metadata: settlement.metadata,
        })
    }

    async fn execute_check(&self, resource: &str) -> Result<SubscriptionStatus, PaymentError> {
        let user_id = self
            .public_key()
            .ok_or_else(|| PaymentError::new(ErrorCode::WalletNotConnected, "no public key"))?;
        self.transport
            .subscription_status(resource, &user_id)
            .await
            .map_err(|e| e.into_payment_error(ErrorCode::SubscriptionCheckFailed))
    }

    fn fail(&self, epoch: u64, err: PaymentError) {
        #[cfg(feature = "telemetry")]
        tracing::warn!(code = %err.code, message = %err.message, "payment attempt failed");
        self.dispatch(epoch, FlowEvent::Failed(err));
    }

    /// Feeds an event to the machine. Events from a superseded epoch are
    /// dropped; state is only published while mounted.
    fn dispatch(&self, epoch: u64, event: FlowEvent) -> Option<Effect> {
        let mut machine = self.lock_machine();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            #[cfg(feature = "telemetry")]
            tracing::debug!(?event, "dropping event from superseded attempt");
            return None;
        }
        let Transition { state, effect } = transition(&machine, event);
        #[cfg(feature = "telemetry")]
        if state.status != machine.status {
            tracing::debug!(from = ?machine.status, to = ?state.status, "payment flow transition");
        }
        *machine = state.clone();
        if self.alive.load(Ordering::SeqCst) {
            self.state.send_replace(state);
        }
        effect
    }

    fn lock_machine(&self) -> std::sync::MutexGuard<'_, FlowState> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn attempt_in_progress() -> PaymentError {
    PaymentError::new(
        ErrorCode::AttemptInProgress,
        "a payment attempt is already running",
    )
}

fn verify_error(err: TransportError) -> PaymentError {
    let code = match &err {
        TransportError::Network { .. } => ErrorCode::Network,
        TransportError::Status { .. } => ErrorCode::PaymentRejected,
        TransportError::InvalidResponse { .. } => ErrorCode::InvalidSettlement,
    };
    PaymentError::new(code, err.to_string())
}
