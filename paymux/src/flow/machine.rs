//! The x402 payment state machine.
//!
//! [`transition`] is a pure function from a [`FlowState`] and a [`FlowEvent`]
//! to the next state plus an optional [`Effect`] for the driver to perform.
//! Keeping it pure makes the connect-then-replay behavior testable without
//! wallets or servers:
//!
//! ```text
//! idle --request (no wallet)--> connecting_wallet [pending = intent]
//!      --wallet connected-----> requesting_quote | checking_status  (pending replayed)
//! requesting_quote --quote--> awaiting_signature --signed--> verifying
//! verifying --settled--> success
//! * --failed--> error
//! ```

use std::collections::BTreeMap;

use crate::error::PaymentError;
use crate::flow::transport::Endpoint;
use crate::proto::{CartItem, SubscriptionStatus};

/// Lifecycle position of a flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PaymentStatus {
    /// Nothing in progress.
    #[default]
    Idle,
    /// Waiting for the wallet to connect; an intent may be pending.
    ConnectingWallet,
    /// Asking the server for the subscription status.
    CheckingStatus,
    /// Waiting for the 402 quote.
    RequestingQuote,
    /// Waiting for the wallet signature.
    AwaitingSignature,
    /// Waiting for the server to verify and settle.
    Verifying,
    /// The last attempt succeeded.
    Success,
    /// The last attempt failed.
    Error,
}

impl PaymentStatus {
    /// Whether an attempt is running.
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(
            self,
            Self::ConnectingWallet
                | Self::CheckingStatus
                | Self::RequestingQuote
                | Self::AwaitingSignature
                | Self::Verifying
        )
    }
}

/// What is being bought.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentTarget {
    /// A single resource id.
    Resource(String),
    /// Cart lines, quoted as a server-side cart.
    Cart(Vec<CartItem>),
}

/// One payment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    /// What is being bought.
    pub target: PaymentTarget,
    /// Coupon code.
    pub coupon: Option<String>,
    /// Metadata forwarded in the payment payload.
    pub metadata: BTreeMap<String, String>,
}

impl PaymentRequest {
    /// Pays for a single resource.
    pub fn resource(id: impl Into<String>) -> Self {
        Self {
            target: PaymentTarget::Resource(id.into()),
            coupon: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Pays for a cart.
    #[must_use]
    pub fn cart(items: Vec<CartItem>) -> Self {
        Self {
            target: PaymentTarget::Cart(items),
            coupon: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Applies a coupon code.
    #[must_use]
    pub fn with_coupon(mut self, coupon: impl Into<String>) -> Self {
        self.coupon = Some(coupon.into());
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Work the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Pay for something.
    Pay(PaymentRequest),
    /// Check the subscription to a resource.
    CheckSubscription {
        /// Subscription resource id.
        resource: String,
    },
}

impl Intent {
    const fn running_status(&self) -> PaymentStatus {
        match self {
            Self::Pay(_) => PaymentStatus::RequestingQuote,
            Self::CheckSubscription { .. } => PaymentStatus::CheckingStatus,
        }
    }
}

/// Proof of a settled payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    /// On-chain transaction id, as reported by the server.
    pub transaction_id: String,
    /// Network the payment settled on.
    pub network: String,
    /// What was paid for.
    pub endpoint: Endpoint,
    /// Server metadata from the settlement.
    pub metadata: Option<serde_json::Value>,
}

/// Observable flow state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowState {
    /// Lifecycle position.
    pub status: PaymentStatus,
    /// Intent captured while the wallet connects.
    pub pending: Option<Intent>,
    /// Public key of the connected wallet.
    pub public_key: Option<String>,
    /// Receipt of the last successful payment.
    pub receipt: Option<PaymentReceipt>,
    /// Last known subscription status.
    pub subscription: Option<SubscriptionStatus>,
    /// Error of the last failed attempt.
    pub error: Option<PaymentError>,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    /// The user asked for something.
    Requested(Intent),
    /// The wallet reported a connection.
    WalletConnected {
        /// Account public key.
        public_key: String,
    },
    /// The wallet disconnected.
    WalletDisconnected,
    /// A quote was received and a requirement selected.
    QuoteReceived,
    /// The wallet signed the transaction.
    Signed,
    /// The server settled the payment.
    Settled(PaymentReceipt),
    /// The subscription lookup finished.
    SubscriptionResolved(SubscriptionStatus),
    /// The attempt failed.
    Failed(PaymentError),
    /// Back to idle, keeping the wallet connection.
    Reset,
}

/// Work the driver must perform after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Ask the wallet to connect.
    ConnectWallet,
    /// Run the intent now.
    Run(Intent),
}

/// Result of [`transition`].
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// The next state.
    pub state: FlowState,
    /// Work to perform, if any.
    pub effect: Option<Effect>,
}

impl Transition {
    const fn stay(state: FlowState) -> Self {
        Self {
            state,
            effect: None,
        }
    }
}

/// Computes the next state. Events that make no sense in the current state
/// leave it unchanged.
#[must_use]
pub fn transition(current: &FlowState, event: FlowEvent) -> Transition {
    let mut next = current.clone();
    match event {
        FlowEvent::Requested(intent) => {
            if current.status.is_busy() {
                return Transition::stay(next);
            }
            next.error = None;
            next.receipt = None;
            if current.public_key.is_none() {
                next.status = PaymentStatus::ConnectingWallet;
                next.pending = Some(intent);
                return Transition {
                    state: next,
                    effect: Some(Effect::ConnectWallet),
                };
            }
            next.status = intent.running_status();
            next.pending = None;
            Transition {
                state: next,
                effect: Some(Effect::Run(intent)),
            }
        }
        FlowEvent::WalletConnected { public_key } => {
            next.public_key = Some(public_key);
            if current.status != PaymentStatus::ConnectingWallet {
                return Transition::stay(next);
            }
            match next.pending.take() {
                Some(intent) => {
                    next.status = intent.running_status();
                    Transition {
                        state: next,
                        effect: Some(Effect::Run(intent)),
                    }
                }
                None => {
                    next.status = PaymentStatus::Idle;
                    Transition::stay(next)
                }
            }
        }
        FlowEvent::WalletDisconnected => Transition::stay(FlowState::default()),
        FlowEvent::QuoteReceived => {
            if current.status == PaymentStatus::RequestingQuote {
                next.status = PaymentStatus::AwaitingSignature;
            }
            Transition::stay(next)
        }
        FlowEvent::Signed => {
            if current.status == PaymentStatus::AwaitingSignature {
                next.status = PaymentStatus::Verifying;
            }
            Transition::stay(next)
        }
        FlowEvent::Settled(receipt) => {
            if current.status == PaymentStatus::Verifying {
                next.status = PaymentStatus::Success;
                next.receipt = Some(receipt);
            }
            Transition::stay(next)
        }
        FlowEvent::SubscriptionResolved(subscription) => {
            if current.status == PaymentStatus::CheckingStatus {
                next.status = if subscription.is_subscribed() {
                    PaymentStatus::Success
                } else {
                    PaymentStatus::Idle
                };
                next.subscription = Some(subscription);
            }
            Transition::stay(next)
        }
        FlowEvent::Failed(error) => {
            next.status = PaymentStatus::Error;
            next.pending = None;
            next.error = Some(error);
            Transition::stay(next)
        }
        FlowEvent::Reset => Transition::stay(FlowState {
            public_key: next.public_key,
            ..FlowState::default()
        }),
    }
}
