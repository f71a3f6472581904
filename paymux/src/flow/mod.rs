//! x402 payment flow: connect, quote, sign, verify.
//!
//! [`machine`] holds the pure state machine, [`transport`] the paywall
//! server abstraction and [`session`] the async [`PaymentFlow`] that drives
//! one against the other.

pub mod machine;
pub mod session;
pub mod transport;

pub use machine::{
    Effect, FlowEvent, FlowState, Intent, PaymentReceipt, PaymentRequest, PaymentStatus,
    PaymentTarget, Transition, transition,
};
pub use session::{COUPON_METADATA_KEY, PaymentFlow};
pub use transport::{Endpoint, PaywallTransport, TransportError};
