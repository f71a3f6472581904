//! The paywall server as seen by a payment flow.

use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use crate::error::{ErrorCode, PaymentError};
use crate::proto::{
    CartQuote, CartQuoteRequest, PaymentPayload, PaymentRequired, SettlementResponse,
    SubscriptionStatus,
};

/// What a quote or verification is for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// A single resource, by id.
    Resource(String),
    /// A server-side cart, by cart id.
    Cart(String),
}

impl Endpoint {
    /// Resource or cart id.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Resource(id) | Self::Cart(id) => id,
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(id) => write!(f, "resource:{id}"),
            Self::Cart(id) => write!(f, "cart:{id}"),
        }
    }
}

/// Transport failure, independent of the HTTP client in use.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request never got an answer.
    #[error("network error: {reason}")]
    Network {
        /// Underlying error text.
        reason: String,
    },
    /// The server answered with an unexpected status.
    #[error("unexpected HTTP status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// The server answered with an unparsable body or header.
    #[error("invalid response: {reason}")]
    InvalidResponse {
        /// What could not be parsed.
        reason: String,
    },
}

impl TransportError {
    /// Maps the error to a [`PaymentError`], using `fallback` for anything
    /// that is not a network failure.
    #[must_use]
    pub fn into_payment_error(self, fallback: ErrorCode) -> PaymentError {
        let code = match self {
            Self::Network { .. } => ErrorCode::Network,
            Self::Status { .. } | Self::InvalidResponse { .. } => fallback,
        };
        PaymentError::new(code, self.to_string())
    }
}

/// Paywall server operations used by [`PaymentFlow`](crate::flow::PaymentFlow).
pub trait PaywallTransport: Send + Sync {
    /// Requests a quote. The server must answer `402 Payment Required`.
    fn quote<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        coupon: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<PaymentRequired, TransportError>> + Send + 'a>>;

    /// Submits a signed payment and returns the settlement.
    fn verify<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        payload: &'a PaymentPayload,
    ) -> Pin<Box<dyn Future<Output = Result<SettlementResponse, TransportError>> + Send + 'a>>;

    /// Registers cart lines and returns the cart id to quote.
    fn create_cart<'a>(
        &'a self,
        request: &'a CartQuoteRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CartQuote, TransportError>> + Send + 'a>>;

    /// Looks up the subscription of `user_id` to `resource`.
    fn subscription_status<'a>(
        &'a self,
        resource: &'a str,
        user_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SubscriptionStatus, TransportError>> + Send + 'a>>;
}
