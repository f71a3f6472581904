//! Card rail: checkout sessions created by the paywall server.

use std::sync::Arc;

use paymux::error::{ErrorCode, PaymentError};
use paymux::proto::{CardSession, CardSessionRequest};

use crate::paywall::{PaywallClient, PaywallClientError};

/// Errors from [`StripeManager`].
#[derive(Debug, thiserror::Error)]
pub enum CardSessionError {
    /// A single-resource session was requested without a resource id.
    #[error("card session requires a resource id")]
    MissingResource,
    /// A cart session was requested without line items.
    #[error("card session requires at least one cart item")]
    EmptyCart,
    /// The server call failed.
    #[error(transparent)]
    Paywall(#[from] PaywallClientError),
}

impl From<CardSessionError> for PaymentError {
    fn from(err: CardSessionError) -> Self {
        let code = match &err {
            CardSessionError::MissingResource | CardSessionError::EmptyCart => {
                ErrorCode::InvalidConfiguration
            }
            CardSessionError::Paywall(PaywallClientError::Http { .. }) => ErrorCode::Network,
            CardSessionError::Paywall(_) => ErrorCode::PaymentRejected,
        };
        Self::new(code, err.to_string())
    }
}

/// Card payment manager for one publishable key.
///
/// Session creation happens server side; the manager only carries the key
/// a checkout redirect needs and the paywall client that creates sessions.
#[derive(Debug)]
pub struct StripeManager {
    publishable_key: String,
    paywall: Arc<PaywallClient>,
}

impl StripeManager {
    /// Creates a manager for `publishable_key`.
    #[must_use]
    pub fn new(publishable_key: impl Into<String>, paywall: Arc<PaywallClient>) -> Self {
        Self {
            publishable_key: publishable_key.into(),
            paywall,
        }
    }

    /// The `pk_...` key.
    #[must_use]
    pub fn publishable_key(&self) -> &str {
        &self.publishable_key
    }

    /// Whether the key belongs to Stripe test mode.
    #[must_use]
    pub fn is_test_mode(&self) -> bool {
        self.publishable_key.starts_with("pk_test_")
    }

    /// Creates a checkout session for `request.resource`.
    ///
    /// # Errors
    ///
    /// Returns [`CardSessionError::MissingResource`] for an empty resource id
    /// and [`CardSessionError::Paywall`] if the server call fails.
    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(name = "paymux.card.session", skip_all, fields(resource = %request.resource), err)
    )]
    pub async fn create_session(
        &self,
        request: &CardSessionRequest,
    ) -> Result<CardSession, CardSessionError> {
        if request.resource.trim().is_empty() {
            return Err(CardSessionError::MissingResource);
        }
        Ok(self.paywall.create_card_session(request).await?)
    }

    /// Creates a checkout session for `request.items`.
    ///
    /// # Errors
    ///
    /// Returns [`CardSessionError::EmptyCart`] without items and
    /// [`CardSessionError::Paywall`] if the server call fails.
    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(name = "paymux.card.cart_session", skip_all, fields(items = request.items.len()), err)
    )]
    pub async fn create_cart_session(
        &self,
        request: &CardSessionRequest,
    ) -> Result<CardSession, CardSessionError> {
        if request.items.is_empty() {
            return Err(CardSessionError::EmptyCart);
        }
        Ok(self.paywall.create_cart_card_session(request).await?)
    }
}
