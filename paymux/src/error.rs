//! Payment error taxonomy.
//!
//! Every failure that reaches a payment flow is resolved to a [`PaymentError`]:
//! a stable [`ErrorCode`] plus a human-readable message. Codes are grouped
//! into [`ErrorCategory`] values so presentation code can decide how to
//! surface them, and each code maps to a localization key.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Broad class of a payment failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The application was configured incorrectly.
    Configuration,
    /// The user declined a prompt (wallet connection or signature).
    UserDeclined,
    /// The server or wallet answered with something the protocol does not allow.
    Protocol,
    /// Network or RPC failure; the user may try again.
    Transient,
    /// The flow was driven out of order (e.g. a second concurrent attempt).
    State,
}

/// Stable, serializable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Configuration is missing or malformed.
    InvalidConfiguration,
    /// No wallet adapter is installed or loadable.
    WalletNotInstalled,
    /// The wallet is not connected or exposes no public key.
    WalletNotConnected,
    /// The user rejected the wallet connection or the signature request.
    UserDeclined,
    /// None of the offered payment requirements is supported.
    UnsupportedScheme,
    /// The quote response was not a valid 402 payment-required document.
    InvalidPaymentRequired,
    /// The payment transaction could not be built or signed.
    SigningFailed,
    /// The server refused the signed payment.
    PaymentRejected,
    /// The verify response carried no usable settlement.
    InvalidSettlement,
    /// The subscription status endpoint answered with an error.
    SubscriptionCheckFailed,
    /// A transport-level failure occurred.
    Network,
    /// Another attempt is already running on this flow.
    AttemptInProgress,
}

impl ErrorCode {
    /// Returns the snake-case wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidConfiguration => "invalid_configuration",
            Self::WalletNotInstalled => "wallet_not_installed",
            Self::WalletNotConnected => "wallet_not_connected",
            Self::UserDeclined => "user_declined",
            Self::UnsupportedScheme => "unsupported_scheme",
            Self::InvalidPaymentRequired => "invalid_payment_required",
            Self::SigningFailed => "signing_failed",
            Self::PaymentRejected => "payment_rejected",
            Self::InvalidSettlement => "invalid_settlement",
            Self::SubscriptionCheckFailed => "subscription_check_failed",
            Self::Network => "network",
            Self::AttemptInProgress => "attempt_in_progress",
        }
    }

    /// Returns the category this code belongs to.
    #[must_use]
    pub const fn category(self) -> ErrorCategory {
        match self {
            Self::InvalidConfiguration | Self::WalletNotInstalled => ErrorCategory::Configuration,
            Self::UserDeclined => ErrorCategory::UserDeclined,
            Self::UnsupportedScheme
            | Self::InvalidPaymentRequired
            | Self::SigningFailed
            | Self::PaymentRejected
            | Self::InvalidSettlement
            | Self::SubscriptionCheckFailed => ErrorCategory::Protocol,
            Self::Network => ErrorCategory::Transient,
            Self::WalletNotConnected | Self::AttemptInProgress => ErrorCategory::State,
        }
    }

    /// Returns the key under which translated messages are looked up.
    #[must_use]
    pub fn localization_key(self) -> String {
        format!("payment.errors.{}", self.as_str())
    }

    /// Whether a user can reasonably retry after this error.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::UserDeclined
        )
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal error of a payment flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct PaymentError {
    /// Stable code.
    pub code: ErrorCode,
    /// Developer-facing description.
    pub message: String,
}

impl PaymentError {
    /// Creates a new error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Shorthand for [`ErrorCategory`] of the code.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_as_snake_case() {
        let json = serde_json::to_string(&ErrorCode::UserDeclined).unwrap();
        assert_eq!(json, "\"user_declined\"");
        let parsed: ErrorCode = serde_json::from_str("\"attempt_in_progress\"").unwrap();
        assert_eq!(parsed, ErrorCode::AttemptInProgress);
    }

    #[test]
    fn as_str_matches_serde() {
        for code in [
            ErrorCode::InvalidConfiguration,
            ErrorCode::WalletNotInstalled,
            ErrorCode::UnsupportedScheme,
            ErrorCode::InvalidSettlement,
            ErrorCode::Network,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json.trim_matches('"'), code.as_str());
        }
    }

    #[test]
    fn categories_and_keys() {
        assert_eq!(
            ErrorCode::UserDeclined.category(),
            ErrorCategory::UserDeclined
        );
        assert_eq!(ErrorCode::Network.category(), ErrorCategory::Transient);
        assert_eq!(
            ErrorCode::UnsupportedScheme.category(),
            ErrorCategory::Protocol
        );
        assert_eq!(
            ErrorCode::PaymentRejected.localization_key(),
            "payment.errors.payment_rejected"
        );
        assert!(ErrorCode::Network.is_retryable());
        assert!(!ErrorCode::InvalidConfiguration.is_retryable());
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = PaymentError::new(ErrorCode::SigningFailed, "bad mint");
        assert_eq!(err.to_string(), "signing_failed: bad mint");
    }
}
