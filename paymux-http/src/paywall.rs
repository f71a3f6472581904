//! A [`PaywallTransport`] that talks to a paywall server over HTTP.
//!
//! [`PaywallClient`] covers every `paywall/v1` endpoint a payment widget
//! uses:
//!
//! - `GET paywall/v1/{resource}` and `GET paywall/v1/cart/{cart}` for quotes,
//!   answered with `402 Payment Required`
//! - `POST .../verify` with an `X-PAYMENT` header for settlement
//! - `POST paywall/v1/cart/quote` to register cart lines
//! - `GET paywall/v1/subscription/status` for subscription lookups
//! - `POST paywall/v1/stripe-session` and `POST paywall/v1/cart/stripe-session`
//!   for card checkout sessions
//!
//! ## Error Handling
//!
//! [`PaywallClientError`] keeps the failing request as a `context` string
//! and separates URL construction, transport failures, body decoding,
//! header decoding and unexpected statuses.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use http::{HeaderMap, StatusCode};
use paymux::flow::{Endpoint, PaywallTransport, TransportError};
use paymux::proto::{
    CardSession, CardSessionRequest, CartQuote, CartQuoteRequest, PaymentPayload,
    PaymentRequired, SettlementResponse, SubscriptionStatus,
};
use reqwest::{Client, RequestBuilder, Response};
use url::Url;

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::constants::{
    COUPON_QUERY_PARAM, HTTP_STATUS_PAYMENT_REQUIRED, PAYWALL_PATH, X_PAYMENT_HEADER,
    X_PAYMENT_RESPONSE_HEADER,
};
use crate::error::HttpError;
use crate::headers::{decode_payment_response, encode_x_payment};

/// Errors that can occur while talking to a paywall server.
#[derive(Debug, thiserror::Error)]
pub enum PaywallClientError {
    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// HTTP transport error.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// JSON deserialization error.
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// Unexpected HTTP status code.
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// Human-readable context.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// Failed to read response body.
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// A payment header could not be encoded or decoded.
    #[error("Payment header error: {context}: {source}")]
    Header {
        /// Human-readable context.
        context: &'static str,
        /// The underlying codec error.
        #[source]
        source: HttpError,
    },
    /// A payment header was not visible ASCII.
    #[error("Payment header is not valid text: {context}: {source}")]
    HeaderText {
        /// Human-readable context.
        context: &'static str,
        /// The underlying conversion error.
        #[source]
        source: http::header::ToStrError,
    },
}

impl From<PaywallClientError> for TransportError {
    fn from(err: PaywallClientError) -> Self {
        match err {
            PaywallClientError::Http { source, .. } => Self::Network {
                reason: source.to_string(),
            },
            PaywallClientError::HttpStatus { status, body, .. } => Self::Status {
                status: status.as_u16(),
                body,
            },
            other => Self::InvalidResponse {
                reason: other.to_string(),
            },
        }
    }
}

/// HTTP client for the `paywall/v1` endpoints of one server.
#[derive(Clone, Debug)]
pub struct PaywallClient {
    /// Base URL of the server, always ending in `/`.
    base_url: Url,
    /// `paywall/v1/` relative to the base.
    paywall_url: Url,
    /// Full URL to `POST paywall/v1/cart/quote`.
    cart_quote_url: Url,
    /// Full URL to `GET paywall/v1/subscription/status`.
    subscription_url: Url,
    /// Full URL to `POST paywall/v1/stripe-session`.
    card_session_url: Url,
    /// Full URL to `POST paywall/v1/cart/stripe-session`.
    cart_card_session_url: Url,
    client: Client,
    headers: HeaderMap,
    timeout: Option<Duration>,
}

impl PaywallClient {
    /// Returns the base URL used by this client.
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns any custom headers configured on the client.
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the configured timeout, if any.
    pub const fn timeout(&self) -> &Option<Duration> {
        &self.timeout
    }

    /// Constructs a client for the server at `base_url`.
    ///
    /// A base URL without a trailing slash is treated as a directory, so
    /// `https://host/api` serves `https://host/api/paywall/v1/...`.
    ///
    /// # Errors
    ///
    /// Returns [`PaywallClientError::UrlParse`] if `base_url` cannot carry a
    /// path or an endpoint URL cannot be built.
    pub fn try_new(mut base_url: Url) -> Result<Self, PaywallClientError> {
        if base_url.cannot_be_a_base() {
            return Err(PaywallClientError::UrlParse {
                context: "Base url cannot carry a path",
                source: url::ParseError::RelativeUrlWithCannotBeABaseBase,
            });
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let join = |relative: &str, context: &'static str| {
            base_url
                .join(relative)
                .map_err(|source| PaywallClientError::UrlParse { context, source })
        };
        let paywall_url = join(
            &format!("./{PAYWALL_PATH}/"),
            "Failed to construct ./paywall/v1/ URL",
        )?;
        let cart_quote_url = join(
            &format!("./{PAYWALL_PATH}/cart/quote"),
            "Failed to construct ./paywall/v1/cart/quote URL",
        )?;
        let subscription_url = join(
            &format!("./{PAYWALL_PATH}/subscription/status"),
            "Failed to construct ./paywall/v1/subscription/status URL",
        )?;
        let card_session_url = join(
            &format!("./{PAYWALL_PATH}/stripe-session"),
            "Failed to construct ./paywall/v1/stripe-session URL",
        )?;
        let cart_card_session_url = join(
            &format!("./{PAYWALL_PATH}/cart/stripe-session"),
            "Failed to construct ./paywall/v1/cart/stripe-session URL",
        )?;
        Ok(Self {
            base_url,
            paywall_url,
            cart_quote_url,
            subscription_url,
            card_session_url,
            cart_card_session_url,
            client: Client::new(),
            headers: HeaderMap::new(),
            timeout: None,
        })
    }

    /// Uses `client` for all future requests, sharing its connection pool.
    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Attaches custom headers to all future requests.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets a timeout for all future requests.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Quote URL of `endpoint`, or its verify URL when `verify` is set.
    ///
    /// Ids are pushed as single path segments, so a `/` inside an id is
    /// percent-encoded rather than starting a new segment.
    #[must_use]
    pub fn endpoint_url(&self, endpoint: &Endpoint, verify: bool) -> Url {
        let mut url = self.paywall_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            if matches!(endpoint, Endpoint::Cart(_)) {
                segments.push("cart");
            }
            segments.push(endpoint.id());
            if verify {
                segments.push("verify");
            }
        }
        url
    }

    /// Sends `GET paywall/v1/{id}`, optionally with `?coupon=`.
    ///
    /// # Errors
    ///
    /// Returns [`PaywallClientError::HttpStatus`] unless the server answers
    /// `402 Payment Required`.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "paymux.paywall.quote", skip_all, fields(endpoint = %endpoint), err)
    )]
    pub async fn quote(
        &self,
        endpoint: &Endpoint,
        coupon: Option<&str>,
    ) -> Result<PaymentRequired, PaywallClientError> {
        let context = "GET paywall/v1 quote";
        let mut url = self.endpoint_url(endpoint, false);
        if let Some(code) = coupon.filter(|code| !code.is_empty()) {
            url.query_pairs_mut().append_pair(COUPON_QUERY_PARAM, code);
        }
        let response = self.send(self.client.get(url), context).await?;
        let result = if response.status().as_u16() == HTTP_STATUS_PAYMENT_REQUIRED {
            response
                .json::<PaymentRequired>()
                .await
                .map_err(|source| PaywallClientError::JsonDeserialization { context, source })
        } else {
            Err(unexpected_status(response, context).await)
        };
        record_result_on_span(&result);
        result
    }

    /// Sends `POST .../verify` carrying `payload` in the `X-PAYMENT` header.
    ///
    /// The settlement is read from `X-PAYMENT-RESPONSE`; servers that omit
    /// the header may return it as the JSON body instead.
    ///
    /// # Errors
    ///
    /// Returns [`PaywallClientError`] on non-2xx statuses and on undecodable
    /// settlements.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "paymux.paywall.verify", skip_all, fields(endpoint = %endpoint), err)
    )]
    pub async fn verify(
        &self,
        endpoint: &Endpoint,
        payload: &PaymentPayload,
    ) -> Result<SettlementResponse, PaywallClientError> {
        let context = "POST paywall/v1 verify";
        let header = encode_x_payment(payload)
            .map_err(|source| PaywallClientError::Header { context, source })?;
        let request = self
            .client
            .post(self.endpoint_url(endpoint, true))
            .header(X_PAYMENT_HEADER, header);
        let response = self.send(request, context).await?;
        let result = if response.status().is_success() {
            let header = response
                .headers()
                .get(X_PAYMENT_RESPONSE_HEADER)
                .map(|value| value.to_str().map(str::to_owned));
            match header {
                Some(Ok(text)) => decode_payment_response(&text)
                    .map_err(|source| PaywallClientError::Header { context, source }),
                Some(Err(source)) => Err(PaywallClientError::HeaderText { context, source }),
                None => response
                    .json::<SettlementResponse>()
                    .await
                    .map_err(|source| PaywallClientError::JsonDeserialization { context, source }),
            }
        } else {
            Err(unexpected_status(response, context).await)
        };
        record_result_on_span(&result);
        result
    }

    /// Sends `POST paywall/v1/cart/quote`.
    ///
    /// # Errors
    ///
    /// Returns [`PaywallClientError`] if the request fails or the server does
    /// not answer `200 OK`.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "paymux.paywall.cart_quote", skip_all, fields(items = request.items.len()), err)
    )]
    pub async fn create_cart(
        &self,
        request: &CartQuoteRequest,
    ) -> Result<CartQuote, PaywallClientError> {
        self.post_json(&self.cart_quote_url, "POST paywall/v1/cart/quote", request)
            .await
    }

    /// Sends `GET paywall/v1/subscription/status?resource=..&userId=..`.
    ///
    /// # Errors
    ///
    /// Returns [`PaywallClientError`] if the request fails or the server does
    /// not answer `200 OK`.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "paymux.paywall.subscription_status", skip_all, fields(resource = %resource), err)
    )]
    pub async fn subscription_status(
        &self,
        resource: &str,
        user_id: &str,
    ) -> Result<SubscriptionStatus, PaywallClientError> {
        let mut url = self.subscription_url.clone();
        url.query_pairs_mut()
            .append_pair("resource", resource)
            .append_pair("userId", user_id);
        self.get_json(url, "GET paywall/v1/subscription/status")
            .await
    }

    /// Sends `POST paywall/v1/stripe-session` for a single resource.
    ///
    /// # Errors
    ///
    /// Returns [`PaywallClientError`] if the request fails or the server does
    /// not answer `200 OK`.
    pub async fn create_card_session(
        &self,
        request: &CardSessionRequest,
    ) -> Result<CardSession, PaywallClientError> {
        self.post_json(
            &self.card_session_url,
            "POST paywall/v1/stripe-session",
            request,
        )
        .await
    }

    /// Sends `POST paywall/v1/cart/stripe-session` for cart lines.
    ///
    /// # Errors
    ///
    /// Returns [`PaywallClientError`] if the request fails or the server does
    /// not answer `200 OK`.
    pub async fn create_cart_card_session(
        &self,
        request: &CardSessionRequest,
    ) -> Result<CardSession, PaywallClientError> {
        self.post_json(
            &self.cart_card_session_url,
            "POST paywall/v1/cart/stripe-session",
            request,
        )
        .await
    }

    /// Applies headers and timeout, then sends.
    async fn send(
        &self,
        mut req: RequestBuilder,
        context: &'static str,
    ) -> Result<Response, PaywallClientError> {
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let response = req
            .send()
            .await
            .map_err(|source| PaywallClientError::Http { context, source });
        #[cfg(feature = "telemetry")]
        if let Ok(response) = &response {
            tracing::debug!(status = %response.status(), context, "paywall responded");
        }
        response
    }

    async fn post_json<T, R>(
        &self,
        url: &Url,
        context: &'static str,
        payload: &T,
    ) -> Result<R, PaywallClientError>
    where
        T: serde::Serialize + Sync + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let response = self
            .send(self.client.post(url.clone()).json(payload), context)
            .await?;
        let result = read_json(response, context).await;
        record_result_on_span(&result);
        result
    }

    async fn get_json<R>(&self, url: Url, context: &'static str) -> Result<R, PaywallClientError>
    where
        R: serde::de::DeserializeOwned,
    {
        let response = self.send(self.client.get(url), context).await?;
        let result = read_json(response, context).await;
        record_result_on_span(&result);
        result
    }
}

async fn read_json<R>(response: Response, context: &'static str) -> Result<R, PaywallClientError>
where
    R: serde::de::DeserializeOwned,
{
    if response.status() == StatusCode::OK {
        response
            .json::<R>()
            .await
            .map_err(|source| PaywallClientError::JsonDeserialization { context, source })
    } else {
        Err(unexpected_status(response, context).await)
    }
}

async fn unexpected_status(response: Response, context: &'static str) -> PaywallClientError {
    let status = response.status();
    match response.text().await {
        Ok(body) => PaywallClientError::HttpStatus {
            context,
            status,
            body,
        },
        Err(source) => PaywallClientError::ResponseBodyRead { context, source },
    }
}

impl PaywallTransport for PaywallClient {
    fn quote<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        coupon: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<PaymentRequired, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            Self::quote(self, endpoint, coupon)
                .await
                .map_err(TransportError::from)
        })
    }

    fn verify<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        payload: &'a PaymentPayload,
    ) -> Pin<Box<dyn Future<Output = Result<SettlementResponse, TransportError>> + Send + 'a>>
    {
        Box::pin(async move {
            Self::verify(self, endpoint, payload)
                .await
                .map_err(TransportError::from)
        })
    }

    fn create_cart<'a>(
        &'a self,
        request: &'a CartQuoteRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CartQuote, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            Self::create_cart(self, request)
                .await
                .map_err(TransportError::from)
        })
    }

    fn subscription_status<'a>(
        &'a self,
        resource: &'a str,
        user_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SubscriptionStatus, TransportError>> + Send + 'a>>
    {
        Box::pin(async move {
            Self::subscription_status(self, resource, user_id)
                .await
                .map_err(TransportError::from)
        })
    }
}

/// Converts a string URL into a `PaywallClient`, parsing the URL and calling `try_new`.
impl TryFrom<&str> for PaywallClient {
    type Error = PaywallClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|source| PaywallClientError::UrlParse {
            context: "Failed to parse base url",
            source,
        })?;
        Self::try_new(url)
    }
}

/// Converts a String URL into a `PaywallClient`.
impl TryFrom<String> for PaywallClient {
    type Error = PaywallClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

/// Logs a failed request at error level.
#[cfg(feature = "telemetry")]
fn record_result_on_span<R, E: std::fmt::Display>(result: &Result<R, E>) {
    if let Err(err) = result {
        tracing::event!(tracing::Level::ERROR, error = %err, "Request to paywall failed");
    }
}

/// Noop if telemetry feature is off.
#[cfg(not(feature = "telemetry"))]
const fn record_result_on_span<R, E>(_result: &Result<R, E>) {}
