//! Marketplace HTTP API: the asset download endpoint and the session endpoint.
//!
//! Requests go through the [`HttpTransport`] trait so the protocol core can be
//! driven by scripted fakes. Every call carries a timeout; expiry surfaces as
//! [`Error::NetworkTimeout`] rather than a hang.

use crate::entitlement::RedownloadSession;
use crate::error::{Error, Result};
use crate::payment::{
    decode_header, PaymentRequired, SettlementResponse, TransferMethod, PAYMENT_REQUIRED_HEADER,
    PAYMENT_RESPONSE_HEADER, PAYMENT_SIGNATURE_HEADER, X_PAYMENT_RESPONSE_HEADER,
};
use crate::wallet::address_key;
use alloy_primitives::Address;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Buyer wallet address.
pub const WALLET_HEADER: &str = "X-WALLET-ADDRESS";
/// Entitlement receipt, sent by the client and rotated by the server.
pub const RECEIPT_HEADER: &str = "X-PURCHASE-RECEIPT";
/// Re-download session token.
pub const SESSION_HEADER: &str = "X-REDOWNLOAD-SESSION";
/// Preferred transfer method.
pub const TRANSFER_METHOD_HEADER: &str = "X-ASSET-TRANSFER-METHOD";
/// Signature over a challenge message.
pub const AUTH_SIGNATURE_HEADER: &str = "X-AUTH-SIGNATURE";
/// Timestamp the challenge message was built with.
pub const AUTH_TIMESTAMP_HEADER: &str = "X-AUTH-TIMESTAMP";

/// An outgoing GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Absolute URL.
    pub url: String,
    /// Header name/value pairs, in insertion order.
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// A GET for `url` with no headers.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Look up a header, ignoring case.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A received response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Headers keyed by lowercase name.
    pub headers: HashMap<String, String>,
    /// Body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Build a response; header names are lowercased.
    #[must_use]
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(n, v)| (n.to_ascii_lowercase(), v))
                .collect(),
            body: body.into(),
        }
    }

    /// Look up a header, ignoring case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// `200 OK`.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    /// `401` or `402`: the server wants proof of ownership or payment.
    #[must_use]
    pub fn requires_auth_or_payment(&self) -> bool {
        matches!(self.status, 401 | 402)
    }

    /// Receipt rotated by the server, if any.
    #[must_use]
    pub fn rotated_receipt(&self) -> Option<&str> {
        self.header(RECEIPT_HEADER)
    }

    /// Decode the payment challenge, from the `PAYMENT-REQUIRED` header when
    /// present, otherwise from the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] or [`Error::Serialization`] if neither holds a
    /// valid challenge.
    pub fn payment_required(&self) -> Result<PaymentRequired> {
        if let Some(header) = self.header(PAYMENT_REQUIRED_HEADER) {
            return decode_header(header);
        }
        if self.body.is_empty() {
            return Err(Error::Protocol(format!(
                "status {} without a payment challenge",
                self.status
            )));
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Decode the settlement confirmation, preferring `PAYMENT-RESPONSE` over the
    /// legacy `X-PAYMENT-RESPONSE`. An undecodable header counts as absent.
    #[must_use]
    pub fn settlement(&self) -> Option<SettlementResponse> {
        let raw = self
            .header(PAYMENT_RESPONSE_HEADER)
            .or_else(|| self.header(X_PAYMENT_RESPONSE_HEADER))?;
        match decode_header(raw) {
            Ok(settlement) => Some(settlement),
            Err(e) => {
                warn!("Ignoring undecodable settlement header: {}", e);
                None
            }
        }
    }
}

/// Executes HTTP requests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform a GET. Non-2xx statuses are responses, not errors.
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// [`HttpTransport`] backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with a fresh connection pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self.client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::NetworkTimeout(request.url.clone())
            } else {
                Error::Network(format!("GET {} failed: {e}", request.url))
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(n, v)| Some((n.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("reading body of {}: {e}", request.url)))?;

        Ok(HttpResponse::new(status, headers, body))
    }
}

/// Proof and payment material attached to a download request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadCredentials {
    /// Stored entitlement receipt.
    pub receipt: Option<String>,
    /// Re-download session token.
    pub session: Option<String>,
    /// Preferred transfer method, forwarded so the server can tailor its offers.
    pub transfer_method: Option<TransferMethod>,
    /// Encoded `PAYMENT-SIGNATURE` value.
    pub payment_signature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    #[serde(default)]
    token: Option<String>,
    #[serde(default, alias = "expiresAtMs")]
    expires_at_ms: Option<i64>,
}

/// Typed access to the marketplace endpoints.
#[derive(Clone)]
pub struct AssetApi {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
}

impl AssetApi {
    /// Create a client for `base_url` (e.g. `http://127.0.0.1:3000/api`).
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            transport,
            timeout,
        }
    }

    /// URL of an asset's download endpoint, with `asset_id` as a single encoded segment.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the base URL does not parse or cannot carry a path.
    pub fn download_url(&self, asset_id: &str) -> Result<String> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("invalid api base url {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| Error::Config(format!("api base url {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(["assets", asset_id, "download"]);
        Ok(url.into())
    }

    /// URL of the session endpoint.
    #[must_use]
    pub fn session_url(&self) -> String {
        format!("{}/auth/session", self.base_url)
    }

    /// `GET /assets/{id}/download`.
    ///
    /// # Errors
    ///
    /// Transport failures and timeouts. Every HTTP status is returned as a response.
    pub async fn download(
        &self,
        asset_id: &str,
        wallet: &Address,
        credentials: &DownloadCredentials,
    ) -> Result<HttpResponse> {
        let mut request =
            HttpRequest::get(self.download_url(asset_id)?).header(WALLET_HEADER, address_key(wallet));
        if let Some(receipt) = &credentials.receipt {
            request = request.header(RECEIPT_HEADER, receipt.clone());
        }
        if let Some(session) = &credentials.session {
            request = request.header(SESSION_HEADER, session.clone());
        }
        if let Some(method) = credentials.transfer_method {
            request = request.header(TRANSFER_METHOD_HEADER, method.as_str());
        }
        if let Some(payment) = &credentials.payment_signature {
            request = request.header(PAYMENT_SIGNATURE_HEADER, payment.clone());
        }

        debug!(
            "GET download asset={} receipt={} session={} payment={}",
            asset_id,
            credentials.receipt.is_some(),
            credentials.session.is_some(),
            credentials.payment_signature.is_some()
        );
        let response = self.send(request, "download").await?;
        debug!("download asset={} -> {}", asset_id, response.status);
        Ok(response)
    }

    /// `GET /auth/session`: exchange a signed challenge for a re-download session.
    ///
    /// `fallback_ttl_ms` applies when the server omits `expires_at_ms`.
    ///
    /// # Errors
    ///
    /// [`Error::UnexpectedStatus`] for any status other than 200,
    /// [`Error::Protocol`] if the response carries no token, plus transport errors.
    pub async fn exchange_session(
        &self,
        wallet: &Address,
        signature: &str,
        timestamp_ms: i64,
        now_ms: i64,
        fallback_ttl_ms: i64,
    ) -> Result<RedownloadSession> {
        let request = HttpRequest::get(self.session_url())
            .header(WALLET_HEADER, address_key(wallet))
            .header(AUTH_SIGNATURE_HEADER, signature)
            .header(AUTH_TIMESTAMP_HEADER, timestamp_ms.to_string());

        let response = self.send(request, "session").await?;
        if !response.is_ok() {
            warn!("Session exchange rejected with status {}", response.status);
            return Err(Error::UnexpectedStatus {
                status: response.status,
                context: "session exchange".to_string(),
            });
        }

        let body: Option<SessionBody> = serde_json::from_slice(&response.body).ok();
        let (body_token, expires_at_ms) = body
            .map(|b| (b.token, b.expires_at_ms))
            .unwrap_or((None, None));
        let token = body_token
            .filter(|t| !t.trim().is_empty())
            .or_else(|| response.header(SESSION_HEADER).map(str::to_string))
            .ok_or_else(|| Error::Protocol("session response carried no token".into()))?;

        Ok(RedownloadSession {
            token,
            expires_at_ms: expires_at_ms.unwrap_or_else(|| now_ms.saturating_add(fallback_ttl_ms)),
        })
    }

    async fn send(&self, request: HttpRequest, context: &str) -> Result<HttpResponse> {
        match tokio::time::timeout(self.timeout, self.transport.get(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{} request timed out after {:?}", context, self.timeout);
                Err(Error::NetworkTimeout(context.to_string()))
            }
        }
    }
}
