//! Scripted marketplace, chain and wallet for end-to-end purchase tests.
//!
//! - [`FakeMarket`] answers the download and session endpoints the way the
//!   marketplace does: 402 with offers, 401 for stale proof, 200 with a rotated
//!   receipt and settlement attestation for a paid request.
//! - [`FakeChain`] is the RPC side. A paid download "mines" a matching ERC-20
//!   transfer unless told otherwise; individual receipts can be held back to
//!   simulate slow verification.
//! - [`FakeSigner`] records every prompt and can be told to reject.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use alloy_primitives::{keccak256, Address, B256, U256};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use soulmarket::api::{
    HttpRequest, HttpResponse, HttpTransport, RECEIPT_HEADER, SESSION_HEADER, WALLET_HEADER,
};
use soulmarket::payment::{
    decode_header, encode_header, AuthorizationRequest, ExactPayload, PaymentPayload,
    PaymentRequired, PaymentRequirement, RequirementExtra, SettlementResponse, SignerError,
    SigningCapability, PAYMENT_REQUIRED_HEADER, PAYMENT_RESPONSE_HEADER,
    PAYMENT_SIGNATURE_HEADER,
};
use soulmarket::settlement::{
    ProviderCache, ReceiptLog, RpcClient, TransactionReceipt, TRANSFER_EVENT_SIGNATURE,
};
use soulmarket::{
    create_event_channel, ClientConfig, EntitlementStore, PurchaseContext, PurchaseEvent,
    PurchaseEventsChannel, PurchaseOrchestrator, TransferMethod,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Seller the buyer expects to pay.
pub const SELLER: &str = "0x209693Bc6afc0C5328bA36FaF03C514EF312287C";
/// Some other address.
pub const STRANGER: &str = "0x742d35Cc6634C0532925a3b844Bc9e7595916Da2";
/// Buyer wallet.
pub const BUYER: &str = "0x857b06519E91e3A54538791bDbb0E22373e36b66";
/// USDC on Base.
pub const USDC: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";
/// Price used by the default offer.
pub const PRICE: u64 = 10_000;

const RPC_URL: &str = "fake://chain";
const API_BASE: &str = "http://market.test/api";

/// Parse a test address constant.
pub fn addr(s: &str) -> Address {
    s.parse().expect("test address")
}

/// Settlement transaction the market reports for `asset_id`.
pub fn tx_for(asset_id: &str) -> B256 {
    keccak256(asset_id.as_bytes())
}

/// An offer paying `pay_to` with `method`.
pub fn offer(pay_to: &str, method: &str, amount: u64) -> PaymentRequirement {
    PaymentRequirement {
        scheme: "exact".into(),
        network: "eip155:8453".into(),
        amount: U256::from(amount),
        asset: USDC.into(),
        pay_to: pay_to.into(),
        max_timeout_seconds: 300,
        extra: RequirementExtra {
            name: Some("USD Coin".into()),
            version: Some("2".into()),
            transfer_method: Some(method.into()),
            spender: None,
        },
    }
}

/// How the market attests a paid download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementMode {
    /// Complete attestation.
    Complete,
    /// No attestation header at all.
    Missing,
    /// `success: false`.
    Unsuccessful,
}

struct MarketState {
    assets: HashMap<String, Bytes>,
    accepts: Vec<PaymentRequirement>,
    receipts: HashMap<String, String>,
    sessions: HashSet<String>,
    free_assets: HashSet<String>,
    require_session: bool,
    accept_sessions: bool,
    settlement_mode: SettlementMode,
    mine: bool,
    settle_amount: Option<U256>,
    attested_network: Option<String>,
    status_override: Option<u16>,
    payments: Vec<PaymentPayload>,
}

/// The marketplace API.
pub struct FakeMarket {
    state: Mutex<MarketState>,
    requests: Mutex<Vec<HttpRequest>>,
    chain: Arc<FakeChain>,
}

impl FakeMarket {
    fn new(chain: Arc<FakeChain>) -> Self {
        Self {
            state: Mutex::new(MarketState {
                assets: HashMap::new(),
                accepts: vec![offer(SELLER, "eip3009", PRICE)],
                receipts: HashMap::new(),
                sessions: HashSet::new(),
                free_assets: HashSet::new(),
                require_session: false,
                accept_sessions: true,
                settlement_mode: SettlementMode::Complete,
                mine: true,
                settle_amount: None,
                attested_network: None,
                status_override: None,
                payments: Vec::new(),
            }),
            requests: Mutex::new(Vec::new()),
            chain,
        }
    }

    /// Publish an asset.
    pub fn add_asset(&self, asset_id: &str, content: &'static [u8]) {
        self.state
            .lock()
            .assets
            .insert(asset_id.to_string(), Bytes::from_static(content));
    }

    /// Replace the offered requirements.
    pub fn set_offers(&self, accepts: Vec<PaymentRequirement>) {
        self.state.lock().accepts = accepts;
    }

    /// Accept `receipt` as proof for `asset_id`.
    pub fn grant_receipt(&self, asset_id: &str, receipt: &str) {
        self.state
            .lock()
            .receipts
            .insert(asset_id.to_string(), receipt.to_string());
    }

    /// Receipts alone are not enough; a session must accompany them.
    pub fn require_session(&self, required: bool) {
        self.state.lock().require_session = required;
    }

    /// Issue sessions that downloads then refuse.
    pub fn reject_sessions(&self) {
        self.state.lock().accept_sessions = false;
    }

    /// Serve `asset_id` to anyone without payment.
    pub fn make_free(&self, asset_id: &str) {
        self.state.lock().free_assets.insert(asset_id.to_string());
    }

    /// Attestation style for paid downloads.
    pub fn set_settlement_mode(&self, mode: SettlementMode) {
        self.state.lock().settlement_mode = mode;
    }

    /// Do not put the settlement on chain (pending receipt).
    pub fn skip_mining(&self) {
        self.state.lock().mine = false;
    }

    /// Settle a different amount than the payload authorised.
    pub fn settle_amount(&self, amount: u64) {
        self.state.lock().settle_amount = Some(U256::from(amount));
    }

    /// Name `network` in the settlement attestation instead of the paid network.
    pub fn attest_network(&self, network: &str) {
        self.state.lock().attested_network = Some(network.to_string());
    }

    /// Answer every download with `status`.
    pub fn fail_downloads_with(&self, status: u16) {
        self.state.lock().status_override = Some(status);
    }

    /// Every request seen, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Requests that carried a signed payment.
    pub fn paid_requests(&self) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.header_value(PAYMENT_SIGNATURE_HEADER).is_some())
            .count()
    }

    /// Requests to the session endpoint.
    pub fn session_requests(&self) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.ends_with("/auth/session"))
            .count()
    }

    /// Payloads received.
    pub fn payments(&self) -> Vec<PaymentPayload> {
        self.state.lock().payments.clone()
    }

    fn session(&self, request: &HttpRequest) -> HttpResponse {
        let signed = request
            .header_value("X-AUTH-SIGNATURE")
            .is_some_and(|s| !s.is_empty());
        if !signed || request.header_value(WALLET_HEADER).is_none() {
            return HttpResponse::new(401, vec![], "");
        }
        let mut state = self.state.lock();
        let token = format!("sess-{}", state.sessions.len() + 1);
        state.sessions.insert(token.clone());
        let expires = chrono::Utc::now().timestamp_millis() + 600_000;
        HttpResponse::new(
            200,
            vec![],
            format!(r#"{{"token":"{token}","expires_at_ms":{expires}}}"#),
        )
    }

    fn download(&self, asset_id: &str, request: &HttpRequest) -> HttpResponse {
        let mut state = self.state.lock();
        if let Some(status) = state.status_override {
            return HttpResponse::new(status, vec![], "");
        }
        let Some(content) = state.assets.get(asset_id).cloned() else {
            return HttpResponse::new(404, vec![], "");
        };

        if let Some(header) = request.header_value(PAYMENT_SIGNATURE_HEADER) {
            let payload: PaymentPayload = decode_header(header).expect("payment payload");
            state.payments.push(payload.clone());
            let receipt = format!("rcpt-{asset_id}-{}", state.payments.len());
            state.receipts.insert(asset_id.to_string(), receipt.clone());

            let tx = tx_for(asset_id);
            if state.mine {
                self.chain.mine(tx, &payload, state.settle_amount);
            }

            let mut headers = vec![(RECEIPT_HEADER.to_string(), receipt)];
            let settlement = SettlementResponse {
                success: state.settlement_mode == SettlementMode::Complete,
                transaction: Some(format!("0x{}", hex::encode(tx))),
                network: Some(
                    state
                        .attested_network
                        .clone()
                        .unwrap_or_else(|| payload.accepted.network.clone()),
                ),
                payer: Some(BUYER.to_string()),
                error_reason: (state.settlement_mode == SettlementMode::Unsuccessful)
                    .then(|| "facilitator timeout".to_string()),
            };
            if state.settlement_mode != SettlementMode::Missing {
                headers.push((
                    PAYMENT_RESPONSE_HEADER.to_string(),
                    encode_header(&settlement).expect("encode"),
                ));
            }
            return HttpResponse::new(200, headers, content);
        }

        if state.free_assets.contains(asset_id) {
            return HttpResponse::new(200, vec![], content);
        }

        let receipt_ok = request
            .header_value(RECEIPT_HEADER)
            .is_some_and(|r| state.receipts.get(asset_id).map(String::as_str) == Some(r));
        let session_ok = state.accept_sessions
            && request
                .header_value(SESSION_HEADER)
                .is_some_and(|s| state.sessions.contains(s));
        if receipt_ok && (session_ok || !state.require_session) {
            return HttpResponse::new(200, vec![], content);
        }
        if request.header_value(RECEIPT_HEADER).is_some()
            || request.header_value(SESSION_HEADER).is_some()
        {
            return HttpResponse::new(401, vec![], "");
        }

        let challenge = PaymentRequired {
            x402_version: 2,
            error: Some("payment required".into()),
            accepts: state.accepts.clone(),
        };
        HttpResponse::new(
            402,
            vec![(
                PAYMENT_REQUIRED_HEADER.to_string(),
                encode_header(&challenge).expect("encode"),
            )],
            "",
        )
    }
}

#[async_trait]
impl HttpTransport for FakeMarket {
    async fn get(&self, request: HttpRequest) -> soulmarket::Result<HttpResponse> {
        self.requests.lock().push(request.clone());
        let path = request
            .url
            .strip_prefix(API_BASE)
            .unwrap_or(request.url.as_str())
            .to_string();

        if path == "/auth/session" {
            return Ok(self.session(&request));
        }
        if let Some(asset_id) = path
            .strip_prefix("/assets/")
            .and_then(|rest| rest.strip_suffix("/download"))
        {
            return Ok(self.download(asset_id, &request));
        }
        Ok(HttpResponse::new(404, vec![], ""))
    }
}

/// The blockchain, as seen through RPC.
#[derive(Default)]
pub struct FakeChain {
    receipts: Mutex<HashMap<B256, TransactionReceipt>>,
    held: Mutex<HashMap<B256, Arc<Semaphore>>>,
    lookups: Mutex<u32>,
}

impl FakeChain {
    /// Record a transfer matching `payload` (or `amount` when given).
    pub fn mine(&self, tx: B256, payload: &PaymentPayload, amount: Option<U256>) {
        let (from, to, value) = match &payload.payload {
            ExactPayload::Eip3009(p) => (
                p.authorization.from,
                p.authorization.to,
                p.authorization.value,
            ),
            ExactPayload::Permit2(p) => (
                p.permit2_authorization.from,
                p.permit2_authorization.witness.to,
                p.permit2_authorization.permitted.amount,
            ),
        };
        let log = transfer_log(&payload.accepted.asset, from, to, amount.unwrap_or(value));
        self.receipts.lock().insert(
            tx,
            TransactionReceipt {
                status: Some("0x1".into()),
                block_number: Some("0x2a".into()),
                logs: vec![log],
            },
        );
    }

    /// Make lookups of `tx` wait until [`release`](Self::release).
    pub fn hold(&self, tx: B256) {
        self.held.lock().insert(tx, Arc::new(Semaphore::new(0)));
    }

    /// Let a held lookup finish.
    pub fn release(&self, tx: B256) {
        if let Some(gate) = self.held.lock().get(&tx) {
            gate.add_permits(1);
        }
    }

    /// Number of receipt lookups served.
    pub fn lookups(&self) -> u32 {
        *self.lookups.lock()
    }
}

#[async_trait]
impl RpcClient for FakeChain {
    async fn transaction_receipt(
        &self,
        tx_hash: &B256,
    ) -> soulmarket::Result<Option<TransactionReceipt>> {
        let gate = self.held.lock().get(tx_hash).cloned();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await.expect("gate open");
        }
        *self.lookups.lock() += 1;
        Ok(self.receipts.lock().get(tx_hash).cloned())
    }
}

fn word(address: Address) -> String {
    format!("0x{}", hex::encode(address.into_word()))
}

/// An ERC-20 `Transfer` log.
pub fn transfer_log(token: &str, from: Address, to: Address, amount: U256) -> ReceiptLog {
    ReceiptLog {
        address: token.to_string(),
        topics: vec![
            format!("0x{}", hex::encode(keccak256(TRANSFER_EVENT_SIGNATURE))),
            word(from),
            word(to),
        ],
        data: format!("0x{}", hex::encode(amount.to_be_bytes::<32>())),
    }
}

/// Wallet signer that records prompts.
#[derive(Default)]
pub struct FakeSigner {
    messages: Mutex<Vec<String>>,
    authorizations: Mutex<Vec<AuthorizationRequest>>,
    reject: Mutex<bool>,
}

impl FakeSigner {
    /// Reject every prompt from now on.
    pub fn reject_all(&self) {
        *self.reject.lock() = true;
    }

    /// Challenge messages signed.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    /// Authorizations signed (or attempted).
    pub fn authorizations(&self) -> Vec<AuthorizationRequest> {
        self.authorizations.lock().clone()
    }
}

#[async_trait]
impl SigningCapability for FakeSigner {
    async fn sign_message(
        &self,
        _wallet: &Address,
        message: &str,
    ) -> Result<String, SignerError> {
        self.messages.lock().push(message.to_string());
        if *self.reject.lock() {
            return Err(SignerError::Rejected("user rejected the request".into()));
        }
        Ok(format!("0x{}", hex::encode(keccak256(message.as_bytes()))))
    }

    async fn sign_authorization(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<String, SignerError> {
        self.authorizations.lock().push(request.clone());
        if *self.reject.lock() {
            return Err(SignerError::Rejected("user rejected the request".into()));
        }
        Ok(format!("0x{}", "ab".repeat(65)))
    }
}

/// A buyer wired to a fake market and chain.
pub struct TestHarness {
    /// Marketplace.
    pub market: Arc<FakeMarket>,
    /// Chain.
    pub chain: Arc<FakeChain>,
    /// Buyer's wallet signer.
    pub signer: Arc<FakeSigner>,
    /// Orchestrator under test.
    pub orchestrator: PurchaseOrchestrator,
    /// Purchase events.
    pub events: PurchaseEventsChannel,
    /// Configuration the orchestrator was built from.
    pub config: ClientConfig,
}

impl TestHarness {
    /// A harness whose buyer expects to pay [`SELLER`].
    pub fn setup() -> Self {
        let chain = Arc::new(FakeChain::default());
        let market = Arc::new(FakeMarket::new(Arc::clone(&chain)));
        let signer = Arc::new(FakeSigner::default());

        let config = ClientConfig {
            api_base_url: API_BASE.into(),
            rpc_url: RPC_URL.into(),
            expected_seller: Some(SELLER.into()),
            ..ClientConfig::default()
        };

        let providers = ProviderCache::new();
        providers.insert(RPC_URL, Arc::clone(&chain) as Arc<dyn RpcClient>);

        let (tx, events) = create_event_channel();
        let orchestrator = PurchaseOrchestrator::from_config(
            &config,
            Arc::clone(&market) as Arc<dyn HttpTransport>,
            &providers,
            EntitlementStore::new(),
            tx,
        );

        Self {
            market,
            chain,
            signer,
            orchestrator,
            events,
            config,
        }
    }

    /// The buyer.
    pub fn wallet(&self) -> Address {
        addr(BUYER)
    }

    /// Purchase context for the buyer.
    pub fn context(&self) -> PurchaseContext {
        PurchaseContext::new(
            self.wallet(),
            Arc::clone(&self.signer) as Arc<dyn SigningCapability>,
        )
        .with_expected_seller(self.config.expected_seller_address())
        .with_transfer_method(TransferMethod::Eip3009)
    }

    /// Drain the events received so far.
    pub fn drain_events(&mut self) -> Vec<PurchaseEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}
