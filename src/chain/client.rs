use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{TimeZone, Utc};
use ed25519_dalek::{Signer, SigningKey};
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::chain::commitment::{
    details_commitment, identity_commitment, string_to_bytes32, to_hex, uuid_to_bytes32, Bytes32,
};
use crate::chain::{Anchor, AnchorError, AnchorEvent, ChainRecord, EventKind};

#[derive(Debug, Clone)]
pub struct ChainAnchorConfig {
    pub rpc_url: Url,
    pub logger_address: String,
    pub fund_manager_address: Option<String>,
    pub gas_limit: u64,
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
    pub request_timeout: Duration,
}

/// Typed contract argument, serialized as `{"type": .., "value": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum CallArg {
    Bytes32(String),
    /// Decimal string; large enough for any amount in cents.
    Uint(String),
    Uint8(u8),
    #[serde(rename = "string")]
    Str(String),
}

impl CallArg {
    fn bytes32(bytes: Bytes32) -> Self {
        CallArg::Bytes32(to_hex(&bytes))
    }
}

/// Field order is the canonical serialization that gets signed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallEnvelope {
    pub from: String,
    pub to: String,
    pub nonce: u64,
    pub gas_price: String,
    pub gas_limit: u64,
    pub method: String,
    pub args: Vec<CallArg>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignedCall {
    pub call: CallEnvelope,
    pub public_key: String,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

const MAX_RESET_TIMEOUT_SECS: u64 = 24 * 60 * 60;

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>;

/// Submits signed calls to the logger and fund manager contracts through a
/// JSON-RPC anchoring gateway.
#[derive(Clone)]
pub struct ChainAnchor {
    client: Client,
    config: ChainAnchorConfig,
    signing_key: Arc<SigningKey>,
    circuit_breaker: Breaker,
    next_id: Arc<AtomicU64>,
}

impl ChainAnchor {
    pub fn new(config: ChainAnchorConfig, signing_key: SigningKey) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();

        let reset_timeout = config.reset_timeout_secs.min(MAX_RESET_TIMEOUT_SECS);
        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout),
            Duration::from_secs(reset_timeout.saturating_mul(2)),
        );
        let policy = failure_policy::consecutive_failures(config.failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        ChainAnchor {
            client,
            config,
            signing_key: Arc::new(signing_key),
            circuit_breaker,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Hex of the verifying key; the gateway resolves nonces against it.
    pub fn address(&self) -> String {
        to_hex(self.signing_key.verifying_key().as_bytes())
    }

    pub fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }

    async fn rpc(&self, method: &'static str, params: Value) -> Result<Value, AnchorError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let client = self.client.clone();
        let url = self.config.rpc_url.clone();

        let result = self
            .circuit_breaker
            .call(async move {
                let response = client
                    .post(url)
                    .json(&body)
                    .send()
                    .await?
                    .error_for_status()?;
                let reply = response.json::<RpcResponse>().await?;

                if let Some(err) = reply.error {
                    return Err(AnchorError::Rpc {
                        code: err.code,
                        message: err.message,
                    });
                }
                reply.result.ok_or_else(|| {
                    AnchorError::InvalidResponse(format!("{} returned no result", method))
                })
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(AnchorError::CircuitBreakerOpen(
                "anchoring gateway circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    /// Signs and submits one contract call. Nonce and gas price are resolved per call.
    async fn submit(
        &self,
        to: &str,
        method: &str,
        args: Vec<CallArg>,
    ) -> Result<String, AnchorError> {
        let from = self.address();
        let nonce = parse_quantity(&self.rpc("anchor_getNonce", json!([from])).await?)?;
        let nonce = u64::try_from(nonce)
            .map_err(|_| AnchorError::InvalidResponse(format!("nonce {} out of range", nonce)))?;
        let gas_price = parse_quantity(&self.rpc("anchor_gasPrice", json!([])).await?)?;

        let envelope = CallEnvelope {
            from,
            to: to.to_string(),
            nonce,
            gas_price: gas_price.to_string(),
            gas_limit: self.config.gas_limit,
            method: method.to_string(),
            args,
        };
        let signed = sign_call(&self.signing_key, envelope)?;
        let params =
            serde_json::to_value([&signed]).map_err(|e| AnchorError::Encoding(e.to_string()))?;

        match self.rpc("anchor_submitCall", params).await? {
            Value::String(hash) if !hash.is_empty() => Ok(hash),
            other => Err(AnchorError::InvalidResponse(format!(
                "expected a transaction hash, got {}",
                other
            ))),
        }
    }

    /// Reads back every event the logger contract holds for a transaction.
    pub async fn transaction_events(&self, transaction_id: Uuid) -> Result<Vec<ChainRecord>, AnchorError> {
        let id = to_hex(&uuid_to_bytes32(transaction_id));
        let result = self
            .rpc("anchor_getEvents", json!([self.config.logger_address, id]))
            .await?;
        let logged: Vec<LoggedEvent> = serde_json::from_value(result)
            .map_err(|e| AnchorError::InvalidResponse(format!("malformed event list: {}", e)))?;

        logged
            .into_iter()
            .map(|event| event.into_record(transaction_id))
            .collect()
    }
}

/// One entry of `anchor_getEvents`. Hashes are zero and metadata empty when unset.
#[derive(Debug, Deserialize)]
struct LoggedEvent {
    event: EventKind,
    timestamp: i64,
    actor_hash: String,
    details_hash: String,
    #[serde(default)]
    metadata: String,
    chain_tx_hash: String,
}

impl LoggedEvent {
    fn into_record(self, transaction_id: Uuid) -> Result<ChainRecord, AnchorError> {
        let timestamp = Utc.timestamp_opt(self.timestamp, 0).single().ok_or_else(|| {
            AnchorError::InvalidResponse(format!("invalid event timestamp {}", self.timestamp))
        })?;

        Ok(ChainRecord {
            transaction_id,
            event: self.event,
            actor_hash: non_zero_hash(self.actor_hash),
            details_hash: non_zero_hash(self.details_hash),
            metadata: Some(self.metadata).filter(|m| !m.is_empty()),
            timestamp,
            chain_tx_hash: self.chain_tx_hash,
        })
    }
}

fn non_zero_hash(hash: String) -> Option<String> {
    let digits = hash.strip_prefix("0x").unwrap_or(&hash);
    if digits.is_empty() || digits.chars().all(|ch| ch == '0') {
        None
    } else {
        Some(hash)
    }
}

#[async_trait]
impl Anchor for ChainAnchor {
    async fn anchor(&self, event: &AnchorEvent) -> Result<ChainRecord, AnchorError> {
        let actor_hash = event.actor_id.map(identity_commitment);
        let details_hash = match event.kind {
            EventKind::Created => Some(details_commitment(&event.details)),
            _ => None,
        };

        let (method, args) = logger_call(event, actor_hash, details_hash)?;
        let chain_tx_hash = self
            .submit(&self.config.logger_address, method, args)
            .await?;

        Ok(ChainRecord {
            transaction_id: event.transaction_id,
            event: event.kind,
            actor_hash: actor_hash.map(|hash| to_hex(&hash)),
            details_hash: details_hash.map(|hash| to_hex(&hash)),
            metadata: match event.kind {
                EventKind::Flagged => event.reason.clone(),
                _ => None,
            },
            timestamp: event.occurred_at,
            chain_tx_hash,
        })
    }

    /// Mirrors the event to the fund manager contract when one is configured.
    async fn mirror(&self, event: &AnchorEvent, _record: &ChainRecord) -> Result<(), AnchorError> {
        let Some(address) = &self.config.fund_manager_address else {
            return Ok(());
        };

        let (method, args) = fund_manager_call(event, event.actor_id.map(identity_commitment));
        let hash = self.submit(address, method, args).await?;
        tracing::debug!(
            transaction_id = %event.transaction_id,
            event = %event.kind,
            chain_tx_hash = %hash,
            "Fund manager mirror recorded"
        );
        Ok(())
    }
}

pub fn parse_signing_key(hex_seed: &str) -> Result<SigningKey, AnchorError> {
    let trimmed = hex_seed.trim();
    let stripped = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(stripped).map_err(|e| AnchorError::Encoding(e.to_string()))?;
    let seed: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
        AnchorError::Encoding(format!("signing key must be 32 bytes, got {}", bytes.len()))
    })?;
    Ok(SigningKey::from_bytes(&seed))
}

pub fn sign_call(key: &SigningKey, call: CallEnvelope) -> Result<SignedCall, AnchorError> {
    let canonical = serde_json::to_vec(&call).map_err(|e| AnchorError::Encoding(e.to_string()))?;
    let signature = key.sign(&canonical);
    Ok(SignedCall {
        call,
        public_key: hex::encode(key.verifying_key().as_bytes()),
        signature: hex::encode(signature.to_bytes()),
    })
}

fn logger_call(
    event: &AnchorEvent,
    actor_hash: Option<Bytes32>,
    details_hash: Option<Bytes32>,
) -> Result<(&'static str, Vec<CallArg>), AnchorError> {
    let id = CallArg::bytes32(uuid_to_bytes32(event.transaction_id));
    let actor = || {
        actor_hash
            .map(CallArg::bytes32)
            .ok_or_else(|| AnchorError::Encoding(format!("{} event has no actor", event.kind)))
    };

    let call = match event.kind {
        EventKind::Created => {
            let details = details_hash.ok_or_else(|| {
                AnchorError::Encoding("creation event has no details commitment".to_string())
            })?;
            ("recordCreation", vec![id, actor()?, CallArg::bytes32(details)])
        }
        EventKind::Approved => ("recordApproval", vec![id, actor()?]),
        EventKind::Rejected => ("recordRejection", vec![id, actor()?]),
        EventKind::Completed => ("recordCompletion", vec![id, actor()?]),
        EventKind::Flagged => (
            "recordFlag",
            vec![id, CallArg::Str(event.reason.clone().unwrap_or_default())],
        ),
    };
    Ok(call)
}

fn fund_manager_call(
    event: &AnchorEvent,
    actor_hash: Option<Bytes32>,
) -> (&'static str, Vec<CallArg>) {
    let id = CallArg::bytes32(uuid_to_bytes32(event.transaction_id));
    let actor = CallArg::bytes32(actor_hash.unwrap_or([0u8; 32]));
    let details = &event.details;

    match event.kind {
        EventKind::Created => (
            "createTransaction",
            vec![
                id,
                CallArg::Uint(amount_in_cents(&details.amount)),
                CallArg::Str(details.currency.clone()),
                CallArg::Uint8(details.transaction_type.chain_code()),
                CallArg::Str(details.description.clone()),
                CallArg::bytes32(uuid_to_bytes32(details.source_id)),
                CallArg::bytes32(uuid_to_bytes32(details.destination_id)),
                CallArg::bytes32(uuid_to_bytes32(details.fund_id)),
                CallArg::bytes32(
                    details
                        .budget_line_item_id
                        .map(uuid_to_bytes32)
                        .unwrap_or([0u8; 32]),
                ),
                CallArg::bytes32(
                    details
                        .document_ref
                        .as_deref()
                        .map(string_to_bytes32)
                        .unwrap_or([0u8; 32]),
                ),
                actor,
            ],
        ),
        EventKind::Approved => ("approveTransaction", vec![id, actor]),
        EventKind::Rejected => ("rejectTransaction", vec![id, actor]),
        EventKind::Completed => ("completeTransaction", vec![id, actor]),
        EventKind::Flagged => (
            "flagTransaction",
            vec![id, CallArg::Str(event.reason.clone().unwrap_or_default())],
        ),
    }
}

fn amount_in_cents(amount: &BigDecimal) -> String {
    (amount * &BigDecimal::from(100)).with_scale(0).to_string()
}

/// Accepts a JSON number, a decimal string or a `0x` hex string.
fn parse_quantity(value: &Value) -> Result<u128, AnchorError> {
    let invalid = || AnchorError::InvalidResponse(format!("expected a quantity, got {}", value));
    match value {
        Value::Number(n) => n.as_u64().map(u128::from).ok_or_else(invalid),
        Value::String(s) => match s.strip_prefix("0x") {
            Some(hex_digits) => u128::from_str_radix(hex_digits, 16).map_err(|_| invalid()),
            None => s.parse::<u128>().map_err(|_| invalid()),
        },
        _ => Err(invalid()),
    }
}
