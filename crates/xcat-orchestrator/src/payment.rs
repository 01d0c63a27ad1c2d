//! x402 payment challenge decoding and payment proof building
//!
//! A `PAYMENT_REQUIRED` failure carries the challenge in `error.details`,
//! either already decoded (`payment_required`) or as base64 JSON
//! (`payment_required_b64`). The proof sent back to `x402_topup` is base64
//! of compact JSON.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};
use xcat_core::{HandshakeFailure, Network};

/// Smallest top-up the service accepts, in USDC
pub const MIN_TOPUP_USDC: &str = "0.50";

/// x402 protocol version spoken by the proof
pub const X402_VERSION: u8 = 1;

/// Accepts padded and unpadded input
const LENIENT_B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Unpaid quote the service wants settled before creating the task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentChallenge {
    pub quote_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_cost_points: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_points: Option<Number>,
    /// Per-network payment target (payTo, amount, asset), opaque here
    #[serde(default)]
    pub accepts: Map<String, Value>,
}

impl PaymentChallenge {
    /// Payment target advertised for `network`, if any
    pub fn target(&self, network: Network) -> Option<&Value> {
        self.accepts.get(&network.to_string())
    }

    /// Short summary shown to the user before paying
    pub fn summary(&self) -> Value {
        json!({
            "quote_id": self.quote_id,
            "expires_in": self.expires_in,
            "task_cost_points": self.task_cost_points,
            "balance_points": self.balance_points,
            "minimum_topup_usdc": MIN_TOPUP_USDC,
            "base": self.target(Network::Base),
            "solana": self.target(Network::Solana),
        })
    }
}

/// Decode the raw challenge object out of `error.details`
///
/// An undecodable payload is not an error here: it comes back as
/// `{"_raw": <text>}` and fails later in [`extract_challenge`].
pub fn decode_challenge(details: &Map<String, Value>) -> Result<Value, HandshakeFailure> {
    if let Some(decoded) = details.get("payment_required").filter(|v| v.is_object()) {
        return Ok(decoded.clone());
    }

    let encoded = details
        .get("payment_required_b64")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(HandshakeFailure::MissingChallenge)?;

    Ok(decode_challenge_b64(encoded))
}

/// Base64 -> UTF-8 (lossy) -> JSON object, or the `_raw` fallback
pub fn decode_challenge_b64(encoded: &str) -> Value {
    let text = match LENIENT_B64.decode(encoded) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::warn!("payment_required_b64 is not valid base64: {}", e);
            encoded.to_string()
        }
    };

    match serde_json::from_str::<Value>(&text) {
        Ok(obj @ Value::Object(_)) => obj,
        _ => json!({ "_raw": text }),
    }
}

/// Pull the fields needed to pay and retry out of a decoded challenge
pub fn extract_challenge(decoded: &Value) -> Result<PaymentChallenge, HandshakeFailure> {
    let quote_id = decoded
        .get("quote_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or(HandshakeFailure::MissingQuote)?;

    let number = |key: &str| match decoded.get(key) {
        Some(Value::Number(n)) => Some(n.clone()),
        _ => None,
    };

    Ok(PaymentChallenge {
        quote_id: quote_id.to_string(),
        expires_in: number("expires_in"),
        task_cost_points: number("task_cost_points"),
        balance_points: number("balance_points"),
        accepts: decoded
            .get("accepts")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
    })
}

/// Proof of an on-chain payment, in x402 "exact" scheme form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentProof {
    pub network: Network,
    /// Transaction hash (base) or signature (solana), taken verbatim
    pub evidence: String,
}

impl PaymentProof {
    pub fn new(network: Network, evidence: impl Into<String>) -> Self {
        Self {
            network,
            evidence: evidence.into(),
        }
    }

    pub fn to_json(&self) -> Value {
        let mut payload = Map::new();
        payload.insert(
            self.network.evidence_key().to_string(),
            Value::String(self.evidence.clone()),
        );
        json!({
            "x402Version": X402_VERSION,
            "scheme": "exact",
            "network": self.network.chain_id(),
            "payload": payload,
        })
    }

    /// Value for the `payment_signature_b64` argument of `x402_topup`
    pub fn encode(&self) -> String {
        STANDARD.encode(self.to_json().to_string())
    }
}
