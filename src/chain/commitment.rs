//! Fixed-width identifiers and one-way commitments sent on chain in place of raw data.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::chain::EconomicDetails;

pub type Bytes32 = [u8; 32];

/// UUID bytes in the low 16 bytes, zero padded above.
pub fn uuid_to_bytes32(id: Uuid) -> Bytes32 {
    let mut out = [0u8; 32];
    out[16..].copy_from_slice(id.as_bytes());
    out
}

/// UUIDs are mapped directly, anything else is hashed.
pub fn string_to_bytes32(value: &str) -> Bytes32 {
    match Uuid::parse_str(value) {
        Ok(id) => uuid_to_bytes32(id),
        Err(_) => sha256(value.as_bytes()),
    }
}

pub fn identity_commitment(actor_id: Uuid) -> Bytes32 {
    sha256(actor_id.to_string().as_bytes())
}

pub fn details_commitment(details: &EconomicDetails) -> Bytes32 {
    sha256(canonical_details(details).as_bytes())
}

/// `amount:currency:TYPE:source:destination:fund:line_item`, line item empty when absent.
pub fn canonical_details(details: &EconomicDetails) -> String {
    format!(
        "{}:{}:{}:{}:{}:{}:{}",
        details.amount.with_scale(2),
        details.currency,
        details.transaction_type.as_str(),
        details.source_id,
        details.destination_id,
        details.fund_id,
        details
            .budget_line_item_id
            .map(|id| id.to_string())
            .unwrap_or_default()
    )
}

pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn sha256(data: &[u8]) -> Bytes32 {
    Sha256::digest(data).into()
}
