use std::fmt;

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use ethers::utils::{format_ether, to_checksum};
use serde::Serialize;

use crate::error::ValidationError;

/// Statuses the dashboard offers. The contract accepts any string.
pub const KNOWN_STATUSES: [&str; 6] = [
    "created",
    "in-transit",
    "customs",
    "delivered",
    "damaged",
    "delayed",
];

pub fn is_known_status(status: &str) -> bool {
    KNOWN_STATUSES.contains(&status.trim().to_ascii_lowercase().as_str())
}

/// One on-chain checkpoint, as returned by `getShipmentHistory`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub shipment_id: String,
    pub timestamp: u64,
    pub location: String,
    pub status: String,
    pub document_hash: Option<String>,
    pub submitted_by: Address,
}

impl Checkpoint {
    pub fn formatted_time(&self) -> String {
        format_timestamp(self.timestamp)
    }
}

/// Arguments of an `addCheckpoint` call before submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointDraft {
    pub shipment_id: String,
    pub location: String,
    pub status: String,
    pub document_hash: String,
}

impl CheckpointDraft {
    pub fn new(
        shipment_id: impl Into<String>,
        location: impl Into<String>,
        status: impl Into<String>,
        document_hash: impl Into<String>,
    ) -> Self {
        Self {
            shipment_id: shipment_id.into(),
            location: location.into(),
            status: status.into(),
            document_hash: document_hash.into(),
        }
    }

    /// Trimmed copy of the draft, checked field by field in call order.
    pub fn normalized(&self) -> Result<CheckpointDraft, ValidationError> {
        let shipment_id = self.shipment_id.trim();
        if shipment_id.is_empty() {
            return Err(ValidationError::Empty("shipment id"));
        }

        let location = self.location.trim();
        if location.is_empty() {
            return Err(ValidationError::Empty("location"));
        }

        let status = self.status.trim();
        if status.is_empty() {
            return Err(ValidationError::Empty("status"));
        }

        Ok(CheckpointDraft::new(
            shipment_id,
            location,
            status,
            self.document_hash.trim(),
        ))
    }
}

/// Authorization tag held by an account, enforced by the contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Role {
    None,
    Manufacturer,
    Courier,
    Inspector,
}

impl Role {
    pub fn from_code(code: u8) -> Option<Role> {
        match code {
            0 => Some(Role::None),
            1 => Some(Role::Manufacturer),
            2 => Some(Role::Courier),
            3 => Some(Role::Inspector),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Role::None => 0,
            Role::Manufacturer => 1,
            Role::Courier => 2,
            Role::Inspector => 3,
        }
    }

    pub fn can_submit(self) -> bool {
        self != Role::None
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::None => "None",
            Role::Manufacturer => "Manufacturer",
            Role::Courier => "Courier",
            Role::Inspector => "Inspector",
        };
        f.write_str(name)
    }
}

/// Outcome of one submission attempt. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResult {
    pub success: bool,
    pub message: String,
    pub tx_hash: Option<H256>,
    pub block_number: Option<u64>,
    pub gas_used: Option<U256>,
    pub gas_limit: U256,
    pub gas_price_gwei: String,
    /// `CheckpointAdded` events decoded from the receipt.
    pub events: Vec<CheckpointEvent>,
}

impl fmt::Display for TransactionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub network_endpoint: Option<String>,
    pub chain_id: Option<u64>,
    pub latest_block: Option<u64>,
    pub account_address: Option<Address>,
    pub balance: Option<String>,
    pub error: Option<String>,
}

/// Shipment identifier of an event. The contract indexes the id, so only
/// its keccak hash is in the log; the plaintext comes from the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ShipmentRef {
    Known(String),
    Unknown(H256),
}

impl ShipmentRef {
    pub fn as_known(&self) -> Option<&str> {
        match self {
            ShipmentRef::Known(id) => Some(id),
            ShipmentRef::Unknown(_) => None,
        }
    }
}

impl fmt::Display for ShipmentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShipmentRef::Known(id) => f.write_str(id),
            ShipmentRef::Unknown(hash) => write!(f, "Unknown ({:#x})", hash),
        }
    }
}

/// A decoded `CheckpointAdded` log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointEvent {
    pub shipment: ShipmentRef,
    pub timestamp: u64,
    pub location: String,
    pub status: String,
    pub submitted_by: Address,
    pub block_number: u64,
    pub transaction_hash: H256,
    pub log_index: u64,
}

impl CheckpointEvent {
    pub fn formatted_time(&self) -> String {
        format_timestamp(self.timestamp)
    }
}

/// Result of scanning `from_block..=to_block`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPage {
    pub events: Vec<CheckpointEvent>,
    pub from_block: u64,
    /// Chain head observed by the scan, `None` when nothing new was mined.
    pub to_block: Option<u64>,
    /// Where the next scan must start to see every block exactly once.
    pub next_from_block: u64,
}

pub fn format_timestamp(timestamp: u64) -> String {
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "Invalid timestamp".to_string())
}

/// Human-readable age of `timestamp` relative to `now`, both Unix seconds.
pub fn relative_time(timestamp: u64, now: u64) -> String {
    let elapsed = now.saturating_sub(timestamp);

    let (amount, unit) = match elapsed {
        0..=59 => return "just now".to_string(),
        60..=3_599 => (elapsed / 60, "minute"),
        3_600..=86_399 => (elapsed / 3_600, "hour"),
        _ => (elapsed / 86_400, "day"),
    };

    if amount == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", amount, unit)
    }
}

pub fn format_balance(wei: U256) -> String {
    format_ether(wei)
        .parse::<f64>()
        .map(|eth| format!("{:.4} ETH", eth))
        .unwrap_or_else(|_| format!("{} wei", wei))
}

/// Parse a `0x` address. Mixed-case input must carry a valid EIP-55 checksum.
pub fn validate_address(input: &str) -> Result<Address, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty("address"));
    }

    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .filter(|digits| digits.len() == 40)
        .ok_or_else(|| ValidationError::MalformedAddress(trimmed.to_string()))?;

    let bytes = hex::decode(digits)
        .map_err(|_| ValidationError::MalformedAddress(trimmed.to_string()))?;
    let address = Address::from_slice(&bytes);

    let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper && to_checksum(&address, None)[2..] != *digits {
        return Err(ValidationError::BadChecksum(trimmed.to_string()));
    }

    Ok(address)
}
