use std::fs;
use std::path::PathBuf;

use ethers::abi::{Abi, Error as AbiError, Event, Function, RawLog, Token};
use ethers::types::{Address, Bytes, H256, Log, U256};
use once_cell::sync::Lazy;

use crate::error::ConfigError;
use crate::models::{Checkpoint, CheckpointDraft};

static BUNDLED_ABI_JSON: &str = include_str!("../abi/SupplyChainTracker.json");

static BUNDLED_ABI: Lazy<Result<Abi, String>> =
    Lazy::new(|| serde_json::from_str(BUNDLED_ABI_JSON).map_err(|e| e.to_string()));

pub const ADD_CHECKPOINT: &str = "addCheckpoint";
pub const GET_CHECKPOINT_COUNT: &str = "getCheckpointCount";
pub const GET_SHIPMENT_HISTORY: &str = "getShipmentHistory";
pub const GET_ROLE: &str = "getRole";
pub const CHECKPOINT_ADDED: &str = "CheckpointAdded";

const REQUIRED_FUNCTIONS: [&str; 4] = [
    ADD_CHECKPOINT,
    GET_CHECKPOINT_COUNT,
    GET_SHIPMENT_HISTORY,
    GET_ROLE,
];

/// Where the contract ABI comes from
#[derive(Debug, Clone)]
pub enum AbiSource {
    Bundled,
    File(PathBuf),
    Inline(String),
}

/// Shipment id field of a `CheckpointAdded` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggedShipmentId {
    Plain(String),
    Hashed(H256),
}

/// Fields of a `CheckpointAdded` log, before the shipment id is resolved
#[derive(Debug, Clone)]
pub struct DecodedCheckpointLog {
    pub shipment_id: LoggedShipmentId,
    pub timestamp: u64,
    pub location: String,
    pub status: String,
    pub submitted_by: Address,
}

/// Tracker contract ABI, checked to contain every entry the client calls.
#[derive(Debug, Clone)]
pub struct ContractAbi {
    abi: Abi,
}

impl ContractAbi {
    pub fn load(source: &AbiSource) -> Result<Self, ConfigError> {
        match source {
            AbiSource::Bundled => Self::bundled(),
            AbiSource::File(path) => {
                let json = fs::read_to_string(path).map_err(|e| {
                    ConfigError::InvalidAbi(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_json(&json)
            }
            AbiSource::Inline(json) => Self::from_json(json),
        }
    }

    pub fn bundled() -> Result<Self, ConfigError> {
        let abi = BUNDLED_ABI.clone().map_err(ConfigError::InvalidAbi)?;
        Self::from_abi(abi)
    }

    /// Accepts either a bare ABI array or a Hardhat artifact with an `abi` key.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let mut value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| ConfigError::InvalidAbi(format!("not valid JSON: {}", e)))?;

        if let Some(inner) = value.get_mut("abi") {
            value = inner.take();
        }

        let abi: Abi = serde_json::from_value(value)
            .map_err(|e| ConfigError::InvalidAbi(format!("not a contract ABI: {}", e)))?;
        Self::from_abi(abi)
    }

    pub fn from_abi(abi: Abi) -> Result<Self, ConfigError> {
        for name in REQUIRED_FUNCTIONS {
            abi.function(name)
                .map_err(|_| ConfigError::InvalidAbi(format!("function {} is missing", name)))?;
        }
        abi.event(CHECKPOINT_ADDED).map_err(|_| {
            ConfigError::InvalidAbi(format!("event {} is missing", CHECKPOINT_ADDED))
        })?;

        Ok(Self { abi })
    }

    pub fn abi(&self) -> &Abi {
        &self.abi
    }

    pub fn function(&self, name: &str) -> Result<&Function, AbiError> {
        self.abi.function(name)
    }

    pub fn checkpoint_added(&self) -> Result<&Event, AbiError> {
        self.abi.event(CHECKPOINT_ADDED)
    }

    pub fn encode_add_checkpoint(&self, draft: &CheckpointDraft) -> Result<Bytes, AbiError> {
        let encoded = self.function(ADD_CHECKPOINT)?.encode_input(&[
            Token::String(draft.shipment_id.clone()),
            Token::String(draft.location.clone()),
            Token::String(draft.status.clone()),
            Token::String(draft.document_hash.clone()),
        ])?;
        Ok(encoded.into())
    }

    pub fn encode_checkpoint_count(&self, shipment_id: &str) -> Result<Bytes, AbiError> {
        let encoded = self
            .function(GET_CHECKPOINT_COUNT)?
            .encode_input(&[Token::String(shipment_id.to_string())])?;
        Ok(encoded.into())
    }

    pub fn encode_shipment_history(&self, shipment_id: &str) -> Result<Bytes, AbiError> {
        let encoded = self
            .function(GET_SHIPMENT_HISTORY)?
            .encode_input(&[Token::String(shipment_id.to_string())])?;
        Ok(encoded.into())
    }

    pub fn encode_role(&self, address: Address) -> Result<Bytes, AbiError> {
        let encoded = self
            .function(GET_ROLE)?
            .encode_input(&[Token::Address(address)])?;
        Ok(encoded.into())
    }

    pub fn decode_checkpoint_count(&self, output: &[u8]) -> Result<U256, AbiError> {
        first_uint(self.function(GET_CHECKPOINT_COUNT)?.decode_output(output)?)
    }

    pub fn decode_role(&self, output: &[u8]) -> Result<U256, AbiError> {
        first_uint(self.function(GET_ROLE)?.decode_output(output)?)
    }

    pub fn decode_shipment_history(&self, output: &[u8]) -> Result<Vec<Checkpoint>, AbiError> {
        let entries = self
            .function(GET_SHIPMENT_HISTORY)?
            .decode_output(output)?
            .into_iter()
            .next()
            .and_then(Token::into_array)
            .ok_or(AbiError::InvalidData)?;

        entries
            .into_iter()
            .map(|entry| {
                entry
                    .into_tuple()
                    .and_then(checkpoint_from_tokens)
                    .ok_or(AbiError::InvalidData)
            })
            .collect()
    }

    /// Shipment id argument of an `addCheckpoint` call, if `input` is one.
    pub fn decode_add_checkpoint_shipment(&self, input: &[u8]) -> Option<String> {
        let function = self.function(ADD_CHECKPOINT).ok()?;
        if input.len() < 4 || input[..4] != function.short_signature() {
            return None;
        }

        function
            .decode_input(&input[4..])
            .ok()?
            .into_iter()
            .next()
            .and_then(Token::into_string)
    }

    pub fn decode_checkpoint_added(&self, log: &Log) -> Result<DecodedCheckpointLog, AbiError> {
        let parsed = self.checkpoint_added()?.parse_log(RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        })?;

        let mut shipment_id = None;
        let mut timestamp = None;
        let mut location = None;
        let mut status = None;
        let mut submitted_by = None;

        for param in parsed.params {
            match (param.name.as_str(), param.value) {
                ("shipmentId", Token::String(id)) => {
                    shipment_id = Some(LoggedShipmentId::Plain(id));
                }
                // Indexed dynamic values only leave their keccak hash in the topic.
                ("shipmentId", Token::FixedBytes(hash)) if hash.len() == 32 => {
                    shipment_id = Some(LoggedShipmentId::Hashed(H256::from_slice(&hash)));
                }
                ("timestamp", Token::Uint(value)) => timestamp = u256_to_u64(value),
                ("location", Token::String(value)) => location = Some(value),
                ("status", Token::String(value)) => status = Some(value),
                ("submittedBy", Token::Address(value)) => submitted_by = Some(value),
                _ => {}
            }
        }

        match (shipment_id, timestamp, location, status, submitted_by) {
            (Some(shipment_id), Some(timestamp), Some(location), Some(status), Some(submitted_by)) => {
                Ok(DecodedCheckpointLog {
                    shipment_id,
                    timestamp,
                    location,
                    status,
                    submitted_by,
                })
            }
            _ => Err(AbiError::InvalidData),
        }
    }
}

fn first_uint(tokens: Vec<Token>) -> Result<U256, AbiError> {
    tokens
        .into_iter()
        .next()
        .and_then(Token::into_uint)
        .ok_or(AbiError::InvalidData)
}

// (shipmentId, timestamp, location, status, documentHash, submittedBy)
fn checkpoint_from_tokens(fields: Vec<Token>) -> Option<Checkpoint> {
    let mut fields = fields.into_iter();

    let shipment_id = fields.next()?.into_string()?;
    let timestamp = u256_to_u64(fields.next()?.into_uint()?)?;
    let location = fields.next()?.into_string()?;
    let status = fields.next()?.into_string()?;
    let document_hash = fields.next()?.into_string()?;
    let submitted_by = fields.next()?.into_address()?;

    Some(Checkpoint {
        shipment_id,
        timestamp,
        location,
        status,
        document_hash: Some(document_hash).filter(|hash| !hash.is_empty()),
        submitted_by,
    })
}

pub(crate) fn u256_to_u64(value: U256) -> Option<u64> {
    (value <= U256::from(u64::MAX)).then(|| value.low_u64())
}
