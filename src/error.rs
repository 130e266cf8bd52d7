use ethers::types::{H256, U256};
use thiserror::Error;

use crate::models::TransactionResult;

/// Missing or malformed settings. Never retried automatically.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("RPC_URL is not set")]
    MissingEndpoint,

    #[error("PRIVATE_KEY is not set")]
    MissingKey,

    #[error("CONTRACT_ADDRESS is not set")]
    MissingContractAddress,

    #[error("PRIVATE_KEY is not a valid secp256k1 signing key")]
    InvalidKey,

    #[error("CONTRACT_ADDRESS is invalid: {0}")]
    InvalidContractAddress(#[source] ValidationError),

    #[error("{name} has an invalid value: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("contract ABI is unusable: {0}")]
    InvalidAbi(String),
}

/// Input rejected before any network round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    #[error("{0} is not a 0x-prefixed 20-byte hex address")]
    MalformedAddress(String),

    #[error("{0} does not match its EIP-55 checksum")]
    BadChecksum(String),
}

/// Failures of the JSON-RPC transport itself.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("RPC endpoint answered with HTTP status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("execution reverted: {0}")]
    Reverted(String),

    #[error("unexpected JSON-RPC payload: {0}")]
    Decode(String),
}

impl RpcError {
    /// The node answered and refused the request. Transport failures are
    /// not rejections: the request may have been processed anyway.
    pub fn is_rejection(&self) -> bool {
        matches!(self, RpcError::Rpc { .. } | RpcError::Reverted(_))
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("RPC endpoint {endpoint} is unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },
}

/// Failures of the read-only contract calls.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("not connected")]
    NotConnected,

    #[error(transparent)]
    InvalidInput(#[from] ValidationError),

    #[error("no checkpoints recorded for shipment {0}")]
    NotFound(String),

    #[error("contract call reverted: {0}")]
    Reverted(String),

    #[error("contract returned an unknown role code {0}")]
    UnexpectedRole(U256),

    #[error("contract response does not match the ABI: {0}")]
    Abi(String),

    #[error(transparent)]
    Rpc(RpcError),
}

impl From<RpcError> for ReadError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Reverted(reason) => ReadError::Reverted(reason),
            other => ReadError::Rpc(other),
        }
    }
}

/// Failures of a checkpoint submission. Variants raised once a
/// transaction has been signed carry the partial result, including its hash.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("not connected")]
    NotConnected,

    #[error(transparent)]
    InvalidInput(#[from] ValidationError),

    #[error(
        "insufficient funds: transaction may cost up to {required} wei, balance is {available} wei (short by {shortfall} wei)"
    )]
    InsufficientFunds {
        required: U256,
        available: U256,
        shortfall: U256,
    },

    #[error("could not read account nonce: {0}")]
    NonceError(RpcError),

    #[error("could not price the transaction: {0}")]
    GasEstimationFailure(RpcError),

    #[error("could not encode the call: {0}")]
    Encoding(String),

    #[error("could not sign the transaction: {0}")]
    Signing(String),

    #[error("{0}")]
    TransactionReverted(Box<TransactionResult>),

    #[error("{0}")]
    ConfirmationTimeout(Box<TransactionResult>),

    /// Broadcast failed. `source` tells whether the node rejected the
    /// transaction or the response was lost on the way back.
    #[error("{result}")]
    NetworkError {
        result: Box<TransactionResult>,
        source: RpcError,
    },
}

impl SubmissionError {
    /// The partial result for failures that happened after signing.
    pub fn result(&self) -> Option<&TransactionResult> {
        match self {
            SubmissionError::TransactionReverted(result)
            | SubmissionError::ConfirmationTimeout(result)
            | SubmissionError::NetworkError { result, .. } => Some(&**result),
            _ => None,
        }
    }

    pub fn tx_hash(&self) -> Option<H256> {
        self.result().and_then(|result| result.tx_hash)
    }

    /// Whether re-submitting the same checkpoint cannot create a duplicate.
    ///
    /// Only failures that happened before the node accepted the transaction
    /// qualify; an unconfirmed transaction may still be mined later. A
    /// broadcast whose response was lost counts as accepted.
    pub fn is_retry_safe(&self) -> bool {
        match self {
            SubmissionError::TransactionReverted(_) | SubmissionError::ConfirmationTimeout(_) => {
                false
            }
            SubmissionError::NetworkError { source, .. } => source.is_rejection(),
            _ => true,
        }
    }
}
