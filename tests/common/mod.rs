#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ethers::abi::{Token, encode};
use ethers::types::{Address, Bytes, H256, Log, Transaction, TransactionReceipt, U64, U256};
use ethers::utils::keccak256;
use ethers::utils::rlp::Rlp;

use chain_checkpoint::ConnectionHandle;
use chain_checkpoint::abi::{
    ADD_CHECKPOINT, ContractAbi, GET_CHECKPOINT_COUNT, GET_ROLE, GET_SHIPMENT_HISTORY,
};
use chain_checkpoint::blockchain::{CallRequest, EthRpc, LogQuery};
use chain_checkpoint::config::Config;
use chain_checkpoint::error::RpcError;
use chain_checkpoint::models::CheckpointDraft;

pub const RPC_URL: &str = "http://127.0.0.1:8545";
// Hardhat account #0
pub const PRIVATE_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const ACCOUNT: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
pub const CONTRACT: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";
pub const OTHER_ACCOUNT: &str = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8";

pub const CHAIN_ID: u64 = 31337;
pub const GAS_ESTIMATE: u64 = 150_000;
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

pub fn address(hex: &str) -> Address {
    hex.parse().expect("test address")
}

pub fn id_hash(shipment_id: &str) -> H256 {
    H256::from(keccak256(shipment_id.as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptMode {
    Mined,
    Reverted,
    Pending,
}

#[derive(Debug, Clone)]
pub struct StoredCheckpoint {
    pub shipment_id: String,
    pub timestamp: u64,
    pub location: String,
    pub status: String,
    pub document_hash: String,
    pub submitted_by: Address,
}

pub struct ChainState {
    pub head: u64,
    pub sender: Address,
    pub balance: U256,
    pub gas_price: U256,
    pub gas_estimate: Option<U256>,
    pub nonce: U256,
    pub receipt_mode: ReceiptMode,
    pub send_error: Option<String>,
    /// Accept the transaction, then fail the response as a dropped connection would.
    pub lose_send_response: bool,
    /// Emit logs for an ABI that does not index the shipment id.
    pub plain_ids: bool,
    pub gas_price_error: bool,
    pub nonce_error: bool,
    pub balance_error: bool,
    pub call_reverts: bool,
    pub logs_error: bool,
    pub unreachable: bool,
    pub roles: HashMap<Address, u64>,
    pub enforce_roles: bool,
    pub checkpoints: HashMap<String, Vec<StoredCheckpoint>>,
    pub logs: Vec<Log>,
    pub transactions: HashMap<H256, Transaction>,
    pub receipts: HashMap<H256, TransactionReceipt>,
    pub failing_lookups: HashSet<H256>,
    pub sent_nonces: Vec<U256>,
    pub calls: HashMap<&'static str, usize>,
}

/// In-memory chain running the tracker contract. Counts every RPC call.
pub struct StubChain {
    abi: ContractAbi,
    contract: Address,
    state: Mutex<ChainState>,
}

impl StubChain {
    pub fn new() -> Arc<Self> {
        let sender = address(ACCOUNT);
        let mut roles = HashMap::new();
        roles.insert(sender, 1);

        Arc::new(Self {
            abi: ContractAbi::bundled().expect("bundled ABI"),
            contract: address(CONTRACT),
            state: Mutex::new(ChainState {
                head: 10,
                sender,
                balance: U256::exp10(18),
                gas_price: U256::from(20) * U256::exp10(9),
                gas_estimate: Some(U256::from(GAS_ESTIMATE)),
                nonce: U256::zero(),
                receipt_mode: ReceiptMode::Mined,
                send_error: None,
                lose_send_response: false,
                plain_ids: false,
                gas_price_error: false,
                nonce_error: false,
                balance_error: false,
                call_reverts: false,
                logs_error: false,
                unreachable: false,
                roles,
                enforce_roles: false,
                checkpoints: HashMap::new(),
                logs: Vec::new(),
                transactions: HashMap::new(),
                receipts: HashMap::new(),
                failing_lookups: HashSet::new(),
                sent_nonces: Vec::new(),
                calls: HashMap::new(),
            }),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().expect("stub chain lock")
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state().calls.get(method).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state().calls.values().sum()
    }

    pub fn checkpoint_count(&self, shipment_id: &str) -> usize {
        self.state()
            .checkpoints
            .get(shipment_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Mines one block holding an `addCheckpoint` call, as if another client
    /// had sent it. Returns the transaction hash.
    pub fn mine_checkpoint(
        &self,
        shipment_id: &str,
        location: &str,
        status: &str,
        submitted_by: Address,
    ) -> H256 {
        let draft = CheckpointDraft::new(shipment_id, location, status, "");
        let input = self.abi.encode_add_checkpoint(&draft).expect("encode call");

        let mut state = self.state();
        let nonce = state.transactions.len() as u64;
        let mut preimage = input.to_vec();
        preimage.extend_from_slice(&nonce.to_be_bytes());
        preimage.extend_from_slice(submitted_by.as_bytes());
        let tx_hash = H256::from(keccak256(&preimage));

        self.execute(&mut state, tx_hash, submitted_by, &input);
        tx_hash
    }

    /// Mines a block holding a `CheckpointAdded` log whose data cannot be decoded.
    pub fn mine_malformed_log(&self) {
        let signature = self.abi.checkpoint_added().expect("CheckpointAdded").signature();
        let mut state = self.state();
        state.head += 1;
        let block = state.head;
        let log_index = state.logs.len() as u64;
        state.logs.push(Log {
            address: self.contract,
            topics: vec![signature, id_hash("SHIP-BROKEN"), H256::from(address(ACCOUNT))],
            data: Bytes::from(vec![0xde, 0xad]),
            block_number: Some(U64::from(block)),
            transaction_hash: Some(H256::repeat_byte(0xbb)),
            log_index: Some(U256::from(log_index)),
            ..Default::default()
        });
    }

    /// Advances the head without touching the contract.
    pub fn mine_empty_blocks(&self, count: u64) {
        self.state().head += count;
    }

    fn record(&self, method: &'static str) -> MutexGuard<'_, ChainState> {
        let mut state = self.state();
        *state.calls.entry(method).or_insert(0) += 1;
        state
    }

    // Applies one addCheckpoint call in a new block and stores its receipt.
    fn execute(&self, state: &mut ChainState, tx_hash: H256, sender: Address, input: &[u8]) {
        state.head += 1;
        let block = state.head;
        let timestamp = GENESIS_TIMESTAMP + block * 12;

        let function = self.abi.function(ADD_CHECKPOINT).expect("addCheckpoint");
        let args = function.decode_input(&input[4..]).expect("addCheckpoint input");
        let text = |i: usize| args[i].clone().into_string().expect("string argument");
        let (shipment_id, location, status, document_hash) = (text(0), text(1), text(2), text(3));

        let authorized = !state.enforce_roles
            || state.roles.get(&sender).copied().unwrap_or(0) != 0;
        let succeeded = authorized && state.receipt_mode != ReceiptMode::Reverted;

        state.transactions.insert(
            tx_hash,
            Transaction {
                hash: tx_hash,
                from: sender,
                to: Some(self.contract),
                input: Bytes::from(input.to_vec()),
                block_number: Some(U64::from(block)),
                ..Default::default()
            },
        );

        let mut receipt_logs = Vec::new();
        if succeeded {
            state
                .checkpoints
                .entry(shipment_id.clone())
                .or_default()
                .push(StoredCheckpoint {
                    shipment_id: shipment_id.clone(),
                    timestamp,
                    location: location.clone(),
                    status: status.clone(),
                    document_hash,
                    submitted_by: sender,
                });

            let signature = self.abi.checkpoint_added().expect("CheckpointAdded").signature();
            let (topics, data) = if state.plain_ids {
                (
                    vec![signature, H256::from(sender)],
                    encode(&[
                        Token::String(shipment_id),
                        Token::Uint(U256::from(timestamp)),
                        Token::String(location),
                        Token::String(status),
                    ]),
                )
            } else {
                (
                    vec![signature, id_hash(&shipment_id), H256::from(sender)],
                    encode(&[
                        Token::Uint(U256::from(timestamp)),
                        Token::String(location),
                        Token::String(status),
                    ]),
                )
            };
            let log_index = state.logs.len() as u64;
            let log = Log {
                address: self.contract,
                topics,
                data: Bytes::from(data),
                block_number: Some(U64::from(block)),
                transaction_hash: Some(tx_hash),
                log_index: Some(U256::from(log_index)),
                ..Default::default()
            };
            state.logs.push(log.clone());
            receipt_logs.push(log);
        }

        state.receipts.insert(
            tx_hash,
            TransactionReceipt {
                transaction_hash: tx_hash,
                block_number: Some(U64::from(block)),
                gas_used: Some(U256::from(GAS_ESTIMATE - 20_000)),
                status: Some(U64::from(u64::from(succeeded))),
                logs: receipt_logs,
                ..Default::default()
            },
        );
    }

    fn answer_call(&self, state: &ChainState, data: &[u8]) -> Result<Bytes, RpcError> {
        if state.call_reverts {
            return Err(RpcError::Reverted("execution reverted".to_string()));
        }

        let selector = &data[..4];
        let args = &data[4..];
        let matches = |name: &str| {
            self.abi
                .function(name)
                .map(|f| f.short_signature() == selector)
                .unwrap_or(false)
        };

        if matches(GET_CHECKPOINT_COUNT) {
            let id = self.string_arg(GET_CHECKPOINT_COUNT, args);
            let count = state.checkpoints.get(&id).map(Vec::len).unwrap_or(0);
            Ok(encode(&[Token::Uint(U256::from(count))]).into())
        } else if matches(GET_SHIPMENT_HISTORY) {
            let id = self.string_arg(GET_SHIPMENT_HISTORY, args);
            let entries = state
                .checkpoints
                .get(&id)
                .map(|history| {
                    history
                        .iter()
                        .map(|c| {
                            Token::Tuple(vec![
                                Token::String(c.shipment_id.clone()),
                                Token::Uint(U256::from(c.timestamp)),
                                Token::String(c.location.clone()),
                                Token::String(c.status.clone()),
                                Token::String(c.document_hash.clone()),
                                Token::Address(c.submitted_by),
                            ])
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(encode(&[Token::Array(entries)]).into())
        } else if matches(GET_ROLE) {
            let tokens = self
                .abi
                .function(GET_ROLE)
                .and_then(|f| f.decode_input(args))
                .map_err(|e| RpcError::Decode(e.to_string()))?;
            let account = tokens
                .into_iter()
                .next()
                .and_then(Token::into_address)
                .ok_or_else(|| RpcError::Decode("getRole argument".to_string()))?;
            let code = state.roles.get(&account).copied().unwrap_or(0);
            Ok(encode(&[Token::Uint(U256::from(code))]).into())
        } else {
            Err(RpcError::Reverted("unknown selector".to_string()))
        }
    }

    fn string_arg(&self, function: &str, args: &[u8]) -> String {
        self.abi
            .function(function)
            .and_then(|f| f.decode_input(args))
            .ok()
            .and_then(|tokens| tokens.into_iter().next())
            .and_then(Token::into_string)
            .unwrap_or_default()
    }
}

fn node_error(message: &str) -> RpcError {
    RpcError::Rpc {
        code: -32000,
        message: message.to_string(),
    }
}

#[async_trait::async_trait]
impl EthRpc for StubChain {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        let state = self.record("eth_chainId");
        if state.unreachable {
            return Err(RpcError::Http {
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        Ok(CHAIN_ID)
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        Ok(self.record("eth_blockNumber").head)
    }

    async fn get_balance(&self, _address: Address) -> Result<U256, RpcError> {
        let state = self.record("eth_getBalance");
        if state.balance_error {
            return Err(node_error("balance unavailable"));
        }
        Ok(state.balance)
    }

    async fn gas_price(&self) -> Result<U256, RpcError> {
        let state = self.record("eth_gasPrice");
        if state.gas_price_error {
            return Err(node_error("gas price unavailable"));
        }
        Ok(state.gas_price)
    }

    async fn get_transaction_count(&self, _address: Address) -> Result<U256, RpcError> {
        let state = self.record("eth_getTransactionCount");
        if state.nonce_error {
            return Err(node_error("nonce unavailable"));
        }
        Ok(state.nonce)
    }

    async fn estimate_gas(&self, _call: &CallRequest) -> Result<U256, RpcError> {
        self.record("eth_estimateGas")
            .gas_estimate
            .ok_or_else(|| RpcError::Reverted("execution reverted".to_string()))
    }

    async fn call(&self, call: &CallRequest) -> Result<Bytes, RpcError> {
        let state = self.record("eth_call");
        assert_eq!(call.to, self.contract, "call sent to the wrong contract");
        self.answer_call(&state, &call.data)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, RpcError> {
        let mut state = self.record("eth_sendRawTransaction");
        if let Some(message) = &state.send_error {
            return Err(node_error(message));
        }

        let rlp = Rlp::new(&raw[..]);
        let nonce: U256 = rlp.val_at(0).map_err(|e| RpcError::Decode(e.to_string()))?;
        let input: Vec<u8> = rlp.val_at(5).map_err(|e| RpcError::Decode(e.to_string()))?;
        let tx_hash = H256::from(keccak256(&raw[..]));

        state.sent_nonces.push(nonce);
        state.nonce = nonce + U256::one();

        if state.receipt_mode != ReceiptMode::Pending {
            let sender = state.sender;
            self.execute(&mut state, tx_hash, sender, &input);
        }
        if state.lose_send_response {
            return Err(RpcError::Decode("eth_sendRawTransaction result: unexpected EOF".to_string()));
        }
        Ok(tx_hash)
    }

    async fn get_transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        Ok(self.record("eth_getTransactionReceipt").receipts.get(&hash).cloned())
    }

    async fn get_transaction(&self, hash: H256) -> Result<Option<Transaction>, RpcError> {
        let state = self.record("eth_getTransactionByHash");
        if state.failing_lookups.contains(&hash) {
            return Err(node_error("transaction lookup failed"));
        }
        Ok(state.transactions.get(&hash).cloned())
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>, RpcError> {
        let state = self.record("eth_getLogs");
        if state.logs_error {
            return Err(node_error("log query failed"));
        }
        let logs = state
            .logs
            .iter()
            .filter(|log| log.address == query.address)
            .filter(|log| {
                let block = log.block_number.map(|b| b.as_u64()).unwrap_or_default();
                (query.from_block..=query.to_block).contains(&block)
            })
            .filter(|log| log.topics.first() == Some(&query.topic0))
            .filter(|log| match query.topic1 {
                Some(topic) => log.topics.get(1) == Some(&topic),
                None => true,
            })
            .cloned()
            .collect();
        Ok(logs)
    }
}

pub fn test_config() -> Config {
    let mut config = Config::new(RPC_URL, PRIVATE_KEY, CONTRACT);
    config.receipt_poll_interval = Duration::from_millis(10);
    config.confirmation_timeout = Duration::from_secs(5);
    config.probe_timeout = Duration::from_secs(1);
    config
}

pub async fn connect(chain: &Arc<StubChain>) -> ConnectionHandle {
    connect_with_config(chain, &test_config()).await
}

/// The bundled ABI with `CheckpointAdded.shipmentId` declared non-indexed.
pub fn plain_id_abi() -> ContractAbi {
    let mut abi: serde_json::Value =
        serde_json::from_str(include_str!("../../abi/SupplyChainTracker.json")).expect("ABI JSON");
    for entry in abi.as_array_mut().expect("ABI array") {
        if entry["name"] == "CheckpointAdded" {
            entry["inputs"][0]["indexed"] = serde_json::Value::Bool(false);
        }
    }
    ContractAbi::from_json(&abi.to_string()).expect("plain id ABI")
}

pub async fn connect_with_config(chain: &Arc<StubChain>, config: &Config) -> ConnectionHandle {
    ConnectionHandle::connect_with(
        config,
        ContractAbi::bundled().expect("bundled ABI"),
        chain.clone(),
    )
    .await
    .expect("connect to stub chain")
}
