use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ethers::types::{Address, Bytes, H256, Log, Transaction, TransactionReceipt, U64, U256};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::RpcError;

/// Arguments of `eth_call` / `eth_estimateGas`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
}

/// `eth_getLogs` filter over an inclusive block range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub address: Address,
    pub from_block: u64,
    pub to_block: u64,
    pub topic0: H256,
    pub topic1: Option<H256>,
}

/// The JSON-RPC surface the checkpoint client relies on.
#[async_trait::async_trait]
pub trait EthRpc: Send + Sync {
    async fn chain_id(&self) -> Result<u64, RpcError>;

    async fn block_number(&self) -> Result<u64, RpcError>;

    async fn get_balance(&self, address: Address) -> Result<U256, RpcError>;

    async fn gas_price(&self) -> Result<U256, RpcError>;

    async fn get_transaction_count(&self, address: Address) -> Result<U256, RpcError>;

    async fn estimate_gas(&self, call: &CallRequest) -> Result<U256, RpcError>;

    async fn call(&self, call: &CallRequest) -> Result<Bytes, RpcError>;

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, RpcError>;

    async fn get_transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionReceipt>, RpcError>;

    async fn get_transaction(&self, hash: H256) -> Result<Option<Transaction>, RpcError>;

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>, RpcError>;
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// JSON-RPC over HTTP(S)
pub struct HttpRpc {
    endpoint: String,
    http_client: HttpClient,
    next_id: AtomicU64,
}

impl HttpRpc {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Result<Self, RpcError> {
        let http_client = HttpClient::builder().timeout(request_timeout).build()?;

        Ok(Self {
            endpoint: endpoint.into(),
            http_client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, "JSON-RPC request");

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RpcError::Http { status, body });
        }

        let payload: JsonRpcResponse = response.json().await?;

        if let Some(error) = payload.error {
            return Err(classify_error(error));
        }

        serde_json::from_value(payload.result.unwrap_or(Value::Null))
            .map_err(|e| RpcError::Decode(format!("{} result: {}", method, e)))
    }
}

// Nodes report reverts as code 3 (geth) or with a "revert" message (hardhat, anvil).
fn classify_error(error: JsonRpcError) -> RpcError {
    if error.code == 3 || error.message.to_ascii_lowercase().contains("revert") {
        let reason = match error.data {
            Some(Value::String(data)) => format!("{} ({})", error.message, data),
            _ => error.message,
        };
        RpcError::Reverted(reason)
    } else {
        RpcError::Rpc {
            code: error.code,
            message: error.message,
        }
    }
}

fn call_params(call: &CallRequest) -> Value {
    let mut object = json!({
        "to": call.to,
        "data": call.data,
    });
    if let Some(from) = call.from {
        object["from"] = json!(from);
    }
    object
}

fn block_tag(number: u64) -> String {
    format!("0x{:x}", number)
}

#[async_trait::async_trait]
impl EthRpc for HttpRpc {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        let id: U64 = self.request("eth_chainId", json!([])).await?;
        Ok(id.as_u64())
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        let number: U64 = self.request("eth_blockNumber", json!([])).await?;
        Ok(number.as_u64())
    }

    async fn get_balance(&self, address: Address) -> Result<U256, RpcError> {
        self.request("eth_getBalance", json!([address, "latest"])).await
    }

    async fn gas_price(&self) -> Result<U256, RpcError> {
        self.request("eth_gasPrice", json!([])).await
    }

    async fn get_transaction_count(&self, address: Address) -> Result<U256, RpcError> {
        self.request("eth_getTransactionCount", json!([address, "pending"]))
            .await
    }

    async fn estimate_gas(&self, call: &CallRequest) -> Result<U256, RpcError> {
        self.request("eth_estimateGas", json!([call_params(call)]))
            .await
    }

    async fn call(&self, call: &CallRequest) -> Result<Bytes, RpcError> {
        self.request("eth_call", json!([call_params(call), "latest"]))
            .await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, RpcError> {
        self.request("eth_sendRawTransaction", json!([raw])).await
    }

    async fn get_transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        self.request("eth_getTransactionReceipt", json!([hash]))
            .await
    }

    async fn get_transaction(&self, hash: H256) -> Result<Option<Transaction>, RpcError> {
        self.request("eth_getTransactionByHash", json!([hash]))
            .await
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>, RpcError> {
        let filter = json!({
            "address": query.address,
            "fromBlock": block_tag(query.from_block),
            "toBlock": block_tag(query.to_block),
            "topics": [query.topic0, query.topic1],
        });
        self.request("eth_getLogs", json!([filter])).await
    }
}
