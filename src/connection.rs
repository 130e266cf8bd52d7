use std::sync::Arc;
use std::time::Duration;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use ethers::utils::to_checksum;
use tracing::{info, warn};

use crate::abi::ContractAbi;
use crate::blockchain::{EthRpc, HttpRpc};
use crate::config::Config;
use crate::error::{ConfigError, ConnectionError};
use crate::models::{ConnectionStatus, format_balance, validate_address};

/// Tunables copied out of [`Config`] when a session is opened
#[derive(Debug, Clone)]
pub struct Settings {
    pub confirmation_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub fallback_gas_limit: U256,
    pub gas_price: Option<U256>,
    pub poll_interval: Duration,
    pub event_lookback_blocks: u64,
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            confirmation_timeout: config.confirmation_timeout,
            receipt_poll_interval: config.receipt_poll_interval,
            fallback_gas_limit: U256::from(config.fallback_gas_limit),
            gas_price: config
                .gas_price_gwei
                .map(|gwei| U256::from(gwei) * U256::exp10(9)),
            poll_interval: config.poll_interval,
            event_lookback_blocks: config.event_lookback_blocks,
        }
    }
}

/// Everything a live connection owns. Cloned into the background poller.
#[derive(Clone)]
pub(crate) struct Session {
    pub(crate) rpc: Arc<dyn EthRpc>,
    pub(crate) wallet: LocalWallet,
    pub(crate) contract: Address,
    pub(crate) abi: Arc<ContractAbi>,
    pub(crate) endpoint: String,
    pub(crate) chain_id: u64,
    pub(crate) settings: Settings,
}

impl Session {
    pub(crate) fn account(&self) -> Address {
        self.wallet.address()
    }
}

/// Connection to the tracker contract, owned by one application session.
///
/// Every read, submission and poll goes through a handle; after
/// [`ConnectionHandle::disconnect`] they fail with `NotConnected`.
pub struct ConnectionHandle {
    session: Option<Session>,
}

impl ConnectionHandle {
    /// Validates `config`, opens an HTTP JSON-RPC client and probes the chain.
    pub async fn connect(config: &Config, abi: ContractAbi) -> Result<Self, ConnectionError> {
        config.validate()?;

        let rpc = HttpRpc::new(config.rpc_url.trim(), config.request_timeout).map_err(|e| {
            ConnectionError::Unreachable {
                endpoint: config.rpc_url.clone(),
                reason: e.to_string(),
            }
        })?;

        Self::connect_with(config, abi, Arc::new(rpc)).await
    }

    /// Same as [`ConnectionHandle::connect`] over a caller-supplied transport.
    pub async fn connect_with(
        config: &Config,
        abi: ContractAbi,
        rpc: Arc<dyn EthRpc>,
    ) -> Result<Self, ConnectionError> {
        config.validate()?;

        let key = config.private_key.trim();
        let wallet: LocalWallet = key
            .strip_prefix("0x")
            .unwrap_or(key)
            .parse()
            .map_err(|_| ConfigError::InvalidKey)?;
        let contract =
            validate_address(&config.contract_address).map_err(ConfigError::InvalidContractAddress)?;

        let endpoint = config.rpc_url.trim().to_string();

        let chain_id = match tokio::time::timeout(config.probe_timeout, rpc.chain_id()).await {
            Ok(Ok(chain_id)) => chain_id,
            Ok(Err(e)) => {
                warn!(endpoint = %endpoint, error = %e, "liveness probe failed");
                return Err(ConnectionError::Unreachable {
                    endpoint,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(endpoint = %endpoint, timeout = ?config.probe_timeout, "liveness probe timed out");
                return Err(ConnectionError::Unreachable {
                    endpoint,
                    reason: format!("no answer within {:?}", config.probe_timeout),
                });
            }
        };

        let wallet = wallet.with_chain_id(chain_id);

        info!(
            endpoint = %endpoint,
            chain_id,
            account = %to_checksum(&wallet.address(), None),
            contract = %to_checksum(&contract, None),
            "connected"
        );

        Ok(Self {
            session: Some(Session {
                rpc,
                wallet,
                contract,
                abi: Arc::new(abi),
                endpoint,
                chain_id,
                settings: Settings::from(config),
            }),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn account(&self) -> Option<Address> {
        self.session.as_ref().map(Session::account)
    }

    pub fn contract_address(&self) -> Option<Address> {
        self.session.as_ref().map(|session| session.contract)
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.session.as_ref().map(|session| session.chain_id)
    }

    pub fn settings(&self) -> Option<&Settings> {
        self.session.as_ref().map(|session| &session.settings)
    }

    pub(crate) fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Current chain head and account balance. Read-only, safe to poll.
    pub async fn status(&self) -> ConnectionStatus {
        let Some(session) = &self.session else {
            return ConnectionStatus {
                connected: false,
                error: Some("Not connected".to_string()),
                ..ConnectionStatus::default()
            };
        };

        let mut status = ConnectionStatus {
            network_endpoint: Some(session.endpoint.clone()),
            chain_id: Some(session.chain_id),
            account_address: Some(session.account()),
            ..ConnectionStatus::default()
        };

        match session.rpc.block_number().await {
            Ok(block) => status.latest_block = Some(block),
            Err(e) => {
                status.error = Some(e.to_string());
                return status;
            }
        }

        match session.rpc.get_balance(session.account()).await {
            Ok(balance) => {
                status.connected = true;
                status.balance = Some(format_balance(balance));
            }
            Err(e) => status.error = Some(e.to_string()),
        }

        status
    }

    /// Releases the session. Later calls fail with `NotConnected`.
    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            info!(endpoint = %session.endpoint, "disconnected");
        }
    }
}
