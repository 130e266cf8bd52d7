use std::time::Duration;

use ethers::signers::Signer;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{H256, TransactionReceipt, TransactionRequest, U64, U256};
use ethers::utils::{format_units, keccak256};
use tracing::{debug, info, warn};

use crate::blockchain::CallRequest;
use crate::connection::{ConnectionHandle, Session};
use crate::error::SubmissionError;
use crate::events::receipt_events;
use crate::models::{CheckpointDraft, TransactionResult};

/// Per-call overrides for [`ConnectionHandle::submit`]
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Skip the advisory balance guard and let the chain decide.
    pub skip_balance_check: bool,
    pub confirmation_timeout: Option<Duration>,
}

/// Declared gas limit for an estimate: +20%, rounded up.
pub fn apply_gas_margin(estimate: U256) -> U256 {
    (estimate.saturating_mul(U256::from(6)).saturating_add(U256::from(4))) / U256::from(5)
}

impl ConnectionHandle {
    pub async fn submit_checkpoint(
        &self,
        shipment_id: &str,
        location: &str,
        status: &str,
        document_hash: &str,
    ) -> Result<TransactionResult, SubmissionError> {
        let draft = CheckpointDraft::new(shipment_id, location, status, document_hash);
        self.submit(&draft, &SubmitOptions::default()).await
    }

    /// Builds, signs, broadcasts and confirms one `addCheckpoint` transaction.
    ///
    /// Never retries. Checkpoints are not idempotent, so a second attempt
    /// after a broadcast would append a second entry.
    pub async fn submit(
        &self,
        draft: &CheckpointDraft,
        options: &SubmitOptions,
    ) -> Result<TransactionResult, SubmissionError> {
        let session = self.session().ok_or(SubmissionError::NotConnected)?;
        let draft = draft.normalized()?;
        let account = session.account();

        let data = session
            .abi
            .encode_add_checkpoint(&draft)
            .map_err(|e| SubmissionError::Encoding(e.to_string()))?;
        let call = CallRequest {
            from: Some(account),
            to: session.contract,
            data: data.clone(),
        };

        let gas_limit = declared_gas_limit(session, &call).await;
        let gas_price = match session.settings.gas_price {
            Some(gas_price) => gas_price,
            None => session
                .rpc
                .gas_price()
                .await
                .map_err(SubmissionError::GasEstimationFailure)?,
        };

        if options.skip_balance_check {
            debug!("balance check skipped by caller");
        } else {
            check_balance(session, gas_limit.saturating_mul(gas_price)).await?;
        }

        let nonce = session
            .rpc
            .get_transaction_count(account)
            .await
            .map_err(SubmissionError::NonceError)?;

        let tx: TypedTransaction = TransactionRequest::new()
            .from(account)
            .to(session.contract)
            .data(data)
            .gas(gas_limit)
            .gas_price(gas_price)
            .nonce(nonce)
            .chain_id(session.chain_id)
            .into();

        let signature = session
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| SubmissionError::Signing(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);
        let local_hash = H256::from(keccak256(&raw));

        let mut result = TransactionResult {
            success: false,
            message: String::new(),
            tx_hash: Some(local_hash),
            block_number: None,
            gas_used: None,
            gas_limit,
            gas_price_gwei: format_gwei(gas_price),
            events: Vec::new(),
        };

        info!(
            shipment_id = %draft.shipment_id,
            location = %draft.location,
            status = %draft.status,
            nonce = %nonce,
            gas_limit = %gas_limit,
            tx_hash = ?local_hash,
            "broadcasting checkpoint"
        );

        let tx_hash = match session.rpc.send_raw_transaction(raw).await {
            Ok(tx_hash) => tx_hash,
            Err(e) if e.is_rejection() => {
                warn!(tx_hash = ?local_hash, error = %e, "broadcast rejected");
                result.message = format!("Transaction broadcast failed: {}", e);
                return Err(SubmissionError::NetworkError {
                    result: Box::new(result),
                    source: e,
                });
            }
            // The node may have taken the transaction before the response was lost.
            Err(e) => match session.rpc.get_transaction(local_hash).await {
                Ok(Some(_)) => {
                    warn!(tx_hash = ?local_hash, error = %e, "broadcast response lost, node holds the transaction");
                    local_hash
                }
                lookup => {
                    if let Err(lookup_err) = &lookup {
                        debug!(tx_hash = ?local_hash, error = %lookup_err, "transaction lookup failed");
                    }
                    warn!(tx_hash = ?local_hash, error = %e, "broadcast outcome unknown");
                    result.message = format!(
                        "Transaction broadcast outcome unknown, it may still be mined: {}. Hash: {:#x}",
                        e, local_hash
                    );
                    return Err(SubmissionError::NetworkError {
                        result: Box::new(result),
                        source: e,
                    });
                }
            },
        };
        result.tx_hash = Some(tx_hash);

        let timeout = options
            .confirmation_timeout
            .unwrap_or(session.settings.confirmation_timeout);

        let receipt = match tokio::time::timeout(timeout, wait_for_receipt(session, tx_hash)).await {
            Ok(receipt) => receipt,
            Err(_) => {
                warn!(tx_hash = ?tx_hash, timeout = ?timeout, "confirmation timed out");
                result.message = format!(
                    "Transaction not confirmed within {}s. Hash: {:#x}",
                    timeout.as_secs(),
                    tx_hash
                );
                return Err(SubmissionError::ConfirmationTimeout(Box::new(result)));
            }
        };

        result.block_number = receipt.block_number.map(|block| block.as_u64());
        result.gas_used = receipt.gas_used;
        result.events = receipt_events(session, &receipt, &draft.shipment_id);

        if receipt.status == Some(U64::from(1)) {
            info!(tx_hash = ?tx_hash, block = ?result.block_number, "checkpoint confirmed");
            result.success = true;
            result.message = format!("Transaction successful! Hash: {:#x}", tx_hash);
            Ok(result)
        } else {
            warn!(tx_hash = ?tx_hash, block = ?result.block_number, "checkpoint transaction reverted");
            result.message = format!("Transaction failed. Hash: {:#x}", tx_hash);
            Err(SubmissionError::TransactionReverted(Box::new(result)))
        }
    }
}

async fn declared_gas_limit(session: &Session, call: &CallRequest) -> U256 {
    let estimate = match session.rpc.estimate_gas(call).await {
        Ok(estimate) => estimate,
        Err(e) => {
            warn!(
                error = %e,
                fallback = %session.settings.fallback_gas_limit,
                "gas estimation failed, using fallback limit"
            );
            session.settings.fallback_gas_limit
        }
    };
    apply_gas_margin(estimate)
}

async fn check_balance(session: &Session, max_cost: U256) -> Result<(), SubmissionError> {
    match session.rpc.get_balance(session.account()).await {
        Ok(balance) if balance < max_cost => Err(SubmissionError::InsufficientFunds {
            required: max_cost,
            available: balance,
            shortfall: max_cost - balance,
        }),
        Ok(_) => Ok(()),
        Err(e) => {
            warn!(error = %e, "could not read balance, skipping balance check");
            Ok(())
        }
    }
}

// Polls until a receipt shows up. Bounded by the caller's timeout.
async fn wait_for_receipt(session: &Session, tx_hash: H256) -> TransactionReceipt {
    loop {
        match session.rpc.get_transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) => return receipt,
            Ok(None) => {}
            Err(e) => debug!(tx_hash = ?tx_hash, error = %e, "receipt query failed"),
        }
        tokio::time::sleep(session.settings.receipt_poll_interval).await;
    }
}

fn format_gwei(wei: U256) -> String {
    format_units(wei, "gwei").unwrap_or_else(|_| wei.to_string())
}
