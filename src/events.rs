use std::collections::HashMap;

use ethers::types::{H256, Log, TransactionReceipt};
use ethers::utils::keccak256;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::abi::{DecodedCheckpointLog, LoggedShipmentId};
use crate::blockchain::LogQuery;
use crate::connection::{ConnectionHandle, Session};
use crate::error::{ReadError, ValidationError};
use crate::models::{CheckpointEvent, EventPage, ShipmentRef};

impl ConnectionHandle {
    /// One bounded scan from `from_block` to the current head.
    ///
    /// Pass the returned `next_from_block` to the following call to see every
    /// block exactly once.
    pub async fn poll_once(
        &self,
        from_block: u64,
        shipment_filter: Option<&str>,
    ) -> Result<EventPage, ReadError> {
        let session = self.session().ok_or(ReadError::NotConnected)?;
        let shipment_filter = normalize_filter(shipment_filter)?;
        scan(session, from_block, shipment_filter).await
    }

    /// At most `limit` events from the configured lookback window, oldest first.
    pub async fn recent_events(
        &self,
        shipment_filter: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CheckpointEvent>, ReadError> {
        let session = self.session().ok_or(ReadError::NotConnected)?;
        let shipment_filter = normalize_filter(shipment_filter)?;

        let head = session.rpc.block_number().await?;
        let from_block = head.saturating_sub(session.settings.event_lookback_blocks);

        let mut events = scan(session, from_block, shipment_filter).await?.events;
        let skip = events.len().saturating_sub(limit);
        Ok(events.split_off(skip))
    }
}

pub(crate) fn normalize_filter(filter: Option<&str>) -> Result<Option<&str>, ValidationError> {
    match filter.map(str::trim) {
        Some("") => Err(ValidationError::Empty("shipment filter")),
        other => Ok(other),
    }
}

fn id_hash(shipment_id: &str) -> H256 {
    H256::from(keccak256(shipment_id.as_bytes()))
}

pub(crate) async fn scan(
    session: &Session,
    from_block: u64,
    shipment_filter: Option<&str>,
) -> Result<EventPage, ReadError> {
    let head = session.rpc.block_number().await?;
    if from_block > head {
        return Ok(EventPage {
            events: Vec::new(),
            from_block,
            to_block: None,
            next_from_block: from_block,
        });
    }

    let event = session
        .abi
        .checkpoint_added()
        .map_err(|e| ReadError::Abi(e.to_string()))?;

    // Only an indexed id occupies topic1. Otherwise topic1 is the submitter
    // and the filter is applied to the decoded ids below.
    let id_indexed = event
        .inputs
        .iter()
        .any(|param| param.name == "shipmentId" && param.indexed);

    let query = LogQuery {
        address: session.contract,
        from_block,
        to_block: head,
        topic0: event.signature(),
        topic1: shipment_filter.filter(|_| id_indexed).map(id_hash),
    };
    let logs = session.rpc.get_logs(&query).await?;
    debug!(from_block, to_block = head, logs = logs.len(), "scanned CheckpointAdded logs");

    let mut decoded = Vec::with_capacity(logs.len());
    for log in &logs {
        match session.abi.decode_checkpoint_added(log) {
            Ok(fields) => decoded.push((log, fields)),
            Err(e) => warn!(
                tx_hash = ?log.transaction_hash,
                log_index = ?log.log_index,
                error = %e,
                "skipping undecodable CheckpointAdded log"
            ),
        }
    }

    if let Some(id) = shipment_filter.filter(|_| !id_indexed) {
        decoded.retain(|(_, fields)| match &fields.shipment_id {
            LoggedShipmentId::Plain(logged) => logged == id,
            LoggedShipmentId::Hashed(hash) => *hash == id_hash(id),
        });
    }

    let lookups = resolve_hashed_ids(session, &decoded, shipment_filter).await;

    let events = decoded
        .into_iter()
        .map(|(log, fields)| {
            let transaction_hash = log.transaction_hash.unwrap_or_default();
            let shipment = match &fields.shipment_id {
                LoggedShipmentId::Plain(id) => ShipmentRef::Known(id.clone()),
                LoggedShipmentId::Hashed(hash) => match shipment_filter {
                    // The filter already pinned the hash to this id.
                    Some(id) => ShipmentRef::Known(id.to_string()),
                    None => lookups
                        .get(&transaction_hash)
                        .and_then(|id| id.as_ref())
                        .filter(|id| id_hash(id) == *hash)
                        .map(|id| ShipmentRef::Known(id.clone()))
                        .unwrap_or(ShipmentRef::Unknown(*hash)),
                },
            };
            checkpoint_event(log, fields, shipment, transaction_hash)
        })
        .collect();

    Ok(EventPage {
        events,
        from_block,
        to_block: Some(head),
        next_from_block: head + 1,
    })
}

/// `CheckpointAdded` events in a mined receipt. `shipment_id` is the id the
/// transaction was sent with, so hashed ids resolve without a lookup.
pub(crate) fn receipt_events(
    session: &Session,
    receipt: &TransactionReceipt,
    shipment_id: &str,
) -> Vec<CheckpointEvent> {
    let Ok(event) = session.abi.checkpoint_added() else {
        return Vec::new();
    };
    let signature = event.signature();

    receipt
        .logs
        .iter()
        .filter(|log| log.address == session.contract && log.topics.first() == Some(&signature))
        .filter_map(|log| match session.abi.decode_checkpoint_added(log) {
            Ok(fields) => Some((log, fields)),
            Err(e) => {
                warn!(tx_hash = ?receipt.transaction_hash, error = %e, "undecodable CheckpointAdded log in receipt");
                None
            }
        })
        .map(|(log, fields)| {
            let shipment = match &fields.shipment_id {
                LoggedShipmentId::Plain(id) => ShipmentRef::Known(id.clone()),
                LoggedShipmentId::Hashed(hash) if *hash == id_hash(shipment_id) => {
                    ShipmentRef::Known(shipment_id.to_string())
                }
                LoggedShipmentId::Hashed(hash) => ShipmentRef::Unknown(*hash),
            };
            let mut event = checkpoint_event(
                log,
                fields,
                shipment,
                log.transaction_hash.unwrap_or(receipt.transaction_hash),
            );
            if log.block_number.is_none() {
                event.block_number = receipt.block_number.map(|b| b.as_u64()).unwrap_or_default();
            }
            event
        })
        .collect()
}

fn checkpoint_event(
    log: &Log,
    fields: DecodedCheckpointLog,
    shipment: ShipmentRef,
    transaction_hash: H256,
) -> CheckpointEvent {
    CheckpointEvent {
        shipment,
        timestamp: fields.timestamp,
        location: fields.location,
        status: fields.status,
        submitted_by: fields.submitted_by,
        block_number: log.block_number.map(|b| b.as_u64()).unwrap_or_default(),
        transaction_hash,
        log_index: log.log_index.map(|i| i.low_u64()).unwrap_or_default(),
    }
}

// Recovers plaintext shipment ids from the `addCheckpoint` input of each
// transaction that emitted a hashed id. A failed lookup only affects its own
// events, which stay `Unknown`.
async fn resolve_hashed_ids(
    session: &Session,
    decoded: &[(&Log, DecodedCheckpointLog)],
    shipment_filter: Option<&str>,
) -> HashMap<H256, Option<String>> {
    if shipment_filter.is_some() {
        return HashMap::new();
    }

    let mut pending: Vec<H256> = decoded
        .iter()
        .filter(|(_, fields)| matches!(fields.shipment_id, LoggedShipmentId::Hashed(_)))
        .filter_map(|(log, _)| log.transaction_hash)
        .collect();
    pending.sort();
    pending.dedup();

    let results = join_all(pending.iter().map(|tx_hash| async move {
        let shipment_id = match session.rpc.get_transaction(*tx_hash).await {
            Ok(Some(tx)) => session.abi.decode_add_checkpoint_shipment(&tx.input),
            Ok(None) => {
                warn!(tx_hash = ?tx_hash, "transaction not found, shipment id unknown");
                None
            }
            Err(e) => {
                warn!(tx_hash = ?tx_hash, error = %e, "transaction lookup failed, shipment id unknown");
                None
            }
        };
        (*tx_hash, shipment_id)
    }))
    .await;

    results.into_iter().collect()
}
