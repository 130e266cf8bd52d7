use ethers::types::{Address, Bytes};
use tracing::debug;

use crate::abi::u256_to_u64;
use crate::blockchain::CallRequest;
use crate::connection::{ConnectionHandle, Session};
use crate::error::{ReadError, ValidationError};
use crate::models::{Checkpoint, Role, validate_address};

impl ConnectionHandle {
    /// Number of checkpoints recorded for a shipment. Zero is a valid answer.
    pub async fn get_checkpoint_count(&self, shipment_id: &str) -> Result<u64, ReadError> {
        let session = self.session().ok_or(ReadError::NotConnected)?;
        let shipment_id = require_shipment_id(shipment_id)?;

        let data = session
            .abi
            .encode_checkpoint_count(shipment_id)
            .map_err(abi_error)?;
        let output = contract_call(session, data).await?;
        let count = session
            .abi
            .decode_checkpoint_count(&output)
            .map_err(abi_error)?;

        u256_to_u64(count).ok_or_else(|| ReadError::Abi(format!("count {} overflows u64", count)))
    }

    /// Full history in contract order. Unknown shipments yield an empty list.
    pub async fn get_shipment_history(&self, shipment_id: &str) -> Result<Vec<Checkpoint>, ReadError> {
        let session = self.session().ok_or(ReadError::NotConnected)?;
        let shipment_id = require_shipment_id(shipment_id)?;

        let data = session
            .abi
            .encode_shipment_history(shipment_id)
            .map_err(abi_error)?;
        let output = contract_call(session, data).await?;

        session
            .abi
            .decode_shipment_history(&output)
            .map_err(abi_error)
    }

    /// Most recent checkpoint, or `NotFound` when the count is zero.
    pub async fn latest_checkpoint(&self, shipment_id: &str) -> Result<Checkpoint, ReadError> {
        let shipment_id = require_shipment_id(shipment_id)?;
        if self.get_checkpoint_count(shipment_id).await? == 0 {
            return Err(ReadError::NotFound(shipment_id.to_string()));
        }

        self.get_shipment_history(shipment_id)
            .await?
            .pop()
            .ok_or_else(|| ReadError::NotFound(shipment_id.to_string()))
    }

    pub async fn get_role(&self, address: &str) -> Result<Role, ReadError> {
        let address = validate_address(address)?;
        self.role_of(address).await
    }

    /// Role of the connected signing account.
    pub async fn own_role(&self) -> Result<Role, ReadError> {
        let account = self.account().ok_or(ReadError::NotConnected)?;
        self.role_of(account).await
    }

    async fn role_of(&self, address: Address) -> Result<Role, ReadError> {
        let session = self.session().ok_or(ReadError::NotConnected)?;

        let data = session.abi.encode_role(address).map_err(abi_error)?;
        let output = contract_call(session, data).await?;
        let code = session.abi.decode_role(&output).map_err(abi_error)?;

        u8::try_from(code.low_u64())
            .ok()
            .filter(|_| code.bits() <= 8)
            .and_then(Role::from_code)
            .ok_or(ReadError::UnexpectedRole(code))
    }
}

fn require_shipment_id(shipment_id: &str) -> Result<&str, ValidationError> {
    let shipment_id = shipment_id.trim();
    if shipment_id.is_empty() {
        return Err(ValidationError::Empty("shipment id"));
    }
    Ok(shipment_id)
}

async fn contract_call(session: &Session, data: Bytes) -> Result<Bytes, ReadError> {
    let call = CallRequest {
        from: None,
        to: session.contract,
        data,
    };
    let output = session.rpc.call(&call).await?;
    debug!(bytes = output.len(), "contract call returned");
    Ok(output)
}

fn abi_error(err: ethers::abi::Error) -> ReadError {
    ReadError::Abi(err.to_string())
}
