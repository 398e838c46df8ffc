//! bridge adapter
//!
//! deposits originating on the remote chain arrive as a token transfer into
//! pool custody followed by an `on_deposit` call carrying the encoded
//! transaction. the adapter authenticates the caller, binds the delivered
//! amount to the embedded external amount and hands the request to the pool
//! with the deposit source pinned to what the bridge delivered.
//!
//! payload layout: `b"ZPL" || version (1) || SCALE(TransactionRequest)`

use std::collections::HashSet;

use codec::{Decode, Encode};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::ledger::{AccountId, TokenLedger};
use crate::pool::{DepositSource, Pool, Receipt};
use crate::proof::ProofVerifier;
use crate::transaction::{TransactionRequest, TxId};
use crate::value::{Amount, ExtAmount};

pub const PAYLOAD_MAGIC: &[u8; 3] = b"ZPL";
pub const PAYLOAD_VERSION: u8 = 1;

pub fn encode_payload(request: &TransactionRequest) -> Vec<u8> {
    let mut out = Vec::with_capacity(PAYLOAD_MAGIC.len() + 1 + request.size_hint());
    out.extend_from_slice(PAYLOAD_MAGIC);
    out.push(PAYLOAD_VERSION);
    request.encode_to(&mut out);
    out
}

pub fn decode_payload(payload: &[u8]) -> Result<TransactionRequest> {
    let rest = payload
        .strip_prefix(PAYLOAD_MAGIC.as_slice())
        .ok_or_else(|| Error::MalformedPayload("bad magic".into()))?;
    let (&version, mut rest) = rest
        .split_first()
        .ok_or_else(|| Error::MalformedPayload("missing version".into()))?;
    if version != PAYLOAD_VERSION {
        return Err(Error::MalformedPayload(format!("unknown version {version}")));
    }

    let request = TransactionRequest::decode(&mut rest)?;
    if !rest.is_empty() {
        return Err(Error::MalformedPayload(format!("{} trailing bytes", rest.len())));
    }
    Ok(request)
}

/// what the remote bridge executor delivers in one batch
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct BridgeMessage {
    pub token: AccountId,
    pub amount: Amount,
    pub payload: Vec<u8>,
}

impl BridgeMessage {
    pub fn new(token: AccountId, amount: Amount, request: &TransactionRequest) -> Self {
        Self {
            token,
            amount,
            payload: encode_payload(request),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    Applied(Receipt),
    /// transaction was already applied through the bridge, nothing changed
    Duplicate(TxId),
}

/// bridge entry point, at most once per transaction id
#[derive(Clone, Debug, Default)]
pub struct BridgeAdapter {
    processed: HashSet<TxId>,
}

impl BridgeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_processed(&self, tx_id: &TxId) -> bool {
        self.processed.contains(tx_id)
    }

    /// called by the bridge after moving `amount` of `token` into pool custody
    pub fn on_deposit<L: TokenLedger, V: ProofVerifier>(
        &mut self,
        pool: &mut Pool<L, V>,
        caller: AccountId,
        token: AccountId,
        amount: Amount,
        payload: &[u8],
    ) -> Result<Delivery> {
        let accounts = &pool.config().accounts;
        if caller != accounts.bridge {
            warn!("rejecting bridge call from {}", caller);
            return Err(Error::UnauthorizedBridge(caller));
        }
        if token != accounts.token {
            return Err(Error::UnsupportedToken(token));
        }

        let request = decode_payload(payload)?;
        let tx_id = request.tx_id();
        if self.processed.contains(&tx_id) {
            debug!("bridge redelivered {}", tx_id);
            return Ok(Delivery::Duplicate(tx_id));
        }

        let claimed = request.ext_data.ext_amount;
        if claimed != ExtAmount(amount.0 as i128) {
            warn!("bridge delivered {} for {} claiming {}", amount, tx_id, claimed);
            return Err(Error::AmountMismatch {
                claimed,
                received: amount,
            });
        }

        let receipt = pool.apply(request, DepositSource::Bridge { amount })?;
        self.processed.insert(tx_id);
        info!("bridged deposit {} of {} applied", tx_id, amount);
        Ok(Delivery::Applied(receipt))
    }

    /// run a bridge message end to end: transfer into custody, then `on_deposit`
    pub fn deliver<L: TokenLedger, V: ProofVerifier>(
        &mut self,
        pool: &mut Pool<L, V>,
        message: &BridgeMessage,
    ) -> Result<Delivery> {
        let accounts = pool.config().accounts.clone();
        if message.token != accounts.token {
            return Err(Error::UnsupportedToken(message.token));
        }

        // executed messages are never replayed by the bridge
        let request = decode_payload(&message.payload)?;
        if self.processed.contains(&request.tx_id()) {
            return Ok(Delivery::Duplicate(request.tx_id()));
        }

        pool.ledger_mut()
            .transfer(accounts.bridge, accounts.pool, message.amount)?;
        self.on_deposit(
            pool,
            accounts.bridge,
            message.token,
            message.amount,
            &message.payload,
        )
    }
}
