//! pool state machine
//!
//! one entry point, [`Pool::apply`], for both deposit paths. a request moves
//! through:
//!
//! ```text
//! TransactionRequest ──verify──▶ VerifiedTransaction ──apply_verified──▶ Receipt
//!         │                              │
//!         └────────── Error ◀────────────┘   (no state change)
//! ```
//!
//! every check runs before anything is mutated. a verified transaction
//! remembers which pool checked it and at what state version, and is
//! re-verified if it reaches another pool or the pool moved on in between.
//! ledger movements made during settlement are journaled and unwound if a
//! later one fails, so a transaction applies completely or not at all.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, error, info, warn};

use crate::commitment::{CommitmentTree, Root};
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::ledger::{AccountId, TokenLedger};
use crate::note::{EncryptedNote, NoteCommitment};
use crate::nullifier::{Nullifier, NullifierSet, Position};
use crate::proof::{ExtData, ProofVerifier};
use crate::transaction::{TransactionRequest, TxId};
use crate::value::{Amount, ExtAmount};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(0);

/// where the deposit side of a transaction is funded from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepositSource {
    /// pulled from `sender` with `transfer_from` at settlement
    Direct { sender: AccountId },
    /// already moved into custody by the bridge
    Bridge { amount: Amount },
}

impl DepositSource {
    pub fn is_bridge(&self) -> bool {
        matches!(self, DepositSource::Bridge { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoolEvent {
    NewCommitment {
        commitment: NoteCommitment,
        index: Position,
        encrypted_output: EncryptedNote,
    },
    NewNullifier {
        nullifier: Nullifier,
    },
    /// withdrawal handed to the bridge for release on the remote chain
    BridgeWithdrawal {
        recipient: AccountId,
        amount: Amount,
        bridge_fee: Amount,
    },
}

/// request that passed every check against a given pool state
#[derive(Clone, Debug)]
pub struct VerifiedTransaction {
    request: TransactionRequest,
    source: DepositSource,
    tx_id: TxId,
    pool_id: u64,
    version: u64,
}

impl VerifiedTransaction {
    pub fn request(&self) -> &TransactionRequest {
        &self.request
    }

    pub fn source(&self) -> DepositSource {
        self.source
    }

    pub fn tx_id(&self) -> TxId {
        self.tx_id
    }
}

/// result of an applied transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub tx_id: TxId,
    /// root after inserting the outputs
    pub root: Root,
    /// leaf index of each output, in slot order
    pub output_indices: [Position; 2],
    pub nullifiers: [Nullifier; 2],
    pub ext_amount: ExtAmount,
    pub fee: Amount,
}

/// ledger movement made during settlement
#[derive(Clone, Copy, Debug)]
enum Leg {
    /// deposit pulled from `sender`, whose allowance was `allowance` before
    Pulled {
        sender: AccountId,
        amount: Amount,
        allowance: Amount,
    },
    /// custody paid out to `to`
    Paid { to: AccountId, amount: Amount },
}

/// the shielded pool
pub struct Pool<L, V> {
    /// process-unique, binds verified transactions to this instance
    id: u64,
    config: PoolConfig,
    tree: CommitmentTree,
    nullifiers: NullifierSet,
    ledger: L,
    verifier: V,
    /// custody balance after the last settlement
    settled_balance: Amount,
    events: Vec<PoolEvent>,
    version: u64,
}

impl<L: TokenLedger, V: ProofVerifier> Pool<L, V> {
    /// new empty pool, whatever custody the pool account already holds counts as settled
    pub fn new(config: PoolConfig, ledger: L, verifier: V) -> Result<Self> {
        config.validate()?;
        let tree = CommitmentTree::new(config.tree_height, config.root_history_size)?;
        let settled_balance = ledger.balance_of(&config.accounts.pool);

        info!(
            "pool {} ready: height {}, {} roots of history",
            config.accounts.pool, config.tree_height, config.root_history_size
        );

        Ok(Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            config,
            tree,
            nullifiers: NullifierSet::new(),
            ledger,
            verifier,
            settled_balance,
            events: Vec::new(),
            version: 0,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn tree(&self) -> &CommitmentTree {
        &self.tree
    }

    pub fn root(&self) -> Root {
        self.tree.root()
    }

    pub fn nullifiers(&self) -> &NullifierSet {
        &self.nullifiers
    }

    pub fn is_spent(&self, nullifier: &Nullifier) -> bool {
        self.nullifiers.contains(nullifier)
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// direct ledger access for funding accounts and bridge transfers
    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    pub fn settled_balance(&self) -> Amount {
        self.settled_balance
    }

    /// custody received but not credited to any transaction
    pub fn unaccounted_balance(&self) -> Amount {
        self.custody().saturating_sub(self.settled_balance)
    }

    /// bumped by every applied transaction and sweep
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn events(&self) -> &[PoolEvent] {
        &self.events
    }

    /// events emitted after the first `cursor`, pass `events().len()` back as the next cursor
    pub fn events_since(&self, cursor: usize) -> &[PoolEvent] {
        &self.events[cursor.min(self.events.len())..]
    }

    /// submit a transaction funded directly by `sender`
    pub fn transact(&mut self, sender: AccountId, request: TransactionRequest) -> Result<Receipt> {
        self.apply(request, DepositSource::Direct { sender })
    }

    /// verify and apply in one step
    pub fn apply(&mut self, request: TransactionRequest, source: DepositSource) -> Result<Receipt> {
        let verified = self.verify(request, source)?;
        self.apply_verified(verified)
    }

    /// run every check against the current state without mutating it
    pub fn verify(
        &self,
        request: TransactionRequest,
        source: DepositSource,
    ) -> Result<VerifiedTransaction> {
        let tx_id = request.tx_id();
        match self.check(&request, source) {
            Ok(()) => {
                debug!("transaction {} verified at version {}", tx_id, self.version);
                Ok(VerifiedTransaction {
                    request,
                    source,
                    tx_id,
                    pool_id: self.id,
                    version: self.version,
                })
            }
            Err(e) => {
                warn!("transaction {} rejected: {}", tx_id, e);
                Err(e)
            }
        }
    }

    /// commit a verified transaction
    pub fn apply_verified(&mut self, verified: VerifiedTransaction) -> Result<Receipt> {
        let verified = if verified.pool_id == self.id && verified.version == self.version {
            verified
        } else {
            debug!(
                "transaction {} verified by pool {} at version {}, this is pool {} at {}; re-verifying",
                verified.tx_id, verified.pool_id, verified.version, self.id, self.version
            );
            self.verify(verified.request, verified.source)?
        };
        let VerifiedTransaction {
            request,
            source,
            tx_id,
            ..
        } = verified;
        let TransactionRequest {
            public, ext_data, ..
        } = request;

        // settlement is the only step that can fail, the rest was checked above
        self.settle(&ext_data, source)?;

        self.nullifiers.reveal_all(&public.input_nullifiers)?;

        let first = self.tree.len() as u64;
        let root = self.tree.insert(&public.output_commitments)?;
        let output_indices = [Position(first), Position(first + 1)];

        for ((commitment, index), encrypted_output) in public
            .output_commitments
            .iter()
            .zip(output_indices)
            .zip(ext_data.encrypted_outputs)
        {
            self.events.push(PoolEvent::NewCommitment {
                commitment: *commitment,
                index,
                encrypted_output,
            });
        }
        for nullifier in public.input_nullifiers {
            self.events.push(PoolEvent::NewNullifier { nullifier });
        }
        if ext_data.bridge_withdrawal && ext_data.ext_amount.is_withdrawal() {
            self.events.push(PoolEvent::BridgeWithdrawal {
                recipient: ext_data.recipient,
                amount: ext_data.ext_amount.withdrawn(),
                bridge_fee: ext_data.bridge_fee,
            });
        }

        self.version += 1;
        info!(
            "applied {}: ext {} fee {}, outputs at {} and {}, root {}",
            tx_id,
            ext_data.ext_amount,
            ext_data.fee,
            output_indices[0],
            output_indices[1],
            root
        );

        Ok(Receipt {
            tx_id,
            root,
            output_indices,
            nullifiers: public.input_nullifiers,
            ext_amount: ext_data.ext_amount,
            fee: ext_data.fee,
        })
    }

    /// move custody received outside any applied transaction to the multisig
    pub fn sweep_unaccounted(&mut self) -> Result<Amount> {
        let amount = self.unaccounted_balance();
        if amount.is_zero() {
            return Ok(amount);
        }

        let accounts = &self.config.accounts;
        self.ledger.transfer(accounts.pool, accounts.multisig, amount)?;
        self.settled_balance = self.custody();
        self.version += 1;

        info!("swept {} unaccounted to {}", amount, accounts.multisig);
        Ok(amount)
    }

    fn custody(&self) -> Amount {
        self.ledger.balance_of(&self.config.accounts.pool)
    }

    fn check(&self, request: &TransactionRequest, source: DepositSource) -> Result<()> {
        let public = &request.public;
        let ext_data = &request.ext_data;

        if !self.tree.is_known_root(&public.root) {
            return Err(Error::StaleRoot);
        }
        if ext_data.hash() != public.ext_data_hash {
            return Err(Error::ExtDataMismatch);
        }

        let ext = ext_data.ext_amount;
        let fee = ext_data.fee;
        if !ext.in_range()
            || !fee.in_range()
            || public.public_amount != ExtAmount(ext.0 - fee.0 as i128)
        {
            return Err(Error::InvalidPublicAmount);
        }

        if !self.verifier.verify(&request.proof, public) {
            return Err(Error::InvalidProof);
        }

        self.nullifiers.check_unspent(&public.input_nullifiers)?;

        let deposit = self.check_deposit(ext, source)?;
        self.check_withdrawal(request, deposit)?;

        self.tree.check_capacity(public.output_commitments.len())
    }

    /// bounds and funding of the deposit side, returns the amount coming in
    fn check_deposit(&self, ext: ExtAmount, source: DepositSource) -> Result<Amount> {
        let config = &self.config;
        match source {
            DepositSource::Direct { sender } => {
                let amount = ext.deposited();
                if amount.is_zero() {
                    return Ok(amount);
                }
                if amount > config.max_deposit {
                    return Err(Error::AboveMaximumDeposit {
                        amount,
                        maximum: config.max_deposit,
                    });
                }

                let pool = config.accounts.pool;
                let balance = self.ledger.balance_of(&sender);
                if balance < amount {
                    return Err(Error::InsufficientBalance {
                        account: sender,
                        needed: amount,
                        available: balance,
                    });
                }
                let allowance = self.ledger.allowance(&sender, &pool);
                if allowance < amount {
                    return Err(Error::InsufficientAllowance {
                        owner: sender,
                        needed: amount,
                        available: allowance,
                    });
                }
                Ok(amount)
            }
            DepositSource::Bridge { amount } => {
                if ext != ExtAmount(amount.0 as i128) || !amount.in_range() {
                    return Err(Error::AmountMismatch {
                        claimed: ext,
                        received: amount,
                    });
                }
                if config.cap_bridged_deposits && amount > config.max_deposit {
                    return Err(Error::AboveMaximumDeposit {
                        amount,
                        maximum: config.max_deposit,
                    });
                }

                let received = self.unaccounted_balance();
                if received < amount {
                    return Err(Error::UnfundedBridgeDeposit {
                        expected: amount,
                        received,
                    });
                }
                Ok(amount)
            }
        }
    }

    /// bounds, recipients and custody of the paying side
    fn check_withdrawal(&self, request: &TransactionRequest, deposit: Amount) -> Result<()> {
        let ext_data = &request.ext_data;
        let withdrawn = ext_data.ext_amount.withdrawn();

        if !withdrawn.is_zero() {
            let floor = self.config.withdrawal_floor;
            if floor.applies_to(ext_data.bridge_withdrawal) && withdrawn < self.config.min_withdrawal
            {
                return Err(Error::BelowMinimumWithdrawal {
                    amount: withdrawn,
                    minimum: self.config.min_withdrawal,
                });
            }
            if ext_data.recipient.is_zero() {
                return Err(Error::MissingRecipient);
            }
            if ext_data.bridge_withdrawal && ext_data.bridge_fee > withdrawn {
                return Err(Error::InvalidAmount(format!(
                    "bridge fee {} exceeds withdrawal {}",
                    ext_data.bridge_fee, withdrawn
                )));
            }
        }
        if !ext_data.fee.is_zero() && ext_data.relayer.is_zero() {
            return Err(Error::MissingRelayer);
        }

        // payouts may only come from settled custody plus what this transaction brings in
        let payout = withdrawn
            .checked_add(ext_data.fee)
            .ok_or_else(|| Error::InvalidAmount("payout overflows".into()))?;
        let available = self
            .settled_balance
            .checked_add(deposit)
            .ok_or_else(|| Error::InvalidAmount("custody overflows".into()))?;
        if available < payout {
            return Err(Error::InsufficientBalance {
                account: self.config.accounts.pool,
                needed: payout,
                available,
            });
        }
        Ok(())
    }

    /// move external funds, all legs or none
    fn settle(&mut self, ext_data: &ExtData, source: DepositSource) -> Result<()> {
        let withdrawn = ext_data.ext_amount.withdrawn();
        // custody from rejected bridge messages stays outside the settled balance
        let settled = self
            .settled_balance
            .checked_add(ext_data.ext_amount.deposited())
            .and_then(|s| s.checked_sub(withdrawn))
            .and_then(|s| s.checked_sub(ext_data.fee))
            .ok_or_else(|| Error::InvalidAmount("settled balance underflow".into()))?;

        let mut legs = Vec::with_capacity(3);
        if let Err(e) = self.settle_legs(ext_data, source, &mut legs) {
            warn!("settlement failed after {} legs: {}", legs.len(), e);
            self.unwind(&legs);
            return Err(e);
        }
        self.settled_balance = settled;
        Ok(())
    }

    fn settle_legs(
        &mut self,
        ext_data: &ExtData,
        source: DepositSource,
        legs: &mut Vec<Leg>,
    ) -> Result<()> {
        let pool = self.config.accounts.pool;

        if let DepositSource::Direct { sender } = source {
            let amount = ext_data.ext_amount.deposited();
            if !amount.is_zero() {
                let allowance = self.ledger.allowance(&sender, &pool);
                self.ledger.transfer_from(pool, sender, pool, amount)?;
                legs.push(Leg::Pulled {
                    sender,
                    amount,
                    allowance,
                });
            }
        }

        let withdrawn = ext_data.ext_amount.withdrawn();
        if !withdrawn.is_zero() {
            let to = if ext_data.bridge_withdrawal {
                self.config.accounts.bridge
            } else {
                ext_data.recipient
            };
            self.ledger.transfer(pool, to, withdrawn)?;
            legs.push(Leg::Paid {
                to,
                amount: withdrawn,
            });
        }

        if !ext_data.fee.is_zero() {
            self.ledger.transfer(pool, ext_data.relayer, ext_data.fee)?;
            legs.push(Leg::Paid {
                to: ext_data.relayer,
                amount: ext_data.fee,
            });
        }
        Ok(())
    }

    /// reverse completed legs, newest first
    fn unwind(&mut self, legs: &[Leg]) {
        let pool = self.config.accounts.pool;
        for leg in legs.iter().rev() {
            let undone = match *leg {
                Leg::Pulled {
                    sender,
                    amount,
                    allowance,
                } => {
                    let undone = self.ledger.transfer(pool, sender, amount);
                    if undone.is_ok() {
                        self.ledger.approve(sender, pool, allowance);
                    }
                    undone
                }
                Leg::Paid { to, amount } => self.ledger.transfer(to, pool, amount),
            };
            if let Err(e) = undone {
                error!("could not undo settlement leg {:?}: {}", leg, e);
            }
        }
    }
}

impl<L, V> core::fmt::Debug for Pool<L, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pool")
            .field("root", &self.tree.root())
            .field("leaves", &self.tree.len())
            .field("nullifiers", &self.nullifiers.len())
            .field("settled_balance", &self.settled_balance)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
