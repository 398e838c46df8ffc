//! zeratul shielded pool
//!
//! utxo-style privacy pool with bridged deposits. value enters through a
//! direct deposit or a bridge message, moves between notes without touching
//! the public ledger, and leaves through a direct or bridged withdrawal.
//! every transition is a fixed 2-in/2-out transaction gated by one proof.
//!
//! # architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        SHIELDED POOL                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                               │
//! │  wallet                                                       │
//! │  ├─ keys / notes (amount, owner, blinding)                    │
//! │  ├─ TransactionBuilder: pad, shuffle, encrypt, prove          │
//! │  └─ NoteScanner: trial-decrypt NewCommitment events           │
//! │                                                               │
//! │  pool (PoolService task)                                      │
//! │  ├─ commitment tree + root history                            │
//! │  ├─ nullifier set                                             │
//! │  ├─ ProofVerifier gate                                        │
//! │  └─ TokenLedger custody (deposits, withdrawals, fees)         │
//! │                                                               │
//! │  bridge                                                       │
//! │  └─ BridgeAdapter::on_deposit(payload) -> Pool::apply         │
//! │                                                               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! no subscriber is installed here, binaries and tests pick their own
//! `tracing` output.

pub mod bridge;
pub mod commitment;
pub mod config;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod note;
pub mod nullifier;
pub mod pool;
pub mod proof;
pub mod scan;
pub mod service;
pub mod transaction;
pub mod value;

pub use bridge::{BridgeAdapter, BridgeMessage, Delivery};
pub use commitment::{CommitmentTree, MerklePath, Root};
pub use config::{PoolAccounts, PoolConfig, WithdrawalFloor};
pub use error::{Error, Result};
pub use keys::{Keypair, ShieldedAddress};
pub use ledger::{AccountId, MemoryLedger, TokenLedger};
pub use note::{EncryptedNote, Note, NoteCommitment};
pub use nullifier::{Nullifier, NullifierSet, Position};
pub use pool::{DepositSource, Pool, PoolEvent, Receipt, VerifiedTransaction};
pub use proof::{ExtData, ProofVerifier, Prover, ProvingSetup, PublicInputs};
pub use scan::NoteScanner;
pub use service::{PoolHandle, PoolService};
pub use transaction::{
    BuiltTransaction, Slot, SpendableNote, TransactionBuilder, TransactionRequest, TxId,
};
pub use value::{parse_units, Amount, ExtAmount};

/// domain separator for note commitments
pub const NOTE_DOMAIN: &[u8] = b"zeratul.pool.note.v1";
/// domain separator for nullifiers
pub const NULLIFIER_DOMAIN: &[u8] = b"zeratul.pool.nullifier.v1";
/// domain separator for commitment tree nodes
pub const MERKLE_DOMAIN: &[u8] = b"zeratul.pool.merkle.v1";
/// preimage of the empty leaf
pub const ZERO_LEAF_DOMAIN: &[u8] = b"zeratul.pool.zero-leaf.v1";
