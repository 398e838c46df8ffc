//! error types for the shielded pool

use thiserror::Error;

use crate::ledger::AccountId;
use crate::nullifier::Nullifier;
use crate::value::{Amount, ExtAmount};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    // === transition rejections ===
    #[error("merkle root is not in the recent root history")]
    StaleRoot,

    #[error("invalid transaction proof")]
    InvalidProof,

    #[error("input already spent: nullifier {0}")]
    AlreadySpent(Nullifier),

    #[error("bridged amount mismatch: payload claims {claimed}, bridge delivered {received}")]
    AmountMismatch { claimed: ExtAmount, received: Amount },

    #[error("commitment tree is full: {leaves} of {capacity} leaves used, {requested} requested")]
    CapacityExceeded {
        leaves: u64,
        capacity: u64,
        requested: usize,
    },

    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Amount, available: Amount },

    #[error("invalid input set: {0}")]
    InvalidInputSet(String),

    #[error("too many inputs or outputs: {inputs} in / {outputs} out, at most 2 each")]
    TooManyInputsOrOutputs { inputs: usize, outputs: usize },

    #[error("withdrawal of {amount} is below the minimum of {minimum}")]
    BelowMinimumWithdrawal { amount: Amount, minimum: Amount },

    #[error("deposit of {amount} is above the maximum of {maximum}")]
    AboveMaximumDeposit { amount: Amount, maximum: Amount },

    // === proof binding ===
    #[error("external data hash does not match the supplied external data")]
    ExtDataMismatch,

    #[error("public amount does not match external amount and fee")]
    InvalidPublicAmount,

    #[error("withdrawal requires a non-zero recipient")]
    MissingRecipient,

    #[error("non-zero fee requires a relayer")]
    MissingRelayer,

    #[error("amount {0} is out of range")]
    AmountOutOfRange(Amount),

    #[error("transaction does not balance: {surplus} would be left unclaimed")]
    Unbalanced { surplus: Amount },

    #[error("witness rejected: {0}")]
    InvalidWitness(&'static str),

    // === notes and keys ===
    #[error("note has no position in the commitment tree yet")]
    UnpositionedNote,

    #[error("keypair does not own this note")]
    NotNoteOwner,

    #[error("invalid shielded address: {0}")]
    InvalidAddress(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("note encryption failed")]
    Encryption,

    // === custody ===
    #[error("insufficient balance for {account}: need {needed}, have {available}")]
    InsufficientBalance {
        account: AccountId,
        needed: Amount,
        available: Amount,
    },

    #[error("insufficient allowance from {owner}: need {needed}, have {available}")]
    InsufficientAllowance {
        owner: AccountId,
        needed: Amount,
        available: Amount,
    },

    #[error("bridge did not fund the deposit: expected {expected}, custody grew by {received}")]
    UnfundedBridgeDeposit { expected: Amount, received: Amount },

    // === bridge ===
    #[error("caller {0} is not the configured bridge")]
    UnauthorizedBridge(AccountId),

    #[error("token {0} is not supported by this pool")]
    UnsupportedToken(AccountId),

    #[error("malformed bridge payload: {0}")]
    MalformedPayload(String),

    // === config and service ===
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("pool service has shut down")]
    ServiceClosed,
}

impl Error {
    /// whether resubmitting (possibly after rebuilding the proof) can succeed
    ///
    /// a full tree rejects every new deposit, and a spent input never comes back
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::CapacityExceeded { .. } | Error::AlreadySpent(_))
    }
}

impl From<codec::Error> for Error {
    fn from(e: codec::Error) -> Self {
        Error::MalformedPayload(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
