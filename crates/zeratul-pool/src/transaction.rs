//! transaction assembly
//!
//! every transaction spends exactly two notes and creates exactly two. the
//! builder pads missing slots with zero-amount notes owned by throwaway keys,
//! builds membership paths against its tree view, derives the external
//! amount, encrypts each output to its owner and shuffles both sides so slot
//! order leaks nothing.
//!
//! ```text
//! TransactionBuilder ──prepare──▶ PreparedTransaction ──prove──▶ BuiltTransaction
//!                                  (ProofRequest)                 (TransactionRequest)
//! ```

use codec::{Decode, Encode};
use rand::seq::SliceRandom;
use rand::{CryptoRng, RngCore};

use crate::commitment::{CommitmentTree, MerklePath};
use crate::error::{Error, Result};
use crate::keys::Keypair;
use crate::ledger::AccountId;
use crate::note::Note;
use crate::proof::{
    ExtData, InputWitness, Proof, ProofRequest, Prover, PublicInputs, Witness,
};
use crate::value::{Amount, ExtAmount};

const TX_ID_DOMAIN: &[u8] = b"zeratul.pool.tx-id.v1";

/// inputs and outputs per transaction
pub const ARITY: usize = 2;

/// a padded slot: caller-supplied or generated padding
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Slot<T> {
    Real(T),
    Dummy(T),
}

impl<T> Slot<T> {
    pub fn get(&self) -> &T {
        match self {
            Slot::Real(t) | Slot::Dummy(t) => t,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Slot::Real(t) | Slot::Dummy(t) => t,
        }
    }

    pub fn is_real(&self) -> bool {
        matches!(self, Slot::Real(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Slot<U> {
        match self {
            Slot::Real(t) => Slot::Real(f(t)),
            Slot::Dummy(t) => Slot::Dummy(f(t)),
        }
    }
}

/// a committed note together with the key that can spend it
#[derive(Clone, Debug)]
pub struct SpendableNote {
    pub note: Note,
    pub keypair: Keypair,
}

impl SpendableNote {
    pub fn new(note: Note, keypair: Keypair) -> Self {
        Self { note, keypair }
    }
}

/// unique id of a transaction, commits to its nullifiers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub struct TxId(pub [u8; 32]);

impl core::fmt::Display for TxId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// what gets submitted to the pool, directly or through the bridge
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct TransactionRequest {
    pub proof: Proof,
    pub public: PublicInputs,
    pub ext_data: ExtData,
}

impl TransactionRequest {
    pub fn tx_id(&self) -> TxId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(TX_ID_DOMAIN);
        hasher.update(&self.public.encode());
        TxId(*hasher.finalize().as_bytes())
    }
}

/// assembles a transaction against a view of the commitment tree
pub struct TransactionBuilder<'a> {
    tree: &'a CommitmentTree,
    inputs: Vec<SpendableNote>,
    outputs: Vec<Note>,
    recipient: Option<AccountId>,
    relayer: Option<AccountId>,
    fee: Amount,
    ext_amount: Option<ExtAmount>,
    bridge_fee: Option<Amount>,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(tree: &'a CommitmentTree) -> Self {
        Self {
            tree,
            inputs: Vec::new(),
            outputs: Vec::new(),
            recipient: None,
            relayer: None,
            fee: Amount::ZERO,
            ext_amount: None,
            bridge_fee: None,
        }
    }

    pub fn input(mut self, input: SpendableNote) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn output(mut self, note: Note) -> Self {
        self.outputs.push(note);
        self
    }

    /// account paid on withdrawal
    pub fn recipient(mut self, recipient: AccountId) -> Self {
        self.recipient = Some(recipient);
        self
    }

    /// relayer submitting on the user's behalf for `fee`
    pub fn relayer(mut self, relayer: AccountId, fee: Amount) -> Self {
        self.relayer = Some(relayer);
        self.fee = fee;
        self
    }

    /// pin the external amount instead of deriving it
    pub fn ext_amount(mut self, ext_amount: ExtAmount) -> Self {
        self.ext_amount = Some(ext_amount);
        self
    }

    /// release the withdrawal through the bridge, `bridge_fee` comes out of it
    pub fn bridge_withdrawal(mut self, bridge_fee: Amount) -> Self {
        self.bridge_fee = Some(bridge_fee);
        self
    }

    /// validate, pad, shuffle and encrypt; yields the proof request
    pub fn prepare<R: RngCore + CryptoRng>(self, rng: &mut R) -> Result<PreparedTransaction> {
        if self.inputs.len() > ARITY || self.outputs.len() > ARITY {
            return Err(Error::TooManyInputsOrOutputs {
                inputs: self.inputs.len(),
                outputs: self.outputs.len(),
            });
        }

        for (i, input) in self.inputs.iter().enumerate() {
            self.check_input(input)?;
            if self.inputs[..i]
                .iter()
                .any(|other| other.note.index == input.note.index)
            {
                return Err(Error::InvalidInputSet("note spent twice".into()));
            }
        }
        for amount in self.outputs.iter().map(|n| n.amount).chain([self.fee]) {
            if !amount.in_range() {
                return Err(Error::AmountOutOfRange(amount));
            }
        }

        let ext_amount = self.balance()?;
        let recipient = self.recipient.unwrap_or(AccountId::ZERO);
        let relayer = self.relayer.unwrap_or(AccountId::ZERO);
        if ext_amount.is_withdrawal() && recipient.is_zero() {
            return Err(Error::MissingRecipient);
        }
        if !self.fee.is_zero() && relayer.is_zero() {
            return Err(Error::MissingRelayer);
        }
        let bridge_fee = self.bridge_fee.unwrap_or(Amount::ZERO);
        if bridge_fee > ext_amount.withdrawn() {
            return Err(Error::InvalidInputSet(format!(
                "bridge fee {bridge_fee} exceeds withdrawal {}",
                ext_amount.withdrawn()
            )));
        }

        let height = self.tree.height();
        let mut inputs = Vec::with_capacity(ARITY);
        for SpendableNote { note, keypair } in self.inputs {
            let position = note.spend_position()?;
            let path = self
                .tree
                .prove(position)
                .ok_or_else(|| Error::InvalidInputSet(format!("no leaf at {position}")))?;
            inputs.push(Slot::Real(InputWitness { note, keypair, path }));
        }
        while inputs.len() < ARITY {
            let (note, keypair) = Note::dummy(rng);
            let path = MerklePath::empty(height);
            inputs.push(Slot::Dummy(InputWitness { note, keypair, path }));
        }

        let mut outputs: Vec<Slot<Note>> = self.outputs.into_iter().map(Slot::Real).collect();
        while outputs.len() < ARITY {
            outputs.push(Slot::Dummy(Note::dummy(rng).0));
        }

        inputs.shuffle(rng);
        outputs.shuffle(rng);

        let input_nullifiers = [
            nullifier_of(inputs[0].get())?,
            nullifier_of(inputs[1].get())?,
        ];
        let output_commitments = [outputs[0].get().commitment(), outputs[1].get().commitment()];
        let encrypted_outputs = [
            outputs[0].get().encrypt(rng)?,
            outputs[1].get().encrypt(rng)?,
        ];

        let ext_data = ExtData {
            recipient,
            ext_amount,
            relayer,
            fee: self.fee,
            encrypted_outputs,
            bridge_withdrawal: self.bridge_fee.is_some(),
            bridge_fee,
        };
        let public = PublicInputs {
            root: self.tree.root(),
            public_amount: ExtAmount(ext_amount.0 - self.fee.0 as i128),
            ext_data_hash: ext_data.hash(),
            input_nullifiers,
            output_commitments,
        };

        let [in0, in1] = pair(inputs)?;
        let outputs = pair(outputs)?;
        let witness = Witness {
            inputs: [in0.into_inner(), in1.into_inner()],
            outputs: [outputs[0].get().clone(), outputs[1].get().clone()],
        };

        Ok(PreparedTransaction {
            request: ProofRequest { public, witness },
            ext_data,
            outputs,
        })
    }

    /// prepare and prove in one go
    pub fn build<R: RngCore + CryptoRng, P: Prover + ?Sized>(
        self,
        rng: &mut R,
        prover: &P,
    ) -> Result<BuiltTransaction> {
        self.prepare(rng)?.prove(prover)
    }

    fn check_input(&self, input: &SpendableNote) -> Result<()> {
        let note = &input.note;
        if !note.amount.in_range() {
            return Err(Error::AmountOutOfRange(note.amount));
        }
        let position = note
            .index
            .ok_or_else(|| Error::InvalidInputSet("input note has no index".into()))?;
        if self.tree.leaf(position) != Some(&note.commitment()) {
            return Err(Error::InvalidInputSet(format!(
                "tree does not hold the input commitment at {position}"
            )));
        }
        if input.keypair.public_key() != note.owner.public_key {
            return Err(Error::InvalidInputSet(format!(
                "keypair does not own the note at {position}"
            )));
        }
        Ok(())
    }

    /// external amount satisfying sum(in) + ext = sum(out) + fee
    fn balance(&self) -> Result<ExtAmount> {
        let total_in = Amount::sum(self.inputs.iter().map(|i| &i.note.amount))?;
        let total_out = Amount::sum(self.outputs.iter().map(|n| &n.amount))?;
        let spent = total_out
            .checked_add(self.fee)
            .filter(Amount::in_range)
            .ok_or(Error::AmountOutOfRange(total_out))?;

        let Some(ext) = self.ext_amount else {
            return ExtAmount::balance(spent, total_in);
        };
        if !ext.in_range() {
            return Err(Error::AmountOutOfRange(ext.magnitude()));
        }

        // value available vs value consumed, both as plain amounts
        let available = total_in.0 + ext.deposited().0;
        let needed = spent.0 + ext.withdrawn().0;
        if available < needed {
            return Err(Error::InsufficientFunds {
                needed: Amount(needed),
                available: Amount(available),
            });
        }
        if available > needed {
            return Err(Error::Unbalanced {
                surplus: Amount(available - needed),
            });
        }
        Ok(ext)
    }
}

fn nullifier_of(input: &InputWitness) -> Result<crate::nullifier::Nullifier> {
    input.note.nullifier(&input.keypair)
}

fn pair<T>(slots: Vec<T>) -> Result<[T; ARITY]> {
    slots
        .try_into()
        .map_err(|_| Error::InvalidInputSet("slot padding failed".into()))
}

/// proof request ready for a prover
#[derive(Clone, Debug)]
pub struct PreparedTransaction {
    pub request: ProofRequest,
    pub ext_data: ExtData,
    /// outputs in emission order
    pub outputs: [Slot<Note>; ARITY],
}

impl PreparedTransaction {
    pub fn prove<P: Prover + ?Sized>(self, prover: &P) -> Result<BuiltTransaction> {
        let proof = prover.prove(&self.request)?;
        Ok(BuiltTransaction {
            request: TransactionRequest {
                proof,
                public: self.request.public,
                ext_data: self.ext_data,
            },
            outputs: self.outputs,
        })
    }
}

/// proven transaction plus the plaintext outputs for the sender's records
#[derive(Clone, Debug)]
pub struct BuiltTransaction {
    pub request: TransactionRequest,
    pub outputs: [Slot<Note>; ARITY],
}

impl BuiltTransaction {
    pub fn tx_id(&self) -> TxId {
        self.request.tx_id()
    }
}
