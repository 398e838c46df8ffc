//! transaction proofs
//!
//! every pool transition is gated by one proof over a fixed 2-in/2-out
//! layout. the pool only relies on [`ProofVerifier`]: a yes/no answer over
//! [`PublicInputs`]. wallets produce proofs through [`Prover`].
//!
//! proves (relation the circuit enforces):
//! - each input note opens its commitment and sits under `root`
//!   (zero-amount padding inputs skip the membership check)
//! - each input nullifier is derived by the note owner at the note position
//! - each output commitment opens to an in-range amount
//! - sum(inputs) + public_amount = sum(outputs)
//!
//! [`ProvingSetup`] is the development stand-in for the circuit: the prover
//! checks the relation on the witness in the clear, then binds the public
//! inputs into a merlin transcript keyed by the setup secret. it is sound
//! only as long as the setup secret stays with trusted provers and it hides
//! nothing from them.

use codec::{Decode, Encode};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::commitment::{MerklePath, Root};
use crate::error::{Error, Result};
use crate::keys::Keypair;
use crate::ledger::AccountId;
use crate::note::{EncryptedNote, Note, NoteCommitment};
use crate::nullifier::Nullifier;
use crate::value::{Amount, ExtAmount};

const EXT_DATA_DOMAIN: &[u8] = b"zeratul.pool.ext-data.v1";
const PROOF_DOMAIN: &[u8] = b"zeratul.pool.proof.v1";

/// data bound to the proof through its hash but not proven itself
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct ExtData {
    /// withdrawal recipient, zero for pure deposits and transfers
    pub recipient: AccountId,
    pub ext_amount: ExtAmount,
    pub relayer: AccountId,
    pub fee: Amount,
    /// one ciphertext per output slot, same order as the output commitments
    pub encrypted_outputs: [EncryptedNote; 2],
    /// pay the withdrawal to the bridge for release on the remote chain
    pub bridge_withdrawal: bool,
    pub bridge_fee: Amount,
}

impl ExtData {
    pub fn hash(&self) -> ExtDataHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(EXT_DATA_DOMAIN);
        hasher.update(&self.encode());
        ExtDataHash(*hasher.finalize().as_bytes())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub struct ExtDataHash(pub [u8; 32]);

/// public inputs of the transaction proof
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct PublicInputs {
    /// tree root the input paths were built against
    pub root: Root,
    /// ext_amount - fee
    pub public_amount: ExtAmount,
    pub ext_data_hash: ExtDataHash,
    pub input_nullifiers: [Nullifier; 2],
    pub output_commitments: [NoteCommitment; 2],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Proof(pub [u8; 64]);

/// private input: note being spent, its owner and its membership path
#[derive(Clone, Debug)]
pub struct InputWitness {
    pub note: Note,
    pub keypair: Keypair,
    pub path: MerklePath,
}

#[derive(Clone, Debug)]
pub struct Witness {
    pub inputs: [InputWitness; 2],
    pub outputs: [Note; 2],
}

/// everything a prover needs
#[derive(Clone, Debug)]
pub struct ProofRequest {
    pub public: PublicInputs,
    pub witness: Witness,
}

/// builder-side proof generation
pub trait Prover {
    fn prove(&self, request: &ProofRequest) -> Result<Proof>;
}

/// pool-side proof verification
pub trait ProofVerifier {
    fn verify(&self, proof: &Proof, public: &PublicInputs) -> bool;
}

/// shared secret of the development proving setup
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ProvingSetup {
    key: [u8; 32],
}

impl ProvingSetup {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut key = [0u8; 32];
        rng.fill_bytes(&mut key);
        Self { key }
    }

    pub fn from_seed(seed: &[u8]) -> Self {
        Self {
            key: *blake3::hash(seed).as_bytes(),
        }
    }

    pub fn prover(&self) -> TranscriptProver {
        TranscriptProver {
            setup: self.clone(),
        }
    }

    pub fn verifier(&self) -> TranscriptVerifier {
        TranscriptVerifier {
            setup: self.clone(),
        }
    }

    fn bind(&self, public: &PublicInputs) -> Proof {
        let mut transcript = Transcript::new(PROOF_DOMAIN);
        transcript.append_message(b"setup", &self.key);
        transcript.append_message(b"public", &public.encode());

        let mut proof = [0u8; 64];
        transcript.challenge_bytes(b"proof", &mut proof);
        Proof(proof)
    }
}

impl core::fmt::Debug for ProvingSetup {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProvingSetup").finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub struct TranscriptProver {
    setup: ProvingSetup,
}

impl Prover for TranscriptProver {
    fn prove(&self, request: &ProofRequest) -> Result<Proof> {
        check_witness(&request.public, &request.witness)?;
        Ok(self.setup.bind(&request.public))
    }
}

#[derive(Clone, Debug)]
pub struct TranscriptVerifier {
    setup: ProvingSetup,
}

impl ProofVerifier for TranscriptVerifier {
    fn verify(&self, proof: &Proof, public: &PublicInputs) -> bool {
        self.setup.bind(public) == *proof
    }
}

/// check the witness satisfies the transaction relation
fn check_witness(public: &PublicInputs, witness: &Witness) -> Result<()> {
    let mut total_in: i128 = 0;
    for (input, nullifier) in witness.inputs.iter().zip(&public.input_nullifiers) {
        let note = &input.note;
        if !note.amount.in_range() {
            return Err(Error::InvalidWitness("input amount out of range"));
        }

        let position = note
            .spend_position()
            .map_err(|_| Error::InvalidWitness("input has no position"))?;
        if !note.amount.is_zero()
            && (input.path.position != position
                || !input.path.verify(&note.commitment(), &public.root))
        {
            return Err(Error::InvalidWitness("input not under root"));
        }

        match note.nullifier(&input.keypair) {
            Ok(derived) if derived == *nullifier => {}
            _ => return Err(Error::InvalidWitness("nullifier mismatch")),
        }
        total_in += note.amount.0 as i128;
    }

    let mut total_out: i128 = 0;
    for (note, commitment) in witness.outputs.iter().zip(&public.output_commitments) {
        if !note.amount.in_range() {
            return Err(Error::InvalidWitness("output amount out of range"));
        }
        if note.commitment() != *commitment {
            return Err(Error::InvalidWitness("output commitment mismatch"));
        }
        total_out += note.amount.0 as i128;
    }

    if total_in.checked_add(public.public_amount.0) != Some(total_out) {
        return Err(Error::InvalidWitness("value not conserved"));
    }
    Ok(())
}
