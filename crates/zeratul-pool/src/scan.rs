//! wallet-side note scanner
//!
//! outputs are shuffled and padding outputs look like real ones, so the
//! scanner trial-decrypts every `NewCommitment` it sees and treats failure as
//! "not mine". `NewNullifier` events mark recovered notes as spent.

use std::collections::HashSet;

use tracing::debug;

use crate::error::Result;
use crate::keys::Keypair;
use crate::ledger::TokenLedger;
use crate::note::{EncryptedNote, Note, NoteCommitment};
use crate::nullifier::{Nullifier, Position};
use crate::pool::{Pool, PoolEvent};
use crate::proof::ProofVerifier;
use crate::transaction::SpendableNote;
use crate::value::Amount;

/// a commitment emitted by the pool, as seen by a scanner
#[derive(Clone, Debug)]
pub struct ScanOutput<'a> {
    pub commitment: &'a NoteCommitment,
    pub index: Position,
    pub encrypted: &'a EncryptedNote,
}

/// a note recovered by trial decryption
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScannedNote {
    pub note: Note,
    pub nullifier: Nullifier,
}

impl ScannedNote {
    pub fn amount(&self) -> Amount {
        self.note.amount
    }
}

/// tracks the notes one keypair owns
#[derive(Debug)]
pub struct NoteScanner {
    keypair: Keypair,
    /// recovered notes in tree order
    notes: Vec<ScannedNote>,
    /// leaf indices already trial-decrypted
    scanned: HashSet<Position>,
    /// nullifiers revealed by the pool
    seen_nullifiers: HashSet<Nullifier>,
    /// number of pool events consumed
    cursor: usize,
}

impl NoteScanner {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair,
            notes: Vec::new(),
            scanned: HashSet::new(),
            seen_nullifiers: HashSet::new(),
            cursor: 0,
        }
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// events consumed so far, pass to `Pool::events_since`
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// trial-decrypt a single output
    pub fn try_decrypt(&self, output: &ScanOutput<'_>) -> Option<Result<ScannedNote>> {
        let note = Note::decrypt(&self.keypair, output.encrypted, output.commitment, output.index)?;
        Some(note.nullifier(&self.keypair).map(|nullifier| ScannedNote { note, nullifier }))
    }

    pub fn scan_sequential(&self, outputs: &[ScanOutput<'_>]) -> Result<Vec<ScannedNote>> {
        outputs.iter().filter_map(|o| self.try_decrypt(o)).collect()
    }

    #[cfg(feature = "parallel")]
    pub fn scan_parallel(&self, outputs: &[ScanOutput<'_>]) -> Result<Vec<ScannedNote>> {
        use rayon::prelude::*;
        outputs
            .par_iter()
            .filter_map(|o| self.try_decrypt(o))
            .collect()
    }

    /// trial-decrypt a batch, in parallel when the `parallel` feature is on
    pub fn scan(&self, outputs: &[ScanOutput<'_>]) -> Result<Vec<ScannedNote>> {
        #[cfg(feature = "parallel")]
        {
            self.scan_parallel(outputs)
        }
        #[cfg(not(feature = "parallel"))]
        {
            self.scan_sequential(outputs)
        }
    }

    /// consume a batch of pool events, returns how many new notes were found
    ///
    /// commitments at an index already scanned are skipped, so overlapping
    /// batches never count a note twice. does not move the sync cursor.
    pub fn scan_events(&mut self, events: &[PoolEvent]) -> Result<usize> {
        let mut outputs = Vec::new();
        for event in events {
            match event {
                PoolEvent::NewCommitment {
                    commitment,
                    index,
                    encrypted_output,
                } if !self.scanned.contains(index) => outputs.push(ScanOutput {
                    commitment,
                    index: *index,
                    encrypted: encrypted_output,
                }),
                PoolEvent::NewNullifier { nullifier } => {
                    self.seen_nullifiers.insert(*nullifier);
                }
                PoolEvent::NewCommitment { .. } | PoolEvent::BridgeWithdrawal { .. } => {}
            }
        }

        let found: Vec<_> = self
            .scan(&outputs)?
            .into_iter()
            .filter(|n| !n.note.amount.is_zero())
            .collect();
        self.scanned.extend(outputs.iter().map(|o| o.index));
        debug!(
            "scanned {} outputs, {} addressed to {}",
            outputs.len(),
            found.len(),
            self.keypair.address()
        );

        let count = found.len();
        self.notes.extend(found);
        Ok(count)
    }

    /// catch up with everything the pool emitted since the last sync
    pub fn sync<L: TokenLedger, V: ProofVerifier>(&mut self, pool: &Pool<L, V>) -> Result<usize> {
        let events = pool.events_since(self.cursor);
        let found = self.scan_events(events)?;
        self.cursor += events.len();
        Ok(found)
    }

    pub fn notes(&self) -> &[ScannedNote] {
        &self.notes
    }

    pub fn unspent_notes(&self) -> Vec<&ScannedNote> {
        self.notes
            .iter()
            .filter(|n| !self.seen_nullifiers.contains(&n.nullifier))
            .collect()
    }

    /// unspent notes paired with the key to spend them
    pub fn spendable(&self) -> Vec<SpendableNote> {
        self.unspent_notes()
            .into_iter()
            .map(|n| SpendableNote::new(n.note.clone(), self.keypair.clone()))
            .collect()
    }

    pub fn unspent_balance(&self) -> Result<Amount> {
        Amount::sum(self.unspent_notes().into_iter().map(|n| &n.note.amount))
    }

    pub fn spent_balance(&self) -> Result<Amount> {
        Amount::sum(
            self.notes
                .iter()
                .filter(|n| self.seen_nullifiers.contains(&n.nullifier))
                .map(|n| &n.note.amount),
        )
    }
}
