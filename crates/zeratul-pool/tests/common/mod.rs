//! shared harness for pool integration tests
#![allow(dead_code)]

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use zeratul_pool::proof::{TranscriptProver, TranscriptVerifier};
use zeratul_pool::{
    parse_units, AccountId, Amount, BridgeAdapter, BridgeMessage, BuiltTransaction, Delivery,
    Keypair, MemoryLedger, Note, NoteScanner, Pool, PoolAccounts, PoolConfig, ProvingSetup,
    Result, TokenLedger, TransactionBuilder,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(EnvFilter::from_default_env())
        .try_init();
}

pub fn units(s: &str) -> Amount {
    parse_units(s).unwrap()
}

/// pool, bridge adapter and a prover sharing one dev setup
pub struct World {
    pub pool: Pool<MemoryLedger, TranscriptVerifier>,
    pub bridge: BridgeAdapter,
    pub prover: TranscriptProver,
    pub rng: ChaCha20Rng,
    pub accounts: PoolAccounts,
}

impl World {
    pub fn new(config: PoolConfig) -> Self {
        init_tracing();
        let setup = ProvingSetup::from_seed(b"integration");
        let accounts = config.accounts.clone();
        Self {
            pool: Pool::new(config, MemoryLedger::new(), setup.verifier()).unwrap(),
            bridge: BridgeAdapter::new(),
            prover: setup.prover(),
            rng: ChaCha20Rng::seed_from_u64(2024),
            accounts,
        }
    }

    pub fn balance(&self, account: &AccountId) -> Amount {
        self.pool.ledger().balance_of(account)
    }

    /// custody the pool account holds
    pub fn custody(&self) -> Amount {
        self.balance(&self.accounts.pool)
    }

    /// deposit-only transaction creating one note for `owner`
    pub fn deposit_tx(&mut self, owner: &Keypair, amount: Amount) -> BuiltTransaction {
        TransactionBuilder::new(self.pool.tree())
            .output(Note::new(amount, owner.address(), &mut self.rng))
            .build(&mut self.rng, &self.prover)
            .unwrap()
    }

    /// remote chain deposits `amount` for `owner` through the bridge
    pub fn bridge_deposit(&mut self, owner: &Keypair, amount: Amount) -> Result<Delivery> {
        let built = self.deposit_tx(owner, amount);
        self.pool
            .ledger_mut()
            .mint(self.accounts.bridge, amount)
            .unwrap();
        let message = BridgeMessage::new(self.accounts.token, amount, &built.request);
        self.bridge.deliver(&mut self.pool, &message)
    }

    /// direct deposit from a freshly funded account
    pub fn direct_deposit(&mut self, owner: &Keypair, amount: Amount) -> Result<AccountId> {
        let sender = AccountId::derive(&format!("depositor-{}", self.pool.version()));
        let ledger = self.pool.ledger_mut();
        ledger.mint(sender, amount).unwrap();
        ledger.approve(sender, self.accounts.pool, amount);

        let built = self.deposit_tx(owner, amount);
        self.pool.transact(sender, built.request)?;
        Ok(sender)
    }

    pub fn scanner(&self, keypair: &Keypair) -> NoteScanner {
        let mut scanner = NoteScanner::new(keypair.clone());
        scanner.sync(&self.pool).unwrap();
        scanner
    }
}
