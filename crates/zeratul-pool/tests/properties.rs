//! pool-level invariants: conservation, double spends, root window, bounds

mod common;

use common::{units, World};
use rand::Rng;
use zeratul_pool::{
    AccountId, Amount, BridgeMessage, Error, Keypair, Note, NoteScanner, PoolConfig,
    TransactionBuilder, WithdrawalFloor,
};

#[test]
fn test_conservation_across_random_activity() {
    let mut world = World::new(PoolConfig {
        tree_height: 8,
        min_withdrawal: Amount::ZERO,
        ..PoolConfig::default()
    });
    let wallets = [
        Keypair::from_phrase("w0"),
        Keypair::from_phrase("w1"),
        Keypair::from_phrase("w2"),
    ];
    let relayer = AccountId::derive("relayer");
    let mut paid_out = Amount::ZERO;
    let mut deposited = Amount::ZERO;

    for round in 0..12 {
        let owner = &wallets[round % wallets.len()];
        let amount = Amount(world.rng.gen_range(1_000..1_000_000u128));

        if round % 2 == 0 {
            world.bridge_deposit(owner, amount).unwrap();
        } else {
            world.direct_deposit(owner, amount).unwrap();
        }
        deposited = deposited.checked_add(amount).unwrap();

        // every third round the owner spends one note: part to the next wallet, part out
        if round % 3 == 2 {
            let next = &wallets[(round + 1) % wallets.len()];
            let note = world.scanner(owner).spendable().remove(0);
            let total = note.note.amount.0;
            let fee = Amount(total / 10);
            let out = Amount(total / 4);
            let keep = Amount(total / 3);
            let recipient = AccountId::derive(&format!("exit-{round}"));

            let built = TransactionBuilder::new(world.pool.tree())
                .input(note)
                .output(Note::new(keep, next.address(), &mut world.rng))
                .recipient(recipient)
                .relayer(relayer, fee)
                .build(&mut world.rng, &world.prover)
                .unwrap();
            let ext = built.request.ext_data.ext_amount;
            assert_eq!(ext.withdrawn().0 + fee.0 + keep.0, total);
            assert!(ext.withdrawn() >= out);

            world.pool.transact(relayer, built.request).unwrap();
            paid_out = Amount(paid_out.0 + ext.withdrawn().0 + fee.0);
        }

        // custody always equals the sum of unspent notes
        let held: u128 = wallets
            .iter()
            .map(|w| world.scanner(w).unspent_balance().unwrap().0)
            .sum();
        assert_eq!(world.custody(), Amount(held));
        assert_eq!(world.custody().0, deposited.0 - paid_out.0);
        assert_eq!(world.pool.settled_balance(), world.custody());
    }
}

#[test]
fn test_double_spend_changes_nothing() {
    let mut world = World::new(PoolConfig::default());
    let alice = Keypair::from_phrase("alice");
    world.direct_deposit(&alice, units("0.3")).unwrap();
    let note = world.scanner(&alice).spendable().remove(0);

    let first = TransactionBuilder::new(world.pool.tree())
        .input(note.clone())
        .recipient(AccountId::derive("first"))
        .build(&mut world.rng, &world.prover)
        .unwrap();
    let second = TransactionBuilder::new(world.pool.tree())
        .input(note)
        .recipient(AccountId::derive("second"))
        .build(&mut world.rng, &world.prover)
        .unwrap();

    world.pool.transact(AccountId::ZERO, first.request).unwrap();

    let root = world.pool.root();
    let leaves = world.pool.tree().len();
    let nullifiers = world.pool.nullifiers().len();
    let events = world.pool.events().len();
    let custody = world.custody();

    let err = world
        .pool
        .transact(AccountId::ZERO, second.request)
        .unwrap_err();
    assert!(matches!(err, Error::AlreadySpent(_)));

    assert_eq!(world.pool.root(), root);
    assert_eq!(world.pool.tree().len(), leaves);
    assert_eq!(world.pool.nullifiers().len(), nullifiers);
    assert_eq!(world.pool.events().len(), events);
    assert_eq!(world.custody(), custody);
    assert_eq!(world.balance(&AccountId::derive("second")), Amount::ZERO);
}

/// build a withdrawal, then apply `later` deposits before submitting it
fn withdraw_after(history: usize, later: usize) -> Result<(), Error> {
    let mut world = World::new(PoolConfig {
        root_history_size: history,
        ..PoolConfig::default()
    });
    let alice = Keypair::from_phrase("alice");
    let bob = Keypair::from_phrase("bob");
    world.direct_deposit(&alice, units("0.1")).unwrap();

    let note = world.scanner(&alice).spendable().remove(0);
    let built = TransactionBuilder::new(world.pool.tree())
        .input(note)
        .recipient(AccountId::derive("recipient"))
        .build(&mut world.rng, &world.prover)
        .unwrap();

    for _ in 0..later {
        world.direct_deposit(&bob, units("0.01")).unwrap();
    }
    world
        .pool
        .transact(AccountId::ZERO, built.request)
        .map(|_| ())
}

#[test]
fn test_root_history_window() {
    let n = 4;
    assert!(withdraw_after(n, 0).is_ok());
    assert!(withdraw_after(n, n - 1).is_ok());
    assert_eq!(withdraw_after(n, n), Err(Error::StaleRoot));
    assert_eq!(withdraw_after(1, 1), Err(Error::StaleRoot));
}

#[test]
fn test_bridge_amount_binding() {
    let mut world = World::new(PoolConfig::default());
    let alice = Keypair::from_phrase("alice");
    let built = world.deposit_tx(&alice, units("0.2"));
    world
        .pool
        .ledger_mut()
        .mint(world.accounts.bridge, units("0.3"))
        .unwrap();

    let root = world.pool.root();
    let message = BridgeMessage::new(world.accounts.token, units("0.3"), &built.request);
    let err = world.bridge.deliver(&mut world.pool, &message).unwrap_err();

    assert!(matches!(err, Error::AmountMismatch { .. }));
    assert_eq!(world.pool.root(), root);
    assert!(world.pool.events().is_empty());
    assert!(world.pool.nullifiers().is_empty());
    assert!(!world.bridge.is_processed(&built.tx_id()));

    // the bridged funds sit in custody uncredited until swept
    assert_eq!(world.pool.unaccounted_balance(), units("0.3"));
    assert_eq!(world.pool.sweep_unaccounted().unwrap(), units("0.3"));
    assert_eq!(world.balance(&world.accounts.multisig), units("0.3"));
    assert_eq!(world.custody(), Amount::ZERO);
}

#[test]
fn test_bridge_redelivery() {
    let mut world = World::new(PoolConfig::default());
    let alice = Keypair::from_phrase("alice");
    let built = world.deposit_tx(&alice, units("0.2"));
    world
        .pool
        .ledger_mut()
        .mint(world.accounts.bridge, units("0.4"))
        .unwrap();
    let message = BridgeMessage::new(world.accounts.token, units("0.2"), &built.request);

    assert!(matches!(
        world.bridge.deliver(&mut world.pool, &message),
        Ok(zeratul_pool::Delivery::Applied(_))
    ));
    let version = world.pool.version();
    assert_eq!(
        world.bridge.deliver(&mut world.pool, &message).unwrap(),
        zeratul_pool::Delivery::Duplicate(built.tx_id())
    );
    assert_eq!(world.pool.version(), version);
    assert_eq!(world.custody(), units("0.2"));
    assert_eq!(world.scanner(&alice).unspent_balance().unwrap(), units("0.2"));
}

#[test]
fn test_bridged_deposit_cap_is_configurable() {
    let alice = Keypair::from_phrase("alice");

    let mut capped = World::new(PoolConfig::default());
    assert_eq!(
        capped.bridge_deposit(&alice, units("2")).unwrap_err(),
        Error::AboveMaximumDeposit {
            amount: units("2"),
            maximum: units("1")
        }
    );

    let mut uncapped = World::new(PoolConfig {
        cap_bridged_deposits: false,
        ..PoolConfig::default()
    });
    uncapped.bridge_deposit(&alice, units("2")).unwrap();
    assert_eq!(uncapped.custody(), units("2"));

    // direct deposits stay capped either way
    assert!(matches!(
        uncapped.direct_deposit(&alice, units("2")),
        Err(Error::AboveMaximumDeposit { .. })
    ));
}

#[test]
fn test_withdrawal_floor_policy() {
    let alice = Keypair::from_phrase("alice");
    let remote = AccountId::derive("remote");

    // small bridged withdrawal: allowed under the default floor, rejected when bridged is floored
    for (floor, allowed) in [
        (WithdrawalFloor::Direct, true),
        (WithdrawalFloor::Bridged, false),
        (WithdrawalFloor::Both, false),
    ] {
        let mut world = World::new(PoolConfig {
            withdrawal_floor: floor,
            ..PoolConfig::default()
        });
        world.direct_deposit(&alice, units("0.01")).unwrap();
        let note = world.scanner(&alice).spendable().remove(0);

        let built = TransactionBuilder::new(world.pool.tree())
            .input(note)
            .recipient(remote)
            .bridge_withdrawal(Amount::ZERO)
            .build(&mut world.rng, &world.prover)
            .unwrap();
        let result = world.pool.transact(remote, built.request);

        if allowed {
            assert!(result.is_ok(), "{floor:?}");
            assert_eq!(world.balance(&world.accounts.bridge), units("0.01"));
        } else {
            assert_eq!(
                result.unwrap_err(),
                Error::BelowMinimumWithdrawal {
                    amount: units("0.01"),
                    minimum: units("0.05")
                }
            );
        }
    }
}

#[test]
fn test_scanner_ignores_foreign_outputs() {
    let mut world = World::new(PoolConfig::default());
    let alice = Keypair::from_phrase("alice");
    let eve = Keypair::from_phrase("eve");
    world.direct_deposit(&alice, units("0.1")).unwrap();
    world.bridge_deposit(&alice, units("0.2")).unwrap();

    let mut eve_wallet = NoteScanner::new(eve);
    assert_eq!(eve_wallet.sync(&world.pool).unwrap(), 0);
    assert!(eve_wallet.notes().is_empty());
    assert_eq!(world.scanner(&alice).notes().len(), 2);
}
