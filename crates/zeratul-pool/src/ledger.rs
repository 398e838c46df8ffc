//! token custody
//!
//! the pool never owns a token implementation, it talks to one through
//! [`TokenLedger`]. [`MemoryLedger`] is the in-process fungible token used by
//! tests and local deployments.

use core::fmt;
use core::str::FromStr;
use std::collections::HashMap;

use codec::{Decode, Encode};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::value::Amount;

const ACCOUNT_DOMAIN: &[u8] = b"zeratul.pool.account.v1";

/// 20-byte public account on the host ledger
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Encode, Decode)]
pub struct AccountId(pub [u8; 20]);

impl AccountId {
    pub const ZERO: Self = Self([0u8; 20]);

    /// deterministic account for a human label ("pool", "bridge", ...)
    pub fn derive(label: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(ACCOUNT_DOMAIN);
        hasher.update(label.as_bytes());
        let mut id = [0u8; 20];
        id.copy_from_slice(&hasher.finalize().as_bytes()[..20]);
        Self(id)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for AccountId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|e| Error::InvalidAddress(e.to_string()))?;
        let id: [u8; 20] = bytes
            .try_into()
            .map_err(|_| Error::InvalidAddress(format!("account must be 20 bytes: {s}")))?;
        Ok(Self(id))
    }
}

impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// fungible token the pool keeps custody in
pub trait TokenLedger {
    fn balance_of(&self, account: &AccountId) -> Amount;

    fn allowance(&self, owner: &AccountId, spender: &AccountId) -> Amount;

    fn approve(&mut self, owner: AccountId, spender: AccountId, amount: Amount);

    fn transfer(&mut self, from: AccountId, to: AccountId, amount: Amount) -> Result<()>;

    /// move `amount` from `from` to `to` spending `spender`'s allowance
    fn transfer_from(
        &mut self,
        spender: AccountId,
        from: AccountId,
        to: AccountId,
        amount: Amount,
    ) -> Result<()>;
}

/// in-memory token with balances and allowances
#[derive(Clone, Debug, Default)]
pub struct MemoryLedger {
    balances: HashMap<AccountId, Amount>,
    allowances: HashMap<(AccountId, AccountId), Amount>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// create `amount` out of thin air for `account`
    pub fn mint(&mut self, account: AccountId, amount: Amount) -> Result<()> {
        let balance = self.balance_of(&account);
        let updated = balance
            .checked_add(amount)
            .ok_or_else(|| Error::InvalidAmount(format!("balance of {account} overflows")))?;
        self.balances.insert(account, updated);
        Ok(())
    }

    /// total supply across all accounts, errors if it no longer fits an amount
    pub fn total_supply(&self) -> Result<Amount> {
        Amount::sum(self.balances.values())
    }
}

impl TokenLedger for MemoryLedger {
    fn balance_of(&self, account: &AccountId) -> Amount {
        self.balances.get(account).copied().unwrap_or_default()
    }

    fn allowance(&self, owner: &AccountId, spender: &AccountId) -> Amount {
        self.allowances
            .get(&(*owner, *spender))
            .copied()
            .unwrap_or_default()
    }

    fn approve(&mut self, owner: AccountId, spender: AccountId, amount: Amount) {
        self.allowances.insert((owner, spender), amount);
    }

    fn transfer(&mut self, from: AccountId, to: AccountId, amount: Amount) -> Result<()> {
        let available = self.balance_of(&from);
        let remaining = available
            .checked_sub(amount)
            .ok_or(Error::InsufficientBalance {
                account: from,
                needed: amount,
                available,
            })?;
        if from == to {
            return Ok(());
        }
        let credited = self
            .balance_of(&to)
            .checked_add(amount)
            .ok_or_else(|| Error::InvalidAmount(format!("balance of {to} overflows")))?;
        self.balances.insert(from, remaining);
        self.balances.insert(to, credited);
        Ok(())
    }

    fn transfer_from(
        &mut self,
        spender: AccountId,
        from: AccountId,
        to: AccountId,
        amount: Amount,
    ) -> Result<()> {
        let allowed = self.allowance(&from, &spender);
        let remaining = allowed
            .checked_sub(amount)
            .ok_or(Error::InsufficientAllowance {
                owner: from,
                needed: amount,
                available: allowed,
            })?;
        self.transfer(from, to, amount)?;
        self.allowances.insert((from, spender), remaining);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_string() {
        let pool = AccountId::derive("pool");
        let s = pool.to_string();
        assert_eq!(s.len(), 42);
        assert_eq!(s.parse::<AccountId>().unwrap(), pool);
        assert_ne!(pool, AccountId::derive("bridge"));

        assert!("0x1234".parse::<AccountId>().is_err());
        assert!(AccountId::ZERO.is_zero());
    }

    #[test]
    fn test_account_id_json() {
        let bridge = AccountId::derive("bridge");
        let json = serde_json::to_string(&bridge).unwrap();
        assert_eq!(json, format!("\"{bridge}\""));
        assert_eq!(serde_json::from_str::<AccountId>(&json).unwrap(), bridge);
    }

    #[test]
    fn test_transfer() {
        let alice = AccountId::derive("alice");
        let bob = AccountId::derive("bob");
        let mut ledger = MemoryLedger::new();
        ledger.mint(alice, Amount(100)).unwrap();

        ledger.transfer(alice, bob, Amount(40)).unwrap();
        assert_eq!(ledger.balance_of(&alice), Amount(60));
        assert_eq!(ledger.balance_of(&bob), Amount(40));

        assert_eq!(
            ledger.transfer(bob, alice, Amount(41)),
            Err(Error::InsufficientBalance {
                account: bob,
                needed: Amount(41),
                available: Amount(40),
            })
        );

        ledger.transfer(alice, alice, Amount(60)).unwrap();
        assert_eq!(ledger.balance_of(&alice), Amount(60));
        assert_eq!(ledger.total_supply().unwrap(), Amount(100));
    }

    #[test]
    fn test_total_supply_overflow() {
        let mut ledger = MemoryLedger::new();
        ledger.mint(AccountId::derive("a"), Amount(u128::MAX)).unwrap();
        assert_eq!(ledger.total_supply().unwrap(), Amount(u128::MAX));

        // each balance fits, their sum does not
        ledger.mint(AccountId::derive("b"), Amount(1)).unwrap();
        assert!(matches!(
            ledger.total_supply(),
            Err(Error::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_transfer_from_spends_allowance() {
        let owner = AccountId::derive("owner");
        let pool = AccountId::derive("pool");
        let mut ledger = MemoryLedger::new();
        ledger.mint(owner, Amount(100)).unwrap();

        assert!(matches!(
            ledger.transfer_from(pool, owner, pool, Amount(1)),
            Err(Error::InsufficientAllowance { .. })
        ));

        ledger.approve(owner, pool, Amount(30));
        ledger.transfer_from(pool, owner, pool, Amount(20)).unwrap();
        assert_eq!(ledger.allowance(&owner, &pool), Amount(10));
        assert_eq!(ledger.balance_of(&pool), Amount(20));

        // failed transfer leaves allowance alone
        ledger.approve(owner, pool, Amount(500));
        assert!(ledger.transfer_from(pool, owner, pool, Amount(200)).is_err());
        assert_eq!(ledger.allowance(&owner, &pool), Amount(500));
    }
}
