//! pool configuration
//!
//! defaults match the reference deployment: a height-5 tree (32 leaves),
//! 100 remembered roots, 0.05 minimum withdrawal and 1.0 maximum deposit.
//! amounts are written as decimal token strings in json and env.

use serde::{Deserialize, Serialize};

use crate::commitment::MAX_TREE_HEIGHT;
use crate::error::{Error, Result};
use crate::ledger::AccountId;
use crate::value::{parse_units, Amount, UNIT};

pub const ENV_MIN_WITHDRAWAL: &str = "MINIMUM_WITHDRAWAL_AMOUNT";
pub const ENV_MAX_DEPOSIT: &str = "MAXIMUM_DEPOSIT_AMOUNT";
pub const ENV_TREE_HEIGHT: &str = "POOL_TREE_HEIGHT";
pub const ENV_ROOT_HISTORY_SIZE: &str = "POOL_ROOT_HISTORY_SIZE";

/// which withdrawal paths the minimum applies to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalFloor {
    /// only withdrawals paid to a recipient on this chain
    #[default]
    Direct,
    /// only withdrawals released through the bridge
    Bridged,
    Both,
}

impl WithdrawalFloor {
    pub fn applies_to(&self, bridged: bool) -> bool {
        match self {
            Self::Direct => !bridged,
            Self::Bridged => bridged,
            Self::Both => true,
        }
    }
}

/// deployment accounts on the host ledger
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolAccounts {
    /// account holding pool custody
    pub pool: AccountId,
    /// the pool token
    pub token: AccountId,
    /// the only caller allowed to deliver bridged deposits, also receives bridge withdrawals
    pub bridge: AccountId,
    /// receives unaccounted custody
    pub multisig: AccountId,
}

impl Default for PoolAccounts {
    fn default() -> Self {
        Self {
            pool: AccountId::derive("pool"),
            token: AccountId::derive("token"),
            bridge: AccountId::derive("bridge"),
            multisig: AccountId::derive("multisig"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    pub tree_height: usize,
    /// roots accepted for proofs, current root included
    pub root_history_size: usize,
    #[serde(with = "units")]
    pub min_withdrawal: Amount,
    #[serde(with = "units")]
    pub max_deposit: Amount,
    /// apply `max_deposit` to bridged deposits as well
    pub cap_bridged_deposits: bool,
    pub withdrawal_floor: WithdrawalFloor,
    pub accounts: PoolAccounts,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            tree_height: 5,
            root_history_size: 100,
            min_withdrawal: Amount(UNIT / 20),
            max_deposit: Amount(UNIT),
            cap_bridged_deposits: true,
            withdrawal_floor: WithdrawalFloor::Direct,
            accounts: PoolAccounts::default(),
        }
    }
}

impl PoolConfig {
    /// parse and validate a json config, missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// defaults overridden by the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// defaults overridden by whatever `lookup` returns
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup(ENV_MIN_WITHDRAWAL) {
            config.min_withdrawal = parse_units(&v)
                .map_err(|_| Error::InvalidConfig(format!("{ENV_MIN_WITHDRAWAL}={v}")))?;
        }
        if let Some(v) = lookup(ENV_MAX_DEPOSIT) {
            config.max_deposit = parse_units(&v)
                .map_err(|_| Error::InvalidConfig(format!("{ENV_MAX_DEPOSIT}={v}")))?;
        }
        if let Some(v) = lookup(ENV_TREE_HEIGHT) {
            config.tree_height = v
                .trim()
                .parse()
                .map_err(|_| Error::InvalidConfig(format!("{ENV_TREE_HEIGHT}={v}")))?;
        }
        if let Some(v) = lookup(ENV_ROOT_HISTORY_SIZE) {
            config.root_history_size = v
                .trim()
                .parse()
                .map_err(|_| Error::InvalidConfig(format!("{ENV_ROOT_HISTORY_SIZE}={v}")))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tree_height == 0 || self.tree_height > MAX_TREE_HEIGHT {
            return Err(Error::InvalidConfig(format!(
                "tree_height must be in 1..={MAX_TREE_HEIGHT}, got {}",
                self.tree_height
            )));
        }
        if self.root_history_size == 0 {
            return Err(Error::InvalidConfig("root_history_size must be at least 1".into()));
        }
        if !self.max_deposit.in_range() || !self.min_withdrawal.in_range() {
            return Err(Error::InvalidConfig("deposit and withdrawal bounds out of range".into()));
        }

        let a = &self.accounts;
        if a.pool.is_zero() || a.token.is_zero() || a.bridge.is_zero() || a.multisig.is_zero() {
            return Err(Error::InvalidConfig("deployment accounts must be non-zero".into()));
        }
        if a.pool == a.bridge {
            return Err(Error::InvalidConfig("pool and bridge accounts must differ".into()));
        }
        Ok(())
    }
}

/// (de)serialize amounts as decimal token strings
mod units {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::value::{parse_units, Amount};

    pub fn serialize<S: Serializer>(amount: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(amount)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_units(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.tree_height, 5);
        assert_eq!(config.root_history_size, 100);
        assert_eq!(config.min_withdrawal, parse_units("0.05").unwrap());
        assert_eq!(config.max_deposit, parse_units("1").unwrap());
        assert!(config.cap_bridged_deposits);
        assert_eq!(config.withdrawal_floor, WithdrawalFloor::Direct);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json() {
        let config = PoolConfig::from_json(
            r#"{
                "tree_height": 8,
                "min_withdrawal": "0.1",
                "withdrawal_floor": "both",
                "cap_bridged_deposits": false
            }"#,
        )
        .unwrap();

        assert_eq!(config.tree_height, 8);
        assert_eq!(config.min_withdrawal, parse_units("0.1").unwrap());
        assert_eq!(config.max_deposit, parse_units("1").unwrap());
        assert_eq!(config.withdrawal_floor, WithdrawalFloor::Both);
        assert!(!config.cap_bridged_deposits);

        assert!(matches!(
            PoolConfig::from_json(r#"{"tree_height": 0}"#),
            Err(Error::InvalidConfig(_))
        ));
        assert!(PoolConfig::from_json(r#"{"min_withdrawal": "abc"}"#).is_err());
        assert!(PoolConfig::from_json(r#"{"tree_hight": 5}"#).is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = PoolConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"min_withdrawal\":\"0.05\""));
        assert_eq!(PoolConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_from_vars() {
        let vars: HashMap<&str, &str> = [
            (ENV_MIN_WITHDRAWAL, "0.01"),
            (ENV_MAX_DEPOSIT, "10"),
            (ENV_ROOT_HISTORY_SIZE, "30"),
        ]
        .into_iter()
        .collect();
        let config = PoolConfig::from_vars(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.min_withdrawal, parse_units("0.01").unwrap());
        assert_eq!(config.max_deposit, parse_units("10").unwrap());
        assert_eq!(config.root_history_size, 30);
        assert_eq!(config.tree_height, 5);

        let bad = PoolConfig::from_vars(|k| (k == ENV_TREE_HEIGHT).then(|| "tall".to_string()));
        assert!(matches!(bad, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_withdrawal_floor() {
        assert!(WithdrawalFloor::Direct.applies_to(false));
        assert!(!WithdrawalFloor::Direct.applies_to(true));
        assert!(WithdrawalFloor::Bridged.applies_to(true));
        assert!(WithdrawalFloor::Both.applies_to(true));
        assert!(WithdrawalFloor::Both.applies_to(false));
    }
}
