//! value types for the pool
//!
//! amounts are base units of the pool token (18 decimals). every amount the
//! circuit sees must stay below [`MAX_AMOUNT`], which keeps sums of a few
//! amounts comfortably inside `i128`.

use core::fmt;

use codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// token decimals
pub const DECIMALS: usize = 18;

/// one whole token in base units
pub const UNIT: u128 = 1_000_000_000_000_000_000;

/// exclusive upper bound for note amounts, fees and |external amount|
pub const MAX_AMOUNT: u128 = 1 << 120;

/// unsigned token amount
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Encode, Decode, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct Amount(pub u128);

impl Amount {
    pub const ZERO: Self = Self(0);

    pub fn new(amount: u128) -> Self {
        Self(amount)
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// below the circuit range bound
    pub fn in_range(&self) -> bool {
        self.0 < MAX_AMOUNT
    }

    /// encode for commitments
    pub fn to_bytes(&self) -> [u8; 16] {
        self.0.to_le_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_le_bytes(bytes))
    }

    /// sum a set of amounts, failing on overflow
    pub fn sum<'a>(amounts: impl IntoIterator<Item = &'a Amount>) -> Result<Self> {
        amounts
            .into_iter()
            .try_fold(Amount::ZERO, |acc, a| acc.checked_add(*a))
            .ok_or_else(|| Error::InvalidAmount("amount sum overflows".into()))
    }
}

impl From<u128> for Amount {
    fn from(v: u128) -> Self {
        Self(v)
    }
}

impl From<u64> for Amount {
    fn from(v: u64) -> Self {
        Self(v as u128)
    }
}

impl From<Amount> for u128 {
    fn from(v: Amount) -> Self {
        v.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / UNIT;
        let frac = self.0 % UNIT;
        if frac == 0 {
            return write!(f, "{whole}");
        }
        let frac = format!("{frac:018}");
        write!(f, "{whole}.{}", frac.trim_end_matches('0'))
    }
}

/// parse a decimal token string ("0.05", "1", ".5") into base units
pub fn parse_units(s: &str) -> Result<Amount> {
    let s = s.trim();
    let invalid = || Error::InvalidAmount(s.to_string());

    let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    if frac.len() > DECIMALS {
        return Err(invalid());
    }
    if !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let frac: u128 = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<width$}", width = DECIMALS)
            .parse()
            .map_err(|_| invalid())?
    };

    whole
        .checked_mul(UNIT)
        .and_then(|w| w.checked_add(frac))
        .map(Amount)
        .ok_or_else(invalid)
}

/// signed value entering (positive) or leaving (negative) the pool
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Encode, Decode)]
pub struct ExtAmount(pub i128);

impl ExtAmount {
    pub const ZERO: Self = Self(0);

    /// external amount for a deposit of `amount`
    pub fn deposit(amount: Amount) -> Result<Self> {
        if !amount.in_range() {
            return Err(Error::AmountOutOfRange(amount));
        }
        Ok(Self(amount.0 as i128))
    }

    /// external amount for a withdrawal of `amount`
    pub fn withdrawal(amount: Amount) -> Result<Self> {
        Self::deposit(amount).map(|d| Self(-d.0))
    }

    /// `credit - debit`, both range checked
    pub fn balance(credit: Amount, debit: Amount) -> Result<Self> {
        let credit = Self::deposit(credit)?;
        let debit = Self::deposit(debit)?;
        Ok(Self(credit.0 - debit.0))
    }

    pub fn is_deposit(&self) -> bool {
        self.0 > 0
    }

    pub fn is_withdrawal(&self) -> bool {
        self.0 < 0
    }

    /// absolute value
    pub fn magnitude(&self) -> Amount {
        Amount(self.0.unsigned_abs())
    }

    /// amount deposited, zero unless this is a deposit
    pub fn deposited(&self) -> Amount {
        if self.is_deposit() {
            self.magnitude()
        } else {
            Amount::ZERO
        }
    }

    /// amount withdrawn, zero unless this is a withdrawal
    pub fn withdrawn(&self) -> Amount {
        if self.is_withdrawal() {
            self.magnitude()
        } else {
            Amount::ZERO
        }
    }

    pub fn in_range(&self) -> bool {
        self.magnitude().in_range()
    }
}

impl fmt::Display for ExtAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_withdrawal() {
            write!(f, "-{}", self.magnitude())
        } else {
            write!(f, "{}", self.magnitude())
        }
    }
}
