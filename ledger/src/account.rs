//! Internal accounts and the hold primitives applied to them.

use arvault_common::{AccountId, Currency};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

/// A house account holding reserves in one currency.
///
/// Invariant: `balance >= 0`, `hold >= 0` and `balance - hold >= 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account identifier.
    pub id: AccountId,
    /// Currency held.
    pub currency: Currency,
    /// Total funds on the account, including those on hold.
    pub balance: Decimal,
    /// Funds earmarked for in-flight exchanges.
    pub hold: Decimal,
}

/// A mutation applied atomically to one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundsOp {
    /// Earmark funds: `hold += amount` if available.
    Reserve,
    /// Finalize a debit: `balance -= amount`, `hold -= amount`.
    Commit,
    /// Release a reservation: `hold -= amount`.
    Rollback,
    /// Add funds: `balance += amount`.
    Credit,
    /// Administrative override of the balance.
    SetBalance,
}

impl Account {
    /// Create an account with no hold.
    pub fn new(id: AccountId, currency: Currency, balance: Decimal) -> Self {
        Self {
            id,
            currency,
            balance,
            hold: Decimal::ZERO,
        }
    }

    /// Funds not on hold.
    pub fn available(&self) -> Decimal {
        self.balance - self.hold
    }

    /// Check the balance/hold invariant.
    pub fn is_consistent(&self) -> bool {
        self.balance >= Decimal::ZERO
            && self.hold >= Decimal::ZERO
            && self.available() >= Decimal::ZERO
    }

    /// Apply `op` with `amount`, leaving the account untouched on refusal.
    pub fn apply(&mut self, op: FundsOp, amount: Decimal) -> LedgerResult<()> {
        match op {
            FundsOp::Reserve => self.reserve(amount),
            FundsOp::Commit => self.commit(amount),
            FundsOp::Rollback => self.rollback(amount),
            FundsOp::Credit => self.credit(amount),
            FundsOp::SetBalance => self.set_balance(amount),
        }
    }

    /// Put `amount` on hold if enough funds are available.
    pub fn reserve(&mut self, amount: Decimal) -> LedgerResult<()> {
        check_amount(amount)?;
        let available = self.available();
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                account: self.id,
                requested: amount,
                available,
            });
        }
        self.hold += amount;
        Ok(())
    }

    /// Turn `amount` of hold into a balance decrease.
    pub fn commit(&mut self, amount: Decimal) -> LedgerResult<()> {
        self.check_hold(amount)?;
        self.balance -= amount;
        self.hold -= amount;
        Ok(())
    }

    /// Release `amount` of hold without touching the balance.
    pub fn rollback(&mut self, amount: Decimal) -> LedgerResult<()> {
        self.check_hold(amount)?;
        self.hold -= amount;
        Ok(())
    }

    /// Increase the balance; refused only if the sum does not fit a `Decimal`.
    pub fn credit(&mut self, amount: Decimal) -> LedgerResult<()> {
        check_amount(amount)?;
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(LedgerError::InvalidAmount(amount))?;
        Ok(())
    }

    /// Override the balance; it may not drop below the current hold.
    pub fn set_balance(&mut self, balance: Decimal) -> LedgerResult<()> {
        if balance < self.hold {
            return Err(LedgerError::InvalidBalance {
                account: self.id,
                balance,
                hold: self.hold,
            });
        }
        self.balance = balance;
        Ok(())
    }

    fn check_hold(&self, amount: Decimal) -> LedgerResult<()> {
        check_amount(amount)?;
        if self.hold < amount {
            return Err(LedgerError::InsufficientHold {
                account: self.id,
                requested: amount,
                hold: self.hold,
            });
        }
        Ok(())
    }
}

fn check_amount(amount: Decimal) -> LedgerResult<()> {
    if amount < Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn create_test_account() -> Account {
        Account::new(AccountId::new(1), Currency::ars(), dec!(1000))
    }

    #[test]
    fn test_reserve_commit() {
        let mut account = create_test_account();
        account.reserve(dec!(400)).unwrap();
        assert_eq!(account.available(), dec!(600));
        assert_eq!(account.balance, dec!(1000));

        account.commit(dec!(400)).unwrap();
        assert_eq!(account.balance, dec!(600));
        assert_eq!(account.hold, Decimal::ZERO);
    }

    #[test]
    fn test_reserve_rollback() {
        let mut account = create_test_account();
        account.reserve(dec!(400)).unwrap();
        account.rollback(dec!(400)).unwrap();
        assert_eq!(account.balance, dec!(1000));
        assert_eq!(account.hold, Decimal::ZERO);
    }

    #[test]
    fn test_reserve_refused_without_mutation() {
        let mut account = create_test_account();
        account.reserve(dec!(800)).unwrap();
        let err = account.reserve(dec!(300)).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { available, .. } if available == dec!(200)));
        assert_eq!(account.hold, dec!(800));
    }

    #[test]
    fn test_commit_requires_hold() {
        let mut account = create_test_account();
        account.reserve(dec!(100)).unwrap();
        assert!(matches!(
            account.commit(dec!(150)),
            Err(LedgerError::InsufficientHold { .. })
        ));
        assert!(matches!(
            account.rollback(dec!(150)),
            Err(LedgerError::InsufficientHold { .. })
        ));
        assert_eq!(account.balance, dec!(1000));
        assert_eq!(account.hold, dec!(100));
    }

    #[test]
    fn test_fractional_amounts_accepted() {
        let mut account = create_test_account();
        account.reserve(dec!(0.0008364)).unwrap();
        account.commit(dec!(0.0008364)).unwrap();
        assert_eq!(account.balance, dec!(999.9991636));
    }

    #[test]
    fn test_negative_amounts_rejected() {
        let mut account = create_test_account();
        assert!(matches!(
            account.credit(dec!(-5)),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            account.reserve(dec!(-5)),
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_overflowing_credit_refused_without_mutation() {
        let mut account = create_test_account();
        account.set_balance(dec!(70000000000000000000000000000)).unwrap();
        assert!(matches!(
            account.credit(dec!(70000000000000000000000000000)),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert_eq!(account.balance, dec!(70000000000000000000000000000));
    }

    #[test]
    fn test_set_balance_respects_hold() {
        let mut account = create_test_account();
        account.reserve(dec!(300)).unwrap();
        assert!(account.set_balance(dec!(200)).is_err());
        account.set_balance(dec!(300)).unwrap();
        assert_eq!(account.available(), Decimal::ZERO);
    }

    fn funds_op() -> impl Strategy<Value = FundsOp> {
        prop_oneof![
            Just(FundsOp::Reserve),
            Just(FundsOp::Commit),
            Just(FundsOp::Rollback),
            Just(FundsOp::Credit),
            Just(FundsOp::SetBalance),
        ]
    }

    proptest! {
        #[test]
        fn prop_invariant_survives_any_sequence(
            ops in proptest::collection::vec((funds_op(), -1_000i64..5_000), 1..64)
        ) {
            let mut account = create_test_account();
            for (op, cents) in ops {
                let before = account.clone();
                let amount = Decimal::new(cents, 2);
                if account.apply(op, amount).is_err() {
                    prop_assert_eq!(&account, &before);
                }
                prop_assert!(account.is_consistent());
            }
        }
    }
}
