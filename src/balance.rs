use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::schemas::{Debt, UserId};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub receivable: Decimal,
    pub payable: Decimal,
}

impl Balance {
    /// Positive when the user is owed money overall.
    pub fn net(&self) -> Decimal {
        self.receivable - self.payable
    }

    pub fn is_settled(&self) -> bool {
        self.receivable.is_zero() && self.payable.is_zero()
    }
}

pub type Balances = BTreeMap<UserId, Balance>;

/// Receivable and payable totals per user over pending debts.
///
/// Every user named by any debt gets an entry, even when all their debts are
/// settled or cancelled.
pub fn aggregate_balances<'a>(debts: impl IntoIterator<Item = &'a Debt>) -> Balances {
    aggregate_balances_for(std::iter::empty::<UserId>(), debts)
}

/// Like [`aggregate_balances`], with `users` seeded at zero.
pub fn aggregate_balances_for<'a>(
    users: impl IntoIterator<Item = UserId>,
    debts: impl IntoIterator<Item = &'a Debt>,
) -> Balances {
    let mut balances: Balances = users
        .into_iter()
        .map(|user| (user, Balance::default()))
        .collect();

    for debt in debts {
        let (receivable, payable) = if debt.is_pending() {
            (debt.amount(), debt.amount())
        } else {
            (Decimal::ZERO, Decimal::ZERO)
        };
        balances.entry(debt.to().to_string()).or_default().receivable += receivable;
        balances.entry(debt.from().to_string()).or_default().payable += payable;
    }
    balances
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct UserPair {
    pub user1: UserId,
    pub user2: UserId,
}

/// Pending debts netted per pair of users.
///
/// The value is what `user2` owes `user1`; a negative value means `user1`
/// owes `user2`. Pairs that cancel out exactly are dropped.
pub fn pairwise_balances<'a>(
    debts: impl IntoIterator<Item = &'a Debt>,
) -> BTreeMap<UserPair, Decimal> {
    let mut balances_between_people: BTreeMap<UserPair, Decimal> = BTreeMap::new();

    for debt in debts.into_iter().filter(|debt| debt.is_pending()) {
        let mut amount = debt.amount();
        // Alphabetical order keeps both directions of a pair under one key
        let pair = if debt.to() < debt.from() {
            UserPair {
                user1: debt.to().to_string(),
                user2: debt.from().to_string(),
            }
        } else {
            amount = -amount;
            UserPair {
                user1: debt.from().to_string(),
                user2: debt.to().to_string(),
            }
        };
        *balances_between_people.entry(pair).or_default() += amount;
    }

    balances_between_people.retain(|_, balance| !balance.is_zero());
    balances_between_people
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::DebtOrigin;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn debt(expense: &str, from: &str, to: &str, amount: Decimal) -> Debt {
        let origin = DebtOrigin {
            expense_id: expense.to_string(),
            group_id: "g-1".to_string(),
            created_at: Utc::now(),
        };
        Debt::new(origin, from.to_string(), to.to_string(), amount).unwrap()
    }

    #[test]
    fn empty_input_gives_empty_balances() {
        assert!(aggregate_balances(std::iter::empty()).is_empty());
    }

    #[test]
    fn seeded_users_start_at_zero() {
        let users = vec!["A".to_string(), "B".to_string()];
        let balances = aggregate_balances_for(users, std::iter::empty());
        assert_eq!(balances.len(), 2);
        assert!(balances.values().all(Balance::is_settled));
    }

    #[test]
    fn payer_receives_from_each_participant() {
        let debts = vec![debt("e", "B", "A", dec!(100)), debt("e", "C", "A", dec!(100))];
        let balances = aggregate_balances(&debts);
        assert_eq!(balances["A"].receivable, dec!(200));
        assert_eq!(balances["A"].payable, dec!(0));
        assert_eq!(balances["B"].payable, dec!(100));
        assert_eq!(balances["C"].net(), dec!(-100));
    }

    #[test]
    fn closed_debts_count_for_nothing_but_keep_their_users() {
        let mut settled = debt("e1", "B", "A", dec!(40));
        settled.settle(Utc::now()).unwrap();
        let mut cancelled = debt("e2", "C", "A", dec!(15));
        cancelled.cancel(Utc::now()).unwrap();
        let pending = debt("e3", "A", "B", dec!(5));

        let balances = aggregate_balances(&[settled, cancelled, pending]);
        assert_eq!(balances["A"], Balance { receivable: dec!(0), payable: dec!(5) });
        assert_eq!(balances["B"], Balance { receivable: dec!(5), payable: dec!(0) });
        assert!(balances["C"].is_settled());
    }

    #[test]
    fn opposite_debts_net_per_pair() {
        let debts = vec![
            debt("e1", "B", "A", dec!(30)),
            debt("e2", "A", "B", dec!(10)),
            debt("e3", "C", "A", dec!(5)),
            debt("e4", "A", "C", dec!(5)),
        ];
        let pairs = pairwise_balances(&debts);
        assert_eq!(pairs.len(), 1);
        let pair = UserPair {
            user1: "A".to_string(),
            user2: "B".to_string(),
        };
        assert_eq!(pairs[&pair], dec!(20));
    }

    #[test]
    fn pair_direction_is_signed() {
        let pairs = pairwise_balances(&[debt("e1", "A", "B", dec!(7))]);
        let pair = UserPair {
            user1: "A".to_string(),
            user2: "B".to_string(),
        };
        assert_eq!(pairs[&pair], dec!(-7));
    }
}
