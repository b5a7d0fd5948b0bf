use std::collections::BTreeSet;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::InvalidInput;
use crate::schemas::{Debt, DebtOrigin, Expense, UserId};

/// How amounts are quantized when split between participants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SplitPolicy {
    /// Decimal places of the smallest currency unit (2 for cents).
    pub scale: u32,
}

impl Default for SplitPolicy {
    fn default() -> Self {
        SplitPolicy { scale: 2 }
    }
}

impl SplitPolicy {
    pub fn minor_unit(&self) -> Decimal {
        Decimal::new(1, self.scale)
    }
}

/// Splits `amount` into one share per participant.
///
/// Each share is `amount / n` truncated to the minor unit. The leftover units
/// go one each to participants in ascending id order, so every share is
/// within one unit of the exact quotient and the shares add up to `amount`.
pub fn split_evenly(
    amount: Decimal,
    participants: &BTreeSet<UserId>,
    policy: SplitPolicy,
) -> Result<Vec<(UserId, Decimal)>, InvalidInput> {
    if amount <= Decimal::ZERO {
        return Err(InvalidInput::NonPositiveAmount(amount));
    }
    if participants.is_empty() {
        return Err(InvalidInput::NoParticipants);
    }
    if amount.round_dp(policy.scale) != amount {
        return Err(InvalidInput::ExcessPrecision {
            amount,
            scale: policy.scale,
        });
    }

    let unit = policy.minor_unit();
    let count = Decimal::from(participants.len());
    let base = (amount / count).round_dp_with_strategy(policy.scale, RoundingStrategy::ToZero);
    let mut leftover = amount - base * count;

    let shares = participants
        .iter()
        .map(|participant| {
            let mut share = base;
            if leftover >= unit {
                share += unit;
                leftover -= unit;
            }
            (participant.clone(), share)
        })
        .collect();
    Ok(shares)
}

/// Debts owed to the payer by every other participant of `expense`.
///
/// The payer does not need to be in the participant set; when it is, its own
/// share produces no debt. Shares that truncate to zero produce no debt either.
pub fn derive_debts(expense: &Expense, policy: SplitPolicy) -> Result<Vec<Debt>, InvalidInput> {
    let shares = split_evenly(expense.amount, &expense.participants, policy)?;
    let origin = DebtOrigin::of(expense);

    shares
        .into_iter()
        .filter(|(participant, share)| *participant != expense.payer && *share > Decimal::ZERO)
        .map(|(participant, share)| {
            Debt::new(origin.clone(), participant, expense.payer.clone(), share)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{Category, DebtStatus};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn members(ids: &[&str]) -> BTreeSet<UserId> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn expense(amount: Decimal, payer: &str, participants: &[&str]) -> Expense {
        Expense {
            id: "dinner".to_string(),
            amount,
            payer: payer.to_string(),
            participants: members(participants),
            category: Category::Food,
            note: String::new(),
            occurred_at: Utc::now(),
            created_at: Utc::now(),
            group_id: Some("g-1".to_string()),
        }
    }

    #[test]
    fn three_way_split_owes_the_payer() {
        let dinner = expense(dec!(300), "A", &["A", "B", "C"]);
        let debts = derive_debts(&dinner, SplitPolicy::default()).unwrap();
        let summary: Vec<_> = debts
            .iter()
            .map(|d| (d.from(), d.to(), d.amount(), d.status()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("B", "A", dec!(100), DebtStatus::Pending),
                ("C", "A", dec!(100), DebtStatus::Pending),
            ]
        );
    }

    #[test]
    fn payer_alone_produces_no_debts() {
        let debts =
            derive_debts(&expense(dec!(42), "A", &["A"]), SplitPolicy::default()).unwrap();
        assert!(debts.is_empty());
    }

    #[test]
    fn payer_outside_participants_is_owed_every_share() {
        let debts =
            derive_debts(&expense(dec!(10), "A", &["B", "C"]), SplitPolicy::default()).unwrap();
        assert_eq!(debts.len(), 2);
        assert!(debts.iter().all(|d| d.amount() == dec!(5) && d.to() == "A"));
    }

    #[test]
    fn leftover_cents_go_to_lowest_ids() {
        let shares = split_evenly(dec!(100), &members(&["a", "b", "c"]), SplitPolicy::default())
            .unwrap();
        assert_eq!(
            shares,
            vec![
                ("a".to_string(), dec!(33.34)),
                ("b".to_string(), dec!(33.33)),
                ("c".to_string(), dec!(33.33)),
            ]
        );
    }

    #[test]
    fn shares_add_up_to_the_amount() {
        let shares = split_evenly(
            dec!(0.05),
            &members(&["a", "b", "c", "d", "e", "f", "g"]),
            SplitPolicy::default(),
        )
        .unwrap();
        let total: Decimal = shares.iter().map(|(_, share)| *share).sum();
        assert_eq!(total, dec!(0.05));
    }

    #[test]
    fn zero_shares_are_not_turned_into_debts() {
        let penny = expense(dec!(0.01), "b", &["a", "b", "c"]);
        let debts = derive_debts(&penny, SplitPolicy::default()).unwrap();
        // "a" takes the only cent; "c" owes nothing.
        assert_eq!(debts.len(), 1);
        assert_eq!(debts[0].from(), "a");
    }

    #[test]
    fn whole_unit_currency_splits_without_decimals() {
        let policy = SplitPolicy { scale: 0 };
        let shares = split_evenly(dec!(1000), &members(&["a", "b", "c"]), policy).unwrap();
        let amounts: Vec<_> = shares.into_iter().map(|(_, share)| share).collect();
        assert_eq!(amounts, vec![dec!(334), dec!(333), dec!(333)]);
    }

    #[test]
    fn rejects_zero_and_negative_amounts() {
        for amount in [dec!(0), dec!(-5)] {
            let err = derive_debts(&expense(amount, "A", &["A", "B"]), SplitPolicy::default())
                .unwrap_err();
            assert_eq!(err, InvalidInput::NonPositiveAmount(amount));
        }
    }

    #[test]
    fn rejects_empty_participants() {
        let err = derive_debts(&expense(dec!(10), "A", &[]), SplitPolicy::default()).unwrap_err();
        assert_eq!(err, InvalidInput::NoParticipants);
    }

    #[test]
    fn rejects_sub_cent_amounts() {
        let err = split_evenly(dec!(1.005), &members(&["a"]), SplitPolicy::default()).unwrap_err();
        assert_eq!(
            err,
            InvalidInput::ExcessPrecision {
                amount: dec!(1.005),
                scale: 2
            }
        );
    }
}
