use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::error::InvalidInput;

pub type UserId = String;
pub type GroupId = String;
pub type ExpenseId = String;
pub type DebtId = String;

/// A document stored in its own collection and keyed by `id`.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + Unpin + 'static {
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
}

pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

impl Entity for User {
    const COLLECTION: &'static str = "users";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub owner: UserId,
    pub members: BTreeSet<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Group {
    /// The owner is always added to `members`.
    pub fn new(
        name: String,
        owner: UserId,
        members: impl IntoIterator<Item = UserId>,
    ) -> Result<Self, InvalidInput> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(InvalidInput::EmptyGroupName);
        }
        let mut members: BTreeSet<UserId> = members.into_iter().collect();
        members.insert(owner.clone());
        Ok(Group {
            id: generate_id(),
            name,
            owner,
            members,
            created_at: Utc::now(),
        })
    }

    pub fn is_member(&self, user: &str) -> bool {
        self.members.contains(user)
    }
}

impl Entity for Group {
    const COLLECTION: &'static str = "groups";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Food,
    Transport,
    Housing,
    Entertainment,
    Shopping,
    Utilities,
    Travel,
    #[default]
    Other,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub amount: Decimal,
    pub payer: UserId,
    pub participants: BTreeSet<UserId>,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub note: String,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// `None` marks a personal expense.
    #[serde(default)]
    pub group_id: Option<GroupId>,
}

impl Expense {
    pub fn is_personal(&self) -> bool {
        self.group_id.is_none()
    }

    /// Checks the invariants that do not depend on the owning group.
    pub fn validate(&self) -> Result<(), InvalidInput> {
        if self.amount <= Decimal::ZERO {
            return Err(InvalidInput::NonPositiveAmount(self.amount));
        }
        if self.participants.is_empty() {
            return Err(InvalidInput::NoParticipants);
        }
        if self.is_personal() {
            if let Some(other) = self.participants.iter().find(|p| **p != self.payer) {
                return Err(InvalidInput::ForeignParticipant(other.clone()));
            }
        } else if !self.participants.contains(&self.payer) {
            return Err(InvalidInput::PayerNotParticipant(self.payer.clone()));
        }
        Ok(())
    }

    /// Checks that the payer and all participants belong to `group`.
    pub fn validate_against(&self, group: &Group) -> Result<(), InvalidInput> {
        std::iter::once(&self.payer)
            .chain(self.participants.iter())
            .find(|user| !group.is_member(user))
            .map_or(Ok(()), |user| Err(InvalidInput::NotGroupMember(user.clone())))
    }
}

impl Entity for Expense {
    const COLLECTION: &'static str = "expenses";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DebtStatus {
    Pending,
    Settled,
    Cancelled,
}

impl DebtStatus {
    /// Only `pending` may move, and only to one of the terminal states.
    pub fn transition(self, next: DebtStatus) -> Result<DebtStatus, InvalidInput> {
        match (self, next) {
            (DebtStatus::Pending, DebtStatus::Settled)
            | (DebtStatus::Pending, DebtStatus::Cancelled) => Ok(next),
            (from, to) => Err(InvalidInput::InvalidTransition { from, to }),
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, DebtStatus::Pending)
    }

    /// The stored form, as serde writes it.
    pub fn as_str(self) -> &'static str {
        match self {
            DebtStatus::Pending => "pending",
            DebtStatus::Settled => "settled",
            DebtStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for DebtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a debt came from.
#[derive(Clone, Debug, PartialEq)]
pub struct DebtOrigin {
    pub expense_id: ExpenseId,
    pub group_id: GroupId,
    pub created_at: DateTime<Utc>,
}

impl DebtOrigin {
    pub fn of(expense: &Expense) -> Self {
        DebtOrigin {
            expense_id: expense.id.clone(),
            group_id: expense.group_id.clone().unwrap_or_default(),
            created_at: expense.created_at,
        }
    }
}

/// `from` owes `amount` to `to`. The amount is fixed at creation; only the
/// status moves afterwards.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Debt {
    id: DebtId,
    expense_id: ExpenseId,
    group_id: GroupId,
    from: UserId,
    to: UserId,
    amount: Decimal,
    status: DebtStatus,
    created_at: DateTime<Utc>,
    #[serde(default)]
    closed_at: Option<DateTime<Utc>>,
}

impl Debt {
    pub fn new(
        origin: DebtOrigin,
        from: UserId,
        to: UserId,
        amount: Decimal,
    ) -> Result<Self, InvalidInput> {
        if from == to {
            return Err(InvalidInput::SelfDebt(from));
        }
        if amount <= Decimal::ZERO {
            return Err(InvalidInput::NonPositiveAmount(amount));
        }
        Ok(Debt {
            id: format!("{}:{}", origin.expense_id, from),
            expense_id: origin.expense_id,
            group_id: origin.group_id,
            from,
            to,
            amount,
            status: DebtStatus::Pending,
            created_at: origin.created_at,
            closed_at: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn expense_id(&self) -> &str {
        &self.expense_id
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn status(&self) -> DebtStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn is_pending(&self) -> bool {
        self.status == DebtStatus::Pending
    }

    pub fn involves(&self, user: &str) -> bool {
        self.from == user || self.to == user
    }

    pub fn settle(&mut self, at: DateTime<Utc>) -> Result<(), InvalidInput> {
        self.close(DebtStatus::Settled, at)
    }

    pub fn cancel(&mut self, at: DateTime<Utc>) -> Result<(), InvalidInput> {
        self.close(DebtStatus::Cancelled, at)
    }

    fn close(&mut self, next: DebtStatus, at: DateTime<Utc>) -> Result<(), InvalidInput> {
        self.status = self.status.transition(next)?;
        self.closed_at = Some(at);
        Ok(())
    }
}

impl Entity for Debt {
    const COLLECTION: &'static str = "debts";

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn origin() -> DebtOrigin {
        DebtOrigin {
            expense_id: "e-1".to_string(),
            group_id: "g-1".to_string(),
            created_at: Utc::now(),
        }
    }

    fn expense(payer: &str, participants: &[&str], group: Option<&str>) -> Expense {
        Expense {
            id: "e-1".to_string(),
            amount: dec!(12.50),
            payer: payer.to_string(),
            participants: participants.iter().map(|p| p.to_string()).collect(),
            category: Category::Food,
            note: String::new(),
            occurred_at: Utc::now(),
            created_at: Utc::now(),
            group_id: group.map(str::to_string),
        }
    }

    #[test]
    fn group_owner_is_always_a_member() {
        let group = Group::new("Flat".to_string(), "alice".to_string(), vec![]).unwrap();
        assert!(group.is_member("alice"));
        assert_eq!(group.members.len(), 1);
    }

    #[test]
    fn group_name_is_required() {
        let err = Group::new("   ".to_string(), "alice".to_string(), vec![]).unwrap_err();
        assert_eq!(err, InvalidInput::EmptyGroupName);
    }

    #[test]
    fn pending_debt_can_settle_once() {
        let mut debt = Debt::new(origin(), "bob".into(), "alice".into(), dec!(10)).unwrap();
        debt.settle(Utc::now()).unwrap();
        assert_eq!(debt.status(), DebtStatus::Settled);
        assert!(debt.closed_at().is_some());

        let err = debt.settle(Utc::now()).unwrap_err();
        assert_eq!(
            err,
            InvalidInput::InvalidTransition {
                from: DebtStatus::Settled,
                to: DebtStatus::Settled
            }
        );
    }

    #[test]
    fn terminal_states_reject_every_transition() {
        for terminal in [DebtStatus::Settled, DebtStatus::Cancelled] {
            for next in [DebtStatus::Pending, DebtStatus::Settled, DebtStatus::Cancelled] {
                assert!(terminal.transition(next).is_err());
            }
        }
        assert!(DebtStatus::Pending.transition(DebtStatus::Pending).is_err());
    }

    #[test]
    fn cancelled_debt_cannot_be_settled() {
        let mut debt = Debt::new(origin(), "bob".into(), "alice".into(), dec!(10)).unwrap();
        debt.cancel(Utc::now()).unwrap();
        assert!(debt.settle(Utc::now()).is_err());
        assert_eq!(debt.status(), DebtStatus::Cancelled);
    }

    #[test]
    fn debt_rejects_self_and_non_positive_amounts() {
        assert_eq!(
            Debt::new(origin(), "bob".into(), "bob".into(), dec!(1)).unwrap_err(),
            InvalidInput::SelfDebt("bob".into())
        );
        assert_eq!(
            Debt::new(origin(), "bob".into(), "alice".into(), dec!(0)).unwrap_err(),
            InvalidInput::NonPositiveAmount(dec!(0))
        );
    }

    #[test]
    fn debt_id_is_derived_from_expense_and_debtor() {
        let debt = Debt::new(origin(), "bob".into(), "alice".into(), dec!(1)).unwrap();
        assert_eq!(debt.id(), "e-1:bob");
    }

    #[test]
    fn group_expense_requires_payer_participation() {
        let err = expense("alice", &["bob"], Some("g-1")).validate().unwrap_err();
        assert_eq!(err, InvalidInput::PayerNotParticipant("alice".into()));
        assert!(expense("alice", &["alice", "bob"], Some("g-1")).validate().is_ok());
    }

    #[test]
    fn personal_expense_only_involves_payer() {
        let err = expense("alice", &["alice", "bob"], None).validate().unwrap_err();
        assert_eq!(err, InvalidInput::ForeignParticipant("bob".into()));
        assert!(expense("alice", &["alice"], None).validate().is_ok());
    }

    #[test]
    fn group_expense_participants_must_be_members() {
        let group = Group::new(
            "Trip".to_string(),
            "alice".to_string(),
            vec!["bob".to_string()],
        )
        .unwrap();
        let err = expense("alice", &["alice", "carol"], Some("g-1"))
            .validate_against(&group)
            .unwrap_err();
        assert_eq!(err, InvalidInput::NotGroupMember("carol".into()));
    }

    #[test]
    fn debt_round_trips_through_json_with_lowercase_status() {
        let debt = Debt::new(origin(), "bob".into(), "alice".into(), dec!(3.33)).unwrap();
        let value = serde_json::to_value(&debt).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["from"], "bob");
        let back: Debt = serde_json::from_value(value).unwrap();
        assert_eq!(back, debt);
    }
}
