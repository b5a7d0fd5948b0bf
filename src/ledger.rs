//! Commands and queries over the stored ledger.
//!
//! Nothing here keeps a "current list" around: every query loads what it needs
//! from the repositories and derives views with the pure functions in
//! [`crate::split`], [`crate::balance`] and [`crate::exchange`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mongodb::Database;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::AuthorizationLevel;
use crate::balance::{aggregate_balances, aggregate_balances_for, Balance, Balances};
use crate::error::{Error, InvalidInput, Result};
use crate::exchange::{suggest_exchanges, Exchange};
use crate::mongo::MongoRepository;
use crate::repository::{InMemoryRepository, SharedRepository};
use crate::retry::{read_with_fallback, RetryPolicy};
use crate::schemas::{generate_id, Category, Debt, DebtStatus, Expense, Group, User, UserId};
use crate::split::{derive_debts, SplitPolicy};

/// One repository per collection.
#[derive(Clone)]
pub struct Stores {
    pub users: SharedRepository<User>,
    pub groups: SharedRepository<Group>,
    pub expenses: SharedRepository<Expense>,
    pub debts: SharedRepository<Debt>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Stores {
            users: Arc::new(InMemoryRepository::new()),
            groups: Arc::new(InMemoryRepository::new()),
            expenses: Arc::new(InMemoryRepository::new()),
            debts: Arc::new(InMemoryRepository::new()),
        }
    }

    pub async fn mongo(database: &Database) -> Result<Self> {
        let users = MongoRepository::<User>::new(database);
        let groups = MongoRepository::<Group>::new(database);
        let expenses = MongoRepository::<Expense>::new(database);
        let debts = MongoRepository::<Debt>::new(database);
        users.ensure_indexes().await?;
        groups.ensure_indexes().await?;
        expenses.ensure_indexes().await?;
        debts.ensure_indexes().await?;
        Ok(Stores {
            users: Arc::new(users),
            groups: Arc::new(groups),
            expenses: Arc::new(expenses),
            debts: Arc::new(debts),
        })
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UserProfile {
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NewGroup {
    pub name: String,
    #[serde(default)]
    pub members: Vec<UserId>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NewExpense {
    pub amount: Decimal,
    /// Defaults to the caller.
    #[serde(default)]
    pub payer: Option<UserId>,
    #[serde(default)]
    pub participants: BTreeSet<UserId>,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecordedExpense {
    pub expense: Expense,
    pub debts: Vec<Debt>,
}

pub struct Ledger {
    stores: Stores,
    split: SplitPolicy,
    retry: RetryPolicy,
}

fn ensure_member(caller: &AuthorizationLevel, group: &Group) -> Result<()> {
    match caller.user_id() {
        Some(user) if !group.is_member(user) => Err(Error::Forbidden(format!(
            "{} is not a member of group {}",
            user, group.id
        ))),
        _ => Ok(()),
    }
}

impl Ledger {
    pub fn new(stores: Stores, split: SplitPolicy, retry: RetryPolicy) -> Self {
        Ledger {
            stores,
            split,
            retry,
        }
    }

    pub async fn upsert_user(
        &self,
        caller: &AuthorizationLevel,
        profile: UserProfile,
    ) -> Result<User> {
        let user = User {
            id: caller.require_user()?.to_string(),
            display_name: profile.display_name,
            email: profile.email,
            photo_url: profile.photo_url,
        };
        self.stores.users.upsert(&user).await?;
        debug!(user = %user.id, "profile stored");
        Ok(user)
    }

    pub async fn get_user(&self, id: &str) -> Result<User> {
        self.stores.users.fetch(id).await
    }

    pub async fn create_group(&self, caller: &AuthorizationLevel, new: NewGroup) -> Result<Group> {
        let owner = caller.require_user()?.to_string();
        let group = Group::new(new.name, owner, new.members)?;
        self.stores.groups.insert(&group).await?;
        info!(
            group = %group.id,
            owner = %group.owner,
            members = group.members.len(),
            "group created"
        );

        let groups = self.stores.groups.clone();
        let id = group.id.clone();
        let stored = read_with_fallback(self.retry, "group", group, || {
            let groups = groups.clone();
            let id = id.clone();
            async move { groups.get(&id).await }
        })
        .await;
        Ok(stored)
    }

    pub async fn get_group(&self, caller: &AuthorizationLevel, id: &str) -> Result<Group> {
        let group = self.stores.groups.fetch(id).await?;
        ensure_member(caller, &group)?;
        Ok(group)
    }

    pub async fn groups_for(&self, user: &str) -> Result<Vec<Group>> {
        let mut groups = self.stores.groups.list_by("members", user).await?;
        groups.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(groups)
    }

    /// Adds the caller to the group. Joining twice is a no-op.
    pub async fn join_group(&self, caller: &AuthorizationLevel, id: &str) -> Result<Group> {
        let user = caller.require_user()?;
        if self.stores.groups.add_to_set(id, "members", user).await? {
            info!(group = %id, user = %user, "member joined");
        }
        self.stores.groups.fetch(id).await
    }

    /// Records a group expense (when `group_id` is given) and its debts, or a
    /// personal expense that produces none.
    pub async fn record_expense(
        &self,
        caller: &AuthorizationLevel,
        group_id: Option<&str>,
        new: NewExpense,
    ) -> Result<RecordedExpense> {
        let payer = match new.payer {
            Some(payer) => payer,
            None => caller.require_user()?.to_string(),
        };
        let now = Utc::now();
        let mut expense = Expense {
            id: generate_id(),
            amount: new.amount,
            payer,
            participants: new.participants,
            category: new.category,
            note: new.note,
            occurred_at: new.occurred_at.unwrap_or(now),
            created_at: now,
            group_id: group_id.map(str::to_string),
        };

        let debts = match group_id {
            Some(group_id) => {
                let group = self.stores.groups.fetch(group_id).await?;
                ensure_member(caller, &group)?;
                expense.validate()?;
                expense.validate_against(&group)?;
                derive_debts(&expense, self.split)?
            }
            None => {
                if let Some(user) = caller.user_id() {
                    if user != expense.payer {
                        return Err(Error::Forbidden(
                            "personal expenses belong to the caller".to_string(),
                        ));
                    }
                }
                if expense.participants.is_empty() {
                    expense.participants.insert(expense.payer.clone());
                }
                expense.validate()?;
                Vec::new()
            }
        };

        for (written, debt) in debts.iter().enumerate() {
            if let Err(err) = self.stores.debts.insert(debt).await {
                self.discard_debts(&debts[..written]).await;
                return Err(err);
            }
        }
        if let Err(err) = self.stores.expenses.insert(&expense).await {
            self.discard_debts(&debts).await;
            return Err(err);
        }
        info!(
            expense = %expense.id,
            group = ?expense.group_id,
            amount = %expense.amount,
            debts = debts.len(),
            "expense recorded"
        );

        if debts.is_empty() {
            return Ok(RecordedExpense { expense, debts });
        }

        let repo = self.stores.debts.clone();
        let expense_id = expense.id.clone();
        let expected = debts.len();
        let debts = read_with_fallback(self.retry, "debts", debts, || {
            let repo = repo.clone();
            let expense_id = expense_id.clone();
            async move {
                let stored = repo.list_by("expense_id", &expense_id).await?;
                Ok::<_, Error>((stored.len() == expected).then_some(stored))
            }
        })
        .await;
        Ok(RecordedExpense { expense, debts })
    }

    /// Removes debts written for an expense that failed to record.
    async fn discard_debts(&self, debts: &[Debt]) {
        for debt in debts {
            if let Err(err) = self.stores.debts.delete(debt.id()).await {
                warn!(debt = %debt.id(), error = %err, "orphaned debt left behind");
            }
        }
    }

    /// Voids an expense: its pending debts are cancelled and kept as history,
    /// then the expense itself is removed. Returns the debts cancelled.
    pub async fn delete_expense(
        &self,
        caller: &AuthorizationLevel,
        id: &str,
    ) -> Result<Vec<Debt>> {
        let expense = self.stores.expenses.fetch(id).await?;
        if let Some(user) = caller.user_id() {
            let owns_group = match &expense.group_id {
                Some(group_id) => self
                    .stores
                    .groups
                    .get(group_id)
                    .await?
                    .is_some_and(|group| group.owner == user),
                None => false,
            };
            if expense.payer != user && !owns_group {
                return Err(Error::Forbidden(format!(
                    "{} cannot delete expense {}",
                    user, expense.id
                )));
            }
        }

        let now = Utc::now();
        let mut cancelled = Vec::new();
        for mut debt in self.stores.debts.list_by("expense_id", id).await? {
            if !debt.is_pending() {
                continue;
            }
            debt.cancel(now)?;
            let pending = DebtStatus::Pending.as_str();
            if self.stores.debts.replace_if(&debt, "status", pending).await? {
                cancelled.push(debt);
            } else {
                debug!(debt = %debt.id(), "closed concurrently, left as is");
            }
        }
        self.stores.expenses.delete(id).await?;
        info!(expense = %id, cancelled = cancelled.len(), "expense deleted");
        Ok(cancelled)
    }

    pub async fn group_expenses(
        &self,
        caller: &AuthorizationLevel,
        group_id: &str,
    ) -> Result<Vec<Expense>> {
        self.get_group(caller, group_id).await?;
        let mut expenses = self.stores.expenses.list_by("group_id", group_id).await?;
        expenses.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        Ok(expenses)
    }

    pub async fn personal_expenses(&self, user: &str) -> Result<Vec<Expense>> {
        let mut expenses: Vec<Expense> = self
            .stores
            .expenses
            .list_by("payer", user)
            .await?
            .into_iter()
            .filter(Expense::is_personal)
            .collect();
        expenses.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        Ok(expenses)
    }

    /// Every debt of the group, whatever its status, oldest first.
    pub async fn group_debts(
        &self,
        caller: &AuthorizationLevel,
        group_id: &str,
    ) -> Result<Vec<Debt>> {
        self.get_group(caller, group_id).await?;
        self.load_group_debts(group_id).await
    }

    async fn load_group_debts(&self, group_id: &str) -> Result<Vec<Debt>> {
        let mut debts = self.stores.debts.list_by("group_id", group_id).await?;
        debts.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(debts)
    }

    /// Marks a pending debt as paid. Only the two parties (or the service)
    /// may settle it.
    pub async fn settle_debt(&self, caller: &AuthorizationLevel, id: &str) -> Result<Debt> {
        let mut debt = self.stores.debts.fetch(id).await?;
        if let Some(user) = caller.user_id() {
            if !debt.involves(user) {
                return Err(Error::Forbidden(format!(
                    "{} is not a party to debt {}",
                    user, id
                )));
            }
        }
        if let Err(err) = debt.settle(Utc::now()) {
            warn!(debt = %id, status = %debt.status(), "settlement rejected");
            return Err(err.into());
        }
        let pending = DebtStatus::Pending.as_str();
        if !self.stores.debts.replace_if(&debt, "status", pending).await? {
            let current = self.stores.debts.fetch(id).await?;
            warn!(
                debt = %id,
                status = %current.status(),
                "settlement lost to a concurrent change"
            );
            return Err(InvalidInput::InvalidTransition {
                from: current.status(),
                to: DebtStatus::Settled,
            }
            .into());
        }
        info!(
            debt = %id,
            from = %debt.from(),
            to = %debt.to(),
            amount = %debt.amount(),
            "debt settled"
        );
        Ok(debt)
    }

    /// Balances of every member, including members with nothing pending.
    pub async fn group_balances(
        &self,
        caller: &AuthorizationLevel,
        group_id: &str,
    ) -> Result<Balances> {
        let group = self.get_group(caller, group_id).await?;
        let debts = self.load_group_debts(group_id).await?;
        Ok(aggregate_balances_for(group.members, &debts))
    }

    /// The user's totals across every group.
    pub async fn user_balance(&self, user: &str) -> Result<Balance> {
        let mut debts: BTreeMap<String, Debt> = BTreeMap::new();
        for field in ["from", "to"] {
            for debt in self.stores.debts.list_by(field, user).await? {
                debts.insert(debt.id().to_string(), debt);
            }
        }
        Ok(aggregate_balances(debts.values())
            .remove(user)
            .unwrap_or_default())
    }

    pub async fn suggested_exchanges(
        &self,
        caller: &AuthorizationLevel,
        group_id: &str,
    ) -> Result<Vec<Exchange>> {
        self.get_group(caller, group_id).await?;
        let debts = self.load_group_debts(group_id).await?;
        Ok(suggest_exchanges(&debts))
    }
}
