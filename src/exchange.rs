use crate::balance::{aggregate_balances, pairwise_balances};
use crate::schemas::{Debt, UserId};
use rust_decimal::Decimal;
use serde::Serialize;
use std::mem::swap;

#[derive(Clone, Debug)]
pub struct PersonalBalance {
    pub id: UserId,
    pub balance: Decimal,
}

/// A payment that clears (part of) what `payer` owes `receiver`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Exchange {
    pub payer: UserId,
    pub receiver: UserId,
    pub amount: Decimal,
}

/// One transfer per pair of users, in the direction of their netted debts.
fn get_naive_exchanges<'a>(debts: impl IntoIterator<Item = &'a Debt>) -> Vec<Exchange> {
    pairwise_balances(debts)
        .into_iter()
        .map(|(people_pair, balance)| {
            let mut payer = people_pair.user2;
            let mut receiver = people_pair.user1;
            // negative: user1 is the one who owes
            if balance < Decimal::ZERO {
                swap(&mut payer, &mut receiver);
            }
            Exchange {
                payer,
                receiver,
                amount: balance.abs(),
            }
        })
        .collect()
}

/// Greedy matching of net debtors against net creditors, largest first.
fn get_simplified_exchanges(
    mut payers: Vec<PersonalBalance>,
    mut receivers: Vec<PersonalBalance>,
) -> Vec<Exchange> {
    payers.sort_by(|a, b| a.balance.cmp(&b.balance).then_with(|| b.id.cmp(&a.id)));
    receivers.sort_by(|a, b| a.balance.cmp(&b.balance).then_with(|| b.id.cmp(&a.id)));

    let mut exchanges: Vec<Exchange> = Vec::new();

    while let (Some(receiver), Some(payer)) = (receivers.last_mut(), payers.last_mut()) {
        let mut exchange = Exchange {
            payer: payer.id.clone(),
            receiver: receiver.id.clone(),
            amount: Decimal::ZERO,
        };
        if receiver.balance == payer.balance {
            exchange.amount = payer.balance;
            payers.pop();
            receivers.pop();
        } else if receiver.balance > payer.balance {
            exchange.amount = payer.balance;
            receiver.balance -= payer.balance;
            payers.pop();
        } else {
            exchange.amount = receiver.balance;
            payer.balance -= receiver.balance;
            receivers.pop();
        }
        exchanges.push(exchange);
    }
    exchanges
}

/// Transfers that clear every pending debt in `debts`.
///
/// Both the pairwise-netted plan and a greedy plan over net positions are
/// computed; the shorter one wins, ties going to the pairwise plan.
pub fn suggest_exchanges(debts: &[Debt]) -> Vec<Exchange> {
    let mut payers = Vec::new();
    let mut receivers = Vec::new();

    for (id, balance) in aggregate_balances(debts) {
        let net = balance.net();
        let person = PersonalBalance {
            id,
            balance: net.abs(),
        };
        if net < Decimal::ZERO {
            payers.push(person);
        } else if net > Decimal::ZERO {
            receivers.push(person);
        }
    }

    let naive_exchanges = get_naive_exchanges(debts);
    let simplified_exchanges = get_simplified_exchanges(payers, receivers);

    // greedy matching is not always shorter
    if simplified_exchanges.len() < naive_exchanges.len() {
        simplified_exchanges
    } else {
        naive_exchanges
    }
}
