use actix_web::{delete, get, post, put, web, HttpResponse};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

use crate::auth::AuthorizationLevel;
use crate::balance::Balance;
use crate::error::Error;
use crate::ledger::{Ledger, NewExpense, NewGroup, UserProfile};
use crate::schemas::UserId;

type Response = Result<HttpResponse, Error>;

#[derive(Serialize)]
struct BalanceJson {
    receivable: Decimal,
    payable: Decimal,
    net: Decimal,
}

impl From<Balance> for BalanceJson {
    fn from(balance: Balance) -> Self {
        BalanceJson {
            receivable: balance.receivable,
            payable: balance.payable,
            net: balance.net(),
        }
    }
}

#[get("/health")]
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "fairshare",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[put("/users/me")]
async fn put_me(
    ledger: web::Data<Ledger>,
    caller: AuthorizationLevel,
    profile: web::Json<UserProfile>,
) -> Response {
    let user = ledger.upsert_user(&caller, profile.into_inner()).await?;
    Ok(HttpResponse::Ok().json(user))
}

#[get("/users/me")]
async fn get_me(ledger: web::Data<Ledger>, caller: AuthorizationLevel) -> Response {
    let user = ledger.get_user(caller.require_user()?).await?;
    Ok(HttpResponse::Ok().json(user))
}

#[get("/users/me/balance")]
async fn get_my_balance(ledger: web::Data<Ledger>, caller: AuthorizationLevel) -> Response {
    let balance = ledger.user_balance(caller.require_user()?).await?;
    Ok(HttpResponse::Ok().json(BalanceJson::from(balance)))
}

#[get("/users/me/expenses")]
async fn get_my_expenses(ledger: web::Data<Ledger>, caller: AuthorizationLevel) -> Response {
    let expenses = ledger.personal_expenses(caller.require_user()?).await?;
    Ok(HttpResponse::Ok().json(expenses))
}

#[get("/users/me/groups")]
async fn get_my_groups(ledger: web::Data<Ledger>, caller: AuthorizationLevel) -> Response {
    let groups = ledger.groups_for(caller.require_user()?).await?;
    Ok(HttpResponse::Ok().json(groups))
}

#[get("/users/{id}")]
async fn get_user(
    ledger: web::Data<Ledger>,
    _caller: AuthorizationLevel,
    id: web::Path<String>,
) -> Response {
    let user = ledger.get_user(&id).await?;
    Ok(HttpResponse::Ok().json(user))
}

#[post("/groups")]
async fn add_group(
    ledger: web::Data<Ledger>,
    caller: AuthorizationLevel,
    json: web::Json<NewGroup>,
) -> Response {
    let group = ledger.create_group(&caller, json.into_inner()).await?;
    Ok(HttpResponse::Created().json(group))
}

#[get("/groups/{id}")]
async fn get_group(
    ledger: web::Data<Ledger>,
    caller: AuthorizationLevel,
    id: web::Path<String>,
) -> Response {
    let group = ledger.get_group(&caller, &id).await?;
    Ok(HttpResponse::Ok().json(group))
}

#[post("/groups/{id}/members")]
async fn join_group(
    ledger: web::Data<Ledger>,
    caller: AuthorizationLevel,
    id: web::Path<String>,
) -> Response {
    let group = ledger.join_group(&caller, &id).await?;
    Ok(HttpResponse::Ok().json(group))
}

#[post("/groups/{id}/expenses")]
async fn add_group_expense(
    ledger: web::Data<Ledger>,
    caller: AuthorizationLevel,
    id: web::Path<String>,
    expense: web::Json<NewExpense>,
) -> Response {
    let recorded = ledger
        .record_expense(&caller, Some(id.as_str()), expense.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(recorded))
}

#[get("/groups/{id}/expenses")]
async fn get_group_expenses(
    ledger: web::Data<Ledger>,
    caller: AuthorizationLevel,
    id: web::Path<String>,
) -> Response {
    let expenses = ledger.group_expenses(&caller, &id).await?;
    Ok(HttpResponse::Ok().json(expenses))
}

#[post("/expenses")]
async fn add_personal_expense(
    ledger: web::Data<Ledger>,
    caller: AuthorizationLevel,
    expense: web::Json<NewExpense>,
) -> Response {
    let recorded = ledger
        .record_expense(&caller, None, expense.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(recorded))
}

#[delete("/expenses/{id}")]
async fn delete_expense(
    ledger: web::Data<Ledger>,
    caller: AuthorizationLevel,
    id: web::Path<String>,
) -> Response {
    let cancelled = ledger.delete_expense(&caller, &id).await?;
    Ok(HttpResponse::Ok().json(json!({ "cancelled": cancelled })))
}

#[get("/groups/{id}/debts")]
async fn get_group_debts(
    ledger: web::Data<Ledger>,
    caller: AuthorizationLevel,
    id: web::Path<String>,
) -> Response {
    let debts = ledger.group_debts(&caller, &id).await?;
    Ok(HttpResponse::Ok().json(debts))
}

#[post("/debts/{id}/settle")]
async fn settle_debt(
    ledger: web::Data<Ledger>,
    caller: AuthorizationLevel,
    id: web::Path<String>,
) -> Response {
    let debt = ledger.settle_debt(&caller, &id).await?;
    Ok(HttpResponse::Ok().json(debt))
}

#[get("/groups/{id}/balance")]
async fn get_balance(
    ledger: web::Data<Ledger>,
    caller: AuthorizationLevel,
    id: web::Path<String>,
) -> Response {
    let balances: BTreeMap<UserId, BalanceJson> = ledger
        .group_balances(&caller, &id)
        .await?
        .into_iter()
        .map(|(user, balance)| (user, balance.into()))
        .collect();
    Ok(HttpResponse::Ok().json(balances))
}

#[get("/groups/{id}/exchanges")]
async fn get_exchanges(
    ledger: web::Data<Ledger>,
    caller: AuthorizationLevel,
    id: web::Path<String>,
) -> Response {
    let exchanges = ledger.suggested_exchanges(&caller, &id).await?;
    Ok(HttpResponse::Ok().json(exchanges))
}

/// Registers every route. `/users/me/*` comes before `/users/{id}` so the
/// literal segment wins.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(put_me)
        .service(get_me)
        .service(get_my_balance)
        .service(get_my_expenses)
        .service(get_my_groups)
        .service(get_user)
        .service(add_group)
        .service(get_group)
        .service(join_group)
        .service(add_group_expense)
        .service(get_group_expenses)
        .service(add_personal_expense)
        .service(delete_expense)
        .service(get_group_debts)
        .service(settle_debt)
        .service(get_balance)
        .service(get_exchanges);
}
