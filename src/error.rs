use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;

use crate::schemas::{DebtStatus, UserId};

pub type Result<T> = std::result::Result<T, Error>;

/// Rejections raised by the pure core before anything is persisted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidInput {
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    #[error("amount {amount} has more than {scale} decimal places")]
    ExcessPrecision { amount: Decimal, scale: u32 },

    #[error("an expense needs at least one participant")]
    NoParticipants,

    #[error("payer {0} must take part in a group expense")]
    PayerNotParticipant(UserId),

    #[error("personal expense can only involve its payer, found {0}")]
    ForeignParticipant(UserId),

    #[error("{0} is not a member of this group")]
    NotGroupMember(UserId),

    #[error("{0} cannot owe money to themselves")]
    SelfDebt(UserId),

    #[error("debt cannot move from {from} to {to}")]
    InvalidTransition { from: DebtStatus, to: DebtStatus },

    #[error("group name cannot be empty")]
    EmptyGroupName,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] InvalidInput),

    #[error("{collection} {id} not found")]
    NotFound { collection: &'static str, id: String },

    #[error("{collection} {id} already exists")]
    Conflict { collection: &'static str, id: String },

    #[error("Unauthorized access")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl Error {
    pub fn not_found(collection: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            collection,
            id: id.into(),
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::NotFound { .. } => "not_found",
            Error::Conflict { .. } => "conflict",
            Error::Unauthorized => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::Store(_) => "store",
        }
    }
}

impl From<mongodb::error::Error> for Error {
    fn from(err: mongodb::error::Error) -> Self {
        Error::Store(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Store(err.to_string())
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": self.to_string(),
                "type": self.error_type()
            }
        }))
    }
}
