use crate::config::AuthConfig;
use crate::error::Error;
use crate::schemas::UserId;
use actix_web::{dev::Payload, http::header::HeaderMap, web, FromRequest, HttpRequest};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::{ready, Ready};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq)]
pub enum AuthorizationLevel {
    /// Trusted backend caller holding the service token.
    Service,
    /// A signed-in user.
    User(UserId),
}

impl AuthorizationLevel {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            AuthorizationLevel::Service => None,
            AuthorizationLevel::User(id) => Some(id),
        }
    }

    /// The caller's own id; the service token does not stand for a user.
    pub fn require_user(&self) -> Result<&str, Error> {
        self.user_id().ok_or_else(|| {
            Error::Forbidden("this action needs a signed-in user".to_string())
        })
    }
}

/// Session token handed out by the sign-in gateway after the provider
/// exchange. `hash` signs every other present field.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SessionToken {
    pub uid: UserId,
    pub issued_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub hash: String,
}

impl SessionToken {
    /// Builds a token for `uid` signed with `secret`.
    pub fn sign(
        uid: impl Into<UserId>,
        issued_at: i64,
        display_name: Option<String>,
        email: Option<String>,
        secret: &str,
    ) -> Self {
        let mut token = SessionToken {
            uid: uid.into(),
            issued_at,
            display_name,
            email,
            hash: String::new(),
        };
        token.hash = hex::encode(compute_hash(&token, secret));
        token
    }
}

#[derive(Clone, Debug)]
pub struct Authenticator {
    service_token: String,
    session_secret: String,
    max_age_secs: i64,
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Self {
        Authenticator {
            service_token: config.service_token.clone(),
            session_secret: config.session_secret.clone(),
            max_age_secs: config.max_age_secs,
        }
    }

    pub fn check_authorization_level(&self, headers: &HeaderMap) -> Option<AuthorizationLevel> {
        let authorization = headers
            .get(actix_web::http::header::AUTHORIZATION)?
            .to_str()
            .ok()?;
        let authorization = authorization
            .strip_prefix("Bearer ")
            .unwrap_or(authorization)
            .trim();
        if !self.service_token.is_empty() && authorization == self.service_token {
            return Some(AuthorizationLevel::Service);
        }
        let token: SessionToken = serde_json::from_str(authorization).ok()?;
        let hash = hex::decode(&token.hash).ok()?;

        let mut hmac_hasher = session_mac(&self.session_secret);
        hmac_hasher.update(signed_content(&token).as_bytes());
        hmac_hasher.verify_slice(&hash).ok()?;

        let age = Utc::now().timestamp() - token.issued_at;
        if age > self.max_age_secs {
            tracing::debug!(uid = %token.uid, age, "rejecting expired session token");
            return None;
        }
        Some(AuthorizationLevel::User(token.uid))
    }
}

impl FromRequest for AuthorizationLevel {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let level = req
            .app_data::<web::Data<Authenticator>>()
            .and_then(|auth| auth.check_authorization_level(req.headers()))
            .ok_or(Error::Unauthorized);
        ready(level)
    }
}

fn signed_content(token: &SessionToken) -> String {
    let issued_at = token.issued_at.to_string();
    let hash_content = vec![
        ("display_name", token.display_name.as_deref()),
        ("email", token.email.as_deref()),
        ("issued_at", Some(issued_at.as_str())),
        ("uid", Some(token.uid.as_str())),
    ]
    .into_iter()
    .filter_map(|pair| pair.1.map(|val| format!("{}={}", pair.0, val)))
    .collect::<Vec<_>>();
    hash_content.join("\n")
}

fn session_mac(secret: &str) -> HmacSha256 {
    let mut sha256_hasher = Sha256::new();
    sha256_hasher.update(secret.as_bytes());
    let secret_hash = sha256_hasher.finalize();
    // A SHA-256 digest is always a valid HMAC key length
    HmacSha256::new_from_slice(&secret_hash).expect("HMAC accepts any key length")
}

fn compute_hash(token: &SessionToken, secret: &str) -> Vec<u8> {
    let mut hmac_hasher = session_mac(secret);
    hmac_hasher.update(signed_content(token).as_bytes());
    hmac_hasher.finalize().into_bytes().to_vec()
}
