// ============================
// livecollab-backend-lib/src/auth/verifier.rs
// ============================
//! Token verification and identity resolution.
//!
//! The credential store is an external collaborator: this module only
//! defines the narrow seams the admission gate calls through, plus the
//! production implementation (HS256 bearer tokens resolved against a user
//! directory).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use livecollab_common::Identity;

use crate::error::AppError;

/// Claims payload embedded in every bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject — the user id.
    pub sub: String,
    /// Expiration timestamp (seconds since epoch).
    pub exp: i64,
}

/// Validates an opaque bearer token and resolves it to an identity.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AppError>;
}

/// Resolves a token subject to a user record.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn lookup(&self, user_id: &str) -> Option<Identity>;
}

/// In-memory user directory, optionally seeded from a JSON file.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: DashMap<String, Identity>,
}

impl InMemoryUserDirectory {
    pub fn insert(&self, identity: Identity) {
        self.users.insert(identity.id.clone(), identity);
    }

    /// Load a directory from a JSON array of identity records.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path)?;
        let records: Vec<Identity> = serde_json::from_str(&content)?;
        let directory = Self::default();
        for record in records {
            directory.insert(record);
        }
        Ok(directory)
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn lookup(&self, user_id: &str) -> Option<Identity> {
        self.users.get(user_id).map(|entry| entry.clone())
    }
}

/// HS256 JWT verifier backed by a user directory.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    users: Arc<dyn UserDirectory>,
}

impl JwtVerifier {
    pub fn new(secret: &str, users: Arc<dyn UserDirectory>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 5; // clock skew

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            users,
        }
    }
}

#[async_trait]
impl CredentialVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AppError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            let reason = match e.kind() {
                ErrorKind::ExpiredSignature => "token expired",
                ErrorKind::InvalidSignature => "invalid signature",
                _ => "invalid token",
            };
            AppError::InvalidCredential(reason.to_string())
        })?;

        self.users
            .lookup(&data.claims.sub)
            .await
            .ok_or_else(|| AppError::InvalidCredential("user not found".to_string()))
    }
}
