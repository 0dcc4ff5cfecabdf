//! Account registration and password authentication.
//!
//! Passwords are hashed with bcrypt on the blocking thread pool; the async
//! runtime never runs a hash inline. Unknown emails and wrong passwords
//! produce the same [`AppError::InvalidCredentials`], and an unknown email
//! still pays for one hash so both paths take comparable time.
//!
//! bcrypt reads at most 72 bytes of input, terminator included. Longer
//! passwords are refused at registration rather than silently truncated,
//! so two passwords sharing a long prefix never match each other.

use std::sync::Arc;

use bcrypt::BcryptError;
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::{AccountRecord, AccountStore};
use crate::validation::{normalize_email, validate_display_name, validate_email, validate_password};

/// Account operations over an [`AccountStore`].
#[derive(Clone)]
pub struct Accounts {
    store: Arc<dyn AccountStore>,
    bcrypt_cost: u32,
}

impl Accounts {
    pub fn new(store: Arc<dyn AccountStore>, bcrypt_cost: u32) -> Self {
        Self { store, bcrypt_cost }
    }

    /// Create an account.
    ///
    /// # Errors
    ///
    /// - `AppError::BadRequest` if any field fails validation
    /// - `AppError::Conflict` if the email is already registered
    pub async fn register(&self, name: &str, email: &str, password: &str) -> AppResult<AccountRecord> {
        validate_display_name(name)?;
        validate_email(email.trim())?;
        validate_password(password)?;

        let email = normalize_email(email);
        if self.store.find_by_email(&email).await?.is_some() {
            return Err(AppError::Conflict("An account with this email already exists".to_string()));
        }

        let password_hash = hash_password(password.to_string(), self.bcrypt_cost).await?;
        let record = AccountRecord {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            email,
            password_hash,
            created_at: Utc::now(),
        };

        // The existence check above is advisory; creation is the atomic one.
        if !self.store.create(&record).await? {
            return Err(AppError::Conflict("An account with this email already exists".to_string()));
        }

        info!(user_id = %record.id, "Account created");
        Ok(record)
    }

    /// Check credentials and return the account.
    ///
    /// # Errors
    ///
    /// `AppError::InvalidCredentials` for an unknown email or a wrong password.
    pub async fn authenticate(&self, email: &str, password: &str) -> AppResult<AccountRecord> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() || password.len() > BCRYPT_MAX_INPUT_BYTES {
            return Err(AppError::InvalidCredentials);
        }

        let Some(record) = self.store.find_by_email(&email).await? else {
            debug!("Sign-in for unknown email");
            hash_password(password.to_string(), self.bcrypt_cost).await?;
            return Err(AppError::InvalidCredentials);
        };

        if verify_password(password.to_string(), record.password_hash.clone()).await? {
            Ok(record)
        } else {
            debug!(user_id = %record.id, "Sign-in with wrong password");
            Err(AppError::InvalidCredentials)
        }
    }
}

/// Longest password, in bytes, that bcrypt hashes without truncation
/// (72 including the NUL terminator it appends).
pub const BCRYPT_MAX_INPUT_BYTES: usize = 71;

async fn hash_password(password: String, cost: u32) -> AppResult<String> {
    tokio::task::spawn_blocking(move || bcrypt::non_truncating_hash(password, cost))
        .await
        .map_err(|e| AppError::Internal(format!("password hashing task failed: {e}")))?
        .map_err(|e| match e {
            BcryptError::Truncation(_) => AppError::BadRequest(format!(
                "Password cannot exceed {BCRYPT_MAX_INPUT_BYTES} bytes"
            )),
            e => AppError::Internal(format!("password hashing failed: {e}")),
        })
}

async fn verify_password(password: String, hash: String) -> AppResult<bool> {
    let result = tokio::task::spawn_blocking(move || bcrypt::non_truncating_verify(password, &hash))
        .await
        .map_err(|e| AppError::Internal(format!("password check task failed: {e}")))?;

    match result {
        Ok(matched) => Ok(matched),
        Err(BcryptError::Truncation(_)) => Ok(false),
        Err(e) => Err(AppError::Internal(format!("stored password hash unusable: {e}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn accounts() -> Accounts {
        Accounts::new(Arc::new(MemoryStore::new()), 4)
    }

    #[tokio::test]
    async fn test_register_then_authenticate() {
        let accounts = accounts();
        let created = accounts
            .register("Ada", "Ada@Example.com", "correct horse")
            .await
            .unwrap();
        assert_eq!(created.email, "ada@example.com");
        assert_ne!(created.password_hash, "correct horse");

        let found = accounts
            .authenticate("ada@example.com", "correct horse")
            .await
            .unwrap();
        assert_eq!(found.id, created.id);
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let accounts = accounts();
        accounts.register("Ada", "ada@example.com", "password1").await.unwrap();

        let result = accounts.register("Other", "ADA@example.com", "password2").await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_email_look_alike() {
        let accounts = accounts();
        accounts.register("Ada", "ada@example.com", "password1").await.unwrap();

        let wrong = accounts.authenticate("ada@example.com", "password2").await;
        let unknown = accounts.authenticate("bob@example.com", "password1").await;

        assert!(matches!(wrong, Err(AppError::InvalidCredentials)));
        assert!(matches!(unknown, Err(AppError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_register_validates_input() {
        let accounts = accounts();
        assert!(matches!(
            accounts.register("Ada", "not-an-email", "password1").await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            accounts.register("Ada", "ada@example.com", "short").await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            accounts.register("", "ada@example.com", "password1").await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_password_beyond_bcrypt_limit_is_refused() {
        let accounts = accounts();
        let too_long = "a".repeat(BCRYPT_MAX_INPUT_BYTES + 1);
        assert!(matches!(
            accounts.register("Ada", "ada@example.com", &too_long).await,
            Err(AppError::BadRequest(_))
        ));

        // Multi-byte characters count by bytes: 40 chars, 80 bytes.
        let wide = "é".repeat(40);
        assert!(matches!(
            accounts.register("Ada", "ada@example.com", &wide).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_shared_prefix_does_not_authenticate() {
        let accounts = accounts();
        let stored = "a".repeat(BCRYPT_MAX_INPUT_BYTES);
        accounts.register("Ada", "ada@example.com", &stored).await.unwrap();

        assert!(accounts.authenticate("ada@example.com", &stored).await.is_ok());

        let extended = format!("{stored}b");
        assert!(matches!(
            accounts.authenticate("ada@example.com", &extended).await,
            Err(AppError::InvalidCredentials)
        ));
    }
}
