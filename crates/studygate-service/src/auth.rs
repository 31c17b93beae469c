use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("account already exists")]
    EmailTaken,
    #[error("invalid credentials")]
    InvalidCredentials,
}

const CREDENTIAL_KEY_CONTEXT: &str = "studygate credentials v1";

/// Identity directory for registered principals.
///
/// Credential digests are per-account-salted keyed hashes; a production
/// deployment would swap in a memory-hard KDF behind the same interface.
/// The subscription core only ever sees the opaque principal id.
pub struct PrincipalRegistry {
    key: [u8; 32],
    by_email: RwLock<HashMap<String, PrincipalEntry>>,
}

#[derive(Debug, Clone)]
struct PrincipalEntry {
    principal_id: String,
    credential_digest: String,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

impl PrincipalRegistry {
    pub fn new(secret: &str) -> Self {
        Self {
            key: blake3::derive_key(CREDENTIAL_KEY_CONTEXT, secret.as_bytes()),
            by_email: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<String, AuthError> {
        let email = normalize_email(email);
        let mut accounts = self.by_email.write().await;
        if accounts.contains_key(&email) {
            return Err(AuthError::EmailTaken);
        }

        let principal_id = Uuid::new_v4().to_string();
        let digest = self.digest(&email, password);
        accounts.insert(
            email,
            PrincipalEntry {
                principal_id: principal_id.clone(),
                credential_digest: digest,
                created_at: Utc::now(),
            },
        );

        Ok(principal_id)
    }

    pub async fn verify_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<String, AuthError> {
        let email = normalize_email(email);
        let accounts = self.by_email.read().await;
        let entry = accounts
            .get(&email)
            .ok_or(AuthError::InvalidCredentials)?;

        let provided = blake3::Hash::from_hex(&self.digest(&email, password))
            .map_err(|_| AuthError::InvalidCredentials)?;
        let stored = blake3::Hash::from_hex(&entry.credential_digest)
            .map_err(|_| AuthError::InvalidCredentials)?;
        if provided != stored {
            return Err(AuthError::InvalidCredentials);
        }

        Ok(entry.principal_id.clone())
    }

    pub async fn exists(&self, principal_id: &str) -> bool {
        self.by_email
            .read()
            .await
            .values()
            .any(|entry| entry.principal_id == principal_id)
    }

    fn digest(&self, email: &str, password: &str) -> String {
        // The normalized email doubles as the per-account salt.
        let mut hasher = blake3::Hasher::new_keyed(&self.key);
        hasher.update(email.as_bytes());
        hasher.update(&[0]);
        hasher.update(password.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

#[derive(Debug, Clone)]
struct Session {
    principal_id: String,
    expires_at: DateTime<Utc>,
}

/// Issues and validates opaque bearer tokens binding requests to principals.
///
/// Everything downstream trusts this verdict; token mechanics stay behind
/// this boundary.
pub struct SessionAuthenticator {
    ttl: Duration,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionAuthenticator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn issue(&self, principal_id: &str) -> String {
        let token = Uuid::new_v4().simple().to_string();
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            token.clone(),
            Session {
                principal_id: principal_id.to_string(),
                expires_at: Utc::now() + self.ttl,
            },
        );
        token
    }

    /// Resolve a bearer token to its principal; expired tokens are dropped.
    pub async fn authenticate(&self, token: &str) -> Option<String> {
        {
            let sessions = self.sessions.read().await;
            match sessions.get(token) {
                Some(session) if session.expires_at > Utc::now() => {
                    return Some(session.principal_id.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        self.sessions.write().await.remove(token);
        None
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_login_resolves_same_principal() {
        let registry = PrincipalRegistry::new("auth-secret");
        let principal_id = registry
            .register("Student@Example.com", "hunter2")
            .await
            .unwrap();

        let resolved = registry
            .verify_credentials(" student@example.com ", "hunter2")
            .await
            .unwrap();
        assert_eq!(principal_id, resolved);
        assert!(registry.exists(&principal_id).await);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let registry = PrincipalRegistry::new("auth-secret");
        registry.register("a@example.com", "pw").await.unwrap();

        let err = registry.register("a@example.com", "pw2").await.unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken));
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let registry = PrincipalRegistry::new("auth-secret");
        registry.register("a@example.com", "right").await.unwrap();

        let err = registry
            .verify_credentials("a@example.com", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn sessions_expire_and_revoke() {
        let sessions = SessionAuthenticator::new(Duration::days(7));
        let token = sessions.issue("principal-1").await;
        assert_eq!(
            sessions.authenticate(&token).await.as_deref(),
            Some("principal-1")
        );

        assert!(sessions.revoke(&token).await);
        assert!(sessions.authenticate(&token).await.is_none());

        let expired = SessionAuthenticator::new(Duration::seconds(-1));
        let token = expired.issue("principal-1").await;
        assert!(expired.authenticate(&token).await.is_none());
    }
}
