/// Identity reference: credentials, the acting user and profile documents.
///
/// Credential verification is delegated to an [`IdentityProvider`]. Every
/// core operation takes an explicit [`ActorContext`] instead of asking the
/// provider for an ambient "current user".
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use rand::RngCore;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use club_protocol::identity::UserProfile;
use club_protocol::ids::UserId;
use club_protocol::limits::MIN_PASSWORD_CHARS;

use crate::store::{Document, DocumentStore, StoreError, WriteFields, USERS};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Email address is invalid")]
    InvalidEmail,

    #[error("Email address is already registered")]
    EmailTaken,

    #[error("Password must be at least {min} characters")]
    WeakPassword { min: usize },

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Identity provider unavailable")]
    Unavailable,
}

// ---------------------------------------------------------------------------
// Credentials & actor
// ---------------------------------------------------------------------------

/// Email + password. The password buffer is wiped on drop.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: Zeroizing<String>,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            email: email.into(),
            password: Zeroizing::new(password.into()),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The user on whose behalf an operation runs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ActorContext {
    pub user_id: UserId,
}

impl ActorContext {
    pub fn new(user_id: UserId) -> Self {
        ActorContext { user_id }
    }
}

// ---------------------------------------------------------------------------
// IdentityProvider
// ---------------------------------------------------------------------------

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create an account and sign it in.
    async fn register(&self, credentials: &Credentials) -> Result<UserId, IdentityError>;

    /// Check credentials and sign the account in.
    async fn verify(&self, credentials: &Credentials) -> Result<UserId, IdentityError>;

    async fn current_user(&self) -> Option<UserId>;

    async fn sign_out(&self);

    /// Delete an account, signing it out if it is current. Unknown users are
    /// ignored.
    async fn unregister(&self, user: &UserId) -> Result<(), IdentityError>;
}

struct Account {
    user_id: UserId,
    salt: [u8; 16],
    digest: String,
}

/// Reference provider keeping salted SHA-256 password digests in memory.
#[derive(Default)]
pub struct InMemoryIdentityProvider {
    accounts: Mutex<HashMap<String, Account>>,
    current: Mutex<Option<UserId>>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn digest(salt: &[u8; 16], password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(password.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn normalize_email(email: &str) -> Result<String, IdentityError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(IdentityError::InvalidEmail),
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn register(&self, credentials: &Credentials) -> Result<UserId, IdentityError> {
        let email = normalize_email(&credentials.email)?;
        if credentials.password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(IdentityError::WeakPassword {
                min: MIN_PASSWORD_CHARS,
            });
        }

        let mut accounts = self.accounts.lock().await;
        if accounts.contains_key(&email) {
            return Err(IdentityError::EmailTaken);
        }

        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let user_id = UserId::new(club_protocol::ids::generate_document_id());
        accounts.insert(
            email,
            Account {
                user_id: user_id.clone(),
                salt,
                digest: Self::digest(&salt, &credentials.password),
            },
        );
        drop(accounts);

        *self.current.lock().await = Some(user_id.clone());
        log::info!("Registered account {:?}", user_id);
        Ok(user_id)
    }

    async fn verify(&self, credentials: &Credentials) -> Result<UserId, IdentityError> {
        let email = normalize_email(&credentials.email)
            .map_err(|_| IdentityError::InvalidCredentials)?;
        let accounts = self.accounts.lock().await;
        let account = accounts
            .get(&email)
            .ok_or(IdentityError::InvalidCredentials)?;
        if Self::digest(&account.salt, &credentials.password) != account.digest {
            return Err(IdentityError::InvalidCredentials);
        }
        let user_id = account.user_id.clone();
        drop(accounts);

        *self.current.lock().await = Some(user_id.clone());
        Ok(user_id)
    }

    async fn current_user(&self) -> Option<UserId> {
        self.current.lock().await.clone()
    }

    async fn sign_out(&self) {
        self.current.lock().await.take();
    }

    async fn unregister(&self, user: &UserId) -> Result<(), IdentityError> {
        self.accounts
            .lock()
            .await
            .retain(|_, account| account.user_id != *user);
        let mut current = self.current.lock().await;
        if current.as_ref() == Some(user) {
            current.take();
        }
        log::info!("Unregistered account {:?}", user);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Profile documents
// ---------------------------------------------------------------------------

pub fn decode_profile(doc: &Document) -> Result<UserProfile, StoreError> {
    serde_json::from_value(Value::Object(doc.fields.clone()))
        .map_err(|e| StoreError::Decode(format!("{}/{}: {}", USERS, doc.id, e)))
}

pub async fn load_profile(
    store: &dyn DocumentStore,
    user: &UserId,
) -> Result<Option<UserProfile>, StoreError> {
    match store.get(USERS, user.as_str()).await? {
        Some(doc) => decode_profile(&doc).map(Some),
        None => Ok(None),
    }
}

pub async fn save_profile(store: &dyn DocumentStore, profile: &UserProfile) -> Result<(), StoreError> {
    let fields = match serde_json::to_value(profile) {
        Ok(Value::Object(fields)) => fields,
        Ok(_) => return Err(StoreError::Decode("profile is not an object".into())),
        Err(e) => return Err(StoreError::Decode(e.to_string())),
    };
    store
        .put(USERS, profile.id.as_str(), WriteFields::new(fields))
        .await?;
    Ok(())
}

/// LRU cache of profiles for resolving requester ids to display names.
pub struct ProfileCache {
    store: Arc<dyn DocumentStore>,
    cache: Mutex<LruCache<UserId, UserProfile>>,
}

impl ProfileCache {
    pub fn new(store: Arc<dyn DocumentStore>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        ProfileCache {
            store,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Profiles for `ids`, in order. Ids without a profile document are
    /// skipped.
    pub async fn resolve(&self, ids: &[UserId]) -> Result<Vec<UserProfile>, StoreError> {
        let mut profiles = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(profile) = self.cache.lock().await.get(id).cloned() {
                profiles.push(profile);
                continue;
            }
            match load_profile(self.store.as_ref(), id).await? {
                Some(profile) => {
                    self.cache.lock().await.put(id.clone(), profile.clone());
                    profiles.push(profile);
                }
                None => log::warn!("No profile for requester {:?}", id),
            }
        }
        Ok(profiles)
    }

    pub async fn invalidate(&self, id: &UserId) {
        self.cache.lock().await.pop(id);
    }

    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDocumentStore;

    #[tokio::test]
    async fn test_register_and_verify() {
        let idp = InMemoryIdentityProvider::new();
        let creds = Credentials::new("alice@example.com", "hunter22");
        let id = idp.register(&creds).await.unwrap();
        assert_eq!(idp.current_user().await, Some(id.clone()));

        idp.sign_out().await;
        assert!(idp.current_user().await.is_none());

        let again = idp
            .verify(&Credentials::new("Alice@Example.com ", "hunter22"))
            .await
            .unwrap();
        assert_eq!(again, id);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_input() {
        let idp = InMemoryIdentityProvider::new();
        assert_eq!(
            idp.register(&Credentials::new("not-an-email", "hunter22")).await,
            Err(IdentityError::InvalidEmail)
        );
        assert_eq!(
            idp.register(&Credentials::new("a@b.com", "123")).await,
            Err(IdentityError::WeakPassword { min: MIN_PASSWORD_CHARS })
        );

        idp.register(&Credentials::new("a@b.com", "hunter22")).await.unwrap();
        assert_eq!(
            idp.register(&Credentials::new("A@B.com", "other-pass")).await,
            Err(IdentityError::EmailTaken)
        );
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let idp = InMemoryIdentityProvider::new();
        idp.register(&Credentials::new("a@b.com", "hunter22")).await.unwrap();
        idp.sign_out().await;
        assert_eq!(
            idp.verify(&Credentials::new("a@b.com", "hunter23")).await,
            Err(IdentityError::InvalidCredentials)
        );
        assert_eq!(
            idp.verify(&Credentials::new("nobody@b.com", "hunter22")).await,
            Err(IdentityError::InvalidCredentials)
        );
        assert!(idp.current_user().await.is_none());
    }

    #[tokio::test]
    async fn test_unregister_frees_email() {
        let idp = InMemoryIdentityProvider::new();
        let creds = Credentials::new("a@b.com", "hunter22");
        let id = idp.register(&creds).await.unwrap();

        idp.unregister(&id).await.unwrap();
        assert!(idp.current_user().await.is_none());
        assert_eq!(idp.verify(&creds).await, Err(IdentityError::InvalidCredentials));
        assert_ne!(idp.register(&creds).await.unwrap(), id);
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("a@b.com", "hunter22");
        assert!(!format!("{:?}", creds).contains("hunter22"));
    }

    #[tokio::test]
    async fn test_profile_cache_resolves_in_order() {
        let store = Arc::new(InMemoryDocumentStore::new());
        for (id, name) in [("u1", "Bob"), ("u2", "Carol")] {
            let profile = UserProfile::new(UserId::new(id), name, "Member").unwrap();
            save_profile(store.as_ref(), &profile).await.unwrap();
        }

        let cache = ProfileCache::new(store.clone(), 1);
        let ids = vec![UserId::new("u2"), UserId::new("ghost"), UserId::new("u1")];
        let names: Vec<String> = cache
            .resolve(&ids)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.display_name)
            .collect();
        assert_eq!(names, vec!["Carol", "Bob"]);
        // Capacity 1: only the most recent survives
        assert_eq!(cache.len().await, 1);
    }
}
