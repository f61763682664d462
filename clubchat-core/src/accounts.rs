/// Account provisioning and sign-in.
///
/// Creating an account registers credentials with the identity provider and
/// writes the user's profile document. An account whose role is the founding
/// role also founds its club in the same call, becoming its president. A
/// sign-up that fails after registering is undone, so the same email can be
/// used again.
use std::sync::Arc;

use thiserror::Error;
use zeroize::Zeroizing;

use club_protocol::identity::{is_founding_role, ProfileError, UserProfile};
use club_protocol::ids::{ClubId, UserId};
use club_protocol::membership::MembershipError;

use crate::identity::{load_profile, save_profile, ActorContext, Credentials, IdentityError, IdentityProvider};
use crate::registry::{ClubRegistry, RegistryError};
use crate::store::{DocumentStore, StoreError, USERS};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("A club name is required to found a club")]
    MissingClubName,

    #[error("Profile not found: {0}")]
    ProfileNotFound(UserId),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Sign-up form.
#[derive(Clone)]
pub struct NewAccount {
    pub display_name: String,
    pub email: String,
    pub password: Zeroizing<String>,
    /// Position within the club; the founding role also founds `club_name`.
    pub role: String,
    pub club_name: Option<String>,
}

impl NewAccount {
    pub fn new(
        display_name: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        NewAccount {
            display_name: display_name.into(),
            email: email.into(),
            password: Zeroizing::new(password.into()),
            role: role.into(),
            club_name: None,
        }
    }

    pub fn founding(mut self, club_name: impl Into<String>) -> Self {
        self.club_name = Some(club_name.into());
        self
    }

    fn check_required(&self) -> Result<(), AccountError> {
        let required = [
            ("displayName", self.display_name.as_str()),
            ("email", self.email.as_str()),
            ("password", self.password.as_str()),
            ("role", self.role.as_str()),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(AccountError::MissingField(name));
            }
        }
        if is_founding_role(&self.role)
            && self.club_name.as_deref().map(str::trim).unwrap_or("").is_empty()
        {
            return Err(AccountError::MissingClubName);
        }
        Ok(())
    }
}

/// Result of `create_account`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedAccount {
    pub actor: ActorContext,
    /// Set when the account founded a club.
    pub club_id: Option<ClubId>,
}

pub struct Accounts {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    registry: Arc<ClubRegistry>,
}

impl Accounts {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        registry: Arc<ClubRegistry>,
    ) -> Self {
        Accounts {
            store,
            identity,
            registry,
        }
    }

    pub async fn create_account(&self, account: NewAccount) -> Result<CreatedAccount, AccountError> {
        account.check_required()?;
        if let (Some(name), true) = (&account.club_name, is_founding_role(&account.role)) {
            self.check_name_free(name).await?;
        }

        let user_id = self
            .identity
            .register(&Credentials::new(account.email.clone(), account.password.as_str()))
            .await?;
        match self.provision(&account, &user_id).await {
            Ok(created) => Ok(created),
            Err(e) => {
                log::warn!("Sign-up of {:?} failed, rolling back: {}", user_id, e);
                self.abandon(&user_id).await;
                Err(e)
            }
        }
    }

    /// Fail early on a taken club name, before any credentials exist.
    async fn check_name_free(&self, name: &str) -> Result<(), AccountError> {
        match self.registry.find_club(name).await {
            Ok(_) => Err(RegistryError::Membership(MembershipError::DuplicateName).into()),
            Err(RegistryError::Membership(MembershipError::NotFound(_))) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn provision(
        &self,
        account: &NewAccount,
        user_id: &UserId,
    ) -> Result<CreatedAccount, AccountError> {
        let profile = UserProfile::new(user_id.clone(), &account.display_name, &account.role)?;
        save_profile(self.store.as_ref(), &profile).await?;
        let actor = ActorContext::new(user_id.clone());

        let club_id = match (&account.club_name, profile.is_founder()) {
            (Some(name), true) => Some(self.registry.found_club(&actor, name).await?),
            _ => None,
        };

        log::info!(
            "Account {:?} created ({}{})",
            actor.user_id,
            profile.role,
            if club_id.is_some() { ", founded club" } else { "" }
        );
        Ok(CreatedAccount { actor, club_id })
    }

    /// Remove whatever a failed sign-up left behind.
    async fn abandon(&self, user: &UserId) {
        if let Err(e) = self.store.delete(USERS, user.as_str()).await {
            log::warn!("Could not remove profile of {:?}: {}", user, e);
        }
        if let Err(e) = self.identity.unregister(user).await {
            log::warn!("Could not unregister {:?}: {}", user, e);
        }
    }

    /// Verify credentials; the account must have a profile document.
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<ActorContext, AccountError> {
        let user_id = self.identity.verify(credentials).await?;
        if load_profile(self.store.as_ref(), &user_id).await?.is_none() {
            self.identity.sign_out().await;
            return Err(AccountError::ProfileNotFound(user_id));
        }
        Ok(ActorContext::new(user_id))
    }

    pub async fn sign_out(&self) {
        self.identity.sign_out().await;
    }

    pub async fn profile(&self, user: &UserId) -> Result<UserProfile, AccountError> {
        load_profile(self.store.as_ref(), user)
            .await?
            .ok_or_else(|| AccountError::ProfileNotFound(user.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClubChatConfig;
    use crate::identity::InMemoryIdentityProvider;
    use crate::store::InMemoryDocumentStore;
    use club_protocol::limits::MAX_DISPLAY_NAME_CHARS;

    fn accounts() -> (Arc<InMemoryIdentityProvider>, Accounts) {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let identity = Arc::new(InMemoryIdentityProvider::new());
        let registry = Arc::new(ClubRegistry::new(store.clone(), ClubChatConfig::default()));
        (identity.clone(), Accounts::new(store, identity, registry))
    }

    #[tokio::test]
    async fn test_president_founds_club() {
        let (_, accounts) = accounts();
        let created = accounts
            .create_account(
                NewAccount::new("Alice", "alice@example.com", "hunter22", " President ")
                    .founding("Chess Club"),
            )
            .await
            .unwrap();

        let club_id = created.club_id.unwrap();
        let profile = accounts.profile(&created.actor.user_id).await.unwrap();
        assert_eq!(profile.club_id, Some(club_id.clone()));
        assert_eq!(profile.role, "President");
        let club = accounts.registry.club(&club_id).await.unwrap();
        assert!(club.is_president(&created.actor.user_id));
    }

    #[tokio::test]
    async fn test_member_account_has_no_club() {
        let (_, accounts) = accounts();
        let created = accounts
            .create_account(
                NewAccount::new("Bob", "bob@example.com", "hunter22", "Treasurer")
                    .founding("Ignored Club"),
            )
            .await
            .unwrap();
        assert!(created.club_id.is_none());
        assert!(accounts.registry.find_club("Ignored Club").await.is_err());
    }

    #[tokio::test]
    async fn test_required_fields() {
        let (_, accounts) = accounts();
        assert_eq!(
            accounts
                .create_account(NewAccount::new(" ", "a@b.com", "hunter22", "Member"))
                .await,
            Err(AccountError::MissingField("displayName"))
        );
        assert_eq!(
            accounts
                .create_account(NewAccount::new("Alice", "a@b.com", "", "Member"))
                .await,
            Err(AccountError::MissingField("password"))
        );
        assert_eq!(
            accounts
                .create_account(NewAccount::new("Alice", "a@b.com", "hunter22", "president"))
                .await,
            Err(AccountError::MissingClubName)
        );
    }

    #[tokio::test]
    async fn test_duplicate_club_name_on_signup() {
        let (_, accounts) = accounts();
        accounts
            .create_account(
                NewAccount::new("Alice", "alice@example.com", "hunter22", "President")
                    .founding("Chess Club"),
            )
            .await
            .unwrap();
        assert_eq!(
            accounts
                .create_account(
                    NewAccount::new("Carol", "carol@example.com", "hunter22", "President")
                        .founding("Chess Club"),
                )
                .await,
            Err(AccountError::Registry(RegistryError::Membership(
                MembershipError::DuplicateName
            )))
        );

        // Nothing was provisioned, so Carol can pick another name.
        let created = accounts
            .create_account(
                NewAccount::new("Carol", "carol@example.com", "hunter22", "President")
                    .founding("Go Club"),
            )
            .await
            .unwrap();
        let club = accounts.registry.find_club("Go Club").await.unwrap();
        assert_eq!(created.club_id, Some(club.id));
    }

    #[tokio::test]
    async fn test_failed_signup_is_rolled_back() {
        let (identity, accounts) = accounts();
        let long_name = "x".repeat(MAX_DISPLAY_NAME_CHARS + 1);
        assert!(matches!(
            accounts
                .create_account(NewAccount::new(long_name, "dana@example.com", "hunter22", "Member"))
                .await,
            Err(AccountError::Profile(ProfileError::DisplayNameTooLong { .. }))
        ));
        assert!(identity.current_user().await.is_none());
        assert_eq!(
            accounts
                .sign_in(&Credentials::new("dana@example.com", "hunter22"))
                .await,
            Err(AccountError::Identity(IdentityError::InvalidCredentials))
        );

        let created = accounts
            .create_account(NewAccount::new("Dana", "dana@example.com", "hunter22", "Member"))
            .await
            .unwrap();
        assert_eq!(accounts.profile(&created.actor.user_id).await.unwrap().display_name, "Dana");
    }

    #[tokio::test]
    async fn test_sign_in_requires_profile() {
        let (identity, accounts) = accounts();
        accounts
            .create_account(NewAccount::new("Bob", "bob@example.com", "hunter22", "Member"))
            .await
            .unwrap();
        let ctx = accounts
            .sign_in(&Credentials::new("bob@example.com", "hunter22"))
            .await
            .unwrap();
        assert_eq!(accounts.profile(&ctx.user_id).await.unwrap().display_name, "Bob");

        // Credentials without a profile document
        let orphan = identity
            .register(&Credentials::new("orphan@example.com", "hunter22"))
            .await
            .unwrap();
        assert_eq!(
            accounts
                .sign_in(&Credentials::new("orphan@example.com", "hunter22"))
                .await,
            Err(AccountError::ProfileNotFound(orphan))
        );
        assert!(identity.current_user().await.is_none());
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let (_, accounts) = accounts();
        accounts
            .create_account(NewAccount::new("Bob", "bob@example.com", "hunter22", "Member"))
            .await
            .unwrap();
        assert_eq!(
            accounts
                .sign_in(&Credentials::new("bob@example.com", "nope-nope"))
                .await,
            Err(AccountError::Identity(IdentityError::InvalidCredentials))
        );
    }
}
