/// Aggregate error and its user-facing classification.
///
/// Every service returns its own error enum; `ClubChatError` collects them
/// for hosts that want a single type. `class()` sorts any failure into the
/// five classes a UI needs to react to. Only `Transient` failures are worth
/// retrying, and the core never retries on its own.
use thiserror::Error;

use club_protocol::identity::ProfileError;
use club_protocol::membership::MembershipError;
use club_protocol::messages::MessageError;
use club_protocol::symbol::SymbolError;

use crate::accounts::AccountError;
use crate::config::ConfigError;
use crate::feed::FeedError;
use crate::identity::IdentityError;
use crate::ledger::LedgerError;
use crate::registry::RegistryError;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Malformed input; fix the input.
    Validation,
    /// The actor may not do this.
    Authorization,
    /// Valid but refused by current state (duplicate name, already a member).
    UserCorrectable,
    /// Re-read and retry.
    Transient,
    /// Corrupt data or a bug.
    Internal,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClubChatError {
    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClubChatError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ClubChatError::Account(e) => account_class(e),
            ClubChatError::Registry(e) => registry_class(e),
            ClubChatError::Feed(e) => feed_class(e),
            ClubChatError::Ledger(e) => ledger_class(e),
            ClubChatError::Identity(e) => identity_class(e),
            ClubChatError::Store(e) => store_class(e),
            ClubChatError::Config(_) => ErrorClass::Validation,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

fn account_class(e: &AccountError) -> ErrorClass {
    match e {
        AccountError::MissingField(_) | AccountError::MissingClubName => ErrorClass::Validation,
        AccountError::ProfileNotFound(_) => ErrorClass::UserCorrectable,
        AccountError::Profile(e) => profile_class(e),
        AccountError::Identity(e) => identity_class(e),
        AccountError::Registry(e) => registry_class(e),
        AccountError::Store(e) => store_class(e),
    }
}

fn registry_class(e: &RegistryError) -> ErrorClass {
    match e {
        RegistryError::Membership(e) => membership_class(e),
        RegistryError::ProfileNotFound(_) => ErrorClass::UserCorrectable,
        RegistryError::Store(e) => store_class(e),
    }
}

fn feed_class(e: &FeedError) -> ErrorClass {
    match e {
        FeedError::Message(e) => message_class(e),
        FeedError::ProfileNotFound(_) => ErrorClass::UserCorrectable,
        FeedError::Store(e) => store_class(e),
    }
}

fn ledger_class(e: &LedgerError) -> ErrorClass {
    match e {
        LedgerError::InvalidSymbol(e) => symbol_class(e),
        LedgerError::StaleReference(_) => ErrorClass::Transient,
        LedgerError::Message(e) => message_class(e),
        LedgerError::ProfileNotFound(_) => ErrorClass::UserCorrectable,
        LedgerError::Store(e) => store_class(e),
    }
}

fn identity_class(e: &IdentityError) -> ErrorClass {
    match e {
        IdentityError::InvalidEmail | IdentityError::WeakPassword { .. } => ErrorClass::Validation,
        IdentityError::EmailTaken => ErrorClass::UserCorrectable,
        IdentityError::InvalidCredentials => ErrorClass::Authorization,
        IdentityError::Unavailable => ErrorClass::Transient,
    }
}

fn store_class(e: &StoreError) -> ErrorClass {
    match e {
        StoreError::Unavailable | StoreError::PreconditionFailed(_) => ErrorClass::Transient,
        StoreError::AlreadyExists { .. } | StoreError::NotFound { .. } => {
            ErrorClass::UserCorrectable
        }
        StoreError::InvalidUpdate(_) | StoreError::Decode(_) => ErrorClass::Internal,
    }
}

fn membership_class(e: &MembershipError) -> ErrorClass {
    match e {
        MembershipError::InvalidName(_) => ErrorClass::Validation,
        MembershipError::Forbidden => ErrorClass::Authorization,
        MembershipError::DuplicateName
        | MembershipError::NotFound(_)
        | MembershipError::AlreadyMember
        | MembershipError::AlreadyAffiliated(_)
        | MembershipError::NoPendingRequest
        | MembershipError::JoinQueueFull(_) => ErrorClass::UserCorrectable,
        MembershipError::InvariantViolation(_) | MembershipError::Decode(_) => ErrorClass::Internal,
    }
}

fn message_class(e: &MessageError) -> ErrorClass {
    match e {
        MessageError::EmptyBody | MessageError::BodyTooLong { .. } => ErrorClass::Validation,
        MessageError::NotAMember => ErrorClass::Authorization,
        MessageError::Decode(_) => ErrorClass::Internal,
    }
}

fn symbol_class(_: &SymbolError) -> ErrorClass {
    ErrorClass::Validation
}

fn profile_class(_: &ProfileError) -> ErrorClass {
    ErrorClass::Validation
}
