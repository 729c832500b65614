//! Profile and account reconciliation for the Lectern content backend.
//!
//! Researcher profiles and login accounts live in separate collections of the same database.
//! They are optionally linked, independently deletable, and merged into one roster for display.
//! The [`ReconciliationEngine`] keeps the two in step on every administrative write and the
//! [`ListingProjector`] builds the deduplicated roster.

use thiserror::Error;

pub mod config;
pub mod credential;
pub mod fs;
pub mod listing;
pub mod reconcile;
pub mod repository;
pub mod validation;

pub use config::{Cfg, CoreConfig};
pub use credential::{Argon2Hasher, CredentialHasher};
pub use listing::{DisplayEntry, EntrySource, ListingProjector};
pub use reconcile::{DeleteOutcome, ProfilePatch, ReconciliationEngine};
pub use repository::{Account, AccountRole, NewProfile, Profile, ProfileRole, Repository, Uid};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("No profile or account with id {0}")]
    NotFound(Uid),
    #[error("An account for '{0}' already exists")]
    Conflict(String),
    #[error("Credential error: {0}")]
    Credential(String),
    #[error(transparent)]
    Persistence(repository::Error),
}

impl Error {
    /// The HTTP status an administrative handler should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::Credential(_) | Error::Persistence(_) => 500,
        }
    }
}

impl From<repository::Error> for Error {
    fn from(err: repository::Error) -> Self {
        match err {
            repository::Error::DuplicateEmail(email) => Error::Conflict(email),
            repository::Error::StaleEntity(id) => Error::NotFound(id),
            other => Error::Persistence(other),
        }
    }
}
