//! Core domain entities for Lectern.
//!
//! [`Profile`]s and [`Account`]s are snapshots of a stored element taken at load time. All
//! writes go through their repositories, which check inside the write transaction that the
//! snapshot's element still exists before touching it. A [`DbId`] is reused once freed, so
//! without that check a late write could land on an unrelated record.

use std::{io, path::PathBuf};

use agdb::{Comparison, DbId, DbValue, QueryBuilder, QueryResult, SearchQuery};
use derive_more::{Display, From, Into};
use thiserror::Error;

use crate::repository::db::{Db, NEXT_UID};

mod account;
mod profile;

pub use account::{Account, AccountRepository, AccountRole, NewAccount};
pub use profile::{NewProfile, Profile, ProfileRepository, ProfileRole};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Internal database error {0}")]
    Internal(#[from] agdb::DbError),
    #[error("An account with email '{0}' already exists")]
    DuplicateEmail(String),
    #[error("Record {0} was removed or replaced since it was loaded")]
    StaleEntity(Uid),
    #[error("Stored record has a missing or malformed '{0}' field")]
    MalformedRecord(&'static str),
    #[error("Database was written by a newer version (model version {0})")]
    UnsupportedModelVersion(u64),
    #[error("Database path is not valid UTF-8: {}", .0.display())]
    InvalidPath(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Identifier of a profile or an account.
///
/// Drawn from a single counter shared by both collections, so a [`Uid`] names at most one
/// element of either kind.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
pub struct Uid(u64);

impl Uid {
    /// Allocate the next free UID. Every call advances the counter, even if the caller never
    /// ends up inserting anything.
    pub(crate) fn next(db: &Db) -> Result<Self> {
        db.write().transaction_mut(|t| -> Result<Self> {
            let uid = t
                .exec(QueryBuilder::select().values(NEXT_UID).ids(NEXT_UID).query())?
                .elements
                .pop()
                .and_then(|mut element| element.values.pop())
                .ok_or(Error::MalformedRecord(NEXT_UID))?
                .value
                .to_u64()?;

            t.exec_mut(
                QueryBuilder::insert()
                    .values([[(NEXT_UID, uid + 1).into()]])
                    .ids(NEXT_UID)
                    .query(),
            )?;

            Ok(Self(uid))
        })
    }
}

/// Search for the element filed under `root` carrying `uid`.
pub(crate) fn locate(root: &str, uid: Uid) -> SearchQuery {
    QueryBuilder::search()
        .from(root)
        .where_()
        .key("uid")
        .value(Comparison::Equal(u64::from(uid).into()))
        .query()
}

/// Fail with [`Error::StaleEntity`] unless `found`, the result of [`locate`], still names
/// `db_id`.
pub(crate) fn ensure_current(found: &QueryResult, db_id: DbId, uid: Uid) -> Result<()> {
    if found.elements.iter().any(|element| element.id == db_id) {
        Ok(())
    } else {
        Err(Error::StaleEntity(uid))
    }
}

pub(crate) fn set_field<T>(
    db: &Db,
    root: &str,
    db_id: DbId,
    uid: Uid,
    field: &str,
    value: T,
) -> Result<()>
where
    T: Into<DbValue>,
{
    let value = value.into();
    db.write().transaction_mut(|t| -> Result<()> {
        ensure_current(&t.exec(locate(root, uid))?, db_id, uid)?;

        t.exec_mut(
            QueryBuilder::insert()
                .values([[(field, value).into()]])
                .ids(db_id)
                .query(),
        )?;

        Ok(())
    })
}

pub(crate) fn clear_field(
    db: &Db,
    root: &str,
    db_id: DbId,
    uid: Uid,
    field: &str,
) -> Result<()> {
    db.write().transaction_mut(|t| -> Result<()> {
        ensure_current(&t.exec(locate(root, uid))?, db_id, uid)?;

        t.exec_mut(QueryBuilder::remove().values(field).ids(db_id).query())?;

        Ok(())
    })
}

/// Unix timestamp back into a UTC datetime.
pub(crate) fn timestamp(secs: i64, field: &'static str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::from_timestamp(secs, 0).ok_or(Error::MalformedRecord(field))
}
