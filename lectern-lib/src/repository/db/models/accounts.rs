use agdb::{DbElement, DbId};

#[derive(Debug, Clone, DbElement, PartialEq, PartialOrd)]
pub(crate) struct AccountModel {
    pub(crate) db_id: Option<DbId>,
    pub(crate) uid: u64,
    /// Normalized login email, unique across accounts
    pub(crate) email: String,
    /// Opaque hashed secret
    pub(crate) credential: String,
    pub(crate) role: String,
    pub(crate) privileged: bool,
    /// UID of the profile this account represents, if any
    pub(crate) profile_ref: Option<u64>,
    /// Soft-delete marker, only consulted when building the roster
    pub(crate) hidden: bool,
    /// Unix timestamp (seconds)
    pub(crate) created_at: i64,
}
