use agdb::{DbElement, DbId};

#[derive(Debug, Clone, DbElement, PartialEq, PartialOrd)]
pub(crate) struct ProfileModel {
    pub(crate) db_id: Option<DbId>,
    pub(crate) uid: u64,
    /// Normalized identity key, not unique across profiles
    pub(crate) email: String,
    pub(crate) full_name: String,
    pub(crate) affiliation: String,
    /// Descriptive role, unrelated to any account role
    pub(crate) role: String,
    pub(crate) orcid: Option<String>,
    pub(crate) bio: Option<String>,
    pub(crate) avatar: Option<String>,
    /// Unix timestamp (seconds)
    pub(crate) joined_at: i64,
    pub(crate) contributions: u64,
}
