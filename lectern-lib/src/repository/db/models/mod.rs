use agdb::{DbElement, DbId};

mod accounts;
mod profiles;

pub(crate) use accounts::AccountModel;
pub(crate) use profiles::ProfileModel;

/// Layout version of the stored elements. Bumped whenever a model changes shape.
pub(crate) const CURRENT_MODEL_VERSION: u64 = 1;

#[derive(Debug, Clone, DbElement, PartialEq, PartialOrd)]
pub(crate) struct ModelVersion {
    pub(crate) db_id: Option<DbId>,
    pub(crate) version: u64,
}

impl Default for ModelVersion {
    fn default() -> Self {
        Self {
            db_id: None,
            version: CURRENT_MODEL_VERSION,
        }
    }
}
