use std::{path::Path, sync::Arc};

use agdb::{DbAny, QueryBuilder};
use derive_more::Deref;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::repository::{
    db::models::{CURRENT_MODEL_VERSION, ModelVersion},
    entities::{Error, Result},
};

pub(crate) mod models;

/// Root nodes every stored element hangs off of.
pub(crate) const PROFILES: &str = "profiles";
pub(crate) const ACCOUNTS: &str = "accounts";
pub(crate) const MODEL_VERSION: &str = "model_version";
pub(crate) const NEXT_UID: &str = "next_uid";

#[derive(Debug, Clone, Deref)]
pub(crate) struct Db {
    #[deref]
    db: Arc<RwLock<DbAny>>,
}

impl Db {
    /// Open (or create) a file backed database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let path_str = path
            .to_str()
            .ok_or_else(|| Error::InvalidPath(path.to_path_buf()))?;

        let mut db = Self {
            db: Arc::new(RwLock::new(DbAny::new_file(path_str)?)),
        };

        db.init()?;

        info!("Opened database at {}", path.display());

        Ok(db)
    }

    fn init(&mut self) -> Result<()> {
        let alias_count = self
            .db
            .read()
            .exec(QueryBuilder::select().aliases().query())?
            .result;

        if alias_count == 0 {
            self.db
                .write()
                .transaction_mut(|t| -> std::result::Result<(), agdb::DbError> {
                    t.exec_mut(
                        QueryBuilder::insert()
                            .nodes()
                            .aliases([
                                // Root element nodes
                                PROFILES,
                                ACCOUNTS,
                                // State nodes
                                MODEL_VERSION,
                                NEXT_UID,
                            ])
                            .query(),
                    )?;

                    // Signifies what the UID should be for a newly inserted element. Profiles and
                    // accounts share the counter, so a UID never names one of each.
                    t.exec_mut(
                        QueryBuilder::insert()
                            .values([[(NEXT_UID, 0_u64).into()]])
                            .ids(NEXT_UID)
                            .query(),
                    )?;

                    Ok(())
                })?;

            debug!("Initialised empty database");
        }

        // Fetch the current model version (if any)
        let stored: Vec<ModelVersion> = self
            .db
            .read()
            .exec(
                QueryBuilder::select()
                    .elements::<ModelVersion>()
                    .search()
                    .from(MODEL_VERSION)
                    .where_()
                    .neighbor()
                    .query(),
            )?
            .try_into()?;

        match stored.first() {
            Some(mv) if mv.version > CURRENT_MODEL_VERSION => {
                return Err(Error::UnsupportedModelVersion(mv.version));
            }
            Some(_) => {}
            None => {
                // Insert default ModelVersion if missing
                self.db
                    .write()
                    .transaction_mut(|t| -> Result<()> {
                        let model_version_id = t
                            .exec_mut(
                                QueryBuilder::insert()
                                    .element(ModelVersion::default())
                                    .query(),
                            )?
                            .elements
                            .first()
                            .ok_or(Error::MalformedRecord(MODEL_VERSION))?
                            .id;

                        t.exec_mut(
                            QueryBuilder::insert()
                                .edges()
                                .from(MODEL_VERSION)
                                .to(model_version_id)
                                .query(),
                        )?;

                        Ok(())
                    })?;
            }
        }

        Ok(())
    }

    /// Write a timestamped copy of the database into `dir`.
    pub fn backup(&self, dir: &Path) -> Result<()> {
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let path = dir.join(format!("data-{timestamp}.db.bak"));
        let path_str = path
            .to_str()
            .ok_or_else(|| Error::InvalidPath(path.clone()))?;

        self.db.write().backup(path_str)?;

        info!("Backed up database to {}", path.display());

        Ok(())
    }

    /// Create a memory backed database for use in tests
    #[cfg(test)]
    pub(crate) fn in_memory() -> Self {
        let mut db = Self {
            db: Arc::new(RwLock::new(DbAny::new_memory("test").unwrap())),
        };

        db.init().unwrap();

        db
    }
}
