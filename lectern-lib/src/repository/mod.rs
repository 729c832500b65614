use std::path::Path;

use crate::{
    config::Cfg,
    fs::state_dir,
    repository::db::Db,
};

mod db;

pub mod entities;

pub use entities::{
    Account, AccountRepository, AccountRole, Error, NewAccount, NewProfile, Profile,
    ProfileRepository, ProfileRole, Uid,
};

/// Central access point for all persistent data.
///
/// Profiles and accounts live in the same database but are reached through separate
/// repositories, mirroring the fact that either may exist without the other.
#[derive(Clone, Debug)]
pub struct Repository {
    db: Db,
    cfg: Cfg,
}

impl Repository {
    /// Open the database named by the configuration, or the default one in the XDG state
    /// directory.
    pub fn new(cfg: Cfg) -> entities::Result<Self> {
        let path = match cfg.read().database_path.clone() {
            Some(path) => path,
            None => state_dir()?.join("data.db"),
        };

        Self::open(&path, cfg)
    }

    pub fn open(path: &Path, cfg: Cfg) -> entities::Result<Self> {
        Ok(Self {
            db: Db::open(path)?,
            cfg,
        })
    }

    pub fn profiles(&self) -> ProfileRepository {
        ProfileRepository::new(self.db.clone())
    }

    pub fn accounts(&self) -> AccountRepository {
        AccountRepository::new(self.db.clone())
    }

    pub fn cfg(&self) -> Cfg {
        self.cfg.clone()
    }

    pub fn backup(&self, dir: &Path) -> entities::Result<()> {
        self.db.backup(dir)
    }

    #[cfg(test)]
    /// Return a mock version of a [`Repository`] with an in-memory database and the default
    /// configuration.
    pub(crate) fn mock() -> Self {
        Self {
            db: Db::in_memory(),
            cfg: crate::config::CoreConfig::mock().into_handle(),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::config::CoreConfig;

    use super::*;

    #[test]
    fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.db");

        let id = {
            let repo = Repository::open(&path, CoreConfig::mock().into_handle()).unwrap();
            repo.profiles()
                .insert(NewProfile {
                    email: "jane@x.org".into(),
                    ..NewProfile::default()
                })
                .unwrap()
                .id()
        };

        let repo = Repository::open(&path, CoreConfig::mock().into_handle()).unwrap();
        let profile = repo.profiles().find_by_id(id).unwrap().unwrap();

        assert_eq!(profile.email(), "jane@x.org");

        // The UID counter survives a reopen
        let next = repo
            .accounts()
            .insert(NewAccount {
                email: "amin@x.org".into(),
                ..NewAccount::default()
            })
            .unwrap();
        assert!(next.id() > id);
    }

    #[test]
    fn test_backup() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::open(&dir.path().join("data.db"), CoreConfig::mock().into_handle())
            .unwrap();

        repo.backup(dir.path()).unwrap();

        let backups = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.starts_with("data-") && name.ends_with(".db.bak")
            })
            .count();
        assert_eq!(backups, 1);
    }
}
