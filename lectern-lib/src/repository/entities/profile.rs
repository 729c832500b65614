use agdb::{Comparison, DbId, QueryBuilder};
use chrono::{DateTime, Utc};
use getset::{CopyGetters, Getters};
use strum::{Display, EnumString};
use tracing::debug;

use crate::repository::{
    db::{Db, PROFILES, models::ProfileModel},
    entities::{Error, Result, Uid, ensure_current, locate, timestamp},
};

/// Descriptive role shown on a researcher's public profile. Has no bearing on what the person
/// may do when logged in.
#[derive(
    Debug, Display, EnumString, Clone, Copy, Default, PartialEq, Eq, Hash, clap::ValueEnum,
)]
pub enum ProfileRole {
    Admin,
    Editor,
    #[default]
    Researcher,
}

/// Attributes of a profile that doesn't exist yet.
#[derive(Debug, Clone, Default)]
pub struct NewProfile {
    pub email: String,
    pub full_name: String,
    pub affiliation: String,
    pub role: ProfileRole,
    pub orcid: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
    /// Defaults to the moment of insertion
    pub joined_at: Option<DateTime<Utc>>,
    pub contributions: u64,
}

/// A public researcher record as it was when loaded.
#[derive(Debug, Clone, PartialEq, Getters, CopyGetters)]
pub struct Profile {
    pub(crate) db_id: DbId,
    #[getset(get_copy = "pub")]
    pub(crate) id: Uid,
    #[getset(get = "pub")]
    pub(crate) email: String,
    #[getset(get = "pub")]
    pub(crate) full_name: String,
    #[getset(get = "pub")]
    pub(crate) affiliation: String,
    #[getset(get_copy = "pub")]
    pub(crate) role: ProfileRole,
    #[getset(get = "pub")]
    pub(crate) orcid: Option<String>,
    #[getset(get = "pub")]
    pub(crate) bio: Option<String>,
    #[getset(get = "pub")]
    pub(crate) avatar: Option<String>,
    #[getset(get_copy = "pub")]
    pub(crate) joined_at: DateTime<Utc>,
    #[getset(get_copy = "pub")]
    pub(crate) contributions: u64,
}

impl TryFrom<ProfileModel> for Profile {
    type Error = Error;

    fn try_from(model: ProfileModel) -> Result<Self> {
        Ok(Self {
            db_id: model.db_id.ok_or(Error::MalformedRecord("db_id"))?,
            id: Uid::from(model.uid),
            role: model
                .role
                .parse()
                .map_err(|_| Error::MalformedRecord("role"))?,
            joined_at: timestamp(model.joined_at, "joined_at")?,
            email: model.email,
            full_name: model.full_name,
            affiliation: model.affiliation,
            orcid: model.orcid,
            bio: model.bio,
            avatar: model.avatar,
            contributions: model.contributions,
        })
    }
}

impl From<&Profile> for ProfileModel {
    fn from(profile: &Profile) -> Self {
        Self {
            db_id: Some(profile.db_id),
            uid: profile.id.into(),
            email: profile.email.clone(),
            full_name: profile.full_name.clone(),
            affiliation: profile.affiliation.clone(),
            role: profile.role.to_string(),
            orcid: profile.orcid.clone(),
            bio: profile.bio.clone(),
            avatar: profile.avatar.clone(),
            joined_at: profile.joined_at.timestamp(),
            contributions: profile.contributions,
        }
    }
}

/// Persistence for researcher profiles.
#[derive(Debug, Clone)]
pub struct ProfileRepository {
    db: Db,
}

impl ProfileRepository {
    pub(crate) fn new(db: Db) -> Self {
        Self { db }
    }

    /// Store a new profile. `new.email` is expected to be normalized already.
    pub fn insert(&self, new: NewProfile) -> Result<Profile> {
        let uid = Uid::next(&self.db)?;
        let model = ProfileModel {
            db_id: None,
            uid: uid.into(),
            email: new.email,
            full_name: new.full_name,
            affiliation: new.affiliation,
            role: new.role.to_string(),
            orcid: new.orcid,
            bio: new.bio,
            avatar: new.avatar,
            joined_at: new.joined_at.unwrap_or_else(Utc::now).timestamp(),
            contributions: new.contributions,
        };

        let mut stored = model.clone();
        let db_id = self.db.write().transaction_mut(|t| -> Result<DbId> {
            let profile_id = t
                .exec_mut(QueryBuilder::insert().element(model).query())?
                .elements
                .first()
                .ok_or(Error::MalformedRecord("db_id"))?
                .id;

            t.exec_mut(
                QueryBuilder::insert()
                    .edges()
                    .from(PROFILES)
                    .to(profile_id)
                    .query(),
            )?;

            Ok(profile_id)
        })?;
        stored.db_id = Some(db_id);

        debug!("Inserted profile {uid} <{}>", stored.email);

        Profile::try_from(stored)
    }

    pub fn find_by_id(&self, id: Uid) -> Result<Option<Profile>> {
        let models: Vec<ProfileModel> = self
            .db
            .read()
            .exec(
                QueryBuilder::select()
                    .elements::<ProfileModel>()
                    .search()
                    .from(PROFILES)
                    .where_()
                    .key("uid")
                    .value(Comparison::Equal(u64::from(id).into()))
                    .query(),
            )?
            .try_into()?;

        models.into_iter().next().map(Profile::try_from).transpose()
    }

    /// Every profile filed under `email`, oldest first. Profile emails aren't unique, so there
    /// may be more than one.
    pub fn find_by_email(&self, email: &str) -> Result<Vec<Profile>> {
        let models: Vec<ProfileModel> = self
            .db
            .read()
            .exec(
                QueryBuilder::select()
                    .elements::<ProfileModel>()
                    .search()
                    .from(PROFILES)
                    .where_()
                    .key("email")
                    .value(Comparison::Equal(email.into()))
                    .query(),
            )?
            .try_into()?;

        collect_sorted(models)
    }

    /// All profiles, oldest first.
    pub fn list(&self) -> Result<Vec<Profile>> {
        let models: Vec<ProfileModel> = self
            .db
            .read()
            .exec(
                QueryBuilder::select()
                    .elements::<ProfileModel>()
                    .search()
                    .from(PROFILES)
                    .where_()
                    .neighbor()
                    .query(),
            )?
            .try_into()?;

        collect_sorted(models)
    }

    /// Overwrite the stored record with `profile`. Fails with [`Error::StaleEntity`] if the
    /// profile was removed after `profile` was loaded.
    pub fn update(&self, profile: &Profile) -> Result<()> {
        let model = ProfileModel::from(profile);
        let (db_id, uid) = (profile.db_id, profile.id);
        let cleared: Vec<&str> = [
            ("orcid", profile.orcid.is_none()),
            ("bio", profile.bio.is_none()),
            ("avatar", profile.avatar.is_none()),
        ]
        .into_iter()
        .filter_map(|(key, is_none)| is_none.then_some(key))
        .collect();

        self.db.write().transaction_mut(|t| -> Result<()> {
            ensure_current(&t.exec(locate(PROFILES, uid))?, db_id, uid)?;

            t.exec_mut(QueryBuilder::insert().element(model).query())?;

            // Optional fields that were unset don't get written, so drop any stale value
            for key in cleared {
                t.exec_mut(QueryBuilder::remove().values(key).ids(db_id).query())?;
            }

            Ok(())
        })?;

        debug!("Updated profile {} <{}>", profile.id, profile.email);

        Ok(())
    }

    pub fn remove(&self, profile: &Profile) -> Result<()> {
        let (db_id, uid) = (profile.db_id, profile.id);
        self.db.write().transaction_mut(|t| -> Result<()> {
            ensure_current(&t.exec(locate(PROFILES, uid))?, db_id, uid)?;

            t.exec_mut(QueryBuilder::remove().ids(db_id).query())?;

            Ok(())
        })?;

        debug!("Removed profile {} <{}>", profile.id, profile.email);

        Ok(())
    }
}

fn collect_sorted(models: Vec<ProfileModel>) -> Result<Vec<Profile>> {
    let mut profiles = models
        .into_iter()
        .map(Profile::try_from)
        .collect::<Result<Vec<_>>>()?;
    profiles.sort_by_key(|p| p.id);

    Ok(profiles)
}
