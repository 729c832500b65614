use agdb::{Comparison, DbId, QueryBuilder};
use chrono::{DateTime, Utc};
use getset::{CopyGetters, Getters};
use strum::{Display, EnumString};
use tracing::debug;

use crate::repository::{
    db::{ACCOUNTS, Db, models::AccountModel},
    entities::{Error, Result, Uid, clear_field, set_field, timestamp},
};

/// What an account may do once logged in.
#[derive(Debug, Display, EnumString, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AccountRole {
    #[default]
    Admin,
    User,
}

/// Attributes of an account that doesn't exist yet.
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    /// Normalized login email
    pub email: String,
    /// Already hashed
    pub credential: String,
    pub role: AccountRole,
    pub privileged: bool,
    pub profile_ref: Option<Uid>,
}

/// An authentication identity as it was when loaded.
#[derive(Debug, Clone, PartialEq, Getters, CopyGetters)]
pub struct Account {
    pub(crate) db_id: DbId,
    #[getset(get_copy = "pub")]
    pub(crate) id: Uid,
    #[getset(get = "pub")]
    pub(crate) email: String,
    pub(crate) credential: String,
    #[getset(get_copy = "pub")]
    pub(crate) role: AccountRole,
    #[getset(get_copy = "pub")]
    pub(crate) privileged: bool,
    #[getset(get_copy = "pub")]
    pub(crate) profile_ref: Option<Uid>,
    #[getset(get_copy = "pub")]
    pub(crate) hidden: bool,
    #[getset(get_copy = "pub")]
    pub(crate) created_at: DateTime<Utc>,
}

impl Account {
    /// Whether this account should be considered for the merged roster at all.
    pub fn is_listable_admin(&self) -> bool {
        self.role == AccountRole::Admin && !self.hidden
    }
}

impl TryFrom<AccountModel> for Account {
    type Error = Error;

    fn try_from(model: AccountModel) -> Result<Self> {
        Ok(Self {
            db_id: model.db_id.ok_or(Error::MalformedRecord("db_id"))?,
            id: Uid::from(model.uid),
            role: model
                .role
                .parse()
                .map_err(|_| Error::MalformedRecord("role"))?,
            created_at: timestamp(model.created_at, "created_at")?,
            email: model.email,
            credential: model.credential,
            privileged: model.privileged,
            profile_ref: model.profile_ref.map(Uid::from),
            hidden: model.hidden,
        })
    }
}

/// Persistence for authentication accounts.
///
/// Owns the one invariant that has to hold under concurrent writers: no two accounts share an
/// email. Hidden accounts are returned like any other; filtering them is the roster's job.
#[derive(Debug, Clone)]
pub struct AccountRepository {
    db: Db,
}

impl AccountRepository {
    pub(crate) fn new(db: Db) -> Self {
        Self { db }
    }

    /// Store a new account, failing with [`Error::DuplicateEmail`] if the email is taken.
    ///
    /// The check and the insert happen inside one write transaction, so of two concurrent
    /// inserts for the same email exactly one succeeds.
    pub fn insert(&self, new: NewAccount) -> Result<Account> {
        let uid = Uid::next(&self.db)?;
        let model = AccountModel {
            db_id: None,
            uid: uid.into(),
            email: new.email,
            credential: new.credential,
            role: new.role.to_string(),
            privileged: new.privileged,
            profile_ref: new.profile_ref.map(u64::from),
            hidden: false,
            created_at: Utc::now().timestamp(),
        };

        let mut stored = model.clone();
        let db_id = self.db.write().transaction_mut(|t| -> Result<DbId> {
            let existing = t
                .exec(
                    QueryBuilder::search()
                        .from(ACCOUNTS)
                        .where_()
                        .key("email")
                        .value(Comparison::Equal(model.email.as_str().into()))
                        .query(),
                )?
                .result;
            if existing > 0 {
                return Err(Error::DuplicateEmail(model.email.clone()));
            }

            let account_id = t
                .exec_mut(QueryBuilder::insert().element(model).query())?
                .elements
                .first()
                .ok_or(Error::MalformedRecord("db_id"))?
                .id;

            t.exec_mut(
                QueryBuilder::insert()
                    .edges()
                    .from(ACCOUNTS)
                    .to(account_id)
                    .query(),
            )?;

            Ok(account_id)
        })?;
        stored.db_id = Some(db_id);

        debug!("Inserted account {uid} <{}>", stored.email);

        Account::try_from(stored)
    }

    pub fn find_by_id(&self, id: Uid) -> Result<Option<Account>> {
        let models: Vec<AccountModel> = self
            .db
            .read()
            .exec(
                QueryBuilder::select()
                    .elements::<AccountModel>()
                    .search()
                    .from(ACCOUNTS)
                    .where_()
                    .key("uid")
                    .value(Comparison::Equal(u64::from(id).into()))
                    .query(),
            )?
            .try_into()?;

        models.into_iter().next().map(Account::try_from).transpose()
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let models: Vec<AccountModel> = self
            .db
            .read()
            .exec(
                QueryBuilder::select()
                    .elements::<AccountModel>()
                    .search()
                    .from(ACCOUNTS)
                    .where_()
                    .key("email")
                    .value(Comparison::Equal(email.into()))
                    .query(),
            )?
            .try_into()?;

        models.into_iter().next().map(Account::try_from).transpose()
    }

    /// Accounts whose link points at `profile`. Holds at most one entry while the single-link
    /// invariant is intact.
    pub fn linked_to(&self, profile: Uid) -> Result<Vec<Account>> {
        let models: Vec<AccountModel> = self
            .db
            .read()
            .exec(
                QueryBuilder::select()
                    .elements::<AccountModel>()
                    .search()
                    .from(ACCOUNTS)
                    .where_()
                    .key("profile_ref")
                    .value(Comparison::Equal(u64::from(profile).into()))
                    .query(),
            )?
            .try_into()?;

        collect_sorted(models)
    }

    /// All accounts, hidden ones included, oldest first.
    pub fn list(&self) -> Result<Vec<Account>> {
        let models: Vec<AccountModel> = self
            .db
            .read()
            .exec(
                QueryBuilder::select()
                    .elements::<AccountModel>()
                    .search()
                    .from(ACCOUNTS)
                    .where_()
                    .neighbor()
                    .query(),
            )?
            .try_into()?;

        collect_sorted(models)
    }

    pub fn set_credential(&self, account: &mut Account, credential: String) -> Result<()> {
        set_field(
            &self.db,
            ACCOUNTS,
            account.db_id,
            account.id,
            "credential",
            credential.as_str(),
        )?;
        account.credential = credential;

        debug!("Rotated credential of account {}", account.id);

        Ok(())
    }

    pub fn link(&self, account: &mut Account, profile: Uid) -> Result<()> {
        set_field(
            &self.db,
            ACCOUNTS,
            account.db_id,
            account.id,
            "profile_ref",
            u64::from(profile),
        )?;
        account.profile_ref = Some(profile);

        debug!("Linked account {} to profile {profile}", account.id);

        Ok(())
    }

    pub fn unlink(&self, account: &mut Account) -> Result<()> {
        clear_field(&self.db, ACCOUNTS, account.db_id, account.id, "profile_ref")?;
        account.profile_ref = None;

        debug!("Unlinked account {}", account.id);

        Ok(())
    }

    pub fn hide(&self, account: &mut Account) -> Result<()> {
        set_field(&self.db, ACCOUNTS, account.db_id, account.id, "hidden", true)?;
        account.hidden = true;

        debug!("Hid account {} from listing", account.id);

        Ok(())
    }
}

fn collect_sorted(models: Vec<AccountModel>) -> Result<Vec<Account>> {
    let mut accounts = models
        .into_iter()
        .map(Account::try_from)
        .collect::<Result<Vec<_>>>()?;
    accounts.sort_by_key(|a| a.id);

    Ok(accounts)
}

#[cfg(test)]
mod test {
    use crate::repository::Repository;

    use super::*;

    fn account(email: &str) -> NewAccount {
        NewAccount {
            email: email.into(),
            credential: format!("hashed:{email}"),
            ..NewAccount::default()
        }
    }

    #[test]
    fn test_insert() {
        let repo = Repository::mock();

        let account = repo.accounts().insert(account("amin@x.org")).unwrap();

        assert_eq!(account.email(), "amin@x.org");
        assert_eq!(account.role(), AccountRole::Admin);
        assert!(!account.privileged());
        assert!(!account.hidden());
        assert_eq!(account.profile_ref(), None);
        assert_eq!(
            repo.accounts().find_by_email("amin@x.org").unwrap(),
            Some(account)
        );
    }

    #[test]
    fn test_insert_duplicate() {
        let repo = Repository::mock();

        repo.accounts().insert(account("amin@x.org")).unwrap();

        assert!(matches!(
            repo.accounts().insert(account("amin@x.org")),
            Err(Error::DuplicateEmail(email)) if email == "amin@x.org"
        ));
        assert_eq!(repo.accounts().list().unwrap().len(), 1);
    }

    #[test]
    fn test_link_and_unlink() {
        let repo = Repository::mock();
        let accounts = repo.accounts();

        let mut account = accounts.insert(account("amin@x.org")).unwrap();
        let profile = Uid::from(42);

        accounts.link(&mut account, profile).unwrap();
        assert_eq!(accounts.linked_to(profile).unwrap(), vec![account.clone()]);

        accounts.unlink(&mut account).unwrap();
        assert!(accounts.linked_to(profile).unwrap().is_empty());
        assert_eq!(
            accounts.find_by_id(account.id()).unwrap().unwrap().profile_ref(),
            None
        );
    }

    #[test]
    fn test_hidden_accounts_are_still_found() {
        let repo = Repository::mock();
        let accounts = repo.accounts();

        let mut account = accounts.insert(account("amin@x.org")).unwrap();
        accounts.hide(&mut account).unwrap();

        let reloaded = accounts.find_by_id(account.id()).unwrap().unwrap();
        assert!(reloaded.hidden());
        assert!(!reloaded.is_listable_admin());
        assert_eq!(accounts.list().unwrap(), vec![reloaded]);
    }

    #[test]
    fn test_set_credential() {
        let repo = Repository::mock();
        let accounts = repo.accounts();

        let mut account = accounts.insert(account("amin@x.org")).unwrap();
        accounts
            .set_credential(&mut account, "hashed:rotated".into())
            .unwrap();

        let reloaded = accounts.find_by_id(account.id()).unwrap().unwrap();
        assert_eq!(reloaded.credential, "hashed:rotated");
    }

    #[test]
    fn test_mismatched_snapshot_is_rejected() {
        let repo = Repository::mock();
        let accounts = repo.accounts();

        let mut stale = accounts.insert(account("amin@x.org")).unwrap();
        stale.id = Uid::from(999);

        assert!(matches!(
            accounts.hide(&mut stale),
            Err(Error::StaleEntity(id)) if id == Uid::from(999)
        ));
        assert!(matches!(
            accounts.unlink(&mut stale),
            Err(Error::StaleEntity(_))
        ));
        assert!(!stale.hidden());

        let stored = accounts.find_by_email("amin@x.org").unwrap().unwrap();
        assert!(!stored.hidden());
    }
}
