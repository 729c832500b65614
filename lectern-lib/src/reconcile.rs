//! Keeps researcher profiles and login accounts in step.
//!
//! A profile and an account are separate records joined by an optional `profile_ref` on the
//! account. Every administrative write goes through [`ReconciliationEngine`], which performs a
//! short, ordered sequence of repository writes. The sequence is not atomic: a failure halfway
//! through can leave a profile unlinked, which the next update repairs. Email uniqueness of
//! accounts is the only rule enforced atomically, and the account repository owns it.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    Error, Result,
    credential::CredentialHasher,
    repository::{
        Account, AccountRole, NewAccount, NewProfile, Profile, ProfileRole, Repository, Uid,
    },
    validation::{validate_email, validate_password},
};

/// Changes to apply to an existing profile. `None` leaves a field untouched; for the optional
/// text fields `Some(None)` clears the stored value.
#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub affiliation: Option<String>,
    pub role: Option<ProfileRole>,
    pub orcid: Option<Option<String>>,
    pub bio: Option<Option<String>>,
    pub avatar: Option<Option<String>>,
}

/// What a delete actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The person's researcher profile is gone. Any login they had still works.
    ProfileRemoved,
    /// An account without a profile was hidden from the roster.
    EntryHidden,
}

impl DeleteOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            DeleteOutcome::ProfileRemoved => {
                "The researcher profile was removed. Any linked login account was kept."
            }
            DeleteOutcome::EntryHidden => {
                "This account has no researcher profile and was hidden from the roster."
            }
        }
    }
}

/// What an id handed to [`ReconciliationEngine::delete_entity`] turned out to name.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteTarget {
    Profile(Profile),
    Account(Account),
    Missing,
}

/// The writes a delete will perform.
#[derive(Debug, Clone, PartialEq)]
pub enum DeletePlan {
    /// Remove the profile and clear every link pointing at it.
    RemoveProfile(Profile),
    /// Remove the profile `account` links to, then clear the link.
    Cascade { account: Account, profile: Uid },
    /// The account is the only trace of this person and may be their only login.
    Hide(Account),
    NotFound,
}

impl DeleteTarget {
    pub fn plan(self) -> DeletePlan {
        match self {
            DeleteTarget::Profile(profile) => DeletePlan::RemoveProfile(profile),
            DeleteTarget::Account(account) => match account.profile_ref() {
                Some(profile) => DeletePlan::Cascade { account, profile },
                None => DeletePlan::Hide(account),
            },
            DeleteTarget::Missing => DeletePlan::NotFound,
        }
    }
}

/// Orchestrates profile creation, update and deletion across both repositories.
#[derive(Clone)]
pub struct ReconciliationEngine {
    repo: Repository,
    hasher: Arc<dyn CredentialHasher>,
}

impl ReconciliationEngine {
    pub fn new(repo: Repository, hasher: Arc<dyn CredentialHasher>) -> Self {
        Self { repo, hasher }
    }

    /// Create a profile and link it to the account sharing its email, if any.
    ///
    /// With a password, the account is created when missing and its credential is set either
    /// way. Without one, an existing account is linked and left otherwise untouched.
    pub fn create_profile(&self, mut new: NewProfile, password: Option<&str>) -> Result<Profile> {
        new.email = validate_email(&new.email)?;
        let credential = self.hash_password(password)?;

        let profile = self.repo.profiles().insert(new)?;

        info!("Created profile {} <{}>", profile.id(), profile.email());

        self.reconcile_link(&profile, credential)?;

        Ok(profile)
    }

    /// Apply `patch` to a profile, then re-run the linking rules against its (possibly new)
    /// email.
    pub fn update_profile(
        &self,
        id: Uid,
        patch: ProfilePatch,
        password: Option<&str>,
    ) -> Result<Profile> {
        let profiles = self.repo.profiles();
        let mut profile = profiles.find_by_id(id)?.ok_or(Error::NotFound(id))?;

        let email = patch.email.as_deref().map(validate_email).transpose()?;
        let credential = self.hash_password(password)?;

        if let Some(email) = email {
            profile.email = email;
        }
        if let Some(full_name) = patch.full_name {
            profile.full_name = full_name;
        }
        if let Some(affiliation) = patch.affiliation {
            profile.affiliation = affiliation;
        }
        if let Some(role) = patch.role {
            profile.role = role;
        }
        if let Some(orcid) = patch.orcid {
            profile.orcid = orcid;
        }
        if let Some(bio) = patch.bio {
            profile.bio = bio;
        }
        if let Some(avatar) = patch.avatar {
            profile.avatar = avatar;
        }

        profiles.update(&profile)?;

        info!("Updated profile {} <{}>", profile.id(), profile.email());

        self.reconcile_link(&profile, credential)?;

        Ok(profile)
    }

    /// Delete whatever `id` names.
    ///
    /// Accounts are never removed. Deleting by a linked account's id removes the profile behind
    /// it; deleting a bare account only hides it, and doing so again is a no-op.
    pub fn delete_entity(&self, id: Uid) -> Result<DeleteOutcome> {
        let profiles = self.repo.profiles();
        let accounts = self.repo.accounts();

        match self.resolve(id)?.plan() {
            DeletePlan::RemoveProfile(profile) => {
                profiles.remove(&profile)?;
                self.unlink_all(profile.id())?;

                info!("Removed profile {} <{}>", profile.id(), profile.email());

                Ok(DeleteOutcome::ProfileRemoved)
            }
            DeletePlan::Cascade { account, profile } => {
                match profiles.find_by_id(profile)? {
                    Some(profile) => profiles.remove(&profile)?,
                    None => warn!(
                        "Account {} linked to missing profile {profile}, clearing the link",
                        account.id()
                    ),
                }
                self.unlink_all(profile)?;

                info!(
                    "Removed profile {profile} through its account {} <{}>",
                    account.id(),
                    account.email()
                );

                Ok(DeleteOutcome::ProfileRemoved)
            }
            DeletePlan::Hide(mut account) => {
                if account.hidden() {
                    debug!("Account {} is already hidden", account.id());
                } else {
                    accounts.hide(&mut account)?;

                    info!("Hid account {} <{}>", account.id(), account.email());
                }

                Ok(DeleteOutcome::EntryHidden)
            }
            DeletePlan::NotFound => Err(Error::NotFound(id)),
        }
    }

    /// Record an account created outside of profile management, e.g. by self-registration.
    pub fn register_account(
        &self,
        email: &str,
        password: &str,
        privileged: bool,
    ) -> Result<Account> {
        let email = validate_email(email)?;
        let credential = self.hash_password(Some(password))?.unwrap_or_default();

        let account = self.repo.accounts().insert(NewAccount {
            email,
            credential,
            role: AccountRole::Admin,
            privileged,
            profile_ref: None,
        })?;

        info!("Registered account {} <{}>", account.id(), account.email());

        Ok(account)
    }

    /// Overwrite the contribution count of a profile.
    pub fn set_contributions(&self, id: Uid, contributions: u64) -> Result<Profile> {
        let profiles = self.repo.profiles();
        let mut profile = profiles.find_by_id(id)?.ok_or(Error::NotFound(id))?;

        profile.contributions = contributions;
        profiles.update(&profile)?;

        info!("Set contributions of profile {id} to {contributions}");

        Ok(profile)
    }

    pub fn profile(&self, id: Uid) -> Result<Profile> {
        self.repo.profiles().find_by_id(id)?.ok_or(Error::NotFound(id))
    }

    pub fn account(&self, id: Uid) -> Result<Account> {
        self.repo.accounts().find_by_id(id)?.ok_or(Error::NotFound(id))
    }

    /// The account currently linked to a profile, if any.
    pub fn linked_account(&self, profile: Uid) -> Result<Option<Account>> {
        Ok(self.repo.accounts().linked_to(profile)?.into_iter().next())
    }

    fn resolve(&self, id: Uid) -> Result<DeleteTarget> {
        if let Some(profile) = self.repo.profiles().find_by_id(id)? {
            return Ok(DeleteTarget::Profile(profile));
        }

        if let Some(account) = self.repo.accounts().find_by_id(id)? {
            return Ok(DeleteTarget::Account(account));
        }

        Ok(DeleteTarget::Missing)
    }

    /// Point the account sharing `profile`'s email at `profile`, and nothing else.
    ///
    /// Stale links are cleared before the new one is written, so a failure in between leaves
    /// the profile unlinked rather than doubly linked.
    fn reconcile_link(&self, profile: &Profile, credential: Option<String>) -> Result<()> {
        let accounts = self.repo.accounts();

        let target = match (accounts.find_by_email(profile.email())?, credential) {
            (Some(mut account), Some(credential)) => {
                accounts.set_credential(&mut account, credential)?;
                Some(account)
            }
            (Some(account), None) => Some(account),
            (None, Some(credential)) => Some(accounts.insert(NewAccount {
                email: profile.email().clone(),
                credential,
                role: AccountRole::Admin,
                privileged: false,
                profile_ref: Some(profile.id()),
            })?),
            (None, None) => None,
        };
        let target_id = target.as_ref().map(Account::id);

        for mut stale in accounts.linked_to(profile.id())? {
            if Some(stale.id()) != target_id {
                accounts.unlink(&mut stale)?;
            }
        }

        let Some(mut account) = target else {
            debug!("Profile {} has no account to link", profile.id());
            return Ok(());
        };

        match account.profile_ref() {
            Some(current) if current == profile.id() => {}
            Some(previous) => {
                // Two profiles share this email; the most recent write wins the account
                warn!(
                    "Moving account {} <{}> from profile {previous} to profile {}",
                    account.id(),
                    account.email(),
                    profile.id()
                );
                accounts.link(&mut account, profile.id())?;
            }
            None => accounts.link(&mut account, profile.id())?,
        }

        Ok(())
    }

    fn unlink_all(&self, profile: Uid) -> Result<()> {
        let accounts = self.repo.accounts();
        for mut account in accounts.linked_to(profile)? {
            accounts.unlink(&mut account)?;
        }

        Ok(())
    }

    fn hash_password(&self, password: Option<&str>) -> Result<Option<String>> {
        let Some(password) = password else {
            return Ok(None);
        };

        validate_password(password, self.repo.cfg().read().min_password_len)?;

        self.hasher.hash(password).map(Some)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::credential::FakeHasher;

    fn engine() -> (ReconciliationEngine, Repository) {
        let repo = Repository::mock();
        (
            ReconciliationEngine::new(repo.clone(), Arc::new(FakeHasher)),
            repo,
        )
    }

    fn person(email: &str, full_name: &str) -> NewProfile {
        NewProfile {
            email: email.into(),
            full_name: full_name.into(),
            affiliation: "Institute of Physics".into(),
            ..NewProfile::default()
        }
    }

    #[test]
    fn test_create_with_password_provisions_account() {
        let (engine, repo) = engine();

        let profile = engine
            .create_profile(person("jane@x.org", "Jane Doe"), Some("secret1"))
            .unwrap();

        let accounts = repo.accounts().list().unwrap();
        assert_eq!(accounts.len(), 1);

        let account = accounts.first().unwrap();
        assert_eq!(account.email(), "jane@x.org");
        assert_eq!(account.profile_ref(), Some(profile.id()));
        assert_eq!(account.role(), AccountRole::Admin);
        assert!(!account.privileged());
        assert_eq!(account.credential, "fake$secret1");
    }

    #[test]
    fn test_create_links_existing_account_without_touching_credential() {
        let (engine, repo) = engine();
        let existing = engine
            .register_account("amin@x.org", "original", false)
            .unwrap();

        let profile = engine
            .create_profile(person("Amin@X.org", "Amin"), None)
            .unwrap();

        let account = repo.accounts().find_by_id(existing.id()).unwrap().unwrap();
        assert_eq!(profile.email(), "amin@x.org");
        assert_eq!(account.profile_ref(), Some(profile.id()));
        assert_eq!(account.credential, existing.credential);
        assert_eq!(repo.accounts().list().unwrap().len(), 1);
    }

    #[test]
    fn test_create_without_password_or_account_stays_unlinked() {
        let (engine, repo) = engine();

        let profile = engine
            .create_profile(person("new@x.org", "New Person"), None)
            .unwrap();

        assert!(repo.accounts().list().unwrap().is_empty());
        assert_eq!(engine.linked_account(profile.id()).unwrap(), None);
    }

    #[test]
    fn test_create_with_password_rotates_existing_credential() {
        let (engine, repo) = engine();
        let existing = engine
            .register_account("amin@x.org", "original", false)
            .unwrap();

        let profile = engine
            .create_profile(person("amin@x.org", "Amin"), Some("rotated"))
            .unwrap();

        let account = repo.accounts().find_by_id(existing.id()).unwrap().unwrap();
        assert_eq!(account.credential, "fake$rotated");
        assert_eq!(account.profile_ref(), Some(profile.id()));
    }

    #[test]
    fn test_create_validation() {
        let (engine, repo) = engine();

        assert!(matches!(
            engine.create_profile(person("", "Nobody"), None),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            engine.create_profile(person("jane@x.org", "Jane"), Some("short")),
            Err(Error::Validation(_))
        ));

        // Rejected input never reaches the repositories
        assert!(repo.profiles().list().unwrap().is_empty());
        assert!(repo.accounts().list().unwrap().is_empty());
    }

    #[test]
    fn test_relink_overwrites_previous_profile() {
        let (engine, repo) = engine();

        let first = engine
            .create_profile(person("shared@x.org", "First"), Some("secret1"))
            .unwrap();
        let second = engine
            .create_profile(person("shared@x.org", "Second"), Some("secret2"))
            .unwrap();

        let account = repo.accounts().find_by_email("shared@x.org").unwrap().unwrap();
        assert_eq!(account.profile_ref(), Some(second.id()));
        assert_eq!(engine.linked_account(first.id()).unwrap(), None);
        assert_eq!(repo.accounts().list().unwrap().len(), 1);
    }

    #[test]
    fn test_update_fields() {
        let (engine, _) = engine();
        let profile = engine
            .create_profile(
                NewProfile {
                    bio: Some("Works on lasers".into()),
                    ..person("jane@x.org", "Jane Doe")
                },
                None,
            )
            .unwrap();

        let updated = engine
            .update_profile(
                profile.id(),
                ProfilePatch {
                    full_name: Some("Jane Q. Doe".into()),
                    role: Some(ProfileRole::Editor),
                    bio: Some(None),
                    ..ProfilePatch::default()
                },
                None,
            )
            .unwrap();

        assert_eq!(updated.full_name(), "Jane Q. Doe");
        assert_eq!(updated.role(), ProfileRole::Editor);
        assert_eq!(updated.bio(), &None);
        assert_eq!(updated.affiliation(), profile.affiliation());
        assert_eq!(engine.profile(profile.id()).unwrap(), updated);
    }

    #[test]
    fn test_update_rotates_linked_credential() {
        let (engine, repo) = engine();
        let profile = engine
            .create_profile(person("jane@x.org", "Jane Doe"), Some("secret1"))
            .unwrap();

        engine
            .update_profile(profile.id(), ProfilePatch::default(), Some("secret2"))
            .unwrap();

        let account = repo.accounts().find_by_email("jane@x.org").unwrap().unwrap();
        assert_eq!(account.credential, "fake$secret2");
        assert_eq!(account.profile_ref(), Some(profile.id()));
    }

    #[test]
    fn test_update_email_moves_link() {
        let (engine, repo) = engine();
        let profile = engine
            .create_profile(person("old@x.org", "Jane Doe"), Some("secret1"))
            .unwrap();
        let other = engine.register_account("new@x.org", "secret9", false).unwrap();

        engine
            .update_profile(
                profile.id(),
                ProfilePatch {
                    email: Some("New@X.org".into()),
                    ..ProfilePatch::default()
                },
                None,
            )
            .unwrap();

        let old = repo.accounts().find_by_email("old@x.org").unwrap().unwrap();
        let new = repo.accounts().find_by_id(other.id()).unwrap().unwrap();
        assert_eq!(old.profile_ref(), None);
        assert_eq!(new.profile_ref(), Some(profile.id()));
        assert_eq!(repo.accounts().linked_to(profile.id()).unwrap(), vec![new]);
    }

    #[test]
    fn test_update_email_without_match_unlinks() {
        let (engine, repo) = engine();
        let profile = engine
            .create_profile(person("old@x.org", "Jane Doe"), Some("secret1"))
            .unwrap();

        engine
            .update_profile(
                profile.id(),
                ProfilePatch {
                    email: Some("elsewhere@x.org".into()),
                    ..ProfilePatch::default()
                },
                None,
            )
            .unwrap();

        let old = repo.accounts().find_by_email("old@x.org").unwrap().unwrap();
        assert_eq!(old.profile_ref(), None);
        assert_eq!(engine.linked_account(profile.id()).unwrap(), None);
    }

    #[test]
    fn test_update_email_with_password_provisions_new_account() {
        let (engine, repo) = engine();
        let profile = engine
            .create_profile(person("old@x.org", "Jane Doe"), Some("secret1"))
            .unwrap();

        engine
            .update_profile(
                profile.id(),
                ProfilePatch {
                    email: Some("fresh@x.org".into()),
                    ..ProfilePatch::default()
                },
                Some("secret2"),
            )
            .unwrap();

        let old = repo.accounts().find_by_email("old@x.org").unwrap().unwrap();
        assert_eq!(old.profile_ref(), None);
        assert_eq!(old.credential, "fake$secret1");

        let new = repo.accounts().find_by_email("fresh@x.org").unwrap().unwrap();
        assert_eq!(new.profile_ref(), Some(profile.id()));
        assert_eq!(new.credential, "fake$secret2");

        assert_eq!(repo.accounts().linked_to(profile.id()).unwrap(), vec![new]);
        assert_eq!(repo.accounts().list().unwrap().len(), 2);
    }

    #[test]
    fn test_update_validation() {
        let (engine, repo) = engine();
        let profile = engine
            .create_profile(person("jane@x.org", "Jane Doe"), Some("secret1"))
            .unwrap();
        let account = engine.linked_account(profile.id()).unwrap().unwrap();

        assert!(matches!(
            engine.update_profile(
                profile.id(),
                ProfilePatch {
                    email: Some("not-an-email".into()),
                    full_name: Some("Renamed".into()),
                    ..ProfilePatch::default()
                },
                None,
            ),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            engine.update_profile(
                profile.id(),
                ProfilePatch {
                    full_name: Some("Renamed".into()),
                    ..ProfilePatch::default()
                },
                Some("short"),
            ),
            Err(Error::Validation(_))
        ));

        assert_eq!(engine.profile(profile.id()).unwrap(), profile);
        assert_eq!(engine.account(account.id()).unwrap(), account);
        assert_eq!(account.credential, "fake$secret1");
        assert_eq!(repo.accounts().list().unwrap().len(), 1);
    }

    #[test]
    fn test_update_after_concurrent_delete() {
        let (engine, repo) = engine();
        let stale = engine
            .create_profile(person("jane@x.org", "Jane Doe"), None)
            .unwrap();

        engine.delete_entity(stale.id()).unwrap();
        let account = engine.register_account("amin@x.org", "secret1", false).unwrap();

        assert!(matches!(
            repo.profiles().update(&stale).map_err(Error::from),
            Err(Error::NotFound(id)) if id == stale.id()
        ));
        assert_eq!(engine.account(account.id()).unwrap(), account);
        assert!(matches!(
            engine.update_profile(stale.id(), ProfilePatch::default(), None),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_update_unknown_id() {
        let (engine, _) = engine();

        assert!(matches!(
            engine.update_profile(Uid::from(99), ProfilePatch::default(), None),
            Err(Error::NotFound(id)) if id == Uid::from(99)
        ));
    }

    #[test]
    fn test_delete_profile_keeps_account() {
        let (engine, repo) = engine();
        let profile = engine
            .create_profile(person("jane@x.org", "Jane Doe"), Some("secret1"))
            .unwrap();

        assert_eq!(
            engine.delete_entity(profile.id()).unwrap(),
            DeleteOutcome::ProfileRemoved
        );

        let account = repo.accounts().find_by_email("jane@x.org").unwrap().unwrap();
        assert_eq!(account.profile_ref(), None);
        assert!(!account.hidden());
        assert!(repo.profiles().list().unwrap().is_empty());
    }

    #[test]
    fn test_delete_linked_account_cascades() {
        let (engine, repo) = engine();
        let profile = engine
            .create_profile(person("jane@x.org", "Jane Doe"), Some("secret1"))
            .unwrap();
        let account = engine.linked_account(profile.id()).unwrap().unwrap();

        assert_eq!(
            engine.delete_entity(account.id()).unwrap(),
            DeleteOutcome::ProfileRemoved
        );

        let account = engine.account(account.id()).unwrap();
        assert_eq!(account.profile_ref(), None);
        assert!(matches!(
            engine.profile(profile.id()),
            Err(Error::NotFound(_))
        ));
        assert!(repo.profiles().list().unwrap().is_empty());
    }

    #[test]
    fn test_delete_bare_account_hides_and_is_idempotent() {
        let (engine, _) = engine();
        let account = engine.register_account("amin@x.org", "secret1", false).unwrap();

        assert_eq!(
            engine.delete_entity(account.id()).unwrap(),
            DeleteOutcome::EntryHidden
        );
        assert!(engine.account(account.id()).unwrap().hidden());

        assert_eq!(
            engine.delete_entity(account.id()).unwrap(),
            DeleteOutcome::EntryHidden
        );
    }

    #[test]
    fn test_delete_unknown_id() {
        let (engine, _) = engine();

        assert!(matches!(
            engine.delete_entity(Uid::from(7)),
            Err(Error::NotFound(id)) if id == Uid::from(7)
        ));
    }

    #[test]
    fn test_delete_plan() {
        let (engine, _) = engine();
        let profile = engine
            .create_profile(person("jane@x.org", "Jane Doe"), Some("secret1"))
            .unwrap();
        let linked = engine.linked_account(profile.id()).unwrap().unwrap();
        let bare = engine.register_account("root@x.org", "secret1", true).unwrap();

        assert_eq!(
            DeleteTarget::Profile(profile.clone()).plan(),
            DeletePlan::RemoveProfile(profile.clone())
        );
        assert_eq!(
            DeleteTarget::Account(linked.clone()).plan(),
            DeletePlan::Cascade {
                account: linked,
                profile: profile.id()
            }
        );
        assert_eq!(
            DeleteTarget::Account(bare.clone()).plan(),
            DeletePlan::Hide(bare)
        );
        assert_eq!(DeleteTarget::Missing.plan(), DeletePlan::NotFound);
    }

    #[test]
    fn test_set_contributions() {
        let (engine, _) = engine();
        let profile = engine
            .create_profile(person("jane@x.org", "Jane Doe"), None)
            .unwrap();

        engine.set_contributions(profile.id(), 17).unwrap();

        assert_eq!(engine.profile(profile.id()).unwrap().contributions(), 17);
        assert!(matches!(
            engine.set_contributions(Uid::from(1000), 1),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_concurrent_creates_leave_one_account() {
        let (engine, repo) = engine();

        let results: Vec<Result<Profile>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let engine = &engine;
                    s.spawn(move || {
                        engine.create_profile(
                            person("race@x.org", &format!("Racer {i}")),
                            Some("secret1"),
                        )
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect()
        });

        for result in &results {
            assert!(matches!(result, Ok(_) | Err(Error::Conflict(_))));
        }
        assert!(results.iter().any(Result::is_ok));

        let accounts = repo.accounts().list().unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts.first().unwrap().email(), "race@x.org");
    }
}
