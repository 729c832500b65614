//! The public roster.
//!
//! Built from scratch on every call by merging profiles with the admin accounts that have no
//! profile of their own. Profiles take precedence: an account whose email matches a profile is
//! represented by that profile. Nothing is cached, so a roster read concurrently with a write
//! may briefly show an account before its profile appears.

use std::collections::HashSet;

use getset::{CopyGetters, Getters};
use tracing::{trace, warn};

use crate::{
    Result,
    repository::{Account, Profile, Repository, Uid},
    validation::{local_part, normalize_email},
};

/// Role label given to entries synthesized from an account.
const PLACEHOLDER_ROLE: &str = "Admin";

/// Which record an entry was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySource {
    Profile(Uid),
    Account(Uid),
}

/// A single display-ready roster row.
#[derive(Debug, Clone, PartialEq, Getters, CopyGetters)]
pub struct DisplayEntry {
    #[getset(get = "pub")]
    email: String,
    #[getset(get = "pub")]
    name: String,
    #[getset(get = "pub")]
    role_label: String,
    #[getset(get = "pub")]
    affiliation: String,
    #[getset(get_copy = "pub")]
    contributions: u64,
    #[getset(get = "pub")]
    avatar: String,
    #[getset(get_copy = "pub")]
    source: EntrySource,
}

impl DisplayEntry {
    fn from_profile(profile: &Profile, email: String, default_avatar: &str) -> Self {
        Self {
            email,
            name: profile.full_name().clone(),
            role_label: profile.role().to_string(),
            affiliation: profile.affiliation().clone(),
            contributions: profile.contributions(),
            avatar: profile
                .avatar()
                .clone()
                .unwrap_or_else(|| default_avatar.to_string()),
            source: EntrySource::Profile(profile.id()),
        }
    }

    fn placeholder(account: &Account, email: String, default_avatar: &str) -> Self {
        Self {
            name: local_part(&email).to_string(),
            email,
            role_label: PLACEHOLDER_ROLE.into(),
            affiliation: String::new(),
            contributions: 0,
            avatar: default_avatar.to_string(),
            source: EntrySource::Account(account.id()),
        }
    }
}

/// Builds the roster from both repositories.
#[derive(Debug, Clone)]
pub struct ListingProjector {
    repo: Repository,
}

impl ListingProjector {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Profiles first, oldest first, then placeholders for visible profile-less admin accounts.
    /// No two entries share an email.
    pub fn merge_for_listing(&self) -> Result<Vec<DisplayEntry>> {
        let profiles = self.repo.profiles().list()?;
        let accounts = self.repo.accounts().list()?;
        let default_avatar = self.repo.cfg().read().default_avatar.clone();

        Ok(merge(&profiles, &accounts, &default_avatar))
    }
}

/// Merge already-loaded profiles and accounts into a roster. Both slices are expected in
/// ascending id order.
pub fn merge(
    profiles: &[Profile],
    accounts: &[Account],
    default_avatar: &str,
) -> Vec<DisplayEntry> {
    let mut indexed = HashSet::new();
    let mut entries = Vec::with_capacity(profiles.len());

    for profile in profiles {
        let email = normalize_email(profile.email());
        // With several profiles on one email, the oldest represents it
        if indexed.insert(email.clone()) {
            entries.push(DisplayEntry::from_profile(profile, email, default_avatar));
        }
    }

    let placeholders = accounts
        .iter()
        .filter(|account| account.is_listable_admin())
        .filter_map(|account| {
            let email = normalize_email(account.email());
            if indexed.contains(&email) {
                return None;
            }

            // A privileged account nobody linked is infrastructure, not a person
            if account.privileged() && account.profile_ref().is_none() {
                trace!("Leaving privileged account {} off the roster", account.id());
                return None;
            }

            Some(DisplayEntry::placeholder(account, email, default_avatar))
        })
        .collect::<Vec<_>>();
    entries.extend(placeholders);

    let mut seen = HashSet::new();
    entries.retain(|entry| {
        let fresh = seen.insert(entry.email.clone());
        if !fresh {
            warn!("Dropping duplicate roster entry for <{}>", entry.email);
        }
        fresh
    });

    entries
}
