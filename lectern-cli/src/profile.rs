use clap::{Args, Subcommand};
use colored::Colorize;
use lectern_lib::{
    NewProfile, Profile, ProfilePatch, ProfileRole, ReconciliationEngine, Result, Uid,
};

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create a profile, optionally provisioning a login for it
    Add {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[command(flatten)]
        details: Details,
        /// Create or rotate the login account for this email
        #[arg(long)]
        password: Option<String>,
    },
    /// Change a profile, re-linking its login account if the email changes
    Update {
        id: u64,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[command(flatten)]
        details: Details,
        #[command(flatten)]
        clear: Clear,
        /// Rotate the login account's password
        #[arg(long)]
        password: Option<String>,
    },
    /// Set the contribution count of a profile
    Contributions { id: u64, count: u64 },
    /// Show a profile and the account linked to it
    Show { id: u64 },
}

#[derive(Args, Debug, Clone)]
pub struct Details {
    #[arg(long)]
    affiliation: Option<String>,
    #[arg(long, value_enum)]
    role: Option<ProfileRole>,
    #[arg(long)]
    orcid: Option<String>,
    #[arg(long)]
    bio: Option<String>,
    #[arg(long)]
    avatar: Option<String>,
}

/// Drop optional details from an existing profile.
#[derive(Args, Debug, Clone, Default)]
pub struct Clear {
    #[arg(long, conflicts_with = "orcid")]
    clear_orcid: bool,
    #[arg(long, conflicts_with = "bio")]
    clear_bio: bool,
    #[arg(long, conflicts_with = "avatar")]
    clear_avatar: bool,
}

pub fn handle(engine: &ReconciliationEngine, cmd: &Command) -> Result<()> {
    match cmd {
        Command::Add {
            email,
            name,
            details,
            password,
        } => {
            let details = details.clone();
            let profile = engine.create_profile(
                NewProfile {
                    email: email.clone(),
                    full_name: name.clone(),
                    affiliation: details.affiliation.unwrap_or_default(),
                    role: details.role.unwrap_or_default(),
                    orcid: details.orcid,
                    bio: details.bio,
                    avatar: details.avatar,
                    ..NewProfile::default()
                },
                password.as_deref(),
            )?;
            println!("Created profile {}", profile.id().to_string().bold());
            print(engine, &profile)
        }
        Command::Update {
            id,
            email,
            name,
            details,
            clear,
            password,
        } => {
            let details = details.clone();
            let profile = engine.update_profile(
                Uid::from(*id),
                ProfilePatch {
                    email: email.clone(),
                    full_name: name.clone(),
                    affiliation: details.affiliation,
                    role: details.role,
                    orcid: optional_change(details.orcid, clear.clear_orcid),
                    bio: optional_change(details.bio, clear.clear_bio),
                    avatar: optional_change(details.avatar, clear.clear_avatar),
                },
                password.as_deref(),
            )?;
            print(engine, &profile)
        }
        Command::Contributions { id, count } => {
            let profile = engine.set_contributions(Uid::from(*id), *count)?;
            print(engine, &profile)
        }
        Command::Show { id } => print(engine, &engine.profile(Uid::from(*id))?),
    }
}

/// A new value, an explicit clear, or no change at all.
fn optional_change(value: Option<String>, clear: bool) -> Option<Option<String>> {
    if clear { Some(None) } else { value.map(Some) }
}

fn print(engine: &ReconciliationEngine, profile: &Profile) -> Result<()> {
    println!(
        "{} {} <{}>",
        profile.id().to_string().dimmed(),
        profile.full_name().bold(),
        profile.email()
    );
    println!("  role:          {}", profile.role());
    println!("  affiliation:   {}", profile.affiliation());
    if let Some(orcid) = profile.orcid() {
        println!("  orcid:         {orcid}");
    }
    println!("  joined:        {}", profile.joined_at().format("%Y-%m-%d"));
    println!("  contributions: {}", profile.contributions());

    match engine.linked_account(profile.id())? {
        Some(account) => println!("  account:       {}", account.id()),
        None => println!("  account:       {}", "none".dimmed()),
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use clap::Parser;

    use super::*;

    #[derive(Parser, Debug)]
    struct Harness {
        #[command(subcommand)]
        command: Command,
    }

    fn parse(args: &[&str]) -> std::result::Result<Command, clap::Error> {
        Harness::try_parse_from(std::iter::once("lectern").chain(args.iter().copied()))
            .map(|harness| harness.command)
    }

    #[test]
    fn test_optional_change() {
        assert_eq!(optional_change(None, false), None);
        assert_eq!(
            optional_change(Some("/a.png".into()), false),
            Some(Some("/a.png".into()))
        );
        assert_eq!(optional_change(None, true), Some(None));
    }

    #[test]
    fn test_update_clear_flags() {
        let Command::Update { clear, details, .. } =
            parse(&["update", "4", "--clear-bio", "--orcid", "0000-0002-1825-0097"]).unwrap()
        else {
            panic!("expected an update command");
        };

        assert!(clear.clear_bio);
        assert!(!clear.clear_orcid);
        assert_eq!(
            optional_change(details.orcid, clear.clear_orcid),
            Some(Some("0000-0002-1825-0097".into()))
        );
        assert_eq!(optional_change(details.bio, clear.clear_bio), Some(None));
    }

    #[test]
    fn test_clear_conflicts_with_value() {
        assert!(parse(&["update", "4", "--clear-avatar", "--avatar", "/a.png"]).is_err());
    }
}
