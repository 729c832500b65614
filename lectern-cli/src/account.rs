use clap::Subcommand;
use colored::Colorize;
use lectern_lib::{ReconciliationEngine, Result, Uid};

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Register a login account without a profile
    Add {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Mark the account as a super-level account kept off the roster
        #[arg(long)]
        privileged: bool,
    },
    /// Show an account
    Show { id: u64 },
}

pub fn handle(engine: &ReconciliationEngine, cmd: &Command) -> Result<()> {
    let account = match cmd {
        Command::Add {
            email,
            password,
            privileged,
        } => {
            let account = engine.register_account(email, password, *privileged)?;
            println!("Registered account {}", account.id().to_string().bold());
            account
        }
        Command::Show { id } => engine.account(Uid::from(*id))?,
    };

    println!("{} <{}>", account.id().to_string().dimmed(), account.email());
    println!("  role:       {}", account.role());
    println!("  privileged: {}", account.privileged());
    println!("  hidden:     {}", account.hidden());
    match account.profile_ref() {
        Some(profile) => println!("  profile:    {profile}"),
        None => println!("  profile:    {}", "none".dimmed()),
    }

    Ok(())
}
