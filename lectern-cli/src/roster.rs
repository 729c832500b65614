use colored::Colorize;
use lectern_lib::{EntrySource, ListingProjector, Result};

pub fn handle(projector: &ListingProjector) -> Result<()> {
    for entry in projector.merge_for_listing()? {
        let source = match entry.source() {
            EntrySource::Profile(id) => format!("profile {id}"),
            EntrySource::Account(id) => format!("account {id}"),
        };
        println!(
            "{} <{}> {} {} contributions {}",
            entry.name().bold(),
            entry.email(),
            entry.role_label().cyan(),
            entry.contributions(),
            format!("({source})").dimmed()
        );
    }

    Ok(())
}
