//! `keel user add`

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use keel_core::User;

use super::Services;

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Register a user, or update their admin flag.
    Add(AddArgs),
}

#[derive(Args, Debug)]
pub struct AddArgs {
    pub id: String,

    /// Grant access to every project.
    #[arg(long)]
    pub admin: bool,
}

pub fn run(cmd: UserCommand) -> Result<()> {
    match cmd {
        UserCommand::Add(args) => add(args),
    }
}

fn add(args: AddArgs) -> Result<()> {
    let services = Services::load()?;
    let user = User::new(args.id.as_str(), args.admin);
    services
        .store
        .upsert_user(&user)
        .with_context(|| format!("failed to register user '{}'", user.id))?;

    let role = if user.is_admin { "admin" } else { "member" };
    println!("✓ Registered user '{}' ({role})", user.id);
    Ok(())
}
