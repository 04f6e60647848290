//! `keel project create|get|list|delete`

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tabled::{settings::Style, Table, Tabled};

use keel_core::{ProjectId, ProjectName, ProjectView, UserId};

use super::{print_envelope, Services};

#[derive(Subcommand, Debug)]
pub enum ProjectCommand {
    /// Create a project and provision its repository.
    Create(CreateArgs),

    /// Show one project by id or name.
    Get(GetArgs),

    /// List the projects visible to the caller.
    List(ListArgs),

    /// Delete a project and its repository.
    Delete(DeleteArgs),
}

/// The user a request is made on behalf of.
#[derive(Args, Debug)]
pub struct Caller {
    #[arg(long = "as", value_name = "USER")]
    pub caller: String,
}

impl Caller {
    fn id(&self) -> UserId {
        UserId::from(self.caller.as_str())
    }
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Unique project name.
    pub name: String,

    #[command(flatten)]
    pub caller: Caller,
}

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Project id, or its name.
    pub project: String,

    #[command(flatten)]
    pub caller: Caller,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub caller: Caller,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Project id.
    pub id: String,

    #[command(flatten)]
    pub caller: Caller,
}

pub async fn run(cmd: ProjectCommand) -> Result<()> {
    let services = Services::load()?;
    match cmd {
        ProjectCommand::Create(args) => create(&services, args).await,
        ProjectCommand::Get(args) => get(&services, args).await,
        ProjectCommand::List(args) => list(&services, args).await,
        ProjectCommand::Delete(args) => delete(&services, args).await,
    }
}

async fn create(services: &Services, args: CreateArgs) -> Result<()> {
    let view = services
        .coordinator()
        .create(&args.caller.id(), &ProjectName::from(args.name.as_str()))
        .await
        .with_context(|| format!("failed to create project '{}'", args.name))?;

    println!("✓ Created project '{}' ({})", view.name, view.id);
    Ok(())
}

async fn get(services: &Services, args: GetArgs) -> Result<()> {
    let view = services
        .coordinator()
        .find_one(&args.caller.id(), &args.project)
        .await
        .with_context(|| format!("failed to look up project '{}'", args.project))?;

    if args.json {
        return print_envelope(&view);
    }

    println!("id:      {}", view.id);
    println!("name:    {}", view.name);
    if let Some(owner) = &view.owner_id {
        println!("owner:   {owner}");
    }
    println!("created: {}", view.created_at.to_rfc3339());
    Ok(())
}

#[derive(Tabled)]
struct ProjectRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "owner")]
    owner: String,
    #[tabled(rename = "created")]
    created: String,
}

impl From<&ProjectView> for ProjectRow {
    fn from(view: &ProjectView) -> Self {
        Self {
            id: view.id.to_string(),
            name: view.name.to_string(),
            owner: view
                .owner_id
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "-".to_string()),
            created: view.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

async fn list(services: &Services, args: ListArgs) -> Result<()> {
    let views = services
        .coordinator()
        .list_all(&args.caller.id())
        .await
        .context("failed to list projects")?;

    if args.json {
        return print_envelope(&views);
    }

    if views.is_empty() {
        println!("No projects.");
        return Ok(());
    }

    let mut table = Table::new(views.iter().map(ProjectRow::from));
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

async fn delete(services: &Services, args: DeleteArgs) -> Result<()> {
    let view = services
        .coordinator()
        .delete(&args.caller.id(), &ProjectId::from(args.id.as_str()))
        .await
        .with_context(|| format!("failed to delete project '{}'", args.id))?;

    println!("✓ Deleted project '{}' ({})", view.name, view.id);
    Ok(())
}
