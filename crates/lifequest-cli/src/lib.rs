//! Admin and inspection command surface for the LifeQuest store.
//!
//! Host tooling should drive the backend through:
//! - [`run_cli`] for full parsed CLI execution.
//! - [`run_command`] for direct command execution against a [`QuestApi`].

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use lifequest_core::CompletionInput;
use lifequest_store_sqlite::{MissionInput, QuestApi};

#[derive(Debug, Parser)]
#[command(name = "lq")]
#[command(about = "LifeQuest progression backend CLI")]
pub struct Cli {
    #[arg(long, default_value = "./lifequest.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Apply the schema and report its version.
    Migrate,
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
    Life {
        #[command(subcommand)]
        command: LifeCommand,
    },
    Mission {
        #[command(subcommand)]
        command: MissionCommand,
    },
    Complete(CompleteArgs),
    Profile(UserIdArgs),
    Rewards(UserIdArgs),
    Completions(UserIdArgs),
}

#[derive(Debug, Subcommand)]
pub enum UserCommand {
    Add(UserAddArgs),
}

#[derive(Debug, Args)]
pub struct UserAddArgs {
    #[arg(long)]
    username: String,
}

#[derive(Debug, Subcommand)]
pub enum LifeCommand {
    Add(LifeAddArgs),
}

#[derive(Debug, Args)]
pub struct LifeAddArgs {
    #[arg(long)]
    name: String,
}

#[derive(Debug, Subcommand)]
pub enum MissionCommand {
    Add(MissionAddArgs),
    List(UserIdArgs),
}

#[derive(Debug, Args)]
pub struct MissionAddArgs {
    #[arg(long)]
    life_id: i64,
    #[arg(long)]
    level_number: u32,
    #[arg(long)]
    title: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long, default_value_t = 10)]
    points: i64,
}

#[derive(Debug, Args)]
pub struct CompleteArgs {
    #[arg(long)]
    user_id: i64,
    #[arg(long)]
    mission_id: i64,
    #[arg(long)]
    photo_url: Option<String>,
}

#[derive(Debug, Args)]
pub struct UserIdArgs {
    #[arg(long)]
    user_id: i64,
}

/// Executes the parsed top-level CLI command graph.
///
/// # Errors
/// Returns an error when store open, schema bootstrap, or command
/// execution fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    let api = QuestApi::new(cli.db);
    run_command(cli.command, &api)
}

/// Executes a parsed command against an existing API handle.
///
/// # Errors
/// Returns an error when validation, persistence, or retrieval fails.
pub fn run_command(command: Command, api: &QuestApi) -> Result<()> {
    match command {
        Command::Migrate => {
            let status = api.migrate()?;
            print_json(&status)
        }
        Command::User { command } => match command {
            UserCommand::Add(args) => {
                let user = api.add_user(&args.username)?;
                print_json(&user)
            }
        },
        Command::Life { command } => match command {
            LifeCommand::Add(args) => {
                let life = api.add_life(&args.name)?;
                print_json(&life)
            }
        },
        Command::Mission { command } => match command {
            MissionCommand::Add(args) => {
                let mission = api.add_mission(&MissionInput {
                    life_id: args.life_id,
                    level_number: args.level_number,
                    title: args.title,
                    description: args.description,
                    points: args.points,
                })?;
                print_json(&mission)
            }
            MissionCommand::List(args) => {
                let available = api.available_missions(args.user_id)?;
                print_json(&available)
            }
        },
        Command::Complete(args) => {
            let outcome = api.complete_mission(&CompletionInput {
                user_id: args.user_id,
                mission_id: args.mission_id,
                user_photo_url: args.photo_url,
            })?;
            print_json(&outcome)
        }
        Command::Profile(args) => {
            let profile = api.profile(args.user_id)?;
            print_json(&profile)
        }
        Command::Rewards(args) => {
            let rewards = api.rewards(args.user_id)?;
            print_json(&rewards)
        }
        Command::Completions(args) => {
            let completions = api.completions(args.user_id)?;
            print_json(&completions)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
