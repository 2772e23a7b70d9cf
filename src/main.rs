use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use page_pilot::brain::Brain;
use page_pilot::{Config, Profile, Store, logging, rules};
use serde::Serialize;

/// Manage page pilot's stored data and try commands without a browser.
#[derive(Parser)]
#[command(name = "page-pilot", version, about)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Language-model settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Autofill profile
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Recently submitted commands, oldest first
    History {
        /// Only show the last N entries
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Show which rule, if any, a command triggers
    Match {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Ask the model for a plan without executing it
    Plan {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,

        /// Endpoint to ask instead of the stored one
        #[arg(long)]
        endpoint: Option<String>,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    Show,
    Set {
        /// Send commands the rules miss to the model
        #[arg(long)]
        use_model: Option<bool>,

        #[arg(long)]
        endpoint: Option<String>,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    Show,
    /// Update the given fields; an empty value clears a field
    Set {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        address: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    logging::init("warn");

    let store = cli.config.open_store()?;
    match cli.command {
        Commands::Settings { action } => settings(&store, action),
        Commands::Profile { action } => profile(&store, action),
        Commands::History { limit } => {
            let history = store.history()?;
            let skip = limit.map_or(0, |n| history.len().saturating_sub(n));
            for entry in &history[skip..] {
                println!("{}  {}", entry.timestamp, entry.command);
            }
            Ok(())
        }
        Commands::Match { text } => {
            match rules::match_command(&text.join(" ")) {
                Some(action) => print_json(&action)?,
                None => println!("no rule matches"),
            }
            Ok(())
        }
        Commands::Plan { text, endpoint } => {
            let endpoint = match endpoint {
                Some(endpoint) => endpoint,
                None => store.load_settings()?.model_endpoint,
            };
            let brain = Brain::new(cli.config.model.clone(), cli.config.model_timeout());
            let plan = brain.get_plan(&text.join(" "), &endpoint).await?;
            print_json(&plan)
        }
    }
}

fn settings(store: &Store, action: SettingsAction) -> Result<()> {
    let mut settings = store.load_settings()?;
    if let SettingsAction::Set {
        use_model,
        endpoint,
    } = action
    {
        if let Some(use_model) = use_model {
            settings.use_language_model = use_model;
        }
        if let Some(endpoint) = endpoint {
            settings.model_endpoint = endpoint;
        }
        store.save_settings(&settings)?;
    }
    print_json(&settings)
}

fn profile(store: &Store, action: ProfileAction) -> Result<()> {
    let mut profile = store.load_profile()?;
    if let ProfileAction::Set {
        name,
        email,
        phone,
        address,
    } = action
    {
        apply_field(&mut profile.name, name);
        apply_field(&mut profile.email, email);
        apply_field(&mut profile.phone, phone);
        apply_field(&mut profile.address, address);
        store.save_profile(&profile)?;
    }
    if profile.is_empty() {
        eprintln!("profile is empty, form filling is disabled");
    }
    print_json::<Profile>(&profile)
}

fn apply_field(field: &mut Option<String>, update: Option<String>) {
    if let Some(value) = update {
        let value = value.trim();
        *field = (!value.is_empty()).then(|| value.to_string());
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
