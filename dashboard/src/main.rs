//! Bit2Bit fleet dashboard
//!
//! Interactive terminal front-end over the session client. The session is
//! kept in a directory of JSON files, so it survives restarts and is shared
//! by every dashboard started against the same directory.
//!
//! ## Usage
//!
//! ```bash
//! B2B_BASE_URL=https://api.example.com cargo run -p bit2bit-dashboard
//! ```
//!
//! Settings are read from the environment (and a `.env` file if present):
//! `B2B_BASE_URL`, `B2B_STORAGE_KEY`, `B2B_RENEWAL_MARGIN_SECS`,
//! `B2B_REQUEST_TIMEOUT_SECS`, and `B2B_SESSION_DIR` for the session
//! directory (default `.bit2bit`).

mod command;

use anyhow::Context;
use bit2bit_client::{
    AuthError, ClientConfig, FileStorage, FleetApi, FleetError, SessionClient,
};
use command::Command;
use std::io::{self, Write};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_SESSION_DIR: &str = ".bit2bit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bit2bit_dashboard=info,bit2bit_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let config = ClientConfig::from_env().context("invalid configuration")?;
    let session_dir =
        std::env::var("B2B_SESSION_DIR").unwrap_or_else(|_| DEFAULT_SESSION_DIR.to_string());
    let storage = FileStorage::open(&session_dir)
        .await
        .with_context(|| format!("cannot use session directory {session_dir}"))?;

    tracing::info!(base_url = %config.base_url, session_dir = %session_dir, "Starting dashboard");
    let client = SessionClient::new(config, storage).context("cannot create session client")?;
    let fleet = FleetApi::new(client);

    println!("=== Bit2Bit Fleet Dashboard ===");
    if fleet.client().restore().await {
        print_status(fleet.client());
    } else {
        println!("Not signed in. Use 'login <email>'.");
    }
    println!("Type 'help' for commands.\n");

    loop {
        print!("b2b> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }

        let command = match command::parse(&input) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                eprintln!("{message}");
                continue;
            },
        };

        if command == Command::Quit {
            break;
        }
        run(&fleet, command).await?;
    }

    println!("Goodbye!");
    Ok(())
}

async fn run(fleet: &FleetApi<FileStorage>, command: Command) -> anyhow::Result<()> {
    let client = fleet.client();
    let result = match command {
        Command::Login { email } => {
            let password = prompt("Password: ")?;
            match client.sign_in(&email, &password).await {
                Ok(()) => print_status(client),
                Err(AuthError::InvalidCredentials { message, .. }) => {
                    eprintln!("Sign-in failed: {message}");
                },
                Err(e) => eprintln!("Sign-in failed: {e}"),
            }
            return Ok(());
        },
        Command::Logout => {
            client.sign_out().await;
            println!("Signed out.");
            return Ok(());
        },
        Command::Status => {
            print_status(client);
            return Ok(());
        },
        Command::Help => {
            println!("{}", command::HELP);
            return Ok(());
        },
        Command::Quit => return Ok(()),
        Command::Plants { page } => fleet.plants(page).await,
        Command::PlantCount => fleet.plant_count().await,
        Command::InverterCount => fleet.inverter_count().await,
        Command::EstateTotals { estate_id } => fleet.estate_totals(&estate_id).await,
        Command::Offline { estate_id } => fleet.offline_plants(&estate_id).await,
        Command::EstatePlants { page, page_size } => {
            fleet.estate_plants(page, page_size).await
        },
    };

    match result {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(FleetError::Auth(e)) if e.requires_sign_in() => {
            eprintln!("Session ended ({}). Please 'login' again.", e.reason());
        },
        Err(e) => eprintln!("Request failed: {e}"),
    }
    Ok(())
}

fn print_status(client: &SessionClient<FileStorage>) {
    match client.session_snapshot() {
        Some(session) => println!(
            "Signed in as {} (token valid until {})",
            session.user_email,
            session.token_expiry.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("Not signed in."),
    }
}

fn prompt(label: &str) -> io::Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
