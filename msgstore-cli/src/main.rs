use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use msgstore_core::{
    config::Config,
    logging::{init_logging_with_config, LogConfig},
    AccountAddress, AccountKeypair, LocalHost, StoreError,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "msgstore")]
#[command(author, version, about = "Per-account message store", long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// TOML configuration file (defaults to MSGSTORE_* environment variables)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the state directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new account key file
    Keygen {
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Print the address controlled by a key file
    Address {
        #[arg(short, long)]
        key: PathBuf,
    },
    /// Set the message of the key's own account
    Set {
        #[arg(short, long)]
        key: PathBuf,
        message: String,
    },
    /// Print the message stored for an account
    Get { address: String },
    /// Print change events as JSON lines
    Events {
        #[arg(short, long)]
        account: Option<String>,
    },
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::from_env()?,
    };

    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    if let Some(data_dir) = &args.data_dir {
        config.store.data_dir = data_dir.clone();
    }

    config.validate()?;
    Ok(config)
}

fn run(args: Args, config: Config) -> Result<ExitCode> {
    match args.command {
        Command::Keygen { out } => {
            let keypair = AccountKeypair::generate();
            keypair.save(&out)?;
            info!(address = %keypair.address(), path = %out.display(), "generated key");
            println!("{}", keypair.address());
        }
        Command::Address { key } => {
            let keypair = AccountKeypair::load(&key)?;
            println!("{}", keypair.address());
        }
        Command::Set { key, message } => {
            let keypair = AccountKeypair::load(&key)?;
            let host = LocalHost::open(&config.store)?;
            host.submit_set_message(&keypair.sign_set_message(message))?;
            info!(address = %keypair.address(), "message set");
        }
        Command::Get { address } => {
            let address: AccountAddress = address.parse()?;
            match LocalHost::read_message(&config.store, &address) {
                Ok(message) => println!("{}", message),
                Err(err @ StoreError::NotFound(_)) => {
                    eprintln!("{} (code {})", err, err.code().unwrap_or_default());
                    return Ok(ExitCode::from(2));
                }
                Err(err) => return Err(err.into()),
            }
        }
        Command::Events { account } => {
            let account = account
                .map(|a| a.parse::<AccountAddress>())
                .transpose()?;
            let events = LocalHost::read_events(&config.store, account.as_ref())?;
            debug!(count = events.len(), "listing events");
            for event in events {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_logging_with_config(LogConfig::try_from(&config.logging)?)?;

    debug!(data_dir = %config.store.data_dir.display(), "msgstore starting");
    run(args, config)
}
