use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use keystore_core::paths::config_path;
use keystore_core::{derive_key_pair, KeystoreConfig, SessionKeystore, SessionSigner};
use serde_json::json;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keystore-cli")]
#[command(about = "Session keystore and request signing", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the keypair derived from a session id
    Derive { session_id: String },

    /// Sign a message with a session id, without touching the store
    Sign { session_id: String, message: String },

    /// Proof-of-possession signature for a session id
    Proof { session_id: String },

    /// Store a session id
    Login { session_id: String },

    /// Remove the stored session entries
    Logout,

    /// Store an encrypted entry
    Put { key: String, value: String },

    /// Read an encrypted entry
    Get { key: String },

    /// Sign a message with the stored session
    SignRequest { message: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Derive { session_id } => {
            let pair = derive_key_pair(&session_id).context("derive session keypair")?;
            print_json(json!({
                "publicKey": pair.public_hex(),
                "privateKey": pair.private_hex(),
            }))
        }
        Commands::Sign { session_id, message } => {
            let signer = SessionSigner::from_scalar_hex(&session_id)?;
            print_json(json!({ "signature": signer.sign_payload(&message)? }))
        }
        Commands::Proof { session_id } => {
            let signer = SessionSigner::from_scalar_hex(&session_id)?;
            print_json(json!({ "signature": signer.sign_empty_prefixed_message()? }))
        }
        Commands::Login { session_id } => {
            let keystore = open_keystore(cli.config)?;
            let pair = keystore.save_session(&session_id).context("store session")?;
            print_json(json!({ "publicKey": pair.public_hex() }))
        }
        Commands::Logout => {
            let keystore = open_keystore(cli.config)?;
            let removed = keystore.clear_session()?;
            print_json(json!({ "removed": removed }))
        }
        Commands::Put { key, value } => {
            let keystore = open_keystore(cli.config)?;
            keystore
                .save(&key, &value)
                .with_context(|| format!("store entry {key}"))?;
            Ok(())
        }
        Commands::Get { key } => {
            let keystore = open_keystore(cli.config)?;
            let value = keystore
                .load(&key)
                .with_context(|| format!("read entry {key}"))?
                .ok_or_else(|| anyhow!("no entry for {key}"))?;
            println!("{value}");
            Ok(())
        }
        Commands::SignRequest { message } => {
            let keystore = open_keystore(cli.config)?;
            print_json(json!({ "signature": keystore.sign_request(&message)? }))
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<KeystoreConfig> {
    match path.or_else(config_path) {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            KeystoreConfig::load(&path)
                .with_context(|| format!("load config {}", path.display()))
        }
        None => Ok(KeystoreConfig::default()),
    }
}

fn open_keystore(config: Option<PathBuf>) -> Result<SessionKeystore> {
    let config = load_config(config)?;
    SessionKeystore::open(&config).context("open session keystore")
}

fn print_json(value: serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
