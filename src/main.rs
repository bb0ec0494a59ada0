//! gdrive-upload -- command-line entry point.
//!
//! Wires the library together for one run:
//!   - Configuration loading and tracing setup
//!   - First-time setup (OAuth client id/secret prompts)
//!   - Device authorization when no credential is stored
//!   - Optional forced token refresh
//!   - Upload of a single file

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::Parser;
use dialoguer::{Input, Password};
use tracing_subscriber::EnvFilter;

use gdrive_upload::App;
use gdrive_upload::config::Config;
use gdrive_upload::oauth::PendingAuthorization;

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// Upload a file to Google Drive from a headless machine.
#[derive(Debug, Parser)]
#[command(name = "gdrive-upload", version, about)]
struct Args {
    /// Local file to upload. Without it, only setup/authentication runs.
    source: Option<PathBuf>,

    /// Destination folder path in Drive ("." for the root).
    #[arg(default_value = ".")]
    destination: String,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,

    /// Re-enter the OAuth client and re-run the device authorization.
    #[arg(short, long)]
    force_setup: bool,

    /// Refresh the access token before doing anything else.
    #[arg(long)]
    refresh_token: bool,

    /// MIME type to use instead of guessing from the file extension.
    #[arg(short, long)]
    mime_type: Option<String>,

    /// Configuration file [default: gdrive-upload.toml].
    #[arg(short, long, env = "GDRIVE_UPLOAD_CONFIG")]
    config: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = ?e, "Run failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    // 1. Load configuration
    let config_path = Config::resolve_path(args.config.as_deref());
    let mut config = Config::load(&config_path)?;

    // 2. Initialize tracing/logging
    init_tracing(&config, args.verbose);
    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        env_overrides = ?config.env_overrides.keys(),
        "Starting gdrive-upload"
    );

    // 3. Fail fast on a missing source, before any prompt or network call
    if let Some(source) = &args.source {
        if !source.is_file() {
            bail!("Source file {} does not exist", source.display());
        }
    }

    // 4. OAuth client setup
    if args.force_setup || !config.oauth.has_client() {
        setup_client(&mut config, &config_path)?;
    }

    // 5. Authenticate
    let app = App::from_config(config)?;
    app.authenticate(args.force_setup, print_device_prompt)
        .await
        .context("Authentication failed")?;

    if args.refresh_token {
        app.refresh_token()
            .await
            .context("Token refresh failed")?;
        println!("Access token refreshed.");
    }

    // 6. Upload
    let Some(source) = args.source else {
        println!("Authenticated. Nothing to upload.");
        return Ok(());
    };

    let report = app
        .upload(&source, &args.destination, args.mime_type.as_deref())
        .await
        .with_context(|| format!("Upload of {} failed", source.display()))?;

    println!(
        "Uploaded {} ({} bytes in {} chunk request(s), {} retry(ies)).",
        source.display(),
        report.bytes_uploaded,
        report.chunks_sent,
        report.retries
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Setup prompts
// ---------------------------------------------------------------------------

/// Ask for the OAuth client id and secret and persist them to the config file.
fn setup_client(config: &mut Config, config_path: &Path) -> anyhow::Result<()> {
    println!("Setting up Google Drive access.");
    println!("Create an OAuth client of type \"TVs and Limited Input devices\" in the");
    println!("Google Cloud console and enter its credentials below.");

    let client_id: String = Input::new()
        .with_prompt("Client ID")
        .interact_text()
        .context("Failed to read client ID")?;
    let client_secret = Password::new()
        .with_prompt("Client secret")
        .interact()
        .context("Failed to read client secret")?;

    // Persist into the file-level config so env overrides don't leak into it.
    let mut file_config = Config::load_file(config_path)?;
    file_config.oauth.client_id = Some(client_id.trim().to_string());
    file_config.oauth.client_secret = Some(client_secret.trim().to_string());
    file_config.save(config_path)?;
    tracing::info!(path = %config_path.display(), "Saved OAuth client to config");

    config.oauth.client_id = file_config.oauth.client_id;
    config.oauth.client_secret = file_config.oauth.client_secret;
    Ok(())
}

fn print_device_prompt(pending: &PendingAuthorization) {
    println!();
    println!("To authorize this device, visit:");
    println!("    {}", pending.verification_url);
    println!("and enter the code:");
    println!("    {}", pending.user_code);
    println!();
    println!(
        "Waiting for approval (code expires in {} minutes)...",
        pending.expires_in.div_ceil(60)
    );
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Set up the tracing subscriber based on configuration.
fn init_tracing(config: &Config, verbose: bool) {
    // RUST_LOG env var takes precedence over --verbose and the config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose {
            "debug"
        } else {
            config.logging.level.as_str()
        };
        EnvFilter::new(format!("gdrive_upload={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
