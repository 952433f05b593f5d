mod logging;

use async_trait::async_trait;
use cliprelay_core::config::RelaySettings;
use cliprelay_core::credentials::FileCredentialStore;
use cliprelay_core::media::MediaFetcher;
use cliprelay_core::session::{PhonePrompt, SessionMachine};
use cliprelay_transport_telegram::config::TelegramSettings;
use cliprelay_transport_telegram::provider::TelegramProvider;
use dotenvy::dotenv;
use logging::{init_logging, RedactionPatterns};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

/// Asks the operator on the terminal.
struct StdinPhonePrompt;

#[async_trait]
impl PhonePrompt for StdinPhonePrompt {
    async fn ask_phone_number(&self) -> io::Result<String> {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(b"Enter the bot phone number (international format, digits only): ")
            .await?;
        stdout.flush().await?;

        let mut line = String::new();
        let read = BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stdin closed before a phone number was entered",
            ));
        }
        Ok(line)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Redaction must exist before the first log line
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting clip relay bot...");

    let (settings, telegram) = init_settings();
    let provider = Arc::new(TelegramProvider::new(&telegram)?);
    let store = Arc::new(FileCredentialStore::new(settings.auth_path()));
    let resolver = Arc::new(MediaFetcher::new(
        settings.media_resolver_url.clone(),
        settings.media_timeout(),
    ));

    let mut machine = SessionMachine::new(
        provider,
        store,
        resolver,
        Arc::new(StdinPhonePrompt),
        &settings,
    );

    tokio::select! {
        reason = machine.run() => {
            warn!(%reason, "Session ended; delete the auth directory and restart to pair again");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {e}");
            }
            info!("Shutdown requested");
        }
    }

    Ok(())
}

fn init_settings() -> (RelaySettings, TelegramSettings) {
    let settings = match RelaySettings::new() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load relay configuration: {}", e);
            std::process::exit(1);
        }
    };
    let telegram = match TelegramSettings::new() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load telegram configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        auth_dir = %settings.auth_path().display(),
        target = ?settings.target_conversation_id,
        "Configuration loaded successfully."
    );
    (settings, telegram)
}
