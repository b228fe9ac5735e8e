#![deny(dead_code)] // DO NOT REMOVE THIS EVER
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{debug, error, info, warn, LevelFilter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod config;
mod utils;

use crate::config::{get_config_dir, load_config, save_config, BridgeConfig};
use wapi_bridge::{
    wapi::{Capability, CdpSession, ScriptBundle, UnreadPoller, WhatsApi},
    MessageGroup, WapiError,
};

/// Command line arguments for wapi-bridge
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "wapi-bridge: drives WhatsApp Web through an injected WAPI script.",
    long_about = "wapi-bridge connects to an open WhatsApp Web tab over the Chrome DevTools \
    protocol, injects the WAPI script and prints unread messages as they arrive.\n\n\
    Start the browser with --remote-debugging-port and pass the page's WebSocket URL."
)]
struct Args {
    /// DevTools WebSocket URL of the WhatsApp Web page
    #[arg(long, value_name = "URL")]
    devtools_url: Option<String>,

    /// WAPI script to inject instead of the embedded one
    #[arg(long, value_name = "PATH")]
    bundle: Option<PathBuf>,

    /// Config file (defaults to config.json in the user config directory)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Script timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Seconds between unread checks
    #[arg(long, value_name = "SECS")]
    interval: Option<u64>,

    /// Save image messages into this directory
    #[arg(long, value_name = "PATH")]
    media_dir: Option<PathBuf>,

    /// Write logs here instead of stdout
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    write_config: bool,
}

impl Args {
    fn apply_to(&self, config: &mut BridgeConfig) {
        if let Some(url) = &self.devtools_url {
            config.devtools_url = Some(url.clone());
        }
        if let Some(bundle) = &self.bundle {
            config.bundle_path = Some(bundle.clone());
        }
        if let Some(timeout) = self.timeout {
            config.script_timeout_secs = timeout;
        }
        if let Some(interval) = self.interval {
            config.poll_interval_secs = interval;
        }
        if let Some(dir) = &self.media_dir {
            config.media_dir = Some(dir.clone());
        }
    }
}

/// Prints one unread batch, saving images when a media directory is set
fn print_groups(groups: &[MessageGroup], media_dir: Option<&Path>) {
    for group in groups {
        println!("{}", group);
        for message in &group.messages {
            println!("    {}", message);

            let (Some(dir), Some(media)) = (media_dir, message.as_media()) else {
                continue;
            };
            match media.save(dir) {
                Ok(path) => println!("        saved to {}", path.display()),
                Err(WapiError::UnsupportedOperation(reason)) => debug!("Not saved: {}", reason),
                Err(e) => warn!("Failed to save {} from {}: {}", media.mime_type, message.sender(), e),
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    utils::setup_logging(args.log_file.as_deref(), level)?;
    info!("System information: {} {}", std::env::consts::OS, std::env::consts::ARCH);

    let mut config = load_config(args.config.as_deref())?;
    config.apply_env()?;
    args.apply_to(&mut config);

    if args.write_config {
        let path = match &args.config {
            Some(path) => path.clone(),
            None => get_config_dir()?.join("config.json"),
        };
        save_config(&config, &path)?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    let devtools_url = config
        .devtools_url
        .clone()
        .ok_or_else(|| anyhow!("No DevTools URL: pass --devtools-url or set WAPI_DEVTOOLS_URL"))?;

    let bundle = match &config.bundle_path {
        Some(path) => ScriptBundle::from_file(path)
            .with_context(|| format!("Failed to read WAPI script {}", path.display()))?,
        None => ScriptBundle::embedded(),
    };

    println!("Connecting to {}... please wait...\n", devtools_url);
    let session = match CdpSession::connect(&devtools_url).await {
        Ok(session) => session,
        Err(e) => {
            error!("DevTools connection failed: {}", e);
            eprintln!(
                "Failed to connect to {}\n\
                 Details: {}\n\
                 Please check that the browser runs with --remote-debugging-port\n\
                 and that the URL points at the WhatsApp Web page target.",
                devtools_url, e
            );
            return Err(e.into());
        }
    };

    let api = WhatsApi::new(Arc::new(session), bundle, config.script_timeout());
    let registry = api.discover().await?;
    if !registry.contains(Capability::GetUnreadMessages.as_str()) {
        return Err(anyhow!(
            "The injected WAPI script has no {} function",
            Capability::GetUnreadMessages
        ));
    }

    match api.get_me().await {
        Ok(me) => info!("Logged in as {}", me),
        Err(e) => warn!("Could not read the logged in user: {}", e),
    }

    let mut poller = UnreadPoller::new(api.clone(), config.poll_interval()).skip_malformed_batches(true);
    let cancel = poller.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current check");
            cancel.cancel();
        }
    });

    println!("Listening for unread messages, press Ctrl-C to stop");
    let media_dir = config.media_dir.clone();
    poller
        .run(|groups| {
            print_groups(&groups, media_dir.as_deref());
            Ok(())
        })
        .await?;

    println!("Exited");
    Ok(())
}
