use anyhow::{Context, Result, anyhow};
use clap::Parser;
use env_logger::{Builder, Env, Target};
use log::{error, info};
use serde_valid::Validate;
use std::{
    env,
    io::{Write, stdout},
    process::ExitCode,
    sync::Arc,
};
use wifi_provisioner::{
    Credentials, HttpAttemptExecutor, Phase, Provisioner, ProvisionerConfig, Snapshot,
};

const SUCCESS_MESSAGE: &str =
    "Connected successfully! Please connect to the WiFi network to use your device.";
const FAILURE_MESSAGE: &str =
    "Failed to connect!! Please re-try a valid SSID and Password for an available WiFi Network.";
const LINE_WIDTH: usize = 48;

/// Provision WiFi credentials to a device in setup mode
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Network name the device should join
    #[arg(long)]
    ssid: String,

    /// Network passphrase, empty for open networks
    #[arg(long, default_value = "")]
    password: String,

    /// Device base URL, overrides PROVISIONER_DEVICE_URL
    #[arg(long)]
    device_url: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    initialize();

    match run(args).await {
        Ok(Phase::Succeeded) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            error!("application error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn initialize() {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    // stdout belongs to the progress line
    builder.format(|f, record| writeln!(f, "{}", record.args()));
    builder.target(Target::Stderr).init();

    info!("module version: {}", env!("CARGO_PKG_VERSION"));
}

async fn run(args: Args) -> Result<Phase> {
    let config = ProvisionerConfig::load_with(|name| match (name, &args.device_url) {
        ("PROVISIONER_DEVICE_URL", Some(url)) => Some(url.clone()),
        _ => env::var(name).ok(),
    })
    .context("failed to load configuration")?;

    let credentials = Credentials::new(args.ssid, args.password);
    credentials
        .validate()
        .map_err(|e| anyhow!("invalid credentials: {e}"))?;

    let executor =
        HttpAttemptExecutor::new(&config.device).context("failed to create setup executor")?;
    info!("provisioning via {}", executor.url());

    let provisioner = Provisioner::spawn(Arc::new(executor), &config);
    let mut snapshots = provisioner.subscribe();
    let session = provisioner.begin_provisioning(credentials).await?;
    let max_retries = config.session.max_retries;
    let mut out = stdout();

    let phase = loop {
        let snapshot = *snapshots.borrow_and_update();

        if snapshot.session == session {
            let line = render(&snapshot, max_retries);
            if snapshot.phase.is_terminal() {
                writeln!(out, "\r{line:<LINE_WIDTH$}").context("failed to write to stdout")?;
                break snapshot.phase;
            }
            write!(out, "\r{line:<LINE_WIDTH$}").context("failed to write to stdout")?;
            out.flush().context("failed to flush stdout")?;
        }

        snapshots
            .changed()
            .await
            .context("failed to observe provisioning: provisioner stopped")?;
    };

    provisioner.shutdown().await?;

    Ok(phase)
}

fn render(snapshot: &Snapshot, max_retries: u32) -> String {
    match snapshot.phase {
        Phase::Idle => String::new(),
        Phase::Connecting => format!(
            "Logging in{:<3} ({}s)",
            snapshot.dots(),
            snapshot.countdown_seconds
        ),
        Phase::Retrying => format!(
            "Logging in{:<3} (retry {}/{max_retries})",
            snapshot.dots(),
            snapshot.retry_count
        ),
        Phase::Succeeded => SUCCESS_MESSAGE.to_string(),
        Phase::Failed => FAILURE_MESSAGE.to_string(),
    }
}
