mod logging;
mod ureq_transport;

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use samil2pvoutput::aggregate::CombinationRules;
use samil2pvoutput::discovery;
use samil2pvoutput::inverter::SamilInverter;
use samil2pvoutput::poll::{PollLoop, ReadingSource, Shutdown};
use samil2pvoutput::protocol::DATA_PORT;
use samil2pvoutput::pvoutput::PvOutput;
use samil2pvoutput::retry::RetryPolicy;
use serde_derive::Deserialize;
use ureq_transport::UreqTransport;

#[derive(Debug, Parser)]
#[command(name = "samil-pvoutput-publish", version = env!("GIT_HASH"))]
#[command(about = "Polls Samil inverters on the local network and publishes to PVOutput")]
struct Args {
    /// the IP address of the network interface used to bind to (optional)
    #[arg(long, default_value = "")]
    interface: String,

    /// PVOutput system ID
    #[arg(long = "system-id", default_value = "")]
    system_id: String,

    /// PVOutput API key
    #[arg(long = "api-key", default_value = "")]
    api_key: String,

    /// number of inverters to fetch data from. If greater than 1, the data
    /// of the multiple inverters will be accumulated or averaged depending
    /// on type of data
    #[arg(long, default_value_t = 1)]
    inverters: i64,
}

/// Optional tuning, read from config.toml when present.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Settings {
    poll_interval_s: u64,
    fetch_timeout_s: u64,
    discovery_window_s: u64,
    upload_timeout_s: u64,
    retry: RetryPolicy,
    rules: CombinationRules,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            // PVOutput ingests one status per five-minute block
            poll_interval_s: 300,
            fetch_timeout_s: 5,
            discovery_window_s: 30,
            upload_timeout_s: 10,
            retry: RetryPolicy::default(),
            rules: CombinationRules::default(),
        }
    }
}

fn main() -> Result<()> {
    logging::init();
    info!("Running revision: {}", env!("GIT_HASH"));

    let args = Args::parse();
    if args.system_id.is_empty() {
        bail!("--system-id is required");
    }
    if args.api_key.is_empty() {
        bail!("--api-key is required");
    }
    if args.inverters < 1 {
        bail!("--inverters must be at least 1, got {}", args.inverters);
    }
    let bind_ip = match args.interface.as_str() {
        "" => None,
        raw => Some(
            raw.parse::<IpAddr>()
                .with_context(|| format!("invalid interface address {raw:?}"))?,
        ),
    };

    let settings = load_settings()?;

    let shutdown = Arc::new(Shutdown::new());
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            info!("Shutdown requested");
            shutdown.trigger();
        })
        .context("failed to install the shutdown handler")?;
    }

    let addresses = discovery::discover(
        bind_ip,
        args.inverters as usize,
        Duration::from_secs(settings.discovery_window_s),
    )?;
    if addresses.is_empty() {
        warn!("No inverters discovered; polling continues in case they come online elsewhere");
    }

    let fetch_timeout = Duration::from_secs(settings.fetch_timeout_s);
    let sources: Vec<Box<dyn ReadingSource>> = addresses
        .into_iter()
        .map(|ip| {
            Box::new(SamilInverter::new(
                SocketAddr::new(ip, DATA_PORT),
                bind_ip,
                fetch_timeout,
            )) as Box<dyn ReadingSource>
        })
        .collect();

    let transport = UreqTransport::new(Duration::from_secs(settings.upload_timeout_s));
    let uploader = PvOutput::new(transport, &args.system_id, &args.api_key);

    let mut poll = PollLoop::new(
        sources,
        settings.rules,
        uploader,
        settings.retry,
        Duration::from_secs(settings.poll_interval_s),
    );
    poll.run(&shutdown);
    Ok(())
}

/// Load config.toml from the working directory, falling back to the
/// executable's directory; absence is fine and yields the defaults.
fn load_settings() -> Result<Settings> {
    let mut path = std::env::current_dir().context("can't retrieve current dir")?;
    path.push("config.toml");
    if !path.exists() {
        let mut exe = std::env::current_exe().context("unable to get current executable path")?;
        exe.pop();
        exe.push("config.toml");
        path = exe;
    }
    if !path.exists() {
        info!("No config.toml found, using defaults");
        return Ok(Settings::default());
    }

    info!("Loading configuration from {}", path.display());
    let contents =
        fs::read_to_string(&path).with_context(|| format!("could not read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("could not parse {}", path.display()))
}
