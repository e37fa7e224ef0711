use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use cartophone::config::DEFAULT_CONFIG_PATH;
use cartophone::transport::serve;
use cartophone::{
    CartophoneService, Collaborators, Config, OwnToneClient, PocketBaseClient, SerialScanner,
    VersionInfo,
};

const USAGE: &str = "Usage: cartophone-server [--config <path>]

Options:
  --config <path>  JSON config file [env: CARTOPHONE_CONFIG] [default: config.json]
  -h, --help       Print this help";

/// `RUST_LOG` wins; otherwise `CARTOPHONE_LOG` sets the crate level.
/// `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("CARTOPHONE_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("cartophone={level},cartophone_server={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn parse_args(args: &[String]) -> Result<PathBuf, String> {
    let mut config_path = std::env::var("CARTOPHONE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = PathBuf::from(args.get(i).ok_or("--config requires a value")?);
            }
            "--help" | "-h" => return Err(String::new()),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }
    Ok(config_path)
}

async fn run(config_path: PathBuf) -> anyhow::Result<()> {
    let config = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let pocketbase = PocketBaseClient::new(&config.pocket_base_url)?;
    let owntone = OwnToneClient::new(&config.owntone_base_url)?;
    let scanner = SerialScanner::open(&config.device_path)
        .await
        .with_context(|| format!("opening tag reader at {}", config.device_path))?;

    tracing::info!(
        device = %config.device_path,
        pocketbase = %config.pocket_base_url,
        owntone = %config.owntone_base_url,
        "Starting reader pipeline"
    );

    let service = CartophoneService::start(
        Box::new(scanner),
        Collaborators::remote(pocketbase, owntone),
        config.service_settings(),
    )
    .with_version(VersionInfo::new().with_pocketbase_url(&config.pocket_base_url));

    serve(config.server_config(), Arc::new(service)).await
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let config_path = match parse_args(&args) {
        Ok(path) => path,
        Err(msg) => {
            if msg.is_empty() {
                println!("{USAGE}");
                process::exit(0);
            }
            eprintln!("error: {msg}");
            eprintln!();
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    init_tracing();

    if let Err(e) = run(config_path).await {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}
