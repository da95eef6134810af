#![forbid(unsafe_code)]

//! `webpier-ctl`: local CLI companion for `webpier-bridge`.
//!
//! Edits the shared context under the file lock and drives the slipway
//! daemon over its local socket.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

use webpier_bridge::context::ContextStore;
use webpier_bridge::ipc::{Handle, IpcClient};
use webpier_bridge::models::{load_offer, save_offer, Service, ServiceUpdate};
use webpier_bridge::{AppError, Result, Settings};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "webpier-ctl",
    about = "Local CLI for the WebPier context and slipway daemon",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML settings file.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Override the context home directory.
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Establish the local pier identity (`owner/host`).
    Init {
        /// Pier id.
        pier: String,
    },

    /// Print the configuration, services, and remotes.
    Show,

    /// Update settings; a different `--pier` switches identity.
    Config(ConfigArgs),

    /// Manage services.
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },

    /// Manage imported remote piers.
    Remote {
        #[command(subcommand)]
        action: RemoteAction,
    },

    /// Exchange offers with other piers.
    Offer {
        #[command(subcommand)]
        action: OfferAction,
    },

    /// Send a command to the slipway daemon.
    Daemon {
        /// Daemon command.
        #[arg(value_enum)]
        action: DaemonAction,
        /// Owning pier of the target service.
        #[arg(long, requires = "service")]
        pier: Option<String>,
        /// Target service name.
        #[arg(long, requires = "pier")]
        service: Option<String>,
    },
}

#[derive(Debug, Args)]
struct ConfigArgs {
    /// Local pier id.
    #[arg(long)]
    pier: Option<String>,
    /// STUN server.
    #[arg(long)]
    stun: Option<String>,
    /// Maximum punching hops.
    #[arg(long)]
    hops: Option<u32>,
    /// DHT bootstrap host.
    #[arg(long)]
    bootstrap: Option<String>,
    /// Local DHT port.
    #[arg(long)]
    port: Option<u16>,
    /// SMTP server endpoint.
    #[arg(long)]
    smtp: Option<String>,
    /// IMAP server endpoint.
    #[arg(long)]
    imap: Option<String>,
    /// Mailbox login.
    #[arg(long)]
    login: Option<String>,
    /// Mailbox password.
    #[arg(long)]
    password: Option<String>,
    /// Email client certificate.
    #[arg(long)]
    cert: Option<String>,
    /// Email client private key.
    #[arg(long)]
    key: Option<String>,
    /// Email certificate authority.
    #[arg(long)]
    ca: Option<String>,
}

#[derive(Debug, Subcommand)]
enum ServiceAction {
    /// Create or update a service.
    Set {
        /// Owning pier.
        pier: String,
        /// Service name.
        name: String,
        /// Address the tunnel forwards to or listens on.
        #[arg(long)]
        address: Option<String>,
        /// Gateway address.
        #[arg(long)]
        gateway: Option<String>,
        /// Rendezvous: empty for email, otherwise a DHT bootstrap host.
        #[arg(long)]
        rendezvous: Option<String>,
        /// Engage the service when the daemon starts.
        #[arg(long, value_name = "BOOL")]
        autostart: Option<bool>,
        /// Obscure tunnel traffic.
        #[arg(long, value_name = "BOOL")]
        obscure: Option<bool>,
    },
    /// Delete a service.
    Del {
        /// Owning pier.
        pier: String,
        /// Service name.
        name: String,
    },
}

#[derive(Debug, Subcommand)]
enum RemoteAction {
    /// Import a remote pier from its certificate file.
    Add {
        /// Remote pier id.
        pier: String,
        /// PEM certificate file.
        cert_file: PathBuf,
    },
    /// Remove a remote pier.
    Del {
        /// Remote pier id.
        pier: String,
    },
}

#[derive(Debug, Subcommand)]
enum OfferAction {
    /// Write the local pier's offer to a file.
    Export {
        /// Destination file.
        file: PathBuf,
    },
    /// Import a remote pier from an offer file.
    Import {
        /// Offer file.
        file: PathBuf,
    },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum DaemonAction {
    Engage,
    Unplug,
    Adjust,
    Status,
    Review,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("Error: {err}");
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Cli) -> Result<()> {
    let mut settings = match args.settings {
        Some(ref path) => Settings::load_from_path(path)?,
        None => Settings::default(),
    };
    if let Some(home) = args.home {
        settings.home = home;
    }

    match args.command {
        Command::Daemon {
            action,
            pier,
            service,
        } => {
            let handle = pier.zip(service).map(|(pier, service)| Handle::new(pier, service));
            run_daemon(&settings, action, handle.as_ref())
        }
        command => run_context(&settings, command),
    }
}

fn run_context(settings: &Settings, command: Command) -> Result<()> {
    let mut store = ContextStore::open(settings)?;

    match command {
        Command::Init { pier } => {
            store.init(&pier)?;
            println!("{}", store.get_pier());
        }
        Command::Show => {
            let mut config = store.get_config();
            if !config.email.password.is_empty() {
                config.email.password = "***".into();
            }
            let view = serde_json::json!({
                "config": config,
                "services": store.get_services(),
                "remotes": store.get_remotes(),
            });
            print_json(&view)?;
        }
        Command::Config(update) => {
            let current = store.get_config();
            let mut nat = current.nat;
            let mut dht = current.dht;
            let mut email = current.email;

            if let Some(stun) = update.stun {
                nat.stun = stun;
            }
            if let Some(hops) = update.hops {
                nat.hops = hops;
            }
            if let Some(bootstrap) = update.bootstrap {
                dht.bootstrap = bootstrap;
            }
            if let Some(port) = update.port {
                dht.port = port;
            }
            for (slot, value) in [
                (&mut email.smtp, update.smtp),
                (&mut email.imap, update.imap),
                (&mut email.login, update.login),
                (&mut email.password, update.password),
                (&mut email.cert, update.cert),
                (&mut email.key, update.key),
                (&mut email.ca, update.ca),
            ] {
                if let Some(value) = value {
                    *slot = value;
                }
            }

            let pier = update.pier.unwrap_or(current.pier);
            store.set_config(&pier, nat, dht, email)?;
            println!("OK");
        }
        Command::Service { action } => match action {
            ServiceAction::Set {
                pier,
                name,
                address,
                gateway,
                rendezvous,
                autostart,
                obscure,
            } => {
                let mut service = match store.get_service(&pier, &name) {
                    Ok(existing) => existing,
                    Err(AppError::UnknownService(_)) => {
                        Service::new(pier == store.get_pier(), name, pier.clone())
                    }
                    Err(err) => return Err(err),
                };
                ServiceUpdate {
                    address,
                    gateway,
                    rendezvous,
                    autostart,
                    obscure,
                }
                .apply(&mut service);
                store.set_service(&pier, service)?;
                println!("OK");
            }
            ServiceAction::Del { pier, name } => {
                store.del_service(&pier, &name)?;
                println!("OK");
            }
        },
        Command::Remote { action } => match action {
            RemoteAction::Add { pier, cert_file } => {
                let certificate = std::fs::read_to_string(&cert_file).map_err(|err| {
                    AppError::Io(format!("failed to read {}: {err}", cert_file.display()))
                })?;
                store.add_remote(&pier, &certificate)?;
                println!("OK");
            }
            RemoteAction::Del { pier } => {
                store.del_remote(&pier)?;
                println!("OK");
            }
        },
        Command::Offer { action } => match action {
            OfferAction::Export { file } => {
                let offer = store.export_offer()?;
                save_offer(&file, &offer)?;
                println!("{} {}", offer.pier, offer.fingerprint());
            }
            OfferAction::Import { file } => {
                let offer = load_offer(&file)?;
                store.import_offer(&offer)?;
                println!("{} {}", offer.pier, offer.fingerprint());
            }
        },
        Command::Daemon { .. } => {
            return Err(AppError::Config("daemon commands are not context edits".into()));
        }
    }

    Ok(())
}

fn run_daemon(settings: &Settings, action: DaemonAction, handle: Option<&Handle>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;

    runtime.block_on(async {
        let client = IpcClient::from_settings(settings);
        match (action, handle) {
            (DaemonAction::Engage, None) => client.engage_all().await?,
            (DaemonAction::Engage, Some(handle)) => client.engage_service(handle).await?,
            (DaemonAction::Unplug, None) => client.unplug_all().await?,
            (DaemonAction::Unplug, Some(handle)) => client.unplug_service(handle).await?,
            (DaemonAction::Adjust, None) => client.adjust_all().await?,
            (DaemonAction::Adjust, Some(handle)) => client.adjust_service(handle).await?,
            (DaemonAction::Status, None) => return print_json(&client.status_all().await?),
            (DaemonAction::Status, Some(handle)) => {
                return print_json(&client.status_service(handle).await?);
            }
            (DaemonAction::Review, None) => return print_json(&client.review_all().await?),
            (DaemonAction::Review, Some(handle)) => {
                return print_json(&client.review_service(handle).await?);
            }
        }
        println!("OK");
        Ok(())
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
