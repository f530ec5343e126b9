//! Binary entrypoint for the meshbot CLI.
//!
//! Commands:
//! - `run [--port <path>] [--host <addr>] [--plugins <dir>]` - connect and serve plugins
//! - `init` - create a starter `config.toml` and an empty plugin directory
//! - `nodes [--port <path>] [--host <addr>] [--timeout <s>]` - print the radio's view of
//!   the mesh as JSON
//! - `plugins [--plugins <dir>]` - load plugins offline and print the help text
//!
//! See the library crate docs for module-level details: `meshbot::`.
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use meshbot::bot::{Chatbot, LuaPluginLoader};
use meshbot::config::Config;
use meshbot::meshtastic::node::NodeSummary;
use meshbot::meshtastic::{transport, ConnectedNode, Events, FrameLog, SessionOptions, Topic};
use meshbot::metrics;

#[derive(Parser)]
#[command(name = "meshbot")]
#[command(about = "A scriptable chat bot for Meshtastic mesh networks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a radio and answer messages with the loaded plugins
    Run {
        /// Serial device (e.g., /dev/ttyUSB0)
        #[arg(short, long)]
        port: Option<String>,
        /// Network-attached radio (host or host:port)
        #[arg(long)]
        host: Option<String>,
        /// Plugin directory (overrides bot.plugin_dir)
        #[arg(long)]
        plugins: Option<String>,
    },
    /// Write a default configuration file
    Init,
    /// Download the radio's node database and print it as JSON
    Nodes {
        #[arg(short, long)]
        port: Option<String>,
        #[arg(long)]
        host: Option<String>,
        /// Seconds to wait for the configuration download
        #[arg(short, long, default_value_t = 15)]
        timeout: u64,
    },
    /// Load plugins without connecting and print the help text
    Plugins {
        #[arg(long)]
        plugins: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Init writes the config, so it must not require one
    let config = match cli.command {
        Commands::Init => None,
        _ => Some(load_config(&cli.config).await?),
    };
    init_logging(&config, cli.verbose);
    let config = config.unwrap_or_default();

    match cli.command {
        Commands::Init => init(&cli.config).await,
        Commands::Run {
            port,
            host,
            plugins,
        } => run(config, port, host, plugins).await,
        Commands::Nodes {
            port,
            host,
            timeout,
        } => {
            let connected = nodes(config, port, host, timeout).await?;
            std::process::exit(if connected { 0 } else { 1 });
        }
        Commands::Plugins { plugins } => {
            let dir = plugins.unwrap_or_else(|| config.bot.plugin_dir.clone());
            let bot = Chatbot::new(config.bot.conversation_scope);
            let loader = LuaPluginLoader::new(&dir);
            bot.reload(&loader)
                .await
                .with_context(|| format!("Failed to load plugins from {}", dir))?;
            for plugin in bot.plugins().iter() {
                info!(
                    "{} {} ({} commands, {} states){}",
                    plugin.name,
                    plugin.version,
                    plugin.commands.len(),
                    plugin.states.len(),
                    if plugin.hidden { " [hidden]" } else { "" }
                );
            }
            println!("{}", bot.describe());
            Ok(())
        }
    }
}

async fn init(path: &str) -> Result<()> {
    if Path::new(path).exists() {
        bail!("{} already exists; remove it first to start over", path);
    }
    Config::create_default(path).await?;
    info!("Configuration file created at {}", path);
    let plugin_dir = Config::default().bot.plugin_dir;
    tokio::fs::create_dir_all(&plugin_dir)
        .await
        .with_context(|| format!("Failed to create plugin directory {}", plugin_dir))?;
    info!("Plugin directory ready at {}", plugin_dir);
    Ok(())
}

/// A missing config file means defaults; a broken one is an error.
async fn load_config(path: &str) -> Result<Config> {
    if Path::new(path).exists() {
        Config::load(path).await
    } else {
        Ok(Config::default())
    }
}

async fn open_session(
    config: &Config,
    port: Option<String>,
    host: Option<String>,
    events: Arc<Events>,
) -> Result<ConnectedNode> {
    let frame_log = match &config.logging.frame_log {
        Some(path) => Some(Arc::new(
            FrameLog::open(path).with_context(|| format!("Failed to open frame log {}", path))?,
        )),
        None => None,
    };
    let options = SessionOptions {
        wake: config.meshtastic.wake_device,
        heartbeat_interval: config.meshtastic.heartbeat_interval(),
        frame_log,
    };

    // CLI beats config; host beats port.
    let (port, host) = match (port, host) {
        (None, None) => (config.meshtastic.port.clone(), config.meshtastic.host.clone()),
        given => given,
    };
    if let Some(host) = host {
        let stream = transport::connect_tcp(&host).await?;
        return Ok(ConnectedNode::open(stream, events, options).await?);
    }
    open_serial_session(config, port, events, options).await
}

#[cfg(feature = "serial")]
async fn open_serial_session(
    config: &Config,
    port: Option<String>,
    events: Arc<Events>,
    options: SessionOptions,
) -> Result<ConnectedNode> {
    let path = match port {
        Some(p) => p,
        None => {
            let p = transport::detect_serial_port()?;
            info!("No port configured; using first serial port {}", p);
            p
        }
    };
    let stream = transport::open_serial(&path, config.meshtastic.baud_rate).await?;
    Ok(ConnectedNode::open(stream, events, options).await?)
}

#[cfg(not(feature = "serial"))]
async fn open_serial_session(
    _config: &Config,
    _port: Option<String>,
    _events: Arc<Events>,
    _options: SessionOptions,
) -> Result<ConnectedNode> {
    bail!("Serial support not compiled in; use --host or rebuild with the `serial` feature")
}

async fn run(
    config: Config,
    port: Option<String>,
    host: Option<String>,
    plugins: Option<String>,
) -> Result<()> {
    info!("Starting meshbot v{}", env!("CARGO_PKG_VERSION"));
    let events = Events::new();

    let dir = plugins.unwrap_or_else(|| config.bot.plugin_dir.clone());
    let bot = Arc::new(Chatbot::new(config.bot.conversation_scope));
    let loader = LuaPluginLoader::new(&dir).with_reply_timeout(config.bot.reply_timeout());
    bot.reload(&loader)
        .await
        .with_context(|| format!("Failed to load plugins from {}", dir))?;
    let weak = Arc::downgrade(&bot);
    loader.bind_help(move || weak.upgrade().map(|b| b.describe()).unwrap_or_default());
    info!("{}", bot.describe());

    events.connection.subscribe(Topic::Connected, |node: ConnectedNode| async move {
        info!("Connected to a node!");
        info!("This is me: {}", node);
        info!("Node list:\n{}", node.node_list());
        info!("Channel list:");
        for channel in node.channels() {
            info!("   {}", channel);
        }
    });
    let (gone_tx, mut gone_rx) = mpsc::unbounded_channel();
    events
        .connection
        .subscribe(Topic::Disconnected, move |_node: ConnectedNode| {
            let gone_tx = gone_tx.clone();
            async move {
                let _ = gone_tx.send(());
            }
        });
    bot.attach(&events);

    let session = open_session(&config, port, host, events).await?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            if let Err(e) = r {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Shutting down");
        }
        _ = gone_rx.recv() => warn!("Disconnected from the node"),
    }
    session.close().await;
    info!("Final metrics: {:?}", metrics::snapshot());
    Ok(())
}

/// Print the node database as JSON. Returns whether the handshake completed.
async fn nodes(config: Config, port: Option<String>, host: Option<String>, secs: u64) -> Result<bool> {
    let events = Events::new();
    let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
    events.connection.subscribe(Topic::Connected, move |_node: ConnectedNode| {
        let ready_tx = ready_tx.clone();
        async move {
            let _ = ready_tx.send(());
        }
    });

    let session = open_session(&config, port, host, events).await?;
    let connected = matches!(timeout(Duration::from_secs(secs), ready_rx.recv()).await, Ok(Some(())));
    if !connected {
        warn!("No config_complete from the radio within {}s", secs);
    }

    let nodes: Vec<NodeSummary> = session
        .node_list()
        .sorted()
        .iter()
        .map(|h| NodeSummary::from(&*h.read()))
        .collect();
    let payload = serde_json::json!({
        "status": if connected { "ok" } else { "incomplete" },
        "local": session.local_node().map(|h| NodeSummary::from(&*h.read())),
        "firmware_version": session.firmware_version(),
        "node_count": nodes.len(),
        "nodes": nodes,
        "channels": session.channels(),
        "metrics": metrics::snapshot(),
        "timeout_seconds": secs,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    session.close().await;
    Ok(connected)
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
    if let Some(f) = file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Also echo to the console when attached to a terminal
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
