//! backsync - two-party backup synchronizer
//!
//! `backsync serve` keeps one backup directory per user and pulls changed
//! files from clients; `backsync connect` scans a local directory and
//! answers the server's requests.

mod display;

use anyhow::{bail, Context, Result};
use backsync_config::{Config, ConfigLoader};
use backsync_network::{ClientConfig, Command, NetworkClient, NetworkServer, ServerConfig};
use backsync_types::UserName;
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::Input;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// backsync - two-party backup synchronizer
#[derive(Parser)]
#[command(
    name = "backsync",
    version = env!("CARGO_PKG_VERSION"),
    about = "Two-party backup synchronizer",
    long_about = "backsync keeps a server-side backup of a client directory in step.\n\
                  The client fingerprints its files, the server reconciles that manifest\n\
                  with its own copy, deletes stale files and pulls changed ones."
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Quiet mode - minimal output
    #[arg(short, long)]
    quiet: bool,

    /// Verbose mode - detailed output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept client sessions and keep their backups
    Serve {
        /// Address to listen on
        #[arg(short, long)]
        bind: Option<SocketAddr>,
        /// Directory holding one backup directory per user
        #[arg(short, long)]
        storage: Option<PathBuf>,
        /// Serve a single session, then exit
        #[arg(long)]
        once: bool,
    },
    /// Connect to a server and back up a local directory
    Connect {
        /// Server address, host:port
        server: Option<String>,
        /// User name
        #[arg(short, long)]
        user: Option<String>,
        /// Directory holding the local user directory
        #[arg(short, long)]
        storage: Option<PathBuf>,
        /// Run these commands instead of reading them from stdin
        #[arg(short = 'x', long = "exec", value_name = "COMMAND")]
        commands: Vec<String>,
    },
    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
        /// Write the configuration to this file
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ConfigLoader::load_default().context("Failed to load configuration")?,
    };

    init_logging(cli.debug, cli.quiet, cli.verbose, &config)?;
    info!("backsync v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Serve {
            bind,
            storage,
            once,
        } => serve_command(&config, bind, storage, once, cli.quiet).await?,
        Commands::Connect {
            server,
            user,
            storage,
            commands,
        } => connect_command(&config, server, user, storage, commands, cli.quiet).await?,
        Commands::Config { default, save } => config_command(&config, default, save)?,
    }

    Ok(())
}

fn init_logging(debug: bool, quiet: bool, verbose: bool, config: &Config) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else if quiet {
        "error"
    } else {
        config.logging.level.as_str()
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log filter")?;

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_ansi(config.logging.colored_output);

    if config.logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }

    Ok(())
}

async fn serve_command(
    config: &Config,
    bind: Option<SocketAddr>,
    storage: Option<PathBuf>,
    once: bool,
    quiet: bool,
) -> Result<()> {
    let mut server_config = ServerConfig::try_from(config)?;
    if let Some(bind) = bind {
        server_config.bind_addr = bind;
    }
    if let Some(storage) = storage {
        server_config.storage_root = storage;
    }

    let server = NetworkServer::bind(server_config).await?;
    if !quiet {
        println!(
            "{} Serving backups from {} on {}",
            style("→").green().bold(),
            style(server.config().storage_root.display()).cyan(),
            style(server.local_addr()?).cyan()
        );
    }

    if once {
        let report = server.serve_one().await?;
        if !quiet {
            display::print_session_report(&report);
        }
        return Ok(());
    }

    server.run().await?;
    Ok(())
}

async fn connect_command(
    config: &Config,
    server: Option<String>,
    user: Option<String>,
    storage: Option<PathBuf>,
    commands: Vec<String>,
    quiet: bool,
) -> Result<()> {
    let mut client_config = ClientConfig::from(config);
    client_config.server_addr = match server.or_else(|| config.client.server_addr.clone()) {
        Some(addr) => addr,
        None => prompt("Server address", Some(client_config.server_addr.clone()))?,
    };
    if let Some(storage) = storage {
        client_config.storage_root = storage;
    }
    let user = match user.or_else(|| config.client.user.clone()) {
        Some(user) => user,
        None => prompt("User name", None)?,
    };
    let user = UserName::new(user)?;

    let mut client = NetworkClient::connect(client_config).await?;
    client.login(user).await?;
    if !quiet {
        if let Some(context) = client.context() {
            println!(
                "{} Logged in as {}, backing up {}",
                style("✓").green().bold(),
                style(&context.user).cyan(),
                style(context.user_root.display()).cyan()
            );
        }
    }

    if commands.is_empty() {
        interactive_loop(&mut client, quiet).await?;
    } else {
        for line in &commands {
            if !run_command(&mut client, line, quiet).await? {
                break;
            }
        }
    }

    client.exit().await?;
    if !quiet {
        println!("{} Session closed", style("✓").green());
    }
    Ok(())
}

async fn interactive_loop(client: &mut NetworkClient, quiet: bool) -> Result<()> {
    let mut lines = BufReader::new(stdin()).lines();
    loop {
        if !quiet {
            println!("{}", style("Enter command: scan | sync | exit").dim());
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        if !run_command(client, &line, quiet).await? {
            break;
        }
    }
    Ok(())
}

/// Run one user command. Returns `false` once the session should end.
async fn run_command(client: &mut NetworkClient, line: &str, quiet: bool) -> Result<bool> {
    let command = match parse_command(line) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{} {}", style("✗").red().bold(), e);
            return Ok(true);
        }
    };

    match command {
        Command::Scan => {
            let spinner = display::spinner(quiet, "Scanning...");
            let stats = client.scan().await?;
            display::finish(spinner, "Scan completed");
            if !quiet {
                display::print_scan_stats(&stats);
            }
        }
        Command::Sync => {
            if !client.can_sync() {
                warn!("Sync requested without a preceding scan");
                eprintln!(
                    "{} Run {} first",
                    style("✗").red().bold(),
                    style("scan").cyan()
                );
                return Ok(true);
            }
            let spinner = display::spinner(quiet, "Synchronizing...");
            let stats = client.sync().await?;
            display::finish(spinner, "Sync completed");
            if !quiet {
                display::print_sync_stats(&stats);
            }
        }
        Command::Exit => return Ok(false),
        Command::EndSync => bail!("'{}' is not a client command", command.name()),
    }
    Ok(true)
}

fn parse_command(line: &str) -> Result<Command> {
    let command: Command = line.parse()?;
    if !command.is_client_command() {
        bail!("'{}' is not a client command", line.trim());
    }
    Ok(command)
}

fn prompt(label: &str, default: Option<String>) -> Result<String> {
    let input = Input::<String>::new().with_prompt(label);
    let input = match default {
        Some(default) => input.default(default),
        None => input,
    };
    Ok(input.interact_text()?)
}

fn config_command(config: &Config, default: bool, save: Option<PathBuf>) -> Result<()> {
    let shown = if default {
        println!("{} Default configuration:", style("⚙").blue().bold());
        Config::default()
    } else {
        println!("{} Current configuration:", style("⚙").blue().bold());
        config.clone()
    };
    print!("{}", serde_yaml::to_string(&shown)?);

    if let Some(path) = save {
        ConfigLoader::save_to_file(&shown, &path)?;
        println!(
            "{} Saved to {}",
            style("✓").green(),
            style(path.display()).cyan()
        );
    }
    Ok(())
}
