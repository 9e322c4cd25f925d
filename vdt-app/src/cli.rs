use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DevtoolsConfig;
use crate::logging;
use crate::server::assets::{self, AssetClassifier};
use crate::server::graph::ImportScanner;
use crate::server::{BuildServer, ServerNotification};

#[derive(Parser, Debug)]
#[command(name = "vdt", about = "Devtools bridge and build-tool server", version)]
struct Cli {
    /// Config file, defaults to vdt.toml in the platform config directory
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level for vdt (error, warn, info, debug, trace)
    #[arg(long = "log-level", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the build-tool server for a project
    Serve {
        /// Project root, defaults to the configured root or the working
        /// directory
        root: Option<PathBuf>,
        /// Bind exactly this port instead of searching the configured range
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        host: Option<String>,
    },
    /// List the static assets of a project
    Assets {
        root: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Print the static import graph of a project
    Graph {
        root: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

pub fn launch() {
    if let Err(e) = try_launch() {
        eprintln!("vdt: {e:#}");
        std::process::exit(1);
    }
}

fn try_launch() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = DevtoolsConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    logging::init(&config.log_level)?;
    tracing::debug!("Loaded config: {:?}", config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli.command, config))
}

async fn run(command: Command, mut config: DevtoolsConfig) -> anyhow::Result<()> {
    match command {
        Command::Serve { root, port, host } => {
            if root.is_some() {
                config.server.root = root;
            }
            if let Some(port) = port {
                config.server.base_port = port;
                config.server.port_attempts = 1;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            serve(config).await
        }
        Command::Assets { root, json } => {
            let root = project_root(root.or(config.server.root))?;
            let assets = assets::scan(&root, &AssetClassifier::new()?);
            if json {
                println!("{}", serde_json::to_string_pretty(&assets)?);
            } else {
                for asset in &assets {
                    let kind = format!("{:?}", asset.kind).to_lowercase();
                    println!("{:<6} {:>10}  {}", kind, asset.size, asset.path);
                }
            }
            Ok(())
        }
        Command::Graph { root, json } => {
            let root = project_root(root.or(config.server.root))?;
            let modules = ImportScanner::new()?.graph(&root);
            if json {
                println!("{}", serde_json::to_string_pretty(&modules)?);
            } else {
                for module in &modules {
                    println!("{}", module.id);
                    for dep in &module.deps {
                        println!("  -> {dep}");
                    }
                }
            }
            Ok(())
        }
    }
}

async fn serve(config: DevtoolsConfig) -> anyhow::Result<()> {
    let server = BuildServer::start(&config.server).await?;
    println!(
        "vdt server: ws://{}:{} ({})",
        config.server.host,
        server.port(),
        server.root().display()
    );

    let notifications = server.notifications().clone();
    std::thread::spawn(move || {
        for notification in notifications.iter() {
            match notification {
                ServerNotification::ClientConnected { peer } => {
                    tracing::info!("Client {} attached", peer)
                }
                ServerNotification::ModuleUpdated { id } => {
                    tracing::debug!("Pushed module update for {}", id)
                }
                ServerNotification::Stopped => break,
                other => tracing::trace!("{:?}", other),
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    server.shutdown();
    Ok(())
}

fn project_root(root: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let root = match root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    Ok(root.canonicalize()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from([
            "vdt",
            "--log-level",
            "debug",
            "serve",
            "/srv/app",
            "--port",
            "4000",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Command::Serve { root, port, host } => {
                assert_eq!(root, Some(PathBuf::from("/srv/app")));
                assert_eq!(port, Some(4000));
                assert_eq!(host, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let cli = Cli::try_parse_from(["vdt", "assets", "--json", "--config", "vdt.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("vdt.toml")));
        assert!(matches!(cli.command, Command::Assets { json: true, .. }));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["vdt"]).is_err());
    }
}
