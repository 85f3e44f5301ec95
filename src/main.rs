use clap::{Parser, Subcommand};
use raidmesh::commands;
use raidmesh::{ConsoleContext, logging, readline};
use raidmesh_core::context::{EngineConfig, EngineConfigExt};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about = "raidmesh operator console")]
struct Args {
    /// Load this TOML file instead of the platform config
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let _log_guard = logging::init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => EngineConfig::load_from_path(path).map_err(|e| e.to_string())?,
        None => EngineConfig::load(),
    };
    let ctx = ConsoleContext::new(config).await;

    loop {
        let line = readline()?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match respond(line, &ctx) {
            Ok(quit) => {
                if quit {
                    break;
                }
            }
            Err(err) => {
                write!(std::io::stdout(), "{err}").map_err(|e| e.to_string())?;
                std::io::stdout().flush().map_err(|e| e.to_string())?;
            }
        }
    }

    ctx.shutdown().await;
    Ok(())
}

#[derive(Parser)]
#[command(version, about = "raidmesh")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a peer node (or reactivate a known one)
    RegisterNode {
        id: String,
        #[arg(short, long)]
        address: Option<String>,
        #[arg(short, long)]
        region: Option<String>,
    },
    Heartbeat {
        id: String,
        #[arg(default_value_t = 0.0)]
        load: f64,
    },
    /// Mark a node inactive and cut it off from replication
    NodeDown {
        id: String,
        /// Move its encounters now instead of on their next write
        #[arg(short, long)]
        failover: bool,
    },
    Create {
        kind: String,
        #[arg(short, long, default_value_t = 1)]
        tier: i64,
        #[arg(short, long)]
        region: Option<String>,
    },
    Hit {
        encounter: String,
        contributor: String,
        amount: f64,
    },
    Kill {
        encounter: String,
        #[arg(short, long)]
        killer: Option<String>,
    },
    Despawn {
        encounter: String,
        #[arg(short, long, default_value = "manual")]
        reason: String,
    },
    Show {
        encounter: String,
    },
    Top {
        encounter: String,
        #[arg(short, long, default_value_t = 5)]
        n: usize,
    },
    Nodes,
    History {
        #[arg(short, long, default_value_t = 0)]
        page: usize,
        #[arg(short, long, default_value_t = 10)]
        size: usize,
    },
    Stats,
    Sweep,
    /// Show or set the placement strategy
    Strategy {
        name: Option<String>,
    },
    Exit,
}

fn respond(line: &str, ctx: &ConsoleContext) -> Result<bool, String> {
    let mut args = shlex::split(line).ok_or("error: Invalid quoting")?;
    args.insert(0, "raidmesh".to_string());
    let cli = Cli::try_parse_from(args).map_err(|e| e.to_string())?;

    match &cli.command {
        Some(Commands::RegisterNode { id, address, region }) => {
            commands::register_node(ctx, id, address.as_deref(), region.as_deref())?
        }
        Some(Commands::Heartbeat { id, load }) => commands::heartbeat(ctx, id, *load)?,
        Some(Commands::NodeDown { id, failover }) => commands::node_down(ctx, id, *failover)?,
        Some(Commands::Create { kind, tier, region }) => {
            commands::create(ctx, kind, *tier, region.as_deref())?
        }
        Some(Commands::Hit {
            encounter,
            contributor,
            amount,
        }) => commands::hit(ctx, encounter, contributor, *amount)?,
        Some(Commands::Kill { encounter, killer }) => commands::kill(ctx, encounter, killer.as_deref())?,
        Some(Commands::Despawn { encounter, reason }) => commands::despawn(ctx, encounter, reason)?,
        Some(Commands::Show { encounter }) => commands::show(ctx, encounter)?,
        Some(Commands::Top { encounter, n }) => commands::top(ctx, encounter, *n)?,
        Some(Commands::Nodes) => commands::nodes(ctx)?,
        Some(Commands::History { page, size }) => commands::history(ctx, *page, *size)?,
        Some(Commands::Stats) => commands::stats(ctx)?,
        Some(Commands::Sweep) => commands::sweep(ctx)?,
        Some(Commands::Strategy { name }) => commands::strategy(ctx, name.as_deref())?,
        Some(Commands::Exit) => {
            commands::exit()?;
            return Ok(true);
        }
        None => {}
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Commands {
        let mut args = shlex::split(line).unwrap();
        args.insert(0, "raidmesh".to_string());
        Cli::try_parse_from(args).unwrap().command.unwrap()
    }

    #[test]
    fn parses_hit_with_quoted_contributor() {
        match parse("hit 3f2a \"Sir Lancelot\" 250.5") {
            Commands::Hit {
                encounter,
                contributor,
                amount,
            } => {
                assert_eq!(encounter, "3f2a");
                assert_eq!(contributor, "Sir Lancelot");
                assert_eq!(amount, 250.5);
            }
            _ => panic!("expected hit"),
        }
    }

    #[test]
    fn create_defaults_to_tier_one() {
        assert!(matches!(parse("create dragon"), Commands::Create { tier: 1, region: None, .. }));
        assert!(matches!(parse("node-down b --failover"), Commands::NodeDown { failover: true, .. }));
    }
}
