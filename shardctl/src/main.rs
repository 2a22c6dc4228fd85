use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use cluster_shard::{Arg, Resolver, ShardedClient, TopologyConfig, TOPOLOGY_ENV};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod render;

#[derive(Parser)]
#[command(name = "shardctl")]
#[command(about = "Inspect and query a sharded Redis deployment")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Topology document (JSON)
    #[arg(short, long, global = true, env = TOPOLOGY_ENV)]
    topology: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Read everything from primaries
    #[arg(long, global = true)]
    primaries_only: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which partition owns a key (no network access)
    Locate(LocateArgs),

    /// Run one command through the sharded client
    Exec(ExecArgs),

    /// Key count per node and in total
    Dbsize,

    /// List keys matching a pattern across every partition
    Keys(KeysArgs),

    /// Print the loaded topology
    Topology,
}

#[derive(clap::Args)]
struct LocateArgs {
    key: String,

    /// Route by this tag instead of the key's own `{tag}`
    #[arg(long)]
    tag: Option<String>,
}

#[derive(clap::Args)]
struct ExecArgs {
    /// Command name, e.g. `get` or `config_get` (any case)
    command: String,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[derive(clap::Args)]
struct KeysArgs {
    #[arg(default_value = "*")]
    pattern: String,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so command output stays pipeable.
    if std::env::var("SHARDCTL_LOG_JSON").is_ok() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_topology(cli: &Cli) -> anyhow::Result<TopologyConfig> {
    let path = cli
        .topology
        .as_ref()
        .with_context(|| format!("no topology given; pass --topology or set {}", TOPOLOGY_ENV))?;
    let mut config = TopologyConfig::from_file(path)
        .with_context(|| format!("failed to load topology from {}", path.display()))?;
    if cli.primaries_only {
        config.primaries_only = true;
    }
    Ok(config)
}

async fn connect(config: &TopologyConfig) -> anyhow::Result<ShardedClient> {
    ShardedClient::connect(config)
        .await
        .context("failed to connect to the cluster")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_topology(&cli)?;
    let json = cli.format == OutputFormat::Json;

    match cli.command {
        Commands::Locate(args) => {
            let key = match args.tag {
                Some(tag) => Arg::tagged(tag, args.key.clone()),
                None => Arg::from(&args.key),
            };
            let resolver = Resolver::new(config.partitions.len() as u32);
            let ordinal = resolver.resolve(key.hash_key());
            let partition = &config.partitions[(ordinal - 1) as usize];

            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "key": args.key,
                        "hash_key": String::from_utf8_lossy(key.hash_key()),
                        "ordinal": ordinal,
                        "partition": partition.name,
                        "primary": partition.primary.to_string(),
                    })
                );
            } else {
                println!("{} -> {} (#{}, {})", args.key, partition.name, ordinal, partition.primary);
            }
        }
        Commands::Exec(args) => {
            let client = connect(&config).await?;
            let reply = client
                .dispatch(&args.command.to_ascii_lowercase(), args.args)
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&render::reply_to_json(&reply))?);
            } else {
                println!("{}", render::reply_to_text(&reply));
            }
        }
        Commands::Dbsize => {
            let client = connect(&config).await?;
            let sizes = client.dbsize().await?;
            if json {
                let nodes: serde_json::Map<String, serde_json::Value> = sizes
                    .iter()
                    .map(|(node, size)| (node.to_string(), serde_json::json!(size)))
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "nodes": nodes,
                        "total": sizes.values().sum::<i64>(),
                    }))?
                );
            } else {
                println!("{}", render::sizes_to_text(&sizes));
            }
        }
        Commands::Keys(args) => {
            let client = connect(&config).await?;
            let mut keys: Vec<String> = client.keys(&args.pattern).await?;
            keys.sort();
            tracing::debug!(count = keys.len(), pattern = %args.pattern, "Keys collected");
            if json {
                println!("{}", serde_json::to_string_pretty(&keys)?);
            } else {
                for key in keys {
                    println!("{}", key);
                }
            }
        }
        Commands::Topology => {
            let mut redacted = config.clone();
            for partition in &mut redacted.partitions {
                partition.primary.password = partition.primary.password.as_ref().map(|_| "***".into());
                if let Some(secondary) = partition.secondary.as_mut() {
                    secondary.password = secondary.password.as_ref().map(|_| "***".into());
                }
            }
            println!("{}", serde_json::to_string_pretty(&redacted)?);
        }
    }

    Ok(())
}
