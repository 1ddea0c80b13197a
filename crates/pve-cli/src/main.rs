use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "pve")]
#[command(about = "Patrol verification engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> site -> overrides)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Validate layered config and report keys the chosen mode never reads
    ConfigCheck {
        /// DAEMON | REPLAY
        #[arg(long, default_value = "DAEMON")]
        mode: String,

        /// Exit non-zero when any key is unused
        #[arg(long, default_value_t = false)]
        fail_on_unused: bool,

        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Scan point file utilities
    Points {
        #[command(subcommand)]
        cmd: PointsCmd,
    },

    /// Feed a scan point file and an event file through the engine offline
    Replay {
        /// JSON array of scan points
        #[arg(long)]
        points: String,

        /// Events as JSONL (one object per line) or CSV with a header row
        #[arg(long)]
        events: String,

        /// jsonl | csv. Defaults to the file extension.
        #[arg(long)]
        format: Option<String>,

        /// Layered config paths in merge order. Built-in defaults when omitted.
        #[arg(long = "config")]
        config_paths: Vec<String>,

        /// Close every round whose grace period ended by this RFC 3339 instant
        #[arg(long)]
        until: Option<String>,

        /// RFC 3339 instant the point configuration takes effect. Defaults to
        /// local midnight of the earliest event.
        #[arg(long)]
        effective_from: Option<String>,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply embedded SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum PointsCmd {
    /// Load a scan point file into a fresh registry and report problems.
    Validate {
        path: String,

        /// RFC 3339 effective instant (default: now)
        #[arg(long)]
        effective_from: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = pve_db::connect_from_env(pve_db::ENV_DB_URL).await?;
            match cmd {
                DbCmd::Status => {
                    let s = pve_db::status(&pool).await?;
                    println!("db_ok={} has_outcomes_table={}", s.ok, s.has_outcomes_table);
                }
                DbCmd::Migrate => {
                    pve_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = pve_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::ConfigCheck {
            mode,
            fail_on_unused,
            paths,
        } => commands::config_check(&mode, fail_on_unused, &paths)?,

        Commands::Points { cmd } => match cmd {
            PointsCmd::Validate {
                path,
                effective_from,
            } => commands::points_validate(&path, effective_from.as_deref())?,
        },

        Commands::Replay {
            points,
            events,
            format,
            config_paths,
            until,
            effective_from,
        } => {
            let out = commands::replay::run(commands::replay::ReplayArgs {
                points_path: &points,
                events_path: &events,
                format: format.as_deref(),
                config_paths: &config_paths,
                until: until.as_deref(),
                effective_from: effective_from.as_deref(),
            })?;
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }

    Ok(())
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();
}
