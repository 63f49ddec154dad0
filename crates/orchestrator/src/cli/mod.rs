use clap::{Parser, Subcommand};

/// formsender — scheduled control plane for outbound form-submission
/// workloads.
#[derive(Debug, Parser)]
#[command(name = "formsender", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the trigger loop (default when no subcommand is given).
    Serve,
    /// Start one targeting now, or every active targeting when no id is given.
    Start {
        /// Targeting id; omit to start all active targetings.
        targeting_id: Option<i64>,
        /// Route to the test tables.
        #[arg(long)]
        test_mode: bool,
        /// Force the extra company table.
        #[arg(long)]
        use_extra: bool,
    },
    /// Stop one targeting's running executions.
    Stop {
        targeting_id: i64,
    },
    /// Stop every running execution on every backend.
    StopAll,
    /// Show running executions across backends.
    Status,
    /// Fire an entry handler by name (e.g. form_sender_at_7).
    Trigger {
        handler: String,
    },
    /// Send-queue operations.
    #[command(subcommand)]
    Queue(QueueCommand),
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// (Re)build today's queue for one targeting.
    Build {
        targeting_id: i64,
        #[arg(long)]
        test_mode: bool,
        #[arg(long)]
        use_extra: bool,
    },
    /// (Re)build today's queue for every active targeting.
    BuildAll,
    /// Reset the daily queue tables.
    ResetDaily {
        /// Reset the extra-table queue instead of the primary one.
        #[arg(long)]
        extra: bool,
        /// Reset the test queue.
        #[arg(long)]
        test: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path given by `FSO_CONFIG` (default
/// `formsender.toml`). Returns the parsed config and the path used.
pub fn load_config() -> anyhow::Result<(fso_domain::config::Config, String)> {
    let config_path =
        std::env::var("FSO_CONFIG").unwrap_or_else(|_| "formsender.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        tracing::warn!(path = %config_path, "config file not found, using defaults");
        fso_domain::config::Config::default()
    };
    Ok((config, config_path))
}
