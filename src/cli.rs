use std::fmt::{self, Write as _};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use node_pool::{Config, ConfigKey, DEFAULT_CONFIG_PATH, PlanError, PoolPlan};
use tracing::{info, warn};

use crate::logging::{self, LogFormat};

const MASK: &str = "********";

#[derive(Debug)]
pub enum Error {
    Plan(PlanError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Plan(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Plan(err) => Some(err),
        }
    }
}

impl From<PlanError> for Error {
    fn from(err: PlanError) -> Self {
        Error::Plan(err)
    }
}

/// Test agent CLI
///
/// Checks what a test run would work with before any VM is created:
/// the effective backend configuration and the node pool plan.
#[derive(Debug, Parser)]
#[command(name = "testagent", version = "0.1.0")]
#[command(about = "Inspect test node pool configuration and pool plans")]
pub struct Cli {
    /// Log output format
    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    pub fn handle() -> Result<(), Error> {
        let cli = Self::parse();
        let _guard = logging::init(cli.log_format, cli.log_file.as_deref());
        cli.run()
    }

    fn run(self) -> Result<(), Error> {
        match self.command {
            Commands::Config(args) => {
                let config = Config::load(&args.config);
                print!("{}", render_config(&config));
            }

            Commands::Plan(args) => {
                let plan = PoolPlan::from_path(&args.file)?;
                plan.validate()?;
                info!(file = %args.file.display(), nodes = plan.nodes().len(), "Plan is valid");
                for spec in plan.beyond_capacity() {
                    warn!(node = %spec.name(), "Node is beyond what one provisioning call creates");
                }
                print!("{}", render_plan(&plan));
            }
        };

        Ok(())
    }
}

/// Top-level user commands
#[derive(Debug, Subcommand)]
enum Commands {
    /// Show the effective configuration
    ///
    /// Recognized keys from the file override the defaults.
    /// Credentials and passwords are masked.
    Config(ConfigArgs),

    /// Validate a pool plan and show what it provisions
    Plan(PlanArgs),
}

#[derive(Debug, Args)]
struct ConfigArgs {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[derive(Debug, Args)]
struct PlanArgs {
    /// Path to the pool plan YAML file
    file: PathBuf,
}

fn render_config(config: &Config) -> String {
    let mut out = String::new();
    for key in ConfigKey::ALL {
        let value = if key.is_secret() { MASK } else { config.get(key) };
        let _ = writeln!(out, "{:<22} {}", key.as_str(), value);
    }
    out
}

fn render_plan(plan: &PoolPlan) -> String {
    let settings = plan.settings();
    let mut out = String::new();

    let _ = writeln!(
        out,
        "retry_limit={} batch_size={} display_port_base={}",
        settings.retry_limit, settings.batch_size, settings.display_port_base
    );
    let _ = writeln!(out, "{:<16} {:<20} {:<10} {}", "NAME", "TEMPLATE", "KEEP_ALIVE", "RUN_LIST");
    for spec in plan.nodes() {
        let run_list = if spec.has_run_list() {
            spec.recipes().join(",")
        } else {
            "-".to_string()
        };
        let keep_alive = if spec.is_keep_alive() { "yes" } else { "no" };
        let _ = writeln!(
            out,
            "{:<16} {:<20} {:<10} {}",
            spec.name(),
            spec.template(),
            keep_alive,
            run_list
        );
    }

    let _ = writeln!(out, "capacity: {} node(s) per provisioning call", settings.capacity());
    let beyond: Vec<&str> = plan.beyond_capacity().iter().map(|spec| spec.name()).collect();
    if !beyond.is_empty() {
        let _ = writeln!(out, "not provisioned: {}", beyond.join(", "));
    }
    out
}
