use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use payguard::application::context::LockContext;
use payguard::application::runner::CriticalSectionRunner;
use payguard::config::{Backoff, GuardConfig};
use payguard::domain::lock::{ResourceKey, ServiceNamespace};
use payguard::infrastructure::file::FileLockStore;
use payguard::interfaces::cli::{ExecRequest, exec_with_lock, lease_status};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the shared lease files
    #[arg(long, global = true, env = "PAYGUARD_LOCK_DIR")]
    lock_dir: Option<PathBuf>,

    /// JSON config file; command-line flags override its values
    #[arg(long, global = true, env = "PAYGUARD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command while holding the lock for an account
    Exec {
        /// Account key to lock
        #[arg(long)]
        key: String,

        #[arg(long, default_value = "payment")]
        namespace: ServiceNamespace,

        /// Maximum acquisition attempts
        #[arg(long, env = "PAYGUARD_ATTEMPTS")]
        attempts: Option<u32>,

        /// Fixed pause between attempts, in milliseconds
        #[arg(long, env = "PAYGUARD_BACKOFF_MS")]
        backoff_ms: Option<u64>,

        /// Lease lifetime in seconds
        #[arg(long, env = "PAYGUARD_TTL_SECS")]
        ttl_secs: Option<u64>,

        /// Command to run, after `--`
        #[arg(trailing_var_arg = true, required = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Show who holds the lock for an account
    Status {
        #[arg(long)]
        key: String,

        #[arg(long, default_value = "payment")]
        namespace: ServiceNamespace,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<GuardConfig> {
    match path {
        Some(path) => {
            let file = File::open(path).into_diagnostic()?;
            GuardConfig::from_reader(file).into_diagnostic()
        }
        None => Ok(GuardConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("payguard=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;
    let lock_dir = cli
        .lock_dir
        .unwrap_or_else(|| std::env::temp_dir().join("payguard-locks"));

    match cli.command {
        Commands::Exec {
            key,
            namespace,
            attempts,
            backoff_ms,
            ttl_secs,
            command,
        } => {
            if let Some(attempts) = attempts {
                config.retry.max_attempts = attempts;
            }
            if let Some(ms) = backoff_ms {
                config.retry.backoff = Backoff::Fixed {
                    delay: Duration::from_millis(ms),
                };
            }
            if let Some(secs) = ttl_secs {
                config.lease_ttl = Duration::from_secs(secs);
            }
            config.validate().into_diagnostic()?;

            let key = ResourceKey::new(key).into_diagnostic()?;
            let request = ExecRequest::new(namespace, key, command).into_diagnostic()?;
            let store = FileLockStore::open(&lock_dir, config.lease_ttl).into_diagnostic()?;
            let ctx = LockContext::new(Arc::new(store), config);
            let runner = CriticalSectionRunner::new(&ctx);

            let status = tokio::task::spawn_blocking(move || exec_with_lock(&runner, &request))
                .await
                .into_diagnostic()?
                .into_diagnostic()?;

            if !status.success() {
                std::process::exit(status.code().unwrap_or(1));
            }
        }
        Commands::Status { key, namespace } => {
            let key = ResourceKey::new(key).into_diagnostic()?;
            let store = FileLockStore::open(&lock_dir, config.lease_ttl).into_diagnostic()?;
            let status = lease_status(&store, namespace, &key).into_diagnostic()?;
            println!("{namespace}/{key}: {status}");
        }
    }

    Ok(())
}

