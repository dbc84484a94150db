use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mvirt_lvm::audit::LvmAuditLogger;
use mvirt_lvm::command::{LvmTool, SystemRunner};
use mvirt_lvm::config::{self, Manifest};
use mvirt_lvm::pass::run_pass;
use mvirt_lvm::reconciler::{DesiredState, VolumeGroupReconciler};

#[derive(Parser)]
#[command(name = "mvirt-lvm")]
#[command(about = "mvirt LVM volume group reconciler")]
struct Args {
    /// Directory containing the LVM binaries (default: look up in PATH)
    #[arg(long, global = true)]
    bin_dir: Option<PathBuf>,

    /// Override a single binary, e.g. --tool vgs=/usr/local/sbin/vgs
    #[arg(long = "tool", value_name = "NAME=PATH", global = true, value_parser = config::parse_tool_override)]
    tools: Vec<(LvmTool, PathBuf)>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile every volume group in a manifest and print a JSON report
    Apply {
        /// Path to the JSON manifest
        #[arg(short, long)]
        manifest: PathBuf,
    },
    /// List existing volume groups
    List,
    /// Print whether a volume group exists
    Exists { name: String },
    /// Print the members of a volume group as the reconciler sees them
    Members {
        name: String,

        /// Declared physical volume (repeatable)
        #[arg(long = "physical-volume")]
        physical_volumes: Vec<String>,

        /// Report declared members for an existing group instead of querying pvs
        #[arg(long)]
        createonly: bool,
    },
    /// Remove a volume group
    Destroy { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("mvirt_lvm=info".parse()?))
        .init();

    let args = Args::parse();

    let paths = config::tool_paths(args.bin_dir.as_deref(), &args.tools);
    let runner = Arc::new(SystemRunner::new(paths));
    let reconciler = VolumeGroupReconciler::new(runner, LvmAuditLogger::new());

    match args.command {
        Commands::Apply { manifest } => {
            let manifest = Manifest::load(&manifest)
                .await
                .with_context(|| format!("Failed to load manifest {}", manifest.display()))?;
            info!(groups = manifest.volume_groups.len(), "Loaded manifest");

            let report = run_pass(&reconciler, &manifest).await;
            println!("{}", serde_json::to_string_pretty(&report)?);

            if !report.is_success() {
                anyhow::bail!(
                    "{} volume group(s) failed to reconcile",
                    report.failed()
                );
            }
        }
        Commands::List => {
            let groups = reconciler
                .instances()
                .await
                .context("Failed to list volume groups")?;
            println!("{}", serde_json::to_string_pretty(&groups)?);
        }
        Commands::Exists { name } => {
            let desired = DesiredState::new(name, Vec::<String>::new());
            println!("{}", reconciler.exists(&desired).await);
        }
        Commands::Members {
            name,
            physical_volumes,
            createonly,
        } => {
            let desired = DesiredState::new(name, physical_volumes).create_only(createonly);
            let members = reconciler
                .read_members(&desired)
                .await
                .with_context(|| format!("Failed to read members of '{}'", desired.name))?;
            println!("{}", serde_json::to_string_pretty(&members)?);
        }
        Commands::Destroy { name } => {
            let desired = DesiredState::new(name, Vec::<String>::new());
            reconciler
                .destroy(&desired)
                .await
                .with_context(|| format!("Failed to remove volume group '{}'", desired.name))?;
        }
    }

    Ok(())
}
