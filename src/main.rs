//! FlashArray storage plugin admin CLI
//!
//! Operator-facing wrapper over the orchestrator: activate a storage,
//! inspect capacity, allocate and free volumes, manage snapshots and
//! clones. The host platform drives the same operations through the
//! library; this binary exists for diagnosis and repair.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pve_purestorage::{naming, Orchestrator, Result, StorageConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Pure Storage FlashArray storage plugin
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the storage configuration (JSON)
    #[arg(long, env = "PURESTORAGE_CONFIG", default_value = "/etc/pve/purestorage.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Array reachability and capacity
    Status,
    /// Bring the storage up on this node
    Activate,
    /// Take the storage down on this node
    Deactivate,
    /// List images in the storage
    List {
        /// Restrict to one VM
        #[arg(long)]
        vmid: Option<u32>,
    },
    /// List destroyed volumes still recoverable on the array
    ListDestroyed,
    /// Recover a destroyed volume by array name
    Recover { name: String },
    /// Allocate a raw volume
    Alloc {
        #[arg(long)]
        vmid: u32,
        /// Explicit host-side name (state/cloudinit shapes)
        #[arg(long)]
        name: Option<String>,
        /// Size in KiB
        #[arg(long)]
        size_kib: u64,
    },
    /// Free a volume (soft delete)
    Free { volname: String },
    /// Grow a volume to a new size in bytes
    Resize {
        volname: String,
        size: u64,
        /// The VM is running; propagate the new size online
        #[arg(long)]
        running: bool,
    },
    /// Rename a volume's host-side identity
    Rename { volname: String, target: String },
    /// Snapshot operations
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
    /// Clone a volume or template
    Clone {
        volname: String,
        #[arg(long)]
        vmid: u32,
        #[arg(long)]
        snap: Option<String>,
    },
    /// Convert a VM disk into a template
    CreateBase { volname: String },
    /// Resolve the local block device path
    Path {
        volname: String,
        #[arg(long)]
        snap: Option<String>,
    },
    /// Show this node's initiators
    Initiators,
}

#[derive(Subcommand, Debug)]
enum SnapshotAction {
    Create { volname: String, snap: String },
    Delete { volname: String, snap: String },
    Rollback { volname: String, snap: String },
    List { volname: String },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let raw = std::fs::read_to_string(&args.config)?;
    let config: StorageConfig = serde_json::from_str(&raw)?;
    let orchestrator = Orchestrator::connect(config).await?;

    match args.command {
        Command::Status => {
            let status = orchestrator.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Activate => {
            orchestrator.activate_storage().await?;
            println!("activated");
        }
        Command::Deactivate => {
            orchestrator.deactivate_storage().await?;
            println!("deactivated");
        }
        Command::List { vmid } => {
            let images = orchestrator.list_images(vmid).await?;
            println!("{}", serde_json::to_string_pretty(&images)?);
        }
        Command::ListDestroyed => {
            let glob = naming::pod_qualify(
                orchestrator.config().pod.as_deref(),
                &naming::storage_volume_glob(&orchestrator.config().storage),
            );
            let volumes = orchestrator.client().list_destroyed_volumes(&glob).await?;
            println!("{}", serde_json::to_string_pretty(&volumes)?);
        }
        Command::Recover { name } => {
            orchestrator.client().recover_volume(&name).await?;
            println!("recovered {name}");
        }
        Command::Alloc {
            vmid,
            name,
            size_kib,
        } => {
            let volname = orchestrator
                .alloc_image(vmid, name.as_deref(), "raw", size_kib)
                .await?;
            println!("{volname}");
        }
        Command::Free { volname } => {
            orchestrator.free_image(&volname).await?;
            println!("freed {volname}");
        }
        Command::Resize {
            volname,
            size,
            running,
        } => {
            let new_size = orchestrator.volume_resize(&volname, size, running).await?;
            println!("{new_size}");
        }
        Command::Rename { volname, target } => {
            let renamed = orchestrator.rename_volume(&volname, &target).await?;
            println!("{renamed}");
        }
        Command::Snapshot { action } => match action {
            SnapshotAction::Create { volname, snap } => {
                orchestrator.volume_snapshot(&volname, &snap, None).await?;
                println!("created {volname}@{snap}");
            }
            SnapshotAction::Delete { volname, snap } => {
                orchestrator.volume_snapshot_delete(&volname, &snap).await?;
                println!("deleted {volname}@{snap}");
            }
            SnapshotAction::Rollback { volname, snap } => {
                orchestrator
                    .volume_snapshot_rollback(&volname, &snap)
                    .await?;
                println!("rolled back {volname} to {snap}");
            }
            SnapshotAction::List { volname } => {
                for snap in orchestrator.volume_snapshot_list(&volname).await? {
                    println!("{snap}");
                }
            }
        },
        Command::Clone {
            volname,
            vmid,
            snap,
        } => {
            let clone = orchestrator
                .clone_image(&volname, vmid, snap.as_deref())
                .await?;
            println!("{clone}");
        }
        Command::CreateBase { volname } => {
            let base = orchestrator.create_base(&volname).await?;
            println!("{base}");
        }
        Command::Path { volname, snap } => {
            let path = orchestrator.path(&volname, snap.as_deref()).await?;
            println!("{}", path.display());
        }
        Command::Initiators => {
            for initiator in orchestrator.fabric().initiators().await? {
                println!("{initiator}");
            }
        }
    }
    Ok(())
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}
