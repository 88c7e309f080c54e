use std::path::PathBuf;

use clap::{Parser, Subcommand};

use cinder_image::{Fetcher, LayerCache};
use cinder_remote::RegistryClient;
use cinder_vm::{AssetStore, CacheContext, CreateOpts, RunOpts, create_microvm, run_microvm};

#[derive(Parser)]
#[command(name = "cinder")]
#[command(about = "Build and run firecracker microVMs from container images")]
struct Cli {
    /// Base directory for microVMs, assets and the layer cache
    #[arg(long, global = true)]
    base: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the init and launcher binaries into the asset cache
    Init,
    /// Build a new microVM from a container image
    Create {
        /// Name of the microVM
        name: String,

        /// Container image to build the rootfs from
        #[arg(long)]
        image: String,

        /// Size of the rootfs drive
        #[arg(long, default_value = "400M")]
        size: String,

        /// Filesystem of the rootfs drive
        #[arg(long, default_value = "ext4")]
        fstype: String,

        /// File name of the rootfs drive
        #[arg(long = "drive-name", default_value = "rootfs.ext4")]
        drive_name: String,

        /// Also build the init drive so the microVM is runnable
        #[arg(long)]
        init: bool,
    },
    /// Boot an existing microVM and wait for it to exit
    Run {
        /// Name of the microVM
        name: String,

        /// Command to run instead of the image's command, this run only
        #[arg(long)]
        exec: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let ctx = CacheContext::new(cli.base.unwrap_or_else(CacheContext::default_base));
    ctx.ensure_layout().await?;
    tracing::debug!(base = %ctx.base().display(), "using cache directory");

    let assets = AssetStore::new(ctx.assets_dir())?;

    match cli.command {
        Commands::Init => {
            assets.ensure_ready().await?;
            println!("assets ready in {}", assets.dir().display());
        }
        Commands::Create {
            name,
            image,
            size,
            fstype,
            drive_name,
            init,
        } => {
            let cache = LayerCache::open(ctx.images_dir()).await?;
            let fetcher = Fetcher::new(RegistryClient::new()?, cache);

            let opts = CreateOpts {
                name,
                image,
                drive_name,
                fstype,
                size,
                init,
            };
            let dir = create_microvm(&ctx, &assets, &fetcher, &opts).await?;
            println!("created microvm in {}", dir.display());
        }
        Commands::Run { name, exec } => {
            run_microvm(&ctx, &assets, &RunOpts { name, exec }).await?;
        }
    }

    Ok(())
}
