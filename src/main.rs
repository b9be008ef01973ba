use std::{error::Error, path::PathBuf};

use cam_courier::{
    camera::{run_acquisition, DEFAULT_CAMERA_URL},
    storage::{StorageAuth, StorageClient},
    uploader::upload_all_files,
};
use clap::Parser;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// cam-courier command line arguments
#[derive(Parser, Debug)]
#[command(version)]
struct CourierArgs {
    /// Pull all media off the camera into the staging folder, then wipe the camera
    #[arg(short = 'a', long, env = "CAM_COURIER_ACQUIRE")]
    acquire: bool,

    /// Upload everything in the staging folder to the destination folder
    #[arg(short = 'u', long, env = "CAM_COURIER_UPLOAD")]
    upload: bool,

    /// Authenticate and list the storage root folder
    #[arg(short = 'c', long, env = "CAM_COURIER_CHECK")]
    check: bool,

    /// The staging folder shared by both flows, no trailing slash
    #[arg(
        short = 'f',
        long,
        default_value = "to_upload",
        env = "CAM_COURIER_STAGING_DIR"
    )]
    staging_dir: PathBuf,

    /// The camera's HTTP base URL
    #[arg(long, default_value = DEFAULT_CAMERA_URL, env = "CAM_COURIER_CAMERA_URL")]
    camera_url: String,

    /// Destination folder id for uploads
    #[arg(short = 'd', long, env = "BOX_DEST_FOLDER_ID")]
    dest_folder: Option<String>,

    /// Developer token; when set the CCG credentials are ignored
    #[arg(long, env = "BOX_DEV_TOKEN", hide_env_values = true)]
    dev_token: Option<String>,

    /// CCG client id
    #[arg(long, env = "BOX_CLIENT_ID", hide_env_values = true)]
    client_id: Option<String>,

    /// CCG client secret
    #[arg(long, env = "BOX_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// CCG enterprise id
    #[arg(long, env = "BOX_ENTERPRISE_ID", hide_env_values = true)]
    enterprise_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    let cli = CourierArgs::parse();

    println!("Initializing cam-courier...");
    // construct a subscriber that prints formatted traces to stdout
    // if RUST_LOG is not set, defaults to loglevel INFO
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .finish();
    // use that subscriber to process traces emitted after this point
    tracing::subscriber::set_global_default(subscriber).expect("Could not init tracing");

    if !cli.acquire && !cli.upload && !cli.check {
        warn!("Nothing to do, pass --acquire, --upload, or --check");
        return Ok(());
    }

    if cli.acquire {
        info!("Running capture acquisition");
        run_acquisition(&cli.camera_url, &cli.staging_dir).await?;
    }

    if cli.upload || cli.check {
        let auth = StorageAuth::from_credentials(
            cli.dev_token,
            cli.client_id,
            cli.client_secret,
            cli.enterprise_id,
        )?;
        let client = StorageClient::authenticate(auth).await?;

        if cli.check {
            info!("Listing the storage root folder");
            for item in client.list_folder("0").await? {
                info!("- {} | Name: {} | ID: {}", item.item_type, item.name, item.id);
            }
        }

        if cli.upload {
            let dest_folder = cli.dest_folder.ok_or(
                "No destination folder configured, set --dest-folder or BOX_DEST_FOLDER_ID",
            )?;
            info!(
                "Uploading {} to folder {}",
                cli.staging_dir.display(),
                dest_folder
            );
            upload_all_files(&client, &cli.staging_dir, &dest_folder).await?;
        }
    }

    Ok(())
}
