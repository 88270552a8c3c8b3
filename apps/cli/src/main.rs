mod config;
mod prompt;

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    AlwaysConfirm, ClientEvent, Confirmer, HttpImageApi, SelectedFile, UploadController,
    UploadRequest,
};
use shared::domain::{ImageId, ProcessingAction};
use storage::{ImageCatalog, Storage};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    config::{load_settings, normalize_database_url},
    prompt::TerminalConfirmer,
};

#[derive(Parser, Debug)]
#[command(name = "imgproc", about = "Upload images for processing and track their status")]
struct Cli {
    /// Base URL of the image service.
    #[arg(long, global = true)]
    server_url: Option<String>,
    /// SQLite database holding the tracked image list.
    #[arg(long, global = true)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload an image and wait until processing finishes.
    Upload {
        file: PathBuf,
        /// Resize, Miniature_generate, Watermark or Grayscale. Repeatable.
        #[arg(short, long = "action", value_name = "ACTION")]
        actions: Vec<ProcessingAction>,
        /// Return right after the upload instead of waiting for processing.
        #[arg(long)]
        no_wait: bool,
    },
    /// Show the tracked images.
    List,
    /// Resume polling for pending images and wait until none remain.
    Watch,
    /// Delete an image from the service and stop tracking it.
    Delete {
        id: String,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
    /// Print the processed image URL, or save the image with --output.
    View {
        id: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings()?;
    if let Some(server_url) = cli.server_url {
        settings.server_url = server_url;
    }
    if let Some(database_url) = cli.database_url {
        settings.database_url = normalize_database_url(&database_url);
    }
    info!(
        server_url = %settings.server_url,
        database_url = %settings.database_url,
        "imgproc starting"
    );

    let api = HttpImageApi::new(&settings.server_url).context("invalid server url")?;
    let storage = Storage::new(&settings.database_url).await?;
    let confirmer: Arc<dyn Confirmer> = match &cli.command {
        Command::Delete { yes: true, .. } => Arc::new(AlwaysConfirm),
        _ => Arc::new(TerminalConfirmer),
    };
    let controller = UploadController::new(
        Arc::new(api),
        ImageCatalog::new(Arc::new(storage)),
        confirmer,
        settings.poll_settings(),
    );
    let mut events = controller.subscribe_events();

    let result = run(cli.command, &controller, &mut events).await;
    controller.shutdown().await;
    result
}

async fn run(
    command: Command,
    controller: &Arc<UploadController>,
    events: &mut broadcast::Receiver<ClientEvent>,
) -> Result<ExitCode> {
    match command {
        Command::Upload {
            file,
            actions,
            no_wait,
        } => {
            let selected = read_selected_file(&file).await?;
            controller.start().await;
            let submitted = controller
                .submit(UploadRequest::new(selected, actions))
                .await;
            print_pending_notices(events);
            let record = match submitted {
                Ok(record) => record,
                Err(_) => return Ok(ExitCode::FAILURE),
            };
            println!("🆔 {}", record.id);
            if !no_wait {
                wait_with_notices(controller, events).await;
                print!("{}", controller.render().await);
            }
        }
        Command::List => {
            controller.restore().await;
            print!("{}", controller.render().await);
        }
        Command::Watch => {
            let resumed = controller.start().await;
            info!(resumed, "watching pending images");
            wait_with_notices(controller, events).await;
            print!("{}", controller.render().await);
        }
        Command::Delete { id, .. } => {
            controller.restore().await;
            let deleted = controller.delete_image(&ImageId::new(id)).await;
            print_pending_notices(events);
            if deleted.is_err() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::View { id, output } => {
            controller.restore().await;
            let image_id = ImageId::new(id);
            match output {
                Some(path) => match controller.download_image(&image_id).await {
                    Ok(bytes) => {
                        tokio::fs::write(&path, bytes)
                            .await
                            .with_context(|| format!("failed to write '{}'", path.display()))?;
                        println!("💾 {}", path.display());
                    }
                    Err(err) => {
                        print_pending_notices(events);
                        eprintln!("❌ {err}");
                        return Ok(ExitCode::FAILURE);
                    }
                },
                None => match controller.view_url(&image_id).await {
                    Ok(url) => println!("{url}"),
                    Err(err) => {
                        eprintln!("❌ {err}");
                        return Ok(ExitCode::FAILURE);
                    }
                },
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn read_selected_file(path: &Path) -> Result<SelectedFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let media_type = mime_guess::from_path(path).first_raw().map(str::to_string);
    Ok(SelectedFile {
        filename,
        media_type,
        bytes,
    })
}

/// Prints notices as they arrive until every status poll has finished.
async fn wait_with_notices(
    controller: &UploadController,
    events: &mut broadcast::Receiver<ClientEvent>,
) {
    let idle = controller.wait_for_idle();
    tokio::pin!(idle);
    loop {
        tokio::select! {
            _ = &mut idle => break,
            event = events.recv() => match event {
                Ok(ClientEvent::Notice(notice)) => println!("{notice}"),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "missed client events"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    print_pending_notices(events);
}

fn print_pending_notices(events: &mut broadcast::Receiver<ClientEvent>) {
    while let Ok(event) = events.try_recv() {
        if let ClientEvent::Notice(notice) = event {
            println!("{notice}");
        }
    }
}
