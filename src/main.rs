//! vidflac command-line front end
//!
//! Enqueues the given video URLs (resuming any persisted queue first) and
//! runs the download pipeline until everything settles or ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vidflac::services::FileIndex;
use vidflac::{Collaborators, Config, EnqueueRequest, Queue};

#[derive(Debug, Parser)]
#[command(name = "vidflac", about = "Archive music videos with lossless audio")]
struct Cli {
    /// Video URLs to enqueue
    urls: Vec<String>,

    /// Group the given URLs as a named playlist (numbered output files
    /// plus an .m3u8 when the batch finishes)
    #[arg(long)]
    playlist: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vidflac=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    std::fs::create_dir_all(&config.data_dir)?;
    info!(data_dir = %config.data_dir.display(), "Starting vidflac");

    // File index: load persisted state, then rescan the library in the
    // background to pick up external changes
    let file_index = FileIndex::new(&config.data_dir);
    if let Err(e) = file_index.load().await {
        warn!(error = %e, "File index load failed, starting empty");
    }
    {
        let index = file_index.clone();
        let root = config.output_directory.clone();
        tokio::spawn(async move {
            if let Err(e) = index.scan(&root).await {
                warn!(error = %e, "Library scan failed");
            }
        });
    }

    let collaborators = Arc::new(Collaborators::production(&config)?);
    let queue = Queue::new(config, file_index, collaborators);

    if let Err(e) = queue.load().await {
        warn!(error = %e, "Queue load failed, starting empty");
    }
    queue.start();
    queue.start_autosave(Duration::from_secs(30));

    for (position, url) in cli.urls.iter().enumerate() {
        let request = EnqueueRequest {
            video_url: url.clone(),
            playlist_name: cli.playlist.clone(),
            playlist_position: if cli.playlist.is_some() {
                (position + 1) as u32
            } else {
                0
            },
            ..Default::default()
        };
        match queue.enqueue(request) {
            Ok(item) => info!(item_id = %item.id, url = %url, "Enqueued"),
            Err(e) => error!(url = %url, error = %e, "Rejected"),
        }
    }

    // Run until the queue settles or the user interrupts
    let mut events = queue.subscribe();
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        let stats = queue.stats();
        if stats.pending == 0 && stats.active == 0 {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            result = events.recv() => {
                if let Err(tokio::sync::broadcast::error::RecvError::Closed) = result {
                    break;
                }
            }
            _ = ticker.tick() => {}
        }
    }

    queue.shutdown().await;

    let stats = queue.stats();
    info!(
        completed = stats.completed,
        failed = stats.failed,
        cancelled = stats.cancelled,
        "Done"
    );
    Ok(())
}
