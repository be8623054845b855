use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;

mod app;
mod detection;
mod reconcile;
mod session;
mod store;
mod viewport;

use app::EditorApp;
use reconcile::{ChangeSet, NewDetection};
use store::{DetectionStore, SidecarStore};

#[derive(Parser, Debug)]
#[command(
    name = "instar-edit",
    version,
    about = "Review and correct life-stage detections on a specimen photo"
)]
struct Cli {
    /// Specimen image to open
    image: PathBuf,
    /// Sidecar file override (default: <image>.<ext>.detz next to the image)
    #[arg(long)]
    store: Option<PathBuf>,
    /// Seed the store from a JSON array of inference-pipeline detections
    /// before opening the editor
    #[arg(long)]
    import: Option<PathBuf>,
}

fn import_detections(store: &mut SidecarStore, upload_id: &str, path: &PathBuf) -> Result<usize> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut added: Vec<NewDetection> =
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    for det in &mut added {
        det.upload_id = upload_id.to_string();
    }
    let count = added.len();
    let changes = ChangeSet {
        added,
        ..ChangeSet::default()
    };
    store.apply(upload_id, &changes)?;
    Ok(count)
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if !cli.image.exists() {
        bail!("file not found: {}", cli.image.display());
    }

    let upload_id = cli
        .image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("image path has no file name")?;
    let mut store = match cli.store {
        Some(path) => SidecarStore::at(path),
        None => SidecarStore::for_image(&cli.image),
    };
    log::debug!("detection sidecar at {}", store.path().display());

    if let Some(ref import) = cli.import {
        let count = import_detections(&mut store, &upload_id, import)?;
        log::info!("imported {count} detections from {}", import.display());
    }

    let app = EditorApp::new(cli.image, store)?;
    let title = app.title();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_title(&title),
        ..Default::default()
    };

    eframe::run_native(&title, options, Box::new(move |_cc| Ok(Box::new(app))))
        .map_err(|err| anyhow!("failed to start editor: {err}"))
}
