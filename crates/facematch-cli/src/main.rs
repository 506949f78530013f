use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facematch_capture::{CaptureSettings, OnnxPipeline, PixelScaling, TensorLayout};
use facematch_core::config::DEFAULT_DIMENSION;
use facematch_core::import::import_directory;
use facematch_core::{EmbeddingStore, FileStorage, MatcherConfig, Snapshot, SnapshotStorage};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facematch", about = "FaceMatch identity matching CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify the face in an image
    Recognize {
        /// Image file (JPEG, PNG or BMP)
        image: PathBuf,
    },
    /// Check whether two images show the same person
    Verify { first: PathBuf, second: PathBuf },
    /// Register the face in an image under a name
    Register {
        name: String,
        image: PathBuf,
        /// Source identifier stored with the record (default: "register")
        #[arg(long, default_value = "")]
        source: String,
    },
    /// Rebuild the daemon's registry from its snapshot
    Reload,
    /// List registered identities
    List,
    /// Show daemon status
    Status,
    /// Build a snapshot from a directory of ID photos (no daemon needed)
    Import {
        /// Directory of ID photos; file stems become identity names
        #[arg(long, default_value = "database/ids")]
        ids_dir: PathBuf,
        /// Snapshot file to write
        #[arg(long, default_value = "database/embeddings.json")]
        output: PathBuf,
        /// Directory holding the detector and embedder models
        #[arg(long, default_value = "models")]
        model_dir: PathBuf,
        /// Detector model file, relative to the model directory
        #[arg(long)]
        detector: Option<PathBuf>,
        /// Embedder model file, relative to the model directory
        #[arg(long)]
        embedder: Option<PathBuf>,
        /// Embedding length produced by the embedder
        #[arg(long, default_value_t = DEFAULT_DIMENSION)]
        dim: usize,
        /// Side length of the embedder input
        #[arg(long)]
        input_size: Option<u32>,
        /// Input tensor layout (nchw or nhwc)
        #[arg(long)]
        layout: Option<TensorLayout>,
        /// Pixel scaling (per-image or fixed:<mean>:<std>)
        #[arg(long)]
        scaling: Option<PixelScaling>,
    },
    /// Strictly load a snapshot and summarize it (no daemon needed)
    Check {
        #[arg(default_value = "database/embeddings.json")]
        snapshot: PathBuf,
        /// Expected embedding length (default: taken from the snapshot metadata)
        #[arg(long)]
        dim: Option<usize>,
    },
}

// `#[zbus::proxy]` generates `FaceMatchProxy` (async) and
// `FaceMatchProxyBlocking`. The CLI uses the async variant.
#[zbus::proxy(
    interface = "io.facematch.FaceMatch1",
    default_service = "io.facematch.FaceMatch1",
    default_path = "/io/facematch/FaceMatch1"
)]
trait FaceMatch {
    async fn recognize(&self, image: &[u8]) -> zbus::Result<String>;
    async fn verify(&self, first: &[u8], second: &[u8]) -> zbus::Result<String>;
    async fn register(&self, name: &str, image: &[u8], source: &str) -> zbus::Result<String>;
    async fn reload(&self) -> zbus::Result<u32>;
    async fn status(&self) -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<Vec<String>>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Import {
            ids_dir,
            output,
            model_dir,
            detector,
            embedder,
            dim,
            input_size,
            layout,
            scaling,
        } => {
            let mut settings = CaptureSettings::in_dir(&model_dir);
            if let Some(d) = detector {
                settings.detector_model = model_dir.join(d);
            }
            if let Some(e) = embedder {
                settings.embedder_model = model_dir.join(e);
            }
            settings.embedder.dimension = dim;
            if let Some(size) = input_size {
                settings.embedder.input_size = size;
            }
            if let Some(l) = layout {
                settings.embedder.layout = l;
            }
            if let Some(s) = scaling {
                settings.embedder.scaling = s;
            }
            run_import(&settings, &ids_dir, &FileStorage::new(output), dim)?;
        }
        Commands::Check { snapshot, dim } => {
            let bytes = FileStorage::new(&snapshot).read_snapshot()?;
            print!("{}", check_report(&bytes, dim)?);
        }
        Commands::Recognize { image } => {
            let image = read_image(&image)?;
            let reply = connect(cli.system).await?.recognize(&image).await?;
            print_json(&reply)?;
        }
        Commands::Verify { first, second } => {
            let (first, second) = (read_image(&first)?, read_image(&second)?);
            let reply = connect(cli.system).await?.verify(&first, &second).await?;
            print_json(&reply)?;
        }
        Commands::Register {
            name,
            image,
            source,
        } => {
            let image = read_image(&image)?;
            let reply = connect(cli.system)
                .await?
                .register(&name, &image, &source)
                .await?;
            print_json(&reply)?;
        }
        Commands::Reload => {
            let count = connect(cli.system).await?.reload().await?;
            println!("Registry reloaded with {count} identities");
        }
        Commands::List => {
            let names = connect(cli.system).await?.list_identities().await?;
            if names.is_empty() {
                println!("No identities registered");
            }
            for name in names {
                println!("{name}");
            }
        }
        Commands::Status => {
            print_json(&connect(cli.system).await?.status().await?)?;
        }
    }

    Ok(())
}

async fn connect(system: bool) -> Result<FaceMatchProxy<'static>> {
    let conn = if system {
        zbus::Connection::system().await?
    } else {
        zbus::Connection::session().await?
    };
    FaceMatchProxy::new(&conn)
        .await
        .context("facematchd is not reachable on D-Bus")
}

fn run_import(settings: &CaptureSettings, ids_dir: &Path, output: &FileStorage, dim: usize) -> Result<()> {
    let mut pipeline = OnnxPipeline::load(settings)?;
    let config = MatcherConfig::with_dimension(dim);
    let report = import_directory(&mut pipeline, ids_dir, &config)?;

    for failure in &report.failures {
        println!("  skipped {}: {}", failure.file, failure.reason);
    }
    report.write(output)?;
    println!(
        "Imported {} of {} ID photos into {}",
        report.imported(),
        report.found,
        output.path().display()
    );
    Ok(())
}

/// Strictly load `bytes` and describe every identity in it.
fn check_report(bytes: &[u8], dim: Option<usize>) -> Result<String> {
    let snapshot = Snapshot::from_slice(bytes)?;
    let meta = snapshot.metadata.clone();
    let dimension = dim
        .or_else(|| meta.embedding_dimension.as_ref().and_then(|d| d.first().copied()))
        .unwrap_or(DEFAULT_DIMENSION);
    let store = EmbeddingStore::load(snapshot, &MatcherConfig::with_dimension(dimension))?;

    let mut out = String::new();
    out.push_str(&format!("Identities: {}\n", store.len()));
    out.push_str(&format!("Dimension:  {dimension}\n"));
    out.push_str(&format!(
        "Model:      {}\n",
        meta.model.as_deref().unwrap_or("unknown")
    ));
    if let Some(origin) = &meta.created_from {
        out.push_str(&format!("Created from: {origin}\n"));
    }
    for record in store.iter() {
        out.push_str(&format!(
            "  {}: len={} source={} norm={:.4}\n",
            record.name,
            record.embedding.dim(),
            record.source,
            record.embedding.norm()
        ));
    }
    Ok(out)
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("cannot read image {}", path.display()))
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"{
        "metadata": {
            "total_ids": 2,
            "embedding_dimension": [3],
            "created_from": "database/ids",
            "model": "FaceNet",
            "normalization": "L2"
        },
        "embeddings": {
            "bob": { "embedding": [0.0, 1.0, 0.0], "source_file": "bob.png", "embedding_shape": [3] },
            "alice": { "embedding": [0.6, 0.8, 0.0], "source_file": "alice.jpg", "embedding_shape": [3] }
        }
    }"#;

    #[test]
    fn test_check_report_summarizes_in_name_order() {
        let report = check_report(SNAPSHOT.as_bytes(), None).unwrap();
        assert!(report.contains("Identities: 2"));
        assert!(report.contains("Dimension:  3"));
        assert!(report.contains("Model:      FaceNet"));
        assert!(report.contains("Created from: database/ids"));
        let alice = report.find("alice: len=3 source=alice.jpg norm=1.0000").unwrap();
        let bob = report.find("bob: len=3 source=bob.png norm=1.0000").unwrap();
        assert!(alice < bob);
    }

    #[test]
    fn test_check_report_rejects_wrong_dimension() {
        assert!(check_report(SNAPSHOT.as_bytes(), Some(512)).is_err());
    }

    #[test]
    fn test_check_report_rejects_missing_sections() {
        assert!(check_report(br#"{"metadata": {}}"#, None).is_err());
    }

    #[test]
    fn test_check_reads_written_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("embeddings.json"));
        storage.write_snapshot(SNAPSHOT.as_bytes()).unwrap();
        let bytes = storage.read_snapshot().unwrap();
        assert!(check_report(&bytes, Some(3)).unwrap().contains("Identities: 2"));
    }

    #[test]
    fn test_cli_parses_import_options() {
        let cli = Cli::try_parse_from([
            "facematch",
            "import",
            "--ids-dir",
            "photos",
            "--detector",
            "scrfd_500m.onnx",
            "--layout",
            "nchw",
            "--scaling",
            "fixed:127.5:128",
            "--dim",
            "128",
        ])
        .unwrap();
        match cli.command {
            Commands::Import {
                ids_dir,
                detector,
                dim,
                layout,
                scaling,
                ..
            } => {
                assert_eq!(ids_dir, PathBuf::from("photos"));
                assert_eq!(detector, Some(PathBuf::from("scrfd_500m.onnx")));
                assert_eq!(dim, 128);
                assert_eq!(layout, Some(TensorLayout::Nchw));
                assert_eq!(scaling, Some(PixelScaling::Fixed { mean: 127.5, std: 128.0 }));
            }
            _ => panic!("expected import"),
        }
    }
}
