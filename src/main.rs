use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ptimer_asset::{FileSource, stream_from_bytes};
use ptimer_engine::{Engine, EngineConfig, Session};
use tracing_subscriber::EnvFilter;

mod manifest;

use manifest::{MANIFEST_FILE, Manifest, ManifestAsset, contained_path};

/// Ptimer - build and unpack .ptimer timer files
#[derive(Parser)]
#[command(name = "ptimer")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Compile a JSON manifest and its asset files into a container
  Create {
    /// Path to the manifest (default: stdin)
    manifest: Option<PathBuf>,

    /// Where to write the container (default: stdout)
    #[arg(long)]
    out: Option<PathBuf>,
  },

  /// Unpack a container into a manifest and asset files
  Extract {
    /// Path to the container (default: stdin)
    file: Option<PathBuf>,

    /// Directory to write into; must not exist yet
    #[arg(long)]
    outdir: PathBuf,

    /// Remove the output directory first if it exists
    #[arg(long)]
    clean: bool,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing();

  match cli.command {
    Some(Commands::Create { manifest, out }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(create(manifest, out))?;
    }
    Some(Commands::Extract {
      file,
      outdir,
      clean,
    }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(extract(file, outdir, clean))?;
    }
    None => {
      println!("ptimer - use --help to see available commands");
    }
  }

  Ok(())
}

fn init_tracing() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ptimer=info"));

  // stdout may carry a container, so logs go to stderr
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .init();
}

async fn start_session() -> Result<Session> {
  let engine = Engine::spawn(EngineConfig::default())
    .await
    .context("failed to start engine")?;

  Ok(Session::new(Arc::new(engine)))
}

async fn create(manifest_file: Option<PathBuf>, out: Option<PathBuf>) -> Result<()> {
  let (content, base) = match &manifest_file {
    Some(path) => {
      let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read manifest: {}", path.display()))?;
      let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
      (content, base)
    }
    None => {
      let mut content = String::new();
      io::stdin()
        .read_to_string(&mut content)
        .context("failed to read manifest from stdin")?;
      (content, std::env::current_dir()?)
    }
  };

  let manifest: Manifest = serde_json::from_str(&content).context("failed to parse manifest")?;

  let mut session = start_session().await?;
  let document = session.create(
    manifest.metadata.title.clone(),
    manifest.metadata.language.clone(),
  );
  document.metadata = manifest.metadata;
  document.steps = manifest.steps;

  for asset in manifest.assets {
    let path = contained_path(&base, &asset.path)
      .with_context(|| format!("invalid path for asset {}", asset.id))?;
    session.attach_file(asset.id, asset.name, asset.mime, path)?;

    if let Some(document) = session.document_mut()
      && let Some(added) = document.assets.iter_mut().find(|a| a.id == asset.id)
    {
      added.notice = asset.notice;
    }
  }

  let compiled = session.export().await.context("failed to compile timer")?;

  match out {
    Some(path) => {
      tokio::fs::write(&path, &compiled.data)
        .await
        .with_context(|| format!("failed to write container: {}", path.display()))?;
      eprintln!("Wrote {} ({} bytes)", path.display(), compiled.data.len());
    }
    None => {
      let mut stdout = io::stdout().lock();
      stdout
        .write_all(&compiled.data)
        .context("failed to write container to stdout")?;
      stdout.flush()?;
      eprintln!("Wrote {} ({} bytes)", compiled.file_name, compiled.data.len());
    }
  }

  Ok(())
}

async fn extract(file: Option<PathBuf>, outdir: PathBuf, clean: bool) -> Result<()> {
  if tokio::fs::try_exists(&outdir).await? {
    if !clean {
      bail!(
        "output directory already exists: {} (use --clean to replace it)",
        outdir.display()
      );
    }
    tokio::fs::remove_dir_all(&outdir)
      .await
      .with_context(|| format!("failed to clean {}", outdir.display()))?;
  }

  let source = match &file {
    Some(path) => FileSource::new(path)
      .open()
      .await
      .with_context(|| format!("failed to open container: {}", path.display()))?,
    None => {
      if io::stdin().is_terminal() {
        bail!("no container given; pass a file or pipe one on stdin");
      }
      let mut data = Vec::new();
      io::stdin()
        .read_to_end(&mut data)
        .context("failed to read container from stdin")?;
      stream_from_bytes(data)
    }
  };

  let mut session = start_session().await?;
  let document = session
    .open(source)
    .await
    .context("failed to parse container")?
    .clone();

  tokio::fs::create_dir_all(&outdir)
    .await
    .with_context(|| format!("failed to create {}", outdir.display()))?;

  let resolver = session.resolver();
  let mut assets = Vec::with_capacity(document.assets.len());

  for asset in &document.assets {
    let path = contained_path(&outdir, &asset.name)
      .with_context(|| format!("refusing to write asset {}", asset.id))?;
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }

    let data = resolver
      .dereference(&asset.data)
      .await
      .with_context(|| format!("failed to read asset {}", asset.id))?;
    tokio::fs::write(&path, &data)
      .await
      .with_context(|| format!("failed to write {}", path.display()))?;

    eprintln!("Extracted {} ({} bytes)", asset.name, data.len());
    assets.push(ManifestAsset {
      id: asset.id,
      name: asset.name.clone(),
      mime: asset.mime.clone(),
      path: asset.name.clone(),
      notice: asset.notice.clone(),
    });
  }

  let manifest = Manifest {
    metadata: document.metadata,
    steps: document.steps,
    assets,
  };
  let manifest_path = outdir.join(MANIFEST_FILE);
  tokio::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)
    .await
    .with_context(|| format!("failed to write {}", manifest_path.display()))?;

  eprintln!("Wrote {}", manifest_path.display());
  Ok(())
}
