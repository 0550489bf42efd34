//! # Packsmith CLI (`packsmith`)
//!
//! Builds and inspects knowledge packs from the command line.
//!
//! ## Usage
//!
//! ```bash
//! packsmith --config ./config/packsmith.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `packsmith build` | Create a job and build a pack in-process |
//! | `packsmith status <job_id>` | Print the job snapshot folded from its log |
//! | `packsmith jobs` | List known job ids |
//! | `packsmith verify <archive>` | Check a pack's hash, signature, and counts |
//! | `packsmith keygen` | Print a fresh Ed25519 seed and public key |
//!
//! ## Examples
//!
//! ```bash
//! # Build a pack from a git repository, signed with a provisioned key
//! PACK_SIGNING_KEY=$(cat seed.hex) packsmith build \
//!     --pack-id handbook --pack-version 2.1.0 \
//!     --source-type git_repo --source-value https://github.com/acme/handbook
//!
//! # Build from an uploaded archive
//! packsmith build --pack-id docs --pack-version 1.0.0 \
//!     --source-type upload --source-value ./docs.zip
//!
//! # Verify the result
//! packsmith verify ./docs-1.0.0.zip
//! ```
//!
//! Logs go to stderr; set `RUST_LOG` to change the level (default `info`).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use packsmith::config::{self, Config};
use packsmith::joblog::JobLog;
use packsmith::manifest::verify_archive;
use packsmith::models::{PackMetadata, SourceDescriptor};
use packsmith::pipeline::{BuildRequest, PackBuildPipeline};
use packsmith::signing::generate_keypair;

const DEFAULT_CONFIG_PATH: &str = "./config/packsmith.toml";

/// Packsmith: signed, versioned knowledge packs from uploads, web pages,
/// git repositories, or pasted text.
#[derive(Parser)]
#[command(name = "packsmith", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/packsmith.toml`; built-in defaults are used
    /// when that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a job and build a pack.
    ///
    /// Prints the job id, then the final job snapshot as JSON. Exits
    /// non-zero if the build fails.
    Build {
        #[arg(long)]
        pack_id: String,

        #[arg(long)]
        pack_version: String,

        /// One of: upload, website, git_repo, paste.
        #[arg(long)]
        source_type: String,

        /// Archive path, URL, repository location, or the text itself.
        #[arg(long)]
        source_value: Option<String>,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        publisher: Option<String>,

        #[arg(long)]
        license: Option<String>,

        /// Hex Ed25519 seed; overrides PACK_SIGNING_KEY and the config file.
        #[arg(long)]
        signing_key: Option<String>,
    },

    /// Show a job's current state.
    Status {
        job_id: String,
    },

    /// List known jobs.
    Jobs,

    /// Verify a pack archive.
    Verify {
        archive: PathBuf,
    },

    /// Generate a signing key pair.
    Keygen,
}

fn resolve_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                config::load_config(default)
            } else {
                Ok(Config::default())
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config;

    match cli.command {
        Commands::Build {
            pack_id,
            pack_version,
            source_type,
            source_value,
            name,
            description,
            publisher,
            license,
            signing_key,
        } => {
            let cfg = resolve_config(config_path.as_deref())?;
            let pipeline = PackBuildPipeline::from_config(cfg)?;
            let job_id = pipeline.create_job()?;
            println!("{}", job_id);

            let request = BuildRequest {
                job_id: job_id.clone(),
                pack_id,
                version: pack_version,
                source: SourceDescriptor::new(source_type, source_value),
                metadata: PackMetadata {
                    name,
                    description,
                    publisher,
                    license,
                },
                signing_key,
            };
            let result = pipeline.build_pack(request).await;

            let job = pipeline
                .log()
                .load(&job_id)?
                .with_context(|| format!("job log for {} disappeared", job_id))?;
            println!("{}", serde_json::to_string_pretty(&job)?);

            if let Err(e) = result {
                bail!("build failed ({}): {}", e.kind(), e.message());
            }
        }
        Commands::Status { job_id } => {
            let cfg = resolve_config(config_path.as_deref())?;
            let log = JobLog::new(&cfg.paths.jobs_dir);
            match log.load(&job_id)? {
                Some(job) => println!("{}", serde_json::to_string_pretty(&job)?),
                None => bail!("job not found: {}", job_id),
            }
        }
        Commands::Jobs => {
            let cfg = resolve_config(config_path.as_deref())?;
            let log = JobLog::new(&cfg.paths.jobs_dir);
            for job_id in log.list()? {
                println!("{}", job_id);
            }
        }
        Commands::Verify { archive } => {
            let verified = verify_archive(&archive)?;
            println!("verify {}", archive.display());
            println!("  pack: {} {}", verified.manifest.pack_id, verified.manifest.version);
            println!("  files: {}", verified.files);
            println!("  chunks: {}", verified.chunks);
            println!("  content_hash: {}", verified.manifest.content_hash);
            println!("  public_key: {}", verified.manifest.public_key);
            println!("ok");
        }
        Commands::Keygen => {
            let (seed, public_key) = generate_keypair();
            println!("seed: {}", seed);
            println!("public_key: {}", public_key);
        }
    }

    Ok(())
}
