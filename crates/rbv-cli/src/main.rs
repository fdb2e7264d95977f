//! RBV - Reproducible Build Verifier CLI
//!
//! The `rbv` command checks that a published release can be rebuilt from its
//! declared source revision.
//!
//! ## Commands
//!
//! - `verify`: Compare official and rebuilt artifacts and check provenance
//! - `trust`: Manage the trusted signer keys per repository
//! - `normalize`: Show the slice identifier for artifact file names
//!
//! ## Exit codes
//!
//! `0` reproducible, `1` differences found, `2` unsupported or mismatched
//! artifact identity, `3` any other fatal error.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, Level};

use rbv_core::domain::error::EXIT_PRECONDITION_FAILED;
use rbv_core::{
    normalize, AppCapabilities, AppProfile, ArchiveReader, ArtifactFamily, ArtifactKind,
    DisplayOptions, EngineConfig, GitSignatureTool, Normalized, PathArtifactSource,
    ProfileError, ProfileRegistry, ProvenanceVerifier, ReportMetadata, TrustStore, VerificationEngine,
    VerificationRequest, VerifyError, ZipArchiveReader, DEFAULT_PREVIEW_PATHS,
};

#[derive(Parser)]
#[command(name = "rbv")]
#[command(author = "RBV Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reproducible Build Verifier", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Trust store file
    #[arg(long, global = true, env = "RBV_TRUST_STORE", default_value = "trust.toml")]
    trust_store: PathBuf,

    /// Application profiles file
    #[arg(long, global = true, env = "RBV_PROFILES", default_value = "apps.toml")]
    profiles: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify that rebuilt artifacts match the official release
    Verify(VerifyArgs),

    /// Manage trusted signer keys
    Trust {
        #[command(subcommand)]
        action: TrustAction,
    },

    /// Print the slice identifier for each artifact file name
    Normalize {
        /// Raw artifact file names
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[derive(Subcommand)]
enum TrustAction {
    /// Trust a signer key for a repository
    Add {
        /// Source repository URL
        #[arg(long)]
        repo: String,

        /// Key id or fingerprint
        #[arg(long)]
        key: String,
    },

    /// List trusted keys
    List {
        /// Only this repository
        #[arg(long)]
        repo: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
}

#[derive(Args, Debug)]
struct VerifyArgs {
    /// Official release artifacts (files or directories)
    #[arg(long, required = true, num_args = 1..)]
    official: Vec<PathBuf>,

    /// Rebuilt artifacts (files or directories)
    #[arg(long, num_args = 1..)]
    built: Vec<PathBuf>,

    /// Declared application id of the release
    #[arg(long)]
    app_id: String,

    /// Profile the artifacts must belong to (defaults to --app-id)
    #[arg(long)]
    profile: Option<String>,

    /// Artifact family when no profile is registered
    #[arg(long)]
    family: Option<String>,

    #[arg(long)]
    version_name: String,

    #[arg(long)]
    version_code: String,

    /// Signing certificate digest of the official release
    #[arg(long)]
    signer: Option<String>,

    /// Precomputed hash of the official artifact
    #[arg(long)]
    app_hash: Option<String>,

    /// Source repository URL (defaults to the profile's)
    #[arg(long)]
    repo_url: Option<String>,

    /// Tag or commit to verify (defaults to the profile's tag convention)
    #[arg(long)]
    revision: Option<String>,

    /// Commit to report when the revision cannot be resolved
    #[arg(long)]
    commit: Option<String>,

    /// Git checkout of the source, used for provenance and --build
    #[arg(long)]
    source: Option<PathBuf>,

    /// Run the profile's build command and verify its output
    #[arg(long)]
    build: bool,

    /// Where --build leaves its artifacts
    #[arg(long)]
    build_output: Option<PathBuf>,

    /// Working directory for unpacked content; must not exist yet
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Keep the workspace after the run
    #[arg(long)]
    keep_workspace: bool,

    /// Also write the full JSON report to this file
    #[arg(long)]
    json_report: Option<PathBuf>,

    /// Report format on stdout
    #[arg(long, value_enum, default_value = "text")]
    format: ReportFormat,

    /// Slices diffed concurrently
    #[arg(long, default_value_t = 4)]
    max_concurrent: usize,

    /// Differing paths shown in the text report
    #[arg(long, default_value_t = DEFAULT_PREVIEW_PATHS)]
    max_paths: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    rbv_core::init_tracing(cli.json, level);

    let outcome = match cli.command {
        Commands::Verify(ref args) => cmd_verify(&cli, args).await,
        Commands::Trust { ref action } => cmd_trust(&cli.trust_store, action).map(|_| 0),
        Commands::Normalize { ref names } => {
            cmd_normalize(names);
            Ok(0)
        }
    };

    match outcome {
        Ok(code) => exit_code(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            if let Some(remediation) = remediation(&err) {
                eprintln!("remediation: {remediation}");
            }
            exit_code(fatal_exit_code(&err))
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX))
}

fn remediation(err: &anyhow::Error) -> Option<String> {
    if let Some(e) = err.downcast_ref::<VerifyError>() {
        return e.remediation();
    }
    err.downcast_ref::<ProfileError>()
        .and_then(ProfileError::remediation)
}

fn fatal_exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<VerifyError>()
        .map(VerifyError::exit_code)
        .unwrap_or(EXIT_PRECONDITION_FAILED)
}

// ========== verify ==========

async fn cmd_verify(cli: &Cli, args: &VerifyArgs) -> Result<i32> {
    let trust = TrustStore::load(&cli.trust_store)
        .with_context(|| format!("failed to load trust store {}", cli.trust_store.display()))?;
    let registry = ProfileRegistry::load(&cli.profiles)
        .with_context(|| format!("failed to load profiles {}", cli.profiles.display()))?;

    let profile: Option<&AppProfile> = match &args.profile {
        Some(name) => Some(registry.require(name)?),
        None if args.build => Some(registry.require(&args.app_id)?),
        None => registry.get(&args.app_id),
    };
    let family = match (&args.family, profile) {
        (Some(raw), _) => Some(raw.parse::<ArtifactFamily>()?),
        (None, Some(p)) => Some(p.family),
        (None, None) => None,
    };
    let reader: Arc<dyn ArchiveReader> = match family {
        Some(f) => f.archive_reader(),
        None => Arc::new(ZipArchiveReader),
    };

    let repo_url = args
        .repo_url
        .clone()
        .or_else(|| profile.map(|p| p.repo_url.clone()));
    let revision = args.revision.clone().or_else(|| {
        profile.map(|p| p.resolve_tag(&args.version_name, &args.version_code))
    });

    let built = if args.build {
        let profile = registry.require(profile.map_or(args.app_id.as_str(), |p| p.app_id.as_str()))?;
        let source = args
            .source
            .as_deref()
            .context("--build needs --source <git checkout>")?;
        let output = args
            .build_output
            .clone()
            .unwrap_or_else(|| default_dir("rbv-build", args));
        run_build(profile, source, &output).await?
    } else {
        args.built.clone()
    };

    let mut config = EngineConfig::new(
        args.workspace
            .clone()
            .unwrap_or_else(|| default_dir("rbv-workspace", args)),
    );
    config.keep_workspace = args.keep_workspace;
    config.max_concurrent = args.max_concurrent;

    let mut engine = VerificationEngine::new(config, reader);
    if let Some(source) = &args.source {
        if !rbv_core::provenance::is_git_repo(source) {
            info!(source = %source.display(), "source is not a git work tree");
        }
        let tool = GitSignatureTool::new(source);
        engine = engine.with_provenance(ProvenanceVerifier::new(Arc::new(tool), Arc::new(trust)));
    }

    let request = VerificationRequest {
        metadata: ReportMetadata {
            app_id: args.app_id.clone(),
            signer: args.signer.clone(),
            version_name: args.version_name.clone(),
            version_code: args.version_code.clone(),
            app_hash: args.app_hash.clone(),
            commit: args.commit.clone(),
        },
        expected_app_id: args.profile.clone(),
        revision,
        repo_url,
    };
    let artifacts = PathArtifactSource::new(args.official.clone(), built);
    let outcome = engine.run(&artifacts, &request).await?;
    info!(run_id = %outcome.run_id, started_at = %outcome.started_at, "verification finished");

    let json = outcome.report.to_json().context("failed to encode report")?;
    if let Some(path) = &args.json_report {
        fs::write(path, &json)
            .with_context(|| format!("failed to write report {}", path.display()))?;
    }
    match args.format {
        ReportFormat::Json => println!("{json}"),
        ReportFormat::Text => {
            let opts = DisplayOptions {
                max_paths: args.max_paths,
                full_diff_pointer: args
                    .json_report
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .or_else(|| outcome.kept_workspace.as_ref().map(|p| p.display().to_string())),
            };
            print!("{}", outcome.report.render_text(&opts));
        }
    }
    if let Some(kept) = &outcome.kept_workspace {
        eprintln!("workspace kept at {}", kept.display());
    }

    Ok(outcome.report.exit_code())
}

async fn run_build(profile: &AppProfile, source: &Path, output: &Path) -> Result<Vec<PathBuf>> {
    let result = profile
        .build(source, output)
        .await
        .with_context(|| format!("build failed for {}", profile.app_id))?;
    info!(app_id = %profile.app_id, duration_ms = result.duration_ms, "build completed");
    let found = profile
        .locate_output_artifacts(output)
        .with_context(|| format!("no build output for {}", profile.app_id))?;
    Ok(found)
}

/// Per-release directory directly under the system temp dir.
fn default_dir(prefix: &str, args: &VerifyArgs) -> PathBuf {
    std::env::temp_dir().join(format!(
        "{prefix}-{}-{}",
        path_safe(&args.app_id),
        path_safe(&args.version_code)
    ))
}

/// Keep only characters that cannot form a separator or a `..` component.
fn path_safe(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.' => c,
            _ => '_',
        })
        .collect::<String>()
        .replace("..", "__")
}

// ========== trust ==========

fn cmd_trust(path: &Path, action: &TrustAction) -> Result<()> {
    let mut store = TrustStore::load(path)
        .with_context(|| format!("failed to load trust store {}", path.display()))?;
    match action {
        TrustAction::Add { repo, key } => {
            if store.add_key(repo, key)? {
                store
                    .save(path)
                    .with_context(|| format!("failed to save trust store {}", path.display()))?;
                println!(
                    "Trusted {key} for {repo} (revision {})",
                    store.revision()
                );
            } else {
                println!("{key} is already trusted for {repo}");
            }
        }
        TrustAction::List { repo } => {
            for entry in store.repositories() {
                if let Some(wanted) = repo {
                    if rbv_core::trust::normalize_repo_url(wanted)
                        != rbv_core::trust::normalize_repo_url(&entry.url)
                    {
                        continue;
                    }
                }
                println!("{}", entry.url);
                for key in &entry.keys {
                    println!("  {key}");
                }
            }
        }
    }
    Ok(())
}

// ========== normalize ==========

fn cmd_normalize(names: &[String]) {
    for name in names {
        println!("{}", describe(name));
    }
}

fn describe(name: &str) -> String {
    match normalize(name) {
        Normalized::Slice { id, kind } => {
            let kind = match kind {
                ArtifactKind::Single => "single",
                ArtifactKind::Split => "split",
            };
            format!("{name} -> {id} ({kind})")
        }
        Normalized::Rejected { reason } => format!("{name} -> rejected: {reason}"),
    }
}
