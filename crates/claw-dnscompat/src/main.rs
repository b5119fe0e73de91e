//! claw-dnscompat - CoreDNS compatibility matrix runner
//!
//! Creates an ephemeral k3d cluster, runs the configured matrices against the
//! mesh CLI and deletes the cluster again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use claw_dnscompat::{CaseReport, Suite, SuiteConfig, SuiteReport};
use claw_exec::ProcessRunner;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "claw-dnscompat")]
#[command(about = "CoreDNS compatibility matrix for the mesh CLI")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the compatibility matrices
    Run {
        /// Path to config file (defaults are used when omitted)
        #[arg(short, long, env = "DNSCOMPAT_CONFIG")]
        config: Option<PathBuf>,

        /// Run only the named matrix (repeatable)
        #[arg(short, long = "matrix")]
        matrices: Vec<String>,

        /// Directory relative fixture paths are resolved against
        #[arg(long, env = "DNSCOMPAT_FIXTURES")]
        fixture_root: Option<PathBuf>,

        /// Mesh CLI binary
        #[arg(long, env = "MESH_BINARY")]
        mesh_binary: Option<String>,

        /// kubectl binary
        #[arg(long, env = "KUBECTL_BIN")]
        kubectl: Option<String>,

        /// k3d binary
        #[arg(long, env = "K3D_BIN")]
        k3d: Option<String>,

        /// Summary format
        #[arg(long, value_enum, default_value_t = Format::Plain)]
        format: Format,
    },

    /// List the configured matrices
    List {
        /// Path to config file
        #[arg(short, long, env = "DNSCOMPAT_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Generate a config file with the default matrices
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "dnscompat.json")]
        output: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Plain,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env().add_directive("claw_dnscompat=info".parse()?);
    if cli.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    match cli.command {
        Commands::Run {
            config,
            matrices,
            fixture_root,
            mesh_binary,
            kubectl,
            k3d,
            format,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(binary) = mesh_binary {
                config.mesh.binary = binary;
            }
            if let Some(binary) = kubectl {
                config.kubectl_binary = binary;
            }
            if let Some(binary) = k3d {
                config.cluster.k3d_binary = binary;
            }
            if let Some(root) = fixture_root {
                config = config.with_fixture_root(&root);
            }
            config.validate()?;
            run_suite(config, &matrices, format).await?;
        }
        Commands::List { config } => {
            list_matrices(&load_config(config.as_deref())?);
        }
        Commands::InitConfig { output } => {
            init_config(&output)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SuiteConfig> {
    match path {
        Some(path) => {
            info!(config = %path.display(), "loading config");
            Ok(SuiteConfig::from_file(path)?)
        }
        None => Ok(SuiteConfig::default()),
    }
}

async fn run_suite(config: SuiteConfig, names: &[String], format: Format) -> anyhow::Result<()> {
    let matrices = config.select_matrices(names)?;
    info!(
        cluster = %config.cluster.name,
        mesh = %config.mesh.binary,
        matrices = ?matrices.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
        "starting compatibility run"
    );

    let suite = Suite::new(Arc::new(ProcessRunner::new()), config);
    let report = suite.run_until(&matrices, interrupted()).await?;

    match format {
        Format::Plain => print_report(&report),
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if !report.success() {
        anyhow::bail!("{} of {} cases failed", report.failed(), report.passed() + report.failed());
    }
    Ok(())
}

/// Completes on SIGINT. Never completes if the handler cannot be installed.
async fn interrupted() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => warn!("received SIGINT, stopping the suite"),
        Err(e) => {
            warn!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    }
}

fn print_report(report: &SuiteReport) {
    println!("Run {} on cluster {}", report.run_id, report.cluster);
    println!();

    for matrix in &report.matrices {
        println!("{} ({}): {} passed, {} failed", matrix.name, matrix.mode, matrix.passed(), matrix.failed());
        for case in &matrix.cases {
            print_case(case);
        }
        println!();
    }

    if let Some(err) = &report.teardown_error {
        println!("Teardown failed: {err}");
    }
    println!("Total: {} passed, {} failed", report.passed(), report.failed());
}

fn print_case(case: &CaseReport) {
    let mark = if case.passed() { "PASS" } else { "FAIL" };
    println!(
        "  {mark} {:<14} expected {:<8} {:>6} ms",
        case.description, case.expected, case.duration_ms
    );
    if let Some(failure) = &case.failure {
        println!("       {failure}");
        if let Some(state) = case.last_state() {
            println!("       last step: {state}");
        }
    }
    if let Some(cleanup) = &case.cleanup_error {
        println!("       cleanup: {cleanup}");
    }
}

fn list_matrices(config: &SuiteConfig) {
    for matrix in &config.matrices {
        println!("{} ({})", matrix.name, matrix.mode);
        for case in &matrix.cases {
            println!(
                "  {:<14} expect {:<8} {}",
                case.description,
                case.expected_outcome,
                case.fixture_set.display()
            );
        }
    }
}

fn init_config(output: &Path) -> anyhow::Result<()> {
    if output.exists() {
        anyhow::bail!("config file already exists: {}", output.display());
    }

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    std::fs::write(output, SuiteConfig::default().to_json()?)?;
    println!("Config written to: {}", output.display());
    Ok(())
}
