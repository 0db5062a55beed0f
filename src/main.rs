//! Provisioning command line interface.
//!
//! # Usage
//!
//! ```bash
//! # Provision a setup document and write resolved ids back into it
//! chirpstack-provision apply setup.json
//!
//! # Same pipeline, no server calls
//! chirpstack-provision apply setup.json --dry-run
//!
//! # Validate a file only (schema picked from the filename)
//! chirpstack-provision validate devices.csv
//!
//! # Dump the server's state into a restorable setup document
//! chirpstack-provision backup backup.json
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chirpstack_provision::{
    backup::backup, engine::ProvisioningEngine, settings::ENV_LOG_LEVEL, validate::validate_file,
    HttpApi, MockApi, SchemaKind, SchemaRegistry, Settings, SetupDocument,
};

#[derive(Parser)]
#[command(name = "chirpstack-provision")]
#[command(version)]
#[command(about = "Provision tenants, gateways, applications and devices from a setup document")]
struct Cli {
    /// Directory holding the JSON schemas
    #[arg(long, global = true, env = "PROVISION_SCHEMA_DIR")]
    schema_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and provision a setup document, writing resolved
    /// identifiers back into it
    Apply {
        /// Path to the setup document
        setup: PathBuf,

        /// Run the whole pipeline against an in-memory API; the
        /// document is not rewritten
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate a file against the schemas without touching the server
    Validate {
        /// File to validate (.json, .jsonl or .csv)
        file: PathBuf,

        /// Schema to validate against; detected from the filename when
        /// omitted
        #[arg(long, value_enum)]
        schema: Option<SchemaArg>,
    },

    /// Dump the server's current state into a setup document
    Backup {
        /// Output path for the assembled document
        out: PathBuf,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SchemaArg {
    /// The nested setup-tree schema
    Setup,
    /// Flat device/gateway records
    Devices,
}

impl From<SchemaArg> for SchemaKind {
    fn from(arg: SchemaArg) -> Self {
        match arg {
            SchemaArg::Setup => SchemaKind::Setup,
            SchemaArg::Devices => SchemaKind::Records,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let schema_dir = cli.schema_dir.unwrap_or_else(default_schema_dir);

    let result = match cli.command {
        Commands::Apply { setup, dry_run } => cmd_apply(&schema_dir, &setup, dry_run).await,
        Commands::Validate { file, schema } => cmd_validate(&schema_dir, &file, schema),
        Commands::Backup { out } => cmd_backup(&out).await,
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}: {err:#}", "error".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(std::env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| "info".to_string()))
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Schemas next to the installed binary, falling back to the crate's
/// own `schemas/` directory for development runs.
fn default_schema_dir() -> PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join("schemas");
            if candidate.is_dir() {
                return candidate;
            }
        }
    }
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("schemas")
}

async fn cmd_apply(
    schema_dir: &PathBuf,
    setup: &PathBuf,
    dry_run: bool,
) -> anyhow::Result<ExitCode> {
    let registry = SchemaRegistry::from_dir(schema_dir)?;
    let mut doc = SetupDocument::from_file(setup)?;
    registry.validate_setup(doc.root())?;

    let report = if dry_run {
        let api = MockApi::new();
        ProvisioningEngine::new(&api).run(&mut doc).await?
    } else {
        let settings = Settings::from_env()?;
        let api = HttpApi::from_settings(&settings)?;
        ProvisioningEngine::new(&api).run(&mut doc).await?
    };

    if dry_run {
        println!("{}", "Dry run: document not rewritten".yellow());
    } else {
        // Partial progress is still progress: whatever resolved is
        // persisted so the next run picks up from here.
        doc.write_atomic(setup)?;
    }

    println!();
    println!("{}", "Run summary".bold());
    print!("{report}");
    if report.is_clean() {
        println!("{}", "All entities provisioned".green());
        Ok(ExitCode::SUCCESS)
    } else {
        let failed = report.total_failed();
        println!(
            "{}",
            format!("{failed} entity creation(s) failed; see the log above").red()
        );
        Ok(ExitCode::FAILURE)
    }
}

fn cmd_validate(
    schema_dir: &PathBuf,
    file: &PathBuf,
    schema: Option<SchemaArg>,
) -> anyhow::Result<ExitCode> {
    let registry = SchemaRegistry::from_dir(schema_dir)?;
    let kind = schema
        .map(SchemaKind::from)
        .unwrap_or_else(|| SchemaKind::detect(file));

    println!(
        "Validating {}...",
        file.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string())
    );

    let report = validate_file(&registry, kind, file)?;
    for failure in &report.failures {
        for violation in &failure.violations.violations {
            println!("  Line {}: {} {}", failure.line, "invalid:".red(), violation);
        }
    }
    if report.total > 0 {
        println!();
        println!("Result: {}/{} entries valid", report.valid(), report.total);
    }

    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn cmd_backup(out: &PathBuf) -> anyhow::Result<ExitCode> {
    let settings = Settings::from_env()?;
    let api = HttpApi::from_settings(&settings)?;
    let doc = backup(&api).await?;
    doc.write_atomic(out)?;
    println!("Backup written to {}", out.display());
    Ok(ExitCode::SUCCESS)
}
