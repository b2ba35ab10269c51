//! ControlAudit Migration CLI
//!
//! Exports a legacy user to a snapshot, imports it into the owner-centric
//! model and inspects the result. Each subcommand is a separate run.

// CLI tool - relax pedantic lints for ergonomics
#![allow(clippy::pedantic)]

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use controlaudit_migrate::inspect::CollectionStatus;
use controlaudit_migrate::{
    create_store, DiscrepancyReport, ExportSummary, Exporter, ImportReport, Importer, Inspector,
    MigrationConfig, WriteMode,
};

#[derive(Parser)]
#[command(name = "controlaudit-migrate")]
#[command(version)]
#[command(about = "Migrate ControlAudit legacy users to the owner-centric model", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Service-account key file
    #[arg(long, value_name = "FILE", env = "GOOGLE_APPLICATION_CREDENTIALS", global = true)]
    credentials: Option<PathBuf>,

    /// Firestore project id
    #[arg(long, env = "FIRESTORE_PROJECT_ID", global = true)]
    project_id: Option<String>,

    /// Firestore emulator host:port
    #[arg(long, env = "FIRESTORE_EMULATOR_HOST", global = true)]
    emulator_host: Option<String>,

    /// Snapshot root directory override
    #[arg(long, value_name = "DIR", global = true)]
    snapshot_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a legacy user to a snapshot directory
    Export {
        /// Legacy user id
        #[arg(long, env = "LEGACY_USER_ID")]
        legacy_user_id: String,
    },

    /// Import a snapshot into the owner model
    Import {
        /// Legacy user id whose snapshot is imported
        #[arg(long, env = "LEGACY_USER_ID")]
        legacy_user_id: String,

        /// Destination owner id (defaults to the legacy user id)
        #[arg(long, env = "OWNER_ID")]
        owner_id: Option<String>,

        /// Plan the import without writing
        #[arg(long)]
        dry_run: bool,

        /// Concurrent writes per collection
        #[arg(long)]
        workers: Option<usize>,

        /// Leave documents that already exist untouched
        #[arg(long)]
        skip_existing: bool,
    },

    /// Compare a snapshot with the owner record (read-only)
    Inspect {
        /// Legacy user id whose snapshot is compared
        #[arg(long, env = "LEGACY_USER_ID")]
        legacy_user_id: String,

        /// Owner id (defaults to the legacy user id)
        #[arg(long, env = "OWNER_ID")]
        owner_id: Option<String>,
    },

    /// Validate configuration
    Validate,

    /// Generate an example configuration file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "migration.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG overrides --verbose
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match &cli.command {
        Commands::Export { legacy_user_id } => {
            let config = load_config(&cli)?;
            run_export(config, legacy_user_id).await?;
        }
        Commands::Import {
            legacy_user_id,
            owner_id,
            dry_run,
            workers,
            skip_existing,
        } => {
            let mut config = load_config(&cli)?;
            if *dry_run {
                config.options.dry_run = true;
            }
            if let Some(workers) = workers {
                config.options.workers = *workers;
            }
            if *skip_existing {
                config.options.write_mode = WriteMode::SkipExisting;
            }
            config.validate()?;
            run_import(config, legacy_user_id, owner_id.as_deref()).await?;
        }
        Commands::Inspect {
            legacy_user_id,
            owner_id,
        } => {
            let config = load_config(&cli)?;
            run_inspect(config, legacy_user_id, owner_id.as_deref()).await?;
        }
        Commands::Validate => {
            let config = load_config(&cli)?;
            print_config(&config);
        }
        Commands::Init { output, force } => {
            generate_config(output, *force)?;
        }
    }

    Ok(())
}

/// Loads the configuration file (or defaults) and applies flag overrides.
fn load_config(cli: &Cli) -> anyhow::Result<MigrationConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            MigrationConfig::from_file(path)?
        }
        None => MigrationConfig::default(),
    };

    if let Some(credentials) = &cli.credentials {
        config.database.credentials = Some(credentials.clone());
    }
    if let Some(project_id) = cli.project_id.as_ref().filter(|p| !p.is_empty()) {
        config.database.project_id = Some(project_id.clone());
    }
    if let Some(host) = cli.emulator_host.as_ref().filter(|h| !h.is_empty()) {
        config.database.emulator_host = Some(host.clone());
    }
    if let Some(dir) = &cli.snapshot_dir {
        config.paths.snapshot_dir = dir.clone();
    }

    config.validate()?;
    Ok(config)
}

async fn run_export(config: MigrationConfig, legacy_user_id: &str) -> anyhow::Result<()> {
    let store = create_store(&config)?;
    let summary = Exporter::new(store, config)
        .with_progress(true)
        .run(legacy_user_id)
        .await?;
    print_export(&summary);
    Ok(())
}

async fn run_import(
    config: MigrationConfig,
    legacy_user_id: &str,
    owner_id: Option<&str>,
) -> anyhow::Result<()> {
    let store = create_store(&config)?;
    let report = Importer::new(store, config)?
        .with_progress(true)
        .run(legacy_user_id, owner_id)
        .await?;
    print_import(&report);
    report.ensure_complete()?;
    Ok(())
}

async fn run_inspect(
    config: MigrationConfig,
    legacy_user_id: &str,
    owner_id: Option<&str>,
) -> anyhow::Result<()> {
    let store = create_store(&config)?;
    let report = Inspector::new(store, config)
        .run(legacy_user_id, owner_id)
        .await?;
    print_inspection(&report);
    Ok(())
}

fn print_export(summary: &ExportSummary) {
    println!("\n✅ Export Complete!");
    println!("   Legacy user: {}", summary.legacy_user_id);
    println!("   Snapshot:    {}", summary.directory.display());
    for (name, count) in &summary.collections {
        println!("   {:<15} {}", name, count);
    }
    println!("   Documents:   {}", summary.total_documents());
    println!("   Duration:    {:.2}s", summary.duration.as_secs_f64());
}

fn print_import(report: &ImportReport) {
    if !report.snapshot_found {
        println!(
            "\n⚠️  No snapshot at {}, nothing imported",
            report.snapshot_dir.display()
        );
        return;
    }

    let title = if report.dry_run {
        "Import Plan (dry run)"
    } else {
        "Import Complete"
    };
    let mark = if report.has_failures() { "⚠️ " } else { "✅" };
    println!("\n{mark} {title}");
    println!("   Legacy user: {}", report.legacy_user_id);
    println!("   Owner:       {}", report.owner_path);
    if report.owner_created {
        println!("   Owner document created");
    }
    println!(
        "\n   {:<15} | {:>6} | {:>7} | {:>7} | {:>6}",
        "collection", "read", "written", "skipped", "failed"
    );
    for c in &report.collections {
        println!(
            "   {:<15} | {:>6} | {:>7} | {:>7} | {:>6}",
            c.legacy, c.read, c.written, c.skipped, c.failed
        );
    }
    if !report.unmapped.is_empty() {
        println!("\n   Not imported (no mapping): {}", report.unmapped.join(", "));
    }
    if report.has_failures() {
        println!("\n   Failures:");
        for failure in &report.failures {
            println!("     - {}: {}", failure.path, failure.error);
        }
    }
    println!("   Duration: {:.2}s", report.duration.as_secs_f64());
}

fn print_inspection(report: &DiscrepancyReport) {
    println!("\n🔍 Owner-centric inspection");
    println!("{}", "=".repeat(60));
    println!("   Legacy user: {}", report.legacy_user_id);
    println!("   Owner:       {}", report.owner_path);
    if !report.snapshot_found {
        println!("   ⚠️  Snapshot missing, compared as empty");
    }
    match &report.owner {
        Some(owner) => {
            println!("   ✅ Owner document exists");
            println!("      role:   {}", owner.role.as_deref().unwrap_or("-"));
            println!("      status: {}", owner.status.as_deref().unwrap_or("-"));
            println!("      appId:  {}", owner.app_id.as_deref().unwrap_or("-"));
            if let Some(migration) = &owner.migration_status {
                println!("      migration: {migration}");
            }
        }
        None => println!("   ❌ Owner document does not exist"),
    }

    println!("\n📊 Legacy vs owner");
    println!("{}", "-".repeat(60));
    for c in &report.collections {
        let status = match c.status {
            CollectionStatus::Ok => "✅ ok",
            CollectionStatus::Incomplete => "⚠️  incomplete",
            CollectionStatus::Empty => "❌ empty",
        };
        let exported = c
            .exported_count
            .map_or_else(|| "-".to_string(), |n| n.to_string());
        println!(
            "   {:<15} | exported: {:<4} | legacy: {:<4} | owner: {:<4} | {}",
            c.legacy, exported, c.legacy_count, c.owner_count, status
        );
    }

    if !report.discrepancies.is_empty() {
        println!("\n   Discrepancies ({}):", report.discrepancies.len());
        for d in &report.discrepancies {
            println!("     - {d}");
        }
    }
    if !report.integrity.is_empty() {
        println!("\n🧠 Integrity");
        println!("{}", "-".repeat(60));
        for issue in &report.integrity {
            println!("     - {issue}");
        }
    }

    println!("\n🧾 Recommendation");
    println!("{}", "=".repeat(60));
    let blocking = report.blocking_issues();
    if blocking.is_empty() {
        println!("   ✅ Ready to import");
    } else {
        println!("   ❌ Do not import yet");
        for reason in blocking {
            println!("      ➜ {reason}");
        }
    }
}

fn print_config(config: &MigrationConfig) {
    println!("✅ Configuration is valid!");
    println!(
        "   Project:     {}",
        config.database.project_id.as_deref().unwrap_or("(from credentials)")
    );
    match &config.database.emulator_host {
        Some(host) => println!("   Emulator:    {host}"),
        None => println!(
            "   Credentials: {}",
            config
                .database
                .credentials
                .as_ref()
                .map_or("(not set)".to_string(), |p| p.display().to_string())
        ),
    }
    println!("   Legacy root: {}", config.paths.legacy_root);
    println!("   Owner root:  {}", config.paths.owner_root);
    println!("   Snapshots:   {}", config.paths.snapshot_dir.display());
    println!("   Collections: {}", config.mapping.collections.len());
    println!("   Write mode:  {:?}", config.options.write_mode);
}

fn generate_config(output: &Path, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            output.display()
        );
    }
    std::fs::write(output, CONFIG_TEMPLATE)?;
    println!("✅ Generated configuration: {:?}", output);
    println!(
        "   Edit the file and run: controlaudit-migrate --config {:?} export --legacy-user-id <UID>",
        output
    );
    Ok(())
}

const CONFIG_TEMPLATE: &str = r#"# ControlAudit migration configuration
database:
  project_id: controlaudit
  # credentials: ./serviceAccountKey-controlfile.json  # or GOOGLE_APPLICATION_CREDENTIALS
  database_id: "(default)"
  # emulator_host: localhost:8080  # or FIRESTORE_EMULATOR_HOST

paths:
  legacy_root: apps/auditoria/users
  owner_root: apps/auditoria/owners
  snapshot_dir: migracion/legacy

mapping:
  app_id: auditoria
  collections:
    - { legacy: empresas, owner: empresas, id_fields: [empresaId] }
    - { legacy: sucursales, owner: sucursales, id_fields: [sucursalId] }
    - { legacy: empleados, owner: empleados, id_fields: [empleadoId] }
    - { legacy: formularios, owner: formularios, id_fields: [formularioId] }
    - { legacy: capacitaciones, owner: capacitaciones, id_fields: [capacitacionId] }
    - { legacy: reportes, owner: reportes, id_fields: [reporteId] }
    - { legacy: accidentes, owner: accidentes, id_fields: [accidenteId] }
  dropped_fields: [clienteAdminId, propietarioId]
  field_renames: {}
  references:
    - { collection: sucursales, field: empresaId, target: empresas }
  required_collections: [empresas]

options:
  workers: 4
  write_mode: upsert  # upsert or skip_existing
  dry_run: false
  page_size: 300
  max_retries: 3
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_is_valid_config() {
        let config: MigrationConfig = serde_yaml::from_str(CONFIG_TEMPLATE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.mapping.collections.len(), 7);
    }

    #[test]
    fn test_cli_parses_import_flags() {
        let cli = Cli::try_parse_from([
            "controlaudit-migrate",
            "import",
            "--legacy-user-id",
            "u1",
            "--owner-id",
            "o1",
            "--dry-run",
            "--workers",
            "8",
        ])
        .unwrap();
        match cli.command {
            Commands::Import {
                legacy_user_id,
                owner_id,
                dry_run,
                workers,
                skip_existing,
            } => {
                assert_eq!(legacy_user_id, "u1");
                assert_eq!(owner_id.as_deref(), Some("o1"));
                assert!(dry_run);
                assert_eq!(workers, Some(8));
                assert!(!skip_existing);
            }
            _ => panic!("expected import"),
        }
    }
}
