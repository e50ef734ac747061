//! Migration orchestrator - main workflow coordinator.
//!
//! Tables are processed one at a time in wave order. For each table the
//! stage copy is provisioned and loaded, system versioning is switched off
//! where needed, FK shadows are resolved from already-merged parents, the
//! table is merged, and versioning is restored.

pub mod graph;

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::config::Config;
use crate::core::catalog::Catalog;
use crate::core::descriptor::{TableDescriptor, TableType};
use crate::core::schema::{TableName, TemporalKind};
use crate::core::traits::SqlSession;
use crate::drivers::{MssqlCatalog, MssqlSession};
use crate::error::Result;
use crate::merge::{merge_table, MergeOutcome, MergeStrategy};
use crate::propagate::FkPropagator;
use crate::stage::{DataTransporter, StageAction, StageProvisioner};
use crate::temporal::{TemporalController, VersionedPair};

pub use graph::{Dependency, DependencyGraph, DependencyKind, GraphReport};

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    catalog: Arc<dyn Catalog>,
    source: Arc<dyn SqlSession>,
    dest: Arc<dyn SqlSession>,
}

/// Per-table outcome.
#[derive(Debug, Clone, Serialize)]
pub struct TableResult {
    pub table: String,
    pub wave: u32,
    pub table_type: TableType,
    pub strategy: MergeStrategy,
    /// `None` in a dry run.
    pub stage: Option<StageAction>,
    pub rows_staged: u64,
    pub rows_inserted: u64,
    pub rows_skipped: u64,
    pub keys_remapped: u64,
    pub assumed_existing: u64,
    pub fk_rows_updated: u64,
    pub duration_seconds: f64,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: String,

    pub dry_run: bool,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    pub tables_total: usize,
    pub rows_staged: u64,
    pub rows_inserted: u64,

    /// Wave order findings that did not stop the run.
    pub warnings: Vec<String>,

    pub tables: Vec<TableResult>,
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// One planned table.
#[derive(Debug, Clone, Serialize)]
pub struct TablePlan {
    pub wave: u32,
    pub table: String,
    pub table_type: TableType,
    pub strategy: MergeStrategy,
    pub temporal: TemporalKind,
    pub shadow_columns: Vec<String>,
    pub clustered_columns: Vec<String>,
}

/// Processing plan with wave order findings.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationPlan {
    pub tables: Vec<TablePlan>,
    pub dependencies: Vec<String>,
    pub report: GraphReport,
}

impl MigrationPlan {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Connectivity of both databases.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    pub source_error: Option<String>,
    pub destination_connected: bool,
    pub destination_latency_ms: u64,
    pub destination_error: Option<String>,
    pub healthy: bool,
}

impl Orchestrator {
    /// Connect to both databases. Catalog metadata is read from the destination.
    pub async fn new(config: Config) -> Result<Self> {
        let max = config.migration.max_connections;
        let batch_rows = config.migration.insert_batch_rows;

        let source = MssqlSession::connect(&config.source, max, "source")
            .await?
            .with_insert_batch_rows(batch_rows);
        let dest = Arc::new(
            MssqlSession::connect(&config.destination, max, "destination")
                .await?
                .with_insert_batch_rows(batch_rows),
        );
        let catalog = Arc::new(MssqlCatalog::new(dest.clone()));

        Ok(Self::with_components(config, catalog, Arc::new(source), dest))
    }

    /// Build from already constructed parts.
    pub fn with_components(
        config: Config,
        catalog: Arc<dyn Catalog>,
        source: Arc<dyn SqlSession>,
        dest: Arc<dyn SqlSession>,
    ) -> Self {
        Self {
            config,
            catalog,
            source,
            dest,
        }
    }

    /// Tables in processing order with their wave numbers.
    fn scheduled(&self) -> Vec<(u32, TableName)> {
        let schema = &self.config.destination.schema;
        self.config
            .migration
            .waves
            .iter()
            .flat_map(|w| {
                w.tables
                    .iter()
                    .map(move |t| (w.number, TableName::new(schema.as_str(), t.as_str())))
            })
            .collect()
    }

    async fn check_waves(&self) -> Result<(DependencyGraph, GraphReport)> {
        let tables: Vec<TableName> = self.scheduled().into_iter().map(|(_, t)| t).collect();
        let graph = DependencyGraph::build(self.catalog.as_ref(), &tables).await?;
        let report = graph.validate();
        Ok((graph, report))
    }

    /// Classify every table and check the wave order without touching data.
    pub async fn plan(&self) -> Result<MigrationPlan> {
        let (graph, report) = self.check_waves().await?;
        let migration = &self.config.migration;

        let mut tables = Vec::new();
        for (wave, name) in self.scheduled() {
            let desc = TableDescriptor::load(
                self.catalog.as_ref(),
                &name.schema,
                &migration.stage_schema,
                &name.name,
            )
            .await?;
            tables.push(TablePlan {
                wave,
                table: name.to_string(),
                table_type: desc.table_type(),
                strategy: MergeStrategy::for_table(&desc),
                temporal: desc.temporal().kind,
                shadow_columns: desc.shadow_columns()?.iter().map(|s| s.name()).collect(),
                clustered_columns: desc.clustered_columns().to_vec(),
            });
        }

        Ok(MigrationPlan {
            tables,
            dependencies: graph.dependencies().iter().map(|d| d.to_string()).collect(),
            report,
        })
    }

    /// Run the migration. A dry run validates waves and classifies tables only.
    pub async fn run(&self, dry_run: bool) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let migration = &self.config.migration;

        info!("Starting migration run: {}", run_id);

        let (_, report) = self.check_waves().await?;
        report.enforce(migration.wave_validation)?;
        let mut warnings = report.warnings.clone();
        warnings.extend(report.violations.iter().cloned());

        let tables = if dry_run {
            info!("Dry run: classifying tables only");
            self.plan()
                .await?
                .tables
                .into_iter()
                .map(|p| TableResult {
                    table: p.table,
                    wave: p.wave,
                    table_type: p.table_type,
                    strategy: p.strategy,
                    stage: None,
                    rows_staged: 0,
                    rows_inserted: 0,
                    rows_skipped: 0,
                    keys_remapped: 0,
                    assumed_existing: 0,
                    fk_rows_updated: 0,
                    duration_seconds: 0.0,
                })
                .collect()
        } else {
            StageProvisioner::new(self.catalog.as_ref(), self.dest.as_ref())
                .create_schema(&migration.stage_schema)
                .await?;

            let mut results = Vec::new();
            let mut current_wave = None;
            for (wave, name) in self.scheduled() {
                if current_wave != Some(wave) {
                    info!("Processing wave {}", wave);
                    current_wave = Some(wave);
                }
                match self.process_table(wave, &name).await {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        error!("{} failed: {}", name, e);
                        return Err(e);
                    }
                }
            }
            results
        };

        let completed_at = Utc::now();
        let result = MigrationResult {
            run_id,
            status: if dry_run { "dry_run" } else { "completed" }.to_string(),
            dry_run,
            duration_seconds: timer.elapsed().as_secs_f64(),
            started_at,
            completed_at,
            tables_total: tables.len(),
            rows_staged: tables.iter().map(|t| t.rows_staged).sum(),
            rows_inserted: tables.iter().map(|t| t.rows_inserted).sum(),
            warnings,
            tables,
        };

        info!(
            "Migration {} in {:.2}s: {} tables, {} rows inserted",
            result.status, result.duration_seconds, result.tables_total, result.rows_inserted
        );
        Ok(result)
    }

    async fn process_table(&self, wave: u32, name: &TableName) -> Result<TableResult> {
        let timer = Instant::now();
        let migration = &self.config.migration;
        let catalog = self.catalog.as_ref();
        let dest = self.dest.as_ref();

        let desc =
            TableDescriptor::load(catalog, &name.schema, &migration.stage_schema, &name.name)
                .await?;
        info!("{}: {} table", name, desc.table_type());

        let stage = StageProvisioner::new(catalog, dest)
            .provision(&desc, migration.recreate_stage_tables)
            .await?;

        let rows_staged =
            DataTransporter::new(self.source.as_ref(), dest, &self.config.source.schema)
                .with_batch_rows(self.config.migration.insert_batch_rows)
                .copy(&desc)
                .await?;

        let versioned = VersionedPair::for_table(&desc)?;
        let temporal = TemporalController::new(dest);
        if let Some(pair) = &versioned {
            temporal.disable(pair).await?;
        }

        let fk_rows_updated = FkPropagator::new(catalog, dest).propagate(&desc).await?;
        let outcome: MergeOutcome = merge_table(dest, &desc, rows_staged).await?;

        if let Some(pair) = &versioned {
            temporal.enable(pair).await?;
        }

        Ok(TableResult {
            table: name.to_string(),
            wave,
            table_type: desc.table_type(),
            strategy: MergeStrategy::for_table(&desc),
            stage: Some(stage),
            rows_staged: outcome.rows_staged,
            rows_inserted: outcome.rows_inserted,
            rows_skipped: outcome.rows_skipped,
            keys_remapped: outcome.keys_remapped,
            assumed_existing: outcome.assumed_existing,
            fk_rows_updated,
            duration_seconds: timer.elapsed().as_secs_f64(),
        })
    }

    /// Test both connections.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let (source_connected, source_latency_ms, source_error) = ping(self.source.as_ref()).await;
        let (destination_connected, destination_latency_ms, destination_error) =
            ping(self.dest.as_ref()).await;

        Ok(HealthCheckResult {
            source_connected,
            source_latency_ms,
            source_error,
            destination_connected,
            destination_latency_ms,
            destination_error,
            healthy: source_connected && destination_connected,
        })
    }

    /// Release pooled connections.
    pub async fn close(&self) {
        self.source.close().await;
        self.dest.close().await;
    }
}

async fn ping(session: &dyn SqlSession) -> (bool, u64, Option<String>) {
    let start = Instant::now();
    let outcome = session.health_check().await;
    let latency = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    match outcome {
        Ok(()) => (true, latency, None),
        Err(e) => (false, latency, Some(e.to_string())),
    }
}
