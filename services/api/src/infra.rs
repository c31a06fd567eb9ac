use fleet_intake::config::IntakeConfig;
use fleet_intake::error::AppError;
use fleet_intake::intake::{
    AuditLog, AuditLogError, BatchId, ColumnAllowlistPolicy, ImportAuditEntry, InMemoryAuditLog,
    InMemoryIntakeStore, InMemoryPartitionDirectory, IntakeService, IntakeSettings,
    JsonlAuditLog,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Audit ledger chosen at startup: on disk when a path is configured.
#[derive(Debug)]
pub(crate) enum Ledger {
    Memory(InMemoryAuditLog),
    Jsonl(JsonlAuditLog),
}

impl Ledger {
    pub(crate) fn from_config(config: &IntakeConfig) -> Self {
        match &config.audit_log_path {
            Some(path) => Ledger::Jsonl(JsonlAuditLog::new(path)),
            None => Ledger::Memory(InMemoryAuditLog::default()),
        }
    }
}

impl AuditLog for Ledger {
    fn append(&self, entry: ImportAuditEntry) -> Result<(), AuditLogError> {
        match self {
            Ledger::Memory(log) => log.append(entry),
            Ledger::Jsonl(log) => log.append(entry),
        }
    }

    fn entries_for(&self, batch_id: &BatchId) -> Result<Vec<ImportAuditEntry>, AuditLogError> {
        match self {
            Ledger::Memory(log) => log.entries_for(batch_id),
            Ledger::Jsonl(log) => log.entries_for(batch_id),
        }
    }
}

pub(crate) type ApiIntakeService =
    IntakeService<InMemoryIntakeStore, Ledger, InMemoryPartitionDirectory>;

pub(crate) fn build_intake_service(config: &IntakeConfig) -> Result<ApiIntakeService, AppError> {
    let directory = match &config.partitions_path {
        Some(path) => InMemoryPartitionDirectory::from_path(path)?,
        None => {
            warn!("INTAKE_PARTITIONS_PATH unset; every upload will fail partition resolution");
            InMemoryPartitionDirectory::default()
        }
    };

    let policy = match &config.allowlist_path {
        Some(path) => ColumnAllowlistPolicy::from_path(path)?,
        None => ColumnAllowlistPolicy::builtin(),
    };

    let ledger = Ledger::from_config(config);
    info!(
        policy_version = policy.version(),
        operating_companies = directory.data().opcos.len(),
        broker_accounts = directory.data().accounts.len(),
        durable_ledger = matches!(ledger, Ledger::Jsonl(_)),
        "intake service configured"
    );

    Ok(IntakeService::new(
        Arc::new(InMemoryIntakeStore::new()),
        Arc::new(ledger),
        Arc::new(directory),
        Arc::new(policy),
        IntakeSettings {
            sample_size: config.sample_size,
            max_upload_bytes: config.max_upload_bytes,
        },
    ))
}
