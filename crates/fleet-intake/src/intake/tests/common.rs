use std::sync::{Arc, Mutex};

use axum::response::Response;
use serde_json::Value;

use crate::intake::allowlist::ColumnAllowlistPolicy;
use crate::intake::audit::{AuditLog, AuditLogError, InMemoryAuditLog};
use crate::intake::domain::{BatchId, ImportAuditEntry};
use crate::intake::partition::{InMemoryPartitionDirectory, PartitionReferenceData};
use crate::intake::repository::InMemoryIntakeStore;
use crate::intake::service::{IntakeRequest, IntakeService, IntakeSettings};

pub(super) const ROUTE_LOG_HEADER: &str =
    "Transaction ID,Trip Date,Space Type,Driver ID,Driver,Driver Phone,Passenger,Pickup Address,Pickup City,Pickup Lat,Pickup Lon,Status";

/// Ten completed trips. Row 4 has no driver id and row 7 reuses the id of row 2.
pub(super) fn ten_row_route_log() -> String {
    let rows = [
        "RL-1001,2024-03-04,AMB,D-17,Pat Driver,555-0101,Jane Roe,12 Elm St,Springfield,39.78,-89.65,Completed",
        "RL-1002,2024-03-04,WC,D-17,Pat Driver,555-0101,John Roe,14 Oak St,Springfield,39.79,-89.64,Completed",
        "RL-1003,2024-03-04,WC,D-22,Sam Wheels,555-0102,Jim Roe,9 Pine St,Chatham,39.67,-89.70,Completed",
        "RL-1004,2024-03-04,AMB,,Sam Wheels,555-0102,Joan Roe,3 Ash St,Chatham,39.67,-89.70,Completed",
        "RL-1005,2024-03-05,STR,D-22,Sam Wheels,555-0102,Jill Roe,77 Main St,Rochester,39.74,-89.53,Completed",
        "RL-1006,2024-03-05,AMB,D-31,Lee Transit,555-0103,Jack Roe,5 Birch Ln,Springfield,39.80,-89.66,No Show",
        "RL-1002,2024-03-05,WC,D-31,Lee Transit,555-0103,John Roe,14 Oak St,Springfield,39.79,-89.64,Completed",
        "RL-1008,2024-03-05,AMB,D-31,Lee Transit,555-0103,Jude Roe,8 Cedar Ct,Sherman,39.88,-89.60,Completed",
        "RL-1009,2024-03-06,WC,D-17,Pat Driver,555-0101,June Roe,21 Maple Dr,Springfield,39.77,-89.61,Completed",
        "RL-1010,2024-03-06,AMB,D-17,Pat Driver,555-0101,Jay Roe,30 Walnut Ave,Riverton,39.84,-89.54,Completed",
    ];
    format!("{ROUTE_LOG_HEADER}\n{}\n", rows.join("\n"))
}

pub(super) fn manifest_csv() -> String {
    "Trip ID,Date of Service,Level of Service,Member Name,DOB,Pickup Address,Pickup City,Funding Source,Trip Status\n\
M-1,03/04/2024,WC,Jane Roe,01/02/1950,12 Elm St,Springfield,Medicaid,Scheduled\n\
M-2,03/05/2024,AMB,John Roe,03/04/1948,14 Oak St,Springfield,Medicare Advantage,Cancelled\n\
M-3,03/06/2024,STR,Jim Roe,05/06/1960,9 Pine St,Chatham,Medicaid,Scheduled\n"
        .to_string()
}

pub(super) fn reference_data() -> PartitionReferenceData {
    let json = r#"{
        "opcos": [
            {"code": "NORTH", "name": "North Fleet"},
            {"code": "SOUTH", "name": "South Fleet"}
        ],
        "brokers": [{"code": "MTM", "name": "Medical Transport Mgmt"}],
        "accounts": [
            {"code": "MTM-MCD", "broker_code": "MTM", "opco_code": "NORTH"},
            {"code": "MTM-CARE", "broker_code": "MTM", "opco_code": "NORTH"},
            {"code": "MTM-SOUTH", "broker_code": "MTM", "opco_code": "SOUTH"}
        ]
    }"#;
    serde_json::from_str(json).expect("reference data")
}

pub(super) fn request(file_name: &str, content: String, account: &str) -> IntakeRequest {
    IntakeRequest {
        file_name: file_name.to_string(),
        content,
        opco_code: Some("NORTH".to_string()),
        broker_account_code: Some(account.to_string()),
        force: false,
    }
}

pub(super) type MemoryService =
    IntakeService<InMemoryIntakeStore, InMemoryAuditLog, InMemoryPartitionDirectory>;

pub(super) fn build_service() -> (MemoryService, Arc<InMemoryAuditLog>) {
    build_service_with(Arc::new(InMemoryAuditLog::default()))
}

pub(super) fn build_service_with<A: AuditLog + 'static>(
    audit: Arc<A>,
) -> (
    IntakeService<InMemoryIntakeStore, A, InMemoryPartitionDirectory>,
    Arc<A>,
) {
    let service = IntakeService::new(
        Arc::new(InMemoryIntakeStore::new()),
        audit.clone(),
        Arc::new(InMemoryPartitionDirectory::new(reference_data())),
        Arc::new(ColumnAllowlistPolicy::builtin()),
        IntakeSettings {
            sample_size: 3,
            max_upload_bytes: 64 * 1024,
        },
    );
    (service, audit)
}

/// Ledger that silently loses the entry for one row number.
pub(super) struct LossyAuditLog {
    lose_row: usize,
    entries: Mutex<Vec<ImportAuditEntry>>,
}

impl LossyAuditLog {
    pub(super) fn losing(row: usize) -> Self {
        Self {
            lose_row: row,
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl AuditLog for LossyAuditLog {
    fn append(&self, entry: ImportAuditEntry) -> Result<(), AuditLogError> {
        if entry.row_number != self.lose_row {
            self.entries.lock().expect("ledger mutex poisoned").push(entry);
        }
        Ok(())
    }

    fn entries_for(&self, batch_id: &BatchId) -> Result<Vec<ImportAuditEntry>, AuditLogError> {
        Ok(self
            .entries
            .lock()
            .expect("ledger mutex poisoned")
            .iter()
            .filter(|entry| entry.batch_id == *batch_id)
            .cloned()
            .collect())
    }
}

pub(super) struct BrokenAuditLog;

impl AuditLog for BrokenAuditLog {
    fn append(&self, _entry: ImportAuditEntry) -> Result<(), AuditLogError> {
        Err(AuditLogError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        )))
    }

    fn entries_for(&self, _batch_id: &BatchId) -> Result<Vec<ImportAuditEntry>, AuditLogError> {
        Ok(Vec::new())
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
