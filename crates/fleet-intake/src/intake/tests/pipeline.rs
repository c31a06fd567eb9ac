use std::sync::Arc;

use super::common::*;
use crate::intake::audit::AuditLog;
use crate::intake::domain::{BatchStatus, PartitionKey, RowOutcome};
use crate::intake::formats::{DetectionError, FormatKind, StructuralFault};
use crate::intake::partition::PartitionError;
use crate::intake::repository::IntakeRepository;
use crate::intake::service::IntakeError;
use crate::intake::summary::RowIssue;

fn partition(account: &str) -> PartitionKey {
    PartitionKey {
        opco_code: "NORTH".to_string(),
        broker_code: "MTM".to_string(),
        broker_account_code: account.to_string(),
    }
}

#[test]
fn ten_row_actual_trip_file_reconciles() {
    let (service, audit) = build_service();
    let result = service
        .commit(&request("routelog.csv", ten_row_route_log(), "MTM-MCD"))
        .expect("commit succeeds");

    assert_eq!(result.format, FormatKind::RouteLogCsv);
    assert_eq!(result.total_rows, 10);
    assert_eq!(result.imported_rows, 8);
    assert_eq!(result.error_rows, 1);
    assert_eq!(result.duplicate_rows, 1);
    assert_eq!(result.cancelled_rows, 0);
    assert_eq!(result.expected_rows, 10);
    assert_eq!(result.accounted_rows, 10);
    assert!(result.missing_rows.is_empty());
    assert!(result.is_complete);
    assert_eq!(result.status, BatchStatus::Completed);
    assert_eq!(
        result.errors,
        vec![RowIssue {
            row: 4,
            message: "missing driver id".to_string()
        }]
    );

    let entries = audit.entries_for(&result.import_id).expect("ledger");
    assert_eq!(entries.len(), 10);
    assert_eq!(entries[6].outcome, RowOutcome::Duplicate);
    assert_eq!(entries[3].outcome, RowOutcome::Error);

    let trips = service
        .repository()
        .trips_for_batch(&result.import_id)
        .expect("trips");
    assert_eq!(trips.len(), 8);
    let no_show = trips
        .iter()
        .find(|record| record.trip.external_trip_id == "RL-1006")
        .expect("no-show persisted");
    assert!(no_show.trip.cancelled);
}

#[test]
fn persisted_records_and_ledger_carry_no_protected_values() {
    let (service, audit) = build_service();
    let result = service
        .commit(&request("routelog.csv", ten_row_route_log(), "MTM-MCD"))
        .expect("commit succeeds");

    let trips = service
        .repository()
        .trips_for_batch(&result.import_id)
        .expect("trips");
    let stored = serde_json::to_string(&trips).expect("serialize trips");
    let ledger = serde_json::to_string(&audit.entries_for(&result.import_id).expect("ledger"))
        .expect("serialize ledger");
    let summary = serde_json::to_string(&result).expect("serialize result");

    for protected in ["Jane Roe", "12 Elm St", "555-0101"] {
        assert!(!stored.contains(protected), "{protected} leaked into trips");
        assert!(!ledger.contains(protected), "{protected} leaked into ledger");
        assert!(!summary.contains(protected), "{protected} leaked into result");
    }
    assert!(stored.contains("Springfield"));
    assert!(result.ignored_columns.contains(&"Passenger".to_string()));
    assert!(result.ignored_columns.contains(&"Driver Phone".to_string()));
    assert!(!result.extracted_columns.contains(&"Pickup Address".to_string()));
}

#[test]
fn preview_is_repeatable_and_leaves_no_trace() {
    let (service, audit) = build_service();
    let upload = request("routelog.csv", ten_row_route_log(), "MTM-MCD");

    let first = service.preview(&upload).expect("preview");
    let second = service.preview(&upload).expect("preview again");
    assert_eq!(first, second);

    assert_eq!(first.total_rows, 10);
    assert_eq!(first.valid_rows, 8);
    assert_eq!(first.duplicate_rows, 1);
    assert_eq!(first.error_rows, 1);
    assert_eq!(first.sample_trips.len(), 3);
    assert!(!first.is_duplicate);
    assert_eq!(first.los_counts.get("AMB"), Some(&4));
    assert!(first.allowed_columns.contains(&"Driver ID".to_string()));
    assert!(!first.allowed_columns.contains(&"Driver SSN".to_string()));

    assert!(service
        .repository()
        .batches_in_partition(&partition("MTM-MCD"))
        .expect("batches")
        .is_empty());

    let committed = service.commit(&upload).expect("commit");
    assert_eq!(committed.imported_rows, first.valid_rows);
    assert_eq!(committed.error_rows, first.error_rows);
    assert_eq!(committed.duplicate_rows, first.duplicate_rows);
    assert_eq!(
        audit.entries_for(&committed.import_id).expect("ledger").len(),
        first.total_rows
    );
}

#[test]
fn recommitting_the_same_file_is_refused_unless_forced() {
    let (service, _audit) = build_service();
    let upload = request("routelog.csv", ten_row_route_log(), "MTM-MCD");
    let first = service.commit(&upload).expect("first commit");

    let resaved = request(
        "routelog-copy.csv",
        ten_row_route_log().replace('\n', "\r\n"),
        "MTM-MCD",
    );
    let preview = service.preview(&resaved).expect("preview");
    assert!(preview.is_duplicate);
    assert_eq!(preview.duplicate_of, Some(first.import_id));

    match service.commit(&resaved) {
        Err(IntakeError::DuplicateFile { batch_id }) => {
            assert_eq!(batch_id, Some(first.import_id))
        }
        other => panic!("expected duplicate file refusal, got {other:?}"),
    }

    let mut forced = resaved;
    forced.force = true;
    let result = service.commit(&forced).expect("forced commit");
    assert_eq!(result.imported_rows, 0);
    assert_eq!(result.duplicate_rows, 9);
    assert_eq!(result.error_rows, 1);
    assert!(result.is_complete);
}

#[test]
fn identical_trip_ids_stay_apart_across_partitions() {
    let (service, _audit) = build_service();
    let mcd = service
        .commit(&request("routelog.csv", ten_row_route_log(), "MTM-MCD"))
        .expect("medicaid account");
    let care = service
        .commit(&request("routelog.csv", ten_row_route_log(), "MTM-CARE"))
        .expect("care account");
    assert_eq!(mcd.imported_rows, 8);
    assert_eq!(care.imported_rows, 8);

    let overlap = format!(
        "{ROUTE_LOG_HEADER}\nRL-1001,2024-03-07,AMB,D-17,Pat Driver,555-0101,Jane Roe,12 Elm St,Springfield,39.78,-89.65,Completed\n"
    );
    let third = service
        .commit(&request("late.csv", overlap, "MTM-MCD"))
        .expect("third import");
    assert_eq!(third.imported_rows, 0);
    assert_eq!(third.duplicate_rows, 1);
    assert!(third.is_complete);
}

#[test]
fn unrecognized_file_fails_the_batch_without_rows() {
    let (service, audit) = build_service();
    let upload = request(
        "mystery.csv",
        "Foo,Bar,Baz\n1,2,3\n".to_string(),
        "MTM-MCD",
    );

    let err = service.commit(&upload).expect_err("unrecognized");
    assert!(matches!(err, IntakeError::Detection(DetectionError::Unrecognized { .. })));

    let batches = service
        .repository()
        .batches_in_partition(&partition("MTM-MCD"))
        .expect("batches");
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].status, BatchStatus::Failed);
    assert!(batches[0].failure_reason.is_some());
    assert!(service
        .repository()
        .trips_for_batch(&batches[0].id)
        .expect("trips")
        .is_empty());
    assert!(audit.entries_for(&batches[0].id).expect("ledger").is_empty());
}

#[test]
fn structural_failure_persists_nothing_and_allows_a_retry() {
    let (service, audit) = build_service();
    let header_only = request(
        "manifest.csv",
        "Trip ID,Date of Service,Level of Service\n".to_string(),
        "MTM-MCD",
    );

    match service.commit(&header_only) {
        Err(IntakeError::Structural(err)) => assert_eq!(err.kind, StructuralFault::NoRows),
        other => panic!("expected structural failure, got {other:?}"),
    }
    let failed = service
        .repository()
        .batches_in_partition(&partition("MTM-MCD"))
        .expect("batches")
        .remove(0);
    assert_eq!(failed.status, BatchStatus::Failed);
    assert!(audit.entries_for(&failed.id).expect("ledger").is_empty());

    let retry = service.commit(&header_only);
    assert!(matches!(retry, Err(IntakeError::Structural(_))), "failed batches never block");
}

#[test]
fn partition_is_checked_before_the_file() {
    let (service, _audit) = build_service();
    let mut upload = request("mystery.bin", "not even a header".to_string(), "MTM-MCD");
    upload.opco_code = None;
    assert!(matches!(
        service.preview(&upload),
        Err(IntakeError::Partition(PartitionError::Missing { field: "opco_code" }))
    ));

    upload.opco_code = Some("SOUTH".to_string());
    assert!(matches!(
        service.commit(&upload),
        Err(IntakeError::Partition(PartitionError::Invalid { .. }))
    ));
    assert!(service
        .repository()
        .batches_in_partition(&partition("MTM-MCD"))
        .expect("batches")
        .is_empty());
}

#[test]
fn oversized_uploads_are_rejected() {
    let (service, _audit) = build_service();
    let huge = "x".repeat(service.settings().max_upload_bytes + 1);
    assert!(matches!(
        service.preview(&request("big.csv", huge, "MTM-MCD")),
        Err(IntakeError::PayloadTooLarge { .. })
    ));
}

#[test]
fn manifest_cancellations_are_skipped_not_imported() {
    let (service, _audit) = build_service();
    let upload = request("manifest.csv", manifest_csv(), "MTM-MCD");

    let preview = service.preview(&upload).expect("preview");
    assert_eq!(preview.format, FormatKind::BrokerManifestCsv);
    assert_eq!(preview.valid_rows, 2);
    assert_eq!(preview.cancelled_rows, 1);
    assert_eq!(preview.funding_sources, vec!["Medicaid"]);
    let range = preview.service_date_range.expect("range");
    assert_eq!(range.from.to_string(), "2024-03-04");
    assert_eq!(range.to.to_string(), "2024-03-06");
    assert_eq!(
        preview.ignored_columns,
        vec!["Member Name", "DOB", "Pickup Address"]
    );

    let result = service.commit(&upload).expect("commit");
    assert_eq!(result.imported_rows, 2);
    assert_eq!(result.cancelled_rows, 1);
    assert!(result.is_complete);
    assert_eq!(result.los_counts.get("WC"), Some(&1));
    assert_eq!(result.los_counts.get("STR"), Some(&1));
}

#[test]
fn lost_ledger_entries_fail_the_batch() {
    let (service, _audit) = build_service_with(Arc::new(LossyAuditLog::losing(3)));
    let result = service
        .commit(&request("routelog.csv", ten_row_route_log(), "MTM-MCD"))
        .expect("commit returns a proof");

    assert!(!result.is_complete);
    assert_eq!(result.missing_rows, vec![3]);
    assert_eq!(result.accounted_rows, 9);
    assert_eq!(result.status, BatchStatus::Failed);

    let stored = service
        .repository()
        .batch(&result.import_id)
        .expect("lookup")
        .expect("batch");
    assert!(stored
        .failure_reason
        .as_deref()
        .is_some_and(|reason| reason.contains("1 missing")));
}

#[test]
fn ledger_write_failure_aborts_and_marks_the_batch() {
    let (service, _audit) = build_service_with(Arc::new(BrokenAuditLog));
    let err = service
        .commit(&request("manifest.csv", manifest_csv(), "MTM-MCD"))
        .expect_err("ledger down");
    assert!(matches!(err, IntakeError::Audit(_)));

    let batches = service
        .repository()
        .batches_in_partition(&partition("MTM-MCD"))
        .expect("batches");
    assert_eq!(batches[0].status, BatchStatus::Failed);
}

#[test]
fn audit_batch_recomputes_the_proof() {
    let (service, _audit) = build_service();
    let result = service
        .commit(&request("routelog.csv", ten_row_route_log(), "MTM-MCD"))
        .expect("commit");

    let audit = service.audit_batch(&result.import_id).expect("audit");
    assert!(audit.proof.is_complete);
    assert_eq!(audit.proof.imported_rows, 8);
    assert_eq!(audit.trip_count, 8);
    assert_eq!(audit.batch.total_rows, 10);
    assert_eq!(audit.batch.format, Some(FormatKind::RouteLogCsv));

    let unknown = crate::intake::domain::BatchId::generate();
    assert!(matches!(
        service.audit_batch(&unknown),
        Err(IntakeError::UnknownBatch(id)) if id == unknown
    ));
}

#[test]
fn catalog_lists_every_format_under_the_active_policy() {
    let (service, _audit) = build_service();
    let catalog = service.catalog();
    assert_eq!(catalog.policy_version, 1);
    assert_eq!(catalog.formats.len(), FormatKind::ALL.len());

    let route_log = catalog
        .formats
        .iter()
        .find(|descriptor| descriptor.format == FormatKind::RouteLogCsv)
        .expect("route log listed");
    assert_eq!(route_log.vendor_code, "routelog");
    assert!(route_log.known_columns.contains(&"Driver SSN"));
    assert!(!route_log.allowed_columns.contains(&"Driver SSN".to_string()));
}

#[test]
fn free_text_manifest_labels_never_reach_results_or_ledger() {
    let (service, audit) = build_service();
    let content = "TRIP MANIFEST\nTrip #: 1\nService Date: 2024-01-01\n\
Jane Roe DOB 01/02/1950 Ph 555-0100: see chart\n"
        .to_string();
    let upload = request("manifest.txt", content, "MTM-MCD");

    let preview = service.preview(&upload).expect("preview");
    assert_eq!(preview.valid_rows, 1);
    assert_eq!(preview.ignored_columns, vec!["unrecognized label"]);

    let result = service.commit(&upload).expect("commit");
    assert!(result.is_complete);
    assert_eq!(result.imported_rows, 1);

    let visible = [
        serde_json::to_string(&preview).expect("serialize preview"),
        serde_json::to_string(&result).expect("serialize result"),
        serde_json::to_string(&audit.entries_for(&result.import_id).expect("ledger"))
            .expect("serialize ledger"),
    ]
    .concat();
    for fragment in ["Jane", "Roe", "01/02/1950", "555-0100", "see chart"] {
        assert!(!visible.contains(fragment), "{fragment} leaked");
    }
}

#[test]
fn concurrent_overlapping_commits_import_each_trip_once() {
    fn route_log(ids: &[&str]) -> String {
        let rows: Vec<String> = ids
            .iter()
            .map(|id| {
                format!(
                    "{id},2024-03-04,AMB,D-17,Pat Driver,555-0101,Jane Roe,12 Elm St,Springfield,39.78,-89.65,Completed"
                )
            })
            .collect();
        format!("{ROUTE_LOG_HEADER}\n{}\n", rows.join("\n"))
    }

    let (service, _audit) = build_service();
    let uploads = [
        request("morning.csv", route_log(&["X1", "X2", "X3", "X4"]), "MTM-MCD"),
        request("evening.csv", route_log(&["X3", "X4", "X5", "X6"]), "MTM-MCD"),
    ];
    let start = std::sync::Barrier::new(uploads.len());

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = uploads
            .iter()
            .map(|upload| {
                let service = &service;
                let start = &start;
                scope.spawn(move || {
                    start.wait();
                    service.commit(upload).expect("commit")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("commit thread"))
            .collect()
    });

    let imported: usize = results.iter().map(|result| result.imported_rows).sum();
    let duplicate: usize = results.iter().map(|result| result.duplicate_rows).sum();
    assert_eq!(imported, 6);
    assert_eq!(duplicate, 2);
    assert!(results.iter().all(|result| result.is_complete));
    assert_eq!(service.repository().trip_count(), 6);
}
