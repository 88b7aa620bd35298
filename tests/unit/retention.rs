//! Unit tests for backup retention selection

use crate::common::*;
use xtradb_operator::controller::backup_schedule::select_expired;
use xtradb_operator::crd::BackupState;

const JOB: &str = "cluster1-backup-nightly";

fn backups(states: &[BackupState]) -> Vec<xtradb_operator::crd::XtraDBClusterBackup> {
    states
        .iter()
        .enumerate()
        .map(|(day, state)| {
            scheduled_backup("cluster1", JOB, &format!("run-{}", day + 1), *state, day as i64)
        })
        .collect()
}

#[test]
fn test_within_retention_deletes_nothing() {
    let list = backups(&[BackupState::Succeeded; 3]);
    assert!(select_expired(&list, 3).is_empty());
}

#[test]
fn test_failed_records_do_not_pad_the_window() {
    // 5 succeeded interleaved with 2 failed, keep 3
    let list = backups(&[
        BackupState::Succeeded,
        BackupState::Failed,
        BackupState::Succeeded,
        BackupState::Succeeded,
        BackupState::Failed,
        BackupState::Succeeded,
        BackupState::Succeeded,
    ]);
    let mut expired = select_expired(&list, 3);
    expired.sort();
    assert_eq!(expired, vec!["run-1", "run-3"]);
}

#[test]
fn test_in_flight_backups_are_never_selected() {
    let list = backups(&[
        BackupState::Succeeded,
        BackupState::Running,
        BackupState::Starting,
        BackupState::New,
    ]);
    assert!(select_expired(&list, 1).is_empty());
}

#[test]
fn test_oldest_go_first() {
    let list = backups(&[BackupState::Succeeded; 4]);
    assert_eq!(select_expired(&list, 2), vec!["run-1", "run-2"]);
}

#[test]
fn test_listing_order_does_not_matter() {
    let mut list = backups(&[BackupState::Succeeded; 4]);
    list.reverse();
    assert_eq!(select_expired(&list, 2), vec!["run-1", "run-2"]);
}
