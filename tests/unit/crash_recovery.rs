//! Unit tests for crash log parsing and leader selection

use xtradb_operator::controller::crash_recovery::{
    RecoverySignature, has_crash_banner, parse_seqno, select_leader,
};
use xtradb_operator::controller::Error;

fn banner(seqno: &str) -> String {
    let border = "#".repeat(128);
    format!(
        "{border}\n\
         You have the situation of a full PXC cluster crash. In order to restore your PXC cluster, please check the log\n\
         from all pods/nodes to find the node with the most recent data (the one with the highest sequence number (seqno).\n\
         It is cluster1-pxc-0 node with sequence number (seqno): {seqno}\n\
         Cluster will recover automatically from the crash now.\n\
         If you have set spec.pxc.autoRecovery to false, run the following command to recover manually from this node:\n\
         {border}\n"
    )
}

fn sig(ordinal: i32, seqno: i64) -> RecoverySignature {
    RecoverySignature {
        pod: format!("cluster1-pxc-{}", ordinal),
        ordinal,
        seqno,
    }
}

#[test]
fn test_banner_detected() {
    assert!(has_crash_banner(&banner("1842")));
    assert!(!has_crash_banner("2024-05-01T10:00:00Z 0 [Note] WSREP: Synchronized with group\n"));
}

#[test]
fn test_truncated_banner_is_not_a_crash() {
    let log = banner("1842");
    let truncated = &log[..log.len() - 10];
    assert!(!has_crash_banner(truncated));
}

#[test]
fn test_parse_seqno() {
    assert_eq!(parse_seqno("cluster1-pxc-0", &banner("1842")).unwrap(), 1842);
    assert_eq!(parse_seqno("cluster1-pxc-0", &banner("-1")).unwrap(), -1);
}

#[test]
fn test_parse_seqno_reports_pod() {
    let err = parse_seqno("cluster1-pxc-2", "no numbers here").unwrap_err();
    match err {
        Error::CrashLogParseError { pod, .. } => assert_eq!(pod, "cluster1-pxc-2"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_highest_seqno_leads() {
    let signatures = [sig(0, 10), sig(1, 12), sig(2, 11)];
    assert_eq!(select_leader(&signatures).unwrap().pod, "cluster1-pxc-1");
}

#[test]
fn test_tie_goes_to_lowest_ordinal() {
    let signatures = [sig(2, 12), sig(1, 12), sig(0, 3)];
    assert_eq!(select_leader(&signatures).unwrap().ordinal, 1);
}

#[test]
fn test_no_signatures_no_leader() {
    assert!(select_leader(&[]).is_none());
}
