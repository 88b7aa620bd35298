//! Unit tests for status aggregation

use chrono::{Duration, Utc};
use xtradb_operator::controller::status::{
    ComponentObservation, MAX_CONDITIONS, PodObservation, StatusUpdate, evaluate_component,
    overall_state, record_condition,
};
use xtradb_operator::crd::{AppState, ClusterCondition, ComponentStatus, XtraDBClusterStatus};

fn pods(ready: &[bool]) -> Vec<PodObservation> {
    ready
        .iter()
        .enumerate()
        .map(|(i, ready)| PodObservation {
            name: format!("cluster1-pxc-{}", i),
            running: true,
            ready: *ready,
            ..Default::default()
        })
        .collect()
}

fn component(state: AppState) -> ComponentStatus {
    ComponentStatus {
        state,
        ..Default::default()
    }
}

fn observed(state: AppState, messages: Vec<String>) -> StatusUpdate {
    StatusUpdate::Observed {
        pxc: ComponentStatus {
            size: 3,
            ready: 3,
            state,
            message: String::new(),
        },
        haproxy: None,
        proxysql: None,
        state,
        host: "cluster1-pxc.default".to_string(),
        messages,
        observed_generation: Some(2),
    }
}

mod evaluate_tests {
    use super::*;

    #[test]
    fn test_all_ready_is_ready() {
        let obs = ComponentObservation {
            size: 3,
            pods: pods(&[true, true, true]),
            ..Default::default()
        };
        let status = evaluate_component(&obs, Utc::now());
        assert_eq!(status.state, AppState::Ready);
        assert_eq!(status.ready, 3);
        assert_eq!(status.size, 3);
    }

    #[test]
    fn test_partial_ready_is_initializing() {
        let obs = ComponentObservation {
            size: 3,
            pods: pods(&[true, false, true]),
            ..Default::default()
        };
        assert_eq!(evaluate_component(&obs, Utc::now()).state, AppState::Init);
    }

    #[test]
    fn test_pause_wins_over_ready_count() {
        // Paused while pods are still up means the tier is stopping
        let stopping = ComponentObservation {
            size: 3,
            paused: true,
            pods: pods(&[true, true, true]),
            ..Default::default()
        };
        assert_eq!(evaluate_component(&stopping, Utc::now()).state, AppState::Stopping);

        let paused = ComponentObservation {
            size: 3,
            paused: true,
            pods: pods(&[false, false, false]),
            ..Default::default()
        };
        assert_eq!(evaluate_component(&paused, Utc::now()).state, AppState::Paused);
    }

    #[test]
    fn test_waiting_messages_are_collected() {
        let mut observed = pods(&[true, false]);
        observed[1].waiting = vec!["pxc: back-off pulling image".to_string()];
        let obs = ComponentObservation {
            size: 2,
            pods: observed,
            ..Default::default()
        };
        let status = evaluate_component(&obs, Utc::now());
        assert_eq!(status.message, "pxc: back-off pulling image; ");
    }

    #[test]
    fn test_unschedulable_surfaces_only_after_grace() {
        let now = Utc::now();
        let mut observed = pods(&[true, false]);
        observed[1].unschedulable = Some((now - Duration::seconds(30), "0/3 nodes available".to_string()));
        let obs = ComponentObservation {
            size: 2,
            pods: observed.clone(),
            ..Default::default()
        };
        assert!(evaluate_component(&obs, now).message.is_empty());

        observed[1].unschedulable = Some((now - Duration::minutes(5), "0/3 nodes available".to_string()));
        let obs = ComponentObservation {
            size: 2,
            pods: observed,
            ..Default::default()
        };
        let status = evaluate_component(&obs, now);
        assert_eq!(status.message, "0/3 nodes available");
        // Surfacing the reason does not change the state
        assert_eq!(status.state, AppState::Init);
    }
}

mod overall_state_tests {
    use super::*;

    #[test]
    fn test_worst_component_wins() {
        let states = [
            component(AppState::Ready),
            component(AppState::Error),
            component(AppState::Init),
        ];
        assert_eq!(overall_state(states.iter(), false), AppState::Error);
    }

    #[test]
    fn test_upgrading_holds_ready_cluster_in_init() {
        let states = [component(AppState::Ready), component(AppState::Ready)];
        assert_eq!(overall_state(states.iter(), false), AppState::Ready);
        assert_eq!(overall_state(states.iter(), true), AppState::Init);
    }

    #[test]
    fn test_upgrading_never_masks_worse_state() {
        let states = [component(AppState::Stopping)];
        assert_eq!(overall_state(states.iter(), true), AppState::Stopping);
    }
}

mod condition_tests {
    use super::*;

    fn cond(type_: AppState) -> ClusterCondition {
        ClusterCondition {
            type_,
            status: "True".to_string(),
            reason: String::new(),
            message: String::new(),
            last_transition_time: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn test_same_type_is_not_repeated() {
        let mut conditions = Vec::new();
        record_condition(&mut conditions, cond(AppState::Init));
        record_condition(&mut conditions, cond(AppState::Init));
        record_condition(&mut conditions, cond(AppState::Ready));
        record_condition(&mut conditions, cond(AppState::Ready));
        assert_eq!(conditions.len(), 2);
    }

    #[test]
    fn test_history_is_capped_keeping_latest() {
        let mut conditions = Vec::new();
        for i in 0..(MAX_CONDITIONS * 2) {
            let state = if i % 2 == 0 { AppState::Init } else { AppState::Ready };
            record_condition(&mut conditions, cond(state));
        }
        assert_eq!(conditions.len(), MAX_CONDITIONS);
        assert_eq!(conditions.last().unwrap().type_, AppState::Ready);
    }
}

mod status_update_tests {
    use super::*;

    #[test]
    fn test_observed_update_replaces_messages() {
        let mut status = XtraDBClusterStatus {
            messages: vec!["PXC: stale".to_string()],
            ..Default::default()
        };
        assert!(observed(AppState::Ready, Vec::new()).apply(&mut status, Utc::now()));
        assert!(status.messages.is_empty());
        assert_eq!(status.state, AppState::Ready);
        assert_eq!(status.host.as_deref(), Some("cluster1-pxc.default"));
        assert_eq!(status.observed_generation, Some(2));
    }

    #[test]
    fn test_repeated_observation_needs_no_write() {
        let mut status = XtraDBClusterStatus::default();
        let now = Utc::now();
        let update = observed(AppState::Ready, Vec::new());
        assert!(update.apply(&mut status, now));
        assert!(!update.apply(&mut status, now));
    }

    #[test]
    fn test_failure_leaves_component_status_alone() {
        let mut status = XtraDBClusterStatus::default();
        observed(AppState::Ready, Vec::new()).apply(&mut status, Utc::now());
        let pxc_before = status.pxc.clone();

        let failed = StatusUpdate::Failed {
            message: "cannot parse crash log".to_string(),
        };
        assert!(failed.apply(&mut status, Utc::now()));
        assert_eq!(status.state, AppState::Error);
        assert_eq!(status.pxc, pxc_before);
        assert_eq!(status.messages, vec!["Error: cannot parse crash log"]);

        // Already in error: no second condition or message
        assert!(!failed.apply(&mut status, Utc::now()));
        assert_eq!(status.messages.len(), 1);
    }
}
