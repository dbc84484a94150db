//! One reconciliation pass over a whole manifest.
//!
//! Groups are reconciled sequentially in manifest order. A failing group is
//! recorded in the report and does not stop the others; nothing is retried
//! within a pass.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

use crate::config::Manifest;
use crate::reconciler::{ReconcileOutcome, VolumeGroupReconciler};

/// Result for a single volume group
#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ReconcileOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GroupReport {
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub pass_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub groups: Vec<GroupReport>,
}

impl PassReport {
    pub fn failed(&self) -> usize {
        self.groups.iter().filter(|g| g.is_failure()).count()
    }

    pub fn changed(&self) -> usize {
        self.groups
            .iter()
            .filter(|g| g.outcome.as_ref().is_some_and(ReconcileOutcome::is_mutation))
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

pub async fn run_pass(reconciler: &VolumeGroupReconciler, manifest: &Manifest) -> PassReport {
    let pass_id = Uuid::new_v4();
    let started_at = Utc::now();
    let mut groups = Vec::with_capacity(manifest.volume_groups.len());

    info!(pass_id = %pass_id, groups = manifest.volume_groups.len(), "Starting reconciliation pass");

    for desired in &manifest.volume_groups {
        let span = info_span!("reconcile", pass_id = %pass_id, group = %desired.name);
        let result = reconciler.reconcile(desired).instrument(span).await;

        let report = match result {
            Ok(outcome) => {
                info!(group = %desired.name, outcome = ?outcome, "Volume group reconciled");
                GroupReport {
                    name: desired.name.clone(),
                    outcome: Some(outcome),
                    error: None,
                }
            }
            Err(e) => {
                debug!(group = %desired.name, error = ?e, "Volume group reconciliation failed");
                reconciler.audit().reconcile_failed(&desired.name, &e.to_string());
                GroupReport {
                    name: desired.name.clone(),
                    outcome: None,
                    error: Some(e.to_string()),
                }
            }
        };
        groups.push(report);
    }

    let report = PassReport {
        pass_id,
        started_at,
        finished_at: Utc::now(),
        groups,
    };
    info!(
        pass_id = %pass_id,
        changed = report.changed(),
        failed = report.failed(),
        "Reconciliation pass finished"
    );
    report
}
