//! Shared helpers for mvirt-lvm integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use mvirt_lvm::LvmTool;
use mvirt_lvm::audit::LvmAuditLogger;
use mvirt_lvm::reconciler::VolumeGroupReconciler;
use mvirt_lvm::test_util::{FakeLvm, Invocation};

/// Reconciler wired to a simulated LVM host.
pub fn reconciler(lvm: &Arc<FakeLvm>) -> VolumeGroupReconciler {
    VolumeGroupReconciler::new(lvm.clone(), LvmAuditLogger::new_noop())
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Invocations of a single tool, as argument lists.
pub fn calls_to(lvm: &FakeLvm, tool: LvmTool) -> Vec<Vec<String>> {
    lvm.calls()
        .into_iter()
        .filter(|inv: &Invocation| inv.tool == tool)
        .map(|inv| inv.args)
        .collect()
}

/// Members of a group, sorted for set comparison.
pub fn sorted_members(lvm: &FakeLvm, group: &str) -> Vec<String> {
    let mut members = lvm.members(group).unwrap_or_default();
    members.sort();
    members
}
