//! Volume group reconciler - compares the declared group with what LVM
//! reports and issues the vgcreate/vgremove/vgextend/vgreduce calls needed
//! to converge.
//!
//! Nothing is cached between passes; every decision is made from a fresh
//! `vgs`/`pvs` query.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::audit::LvmAuditLogger;
use crate::command::{CommandRunner, LvmTool};
use crate::error::{LvmError, Result};
use crate::lister::{StateLister, VolumeGroupRecord};

/// Whether the group should exist at all
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ensure {
    #[default]
    Present,
    Absent,
}

/// Declared target for one volume group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    pub name: String,
    /// Member devices; order carries no meaning
    #[serde(default)]
    pub physical_volumes: Vec<String>,
    /// Only manage membership at creation time
    #[serde(default, rename = "createonly")]
    pub create_only: bool,
    /// vgcreate `-s` value, e.g. "4M"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extent_size: Option<String>,
    #[serde(default)]
    pub ensure: Ensure,
}

impl DesiredState {
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        physical_volumes: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            physical_volumes: physical_volumes.into_iter().map(Into::into).collect(),
            create_only: false,
            extent_size: None,
            ensure: Ensure::Present,
        }
    }

    pub fn create_only(mut self, create_only: bool) -> Self {
        self.create_only = create_only;
        self
    }

    pub fn extent_size(mut self, extent_size: impl Into<String>) -> Self {
        self.extent_size = Some(extent_size.into());
        self
    }

    pub fn ensure(mut self, ensure: Ensure) -> Self {
        self.ensure = ensure;
        self
    }
}

/// Set difference between live and declared membership
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub to_add: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
}

impl MembershipDiff {
    pub fn compute(current: &[String], desired: &[String]) -> Self {
        let current: BTreeSet<&String> = current.iter().collect();
        let desired: BTreeSet<&String> = desired.iter().collect();

        Self {
            to_add: desired.difference(&current).map(|s| (*s).clone()).collect(),
            to_remove: current.difference(&desired).map(|s| (*s).clone()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Devices actually changed by [`VolumeGroupReconciler::apply_members`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MembershipChange {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl MembershipChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Observed state of a group relative to its declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupState {
    Absent,
    PresentMatching,
    PresentDivergent(MembershipDiff),
}

/// What a reconciliation pass did to one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Created { members: Vec<String> },
    Destroyed,
    Updated { added: Vec<String>, removed: Vec<String> },
    InSync,
}

impl ReconcileOutcome {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, ReconcileOutcome::InSync)
    }
}

/// vgcreate arguments: `<name> [<members>...] [-s <extent_size>]`
pub fn create_args(desired: &DesiredState) -> Vec<&str> {
    let mut args = vec![desired.name.as_str()];
    args.extend(desired.physical_volumes.iter().map(String::as_str));
    if let Some(extent_size) = &desired.extent_size {
        args.push("-s");
        args.push(extent_size);
    }
    args
}

/// Reconciles LVM volume groups against [`DesiredState`]
pub struct VolumeGroupReconciler {
    runner: Arc<dyn CommandRunner>,
    lister: StateLister,
    audit: LvmAuditLogger,
}

impl VolumeGroupReconciler {
    pub fn new(runner: Arc<dyn CommandRunner>, audit: LvmAuditLogger) -> Self {
        Self {
            lister: StateLister::new(Arc::clone(&runner)),
            runner,
            audit,
        }
    }

    pub fn lister(&self) -> &StateLister {
        &self.lister
    }

    pub fn audit(&self) -> &LvmAuditLogger {
        &self.audit
    }

    /// Every volume group currently on the host
    pub async fn instances(&self) -> Result<Vec<VolumeGroupRecord>> {
        Ok(self.lister.list_groups().await?)
    }

    pub async fn exists(&self, desired: &DesiredState) -> bool {
        self.lister.group_exists(&desired.name).await
    }

    pub async fn create(&self, desired: &DesiredState) -> Result<()> {
        info!(
            group = %desired.name,
            members = ?desired.physical_volumes,
            extent_size = ?desired.extent_size,
            "Creating volume group"
        );

        self.runner
            .run(LvmTool::VgCreate, &create_args(desired))
            .await?;

        self.audit.group_created(
            &desired.name,
            &desired.physical_volumes,
            desired.extent_size.as_deref(),
        );
        Ok(())
    }

    pub async fn destroy(&self, desired: &DesiredState) -> Result<()> {
        info!(group = %desired.name, "Removing volume group");

        self.runner
            .run(LvmTool::VgRemove, &[desired.name.as_str()])
            .await?;

        self.audit.group_destroyed(&desired.name);
        Ok(())
    }

    /// Current members as the framework should see them.
    ///
    /// A create-only group that already exists reports its declared members,
    /// so membership drift is never detected for it.
    pub async fn read_members(&self, desired: &DesiredState) -> Result<Vec<String>> {
        if !desired.create_only || !self.exists(desired).await {
            return Ok(self.lister.members_of(&desired.name).await?);
        }

        debug!(group = %desired.name, "createonly group exists, reporting declared members");
        Ok(desired.physical_volumes.clone())
    }

    /// Converge membership to `new_members`: all removals first, then all additions.
    pub async fn apply_members(
        &self,
        desired: &DesiredState,
        new_members: &[String],
    ) -> Result<MembershipChange> {
        if desired.create_only {
            return Ok(MembershipChange::default());
        }

        let existing = self.read_members(desired).await?;
        let diff = MembershipDiff::compute(&existing, new_members);
        let mut change = MembershipChange::default();

        for device in diff.to_remove {
            self.reduce_with(&desired.name, &device).await?;
            change.removed.push(device);
        }

        for device in diff.to_add {
            self.extend_with(&desired.name, &device).await?;
            change.added.push(device);
        }

        Ok(change)
    }

    async fn reduce_with(&self, group: &str, device: &str) -> Result<()> {
        info!(group = %group, device = %device, "Removing physical volume from volume group");

        self.runner
            .run(LvmTool::VgReduce, &[group, device])
            .await
            .map_err(|source| LvmError::Reduce {
                group: group.to_string(),
                device: device.to_string(),
                source,
            })?;

        self.audit.member_removed(group, device);
        Ok(())
    }

    async fn extend_with(&self, group: &str, device: &str) -> Result<()> {
        info!(group = %group, device = %device, "Adding physical volume to volume group");

        self.runner
            .run(LvmTool::VgExtend, &[group, device])
            .await
            .map_err(|source| LvmError::Extend {
                group: group.to_string(),
                device: device.to_string(),
                source,
            })?;

        self.audit.member_added(group, device);
        Ok(())
    }

    pub async fn observe(&self, desired: &DesiredState) -> Result<GroupState> {
        if !self.exists(desired).await {
            return Ok(GroupState::Absent);
        }

        let current = self.read_members(desired).await?;
        let diff = MembershipDiff::compute(&current, &desired.physical_volumes);
        if diff.is_empty() {
            Ok(GroupState::PresentMatching)
        } else {
            Ok(GroupState::PresentDivergent(diff))
        }
    }

    /// Run one full pass for a single group.
    pub async fn reconcile(&self, desired: &DesiredState) -> Result<ReconcileOutcome> {
        let state = self.observe(desired).await?;
        debug!(group = %desired.name, state = ?state, ensure = ?desired.ensure, "Observed volume group");

        match (desired.ensure, state) {
            (Ensure::Present, GroupState::Absent) => {
                self.create(desired).await?;
                Ok(ReconcileOutcome::Created {
                    members: desired.physical_volumes.clone(),
                })
            }
            (Ensure::Present, GroupState::PresentMatching) => Ok(ReconcileOutcome::InSync),
            (Ensure::Present, GroupState::PresentDivergent(_)) => {
                let change = self
                    .apply_members(desired, &desired.physical_volumes)
                    .await?;
                if change.is_empty() {
                    return Ok(ReconcileOutcome::InSync);
                }
                Ok(ReconcileOutcome::Updated {
                    added: change.added,
                    removed: change.removed,
                })
            }
            (Ensure::Absent, GroupState::Absent) => Ok(ReconcileOutcome::InSync),
            (Ensure::Absent, _) => {
                self.destroy(desired).await?;
                Ok(ReconcileOutcome::Destroyed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_diff_set_differences() {
        let current = strings(&["/dev/sdb1", "/dev/sdc1", "/dev/sdd1"]);
        let desired = strings(&["/dev/sdc1", "/dev/sde1"]);

        let diff = MembershipDiff::compute(&current, &desired);
        assert_eq!(diff.to_add, set(&["/dev/sde1"]));
        assert_eq!(diff.to_remove, set(&["/dev/sdb1", "/dev/sdd1"]));
        assert!(diff.to_add.is_disjoint(&diff.to_remove));
        assert!(!diff.is_empty());
    }

    #[test]
    fn test_diff_ignores_order_and_duplicates() {
        let current = strings(&["/dev/sdb1", "/dev/sdc1"]);
        let desired = strings(&["/dev/sdc1", "/dev/sdb1", "/dev/sdc1"]);
        assert!(MembershipDiff::compute(&current, &desired).is_empty());
        assert!(MembershipDiff::compute(&[], &[]).is_empty());
    }

    #[test]
    fn test_diff_from_empty() {
        let diff = MembershipDiff::compute(&[], &strings(&["/dev/sdb1"]));
        assert_eq!(diff.to_add, set(&["/dev/sdb1"]));
        assert!(diff.to_remove.is_empty());

        let diff = MembershipDiff::compute(&strings(&["/dev/sdb1"]), &[]);
        assert!(diff.to_add.is_empty());
        assert_eq!(diff.to_remove, set(&["/dev/sdb1"]));
    }

    #[test]
    fn test_create_args() {
        let desired = DesiredState::new("data", ["/dev/sdb1"]);
        assert_eq!(create_args(&desired), vec!["data", "/dev/sdb1"]);

        let desired = DesiredState::new("data", ["/dev/sdb1", "/dev/sdc1"]).extent_size("4M");
        assert_eq!(
            create_args(&desired),
            vec!["data", "/dev/sdb1", "/dev/sdc1", "-s", "4M"]
        );
    }

    #[test]
    fn test_create_args_empty_group() {
        let desired = DesiredState::new("empty", Vec::<String>::new());
        assert_eq!(create_args(&desired), vec!["empty"]);

        let desired = desired.extent_size("32M");
        assert_eq!(create_args(&desired), vec!["empty", "-s", "32M"]);
    }

    #[test]
    fn test_desired_state_defaults() {
        let desired: DesiredState =
            serde_json::from_str(r#"{"name": "data", "physical_volumes": ["/dev/sdb1"]}"#).unwrap();
        assert!(!desired.create_only);
        assert_eq!(desired.ensure, Ensure::Present);
        assert_eq!(desired.extent_size, None);

        let desired: DesiredState = serde_json::from_str(
            r#"{"name": "data", "createonly": true, "extent_size": "4M", "ensure": "absent"}"#,
        )
        .unwrap();
        assert!(desired.create_only);
        assert!(desired.physical_volumes.is_empty());
        assert_eq!(desired.extent_size.as_deref(), Some("4M"));
        assert_eq!(desired.ensure, Ensure::Absent);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = ReconcileOutcome::Updated {
            added: strings(&["/dev/sdc1"]),
            removed: vec![],
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["action"], "updated");
        assert_eq!(json["added"][0], "/dev/sdc1");

        let json = serde_json::to_value(ReconcileOutcome::InSync).unwrap();
        assert_eq!(json["action"], "in_sync");
        assert!(!ReconcileOutcome::InSync.is_mutation());
    }
}
