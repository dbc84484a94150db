//! Current-state discovery
//!
//! Queries `vgs` and `pvs` and turns their tabular output into records.
//! Parsing is best-effort: lines that do not parse are skipped.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::command::{CommandRunner, ExecError, LvmTool};

/// Field separator requested from `pvs`
pub const MEMBERSHIP_SEPARATOR: char = ',';

/// A volume group as observed in one listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeGroupRecord {
    pub name: String,
    pub exists: bool,
}

/// One `pvs` row: a physical volume and the group owning it (empty if none)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MembershipEntry {
    pub device: String,
    pub group: String,
}

/// Result of a scoped `vgs <name>` query
#[derive(Debug)]
pub enum GroupLookup {
    Found(VolumeGroupRecord),
    NotFound,
    ExecutionError(ExecError),
}

/// Parse `vgs` output.
///
/// The first line is the column header (`VG #PV #LV #SN Attr VSize VFree`);
/// the group name is the first whitespace-separated token of every other line.
pub fn parse_groups(output: &str) -> Vec<VolumeGroupRecord> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(|name| VolumeGroupRecord {
            name: name.to_string(),
            exists: true,
        })
        .collect()
}

/// Parse `pvs -o pv_name,vg_name --separator ,` output.
pub fn parse_membership(output: &str) -> Vec<MembershipEntry> {
    output
        .lines()
        .filter_map(|line| line.split_once(MEMBERSHIP_SEPARATOR))
        .map(|(device, group)| (device.trim(), group.trim()))
        .filter(|(device, group)| !device.is_empty() && !(*device == "PV" && *group == "VG"))
        .map(|(device, group)| MembershipEntry {
            device: device.to_string(),
            group: group.to_string(),
        })
        .collect()
}

/// Reads volume group state through a [`CommandRunner`]
#[derive(Clone)]
pub struct StateLister {
    runner: Arc<dyn CommandRunner>,
}

impl StateLister {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// All volume groups on the host
    pub async fn list_groups(&self) -> Result<Vec<VolumeGroupRecord>, ExecError> {
        let output = self.runner.run(LvmTool::Vgs, &[]).await?;
        let groups = parse_groups(&output);
        debug!(count = groups.len(), "Listed volume groups");
        Ok(groups)
    }

    /// Every physical volume with its owning group
    pub async fn list_membership(&self) -> Result<Vec<MembershipEntry>, ExecError> {
        let separator = MEMBERSHIP_SEPARATOR.to_string();
        let output = self
            .runner
            .run(
                LvmTool::Pvs,
                &["-o", "pv_name,vg_name", "--separator", &separator],
            )
            .await?;
        Ok(parse_membership(&output))
    }

    /// Devices currently belonging to `group`, in listing order
    pub async fn members_of(&self, group: &str) -> Result<Vec<String>, ExecError> {
        let members: Vec<String> = self
            .list_membership()
            .await?
            .into_iter()
            .filter(|entry| entry.group == group)
            .map(|entry| entry.device)
            .collect();
        debug!(group = %group, members = ?members, "Read live membership");
        Ok(members)
    }

    /// Scoped `vgs <name>` query. A successful exit is the only presence
    /// signal; the output may or may not carry a header line.
    pub async fn lookup_group(&self, name: &str) -> GroupLookup {
        match self.runner.run(LvmTool::Vgs, &[name]).await {
            Ok(_) => GroupLookup::Found(VolumeGroupRecord {
                name: name.to_string(),
                exists: true,
            }),
            Err(e) if e.message().contains("not found") => GroupLookup::NotFound,
            Err(e) => GroupLookup::ExecutionError(e),
        }
    }

    /// Existence check. Both `NotFound` and a failed scoped query mean "absent".
    pub async fn group_exists(&self, name: &str) -> bool {
        match self.lookup_group(name).await {
            GroupLookup::Found(_) => true,
            GroupLookup::NotFound => false,
            GroupLookup::ExecutionError(e) => {
                warn!(group = %name, error = %e, "Volume group query failed, treating as absent");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::FakeLvm;

    #[test]
    fn test_parse_groups_single() {
        let output = "VG #PV #LV #SN Attr VSize VFree\n  vg01   1   2   0 wz--n- 10g 2g\n";
        let groups = parse_groups(output);
        assert_eq!(
            groups,
            vec![VolumeGroupRecord {
                name: "vg01".to_string(),
                exists: true
            }]
        );
    }

    #[test]
    fn test_parse_groups_skips_blank_lines() {
        let output = "  VG     #PV #LV #SN Attr   VSize  VFree\n  data     2   1   0 wz--n- 20.00g 5.00g\n\n   \n  backup   1   0   0 wz--n- 10.00g 10.00g\n";
        let names: Vec<_> = parse_groups(output).into_iter().map(|g| g.name).collect();
        assert_eq!(names, vec!["data", "backup"]);
    }

    #[test]
    fn test_parse_groups_header_only() {
        assert!(parse_groups("  VG #PV #LV #SN Attr VSize VFree\n").is_empty());
        assert!(parse_groups("").is_empty());
    }

    #[test]
    fn test_parse_membership() {
        let output = "  PV,VG\n  /dev/sdb1,data\n  /dev/sdc1,data\n  /dev/sdd1,\ngarbage\n  /dev/sde1,backup\n";
        let entries = parse_membership(output);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].device, "/dev/sdb1");
        assert_eq!(entries[0].group, "data");
        assert_eq!(entries[2].device, "/dev/sdd1");
        assert_eq!(entries[2].group, "");
        assert_eq!(entries[3].group, "backup");
    }

    #[tokio::test]
    async fn test_members_of_filters_by_group() {
        let lvm = FakeLvm::new()
            .with_group("data", &["/dev/sdb1", "/dev/sdc1"])
            .with_group("backup", &["/dev/sdd1"])
            .with_free_device("/dev/sde1");
        let lister = StateLister::new(Arc::new(lvm));

        assert_eq!(
            lister.members_of("data").await.unwrap(),
            vec!["/dev/sdb1", "/dev/sdc1"]
        );
        assert_eq!(lister.members_of("backup").await.unwrap(), vec!["/dev/sdd1"]);
        assert!(lister.members_of("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_group() {
        let lvm = Arc::new(FakeLvm::new().with_group("data", &["/dev/sdb1"]));
        let lister = StateLister::new(lvm.clone());

        assert!(matches!(
            lister.lookup_group("data").await,
            GroupLookup::Found(r) if r.name == "data"
        ));
        assert!(matches!(
            lister.lookup_group("nope").await,
            GroupLookup::NotFound
        ));

        lvm.fail_next(LvmTool::Vgs, "  /run/lock/lvm/V_data: open failed: Permission denied");
        assert!(matches!(
            lister.lookup_group("data").await,
            GroupLookup::ExecutionError(_)
        ));
    }

    /// Answers every command with the same result.
    struct StaticRunner(std::result::Result<&'static str, &'static str>);

    #[async_trait::async_trait]
    impl CommandRunner for StaticRunner {
        async fn run(&self, tool: LvmTool, _args: &[&str]) -> crate::command::ExecResult {
            match self.0 {
                Ok(output) => Ok(output.to_string()),
                Err(message) => Err(ExecError::Failed {
                    tool,
                    code: Some(5),
                    message: message.to_string(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_group_exists_headerless_line() {
        // lvm.conf report/headings=0
        let lister = StateLister::new(Arc::new(StaticRunner(Ok(
            "  data   1   0   0 wz--n- 10.00g 10.00g\n",
        ))));
        assert!(lister.group_exists("data").await);
        assert!(matches!(
            lister.lookup_group("data").await,
            GroupLookup::Found(r) if r.name == "data"
        ));
    }

    #[tokio::test]
    async fn test_group_exists_on_empty_success() {
        let lister = StateLister::new(Arc::new(StaticRunner(Ok(""))));
        assert!(lister.group_exists("data").await);
    }

    #[tokio::test]
    async fn test_group_exists_on_failure() {
        let lister = StateLister::new(Arc::new(StaticRunner(Err(
            "Volume group \"data\" not found",
        ))));
        assert!(matches!(
            lister.lookup_group("data").await,
            GroupLookup::NotFound
        ));
        assert!(!lister.group_exists("data").await);
    }

    #[tokio::test]
    async fn test_group_exists_folds_failures() {
        let lvm = Arc::new(FakeLvm::new().with_group("data", &[]));
        let lister = StateLister::new(lvm.clone());

        assert!(lister.group_exists("data").await);
        assert!(!lister.group_exists("other").await);

        lvm.fail_next(LvmTool::Vgs, "Permission denied");
        assert!(!lister.group_exists("data").await);
    }
}
