//! LVM audit events
//!
//! Every mutation of a volume group is recorded as a structured event under
//! the `mvirt_lvm::audit` target, so it can be routed separately from
//! diagnostic logs.

use tracing::{error, info};

/// Audit sink for volume group mutations
#[derive(Debug, Clone)]
pub struct LvmAuditLogger {
    enabled: bool,
}

impl LvmAuditLogger {
    pub fn new() -> Self {
        Self { enabled: true }
    }

    /// Create a noop audit logger (for testing)
    pub fn new_noop() -> Self {
        Self { enabled: false }
    }

    pub fn group_created(&self, group: &str, members: &[String], extent_size: Option<&str>) {
        if self.enabled {
            info!(target: "mvirt_lvm::audit", group = %group, members = ?members, extent_size = ?extent_size,
                "Volume group '{}' created", group);
        }
    }

    pub fn group_destroyed(&self, group: &str) {
        if self.enabled {
            info!(target: "mvirt_lvm::audit", group = %group, "Volume group '{}' removed", group);
        }
    }

    pub fn member_added(&self, group: &str, device: &str) {
        if self.enabled {
            info!(target: "mvirt_lvm::audit", group = %group, device = %device,
                "Physical volume {} added to '{}'", device, group);
        }
    }

    pub fn member_removed(&self, group: &str, device: &str) {
        if self.enabled {
            info!(target: "mvirt_lvm::audit", group = %group, device = %device,
                "Physical volume {} removed from '{}'", device, group);
        }
    }

    pub fn reconcile_failed(&self, group: &str, error: &str) {
        if self.enabled {
            error!(target: "mvirt_lvm::audit", group = %group, error = %error,
                "Reconciliation of '{}' failed", group);
        }
    }
}
