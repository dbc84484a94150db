//! mvirt-lvm: LVM volume group reconciler for mvirt
//!
//! Converges the membership of LVM volume groups to a declared manifest by
//! querying `vgs`/`pvs` and issuing the minimal vgcreate, vgremove, vgextend
//! and vgreduce calls.

pub mod audit;
pub mod command;
pub mod config;
pub mod error;
pub mod lister;
pub mod pass;
pub mod reconciler;
pub mod test_util;

pub use command::{CommandRunner, ExecError, LvmTool, SystemRunner, ToolPaths};
pub use error::LvmError;
pub use lister::{GroupLookup, StateLister, VolumeGroupRecord};
pub use reconciler::{
    DesiredState, Ensure, MembershipDiff, ReconcileOutcome, VolumeGroupReconciler,
};
