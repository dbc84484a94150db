//! Reconciler error types.

use thiserror::Error;

use crate::command::ExecError;

/// Errors surfaced to the caller of a reconciliation operation.
#[derive(Debug, Error)]
pub enum LvmError {
    /// create, destroy or a listing failed; the tool error is passed through.
    #[error(transparent)]
    Command(#[from] ExecError),

    /// vgreduce failed, usually because extents are still allocated on the device.
    #[error(
        "Could not remove physical volume {device} from volume group '{group}'; this physical volume may \
         be in use and may require a manual data migration (using pvmove) before it can be removed ({source})"
    )]
    Reduce {
        group: String,
        device: String,
        #[source]
        source: ExecError,
    },

    /// vgextend failed.
    #[error("Could not extend volume group '{group}' with physical volume {device} ({source})")]
    Extend {
        group: String,
        device: String,
        #[source]
        source: ExecError,
    },
}

/// Result type for reconciler operations.
pub type Result<T> = std::result::Result<T, LvmError>;
