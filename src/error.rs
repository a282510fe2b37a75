use thiserror::Error;

/// Failures surfaced by the voxelization host layer.
///
/// Construction failures tear the partially built session down before
/// returning; dispatch failures leave previously committed buffers and the
/// session itself usable for the next request.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no adapter name contains \"{filter}\"")]
    PlatformNotFound { filter: String },

    #[error("no GPU-class device matches \"{filter}\" and fallback is disabled")]
    DeviceNotFound { filter: String },

    #[error("device creation failed: {reason}")]
    ContextCreationFailed { reason: String },

    #[error("failed to read kernel source \"{path}\": {source}")]
    KernelSource {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("kernel build failed:\n{log}")]
    ProgramBuildFailed { log: String },

    #[error("device allocation of {bytes} bytes for {label} failed: {reason}")]
    AllocationFailed {
        label: &'static str,
        bytes: u64,
        reason: String,
    },

    #[error("kernel argument binding failed: {reason}")]
    KernelArgBindingFailed { reason: String },

    #[error("enqueue failed during {stage}: {reason}")]
    EnqueueFailed { stage: &'static str, reason: String },

    #[error("synchronization failed during {stage}: {reason}")]
    SyncFailed { stage: &'static str, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    pub(crate) fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }
}
