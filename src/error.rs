//! Error types for GPU object creation and asset loading.
//!
//! Every [`GpuError`] is treated as non-recoverable by the renderer: it is
//! propagated to the host, which decides between shutdown and restart.
//! Device loss is *not* an error here; it travels through
//! [`DeviceNotify`](crate::DeviceNotify).

use std::path::PathBuf;

/// Failure reported by a [`RenderDevice`](crate::RenderDevice) or
/// [`CommandContext`](crate::CommandContext).
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    /// The backend refused to create an object.
    #[error("failed to create {what}: {reason}")]
    Creation { what: &'static str, reason: String },

    /// Shader bytes could not be turned into a shader object.
    #[error("invalid shader bytecode: {0}")]
    InvalidShader(String),

    /// A draw was issued while a required binding was unset.
    #[error("draw issued without a bound {0}")]
    MissingBinding(&'static str),

    /// Upload larger than the destination buffer.
    #[error("buffer update of {len} bytes exceeds buffer size {size}")]
    BufferOverflow { len: u64, size: u64 },

    /// The device ran out of memory.
    #[error("out of GPU memory")]
    OutOfMemory,
}

impl GpuError {
    pub(crate) fn creation(what: &'static str, reason: impl ToString) -> Self {
        GpuError::Creation {
            what,
            reason: reason.to_string(),
        }
    }
}

/// Errors that can occur while loading shaders, meshes and textures.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    /// File could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The mesh data was invalid or corrupt.
    #[error("malformed mesh data at byte {offset}: {message}")]
    Parse { offset: usize, message: String },

    /// A texture referenced by a material could not be decoded.
    #[error("failed to decode texture {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// GPU object creation failed while loading.
    #[error(transparent)]
    Gpu(#[from] GpuError),

    /// A loader worker exited without reporting a result.
    #[error("asset worker for {0} disconnected before completing")]
    WorkerDisconnected(&'static str),
}

impl AssetError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AssetError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        AssetError::Parse {
            offset,
            message: message.into(),
        }
    }
}
