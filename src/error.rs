use thiserror::Error;

pub type Result<T> = std::result::Result<T, MeshSplatError>;

#[derive(Debug, Error)]
pub enum MeshSplatError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("capacity exceeded: requested {requested}, ceiling {ceiling}")]
    CapacityExceeded { requested: usize, ceiling: usize },

    #[error("shader compile failed at {stage}: {message}")]
    ShaderCompile {
        stage: &'static str,
        message: String,
    },

    #[error("GPU command buffer failed at {stage}")]
    CommandBufferFailed { stage: &'static str },

    #[error("GPU command timeout at {stage} after {timeout_ms}ms")]
    Timeout {
        stage: &'static str,
        timeout_ms: u64,
    },

    #[error("GPU backend is disabled for this session")]
    GpuDisabled,

    #[error("PLY error: {0}")]
    Ply(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl MeshSplatError {
    pub fn should_disable_gpu(&self) -> bool {
        matches!(
            self,
            Self::GpuDisabled | Self::Timeout { .. } | Self::CommandBufferFailed { .. }
        )
    }
}

impl From<&str> for MeshSplatError {
    fn from(value: &str) -> Self {
        Self::Other(value.to_string())
    }
}

impl From<String> for MeshSplatError {
    fn from(value: String) -> Self {
        Self::Other(value)
    }
}

impl From<std::num::TryFromIntError> for MeshSplatError {
    fn from(err: std::num::TryFromIntError) -> Self {
        Self::Other(err.to_string())
    }
}
