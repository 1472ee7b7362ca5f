use std::time::Duration;

use super::quantity::QuantityError;

#[derive(thiserror::Error, Debug)]
pub enum ScalingError {
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    #[error("Volume {volume} is not expandable: {reason}")]
    NotExpandable { volume: String, reason: String },

    #[error("Volume {0} was modified concurrently, resize deferred to next poll")]
    Conflict(String),

    #[error("Volume {0} not found")]
    VolumeNotFound(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Quantity error: {0}")]
    Quantity(#[from] QuantityError),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl ScalingError {
    /// Short CamelCase reason recorded in status conditions and volume observations.
    pub fn reason(&self) -> &'static str {
        match self {
            ScalingError::InvalidTarget(_) => "InvalidTarget",
            ScalingError::InvalidSpec(_) | ScalingError::Quantity(_) => "InvalidSpec",
            ScalingError::NotExpandable { .. } => "NotExpandable",
            ScalingError::Conflict(_) => "Conflict",
            ScalingError::VolumeNotFound(_) => "VolumeNotFound",
            ScalingError::Kube(_) => "ResizeFailed",
            ScalingError::Timeout(_) => "Timeout",
        }
    }

    /// Configuration errors are terminal for the cycle; everything else is
    /// scoped to a single volume or a single platform call.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ScalingError::InvalidTarget(_)
                | ScalingError::InvalidSpec(_)
                | ScalingError::Quantity(_)
        )
    }
}
