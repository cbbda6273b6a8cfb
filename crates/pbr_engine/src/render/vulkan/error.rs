//! Vulkan error taxonomy
//!
//! Every fallible GPU operation returns [`VulkanResult`]. API failures carry the name of the
//! Vulkan entry point that failed together with its native result code so that fatal errors
//! reaching the entry point can be logged with both.

use ash::vk;
use thiserror::Error;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// A Vulkan call returned a failure code
    #[error("{operation} failed: {result:?}")]
    Api {
        /// Name of the failing Vulkan entry point
        operation: &'static str,
        /// Native result code
        result: vk::Result,
    },

    /// Loading the Vulkan library or building the instance failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No physical device satisfies the renderer's requirements
    #[error("No suitable GPU found: {0}")]
    NoSuitableDevice(String),

    /// A required instance or device extension is not available
    #[error("Required extension not available: {0}")]
    MissingExtension(String),

    /// A requested validation layer is not installed
    #[error("Required layer not available: {0}")]
    MissingLayer(String),

    /// No memory type matches the requested filter and property flags
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// Device memory allocation failed
    #[error("Out of memory: {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that were requested
        requested: u64,
    },

    /// A SPIR-V module could not be read
    #[error("Failed to load shader {path}: {source}")]
    ShaderLoad {
        /// Path of the shader binary
        path: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// An operation was attempted in a state that does not allow it
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },
}

impl VulkanError {
    /// Returns a closure mapping a raw `vk::Result` into [`VulkanError::Api`] for `operation`.
    ///
    /// ```
    /// # use pbr_engine::render::vulkan::VulkanError;
    /// # use ash::vk;
    /// let raw: Result<(), vk::Result> = Err(vk::Result::ERROR_DEVICE_LOST);
    /// let err = raw.map_err(VulkanError::api("vkQueueSubmit")).unwrap_err();
    /// assert_eq!(err.result(), Some(vk::Result::ERROR_DEVICE_LOST));
    /// ```
    pub fn api(operation: &'static str) -> impl Fn(vk::Result) -> Self {
        move |result| Self::Api { operation, result }
    }

    /// Shorthand for [`VulkanError::InvalidOperation`]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation { reason: reason.into() }
    }

    /// Native result code, if this error came from a Vulkan call
    pub const fn result(&self) -> Option<vk::Result> {
        match self {
            Self::Api { result, .. } => Some(*result),
            _ => None,
        }
    }

    /// Name of the failing operation, if known
    pub const fn operation(&self) -> Option<&'static str> {
        match self {
            Self::Api { operation, .. } => Some(operation),
            _ => None,
        }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_carries_operation_and_code() {
        let err = VulkanError::api("vkCreateFence")(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert_eq!(err.operation(), Some("vkCreateFence"));
        assert_eq!(err.result(), Some(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        let message = err.to_string();
        assert!(message.contains("vkCreateFence"));
        assert!(message.contains("ERROR_OUT_OF_HOST_MEMORY"));
    }

    #[test]
    fn test_non_api_errors_have_no_result() {
        assert_eq!(VulkanError::NoSuitableMemoryType.result(), None);
        assert_eq!(VulkanError::invalid("nope").operation(), None);
    }
}
