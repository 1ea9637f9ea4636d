// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VkError>;

#[derive(Debug, Error)]
pub enum VkError {
    #[error("Vulkan call failed: {0}")]
    Vulkan(vk::Result),

    #[error("failed to load the Vulkan loader: {0}")]
    Loading(#[from] ash::LoadingError),

    /// Reported with the call that observed the loss; never recovered.
    #[error("device lost during {during}")]
    DeviceLost { during: &'static str },

    #[error("no adapter meets the presentation and feature requirements")]
    NoSuitableAdapter,

    #[error("no memory type in filter {type_filter:#x} has {required:?}")]
    NoSuitableMemoryType {
        type_filter: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("validation requested but VK_LAYER_KHRONOS_validation is not installed")]
    MissingValidationLayer,

    #[error("window handle unavailable: {0}")]
    WindowHandle(String),

    #[error("surface format changed from {before:?} to {after:?} across swapchain recreation")]
    SwapchainFormatChanged { before: vk::Format, after: vk::Format },

    #[error("shader: {0}")]
    Shader(String),

    #[error("{needed} bytes do not fit a {capacity}-byte mapped buffer")]
    MappedOverflow { needed: usize, capacity: u64 },
}

impl From<vk::Result> for VkError {
    fn from(r: vk::Result) -> Self {
        match r {
            vk::Result::ERROR_DEVICE_LOST => VkError::DeviceLost {
                during: "unspecified call",
            },
            other => VkError::Vulkan(other),
        }
    }
}

/// Attach the failing call's name to a device loss.
pub(crate) trait VkResultExt<T> {
    fn during(self, op: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn during(self, op: &'static str) -> Result<T> {
        self.map_err(|r| match r {
            vk::Result::ERROR_DEVICE_LOST => {
                tracing::error!(op, "device lost");
                VkError::DeviceLost { during: op }
            }
            other => VkError::Vulkan(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_lost_names_the_call() {
        let r: std::result::Result<(), vk::Result> = Err(vk::Result::ERROR_DEVICE_LOST);
        let err = r.during("vkQueueSubmit").unwrap_err();
        assert!(matches!(err, VkError::DeviceLost { during: "vkQueueSubmit" }));
        assert_eq!(err.to_string(), "device lost during vkQueueSubmit");
    }

    #[test]
    fn other_codes_stay_vulkan_errors() {
        let err = VkError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(matches!(
            err,
            VkError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
        ));
        assert!(matches!(
            VkError::from(vk::Result::ERROR_DEVICE_LOST),
            VkError::DeviceLost { .. }
        ));
    }

    #[test]
    fn memory_error_message_is_descriptive() {
        let err = VkError::NoSuitableMemoryType {
            type_filter: 0b1010,
            required: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        };
        let msg = err.to_string();
        assert!(msg.contains("0xa"), "{msg}");
        assert!(msg.contains("DEVICE_LOCAL"), "{msg}");
    }
}
