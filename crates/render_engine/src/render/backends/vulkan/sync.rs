//! Synchronization primitives for GPU/CPU coordination
//!
//! Two mechanisms cover the whole frame pipeline:
//!
//! ```text
//! GPU-GPU (semaphores):  acquire -> signal image_available ->
//!                        submit waits it, signals render_finished ->
//!                        present waits render_finished
//!
//! CPU-GPU (fences):      submit signals in_flight ->
//!                        next use of this frame slot waits on it
//! ```
//!
//! Submission order on one queue fixes execution order on that queue;
//! cross-queue ordering (graphics vs. present) exists only through these
//! semaphores. Each in-flight frame owns an independent set so CPU recording
//! of frame N+1 never waits on GPU completion of frame N.

use ash::{vk, Device};

use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// GPU-GPU synchronization primitive with automatic resource management
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe {
            device
                .create_semaphore(&create_info, None)
                .map_err(|e| VulkanError::resource("semaphore", e))?
        };

        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence, optionally in the signaled state
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe {
            device
                .create_fence(&create_info, None)
                .map_err(|e| VulkanError::resource("fence", e))?
        };

        Ok(Self { device, fence })
    }

    /// Block until the fence signals
    pub fn wait(&self, timeout: u64) -> VulkanResult<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.fence], true, timeout)
                .map_err(VulkanError::from)
        }
    }

    /// Reset to unsignaled
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_fences(&[self.fence])
                .map_err(VulkanError::from)
        }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Per-frame synchronization slot for in-flight frame management
///
/// The render-finished semaphore lives per swapchain image instead (image
/// count and frame count can differ), so this pairs only the acquire
/// semaphore with the frame fence. The fence starts signaled so the first
/// wait on each slot passes.
pub struct FrameSync {
    /// Signaled when the acquired swapchain image becomes available
    pub image_available: Semaphore,
    /// Signaled when this frame slot's submission completes
    pub in_flight: Fence,
}

impl FrameSync {
    /// Create frame synchronization objects
    pub fn new(device: Device) -> VulkanResult<Self> {
        let image_available = Semaphore::new(device.clone())?;
        let in_flight = Fence::new(device, true)?;

        Ok(Self {
            image_available,
            in_flight,
        })
    }
}
