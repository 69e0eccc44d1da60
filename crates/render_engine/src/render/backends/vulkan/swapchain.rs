//! Swapchain management
//!
//! The swapchain lifecycle is a small state machine:
//!
//! ```text
//! Uninitialized -> Created -> NeedsRebuild -> Created -> ... -> Destroyed
//! ```
//!
//! Resize, vsync changes, and OutOfDate/Suboptimal presentation results move
//! it to NeedsRebuild. A rebuild is all-or-nothing: on any failure the state
//! drops back to Uninitialized and the frame driver must not draw.
//!
//! Surface-parameter selection is a pure planning step so rebuild decisions
//! are deterministic and testable without a device.

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device};

use crate::render::backends::vulkan::context::{PhysicalDeviceInfo, VulkanContext};
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Lifecycle state of the presentable surface chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    /// No usable swapchain; drawing must be skipped
    Uninitialized,
    /// Swapchain and per-image resources are consistent
    Created,
    /// A rebuild is required before the next frame may draw
    NeedsRebuild,
    /// Torn down for good
    Destroyed,
}

/// What the surface currently supports
#[derive(Debug, Clone)]
pub struct SurfaceParams {
    /// Surface capabilities (image counts, extents, transform)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceParams {
    /// Query the surface's current parameters
    pub fn query(
        surface_loader: &Surface,
        physical_device: &PhysicalDeviceInfo,
        surface: vk::SurfaceKHR,
    ) -> VulkanResult<Self> {
        let capabilities = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(physical_device.device, surface)
                .map_err(VulkanError::from)?
        };
        let formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(physical_device.device, surface)
                .map_err(VulkanError::from)?
        };
        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(physical_device.device, surface)
                .map_err(VulkanError::from)?
        };

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }
}

/// Everything a swapchain (re)build needs, chosen deterministically
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainPlan {
    /// Chosen surface format
    pub format: vk::Format,
    /// Chosen color space
    pub color_space: vk::ColorSpaceKHR,
    /// Chosen present mode
    pub present_mode: vk::PresentModeKHR,
    /// Chosen image extent
    pub extent: vk::Extent2D,
    /// Minimum image count to request
    pub image_count: u32,
    /// Surface pre-transform to apply
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// Choose format, present mode, extent and image count from what the surface
/// supports.
///
/// - Format: B8G8R8A8_SRGB with sRGB nonlinear color space when available,
///   otherwise the first reported format.
/// - Present mode: FIFO when vsync is on (always available); otherwise
///   MAILBOX, falling back to IMMEDIATE, falling back to FIFO.
/// - Extent: the surface's current extent unless it reports "undefined"
///   (u32::MAX), in which case the window size clamped to the supported
///   range.
/// - Image count: min + 1, clamped to the max when the surface reports one.
pub fn plan_swapchain(
    params: &SurfaceParams,
    window_extent: vk::Extent2D,
    vsync: bool,
) -> VulkanResult<SwapchainPlan> {
    if params.formats.is_empty() {
        return Err(VulkanError::InitializationFailed(
            "surface reports no formats".to_string(),
        ));
    }

    let format = params
        .formats
        .iter()
        .find(|sf| {
            sf.format == vk::Format::B8G8R8A8_SRGB
                && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .copied()
        .unwrap_or(params.formats[0]);

    let present_mode = if vsync {
        vk::PresentModeKHR::FIFO
    } else if params.present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else if params.present_modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
        vk::PresentModeKHR::IMMEDIATE
    } else {
        vk::PresentModeKHR::FIFO
    };

    let caps = &params.capabilities;
    let extent = if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: window_extent
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: window_extent
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    };

    let mut image_count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        image_count = image_count.min(caps.max_image_count);
    }

    Ok(SwapchainPlan {
        format: format.format,
        color_space: format.color_space,
        present_mode,
        extent,
        image_count,
        pre_transform: caps.current_transform,
    })
}

/// Swapchain wrapper owning the handle, its images and their views
pub struct Swapchain {
    device: Device,
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain from a plan.
    ///
    /// Pass the previous swapchain handle on rebuild so the driver can reuse
    /// resources; pass null on first creation. The old swapchain must stay
    /// alive until this call returns.
    pub fn new(
        context: &VulkanContext,
        plan: &SwapchainPlan,
        old_swapchain: vk::SwapchainKHR,
    ) -> VulkanResult<Self> {
        let device = context.raw_device();
        let loader = context.swapchain_loader().clone();

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(context.surface())
            .min_image_count(plan.image_count)
            .image_format(plan.format)
            .image_color_space(plan.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe {
            loader
                .create_swapchain(&create_info, None)
                .map_err(|e| VulkanError::resource("swapchain", e))?
        };

        let images = match unsafe { loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(VulkanError::from(e));
            }
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(plan.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            match unsafe { device.create_image_view(&view_info, None) } {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    unsafe {
                        for view in image_views {
                            device.destroy_image_view(view, None);
                        }
                        loader.destroy_swapchain(swapchain, None);
                    }
                    return Err(VulkanError::resource("swapchain image view", e));
                }
            }
        }

        log::info!(
            "Swapchain created: {} images, {:?}, {}x{}, {:?}",
            images.len(),
            plan.format,
            plan.extent.width,
            plan.extent.height,
            plan.present_mode
        );

        Ok(Self {
            device,
            loader,
            swapchain,
            images,
            image_views,
            format: vk::SurfaceFormatKHR {
                format: plan.format,
                color_space: plan.color_space,
            },
            extent: plan.extent,
        })
    }

    /// Get swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Get surface format
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Per-image views (one per swapchain image, always the same count)
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Number of swapchain images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Get swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &image_view in &self.image_views {
                self.device.destroy_image_view(image_view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(
        current: vk::Extent2D,
        min: vk::Extent2D,
        max: vk::Extent2D,
        min_count: u32,
        max_count: u32,
        modes: &[vk::PresentModeKHR],
    ) -> SurfaceParams {
        SurfaceParams {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: min_count,
                max_image_count: max_count,
                current_extent: current,
                min_image_extent: min,
                max_image_extent: max,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::R8G8B8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: modes.to_vec(),
        }
    }

    const EXTENT_800_600: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    #[test]
    fn prefers_bgra_srgb_format() {
        let p = params(
            EXTENT_800_600,
            EXTENT_800_600,
            EXTENT_800_600,
            2,
            0,
            &[vk::PresentModeKHR::FIFO],
        );
        let plan = plan_swapchain(&p, EXTENT_800_600, true).unwrap();
        assert_eq!(plan.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn vsync_forces_fifo() {
        let p = params(
            EXTENT_800_600,
            EXTENT_800_600,
            EXTENT_800_600,
            2,
            0,
            &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
        );
        let plan = plan_swapchain(&p, EXTENT_800_600, true).unwrap();
        assert_eq!(plan.present_mode, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn no_vsync_prefers_mailbox_then_immediate() {
        let p = params(
            EXTENT_800_600,
            EXTENT_800_600,
            EXTENT_800_600,
            2,
            0,
            &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
        );
        assert_eq!(
            plan_swapchain(&p, EXTENT_800_600, false).unwrap().present_mode,
            vk::PresentModeKHR::MAILBOX
        );

        let p = params(
            EXTENT_800_600,
            EXTENT_800_600,
            EXTENT_800_600,
            2,
            0,
            &[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO],
        );
        assert_eq!(
            plan_swapchain(&p, EXTENT_800_600, false).unwrap().present_mode,
            vk::PresentModeKHR::IMMEDIATE
        );

        let p = params(
            EXTENT_800_600,
            EXTENT_800_600,
            EXTENT_800_600,
            2,
            0,
            &[vk::PresentModeKHR::FIFO],
        );
        assert_eq!(
            plan_swapchain(&p, EXTENT_800_600, false).unwrap().present_mode,
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn undefined_extent_falls_back_to_clamped_window_size() {
        let undefined = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        let p = params(
            undefined,
            vk::Extent2D {
                width: 640,
                height: 480,
            },
            vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            2,
            0,
            &[vk::PresentModeKHR::FIFO],
        );

        // Window smaller than minimum clamps up
        let plan = plan_swapchain(
            &p,
            vk::Extent2D {
                width: 100,
                height: 100,
            },
            true,
        )
        .unwrap();
        assert_eq!(plan.extent, vk::Extent2D { width: 640, height: 480 });

        // Window larger than maximum clamps down
        let plan = plan_swapchain(
            &p,
            vk::Extent2D {
                width: 4000,
                height: 4000,
            },
            true,
        )
        .unwrap();
        assert_eq!(
            plan.extent,
            vk::Extent2D {
                width: 1920,
                height: 1080
            }
        );

        // In-range window size passes through
        let plan = plan_swapchain(&p, EXTENT_800_600, true).unwrap();
        assert_eq!(plan.extent, EXTENT_800_600);
    }

    #[test]
    fn surface_extent_wins_when_defined() {
        let p = params(
            EXTENT_800_600,
            EXTENT_800_600,
            EXTENT_800_600,
            2,
            0,
            &[vk::PresentModeKHR::FIFO],
        );
        let plan = plan_swapchain(
            &p,
            vk::Extent2D {
                width: 5,
                height: 5,
            },
            true,
        )
        .unwrap();
        assert_eq!(plan.extent, EXTENT_800_600);
    }

    #[test]
    fn image_count_is_min_plus_one_clamped_to_max() {
        let p = params(
            EXTENT_800_600,
            EXTENT_800_600,
            EXTENT_800_600,
            2,
            0,
            &[vk::PresentModeKHR::FIFO],
        );
        assert_eq!(plan_swapchain(&p, EXTENT_800_600, true).unwrap().image_count, 3);

        let p = params(
            EXTENT_800_600,
            EXTENT_800_600,
            EXTENT_800_600,
            2,
            2,
            &[vk::PresentModeKHR::FIFO],
        );
        assert_eq!(plan_swapchain(&p, EXTENT_800_600, true).unwrap().image_count, 2);
    }

    #[test]
    fn planning_is_idempotent_for_unchanged_surface() {
        let p = params(
            EXTENT_800_600,
            EXTENT_800_600,
            EXTENT_800_600,
            2,
            3,
            &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
        );
        let first = plan_swapchain(&p, EXTENT_800_600, false).unwrap();
        let second = plan_swapchain(&p, EXTENT_800_600, false).unwrap();
        // Repeated NeedsRebuild -> Rebuild cycles with an unchanged surface
        // must stabilize: identical plan every time
        assert_eq!(first, second);
    }

    #[test]
    fn no_formats_is_an_error() {
        let mut p = params(
            EXTENT_800_600,
            EXTENT_800_600,
            EXTENT_800_600,
            2,
            0,
            &[vk::PresentModeKHR::FIFO],
        );
        p.formats.clear();
        assert!(plan_swapchain(&p, EXTENT_800_600, true).is_err());
    }
}
