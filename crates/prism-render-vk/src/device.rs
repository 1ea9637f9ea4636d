// SPDX-License-Identifier: CEPL-1.0
//! Adapter selection and the logical device.

use ash::vk;
use std::ffi::{c_char, CStr};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Result, VkError, VkResultExt};
use crate::instance::InstanceContext;
use crate::surface::Surface;

/// Bonus that puts any discrete adapter ahead of every integrated one.
pub const DISCRETE_BONUS: u32 = 1000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilies {
    /// Walk the families in order, keeping the latest graphics-capable and
    /// present-capable index, and stop once both are known.
    pub fn discover(
        props: &[vk::QueueFamilyProperties],
        mut can_present: impl FnMut(u32) -> bool,
    ) -> Self {
        let mut found = Self::default();
        for (i, family) in props.iter().enumerate() {
            let i = i as u32;
            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                found.graphics = Some(i);
            }
            if can_present(i) {
                found.present = Some(i);
            }
            if found.is_complete() {
                break;
            }
        }
        found
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub fn resolve(&self) -> Option<ResolvedFamilies> {
        Some(ResolvedFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl ResolvedFamilies {
    /// One entry per distinct family, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }

    #[inline]
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }
}

/// Everything adapter scoring looks at, gathered up front so the scoring
/// itself stays a pure function.
#[derive(Clone, Copy, Debug)]
pub struct AdapterTraits {
    pub device_type: vk::PhysicalDeviceType,
    pub max_image_dimension_2d: u32,
    pub geometry_shader: bool,
    pub queues_complete: bool,
    pub swapchain_extension: bool,
    pub surface_adequate: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct AdapterRequirements {
    pub geometry_shader: bool,
    /// Off for headless contexts: no swapchain extension, no surface.
    pub presentation: bool,
}

/// 0 means unusable.
pub fn score_adapter(t: &AdapterTraits, req: &AdapterRequirements) -> u32 {
    if req.geometry_shader && !t.geometry_shader {
        return 0;
    }
    if !t.queues_complete {
        return 0;
    }
    if req.presentation && !(t.swapchain_extension && t.surface_adequate) {
        return 0;
    }
    let discrete = if t.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        DISCRETE_BONUS
    } else {
        0
    };
    discrete + t.max_image_dimension_2d
}

/// Index of the highest non-zero score; the first one wins a tie.
pub fn pick_best(scores: &[u32]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (i, &s) in scores.iter().enumerate() {
        if s > 0 && best.map_or(true, |(_, b)| s > b) {
            best = Some((i, s));
        }
    }
    best.map(|(i, _)| i)
}

pub struct DeviceContext {
    device: ash::Device,
    physical: vk::PhysicalDevice,
    families: ResolvedFamilies,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    name: String,
    instance: Arc<InstanceContext>,
}

struct Candidate {
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
    traits: AdapterTraits,
    portability_subset: bool,
    name: String,
}

unsafe fn device_extension_names(
    instance: &ash::Instance,
    phys: vk::PhysicalDevice,
) -> Result<Vec<String>> {
    Ok(instance
        .enumerate_device_extension_properties(phys)?
        .iter()
        .map(|e| {
            CStr::from_ptr(e.extension_name.as_ptr())
                .to_string_lossy()
                .into_owned()
        })
        .collect())
}

unsafe fn inspect_adapter(
    instance: &ash::Instance,
    phys: vk::PhysicalDevice,
    surface: Option<&Surface>,
) -> Result<Candidate> {
    let props = instance.get_physical_device_properties(phys);
    let features = instance.get_physical_device_features(phys);
    let qprops = instance.get_physical_device_queue_family_properties(phys);
    let name = CStr::from_ptr(props.device_name.as_ptr())
        .to_string_lossy()
        .into_owned();

    let families = match surface {
        Some(s) => QueueFamilies::discover(&qprops, |i| s.supports_present(phys, i)),
        // headless: the graphics family stands in for presentation
        None => {
            let f = QueueFamilies::discover(&qprops, |_| false);
            QueueFamilies {
                present: f.graphics,
                ..f
            }
        }
    };

    let extensions = device_extension_names(instance, phys)?;
    let has_ext = |want: &CStr| extensions.iter().any(|e| e.as_bytes() == want.to_bytes());

    let surface_adequate = match surface {
        Some(s) => s.query(phys)?.is_adequate(),
        None => true,
    };

    Ok(Candidate {
        phys,
        families,
        traits: AdapterTraits {
            device_type: props.device_type,
            max_image_dimension_2d: props.limits.max_image_dimension2_d,
            geometry_shader: features.geometry_shader == vk::TRUE,
            queues_complete: families.is_complete(),
            swapchain_extension: has_ext(ash::khr::swapchain::NAME),
            surface_adequate,
        },
        portability_subset: has_ext(ash::khr::portability_subset::NAME),
        name,
    })
}

impl DeviceContext {
    /// Pick the best adapter and create a device with one queue per unique
    /// family. `surface == None` builds a headless context.
    pub fn new(
        instance: Arc<InstanceContext>,
        surface: Option<&Surface>,
        require_geometry_shader: bool,
    ) -> Result<Self> {
        let req = AdapterRequirements {
            geometry_shader: require_geometry_shader,
            presentation: surface.is_some(),
        };

        unsafe {
            let raw = instance.raw();
            let mut candidates = Vec::new();
            for phys in raw.enumerate_physical_devices()? {
                candidates.push(inspect_adapter(raw, phys, surface)?);
            }
            let scores: Vec<u32> = candidates
                .iter()
                .map(|c| {
                    let s = score_adapter(&c.traits, &req);
                    debug!(adapter = %c.name, score = s, "adapter scored");
                    s
                })
                .collect();

            let best = pick_best(&scores).ok_or(VkError::NoSuitableAdapter)?;
            let chosen = &candidates[best];
            let families = chosen
                .families
                .resolve()
                .ok_or(VkError::NoSuitableAdapter)?;
            info!(
                adapter = %chosen.name,
                kind = ?chosen.traits.device_type,
                score = scores[best],
                graphics_family = families.graphics,
                present_family = families.present,
                "adapter selected"
            );

            // --- Logical device ---
            let priority = [1.0f32];
            let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
                .unique()
                .into_iter()
                .map(|family| vk::DeviceQueueCreateInfo {
                    s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                    queue_family_index: family,
                    queue_count: 1,
                    p_queue_priorities: priority.as_ptr(),
                    ..Default::default()
                })
                .collect();

            let mut extensions: Vec<*const c_char> = Vec::new();
            if req.presentation {
                extensions.push(ash::khr::swapchain::NAME.as_ptr());
            }
            if chosen.portability_subset {
                extensions.push(ash::khr::portability_subset::NAME.as_ptr());
            }

            let features = vk::PhysicalDeviceFeatures {
                geometry_shader: if req.geometry_shader {
                    vk::TRUE
                } else {
                    vk::FALSE
                },
                ..Default::default()
            };

            let create_info = vk::DeviceCreateInfo {
                s_type: vk::StructureType::DEVICE_CREATE_INFO,
                queue_create_info_count: queue_infos.len() as u32,
                p_queue_create_infos: queue_infos.as_ptr(),
                enabled_extension_count: extensions.len() as u32,
                pp_enabled_extension_names: extensions.as_ptr(),
                p_enabled_features: &features,
                ..Default::default()
            };
            let device = raw.create_device(chosen.phys, &create_info, None)?;

            let graphics_queue = device.get_device_queue(families.graphics, 0);
            let present_queue = device.get_device_queue(families.present, 0);
            let memory_properties = raw.get_physical_device_memory_properties(chosen.phys);

            Ok(Self {
                device,
                physical: chosen.phys,
                families,
                graphics_queue,
                present_queue,
                memory_properties,
                name: chosen.name.clone(),
                instance,
            })
        }
    }

    #[inline]
    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn instance(&self) -> &InstanceContext {
        &self.instance
    }

    #[inline]
    pub fn physical(&self) -> vk::PhysicalDevice {
        self.physical
    }

    #[inline]
    pub fn families(&self) -> ResolvedFamilies {
        self.families
    }

    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle().during("vkDeviceWaitIdle") }
    }

    /// First depth format usable as an optimal-tiling depth attachment.
    pub fn pick_depth_format(&self) -> Option<vk::Format> {
        [
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
        ]
        .into_iter()
        .find(|&f| {
            let props = unsafe {
                self.instance
                    .raw()
                    .get_physical_device_format_properties(self.physical, f)
            };
            props
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe { self.device.destroy_device(None) };
        debug!("device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn good_adapter() -> AdapterTraits {
        AdapterTraits {
            device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
            max_image_dimension_2d: 16384,
            geometry_shader: true,
            queues_complete: true,
            swapchain_extension: true,
            surface_adequate: true,
        }
    }

    const WINDOWED: AdapterRequirements = AdapterRequirements {
        geometry_shader: true,
        presentation: true,
    };

    #[test]
    fn single_family_does_both() {
        let props = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let f = QueueFamilies::discover(&props, |_| true);
        let r = f.resolve().unwrap();
        assert_eq!(r, ResolvedFamilies { graphics: 0, present: 0 });
        assert!(r.is_shared());
        assert_eq!(r.unique(), vec![0]);
    }

    #[test]
    fn split_families_are_both_created() {
        let props = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        let f = QueueFamilies::discover(&props, |i| i == 2);
        let r = f.resolve().unwrap();
        assert_eq!((r.graphics, r.present), (1, 2));
        assert!(!r.is_shared());
        assert_eq!(r.unique(), vec![1, 2]);
    }

    #[test]
    fn discovery_stops_once_complete() {
        let props = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let mut asked = Vec::new();
        let f = QueueFamilies::discover(&props, |i| {
            asked.push(i);
            true
        });
        assert_eq!(f.graphics, Some(0));
        assert_eq!(asked, vec![0]);
    }

    #[test]
    fn keeps_latest_graphics_family_before_completion() {
        let props = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];
        let f = QueueFamilies::discover(&props, |i| i == 2);
        assert_eq!(f.graphics, Some(1));
        assert_eq!(f.present, Some(2));
    }

    #[test]
    fn no_present_family_is_incomplete() {
        let props = [family(vk::QueueFlags::GRAPHICS)];
        let f = QueueFamilies::discover(&props, |_| false);
        assert!(!f.is_complete());
        assert!(f.resolve().is_none());
    }

    #[test]
    fn discrete_beats_any_integrated() {
        let integrated = good_adapter();
        let discrete = AdapterTraits {
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            max_image_dimension_2d: 8192,
            ..good_adapter()
        };
        assert_eq!(score_adapter(&integrated, &WINDOWED), 16384);
        assert_eq!(score_adapter(&discrete, &WINDOWED), 1000 + 8192);
    }

    #[test]
    fn tie_broken_by_image_dimension() {
        let small = AdapterTraits {
            max_image_dimension_2d: 4096,
            ..good_adapter()
        };
        let scores = [
            score_adapter(&small, &WINDOWED),
            score_adapter(&good_adapter(), &WINDOWED),
        ];
        assert_eq!(pick_best(&scores), Some(1));
    }

    #[test]
    fn hard_requirements_zero_the_score() {
        let cases = [
            AdapterTraits {
                geometry_shader: false,
                ..good_adapter()
            },
            AdapterTraits {
                queues_complete: false,
                ..good_adapter()
            },
            AdapterTraits {
                swapchain_extension: false,
                ..good_adapter()
            },
            AdapterTraits {
                surface_adequate: false,
                ..good_adapter()
            },
        ];
        for t in cases {
            assert_eq!(score_adapter(&t, &WINDOWED), 0, "{t:?}");
        }
    }

    #[test]
    fn relaxed_requirements() {
        let no_gs = AdapterTraits {
            geometry_shader: false,
            ..good_adapter()
        };
        let relaxed = AdapterRequirements {
            geometry_shader: false,
            presentation: true,
        };
        assert!(score_adapter(&no_gs, &relaxed) > 0);

        let headless_only = AdapterTraits {
            swapchain_extension: false,
            surface_adequate: false,
            ..good_adapter()
        };
        let headless = AdapterRequirements {
            geometry_shader: true,
            presentation: false,
        };
        assert!(score_adapter(&headless_only, &headless) > 0);
    }

    #[test]
    fn nothing_usable_picks_nothing() {
        assert_eq!(pick_best(&[]), None);
        assert_eq!(pick_best(&[0, 0]), None);
        assert_eq!(pick_best(&[0, 5, 5]), Some(1));
    }
}
