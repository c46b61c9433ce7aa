//! Ray tracing pipeline for segment intersection queries.
//!
//! Stage and group order is fixed; the shader binding table relies on it.

use std::sync::Arc;

use ash::vk;
use segtrace_core::QueryPushConstants;
use segtrace_gpu::{GpuError, Result, VkResultExt};
use segtrace_shaders::{ShaderSet, StageKind};

use crate::bindings::{BindingLayout, BUFFER_STAGES};

/// Stages that read the push constant block.
pub const PUSH_CONSTANT_STAGES: vk::ShaderStageFlags = BUFFER_STAGES;

/// Shader modules that only live until the pipeline is created.
struct ShaderModules {
    device: Arc<ash::Device>,
    modules: Vec<vk::ShaderModule>,
}

impl ShaderModules {
    unsafe fn new(device: Arc<ash::Device>, shaders: &ShaderSet) -> Result<Self> {
        let mut this = Self {
            device,
            modules: Vec::with_capacity(StageKind::ALL.len()),
        };
        for kind in StageKind::ALL {
            let create_info = vk::ShaderModuleCreateInfo::default().code(&shaders.stage(kind).code);
            let module = this
                .device
                .create_shader_module(&create_info, None)
                .map_err(|e| {
                    GpuError::ShaderModule(format!("{}: {e}", kind.file_name()))
                })?;
            this.modules.push(module);
        }
        Ok(this)
    }
}

impl Drop for ShaderModules {
    fn drop(&mut self) {
        for module in self.modules.drain(..) {
            unsafe { self.device.destroy_shader_module(module, None) };
        }
    }
}

fn stage_flags(kind: StageKind) -> vk::ShaderStageFlags {
    match kind {
        StageKind::RayGeneration => vk::ShaderStageFlags::RAYGEN_KHR,
        StageKind::Miss => vk::ShaderStageFlags::MISS_KHR,
        StageKind::Intersection => vk::ShaderStageFlags::INTERSECTION_KHR,
        StageKind::AnyHit => vk::ShaderStageFlags::ANY_HIT_KHR,
        StageKind::ClosestHit => vk::ShaderStageFlags::CLOSEST_HIT_KHR,
    }
}

fn stage_index(kind: StageKind) -> u32 {
    StageKind::ALL
        .iter()
        .position(|k| *k == kind)
        .map_or(vk::SHADER_UNUSED_KHR, |i| i as u32)
}

/// The three shader groups: raygen, miss, procedural hit group.
fn shader_groups() -> [vk::RayTracingShaderGroupCreateInfoKHR<'static>; 3] {
    let general = |kind| {
        vk::RayTracingShaderGroupCreateInfoKHR::default()
            .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
            .general_shader(stage_index(kind))
            .closest_hit_shader(vk::SHADER_UNUSED_KHR)
            .any_hit_shader(vk::SHADER_UNUSED_KHR)
            .intersection_shader(vk::SHADER_UNUSED_KHR)
    };

    [
        // Group 0: Ray generation
        general(StageKind::RayGeneration),
        // Group 1: Miss
        general(StageKind::Miss),
        // Group 2: Segment AABBs
        vk::RayTracingShaderGroupCreateInfoKHR::default()
            .ty(vk::RayTracingShaderGroupTypeKHR::PROCEDURAL_HIT_GROUP)
            .general_shader(vk::SHADER_UNUSED_KHR)
            .intersection_shader(stage_index(StageKind::Intersection))
            .any_hit_shader(stage_index(StageKind::AnyHit))
            .closest_hit_shader(stage_index(StageKind::ClosestHit)),
    ]
}

/// Pipeline, its layout, and the descriptor set layout it was created with.
pub struct RayTracePipeline {
    device: Arc<ash::Device>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    binding_layout: BindingLayout,
}

impl RayTracePipeline {
    /// Create the pipeline from the five shader stages.
    ///
    /// # Safety
    /// The loader must belong to `device`, and the device must have the ray tracing
    /// pipeline feature enabled.
    pub unsafe fn new(
        device: Arc<ash::Device>,
        rt_loader: &ash::khr::ray_tracing_pipeline::Device,
        shaders: &ShaderSet,
    ) -> Result<Self> {
        let binding_layout = BindingLayout::new(device.clone())?;

        let push_constant_range = vk::PushConstantRange::default()
            .stage_flags(PUSH_CONSTANT_STAGES)
            .offset(0)
            .size(QueryPushConstants::SIZE);

        let set_layouts = [binding_layout.handle()];
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(std::slice::from_ref(&push_constant_range));
        let layout = device
            .create_pipeline_layout(&layout_info, None)
            .context("vkCreatePipelineLayout")?;

        let pipeline = match Self::create_pipeline(&device, rt_loader, shaders, layout) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                device.destroy_pipeline_layout(layout, None);
                return Err(e);
            }
        };

        tracing::debug!("Created ray tracing pipeline");

        Ok(Self {
            device,
            pipeline,
            layout,
            binding_layout,
        })
    }

    unsafe fn create_pipeline(
        device: &Arc<ash::Device>,
        rt_loader: &ash::khr::ray_tracing_pipeline::Device,
        shaders: &ShaderSet,
        layout: vk::PipelineLayout,
    ) -> Result<vk::Pipeline> {
        let modules = ShaderModules::new(device.clone(), shaders)?;

        let stages: Vec<vk::PipelineShaderStageCreateInfo<'_>> = StageKind::ALL
            .iter()
            .zip(&modules.modules)
            .map(|(&kind, &module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage_flags(kind))
                    .module(module)
                    .name(&shaders.stage(kind).entry)
            })
            .collect();
        let groups = shader_groups();

        let pipeline_info = vk::RayTracingPipelineCreateInfoKHR::default()
            .stages(&stages)
            .groups(&groups)
            .max_pipeline_ray_recursion_depth(1)
            .layout(layout);

        let pipelines = rt_loader
            .create_ray_tracing_pipelines(
                vk::DeferredOperationKHR::null(),
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            )
            .map_err(|e| GpuError::PipelineCreation(format!("Ray tracing pipeline: {e:?}")))?;

        pipelines
            .first()
            .copied()
            .ok_or_else(|| GpuError::PipelineCreation("No pipeline returned".to_string()))
    }

    /// Raw pipeline handle.
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Pipeline layout.
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Descriptor set layout of the bindings.
    pub fn binding_layout(&self) -> &BindingLayout {
        &self.binding_layout
    }
}

impl Drop for RayTracePipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_indices_follow_stage_order() {
        assert_eq!(stage_index(StageKind::RayGeneration), 0);
        assert_eq!(stage_index(StageKind::Miss), 1);
        assert_eq!(stage_index(StageKind::Intersection), 2);
        assert_eq!(stage_index(StageKind::AnyHit), 3);
        assert_eq!(stage_index(StageKind::ClosestHit), 4);
    }

    #[test]
    fn procedural_hit_group() {
        let groups = shader_groups();
        assert_eq!(groups[0].ty, vk::RayTracingShaderGroupTypeKHR::GENERAL);
        assert_eq!(groups[0].general_shader, 0);
        assert_eq!(groups[1].general_shader, 1);

        let hit = &groups[2];
        assert_eq!(hit.ty, vk::RayTracingShaderGroupTypeKHR::PROCEDURAL_HIT_GROUP);
        assert_eq!(hit.general_shader, vk::SHADER_UNUSED_KHR);
        assert_eq!(hit.intersection_shader, 2);
        assert_eq!(hit.any_hit_shader, 3);
        assert_eq!(hit.closest_hit_shader, 4);
    }

    #[test]
    fn push_constants_reach_query_stages() {
        assert!(PUSH_CONSTANT_STAGES.contains(
            vk::ShaderStageFlags::RAYGEN_KHR
                | vk::ShaderStageFlags::INTERSECTION_KHR
                | vk::ShaderStageFlags::ANY_HIT_KHR
        ));
    }
}
