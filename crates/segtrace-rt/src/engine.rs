//! The segment intersection engine.
//!
//! One [`SegmentIntersector::query`] call builds the acceleration structures over the
//! base segments, launches one ray per query segment, and reads back the hits. Nothing
//! but the pipeline and its binding table survives between calls.

use std::sync::Arc;

use ash::vk;
use segtrace_core::{segment_aabbs, EngineConfig, QueryPushConstants, SegmentSet};
use segtrace_gpu::command::{begin_command_buffer, end_command_buffer, memory_barrier};
use segtrace_gpu::{CommandPool, GpuContext, PendingSubmission};
use segtrace_shaders::ShaderSet;

use crate::acceleration::SceneAccelerationStructure;
use crate::bindings::{QueryBuffers, ResourceBindings};
use crate::collector::{collect, QueryOutcome};
use crate::error::{EngineError, Result};
use crate::pipeline::{RayTracePipeline, PUSH_CONSTANT_STAGES};
use crate::sbt::ShaderBindingTable;

/// Everything one submitted query reads or writes.
///
/// Owned by the pending submission until the fence signals.
struct QueryResources {
    // The descriptor set refers to the structures and buffers below it.
    bindings: ResourceBindings,
    scene: SceneAccelerationStructure,
    buffers: QueryBuffers,
}

/// Hardware ray tracing engine for segment-segment intersection.
pub struct SegmentIntersector {
    config: EngineConfig,
    command_pool: CommandPool,
    sbt: ShaderBindingTable,
    pipeline: RayTracePipeline,
    // Dropped last: every field above holds handles of this device.
    context: Arc<GpuContext>,
}

impl SegmentIntersector {
    /// Create the pipeline, binding table, and command pool.
    ///
    /// Fails with a capability error before allocating anything when the context's
    /// device cannot run the ray tracing pipeline.
    pub fn new(context: Arc<GpuContext>, shaders: &ShaderSet, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        context.capabilities().require_ray_tracing()?;

        let device = context.device().clone();
        let pipeline = unsafe {
            RayTracePipeline::new(device.clone(), context.ray_tracing_pipeline_loader(), shaders)
        }?;
        let sbt = unsafe {
            ShaderBindingTable::new(
                context.ray_tracing_pipeline_loader(),
                context.allocator(),
                pipeline.handle(),
                context.ray_tracing_properties(),
            )
        }?;
        let command_pool = unsafe {
            CommandPool::new(
                device,
                context.compute_queue_family(),
                vk::CommandPoolCreateFlags::TRANSIENT,
            )
        }?;

        tracing::info!(
            "Segment intersector ready (capacity {}, epsilon {:e})",
            config.result_capacity,
            config.aabb_epsilon
        );

        Ok(Self {
            config,
            command_pool,
            sbt,
            pipeline,
            context,
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The context the engine runs on.
    pub fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }

    /// Find every intersecting `(query, base)` segment pair.
    ///
    /// Blocks until the device has finished. Hits come back in device append order;
    /// at most `result_capacity` are returned while `reported_count` holds the true
    /// total.
    pub fn query(&mut self, query: &SegmentSet, base: &SegmentSet) -> Result<QueryOutcome> {
        let capacity = self.config.result_capacity;

        query
            .validate()
            .map_err(|e| EngineError::InvalidInput(format!("query set: {e}")))?;
        base.validate()
            .map_err(|e| EngineError::InvalidInput(format!("base set: {e}")))?;

        if query.is_empty() || base.is_empty() {
            tracing::debug!(
                "Nothing to trace ({} query, {} base segments)",
                query.len(),
                base.len()
            );
            return Ok(QueryOutcome::empty(capacity));
        }

        let max_width = self
            .context
            .ray_tracing_properties()
            .max_ray_dispatch_invocation_count;
        let width = u32::try_from(query.len())
            .ok()
            .filter(|&width| width <= max_width)
            .ok_or_else(|| {
                EngineError::InvalidInput(format!(
                    "{} query segments exceed the device dispatch limit of {max_width}",
                    query.len()
                ))
            })?;

        let aabbs = segment_aabbs(base, self.config.aabb_epsilon)?;

        let device = self.context.device().clone();
        let allocator = self.context.allocator();
        let scene = unsafe {
            SceneAccelerationStructure::new(
                allocator,
                self.context.acceleration_structure_loader(),
                &aabbs,
                self.context
                    .ray_tracing_properties()
                    .min_scratch_offset_alignment,
            )
        }?;
        let buffers = QueryBuffers::upload(allocator, query, base, capacity)?;
        let bindings = unsafe {
            ResourceBindings::new(
                device.clone(),
                self.pipeline.binding_layout(),
                scene.tlas().structure().handle(),
                &buffers,
            )
        }?;
        let resources = QueryResources {
            bindings,
            scene,
            buffers,
        };

        let cmd = self.command_pool.allocate_command_buffer()?;
        if let Err(e) = unsafe { self.record(cmd, &resources, width) } {
            unsafe { self.command_pool.free_command_buffer(cmd) };
            return Err(e);
        }

        tracing::debug!("Tracing {} rays against {} segments", width, base.len());

        let pending = unsafe {
            PendingSubmission::submit(
                device,
                self.context.compute_queue(),
                &self.command_pool,
                cmd,
                resources,
            )
        }?;
        let resources = pending.wait()?;

        let outcome = collect(
            &resources.buffers.results_readback,
            &resources.buffers.counter_readback,
            resources.buffers.capacity(),
        )?;
        tracing::info!(
            "Query: {} x {} segments, {} hits",
            query.len(),
            base.len(),
            outcome.reported_count
        );
        Ok(outcome)
    }

    /// Record the whole query: counter reset, builds, trace, readback copies.
    unsafe fn record(
        &self,
        cmd: vk::CommandBuffer,
        resources: &QueryResources,
        width: u32,
    ) -> Result<()> {
        let device = self.context.device();
        let buffers = &resources.buffers;

        begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

        device.cmd_fill_buffer(cmd, buffers.counter.handle(), 0, 4, 0);
        memory_barrier(
            device,
            cmd,
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
            vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
            vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
        );

        resources.scene.record_build(device, cmd);
        memory_barrier(
            device,
            cmd,
            vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
            vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
            vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
            vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR,
        );

        device.cmd_bind_pipeline(
            cmd,
            vk::PipelineBindPoint::RAY_TRACING_KHR,
            self.pipeline.handle(),
        );
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::RAY_TRACING_KHR,
            self.pipeline.layout(),
            0,
            &[resources.bindings.set()],
            &[],
        );

        let push_constants = QueryPushConstants::new(width, buffers.capacity());
        device.cmd_push_constants(
            cmd,
            self.pipeline.layout(),
            PUSH_CONSTANT_STAGES,
            0,
            bytemuck::bytes_of(&push_constants),
        );

        let regions = self.sbt.regions();
        self.context.ray_tracing_pipeline_loader().cmd_trace_rays(
            cmd,
            &regions.raygen,
            &regions.miss,
            &regions.hit,
            &regions.callable,
            width,
            1,
            1,
        );

        memory_barrier(
            device,
            cmd,
            vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
            vk::AccessFlags2::SHADER_STORAGE_WRITE,
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_READ,
        );

        let record_size = std::mem::size_of::<segtrace_core::HitRecord>() as u64;
        if buffers.capacity() > 0 {
            let region = vk::BufferCopy::default()
                .size(u64::from(buffers.capacity()) * record_size);
            device.cmd_copy_buffer(
                cmd,
                buffers.results.handle(),
                buffers.results_readback.handle(),
                std::slice::from_ref(&region),
            );
        }
        let counter_region = vk::BufferCopy::default().size(4);
        device.cmd_copy_buffer(
            cmd,
            buffers.counter.handle(),
            buffers.counter_readback.handle(),
            std::slice::from_ref(&counter_region),
        );

        memory_barrier(
            device,
            cmd,
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
            vk::PipelineStageFlags2::HOST,
            vk::AccessFlags2::HOST_READ,
        );

        end_command_buffer(device, cmd)?;
        Ok(())
    }
}
