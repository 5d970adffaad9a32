//! wgpu-backed device service (`gpu` feature).

use super::{BufferAllocationRequest, BufferUsage, GpuBuffer, GraphicsDeviceService, MemoryResidency};
use crate::error::DeviceError;

pub struct WgpuBuffer {
    pub buffer: wgpu::Buffer,
}

impl GpuBuffer for WgpuBuffer {
    fn size_bytes(&self) -> u64 {
        self.buffer.size()
    }
}

pub struct WgpuDeviceService {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
}

impl WgpuDeviceService {
    /// Pick a high-performance adapter and open a device on it.
    pub fn new() -> Result<Self, DeviceError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| match e {
            wgpu::RequestAdapterError::NotFound { .. } => {
                DeviceError::AdapterUnavailable("no gpu adapter available".to_string())
            }
            other => DeviceError::AdapterUnavailable(format!("request_adapter failed: {other:?}")),
        })?;
        let adapter_name = adapter.get_info().name;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("demoforge"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| DeviceError::AdapterUnavailable(format!("request_device failed: {e:?}")))?;

        log::info!("GPU device opened on adapter '{}'", adapter_name);
        Ok(WgpuDeviceService {
            device,
            queue,
            adapter_name,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }
}

/// Map residency and usage to wgpu usages. wgpu tracks resource states
/// itself, so the requested initial state only takes part in validation.
fn wgpu_usages(request: &BufferAllocationRequest) -> wgpu::BufferUsages {
    match request.residency {
        MemoryResidency::Upload => wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
        MemoryResidency::Readback => wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        MemoryResidency::DeviceLocal => {
            let pairs = [
                (BufferUsage::COPY_SRC, wgpu::BufferUsages::COPY_SRC),
                (BufferUsage::COPY_DST, wgpu::BufferUsages::COPY_DST),
                (BufferUsage::VERTEX, wgpu::BufferUsages::VERTEX),
                (BufferUsage::INDEX, wgpu::BufferUsages::INDEX),
                (BufferUsage::UNIFORM, wgpu::BufferUsages::UNIFORM),
                (BufferUsage::STORAGE, wgpu::BufferUsages::STORAGE),
            ];
            pairs
                .iter()
                .filter(|(ours, _)| request.usage.contains(*ours))
                .fold(wgpu::BufferUsages::empty(), |acc, (_, theirs)| acc | *theirs)
        }
    }
}

impl GraphicsDeviceService for WgpuDeviceService {
    type Device = wgpu::Device;
    type Queue = wgpu::Queue;
    type Buffer = WgpuBuffer;

    fn device_handle(&self) -> &wgpu::Device {
        &self.device
    }

    fn graphics_queue_handle(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn allocate_buffer(&self, request: &BufferAllocationRequest) -> Result<WgpuBuffer, DeviceError> {
        request.validate()?;

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: request.label.as_deref(),
            size: request.size_bytes,
            usage: wgpu_usages(request),
            mapped_at_creation: false,
        });

        match pollster::block_on(self.device.pop_error_scope()) {
            None => Ok(WgpuBuffer { buffer }),
            Some(wgpu::Error::OutOfMemory { .. }) => {
                buffer.destroy();
                Err(DeviceError::OutOfMemory {
                    requested: request.size_bytes,
                    available: 0,
                })
            }
            Some(other) => {
                buffer.destroy();
                Err(DeviceError::DeviceLost(other.to_string()))
            }
        }
    }
}
