//! GPU device service.
//!
//! [`GraphicsDeviceService`] is the capability seam between the player
//! runtime (and any tooling that touches the GPU) and a concrete graphics
//! backend. It exposes exactly three things: the device handle, the graphics
//! queue handle and buffer allocation. Backends:
//!
//! - [`headless::HeadlessDeviceService`]: in-memory device with a memory
//!   budget, always available. Used by tests and headless tooling.
//! - `wgpu_backend::WgpuDeviceService`: real GPU via wgpu, behind the `gpu`
//!   feature.
//!
//! Allocation either returns an owned buffer or fails without leaving
//! anything allocated. `DeviceError::DeviceLost` means the context must be
//! recreated.

pub mod compute;
pub mod headless;
#[cfg(feature = "gpu")]
pub mod wgpu_backend;

use crate::error::DeviceError;
use bitflags::bitflags;

/// Which memory pool a buffer lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryResidency {
    /// GPU-local, not CPU visible.
    DeviceLocal,
    /// CPU-writable staging memory.
    Upload,
    /// CPU-readable memory for copying results back.
    Readback,
}

/// Access state a buffer is created in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    CopySource,
    CopyDest,
    ShaderResource,
    UnorderedAccess,
    GenericRead,
}

bitflags! {
    /// Buffer usage flags.
    #[derive(Default)]
    pub struct BufferUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const VERTEX   = 1 << 2;
        const INDEX    = 1 << 3;
        const UNIFORM  = 1 << 4;
        const STORAGE  = 1 << 5;
    }
}

/// Everything a backend needs to create a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferAllocationRequest {
    pub label: Option<String>,
    pub size_bytes: u64,
    pub residency: MemoryResidency,
    pub initial_state: ResourceState,
    pub usage: BufferUsage,
}

impl BufferAllocationRequest {
    /// GPU-local storage buffer, the common case for compute work.
    pub fn storage(size_bytes: u64) -> Self {
        BufferAllocationRequest {
            label: None,
            size_bytes,
            residency: MemoryResidency::DeviceLocal,
            initial_state: ResourceState::UnorderedAccess,
            usage: BufferUsage::STORAGE | BufferUsage::COPY_SRC | BufferUsage::COPY_DST,
        }
    }

    /// CPU-writable staging buffer.
    pub fn upload(size_bytes: u64) -> Self {
        BufferAllocationRequest {
            label: None,
            size_bytes,
            residency: MemoryResidency::Upload,
            initial_state: ResourceState::GenericRead,
            usage: BufferUsage::COPY_SRC,
        }
    }

    /// CPU-readable buffer for results.
    pub fn readback(size_bytes: u64) -> Self {
        BufferAllocationRequest {
            label: None,
            size_bytes,
            residency: MemoryResidency::Readback,
            initial_state: ResourceState::CopyDest,
            usage: BufferUsage::COPY_DST,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Backend-independent consistency rules.
    pub fn validate(&self) -> Result<(), DeviceError> {
        let invalid = |msg: &str| Err(DeviceError::InvalidRequest(msg.to_string()));
        if self.size_bytes == 0 {
            return invalid("buffer size must be greater than zero");
        }
        if self.usage.is_empty() {
            return invalid("buffer usage must not be empty");
        }
        match self.residency {
            MemoryResidency::Upload => {
                if self.initial_state != ResourceState::GenericRead {
                    return invalid("upload buffers must start in the GenericRead state");
                }
                if self.usage.contains(BufferUsage::STORAGE) {
                    return invalid("upload buffers cannot be used as storage");
                }
            }
            MemoryResidency::Readback => {
                if self.initial_state != ResourceState::CopyDest {
                    return invalid("readback buffers must start in the CopyDest state");
                }
                if !self.usage.contains(BufferUsage::COPY_DST) {
                    return invalid("readback buffers need COPY_DST usage");
                }
            }
            MemoryResidency::DeviceLocal => {}
        }
        if self.initial_state == ResourceState::UnorderedAccess
            && !self.usage.contains(BufferUsage::STORAGE)
        {
            return invalid("UnorderedAccess state requires STORAGE usage");
        }
        Ok(())
    }
}

/// Common view of an allocated buffer.
pub trait GpuBuffer {
    fn size_bytes(&self) -> u64;
}

/// Capability interface over a graphics backend.
pub trait GraphicsDeviceService {
    type Device;
    type Queue;
    type Buffer: GpuBuffer;

    fn device_handle(&self) -> &Self::Device;

    fn graphics_queue_handle(&self) -> &Self::Queue;

    /// Allocate a buffer. On error nothing stays allocated.
    fn allocate_buffer(&self, request: &BufferAllocationRequest) -> Result<Self::Buffer, DeviceError>;
}
