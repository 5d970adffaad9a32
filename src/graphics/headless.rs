//! In-memory device service.
//!
//! Tracks allocations against a fixed memory budget. Buffers return their
//! bytes to the budget when dropped. `mark_lost` simulates a removed device:
//! every later allocation fails with `DeviceError::DeviceLost`.

use super::{BufferAllocationRequest, GpuBuffer, GraphicsDeviceService, MemoryResidency, ResourceState, BufferUsage};
use crate::error::DeviceError;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessDevice {
    pub adapter_name: String,
    pub memory_budget: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessQueue {
    pub label: String,
}

#[derive(Debug, Default)]
struct Pool {
    used: u64,
    live: usize,
    next_id: u64,
    lost: Option<String>,
}

/// Buffer handle; releases its memory on drop.
#[derive(Debug)]
pub struct HeadlessBuffer {
    id: u64,
    size: u64,
    residency: MemoryResidency,
    state: ResourceState,
    usage: BufferUsage,
    label: Option<String>,
    pool: Arc<Mutex<Pool>>,
}

impl HeadlessBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn residency(&self) -> MemoryResidency {
        self.residency
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl GpuBuffer for HeadlessBuffer {
    fn size_bytes(&self) -> u64 {
        self.size
    }
}

impl Drop for HeadlessBuffer {
    fn drop(&mut self) {
        if let Ok(mut pool) = self.pool.lock() {
            pool.used = pool.used.saturating_sub(self.size);
            pool.live = pool.live.saturating_sub(1);
        }
    }
}

pub struct HeadlessDeviceService {
    device: HeadlessDevice,
    queue: HeadlessQueue,
    pool: Arc<Mutex<Pool>>,
}

impl HeadlessDeviceService {
    pub fn new(memory_budget: u64) -> Self {
        HeadlessDeviceService {
            device: HeadlessDevice {
                adapter_name: "demoforge headless adapter".to_string(),
                memory_budget,
            },
            queue: HeadlessQueue {
                label: "graphics".to_string(),
            },
            pool: Arc::new(Mutex::new(Pool::default())),
        }
    }

    /// Simulate device removal.
    pub fn mark_lost(&self, reason: impl Into<String>) {
        if let Ok(mut pool) = self.pool.lock() {
            pool.lost = Some(reason.into());
        }
    }

    pub fn used_bytes(&self) -> u64 {
        self.pool.lock().map(|p| p.used).unwrap_or(0)
    }

    pub fn live_buffers(&self) -> usize {
        self.pool.lock().map(|p| p.live).unwrap_or(0)
    }
}

impl GraphicsDeviceService for HeadlessDeviceService {
    type Device = HeadlessDevice;
    type Queue = HeadlessQueue;
    type Buffer = HeadlessBuffer;

    fn device_handle(&self) -> &HeadlessDevice {
        &self.device
    }

    fn graphics_queue_handle(&self) -> &HeadlessQueue {
        &self.queue
    }

    fn allocate_buffer(&self, request: &BufferAllocationRequest) -> Result<HeadlessBuffer, DeviceError> {
        let mut pool = self
            .pool
            .lock()
            .map_err(|_| DeviceError::DeviceLost("allocator state poisoned".to_string()))?;
        if let Some(reason) = &pool.lost {
            return Err(DeviceError::DeviceLost(reason.clone()));
        }
        request.validate()?;

        let available = self.device.memory_budget.saturating_sub(pool.used);
        if request.size_bytes > available {
            return Err(DeviceError::OutOfMemory {
                requested: request.size_bytes,
                available,
            });
        }

        pool.used += request.size_bytes;
        pool.live += 1;
        pool.next_id += 1;
        Ok(HeadlessBuffer {
            id: pool.next_id,
            size: request.size_bytes,
            residency: request.residency,
            state: request.initial_state,
            usage: request.usage,
            label: request.label.clone(),
            pool: Arc::clone(&self.pool),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_accounts_and_releases() {
        let service = HeadlessDeviceService::new(1024);
        let a = service
            .allocate_buffer(&BufferAllocationRequest::storage(256).with_label("a"))
            .unwrap();
        let b = service.allocate_buffer(&BufferAllocationRequest::upload(512)).unwrap();
        assert_eq!(service.used_bytes(), 768);
        assert_eq!(service.live_buffers(), 2);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.label(), Some("a"));
        assert_eq!(b.state(), ResourceState::GenericRead);

        drop(a);
        assert_eq!(service.used_bytes(), 512);
        assert_eq!(service.live_buffers(), 1);
    }

    #[test]
    fn test_out_of_memory_leaves_no_state() {
        let service = HeadlessDeviceService::new(100);
        let err = service
            .allocate_buffer(&BufferAllocationRequest::storage(101))
            .unwrap_err();
        assert_eq!(err, DeviceError::OutOfMemory { requested: 101, available: 100 });
        assert_eq!(service.used_bytes(), 0);
        assert_eq!(service.live_buffers(), 0);
    }

    #[test]
    fn test_invalid_request_rejected_before_accounting() {
        let service = HeadlessDeviceService::new(100);
        assert!(matches!(
            service.allocate_buffer(&BufferAllocationRequest::storage(0)),
            Err(DeviceError::InvalidRequest(_))
        ));
        assert_eq!(service.used_bytes(), 0);
    }

    #[test]
    fn test_device_lost() {
        let service = HeadlessDeviceService::new(1 << 20);
        service.mark_lost("driver reset");
        assert_eq!(
            service
                .allocate_buffer(&BufferAllocationRequest::storage(16))
                .unwrap_err(),
            DeviceError::DeviceLost("driver reset".to_string())
        );
        assert_eq!(service.device_handle().memory_budget, 1 << 20);
        assert_eq!(service.graphics_queue_handle().label, "graphics");
    }
}
