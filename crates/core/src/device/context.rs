//! GPU context and initialization
//!
//! Distinguishes "no GPU found" (expected on headless hosts) from "GPU found
//! but failed to initialize" (usually a driver problem worth a warning).

use tracing::{debug, info};

/// Result of a GPU initialization attempt
#[derive(Debug)]
pub enum GpuInitResult {
    /// GPU ready to use
    Success(GpuContext),
    /// No adapter found (silent fallback to host memory)
    NoGpuFound,
    /// Adapter found but device creation failed
    InitFailed {
        /// Name of the adapter that failed
        adapter_name: String,
        /// Error message
        error: String,
    },
}

/// wgpu device and queue holding the ring
#[derive(Debug)]
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    /// Initialize a high-performance adapter
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> GpuInitResult {
        info!("Attempting to initialize GPU context");

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = if let Some(a) =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })) {
            debug!("Found GPU adapter: {}", a.get_info().name);
            a
        } else {
            debug!("No GPU adapter found");
            return GpuInitResult::NoGpuFound;
        };

        let adapter_info = adapter.get_info();
        let adapter_name = adapter_info.name.clone();

        match pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("RTM Replay GPU"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::MemoryUsage,
            },
            None,
        )) {
            Ok((device, queue)) => {
                info!("GPU context initialized successfully: {}", adapter_name);
                GpuInitResult::Success(Self {
                    device,
                    queue,
                    adapter_info,
                })
            }
            Err(e) => {
                debug!("Failed to create GPU device: {}", e);
                GpuInitResult::InitFailed {
                    adapter_name,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Adapter name for logging
    #[must_use]
    pub fn adapter_name(&self) -> &str {
        &self.adapter_info.name
    }

    /// `true` if a single buffer of `bytes` fits the device limits
    ///
    /// The ring and its readback buffer are each one allocation, so the
    /// per-buffer limit is the binding constraint.
    #[must_use]
    pub fn can_allocate(&self, bytes: u64) -> bool {
        bytes > 0 && bytes <= self.device.limits().max_buffer_size
    }

    /// wgpu device
    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// wgpu queue
    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}
