//! Adapter/device negotiation for one native API.

use tracing::{debug, info};

use crate::backend::BackendKind;
use crate::util::{Error, Result};

/// wgpu backend set that realizes `kind`, `None` for non-GPU kinds.
pub fn native_backends(kind: BackendKind) -> Option<wgpu::Backends> {
    match kind {
        BackendKind::Vulkan => Some(wgpu::Backends::VULKAN),
        BackendKind::Dxr => Some(wgpu::Backends::DX12),
        BackendKind::Metal => Some(wgpu::Backends::METAL),
        BackendKind::Cpu | BackendKind::None => None,
    }
}

/// Device, queue and what we learned about the adapter.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub info: wgpu::AdapterInfo,
    pub limits: wgpu::Limits,
}

impl GpuDevice {
    /// Open a device on the native API behind `kind`.
    ///
    /// Fails when the API has no adapter, the adapter is a software
    /// rasterizer (unless allowed), or compute shaders are missing.
    #[tracing::instrument(skip_all, fields(backend = %kind))]
    pub fn open(kind: BackendKind, allow_software: bool) -> Result<Self> {
        let backends = native_backends(kind)
            .ok_or_else(|| Error::unsupported(format!("{} is not a GPU backend", kind)))?;

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))?;

        let info = adapter.get_info();
        debug!(adapter = %info.name, device_type = ?info.device_type, "adapter found");

        if info.device_type == wgpu::DeviceType::Cpu && !allow_software {
            return Err(Error::unsupported(format!(
                "adapter '{}' is a software rasterizer",
                info.name
            )));
        }

        let downlevel = adapter.get_downlevel_capabilities();
        if !downlevel.flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS) {
            return Err(Error::unsupported(format!(
                "adapter '{}' has no compute shader support",
                info.name
            )));
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("rtcore_device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            ..Default::default()
        }))?;

        let limits = device.limits();
        info!(backend = %kind, adapter = %info.name, driver = %info.driver, "GPU device ready");

        Ok(Self {
            device,
            queue,
            info,
            limits,
        })
    }

    /// Block until all submitted work has finished.
    pub fn wait(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
            .map_err(|e| Error::BuildFailed(format!("device poll: {}", e)))
    }

    /// Submit one encoder and wait for it.
    pub fn submit_and_wait(&self, encoder: wgpu::CommandEncoder) -> Result<()> {
        self.queue.submit(Some(encoder.finish()));
        self.wait()
    }

    /// Run `f` inside out-of-memory and validation error scopes.
    ///
    /// An out-of-memory error becomes [`Error::Allocation`], a validation
    /// error [`Error::BuildFailed`]. Whatever `f` returned is dropped on
    /// failure, which releases partially created resources.
    pub fn scoped<T>(&self, what: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let result = f();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());

        if let Some(e) = oom {
            return Err(Error::Allocation(format!("{}: {}", what, e)));
        }
        if let Some(e) = validation {
            return Err(Error::BuildFailed(format!("{}: {}", what, e)));
        }
        result
    }

    pub fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }
}
