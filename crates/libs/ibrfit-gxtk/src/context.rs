//! Headless GPU context.
use crate::GxError;
use std::sync::Arc;

/// Bytes per sample of the widest render target used by the projection:
/// three `Rgba32Float` attachments.
const PROJECTION_TARGET_BYTES: u32 = 3 * 16;

/// Device and queue of an offscreen GPU, without any surface.
pub struct GpuContext {
    pub adapter: wgpu::Adapter,
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

/// How the offscreen device is picked.
#[derive(Debug, Clone)]
pub struct WgpuConfig {
    pub backends: wgpu::Backends,
    pub power_preference: wgpu::PowerPreference,
    /// Turns on the backend validation layers.
    pub validation: bool,
}

impl Default for WgpuConfig {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::PRIMARY,
            power_preference: wgpu::PowerPreference::HighPerformance,
            validation: false,
        }
    }
}

/// Limits the projection passes need, falling back to what the adapter
/// offers when it cannot meet the defaults.
fn projection_limits(adapter: &wgpu::Adapter) -> wgpu::Limits {
    let wanted = wgpu::Limits {
        max_color_attachment_bytes_per_sample: PROJECTION_TARGET_BYTES,
        ..wgpu::Limits::default()
    };
    let supported = adapter.limits();
    if wanted.check_limits(&supported) {
        wanted
    } else {
        log::debug!("Adapter misses the default limits, using its own");
        supported
    }
}

impl GpuContext {
    /// Picks an adapter and opens a device on it.
    pub async fn offscreen(config: &WgpuConfig) -> Result<Self, GxError> {
        let flags = match config.validation {
            true => wgpu::InstanceFlags::VALIDATION | wgpu::InstanceFlags::DEBUG,
            false => wgpu::InstanceFlags::empty(),
        };
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: config.backends,
            flags,
            ..Default::default()
        });
        let options = wgpu::RequestAdapterOptions {
            power_preference: config.power_preference,
            ..Default::default()
        };
        let adapter = instance.request_adapter(&options).await.ok_or(GxError::NoAdapter)?;
        let info = adapter.get_info();
        log::info!("Fitting on {} ({:?})", info.name, info.backend);

        let descriptor = wgpu::DeviceDescriptor {
            label: Some("ibrfit-offscreen-device"),
            required_features: wgpu::Features::empty(),
            required_limits: projection_limits(&adapter),
            memory_hints: wgpu::MemoryHints::Performance,
        };
        let (device, queue) = adapter.request_device(&descriptor, None).await?;
        log::trace!("Device limits: {:?}", device.limits());

        Ok(Self {
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }

    /// Blocks on [`GpuContext::offscreen`].
    pub fn offscreen_blocking(config: &WgpuConfig) -> Result<Self, GxError> {
        pollster::block_on(Self::offscreen(config))
    }
}
