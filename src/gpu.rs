//! GPU availability probe.
//!
//! Asks wgpu for an adapter before any tensor backend is committed.
//! The burn wgpu backend owns device creation; this module only
//! answers whether an adapter exists and what it calls itself, so the
//! CLI can fall back to the CPU backend instead of failing mid-run.

/// Adapter summary for startup logging.
pub struct GpuInfo {
    /// Adapter name as reported by the driver.
    pub name: String,
    /// API the adapter speaks.
    pub api: &'static str,
}

/// Probe for a usable GPU adapter.
/// Returns None if no adapter is available.
pub fn probe() -> Option<GpuInfo> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;
    let info = adapter.get_info();
    Some(GpuInfo {
        name: info.name,
        api: api_name(info.backend),
    })
}

fn api_name(backend: wgpu::Backend) -> &'static str {
    match backend {
        wgpu::Backend::Vulkan => "vulkan",
        wgpu::Backend::Metal => "metal",
        wgpu::Backend::Dx12 => "dx12",
        wgpu::Backend::Gl => "gl",
        _ => "wgpu",
    }
}
