//! Device, surface and the bind group layouts shared by every program.

use std::sync::Arc;

use crate::{
    scene::texture::{GpuTexture, TextureOptions},
    shadow::ShadowMap,
};

/// Errors when acquiring the GPU.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("Failed to create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),
    #[error("No suitable GPU adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    #[error("Failed to open device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error("Surface is not supported by the adapter")]
    UnsupportedSurface,
}

// =============================================================================
// Grouping Structs
// =============================================================================

/// Bind group layouts for the non-uniform slots a program may declare.
pub struct SharedLayouts {
    /// Filterable 2D texture + sampler, visible to both stages.
    pub texture: wgpu::BindGroupLayout,
    /// Depth texture + comparison sampler.
    pub shadow: wgpu::BindGroupLayout,
    /// Cube texture + sampler.
    pub cubemap: wgpu::BindGroupLayout,
    /// Read-only control points and indices for vertex pulling.
    pub patch_indexed: wgpu::BindGroupLayout,
}

/// Fallback bindings used for slots nothing else has bound.
pub struct DefaultBindings {
    pub white: GpuTexture,
    pub shadow: ShadowMap,
}

pub struct GpuContext {
    /// Shared with the render loop, which acquires frames without the scene lock.
    pub surface: Arc<wgpu::Surface<'static>>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    pub layouts: SharedLayouts,
    pub defaults: DefaultBindings,
    adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    // Creating some of the wgpu types requires async code
    pub async fn new<T>(target: T, width: u32, height: u32, vsync: bool) -> Result<Self, GpuError>
    where
        T: Into<wgpu::SurfaceTarget<'static>>,
    {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance.create_surface(target)?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await?;

        // Wireframe rendering is optional
        let required_features = adapter.features() & wgpu::Features::POLYGON_MODE_LINE;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Terrain Device"),
                required_features,
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
                trace: wgpu::Trace::Off,
                experimental_features: Default::default(),
            })
            .await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or(GpuError::UnsupportedSurface)?;

        let wanted = if vsync {
            wgpu::PresentMode::Fifo
        } else {
            wgpu::PresentMode::Immediate
        };
        let present_mode = surface_caps
            .present_modes
            .iter()
            .copied()
            .find(|mode| *mode == wanted)
            .unwrap_or(wgpu::PresentMode::Fifo);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: width.max(1),
            height: height.max(1),
            present_mode,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let layouts = Self::create_shared_layouts(&device);
        let defaults = Self::create_default_bindings(&device, &queue, &layouts);

        Ok(Self {
            surface: Arc::new(surface),
            device,
            queue,
            config,
            layouts,
            defaults,
            adapter_info: adapter.get_info(),
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    pub fn supports_wireframe(&self) -> bool {
        self.device.features().contains(wgpu::Features::POLYGON_MODE_LINE)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
    }

    /// Reapplies the current configuration after the surface was lost.
    pub fn reconfigure(&self) {
        self.surface.configure(&self.device, &self.config);
    }

    /// Validation scope that checks every GPU call made while it is alive.
    pub fn error_scope(&self, label: &'static str) -> ErrorScopeGuard<'_> {
        ErrorScopeGuard::new(&self.device, label)
    }

    /// Logs adapter and limit details.
    pub fn dump_rendering_info(&self) {
        let info = &self.adapter_info;
        log::info!("Adapter: {} ({:?}, {:?})", info.name, info.device_type, info.backend);
        log::info!("Driver: {} {}", info.driver, info.driver_info);
        let limits = self.device.limits();
        log::info!("Max texture dimension: {}", limits.max_texture_dimension_2d);
        log::info!("Max bind groups: {}", limits.max_bind_groups);
        log::info!(
            "Max storage buffer binding size: {}",
            limits.max_storage_buffer_binding_size
        );
        log::info!("Wireframe supported: {}", self.supports_wireframe());
        log::info!("Surface format: {:?}, {:?}", self.config.format, self.config.present_mode);
    }

    // =========================================================================
    // Initialization Helpers
    // =========================================================================

    fn create_shared_layouts(device: &wgpu::Device) -> SharedLayouts {
        let texture = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Texture Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let shadow = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Shadow Map Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Depth,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
                    count: None,
                },
            ],
        });

        let cubemap = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Cubemap Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::Cube,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let storage_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let patch_indexed = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Indexed Patch Bind Group Layout"),
            entries: &[storage_entry(0), storage_entry(1)],
        });

        SharedLayouts {
            texture,
            shadow,
            cubemap,
            patch_indexed,
        }
    }

    fn create_default_bindings(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        layouts: &SharedLayouts,
    ) -> DefaultBindings {
        let white = GpuTexture::solid(
            device,
            queue,
            &layouts.texture,
            [255, 255, 255, 255],
            TextureOptions::default(),
        );
        let shadow = ShadowMap::new(device, &layouts.shadow, 1, "Default Shadow Map");
        DefaultBindings { white, shadow }
    }
}

// =============================================================================
// Error Checking
// =============================================================================

/// Debug-only validation scope.
///
/// Pushes a validation error scope on creation and pops it on drop; a
/// captured error is logged and aborts the frame with a panic. Release builds
/// leave errors to wgpu's uncaptured error handler.
pub struct ErrorScopeGuard<'a> {
    device: &'a wgpu::Device,
    label: &'static str,
}

impl<'a> ErrorScopeGuard<'a> {
    pub fn new(device: &'a wgpu::Device, label: &'static str) -> Self {
        if cfg!(debug_assertions) {
            device.push_error_scope(wgpu::ErrorFilter::Validation);
        }
        Self { device, label }
    }
}

impl Drop for ErrorScopeGuard<'_> {
    fn drop(&mut self) {
        if !cfg!(debug_assertions) {
            return;
        }
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            log::error!("GPU error in {}: {}", self.label, error);
            if !std::thread::panicking() {
                panic!("GPU error in {}: {}", self.label, error);
            }
        }
    }
}
