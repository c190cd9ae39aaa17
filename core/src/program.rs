use std::{
    num::NonZeroU64,
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{
    common::align_to,
    gpu::GpuContext,
    scene::{texture::DEPTH_FORMAT, Vertex},
    shaders::{ProgramStages, ShaderLibrary, ShaderSet},
    uniforms::{UniformLayout, UniformLocation},
};

/// Number of uniform snapshots an arena holds before anything reserves more.
const INITIAL_ARENA_CAPACITY: usize = 16;

const POSITION3_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];
const PATCH_CORNER_ATTRIBUTES: [wgpu::VertexAttribute; 3] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2, 2 => Float32x2];

static NEXT_PROGRAM_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a program for the lifetime of the process.
pub type ProgramId = u64;

/// Errors when building a program.
#[derive(Debug, thiserror::Error)]
pub enum ProgramError {
    #[error("Unknown shader module: {0}")]
    MissingModule(String),
    #[error("Failed to read shader {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Shader compilation failed: {0}")]
    Compile(String),
    #[error("Shader validation failed for {label}: {message}")]
    Validation { label: String, message: String },
    #[error("Program {0} declares no uniform slot at group 0")]
    MissingUniformSlot(String),
}

/// What a program expects at each bind group index.
///
/// The group index is the slot's position in the program's slot list.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BindSlot {
    /// The program's uniform block, with a dynamic offset.
    Uniforms,
    /// A filterable 2D texture and sampler bound to a texture unit.
    Texture(u32),
    /// A depth texture with a comparison sampler.
    ShadowMap,
    /// A cube texture and sampler.
    Cubemap,
    /// Storage buffers of control points (binding 0) and indices (binding 1).
    PatchSource,
}

/// Which attachments a program renders into.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PassTarget {
    Color,
    DepthOnly,
}

/// How vertices reach the vertex shader.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum VertexInput {
    /// Interleaved [`Vertex`] buffer.
    Mesh,
    /// Tightly packed `vec3<f32>` positions.
    Position3,
    /// One instance per triangle patch, with its three `vec2<f32>` corners.
    PatchCorners,
    /// No vertex buffers; the shader pulls its inputs from storage buffers.
    Pulled,
}

/// Fixed-function state baked into a program's pipelines.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PipelineOptions {
    pub target: PassTarget,
    pub vertex_input: VertexInput,
    pub cull_mode: Option<wgpu::Face>,
    pub depth_write: bool,
    pub depth_compare: wgpu::CompareFunction,
    pub depth_bias: wgpu::DepthBiasState,
}

impl PipelineOptions {
    pub fn color(vertex_input: VertexInput) -> Self {
        Self {
            target: PassTarget::Color,
            vertex_input,
            cull_mode: Some(wgpu::Face::Back),
            depth_write: true,
            depth_compare: wgpu::CompareFunction::Less,
            depth_bias: wgpu::DepthBiasState::default(),
        }
    }

    /// Depth-only rendering from the light. Front faces are culled so that
    /// the stored depth is that of back faces.
    pub fn shadow(vertex_input: VertexInput) -> Self {
        Self {
            target: PassTarget::DepthOnly,
            vertex_input,
            cull_mode: Some(wgpu::Face::Front),
            depth_write: true,
            depth_compare: wgpu::CompareFunction::LessEqual,
            depth_bias: wgpu::DepthBiasState {
                constant: 2,
                slope_scale: 2.0,
                clamp: 0.0,
            },
        }
    }

    pub fn cull(mut self, cull_mode: Option<wgpu::Face>) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    pub fn depth(mut self, write: bool, compare: wgpu::CompareFunction) -> Self {
        self.depth_write = write;
        self.depth_compare = compare;
        self
    }
}

/// Everything needed to build a [`Program`].
pub struct ProgramDescriptor<'a> {
    pub label: &'a str,
    pub shaders: ShaderSet,
    pub features: &'a [(&'a str, bool)],
    pub layout: UniformLayout,
    pub slots: &'a [BindSlot],
    pub options: PipelineOptions,
}

// =============================================================================
// Uniform Arena
// =============================================================================

/// Dynamic-offset uniform buffer holding one snapshot of the program's
/// uniform block per draw call.
pub(crate) struct UniformArena {
    pub buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
    pub stride: u64,
    pub capacity: usize,
}

impl UniformArena {
    fn new(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        block_size: u64,
        capacity: usize,
        label: &str,
    ) -> Self {
        let alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        let stride = align_to(block_size, alignment);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{label} Uniform Arena")),
            size: stride * capacity as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{label} Uniform Bind Group")),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: NonZeroU64::new(block_size),
                }),
            }],
        });

        Self {
            buffer,
            bind_group,
            stride,
            capacity,
        }
    }
}

// =============================================================================
// Program
// =============================================================================

/// A compiled shader set with its uniform layout, bind slots and pipelines.
pub struct Program {
    id: ProgramId,
    label: String,
    stages: ProgramStages,
    layout: UniformLayout,
    slots: Vec<BindSlot>,
    options: PipelineOptions,
    uniform_layout: wgpu::BindGroupLayout,
    fill: wgpu::RenderPipeline,
    line: Option<wgpu::RenderPipeline>,
    arena: UniformArena,
}

impl Program {
    pub fn new(
        gpu: &GpuContext,
        library: &ShaderLibrary,
        desc: ProgramDescriptor,
    ) -> Result<Self, ProgramError> {
        if desc.slots.first() != Some(&BindSlot::Uniforms) {
            return Err(ProgramError::MissingUniformSlot(desc.label.to_string()));
        }

        let mut features: Vec<(&str, bool)> = desc.features.to_vec();
        features.push(("shadow_pass", desc.options.target == PassTarget::DepthOnly));
        let wgsl = library.compile(&desc.shaders, &features)?;

        let device = &gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Wgsl(wgsl.into()),
        });
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(ProgramError::Validation {
                label: desc.label.to_string(),
                message: error.to_string(),
            });
        }

        let block_size = desc.layout.size() as u64;
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{} Uniform Layout", desc.label)),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(block_size),
                },
                count: None,
            }],
        });

        let group_layouts: Vec<&wgpu::BindGroupLayout> = desc
            .slots
            .iter()
            .map(|slot| match slot {
                BindSlot::Uniforms => &uniform_layout,
                BindSlot::Texture(_) => &gpu.layouts.texture,
                BindSlot::ShadowMap => &gpu.layouts.shadow,
                BindSlot::Cubemap => &gpu.layouts.cubemap,
                BindSlot::PatchSource => &gpu.layouts.patch_indexed,
            })
            .collect();

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{} Pipeline Layout", desc.label)),
            bind_group_layouts: &group_layouts,
            push_constant_ranges: &[],
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let fill = create_pipeline(gpu, &pipeline_layout, &module, &desc, wgpu::PolygonMode::Fill);
        let line = gpu
            .supports_wireframe()
            .then(|| create_pipeline(gpu, &pipeline_layout, &module, &desc, wgpu::PolygonMode::Line));
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(ProgramError::Validation {
                label: desc.label.to_string(),
                message: error.to_string(),
            });
        }

        let arena = UniformArena::new(
            device,
            &uniform_layout,
            block_size,
            INITIAL_ARENA_CAPACITY,
            desc.label,
        );

        log::info!(
            "Program {} ready: {:?}, {} uniforms, {} bind groups",
            desc.label,
            desc.shaders.stages(),
            desc.layout.len(),
            desc.slots.len()
        );

        Ok(Self {
            id: NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed),
            label: desc.label.to_string(),
            stages: desc.shaders.stages(),
            layout: desc.layout,
            slots: desc.slots.to_vec(),
            options: desc.options,
            uniform_layout,
            fill,
            line,
            arena,
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn stages(&self) -> ProgramStages {
        self.stages
    }

    pub fn has_stage(&self, stage: ProgramStages) -> bool {
        self.stages.contains(stage)
    }

    /// True when the program expects tessellation patches instead of triangles.
    pub fn tess_control_shader(&self) -> bool {
        self.has_stage(ProgramStages::TESS_CONTROL)
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn layout(&self) -> &UniformLayout {
        &self.layout
    }

    pub fn uniform_location(&self, name: &str) -> Option<UniformLocation> {
        let location = self.layout.location(name);
        if location.is_none() {
            log::trace!("Program {} has no uniform {}", self.label, name);
        }
        location
    }

    pub fn slots(&self) -> &[BindSlot] {
        &self.slots
    }

    /// Bind group index of `slot`, if the program uses it.
    pub fn slot_group(&self, slot: BindSlot) -> Option<u32> {
        self.slots.iter().position(|s| *s == slot).map(|i| i as u32)
    }

    pub fn texture_unit_group(&self, unit: u32) -> Option<u32> {
        self.slot_group(BindSlot::Texture(unit))
    }

    /// The pipeline for the requested polygon mode. Falls back to filled
    /// polygons when the device cannot draw lines.
    pub fn pipeline(&self, wireframe: bool) -> &wgpu::RenderPipeline {
        match (&self.line, wireframe) {
            (Some(line), true) => line,
            _ => &self.fill,
        }
    }

    // =========================================================================
    // Uniform Arena
    // =========================================================================

    /// Makes room for `draws` uniform snapshots in one frame.
    pub fn reserve(&mut self, gpu: &GpuContext, draws: usize) {
        if draws <= self.arena.capacity {
            return;
        }
        let capacity = draws.next_power_of_two();
        log::debug!("Growing uniform arena of {} to {} blocks", self.label, capacity);
        self.arena = UniformArena::new(
            &gpu.device,
            &self.uniform_layout,
            self.layout.size() as u64,
            capacity,
            &self.label,
        );
    }

    pub(crate) fn arena(&self) -> &UniformArena {
        &self.arena
    }
}

fn create_pipeline(
    gpu: &GpuContext,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    desc: &ProgramDescriptor,
    polygon_mode: wgpu::PolygonMode,
) -> wgpu::RenderPipeline {
    let options = &desc.options;
    let position3 = [wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &POSITION3_ATTRIBUTES,
    }];
    let patch_corners = [wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<[[f32; 2]; 3]>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Instance,
        attributes: &PATCH_CORNER_ATTRIBUTES,
    }];
    let mesh = [Vertex::desc()];
    let buffers: &[wgpu::VertexBufferLayout] = match options.vertex_input {
        VertexInput::Mesh => &mesh,
        VertexInput::Position3 => &position3,
        VertexInput::PatchCorners => &patch_corners,
        VertexInput::Pulled => &[],
    };

    let targets = [Some(wgpu::ColorTargetState {
        format: gpu.config.format,
        blend: Some(wgpu::BlendState::REPLACE),
        write_mask: wgpu::ColorWrites::ALL,
    })];
    let fragment = match options.target {
        PassTarget::Color => Some(wgpu::FragmentState {
            module,
            entry_point: Some("fs_main"),
            targets: &targets,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        PassTarget::DepthOnly => None,
    };

    gpu.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(desc.label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_main"),
            buffers,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment,
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: options.cull_mode,
            // Setting this to anything other than Fill requires Features::NON_FILL_POLYGON_MODE
            polygon_mode,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: options.depth_write,
            depth_compare: options.depth_compare,
            stencil: wgpu::StencilState::default(),
            bias: options.depth_bias,
        }),
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
        cache: None,
    })
}
