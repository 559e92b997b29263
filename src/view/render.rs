use std::collections::HashMap;
use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::controller::SceneRenderer;
use crate::model::{Camera, MeshData, Model, ModelId, Scene};

use super::gpu_init::GpuContext;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const GRID_CENTER_COLOR: [f32; 3] = [0.267, 0.267, 0.267];
const GRID_COLOR: [f32; 3] = [0.533, 0.533, 0.533];

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightingUniform {
    pub light_dir: [f32; 3],
    pub intensity: f32,
    pub light_color: [f32; 3],
    pub ambient_intensity: f32,
    pub ambient_color: [f32; 3],
    pub _pad: f32,
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct NodeUniform {
    pub model: [[f32; 4]; 4],
    pub normal: [[f32; 4]; 4],
    pub color: [f32; 4],
}

/// Mesh vertices; grid vertices share the layout with `normal` carrying colour.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
}

fn interleave(positions: &[[f32; 3]], normals: &[[f32; 3]]) -> Vec<Vertex> {
    positions
        .iter()
        .zip(normals.iter().chain(std::iter::repeat(&[0.0, 1.0, 0.0])))
        .map(|(&pos, &normal)| Vertex { pos, normal })
        .collect()
}

/// Grid as a line list, darker lines through the origin.
pub fn grid_vertices(grid: &crate::model::scene::Grid) -> Vec<Vertex> {
    let center = grid.divisions / 2;
    grid.line_segments()
        .into_iter()
        .enumerate()
        .flat_map(|(i, (a, b))| {
            let color = if (i / 2) as u32 == center && grid.divisions % 2 == 0 {
                GRID_CENTER_COLOR
            } else {
                GRID_COLOR
            };
            [Vertex { pos: a, normal: color }, Vertex { pos: b, normal: color }]
        })
        .collect()
}

fn srgb_to_linear(c: f32) -> f64 {
    let c = c as f64;
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

pub fn create_depth_texture(device: &wgpu::Device, width: u32, height: u32) -> (wgpu::Texture, wgpu::TextureView) {
    let depth_texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("depth_texture"),
        size: wgpu::Extent3d { width: width.max(1), height: height.max(1), depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let depth_view = depth_texture.create_view(&wgpu::TextureViewDescriptor::default());
    (depth_texture, depth_view)
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

struct GpuNode {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    /// Morph weights the vertex buffer currently reflects.
    uploaded_weights: Vec<f32>,
}

/// Per-model GPU state, indexed like the model's nodes.
struct GpuModel {
    nodes: Vec<Option<GpuNode>>,
}

/// wgpu implementation of the frame loop's renderer.
pub struct StageRenderer {
    gpu: GpuContext,
    depth_view: wgpu::TextureView,
    camera_buffer: wgpu::Buffer,
    lighting_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    node_layout: wgpu::BindGroupLayout,
    mesh_pipeline: wgpu::RenderPipeline,
    line_pipeline: wgpu::RenderPipeline,
    grid_buffer: wgpu::Buffer,
    grid_vertex_count: u32,
    models: HashMap<ModelId, GpuModel>,
}

impl StageRenderer {
    pub fn new(gpu: GpuContext, scene: &Scene) -> Self {
        let device = gpu.device.clone();

        let camera_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("camera_buffer"),
            size: std::mem::size_of::<CameraUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let lighting_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lighting_buffer"),
            size: std::mem::size_of::<LightingUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let camera_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("camera_bind_group_layout"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::VERTEX),
                uniform_entry(1, wgpu::ShaderStages::FRAGMENT),
            ],
        });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("camera_bind_group"),
            layout: &camera_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: camera_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: lighting_buffer.as_entire_binding() },
            ],
        });
        let node_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("node_bind_group_layout"),
            entries: &[uniform_entry(0, wgpu::ShaderStages::VERTEX_FRAGMENT)],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("stage_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/stage.wgsl").into()),
        });

        let vertex_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute { offset: 0, shader_location: 0, format: wgpu::VertexFormat::Float32x3 },
                wgpu::VertexAttribute { offset: 12, shader_location: 1, format: wgpu::VertexFormat::Float32x3 },
            ],
        };

        let mesh_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("mesh_pipeline_layout"),
            bind_group_layouts: &[&camera_layout, &node_layout],
            push_constant_ranges: &[],
        });
        let line_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("line_pipeline_layout"),
            bind_group_layouts: &[&camera_layout],
            push_constant_ranges: &[],
        });

        let make_pipeline = |label: &str,
                             layout: &wgpu::PipelineLayout,
                             vs: &str,
                             fs: &str,
                             topology: wgpu::PrimitiveTopology,
                             cull_mode: Option<wgpu::Face>| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some(vs),
                    buffers: &[vertex_layout.clone()],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some(fs),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: gpu.format,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState { count: 1, mask: !0, alpha_to_coverage_enabled: false },
                multiview: None,
                cache: None,
            })
        };

        let mesh_pipeline = make_pipeline(
            "mesh_pipeline",
            &mesh_layout,
            "vs_mesh",
            "fs_mesh",
            wgpu::PrimitiveTopology::TriangleList,
            Some(wgpu::Face::Back),
        );
        let line_pipeline = make_pipeline(
            "grid_pipeline",
            &line_layout,
            "vs_line",
            "fs_line",
            wgpu::PrimitiveTopology::LineList,
            None,
        );

        let grid = grid_vertices(&scene.grid);
        let grid_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("grid_vertices"),
            contents: bytemuck::cast_slice(&grid),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let (_, depth_view) = create_depth_texture(&device, gpu.config.width, gpu.config.height);

        Self {
            gpu,
            depth_view,
            camera_buffer,
            lighting_buffer,
            camera_bind_group,
            node_layout,
            mesh_pipeline,
            line_pipeline,
            grid_buffer,
            grid_vertex_count: grid.len() as u32,
            models: HashMap::new(),
        }
    }

    /// Resize the output surface and depth buffer.
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.gpu.resize(width, height) {
            let (_, view) = create_depth_texture(&self.gpu.device, width, height);
            self.depth_view = view;
            tracing::debug!("renderer resized to {}x{}", width, height);
        }
    }

    fn upload_node(&self, mesh: &MeshData, weights: &[f32]) -> GpuNode {
        let device: &Arc<wgpu::Device> = &self.gpu.device;
        let (positions, normals) = mesh.blended(weights);
        let vertices = interleave(&positions, &normals);
        let usage = if mesh.has_morphs() {
            wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST
        } else {
            wgpu::BufferUsages::VERTEX
        };
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("node_vertices"),
            contents: bytemuck::cast_slice(&vertices),
            usage,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("node_indices"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("node_uniform"),
            size: std::mem::size_of::<NodeUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("node_bind_group"),
            layout: &self.node_layout,
            entries: &[wgpu::BindGroupEntry { binding: 0, resource: uniform_buffer.as_entire_binding() }],
        });
        GpuNode {
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
            uniform_buffer,
            bind_group,
            uploaded_weights: weights.to_vec(),
        }
    }

    fn upload_model(&self, model: &Model) -> GpuModel {
        GpuModel {
            nodes: model
                .nodes
                .iter()
                .map(|node| node.mesh.as_ref().map(|mesh| self.upload_node(mesh, &node.weights)))
                .collect(),
        }
    }

    /// Push this frame's transforms and morphed vertices for every model.
    fn sync_models(&mut self, scene: &Scene) {
        for (id, model) in scene.models() {
            if !self.models.contains_key(&id) {
                let uploaded = self.upload_model(model);
                tracing::debug!("uploaded {} to the GPU", model.name);
                self.models.insert(id, uploaded);
            }
            let Some(gpu_model) = self.models.get_mut(&id) else {
                continue;
            };
            let worlds = model.world_matrices();
            for ((node, gpu_node), world) in model.nodes.iter().zip(&mut gpu_model.nodes).zip(&worlds) {
                let (Some(mesh), Some(gpu_node)) = (&node.mesh, gpu_node) else {
                    continue;
                };
                let uniform = NodeUniform {
                    model: world.to_cols_array_2d(),
                    normal: world.inverse().transpose().to_cols_array_2d(),
                    color: mesh.color,
                };
                self.gpu.queue.write_buffer(&gpu_node.uniform_buffer, 0, bytemuck::bytes_of(&uniform));

                if mesh.has_morphs() && gpu_node.uploaded_weights != node.weights {
                    let (positions, normals) = mesh.blended(&node.weights);
                    let vertices = interleave(&positions, &normals);
                    self.gpu.queue.write_buffer(&gpu_node.vertex_buffer, 0, bytemuck::cast_slice(&vertices));
                    gpu_node.uploaded_weights.clone_from(&node.weights);
                }
            }
        }
    }

    fn write_frame_uniforms(&self, scene: &Scene, camera: &Camera) {
        let cam = CameraUniform { view_proj: camera.view_proj().to_cols_array_2d() };
        self.gpu.queue.write_buffer(&self.camera_buffer, 0, bytemuck::bytes_of(&cam));

        let lighting = LightingUniform {
            light_dir: scene.directional.direction().to_array(),
            intensity: scene.directional.intensity,
            light_color: scene.directional.color,
            ambient_intensity: scene.ambient.intensity,
            ambient_color: scene.ambient.color,
            _pad: 0.0,
        };
        self.gpu.queue.write_buffer(&self.lighting_buffer, 0, bytemuck::bytes_of(&lighting));
    }

    fn draw(&mut self, scene: &Scene, camera: &Camera) -> Result<(), wgpu::SurfaceError> {
        self.write_frame_uniforms(scene, camera);
        self.sync_models(scene);

        let output = self.gpu.surface.get_current_texture()?;
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self.gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("render_encoder"),
        });

        let [r, g, b] = scene.background;
        let clear = if self.gpu.format.is_srgb() {
            wgpu::Color { r: srgb_to_linear(r), g: srgb_to_linear(g), b: srgb_to_linear(b), a: 1.0 }
        } else {
            wgpu::Color { r: r as f64, g: g as f64, b: b as f64, a: 1.0 }
        };

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("render_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations { load: wgpu::LoadOp::Clear(clear), store: wgpu::StoreOp::Store },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(1.0), store: wgpu::StoreOp::Store }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            pass.set_bind_group(0, &self.camera_bind_group, &[]);

            pass.set_pipeline(&self.line_pipeline);
            pass.set_vertex_buffer(0, self.grid_buffer.slice(..));
            pass.draw(0..self.grid_vertex_count, 0..1);

            pass.set_pipeline(&self.mesh_pipeline);
            for gpu_model in self.models.values() {
                for gpu_node in gpu_model.nodes.iter().flatten() {
                    if gpu_node.index_count == 0 {
                        continue;
                    }
                    pass.set_bind_group(1, &gpu_node.bind_group, &[]);
                    pass.set_vertex_buffer(0, gpu_node.vertex_buffer.slice(..));
                    pass.set_index_buffer(gpu_node.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                    pass.draw_indexed(0..gpu_node.index_count, 0, 0..1);
                }
            }
        }

        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}

impl SceneRenderer for StageRenderer {
    fn render(&mut self, scene: &Scene, camera: &Camera) {
        match self.draw(scene, camera) {
            Ok(()) => {}
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => self.gpu.reconfigure(),
            Err(wgpu::SurfaceError::Timeout) => tracing::debug!("surface timeout, frame skipped"),
            Err(e) => tracing::error!("render failed: {e:?}"),
        }
    }
}
