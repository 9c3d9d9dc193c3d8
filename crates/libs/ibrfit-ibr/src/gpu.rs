//! Projection pass running on the GPU.
use crate::{
    geometry::ProxyMesh,
    observation::{ObservationFrame, TexelObservation},
    projection::{ProjectionPass, ShadowMaps, DEPTH_BIAS},
    IbrResources,
};
use base::{error::FitErrorKind, FitError};
use gxtk::{context::GpuContext, readback::ReadbackBuffer, GxError};
use std::{borrow::Cow, ops::Range, sync::Mutex};

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct GpuVertex {
    position: [f32; 3],
    normal: [f32; 3],
    texcoord: [f32; 2],
    tangent: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ViewUniforms {
    view_proj: [[f32; 4]; 4],
    view: [[f32; 4]; 4],
    camera_position: [f32; 4],
    light_position: [f32; 4],
    light_intensity: [f32; 4],
    image_info: [f32; 4],
}

/// Render targets of the pass; shared by every view.
struct Targets {
    textures: [wgpu::Texture; 3],
    views: [wgpu::TextureView; 3],
}

/// Projection pass rendering with wgpu into three `Rgba32Float` attachments
/// (radiance and weight, light direction, view direction).
pub struct WgpuProjectionPass<'a> {
    gpu: &'a GpuContext,
    width: u32,
    height: u32,
    view_count: usize,
    index_count: u32,
    pipeline: wgpu::RenderPipeline,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    bind_groups: Vec<wgpu::BindGroup>,
    targets: Mutex<Targets>,
}

impl<'a> WgpuProjectionPass<'a> {
    /// Format of the colour attachments.
    pub const COLOR_ATTACHMENT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

    /// Uploads the resources and creates the pipeline. Shader or pipeline
    /// validation failures are reported as errors.
    pub fn new(gpu: &'a GpuContext, resources: &IbrResources, width: u32, height: u32) -> Result<Self, FitError> {
        Self::create(gpu, resources, width, height)
            .map_err(|err| FitError::graphics(err, "Failed to set up the GPU projection pass"))
    }

    fn create(gpu: &'a GpuContext, resources: &IbrResources, width: u32, height: u32) -> Result<Self, GxError> {
        let device = &gpu.device;
        let required = 3 * 16;
        if device.limits().max_color_attachment_bytes_per_sample < required {
            return Err(GxError::Mismatch(format!(
                "device supports {} colour bytes per sample, {} needed",
                device.limits().max_color_attachment_bytes_per_sample,
                required
            )));
        }

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("projection-shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("projection.wgsl"))),
        });
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("projection-bind-group-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                unfilterable_array_entry(1),
                unfilterable_array_entry(2),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("projection-pipeline-layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let target = Some(wgpu::ColorTargetState {
            format: Self::COLOR_ATTACHMENT_FORMAT,
            blend: None,
            write_mask: wgpu::ColorWrites::ALL,
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("projection-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                compilation_options: Default::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<GpuVertex>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![
                        0 => Float32x3,
                        1 => Float32x3,
                        2 => Float32x2,
                        3 => Float32x4
                    ],
                }],
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                compilation_options: Default::default(),
                targets: &[target.clone(), target.clone(), target],
            }),
            multiview: None,
            cache: None,
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(GxError::Validation {
                label: "projection-pipeline".to_string(),
                message: err.to_string(),
            });
        }

        let vertices = gpu_vertices(resources.mesh());
        let vertex_buffer = create_buffer_init(
            gpu,
            "projection-vertex-buffer",
            bytemuck::cast_slice(&vertices),
            wgpu::BufferUsages::VERTEX,
        );
        let index_buffer = create_buffer_init(
            gpu,
            "projection-index-buffer",
            bytemuck::cast_slice(&resources.mesh().indices),
            wgpu::BufferUsages::INDEX,
        );

        let images = resources.images();
        let (img_w, img_h) = (images.width(), images.height());
        let layers = resources.view_count() as u32;
        let image_texels: Vec<[f32; 4]> = (0..resources.view_count())
            .flat_map(|i| images.layer(i).iter().map(|c| [c.x, c.y, c.z, 1.0]))
            .collect();
        let image_view = upload_array(
            gpu,
            "projection-view-images",
            wgpu::TextureFormat::Rgba32Float,
            (img_w, img_h, layers),
            bytemuck::cast_slice(&image_texels),
        );
        let shadows = ShadowMaps::render(resources);
        let depth_texels: Vec<f32> = (0..shadows.len())
            .flat_map(|i| shadows.map(i).data().iter().map(|d| d.min(f32::MAX)))
            .collect();
        let depth_view = upload_array(
            gpu,
            "projection-depth-maps",
            wgpu::TextureFormat::R32Float,
            (img_w, img_h, layers),
            bytemuck::cast_slice(&depth_texels),
        );

        let bind_groups = resources
            .views()
            .iter()
            .enumerate()
            .map(|(i, view)| {
                let uniforms = ViewUniforms {
                    view_proj: view.camera.view_proj().to_cols_array_2d(),
                    view: view.camera.view.to_cols_array_2d(),
                    camera_position: view.camera.position().extend(1.0).to_array(),
                    light_position: view.light.position.extend(1.0).to_array(),
                    light_intensity: view.light.intensity.extend(0.0).to_array(),
                    image_info: [img_w as f32, img_h as f32, DEPTH_BIAS, i as f32],
                };
                let buffer = create_buffer_init(
                    gpu,
                    "projection-view-uniforms",
                    bytemuck::bytes_of(&uniforms),
                    wgpu::BufferUsages::UNIFORM,
                );
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("projection-bind-group"),
                    layout: &bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: buffer.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(&image_view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::TextureView(&depth_view),
                        },
                    ],
                })
            })
            .collect();

        let textures = ["projection-radiance", "projection-light-dir", "projection-view-dir"].map(|label| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: Self::COLOR_ATTACHMENT_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            })
        });
        let views = textures.each_ref().map(|t| t.create_view(&wgpu::TextureViewDescriptor::default()));

        log::debug!(
            "GPU projection pass ready: {}x{} texels, {} views of {}x{}",
            width,
            height,
            resources.view_count(),
            img_w,
            img_h
        );

        Ok(Self {
            gpu,
            width,
            height,
            view_count: resources.view_count(),
            index_count: resources.mesh().indices.len() as u32,
            pipeline,
            vertex_buffer,
            index_buffer,
            bind_groups,
            targets: Mutex::new(Targets { textures, views }),
        })
    }

    fn render_rows(&self, view: usize, rows: Range<u32>) -> Result<ObservationFrame, GxError> {
        let targets = self
            .targets
            .lock()
            .map_err(|_| GxError::Mismatch("render targets poisoned".to_string()))?;
        let device = &self.gpu.device;
        let row_count = rows.end - rows.start;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("projection-encoder"),
        });
        {
            let attachments = targets.views.each_ref().map(|target| {
                Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })
            });
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("projection-render-pass"),
                color_attachments: &attachments,
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind_groups[view], &[]);
            pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.set_scissor_rect(0, rows.start, self.width, row_count);
            pass.draw_indexed(0..self.index_count, 0, 0..1);
        }
        let readbacks = ["projection-readback-radiance", "projection-readback-light", "projection-readback-view"]
            .map(|label| ReadbackBuffer::new(device, self.width, row_count, Some(label)));
        for (buffer, texture) in readbacks.iter().zip(targets.textures.iter()) {
            buffer.copy_from(&mut encoder, texture, rows.start);
        }
        self.gpu.queue.submit(Some(encoder.finish()));

        let radiance = readbacks[0].read(device)?;
        let light = readbacks[1].read(device)?;
        let viewing = readbacks[2].read(device)?;
        let texels = radiance
            .into_iter()
            .zip(light)
            .zip(viewing)
            .map(|((r, l), v)| TexelObservation::from_attachments(r, l, v))
            .collect();
        Ok(ObservationFrame {
            view,
            width: self.width,
            rows,
            texels,
        })
    }
}

impl ProjectionPass for WgpuProjectionPass<'_> {
    fn view_count(&self) -> usize { self.view_count }

    fn width(&self) -> u32 { self.width }

    fn height(&self) -> u32 { self.height }

    fn render(&self, view: usize, rows: Range<u32>) -> Result<ObservationFrame, FitError> {
        self.check_request(view, &rows)?;
        if rows.is_empty() || self.width == 0 {
            return Ok(ObservationFrame::empty(view, self.width, rows));
        }
        self.render_rows(view, rows).map_err(|err| {
            FitError::new(
                FitErrorKind::Graphics,
                format!("Failed to render the observations of view {}", view),
                Some(Box::new(err)),
            )
        })
    }
}

fn unfilterable_array_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2Array,
            multisampled: false,
        },
        count: None,
    }
}

fn gpu_vertices(mesh: &ProxyMesh) -> Vec<GpuVertex> {
    (0..mesh.positions.len())
        .map(|i| GpuVertex {
            position: mesh.positions[i].to_array(),
            normal: mesh.normals[i].to_array(),
            texcoord: mesh.texcoords[i].to_array(),
            tangent: mesh.tangents[i].to_array(),
        })
        .collect()
}

fn create_buffer_init(gpu: &GpuContext, label: &str, contents: &[u8], usage: wgpu::BufferUsages) -> wgpu::Buffer {
    let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: (contents.len() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
        usage: usage | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    gpu.queue.write_buffer(&buffer, 0, contents);
    buffer
}

fn upload_array(
    gpu: &GpuContext,
    label: &str,
    format: wgpu::TextureFormat,
    (width, height, layers): (u32, u32, u32),
    bytes: &[u8],
) -> wgpu::TextureView {
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: layers,
    };
    let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let texel_size = bytes.len() as u32 / (width * height * layers).max(1);
    gpu.queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytes,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(width * texel_size),
            rows_per_image: Some(height),
        },
        size,
    );
    texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some(label),
        dimension: Some(wgpu::TextureViewDimension::D2Array),
        ..Default::default()
    })
}
