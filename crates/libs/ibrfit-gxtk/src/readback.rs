//! Blocking readback of floating-point render targets.
use crate::GxError;
use glam::Vec4;

/// Size in bytes of one `Rgba32Float` texel.
pub const RGBA32F_TEXEL_SIZE: u32 = 16;

/// Number of bytes per row of a copy of `width` texels, padded to
/// [`wgpu::COPY_BYTES_PER_ROW_ALIGNMENT`].
pub fn padded_bytes_per_row(width: u32, texel_size: u32) -> u32 {
    let unpadded = width * texel_size;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Staging buffer able to receive a copy of an `Rgba32Float` texture.
pub struct ReadbackBuffer {
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
    padded_bytes_per_row: u32,
}

impl ReadbackBuffer {
    /// Creates a staging buffer for a `width` x `height` `Rgba32Float` texture.
    pub fn new(device: &wgpu::Device, width: u32, height: u32, label: Option<&str>) -> Self {
        let padded_bytes_per_row = padded_bytes_per_row(width, RGBA32F_TEXEL_SIZE);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label,
            size: padded_bytes_per_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            width,
            height,
            padded_bytes_per_row,
        }
    }

    /// Records a copy of the given texture region into the buffer. Rows
    /// `[origin_y, origin_y + height)` are copied.
    pub fn copy_from(&self, encoder: &mut wgpu::CommandEncoder, texture: &wgpu::Texture, origin_y: u32) {
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: origin_y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &self.buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Maps the buffer and returns its content as tightly packed texels.
    pub fn read(&self, device: &wgpu::Device) -> Result<Vec<Vec4>, GxError> {
        let texels = {
            let slice = self.buffer.slice(..);
            let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
            slice.map_async(wgpu::MapMode::Read, move |result| {
                sender.send(result).ok();
            });
            device.poll(wgpu::Maintain::Wait);
            pollster::block_on(async { receiver.receive().await })
                .ok_or_else(|| GxError::Mismatch("readback channel closed".to_string()))??;

            let view = slice.get_mapped_range();
            let row_len = (self.width * RGBA32F_TEXEL_SIZE) as usize;
            let mut texels = Vec::with_capacity(self.width as usize * self.height as usize);
            for row in view.chunks_exact(self.padded_bytes_per_row as usize) {
                let floats: &[f32] = bytemuck::cast_slice(&row[..row_len]);
                texels.extend(floats.chunks_exact(4).map(Vec4::from_slice));
            }
            texels
        };
        self.buffer.unmap();
        Ok(texels)
    }
}
