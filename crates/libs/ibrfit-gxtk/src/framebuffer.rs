//! Framebuffers with several floating-point colour attachments.
use crate::GxError;
use glam::Vec4;
use rayon::prelude::*;

/// Framebuffer holding `attachment_count` RGBA32F colour attachments.
///
/// The framebuffer covers a band of rows `[row_offset, row_offset + height)`
/// of a larger target, which lets passes run over a block of texels at a
/// time. Storage is interleaved per pixel so that a program writes all of its
/// outputs for a pixel in one place.
#[derive(Debug, Clone)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    row_offset: u32,
    attachment_count: usize,
    data: Vec<Vec4>,
}

impl Framebuffer {
    /// Creates a framebuffer cleared to zero.
    pub fn new(width: u32, height: u32, row_offset: u32, attachment_count: usize) -> Self {
        Self {
            width,
            height,
            row_offset,
            attachment_count,
            data: vec![Vec4::ZERO; width as usize * height as usize * attachment_count],
        }
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 { self.width }

    /// Number of rows covered.
    pub fn height(&self) -> u32 { self.height }

    /// First row of the larger target covered by this framebuffer.
    pub fn row_offset(&self) -> u32 { self.row_offset }

    /// Number of colour attachments.
    pub fn attachment_count(&self) -> usize { self.attachment_count }

    /// Number of pixels.
    pub fn pixel_count(&self) -> usize { self.width as usize * self.height as usize }

    /// Clears every attachment to the given colour.
    pub fn clear(&mut self, color: Vec4) { self.data.fill(color); }

    /// Clears one attachment to the given colour.
    pub fn clear_attachment(&mut self, attachment: usize, color: Vec4) {
        let n = self.attachment_count;
        self.data
            .iter_mut()
            .skip(attachment)
            .step_by(n)
            .for_each(|texel| *texel = color);
    }

    /// Runs a program over every pixel. The program receives the pixel
    /// coordinates in the larger target and the pixel's attachment outputs.
    pub fn draw_fullscreen<F>(&mut self, program: F)
    where
        F: Fn(u32, u32, &mut [Vec4]) + Sync,
    {
        let width = self.width as usize;
        let n = self.attachment_count;
        let row_offset = self.row_offset;
        self.data
            .par_chunks_mut(width * n)
            .enumerate()
            .for_each(|(row, pixels)| {
                let y = row as u32 + row_offset;
                pixels
                    .chunks_mut(n)
                    .enumerate()
                    .for_each(|(x, outputs)| program(x as u32, y, outputs));
            });
    }

    /// Outputs of one pixel, in local coordinates.
    pub fn pixel(&self, x: u32, local_y: u32) -> &[Vec4] {
        let n = self.attachment_count;
        let i = (local_y as usize * self.width as usize + x as usize) * n;
        &self.data[i..i + n]
    }

    /// Mutable outputs of one pixel, in local coordinates.
    pub fn pixel_mut(&mut self, x: u32, local_y: u32) -> &mut [Vec4] {
        let n = self.attachment_count;
        let i = (local_y as usize * self.width as usize + x as usize) * n;
        &mut self.data[i..i + n]
    }

    /// Copies one attachment to CPU memory.
    pub fn read_back(&self, attachment: usize) -> Result<Vec<Vec4>, GxError> {
        if attachment >= self.attachment_count {
            return Err(GxError::Mismatch(format!(
                "attachment {} requested from a framebuffer with {}",
                attachment, self.attachment_count
            )));
        }
        Ok(self
            .data
            .iter()
            .skip(attachment)
            .step_by(self.attachment_count)
            .copied()
            .collect())
    }

    /// Replaces one attachment with data read back from another target.
    pub fn write_attachment(&mut self, attachment: usize, texels: &[Vec4]) -> Result<(), GxError> {
        if attachment >= self.attachment_count || texels.len() != self.pixel_count() {
            return Err(GxError::Mismatch(format!(
                "cannot write {} texels into attachment {} of a {}x{}x{} framebuffer",
                texels.len(),
                attachment,
                self.width,
                self.height,
                self.attachment_count
            )));
        }
        let n = self.attachment_count;
        self.data
            .iter_mut()
            .skip(attachment)
            .step_by(n)
            .zip(texels)
            .for_each(|(dst, src)| *dst = *src);
        Ok(())
    }
}
