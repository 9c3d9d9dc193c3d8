//! Per-texel observations extracted from the photographs.
use base::math::{Vec3, Vec4, Vec4Swizzles};
use std::ops::Range;

/// What one photograph tells about one texel.
///
/// Directions are unit vectors pointing away from the surface, expressed in
/// the texel's geometric tangent frame (`z` along the geometric normal).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TexelObservation {
    /// Linear radiance divided by the irradiance of the light at the texel.
    pub radiance: Vec3,
    /// Direction towards the light.
    pub light_dir: Vec3,
    /// Direction towards the camera.
    pub view_dir: Vec3,
    /// Importance of the observation, `0` when the texel is not seen.
    pub weight: f32,
}

impl TexelObservation {
    /// Whether the texel is visible in the view.
    #[inline]
    pub fn is_visible(&self) -> bool { self.weight > 0.0 }

    /// Decodes the three render target values written for a texel.
    pub fn from_attachments(radiance: Vec4, light_dir: Vec4, view_dir: Vec4) -> Self {
        Self {
            radiance: radiance.xyz(),
            weight: radiance.w,
            light_dir: light_dir.xyz(),
            view_dir: view_dir.xyz(),
        }
    }
}

/// Observations of one view over a band of texel rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationFrame {
    /// Index of the view.
    pub view: usize,
    /// Width of the fitted textures.
    pub width: u32,
    /// Texel rows covered.
    pub rows: Range<u32>,
    /// Observations, row-major over the covered rows.
    pub texels: Vec<TexelObservation>,
}

impl ObservationFrame {
    /// Frame with every texel invisible.
    pub fn empty(view: usize, width: u32, rows: Range<u32>) -> Self {
        let len = width as usize * rows.len();
        Self {
            view,
            width,
            rows,
            texels: vec![TexelObservation::default(); len],
        }
    }

    /// Index of the first covered texel in the full texture.
    pub fn first_texel(&self) -> usize { self.rows.start as usize * self.width as usize }

    /// Observation of a texel given by its index in the full texture.
    #[inline]
    pub fn texel(&self, texel: usize) -> &TexelObservation { &self.texels[texel - self.first_texel()] }

    /// Number of visible texels.
    pub fn visible_count(&self) -> usize { self.texels.iter().filter(|t| t.is_visible()).count() }
}
