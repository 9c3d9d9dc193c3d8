//! CPU-resident textures.
use crate::GxError;
use glam::Vec2;
use std::ops::{Add, Mul};

/// Value stored in a texture. Anything that can be linearly blended.
pub trait Texel: Copy + Default + Send + Sync + Add<Output = Self> + Mul<f32, Output = Self> {}

impl<T> Texel for T where T: Copy + Default + Send + Sync + Add<Output = T> + Mul<f32, Output = T> {}

/// Filtering applied when sampling a texture at continuous coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    /// Returns the texel containing the sample position.
    #[default]
    Nearest,
    /// Bilinear interpolation between the four closest texel centres.
    Linear,
}

/// Two dimensional texture stored in row-major order, addressed with
/// clamp-to-edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Texture2d<T> {
    width: u32,
    height: u32,
    filter: Filter,
    data: Vec<T>,
}

impl<T: Texel> Texture2d<T> {
    /// Creates a texture filled with the default value of `T`.
    pub fn new(width: u32, height: u32) -> Self { Self::filled(width, height, T::default()) }

    /// Creates a texture filled with `value`.
    pub fn filled(width: u32, height: u32, value: T) -> Self {
        Self {
            width,
            height,
            filter: Filter::Nearest,
            data: vec![value; width as usize * height as usize],
        }
    }

    /// Creates a texture from row-major data.
    pub fn from_data(width: u32, height: u32, data: Vec<T>) -> Result<Self, GxError> {
        if data.len() != width as usize * height as usize {
            return Err(GxError::Mismatch(format!(
                "expected {} texels for a {}x{} texture, got {}",
                width as usize * height as usize,
                width,
                height,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            filter: Filter::Nearest,
            data,
        })
    }

    /// Sets the filtering mode.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Width in texels.
    pub fn width(&self) -> u32 { self.width }

    /// Height in texels.
    pub fn height(&self) -> u32 { self.height }

    /// Number of texels.
    pub fn len(&self) -> usize { self.data.len() }

    /// Whether the texture has no texels.
    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    /// Filtering mode.
    pub fn filter(&self) -> Filter { self.filter }

    /// Row-major texel data.
    pub fn data(&self) -> &[T] { &self.data }

    /// Mutable row-major texel data.
    pub fn data_mut(&mut self) -> &mut [T] { &mut self.data }

    /// Consumes the texture, returning its texels.
    pub fn into_data(self) -> Vec<T> { self.data }

    /// Replaces the whole content of the texture.
    pub fn upload(&mut self, data: &[T]) -> Result<(), GxError> {
        if data.len() != self.data.len() {
            return Err(GxError::Mismatch(format!(
                "upload of {} texels into a texture of {}",
                data.len(),
                self.data.len()
            )));
        }
        self.data.copy_from_slice(data);
        Ok(())
    }

    /// Returns the texel at integer coordinates.
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> T { self.data[y as usize * self.width as usize + x as usize] }

    /// Writes the texel at integer coordinates.
    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: T) {
        self.data[y as usize * self.width as usize + x as usize] = value;
    }

    /// Returns the texel at integer coordinates clamped to the texture.
    #[inline]
    pub fn fetch_clamped(&self, x: i64, y: i64) -> T {
        let x = x.clamp(0, self.width as i64 - 1) as u32;
        let y = y.clamp(0, self.height as i64 - 1) as u32;
        self.get(x, y)
    }

    /// Samples at normalised coordinates in [0, 1]², texel centres located at
    /// `(i + 0.5) / size`.
    pub fn sample(&self, uv: Vec2) -> T {
        self.sample_pixel(uv.x * self.width as f32, uv.y * self.height as f32)
    }

    /// Samples at continuous pixel coordinates (texel `i` covers `[i, i+1)`).
    pub fn sample_pixel(&self, px: f32, py: f32) -> T {
        match self.filter {
            Filter::Nearest => self.fetch_clamped(px.floor() as i64, py.floor() as i64),
            Filter::Linear => {
                let x = px - 0.5;
                let y = py - 0.5;
                let x0 = x.floor();
                let y0 = y.floor();
                let tx = x - x0;
                let ty = y - y0;
                let (x0, y0) = (x0 as i64, y0 as i64);
                let top = self.fetch_clamped(x0, y0) * (1.0 - tx) + self.fetch_clamped(x0 + 1, y0) * tx;
                let bottom =
                    self.fetch_clamped(x0, y0 + 1) * (1.0 - tx) + self.fetch_clamped(x0 + 1, y0 + 1) * tx;
                top * (1.0 - ty) + bottom * ty
            },
        }
    }
}

/// Array of equally sized two dimensional textures stored layer after layer.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureArray<T> {
    width: u32,
    height: u32,
    layers: usize,
    filter: Filter,
    data: Vec<T>,
}

impl<T: Texel> TextureArray<T> {
    /// Creates an array filled with the default value of `T`.
    pub fn new(width: u32, height: u32, layers: usize) -> Self {
        Self {
            width,
            height,
            layers,
            filter: Filter::Nearest,
            data: vec![T::default(); width as usize * height as usize * layers],
        }
    }

    /// Builds an array from individual textures of identical size.
    pub fn from_layers(layers: Vec<Texture2d<T>>) -> Result<Self, GxError> {
        let (width, height) = layers
            .first()
            .map(|l| (l.width(), l.height()))
            .unwrap_or((0, 0));
        let mut data = Vec::with_capacity(width as usize * height as usize * layers.len());
        let count = layers.len();
        for (i, layer) in layers.into_iter().enumerate() {
            if layer.width() != width || layer.height() != height {
                return Err(GxError::Mismatch(format!(
                    "layer {} is {}x{}, expected {}x{}",
                    i,
                    layer.width(),
                    layer.height(),
                    width,
                    height
                )));
            }
            data.extend(layer.into_data());
        }
        Ok(Self {
            width,
            height,
            layers: count,
            filter: Filter::Nearest,
            data,
        })
    }

    /// Sets the filtering mode.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Width of each layer.
    pub fn width(&self) -> u32 { self.width }

    /// Height of each layer.
    pub fn height(&self) -> u32 { self.height }

    /// Number of layers.
    pub fn layer_count(&self) -> usize { self.layers }

    fn layer_len(&self) -> usize { self.width as usize * self.height as usize }

    /// Texels of one layer.
    pub fn layer(&self, layer: usize) -> &[T] {
        let len = self.layer_len();
        &self.data[layer * len..(layer + 1) * len]
    }

    /// Mutable texels of one layer.
    pub fn layer_mut(&mut self, layer: usize) -> &mut [T] {
        let len = self.layer_len();
        &mut self.data[layer * len..(layer + 1) * len]
    }

    /// Replaces the content of one layer.
    pub fn upload_layer(&mut self, layer: usize, data: &[T]) -> Result<(), GxError> {
        if layer >= self.layers || data.len() != self.layer_len() {
            return Err(GxError::Mismatch(format!(
                "upload of {} texels into layer {} of an array with {} layers of {}",
                data.len(),
                layer,
                self.layers,
                self.layer_len()
            )));
        }
        self.layer_mut(layer).copy_from_slice(data);
        Ok(())
    }

    /// Texel at integer coordinates of a layer.
    #[inline]
    pub fn get(&self, layer: usize, x: u32, y: u32) -> T {
        self.data[layer * self.layer_len() + y as usize * self.width as usize + x as usize]
    }

    /// Samples a layer at continuous pixel coordinates.
    pub fn sample_pixel(&self, layer: usize, px: f32, py: f32) -> T {
        let fetch = |x: i64, y: i64| {
            let x = x.clamp(0, self.width as i64 - 1) as u32;
            let y = y.clamp(0, self.height as i64 - 1) as u32;
            self.get(layer, x, y)
        };
        match self.filter {
            Filter::Nearest => fetch(px.floor() as i64, py.floor() as i64),
            Filter::Linear => {
                let x = px - 0.5;
                let y = py - 0.5;
                let x0 = x.floor();
                let y0 = y.floor();
                let tx = x - x0;
                let ty = y - y0;
                let (x0, y0) = (x0 as i64, y0 as i64);
                let top = fetch(x0, y0) * (1.0 - tx) + fetch(x0 + 1, y0) * tx;
                let bottom = fetch(x0, y0 + 1) * (1.0 - tx) + fetch(x0 + 1, y0 + 1) * tx;
                top * (1.0 - ty) + bottom * ty
            },
        }
    }
}
