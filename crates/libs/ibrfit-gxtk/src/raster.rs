//! Triangle rasterisation.
use glam::{Vec2, Vec3};
use std::ops::Range;

#[inline(always)]
fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 { (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x) }

/// Rasterises a triangle given in pixel space (`x`, `y` in pixels, `z` free
/// for the caller) and invokes `fragment` with the pixel coordinates and the
/// barycentric coordinates of every pixel centre covered by the triangle.
///
/// Only rows inside `rows` are visited. Both windings are accepted; degenerate
/// triangles produce no fragments.
pub fn rasterize_triangle<F>(width: u32, rows: Range<u32>, tri: [Vec3; 3], mut fragment: F)
where
    F: FnMut(u32, u32, Vec3),
{
    let [a, b, c] = tri.map(|v| v.truncate());
    let area = edge(a, b, c);
    if area.abs() < 1.0e-12 {
        return;
    }
    let rcp_area = 1.0 / area;

    let min = a.min(b).min(c);
    let max = a.max(b).max(c);
    let x0 = (min.x - 0.5).ceil().max(0.0) as u32;
    let x1 = ((max.x - 0.5).floor() as i64).min(width as i64 - 1);
    let y0 = ((min.y - 0.5).ceil().max(0.0) as u32).max(rows.start);
    let y1 = ((max.y - 0.5).floor() as i64).min(rows.end as i64 - 1);
    if x1 < x0 as i64 || y1 < y0 as i64 {
        return;
    }

    const EPS: f32 = -1.0e-6;
    for y in y0..=y1 as u32 {
        for x in x0..=x1 as u32 {
            let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let w0 = edge(b, c, p) * rcp_area;
            let w1 = edge(c, a, p) * rcp_area;
            let w2 = 1.0 - w0 - w1;
            if w0 >= EPS && w1 >= EPS && w2 >= EPS {
                fragment(x, y, Vec3::new(w0, w1, w2));
            }
        }
    }
}

/// Depth buffer storing the closest depth per pixel; cleared to `+∞`.
#[derive(Debug, Clone)]
pub struct DepthBuffer {
    width: u32,
    height: u32,
    depth: Vec<f32>,
}

impl DepthBuffer {
    /// Creates a cleared depth buffer.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: vec![f32::INFINITY; width as usize * height as usize],
        }
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 { self.width }

    /// Height in pixels.
    pub fn height(&self) -> u32 { self.height }

    /// Resets every pixel to `+∞`.
    pub fn clear(&mut self) { self.depth.fill(f32::INFINITY); }

    /// Stored depth of a pixel.
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> f32 { self.depth[y as usize * self.width as usize + x as usize] }

    /// Depth at continuous pixel coordinates (nearest), `+∞` outside.
    pub fn sample_pixel(&self, px: f32, py: f32) -> f32 {
        if px < 0.0 || py < 0.0 || px >= self.width as f32 || py >= self.height as f32 {
            return f32::INFINITY;
        }
        self.get(px as u32, py as u32)
    }

    /// Depth test: stores `z` if it is closer than the current value.
    /// Returns whether the value was written.
    #[inline]
    pub fn write_min(&mut self, x: u32, y: u32, z: f32) -> bool {
        let i = y as usize * self.width as usize + x as usize;
        if z < self.depth[i] {
            self.depth[i] = z;
            true
        } else {
            false
        }
    }

    /// Rasterises a triangle in pixel space keeping the closest depth (`z`).
    pub fn draw_triangle(&mut self, tri: [Vec3; 3]) {
        let (width, height) = (self.width, self.height);
        rasterize_triangle(width, 0..height, tri, |x, y, bary| {
            self.write_min(x, y, bary.dot(Vec3::new(tri[0].z, tri[1].z, tri[2].z)));
        });
    }

    /// Raw depth values, row-major.
    pub fn data(&self) -> &[f32] { &self.depth }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn covers_pixel_centres_once() {
        // Two triangles forming a 4x4 square cover each pixel centre exactly once.
        let quad = [
            [Vec3::new(0.0, 0.0, 0.0), Vec3::new(4.0, 0.0, 0.0), Vec3::new(4.0, 4.0, 0.0)],
            [Vec3::new(0.0, 0.0, 0.0), Vec3::new(4.0, 4.0, 0.0), Vec3::new(0.0, 4.0, 0.0)],
        ];
        let mut hits = vec![0u32; 16];
        for tri in quad {
            rasterize_triangle(4, 0..4, tri, |x, y, _| hits[(y * 4 + x) as usize] += 1);
        }
        // Pixel centres on the shared diagonal are reported by both triangles.
        for y in 0..4u32 {
            for x in 0..4u32 {
                let expected = if x == y { 2 } else { 1 };
                assert_eq!(hits[(y * 4 + x) as usize], expected, "pixel ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn barycentrics_interpolate_vertices() {
        let tri = [Vec3::new(0.0, 0.0, 0.0), Vec3::new(8.0, 0.0, 0.0), Vec3::new(0.0, 8.0, 0.0)];
        rasterize_triangle(8, 0..8, tri, |x, y, bary| {
            assert_relative_eq!(bary.x + bary.y + bary.z, 1.0, epsilon = 1e-5);
            let p = tri[0].truncate() * bary.x + tri[1].truncate() * bary.y + tri[2].truncate() * bary.z;
            assert_relative_eq!(p.x, x as f32 + 0.5, epsilon = 1e-4);
            assert_relative_eq!(p.y, y as f32 + 0.5, epsilon = 1e-4);
        });
    }

    #[test]
    fn row_range_restricts_output() {
        let tri = [Vec3::new(0.0, 0.0, 0.0), Vec3::new(8.0, 0.0, 0.0), Vec3::new(0.0, 8.0, 0.0)];
        rasterize_triangle(8, 2..4, tri, |_, y, _| assert!((2..4).contains(&y)));
    }

    #[test]
    fn depth_keeps_closest() {
        let mut depth = DepthBuffer::new(4, 4);
        let far = [Vec3::new(0.0, 0.0, 5.0), Vec3::new(4.0, 0.0, 5.0), Vec3::new(0.0, 4.0, 5.0)];
        let near = [Vec3::new(0.0, 0.0, 1.0), Vec3::new(4.0, 0.0, 1.0), Vec3::new(0.0, 4.0, 1.0)];
        depth.draw_triangle(far);
        depth.draw_triangle(near);
        depth.draw_triangle(far);
        assert_eq!(depth.get(0, 0), 1.0);
        assert_eq!(depth.get(3, 3), f32::INFINITY);
        assert_eq!(depth.sample_pixel(-1.0, 0.0), f32::INFINITY);
    }
}
