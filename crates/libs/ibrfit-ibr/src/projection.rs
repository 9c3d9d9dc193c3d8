//! Texture-space projection of the photographs.
//!
//! A projection pass renders the proxy mesh in texture space and, for every
//! texel of a band of rows, looks the texel up in one photograph: whether it
//! is visible, what radiance was observed, and from which directions it was
//! lit and seen. One [`ObservationFrame`] is produced per view.
use crate::{
    camera::ImagePoint,
    geometry::GeometryBuffer,
    observation::{ObservationFrame, TexelObservation},
    IbrResources,
};
use base::{
    math::{Vec2, Vec3},
    FitError,
};
use gxtk::raster::{rasterize_triangle, DepthBuffer};
use rayon::prelude::*;
use std::ops::Range;

/// Relative tolerance of the occlusion test.
pub const DEPTH_BIAS: f32 = 1.0e-2;

/// Renders observation frames.
///
/// Frames can be rendered in any order and as many times as needed.
pub trait ProjectionPass: Sync {
    /// Number of views.
    fn view_count(&self) -> usize;

    /// Width of the fitted textures.
    fn width(&self) -> u32;

    /// Height of the fitted textures.
    fn height(&self) -> u32;

    /// Renders the observations of `view` for the texel rows `rows`.
    fn render(&self, view: usize, rows: Range<u32>) -> Result<ObservationFrame, FitError>;

    /// Lazily renders the frames of every view, one at a time.
    fn frames(&self, rows: Range<u32>) -> FrameStream<'_, Self>
    where
        Self: Sized,
    {
        FrameStream {
            pass: self,
            rows,
            next: 0,
        }
    }

    /// Renders the frames of every view in parallel.
    fn render_all(&self, rows: Range<u32>) -> Result<Vec<ObservationFrame>, FitError> {
        (0..self.view_count())
            .into_par_iter()
            .map(|view| self.render(view, rows.clone()))
            .collect()
    }

    /// Checks the arguments of [`ProjectionPass::render`].
    fn check_request(&self, view: usize, rows: &Range<u32>) -> Result<(), FitError> {
        if view >= self.view_count() {
            return Err(FitError::invalid_input(format!(
                "view {} requested, only {} views available",
                view,
                self.view_count()
            )));
        }
        if rows.start > rows.end || rows.end > self.height() {
            return Err(FitError::invalid_input(format!(
                "rows {:?} outside of a texture of height {}",
                rows,
                self.height()
            )));
        }
        Ok(())
    }
}

/// Finite stream of the frames of all views over a band of rows.
pub struct FrameStream<'p, P> {
    pass: &'p P,
    rows: Range<u32>,
    next: usize,
}

impl<P> FrameStream<'_, P> {
    /// Rewinds the stream to the first view.
    pub fn restart(&mut self) { self.next = 0; }
}

impl<P: ProjectionPass> Iterator for FrameStream<'_, P> {
    type Item = Result<ObservationFrame, FitError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.pass.view_count() {
            return None;
        }
        let view = self.next;
        self.next += 1;
        Some(self.pass.render(view, self.rows.clone()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.pass.view_count().saturating_sub(self.next);
        (n, Some(n))
    }
}

/// Depth maps of the proxy mesh seen from every camera, used to decide
/// whether a texel is occluded in a view.
#[derive(Debug, Clone)]
pub struct ShadowMaps {
    maps: Vec<DepthBuffer>,
}

impl ShadowMaps {
    /// Renders one depth map per view at the resolution of the photographs.
    pub fn render(resources: &IbrResources) -> Self {
        let (width, height) = (resources.images().width(), resources.images().height());
        let mesh = resources.mesh();
        let maps = resources
            .views()
            .par_iter()
            .map(|view| {
                let mut depth = DepthBuffer::new(width, height);
                for [a, b, c] in mesh.triangles() {
                    let projected = [a, b, c].map(|i| view.camera.project(mesh.positions[i], width, height));
                    // Triangles crossing the camera plane are dropped.
                    let [Some(pa), Some(pb), Some(pc)] = projected else {
                        continue;
                    };
                    let pts = [pa, pb, pc];
                    let tri = pts.map(|p| Vec3::new(p.x, p.y, 0.0));
                    let inv_w = Vec3::new(1.0 / pa.w, 1.0 / pb.w, 1.0 / pc.w);
                    let depth_w = Vec3::new(pa.depth, pb.depth, pc.depth) * inv_w;
                    rasterize_triangle(width, 0..height, tri, |x, y, bary| {
                        let z = bary.dot(depth_w) / bary.dot(inv_w);
                        depth.write_min(x, y, z);
                    });
                }
                depth
            })
            .collect();
        Self { maps }
    }

    /// Depth map of a view.
    pub fn map(&self, view: usize) -> &DepthBuffer { &self.maps[view] }

    /// Number of depth maps.
    pub fn len(&self) -> usize { self.maps.len() }

    /// Whether there is no depth map.
    pub fn is_empty(&self) -> bool { self.maps.is_empty() }

    /// Farthest depth among the four depth samples surrounding a position.
    pub fn occluder_depth(&self, view: usize, px: f32, py: f32) -> f32 {
        let map = &self.maps[view];
        let (w, h) = (map.width() as i64, map.height() as i64);
        let x0 = (px - 0.5).floor() as i64;
        let y0 = (py - 0.5).floor() as i64;
        let mut depth = f32::NEG_INFINITY;
        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            let x = (x0 + dx).clamp(0, w - 1) as u32;
            let y = (y0 + dy).clamp(0, h - 1) as u32;
            depth = depth.max(map.get(x, y));
        }
        depth
    }

    /// Whether a projected point is the closest surface seen by the camera.
    pub fn is_visible(&self, view: usize, point: &ImagePoint) -> bool {
        point.depth <= self.occluder_depth(view, point.x, point.y) * (1.0 + DEPTH_BIAS)
    }
}

/// Projection pass running on the CPU.
pub struct SoftwareProjectionPass<'a> {
    resources: &'a IbrResources,
    gbuffer: GeometryBuffer,
    shadows: ShadowMaps,
    camera_positions: Vec<Vec3>,
}

impl<'a> SoftwareProjectionPass<'a> {
    /// Prepares the geometry buffer of a `width` x `height` texture and the
    /// depth maps of every view.
    pub fn new(resources: &'a IbrResources, width: u32, height: u32) -> Self {
        let gbuffer = GeometryBuffer::rasterize(resources.mesh(), width, height);
        let shadows = ShadowMaps::render(resources);
        let camera_positions = resources.views().iter().map(|v| v.camera.position()).collect();
        Self {
            resources,
            gbuffer,
            shadows,
            camera_positions,
        }
    }

    /// Geometry buffer of the fitted texture.
    pub fn geometry(&self) -> &GeometryBuffer { &self.gbuffer }

    fn observe(&self, view: usize, x: u32, y: u32) -> TexelObservation {
        let images = self.resources.images();
        let desc = self.resources.view(view);
        let p = self.gbuffer.position.get(x, y);
        let frame = self.gbuffer.frame(x, y);
        let view_dir = frame.to_local((self.camera_positions[view] - p).normalize_or_zero());
        if view_dir.z <= 0.0 {
            return TexelObservation::default();
        }
        let Some(img) = desc.camera.project(p, images.width(), images.height()) else {
            return TexelObservation::default();
        };
        let size = Vec2::new(images.width() as f32, images.height() as f32);
        if img.x < 0.0 || img.y < 0.0 || img.x >= size.x || img.y >= size.y {
            return TexelObservation::default();
        }
        if !self.shadows.is_visible(view, &img) {
            return TexelObservation::default();
        }
        let (irradiance, to_light) = desc.light.irradiance(p);
        let observed = images.sample_pixel(view, img.x, img.y);
        let radiance = Vec3::select(irradiance.cmpgt(Vec3::ZERO), observed / irradiance, Vec3::ZERO);
        TexelObservation {
            radiance,
            light_dir: frame.to_local(to_light),
            view_dir,
            weight: view_dir.z,
        }
    }
}

impl ProjectionPass for SoftwareProjectionPass<'_> {
    fn view_count(&self) -> usize { self.resources.view_count() }

    fn width(&self) -> u32 { self.gbuffer.width() }

    fn height(&self) -> u32 { self.gbuffer.height() }

    fn render(&self, view: usize, rows: Range<u32>) -> Result<ObservationFrame, FitError> {
        self.check_request(view, &rows)?;
        let width = self.width();
        let mut frame = ObservationFrame::empty(view, width, rows.clone());
        if width == 0 {
            return Ok(frame);
        }
        frame
            .texels
            .par_chunks_mut(width as usize)
            .enumerate()
            .for_each(|(i, row)| {
                let y = rows.start + i as u32;
                for (x, obs) in row.iter_mut().enumerate() {
                    if self.gbuffer.is_covered(x as u32, y) {
                        *obs = self.observe(view, x as u32, y);
                    }
                }
            });
        Ok(frame)
    }
}

/// Projection pass replaying observations held in memory, one full texture
/// of observations per view.
#[derive(Debug, Clone)]
pub struct RecordedProjectionPass {
    width: u32,
    height: u32,
    views: Vec<Vec<TexelObservation>>,
}

impl RecordedProjectionPass {
    /// Creates a pass from the row-major observations of every view.
    pub fn new(width: u32, height: u32, views: Vec<Vec<TexelObservation>>) -> Result<Self, FitError> {
        let len = width as usize * height as usize;
        if let Some(i) = views.iter().position(|v| v.len() != len) {
            return Err(FitError::invalid_input(format!(
                "view {} holds {} observations, expected {}x{}",
                i,
                views[i].len(),
                width,
                height
            )));
        }
        Ok(Self { width, height, views })
    }

    /// Records every frame rendered by another pass.
    pub fn record<P: ProjectionPass>(pass: &P) -> Result<Self, FitError> {
        let views = pass
            .render_all(0..pass.height())?
            .into_iter()
            .map(|frame| frame.texels)
            .collect();
        Self::new(pass.width(), pass.height(), views)
    }

    /// Observations of a view.
    pub fn observations(&self, view: usize) -> &[TexelObservation] { &self.views[view] }
}

impl ProjectionPass for RecordedProjectionPass {
    fn view_count(&self) -> usize { self.views.len() }

    fn width(&self) -> u32 { self.width }

    fn height(&self) -> u32 { self.height }

    fn render(&self, view: usize, rows: Range<u32>) -> Result<ObservationFrame, FitError> {
        self.check_request(view, &rows)?;
        let w = self.width as usize;
        let texels = self.views[view][rows.start as usize * w..rows.end as usize * w].to_vec();
        Ok(ObservationFrame {
            view,
            width: self.width,
            rows,
            texels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        camera::{PointLight, View, ViewCamera},
        geometry::ProxyMesh,
    };
    use approx::assert_relative_eq;
    use gxtk::TextureArray;

    fn frontal_view(eye: Vec3, intensity: f32) -> View {
        let camera = ViewCamera::look_at(eye, Vec3::ZERO, Vec3::Y, 60f32.to_radians(), 1.0, 0.1, 100.0);
        View {
            camera,
            light: PointLight::at_camera(&camera, Vec3::splat(intensity)),
        }
    }

    fn constant_images(values: &[f32], size: u32) -> TextureArray<Vec3> {
        let mut images = TextureArray::new(size, size, values.len());
        for (i, v) in values.iter().enumerate() {
            images
                .upload_layer(i, &vec![Vec3::splat(*v); (size * size) as usize])
                .unwrap();
        }
        images
    }

    #[test]
    fn frontal_view_sees_every_texel() {
        let resources = IbrResources::new(
            vec![frontal_view(Vec3::new(0.0, 0.0, 4.0), 16.0)],
            constant_images(&[0.5], 32),
            ProxyMesh::plane(1.0),
        )
        .unwrap();
        let pass = SoftwareProjectionPass::new(&resources, 4, 4);
        let frame = pass.render(0, 0..4).unwrap();
        assert_eq!(frame.visible_count(), 16);
        // Centre texel: distance to the light is about 4.
        let obs = frame.texel(5);
        assert!(obs.weight > 0.9);
        assert_relative_eq!(obs.view_dir.z, obs.weight, epsilon = 1e-6);
        assert_relative_eq!(obs.view_dir.length(), 1.0, epsilon = 1e-5);
        assert_relative_eq!(obs.light_dir, obs.view_dir, epsilon = 1e-5);
        let dist_sqr = (resources.view(0).camera.position() - pass.geometry().position.get(1, 1)).length_squared();
        assert_relative_eq!(obs.radiance.x, 0.5 * dist_sqr / 16.0, epsilon = 1e-4);
    }

    #[test]
    fn back_facing_view_sees_nothing() {
        let resources = IbrResources::new(
            vec![frontal_view(Vec3::new(0.0, 0.0, -4.0), 1.0)],
            constant_images(&[0.5], 16),
            ProxyMesh::plane(1.0),
        )
        .unwrap();
        let pass = SoftwareProjectionPass::new(&resources, 4, 4);
        assert_eq!(pass.render(0, 0..4).unwrap().visible_count(), 0);
    }

    #[test]
    fn occluded_texels_are_invisible() {
        // A small plane in front of the fitted one casts a hole in its view.
        let target = ProxyMesh::plane(2.0);
        let mut positions = target.positions.clone();
        let mut texcoords = target.texcoords.clone();
        let mut indices = target.indices.clone();
        for p in &ProxyMesh::plane(0.5).positions {
            positions.push(*p + Vec3::new(0.0, 0.0, 1.0));
            // Occluder maps to a degenerate point outside the texture.
            texcoords.push(Vec2::new(2.0, 2.0));
        }
        indices.extend([4, 5, 6, 4, 6, 7]);
        let mesh = ProxyMesh::new(positions, texcoords, None, indices).unwrap();
        let resources = IbrResources::new(
            vec![frontal_view(Vec3::new(0.0, 0.0, 4.0), 1.0)],
            constant_images(&[0.5], 64),
            mesh,
        )
        .unwrap();
        let pass = SoftwareProjectionPass::new(&resources, 8, 8);
        let frame = pass.render(0, 0..8).unwrap();
        // Centre texels are hidden, corners are seen.
        assert!(!frame.texel(3 * 8 + 3).is_visible());
        assert!(!frame.texel(4 * 8 + 4).is_visible());
        assert!(frame.texel(0).is_visible());
        assert!(frame.texel(63).is_visible());
    }

    #[test]
    fn stream_is_finite_and_restartable() {
        let resources = IbrResources::new(
            vec![
                frontal_view(Vec3::new(0.0, 0.0, 4.0), 1.0),
                frontal_view(Vec3::new(1.0, 0.0, 4.0), 1.0),
            ],
            constant_images(&[0.5, 0.25], 16),
            ProxyMesh::plane(1.0),
        )
        .unwrap();
        let pass = SoftwareProjectionPass::new(&resources, 2, 2);
        let mut stream = pass.frames(0..2);
        assert_eq!(stream.size_hint(), (2, Some(2)));
        let first: Vec<_> = stream.by_ref().map(|f| f.unwrap().view).collect();
        assert_eq!(first, vec![0, 1]);
        assert!(stream.next().is_none());
        stream.restart();
        assert_eq!(stream.count(), 2);
        assert!(pass.render(2, 0..2).is_err());
        assert!(pass.render(0, 1..3).is_err());
        assert_eq!(pass.render_all(1..2).unwrap().len(), 2);
    }

    #[test]
    fn recorded_pass_replays_software_pass() {
        let resources = IbrResources::new(
            vec![frontal_view(Vec3::new(0.0, 0.0, 4.0), 4.0)],
            constant_images(&[0.5], 16),
            ProxyMesh::plane(1.0),
        )
        .unwrap();
        let pass = SoftwareProjectionPass::new(&resources, 4, 4);
        let recorded = RecordedProjectionPass::record(&pass).unwrap();
        assert_eq!(recorded.view_count(), 1);
        assert_eq!(recorded.render(0, 1..3).unwrap(), pass.render(0, 1..3).unwrap());
        assert!(RecordedProjectionPass::new(4, 4, vec![vec![TexelObservation::default(); 3]]).is_err());
    }
}
