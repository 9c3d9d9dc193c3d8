//! The multi-view resource bundle.
use crate::{
    camera::View,
    geometry::ProxyMesh,
    images::load_view_images,
    LoadError,
};
use base::math::Vec3;
use gxtk::TextureArray;
use std::path::Path;

/// Everything known about the captured object: the views (camera and light
/// of each photograph), the photographs in linear RGB and the proxy mesh.
#[derive(Debug, Clone)]
pub struct IbrResources {
    views: Vec<View>,
    images: TextureArray<Vec3>,
    mesh: ProxyMesh,
}

impl IbrResources {
    /// Bundles already loaded resources. There must be one image per view.
    pub fn new(views: Vec<View>, images: TextureArray<Vec3>, mesh: ProxyMesh) -> Result<Self, LoadError> {
        if views.len() != images.layer_count() {
            return Err(LoadError::ViewCount {
                views: views.len(),
                images: images.layer_count(),
            });
        }
        if views.is_empty() {
            return Err(LoadError::ViewCount { views: 0, images: 0 });
        }
        if mesh.triangle_count() == 0 {
            return Err(LoadError::Mesh("proxy mesh has no triangles".to_string()));
        }
        Ok(Self { views, images, mesh })
    }

    /// Loads the view images from `image_dir` (one file name per view) and
    /// bundles them with the views and the mesh.
    pub fn load(
        views: Vec<View>,
        image_dir: &Path,
        image_names: &[String],
        gamma: f32,
        mesh: ProxyMesh,
    ) -> Result<Self, LoadError> {
        let images = load_view_images(image_dir, image_names, gamma)?;
        Self::new(views, images, mesh)
    }

    /// Number of views.
    pub fn view_count(&self) -> usize { self.views.len() }

    /// All views.
    pub fn views(&self) -> &[View] { &self.views }

    /// One view.
    pub fn view(&self, index: usize) -> &View { &self.views[index] }

    /// View images in linear RGB, one layer per view.
    pub fn images(&self) -> &TextureArray<Vec3> { &self.images }

    /// Proxy geometry.
    pub fn mesh(&self) -> &ProxyMesh { &self.mesh }
}
