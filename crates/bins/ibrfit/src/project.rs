//! Project files: the views of a capture, where its photographs are and the
//! proxy mesh.
use base::{error::FitErrorKind, FitError};
use glam::{Vec2, Vec3};
use ibr::{
    camera::{PointLight, View, ViewCamera},
    geometry::ProxyMesh,
    IbrResources,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Camera of a view given by a look-at frame.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraDesc {
    pub eye: Vec3,
    pub target: Vec3,
    #[serde(default = "default_up")]
    pub up: Vec3,
    /// Vertical field of view in degrees.
    pub fov_y: f32,
    #[serde(default = "default_aspect")]
    pub aspect: f32,
    #[serde(default = "default_near")]
    pub near: f32,
    #[serde(default = "default_far")]
    pub far: f32,
}

fn default_up() -> Vec3 { Vec3::Y }

fn default_aspect() -> f32 { 1.0 }

fn default_near() -> f32 { 0.01 }

fn default_far() -> f32 { 100.0 }

fn default_intensity() -> Vec3 { Vec3::ONE }

#[derive(Debug, Clone, Deserialize)]
pub struct LightDesc {
    pub position: Vec3,
    #[serde(default = "default_intensity")]
    pub intensity: Vec3,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewDesc {
    /// Image file name, with or without extension.
    pub image: String,
    pub camera: CameraDesc,
    /// Light of the view; a flash at the camera when absent.
    #[serde(default)]
    pub light: Option<LightDesc>,
}

/// Content of a project file. Relative paths are resolved against the
/// directory of the file.
#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    pub mesh: PathBuf,
    #[serde(default)]
    pub image_dir: PathBuf,
    /// Gamma of the photographs; the settings' gamma when absent.
    #[serde(default)]
    pub gamma: Option<f32>,
    /// Intensity of the flash lights.
    #[serde(default = "default_intensity")]
    pub flash_intensity: Vec3,
    pub views: Vec<ViewDesc>,
}

impl Project {
    pub fn load(path: &Path) -> Result<Self, FitError> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| FitError::from_io_error(err, format!("Failed to read project file: {}", path.display())))?;
        let mut project = Self::parse(&text).map_err(|err| {
            FitError::new(
                FitErrorKind::InvalidInput,
                format!("Failed to parse project file: {}", path.display()),
                Some(Box::new(err)),
            )
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        project.mesh = base.join(&project.mesh);
        project.image_dir = base.join(&project.image_dir);
        log::info!(
            "Loaded project {} with {} views",
            path.display(),
            project.views.len()
        );
        Ok(project)
    }

    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> { serde_yaml::from_str(text) }

    pub fn views(&self) -> Vec<View> {
        self.views
            .iter()
            .map(|desc| {
                let c = &desc.camera;
                let camera = ViewCamera::look_at(c.eye, c.target, c.up, c.fov_y.to_radians(), c.aspect, c.near, c.far);
                let light = match &desc.light {
                    Some(light) => PointLight {
                        position: light.position,
                        intensity: light.intensity,
                    },
                    None => PointLight::at_camera(&camera, self.flash_intensity),
                };
                View { camera, light }
            })
            .collect()
    }

    /// Loads the mesh and the photographs.
    pub fn load_resources(&self, default_gamma: f32) -> Result<IbrResources, FitError> {
        let mesh = load_obj(&self.mesh)?;
        let names: Vec<String> = self.views.iter().map(|v| v.image.clone()).collect();
        let resources = IbrResources::load(
            self.views(),
            &self.image_dir,
            &names,
            self.gamma.unwrap_or(default_gamma),
            mesh,
        )?;
        Ok(resources)
    }
}

/// Loads every model of a Wavefront OBJ file into one proxy mesh.
pub fn load_obj(path: &Path) -> Result<ProxyMesh, FitError> {
    let (models, _) = tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS).map_err(|err| {
        FitError::new(
            FitErrorKind::Io,
            format!("Failed to load mesh: {}", path.display()),
            Some(Box::new(err)),
        )
    })?;
    let mut positions = Vec::new();
    let mut texcoords = Vec::new();
    let mut normals = Vec::new();
    let mut indices = Vec::new();
    let mut has_normals = true;
    for model in &models {
        let mesh = &model.mesh;
        let offset = positions.len() as u32;
        let count = mesh.positions.len() / 3;
        if mesh.texcoords.len() != count * 2 {
            return Err(FitError::invalid_input(format!(
                "Model '{}' of {} has no texture coordinates",
                model.name,
                path.display()
            )));
        }
        positions.extend(mesh.positions.chunks_exact(3).map(Vec3::from_slice));
        texcoords.extend(mesh.texcoords.chunks_exact(2).map(Vec2::from_slice));
        has_normals &= mesh.normals.len() == count * 3;
        normals.extend(mesh.normals.chunks_exact(3).map(Vec3::from_slice));
        indices.extend(mesh.indices.iter().map(|i| i + offset));
    }
    log::debug!(
        "Loaded {} vertices and {} triangles from {}",
        positions.len(),
        indices.len() / 3,
        path.display()
    );
    Ok(ProxyMesh::new(
        positions,
        texcoords,
        has_normals.then_some(normals),
        indices,
    )?)
}
