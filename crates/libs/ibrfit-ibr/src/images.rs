//! Loading of the view photographs.
use crate::LoadError;
use base::math::{gamma_to_linear, Vec3};
use gxtk::{Filter, Texture2d, TextureArray};
use std::path::{Path, PathBuf};

/// Extensions tried, in order, when a view image cannot be found under its
/// given name.
pub const FALLBACK_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "PNG", "JPG", "JPEG"];

/// Finds the file of a view image. The name is tried as given first, then
/// with each of the [`FALLBACK_EXTENSIONS`] in place of its extension.
pub fn resolve_image_path(dir: &Path, name: &str) -> Result<PathBuf, LoadError> {
    let given = dir.join(name);
    if given.is_file() {
        return Ok(given);
    }
    let mut tried = vec![given.clone()];
    for ext in FALLBACK_EXTENSIONS {
        let candidate = given.with_extension(ext);
        if candidate.is_file() {
            log::debug!("Image {} found as {}", name, candidate.display());
            return Ok(candidate);
        }
        tried.push(candidate);
    }
    Err(LoadError::MissingImage {
        name: name.to_string(),
        tried,
    })
}

/// Loads a gamma encoded image and converts it to linear RGB.
pub fn load_linear_image(path: &Path, gamma: f32) -> Result<Texture2d<Vec3>, LoadError> {
    let img = image::open(path)
        .map_err(|source| LoadError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .into_rgb32f();
    let (width, height) = img.dimensions();
    let texels = img
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0.map(|c| gamma_to_linear(c, gamma));
            Vec3::new(r, g, b)
        })
        .collect();
    Texture2d::from_data(width, height, texels).map_err(LoadError::from)
}

/// Loads every view image into a texture array with bilinear filtering.
///
/// All images must share the size of the first one.
pub fn load_view_images(dir: &Path, names: &[String], gamma: f32) -> Result<TextureArray<Vec3>, LoadError> {
    let mut layers = Vec::with_capacity(names.len());
    for name in names {
        let path = resolve_image_path(dir, name)?;
        log::debug!("Loading view image {}", path.display());
        layers.push(load_linear_image(&path, gamma)?);
    }
    if let Some(first) = layers.first() {
        log::info!("Loaded {} view images of {}x{}", layers.len(), first.width(), first.height());
    }
    Ok(TextureArray::from_layers(layers)?.with_filter(Filter::Linear))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ibrfit-images-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn falls_back_to_other_extensions() {
        let dir = scratch_dir("fallback");
        image::RgbImage::from_pixel(2, 2, image::Rgb([255, 128, 0]))
            .save(dir.join("view_000.jpg"))
            .unwrap();
        let path = resolve_image_path(&dir, "view_000.png").unwrap();
        assert_eq!(path, dir.join("view_000.jpg"));
        let path = resolve_image_path(&dir, "view_000").unwrap();
        assert_eq!(path, dir.join("view_000.jpg"));
        match resolve_image_path(&dir, "missing.png") {
            Err(LoadError::MissingImage { tried, .. }) => assert_eq!(tried.len(), 7),
            other => panic!("unexpected result {:?}", other),
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn linearises_and_stacks_images() {
        let dir = scratch_dir("stack");
        image::RgbImage::from_pixel(3, 2, image::Rgb([255, 0, 0]))
            .save(dir.join("a.png"))
            .unwrap();
        image::RgbImage::from_pixel(3, 2, image::Rgb([0, 255, 255]))
            .save(dir.join("b.png"))
            .unwrap();
        let images = load_view_images(&dir, &["a.png".to_string(), "b".to_string()], 2.2).unwrap();
        assert_eq!(images.layer_count(), 2);
        assert_eq!((images.width(), images.height()), (3, 2));
        assert_relative_eq!(images.get(0, 1, 1), Vec3::X, epsilon = 1e-6);
        assert_relative_eq!(images.get(1, 2, 0), Vec3::new(0.0, 1.0, 1.0), epsilon = 1e-6);

        image::RgbImage::from_pixel(4, 2, image::Rgb([0, 0, 0]))
            .save(dir.join("c.png"))
            .unwrap();
        assert!(load_view_images(&dir, &["a.png".to_string(), "c.png".to_string()], 2.2).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
