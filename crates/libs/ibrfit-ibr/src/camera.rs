//! Cameras and lights of the captured views.
use base::math::{Mat4, Vec3, Vec4Swizzles};

/// Pinhole (or orthographic) camera of a captured view.
///
/// `view` maps world space to camera space (right-handed, looking down `-z`);
/// `projection` maps camera space to clip space with depth in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewCamera {
    /// World to camera transform.
    pub view: Mat4,
    /// Camera to clip transform.
    pub projection: Mat4,
}

/// Position of a world point in a view image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImagePoint {
    /// Horizontal pixel coordinate, `0` at the left edge.
    pub x: f32,
    /// Vertical pixel coordinate, `0` at the top edge.
    pub y: f32,
    /// Distance along the viewing axis.
    pub depth: f32,
    /// Clip-space `w`, used for perspective-correct interpolation.
    pub w: f32,
}

impl ViewCamera {
    /// Creates a camera from its view and projection matrices.
    pub fn new(view: Mat4, projection: Mat4) -> Self { Self { view, projection } }

    /// Perspective camera at `eye` looking at `target`.
    ///
    /// `fov_y` is the vertical field of view in radians.
    pub fn look_at(eye: Vec3, target: Vec3, up: Vec3, fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            view: Mat4::look_at_rh(eye, target, up),
            projection: Mat4::perspective_rh(fov_y, aspect, near, far),
        }
    }

    /// Position of the camera centre in world space.
    pub fn position(&self) -> Vec3 { self.view.inverse().w_axis.xyz() }

    /// World to clip transform.
    pub fn view_proj(&self) -> Mat4 { self.projection * self.view }

    /// Projects a world point into an image of the given size. Returns `None`
    /// for points behind the camera.
    pub fn project(&self, point: Vec3, width: u32, height: u32) -> Option<ImagePoint> {
        let clip = self.view_proj() * point.extend(1.0);
        if clip.w <= 0.0 {
            return None;
        }
        let ndc = clip.xyz() / clip.w;
        Some(ImagePoint {
            x: (ndc.x * 0.5 + 0.5) * width as f32,
            y: (0.5 - ndc.y * 0.5) * height as f32,
            depth: -self.view.transform_point3(point).z,
            w: clip.w,
        })
    }
}

/// Point light illuminating a view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    /// Position in world space.
    pub position: Vec3,
    /// Radiant intensity per channel.
    pub intensity: Vec3,
}

impl PointLight {
    /// Light co-located with the camera centre (flash photography).
    pub fn at_camera(camera: &ViewCamera, intensity: Vec3) -> Self {
        Self {
            position: camera.position(),
            intensity,
        }
    }

    /// Irradiance reaching `point` from the light, per channel, together with
    /// the unit direction towards the light.
    pub fn irradiance(&self, point: Vec3) -> (Vec3, Vec3) {
        let to_light = self.position - point;
        let dist_sqr = to_light.length_squared();
        if dist_sqr <= 0.0 {
            return (Vec3::ZERO, Vec3::Z);
        }
        (self.intensity / dist_sqr, to_light / dist_sqr.sqrt())
    }
}

/// A captured view: the camera that took the photograph and the light that
/// illuminated the scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct View {
    /// Camera of the view.
    pub camera: ViewCamera,
    /// Light of the view.
    pub light: PointLight,
}
