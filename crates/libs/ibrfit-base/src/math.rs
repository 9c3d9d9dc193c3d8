//! Math helpers.
pub use glam::{DVec3, Mat3, Mat4, UVec2, Vec2, Vec3, Vec4, Vec4Swizzles};

/// Returns the reciprocal of the given value, or zero if the value is zero.
#[inline(always)]
pub fn rcp_f32(x: f32) -> f32 {
    if x == 0.0 {
        0.0
    } else {
        1.0 / x
    }
}

/// Returns the reciprocal of the given value, or zero if the value is zero.
#[inline(always)]
pub fn rcp_f64(x: f64) -> f64 {
    if x == 0.0 {
        0.0
    } else {
        1.0 / x
    }
}

/// Squares a value.
#[inline(always)]
pub fn sqr<T: std::ops::Mul<Output = T> + Copy>(x: T) -> T { x * x }

/// Converts a gamma-encoded value in [0, 1] to linear space.
#[inline]
pub fn gamma_to_linear(v: f32, gamma: f32) -> f32 { v.max(0.0).powf(gamma) }

/// Converts a linear value to gamma-encoded space.
#[inline]
pub fn linear_to_gamma(v: f32, gamma: f32) -> f32 { v.max(0.0).powf(rcp_f32(gamma)) }

/// Relative luminance of a linear RGB triple (Rec. 709 primaries).
#[inline]
pub fn luminance(rgb: Vec3) -> f32 { rgb.dot(Vec3::new(0.2126, 0.7152, 0.0722)) }

/// Quantises a value in [0, 1] to an 8-bit channel.
#[inline]
pub fn to_unorm8(v: f32) -> u8 { (v.clamp(0.0, 1.0) * 255.0).round() as u8 }

/// Hermite smooth step on [0, 1].
#[inline]
pub fn smoothstep(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}
