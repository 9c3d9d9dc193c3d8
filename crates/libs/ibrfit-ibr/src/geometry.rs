//! Proxy geometry and its texture-space rasterisation.
use crate::LoadError;
use base::math::{Vec2, Vec3, Vec4, Vec4Swizzles};
use gxtk::{raster::rasterize_triangle, Texture2d};

/// Triangle mesh approximating the captured object.
///
/// Every vertex carries a texture coordinate; the fitted textures are laid
/// out in this parameterisation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyMesh {
    /// Vertex positions in world space.
    pub positions: Vec<Vec3>,
    /// Vertex texture coordinates.
    pub texcoords: Vec<Vec2>,
    /// Unit vertex normals.
    pub normals: Vec<Vec3>,
    /// Vertex tangents (`xyz`) with the handedness of the bitangent (`w`).
    pub tangents: Vec<Vec4>,
    /// Triangle list.
    pub indices: Vec<u32>,
}

impl ProxyMesh {
    /// Builds a mesh, computing normals when none are given and tangents
    /// from the texture parameterisation.
    pub fn new(
        positions: Vec<Vec3>,
        texcoords: Vec<Vec2>,
        normals: Option<Vec<Vec3>>,
        indices: Vec<u32>,
    ) -> Result<Self, LoadError> {
        let n = positions.len();
        if texcoords.len() != n {
            return Err(LoadError::Mesh(format!(
                "{} texture coordinates for {} vertices",
                texcoords.len(),
                n
            )));
        }
        if indices.len() % 3 != 0 {
            return Err(LoadError::Mesh(format!(
                "index count {} is not a multiple of 3",
                indices.len()
            )));
        }
        if let Some(i) = indices.iter().find(|&&i| i as usize >= n) {
            return Err(LoadError::Mesh(format!("index {} out of range ({} vertices)", i, n)));
        }
        let normals = match normals {
            Some(normals) if normals.len() == n => normals.into_iter().map(|v| v.normalize_or_zero()).collect(),
            Some(normals) => {
                return Err(LoadError::Mesh(format!("{} normals for {} vertices", normals.len(), n)));
            },
            None => compute_normals(&positions, &indices),
        };
        let tangents = compute_tangents(&positions, &texcoords, &normals, &indices);
        Ok(Self {
            positions,
            texcoords,
            normals,
            tangents,
            indices,
        })
    }

    /// Square of side `size` in the `z = 0` plane facing `+z`, mapped to the
    /// whole texture with `u` along `+x` and `v` along `+y`.
    pub fn plane(size: f32) -> Self {
        let h = size * 0.5;
        let positions = vec![
            Vec3::new(-h, -h, 0.0),
            Vec3::new(h, -h, 0.0),
            Vec3::new(h, h, 0.0),
            Vec3::new(-h, h, 0.0),
        ];
        let texcoords = vec![Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(0.0, 1.0)];
        let normals = vec![Vec3::Z; 4];
        let indices = vec![0, 1, 2, 0, 2, 3];
        let tangents = compute_tangents(&positions, &texcoords, &normals, &indices);
        Self {
            positions,
            texcoords,
            normals,
            tangents,
            indices,
        }
    }

    /// Number of triangles.
    pub fn triangle_count(&self) -> usize { self.indices.len() / 3 }

    /// Vertex indices of each triangle.
    pub fn triangles(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        self.indices
            .chunks_exact(3)
            .map(|t| [t[0] as usize, t[1] as usize, t[2] as usize])
    }
}

fn compute_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        // Area weighted.
        let n = (positions[b] - positions[a]).cross(positions[c] - positions[a]);
        normals[a] += n;
        normals[b] += n;
        normals[c] += n;
    }
    normals.into_iter().map(|n| n.normalize_or_zero()).collect()
}

fn compute_tangents(positions: &[Vec3], texcoords: &[Vec2], normals: &[Vec3], indices: &[u32]) -> Vec<Vec4> {
    let mut tan = vec![Vec3::ZERO; positions.len()];
    let mut bitan = vec![Vec3::ZERO; positions.len()];
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let e1 = positions[b] - positions[a];
        let e2 = positions[c] - positions[a];
        let d1 = texcoords[b] - texcoords[a];
        let d2 = texcoords[c] - texcoords[a];
        let det = d1.x * d2.y - d2.x * d1.y;
        if det.abs() < 1e-12 {
            continue;
        }
        let r = 1.0 / det;
        let t = (e1 * d2.y - e2 * d1.y) * r;
        let s = (e2 * d1.x - e1 * d2.x) * r;
        for i in [a, b, c] {
            tan[i] += t;
            bitan[i] += s;
        }
    }
    normals
        .iter()
        .zip(tan.iter().zip(bitan.iter()))
        .map(|(&n, (&t, &b))| {
            let t = orthonormal_tangent(n, t);
            let w = if n.cross(t).dot(b) < 0.0 { -1.0 } else { 1.0 };
            t.extend(w)
        })
        .collect()
}

/// Gram-Schmidt orthogonalisation of `t` against `n`, falling back to an
/// arbitrary perpendicular vector when `t` is degenerate.
fn orthonormal_tangent(n: Vec3, t: Vec3) -> Vec3 {
    let t = t - n * n.dot(t);
    if t.length_squared() > 1e-12 {
        t.normalize()
    } else {
        n.any_orthonormal_vector()
    }
}

/// Surface attributes of every texel, obtained by rasterising the proxy
/// mesh in texture space. Texel row `0` lies at `v = 1`.
#[derive(Debug, Clone)]
pub struct GeometryBuffer {
    width: u32,
    height: u32,
    /// World space position.
    pub position: Texture2d<Vec3>,
    /// Unit geometric normal.
    pub normal: Texture2d<Vec3>,
    /// Unit tangent (`xyz`) and bitangent handedness (`w`).
    pub tangent: Texture2d<Vec4>,
    covered: Vec<bool>,
}

/// Orthonormal frame of a texel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TangentFrame {
    /// Tangent.
    pub t: Vec3,
    /// Bitangent.
    pub b: Vec3,
    /// Normal.
    pub n: Vec3,
}

impl TangentFrame {
    /// Expresses a world space direction in the frame.
    #[inline]
    pub fn to_local(&self, dir: Vec3) -> Vec3 { Vec3::new(dir.dot(self.t), dir.dot(self.b), dir.dot(self.n)) }

    /// Expresses a frame direction in world space.
    #[inline]
    pub fn to_world(&self, dir: Vec3) -> Vec3 { self.t * dir.x + self.b * dir.y + self.n * dir.z }
}

impl GeometryBuffer {
    /// Rasterises the mesh into a `width` x `height` texture.
    pub fn rasterize(mesh: &ProxyMesh, width: u32, height: u32) -> Self {
        let mut position = Texture2d::new(width, height);
        let mut normal = Texture2d::new(width, height);
        let mut tangent = Texture2d::new(width, height);
        let mut covered = vec![false; width as usize * height as usize];
        let size = Vec2::new(width as f32, height as f32);
        for [a, b, c] in mesh.triangles() {
            let tri = [a, b, c].map(|i| {
                let uv = mesh.texcoords[i];
                ((Vec2::new(uv.x, 1.0 - uv.y)) * size).extend(0.0)
            });
            rasterize_triangle(width, 0..height, tri, |x, y, bary| {
                let lerp3 = |v: &[Vec3]| v[a] * bary.x + v[b] * bary.y + v[c] * bary.z;
                let n = lerp3(&mesh.normals).normalize_or_zero();
                let t4 = mesh.tangents[a] * bary.x + mesh.tangents[b] * bary.y + mesh.tangents[c] * bary.z;
                let t = orthonormal_tangent(n, t4.xyz());
                position.set(x, y, lerp3(&mesh.positions));
                normal.set(x, y, n);
                tangent.set(x, y, t.extend(if t4.w < 0.0 { -1.0 } else { 1.0 }));
                covered[(y * width + x) as usize] = true;
            });
        }
        log::debug!(
            "Rasterised {} triangles into a {}x{} geometry buffer, {} texels covered",
            mesh.triangle_count(),
            width,
            height,
            covered.iter().filter(|c| **c).count()
        );
        Self {
            width,
            height,
            position,
            normal,
            tangent,
            covered,
        }
    }

    /// Width in texels.
    pub fn width(&self) -> u32 { self.width }

    /// Height in texels.
    pub fn height(&self) -> u32 { self.height }

    /// Whether the texel is covered by the mesh.
    #[inline]
    pub fn is_covered(&self, x: u32, y: u32) -> bool { self.covered[(y * self.width + x) as usize] }

    /// Tangent frame of a texel.
    pub fn frame(&self, x: u32, y: u32) -> TangentFrame {
        let n = self.normal.get(x, y);
        let t4 = self.tangent.get(x, y);
        let t = t4.xyz();
        TangentFrame {
            t,
            b: n.cross(t) * t4.w,
            n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn plane_tangent_frame_follows_uv() {
        let mesh = ProxyMesh::plane(2.0);
        for t in &mesh.tangents {
            assert_relative_eq!(*t, Vec4::new(1.0, 0.0, 0.0, 1.0), epsilon = 1e-6);
        }
        let gbuf = GeometryBuffer::rasterize(&mesh, 4, 4);
        for y in 0..4 {
            for x in 0..4 {
                assert!(gbuf.is_covered(x, y));
            }
        }
        let frame = gbuf.frame(0, 0);
        assert_relative_eq!(frame.t, Vec3::X, epsilon = 1e-6);
        assert_relative_eq!(frame.b, Vec3::Y, epsilon = 1e-6);
        assert_relative_eq!(frame.n, Vec3::Z, epsilon = 1e-6);
        // Row 0 is the top of the texture (v close to 1, y close to +1).
        let p = gbuf.position.get(0, 0);
        assert_relative_eq!(p, Vec3::new(-0.75, 0.75, 0.0), epsilon = 1e-5);
        let p = gbuf.position.get(3, 3);
        assert_relative_eq!(p, Vec3::new(0.75, -0.75, 0.0), epsilon = 1e-5);
    }

    #[test]
    fn computes_missing_normals() {
        let mesh = ProxyMesh::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            vec![Vec2::ZERO, Vec2::X, Vec2::Y],
            None,
            vec![0, 1, 2],
        )
        .unwrap();
        for n in &mesh.normals {
            assert_relative_eq!(*n, Vec3::Z, epsilon = 1e-6);
        }
    }

    #[test]
    fn rejects_out_of_range_indices() {
        let err = ProxyMesh::new(vec![Vec3::ZERO; 3], vec![Vec2::ZERO; 3], None, vec![0, 1, 3]);
        assert!(err.is_err());
        let err = ProxyMesh::new(vec![Vec3::ZERO; 3], vec![Vec2::ZERO; 2], None, vec![0, 1, 2]);
        assert!(err.is_err());
    }
}
