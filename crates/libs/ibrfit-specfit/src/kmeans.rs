//! Initial assignment of texels to basis functions.
use crate::{reflectance::ReflectanceData, resources::SpecularFitResources, row_blocks, solution::SpecularFitSolution};
use base::{error::FitErrorKind, math::DVec3, FitError};
use ibr::{ObservationFrame, ProjectionPass};
use rayon::prelude::*;

/// Result of a k-means clustering.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    pub centroids: Vec<DVec3>,
    /// Cluster of every feature, `None` for missing features.
    pub assignments: Vec<Option<usize>>,
}

fn nearest(centroids: &[DVec3], feature: DVec3) -> usize {
    let mut best = (0, f64::INFINITY);
    for (i, c) in centroids.iter().enumerate() {
        let d = c.distance_squared(feature);
        if d < best.1 {
            best = (i, d);
        }
    }
    best.0
}

/// Clusters the features into `k` groups.
///
/// Seeding is deterministic: the first present feature, then repeatedly the
/// feature farthest from the chosen centroids (lowest index on ties).
/// Clusters losing all their members keep their centroid. Returns `None`
/// when no feature is present.
pub fn kmeans(features: &[Option<DVec3>], k: usize, iterations: usize) -> Option<Clustering> {
    let first = features.iter().flatten().next()?;
    let mut centroids = vec![*first];
    let mut distances: Vec<f64> = features
        .iter()
        .map(|f| f.map_or(f64::NEG_INFINITY, |f| f.distance_squared(*first)))
        .collect();
    while centroids.len() < k {
        let mut farthest = (0, f64::NEG_INFINITY);
        for (i, d) in distances.iter().enumerate() {
            if *d > farthest.1 {
                farthest = (i, *d);
            }
        }
        let Some(next) = features[farthest.0] else {
            break;
        };
        centroids.push(next);
        for (d, f) in distances.iter_mut().zip(features) {
            if let Some(f) = f {
                *d = d.min(f.distance_squared(next));
            }
        }
    }

    let mut assignments: Vec<Option<usize>> = features.iter().map(|f| f.map(|f| nearest(&centroids, f))).collect();
    for iteration in 0..iterations {
        let mut sums = vec![(DVec3::ZERO, 0usize); centroids.len()];
        for (f, a) in features.iter().zip(&assignments) {
            if let (Some(f), Some(a)) = (f, a) {
                sums[*a].0 += *f;
                sums[*a].1 += 1;
            }
        }
        for (c, (sum, count)) in centroids.iter_mut().zip(&sums) {
            if *count > 0 {
                *c = *sum / *count as f64;
            }
        }
        let updated: Vec<Option<usize>> = features.iter().map(|f| f.map(|f| nearest(&centroids, f))).collect();
        if updated == assignments {
            log::trace!("k-means converged after {} iterations", iteration + 1);
            break;
        }
        assignments = updated;
    }
    Some(Clustering {
        centroids,
        assignments,
    })
}

/// Lambertian albedo that best explains the samples of a texel, if any.
pub fn lambertian_estimate(
    texel: usize,
    frames: &[ObservationFrame],
    resources: &SpecularFitResources,
) -> Option<DVec3> {
    let normal = resources.normal(texel);
    let (numerator, denominator) = frames
        .iter()
        .filter_map(|frame| ReflectanceData::derive(frame.texel(texel), normal, resources.params()))
        .fold((DVec3::ZERO, 0.0), |(n, d), data| {
            let g = data.shading.n_dot_l / std::f64::consts::PI;
            (n + data.color * (data.weight * g), d + data.weight * g * g)
        });
    (denominator > 0.0).then(|| numerator / denominator)
}

/// Seeds the solution by clustering the texels on their Lambertian albedo:
/// every texel is assigned entirely to the basis of its cluster, and the
/// diffuse albedo of each basis starts at its centroid.
#[derive(Debug, Clone, Copy)]
pub struct KMeansInitialization {
    block_rows: u32,
    iterations: usize,
}

impl KMeansInitialization {
    pub fn new(block_rows: u32, iterations: usize) -> Self { Self { block_rows, iterations } }

    pub fn initialize<P: ProjectionPass>(
        &self,
        pass: &P,
        resources: &SpecularFitResources,
        solution: &mut SpecularFitSolution,
    ) -> Result<(), FitError> {
        let width = pass.width() as usize;
        let mut features = Vec::with_capacity(solution.texel_count());
        for rows in row_blocks(pass.height(), self.block_rows) {
            let frames = pass.render_all(rows.clone())?;
            let texels = rows.start as usize * width..rows.end as usize * width;
            features.par_extend(texels.into_par_iter().map(|p| lambertian_estimate(p, &frames, resources)));
        }

        let clustering = kmeans(&features, solution.basis_count(), self.iterations).ok_or_else(|| {
            FitError::new(
                FitErrorKind::NoValidSamples,
                "No texel is seen by any view, nothing to fit",
                None,
            )
        })?;
        for (p, assignment) in clustering.assignments.iter().enumerate() {
            let weights = solution.weights_mut(p);
            weights.fill(0.0);
            if let Some(b) = assignment {
                weights[*b] = 1.0;
            }
            solution.set_valid(p, assignment.is_some());
        }
        for (b, centroid) in clustering.centroids.iter().enumerate() {
            solution.set_albedo(b, centroid.max(DVec3::ZERO));
        }
        log::info!(
            "Initialised {} clusters over {} observed texels",
            clustering.centroids.len(),
            solution.valid_count()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflectance::ModelParams;
    use approx::assert_relative_eq;
    use base::math::Vec3;
    use ibr::{RecordedProjectionPass, TexelObservation};

    #[test]
    fn seeding_picks_farthest_points() {
        let features = vec![
            None,
            Some(DVec3::ZERO),
            Some(DVec3::new(0.1, 0.0, 0.0)),
            Some(DVec3::ONE),
            Some(DVec3::new(0.9, 1.0, 1.0)),
        ];
        let clustering = kmeans(&features, 2, 0).unwrap();
        assert_eq!(clustering.centroids, vec![DVec3::ZERO, DVec3::ONE]);
        assert_eq!(clustering.assignments, vec![None, Some(0), Some(0), Some(1), Some(1)]);

        let clustering = kmeans(&features, 2, 8).unwrap();
        assert_relative_eq!(clustering.centroids[0], DVec3::new(0.05, 0.0, 0.0));
        assert_relative_eq!(clustering.centroids[1], DVec3::new(0.95, 1.0, 1.0));
    }

    #[test]
    fn more_clusters_than_distinct_features() {
        let features = vec![Some(DVec3::ONE); 3];
        let clustering = kmeans(&features, 3, 4).unwrap();
        assert_eq!(clustering.centroids, vec![DVec3::ONE; 3]);
        assert!(clustering.assignments.iter().all(|a| *a == Some(0)));
    }

    #[test]
    fn no_features() {
        assert!(kmeans(&[None, None], 2, 4).is_none());
    }

    #[test]
    fn initialization_assigns_one_basis_per_texel() {
        let red = Vec3::new(0.8, 0.1, 0.1);
        let blue = Vec3::new(0.1, 0.1, 0.8);
        let l = Vec3::new(0.2, 0.0, 1.0).normalize();
        let obs = |albedo: Vec3| TexelObservation {
            radiance: albedo * l.z / std::f32::consts::PI,
            light_dir: l,
            view_dir: Vec3::Z,
            weight: 1.0,
        };
        let pass = RecordedProjectionPass::new(3, 1, vec![vec![obs(red), TexelObservation::default(), obs(blue)]])
            .unwrap();
        let resources = SpecularFitResources::with_size(3, 1, 2, ModelParams::new(0.0, 4));
        let mut solution = SpecularFitSolution::with_size(3, 1, 2, 4);
        KMeansInitialization::new(1, 4)
            .initialize(&pass, &resources, &mut solution)
            .unwrap();
        assert_eq!(solution.weights(0), &[1.0, 0.0]);
        assert_eq!(solution.weights(1), &[0.0, 0.0]);
        assert_eq!(solution.weights(2), &[0.0, 1.0]);
        assert_eq!(solution.valid_flags(), &[true, false, true]);
        assert_relative_eq!(solution.albedo(0), red.as_dvec3(), epsilon = 1e-6);
        assert_relative_eq!(solution.albedo(1), blue.as_dvec3(), epsilon = 1e-6);
    }

    #[test]
    fn unseen_surfaces_cannot_be_initialised() {
        let pass = RecordedProjectionPass::new(2, 1, vec![vec![TexelObservation::default(); 2]]).unwrap();
        let resources = SpecularFitResources::with_size(2, 1, 1, ModelParams::new(0.0, 4));
        let mut solution = SpecularFitSolution::with_size(2, 1, 1, 4);
        let err = KMeansInitialization::new(1, 4)
            .initialize(&pass, &resources, &mut solution)
            .unwrap_err();
        assert_eq!(err.kind(), FitErrorKind::NoValidSamples);
    }
}
