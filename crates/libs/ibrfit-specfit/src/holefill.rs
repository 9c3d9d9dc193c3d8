//! Filling of invalid texels from their valid neighbours.

/// Fills invalid texels of a `width × height` map of `channels` values per
/// texel with the average of their valid 4-neighbours, growing the valid
/// region by one ring per pass until the map is full or nothing changes.
///
/// Returns the number of passes that filled at least one texel. A map
/// without valid texels, or without holes, is left untouched.
pub fn fill_holes(width: u32, height: u32, channels: usize, values: &mut [f64], valid: &mut [bool]) -> usize {
    let (w, h) = (width as usize, height as usize);
    debug_assert_eq!(valid.len(), w * h);
    debug_assert_eq!(values.len(), w * h * channels);

    let mut passes = 0;
    let mut next_values = values.to_vec();
    let mut next_valid = valid.to_vec();
    // Every pass grows the valid region by one ring, so a single valid
    // corner texel needs the most passes: `w + h - 2`.
    loop {
        let mut filled = 0usize;
        for y in 0..h {
            for x in 0..w {
                let p = y * w + x;
                if valid[p] {
                    continue;
                }
                let neighbours = [
                    (x > 0).then(|| p - 1),
                    (x + 1 < w).then(|| p + 1),
                    (y > 0).then(|| p - w),
                    (y + 1 < h).then(|| p + w),
                ];
                let sources: Vec<usize> = neighbours.into_iter().flatten().filter(|q| valid[*q]).collect();
                if sources.is_empty() {
                    continue;
                }
                let scale = 1.0 / sources.len() as f64;
                for c in 0..channels {
                    next_values[p * channels + c] = sources.iter().map(|q| values[q * channels + c]).sum::<f64>() * scale;
                }
                next_valid[p] = true;
                filled += 1;
            }
        }
        if filled == 0 {
            break;
        }
        values.copy_from_slice(&next_values);
        valid.copy_from_slice(&next_valid);
        passes += 1;
    }
    if passes > 0 {
        log::debug!("Hole filling: {} passes", passes);
    }
    passes
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn holes_take_the_average_of_their_neighbours() {
        // 3x1: valid, hole, valid
        let mut values = vec![1.0, 10.0, 0.0, 0.0, 3.0, 30.0];
        let mut valid = vec![true, false, true];
        assert_eq!(fill_holes(3, 1, 2, &mut values, &mut valid), 1);
        assert_eq!(&values[2..4], &[2.0, 20.0]);
        assert!(valid.iter().all(|v| *v));
    }

    #[test]
    fn holes_grow_inwards() {
        let mut values = vec![0.0; 5];
        values[0] = 4.0;
        let mut valid = vec![true, false, false, false, false];
        assert_eq!(fill_holes(5, 1, 1, &mut values, &mut valid), 4);
        assert_eq!(values, vec![4.0; 5]);
    }

    #[test]
    fn corner_seed_needs_the_longest_walk() {
        let mut values = vec![0.0; 15];
        let mut valid = vec![false; 15];
        values[0] = 1.0;
        valid[0] = true;
        assert_eq!(fill_holes(5, 3, 1, &mut values, &mut valid), 5 + 3 - 2);
        assert!(valid.iter().all(|v| *v));
        assert_eq!(values, vec![1.0; 15]);
    }

    #[test]
    fn empty_maps_are_untouched() {
        let mut values = vec![0.5; 4];
        let mut valid = vec![false; 4];
        assert_eq!(fill_holes(2, 2, 1, &mut values, &mut valid), 0);
        assert_eq!(values, vec![0.5; 4]);
        assert!(valid.iter().all(|v| !*v));
    }

    proptest! {
        #[test]
        fn filling_is_idempotent(
            seed in proptest::collection::vec((0.0f64..1.0, any::<bool>()), 12),
        ) {
            let (mut values, mut valid): (Vec<f64>, Vec<bool>) = seed.into_iter().unzip();
            fill_holes(4, 3, 1, &mut values, &mut valid);
            let (before, flags) = (values.clone(), valid.clone());
            prop_assert_eq!(fill_holes(4, 3, 1, &mut values, &mut valid), 0);
            prop_assert_eq!(values, before);
            prop_assert_eq!(valid, flags);
        }
    }
}
