//! Sqrt-weighted token budget allocation across flow units.
//!
//! A capture decomposes into flows of wildly different sizes: a handful of
//! giant TLS transfers next to dozens of short DNS exchanges. Allocating a
//! shared analysis budget proportionally to raw size starves the small flows;
//! allocating equally wastes budget on flows that don't need it. Square-root
//! weighting sits between the two — large flows still get more, but
//! sub-linearly, so small flows keep a usable floor.
//!
//! The allocator guarantees, for `allocate(sizes, budget)`:
//! - `out[i] <= sizes[i]` for every unit,
//! - `sum(out) <= budget`,
//! - when `sum(sizes) <= budget`, `out == sizes` (no unit is cut when
//!   everything fits).

const REDISTRIBUTION_EPSILON: f64 = 1e-9;

/// Allocate `budget` tokens across units of the given sizes.
///
/// Weights are the square roots of the sizes. After the initial proportional
/// pass, any leftover created by per-unit caps is redistributed iteratively
/// among units still under their own size, weighted by the square root of
/// their remaining headroom, until the leftover is at most one token or no
/// unit can absorb more.
pub fn allocate(sizes: &[usize], budget: usize) -> Vec<usize> {
    if sizes.is_empty() {
        return Vec::new();
    }
    if budget == 0 {
        return vec![0; sizes.len()];
    }

    let total: usize = sizes.iter().sum();
    if total <= budget {
        return sizes.to_vec();
    }

    let weights: Vec<f64> = sizes.iter().map(|&s| (s as f64).sqrt()).collect();
    let weight_sum: f64 = weights.iter().sum();
    if weight_sum <= REDISTRIBUTION_EPSILON {
        return vec![0; sizes.len()];
    }

    // Initial proportional pass, capped at each unit's own size.
    let budget_f = budget as f64;
    let mut alloc: Vec<f64> = sizes
        .iter()
        .zip(&weights)
        .map(|(&size, &w)| (budget_f * w / weight_sum).min(size as f64))
        .collect();

    // Redistribute what the caps left on the table.
    let mut leftover = budget_f - alloc.iter().sum::<f64>();
    while leftover > 1.0 {
        let headroom_weights: Vec<f64> = sizes
            .iter()
            .zip(&alloc)
            .map(|(&size, &a)| {
                let headroom = size as f64 - a;
                if headroom > 0.0 { headroom.sqrt() } else { 0.0 }
            })
            .collect();
        let headroom_sum: f64 = headroom_weights.iter().sum();
        if headroom_sum <= REDISTRIBUTION_EPSILON {
            break;
        }

        let mut distributed = 0.0;
        for (i, &hw) in headroom_weights.iter().enumerate() {
            if hw <= 0.0 {
                continue;
            }
            let headroom = sizes[i] as f64 - alloc[i];
            let add = (leftover * hw / headroom_sum).min(headroom);
            alloc[i] += add;
            distributed += add;
        }
        leftover -= distributed;
        if distributed < REDISTRIBUTION_EPSILON {
            break;
        }
    }

    // Round to nearest, then repair so neither invariant is violated.
    let mut out: Vec<usize> = alloc
        .iter()
        .zip(sizes)
        .map(|(&a, &size)| (a.round() as usize).min(size))
        .collect();
    let mut sum: usize = out.iter().sum();
    while sum > budget {
        if let Some(max_idx) = (0..out.len()).max_by_key(|&i| out[i]) {
            if out[max_idx] == 0 {
                break;
            }
            out[max_idx] -= 1;
            sum -= 1;
        } else {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_invariants(sizes: &[usize], budget: usize) -> Vec<usize> {
        let out = allocate(sizes, budget);
        assert_eq!(out.len(), sizes.len());
        for (a, s) in out.iter().zip(sizes) {
            assert!(a <= s, "allocation {a} exceeds unit size {s}");
        }
        assert!(
            out.iter().sum::<usize>() <= budget,
            "total allocation exceeds budget {budget}: {out:?}"
        );
        out
    }

    #[test]
    fn zero_budget_allocates_nothing() {
        assert_eq!(allocate(&[10, 20, 30], 0), vec![0, 0, 0]);
    }

    #[test]
    fn everything_fits_identity() {
        assert_eq!(allocate(&[10, 20, 30], 60), vec![10, 20, 30]);
        assert_eq!(allocate(&[10, 20, 30], 1000), vec![10, 20, 30]);
    }

    #[test]
    fn sqrt_weighting_under_pressure() {
        // Three flows at less than a quarter of demand: the small flow keeps
        // a usable floor instead of being starved by proportional split.
        let out = check_invariants(&[10, 20, 30], 15);
        assert_eq!(out, vec![4, 5, 6]);
        assert_eq!(out.iter().sum::<usize>(), 15);
    }

    #[test]
    fn caps_trigger_redistribution() {
        // One tiny unit caps out immediately; its share flows to the others.
        let out = check_invariants(&[2, 1000, 1000], 500);
        assert_eq!(out[0], 2);
        assert!(out[1] + out[2] >= 490, "leftover must be redistributed");
    }

    #[test]
    fn excluded_units_get_zero() {
        // Excluded flows are passed in with size zero.
        let out = check_invariants(&[0, 50, 0, 50], 40);
        assert_eq!(out[0], 0);
        assert_eq!(out[2], 0);
        assert!(out[1] > 0 && out[3] > 0);
    }

    #[test]
    fn empty_and_all_zero_inputs() {
        assert!(allocate(&[], 100).is_empty());
        assert_eq!(allocate(&[0, 0], 100), vec![0, 0]);
    }

    #[test]
    fn single_unit_takes_min_of_size_and_budget() {
        assert_eq!(allocate(&[500], 100), vec![100]);
        assert_eq!(allocate(&[50], 100), vec![50]);
    }

    #[test]
    fn rounding_never_breaks_budget() {
        for budget in [1, 3, 7, 17, 97, 255] {
            check_invariants(&[13, 91, 7, 200, 1], budget);
        }
    }
}
