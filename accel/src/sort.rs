use std::cmp::Ordering;

use geometry::{BoundBox, Transform};

use crate::{reference::Reference, unaligned::UnalignedHeuristic};

/// Below this many references it is faster to finish the sort on one thread
/// than to fork more tasks
const SORT_THRESHOLD: usize = 4096;

/// Comparison of two references along one axis, optionally in a projected
/// orientation space.  Ties fall through to the primitive identity so the
/// order is total and deterministic.
pub(crate) struct ReferenceCompare<'a> {
    dim: usize,
    unaligned: Option<(&'a UnalignedHeuristic<'a>, &'a Transform)>,
}

impl<'a> ReferenceCompare<'a> {
    pub fn new(
        dim: usize,
        unaligned: Option<(&'a UnalignedHeuristic<'a>, &'a Transform)>,
    ) -> Self {
        Self { dim, unaligned }
    }

    fn prim_bounds(&self, reference: &Reference) -> BoundBox {
        match self.unaligned {
            Some((heuristic, space)) => heuristic.compute_aligned_prim_bounds(reference, space),
            None => reference.bounds(),
        }
    }

    fn compare(&self, a: &Reference, b: &Reference) -> Ordering {
        let bounds_a = self.prim_bounds(a);
        let bounds_b = self.prim_bounds(b);
        let center_a = bounds_a.min[self.dim] + bounds_a.max[self.dim];
        let center_b = bounds_b.min[self.dim] + bounds_b.max[self.dim];

        center_a
            .partial_cmp(&center_b)
            .unwrap_or(Ordering::Equal)
            .then(a.prim_object().cmp(&b.prim_object()))
            .then(a.prim_index().cmp(&b.prim_index()))
            .then(a.prim_type().cmp(&b.prim_type()))
    }
}

/// Sort a reference sub-range by centroid along one axis.  Large ranges run
/// a median-of-three quicksort whose partitions recurse in parallel.
pub(crate) fn sort_references(
    refs: &mut [Reference],
    dim: usize,
    unaligned: Option<(&UnalignedHeuristic<'_>, &Transform)>,
) {
    let compare = ReferenceCompare::new(dim, unaligned);
    sort_range(refs, &compare);
}

fn sort_range(refs: &mut [Reference], compare: &ReferenceCompare<'_>) {
    if refs.len() < SORT_THRESHOLD {
        refs.sort_unstable_by(|a, b| compare.compare(a, b));
        return;
    }

    // single quicksort step with a median-of-three pivot
    let last = refs.len() - 1;
    let center = refs.len() / 2;
    if compare.compare(&refs[0], &refs[center]) == Ordering::Greater {
        refs.swap(0, center);
    }
    if compare.compare(&refs[0], &refs[last]) == Ordering::Greater {
        refs.swap(0, last);
    }
    if compare.compare(&refs[center], &refs[last]) == Ordering::Greater {
        refs.swap(center, last);
    }
    refs.swap(center, last - 1);
    let median = refs[last - 1];

    let mut left = 0_isize;
    let mut right = last as isize;
    loop {
        while compare.compare(&refs[left as usize], &median) == Ordering::Less {
            left += 1;
        }
        while compare.compare(&refs[right as usize], &median) == Ordering::Greater {
            right -= 1;
        }
        if left <= right {
            refs.swap(left as usize, right as usize);
            left += 1;
            right -= 1;
        }
        if left > right {
            break;
        }
    }

    let (lo, hi) = refs.split_at_mut(left as usize);
    let lo = &mut lo[..(right + 1).max(0) as usize];
    rayon::join(|| sort_range(lo, compare), || sort_range(hi, compare));
}
