use geometry::{safe_divide, BoundBox, Transform, Vec3};

use crate::{
    reference::{Range, Reference},
    unaligned::UnalignedHeuristic,
};

/// Upper bound on the number of bins per axis
pub const MAX_BINS: usize = 32;

/// The cost model counts primitives in blocks of four, the width of the
/// packet intersection the traversal kernels run
fn blocks(count: usize) -> f32 {
    ((count + 3) >> 2) as f32
}

/// Approximate O(n) object split evaluator.  Buckets each reference's
/// centroid into a fixed number of bins per axis, then finds the minimum
/// SAH partition with one suffix and one prefix sweep instead of a sort.
#[derive(Debug, Clone, Copy)]
pub struct ObjectBinning {
    /// The evaluated window, with world space bounds cached
    pub range: Range,

    /// Bounds of the range in the evaluation space
    pub bounds: BoundBox,

    /// Axis of the best split found
    pub dim: usize,

    /// Bin index of the best split, references in bins below it go left.
    /// -1 when no feasible split exists.
    pub pos: i32,

    /// Cost of the best split, without the node traversal term
    pub split_sah: f32,

    /// Cost of turning the whole range into one leaf
    pub leaf_sah: f32,

    num_bins: usize,
    cent_min: Vec3,
    scale: Vec3,
}

fn bin_for(center2: Vec3, cent_min: Vec3, scale: Vec3, num_bins: usize, axis: usize) -> i32 {
    let raw = ((center2[axis] - cent_min[axis]) * scale[axis]) as i32;
    raw.clamp(0, num_bins as i32 - 1)
}

impl ObjectBinning {
    /// Evaluate a range in world space, using the bounds cached on it
    pub fn new(range: Range, refs: &[Reference]) -> Self {
        Self::build(range, refs, range.bounds(), range.cent_bounds(), None)
    }

    /// Evaluate a range projected into an orientation space
    pub fn new_in_space(
        range: Range,
        refs: &[Reference],
        heuristic: &UnalignedHeuristic<'_>,
        space: &Transform,
    ) -> Self {
        let mut cent_bounds = BoundBox::EMPTY;
        let bounds =
            heuristic.compute_aligned_bounds(range, refs, space, Some(&mut cent_bounds));
        Self::build(range, refs, bounds, cent_bounds, Some((heuristic, space)))
    }

    fn build(
        range: Range,
        refs: &[Reference],
        bounds: BoundBox,
        cent_bounds: BoundBox,
        unaligned: Option<(&UnalignedHeuristic<'_>, &Transform)>,
    ) -> Self {
        let size = range.size();

        // bin count adapts to the range size, capped at a constant maximum
        let num_bins = MAX_BINS.min((4.0 + 0.05 * size as f32) as usize);
        let cent_min = cent_bounds.min;
        let cent_size = cent_bounds.size();
        let scale = safe_divide(Vec3::splat(num_bins as f32), cent_size);

        // map references to bins, accumulating count and bounds per bin
        let mut bin_count = [[0_usize; 3]; MAX_BINS];
        let mut bin_bounds = [[BoundBox::EMPTY; 3]; MAX_BINS];

        for reference in &refs[range.start()..range.end()] {
            let prim_bounds = match unaligned {
                Some((heuristic, space)) => {
                    heuristic.compute_aligned_prim_bounds(reference, space)
                }
                None => reference.bounds(),
            };
            let center2 = prim_bounds.center2();
            for axis in 0..3 {
                let bin = bin_for(center2, cent_min, scale, num_bins, axis) as usize;
                bin_count[bin][axis] += 1;
                bin_bounds[bin][axis].grow_box(prim_bounds);
            }
        }

        // sweep from right to left, recording suffix area and count
        let mut r_area = [[0.0_f32; 3]; MAX_BINS];
        let mut r_count = [[0.0_f32; 3]; MAX_BINS];
        for axis in 0..3 {
            let mut suffix = BoundBox::EMPTY;
            let mut count = 0;
            for i in (1..num_bins).rev() {
                count += bin_count[i][axis];
                suffix.grow_box(bin_bounds[i][axis]);
                r_area[i][axis] = suffix.half_area();
                r_count[i][axis] = blocks(count);
            }
        }

        // sweep from left to right and keep the cheapest split per axis
        let mut best_sah = [f32::MAX; 3];
        let mut best_pos = [-1_i32; 3];
        for axis in 0..3 {
            let mut prefix = BoundBox::EMPTY;
            let mut count = 0;
            for i in 1..num_bins {
                count += bin_count[i - 1][axis];
                prefix.grow_box(bin_bounds[i - 1][axis]);
                let sah =
                    prefix.half_area() * blocks(count) + r_area[i][axis] * r_count[i][axis];
                if sah < best_sah[axis] {
                    best_sah[axis] = sah;
                    best_pos[axis] = i as i32;
                }
            }

            // a zero width axis can never be chosen
            if cent_size[axis] <= 0.0 {
                best_sah[axis] = f32::MAX;
            }
        }

        // first axis in x, y, z order wins exact ties
        let mut dim = 0;
        for axis in 1..3 {
            if best_sah[axis] < best_sah[dim] {
                dim = axis;
            }
        }

        Self {
            range,
            bounds,
            dim,
            pos: best_pos[dim],
            split_sah: best_sah[dim],
            leaf_sah: bounds.half_area() * blocks(size),
            num_bins,
            cent_min,
            scale,
        }
    }

    /// Partition the range in place around the chosen bin.  Child ranges
    /// carry world space geometry and centroid bounds for their own binning.
    /// Falls back to a median split by index when the bin partition makes no
    /// progress, which happens when all primitives share one centroid.
    pub fn split(
        &self,
        refs: &mut [Reference],
        unaligned: Option<(&UnalignedHeuristic<'_>, &Transform)>,
    ) -> (Range, Range) {
        let start = self.range.start();
        let size = self.range.size();

        let mut lgeom = BoundBox::EMPTY;
        let mut rgeom = BoundBox::EMPTY;
        let mut lcent = BoundBox::EMPTY;
        let mut rcent = BoundBox::EMPTY;

        let mut left = 0_usize;
        let mut right = size as isize - 1;

        while (left as isize) <= right {
            let prim = refs[start + left];
            let eval_center2 = match unaligned {
                Some((heuristic, space)) => {
                    heuristic.compute_aligned_prim_bounds(&prim, space).center2()
                }
                None => prim.bounds().center2(),
            };
            let center2 = prim.bounds().center2();

            if bin_for(eval_center2, self.cent_min, self.scale, self.num_bins, self.dim)
                < self.pos
            {
                lgeom.grow_box(prim.bounds());
                lcent.grow(center2);
                left += 1;
            } else {
                rgeom.grow_box(prim.bounds());
                rcent.grow(center2);
                refs.swap(start + left, start + right as usize);
                right -= 1;
            }
        }

        if left != 0 && left != size {
            return (
                Range::with_centroids(lgeom, lcent, start, left),
                Range::with_centroids(rgeom, rcent, start + left, size - left),
            );
        }

        // object median split when binning made no progress
        let mid = size / 2;
        lgeom = BoundBox::EMPTY;
        rgeom = BoundBox::EMPTY;
        lcent = BoundBox::EMPTY;
        rcent = BoundBox::EMPTY;
        for reference in &refs[start..start + mid] {
            lgeom.grow_box(reference.bounds());
            lcent.grow(reference.bounds().center2());
        }
        for reference in &refs[start + mid..start + size] {
            rgeom.grow_box(reference.bounds());
            rcent.grow(reference.bounds().center2());
        }

        (
            Range::with_centroids(lgeom, lcent, start, mid),
            Range::with_centroids(rgeom, rcent, start + mid, size - mid),
        )
    }
}
