use std::mem;

use geometry::{BoundBox, Transform};

/// One node of the transient build tree.  Implemented as a tagged variant
/// rather than trait objects since node counts are large; the tree is
/// exclusively owned by the build and discarded after packing.
#[derive(Debug)]
pub enum BuildNode {
    Inner(InnerNode),
    Leaf(LeafNode),
}

#[derive(Debug)]
pub struct InnerNode {
    pub bounds: BoundBox,
    pub children: [Box<BuildNode>; 2],
    pub visibility: u32,
    pub is_unaligned: bool,
    pub aligned_space: Option<Transform>,
}

/// Terminal node owning the packed primitive slots `lo..hi`
#[derive(Debug)]
pub struct LeafNode {
    pub bounds: BoundBox,
    pub lo: i32,
    pub hi: i32,
    pub visibility: u32,
    pub is_unaligned: bool,
    pub aligned_space: Option<Transform>,
}

impl LeafNode {
    pub fn num_prims(&self) -> i32 {
        self.hi - self.lo
    }
}

impl BuildNode {
    pub fn inner(bounds: BoundBox, c0: Box<Self>, c1: Box<Self>) -> Self {
        let visibility = c0.visibility() | c1.visibility();
        Self::Inner(InnerNode {
            bounds,
            children: [c0, c1],
            visibility,
            is_unaligned: false,
            aligned_space: None,
        })
    }

    pub fn leaf(bounds: BoundBox, visibility: u32, lo: i32, hi: i32) -> Self {
        Self::Leaf(LeafNode {
            bounds,
            lo,
            hi,
            visibility,
            is_unaligned: false,
            aligned_space: None,
        })
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }

    pub fn bounds(&self) -> BoundBox {
        match self {
            Self::Inner(node) => node.bounds,
            Self::Leaf(node) => node.bounds,
        }
    }

    pub fn visibility(&self) -> u32 {
        match self {
            Self::Inner(node) => node.visibility,
            Self::Leaf(node) => node.visibility,
        }
    }

    pub fn is_unaligned(&self) -> bool {
        match self {
            Self::Inner(node) => node.is_unaligned,
            Self::Leaf(node) => node.is_unaligned,
        }
    }

    /// Mark the node as expressed in the given orientation frame
    pub fn set_aligned_space(&mut self, space: Transform) {
        match self {
            Self::Inner(node) => {
                node.is_unaligned = true;
                node.aligned_space = Some(space);
            }
            Self::Leaf(node) => {
                node.is_unaligned = true;
                node.aligned_space = Some(space);
            }
        }
    }

    pub fn aligned_space(&self) -> Transform {
        match self {
            Self::Inner(node) => node.aligned_space.unwrap_or(Transform::IDENTITY),
            Self::Leaf(node) => node.aligned_space.unwrap_or(Transform::IDENTITY),
        }
    }

    /// Does this node pack in the wide layout, which is the case when
    /// either direct child carries an orientation frame
    pub fn has_unaligned(&self) -> bool {
        match self {
            Self::Inner(node) => {
                node.children[0].is_unaligned() || node.children[1].is_unaligned()
            }
            Self::Leaf(_) => false,
        }
    }

    /// Total node count of the subtree
    pub fn num_nodes(&self) -> usize {
        match self {
            Self::Inner(node) => {
                1 + node.children[0].num_nodes() + node.children[1].num_nodes()
            }
            Self::Leaf(_) => 1,
        }
    }

    /// Leaf count of the subtree
    pub fn num_leaf_nodes(&self) -> usize {
        match self {
            Self::Inner(node) => {
                node.children[0].num_leaf_nodes() + node.children[1].num_leaf_nodes()
            }
            Self::Leaf(_) => 1,
        }
    }

    /// Inner nodes of the subtree that pack in the wide layout
    pub fn num_unaligned_inner(&self) -> usize {
        match self {
            Self::Inner(node) => {
                usize::from(self.has_unaligned())
                    + node.children[0].num_unaligned_inner()
                    + node.children[1].num_unaligned_inner()
            }
            Self::Leaf(_) => 0,
        }
    }

    /// Run bounded passes of local tree rotations over the finished
    /// topology, swapping a grandchild with its uncle where that shrinks
    /// the rotated child's box
    pub fn rotate(&mut self, max_depth: i32, iterations: usize) {
        for _ in 0..iterations {
            self.rotate_once(max_depth);
        }
    }

    fn rotate_once(&mut self, max_depth: i32) {
        let parent = match self {
            Self::Inner(node) => node,
            Self::Leaf(_) => return,
        };
        if max_depth < 0 {
            return;
        }

        // rotate all children first
        for child in &mut parent.children {
            child.rotate_once(max_depth - 1);
        }

        // swapping across differently oriented subtrees would invalidate
        // their spaces
        if parent.is_unaligned
            || parent.children[0].is_unaligned()
            || parent.children[1].is_unaligned()
        {
            return;
        }

        // pick a grandchild and swap it with the other child, keeping the
        // swap that shrinks the rotated child's box the most
        let mut best_cost = 0.0_f32;
        let mut best: Option<(usize, usize)> = None;

        for c in 0..2 {
            let child = match parent.children[c].as_ref() {
                Self::Inner(child) => child,
                Self::Leaf(_) => continue,
            };
            let other_bounds = parent.children[1 - c].bounds();

            for target in 0..2 {
                let kept = child.children[1 - target].bounds();
                let cost = BoundBox::merge(other_bounds, kept).half_area()
                    - child.bounds.half_area();
                if cost < best_cost {
                    best_cost = cost;
                    best = Some((c, target));
                }
            }
        }

        let Some((best_child, best_target)) = best else {
            return;
        };

        let (head, tail) = parent.children.split_at_mut(1);
        let (other, child) = if best_child == 0 {
            (&mut tail[0], &mut head[0])
        } else {
            (&mut head[0], &mut tail[0])
        };
        let child = match child.as_mut() {
            Self::Inner(child) => child,
            Self::Leaf(_) => unreachable!("rotation target must be an inner node"),
        };

        mem::swap(other, &mut child.children[best_target]);
        child.bounds = BoundBox::merge(
            child.children[0].bounds(),
            child.children[1].bounds(),
        );
        child.visibility = child.children[0].visibility() | child.children[1].visibility();
    }
}
