mod binning;
mod build;
mod node;
mod pack;
mod params;
mod progress;
mod reference;
mod scene;
mod sort;
mod split;
mod unaligned;

#[cfg(test)]
mod tests;

pub use binning::ObjectBinning;
pub use build::{BuildOutput, BvhBuild};
pub use node::{BuildNode, InnerNode, LeafNode};
pub use pack::{
    Bvh2, PackedBvh, BVH_NODE_LEAF_SIZE, BVH_NODE_SIZE, BVH_UNALIGNED_NODE_SIZE,
    VISIBILITY_NODE_UNALIGNED,
};
pub use params::{
    pack_segment, unpack_segment, BvhParams, PRIMITIVE_ALL, PRIMITIVE_CURVE, PRIMITIVE_MOTION,
    PRIMITIVE_NONE, PRIMITIVE_POINT, PRIMITIVE_TRIANGLE, VISIBILITY_ALL,
};
pub use progress::Progress;
pub use reference::{Range, Reference};
pub use scene::{Curve, CurveSet, Geometry, GeometryData, Mesh, Object, PointCloud};
pub use unaligned::UnalignedHeuristic;
