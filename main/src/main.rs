use accel::{
    Bvh2, BvhParams, Curve, CurveSet, Geometry, GeometryData, Mesh, Object, PointCloud, Progress,
};
use anyhow::Result;
use clap::Parser;
use geometry::{Transform, Vec3};
use indicatif::{ProgressBar, ProgressStyle};
use rand::{rngs::StdRng, Rng, SeedableRng};

#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Number of triangle meshes to generate
    #[clap(long, value_parser, default_value_t = 16)]
    meshes: usize,

    /// Triangles per generated mesh
    #[clap(long, value_parser, default_value_t = 2048)]
    triangles: usize,

    /// Curve segments in the generated curve set
    #[clap(long, value_parser, default_value_t = 1024)]
    curve_segments: usize,

    /// Points in the generated point cloud
    #[clap(long, value_parser, default_value_t = 4096)]
    points: usize,

    /// Extra instances of the first mesh, sharing its packed structure
    #[clap(long, value_parser, default_value_t = 4)]
    instances: usize,

    /// Allow splitting primitives that straddle a split plane
    #[clap(long)]
    spatial_split: bool,

    /// Maximum primitives per leaf for triangles and points
    #[clap(long, value_parser, default_value_t = 8)]
    max_leaf_size: usize,

    /// Worker threads, 0 uses every core
    #[clap(short, long, value_parser, default_value_t = 0)]
    threads: usize,

    /// Seed for the generated scene
    #[clap(long, value_parser, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.threads != 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()?;
    }

    let mut rng = StdRng::seed_from_u64(args.seed);
    let (mut geometries, objects) = generate_scene(&args, &mut rng);

    let params = BvhParams {
        use_spatial_split: args.spatial_split,
        max_triangle_leaf_size: args.max_leaf_size,
        max_point_leaf_size: args.max_leaf_size,
        ..BvhParams::default()
    };

    let bar = ProgressBar::new(geometries.len() as u64 + 1);
    bar.set_style(ProgressStyle::with_template(
        "{bar:40} {pos}/{len} {msg}",
    )?);

    // bottom level structures, one per instanced geometry
    for index in 0..geometries.len() {
        if geometries[index].need_build_bvh() {
            let progress = Progress::new();
            let mut bvh = Bvh2::new(params.clone());
            bvh.build(&[Object::new(index)], &geometries, &progress);
            bar.set_message(progress.substatus());
            geometries[index].bvh = Some(bvh);
        }
        bar.inc(1);
    }

    // top level structure over the object instances
    let progress = Progress::new();
    let top_params = BvhParams {
        top_level: true,
        ..params
    };
    let mut top = Bvh2::new(top_params);
    top.build(&objects, &geometries, &progress);
    bar.set_message(progress.substatus());
    bar.inc(1);
    bar.finish_and_clear();

    for (index, geom) in geometries.iter().enumerate() {
        if let Some(bvh) = &geom.bvh {
            println!(
                "geometry {index}: {} primitives, {} node words, {} leaves",
                geom.num_primitives(),
                bvh.pack.nodes.len(),
                bvh.pack.leaf_nodes.len(),
            );
        }
    }
    println!(
        "top level: {} objects, {} packed primitives, {} node words, {} leaves, root {}",
        top.pack.object_node.len(),
        top.pack.prim_index.len(),
        top.pack.nodes.len(),
        top.pack.leaf_nodes.len(),
        top.pack.root_index,
    );

    Ok(())
}

/// A scene of jittered triangle meshes, one curve set, one world space
/// point cloud, and a few extra instances of the first mesh
fn generate_scene(args: &Args, rng: &mut StdRng) -> (Vec<Geometry>, Vec<Object>) {
    let mut geometries = Vec::new();
    let mut objects = Vec::new();

    for _ in 0..args.meshes {
        let mesh = random_mesh(rng, args.triangles, 4.0);
        geometries.push(Geometry::new(GeometryData::Mesh(mesh)));
    }

    let curves = random_curves(rng, args.curve_segments, 6.0);
    geometries.push(Geometry::new(GeometryData::Curves(curves)));

    // the point cloud is generated in world space and flattened straight
    // into the top level
    let points = random_points(rng, args.points, 10.0);
    let mut point_geom = Geometry::new(GeometryData::Points(points));
    point_geom.transform_applied = true;
    geometries.push(point_geom);

    let mut offset = 0;
    for geom in &mut geometries {
        geom.prim_offset = offset;
        offset += geom.num_primitives();
    }

    for index in 0..geometries.len() {
        let mut object = Object::new(index);
        if !geometries[index].transform_applied {
            object.tfm = Transform::translation(random_vec(rng, 20.0));
        }
        objects.push(object);
    }

    // instances of the first mesh share its bottom level structure
    for _ in 0..args.instances {
        let mut object = Object::new(0);
        object.tfm = Transform::translation(random_vec(rng, 20.0));
        objects.push(object);
    }

    (geometries, objects)
}

fn random_vec(rng: &mut StdRng, extent: f32) -> Vec3 {
    Vec3::new(
        rng.gen_range(-extent..extent),
        rng.gen_range(-extent..extent),
        rng.gen_range(-extent..extent),
    )
}

fn random_mesh(rng: &mut StdRng, triangles: usize, extent: f32) -> Mesh {
    let mut verts = Vec::with_capacity(triangles * 3);
    let mut indices = Vec::with_capacity(triangles);

    for i in 0..triangles {
        let base = random_vec(rng, extent);
        verts.push(base);
        verts.push(base + random_vec(rng, 0.2));
        verts.push(base + random_vec(rng, 0.2));
        let v = (i * 3) as u32;
        indices.push([v, v + 1, v + 2]);
    }

    Mesh::new(verts, indices)
}

fn random_curves(rng: &mut StdRng, segments: usize, extent: f32) -> CurveSet {
    const SEGMENTS_PER_CURVE: usize = 8;

    let mut keys = Vec::new();
    let mut radius = Vec::new();
    let mut curves = Vec::new();

    let mut remaining = segments;
    while remaining > 0 {
        let count = remaining.min(SEGMENTS_PER_CURVE);
        let first_key = keys.len();

        let mut key = random_vec(rng, extent);
        for _ in 0..count + 1 {
            keys.push(key);
            radius.push(rng.gen_range(0.01..0.05_f32));
            key += random_vec(rng, 0.3);
        }
        curves.push(Curve {
            first_key,
            num_keys: count + 1,
        });

        remaining -= count;
    }

    CurveSet::new(keys, radius, curves)
}

fn random_points(rng: &mut StdRng, count: usize, extent: f32) -> PointCloud {
    let mut points = Vec::with_capacity(count);
    let mut radius = Vec::with_capacity(count);
    for _ in 0..count {
        points.push(random_vec(rng, extent));
        radius.push(rng.gen_range(0.01..0.1_f32));
    }
    PointCloud::new(points, radius)
}
