//! Diagnostics output: region point clouds, intersection histograms and
//! graph exports.
//!
//! Sinks never fail from the caller's point of view. [`DirectorySink`] logs
//! write errors and carries on.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nalgebra::Point3;
use petgraph::dot::{Config, Dot};
use ply_rs::ply::{
    Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
    ScalarType,
};
use ply_rs::writer::Writer;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, warn};

use crate::kinematics::KinematicChain;
use crate::planning::IntersectionGraph;
use crate::region_file::RegionCollection;
use crate::{Error, Result};

pub type Rgba = [f64; 4];

/// Region colours, cycled by region index.
pub const PALETTE: [Rgba; 13] = [
    [0.5, 0.0, 0.0, 0.5],
    [0.0, 0.5, 0.0, 0.5],
    [0.0, 0.0, 0.5, 0.5],
    [0.5, 0.5, 0.0, 0.5],
    [0.5, 0.0, 0.5, 0.5],
    [0.0, 0.5, 0.5, 0.5],
    [0.2, 0.2, 0.2, 0.5],
    [0.5, 0.2, 0.0, 0.5],
    [0.2, 0.5, 0.0, 0.5],
    [0.5, 0.0, 0.2, 0.5],
    [0.2, 0.0, 0.5, 0.5],
    [0.0, 0.5, 0.2, 0.5],
    [0.0, 0.2, 0.5, 0.5],
];

pub const DEFAULT_POINT_SIZE: f64 = 0.025;

pub trait VisualizationSink {
    fn set_point_cloud(&mut self, path: &str, cloud: &[Point3<f64>], point_size: f64, rgba: Rgba);
    fn set_text(&mut self, path: &str, text: &str);
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointCloudRecord {
    pub points: Vec<Point3<f64>>,
    pub point_size: f64,
    pub rgba: Rgba,
}

/// Keeps everything in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub point_clouds: BTreeMap<String, PointCloudRecord>,
    pub texts: BTreeMap<String, String>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VisualizationSink for RecordingSink {
    fn set_point_cloud(&mut self, path: &str, cloud: &[Point3<f64>], point_size: f64, rgba: Rgba) {
        self.point_clouds.insert(
            path.to_string(),
            PointCloudRecord {
                points: cloud.to_vec(),
                point_size,
                rgba,
            },
        );
    }

    fn set_text(&mut self, path: &str, text: &str) {
        self.texts.insert(path.to_string(), text.to_string());
    }
}

/// Writes point clouds as ASCII PLY and text as plain files under a root
/// directory. Path separators in object paths become subdirectories.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File for an object path, with spaces and other odd characters replaced.
    pub fn file_path(&self, path: &str, extension: &str) -> PathBuf {
        let mut file = self.root.clone();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            let part: String = part
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
                .collect();
            file.push(part);
        }
        file.set_extension(extension);
        file
    }

    fn write(&self, file: &Path, contents: &[u8]) {
        let result = file
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| fs::write(file, contents));
        match result {
            Ok(()) => debug!(path = %file.display(), "wrote"),
            Err(e) => warn!(path = %file.display(), error = %e, "visualization output failed"),
        }
    }
}

impl VisualizationSink for DirectorySink {
    fn set_point_cloud(&mut self, path: &str, cloud: &[Point3<f64>], point_size: f64, rgba: Rgba) {
        let file = self.file_path(path, "ply");
        let mut buffer = Vec::new();
        match write_ply(&mut buffer, cloud, point_size, rgba) {
            Ok(_) => self.write(&file, &buffer),
            Err(e) => warn!(path = %file.display(), error = %e, "encoding point cloud failed"),
        }
    }

    fn set_text(&mut self, path: &str, text: &str) {
        let file = self.file_path(path, "txt");
        self.write(&file, text.as_bytes());
    }
}

/// Writes `cloud` as an ASCII PLY vertex list with one shared colour.
pub fn write_ply<W: io::Write>(
    out: &mut W,
    cloud: &[Point3<f64>],
    point_size: f64,
    rgba: Rgba,
) -> io::Result<usize> {
    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::Ascii;
    ply.header.comments.push(format!("point_size {point_size}"));

    let mut vertex_def = ElementDef::new("vertex".to_string());
    for name in ["x", "y", "z"] {
        vertex_def.properties.add(PropertyDef::new(
            name.to_string(),
            PropertyType::Scalar(ScalarType::Double),
        ));
    }
    for name in ["red", "green", "blue", "alpha"] {
        vertex_def.properties.add(PropertyDef::new(
            name.to_string(),
            PropertyType::Scalar(ScalarType::UChar),
        ));
    }
    vertex_def.count = cloud.len();
    ply.header.elements.add(vertex_def);

    let [r, g, b, a] = rgba.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
    let vertices: Vec<DefaultElement> = cloud
        .iter()
        .map(|p| {
            let mut vertex = DefaultElement::new();
            vertex.insert("x".to_string(), Property::Double(p.x));
            vertex.insert("y".to_string(), Property::Double(p.y));
            vertex.insert("z".to_string(), Property::Double(p.z));
            vertex.insert("red".to_string(), Property::UChar(r));
            vertex.insert("green".to_string(), Property::UChar(g));
            vertex.insert("blue".to_string(), Property::UChar(b));
            vertex.insert("alpha".to_string(), Property::UChar(a));
            vertex
        })
        .collect();
    ply.payload.insert("vertex".to_string(), vertices);

    Writer::new().write_ply(out, &mut ply)
}

/// Samples every region by hit-and-run and draws the end-effector position of
/// each sample, one coloured cloud per region under `regions/<label>`.
pub fn render_region_points(
    sink: &mut dyn VisualizationSink,
    chain: &KinematicChain,
    regions: &RegionCollection,
    num_samples: usize,
    seed: u64,
) -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for (i, (label, region)) in regions.iter().enumerate() {
        let cloud = region
            .sample_points(&mut rng, num_samples)?
            .iter()
            .map(|q| chain.tip_pose(q).map(|pose| Point3::from(pose.translation.vector)))
            .collect::<Result<Vec<_>>>()?;
        sink.set_point_cloud(
            &format!("regions/{label}"),
            &cloud,
            DEFAULT_POINT_SIZE,
            PALETTE[i % PALETTE.len()],
        );
    }
    Ok(())
}

/// Number of regions per intersection count.
pub fn degree_histogram(graph: &IntersectionGraph) -> BTreeMap<usize, usize> {
    let mut histogram = BTreeMap::new();
    for degree in graph.degrees().into_values() {
        *histogram.entry(degree).or_insert(0) += 1;
    }
    histogram
}

pub fn render_histogram(histogram: &BTreeMap<usize, usize>) -> String {
    let rows: String = histogram
        .iter()
        .map(|(degree, count)| format!("{degree:>13} | {} {count}\n", "#".repeat(*count)))
        .collect();
    format!("intersections | regions\n{rows}")
}

/// Graphviz DOT of the intersection graph, nodes labelled by region.
pub fn connectivity_dot(graph: &IntersectionGraph) -> String {
    let labelled = graph.graph.map(|_, label| label.as_str(), |_, _| "");
    format!("{}", Dot::with_config(&labelled, &[Config::EdgeNoLabel]))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::planning::pairwise_intersections;
    use crate::polytope::HPolyhedron;
    use crate::robot::RobotModel;
    use approx::assert_abs_diff_eq;
    use nalgebra::{DVector, Isometry3};

    fn rect(x0: f64, x1: f64) -> HPolyhedron {
        HPolyhedron::make_box(
            &DVector::from_column_slice(&[x0, 0.0]),
            &DVector::from_column_slice(&[x1, 1.0]),
        )
        .unwrap()
    }

    fn chain_regions() -> RegionCollection {
        let mut regions = RegionCollection::new();
        regions.insert("a", rect(0.0, 1.0));
        regions.insert("b", rect(0.5, 1.5));
        regions.insert("c", rect(1.2, 2.0));
        regions.insert("d", rect(5.0, 6.0));
        regions
    }

    #[test]
    fn test_recording_sink() {
        let mut sink = RecordingSink::new();
        sink.set_point_cloud("a", &[Point3::origin()], 0.1, PALETTE[0]);
        sink.set_point_cloud("a", &[Point3::new(1.0, 0.0, 0.0)], 0.2, PALETTE[1]);
        sink.set_text("note", "hello");
        assert_eq!(sink.point_clouds.len(), 1);
        assert_eq!(sink.point_clouds["a"].points, vec![Point3::new(1.0, 0.0, 0.0)]);
        assert_eq!(sink.point_clouds["a"].rgba, PALETTE[1]);
        assert_eq!(sink.texts["note"], "hello");
    }

    #[test]
    fn test_directory_sink() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::new(dir.path().join("out")).unwrap();
        sink.set_point_cloud(
            "regions/set 0",
            &[Point3::new(1.0, 2.0, 3.0), Point3::new(0.5, 0.0, -1.0)],
            0.025,
            [1.0, 0.0, 0.5, 0.5],
        );
        sink.set_text("histogram", "1 | #");

        let ply = fs::read_to_string(sink.root().join("regions").join("set_0.ply")).unwrap();
        let lines: Vec<&str> = ply.lines().collect();
        assert_eq!(lines[0], "ply");
        assert!(lines.contains(&"element vertex 2"));
        assert!(lines.contains(&"comment point_size 0.025"));
        assert!(lines.contains(&"property double x"));
        assert!(lines.contains(&"property uchar alpha"));
        let body = lines.iter().position(|l| *l == "end_header").unwrap() + 1;
        let vertices: Vec<Vec<f64>> = lines[body..]
            .iter()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.split_whitespace().map(|t| t.parse().unwrap()).collect())
            .collect();
        assert_eq!(vertices.len(), 2);
        assert_eq!(vertices[0], vec![1.0, 2.0, 3.0, 255.0, 0.0, 128.0, 128.0]);
        assert_eq!(vertices[1], vec![0.5, 0.0, -1.0, 255.0, 0.0, 128.0, 128.0]);

        let text = fs::read_to_string(sink.root().join("histogram.txt")).unwrap();
        assert_eq!(text, "1 | #");
    }

    #[test]
    fn test_write_ply_empty_cloud() {
        let mut buffer = Vec::new();
        write_ply(&mut buffer, &[], 0.1, PALETTE[0]).unwrap();
        let ply = String::from_utf8(buffer).unwrap();
        assert!(ply.lines().any(|l| l == "element vertex 0"));
        assert_eq!(ply.lines().filter(|l| !l.trim().is_empty()).last(), Some("end_header"));
    }

    #[test]
    fn test_write_ply_reports_sink_errors() {
        struct Broken;
        impl io::Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "closed"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        assert!(write_ply(&mut Broken, &[Point3::origin()], 0.1, PALETTE[0]).is_err());
    }

    #[test]
    fn test_directory_sink_swallows_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::new(dir.path()).unwrap();
        // a plain file where a directory is needed
        fs::write(dir.path().join("blocked"), "").unwrap();
        sink.set_text("blocked/inner", "lost");
        sink.set_point_cloud("blocked/cloud", &[Point3::origin()], 0.1, PALETTE[0]);
        assert!(!dir.path().join("blocked").join("inner.txt").exists());
        assert!(!dir.path().join("blocked").join("cloud.ply").exists());
    }

    #[test]
    fn test_render_region_points() {
        let chain = RobotModel::default_arm()
            .unwrap()
            .chain("base_link", "arm_eef")
            .unwrap()
            .with_base_pose(Isometry3::translation(0.0, 0.0, 0.58));
        let mut regions = RegionCollection::new();
        for label in ["r0", "r1"] {
            regions.insert(
                label,
                HPolyhedron::make_box(&DVector::from_element(6, -1e-4), &DVector::from_element(6, 1e-4))
                    .unwrap(),
            );
        }
        let mut sink = RecordingSink::new();
        render_region_points(&mut sink, &chain, &regions, 20, 42).unwrap();

        assert_eq!(sink.point_clouds.len(), 2);
        let cloud = &sink.point_clouds["regions/r1"];
        assert_eq!(cloud.points.len(), 20);
        assert_eq!(cloud.rgba, PALETTE[1]);
        assert_eq!(cloud.point_size, DEFAULT_POINT_SIZE);
        // near-zero joint angles keep the tip at the zero-configuration position
        for p in &cloud.points {
            assert_abs_diff_eq!(p.x, 0.625, epsilon = 1e-2);
            assert_abs_diff_eq!(p.y, 0.0, epsilon = 1e-2);
            assert_abs_diff_eq!(p.z, 1.435, epsilon = 1e-2);
        }
    }

    #[test]
    fn test_histogram_and_dot() {
        let graph = pairwise_intersections(&chain_regions()).unwrap();
        let histogram = degree_histogram(&graph);
        assert_eq!(histogram, BTreeMap::from([(0, 1), (1, 2), (2, 1)]));

        let text = render_histogram(&histogram);
        assert!(text.lines().any(|l| l.trim_start().starts_with("1 | ## 2")));

        let dot = connectivity_dot(&graph);
        assert!(dot.starts_with("graph {"));
        assert!(dot.contains("label = \"a\""));
        assert_eq!(dot.matches("--").count(), 2);
    }
}
