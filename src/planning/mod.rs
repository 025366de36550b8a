//! Covering the arm's configuration space with convex collision-free regions.

pub mod coverage;
pub mod generator;
pub mod grower;
pub mod postprocess;
pub mod prm;
pub mod visibility;

pub use coverage::estimate_coverage;
pub use generator::{CliqueCoverOptions, RegionGenerator, RoundOptions, RoundReport};
pub use grower::{GrowOptions, RegionGrower, SampledInflation};
pub use postprocess::{pairwise_intersections, simplify_low_connectivity, IntersectionGraph, PostProcessOptions};
pub use prm::{inflate_along_roadmap, Prm, PrmOptions};
pub use visibility::{greedy_clique_cover, VisibilityGraph};
