use std::path::PathBuf;

/// Errors raised by scene assembly, region generation and persistence.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A box could not be placed without overlapping the boxes placed before it.
    #[error("could not place box {index} without overlap after {attempts} attempts")]
    BoxPlacement { index: usize, attempts: usize },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("URDF error: {0}")]
    Urdf(#[from] urdf_rs::UrdfError),

    /// The scene description failed validation.
    #[error("invalid scene: {0}")]
    Scene(String),

    #[error("missing link: {0}")]
    MissingLink(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("cannot grow a region from an empty clique")]
    EmptyClique,

    #[error("region seed is in collision")]
    SeedInCollision,

    #[error("point lies outside the region")]
    OutsideRegion,

    #[error("region is unbounded")]
    Unbounded,

    /// A linear program behind a polytope query did not solve.
    #[error("solver failure: {0}")]
    Solver(String),

    #[error("invalid region file: {0}")]
    RegionFile(String),

    #[error("unknown body: {0}")]
    UnknownBody(String),

    /// Settings that parse but make no sense together.
    #[error("invalid settings: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
