pub type Index = u32;
pub type IndexValueVec = Vec<(Index, f32)>;
pub type IndexSet = hashbrown::HashSet<Index>;
pub type DenseVec = ndarray::Array1<f32>;
pub type LabelMat = mat::SparseRowMat<Index>;
pub type FeatureMat = mat::SparseRowMat<(Index, f32)>;
pub type DataSet = data::DataSet;
pub type Model = model::Model;

pub mod args;
pub mod data;
pub mod mat;
pub mod model;
mod util;

pub use rayon;

use std::io;

/// Crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid data: {0}")]
    Data(String),

    #[error("invalid tree structure: {0}")]
    TreeStructure(String),

    #[error("serialization error: {0}")]
    Serde(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
