// private sub-module defined in other files
mod sparse_matrix;

// exports identifiers from private sub-modules in the current module namespace
pub use self::sparse_matrix::MajorOrder;
pub use self::sparse_matrix::SparseMatrix;
