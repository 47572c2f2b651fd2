// private sub-module defined in other files
mod build_basin_matrices;
mod calibrate_attenuation;
mod contaminant_transport;
mod run_basin_matrices;
mod subset_basin_matrices;
mod trace_source_column;

// exports identifiers from private sub-modules in the current module namespace
pub use self::build_basin_matrices::BuildBasinMatrices;
pub use self::calibrate_attenuation::CalibrateAttenuation;
pub use self::contaminant_transport::ContaminantTransport;
pub use self::run_basin_matrices::RunBasinMatrices;
pub use self::subset_basin_matrices::SubsetBasinMatrices;
pub use self::trace_source_column::TraceSourceColumn;
