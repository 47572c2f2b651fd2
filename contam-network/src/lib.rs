/*
This code is part of the ContamTools contaminant fate analysis library.
Authors: Dr. John Lindsay
Created: 27/04/2022
Last Modified: 02/11/2023
License: MIT
*/

//! The contaminant transport core: a compact river-network graph store, the
//! steady-state decay-and-accumulate propagator, mini-basin partitioning and
//! residence-time transfer matrices, the block-matrix runner, bundle
//! subsetting, and the attenuation/excretion calibrator.

pub mod calibrate;
pub mod graph;
pub mod io;
pub mod matrix_run;
pub mod observations;
pub mod partition;
pub mod propagate;
pub mod rt_matrix;
pub mod sources;
pub mod subset;

pub use crate::calibrate::{CalibrationResult, Calibrator};
pub use crate::graph::RiverGraph;
pub use crate::matrix_run::{run_basin_matrices, source_column, stacked_order};
pub use crate::observations::{read_observations, ObservationRecord};
pub use crate::partition::{sub_basins, MiniBasin};
pub use crate::propagate::{run_model, DecayRule, PropagationResult};
pub use crate::rt_matrix::{attenuation_matrices, build_basin_matrices, BasinMatrix};
pub use crate::sources::{
    add_effluent_discharge, initial_loads, read_source_table, ModelParameters, SourceRecord,
};
pub use crate::subset::matrix_subset;
