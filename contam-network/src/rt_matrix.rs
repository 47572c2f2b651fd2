/*
This code is part of the ContamTools contaminant fate analysis library.
Authors: Dr. John Lindsay
Created: 17/05/2022
Last Modified: 02/11/2023
License: MIT
*/

use crate::graph::RiverGraph;
use crate::partition::MiniBasin;
use contam_common::structures::{MajorOrder, SparseMatrix};
use nalgebra::DMatrix;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::io::{Error, ErrorKind};

/// Residence time written to the diagonal for a cell whose own residence
/// time is zero (a lake outlet, typically): zero is reserved for "no
/// connection", so a connected cell must carry a small positive value.
pub const RT_EPSILON: f32 = 0.000001;

/// A mini-basin matrix is kept dense while it is small, because dense
/// matrices are what the subsetter can still merge; it is frozen into the
/// compressed form once it grows past the configured threshold.
#[derive(Clone, Debug)]
pub enum BasinMatrixStore {
    Dense(DMatrix<f32>),
    Sparse(SparseMatrix),
}

impl BasinMatrixStore {
    pub fn rows(&self) -> usize {
        match self {
            BasinMatrixStore::Dense(m) => m.nrows(),
            BasinMatrixStore::Sparse(m) => m.rows(),
        }
    }

    pub fn is_dense(&self) -> bool {
        matches!(self, BasinMatrixStore::Dense(_))
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        match self {
            BasinMatrixStore::Dense(m) => m[(row, col)],
            BasinMatrixStore::Sparse(m) => m.get(row, col),
        }
    }

    /// Matrix-vector product accumulated in double precision.
    pub fn mul_vec(&self, x: &[f64]) -> Vec<f64> {
        match self {
            BasinMatrixStore::Dense(m) => {
                let mut y = vec![0f64; m.nrows()];
                for i in 0..m.nrows() {
                    let mut sum = 0f64;
                    for j in 0..m.ncols() {
                        sum += m[(i, j)] as f64 * x[j];
                    }
                    y[i] = sum;
                }
                y
            }
            BasinMatrixStore::Sparse(m) => m.mul_vec(x),
        }
    }

    pub fn column(&self, col: usize) -> Vec<f32> {
        match self {
            BasinMatrixStore::Dense(m) => (0..m.nrows()).map(|i| m[(i, col)]).collect(),
            BasinMatrixStore::Sparse(m) => m.column(col),
        }
    }

    /// Transforms every connection value (the positive entries; stored
    /// entries in the sparse case) by `f`, leaving absent connections at
    /// zero.
    pub fn map_values<F: Fn(f32) -> f32>(&self, f: F) -> BasinMatrixStore {
        match self {
            BasinMatrixStore::Dense(m) => {
                BasinMatrixStore::Dense(m.map(|v| if v > 0f32 { f(v) } else { 0f32 }))
            }
            BasinMatrixStore::Sparse(m) => BasinMatrixStore::Sparse(m.map_data(f)),
        }
    }

    pub fn to_sparse(&self, order: MajorOrder) -> SparseMatrix {
        match self {
            BasinMatrixStore::Dense(m) => SparseMatrix::from_dense(m, order),
            BasinMatrixStore::Sparse(m) => m.clone(),
        }
    }

    pub fn to_dense(&self) -> DMatrix<f32> {
        match self {
            BasinMatrixStore::Dense(m) => m.clone(),
            BasinMatrixStore::Sparse(m) => m.to_dense(),
        }
    }
}

/// The residence-time (or, after `attenuation_matrices`, decay) matrix of
/// one mini-basin, along with the pixel ids of its rows, its bridge pixel,
/// and the set of whole-basin ids that contributed nodes. Entry `(i, j)`
/// holds the cumulative residence time from cell `j` down through cell `i`
/// inclusive, when `j` drains to `i` within the mini-basin, and zero
/// otherwise.
#[derive(Clone, Debug)]
pub struct BasinMatrix {
    pub matrix: BasinMatrixStore,
    pub bridge: Option<i64>,
    pub nodes: Vec<i64>,
    pub basin_ids: BTreeSet<i32>,
}

fn build_one(
    graph: &RiverGraph,
    residence_time: &[f64],
    basin: &[i32],
    mini: &MiniBasin,
    cut_minimum: usize,
    order: MajorOrder,
) -> BasinMatrix {
    let n = mini.nodes.len();
    let mut b = DMatrix::<f32>::zeros(n, n);
    let mut basin_ids = BTreeSet::new();

    // walk the rows bottom-up; a cell's column is its child's column shifted
    // by the cell's own residence time, so each column accumulates the
    // travel time of the whole downstream path
    for j in (0..n).rev() {
        let node = mini.nodes[j];
        let rt = residence_time[node] as f32;
        if j != n - 1 {
            if let Some(c) = graph.successor(node) {
                if let Some(pos) = mini.nodes[j + 1..].iter().position(|&x| x == c) {
                    let ci = j + 1 + pos;
                    for i in 0..n {
                        let v = b[(i, ci)];
                        if v > 0f32 {
                            b[(i, j)] = v + rt;
                        }
                    }
                }
            }
        }
        b[(j, j)] = if rt == 0f32 { RT_EPSILON } else { rt };
        basin_ids.insert(basin[node]);
    }

    let store = if n > cut_minimum {
        BasinMatrixStore::Sparse(SparseMatrix::from_dense(&b, order))
    } else {
        BasinMatrixStore::Dense(b)
    };
    BasinMatrix {
        matrix: store,
        bridge: mini.bridge.map(|i| graph.node_id(i)),
        nodes: mini.nodes.iter().map(|&i| graph.node_id(i)).collect(),
        basin_ids,
    }
}

/// Builds the residence-time matrix of every mini-basin. Matrices larger
/// than `cut_minimum` rows are compressed immediately with the given storage
/// order; smaller ones stay dense so the subsetter can still merge them.
pub fn build_basin_matrices(
    graph: &RiverGraph,
    minis: &[MiniBasin],
    cut_minimum: usize,
    order: MajorOrder,
) -> Result<Vec<BasinMatrix>, Error> {
    let residence_time = graph.residence_time()?;
    let basin = graph.basin()?;
    if minis.is_empty() {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "No mini-basins were supplied.",
        ));
    }
    Ok(minis
        .par_iter()
        .map(|mini| build_one(graph, residence_time, basin, mini, cut_minimum, order))
        .collect())
}

/// Derives the decay matrices `A = exp(-attenuation * R)` on the connection
/// entries, leaving the residence-time matrices untouched so that another
/// attenuation rate can be applied later without rebuilding. Each output
/// matrix owns its value array, so concurrent evaluations at different rates
/// cannot race.
pub fn attenuation_matrices(matrices: &[BasinMatrix], attenuation: f64) -> Vec<BasinMatrix> {
    matrices
        .par_iter()
        .map(|bm| BasinMatrix {
            matrix: bm
                .matrix
                .map_values(|v| (-(attenuation) * v as f64).exp() as f32),
            bridge: bm.bridge,
            nodes: bm.nodes.clone(),
            basin_ids: bm.basin_ids.clone(),
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::{attenuation_matrices, build_basin_matrices, RT_EPSILON};
    use crate::graph::RiverGraph;
    use crate::partition::sub_basins;
    use contam_common::structures::MajorOrder;

    fn chain_graph(rt: Vec<f64>) -> RiverGraph {
        let n = rt.len() as i64;
        let ids: Vec<i64> = (1..=n).collect();
        let downstream: Vec<i64> = (1..=n).map(|i| if i < n { i + 1 } else { -1 }).collect();
        let mut g = RiverGraph::from_links(ids, &downstream).unwrap();
        g.set_basin(vec![1; rt.len()]);
        g.set_residence_time(rt);
        g
    }

    #[test]
    fn test_chain_consistency() {
        let g = chain_graph(vec![2.0, 3.0, 5.0]);
        let order = g.topological_order().unwrap();
        let minis = sub_basins(&g, &[order], 100);
        let matrices = build_basin_matrices(&g, &minis, 0, MajorOrder::Row).unwrap();
        assert_eq!(matrices.len(), 1);
        let m = &matrices[0].matrix;
        // R[c, a] = RT(a) + RT(b) + RT(c) and so on down the chain
        assert_eq!(m.get(0, 0), 2.0);
        assert_eq!(m.get(1, 0), 5.0);
        assert_eq!(m.get(1, 1), 3.0);
        assert_eq!(m.get(2, 0), 10.0);
        assert_eq!(m.get(2, 1), 8.0);
        assert_eq!(m.get(2, 2), 5.0);
    }

    #[test]
    fn test_triangularity_and_diagonal() {
        // a confluence: 1 -> 3, 2 -> 3, 3 -> 4, with a zero-residence lake cell
        let mut g = RiverGraph::from_links(vec![1, 2, 3, 4], &[3, 3, 4, -1]).unwrap();
        g.set_basin(vec![1, 1, 1, 1]);
        g.set_residence_time(vec![1.0, 1.0, 0.0, 2.0]);
        let order = g.topological_order().unwrap();
        let minis = sub_basins(&g, &[order], 100);
        let matrices = build_basin_matrices(&g, &minis, 0, MajorOrder::Row).unwrap();
        let bm = &matrices[0];
        let n = bm.matrix.rows();
        for i in 0..n {
            assert!(bm.matrix.get(i, i) >= RT_EPSILON);
            for j in 0..n {
                if bm.matrix.get(i, j) > 0f32 {
                    assert!(j <= i, "an entry above the diagonal at ({}, {})", i, j);
                }
            }
        }
        // the two headwaters are unconnected
        let i1 = bm.nodes.iter().position(|&p| p == 1).unwrap();
        let i2 = bm.nodes.iter().position(|&p| p == 2).unwrap();
        assert_eq!(bm.matrix.get(i1.max(i2), i1.min(i2)), 0f32);
        // the lake cell adds only its epsilon to upstream travel times
        let i3 = bm.nodes.iter().position(|&p| p == 3).unwrap();
        assert!((bm.matrix.get(i3, i1) - 1.0).abs() <= RT_EPSILON + 1e-7);
        assert_eq!(bm.matrix.get(i3, i3), RT_EPSILON);
    }

    #[test]
    fn test_attenuation_law() {
        let g = chain_graph(vec![2.0, 3.0, 5.0]);
        let order = g.topological_order().unwrap();
        let minis = sub_basins(&g, &[order], 100);
        let matrices = build_basin_matrices(&g, &minis, 0, MajorOrder::Row).unwrap();
        let k = 0.03f64;
        let att = attenuation_matrices(&matrices, k);
        let a = &att[0].matrix;
        let r = &matrices[0].matrix;
        for i in 0..3 {
            for j in 0..=i {
                let tau = r.get(i, j) as f64;
                if tau > 0.0 {
                    assert!((a.get(i, j) as f64 - (-k * tau).exp()).abs() < 1e-7);
                } else {
                    assert_eq!(a.get(i, j), 0f32);
                }
            }
        }
        // residence-time form left untouched for later re-parameterisation
        assert_eq!(r.get(2, 0), 10.0);
    }

    #[test]
    fn test_split_chain_carries_bridge_column() {
        let g = chain_graph(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);
        let order = g.topological_order().unwrap();
        let minis = sub_basins(&g, &[order], 3);
        let matrices = build_basin_matrices(&g, &minis, 0, MajorOrder::Row).unwrap();
        assert_eq!(matrices.len(), 2);
        let upper = &matrices[0];
        assert!(upper.bridge.is_some());
        let n = upper.matrix.rows();
        // the final row belongs to the bridge cell and accumulates the whole
        // upstream path
        assert_eq!(*upper.nodes.last().unwrap(), upper.bridge.unwrap());
        let full_path: f32 = (1..=n as i32).map(|v| v as f32).sum();
        assert_eq!(upper.matrix.get(n - 1, 0), full_path);
    }

    #[test]
    fn test_sparsification_threshold() {
        let g = chain_graph(vec![1.0; 6]);
        let order = g.topological_order().unwrap();
        let minis = sub_basins(&g, &[order], 100);
        let dense = build_basin_matrices(&g, &minis, 10, MajorOrder::Row).unwrap();
        assert!(dense[0].matrix.is_dense());
        let sparse = build_basin_matrices(&g, &minis, 3, MajorOrder::Row).unwrap();
        assert!(!sparse[0].matrix.is_dense());
    }
}
