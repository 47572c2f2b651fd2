/*
This code is part of the ContamTools contaminant fate analysis library.
Authors: Dr. John Lindsay
Created: 07/06/2022
Last Modified: 02/11/2023
License: MIT
*/

use crate::rt_matrix::{BasinMatrix, BasinMatrixStore};
use contam_common::structures::MajorOrder;
use nalgebra::DMatrix;
use std::collections::{BTreeSet, HashSet};
use std::io::{Error, ErrorKind};

// stacked block starts and the stacked (bridge-free) node order
fn stacked(matrices: &[BasinMatrix]) -> (Vec<usize>, Vec<i64>) {
    let mut starts = vec![0usize];
    let mut list = vec![];
    for bm in matrices {
        let take = if bm.bridge.is_some() {
            bm.nodes.len() - 1
        } else {
            bm.nodes.len()
        };
        list.extend_from_slice(&bm.nodes[..take]);
        starts.push(list.len());
    }
    (starts, list)
}

fn filter_rows_and_columns(bm: &mut BasinMatrix, mask: &[bool]) {
    let keep: Vec<usize> = (0..mask.len()).filter(|&i| mask[i]).collect();
    let dense = bm.matrix.to_dense();
    let filtered =
        DMatrix::<f32>::from_fn(keep.len(), keep.len(), |i, j| dense[(keep[i], keep[j])]);
    bm.matrix = BasinMatrixStore::Dense(filtered);
    let kept_nodes: Vec<i64> = keep.iter().map(|&i| bm.nodes[i]).collect();
    bm.nodes = kept_nodes;
    if let Some(bridge) = bm.bridge {
        if bm.nodes.last() != Some(&bridge) {
            bm.bridge = None;
        }
    }
}

/// Reduces a matrix bundle to the chosen whole-basin ids. Mini-basins that
/// share no id with the selection are dropped, partially covered matrices
/// are row/column indexed down to the surviving nodes, and matrices left
/// small by the reduction are merged back together: a bridged matrix is
/// stitched onto the matrix holding its bridge node through a cross block,
/// and neighbouring small unbridged matrices are packed block-diagonally.
/// Matrices larger than `cut_minimum` rows are frozen in compressed form and
/// left out of the merging. Returns the reduced bundle and its stacked node
/// order.
pub fn matrix_subset(
    bundle: Vec<BasinMatrix>,
    picked: &BTreeSet<i32>,
    basin_nodes: &[Vec<i64>],
    basin_ids: &[i32],
    cut_size: usize,
    cut_minimum: usize,
    order: MajorOrder,
) -> Result<(Vec<BasinMatrix>, Vec<i64>), Error> {
    let covered: BTreeSet<i32> = bundle
        .iter()
        .flat_map(|bm| bm.basin_ids.iter().copied())
        .collect();
    for id in picked {
        if !covered.contains(id) {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "Basin {} is not covered by the matrix bundle; rebuild the bundle.",
                    id
                ),
            ));
        }
    }

    // drop mini-basins with no overlap at all
    let mut matrices: Vec<BasinMatrix> = bundle
        .into_iter()
        .filter(|bm| bm.basin_ids.iter().any(|id| picked.contains(id)))
        .collect();

    // reduce matrices that are only partly inside the selection
    for bm in matrices.iter_mut() {
        if bm.basin_ids.iter().all(|id| picked.contains(id)) {
            continue;
        }
        let mut keep_pixels: HashSet<i64> = HashSet::new();
        for id in bm.basin_ids.iter().filter(|id| picked.contains(id)) {
            if let Some(pos) = basin_ids.iter().position(|b| b == id) {
                keep_pixels.extend(basin_nodes[pos].iter().copied());
            }
        }
        let mask: Vec<bool> = bm.nodes.iter().map(|p| keep_pixels.contains(p)).collect();
        if mask.iter().all(|&m| m) {
            continue;
        }
        filter_rows_and_columns(bm, &mask);
    }
    matrices.retain(|bm| bm.matrix.rows() > 0);

    // merge a bridged matrix into the matrix holding its bridge node, while
    // the pair stays inside the size budget
    let mut merge_found = true;
    while merge_found {
        merge_found = false;
        let mut j = 0usize;
        while j < matrices.len() {
            if matrices[j].matrix.is_dense() && matrices[j].matrix.rows() > cut_minimum {
                let frozen = matrices[j].matrix.to_sparse(order);
                matrices[j].matrix = BasinMatrixStore::Sparse(frozen);
                j += 1;
                continue;
            }
            let bridge_pixel = match matrices[j].bridge {
                Some(p) => p,
                None => {
                    j += 1;
                    continue;
                }
            };
            let (starts, node_list) = stacked(&matrices);
            let child_index = match node_list.iter().position(|&p| p == bridge_pixel) {
                Some(i) => i,
                None => {
                    // the bridge node fell outside the selection
                    j += 1;
                    continue;
                }
            };
            let mut index = matrices.len() - 1;
            for i in 0..matrices.len() {
                if child_index >= starts[i] && child_index < starts[i + 1] {
                    index = i;
                    break;
                }
            }
            if index == j
                || !matrices[j].matrix.is_dense()
                || !matrices[index].matrix.is_dense()
            {
                j += 1;
                continue;
            }
            let size_current = matrices[j].matrix.rows() - 1;
            let size_next = matrices[index].matrix.rows();
            if size_current + size_next >= cut_size {
                j += 1;
                continue;
            }
            merge_found = true;

            let cur = matrices[j].matrix.to_dense();
            let next = matrices[index].matrix.to_dense();
            let child_local = child_index - starts[index];
            let own_rt = cur[(size_current, size_current)];
            let merged_size = size_current + size_next;
            let mut merged = DMatrix::<f32>::zeros(merged_size, merged_size);
            for i in 0..size_current {
                for c in 0..size_current {
                    merged[(i, c)] = cur[(i, c)];
                }
            }
            for i in 0..size_next {
                for c in 0..size_next {
                    merged[(size_current + i, size_current + c)] = next[(i, c)];
                }
            }
            // the upstream matrix's bridge row, less the bridge cell's own
            // residence time, plus the bridge-to-row travel time of the
            // downstream matrix gives the full cross-basin path
            for i in 0..size_next {
                let link = next[(i, child_local)];
                if link > 0f32 {
                    for c in 0..size_current {
                        merged[(size_current + i, c)] =
                            (cur[(size_current, c)] - own_rt) + link;
                    }
                }
            }

            let mut nodes = matrices[j].nodes[..size_current].to_vec();
            nodes.extend_from_slice(&matrices[index].nodes);
            let basin_union: BTreeSet<i32> = matrices[j]
                .basin_ids
                .union(&matrices[index].basin_ids)
                .copied()
                .collect();
            matrices[index].matrix = BasinMatrixStore::Dense(merged);
            matrices[index].nodes = nodes;
            matrices[index].basin_ids = basin_union;
            matrices.remove(j);
        }
    }

    // pack the remaining small unbridged matrices block-diagonally
    let mut j = 0usize;
    while j + 1 < matrices.len() {
        let joinable = matrices[j].bridge.is_none()
            && matrices[j].matrix.is_dense()
            && matrices[j + 1].matrix.is_dense()
            && matrices[j].matrix.rows() + matrices[j + 1].matrix.rows() < cut_size;
        if joinable {
            let a = matrices[j].matrix.to_dense();
            let b = matrices[j + 1].matrix.to_dense();
            let (na, nb) = (a.nrows(), b.nrows());
            let mut merged = DMatrix::<f32>::zeros(na + nb, na + nb);
            for i in 0..na {
                for c in 0..na {
                    merged[(i, c)] = a[(i, c)];
                }
            }
            for i in 0..nb {
                for c in 0..nb {
                    merged[(na + i, na + c)] = b[(i, c)];
                }
            }
            let mut nodes = matrices[j].nodes.clone();
            nodes.extend_from_slice(&matrices[j + 1].nodes);
            let basin_union: BTreeSet<i32> = matrices[j]
                .basin_ids
                .union(&matrices[j + 1].basin_ids)
                .copied()
                .collect();
            matrices[j + 1].matrix = BasinMatrixStore::Dense(merged);
            matrices[j + 1].nodes = nodes;
            matrices[j + 1].basin_ids = basin_union;
            matrices.remove(j);
        } else {
            j += 1;
        }
    }

    // freeze everything still dense
    for bm in matrices.iter_mut() {
        if bm.matrix.is_dense() {
            let frozen = bm.matrix.to_sparse(order);
            bm.matrix = BasinMatrixStore::Sparse(frozen);
        }
    }

    let (_, node_list) = stacked(&matrices);
    Ok((matrices, node_list))
}

#[cfg(test)]
mod test {
    use super::matrix_subset;
    use crate::graph::RiverGraph;
    use crate::matrix_run::{run_basin_matrices, stacked_order};
    use crate::partition::sub_basins;
    use crate::propagate::{run_model, DecayRule};
    use crate::rt_matrix::{attenuation_matrices, build_basin_matrices};
    use contam_common::structures::MajorOrder;
    use std::collections::BTreeSet;

    // two separate basins: basin 1 is a chain of 5, basin 2 a chain of 3
    fn two_basin_graph() -> RiverGraph {
        let ids = vec![1, 2, 3, 4, 5, 11, 12, 13];
        let downstream = vec![2, 3, 4, 5, -1, 12, 13, -1];
        let mut g = RiverGraph::from_links(ids, &downstream).unwrap();
        g.set_basin(vec![1, 1, 1, 1, 1, 2, 2, 2]);
        g.set_residence_time(vec![1.0, 2.0, 1.5, 0.5, 1.0, 2.0, 2.5, 1.0]);
        g.set_discharge(vec![1.0; 8]);
        g
    }

    fn basin_pixel_lists(g: &RiverGraph) -> (Vec<Vec<i64>>, Vec<i32>) {
        let order = g.topological_order().unwrap();
        let (lists, ids) = g.basin_node_lists(&order).unwrap();
        let pixel_lists = lists
            .iter()
            .map(|l| l.iter().map(|&i| g.node_id(i)).collect())
            .collect();
        (pixel_lists, ids)
    }

    #[test]
    fn test_subset_to_one_basin_matches_restricted_run() {
        let g = two_basin_graph();
        let order = g.topological_order().unwrap();
        let (lists, _) = g.basin_node_lists(&order).unwrap();
        let minis = sub_basins(&g, &lists, 100);
        let matrices = build_basin_matrices(&g, &minis, 0, MajorOrder::Row).unwrap();
        let (pixel_lists, ids) = basin_pixel_lists(&g);

        let picked: BTreeSet<i32> = [1].iter().copied().collect();
        let (reduced, node_list) =
            matrix_subset(matrices, &picked, &pixel_lists, &ids, 100, 100, MajorOrder::Row)
                .unwrap();
        assert_eq!(node_list.len(), 5);
        assert!(node_list.iter().all(|&p| p <= 5));

        let k = 0.15;
        let att = attenuation_matrices(&reduced, k);
        let loads_by_pixel = |p: i64| if p == 1 { 40.0 } else if p == 3 { 8.0 } else { 0.0 };
        let initial: Vec<f64> = node_list.iter().map(|&p| loads_by_pixel(p)).collect();
        let out = run_basin_matrices(&att, &node_list, &initial).unwrap();

        let full_loads: Vec<f64> = (0..8).map(|i| loads_by_pixel(g.node_id(i))).collect();
        let direct = run_model(&g, &order, &full_loads, k, DecayRule::Combined).unwrap();
        for (i, &p) in node_list.iter().enumerate() {
            let expected = direct.contaminant[g.index_of(p).unwrap()];
            assert!(
                (out[i] - expected).abs() <= 1e-5 * expected.abs().max(1.0),
                "pixel {}: {} vs {}",
                p,
                out[i],
                expected
            );
        }
    }

    #[test]
    fn test_subset_to_full_id_set_is_idempotent() {
        let g = two_basin_graph();
        let order = g.topological_order().unwrap();
        let (lists, _) = g.basin_node_lists(&order).unwrap();
        let minis = sub_basins(&g, &lists, 3);
        let matrices = build_basin_matrices(&g, &minis, 0, MajorOrder::Row).unwrap();
        let (pixel_lists, ids) = basin_pixel_lists(&g);

        let k = 0.1;
        let att_full = attenuation_matrices(&matrices, k);
        let stacked_full = stacked_order(&att_full);
        let initial_full: Vec<f64> = stacked_full
            .iter()
            .map(|&p| if p == 1 || p == 11 { 10.0 } else { 0.0 })
            .collect();
        let out_full = run_basin_matrices(&att_full, &stacked_full, &initial_full).unwrap();

        let picked: BTreeSet<i32> = [1, 2].iter().copied().collect();
        let (reduced, node_list) = matrix_subset(
            matrices.clone(),
            &picked,
            &pixel_lists,
            &ids,
            3,
            100,
            MajorOrder::Row,
        )
        .unwrap();
        let att = attenuation_matrices(&reduced, k);
        let initial: Vec<f64> = node_list
            .iter()
            .map(|&p| if p == 1 || p == 11 { 10.0 } else { 0.0 })
            .collect();
        let out = run_basin_matrices(&att, &node_list, &initial).unwrap();

        for (i, &p) in node_list.iter().enumerate() {
            let i_full = stacked_full.iter().position(|&q| q == p).unwrap();
            assert!(
                (out[i] - out_full[i_full]).abs() <= 1e-6 * out_full[i_full].abs().max(1.0),
                "pixel {}: {} vs {}",
                p,
                out[i],
                out_full[i_full]
            );
        }
    }

    #[test]
    fn test_bridged_merge_reconstructs_whole_basin_matrix() {
        // a split chain whose pieces fit the budget again after subsetting
        // must stitch back into the single-basin matrix
        let ids: Vec<i64> = (1..=10).collect();
        let downstream: Vec<i64> = (1..=10).map(|i| if i < 10 { i + 1 } else { -1 }).collect();
        let mut g = RiverGraph::from_links(ids, &downstream).unwrap();
        g.set_basin(vec![1; 10]);
        let rt: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        g.set_residence_time(rt.clone());
        g.set_discharge(vec![1.0; 10]);
        let order = g.topological_order().unwrap();
        let (lists, _) = g.basin_node_lists(&order).unwrap();
        let split = sub_basins(&g, &lists, 3);
        assert!(split.len() > 1);
        let matrices = build_basin_matrices(&g, &split, 0, MajorOrder::Row).unwrap();
        let (pixel_lists, ids_list) = basin_pixel_lists(&g);

        let picked: BTreeSet<i32> = [1].iter().copied().collect();
        let (reduced, node_list) = matrix_subset(
            matrices,
            &picked,
            &pixel_lists,
            &ids_list,
            100,
            100,
            MajorOrder::Row,
        )
        .unwrap();
        assert_eq!(reduced.len(), 1);
        assert!(reduced[0].bridge.is_none());
        assert_eq!(node_list.len(), 10);

        // the merged matrix holds the full-path residence times
        let whole = sub_basins(&g, &lists, 100);
        let expected = build_basin_matrices(&g, &whole, 0, MajorOrder::Row).unwrap();
        for i in 0..10 {
            let pi = reduced[0].nodes.iter().position(|&p| p == expected[0].nodes[i]);
            let pi = pi.unwrap();
            for j in 0..10 {
                let pj = reduced[0]
                    .nodes
                    .iter()
                    .position(|&p| p == expected[0].nodes[j])
                    .unwrap();
                assert!(
                    (reduced[0].matrix.get(pi, pj) - expected[0].matrix.get(i, j)).abs() < 1e-4,
                    "entry ({}, {})",
                    i,
                    j
                );
            }
        }
    }

    #[test]
    fn test_uncovered_basin_is_stale() {
        let g = two_basin_graph();
        let order = g.topological_order().unwrap();
        let (lists, _) = g.basin_node_lists(&order).unwrap();
        let minis = sub_basins(&g, &lists, 100);
        let matrices = build_basin_matrices(&g, &minis, 0, MajorOrder::Row).unwrap();
        let (pixel_lists, ids) = basin_pixel_lists(&g);
        let picked: BTreeSet<i32> = [1, 99].iter().copied().collect();
        assert!(matrix_subset(
            matrices,
            &picked,
            &pixel_lists,
            &ids,
            100,
            100,
            MajorOrder::Row
        )
        .is_err());
    }
}
