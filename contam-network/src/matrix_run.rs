/*
This code is part of the ContamTools contaminant fate analysis library.
Authors: Dr. John Lindsay
Created: 24/05/2022
Last Modified: 02/11/2023
License: MIT
*/

use crate::rt_matrix::BasinMatrix;
use std::io::{Error, ErrorKind};

/// The row order of a stacked bundle: the nodes of every mini-basin in
/// sequence, with each bridge cell counted only once, in the block where it
/// is a regular (non-bridge) row. Contamination vectors passed to
/// `run_basin_matrices` are indexed by this order.
pub fn stacked_order(matrices: &[BasinMatrix]) -> Vec<i64> {
    let mut order = vec![];
    for bm in matrices {
        let take = if bm.bridge.is_some() {
            bm.nodes.len() - 1
        } else {
            bm.nodes.len()
        };
        order.extend_from_slice(&bm.nodes[..take]);
    }
    order
}

fn find_from(pixel_order: &[i64], from: usize, pixel: i64) -> Result<usize, Error> {
    pixel_order[from..]
        .iter()
        .position(|&p| p == pixel)
        .map(|pos| from + pos)
        .ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidData,
                format!(
                    "Bridge pixel {} was not found downstream in the stacked order; the matrix bundle is inconsistent.",
                    pixel
                ),
            )
        })
}

/// Applies the stacked decay matrices to an initial contamination vector.
/// For a bridged mini-basin the product runs over the basin's own rows plus
/// the bridge row; afterwards the input at the bridge is replaced by the
/// bridge output divided by the matrix's own diagonal decay, so that the
/// downstream block, whose diagonal attenuates the bridge cell again,
/// counts that decay exactly once.
pub fn run_basin_matrices(
    matrices: &[BasinMatrix],
    pixel_order: &[i64],
    initial: &[f64],
) -> Result<Vec<f64>, Error> {
    if pixel_order.len() != initial.len() {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "The contamination vector and the stacked order differ in length.",
        ));
    }
    let mut input = initial.to_vec();
    let mut out = vec![0f64; initial.len()];
    let mut row_count = 0usize;
    for bm in matrices {
        let rows = bm.matrix.rows();
        let last = row_count;
        row_count += rows;
        match bm.bridge {
            None => {
                if row_count > input.len() {
                    return Err(Error::new(
                        ErrorKind::InvalidInput,
                        "The matrix bundle is larger than the stacked order.",
                    ));
                }
                let y = bm.matrix.mul_vec(&input[last..row_count]);
                out[last..row_count].copy_from_slice(&y);
            }
            Some(bridge_pixel) => {
                row_count -= 1;
                let bridge_index = find_from(pixel_order, row_count, bridge_pixel)?;
                let mut x = Vec::with_capacity(rows);
                x.extend_from_slice(&input[last..row_count]);
                x.push(input[bridge_index]);
                let y = bm.matrix.mul_vec(&x);
                out[last..row_count].copy_from_slice(&y[..rows - 1]);
                out[bridge_index] = y[rows - 1];
                let own_decay = bm.matrix.get(rows - 1, rows - 1) as f64;
                input[bridge_index] = out[bridge_index] / own_decay;
            }
        }
    }
    Ok(out)
}

/// The downstream response to a unit load at `source_pixel`: the column of
/// the mini-basin containing the source, carried through every downstream
/// block by the ratio of the bridge response to the source-cell response.
/// A bridge response below 1e-5 zeroes the carry, cutting off the trace.
pub fn source_column(
    matrices: &[BasinMatrix],
    pixel_order: &[i64],
    source_pixel: i64,
) -> Result<Vec<f64>, Error> {
    let mut plant_column = vec![0f64; pixel_order.len()];
    let mut current = pixel_order
        .iter()
        .position(|&p| p == source_pixel)
        .ok_or_else(|| {
            Error::new(
                ErrorKind::NotFound,
                format!("Source pixel {} is not in the stacked order.", source_pixel),
            )
        })?;
    let mut multiply_value = 1f64;
    let mut row_count = 0usize;

    for bm in matrices {
        let rows = bm.matrix.rows();
        let last = row_count;
        row_count += rows;
        if row_count <= current {
            if bm.bridge.is_some() {
                row_count -= 1;
            }
            continue;
        }
        let column: Vec<f64> = bm
            .matrix
            .column(current - last)
            .iter()
            .map(|&v| v as f64 * multiply_value)
            .collect();
        match bm.bridge {
            None => {
                plant_column[last..row_count].copy_from_slice(&column);
                break;
            }
            Some(bridge_pixel) => {
                row_count -= 1;
                plant_column[last..row_count].copy_from_slice(&column[..rows - 1]);
                if column[current - last] < 0.00001 {
                    multiply_value = 0f64;
                } else {
                    multiply_value *= column[rows - 1] / column[current - last];
                }
                current = find_from(pixel_order, row_count, bridge_pixel)?;
            }
        }
    }
    Ok(plant_column)
}

#[cfg(test)]
mod test {
    use super::{run_basin_matrices, source_column, stacked_order};
    use crate::graph::RiverGraph;
    use crate::partition::sub_basins;
    use crate::propagate::{run_model, DecayRule};
    use crate::rt_matrix::{attenuation_matrices, build_basin_matrices};
    use contam_common::structures::MajorOrder;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn chain_graph(rt: Vec<f64>) -> RiverGraph {
        let n = rt.len() as i64;
        let ids: Vec<i64> = (1..=n).collect();
        let downstream: Vec<i64> = (1..=n).map(|i| if i < n { i + 1 } else { -1 }).collect();
        let mut g = RiverGraph::from_links(ids, &downstream).unwrap();
        g.set_basin(vec![1; rt.len()]);
        let n_rt = rt.len();
        g.set_residence_time(rt);
        g.set_discharge(vec![1.0; n_rt]);
        g
    }

    fn reorder(values: &[f64], graph: &RiverGraph, order: &[i64]) -> Vec<f64> {
        order
            .iter()
            .map(|&p| values[graph.index_of(p).unwrap()])
            .collect()
    }

    #[test]
    fn test_single_basin_matches_direct_propagation() {
        let mut rng = SmallRng::seed_from_u64(42);
        let rt: Vec<f64> = (0..8).map(|_| rng.gen_range(0.1..5.0)).collect();
        let g = chain_graph(rt);
        let order = g.topological_order().unwrap();
        let minis = sub_basins(&g, &[order.clone()], 100);
        let matrices = build_basin_matrices(&g, &minis, 0, MajorOrder::Row).unwrap();
        let k = 0.05;
        let att = attenuation_matrices(&matrices, k);
        let stacked = stacked_order(&att);

        let mut loads = vec![0f64; 8];
        loads[g.index_of(1).unwrap()] = 50.0;
        loads[g.index_of(4).unwrap()] = 10.0;
        let direct = run_model(&g, &order, &loads, k, DecayRule::Combined).unwrap();

        let initial = reorder(&loads, &g, &stacked);
        let out = run_basin_matrices(&att, &stacked, &initial).unwrap();
        let expected = reorder(&direct.contaminant, &g, &stacked);
        for i in 0..8 {
            assert!(
                (out[i] - expected[i]).abs() <= 1e-5 * expected[i].abs().max(1.0),
                "row {}: {} vs {}",
                i,
                out[i],
                expected[i]
            );
        }
    }

    #[test]
    fn test_split_chain_matches_direct_propagation() {
        // scenario: a chain of 10 with random residence times, cut in two
        // with a bridge, must reproduce the direct propagator
        let mut rng = SmallRng::seed_from_u64(7);
        let rt: Vec<f64> = (0..10).map(|_| rng.gen_range(0.1..4.0)).collect();
        let g = chain_graph(rt);
        let order = g.topological_order().unwrap();
        let minis = sub_basins(&g, &[order.clone()], 3);
        assert!(minis.len() > 1);
        let matrices = build_basin_matrices(&g, &minis, 0, MajorOrder::Row).unwrap();
        let k = 0.2;
        let att = attenuation_matrices(&matrices, k);
        let stacked = stacked_order(&att);
        assert_eq!(stacked.len(), 10);

        let mut loads = vec![0f64; 10];
        loads[g.index_of(1).unwrap()] = 100.0;
        loads[g.index_of(3).unwrap()] = 25.0;
        loads[g.index_of(7).unwrap()] = 5.0;
        let direct = run_model(&g, &order, &loads, k, DecayRule::Combined).unwrap();

        let initial = reorder(&loads, &g, &stacked);
        let out = run_basin_matrices(&att, &stacked, &initial).unwrap();
        let expected = reorder(&direct.contaminant, &g, &stacked);
        for i in 0..10 {
            assert!(
                (out[i] - expected[i]).abs() <= 1e-5 * expected[i].abs().max(1.0),
                "row {}: {} vs {}",
                i,
                out[i],
                expected[i]
            );
        }
    }

    #[test]
    fn test_confluence_across_bridges() {
        // two tributaries of 3 cells meet at cell 7 and drain through 8;
        // with a budget of 1 both tributaries split off, sharing the
        // confluence as their bridge
        let mut g =
            RiverGraph::from_links(vec![1, 2, 3, 4, 5, 6, 7, 8], &[2, 3, 7, 5, 6, 7, 8, -1])
                .unwrap();
        g.set_basin(vec![1; 8]);
        g.set_residence_time(vec![1.0, 0.5, 2.0, 1.5, 1.0, 3.0, 2.5, 0.5]);
        g.set_discharge(vec![1.0; 8]);
        let order = g.topological_order().unwrap();
        let minis = sub_basins(&g, &[order.clone()], 1);
        let matrices = build_basin_matrices(&g, &minis, 0, MajorOrder::Row).unwrap();
        assert_eq!(matrices.len(), 3);
        let k = 0.1;
        let att = attenuation_matrices(&matrices, k);
        let stacked = stacked_order(&att);
        assert_eq!(stacked.len(), 8);

        let mut loads = vec![0f64; 8];
        loads[g.index_of(1).unwrap()] = 10.0;
        loads[g.index_of(4).unwrap()] = 30.0;
        let direct = run_model(&g, &order, &loads, k, DecayRule::Combined).unwrap();
        let initial: Vec<f64> = stacked
            .iter()
            .map(|&p| loads[g.index_of(p).unwrap()])
            .collect();
        let out = run_basin_matrices(&att, &stacked, &initial).unwrap();
        for (i, &p) in stacked.iter().enumerate() {
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
    fn test_source_column_single_basin() {
        let g = chain_graph(vec![1.0, 2.0, 3.0, 4.0]);
        let order = g.topological_order().unwrap();
        let minis = sub_basins(&g, &[order.clone()], 100);
        let matrices = build_basin_matrices(&g, &minis, 0, MajorOrder::Column).unwrap();
        let k = 0.25;
        let att = attenuation_matrices(&matrices, k);
        let stacked = stacked_order(&att);

        let column = source_column(&att, &stacked, 2).unwrap();
        // nothing upstream of the source responds
        assert_eq!(column[0], 0.0);
        // downstream of the source the response is the decayed unit load
        let mut loads = vec![0f64; 4];
        loads[g.index_of(2).unwrap()] = 1.0;
        let direct = run_model(&g, &order, &loads, k, DecayRule::Combined).unwrap();
        for (i, &p) in stacked.iter().enumerate() {
            let expected = direct.contaminant[g.index_of(p).unwrap()];
            assert!((column[i] - expected).abs() <= 1e-6 * expected.abs().max(1.0));
        }
    }

    #[test]
    fn test_source_column_crosses_bridges_on_uniform_chain() {
        // uniform residence times, so the bridge carry ratio equals the
        // per-cell decay and the trace matches the forward run
        let g = chain_graph(vec![2.0; 10]);
        let order = g.topological_order().unwrap();
        let minis = sub_basins(&g, &[order.clone()], 3);
        let matrices = build_basin_matrices(&g, &minis, 0, MajorOrder::Column).unwrap();
        let k = 0.1;
        let att = attenuation_matrices(&matrices, k);
        let stacked = stacked_order(&att);

        let column = source_column(&att, &stacked, 1).unwrap();
        let mut initial = vec![0f64; 10];
        let src = stacked.iter().position(|&p| p == 1).unwrap();
        initial[src] = 1.0;
        let forward = run_basin_matrices(&att, &stacked, &initial).unwrap();
        for i in 0..10 {
            assert!(
                (column[i] - forward[i]).abs() <= 1e-5 * forward[i].abs().max(1e-3),
                "row {}: {} vs {}",
                i,
                column[i],
                forward[i]
            );
        }
    }
}
