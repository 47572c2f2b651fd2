/*
This code is part of the ContamTools contaminant fate analysis library.
Authors: Dr. John Lindsay
Created: 12/05/2022
Last Modified: 02/11/2023
License: MIT
*/

use crate::graph::RiverGraph;

/// A contiguous piece of a basin, bounded in size, with its nodes in
/// topological order (upstream before downstream). When the piece drains
/// onward, the first downstream cell belonging to the next piece is carried
/// as the final entry of `nodes` and recorded as the `bridge`.
#[derive(Clone, Debug)]
pub struct MiniBasin {
    pub nodes: Vec<usize>,
    pub bridge: Option<usize>,
}

/// Divides a set of whole basins into mini-basins of at most `cut_size`
/// members. A basin is split at a cell whose upstream count first exceeds
/// the budget, but only where that cell has a single parent, so that a
/// confluence is never a cut point and every mini-basin drains through
/// exactly one bridge cell. The returned list is ordered so that every
/// mini-basin precedes the one holding its bridge.
pub fn sub_basins(
    graph: &RiverGraph,
    basin_lists: &[Vec<usize>],
    cut_size: usize,
) -> Vec<MiniBasin> {
    let n = graph.num_nodes();
    let sorted: Vec<usize> = basin_lists.concat();

    // upstream cell count per node; -1 flags a cut point
    let mut parent_count = vec![0i64; n];
    for &node in &sorted {
        let parents = graph.predecessors(node);
        for &p in parents {
            parent_count[node] += parent_count[p as usize] + 1;
        }
        if parent_count[node] > cut_size as i64 && parents.len() == 1 {
            parent_count[node] = -1;
        }
    }

    // children come before parents in the reverse walk, so each node can
    // adopt the mini-basin of its (first) child unless a cut starts here
    let unassigned = usize::MAX;
    let mut mini = vec![unassigned; n];
    let mut current = 0usize;
    for &node in sorted.iter().rev() {
        let child = graph.successor(node);
        match child {
            Some(c) if parent_count[node] > -1 && mini[c] != unassigned => {
                mini[node] = mini[c];
            }
            _ => {
                mini[node] = current;
                current += 1;
            }
        }
    }

    // collect the nodes of each mini-basin, appending the bridge cell of a
    // cut mini-basin as the last entry of its list
    let mut basins: Vec<MiniBasin> = (0..current)
        .map(|_| MiniBasin {
            nodes: vec![],
            bridge: None,
        })
        .collect();
    for &node in &sorted {
        let b = mini[node];
        basins[b].nodes.push(node);
        if let Some(c) = graph.successor(node) {
            if mini[c] != unassigned && mini[c] != b {
                basins[b].bridge = Some(c);
                basins[b].nodes.push(c);
            }
        }
    }

    // join neighbouring mini-basins while the pair stays under budget; cut
    // pieces are above the budget by construction, so only whole (unbridged)
    // leftovers actually pack together
    let mut j = 0usize;
    while j + 1 < basins.len() {
        if basins[j].nodes.len() + basins[j + 1].nodes.len() < cut_size {
            let mut nodes = std::mem::take(&mut basins[j].nodes);
            nodes.extend_from_slice(&basins[j + 1].nodes);
            basins[j + 1].nodes = nodes;
            basins.remove(j);
        } else {
            j += 1;
        }
    }

    basins.reverse();
    basins
}

#[cfg(test)]
mod test {
    use super::sub_basins;
    use crate::graph::RiverGraph;

    fn chain(n: i64) -> RiverGraph {
        let ids: Vec<i64> = (1..=n).collect();
        let downstream: Vec<i64> = (1..=n).map(|i| if i < n { i + 1 } else { -1 }).collect();
        RiverGraph::from_links(ids, &downstream).unwrap()
    }

    #[test]
    fn test_chain_is_cut_with_a_bridge() {
        let g = chain(10);
        let order = g.topological_order().unwrap();
        let basins = sub_basins(&g, &[order], 3);
        assert_eq!(basins.len(), 2);
        // the upstream piece carries the first cell of the downstream piece
        let upper = &basins[0];
        let lower = &basins[1];
        assert!(upper.bridge.is_some());
        assert!(lower.bridge.is_none());
        let bridge = upper.bridge.unwrap();
        assert_eq!(*upper.nodes.last().unwrap(), bridge);
        assert_eq!(lower.nodes[0], bridge);
        // no nodes lost, none duplicated apart from the shared bridge
        assert_eq!(upper.nodes.len() - 1 + lower.nodes.len(), 10);
    }

    #[test]
    fn test_nodes_stay_in_topological_order() {
        let g = chain(10);
        let order = g.topological_order().unwrap();
        let basins = sub_basins(&g, &[order.clone()], 4);
        let pos: Vec<usize> = (0..10)
            .map(|i| order.iter().position(|&x| x == i).unwrap())
            .collect();
        for basin in &basins {
            for w in basin.nodes.windows(2) {
                assert!(pos[w[0]] < pos[w[1]]);
            }
        }
    }

    #[test]
    fn test_confluence_is_never_a_cut_point() {
        // two chains of 3 meeting at cell 7, then draining through 8
        let ids = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let downstream = vec![2, 3, 7, 5, 6, 7, 8, -1];
        let g = RiverGraph::from_links(ids, &downstream).unwrap();
        let order = g.topological_order().unwrap();
        let basins = sub_basins(&g, &[order], 1);
        // the budget is exceeded on both tributaries, so each is split off,
        // but the confluence itself stays fused with its downstream piece
        assert_eq!(basins.len(), 3);
        let confluence = g.index_of(7).unwrap();
        assert_eq!(basins[0].bridge, Some(confluence));
        assert_eq!(basins[1].bridge, Some(confluence));
        assert!(basins[2].bridge.is_none());
        assert!(basins[2].nodes.contains(&confluence));
        assert!(basins[2].nodes.contains(&g.index_of(8).unwrap()));
    }

    #[test]
    fn test_small_whole_basins_are_packed() {
        // three separate streams, each of 2 cells
        let ids = vec![1, 2, 11, 12, 21, 22];
        let downstream = vec![2, -1, 12, -1, 22, -1];
        let g = RiverGraph::from_links(ids, &downstream).unwrap();
        let order = g.topological_order().unwrap();
        let basins = sub_basins(&g, &[order], 100);
        assert_eq!(basins.len(), 1);
        assert_eq!(basins[0].nodes.len(), 6);
        assert!(basins[0].bridge.is_none());
    }

    #[test]
    fn test_large_basin_is_left_alone() {
        let g = chain(5);
        let order = g.topological_order().unwrap();
        let basins = sub_basins(&g, &[order], 100);
        assert_eq!(basins.len(), 1);
        assert!(basins[0].bridge.is_none());
        assert_eq!(basins[0].nodes.len(), 5);
    }
}
