/*
This code is part of the ContamTools contaminant fate analysis library.
Authors: Dr. John Lindsay
Created: 27/04/2022
Last Modified: 14/06/2023
License: MIT
*/

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{Error, ErrorKind};

/// An in-memory river network. Every cell has at most one downstream
/// neighbour (flow direction is deterministic) and any number of upstream
/// neighbours, so the network is stored as a forest of confluent trees:
/// a flat downstream-pointer array plus the inverted upstream lists.
///
/// Nodes are identified externally by their pixel number in the reference
/// grid (`pixel_id = row * columns + col`) and internally by their position
/// in the storage order. Attribute arrays are optional so that a caller can
/// project only the fields a computation needs; accessing an attribute that
/// was not loaded is an error rather than a default.
#[derive(Clone, Debug, Default)]
pub struct RiverGraph {
    node_ids: Vec<i64>,
    index_of: HashMap<i64, usize>,
    downstream: Vec<i32>,
    upstream: Vec<Vec<u32>>,
    pub(crate) residence_time: Option<Vec<f64>>,
    pub(crate) discharge: Option<Vec<f64>>,
    pub(crate) basin: Option<Vec<i32>>,
    pub(crate) grid_row: Option<Vec<u32>>,
    pub(crate) grid_col: Option<Vec<u32>>,
    pub(crate) latitude: Option<Vec<f64>>,
    pub(crate) longitude: Option<Vec<f64>>,
}

impl RiverGraph {
    /// Builds a graph from parallel arrays of pixel ids and downstream pixel
    /// ids. A downstream id of -1, or one that does not occur in `node_ids`,
    /// marks an outlet.
    pub fn from_links(node_ids: Vec<i64>, downstream_ids: &[i64]) -> Result<RiverGraph, Error> {
        if node_ids.len() != downstream_ids.len() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "The node and downstream arrays differ in length.",
            ));
        }
        let mut index_of = HashMap::with_capacity(node_ids.len());
        for (i, &id) in node_ids.iter().enumerate() {
            if index_of.insert(id, i).is_some() {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("Pixel number {} occurs more than once.", id),
                ));
            }
        }
        let mut downstream = vec![-1i32; node_ids.len()];
        let mut upstream = vec![vec![]; node_ids.len()];
        for i in 0..node_ids.len() {
            if downstream_ids[i] >= 0 {
                if let Some(&j) = index_of.get(&downstream_ids[i]) {
                    downstream[i] = j as i32;
                    upstream[j].push(i as u32);
                }
            }
        }
        Ok(RiverGraph {
            node_ids,
            index_of,
            downstream,
            upstream,
            ..Default::default()
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.node_ids.len()
    }

    pub fn node_ids(&self) -> &[i64] {
        &self.node_ids
    }

    pub fn node_id(&self, index: usize) -> i64 {
        self.node_ids[index]
    }

    pub fn index_of(&self, pixel: i64) -> Option<usize> {
        self.index_of.get(&pixel).copied()
    }

    /// The unique downstream neighbour, if the node is not an outlet.
    pub fn successor(&self, index: usize) -> Option<usize> {
        if self.downstream[index] >= 0 {
            Some(self.downstream[index] as usize)
        } else {
            None
        }
    }

    pub fn predecessors(&self, index: usize) -> &[u32] {
        &self.upstream[index]
    }

    /// A topological ordering of the network, parents before children. The
    /// ordering is deterministic for a given storage order, so repeated
    /// calls (and re-loads of the same file) yield the same sequence.
    pub fn topological_order(&self) -> Result<Vec<usize>, Error> {
        let n = self.num_nodes();
        let mut remaining: Vec<usize> = self.upstream.iter().map(|u| u.len()).collect();
        let mut queue: VecDeque<usize> = VecDeque::new();
        for i in 0..n {
            if remaining[i] == 0 {
                queue.push_back(i);
            }
        }
        let mut order = Vec::with_capacity(n);
        while let Some(i) = queue.pop_front() {
            order.push(i);
            if let Some(c) = self.successor(i) {
                remaining[c] -= 1;
                if remaining[c] == 0 {
                    queue.push_back(c);
                }
            }
        }
        if order.len() != n {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "The river network is not acyclic; the input graph is corrupt.",
            ));
        }
        Ok(order)
    }

    /// Restricts the graph to the nodes in `keep`, preserving the relative
    /// storage order (and hence the topological ordering). Edges leaving the
    /// kept set become outlets.
    pub fn subgraph(&self, keep: &HashSet<i64>) -> RiverGraph {
        let kept: Vec<usize> = (0..self.num_nodes())
            .filter(|i| keep.contains(&self.node_ids[*i]))
            .collect();
        let mut new_index = vec![usize::MAX; self.num_nodes()];
        for (new_i, &old_i) in kept.iter().enumerate() {
            new_index[old_i] = new_i;
        }
        let node_ids: Vec<i64> = kept.iter().map(|&i| self.node_ids[i]).collect();
        let mut index_of = HashMap::with_capacity(node_ids.len());
        for (i, &id) in node_ids.iter().enumerate() {
            index_of.insert(id, i);
        }
        let mut downstream = vec![-1i32; kept.len()];
        let mut upstream = vec![vec![]; kept.len()];
        for (new_i, &old_i) in kept.iter().enumerate() {
            if let Some(old_c) = self.successor(old_i) {
                if new_index[old_c] != usize::MAX {
                    downstream[new_i] = new_index[old_c] as i32;
                    upstream[new_index[old_c]].push(new_i as u32);
                }
            }
        }
        let project_f64 =
            |a: &Option<Vec<f64>>| a.as_ref().map(|v| kept.iter().map(|&i| v[i]).collect());
        let project_i32 =
            |a: &Option<Vec<i32>>| a.as_ref().map(|v| kept.iter().map(|&i| v[i]).collect());
        let project_u32 =
            |a: &Option<Vec<u32>>| a.as_ref().map(|v| kept.iter().map(|&i| v[i]).collect());
        RiverGraph {
            node_ids,
            index_of,
            downstream,
            upstream,
            residence_time: project_f64(&self.residence_time),
            discharge: project_f64(&self.discharge),
            basin: project_i32(&self.basin),
            grid_row: project_u32(&self.grid_row),
            grid_col: project_u32(&self.grid_col),
            latitude: project_f64(&self.latitude),
            longitude: project_f64(&self.longitude),
        }
    }

    fn attribute<'a, T>(field: &'a Option<Vec<T>>, name: &str) -> Result<&'a [T], Error> {
        match field {
            Some(v) => Ok(v),
            None => Err(Error::new(
                ErrorKind::InvalidInput,
                format!("The {} attribute is not present in the graph.", name),
            )),
        }
    }

    /// Per-cell residence time in hours.
    pub fn residence_time(&self) -> Result<&[f64], Error> {
        RiverGraph::attribute(&self.residence_time, "residence-time")
    }

    /// Per-cell discharge in cubic metres per hour.
    pub fn discharge(&self) -> Result<&[f64], Error> {
        RiverGraph::attribute(&self.discharge, "discharge")
    }

    pub fn basin(&self) -> Result<&[i32], Error> {
        RiverGraph::attribute(&self.basin, "basin")
    }

    pub fn grid_row(&self) -> Result<&[u32], Error> {
        RiverGraph::attribute(&self.grid_row, "grid-row")
    }

    pub fn grid_col(&self) -> Result<&[u32], Error> {
        RiverGraph::attribute(&self.grid_col, "grid-column")
    }

    pub fn latitude(&self) -> Result<&[f64], Error> {
        RiverGraph::attribute(&self.latitude, "latitude")
    }

    pub fn longitude(&self) -> Result<&[f64], Error> {
        RiverGraph::attribute(&self.longitude, "longitude")
    }

    pub fn set_residence_time(&mut self, values: Vec<f64>) {
        self.residence_time = Some(values);
    }

    pub fn set_discharge(&mut self, values: Vec<f64>) {
        self.discharge = Some(values);
    }

    pub fn set_basin(&mut self, values: Vec<i32>) {
        self.basin = Some(values);
    }

    pub fn set_grid_position(&mut self, rows: Vec<u32>, cols: Vec<u32>) {
        self.grid_row = Some(rows);
        self.grid_col = Some(cols);
    }

    pub fn set_geographic_position(&mut self, lat: Vec<f64>, lon: Vec<f64>) {
        self.latitude = Some(lat);
        self.longitude = Some(lon);
    }

    /// Raises every discharge value to at least `min_cmh`, keeping the
    /// relative-concentration division well defined on near-dry cells.
    pub fn apply_discharge_floor(&mut self, min_cmh: f64) -> Result<(), Error> {
        match self.discharge.as_mut() {
            Some(v) => {
                for d in v.iter_mut() {
                    if *d < min_cmh {
                        *d = min_cmh;
                    }
                }
                Ok(())
            }
            None => Err(Error::new(
                ErrorKind::InvalidInput,
                "The discharge attribute is not present in the graph.",
            )),
        }
    }

    /// Groups a topological ordering into whole basins. Returns the node
    /// lists (each in topological order) and the basin ids, in first-seen
    /// order.
    pub fn basin_node_lists(
        &self,
        order: &[usize],
    ) -> Result<(Vec<Vec<usize>>, Vec<i32>), Error> {
        let basin = self.basin()?;
        let mut lists: Vec<Vec<usize>> = vec![];
        let mut ids: Vec<i32> = vec![];
        let mut slot_of: HashMap<i32, usize> = HashMap::new();
        for &i in order {
            let b = basin[i];
            match slot_of.get(&b).copied() {
                Some(s) => lists[s].push(i),
                None => {
                    slot_of.insert(b, lists.len());
                    ids.push(b);
                    lists.push(vec![i]);
                }
            }
        }
        Ok((lists, ids))
    }
}

#[cfg(test)]
mod test {
    use super::RiverGraph;
    use std::collections::HashSet;

    // 1 -> 3, 2 -> 3, 3 -> 4 (a two-source confluence with an outlet)
    fn confluence() -> RiverGraph {
        RiverGraph::from_links(vec![1, 2, 3, 4], &[3, 3, 4, -1]).unwrap()
    }

    #[test]
    fn test_topological_order_parents_first() {
        let g = confluence();
        let order = g.topological_order().unwrap();
        let pos: Vec<usize> = (0..4).map(|i| order.iter().position(|&x| x == i).unwrap()).collect();
        assert!(pos[0] < pos[2]);
        assert!(pos[1] < pos[2]);
        assert!(pos[2] < pos[3]);
        // stable between calls
        assert_eq!(order, g.topological_order().unwrap());
    }

    #[test]
    fn test_cycle_is_fatal() {
        let g = RiverGraph::from_links(vec![1, 2, 3], &[2, 3, 1]).unwrap();
        assert!(g.topological_order().is_err());
    }

    #[test]
    fn test_missing_attribute_is_an_error() {
        let g = confluence();
        assert!(g.residence_time().is_err());
    }

    #[test]
    fn test_subgraph_preserves_order_and_attributes() {
        let mut g = confluence();
        g.set_residence_time(vec![1.0, 2.0, 3.0, 4.0]);
        let keep: HashSet<i64> = [1, 3, 4].iter().copied().collect();
        let s = g.subgraph(&keep);
        assert_eq!(s.num_nodes(), 3);
        assert_eq!(s.node_ids(), &[1, 3, 4]);
        assert_eq!(s.residence_time().unwrap(), &[1.0, 3.0, 4.0]);
        // 1 -> 3 survives, 2 is gone
        let i3 = s.index_of(3).unwrap();
        assert_eq!(s.predecessors(i3), &[s.index_of(1).unwrap() as u32]);
        let order = s.topological_order().unwrap();
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn test_discharge_floor() {
        let mut g = confluence();
        g.set_discharge(vec![0.0, 5.0, 0.001, 36.0]);
        g.apply_discharge_floor(36.0).unwrap();
        assert_eq!(g.discharge().unwrap(), &[36.0, 36.0, 36.0, 36.0]);
    }

    #[test]
    fn test_basin_node_lists() {
        let mut g = RiverGraph::from_links(vec![10, 11, 20, 21], &[11, -1, 21, -1]).unwrap();
        g.set_basin(vec![7, 7, 9, 9]);
        let order = g.topological_order().unwrap();
        let (lists, ids) = g.basin_node_lists(&order).unwrap();
        assert_eq!(ids, vec![7, 9]);
        assert_eq!(lists[0], vec![0, 1]);
        assert_eq!(lists[1], vec![2, 3]);
    }
}
