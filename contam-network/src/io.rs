/*
This code is part of the ContamTools contaminant fate analysis library.
Authors: Dr. John Lindsay
Created: 30/04/2022
Last Modified: 02/11/2023
License: MIT
*/

//! The two binary boundary formats: the river-network graph file written by
//! the preprocessing layer (magic `RNGF`) and the mini-basin matrix bundle
//! (magic `CMBF`). Both are little-endian throughout. The graph file carries
//! a small JSON header naming its attribute arrays, so a reader can project
//! out only the attributes a computation needs and seek past the rest; on a
//! continental network the unused arrays dominate the file.

use crate::graph::RiverGraph;
use crate::rt_matrix::{BasinMatrix, BasinMatrixStore};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use contam_common::structures::{MajorOrder, SparseMatrix};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Error, ErrorKind, Read, Write};

const GRAPH_MAGIC: &[u8; 4] = b"RNGF";
const BUNDLE_MAGIC: &[u8; 4] = b"CMBF";
const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct AttributeEntry {
    name: String,
    kind: String,
}

fn attribute_width(kind: &str) -> Result<usize, Error> {
    match kind {
        "f64" => Ok(8),
        "i32" | "u32" => Ok(4),
        _ => Err(Error::new(
            ErrorKind::InvalidData,
            format!("Unrecognized attribute kind {} in the graph file.", kind),
        )),
    }
}

fn read_f64_array<R: Read>(reader: &mut R, n: usize) -> Result<Vec<f64>, Error> {
    let mut values = Vec::with_capacity(n);
    for _ in 0..n {
        values.push(reader.read_f64::<LittleEndian>()?);
    }
    Ok(values)
}

fn read_i64_array<R: Read>(reader: &mut R, n: usize) -> Result<Vec<i64>, Error> {
    let mut values = Vec::with_capacity(n);
    for _ in 0..n {
        values.push(reader.read_i64::<LittleEndian>()?);
    }
    Ok(values)
}

fn read_i32_array<R: Read>(reader: &mut R, n: usize) -> Result<Vec<i32>, Error> {
    let mut values = Vec::with_capacity(n);
    for _ in 0..n {
        values.push(reader.read_i32::<LittleEndian>()?);
    }
    Ok(values)
}

fn read_u32_array<R: Read>(reader: &mut R, n: usize) -> Result<Vec<u32>, Error> {
    let mut values = Vec::with_capacity(n);
    for _ in 0..n {
        values.push(reader.read_u32::<LittleEndian>()?);
    }
    Ok(values)
}

/// Reads a river-network graph file. `attributes` names the attribute
/// arrays to load (`RT_HR`, `flow_HR`, `basin`, `row`, `col`, `lat`, `lon`);
/// an empty slice loads everything the file contains. A requested attribute
/// the file does not carry is an error.
pub fn read_river_graph(file_name: &str, attributes: &[&str]) -> Result<RiverGraph, Error> {
    let f = File::open(file_name)?;
    let mut reader = BufReader::new(f);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != GRAPH_MAGIC {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("{} is not a river-network graph file.", file_name),
        ));
    }
    let version = reader.read_u32::<LittleEndian>()?;
    if version != FORMAT_VERSION {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("Unsupported graph file version {}.", version),
        ));
    }
    let n = reader.read_u64::<LittleEndian>()? as usize;
    let header_len = reader.read_u32::<LittleEndian>()? as usize;
    let mut header_bytes = vec![0u8; header_len];
    reader.read_exact(&mut header_bytes)?;
    let entries: Vec<AttributeEntry> = serde_json::from_slice(&header_bytes)
        .map_err(|e| Error::new(ErrorKind::InvalidData, format!("Bad graph header: {}", e)))?;

    let node_ids = read_i64_array(&mut reader, n)?;
    let downstream_ids = read_i64_array(&mut reader, n)?;
    let mut graph = RiverGraph::from_links(node_ids, &downstream_ids)?;

    let mut loaded: Vec<String> = vec![];
    for entry in &entries {
        let wanted = attributes.is_empty() || attributes.iter().any(|&a| a == entry.name);
        if !wanted {
            let width = attribute_width(&entry.kind)?;
            reader.seek_relative((width * n) as i64)?;
            continue;
        }
        match entry.name.as_str() {
            "RT_HR" => graph.residence_time = Some(read_f64_array(&mut reader, n)?),
            "flow_HR" => graph.discharge = Some(read_f64_array(&mut reader, n)?),
            "basin" => graph.basin = Some(read_i32_array(&mut reader, n)?),
            "row" => graph.grid_row = Some(read_u32_array(&mut reader, n)?),
            "col" => graph.grid_col = Some(read_u32_array(&mut reader, n)?),
            "lat" => graph.latitude = Some(read_f64_array(&mut reader, n)?),
            "lon" => graph.longitude = Some(read_f64_array(&mut reader, n)?),
            _ => {
                let width = attribute_width(&entry.kind)?;
                reader.seek_relative((width * n) as i64)?;
                continue;
            }
        }
        loaded.push(entry.name.clone());
    }
    for &name in attributes {
        if !loaded.iter().any(|l| l == name) {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("The {} attribute is not present in {}.", name, file_name),
            ));
        }
    }
    Ok(graph)
}

fn present_attributes(graph: &RiverGraph) -> Vec<AttributeEntry> {
    let mut entries = vec![];
    let mut push = |name: &str, kind: &str, present: bool| {
        if present {
            entries.push(AttributeEntry {
                name: name.to_string(),
                kind: kind.to_string(),
            });
        }
    };
    push("RT_HR", "f64", graph.residence_time.is_some());
    push("flow_HR", "f64", graph.discharge.is_some());
    push("basin", "i32", graph.basin.is_some());
    push("row", "u32", graph.grid_row.is_some());
    push("col", "u32", graph.grid_col.is_some());
    push("lat", "f64", graph.latitude.is_some());
    push("lon", "f64", graph.longitude.is_some());
    entries
}

/// Writes a graph and every attribute array it holds.
pub fn write_river_graph(file_name: &str, graph: &RiverGraph) -> Result<(), Error> {
    let f = File::create(file_name)?;
    let mut writer = BufWriter::new(f);
    let n = graph.num_nodes();

    writer.write_all(GRAPH_MAGIC)?;
    writer.write_u32::<LittleEndian>(FORMAT_VERSION)?;
    writer.write_u64::<LittleEndian>(n as u64)?;
    let entries = present_attributes(graph);
    let header = serde_json::to_vec(&entries)
        .map_err(|e| Error::new(ErrorKind::InvalidData, format!("{}", e)))?;
    writer.write_u32::<LittleEndian>(header.len() as u32)?;
    writer.write_all(&header)?;

    for &id in graph.node_ids() {
        writer.write_i64::<LittleEndian>(id)?;
    }
    for i in 0..n {
        let downstream = match graph.successor(i) {
            Some(c) => graph.node_id(c),
            None => -1,
        };
        writer.write_i64::<LittleEndian>(downstream)?;
    }
    for entry in &entries {
        match entry.name.as_str() {
            "RT_HR" => {
                for &v in graph.residence_time.as_ref().unwrap() {
                    writer.write_f64::<LittleEndian>(v)?;
                }
            }
            "flow_HR" => {
                for &v in graph.discharge.as_ref().unwrap() {
                    writer.write_f64::<LittleEndian>(v)?;
                }
            }
            "basin" => {
                for &v in graph.basin.as_ref().unwrap() {
                    writer.write_i32::<LittleEndian>(v)?;
                }
            }
            "row" => {
                for &v in graph.grid_row.as_ref().unwrap() {
                    writer.write_u32::<LittleEndian>(v)?;
                }
            }
            "col" => {
                for &v in graph.grid_col.as_ref().unwrap() {
                    writer.write_u32::<LittleEndian>(v)?;
                }
            }
            "lat" => {
                for &v in graph.latitude.as_ref().unwrap() {
                    writer.write_f64::<LittleEndian>(v)?;
                }
            }
            "lon" => {
                for &v in graph.longitude.as_ref().unwrap() {
                    writer.write_f64::<LittleEndian>(v)?;
                }
            }
            _ => {}
        }
    }
    writer.flush()?;
    Ok(())
}

/// Copies the named attribute arrays of `graph` (typically a projected or
/// subset copy) back into an existing graph file, matching nodes by pixel
/// id, and rewrites the file. Attributes the file did not previously carry
/// are added, initialised to zero on nodes the copy does not cover.
pub fn save_attributes(
    file_name: &str,
    graph: &RiverGraph,
    attributes: &[&str],
) -> Result<(), Error> {
    let mut main = read_river_graph(file_name, &[])?;
    for &name in attributes {
        match name {
            "RT_HR" | "flow_HR" | "lat" | "lon" => {
                let source = match name {
                    "RT_HR" => graph.residence_time(),
                    "flow_HR" => graph.discharge(),
                    "lat" => graph.latitude(),
                    _ => graph.longitude(),
                }?;
                let mut values = match name {
                    "RT_HR" => main.residence_time.take(),
                    "flow_HR" => main.discharge.take(),
                    "lat" => main.latitude.take(),
                    _ => main.longitude.take(),
                }
                .unwrap_or_else(|| vec![0f64; main.num_nodes()]);
                for (i, &pixel) in graph.node_ids().iter().enumerate() {
                    if let Some(j) = main.index_of(pixel) {
                        values[j] = source[i];
                    }
                }
                match name {
                    "RT_HR" => main.residence_time = Some(values),
                    "flow_HR" => main.discharge = Some(values),
                    "lat" => main.latitude = Some(values),
                    _ => main.longitude = Some(values),
                }
            }
            "basin" => {
                let source = graph.basin()?;
                let mut values = main
                    .basin
                    .take()
                    .unwrap_or_else(|| vec![0i32; main.num_nodes()]);
                for (i, &pixel) in graph.node_ids().iter().enumerate() {
                    if let Some(j) = main.index_of(pixel) {
                        values[j] = source[i];
                    }
                }
                main.basin = Some(values);
            }
            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    format!("The {} attribute cannot be saved back.", name),
                ));
            }
        }
    }
    write_river_graph(file_name, &main)
}

/// Persists a matrix bundle. Matrices still held dense are compressed
/// row-major for storage; the stored values are the residence times, so a
/// reloaded bundle can be re-attenuated at any rate.
pub fn write_matrix_bundle(file_name: &str, matrices: &[BasinMatrix]) -> Result<(), Error> {
    let f = File::create(file_name)?;
    let mut writer = BufWriter::new(f);
    writer.write_all(BUNDLE_MAGIC)?;
    writer.write_u32::<LittleEndian>(FORMAT_VERSION)?;
    writer.write_u64::<LittleEndian>(matrices.len() as u64)?;
    for bm in matrices {
        let sparse = match &bm.matrix {
            BasinMatrixStore::Sparse(m) => m.clone(),
            BasinMatrixStore::Dense(_) => bm.matrix.to_sparse(MajorOrder::Row),
        };
        let order_code = match sparse.order() {
            MajorOrder::Row => 0u8,
            MajorOrder::Column => 1u8,
        };
        writer.write_u8(order_code)?;
        writer.write_u64::<LittleEndian>(sparse.rows() as u64)?;
        writer.write_u64::<LittleEndian>(sparse.nnz() as u64)?;
        for &p in sparse.indptr() {
            writer.write_u64::<LittleEndian>(p as u64)?;
        }
        for &i in sparse.indices() {
            writer.write_u32::<LittleEndian>(i as u32)?;
        }
        for &v in sparse.data() {
            writer.write_f32::<LittleEndian>(v)?;
        }
        writer.write_i64::<LittleEndian>(bm.bridge.unwrap_or(-1))?;
        for &p in &bm.nodes {
            writer.write_i64::<LittleEndian>(p)?;
        }
        writer.write_u32::<LittleEndian>(bm.basin_ids.len() as u32)?;
        for &b in &bm.basin_ids {
            writer.write_i32::<LittleEndian>(b)?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub fn read_matrix_bundle(file_name: &str) -> Result<Vec<BasinMatrix>, Error> {
    let f = File::open(file_name)?;
    let mut reader = BufReader::new(f);
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != BUNDLE_MAGIC {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("{} is not a matrix bundle file.", file_name),
        ));
    }
    let version = reader.read_u32::<LittleEndian>()?;
    if version != FORMAT_VERSION {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("Unsupported matrix bundle version {}.", version),
        ));
    }
    let count = reader.read_u64::<LittleEndian>()? as usize;
    let mut matrices = Vec::with_capacity(count);
    for _ in 0..count {
        let order = match reader.read_u8()? {
            0 => MajorOrder::Row,
            1 => MajorOrder::Column,
            c => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("Unrecognized matrix order code {}.", c),
                ))
            }
        };
        let n = reader.read_u64::<LittleEndian>()? as usize;
        let nnz = reader.read_u64::<LittleEndian>()? as usize;
        let mut indptr = Vec::with_capacity(n + 1);
        for _ in 0..=n {
            indptr.push(reader.read_u64::<LittleEndian>()? as usize);
        }
        let mut indices = Vec::with_capacity(nnz);
        for _ in 0..nnz {
            indices.push(reader.read_u32::<LittleEndian>()? as usize);
        }
        let mut data = Vec::with_capacity(nnz);
        for _ in 0..nnz {
            data.push(reader.read_f32::<LittleEndian>()?);
        }
        let matrix = SparseMatrix::from_raw_parts(order, n, n, indptr, indices, data)?;
        let bridge = match reader.read_i64::<LittleEndian>()? {
            -1 => None,
            p => Some(p),
        };
        let nodes = read_i64_array(&mut reader, n)?;
        let id_count = reader.read_u32::<LittleEndian>()? as usize;
        let mut basin_ids = BTreeSet::new();
        for _ in 0..id_count {
            basin_ids.insert(reader.read_i32::<LittleEndian>()?);
        }
        matrices.push(BasinMatrix {
            matrix: BasinMatrixStore::Sparse(matrix),
            bridge,
            nodes,
            basin_ids,
        });
    }
    Ok(matrices)
}

#[cfg(test)]
mod test {
    use super::{
        read_matrix_bundle, read_river_graph, save_attributes, write_matrix_bundle,
        write_river_graph,
    };
    use crate::graph::RiverGraph;
    use crate::partition::sub_basins;
    use crate::rt_matrix::build_basin_matrices;
    use contam_common::structures::MajorOrder;

    fn sample_graph() -> RiverGraph {
        let mut g = RiverGraph::from_links(vec![1, 2, 3, 4], &[3, 3, 4, -1]).unwrap();
        g.set_residence_time(vec![1.0, 1.5, 2.0, 3.0]);
        g.set_discharge(vec![10.0, 20.0, 30.0, 40.0]);
        g.set_basin(vec![5, 5, 5, 5]);
        g
    }

    #[test]
    fn test_graph_round_trip_with_projection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net.rng");
        let path = path.to_str().unwrap();
        let g = sample_graph();
        write_river_graph(path, &g).unwrap();

        // full load
        let full = read_river_graph(path, &[]).unwrap();
        assert_eq!(full.node_ids(), g.node_ids());
        assert_eq!(full.residence_time().unwrap(), g.residence_time().unwrap());
        assert_eq!(full.discharge().unwrap(), g.discharge().unwrap());
        assert_eq!(full.basin().unwrap(), g.basin().unwrap());

        // projected load skips the discharge array but keeps topology
        let projected = read_river_graph(path, &["RT_HR", "basin"]).unwrap();
        assert!(projected.discharge().is_err());
        assert_eq!(
            projected.residence_time().unwrap(),
            g.residence_time().unwrap()
        );
        let order = projected.topological_order().unwrap();
        assert_eq!(order.len(), 4);

        // a missing attribute is an error
        assert!(read_river_graph(path, &["lat"]).is_err());
    }

    #[test]
    fn test_save_attributes_overlays_by_pixel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net.rng");
        let path = path.to_str().unwrap();
        write_river_graph(path, &sample_graph()).unwrap();

        // a subset copy with modified discharge on two cells
        let keep = [3i64, 4].iter().copied().collect();
        let mut sub = sample_graph().subgraph(&keep);
        sub.set_discharge(vec![99.0, 98.0]);
        save_attributes(path, &sub, &["flow_HR"]).unwrap();

        let main = read_river_graph(path, &[]).unwrap();
        assert_eq!(main.discharge().unwrap(), &[10.0, 20.0, 99.0, 98.0]);
        assert_eq!(main.residence_time().unwrap(), &[1.0, 1.5, 2.0, 3.0]);
    }

    #[test]
    fn test_bundle_round_trip() {
        let g = sample_graph();
        let order = g.topological_order().unwrap();
        let minis = sub_basins(&g, &[order], 100);
        let matrices = build_basin_matrices(&g, &minis, 0, MajorOrder::Row).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matrices.cmb");
        let path = path.to_str().unwrap();
        write_matrix_bundle(path, &matrices).unwrap();
        let reloaded = read_matrix_bundle(path).unwrap();
        assert_eq!(reloaded.len(), matrices.len());
        for (a, b) in matrices.iter().zip(reloaded.iter()) {
            assert_eq!(a.nodes, b.nodes);
            assert_eq!(a.bridge, b.bridge);
            assert_eq!(a.basin_ids, b.basin_ids);
            let n = a.matrix.rows();
            assert_eq!(n, b.matrix.rows());
            for i in 0..n {
                for j in 0..n {
                    assert_eq!(a.matrix.get(i, j), b.matrix.get(i, j));
                }
            }
        }
    }
}
