/*
This code is part of the ContamTools contaminant fate analysis library.
Authors: Dr. John Lindsay
Created: 03/05/2022
Last Modified: 02/11/2023
License: MIT
*/

use crate::graph::RiverGraph;
use contam_common::configs::Configs;
use std::fs::File;
use std::io::{BufRead, BufReader, Error, ErrorKind};

/// One discharge point: a wastewater treatment plant outfall or the
/// aggregated load of an un-sewered population, snapped to a river pixel by
/// the preprocessing layer.
#[derive(Clone, Debug)]
pub struct SourceRecord {
    pub pixel: i64,
    /// 0 = none, 1 = primary, 2 = secondary, 3 = tertiary.
    pub treatment_level: u8,
    /// Person equivalents routed through the plant.
    pub treat_a: f64,
    /// Person equivalents whose waste is filtered but not treated.
    pub filt_a: f64,
    /// Person equivalents discharging unfiltered.
    pub unfilt_a: f64,
    pub pollution: f64,
    pub country_id: i32,
    pub lat: f64,
    pub lon: f64,
}

/// The model parameters of a single evaluation.
#[derive(Clone, Copy, Debug)]
pub struct ModelParameters {
    pub excretion: f64,
    /// First-order decay constant, per hour.
    pub attenuation: f64,
    pub filter_efficacy: f64,
    pub primary_efficacy: f64,
    pub secondary_efficacy: f64,
    pub tertiary_efficacy: f64,
}

impl ModelParameters {
    pub fn from_configs(configs: &Configs, excretion: f64, attenuation: f64) -> ModelParameters {
        ModelParameters {
            excretion,
            attenuation,
            filter_efficacy: configs.filter_efficacy,
            primary_efficacy: configs.primary_efficacy,
            secondary_efficacy: configs.secondary_efficacy,
            tertiary_efficacy: configs.tertiary_efficacy,
        }
    }

    /// Fractional removal for a treatment level; level 0 removes nothing.
    pub fn treatment_efficacy(&self, level: u8) -> f64 {
        match level {
            1 => self.primary_efficacy,
            2 => self.secondary_efficacy,
            3 => self.tertiary_efficacy,
            _ => 0f64,
        }
    }
}

/// The contaminant load a single source adds at its pixel.
pub fn source_load(record: &SourceRecord, params: &ModelParameters) -> f64 {
    let treated = (1f64 - params.treatment_efficacy(record.treatment_level)) * record.treat_a;
    let filtered = (1f64 - params.filter_efficacy) * record.filt_a;
    record.pollution * params.excretion * (treated + filtered + record.unfilt_a)
}

/// Builds the per-node initial load vector. Loads sharing a pixel are
/// summed. Records whose pixel is not in the graph are skipped; the second
/// return value counts them so that callers can report the drop in verbose
/// mode (the preprocessing layer may legitimately have pruned those cells).
pub fn initial_loads(
    graph: &RiverGraph,
    records: &[SourceRecord],
    params: &ModelParameters,
) -> (Vec<f64>, usize) {
    let mut loads = vec![0f64; graph.num_nodes()];
    let mut skipped = 0usize;
    for record in records {
        match graph.index_of(record.pixel) {
            Some(i) => loads[i] += source_load(record, params),
            None => skipped += 1,
        }
    }
    (loads, skipped)
}

/// Adds the effluent water itself to the discharge attribute: each source
/// releases `(treat_a + unfilt_a)` person equivalents of water at
/// `liters_per_person_equivalent` per day, and the addition accumulates
/// downstream. Used ahead of a model run when the hydrography's discharge
/// does not already include treatment-plant outflows.
pub fn add_effluent_discharge(
    graph: &mut RiverGraph,
    order: &[usize],
    records: &[SourceRecord],
    liters_per_person_equivalent: f64,
) -> Result<(), Error> {
    graph.discharge()?;
    let liter_to_cubic_metre = 1000f64;
    let hours_in_day = 24f64;
    let cubic_metres_hour = liters_per_person_equivalent / (liter_to_cubic_metre * hours_in_day);

    let mut additional = vec![0f64; graph.num_nodes()];
    for record in records {
        if let Some(i) = graph.index_of(record.pixel) {
            additional[i] += cubic_metres_hour * (record.treat_a + record.unfilt_a);
        }
    }
    for &n in order {
        let mut inflow = 0f64;
        for &p in graph.predecessors(n) {
            inflow += additional[p as usize];
        }
        additional[n] += inflow;
    }
    let discharge = graph.discharge()?.to_vec();
    let total: Vec<f64> = discharge
        .iter()
        .zip(additional.iter())
        .map(|(d, a)| d + a)
        .collect();
    graph.set_discharge(total);
    Ok(())
}

fn column_index(header: &[String], name: &str) -> Option<usize> {
    header.iter().position(|h| h.eq_ignore_ascii_case(name))
}

fn parse_field<T: std::str::FromStr>(fields: &[&str], index: usize, line_num: usize) -> Result<T, Error> {
    fields
        .get(index)
        .and_then(|s| s.trim().parse::<T>().ok())
        .ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidData,
                format!("Error parsing the source table at line {}.", line_num + 2),
            )
        })
}

/// Reads a comma-separated source table. The required columns are
/// `pixel_number`, `Treatment_level`, `Treat_a`, `Filt_a`, and `Unfilt_a`;
/// `pollution` (default 1.0), `country_id`, `lat`, and `lon` are optional.
/// Column name matching is case-insensitive.
pub fn read_source_table(file_name: &str) -> Result<Vec<SourceRecord>, Error> {
    let f = File::open(file_name)?;
    let f = BufReader::new(f);
    let mut lines = f.lines();
    let header_line = match lines.next() {
        Some(l) => l?,
        None => {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "The source table is empty.",
            ))
        }
    };
    let header: Vec<String> = header_line
        .split(',')
        .map(|s| s.trim().to_string())
        .collect();

    let required = ["pixel_number", "treatment_level", "treat_a", "filt_a", "unfilt_a"];
    for name in required {
        if column_index(&header, name).is_none() {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("The source table does not contain a {} column.", name),
            ));
        }
    }
    let pixel_col = column_index(&header, "pixel_number").unwrap();
    let level_col = column_index(&header, "treatment_level").unwrap();
    let treat_col = column_index(&header, "treat_a").unwrap();
    let filt_col = column_index(&header, "filt_a").unwrap();
    let unfilt_col = column_index(&header, "unfilt_a").unwrap();
    let pollution_col = column_index(&header, "pollution");
    let country_col = column_index(&header, "country_id");
    let lat_col = column_index(&header, "lat");
    let lon_col = column_index(&header, "lon");

    let mut records = vec![];
    for (line_num, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        let level = parse_field::<f64>(&fields, level_col, line_num)? as u8;
        records.push(SourceRecord {
            pixel: parse_field(&fields, pixel_col, line_num)?,
            treatment_level: level,
            treat_a: parse_field(&fields, treat_col, line_num)?,
            filt_a: parse_field(&fields, filt_col, line_num)?,
            unfilt_a: parse_field(&fields, unfilt_col, line_num)?,
            pollution: match pollution_col {
                Some(c) => parse_field(&fields, c, line_num)?,
                None => 1f64,
            },
            country_id: match country_col {
                Some(c) => parse_field(&fields, c, line_num).unwrap_or(0),
                None => 0,
            },
            lat: match lat_col {
                Some(c) => parse_field(&fields, c, line_num).unwrap_or(0f64),
                None => 0f64,
            },
            lon: match lon_col {
                Some(c) => parse_field(&fields, c, line_num).unwrap_or(0f64),
                None => 0f64,
            },
        });
    }
    Ok(records)
}

#[cfg(test)]
mod test {
    use super::{add_effluent_discharge, initial_loads, source_load, ModelParameters, SourceRecord};
    use crate::graph::RiverGraph;

    fn params() -> ModelParameters {
        ModelParameters {
            excretion: 2.0,
            attenuation: 0.01,
            filter_efficacy: 1.0,
            primary_efficacy: 0.33,
            secondary_efficacy: 0.70,
            tertiary_efficacy: 0.92,
        }
    }

    fn record(pixel: i64, level: u8, treat_a: f64, filt_a: f64, unfilt_a: f64) -> SourceRecord {
        SourceRecord {
            pixel,
            treatment_level: level,
            treat_a,
            filt_a,
            unfilt_a,
            pollution: 1.0,
            country_id: 0,
            lat: 0.0,
            lon: 0.0,
        }
    }

    #[test]
    fn test_load_formula() {
        let p = params();
        // secondary plant: (1 - 0.70) * 1000, fully filtered population
        // removed, unfiltered passes through; excretion doubles the total
        let r = record(1, 2, 1000.0, 500.0, 100.0);
        assert!((source_load(&r, &p) - 2.0 * (300.0 + 0.0 + 100.0)).abs() < 1e-9);
        // untreated level contributes everything
        let r = record(1, 0, 1000.0, 0.0, 0.0);
        assert!((source_load(&r, &p) - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn test_loads_share_pixels_and_drop_missing() {
        let g = RiverGraph::from_links(vec![1, 2], &[2, -1]).unwrap();
        let records = vec![
            record(1, 0, 10.0, 0.0, 0.0),
            record(1, 0, 5.0, 0.0, 0.0),
            record(99, 0, 1000.0, 0.0, 0.0), // pruned by preprocessing
        ];
        let (loads, skipped) = initial_loads(&g, &records, &params());
        assert_eq!(skipped, 1);
        assert!((loads[0] - 30.0).abs() < 1e-9);
        assert_eq!(loads[1], 0.0);
    }

    #[test]
    fn test_effluent_discharge_accumulates_downstream() {
        let mut g = RiverGraph::from_links(vec![1, 2, 3], &[2, 3, -1]).unwrap();
        g.set_discharge(vec![100.0, 100.0, 100.0]);
        let order = g.topological_order().unwrap();
        // 160 person equivalents at 150 L each: 1 m3/h
        let records = vec![record(1, 1, 100.0, 0.0, 60.0)];
        add_effluent_discharge(&mut g, &order, &records, 150.0).unwrap();
        let d = g.discharge().unwrap();
        assert!((d[0] - 101.0).abs() < 1e-9);
        assert!((d[1] - 101.0).abs() < 1e-9);
        assert!((d[2] - 101.0).abs() < 1e-9);
    }
}
