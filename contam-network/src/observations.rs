/*
This code is part of the ContamTools contaminant fate analysis library.
Authors: Dr. John Lindsay
Created: 09/05/2022
Last Modified: 18/08/2022
License: MIT
*/

use std::fs::File;
use std::io::{BufRead, BufReader, Error, ErrorKind};

/// An observed in-stream concentration at a river pixel. The observation
/// point has already been snapped to the network by the preprocessing layer.
#[derive(Clone, Copy, Debug)]
pub struct ObservationRecord {
    pub pixel: i64,
    pub value: f64,
}

/// Reads an observation table. The pixel column may be named either
/// `pixel_number` or `locations`; the value column is named after the
/// contaminant being calibrated. Rows with an unparsable value (unmeasured
/// samples) are skipped.
pub fn read_observations(file_name: &str, contaminant: &str) -> Result<Vec<ObservationRecord>, Error> {
    let f = File::open(file_name)?;
    let f = BufReader::new(f);
    let mut lines = f.lines();
    let header_line = match lines.next() {
        Some(l) => l?,
        None => {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "The observation table is empty.",
            ))
        }
    };
    let header: Vec<String> = header_line
        .split(',')
        .map(|s| s.trim().to_string())
        .collect();
    let pixel_col = header
        .iter()
        .position(|h| h.eq_ignore_ascii_case("pixel_number") || h.eq_ignore_ascii_case("locations"))
        .ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidData,
                "The observation table does not contain a pixel_number column.",
            )
        })?;
    let value_col = header
        .iter()
        .position(|h| h.eq_ignore_ascii_case(contaminant))
        .ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidData,
                format!(
                    "The observation table does not contain a {} column.",
                    contaminant
                ),
            )
        })?;

    let mut records = vec![];
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        let pixel = match fields.get(pixel_col).and_then(|s| s.trim().parse::<i64>().ok()) {
            Some(p) => p,
            None => continue,
        };
        if let Some(value) = fields.get(value_col).and_then(|s| s.trim().parse::<f64>().ok()) {
            records.push(ObservationRecord { pixel, value });
        }
    }
    Ok(records)
}
