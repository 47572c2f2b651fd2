use serde::{Deserialize, Serialize};
use serde_json;
use std::fs;
use std::fs::File;
use std::io::prelude::*;
use std::io::Error;

/// A structure to hold environment settings and model defaults. Backed by a
/// settings.json file in the same directory as the executable.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Configs {
    pub verbose_mode: bool,
    pub working_directory: String,
    pub max_procs: isize,
    /// Fractional contaminant removal of a primary treatment plant.
    pub primary_efficacy: f64,
    /// Fractional contaminant removal of a secondary treatment plant.
    pub secondary_efficacy: f64,
    /// Fractional contaminant removal of a tertiary treatment plant.
    pub tertiary_efficacy: f64,
    /// Fractional removal for the filtered-but-untreated pathway; 1.0
    /// excludes the in-situ load entirely.
    pub filter_efficacy: f64,
    /// Maximum mini-basin size used by the basin partitioner.
    pub cut_size: usize,
    /// Matrices with more rows than this are stored sparse; smaller ones
    /// stay dense so they remain eligible for merging.
    pub cut_minimum: usize,
    /// Lower discharge floor (m3/s), keeping residence times finite.
    pub min_discharge_cms: f64,
    /// Loss weighting for calibration; one of "none" and "sqrt_discharge".
    pub weighted_loss: String,
    /// Water volume excreted per person equivalent per day (litres).
    pub liters_per_person_equivalent: f64,
}

impl Configs {
    pub fn new() -> Configs {
        Configs {
            verbose_mode: true,
            working_directory: String::new(),
            max_procs: -1,
            primary_efficacy: 0.33,
            secondary_efficacy: 0.70,
            tertiary_efficacy: 0.92,
            filter_efficacy: 1.0,
            cut_size: 5000,
            cut_minimum: 200,
            min_discharge_cms: 0.01,
            weighted_loss: "sqrt_discharge".to_string(),
            liters_per_person_equivalent: 150.0,
        }
    }
}

pub fn get_configs() -> std::result::Result<Configs, Error> {
    let mut exe_path = std::env::current_exe().unwrap();
    exe_path.pop();
    if exe_path.ends_with("contam_tools") || exe_path.ends_with("contam_tools.exe") {
        exe_path.pop();
    }
    let config_file = exe_path.join("settings.json");
    let config_file = config_file
        .to_str()
        .unwrap_or("No configs path found.")
        .to_string();

    let configs: Configs = match fs::read_to_string(config_file) {
        Ok(contents) => {
            serde_json::from_str(&contents).expect("Failed to parse settings.json file.")
        }
        Err(_) => Configs::new(),
    };
    Ok(configs)
}

pub fn save_configs(configs: &Configs) -> std::result::Result<(), Error> {
    let configs_json =
        serde_json::to_string_pretty(&configs).expect("Error converting Configs object to JSON.");
    let mut exe_path = std::env::current_exe().unwrap();
    exe_path.pop();
    if exe_path.ends_with("contam_tools") || exe_path.ends_with("contam_tools.exe") {
        exe_path.pop();
    }
    let config_file = exe_path.join("settings.json");
    let config_file = config_file
        .to_str()
        .unwrap_or("No configs path found.")
        .to_string();
    match File::create(config_file) {
        Ok(mut file) => {
            match file.write_all(configs_json.as_bytes()) {
                Ok(()) => {} // do nothing
                Err(_e) => {
                    eprintln!("Error writing to output settings.json file, likely due to a permissions problem. Settings will not be updated.");
                }
            };
        }
        Err(_e) => {
            eprintln!("Could not create output settings.json file. ContamTools is likely installed somewhere without write permission.")
        }
    };

    Ok(())
}
