/*
This tool is part of the ContamTools contaminant fate analysis library.
Authors: Dr. John Lindsay
Created: 05/07/2022
Last Modified: 02/11/2023
License: MIT
*/

use crate::tools::*;
use contam_common::utils::get_formatted_elapsed_time;
use contam_network::io;
use contam_network::matrix_run::{run_basin_matrices, stacked_order};
use contam_network::rt_matrix::attenuation_matrices;
use contam_network::sources::{read_source_table, source_load, ModelParameters};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Error, ErrorKind, Write};
use std::path;
use std::time::Instant;

/// This tool evaluates the contaminant transport model through a prebuilt
/// matrix bundle (`--matrices`, see `BuildBasinMatrices`) instead of
/// traversing the river graph. The residence-time matrices are turned into
/// decay matrices for the requested attenuation rate, which touches only the
/// stored values, and a single pass of block matrix-vector products yields
/// the concentration at every cell, threading each mini-basin's bridge cell
/// into the next block. On a fixed network this is the fast path for
/// evaluating many parameter sets.
///
/// Supplying the graph file (`--graph`) additionally attaches the discharge
/// field and appends the dilution-normalised concentration to the output.
///
/// # See Also
/// `BuildBasinMatrices`, `ContaminantTransport`, `TraceSourceColumn`
pub struct RunBasinMatrices {
    name: String,
    description: String,
    toolbox: String,
    parameters: Vec<ToolParameter>,
    example_usage: String,
}

impl RunBasinMatrices {
    pub fn new() -> RunBasinMatrices {
        // public constructor
        let name = "RunBasinMatrices".to_string();
        let toolbox = "Contaminant Analysis".to_string();
        let description =
            "Evaluates the contaminant model through a prebuilt mini-basin matrix bundle."
                .to_string();

        let mut parameters = vec![];
        parameters.push(ToolParameter {
            name: "Input Matrix Bundle".to_owned(),
            flags: vec!["-i".to_owned(), "--matrices".to_owned()],
            description: "Input matrix bundle file.".to_owned(),
            parameter_type: ParameterType::ExistingFile(ParameterFileType::MatrixBundle),
            default_value: None,
            optional: false,
        });
        parameters.push(ToolParameter {
            name: "Input Source Table".to_owned(),
            flags: vec!["--sources".to_owned()],
            description: "Input CSV table of discharge points.".to_owned(),
            parameter_type: ParameterType::ExistingFile(ParameterFileType::Csv),
            default_value: None,
            optional: false,
        });
        parameters.push(ToolParameter {
            name: "Input River Graph File".to_owned(),
            flags: vec!["--graph".to_owned()],
            description:
                "Optional graph file; supplies discharge for relative concentrations.".to_owned(),
            parameter_type: ParameterType::ExistingFile(ParameterFileType::RiverGraph),
            default_value: None,
            optional: true,
        });
        parameters.push(ToolParameter {
            name: "Output File".to_owned(),
            flags: vec!["-o".to_owned(), "--output".to_owned()],
            description: "Output CSV file of per-cell concentrations.".to_owned(),
            parameter_type: ParameterType::NewFile(ParameterFileType::Csv),
            default_value: None,
            optional: false,
        });
        parameters.push(ToolParameter {
            name: "Attenuation Rate".to_owned(),
            flags: vec!["--attenuation".to_owned()],
            description: "First-order decay constant, per hour.".to_owned(),
            parameter_type: ParameterType::Float,
            default_value: Some("0.0".to_owned()),
            optional: true,
        });
        parameters.push(ToolParameter {
            name: "Excretion Multiplier".to_owned(),
            flags: vec!["--excretion".to_owned()],
            description: "Scalar multiplier applied to every source load.".to_owned(),
            parameter_type: ParameterType::Float,
            default_value: Some("1.0".to_owned()),
            optional: true,
        });

        let sep: String = path::MAIN_SEPARATOR.to_string();
        let usage = format!(
            ">>.*contam_tools -r={} -v --wd=\"*path*to*data*\" -i=matrices.cmb --sources=plants.csv --attenuation=0.00995 -o=contamination.csv",
            name
        )
        .replace("*", &sep);

        RunBasinMatrices {
            name,
            description,
            toolbox,
            parameters,
            example_usage: usage,
        }
    }
}

impl ContamTool for RunBasinMatrices {
    fn get_tool_name(&self) -> String {
        self.name.clone()
    }

    fn get_tool_description(&self) -> String {
        self.description.clone()
    }

    fn get_tool_parameters(&self) -> String {
        match serde_json::to_string(&self.parameters) {
            Ok(json_str) => return format!("{{\"parameters\":{}}}", json_str),
            Err(err) => return format!("{:?}", err),
        }
    }

    fn get_example_usage(&self) -> String {
        self.example_usage.clone()
    }

    fn get_toolbox(&self) -> String {
        self.toolbox.clone()
    }

    fn run<'a>(
        &self,
        args: Vec<String>,
        working_directory: &'a str,
        verbose: bool,
    ) -> Result<(), Error> {
        let mut matrices_file = String::new();
        let mut sources_file = String::new();
        let mut graph_file = String::new();
        let mut output_file = String::new();
        let mut attenuation = 0f64;
        let mut excretion = 1f64;

        if args.len() == 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "Tool run with no parameters.",
            ));
        }
        for i in 0..args.len() {
            let mut arg = args[i].replace("\"", "");
            arg = arg.replace("\'", "");
            let cmd = arg.split("="); // in case an equals sign was used
            let vec = cmd.collect::<Vec<&str>>();
            let mut keyval = false;
            if vec.len() > 1 {
                keyval = true;
            }
            let flag_val = vec[0].to_lowercase().replace("--", "-");
            if flag_val == "-i" || flag_val == "-matrices" {
                matrices_file = if keyval {
                    vec[1].to_string()
                } else {
                    args[i + 1].to_string()
                };
            } else if flag_val == "-sources" {
                sources_file = if keyval {
                    vec[1].to_string()
                } else {
                    args[i + 1].to_string()
                };
            } else if flag_val == "-graph" {
                graph_file = if keyval {
                    vec[1].to_string()
                } else {
                    args[i + 1].to_string()
                };
            } else if flag_val == "-o" || flag_val == "-output" {
                output_file = if keyval {
                    vec[1].to_string()
                } else {
                    args[i + 1].to_string()
                };
            } else if flag_val == "-attenuation" {
                attenuation = if keyval {
                    vec[1]
                        .to_string()
                        .parse::<f64>()
                        .expect(&format!("Error parsing {}", flag_val))
                } else {
                    args[i + 1]
                        .to_string()
                        .parse::<f64>()
                        .expect(&format!("Error parsing {}", flag_val))
                };
            } else if flag_val == "-excretion" {
                excretion = if keyval {
                    vec[1]
                        .to_string()
                        .parse::<f64>()
                        .expect(&format!("Error parsing {}", flag_val))
                } else {
                    args[i + 1]
                        .to_string()
                        .parse::<f64>()
                        .expect(&format!("Error parsing {}", flag_val))
                };
            }
        }

        if verbose {
            println!("***************{}", "*".repeat(self.get_tool_name().len()));
            println!("* Welcome to {} *", self.get_tool_name());
            println!("***************{}", "*".repeat(self.get_tool_name().len()));
        }

        let sep: String = path::MAIN_SEPARATOR.to_string();
        if !matrices_file.contains(&sep) {
            matrices_file = format!("{}{}", working_directory, matrices_file);
        }
        if !sources_file.contains(&sep) {
            sources_file = format!("{}{}", working_directory, sources_file);
        }
        if !graph_file.is_empty() && !graph_file.contains(&sep) {
            graph_file = format!("{}{}", working_directory, graph_file);
        }
        if !output_file.contains(&sep) {
            output_file = format!("{}{}", working_directory, output_file);
        }

        let configs = contam_common::configs::get_configs()?;
        let start = Instant::now();

        if verbose {
            println!("Reading matrix bundle...")
        };
        let bundle = io::read_matrix_bundle(&matrices_file)?;
        let pixel_order = stacked_order(&bundle);

        if verbose {
            println!("Applying attenuation rate...")
        };
        let decayed = attenuation_matrices(&bundle, attenuation);

        if verbose {
            println!("Reading source table...")
        };
        let sources = read_source_table(&sources_file)?;
        let params = ModelParameters::from_configs(&configs, excretion, attenuation);
        let mut load_of: HashMap<i64, f64> = HashMap::new();
        for record in &sources {
            *load_of.entry(record.pixel).or_insert(0f64) += source_load(record, &params);
        }
        let initial: Vec<f64> = pixel_order
            .iter()
            .map(|p| load_of.get(p).copied().unwrap_or(0f64))
            .collect();
        if verbose {
            let placed = sources
                .iter()
                .filter(|r| pixel_order.contains(&r.pixel))
                .count();
            if placed < sources.len() {
                println!(
                    "{} of {} source records lie outside the bundle and were skipped.",
                    sources.len() - placed,
                    sources.len()
                );
            }
        }

        if verbose {
            println!("Running basin matrices...")
        };
        let contamination = run_basin_matrices(&decayed, &pixel_order, &initial)?;

        // the graph is only needed to express the result as a concentration
        let discharge_of: Option<HashMap<i64, f64>> = if !graph_file.is_empty() {
            let mut graph = io::read_river_graph(&graph_file, &["flow_HR"])?;
            graph.apply_discharge_floor(configs.min_discharge_cms * 3600f64)?;
            let discharge = graph.discharge()?;
            Some(
                graph
                    .node_ids()
                    .iter()
                    .enumerate()
                    .map(|(i, &p)| (p, discharge[i]))
                    .collect(),
            )
        } else {
            None
        };
        let elapsed_time = get_formatted_elapsed_time(start);

        if verbose {
            println!("Saving data...")
        };
        let f = File::create(&output_file)?;
        let mut writer = BufWriter::new(f);
        match &discharge_of {
            Some(discharge_of) => {
                writer.write_all("pixel_number,contaminant,rel_contaminant\n".as_bytes())?;
                for (i, &p) in pixel_order.iter().enumerate() {
                    let discharge = discharge_of.get(&p).copied().unwrap_or(f64::NAN);
                    writer.write_all(
                        format!("{},{},{}\n", p, contamination[i], contamination[i] / discharge)
                            .as_bytes(),
                    )?;
                }
            }
            None => {
                writer.write_all("pixel_number,contaminant\n".as_bytes())?;
                for (i, &p) in pixel_order.iter().enumerate() {
                    writer.write_all(format!("{},{}\n", p, contamination[i]).as_bytes())?;
                }
            }
        }
        writer.flush()?;

        if verbose {
            println!("{}", &format!("Elapsed Time (excluding I/O): {}", elapsed_time));
        }

        Ok(())
    }
}
