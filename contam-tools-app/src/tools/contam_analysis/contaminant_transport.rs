/*
This tool is part of the ContamTools contaminant fate analysis library.
Authors: Dr. John Lindsay
Created: 22/06/2022
Last Modified: 02/11/2023
License: MIT
*/

use crate::tools::*;
use contam_common::utils::get_formatted_elapsed_time;
use contam_network::io;
use contam_network::propagate::{run_model, DecayRule};
use contam_network::sources::{
    add_effluent_discharge, initial_loads, read_source_table, ModelParameters,
};
use std::fs::File;
use std::io::{BufWriter, Error, ErrorKind, Write};
use std::path;
use std::time::Instant;

/// This tool runs the steady-state contaminant transport model directly on a
/// river-network graph (`--graph`). The discharge points of the source table
/// (`--sources`) are converted to per-cell loads using the configured
/// treatment-level efficacies, the excretion multiplier (`--excretion`), and
/// each record's population equivalents; the loads are then propagated down
/// the network, decaying by `exp(-attenuation * residence_time)` per cell
/// traversal (`--attenuation`, in inverse hours). The output CSV holds, for
/// every river cell, the absolute contaminant mass flux and the
/// dilution-normalised concentration (mass flux over discharge).
///
/// The optional `--effluent_discharge` flag first adds the treatment plants'
/// own water to the discharge field, accumulated downstream, which matters
/// on small streams that would otherwise dilute implausibly little. The
/// `--legacy_decay` flag reproduces the decay-inside-the-parent-loop
/// recurrence of older model versions; it exists for replicating published
/// runs and is not recommended for new work.
///
/// # See Also
/// `RunBasinMatrices`, `CalibrateAttenuation`
pub struct ContaminantTransport {
    name: String,
    description: String,
    toolbox: String,
    parameters: Vec<ToolParameter>,
    example_usage: String,
}

impl ContaminantTransport {
    pub fn new() -> ContaminantTransport {
        // public constructor
        let name = "ContaminantTransport".to_string();
        let toolbox = "Contaminant Analysis".to_string();
        let description =
            "Propagates point-source contaminant loads through a river network with first-order decay."
                .to_string();

        let mut parameters = vec![];
        parameters.push(ToolParameter {
            name: "Input River Graph File".to_owned(),
            flags: vec!["--graph".to_owned()],
            description: "Input river-network graph file.".to_owned(),
            parameter_type: ParameterType::ExistingFile(ParameterFileType::RiverGraph),
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
        parameters.push(ToolParameter {
            name: "Add effluent water to discharge?".to_owned(),
            flags: vec!["--effluent_discharge".to_owned()],
            description: "Adds the sources' own water outflow to the discharge field first."
                .to_owned(),
            parameter_type: ParameterType::Boolean,
            default_value: None,
            optional: true,
        });
        parameters.push(ToolParameter {
            name: "Use the legacy decay recurrence?".to_owned(),
            flags: vec!["--legacy_decay".to_owned()],
            description: "Reproduces the per-parent decay of older model versions.".to_owned(),
            parameter_type: ParameterType::Boolean,
            default_value: None,
            optional: true,
        });

        let sep: String = path::MAIN_SEPARATOR.to_string();
        let usage = format!(
            ">>.*contam_tools -r={} -v --wd=\"*path*to*data*\" --graph=river.rng --sources=plants.csv --attenuation=0.00995 -o=contamination.csv",
            name
        )
        .replace("*", &sep);

        ContaminantTransport {
            name,
            description,
            toolbox,
            parameters,
            example_usage: usage,
        }
    }
}

impl ContamTool for ContaminantTransport {
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
        let mut graph_file = String::new();
        let mut sources_file = String::new();
        let mut output_file = String::new();
        let mut attenuation = 0f64;
        let mut excretion = 1f64;
        let mut effluent_discharge = false;
        let mut legacy_decay = false;

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
            if flag_val == "-graph" {
                graph_file = if keyval {
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
            } else if flag_val == "-effluent_discharge" {
                effluent_discharge = true;
            } else if flag_val == "-legacy_decay" {
                legacy_decay = true;
            }
        }

        if verbose {
            println!("***************{}", "*".repeat(self.get_tool_name().len()));
            println!("* Welcome to {} *", self.get_tool_name());
            println!("***************{}", "*".repeat(self.get_tool_name().len()));
        }

        let sep: String = path::MAIN_SEPARATOR.to_string();
        if !graph_file.contains(&sep) {
            graph_file = format!("{}{}", working_directory, graph_file);
        }
        if !sources_file.contains(&sep) {
            sources_file = format!("{}{}", working_directory, sources_file);
        }
        if !output_file.contains(&sep) {
            output_file = format!("{}{}", working_directory, output_file);
        }

        let configs = contam_common::configs::get_configs()?;
        let start = Instant::now();

        if verbose {
            println!("Reading river graph...")
        };
        let mut graph = io::read_river_graph(&graph_file, &[])?;
        graph.residence_time()?;
        graph.apply_discharge_floor(configs.min_discharge_cms * 3600f64)?;
        let order = graph.topological_order()?;

        if verbose {
            println!("Reading source table...")
        };
        let sources = read_source_table(&sources_file)?;
        let params = ModelParameters::from_configs(&configs, excretion, attenuation);

        if effluent_discharge {
            if verbose {
                println!("Adding effluent water to the discharge field...")
            };
            add_effluent_discharge(
                &mut graph,
                &order,
                &sources,
                configs.liters_per_person_equivalent,
            )?;
        }

        let (loads, skipped) = initial_loads(&graph, &sources, &params);
        if verbose && skipped > 0 {
            println!(
                "{} of {} source records lie outside the graph and were skipped.",
                skipped,
                sources.len()
            );
        }

        if verbose {
            println!("Propagating contaminants...")
        };
        let rule = if legacy_decay {
            DecayRule::PerParent
        } else {
            DecayRule::Combined
        };
        let result = run_model(&graph, &order, &loads, attenuation, rule)?;
        let elapsed_time = get_formatted_elapsed_time(start);

        if verbose {
            println!("Saving data...")
        };
        let f = File::create(&output_file)?;
        let mut writer = BufWriter::new(f);
        let has_position = graph.latitude().is_ok() && graph.longitude().is_ok();
        if has_position {
            writer.write_all("pixel_number,lat,lon,contaminant,rel_contaminant\n".as_bytes())?;
        } else {
            writer.write_all("pixel_number,contaminant,rel_contaminant\n".as_bytes())?;
        }
        let mut progress: usize;
        let mut old_progress: usize = 1;
        let num_nodes = graph.num_nodes();
        for i in 0..num_nodes {
            if has_position {
                writer.write_all(
                    format!(
                        "{},{},{},{},{}\n",
                        graph.node_id(i),
                        graph.latitude()?[i],
                        graph.longitude()?[i],
                        result.contaminant[i],
                        result.relative[i]
                    )
                    .as_bytes(),
                )?;
            } else {
                writer.write_all(
                    format!(
                        "{},{},{}\n",
                        graph.node_id(i),
                        result.contaminant[i],
                        result.relative[i]
                    )
                    .as_bytes(),
                )?;
            }
            if verbose {
                progress = (100.0_f64 * i as f64 / (num_nodes - 1) as f64) as usize;
                if progress != old_progress {
                    println!("Writing output: {}%", progress);
                    old_progress = progress;
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
