/*
This tool is part of the ContamTools contaminant fate analysis library.
Authors: Dr. John Lindsay
Created: 26/07/2022
Last Modified: 02/11/2023
License: MIT
*/

use crate::tools::*;
use contam_common::algorithms::NelderMeadOptions;
use contam_common::utils::{get_formatted_elapsed_time, wrapped_print};
use contam_network::calibrate::Calibrator;
use contam_network::io;
use contam_network::observations::read_observations;
use contam_network::sources::{read_source_table, ModelParameters};
use std::fs::File;
use std::io::{BufWriter, Error, ErrorKind, Write};
use std::path;
use std::path::PathBuf;
use std::time::Instant;

/// This tool fits the in-stream attenuation rate and the excretion
/// multiplier of a contaminant against observed concentrations
/// (`--observations`, with the measurement column named by
/// `--contaminant`). The river graph is restricted to the gauged basins, and
/// a bounded Nelder-Mead search minimises the (optionally
/// discharge-weighted) squared error of the predicted concentrations; at
/// each candidate attenuation rate the excretion multiplier is solved in
/// closed form, so the search is effectively one-dimensional. The result CSV
/// carries the fitted parameters with the goodness of fit, and the optional
/// per-observation output (`--obs_output`) pairs every gauge's prediction
/// with its measurement for residual analysis downstream.
///
/// During the search the best parameters so far are checkpointed beside the
/// output file after every evaluation (written whole and renamed into
/// place), so an interrupted calibration can be inspected. If the iteration
/// cap is reached the best-so-far parameters are still reported, flagged as
/// unconverged.
///
/// # See Also
/// `ContaminantTransport`, `RunBasinMatrices`
pub struct CalibrateAttenuation {
    name: String,
    description: String,
    toolbox: String,
    parameters: Vec<ToolParameter>,
    example_usage: String,
}

impl CalibrateAttenuation {
    pub fn new() -> CalibrateAttenuation {
        // public constructor
        let name = "CalibrateAttenuation".to_string();
        let toolbox = "Contaminant Analysis".to_string();
        let description =
            "Fits the attenuation rate and excretion multiplier against observed concentrations."
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
            name: "Input Observation Table".to_owned(),
            flags: vec!["--observations".to_owned()],
            description: "Input CSV table of observed concentrations.".to_owned(),
            parameter_type: ParameterType::ExistingFile(ParameterFileType::Csv),
            default_value: None,
            optional: false,
        });
        parameters.push(ToolParameter {
            name: "Contaminant Name".to_owned(),
            flags: vec!["--contaminant".to_owned()],
            description: "Name of the observation column to calibrate against.".to_owned(),
            parameter_type: ParameterType::String,
            default_value: Some("contaminant".to_owned()),
            optional: true,
        });
        parameters.push(ToolParameter {
            name: "Output File".to_owned(),
            flags: vec!["-o".to_owned(), "--output".to_owned()],
            description: "Output CSV file of fitted parameters.".to_owned(),
            parameter_type: ParameterType::NewFile(ParameterFileType::Csv),
            default_value: None,
            optional: false,
        });
        parameters.push(ToolParameter {
            name: "Per-Observation Output File".to_owned(),
            flags: vec!["--obs_output".to_owned()],
            description: "Optional CSV pairing every observation with its prediction.".to_owned(),
            parameter_type: ParameterType::NewFile(ParameterFileType::Csv),
            default_value: None,
            optional: true,
        });
        parameters.push(ToolParameter {
            name: "Starting Attenuation Rate".to_owned(),
            flags: vec!["--start_attenuation".to_owned()],
            description: "Starting point of the attenuation search, per hour.".to_owned(),
            parameter_type: ParameterType::Float,
            default_value: Some("0.0056".to_owned()),
            optional: true,
        });
        parameters.push(ToolParameter {
            name: "Maximum Iterations".to_owned(),
            flags: vec!["--max_iterations".to_owned()],
            description: "Iteration cap of the Nelder-Mead search.".to_owned(),
            parameter_type: ParameterType::Integer,
            default_value: Some("500".to_owned()),
            optional: true,
        });
        parameters.push(ToolParameter {
            name: "Unweighted loss?".to_owned(),
            flags: vec!["--unweighted".to_owned()],
            description: "Uses the plain squared error instead of the discharge-weighted loss."
                .to_owned(),
            parameter_type: ParameterType::Boolean,
            default_value: None,
            optional: true,
        });

        let sep: String = path::MAIN_SEPARATOR.to_string();
        let usage = format!(
            ">>.*contam_tools -r={} -v --wd=\"*path*to*data*\" --graph=river.rng --sources=plants.csv --observations=gauges.csv --contaminant=diclofenac -o=fit.csv",
            name
        )
        .replace("*", &sep);

        CalibrateAttenuation {
            name,
            description,
            toolbox,
            parameters,
            example_usage: usage,
        }
    }
}

impl ContamTool for CalibrateAttenuation {
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
        let mut observations_file = String::new();
        let mut contaminant = String::from("contaminant");
        let mut output_file = String::new();
        let mut obs_output_file = String::new();
        let mut start_attenuation = 0.0056f64;
        let mut max_iterations = 500usize;
        let mut unweighted = false;

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
            } else if flag_val == "-observations" {
                observations_file = if keyval {
                    vec[1].to_string()
                } else {
                    args[i + 1].to_string()
                };
            } else if flag_val == "-contaminant" {
                contaminant = if keyval {
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
            } else if flag_val == "-obs_output" {
                obs_output_file = if keyval {
                    vec[1].to_string()
                } else {
                    args[i + 1].to_string()
                };
            } else if flag_val == "-start_attenuation" {
                start_attenuation = if keyval {
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
            } else if flag_val == "-max_iterations" {
                max_iterations = if keyval {
                    vec[1]
                        .to_string()
                        .parse::<f32>()
                        .expect(&format!("Error parsing {}", flag_val))
                        as usize
                } else {
                    args[i + 1]
                        .to_string()
                        .parse::<f32>()
                        .expect(&format!("Error parsing {}", flag_val))
                        as usize
                };
            } else if flag_val == "-unweighted" {
                unweighted = true;
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
        if !observations_file.contains(&sep) {
            observations_file = format!("{}{}", working_directory, observations_file);
        }
        if !output_file.contains(&sep) {
            output_file = format!("{}{}", working_directory, output_file);
        }
        if !obs_output_file.is_empty() && !obs_output_file.contains(&sep) {
            obs_output_file = format!("{}{}", working_directory, obs_output_file);
        }

        let configs = contam_common::configs::get_configs()?;
        let weighted = !unweighted && configs.weighted_loss == "sqrt_discharge";
        let start = Instant::now();

        if verbose {
            println!("Reading river graph...")
        };
        let mut graph = io::read_river_graph(&graph_file, &["RT_HR", "flow_HR", "basin"])?;
        graph.apply_discharge_floor(configs.min_discharge_cms * 3600f64)?;

        if verbose {
            println!("Reading source and observation tables...")
        };
        let sources = read_source_table(&sources_file)?;
        let observations = read_observations(&observations_file, &contaminant)?;
        if verbose {
            println!(
                "{} observations of {} read.",
                observations.len(),
                contaminant
            );
        }

        let params = ModelParameters::from_configs(&configs, 1f64, 0f64);
        let mut calibrator = Calibrator::new(&graph, &sources, &observations, &params, weighted)?;
        calibrator.set_checkpoint_path(PathBuf::from(&output_file).with_extension("last.json"));

        if verbose {
            println!(
                "Calibrating against {} gauges...",
                calibrator.num_observations()
            );
        }
        let options = NelderMeadOptions {
            max_iterations,
            ..Default::default()
        };
        let fit = calibrator.calibrate(start_attenuation, &options)?;
        let elapsed_time = get_formatted_elapsed_time(start);

        if verbose {
            println!("Saving data...")
        };
        let f = File::create(&output_file)?;
        let mut writer = BufWriter::new(f);
        writer.write_all(
            "contaminant,r_squared,excretion,attenuation,p_value,converged,iterations\n".as_bytes(),
        )?;
        writer.write_all(
            format!(
                "{},{},{},{},{},{},{}\n",
                contaminant,
                fit.r_squared,
                fit.excretion,
                fit.attenuation,
                fit.p_value,
                fit.converged,
                fit.iterations
            )
            .as_bytes(),
        )?;
        writer.flush()?;

        if !obs_output_file.is_empty() {
            let f = File::create(&obs_output_file)?;
            let mut writer = BufWriter::new(f);
            writer.write_all(
                "pixel_number,prediction,observation,discharge,error,weighted_error\n".as_bytes(),
            )?;
            let n = fit.discharges.len() as f64;
            let mean_discharge: f64 = fit.discharges.iter().sum::<f64>() / n;
            for i in 0..fit.obs_pixels.len() {
                let error = fit.predictions[i] - fit.observations[i];
                let weighted_error = error * (fit.discharges[i] / mean_discharge).sqrt();
                writer.write_all(
                    format!(
                        "{},{},{},{},{},{}\n",
                        fit.obs_pixels[i],
                        fit.predictions[i],
                        fit.observations[i],
                        fit.discharges[i],
                        error,
                        weighted_error
                    )
                    .as_bytes(),
                )?;
            }
            writer.flush()?;
        }

        if verbose {
            println!("R-squared: {:.6}", fit.r_squared);
            println!("Excretion: {:.6}", fit.excretion);
            println!("Attenuation: {:.6}", fit.attenuation);
            if !fit.converged {
                wrapped_print(
                    "WARNING: the iteration cap was reached before the search converged; the reported parameters are the best found so far.",
                    76,
                );
            }
            println!("{}", &format!("Elapsed Time: {}", elapsed_time));
        }

        Ok(())
    }
}
