/*
This tool is part of the ContamTools contaminant fate analysis library.
Authors: Dr. John Lindsay
Created: 28/06/2022
Last Modified: 02/11/2023
License: MIT
*/

use crate::tools::*;
use contam_common::structures::MajorOrder;
use contam_common::utils::get_formatted_elapsed_time;
use contam_network::io;
use contam_network::partition::sub_basins;
use contam_network::rt_matrix::build_basin_matrices;
use std::io::{Error, ErrorKind};
use std::path;
use std::time::Instant;

/// This tool partitions a river-network graph (`--graph`) into mini-basins
/// of at most `--cut_size` cells and builds, for each mini-basin, the
/// lower-triangular residence-time matrix whose entries hold the cumulative
/// water travel time between every connected pair of cells. The matrices are
/// written to a bundle file (`--output`) in compressed sparse form; because
/// the bundle stores residence times rather than decay factors, any
/// attenuation rate can later be applied to it without retraversing the
/// graph, which is what makes repeated model evaluations (scenario sweeps,
/// calibration) cheap.
///
/// Matrices of `--cut_minimum` rows or fewer stay dense until persisted, so
/// the `SubsetBasinMatrices` tool can still merge them.
///
/// # See Also
/// `RunBasinMatrices`, `SubsetBasinMatrices`
pub struct BuildBasinMatrices {
    name: String,
    description: String,
    toolbox: String,
    parameters: Vec<ToolParameter>,
    example_usage: String,
}

impl BuildBasinMatrices {
    pub fn new() -> BuildBasinMatrices {
        // public constructor
        let name = "BuildBasinMatrices".to_string();
        let toolbox = "Contaminant Analysis".to_string();
        let description =
            "Builds the mini-basin residence-time transfer matrices of a river network."
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
            name: "Output Matrix Bundle".to_owned(),
            flags: vec!["-o".to_owned(), "--output".to_owned()],
            description: "Output matrix bundle file.".to_owned(),
            parameter_type: ParameterType::NewFile(ParameterFileType::MatrixBundle),
            default_value: None,
            optional: false,
        });
        parameters.push(ToolParameter {
            name: "Maximum Mini-Basin Size".to_owned(),
            flags: vec!["--cut_size".to_owned()],
            description: "Maximum number of cells per mini-basin.".to_owned(),
            parameter_type: ParameterType::Integer,
            default_value: Some("5000".to_owned()),
            optional: true,
        });
        parameters.push(ToolParameter {
            name: "Sparsification Threshold".to_owned(),
            flags: vec!["--cut_minimum".to_owned()],
            description: "Matrices with more rows than this are compressed immediately."
                .to_owned(),
            parameter_type: ParameterType::Integer,
            default_value: Some("200".to_owned()),
            optional: true,
        });

        let sep: String = path::MAIN_SEPARATOR.to_string();
        let usage = format!(
            ">>.*contam_tools -r={} -v --wd=\"*path*to*data*\" --graph=river.rng --cut_size=5000 -o=matrices.cmb",
            name
        )
        .replace("*", &sep);

        BuildBasinMatrices {
            name,
            description,
            toolbox,
            parameters,
            example_usage: usage,
        }
    }
}

impl ContamTool for BuildBasinMatrices {
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
        let configs = contam_common::configs::get_configs()?;
        let mut graph_file = String::new();
        let mut output_file = String::new();
        let mut cut_size = configs.cut_size;
        let mut cut_minimum = configs.cut_minimum;

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
            } else if flag_val == "-o" || flag_val == "-output" {
                output_file = if keyval {
                    vec[1].to_string()
                } else {
                    args[i + 1].to_string()
                };
            } else if flag_val == "-cut_size" {
                cut_size = if keyval {
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
            } else if flag_val == "-cut_minimum" {
                cut_minimum = if keyval {
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
        if !output_file.contains(&sep) {
            output_file = format!("{}{}", working_directory, output_file);
        }

        let start = Instant::now();
        if verbose {
            println!("Reading river graph...")
        };
        let graph = io::read_river_graph(&graph_file, &["RT_HR", "basin"])?;
        let order = graph.topological_order()?;
        let (basin_lists, _basin_ids) = graph.basin_node_lists(&order)?;
        if verbose {
            println!("{} basins found.", basin_lists.len());
            println!("Partitioning into mini-basins...");
        }
        let minis = sub_basins(&graph, &basin_lists, cut_size);
        if verbose {
            println!("{} mini-basins.", minis.len());
            println!("Building residence-time matrices...");
        }
        let matrices = build_basin_matrices(&graph, &minis, cut_minimum, MajorOrder::Row)?;
        let largest = matrices.iter().map(|m| m.matrix.rows()).max().unwrap_or(0);
        let elapsed_time = get_formatted_elapsed_time(start);

        if verbose {
            println!("Saving data...")
        };
        io::write_matrix_bundle(&output_file, &matrices)?;

        if verbose {
            println!("{} matrices written, largest is {} rows.", matrices.len(), largest);
            println!("{}", &format!("Elapsed Time (excluding I/O): {}", elapsed_time));
        }

        Ok(())
    }
}
