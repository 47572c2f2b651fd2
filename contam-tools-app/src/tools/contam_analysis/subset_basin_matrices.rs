/*
This tool is part of the ContamTools contaminant fate analysis library.
Authors: Dr. John Lindsay
Created: 12/07/2022
Last Modified: 02/11/2023
License: MIT
*/

use crate::tools::*;
use contam_common::structures::MajorOrder;
use contam_common::utils::get_formatted_elapsed_time;
use contam_network::io;
use contam_network::subset::matrix_subset;
use std::collections::BTreeSet;
use std::io::{Error, ErrorKind};
use std::path;
use std::time::Instant;

/// This tool reduces a matrix bundle (`--matrices`) to a chosen set of
/// whole-basin ids (`--basins`, a comma- or semicolon-separated list), so
/// that a region — a single large basin, typically — can be evaluated
/// without paying for the whole continent. Mini-basins outside the selection
/// are dropped, partially covered matrices are indexed down to their
/// surviving cells, and the small pieces left behind are merged back
/// together, stitching split basins across their bridge cells. Requesting a
/// basin the bundle does not cover is an error; rebuild the bundle with
/// `BuildBasinMatrices` in that case.
///
/// # See Also
/// `BuildBasinMatrices`, `RunBasinMatrices`
pub struct SubsetBasinMatrices {
    name: String,
    description: String,
    toolbox: String,
    parameters: Vec<ToolParameter>,
    example_usage: String,
}

impl SubsetBasinMatrices {
    pub fn new() -> SubsetBasinMatrices {
        // public constructor
        let name = "SubsetBasinMatrices".to_string();
        let toolbox = "Contaminant Analysis".to_string();
        let description =
            "Reduces a matrix bundle to a chosen set of basins, merging the leftovers.".to_string();

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
            name: "Input River Graph File".to_owned(),
            flags: vec!["--graph".to_owned()],
            description: "Input river-network graph file (supplies the basin field).".to_owned(),
            parameter_type: ParameterType::ExistingFile(ParameterFileType::RiverGraph),
            default_value: None,
            optional: false,
        });
        parameters.push(ToolParameter {
            name: "Basin Ids".to_owned(),
            flags: vec!["--basins".to_owned()],
            description: "Comma- or semicolon-separated list of basin ids to keep.".to_owned(),
            parameter_type: ParameterType::StringList,
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
            name: "Maximum Merged Size".to_owned(),
            flags: vec!["--cut_size".to_owned()],
            description: "Maximum number of cells in a merged matrix.".to_owned(),
            parameter_type: ParameterType::Integer,
            default_value: Some("5000".to_owned()),
            optional: true,
        });
        parameters.push(ToolParameter {
            name: "Sparsification Threshold".to_owned(),
            flags: vec!["--cut_minimum".to_owned()],
            description: "Matrices with more rows than this are frozen out of the merging."
                .to_owned(),
            parameter_type: ParameterType::Integer,
            default_value: Some("200".to_owned()),
            optional: true,
        });

        let sep: String = path::MAIN_SEPARATOR.to_string();
        let usage = format!(
            ">>.*contam_tools -r={} -v --wd=\"*path*to*data*\" -i=matrices.cmb --graph=river.rng --basins=9722 -o=danube.cmb",
            name
        )
        .replace("*", &sep);

        SubsetBasinMatrices {
            name,
            description,
            toolbox,
            parameters,
            example_usage: usage,
        }
    }
}

impl ContamTool for SubsetBasinMatrices {
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
        let mut matrices_file = String::new();
        let mut graph_file = String::new();
        let mut output_file = String::new();
        let mut basin_list = String::new();
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
            if flag_val == "-i" || flag_val == "-matrices" {
                matrices_file = if keyval {
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
            } else if flag_val == "-basins" {
                basin_list = if keyval {
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
        if !matrices_file.contains(&sep) {
            matrices_file = format!("{}{}", working_directory, matrices_file);
        }
        if !graph_file.contains(&sep) {
            graph_file = format!("{}{}", working_directory, graph_file);
        }
        if !output_file.contains(&sep) {
            output_file = format!("{}{}", working_directory, output_file);
        }

        let mut picked: BTreeSet<i32> = BTreeSet::new();
        for token in basin_list.replace(";", ",").split(",") {
            if token.trim().is_empty() {
                continue;
            }
            picked.insert(token.trim().parse::<i32>().map_err(|_| {
                Error::new(
                    ErrorKind::InvalidInput,
                    format!("Error parsing basin id {}.", token),
                )
            })?);
        }
        if picked.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "No basin ids were supplied.",
            ));
        }

        let start = Instant::now();
        if verbose {
            println!("Reading river graph...")
        };
        let graph = io::read_river_graph(&graph_file, &["basin"])?;
        let order = graph.topological_order()?;
        let (basin_lists, basin_ids) = graph.basin_node_lists(&order)?;
        let pixel_lists: Vec<Vec<i64>> = basin_lists
            .iter()
            .map(|l| l.iter().map(|&i| graph.node_id(i)).collect())
            .collect();

        if verbose {
            println!("Reading matrix bundle...")
        };
        let bundle = io::read_matrix_bundle(&matrices_file)?;
        let before = bundle.len();

        if verbose {
            println!("Subsetting matrices...")
        };
        let (reduced, node_list) = matrix_subset(
            bundle,
            &picked,
            &pixel_lists,
            &basin_ids,
            cut_size,
            cut_minimum,
            MajorOrder::Row,
        )?;
        let elapsed_time = get_formatted_elapsed_time(start);

        if verbose {
            println!("Saving data...")
        };
        io::write_matrix_bundle(&output_file, &reduced)?;

        if verbose {
            println!(
                "{} of {} matrices kept, covering {} cells.",
                reduced.len(),
                before,
                node_list.len()
            );
            println!("{}", &format!("Elapsed Time (excluding I/O): {}", elapsed_time));
        }

        Ok(())
    }
}
