/*
This tool is part of the ContamTools contaminant fate analysis library.
Authors: Dr. John Lindsay
Created: 19/07/2022
Last Modified: 14/03/2023
License: MIT
*/

use crate::tools::*;
use contam_common::utils::get_formatted_elapsed_time;
use contam_network::io;
use contam_network::matrix_run::{source_column, stacked_order};
use contam_network::rt_matrix::attenuation_matrices;
use std::fs::File;
use std::io::{BufWriter, Error, ErrorKind, Write};
use std::path;
use std::time::Instant;

/// This tool places a unit load at a single source cell (`--source_pixel`)
/// and extracts its downstream response from a matrix bundle, without a full
/// forward solve: the column of the mini-basin containing the source is
/// carried across each bridge by the ratio of the bridge response to the
/// source-cell response. Multiplying the output by a plant's actual load
/// attributes the concentration at every downstream cell to that single
/// plant, which is the building block of plant-ranking analyses.
///
/// Cells with a response below the trace cut-off are reported as zero.
///
/// # See Also
/// `RunBasinMatrices`, `BuildBasinMatrices`
pub struct TraceSourceColumn {
    name: String,
    description: String,
    toolbox: String,
    parameters: Vec<ToolParameter>,
    example_usage: String,
}

impl TraceSourceColumn {
    pub fn new() -> TraceSourceColumn {
        // public constructor
        let name = "TraceSourceColumn".to_string();
        let toolbox = "Contaminant Analysis".to_string();
        let description =
            "Extracts the downstream response of a unit load at one source cell.".to_string();

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
            name: "Source Pixel".to_owned(),
            flags: vec!["--source_pixel".to_owned()],
            description: "Pixel number of the source cell.".to_owned(),
            parameter_type: ParameterType::Integer,
            default_value: None,
            optional: false,
        });
        parameters.push(ToolParameter {
            name: "Output File".to_owned(),
            flags: vec!["-o".to_owned(), "--output".to_owned()],
            description: "Output CSV file of per-cell responses.".to_owned(),
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

        let sep: String = path::MAIN_SEPARATOR.to_string();
        let usage = format!(
            ">>.*contam_tools -r={} -v --wd=\"*path*to*data*\" -i=matrices.cmb --source_pixel=1184522 --attenuation=0.00995 -o=response.csv",
            name
        )
        .replace("*", &sep);

        TraceSourceColumn {
            name,
            description,
            toolbox,
            parameters,
            example_usage: usage,
        }
    }
}

impl ContamTool for TraceSourceColumn {
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
        let mut output_file = String::new();
        let mut source_pixel = -1i64;
        let mut attenuation = 0f64;

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
            } else if flag_val == "-source_pixel" {
                source_pixel = if keyval {
                    vec[1]
                        .to_string()
                        .parse::<i64>()
                        .expect(&format!("Error parsing {}", flag_val))
                } else {
                    args[i + 1]
                        .to_string()
                        .parse::<i64>()
                        .expect(&format!("Error parsing {}", flag_val))
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
        if !output_file.contains(&sep) {
            output_file = format!("{}{}", working_directory, output_file);
        }
        if source_pixel < 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "A source pixel number must be supplied.",
            ));
        }

        let start = Instant::now();
        if verbose {
            println!("Reading matrix bundle...")
        };
        let bundle = io::read_matrix_bundle(&matrices_file)?;
        let pixel_order = stacked_order(&bundle);

        if verbose {
            println!("Tracing the source response...")
        };
        let decayed = attenuation_matrices(&bundle, attenuation);
        let column = source_column(&decayed, &pixel_order, source_pixel)?;
        let reached = column.iter().filter(|&&v| v > 0f64).count();
        let elapsed_time = get_formatted_elapsed_time(start);

        if verbose {
            println!("Saving data...")
        };
        let f = File::create(&output_file)?;
        let mut writer = BufWriter::new(f);
        writer.write_all("pixel_number,response\n".as_bytes())?;
        for (i, &p) in pixel_order.iter().enumerate() {
            writer.write_all(format!("{},{}\n", p, column[i]).as_bytes())?;
        }
        writer.flush()?;

        if verbose {
            println!("{} cells respond to the source.", reached);
            println!("{}", &format!("Elapsed Time (excluding I/O): {}", elapsed_time));
        }

        Ok(())
    }
}
