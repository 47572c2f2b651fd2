/*
This code is part of the ContamTools contaminant fate analysis library.
Authors: Dr. John Lindsay
Created: 21/06/2022
Last Modified: 02/11/2023
License: MIT
*/

/*!
ContamTools is a command-line platform for modelling the fate of
point-source contaminants in continental river networks. It propagates the
loads of wastewater treatment plants and un-sewered populations down a
preprocessed river graph with first-order in-stream decay, builds mini-basin
transfer matrices for fast re-parameterisation, and calibrates the
attenuation and excretion parameters against observed concentrations.

The following commands are recognized:

| Command           | Description                                                                     |
| ----------------- | ------------------------------------------------------------------------------- |
| --cd, --wd        | Changes the working directory; used in conjunction with --run flag.             |
| -h, --help        | Prints help information.                                                        |
| --listtools       | Lists all available tools, with tool descriptions. Keywords may also be used.   |
| -r, --run         | Runs a tool; used in conjunction with --cd flag; -r="ContaminantTransport".     |
| --toolbox         | Prints the toolbox associated with a tool; --toolbox=Calibrate.                 |
| --toolhelp        | Prints the help associated with a tool; --toolhelp="RunBasinMatrices".          |
| --toolparameters  | Prints the parameters (in json form) for a specific tool.                       |
| -v                | Verbose mode. Without this flag, tool outputs will not be printed.              |
| --version         | Prints the version information.                                                 |

*/

pub mod tools;

use crate::tools::ToolManager;
use std::env;
use std::io::Error;
use std::path;

#[macro_use]
extern crate serde_derive;

fn main() {
    match run() {
        Ok(()) => {}
        Err(err) => panic!("{}", err),
    }
}

fn run() -> Result<(), Error> {
    let sep: &str = &path::MAIN_SEPARATOR.to_string();
    let mut working_dir = String::new();
    let mut tool_name = String::new();
    let mut run_tool = false;
    let mut tool_help = false;
    let mut tool_parameters = false;
    let mut toolbox = false;
    let mut list_tools = false;
    let mut keywords: Vec<String> = vec![];
    let mut tool_args_vec: Vec<String> = vec![];
    let mut finding_working_dir = false;
    let args: Vec<String> = env::args().collect();
    if args.len() <= 1 {
        version();
        help();
        let tm = ToolManager::new(&working_dir, &false)?;
        tm.list_tools();
        return Ok(());
    }

    let mut configs = contam_common::configs::get_configs()?;
    let mut configs_modified = false;

    for arg in args.iter().skip(1) {
        let flag_val = arg.to_lowercase().replace("--", "-");
        if flag_val == "-h" || flag_val == "-help" {
            help();
            return Ok(());
        } else if flag_val.starts_with("-cd")
            || flag_val.starts_with("-wd")
            || flag_val.starts_with("-working_directory")
        {
            let mut v = arg
                .replace("--cd", "")
                .replace("--wd", "")
                .replace("--working_directory", "")
                .replace("-cd", "")
                .replace("-wd", "")
                .replace("-working_directory", "")
                .replace("\"", "")
                .replace("\'", "");
            if v.starts_with("=") {
                v = v[1..v.len()].to_string();
            }
            if v.trim().is_empty() {
                finding_working_dir = true;
            }
            if !v.ends_with(sep) {
                v.push_str(sep);
            }
            working_dir = v.to_string();
            if configs.working_directory != working_dir {
                configs.working_directory = working_dir.clone();
                configs_modified = true;
            }
        } else if arg.starts_with("-run") || arg.starts_with("--run") || arg.starts_with("-r") {
            let mut v = arg
                .replace("--run", "")
                .replace("-run", "")
                .replace("-r", "")
                .replace("\"", "")
                .replace("\'", "");
            if v.starts_with("=") {
                v = v[1..v.len()].to_string();
            }
            tool_name = v;
            run_tool = true;
        } else if arg.starts_with("-toolhelp") || arg.starts_with("--toolhelp") {
            let mut v = arg
                .replace("--toolhelp", "")
                .replace("-toolhelp", "")
                .replace("\"", "")
                .replace("\'", "");
            if v.starts_with("=") {
                v = v[1..v.len()].to_string();
            }
            tool_name = v;
            tool_help = true;
        } else if arg.starts_with("-toolparameters") || arg.starts_with("--toolparameters") {
            let mut v = arg
                .replace("--toolparameters", "")
                .replace("-toolparameters", "")
                .replace("\"", "")
                .replace("\'", "");
            if v.starts_with("=") {
                v = v[1..v.len()].to_string();
            }
            tool_name = v;
            tool_parameters = true;
        } else if arg.starts_with("-toolbox") || arg.starts_with("--toolbox") {
            let mut v = arg
                .replace("--toolbox", "")
                .replace("-toolbox", "")
                .replace("\"", "")
                .replace("\'", "");
            if v.starts_with("=") {
                v = v[1..v.len()].to_string();
            }
            tool_name = v;
            toolbox = true;
        } else if arg.starts_with("-listtools")
            || arg.starts_with("--listtools")
            || arg.starts_with("-list_tools")
            || arg.starts_with("--list_tools")
        {
            list_tools = true;
        } else if flag_val == "-v" {
            if !configs.verbose_mode {
                configs.verbose_mode = true;
                configs_modified = true;
            }
        } else if arg.starts_with("-version") || arg.starts_with("--version") {
            version();
            return Ok(());
        } else if finding_working_dir {
            working_dir = arg.replace("\"", "").replace("\'", "");
            if configs.working_directory != working_dir {
                configs.working_directory = working_dir.clone();
                configs_modified = true;
            }
            finding_working_dir = false;
        } else if list_tools {
            keywords.push(arg.clone());
        } else {
            tool_args_vec.push(arg.trim().to_string());
        }
    }

    if configs_modified {
        contam_common::configs::save_configs(&configs)?;
    }

    // the tools run their mini-basin work on a shared pool sized by the
    // max_procs setting
    let num_procs = if configs.max_procs > 0 {
        configs.max_procs as usize
    } else {
        num_cpus::get()
    };
    let _ = rayon::ThreadPoolBuilder::new()
        .num_threads(num_procs)
        .build_global();

    if working_dir.is_empty() {
        working_dir = configs.working_directory.clone();
    }

    let verbose = configs.verbose_mode;
    let tm = ToolManager::new(&working_dir, &verbose)?;
    if run_tool {
        return tm.run_tool(tool_name, tool_args_vec);
    } else if tool_help {
        return tm.tool_help(tool_name);
    } else if tool_parameters {
        return tm.tool_parameters(tool_name);
    } else if toolbox {
        return tm.toolbox(tool_name);
    } else if list_tools {
        if keywords.is_empty() {
            tm.list_tools();
        } else {
            tm.list_tools_with_keywords(keywords);
        }
        return Ok(());
    }

    help();
    Ok(())
}

fn help() {
    let mut ext = "";
    if cfg!(target_os = "windows") {
        ext = ".exe";
    }
    let exe_name = &format!("contam_tools{}", ext);
    let sep: String = path::MAIN_SEPARATOR.to_string();
    let s = r#"contam_tools Help

The following commands are recognized:
--cd, --wd          Changes the working directory; used in conjunction with --run flag.
-h, --help          Prints help information.
--listtools         Lists all available tools. Keywords may also be used, --listtools basin.
-r, --run           Runs a tool; used in conjunction with --wd flag; -r="ContaminantTransport".
--toolbox           Prints the toolbox associated with a tool; --toolbox=CalibrateAttenuation.
--toolhelp          Prints the help associated with a tool; --toolhelp="RunBasinMatrices".
--toolparameters    Prints the parameters (in json form) for a specific tool.
-v                  Verbose mode. Without this flag, tool outputs will not be printed.
--version           Prints the version information.

Example Usage:
>> .*EXE_NAME -r=ContaminantTransport -v --wd="*path*to*data*" --graph=river.rng --sources=plants.csv -o=out.csv
"#
    .replace("*", &sep)
    .replace("EXE_NAME", exe_name);
    println!("{}", s);
}

fn version() {
    const VERSION: Option<&'static str> = option_env!("CARGO_PKG_VERSION");
    println!(
        "contam_tools v{} by Dr. John B. Lindsay (c) 2022-2023",
        VERSION.unwrap_or("Unknown version")
    );
}
