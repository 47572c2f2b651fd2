/*
This code is part of the ContamTools contaminant fate analysis library.
Authors: Dr. John Lindsay
Created: 21/06/2022
Last Modified: 02/11/2023
License: MIT
*/

pub mod contam_analysis;

use self::contam_analysis::*;
use std::io::{Error, ErrorKind};

#[derive(Default)]
pub struct ToolManager {
    pub working_dir: String,
    pub verbose: bool,
    tool_names: Vec<String>,
}

impl ToolManager {
    pub fn new<'a>(
        working_directory: &'a str,
        verbose_mode: &'a bool,
    ) -> Result<ToolManager, Error> {
        let mut tool_names = vec![];
        // contam_analysis
        tool_names.push("BuildBasinMatrices".to_string());
        tool_names.push("CalibrateAttenuation".to_string());
        tool_names.push("ContaminantTransport".to_string());
        tool_names.push("RunBasinMatrices".to_string());
        tool_names.push("SubsetBasinMatrices".to_string());
        tool_names.push("TraceSourceColumn".to_string());

        let tm = ToolManager {
            working_dir: working_directory.to_string(),
            verbose: *verbose_mode,
            tool_names,
        };
        Ok(tm)
    }

    fn get_tool(&self, tool_name: &str) -> Option<Box<dyn ContamTool + 'static>> {
        match tool_name.to_lowercase().replace("_", "").as_ref() {
            "buildbasinmatrices" => Some(Box::new(BuildBasinMatrices::new())),
            "calibrateattenuation" => Some(Box::new(CalibrateAttenuation::new())),
            "contaminanttransport" => Some(Box::new(ContaminantTransport::new())),
            "runbasinmatrices" => Some(Box::new(RunBasinMatrices::new())),
            "subsetbasinmatrices" => Some(Box::new(SubsetBasinMatrices::new())),
            "tracesourcecolumn" => Some(Box::new(TraceSourceColumn::new())),
            _ => None,
        }
    }

    pub fn run_tool(&self, tool_name: String, args: Vec<String>) -> Result<(), Error> {
        match self.get_tool(tool_name.as_ref()) {
            Some(tool) => return tool.run(args, &self.working_dir, self.verbose),
            None => {
                return Err(Error::new(
                    ErrorKind::NotFound,
                    format!("Unrecognized tool name {}.", tool_name),
                ))
            }
        }
    }

    pub fn tool_help(&self, tool_name: String) -> Result<(), Error> {
        if !tool_name.is_empty() {
            match self.get_tool(tool_name.as_ref()) {
                Some(tool) => println!("{}", get_help(tool)),
                None => {
                    return Err(Error::new(
                        ErrorKind::NotFound,
                        format!("Unrecognized tool name {}.", tool_name),
                    ))
                }
            }
        } else {
            let mut i = 1;
            for val in &self.tool_names {
                let tool = self.get_tool(&val).unwrap();
                println!("{}. {}\n", i, get_help(tool));
                i += 1;
            }
        }
        Ok(())
    }

    pub fn tool_parameters(&self, tool_name: String) -> Result<(), Error> {
        match self.get_tool(tool_name.as_ref()) {
            Some(tool) => println!("{}", tool.get_tool_parameters()),
            None => {
                return Err(Error::new(
                    ErrorKind::NotFound,
                    format!("Unrecognized tool name {}.", tool_name),
                ))
            }
        }
        Ok(())
    }

    pub fn toolbox(&self, tool_name: String) -> Result<(), Error> {
        if !tool_name.is_empty() {
            match self.get_tool(tool_name.as_ref()) {
                Some(tool) => println!("{}", tool.get_toolbox()),
                None => {
                    return Err(Error::new(
                        ErrorKind::NotFound,
                        format!("Unrecognized tool name {}.", tool_name),
                    ))
                }
            }
        } else {
            for val in &self.tool_names {
                let tool = self.get_tool(&val).unwrap();
                println!("{}: {}", tool.get_tool_name(), tool.get_toolbox());
            }
        }
        Ok(())
    }

    pub fn list_tools(&self) {
        let mut s: String = "All {} tools:\n".replace("{}", &self.tool_names.len().to_string());
        for val in &self.tool_names {
            let tool = self.get_tool(&val).unwrap();
            s.push_str(&format!(
                "{:width$} {}\n",
                tool.get_tool_name(),
                tool.get_tool_description(),
                width = 25
            ));
        }
        println!("{}", s);
    }

    pub fn list_tools_with_keywords(&self, keywords: Vec<String>) {
        let mut s = String::from("Matching tools:\n");
        for val in &self.tool_names {
            let tool = self.get_tool(&val).unwrap();
            for kw in &keywords {
                if tool
                    .get_tool_name()
                    .to_lowercase()
                    .contains(&kw.to_lowercase())
                    || tool
                        .get_tool_description()
                        .to_lowercase()
                        .contains(&kw.to_lowercase())
                {
                    s.push_str(&format!(
                        "{:width$} {}\n",
                        tool.get_tool_name(),
                        tool.get_tool_description(),
                        width = 25
                    ));
                    break;
                }
            }
        }
        println!("{}", s);
    }
}

pub trait ContamTool {
    fn get_tool_name(&self) -> String;
    fn get_tool_description(&self) -> String;
    fn get_tool_parameters(&self) -> String;
    fn get_example_usage(&self) -> String;
    fn get_toolbox(&self) -> String;
    fn run<'a>(
        &self,
        args: Vec<String>,
        working_directory: &'a str,
        verbose: bool,
    ) -> Result<(), Error>;
}

fn get_help<'a>(wt: Box<dyn ContamTool + 'a>) -> String {
    let tool_name = wt.get_tool_name();
    let description = wt.get_tool_description();
    let parameters = wt.get_tool_parameters();
    let example = wt.get_example_usage();
    let parameters: serde_json::Value =
        serde_json::from_str(&parameters).unwrap_or(serde_json::json!({ "parameters": [] }));
    let mut p = String::new();
    p.push_str("Flag               Description\n");
    p.push_str("-----------------  -----------\n");
    if let Some(a) = parameters["parameters"].as_array() {
        for d in a {
            let mut s = String::new();
            if let Some(flags) = d["flags"].as_array() {
                for f in flags {
                    s.push_str(&format!("{}, ", f.as_str().unwrap_or("")));
                }
            }
            p.push_str(&format!(
                "{:width$} {}\n",
                s.trim().trim_matches(','),
                d["description"].as_str().unwrap_or(""),
                width = 18
            ));
        }
    }
    let s: String;
    if example.len() <= 1 {
        s = format!(
            "{}
Description: {}
Toolbox: {}
Parameters:

{}
",
            tool_name,
            description,
            wt.get_toolbox(),
            p
        );
    } else {
        s = format!(
            "{}
Description: {}
Toolbox: {}
Parameters:

{}

Example usage:
{}
",
            tool_name,
            description,
            wt.get_toolbox(),
            p,
            example
        );
    }
    s
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ToolParameter {
    pub name: String,
    pub flags: Vec<String>,
    pub description: String,
    pub parameter_type: ParameterType,
    pub default_value: Option<String>,
    pub optional: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub enum ParameterType {
    Boolean,
    String,
    Integer,
    Float,
    StringList,
    ExistingFile(ParameterFileType),
    NewFile(ParameterFileType),
    OptionList(Vec<String>),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub enum ParameterFileType {
    Any,
    Csv,
    RiverGraph,
    MatrixBundle,
}
