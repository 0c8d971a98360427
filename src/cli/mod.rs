//! CLI command implementations
//!
//! This module contains the business logic for the `stratus` binary,
//! extracted from main.rs for testability. Handlers return the text they
//! would print; [`entrypoint`] does the printing.

// CLI glue code - relaxed lint requirements
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_pass_by_value)]

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::error::Result;

pub mod handlers;
pub use handlers::{inspect_model, parse_input, run_model, RunConfig};

/// Stratus - run ONNX models locally or on a Triton endpoint
#[derive(Parser, Debug)]
#[command(name = "stratus")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show a model's inputs, outputs and nodes
    ///
    /// Examples:
    ///   stratus inspect testdata/cloud_models/addf.onnx
    Inspect {
        /// Path to the .onnx model
        #[arg(value_name = "MODEL")]
        model: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Run a model once
    ///
    /// Examples:
    ///   stratus run addf.onnx --input X=1,2,3,4 --input Y=4,3,2,1
    ///   STRATUS_CLOUD_AUTH_KEY=... stratus run addf.onnx -i X=1,2,3,4 -i Y=4,3,2,1 \
    ///       --cloud-uri https://host --cloud-model-name addf --cloud-model-version 1
    Run {
        /// Path to the .onnx model
        #[arg(value_name = "MODEL")]
        model: PathBuf,

        /// Input feed, NAME=v1,v2,... (repeatable)
        #[arg(short, long = "input", value_name = "NAME=VALUES", required = true)]
        inputs: Vec<String>,

        /// Output to fetch (repeatable; default: all)
        #[arg(short, long = "output", value_name = "NAME")]
        outputs: Vec<String>,

        /// Cloud endpoint options
        #[command(flatten)]
        cloud: CloudArgs,

        /// Run log severity, 0 (verbose) to 4 (fatal)
        #[arg(long, default_value = "2")]
        log_severity: i32,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

/// Cloud endpoint flags for `run`
#[derive(Args, Debug, Clone, Default)]
pub struct CloudArgs {
    /// Endpoint base URI; enables cloud dispatch
    #[arg(long)]
    pub cloud_uri: Option<String>,

    /// Remote model name (default: model file stem)
    #[arg(long)]
    pub cloud_model_name: Option<String>,

    /// Remote model version
    #[arg(long)]
    pub cloud_model_version: Option<String>,

    /// Remote protocol
    #[arg(long, default_value = "triton")]
    pub cloud_endpoint_type: String,

    /// Environment variable holding the bearer key
    #[arg(long, default_value = "STRATUS_CLOUD_AUTH_KEY")]
    pub auth_key_env: String,

    /// Log request and response bodies
    #[arg(long)]
    pub verbose: bool,
}

/// Main CLI entrypoint - dispatches commands to handlers
pub fn entrypoint(cli: Cli) -> Result<()> {
    let output = match cli.command {
        Commands::Inspect { model, json } => inspect_model(&model, json)?,
        Commands::Run {
            model,
            inputs,
            outputs,
            cloud,
            log_severity,
            json,
        } => run_model(&RunConfig {
            model,
            inputs,
            outputs,
            cloud,
            log_severity,
            json,
        })?,
    };
    println!("{output}");
    Ok(())
}
