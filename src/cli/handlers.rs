//! CLI handlers extracted from main.rs for testability

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use super::CloudArgs;
use crate::cloud::triton::TritonTensor;
use crate::error::{Result, StratusError};
use crate::model_loader::{load_model, TensorInfo};
use crate::options::{CloudConfig, RunOptions, SessionOptions, USE_CLOUD};
use crate::session::InferenceSession;
use crate::tensor::{ElementType, Tensor, Value};

/// Arguments of `stratus run`
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Model path
    pub model: PathBuf,
    /// `NAME=v1,v2,...` feeds
    pub inputs: Vec<String>,
    /// Requested outputs (empty = all)
    pub outputs: Vec<String>,
    /// Cloud endpoint flags
    pub cloud: CloudArgs,
    /// Run log severity
    pub log_severity: i32,
    /// JSON output
    pub json: bool,
}

/// Parse a `NAME=v1,v2,...` feed into a 1-D value of the declared input type
pub fn parse_input(spec: &str, declared: &[TensorInfo]) -> Result<(String, Value)> {
    let (name, values) = spec.split_once('=').ok_or_else(|| {
        StratusError::InvalidConfiguration(format!("input '{spec}' must look like NAME=v1,v2,..."))
    })?;
    let info = declared.iter().find(|i| i.name == name).ok_or_else(|| {
        StratusError::InvalidConfiguration(format!("model has no input named '{name}'"))
    })?;
    let items: Vec<&str> = values
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let bad = |item: &str| {
        StratusError::InvalidConfiguration(format!(
            "input '{name}': '{item}' is not a valid {}",
            info.element_type
        ))
    };
    let value = match info.element_type {
        ElementType::Float => Value::from(Tensor::vector(parse_all::<f32>(&items, bad)?)),
        ElementType::Double => Value::from(Tensor::vector(parse_all::<f64>(&items, bad)?)),
        ElementType::Int32 => Value::from(Tensor::vector(parse_all::<i32>(&items, bad)?)),
        ElementType::Int64 => Value::from(Tensor::vector(parse_all::<i64>(&items, bad)?)),
        ElementType::Bool => {
            let data = items
                .iter()
                .map(|&s| match s.to_ascii_lowercase().as_str() {
                    "true" | "1" => Ok(true),
                    "false" | "0" => Ok(false),
                    _ => Err(bad(s)),
                })
                .collect::<Result<Vec<_>>>()?;
            Value::from(Tensor::vector(data))
        },
    };
    Ok((name.to_string(), value))
}

fn parse_all<T: std::str::FromStr>(
    items: &[&str],
    bad: impl Fn(&str) -> StratusError,
) -> Result<Vec<T>> {
    items.iter().map(|&s| s.parse().map_err(|_| bad(s))).collect()
}

/// Resolve the cloud config from flags, falling back to `STRATUS_CLOUD_*`
fn cloud_config(model: &Path, args: &CloudArgs) -> Result<Option<CloudConfig>> {
    let Some(uri) = &args.cloud_uri else {
        if std::env::var_os("STRATUS_CLOUD_URI").is_some() {
            return CloudConfig::from_env().map(Some);
        }
        return Ok(None);
    };
    let model_name = match &args.cloud_model_name {
        Some(name) => name.clone(),
        None => model
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };
    let mut config = CloudConfig::triton(uri.clone(), model_name)
        .with_model_version(args.cloud_model_version.clone().unwrap_or_default())
        .with_verbose(args.verbose);
    config.endpoint_type = args.cloud_endpoint_type.parse()?;
    Ok(Some(config))
}

/// `stratus inspect`
pub fn inspect_model(path: &Path, json: bool) -> Result<String> {
    let meta = load_model(path)?;

    if json {
        let describe = |infos: &[TensorInfo]| {
            infos
                .iter()
                .map(|i| {
                    serde_json::json!({
                        "name": i.name,
                        "datatype": i.element_type.triton_name(),
                        "shape": i.shape_string(),
                    })
                })
                .collect::<Vec<_>>()
        };
        let doc = serde_json::json!({
            "path": meta.path.display().to_string(),
            "ir_version": meta.ir_version,
            "producer": meta.producer_name,
            "opset": meta.opset_version,
            "inputs": describe(&meta.inputs),
            "outputs": describe(&meta.outputs),
            "nodes": meta.graph.nodes.iter().map(|n| n.op_type.clone()).collect::<Vec<_>>(),
        });
        return to_json(&doc);
    }

    let mut out = String::new();
    let _ = writeln!(out, "Model: {}", meta.path.display());
    let _ = writeln!(
        out,
        "  IR version: {}  opset: {}  producer: {}",
        meta.ir_version,
        meta.opset_version.map_or_else(|| "-".to_string(), |v| v.to_string()),
        if meta.producer_name.is_empty() { "-" } else { meta.producer_name.as_str() }
    );
    let _ = writeln!(out, "Inputs:");
    for i in &meta.inputs {
        let _ = writeln!(out, "  {}: {} {}", i.name, i.element_type, i.shape_string());
    }
    let _ = writeln!(out, "Outputs:");
    for o in &meta.outputs {
        let _ = writeln!(out, "  {}: {} {}", o.name, o.element_type, o.shape_string());
    }
    let _ = writeln!(out, "Nodes:");
    for n in &meta.graph.nodes {
        let _ = writeln!(
            out,
            "  {} = {}({})",
            n.outputs.join(", "),
            n.op_type,
            n.inputs.join(", ")
        );
    }
    Ok(out.trim_end().to_string())
}

/// `stratus run`
pub fn run_model(config: &RunConfig) -> Result<String> {
    let cloud = cloud_config(&config.model, &config.cloud)?;

    let mut options = SessionOptions::new();
    if let Some(cloud) = &cloud {
        cloud.apply_to(&mut options)?;
    }
    let session = InferenceSession::new(&config.model, options)?;

    let mut run_options = RunOptions::new();
    run_options.set_log_severity_level(config.log_severity)?;
    if cloud.is_some() {
        run_options = run_options.with_auth_key_from_env(&config.cloud.auth_key_env)?;
        run_options.add_run_config_entry(USE_CLOUD, "1")?;
    }

    let feeds = config
        .inputs
        .iter()
        .map(|spec| parse_input(spec, session.inputs()))
        .collect::<Result<Vec<_>>>()?;
    let feeds: Vec<(&str, Value)> = feeds.iter().map(|(n, v)| (n.as_str(), v.clone())).collect();

    let names: Vec<String> = if config.outputs.is_empty() {
        session.outputs().iter().map(|o| o.name.clone()).collect()
    } else {
        config.outputs.clone()
    };
    let requested: Vec<&str> = names.iter().map(String::as_str).collect();

    let values = session.run(Some(requested.as_slice()), &feeds, Some(&run_options))?;

    if config.json {
        let outputs: Vec<TritonTensor> = names
            .iter()
            .zip(&values)
            .map(|(name, value)| TritonTensor::from_value(name, value))
            .collect();
        return to_json(&serde_json::json!({ "outputs": outputs }));
    }

    Ok(names
        .iter()
        .zip(&values)
        .map(|(name, value)| format!("{name}: {value}"))
        .collect::<Vec<_>>()
        .join("\n"))
}

fn to_json(value: &serde_json::Value) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| StratusError::FormatError {
        reason: format!("Failed to serialize output: {e}"),
    })
}
