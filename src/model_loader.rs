//! Model loading
//!
//! Reads a local ONNX model descriptor and resolves its graph signature into
//! typed input/output declarations. The descriptor is what a session binds to;
//! it is enough to validate inputs, name outputs, and execute elementwise
//! graphs on the CPU.

use std::path::{Path, PathBuf};

use crate::error::{Result, StratusError};
use crate::format::onnx::{Dim, OnnxGraph, OnnxModel, OnnxValueInfo};
use crate::format::{detect_format, format_from_extension, FormatError, ModelFormat};
use crate::tensor::{ElementType, Value};

/// Declared graph input or output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    /// Value name
    pub name: String,
    /// Element type
    pub element_type: ElementType,
    /// Declared shape, `None` when unknown
    pub shape: Option<Vec<Dim>>,
}

impl TensorInfo {
    /// Whether a concrete shape satisfies the declaration
    #[must_use]
    pub fn accepts_shape(&self, shape: &[usize]) -> bool {
        match &self.shape {
            None => true,
            Some(dims) => {
                dims.len() == shape.len() && dims.iter().zip(shape).all(|(d, &n)| d.accepts(n))
            },
        }
    }

    /// Human readable shape, e.g. `[batch, 4]`
    #[must_use]
    pub fn shape_string(&self) -> String {
        match &self.shape {
            None => "unknown".to_string(),
            Some(dims) => {
                let parts: Vec<String> = dims.iter().map(ToString::to_string).collect();
                format!("[{}]", parts.join(", "))
            },
        }
    }
}

/// Loaded model descriptor
#[derive(Debug, Clone)]
pub struct ModelMetadata {
    /// Source path (empty when loaded from bytes)
    pub path: PathBuf,
    /// Detected format
    pub format: ModelFormat,
    /// ONNX IR version
    pub ir_version: i64,
    /// Producer name
    pub producer_name: String,
    /// Default-domain opset version, if imported
    pub opset_version: Option<i64>,
    /// Inputs the caller must feed (initializers excluded)
    pub inputs: Vec<TensorInfo>,
    /// Graph outputs in declaration order
    pub outputs: Vec<TensorInfo>,
    /// Initializer values by name
    pub initializers: Vec<(String, Value)>,
    /// Graph used for local execution
    pub graph: OnnxGraph,
}

impl ModelMetadata {
    /// Look up an input declaration by name
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&TensorInfo> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// Look up an output declaration by name
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&TensorInfo> {
        self.outputs.iter().find(|o| o.name == name)
    }
}

/// Load a model descriptor from disk
///
/// # Errors
///
/// - `ModelNotFound` if the path does not exist
/// - `IoError` if the file cannot be read
/// - `FormatError` if the content is not a well-formed ONNX model
/// - `UnsupportedOperation` if a graph input or output uses an element type
///   the runtime cannot carry
pub fn load_model(path: impl AsRef<Path>) -> Result<ModelMetadata> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(StratusError::ModelNotFound(path.display().to_string()));
    }
    let data = std::fs::read(path).map_err(|e| StratusError::IoError {
        message: format!("Failed to read model file {}: {e}", path.display()),
    })?;

    let format = detect_format(&data).map_err(|e| {
        let reason = match (&e, format_from_extension(path)) {
            (FormatError::UnknownFormat, Some(ModelFormat::Onnx)) => format!(
                "{} has an .onnx extension but does not start with a ModelProto",
                path.display()
            ),
            _ => format!("{}: {e}", path.display()),
        };
        StratusError::FormatError { reason }
    })?;

    let mut metadata = from_onnx_bytes(&data)?;
    metadata.path = path.to_path_buf();
    metadata.format = format;
    Ok(metadata)
}

/// Load a model descriptor from in-memory ONNX bytes
///
/// # Errors
///
/// Same as [`load_model`], minus the filesystem errors.
pub fn load_model_from_bytes(data: &[u8]) -> Result<ModelMetadata> {
    detect_format(data).map_err(|e| StratusError::FormatError {
        reason: e.to_string(),
    })?;
    from_onnx_bytes(data)
}

fn from_onnx_bytes(data: &[u8]) -> Result<ModelMetadata> {
    let model = OnnxModel::from_bytes(data)?;
    let graph = model.graph;

    let initializers: Vec<(String, Value)> = graph
        .initializers
        .iter()
        .filter_map(|init| init.value.clone().map(|v| (init.name.clone(), v)))
        .collect();
    let is_initializer = |name: &str| graph.initializers.iter().any(|i| i.name == name);

    let inputs = graph
        .inputs
        .iter()
        .filter(|i| !is_initializer(&i.name))
        .map(|i| tensor_info(i, "input"))
        .collect::<Result<Vec<_>>>()?;
    let outputs = graph
        .outputs
        .iter()
        .map(|o| tensor_info(o, "output"))
        .collect::<Result<Vec<_>>>()?;

    if outputs.is_empty() {
        return Err(StratusError::FormatError {
            reason: "model graph declares no outputs".to_string(),
        });
    }

    let opset_version = model
        .opset_imports
        .iter()
        .find(|(domain, _)| domain.is_empty() || domain == "ai.onnx")
        .map(|(_, v)| *v);

    Ok(ModelMetadata {
        path: PathBuf::new(),
        format: ModelFormat::Onnx,
        ir_version: model.ir_version,
        producer_name: model.producer_name,
        opset_version,
        inputs,
        outputs,
        initializers,
        graph,
    })
}

fn tensor_info(info: &OnnxValueInfo, role: &str) -> Result<TensorInfo> {
    if info.name.is_empty() {
        return Err(StratusError::FormatError {
            reason: format!("graph {role} has no name"),
        });
    }
    if info.elem_type == 0 {
        return Err(StratusError::FormatError {
            reason: format!("graph {role} '{}' has no tensor element type", info.name),
        });
    }
    let element_type =
        ElementType::from_onnx(info.elem_type).ok_or_else(|| StratusError::UnsupportedOperation {
            operation: "load_model".to_string(),
            reason: format!(
                "graph {role} '{}' uses ONNX element type {}",
                info.name, info.elem_type
            ),
        })?;
    Ok(TensorInfo {
        name: info.name.clone(),
        element_type,
        shape: info.shape.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::onnx::{OnnxInitializer, OnnxNode};
    use crate::tensor::Tensor;
    use std::io::Write;

    fn value_info(name: &str, elem_type: i32, dims: Vec<Dim>) -> OnnxValueInfo {
        OnnxValueInfo {
            name: name.to_string(),
            elem_type,
            shape: Some(dims),
        }
    }

    fn model_bytes(graph: OnnxGraph) -> Vec<u8> {
        OnnxModel {
            ir_version: 8,
            producer_name: "unit".to_string(),
            producer_version: String::new(),
            opset_imports: vec![(String::new(), 17)],
            graph,
        }
        .to_bytes()
    }

    fn and_graph() -> OnnxGraph {
        OnnxGraph {
            name: "and".to_string(),
            nodes: vec![OnnxNode {
                op_type: "And".to_string(),
                inputs: vec!["X".to_string(), "Y".to_string()],
                outputs: vec!["Z".to_string()],
                ..OnnxNode::default()
            }],
            inputs: vec![
                value_info("X", 9, vec![Dim::Fixed(2)]),
                value_info("Y", 9, vec![Dim::Fixed(2)]),
            ],
            outputs: vec![value_info("Z", 9, vec![Dim::Fixed(2)])],
            initializers: Vec::new(),
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".onnx").tempfile().unwrap();
        file.write_all(&model_bytes(and_graph())).unwrap();

        let meta = load_model(file.path()).unwrap();
        assert_eq!(meta.format, ModelFormat::Onnx);
        assert_eq!(meta.ir_version, 8);
        assert_eq!(meta.opset_version, Some(17));
        assert_eq!(meta.inputs.len(), 2);
        assert_eq!(meta.input("X").unwrap().element_type, ElementType::Bool);
        assert_eq!(meta.output("Z").unwrap().shape_string(), "[2]");
        assert_eq!(meta.path, file.path());
    }

    #[test]
    fn test_format_follows_content_not_extension() {
        let mut file = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
        file.write_all(&model_bytes(and_graph())).unwrap();
        assert_eq!(load_model(file.path()).unwrap().format, ModelFormat::Onnx);

        let mut file = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
        file.write_all(b"\x00\x01\x02\x03").unwrap();
        let err = load_model(file.path()).unwrap_err();
        assert!(err.to_string().contains("Unknown model format"));
    }

    #[test]
    fn test_missing_file() {
        let err = load_model("cloud_models/does_not_exist.onnx").unwrap_err();
        assert!(matches!(err, StratusError::ModelNotFound(_)));
    }

    #[test]
    fn test_not_onnx() {
        let mut file = tempfile::Builder::new().suffix(".onnx").tempfile().unwrap();
        file.write_all(b"PK\x03\x04\x14\x00\x00\x00").unwrap();
        let err = load_model(file.path()).unwrap_err();
        assert!(err.to_string().contains("does not start with a ModelProto"));
    }

    #[test]
    fn test_initializers_are_not_required_inputs() {
        let mut graph = and_graph();
        graph.initializers.push(OnnxInitializer {
            name: "Y".to_string(),
            value: Some(Value::from(Tensor::vector(vec![true, true]))),
        });
        let meta = load_model_from_bytes(&model_bytes(graph)).unwrap();
        assert_eq!(meta.inputs.len(), 1);
        assert_eq!(meta.inputs[0].name, "X");
        assert_eq!(meta.initializers.len(), 1);
    }

    #[test]
    fn test_unsupported_element_type() {
        let mut graph = and_graph();
        graph.inputs[0].elem_type = 10;
        let err = load_model_from_bytes(&model_bytes(graph)).unwrap_err();
        assert!(matches!(err, StratusError::UnsupportedOperation { .. }));
    }

    #[test]
    fn test_no_outputs() {
        let mut graph = and_graph();
        graph.outputs.clear();
        let err = load_model_from_bytes(&model_bytes(graph)).unwrap_err();
        assert!(err.to_string().contains("no outputs"));
    }

    #[test]
    fn test_accepts_shape() {
        let info = TensorInfo {
            name: "X".to_string(),
            element_type: ElementType::Float,
            shape: Some(vec![Dim::Symbolic("N".to_string()), Dim::Fixed(4)]),
        };
        assert!(info.accepts_shape(&[3, 4]));
        assert!(!info.accepts_shape(&[3, 5]));
        assert!(!info.accepts_shape(&[4]));
        assert_eq!(info.shape_string(), "[N, 4]");

        let unknown = TensorInfo { shape: None, ..info };
        assert!(unknown.accepts_shape(&[1, 2, 3]));
    }
}
