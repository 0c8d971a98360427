//! ONNX Model Fixtures
//!
//! Builds the small elementwise models the cloud scenarios bind sessions to.
//! The committed `testdata/cloud_models/*.onnx` files are what
//! [`OnnxModelBuilder::binary`] produces for each scenario.

use std::path::Path;

use crate::error::{Result, StratusError};
use crate::format::onnx::{Dim, OnnxGraph, OnnxInitializer, OnnxModel, OnnxNode, OnnxValueInfo};
use crate::tensor::{ElementType, Value};

/// IR version written into fixture models
pub const FIXTURE_IR_VERSION: i64 = 8;
/// Default-domain opset written into fixture models
pub const FIXTURE_OPSET: i64 = 17;

/// Builder for single-node elementwise models
///
/// Binary models read `X` and `Y` and write `Z`; unary models read `X` and
/// write `Z`.
#[derive(Debug, Clone)]
pub struct OnnxModelBuilder {
    name: String,
    op_type: String,
    element_type: ElementType,
    shape: Vec<Dim>,
    inputs: Vec<String>,
    initializers: Vec<(String, Value)>,
}

impl OnnxModelBuilder {
    /// `Z = op(X, Y)` over 1-D tensors of `len` elements
    #[must_use]
    pub fn binary(op_type: &str, element_type: ElementType, len: usize) -> Self {
        Self {
            name: op_type.to_ascii_lowercase(),
            op_type: op_type.to_string(),
            element_type,
            shape: vec![Dim::Fixed(len)],
            inputs: vec!["X".to_string(), "Y".to_string()],
            initializers: Vec::new(),
        }
    }

    /// `Z = op(X)` over 1-D tensors of `len` elements
    #[must_use]
    pub fn unary(op_type: &str, element_type: ElementType, len: usize) -> Self {
        Self {
            inputs: vec!["X".to_string()],
            ..Self::binary(op_type, element_type, len)
        }
    }

    /// Set the graph name
    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Declare inputs and output with this shape
    #[must_use]
    pub fn with_shape(mut self, shape: Vec<Dim>) -> Self {
        self.shape = shape;
        self
    }

    /// Bind an input to a constant instead of a feed
    #[must_use]
    pub fn with_initializer(mut self, name: &str, value: Value) -> Self {
        self.initializers.push((name.to_string(), value));
        self
    }

    /// Assemble the model
    #[must_use]
    pub fn build(&self) -> OnnxModel {
        let output_type = match self.op_type.as_str() {
            "Equal" | "Less" | "Greater" => ElementType::Bool,
            _ => self.element_type,
        };
        let info = |name: &str, ty: ElementType| OnnxValueInfo {
            name: name.to_string(),
            elem_type: ty.onnx_code(),
            shape: Some(self.shape.clone()),
        };

        OnnxModel {
            ir_version: FIXTURE_IR_VERSION,
            producer_name: "stratus".to_string(),
            producer_version: crate::VERSION.to_string(),
            opset_imports: vec![(String::new(), FIXTURE_OPSET)],
            graph: OnnxGraph {
                name: self.name.clone(),
                nodes: vec![OnnxNode {
                    name: format!("{}_0", self.op_type.to_ascii_lowercase()),
                    op_type: self.op_type.clone(),
                    domain: String::new(),
                    inputs: self.inputs.clone(),
                    outputs: vec!["Z".to_string()],
                }],
                inputs: self
                    .inputs
                    .iter()
                    .map(|name| info(name, self.element_type))
                    .collect(),
                outputs: vec![info("Z", output_type)],
                initializers: self
                    .initializers
                    .iter()
                    .map(|(name, value)| OnnxInitializer {
                        name: name.clone(),
                        value: Some(value.clone()),
                    })
                    .collect(),
            },
        }
    }

    /// Serialized `ModelProto`
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.build().to_bytes()
    }

    /// Write the serialized model to `path`, creating parent directories
    ///
    /// # Errors
    ///
    /// Returns `IoError` if the file cannot be written.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_bytes()).map_err(|e| StratusError::IoError {
            message: format!("Failed to write {}: {e}", path.display()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_loader::{load_model, load_model_from_bytes};
    use crate::tensor::Tensor;

    #[test]
    fn test_binary_signature() {
        let meta =
            load_model_from_bytes(&OnnxModelBuilder::binary("Add", ElementType::Double, 4).to_bytes())
                .unwrap();
        assert_eq!(meta.inputs.len(), 2);
        assert_eq!(meta.inputs[1].name, "Y");
        assert_eq!(meta.outputs[0].element_type, ElementType::Double);
        assert_eq!(meta.opset_version, Some(FIXTURE_OPSET));
        assert_eq!(meta.producer_name, "stratus");
        assert_eq!(meta.graph.nodes[0].op_type, "Add");
    }

    #[test]
    fn test_comparison_outputs_bool() {
        let model = OnnxModelBuilder::binary("Less", ElementType::Int64, 3).build();
        assert_eq!(model.graph.outputs[0].elem_type, ElementType::Bool.onnx_code());
        assert_eq!(model.graph.inputs[0].elem_type, ElementType::Int64.onnx_code());
    }

    #[test]
    fn test_initializer_removes_feed() {
        let bytes = OnnxModelBuilder::binary("Mul", ElementType::Float, 2)
            .with_initializer("Y", Value::from(Tensor::vector(vec![2.0f32, 3.0])))
            .to_bytes();
        let meta = load_model_from_bytes(&bytes).unwrap();
        assert_eq!(meta.inputs.len(), 1);
        assert_eq!(meta.initializers[0].0, "Y");
    }

    #[test]
    fn test_write_to_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud_models").join("and.onnx");
        OnnxModelBuilder::binary("And", ElementType::Bool, 2)
            .named("and")
            .write_to(&path)
            .unwrap();
        let meta = load_model(&path).unwrap();
        assert_eq!(meta.graph.name, "and");
    }
}
