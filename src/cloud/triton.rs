//! Triton / KServe v2 HTTP client
//!
//! Implements REAL HTTP calls to a Triton-compatible endpoint using the JSON
//! variant of the v2 inference protocol.
//!
//! Request:
//!
//! ```json
//! {"inputs": [{"name": "X", "shape": [4], "datatype": "FP32", "data": [1, 2, 3, 4]}],
//!  "outputs": [{"name": "Z"}]}
//! ```
//!
//! Response:
//!
//! ```json
//! {"model_name": "addf", "model_version": "1",
//!  "outputs": [{"name": "Z", "shape": [4], "datatype": "FP32", "data": [5, 5, 5, 5]}]}
//! ```

use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::{CloudInvoker, InferRequest};
use crate::error::{Result, StratusError};
use crate::options::{CloudConfig, EndpointType, Severity};
use crate::tensor::{ElementType, Tensor, Value};

/// One tensor on the wire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TritonTensor {
    /// Tensor name
    pub name: String,
    /// Tensor shape
    pub shape: Vec<i64>,
    /// v2 datatype string (`FP32`, `FP64`, `INT32`, `INT64`, `BOOL`)
    pub datatype: String,
    /// Row-major data; nested arrays are flattened on decode
    pub data: Vec<serde_json::Value>,
}

/// Output requested from the endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TritonRequestedOutput {
    /// Output name
    pub name: String,
}

/// v2 inference request body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TritonInferRequest {
    /// Input tensors
    pub inputs: Vec<TritonTensor>,
    /// Requested outputs
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub outputs: Vec<TritonRequestedOutput>,
}

/// v2 inference response body
#[derive(Debug, Clone, Deserialize)]
pub struct TritonInferResponse {
    /// Model that served the request
    #[serde(default)]
    pub model_name: String,
    /// Model version that served the request
    #[serde(default)]
    pub model_version: Option<String>,
    /// Request id echoed back
    #[serde(default)]
    pub id: Option<String>,
    /// Output tensors
    pub outputs: Vec<TritonTensor>,
}

impl TritonTensor {
    /// Encode a value as a wire tensor
    #[must_use]
    pub fn from_value(name: &str, value: &Value) -> Self {
        let data = match value {
            Value::Float(t) => t.data().iter().map(|&v| serde_json::json!(v)).collect(),
            Value::Double(t) => t.data().iter().map(|&v| serde_json::json!(v)).collect(),
            Value::Int32(t) => t.data().iter().map(|&v| serde_json::json!(v)).collect(),
            Value::Int64(t) => t.data().iter().map(|&v| serde_json::json!(v)).collect(),
            Value::Bool(t) => t.data().iter().map(|&v| serde_json::json!(v)).collect(),
        };
        Self {
            name: name.to_string(),
            shape: value.shape().iter().map(|&d| d as i64).collect(),
            datatype: value.element_type().triton_name().to_string(),
            data,
        }
    }

    /// Decode the wire tensor into a value
    ///
    /// # Errors
    ///
    /// Returns `FormatError` for an unknown datatype, a negative dimension,
    /// an element that does not fit the datatype, or a data length that does
    /// not match the shape.
    pub fn to_value(&self) -> Result<Value> {
        let ty = ElementType::from_triton_name(&self.datatype).ok_or_else(|| {
            self.format_error(format!("unsupported datatype '{}'", self.datatype))
        })?;
        let shape = self
            .shape
            .iter()
            .map(|&d| usize::try_from(d).map_err(|_| self.format_error(format!("negative dimension {d}"))))
            .collect::<Result<Vec<_>>>()?;

        let mut flat = Vec::with_capacity(self.data.len());
        flatten(&self.data, &mut flat);

        let value = match ty {
            ElementType::Float => {
                let data = self.decode(&flat, |v| v.as_f64().map(|f| f as f32))?;
                Value::from(self.tensor(shape, data)?)
            },
            ElementType::Double => {
                let data = self.decode(&flat, serde_json::Value::as_f64)?;
                Value::from(self.tensor(shape, data)?)
            },
            ElementType::Int32 => {
                let data = self.decode(&flat, |v| v.as_i64().and_then(|i| i32::try_from(i).ok()))?;
                Value::from(self.tensor(shape, data)?)
            },
            ElementType::Int64 => {
                let data = self.decode(&flat, serde_json::Value::as_i64)?;
                Value::from(self.tensor(shape, data)?)
            },
            ElementType::Bool => {
                let data = self.decode(&flat, |v| {
                    v.as_bool().or_else(|| v.as_i64().map(|i| i != 0))
                })?;
                Value::from(self.tensor(shape, data)?)
            },
        };
        Ok(value)
    }

    fn decode<T>(
        &self,
        flat: &[&serde_json::Value],
        convert: impl Fn(&serde_json::Value) -> Option<T>,
    ) -> Result<Vec<T>> {
        flat.iter()
            .map(|v| {
                convert(v).ok_or_else(|| {
                    self.format_error(format!("element {v} is not valid {}", self.datatype))
                })
            })
            .collect()
    }

    fn tensor<T: crate::tensor::Element>(&self, shape: Vec<usize>, data: Vec<T>) -> Result<Tensor<T>> {
        Tensor::from_vec(shape, data).map_err(|e| self.format_error(e.to_string()))
    }

    fn format_error(&self, reason: String) -> StratusError {
        StratusError::FormatError {
            reason: format!("output '{}': {reason}", self.name),
        }
    }
}

fn flatten<'a>(values: &'a [serde_json::Value], out: &mut Vec<&'a serde_json::Value>) {
    for v in values {
        match v {
            serde_json::Value::Array(inner) => flatten(inner, out),
            other => out.push(other),
        }
    }
}

/// HTTP client for a Triton-compatible endpoint
pub struct TritonInvoker {
    client: Client,
    base_url: String,
    model_name: String,
    model_version: String,
    verbose: bool,
    timeout_secs: u64,
}

impl TritonInvoker {
    /// Create a client for the endpoint described by `config`
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError` if the HTTP client cannot be constructed.
    pub fn new(config: &CloudConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                StratusError::ConnectionError(format!("Failed to create HTTP client: {e}"))
            })?;
        Ok(Self {
            client,
            base_url: config.uri.trim_end_matches('/').to_string(),
            model_name: config.model_name.clone(),
            model_version: config.model_version.clone(),
            verbose: config.verbose,
            timeout_secs: config.timeout_secs,
        })
    }

    /// Get the configured timeout
    #[must_use]
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// Model route prefix, e.g. `{uri}/v2/models/addf/versions/1`
    #[must_use]
    pub fn model_url(&self) -> String {
        if self.model_version.is_empty() {
            format!("{}/v2/models/{}", self.base_url, self.model_name)
        } else {
            format!(
                "{}/v2/models/{}/versions/{}",
                self.base_url, self.model_name, self.model_version
            )
        }
    }

    /// Inference route
    #[must_use]
    pub fn infer_url(&self) -> String {
        format!("{}/infer", self.model_url())
    }

    /// Server readiness (`GET /v2/health/ready`)
    ///
    /// # Errors
    ///
    /// Returns error if the server is not reachable
    pub fn health_check(&self, auth_key: Option<&str>) -> Result<bool> {
        self.probe(&format!("{}/v2/health/ready", self.base_url), auth_key)
    }

    /// Model readiness (`GET /v2/models/{name}[/versions/{v}]/ready`)
    ///
    /// # Errors
    ///
    /// Returns error if the server is not reachable
    pub fn model_ready(&self, auth_key: Option<&str>) -> Result<bool> {
        self.probe(&format!("{}/ready", self.model_url()), auth_key)
    }

    fn probe(&self, url: &str, auth_key: Option<&str>) -> Result<bool> {
        let mut req = self.client.get(url);
        if let Some(key) = auth_key {
            req = req.bearer_auth(key);
        }
        let response = req
            .send()
            .map_err(|e| StratusError::ConnectionError(format!("Health check failed: {e}")))?;
        Ok(response.status().is_success())
    }

    /// Whether request and response bodies are logged for a run at `severity`
    ///
    /// Needs `cloud.verbose` on the session and a run level of info or lower.
    #[must_use]
    pub fn traces_payloads(&self, severity: Severity) -> bool {
        self.verbose && severity <= Severity::Info
    }

    /// Send an already-encoded request body
    ///
    /// Events are emitted only when they reach the run's `severity`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError`, `EndpointError` or `FormatError`.
    pub fn infer(
        &self,
        body: &TritonInferRequest,
        auth_key: &str,
        severity: Severity,
    ) -> Result<TritonInferResponse> {
        let url = self.infer_url();
        let trace_payloads = self.traces_payloads(severity);
        if trace_payloads {
            tracing::debug!(
                url = %url,
                body = %serde_json::to_string(body).unwrap_or_default(),
                "triton request"
            );
        }

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .bearer_auth(auth_key)
            .json(body)
            .send()
            .map_err(|e| StratusError::ConnectionError(format!("HTTP request to {url} failed: {e}")))?;

        let status = response.status();
        let text = response.text().map_err(|e| {
            StratusError::ConnectionError(format!("Failed to read response from {url}: {e}"))
        })?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        if trace_payloads {
            tracing::debug!(status = status.as_u16(), elapsed_ms, body = %text, "triton response");
        }

        if !status.is_success() {
            if Severity::Warning >= severity {
                tracing::warn!(status = status.as_u16(), url = %url, "endpoint rejected request");
            }
            return Err(StratusError::EndpointError {
                status: status.as_u16(),
                url,
                body: text,
            });
        }

        let parsed: TritonInferResponse =
            serde_json::from_str(&text).map_err(|e| StratusError::FormatError {
                reason: format!("Failed to parse inference response: {e}"),
            })?;
        if Severity::Info >= severity {
            tracing::debug!(
                model = %parsed.model_name,
                outputs = parsed.outputs.len(),
                elapsed_ms,
                "triton inference complete"
            );
        }
        Ok(parsed)
    }
}

impl CloudInvoker for TritonInvoker {
    fn endpoint_type(&self) -> EndpointType {
        EndpointType::Triton
    }

    fn invoke(&self, request: &InferRequest<'_>, auth_key: &str) -> Result<Vec<(String, Value)>> {
        let body = TritonInferRequest {
            inputs: request
                .inputs
                .iter()
                .map(|(name, value)| TritonTensor::from_value(name, value))
                .collect(),
            outputs: request
                .outputs
                .iter()
                .map(|name| TritonRequestedOutput { name: name.clone() })
                .collect(),
        };

        self.infer(&body, auth_key, request.severity)?
            .outputs
            .iter()
            .map(|t| Ok((t.name.clone(), t.to_value()?)))
            .collect()
    }
}
