//! Cloud dispatch
//!
//! Runs a session's model on a remote inference endpoint instead of the local
//! CPU. The session's `cloud.*` entries select the endpoint; each run supplies
//! the bearer credential through `cloud.auth_key`.
//!
//! ## Supported Endpoints
//! - Triton / KServe v2: `POST {uri}/v2/models/{name}[/versions/{version}]/infer`
//!
//! ## References
//! - [1] KServe v2 inference protocol:
//!   https://kserve.github.io/website/latest/modelserving/data_plane/v2_protocol/

use crate::error::{Result, StratusError};
use crate::executor::{ExecutionProvider, ExecutionRequest};
use crate::options::{CloudConfig, EndpointType, Severity};
use crate::tensor::Value;

pub mod triton;

pub use triton::TritonInvoker;

/// Inputs and requested outputs for one remote call
#[derive(Debug, Clone, Copy)]
pub struct InferRequest<'a> {
    /// Named input values
    pub inputs: &'a [(String, Value)],
    /// Output names to request
    pub outputs: &'a [String],
    /// Log severity of the run issuing the request
    pub severity: Severity,
}

/// Client for one remote inference protocol
pub trait CloudInvoker: Send + Sync {
    /// Protocol implemented by this invoker
    fn endpoint_type(&self) -> EndpointType;

    /// Send one inference request, returning the named outputs the endpoint
    /// produced (in any order)
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError` on transport failure, `EndpointError` on a
    /// non-success status, and `FormatError` on an undecodable response.
    fn invoke(&self, request: &InferRequest<'_>, auth_key: &str) -> Result<Vec<(String, Value)>>;
}

/// Build the invoker for a cloud config
///
/// # Errors
///
/// Returns `ConnectionError` if the HTTP client cannot be constructed.
pub fn create_invoker(config: &CloudConfig) -> Result<Box<dyn CloudInvoker>> {
    match config.endpoint_type {
        EndpointType::Triton => Ok(Box::new(TritonInvoker::new(config)?)),
    }
}

/// Execution provider that forwards runs to a cloud endpoint
pub struct CloudExecutor {
    config: CloudConfig,
    invoker: Box<dyn CloudInvoker>,
}

impl CloudExecutor {
    /// Create an executor with the default invoker for `config`
    ///
    /// # Errors
    ///
    /// Same as [`create_invoker`].
    pub fn new(config: CloudConfig) -> Result<Self> {
        let invoker = create_invoker(&config)?;
        Ok(Self { config, invoker })
    }

    /// Create an executor around a custom invoker
    #[must_use]
    pub fn with_invoker(config: CloudConfig, invoker: Box<dyn CloudInvoker>) -> Self {
        Self { config, invoker }
    }

    /// Endpoint configuration
    #[must_use]
    pub fn config(&self) -> &CloudConfig {
        &self.config
    }
}

impl ExecutionProvider for CloudExecutor {
    fn name(&self) -> &str {
        "CloudExecutor"
    }

    fn run(&self, request: &ExecutionRequest<'_>) -> Result<Vec<Value>> {
        let auth_key = request
            .run_options
            .auth_key()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                StratusError::InvalidConfiguration(
                    "'cloud.auth_key' run entry is required when 'use_cloud' is set".to_string(),
                )
            })?;

        if request.run_options.logs(Severity::Info) {
            tracing::info!(
                endpoint = %self.config.uri,
                model = %self.config.model_name,
                version = %self.config.model_version,
                protocol = %self.invoker.endpoint_type(),
                "dispatching run to cloud endpoint"
            );
        }

        let mut produced = self.invoker.invoke(
            &InferRequest {
                inputs: request.inputs,
                outputs: request.outputs,
                severity: request.run_options.log_severity_level(),
            },
            auth_key,
        )?;

        request
            .outputs
            .iter()
            .map(|name| {
                let pos = produced.iter().position(|(n, _)| n == name).ok_or_else(|| {
                    StratusError::InferenceError(format!(
                        "endpoint response is missing output '{name}'"
                    ))
                })?;
                let (_, value) = produced.swap_remove(pos);
                if let Some(declared) = request.model.output(name) {
                    if declared.element_type != value.element_type() {
                        return Err(StratusError::TypeMismatch {
                            name: name.clone(),
                            expected: declared.element_type.to_string(),
                            actual: value.element_type().to_string(),
                        });
                    }
                }
                Ok(value)
            })
            .collect()
    }
}
