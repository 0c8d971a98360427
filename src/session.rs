//! Inference sessions
//!
//! An [`InferenceSession`] binds a loaded model descriptor to the
//! configuration it was created with. Configuration is snapshotted at
//! creation; later edits to the caller's [`SessionOptions`] have no effect.
//!
//! ```text
//! run(outputs, inputs, run_options)
//!    │
//!    ├─ validate inputs against the model signature
//!    ├─ resolve requested outputs
//!    └─ use_cloud == "1" ? CloudExecutor : CpuExecutor
//! ```

use std::path::Path;
use std::sync::Arc;

use crate::cloud::CloudExecutor;
use crate::cpu::CpuExecutor;
use crate::error::{Result, StratusError};
use crate::executor::{ExecutionProvider, ExecutionRequest};
use crate::model_loader::{load_model, ModelMetadata, TensorInfo};
use crate::options::{CloudConfig, RunOptions, SessionOptions, Severity};
use crate::tensor::Value;

/// A loaded model plus the configuration used to run it
pub struct InferenceSession {
    model: ModelMetadata,
    options: SessionOptions,
    cloud_config: Option<CloudConfig>,
    local: Arc<dyn ExecutionProvider>,
    remote: Option<Arc<dyn ExecutionProvider>>,
}

impl std::fmt::Debug for InferenceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceSession")
            .field("model", &self.model.path)
            .field("local", &self.local.name())
            .field("remote", &self.remote.as_ref().map(|r| r.name().to_string()))
            .finish_non_exhaustive()
    }
}

impl InferenceSession {
    /// Open a session on a local model file
    ///
    /// # Errors
    ///
    /// - Any [`load_model`] error
    /// - `InvalidConfiguration` / `UnsupportedOperation` for bad `cloud.*`
    ///   entries
    /// - `ConnectionError` if the endpoint client cannot be constructed
    pub fn new(path: impl AsRef<Path>, options: SessionOptions) -> Result<Self> {
        let model = load_model(path)?;
        Self::from_model(model, options)
    }

    /// Open a session on an already loaded model descriptor
    ///
    /// # Errors
    ///
    /// Same as [`InferenceSession::new`], minus the loading errors.
    pub fn from_model(model: ModelMetadata, options: SessionOptions) -> Result<Self> {
        let cloud_config = CloudConfig::from_session_options(&options)?;
        let remote = match &cloud_config {
            Some(config) => {
                Some(Arc::new(CloudExecutor::new(config.clone())?) as Arc<dyn ExecutionProvider>)
            },
            None => None,
        };

        tracing::debug!(
            model = %model.path.display(),
            inputs = model.inputs.len(),
            outputs = model.outputs.len(),
            cloud = cloud_config.as_ref().map_or("none", |c| c.uri.as_str()),
            "session created"
        );

        Ok(Self {
            model,
            options,
            cloud_config,
            local: Arc::new(CpuExecutor::new()),
            remote,
        })
    }

    /// Replace the local provider
    #[must_use]
    pub fn with_local_provider(mut self, provider: Arc<dyn ExecutionProvider>) -> Self {
        self.local = provider;
        self
    }

    /// Replace the remote provider
    ///
    /// Runs only reach it when the session also carries a cloud config.
    #[must_use]
    pub fn with_remote_provider(mut self, provider: Arc<dyn ExecutionProvider>) -> Self {
        self.remote = Some(provider);
        self
    }

    /// Declared inputs the caller must feed
    #[must_use]
    pub fn inputs(&self) -> &[TensorInfo] {
        &self.model.inputs
    }

    /// Declared graph outputs
    #[must_use]
    pub fn outputs(&self) -> &[TensorInfo] {
        &self.model.outputs
    }

    /// Loaded model descriptor
    #[must_use]
    pub fn model(&self) -> &ModelMetadata {
        &self.model
    }

    /// Session options snapshot
    #[must_use]
    pub fn session_options(&self) -> &SessionOptions {
        &self.options
    }

    /// Endpoint configuration, if any `cloud.*` entry was set
    #[must_use]
    pub fn cloud_config(&self) -> Option<&CloudConfig> {
        self.cloud_config.as_ref()
    }

    /// Run the model
    ///
    /// `output_names` of `None` requests every graph output in declaration
    /// order. Results are returned in requested order.
    ///
    /// # Errors
    ///
    /// - `InvalidConfiguration` for missing, duplicate or unknown inputs, an
    ///   unknown output, or cloud dispatch without cloud config or auth key
    /// - `TypeMismatch` / `InvalidShape` for inputs that do not match the
    ///   model signature
    /// - Any error from the selected provider
    pub fn run(
        &self,
        output_names: Option<&[&str]>,
        inputs: &[(&str, Value)],
        run_options: Option<&RunOptions>,
    ) -> Result<Vec<Value>> {
        let defaults = RunOptions::default();
        let run_options = run_options.unwrap_or(&defaults);

        let span = tracing::debug_span!(
            "run",
            tag = run_options.run_tag().unwrap_or(""),
            cloud = run_options.use_cloud()
        );
        let _enter = span.enter();

        let result = self.run_inner(output_names, inputs, run_options);
        if let Err(e) = &result {
            if run_options.logs(Severity::Error) {
                tracing::error!(error = %e, "run failed");
            }
        }
        result
    }

    fn run_inner(
        &self,
        output_names: Option<&[&str]>,
        inputs: &[(&str, Value)],
        run_options: &RunOptions,
    ) -> Result<Vec<Value>> {
        let outputs = self.resolve_outputs(output_names)?;
        let inputs = self.validate_inputs(inputs)?;
        let provider = self.select_provider(run_options)?;

        if run_options.logs(Severity::Verbose) {
            tracing::debug!(
                provider = provider.name(),
                inputs = inputs.len(),
                outputs = ?outputs,
                "executing"
            );
        }

        let values = provider.run(&ExecutionRequest {
            model: &self.model,
            inputs: &inputs,
            outputs: &outputs,
            run_options,
        })?;

        if values.len() != outputs.len() {
            return Err(StratusError::InferenceError(format!(
                "{} returned {} value(s) for {} requested output(s)",
                provider.name(),
                values.len(),
                outputs.len()
            )));
        }
        Ok(values)
    }

    fn select_provider(&self, run_options: &RunOptions) -> Result<&dyn ExecutionProvider> {
        if !run_options.use_cloud() {
            return Ok(self.local.as_ref());
        }
        let remote = match (&self.cloud_config, &self.remote) {
            (Some(_), Some(remote)) => remote.as_ref(),
            _ => {
                return Err(StratusError::InvalidConfiguration(
                    "'use_cloud' is set but the session has no 'cloud.*' configuration"
                        .to_string(),
                ))
            },
        };
        if !matches!(run_options.auth_key(), Some(key) if !key.is_empty()) {
            return Err(StratusError::InvalidConfiguration(
                "'cloud.auth_key' run entry is required when 'use_cloud' is set".to_string(),
            ));
        }
        Ok(remote)
    }

    fn resolve_outputs(&self, output_names: Option<&[&str]>) -> Result<Vec<String>> {
        match output_names {
            None => Ok(self.model.outputs.iter().map(|o| o.name.clone()).collect()),
            Some(names) => names
                .iter()
                .map(|&name| {
                    self.model
                        .output(name)
                        .map(|o| o.name.clone())
                        .ok_or_else(|| {
                            StratusError::InvalidConfiguration(format!(
                                "model has no output named '{name}'"
                            ))
                        })
                })
                .collect(),
        }
    }

    /// Check feeds against the signature, returning them in declaration order
    fn validate_inputs(&self, inputs: &[(&str, Value)]) -> Result<Vec<(String, Value)>> {
        for (i, (name, _)) in inputs.iter().enumerate() {
            if self.model.input(name).is_none() {
                return Err(StratusError::InvalidConfiguration(format!(
                    "model has no input named '{name}'"
                )));
            }
            if inputs[..i].iter().any(|(n, _)| n == name) {
                return Err(StratusError::InvalidConfiguration(format!(
                    "input '{name}' provided more than once"
                )));
            }
        }

        self.model
            .inputs
            .iter()
            .map(|info| {
                let (_, value) = inputs
                    .iter()
                    .find(|(n, _)| *n == info.name)
                    .ok_or_else(|| {
                        StratusError::InvalidConfiguration(format!(
                            "missing input '{}'",
                            info.name
                        ))
                    })?;
                if value.element_type() != info.element_type {
                    return Err(StratusError::TypeMismatch {
                        name: info.name.clone(),
                        expected: info.element_type.to_string(),
                        actual: value.element_type().to_string(),
                    });
                }
                if !info.accepts_shape(value.shape()) {
                    return Err(StratusError::InvalidShape {
                        reason: format!(
                            "input '{}' has shape {:?}, model declares {}",
                            info.name,
                            value.shape(),
                            info.shape_string()
                        ),
                    });
                }
                Ok((info.name.clone(), value.clone()))
            })
            .collect()
    }
}
