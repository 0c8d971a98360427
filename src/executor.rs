//! Execution provider abstraction
//!
//! A session owns one local provider and, when cloud entries are configured,
//! one remote provider. Each run is routed to exactly one of them.
//!
//! ```text
//! InferenceSession
//!    │
//!    ├─► Arc<dyn ExecutionProvider>  (local)
//!    │         ├─► CpuExecutor   (production)
//!    │         └─► MockExecutor  (testing)
//!    │
//!    └─► Option<Arc<dyn ExecutionProvider>>  (remote)
//!              └─► CloudExecutor (Triton endpoint)
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{Result, StratusError};
use crate::model_loader::ModelMetadata;
use crate::options::RunOptions;
use crate::tensor::Value;

/// Everything a provider needs for one run
///
/// Inputs have already been validated against the model signature, and
/// `outputs` names only declared graph outputs.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    /// Model descriptor the session is bound to
    pub model: &'a ModelMetadata,
    /// Named input values
    pub inputs: &'a [(String, Value)],
    /// Requested output names, in the order results must be returned
    pub outputs: &'a [String],
    /// Per-call options
    pub run_options: &'a RunOptions,
}

/// Backend that executes a model for a session
///
/// Implementations must be `Send + Sync` so a session can be shared between
/// threads.
pub trait ExecutionProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Execute one request, returning one value per requested output
    ///
    /// # Errors
    ///
    /// Returns a provider-specific error when execution fails.
    fn run(&self, request: &ExecutionRequest<'_>) -> Result<Vec<Value>>;
}

/// Record of one call to a [`MockExecutor`]
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorCall {
    /// Sequential call id
    pub id: usize,
    /// Input names in the order received
    pub input_names: Vec<String>,
    /// Requested outputs
    pub outputs: Vec<String>,
    /// Auth key seen on the run options
    pub auth_key: Option<String>,
}

/// Provider that records calls and returns canned values
pub struct MockExecutor {
    name: String,
    calls: Mutex<Vec<ExecutorCall>>,
    call_counter: AtomicUsize,
    result: Option<Vec<Value>>,
    should_fail: bool,
}

impl MockExecutor {
    /// Create a mock that echoes the first input for every requested output
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: Mutex::new(Vec::new()),
            call_counter: AtomicUsize::new(0),
            result: None,
            should_fail: false,
        }
    }

    /// Return these values instead of echoing inputs
    #[must_use]
    pub fn with_result(mut self, result: Vec<Value>) -> Self {
        self.result = Some(result);
        self
    }

    /// Fail every call with an `InferenceError`
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Calls recorded so far
    #[must_use]
    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of calls recorded so far
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_counter.load(Ordering::SeqCst)
    }
}

impl ExecutionProvider for MockExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, request: &ExecutionRequest<'_>) -> Result<Vec<Value>> {
        let id = self.call_counter.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(ExecutorCall {
                id,
                input_names: request.inputs.iter().map(|(n, _)| n.clone()).collect(),
                outputs: request.outputs.to_vec(),
                auth_key: request.run_options.auth_key().map(str::to_string),
            });
        }

        if self.should_fail {
            return Err(StratusError::InferenceError(format!(
                "{} configured to fail",
                self.name
            )));
        }
        if let Some(result) = &self.result {
            return Ok(result.clone());
        }
        let first = request
            .inputs
            .first()
            .map(|(_, v)| v.clone())
            .ok_or_else(|| StratusError::InferenceError("mock received no inputs".to_string()))?;
        Ok(request.outputs.iter().map(|_| first.clone()).collect())
    }
}
