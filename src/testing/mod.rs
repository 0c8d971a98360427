//! Cloud Dispatch Testing Infrastructure
//!
//! Fixtures shared by unit tests, integration tests and benches.
//!
//! # Design
//!
//! ```text
//! CloudScenario → model_path(model) → InferenceSession
//!       │                                  │
//!       └─ session_options(uri) ───────────┤
//!       └─ run_options(auth_key) ──────────┴─► run → assert_all_close
//! ```
//!
//! Fixture models live at `cloud_models/<name>.onnx` under `$STRATUS_TEST_DATA`
//! or the crate's `testdata/` directory.

use std::path::PathBuf;

use crate::error::Result;
use crate::options::{CloudConfig, RunOptions, SessionOptions};
use crate::tensor::{ElementType, Tensor, Value};

pub mod fixtures;

pub use fixtures::OnnxModelBuilder;

/// Relative tolerance used by the endpoint scenarios
pub const SCENARIO_RTOL: f64 = 1e-5;
/// Absolute tolerance used by the endpoint scenarios
pub const SCENARIO_ATOL: f64 = 1e-8;

/// Resolve a fixture model, e.g. `model_path("addf")` → `.../cloud_models/addf.onnx`
#[must_use]
pub fn model_path(name: &str) -> PathBuf {
    let root = std::env::var_os("STRATUS_TEST_DATA")
        .map_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata"), PathBuf::from);
    root.join("cloud_models").join(format!("{name}.onnx"))
}

/// Assert two values are elementwise close
///
/// # Panics
///
/// Panics with a numpy-style mismatch report when they are not.
#[track_caller]
pub fn assert_all_close(actual: &Value, expected: &Value, rtol: f64, atol: f64) {
    if let Err(report) = actual.closeness(expected, rtol, atol) {
        panic!("\n{report}");
    }
}

/// One endpoint round trip: two inputs, one expected output
#[derive(Debug, Clone)]
pub struct CloudScenario {
    /// Remote model name and fixture file stem
    pub model: &'static str,
    /// Element type of inputs and output
    pub element_type: ElementType,
    /// Graph operator the fixture model applies
    pub op_type: &'static str,
    /// First input
    pub x: Value,
    /// Second input
    pub y: Value,
    /// Expected `Z`
    pub expected: Value,
}

impl CloudScenario {
    /// Environment variable holding the endpoint URI, e.g. `STRATUS_ADDF_URI`
    #[must_use]
    pub fn uri_var(&self) -> String {
        format!("STRATUS_{}_URI", self.model.to_ascii_uppercase())
    }

    /// Environment variable holding the auth key, e.g. `STRATUS_ADDF_AUTH_KEY`
    #[must_use]
    pub fn auth_key_var(&self) -> String {
        format!("STRATUS_{}_AUTH_KEY", self.model.to_ascii_uppercase())
    }

    /// Length of the 1-D inputs
    #[must_use]
    pub fn len(&self) -> usize {
        self.x.size()
    }

    /// Whether the inputs are empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.x.size() == 0
    }

    /// Session entries targeting `uri` with model version `1` and verbose wire logging
    ///
    /// # Errors
    ///
    /// Propagates entry errors.
    pub fn session_options(&self, uri: &str) -> Result<SessionOptions> {
        let mut opts = SessionOptions::new();
        CloudConfig::triton(uri, self.model)
            .with_model_version("1")
            .with_verbose(true)
            .apply_to(&mut opts)?;
        Ok(opts)
    }

    /// Run entries enabling cloud dispatch with `auth_key` at info severity
    ///
    /// # Errors
    ///
    /// Propagates entry errors.
    pub fn run_options(&self, auth_key: &str) -> Result<RunOptions> {
        let mut run = RunOptions::new().with_run_tag(self.model);
        run.set_log_severity_level(1)?;
        run.add_run_config_entry(crate::options::USE_CLOUD, "1")?;
        run.add_run_config_entry(crate::options::CLOUD_AUTH_KEY, auth_key)?;
        Ok(run)
    }

    /// Named inputs in the form `InferenceSession::run` takes
    #[must_use]
    pub fn inputs(&self) -> [(&'static str, Value); 2] {
        [("X", self.x.clone()), ("Y", self.y.clone())]
    }

    /// Fixture model builder for this scenario
    #[must_use]
    pub fn model_builder(&self) -> OnnxModelBuilder {
        OnnxModelBuilder::binary(self.op_type, self.element_type, self.len()).named(self.model)
    }
}

/// The four endpoint scenarios: `addf`, `addf8`, `addi4`, `and`
#[must_use]
pub fn cloud_scenarios() -> Vec<CloudScenario> {
    fn add<T: crate::tensor::Element + From<u8>>(model: &'static str) -> CloudScenario {
        let v = |xs: [u8; 4]| Value::from(Tensor::vector(xs.iter().map(|&x| T::from(x)).collect()));
        CloudScenario {
            model,
            element_type: T::TYPE,
            op_type: "Add",
            x: v([1, 2, 3, 4]),
            y: v([4, 3, 2, 1]),
            expected: v([5, 5, 5, 5]),
        }
    }

    vec![
        add::<f32>("addf"),
        add::<f64>("addf8"),
        add::<i32>("addi4"),
        CloudScenario {
            model: "and",
            element_type: ElementType::Bool,
            op_type: "And",
            x: Value::from(Tensor::vector(vec![true, false])),
            y: Value::from(Tensor::vector(vec![true, true])),
            expected: Value::from(Tensor::vector(vec![true, false])),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_path_layout() {
        let path = model_path("addf");
        assert!(path.ends_with("cloud_models/addf.onnx"));
    }

    #[test]
    fn test_scenarios() {
        let scenarios = cloud_scenarios();
        let names: Vec<_> = scenarios.iter().map(|s| s.model).collect();
        assert_eq!(names, ["addf", "addf8", "addi4", "and"]);
        assert_eq!(scenarios[1].element_type, ElementType::Double);
        assert_eq!(scenarios[2].expected, Value::from(Tensor::vector(vec![5i32; 4])));
        assert_eq!(scenarios[3].len(), 2);
        assert_eq!(scenarios[3].auth_key_var(), "STRATUS_AND_AUTH_KEY");
    }

    #[test]
    fn test_scenario_options() {
        let s = &cloud_scenarios()[0];
        let opts = s.session_options("https://endpoint.example.com").unwrap();
        assert_eq!(opts.get_session_config_entry("cloud.model_version"), Some("1"));
        assert_eq!(opts.get_session_config_entry("cloud.verbose"), Some("true"));
        assert_eq!(opts.get_session_config_entry("cloud.endpoint_type"), Some("triton"));

        let run = s.run_options("key").unwrap();
        assert!(run.use_cloud());
        assert_eq!(run.auth_key(), Some("key"));
        assert_eq!(run.run_tag(), Some("addf"));
    }

    #[test]
    fn test_assert_all_close_passes() {
        let a = Value::from(Tensor::vector(vec![5.0f32, 5.0]));
        let b = Value::from(Tensor::vector(vec![5.000_01f32, 5.0]));
        assert_all_close(&a, &b, SCENARIO_RTOL, SCENARIO_ATOL);
    }

    #[test]
    #[should_panic(expected = "Mismatched elements: 1 / 2")]
    fn test_assert_all_close_reports() {
        let a = Value::from(Tensor::vector(vec![true, true]));
        let b = Value::from(Tensor::vector(vec![true, false]));
        assert_all_close(&a, &b, SCENARIO_RTOL, SCENARIO_ATOL);
    }
}
