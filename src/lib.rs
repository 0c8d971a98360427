//! # Stratus
//!
//! ONNX inference sessions that run locally or dispatch to a cloud endpoint.
//!
//! A session is opened on a local `.onnx` model descriptor. Each run executes
//! the graph on the CPU, or, when the run options carry `use_cloud = "1"`,
//! forwards the inputs to a Triton / KServe v2 endpoint configured through
//! the session's `cloud.*` entries.
//!
//! ## Example
//!
//! ```rust
//! use stratus::Tensor;
//!
//! let a = Tensor::from_vec(vec![2, 2], vec![
//!     1.0f32, 2.0,
//!     3.0, 4.0,
//! ]).unwrap();
//!
//! assert_eq!(a.shape(), &[2, 2]);
//! assert_eq!(a.ndim(), 2);
//! assert_eq!(a.size(), 4);
//! ```
//!
//! ## Cloud dispatch
//!
//! ```rust,no_run
//! use stratus::{InferenceSession, RunOptions, SessionOptions, Tensor, Value};
//!
//! let mut opts = SessionOptions::new();
//! opts.add_session_config_entry("cloud.endpoint_type", "triton")?;
//! opts.add_session_config_entry("cloud.uri", "https://endpoint.example.com")?;
//! opts.add_session_config_entry("cloud.model_name", "addf")?;
//! opts.add_session_config_entry("cloud.model_version", "1")?;
//!
//! let session = InferenceSession::new("cloud_models/addf.onnx", opts)?;
//!
//! let mut run = RunOptions::new().with_auth_key_from_env("ADDF_AUTH_KEY")?;
//! run.add_run_config_entry("use_cloud", "1")?;
//!
//! let x = Value::from(Tensor::vector(vec![1.0f32, 2.0, 3.0, 4.0]));
//! let y = Value::from(Tensor::vector(vec![4.0f32, 3.0, 2.0, 1.0]));
//! let z = session.run(None, &[("X", x), ("Y", y)], Some(&run))?;
//! # Ok::<(), stratus::StratusError>(())
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// Clippy allows (MUST come after deny/warn to override them)
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_wrap)] // usize dims -> i64 on the wire
#![allow(clippy::cast_precision_loss)] // i64 -> f64 for tolerance checks
#![allow(clippy::cast_possible_truncation)] // protobuf varints -> usize/i32
#![allow(clippy::cast_sign_loss)] // i64 -> u64 varint encoding
#![allow(clippy::must_use_candidate)] // Not all methods need #[must_use]
#![allow(clippy::doc_markdown)] // Allow technical terms without backticks
#![allow(clippy::uninlined_format_args)] // Prefer explicit format args
#![allow(clippy::missing_panics_doc)] // Allow missing Panics doc sections
#![allow(clippy::float_cmp)] // Allow float comparisons in tests

/// CLI command implementations (extracted for testability)
pub mod cli;
/// Cloud endpoint dispatch
///
/// Triton / KServe v2 HTTP client behind the `CloudInvoker` seam, wrapped in
/// an execution provider.
pub mod cloud;
/// Local CPU execution of elementwise graphs
pub mod cpu;
pub mod error;
pub mod executor;
/// Model format detection and the ONNX protobuf codec
pub mod format;
pub mod model_loader;
pub mod options;
pub mod session;
pub mod tensor;
/// Fixtures and assertions shared by tests and benches
pub mod testing;

// Re-exports for convenience
pub use error::{Result, StratusError};
pub use options::{CloudConfig, EndpointType, RunOptions, SessionOptions, Severity};
pub use session::InferenceSession;
pub use tensor::{ElementType, Tensor, Value};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with("0."));
        assert!(VERSION.contains('.'));
    }
}
