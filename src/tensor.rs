//! Tensor implementation
//!
//! This module provides the typed `Tensor` container and the `Value` enum that
//! carries one of the element types a model input or output can declare.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StratusError};

/// Element types understood by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    /// 32-bit IEEE float
    Float,
    /// 64-bit IEEE float
    Double,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// Boolean
    Bool,
}

impl ElementType {
    /// Map an ONNX `TensorProto.DataType` code to an element type
    #[must_use]
    pub fn from_onnx(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Float),
            6 => Some(Self::Int32),
            7 => Some(Self::Int64),
            9 => Some(Self::Bool),
            11 => Some(Self::Double),
            _ => None,
        }
    }

    /// ONNX `TensorProto.DataType` code
    #[must_use]
    pub fn onnx_code(self) -> i32 {
        match self {
            Self::Float => 1,
            Self::Int32 => 6,
            Self::Int64 => 7,
            Self::Bool => 9,
            Self::Double => 11,
        }
    }

    /// KServe v2 / Triton datatype string
    #[must_use]
    pub fn triton_name(self) -> &'static str {
        match self {
            Self::Float => "FP32",
            Self::Double => "FP64",
            Self::Int32 => "INT32",
            Self::Int64 => "INT64",
            Self::Bool => "BOOL",
        }
    }

    /// Parse a KServe v2 / Triton datatype string
    #[must_use]
    pub fn from_triton_name(name: &str) -> Option<Self> {
        match name {
            "FP32" => Some(Self::Float),
            "FP64" => Some(Self::Double),
            "INT32" => Some(Self::Int32),
            "INT64" => Some(Self::Int64),
            "BOOL" => Some(Self::Bool),
            _ => None,
        }
    }

    /// Whether arithmetic ops apply to this type
    #[must_use]
    pub fn is_numeric(self) -> bool {
        !matches!(self, Self::Bool)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Float => "float32",
            Self::Double => "float64",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Bool => "bool",
        };
        write!(f, "{name}")
    }
}

/// Scalar types that can be stored in a [`Tensor`] and wrapped in a [`Value`]
pub trait Element: Copy + PartialEq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Element type tag
    const TYPE: ElementType;

    /// Widen to f64 for tolerance checks (bools map to 0/1)
    fn to_f64(self) -> f64;

    /// Wrap a tensor of this element type
    fn into_value(tensor: Tensor<Self>) -> Value;

    /// Borrow the tensor out of a value of this element type
    fn from_value(value: &Value) -> Option<&Tensor<Self>>;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident, $to_f64:expr) => {
        impl Element for $ty {
            const TYPE: ElementType = ElementType::$variant;

            fn to_f64(self) -> f64 {
                $to_f64(self)
            }

            fn into_value(tensor: Tensor<Self>) -> Value {
                Value::$variant(tensor)
            }

            fn from_value(value: &Value) -> Option<&Tensor<Self>> {
                match value {
                    Value::$variant(t) => Some(t),
                    _ => None,
                }
            }
        }
    };
}

impl_element!(f32, Float, |v: f32| f64::from(v));
impl_element!(f64, Double, |v: f64| v);
impl_element!(i32, Int32, |v: i32| f64::from(v));
impl_element!(i64, Int64, |v: i64| v as f64);
impl_element!(bool, Bool, |v: bool| if v { 1.0 } else { 0.0 });

/// N-dimensional tensor stored in row-major order
///
/// An empty shape denotes a scalar holding exactly one element.
///
/// # Examples
///
/// ```
/// use stratus::Tensor;
///
/// let t = Tensor::from_vec(vec![2, 3], vec![
///     1.0f32, 2.0, 3.0,
///     4.0, 5.0, 6.0,
/// ]).unwrap();
///
/// assert_eq!(t.shape(), &[2, 3]);
/// assert_eq!(t.ndim(), 2);
/// assert_eq!(t.size(), 6);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor<T> {
    /// Flattened data in row-major order
    data: Vec<T>,
    /// Shape of the tensor
    shape: Vec<usize>,
}

impl<T: Element> Tensor<T> {
    /// Create a new tensor from a shape and flattened data
    ///
    /// # Errors
    ///
    /// Returns `InvalidShape` if the element count overflows `usize`, and
    /// `DataShapeMismatch` if the data length differs from the product of
    /// the shape.
    pub fn from_vec(shape: Vec<usize>, data: Vec<T>) -> Result<Self> {
        let expected = shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| StratusError::InvalidShape {
                reason: format!("element count of shape {shape:?} overflows"),
            })?;
        if data.len() != expected {
            return Err(StratusError::DataShapeMismatch {
                data_size: data.len(),
                shape,
                expected,
            });
        }
        Ok(Self { data, shape })
    }

    /// Create a 1-D tensor
    #[must_use]
    pub fn vector(data: Vec<T>) -> Self {
        let shape = vec![data.len()];
        Self { data, shape }
    }

    /// Create a scalar (rank 0) tensor
    #[must_use]
    pub fn scalar(value: T) -> Self {
        Self {
            data: vec![value],
            shape: Vec::new(),
        }
    }

    /// Get the shape of the tensor
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the number of dimensions
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Get the total number of elements
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Get a reference to the underlying data
    #[must_use]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Consume the tensor, returning its data
    #[must_use]
    pub fn into_data(self) -> Vec<T> {
        self.data
    }
}

impl<T: Element> fmt::Display for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor<{}>(shape={:?}, data=[", T::TYPE, self.shape)?;
        for (i, val) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{val}")?;
        }
        write!(f, "])")
    }
}

/// A tensor of any supported element type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// float32 tensor
    Float(Tensor<f32>),
    /// float64 tensor
    Double(Tensor<f64>),
    /// int32 tensor
    Int32(Tensor<i32>),
    /// int64 tensor
    Int64(Tensor<i64>),
    /// bool tensor
    Bool(Tensor<bool>),
}

macro_rules! dispatch {
    ($value:expr, $t:ident => $body:expr) => {
        match $value {
            Value::Float($t) => $body,
            Value::Double($t) => $body,
            Value::Int32($t) => $body,
            Value::Int64($t) => $body,
            Value::Bool($t) => $body,
        }
    };
}

impl Value {
    /// Element type of the wrapped tensor
    #[must_use]
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Float(_) => ElementType::Float,
            Self::Double(_) => ElementType::Double,
            Self::Int32(_) => ElementType::Int32,
            Self::Int64(_) => ElementType::Int64,
            Self::Bool(_) => ElementType::Bool,
        }
    }

    /// Shape of the wrapped tensor
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        dispatch!(self, t => t.shape())
    }

    /// Number of elements
    #[must_use]
    pub fn size(&self) -> usize {
        dispatch!(self, t => t.size())
    }

    /// Borrow the tensor if it has element type `T`
    #[must_use]
    pub fn as_tensor<T: Element>(&self) -> Option<&Tensor<T>> {
        T::from_value(self)
    }

    /// Elements widened to f64 (bools as 0/1)
    #[must_use]
    pub fn to_f64_vec(&self) -> Vec<f64> {
        dispatch!(self, t => t.data().iter().map(|v| v.to_f64()).collect())
    }

    /// Check elementwise closeness against `expected`
    ///
    /// Holds when both values share element type and shape and every element
    /// satisfies `|actual - expected| <= atol + rtol * |expected|`.
    #[must_use]
    pub fn all_close(&self, expected: &Value, rtol: f64, atol: f64) -> bool {
        self.closeness(expected, rtol, atol).is_ok()
    }

    /// Compare against `expected`, describing the first kind of mismatch found
    ///
    /// # Errors
    ///
    /// Returns a human readable report when the values are not close.
    pub fn closeness(
        &self,
        expected: &Value,
        rtol: f64,
        atol: f64,
    ) -> std::result::Result<(), String> {
        if self.element_type() != expected.element_type() {
            return Err(format!(
                "element type mismatch: actual {}, expected {}",
                self.element_type(),
                expected.element_type()
            ));
        }
        if self.shape() != expected.shape() {
            return Err(format!(
                "shape mismatch: actual {:?}, expected {:?}",
                self.shape(),
                expected.shape()
            ));
        }

        let actual = self.to_f64_vec();
        let desired = expected.to_f64_vec();
        let mut mismatched = 0usize;
        let mut max_abs = 0.0f64;
        let mut max_rel = 0.0f64;
        for (a, e) in actual.iter().zip(&desired) {
            let diff = (a - e).abs();
            let nan_match = a.is_nan() && e.is_nan();
            let within = a == e || diff <= atol + rtol * e.abs();
            if !nan_match && !within {
                mismatched += 1;
            }
            max_abs = max_abs.max(diff);
            if *e != 0.0 {
                max_rel = max_rel.max(diff / e.abs());
            }
        }

        if mismatched == 0 {
            Ok(())
        } else {
            Err(format!(
                "Not equal to tolerance rtol={rtol:e}, atol={atol:e}\n\
                 Mismatched elements: {mismatched} / {}\n\
                 Max absolute difference: {max_abs}\n\
                 Max relative difference: {max_rel}\n \
                 actual: {actual:?}\n desired: {desired:?}",
                actual.len()
            ))
        }
    }
}

impl<T: Element> From<Tensor<T>> for Value {
    fn from(tensor: Tensor<T>) -> Self {
        T::into_value(tensor)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        dispatch!(self, t => write!(f, "{t}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_tensor() {
        let t = Tensor::from_vec(vec![2, 3], vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(t.shape(), &[2, 3]);
        assert_eq!(t.ndim(), 2);
        assert_eq!(t.size(), 6);
    }

    #[test]
    fn test_scalar_tensor() {
        let t = Tensor::scalar(7i32);
        assert_eq!(t.ndim(), 0);
        assert_eq!(t.size(), 1);
        assert!(Tensor::from_vec(vec![], vec![1i32]).is_ok());
    }

    #[test]
    fn test_zero_sized_dimension() {
        let t = Tensor::<f64>::from_vec(vec![2, 0], vec![]).unwrap();
        assert_eq!(t.size(), 0);
    }

    #[test]
    fn test_overflowing_shape_is_invalid() {
        let result = Tensor::from_vec(vec![usize::MAX, 2], vec![5.0f32; 4]);
        assert!(matches!(result.unwrap_err(), StratusError::InvalidShape { .. }));
    }

    #[test]
    fn test_size_mismatch_error() {
        let result = Tensor::from_vec(vec![2, 3], vec![1.0f32, 2.0]);
        assert!(matches!(
            result.unwrap_err(),
            StratusError::DataShapeMismatch {
                data_size: 2,
                expected: 6,
                ..
            }
        ));
    }

    #[test]
    fn test_display() {
        let t = Tensor::vector(vec![true, false]);
        assert_eq!(t.to_string(), "Tensor<bool>(shape=[2], data=[true, false])");
    }

    #[test]
    fn test_value_accessors() {
        let v = Value::from(Tensor::vector(vec![1i64, 2, 3]));
        assert_eq!(v.element_type(), ElementType::Int64);
        assert_eq!(v.shape(), &[3]);
        assert_eq!(v.size(), 3);
        assert!(v.as_tensor::<i64>().is_some());
        assert!(v.as_tensor::<i32>().is_none());
    }

    #[test]
    fn test_element_type_names() {
        for ty in [
            ElementType::Float,
            ElementType::Double,
            ElementType::Int32,
            ElementType::Int64,
            ElementType::Bool,
        ] {
            assert_eq!(ElementType::from_triton_name(ty.triton_name()), Some(ty));
            assert_eq!(ElementType::from_onnx(ty.onnx_code()), Some(ty));
        }
        assert_eq!(ElementType::from_triton_name("BYTES"), None);
        assert_eq!(ElementType::from_onnx(10), None);
        assert_eq!(ElementType::Double.to_string(), "float64");
    }

    #[test]
    fn test_all_close_within_tolerance() {
        let actual = Value::from(Tensor::vector(vec![5.0f32, 5.00001, 5.0, 5.0]));
        let expected = Value::from(Tensor::vector(vec![5.0f32; 4]));
        assert!(actual.all_close(&expected, 1e-5, 1e-8));
    }

    #[test]
    fn test_all_close_outside_tolerance() {
        let actual = Value::from(Tensor::vector(vec![5.0f64, 5.1, 5.0, 5.0]));
        let expected = Value::from(Tensor::vector(vec![5.0f64; 4]));
        let report = actual.closeness(&expected, 1e-5, 1e-8).unwrap_err();
        assert!(report.contains("Mismatched elements: 1 / 4"));
    }

    #[test]
    fn test_all_close_requires_same_type_and_shape() {
        let ints = Value::from(Tensor::vector(vec![5i32; 4]));
        let floats = Value::from(Tensor::vector(vec![5.0f32; 4]));
        assert!(!ints.all_close(&floats, 1e-5, 1e-8));

        let short = Value::from(Tensor::vector(vec![5i32; 2]));
        assert!(!ints.all_close(&short, 1e-5, 1e-8));
    }

    #[test]
    fn test_all_close_bools() {
        let actual = Value::from(Tensor::vector(vec![true, false]));
        assert!(actual.all_close(&Value::from(Tensor::vector(vec![true, false])), 1e-5, 1e-8));
        assert!(!actual.all_close(&Value::from(Tensor::vector(vec![true, true])), 1e-5, 1e-8));
    }

    #[test]
    fn test_all_close_nan_matches_nan() {
        let a = Value::from(Tensor::vector(vec![f32::NAN]));
        assert!(a.all_close(&a.clone(), 1e-5, 1e-8));
    }

    #[test]
    fn test_all_close_equal_infinities() {
        let a = Value::from(Tensor::vector(vec![f64::INFINITY, f64::NEG_INFINITY, 5.0]));
        assert!(a.closeness(&a.clone(), 1e-5, 1e-8).is_ok());

        let b = Value::from(Tensor::vector(vec![f64::NEG_INFINITY, f64::NEG_INFINITY, 5.0]));
        assert!(!b.all_close(&a, 1e-5, 1e-8));
    }
}
