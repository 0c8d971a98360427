//! CPU execution of elementwise graphs
//!
//! Nodes run in declaration order over a name -> value environment seeded
//! with the graph initializers and the caller's inputs. Binary operators use
//! numpy-style multidirectional broadcasting.
//!
//! Supported operators: `Add`, `Sub`, `Mul`, `Div`, `Equal`, `Less`,
//! `Greater`, `And`, `Or`, `Xor`, `Not`, `Identity`.

use std::collections::HashMap;

use num_traits::Num;

use crate::error::{Result, StratusError};
use crate::executor::{ExecutionProvider, ExecutionRequest};
use crate::format::onnx::OnnxNode;
use crate::tensor::{Element, Tensor, Value};

/// Elementwise operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementwiseOp {
    /// `a + b`
    Add,
    /// `a - b`
    Sub,
    /// `a * b`
    Mul,
    /// `a / b` (integer division truncates toward zero)
    Div,
    /// `a == b`
    Equal,
    /// `a < b`
    Less,
    /// `a > b`
    Greater,
    /// logical and
    And,
    /// logical or
    Or,
    /// logical xor
    Xor,
    /// logical not (unary)
    Not,
    /// pass-through (unary)
    Identity,
}

impl ElementwiseOp {
    /// Resolve an ONNX `op_type` in the default domain
    #[must_use]
    pub fn from_op_type(op_type: &str) -> Option<Self> {
        Some(match op_type {
            "Add" => Self::Add,
            "Sub" => Self::Sub,
            "Mul" => Self::Mul,
            "Div" => Self::Div,
            "Equal" => Self::Equal,
            "Less" => Self::Less,
            "Greater" => Self::Greater,
            "And" => Self::And,
            "Or" => Self::Or,
            "Xor" => Self::Xor,
            "Not" => Self::Not,
            "Identity" => Self::Identity,
            _ => return None,
        })
    }

    /// Number of operands
    #[must_use]
    pub fn arity(self) -> usize {
        match self {
            Self::Not | Self::Identity => 1,
            _ => 2,
        }
    }
}

/// Numeric element types the arithmetic operators apply to
trait Arithmetic: Element + Num + PartialOrd {
    fn apply(op: ElementwiseOp, a: Self, b: Self) -> Result<Self>;
}

macro_rules! impl_float_arithmetic {
    ($($ty:ty),*) => {$(
        impl Arithmetic for $ty {
            fn apply(op: ElementwiseOp, a: Self, b: Self) -> Result<Self> {
                Ok(match op {
                    ElementwiseOp::Add => a + b,
                    ElementwiseOp::Sub => a - b,
                    ElementwiseOp::Mul => a * b,
                    ElementwiseOp::Div => a / b,
                    other => return Err(not_arithmetic(other)),
                })
            }
        }
    )*};
}

macro_rules! impl_int_arithmetic {
    ($($ty:ty),*) => {$(
        impl Arithmetic for $ty {
            fn apply(op: ElementwiseOp, a: Self, b: Self) -> Result<Self> {
                Ok(match op {
                    ElementwiseOp::Add => a.wrapping_add(b),
                    ElementwiseOp::Sub => a.wrapping_sub(b),
                    ElementwiseOp::Mul => a.wrapping_mul(b),
                    ElementwiseOp::Div => {
                        if b == 0 {
                            return Err(StratusError::InferenceError(
                                "integer division by zero".to_string(),
                            ));
                        }
                        a.wrapping_div(b)
                    },
                    other => return Err(not_arithmetic(other)),
                })
            }
        }
    )*};
}

impl_float_arithmetic!(f32, f64);
impl_int_arithmetic!(i32, i64);

fn not_arithmetic(op: ElementwiseOp) -> StratusError {
    StratusError::InferenceError(format!("{op:?} is not an arithmetic operator"))
}

/// Compute the broadcast shape of two operands
///
/// # Errors
///
/// Returns `InvalidShape` when a pair of trailing dimensions differ and
/// neither is 1.
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = dim_from_end(a, rank - 1 - i);
        let db = dim_from_end(b, rank - 1 - i);
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(StratusError::InvalidShape {
                    reason: format!("cannot broadcast shapes {a:?} and {b:?}"),
                })
            },
        };
    }
    Ok(out)
}

/// Dimension `k` positions from the end, 1 when the shape is shorter
fn dim_from_end(shape: &[usize], k: usize) -> usize {
    if k < shape.len() {
        shape[shape.len() - 1 - k]
    } else {
        1
    }
}

/// Row-major strides of `shape` aligned to `rank`, zero on broadcast axes
fn broadcast_strides(shape: &[usize], rank: usize) -> Vec<usize> {
    let mut strides = vec![0; rank];
    let mut stride = 1;
    for k in 0..shape.len() {
        let axis = rank - 1 - k;
        let extent = shape[shape.len() - 1 - k];
        strides[axis] = if extent == 1 { 0 } else { stride };
        stride *= extent;
    }
    strides
}

fn broadcast_binary<T: Element, R: Element>(
    a: &Tensor<T>,
    b: &Tensor<T>,
    f: impl Fn(T, T) -> Result<R>,
) -> Result<Tensor<R>> {
    // Same-shape fast path covers the common case
    if a.shape() == b.shape() {
        let data = a
            .data()
            .iter()
            .zip(b.data())
            .map(|(&x, &y)| f(x, y))
            .collect::<Result<Vec<_>>>()?;
        return Tensor::from_vec(a.shape().to_vec(), data);
    }

    let shape = broadcast_shape(a.shape(), b.shape())?;
    let rank = shape.len();
    let sa = broadcast_strides(a.shape(), rank);
    let sb = broadcast_strides(b.shape(), rank);
    let total: usize = shape.iter().product();

    let mut data = Vec::with_capacity(total);
    let mut index = vec![0usize; rank];
    for _ in 0..total {
        let ia: usize = index.iter().zip(&sa).map(|(i, s)| i * s).sum();
        let ib: usize = index.iter().zip(&sb).map(|(i, s)| i * s).sum();
        data.push(f(a.data()[ia], b.data()[ib])?);

        for axis in (0..rank).rev() {
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    Tensor::from_vec(shape, data)
}

fn arithmetic<T: Arithmetic>(op: ElementwiseOp, a: &Tensor<T>, b: &Tensor<T>) -> Result<Value> {
    Ok(Value::from(broadcast_binary(a, b, |x, y| T::apply(op, x, y))?))
}

fn comparison<T: Arithmetic>(op: ElementwiseOp, a: &Tensor<T>, b: &Tensor<T>) -> Result<Value> {
    let t = broadcast_binary(a, b, |x, y| {
        Ok(match op {
            ElementwiseOp::Equal => x == y,
            ElementwiseOp::Less => x < y,
            _ => x > y,
        })
    })?;
    Ok(Value::from(t))
}

fn logical(op: ElementwiseOp, a: &Tensor<bool>, b: &Tensor<bool>) -> Result<Value> {
    let t = broadcast_binary(a, b, |x, y| {
        Ok(match op {
            ElementwiseOp::And => x && y,
            ElementwiseOp::Or => x || y,
            ElementwiseOp::Xor => x ^ y,
            _ => x == y,
        })
    })?;
    Ok(Value::from(t))
}

/// Apply a binary operator to two values
///
/// # Errors
///
/// Returns `InferenceError` when the operand types differ or do not suit the
/// operator, and `InvalidShape` when the shapes cannot broadcast.
pub fn apply_binary(op: ElementwiseOp, a: &Value, b: &Value) -> Result<Value> {
    if a.element_type() != b.element_type() {
        return Err(StratusError::InferenceError(format!(
            "{op:?} operands differ in type: {} vs {}",
            a.element_type(),
            b.element_type()
        )));
    }
    match op {
        ElementwiseOp::Add | ElementwiseOp::Sub | ElementwiseOp::Mul | ElementwiseOp::Div => {
            match (a, b) {
                (Value::Float(x), Value::Float(y)) => arithmetic(op, x, y),
                (Value::Double(x), Value::Double(y)) => arithmetic(op, x, y),
                (Value::Int32(x), Value::Int32(y)) => arithmetic(op, x, y),
                (Value::Int64(x), Value::Int64(y)) => arithmetic(op, x, y),
                _ => Err(type_error(op, a)),
            }
        },
        ElementwiseOp::Equal | ElementwiseOp::Less | ElementwiseOp::Greater => match (a, b) {
            (Value::Float(x), Value::Float(y)) => comparison(op, x, y),
            (Value::Double(x), Value::Double(y)) => comparison(op, x, y),
            (Value::Int32(x), Value::Int32(y)) => comparison(op, x, y),
            (Value::Int64(x), Value::Int64(y)) => comparison(op, x, y),
            (Value::Bool(x), Value::Bool(y)) if op == ElementwiseOp::Equal => {
                logical(op, x, y)
            },
            _ => Err(type_error(op, a)),
        },
        ElementwiseOp::And | ElementwiseOp::Or | ElementwiseOp::Xor => match (a, b) {
            (Value::Bool(x), Value::Bool(y)) => logical(op, x, y),
            _ => Err(type_error(op, a)),
        },
        ElementwiseOp::Not | ElementwiseOp::Identity => Err(StratusError::InferenceError(
            format!("{op:?} is unary"),
        )),
    }
}

/// Apply a unary operator to a value
///
/// # Errors
///
/// Returns `InferenceError` when the operand type does not suit the operator.
pub fn apply_unary(op: ElementwiseOp, a: &Value) -> Result<Value> {
    match (op, a) {
        (ElementwiseOp::Identity, v) => Ok(v.clone()),
        (ElementwiseOp::Not, Value::Bool(t)) => {
            let data = t.data().iter().map(|v| !v).collect();
            Ok(Value::from(Tensor::from_vec(t.shape().to_vec(), data)?))
        },
        _ => Err(type_error(op, a)),
    }
}

fn type_error(op: ElementwiseOp, a: &Value) -> StratusError {
    StratusError::InferenceError(format!(
        "{op:?} does not accept {} operands",
        a.element_type()
    ))
}

/// Local execution provider for elementwise graphs
#[derive(Debug, Default)]
pub struct CpuExecutor;

impl CpuExecutor {
    /// Create a new CPU executor
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn run_node(node: &OnnxNode, env: &HashMap<String, Value>) -> Result<Value> {
        if !node.domain.is_empty() && node.domain != "ai.onnx" {
            return Err(StratusError::UnsupportedOperation {
                operation: node.op_type.clone(),
                reason: format!("operator domain '{}' is not supported on CPU", node.domain),
            });
        }
        let op = ElementwiseOp::from_op_type(&node.op_type).ok_or_else(|| {
            StratusError::UnsupportedOperation {
                operation: node.op_type.clone(),
                reason: "operator is not supported on CPU".to_string(),
            }
        })?;
        if node.inputs.len() != op.arity() || node.outputs.len() != 1 {
            return Err(StratusError::InferenceError(format!(
                "node '{}' ({}) expects {} input(s) and 1 output, has {} and {}",
                node.name,
                node.op_type,
                op.arity(),
                node.inputs.len(),
                node.outputs.len()
            )));
        }

        let operand = |name: &String| {
            env.get(name).ok_or_else(|| {
                StratusError::InferenceError(format!(
                    "node '{}' reads '{name}' before it is produced",
                    node.name
                ))
            })
        };

        if op.arity() == 1 {
            apply_unary(op, operand(&node.inputs[0])?)
        } else {
            apply_binary(op, operand(&node.inputs[0])?, operand(&node.inputs[1])?)
        }
    }
}

impl ExecutionProvider for CpuExecutor {
    fn name(&self) -> &str {
        "CpuExecutor"
    }

    fn run(&self, request: &ExecutionRequest<'_>) -> Result<Vec<Value>> {
        let mut env: HashMap<String, Value> = request.model.initializers.iter().cloned().collect();
        for (name, value) in request.inputs {
            env.insert(name.clone(), value.clone());
        }

        for node in &request.model.graph.nodes {
            let value = Self::run_node(node, &env)?;
            env.insert(node.outputs[0].clone(), value);
        }

        request
            .outputs
            .iter()
            .map(|name| {
                env.get(name).cloned().ok_or_else(|| {
                    StratusError::InferenceError(format!("graph never produced output '{name}'"))
                })
            })
            .collect()
    }
}
