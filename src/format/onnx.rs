//! ONNX model descriptor reader and writer
//!
//! Lightweight protobuf codec for the parts of `.onnx` files a session needs:
//! graph inputs and outputs with their tensor types, the node list, and
//! initializers. No `prost`, no generated code.
//!
//! # ONNX Protobuf Layout (subset)
//!
//! ```text
//! ModelProto {
//!   ir_version: int64              (field 1)
//!   producer_name: string          (field 2)
//!   producer_version: string       (field 3)
//!   graph: GraphProto              (field 7)
//!     node: [NodeProto]            (field 1)
//!       input: [string]            (field 1)
//!       output: [string]           (field 2)
//!       name: string               (field 3)
//!       op_type: string            (field 4)
//!       domain: string             (field 7)
//!     name: string                 (field 2)
//!     initializer: [TensorProto]   (field 5)
//!       dims: [int64]              (field 1)
//!       data_type: int32           (field 2)
//!       name: string               (field 8)
//!       raw_data: bytes            (field 9)
//!     input: [ValueInfoProto]      (field 11)
//!     output: [ValueInfoProto]     (field 12)
//!       name: string               (field 1)
//!       type: TypeProto            (field 2)
//!         tensor_type              (field 1)
//!           elem_type: int32       (field 1)
//!           shape                  (field 2)
//!             dim: [Dimension]     (field 1)
//!               dim_value: int64   (field 1)
//!               dim_param: string  (field 2)
//!   opset_import: [OperatorSetId]  (field 8)
//! }
//! ```

use crate::error::{Result, StratusError};
use crate::tensor::{ElementType, Tensor, Value};

/// One dimension of a declared tensor shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dim {
    /// Fixed extent
    Fixed(usize),
    /// Named symbolic extent (matches any size)
    Symbolic(String),
}

impl Dim {
    /// Whether a concrete extent satisfies this dimension
    #[must_use]
    pub fn accepts(&self, extent: usize) -> bool {
        match self {
            Self::Fixed(n) => *n == extent,
            Self::Symbolic(_) => true,
        }
    }
}

impl std::fmt::Display for Dim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(n) => write!(f, "{n}"),
            Self::Symbolic(name) if name.is_empty() => write!(f, "?"),
            Self::Symbolic(name) => write!(f, "{name}"),
        }
    }
}

/// Graph input or output declaration (`ValueInfoProto`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnnxValueInfo {
    /// Value name
    pub name: String,
    /// Raw `TensorProto.DataType` code (0 when absent)
    pub elem_type: i32,
    /// Declared shape, `None` when the shape is unknown
    pub shape: Option<Vec<Dim>>,
}

/// Graph node (`NodeProto`)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OnnxNode {
    /// Node name (may be empty)
    pub name: String,
    /// Operator type, e.g. `Add`
    pub op_type: String,
    /// Operator domain (empty for the default domain)
    pub domain: String,
    /// Input value names
    pub inputs: Vec<String>,
    /// Output value names
    pub outputs: Vec<String>,
}

/// Constant tensor stored in the graph
#[derive(Debug, Clone, PartialEq)]
pub struct OnnxInitializer {
    /// Value name
    pub name: String,
    /// Decoded tensor, `None` for element types the runtime does not support
    pub value: Option<Value>,
}

/// Graph (`GraphProto`)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OnnxGraph {
    /// Graph name
    pub name: String,
    /// Nodes in declaration order
    pub nodes: Vec<OnnxNode>,
    /// Declared inputs (may include initializer names in older IR versions)
    pub inputs: Vec<OnnxValueInfo>,
    /// Declared outputs
    pub outputs: Vec<OnnxValueInfo>,
    /// Constant tensors
    pub initializers: Vec<OnnxInitializer>,
}

/// Parsed model (`ModelProto`)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OnnxModel {
    /// IR version
    pub ir_version: i64,
    /// Producer name
    pub producer_name: String,
    /// Producer version
    pub producer_version: String,
    /// Opset imports as (domain, version)
    pub opset_imports: Vec<(String, i64)>,
    /// Model graph
    pub graph: OnnxGraph,
}

impl OnnxModel {
    /// Parse a `ModelProto` from bytes
    ///
    /// # Errors
    ///
    /// Returns `FormatError` for truncated or malformed protobuf data.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut reader = ProtobufReader::new(data);
        let mut model = Self::default();

        while reader.has_more() {
            let (field, wire) = reader.read_tag()?;
            match (field, wire) {
                (1, 0) => model.ir_version = reader.read_varint()? as i64,
                (2, 2) => model.producer_name = reader.read_string()?,
                (3, 2) => model.producer_version = reader.read_string()?,
                (7, 2) => model.graph = parse_graph(reader.read_bytes()?)?,
                (8, 2) => model.opset_imports.push(parse_opset_import(reader.read_bytes()?)?),
                _ => reader.skip_field(field, wire)?,
            }
        }

        Ok(model)
    }

    /// Encode the model as a `ModelProto`
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ProtobufWriter::default();
        w.varint_field(1, self.ir_version as u64);
        w.string_field(2, &self.producer_name);
        w.string_field(3, &self.producer_version);
        w.message_field(7, &encode_graph(&self.graph));
        for (domain, version) in &self.opset_imports {
            let mut op = ProtobufWriter::default();
            op.string_field(1, domain);
            op.varint_field(2, *version as u64);
            w.message_field(8, &op.finish());
        }
        w.finish()
    }
}

fn parse_graph(data: &[u8]) -> Result<OnnxGraph> {
    let mut reader = ProtobufReader::new(data);
    let mut graph = OnnxGraph::default();
    while reader.has_more() {
        let (field, wire) = reader.read_tag()?;
        match (field, wire) {
            (1, 2) => graph.nodes.push(parse_node(reader.read_bytes()?)?),
            (2, 2) => graph.name = reader.read_string()?,
            (5, 2) => graph.initializers.push(parse_tensor(reader.read_bytes()?)?),
            (11, 2) => graph.inputs.push(parse_value_info(reader.read_bytes()?)?),
            (12, 2) => graph.outputs.push(parse_value_info(reader.read_bytes()?)?),
            _ => reader.skip_field(field, wire)?,
        }
    }
    Ok(graph)
}

fn parse_node(data: &[u8]) -> Result<OnnxNode> {
    let mut reader = ProtobufReader::new(data);
    let mut node = OnnxNode::default();
    while reader.has_more() {
        let (field, wire) = reader.read_tag()?;
        match (field, wire) {
            (1, 2) => node.inputs.push(reader.read_string()?),
            (2, 2) => node.outputs.push(reader.read_string()?),
            (3, 2) => node.name = reader.read_string()?,
            (4, 2) => node.op_type = reader.read_string()?,
            (7, 2) => node.domain = reader.read_string()?,
            _ => reader.skip_field(field, wire)?,
        }
    }
    Ok(node)
}

fn parse_value_info(data: &[u8]) -> Result<OnnxValueInfo> {
    let mut reader = ProtobufReader::new(data);
    let mut info = OnnxValueInfo {
        name: String::new(),
        elem_type: 0,
        shape: None,
    };
    while reader.has_more() {
        let (field, wire) = reader.read_tag()?;
        match (field, wire) {
            (1, 2) => info.name = reader.read_string()?,
            (2, 2) => {
                let mut type_reader = ProtobufReader::new(reader.read_bytes()?);
                while type_reader.has_more() {
                    let (tf, tw) = type_reader.read_tag()?;
                    if (tf, tw) == (1, 2) {
                        let (elem_type, shape) = parse_tensor_type(type_reader.read_bytes()?)?;
                        info.elem_type = elem_type;
                        info.shape = shape;
                    } else {
                        type_reader.skip_field(tf, tw)?;
                    }
                }
            },
            _ => reader.skip_field(field, wire)?,
        }
    }
    Ok(info)
}

fn parse_tensor_type(data: &[u8]) -> Result<(i32, Option<Vec<Dim>>)> {
    let mut reader = ProtobufReader::new(data);
    let mut elem_type = 0;
    let mut shape = None;
    while reader.has_more() {
        let (field, wire) = reader.read_tag()?;
        match (field, wire) {
            (1, 0) => elem_type = reader.read_varint()? as i32,
            (2, 2) => {
                let mut dims = Vec::new();
                let mut shape_reader = ProtobufReader::new(reader.read_bytes()?);
                while shape_reader.has_more() {
                    let (sf, sw) = shape_reader.read_tag()?;
                    if (sf, sw) == (1, 2) {
                        dims.push(parse_dimension(shape_reader.read_bytes()?)?);
                    } else {
                        shape_reader.skip_field(sf, sw)?;
                    }
                }
                shape = Some(dims);
            },
            _ => reader.skip_field(field, wire)?,
        }
    }
    Ok((elem_type, shape))
}

fn parse_dimension(data: &[u8]) -> Result<Dim> {
    let mut reader = ProtobufReader::new(data);
    let mut dim = Dim::Symbolic(String::new());
    while reader.has_more() {
        let (field, wire) = reader.read_tag()?;
        match (field, wire) {
            (1, 0) => dim = Dim::Fixed(reader.read_varint()? as usize),
            (2, 2) => dim = Dim::Symbolic(reader.read_string()?),
            _ => reader.skip_field(field, wire)?,
        }
    }
    Ok(dim)
}

fn parse_opset_import(data: &[u8]) -> Result<(String, i64)> {
    let mut reader = ProtobufReader::new(data);
    let mut domain = String::new();
    let mut version = 0i64;
    while reader.has_more() {
        let (field, wire) = reader.read_tag()?;
        match (field, wire) {
            (1, 2) => domain = reader.read_string()?,
            (2, 0) => version = reader.read_varint()? as i64,
            _ => reader.skip_field(field, wire)?,
        }
    }
    Ok((domain, version))
}

/// Parse a `TensorProto` initializer into a [`Value`]
fn parse_tensor(data: &[u8]) -> Result<OnnxInitializer> {
    let mut reader = ProtobufReader::new(data);
    let mut name = String::new();
    let mut dims: Vec<usize> = Vec::new();
    let mut data_type = 0i32;
    let mut raw_data: Vec<u8> = Vec::new();
    let mut float_data: Vec<f32> = Vec::new();
    let mut int32_data: Vec<i64> = Vec::new();
    let mut int64_data: Vec<i64> = Vec::new();
    let mut double_data: Vec<f64> = Vec::new();

    while reader.has_more() {
        let (field, wire) = reader.read_tag()?;
        match (field, wire) {
            (1, 0) => dims.push(reader.read_varint()? as usize),
            (1, 2) => {
                let mut packed = ProtobufReader::new(reader.read_bytes()?);
                while packed.has_more() {
                    dims.push(packed.read_varint()? as usize);
                }
            },
            (2, 0) => data_type = reader.read_varint()? as i32,
            (4, 2) => {
                for chunk in reader.read_bytes()?.chunks_exact(4) {
                    float_data.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
                }
            },
            (4, 5) => float_data.push(reader.read_f32()?),
            // int32_data also carries bool and int8/int16 payloads
            (5, 2) => {
                let mut packed = ProtobufReader::new(reader.read_bytes()?);
                while packed.has_more() {
                    int32_data.push(packed.read_varint()? as i64);
                }
            },
            (5, 0) => int32_data.push(reader.read_varint()? as i64),
            (7, 2) => {
                let mut packed = ProtobufReader::new(reader.read_bytes()?);
                while packed.has_more() {
                    int64_data.push(packed.read_varint()? as i64);
                }
            },
            (7, 0) => int64_data.push(reader.read_varint()? as i64),
            (8, 2) => name = reader.read_string()?,
            (10, 2) => {
                for chunk in reader.read_bytes()?.chunks_exact(8) {
                    let mut b = [0u8; 8];
                    b.copy_from_slice(chunk);
                    double_data.push(f64::from_le_bytes(b));
                }
            },
            (10, 1) => double_data.push(reader.read_f64()?),
            (9, 2) => raw_data = reader.read_bytes()?.to_vec(),
            _ => reader.skip_field(field, wire)?,
        }
    }

    let value = match ElementType::from_onnx(data_type) {
        None => None,
        Some(ty) => Some(decode_tensor_payload(
            &name,
            ty,
            dims,
            &raw_data,
            TypedPayload {
                float_data,
                int32_data,
                int64_data,
                double_data,
            },
        )?),
    };

    Ok(OnnxInitializer { name, value })
}

struct TypedPayload {
    float_data: Vec<f32>,
    int32_data: Vec<i64>,
    int64_data: Vec<i64>,
    double_data: Vec<f64>,
}

fn decode_tensor_payload(
    name: &str,
    ty: ElementType,
    dims: Vec<usize>,
    raw: &[u8],
    typed: TypedPayload,
) -> Result<Value> {
    let shape_err = |e: StratusError| StratusError::FormatError {
        reason: format!("initializer '{name}': {e}"),
    };
    let value = match ty {
        ElementType::Float => {
            let data = if raw.is_empty() {
                typed.float_data
            } else {
                raw.chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect()
            };
            Value::from(Tensor::from_vec(dims, data).map_err(shape_err)?)
        },
        ElementType::Double => {
            let data = if raw.is_empty() {
                typed.double_data
            } else {
                raw.chunks_exact(8)
                    .map(|b| {
                        let mut a = [0u8; 8];
                        a.copy_from_slice(b);
                        f64::from_le_bytes(a)
                    })
                    .collect()
            };
            Value::from(Tensor::from_vec(dims, data).map_err(shape_err)?)
        },
        ElementType::Int32 => {
            let data = if raw.is_empty() {
                typed.int32_data.iter().map(|&v| v as i32).collect()
            } else {
                raw.chunks_exact(4)
                    .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect()
            };
            Value::from(Tensor::from_vec(dims, data).map_err(shape_err)?)
        },
        ElementType::Int64 => {
            let data = if raw.is_empty() {
                typed.int64_data
            } else {
                raw.chunks_exact(8)
                    .map(|b| {
                        let mut a = [0u8; 8];
                        a.copy_from_slice(b);
                        i64::from_le_bytes(a)
                    })
                    .collect()
            };
            Value::from(Tensor::from_vec(dims, data).map_err(shape_err)?)
        },
        ElementType::Bool => {
            let data = if raw.is_empty() {
                typed.int32_data.iter().map(|&v| v != 0).collect()
            } else {
                raw.iter().map(|&b| b != 0).collect()
            };
            Value::from(Tensor::from_vec(dims, data).map_err(shape_err)?)
        },
    };
    Ok(value)
}

fn encode_graph(graph: &OnnxGraph) -> Vec<u8> {
    let mut w = ProtobufWriter::default();
    for node in &graph.nodes {
        let mut n = ProtobufWriter::default();
        for input in &node.inputs {
            n.string_field(1, input);
        }
        for output in &node.outputs {
            n.string_field(2, output);
        }
        n.string_field(3, &node.name);
        n.string_field(4, &node.op_type);
        n.string_field(7, &node.domain);
        w.message_field(1, &n.finish());
    }
    w.string_field(2, &graph.name);
    for init in &graph.initializers {
        if let Some(value) = &init.value {
            w.message_field(5, &encode_tensor(&init.name, value));
        }
    }
    for input in &graph.inputs {
        w.message_field(11, &encode_value_info(input));
    }
    for output in &graph.outputs {
        w.message_field(12, &encode_value_info(output));
    }
    w.finish()
}

fn encode_value_info(info: &OnnxValueInfo) -> Vec<u8> {
    let mut tensor_type = ProtobufWriter::default();
    tensor_type.varint_field(1, info.elem_type as u64);
    if let Some(dims) = &info.shape {
        let mut shape = ProtobufWriter::default();
        for dim in dims {
            let mut d = ProtobufWriter::default();
            match dim {
                Dim::Fixed(n) => d.varint_field(1, *n as u64),
                Dim::Symbolic(p) => d.string_field(2, p),
            }
            shape.message_field(1, &d.finish());
        }
        tensor_type.message_field(2, &shape.finish());
    }
    let mut type_proto = ProtobufWriter::default();
    type_proto.message_field(1, &tensor_type.finish());

    let mut w = ProtobufWriter::default();
    w.string_field(1, &info.name);
    w.message_field(2, &type_proto.finish());
    w.finish()
}

fn encode_tensor(name: &str, value: &Value) -> Vec<u8> {
    let mut w = ProtobufWriter::default();
    for &d in value.shape() {
        w.varint_field(1, d as u64);
    }
    w.varint_field(2, value.element_type().onnx_code() as u64);
    w.string_field(8, name);
    let raw: Vec<u8> = match value {
        Value::Float(t) => t.data().iter().flat_map(|v| v.to_le_bytes()).collect(),
        Value::Double(t) => t.data().iter().flat_map(|v| v.to_le_bytes()).collect(),
        Value::Int32(t) => t.data().iter().flat_map(|v| v.to_le_bytes()).collect(),
        Value::Int64(t) => t.data().iter().flat_map(|v| v.to_le_bytes()).collect(),
        Value::Bool(t) => t.data().iter().map(|&v| u8::from(v)).collect(),
    };
    w.bytes_field(9, &raw);
    w.finish()
}

/// Minimal protobuf wire format reader
struct ProtobufReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ProtobufReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn has_more(&self) -> bool {
        self.pos < self.data.len()
    }

    fn read_tag(&mut self) -> Result<(u32, u32)> {
        let varint = self.read_varint()?;
        Ok(((varint >> 3) as u32, (varint & 0x7) as u32))
    }

    fn read_varint(&mut self) -> Result<u64> {
        let mut result: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = *self.data.get(self.pos).ok_or_else(|| truncated("varint"))?;
            self.pos += 1;
            result |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift >= 64 {
                return Err(StratusError::FormatError {
                    reason: "Varint overflow".to_string(),
                });
            }
        }
    }

    fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_varint()? as usize;
        let end = self.pos.checked_add(len).filter(|&e| e <= self.data.len());
        let Some(end) = end else {
            return Err(StratusError::FormatError {
                reason: format!(
                    "Protobuf length-delimited field extends past data ({} + {} > {})",
                    self.pos,
                    len,
                    self.data.len()
                ),
            });
        };
        let result = &self.data[self.pos..end];
        self.pos = end;
        Ok(result)
    }

    fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| StratusError::FormatError {
            reason: "Invalid UTF-8 in protobuf string".to_string(),
        })
    }

    fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        if end > self.data.len() {
            return Err(truncated("fixed-width value"));
        }
        let mut buf = [0u8; N];
        buf.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(buf)
    }

    fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.read_fixed::<4>()?))
    }

    fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.read_fixed::<8>()?))
    }

    fn skip_field(&mut self, field: u32, wire: u32) -> Result<()> {
        match wire {
            0 => {
                self.read_varint()?;
            },
            1 => {
                self.read_fixed::<8>()?;
            },
            2 => {
                self.read_bytes()?;
            },
            5 => {
                self.read_fixed::<4>()?;
            },
            _ => {
                return Err(StratusError::FormatError {
                    reason: format!("Unknown protobuf wire type {wire} for field {field}"),
                })
            },
        }
        Ok(())
    }
}

fn truncated(what: &str) -> StratusError {
    StratusError::FormatError {
        reason: format!("Unexpected end of protobuf data reading {what}"),
    }
}

/// Minimal protobuf wire format writer
#[derive(Default)]
struct ProtobufWriter {
    buf: Vec<u8>,
}

impl ProtobufWriter {
    fn varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.push((value as u8) | 0x80);
            value >>= 7;
        }
        self.buf.push(value as u8);
    }

    fn tag(&mut self, field: u32, wire: u32) {
        self.varint(u64::from((field << 3) | wire));
    }

    fn varint_field(&mut self, field: u32, value: u64) {
        self.tag(field, 0);
        self.varint(value);
    }

    fn bytes_field(&mut self, field: u32, bytes: &[u8]) {
        self.tag(field, 2);
        self.varint(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    fn string_field(&mut self, field: u32, s: &str) {
        if !s.is_empty() {
            self.bytes_field(field, s.as_bytes());
        }
    }

    fn message_field(&mut self, field: u32, msg: &[u8]) {
        self.bytes_field(field, msg);
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}
