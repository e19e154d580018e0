//! The shape of call arguments as seen by the fingerprinter.
//!
//! These types carry only what fingerprinting and specialization need: element
//! types, shapes, logical identities and record structure. Array contents never
//! appear here.

use kcache_common::{Epoch, LogicalId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};

/// Element type of scalars and arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    /// Boolean.
    Bool,
    /// Signed 8-bit integer.
    I8,
    /// Signed 16-bit integer.
    I16,
    /// Signed 32-bit integer.
    I32,
    /// Signed 64-bit integer.
    I64,
    /// Unsigned 8-bit integer.
    U8,
    /// Unsigned 16-bit integer.
    U16,
    /// Unsigned 32-bit integer.
    U32,
    /// Unsigned 64-bit integer.
    U64,
    /// Half-precision float (arrays only).
    F16,
    /// Single-precision float.
    F32,
    /// Double-precision float.
    F64,
}

impl Dtype {
    /// Returns the canonical type name.
    pub fn name(self) -> &'static str {
        match self {
            Dtype::Bool => "bool",
            Dtype::I8 => "i8",
            Dtype::I16 => "i16",
            Dtype::I32 => "i32",
            Dtype::I64 => "i64",
            Dtype::U8 => "u8",
            Dtype::U16 => "u16",
            Dtype::U32 => "u32",
            Dtype::U64 => "u64",
            Dtype::F16 => "f16",
            Dtype::F32 => "f32",
            Dtype::F64 => "f64",
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A scalar argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    /// Boolean.
    Bool(bool),
    /// Signed 8-bit integer.
    I8(i8),
    /// Signed 16-bit integer.
    I16(i16),
    /// Signed 32-bit integer.
    I32(i32),
    /// Signed 64-bit integer.
    I64(i64),
    /// Unsigned 8-bit integer.
    U8(u8),
    /// Unsigned 16-bit integer.
    U16(u16),
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Unsigned 64-bit integer.
    U64(u64),
    /// Single-precision float.
    F32(f32),
    /// Double-precision float.
    F64(f64),
}

impl Scalar {
    /// Returns the scalar's type.
    pub fn dtype(self) -> Dtype {
        match self {
            Scalar::Bool(_) => Dtype::Bool,
            Scalar::I8(_) => Dtype::I8,
            Scalar::I16(_) => Dtype::I16,
            Scalar::I32(_) => Dtype::I32,
            Scalar::I64(_) => Dtype::I64,
            Scalar::U8(_) => Dtype::U8,
            Scalar::U16(_) => Dtype::U16,
            Scalar::U32(_) => Dtype::U32,
            Scalar::U64(_) => Dtype::U64,
            Scalar::F32(_) => Dtype::F32,
            Scalar::F64(_) => Dtype::F64,
        }
    }

    /// Returns the value's bit pattern widened to 64 bits.
    ///
    /// Floats use their IEEE bits, so `0.0` and `-0.0` differ and every NaN
    /// payload is distinct.
    pub fn bits(self) -> u64 {
        match self {
            Scalar::Bool(v) => v as u64,
            Scalar::I8(v) => v as i64 as u64,
            Scalar::I16(v) => v as i64 as u64,
            Scalar::I32(v) => v as i64 as u64,
            Scalar::I64(v) => v as u64,
            Scalar::U8(v) => v as u64,
            Scalar::U16(v) => v as u64,
            Scalar::U32(v) => v as u64,
            Scalar::U64(v) => v,
            Scalar::F32(v) => v.to_bits() as u64,
            Scalar::F64(v) => v.to_bits(),
        }
    }
}

/// Where an array's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayKind {
    /// A runtime-allocated n-dimensional array passed by reference.
    Ndarray,
    /// An array owned by a foreign library.
    External,
    /// A global storage node identified by its logical id.
    Field(LogicalId),
}

/// An array argument.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayArg {
    /// Element scalar type.
    pub dtype: Dtype,
    /// Full shape, including the trailing element dimensions.
    pub shape: Vec<usize>,
    /// Trailing dimensions that make up one element (vector/matrix elements).
    pub element_shape: Vec<usize>,
    /// Storage kind.
    pub kind: ArrayKind,
    /// Whether the array carries a gradient buffer.
    pub needs_grad: bool,
}

impl ArrayArg {
    /// Creates an ndarray with scalar elements.
    pub fn ndarray(dtype: Dtype, shape: Vec<usize>) -> Self {
        Self {
            dtype,
            shape,
            element_shape: Vec::new(),
            kind: ArrayKind::Ndarray,
            needs_grad: false,
        }
    }

    /// Creates a field (global storage) array with a fresh logical id.
    pub fn field(epoch: &Epoch, dtype: Dtype, shape: Vec<usize>) -> Self {
        Self {
            dtype,
            shape,
            element_shape: Vec::new(),
            kind: ArrayKind::Field(epoch.next_id()),
            needs_grad: false,
        }
    }

    /// Sets the trailing element dimensions.
    pub fn with_element_shape(mut self, element_shape: Vec<usize>) -> Self {
        self.element_shape = element_shape;
        self
    }

    /// Sets the storage kind.
    pub fn with_kind(mut self, kind: ArrayKind) -> Self {
        self.kind = kind;
        self
    }

    /// Marks the array as carrying a gradient.
    pub fn with_grad(mut self) -> Self {
        self.needs_grad = true;
        self
    }

    /// Number of indexing dimensions (element dimensions excluded).
    pub fn rank(&self) -> usize {
        self.shape.len().saturating_sub(self.element_shape.len())
    }
}

/// One declared field of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordField {
    /// Declared field name.
    pub name: String,
    /// The field's value.
    pub value: ArgValue,
    /// When set, the field's value (not only its type) joins the cache key.
    pub pin_value: bool,
}

impl RecordField {
    /// Creates an unpinned field.
    pub fn new(name: impl Into<String>, value: ArgValue) -> Self {
        Self {
            name: name.into(),
            value,
            pin_value: false,
        }
    }

    /// Creates a field whose value is part of the cache key.
    pub fn pinned(name: impl Into<String>, value: ArgValue) -> Self {
        Self {
            pin_value: true,
            ..Self::new(name, value)
        }
    }
}

/// A structured record argument with fields in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Record type name.
    pub type_name: String,
    /// Fields in declaration order.
    pub fields: Vec<RecordField>,
}

/// An enumeration variant argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumArg {
    /// Enumeration type name.
    pub type_name: String,
    /// Variant name.
    pub variant: String,
    /// Variant discriminant.
    pub value: i64,
}

#[derive(Debug)]
struct ObjectInner {
    id: LogicalId,
    type_name: String,
}

/// A composite object passed to a structural parameter.
///
/// Clones share identity. The specialization mapper holds only a
/// [`WeakObject`], so dropping every clone lets its variants be pruned.
#[derive(Debug, Clone)]
pub struct StructuralObject {
    inner: Arc<ObjectInner>,
}

impl StructuralObject {
    /// Creates an object with a fresh logical id from `epoch`.
    pub fn new(epoch: &Epoch, type_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                id: epoch.next_id(),
                type_name: type_name.into(),
            }),
        }
    }

    /// Returns the object's logical id.
    pub fn id(&self) -> LogicalId {
        self.inner.id
    }

    /// Returns the object's type name.
    pub fn type_name(&self) -> &str {
        &self.inner.type_name
    }

    /// Returns a non-owning handle.
    pub fn downgrade(&self) -> WeakObject {
        WeakObject {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl PartialEq for StructuralObject {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// A non-owning handle to a [`StructuralObject`].
#[derive(Debug, Clone)]
pub struct WeakObject {
    id: LogicalId,
    inner: Weak<ObjectInner>,
}

impl WeakObject {
    /// Returns the logical id of the referenced object.
    pub fn id(&self) -> LogicalId {
        self.id
    }

    /// Returns `true` while some [`StructuralObject`] clone is alive.
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

/// A concrete call argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// A scalar.
    Scalar(Scalar),
    /// An array.
    Array(ArrayArg),
    /// A structured record.
    Record(Record),
    /// An enumeration variant.
    Enum(EnumArg),
    /// A positional tuple.
    Tuple(Vec<ArgValue>),
    /// A composite object with logical identity.
    Object(StructuralObject),
    /// A value the fingerprinter knows nothing about.
    Opaque,
}

impl From<Scalar> for ArgValue {
    fn from(value: Scalar) -> Self {
        ArgValue::Scalar(value)
    }
}

impl From<ArrayArg> for ArgValue {
    fn from(value: ArrayArg) -> Self {
        ArgValue::Array(value)
    }
}

impl From<Record> for ArgValue {
    fn from(value: Record) -> Self {
        ArgValue::Record(value)
    }
}

impl From<EnumArg> for ArgValue {
    fn from(value: EnumArg) -> Self {
        ArgValue::Enum(value)
    }
}

impl From<StructuralObject> for ArgValue {
    fn from(value: StructuralObject) -> Self {
        ArgValue::Object(value)
    }
}
