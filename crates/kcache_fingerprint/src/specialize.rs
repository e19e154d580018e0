//! Specialization keys: which compiled variant a call needs.

use crate::callable::{ParamKind, Signature};
use crate::value::{ArgValue, ArrayArg, ArrayKind, Dtype, WeakObject};
use kcache_common::LogicalId;
use std::fmt;

/// Per-parameter part of a [`SpecializationKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Discriminator {
    /// A structural scalar: its value is compiled in.
    Scalar {
        /// Scalar type.
        dtype: Dtype,
        /// Value bits.
        bits: u64,
    },
    /// A scalar value parameter: only the type matters.
    ScalarType(Dtype),
    /// A field array bound by identity.
    Storage(LogicalId),
    /// A structural object bound by identity.
    Object(LogicalId),
    /// An enumeration variant.
    Enum {
        /// Enumeration type name.
        type_name: String,
        /// Variant discriminant.
        value: i64,
    },
    /// Positional children of a tuple.
    Tuple(Vec<Discriminator>),
    /// Named fields of a record, in declared order.
    Record {
        /// Record type name.
        type_name: String,
        /// `(field name, discriminator)` pairs.
        fields: Vec<(String, Discriminator)>,
    },
    /// An array passed by reference.
    Array {
        /// Element scalar type.
        dtype: Dtype,
        /// Indexing rank.
        rank: usize,
        /// Trailing element dimensions.
        element_shape: Vec<usize>,
        /// Whether the array carries a gradient.
        needs_grad: bool,
        /// Whether the storage is owned by a foreign library.
        external: bool,
    },
    /// A value the key cannot tell apart from other values of its
    /// parameter. A key holding one is never shared between calls.
    Placeholder,
}

impl fmt::Display for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discriminator::Scalar { dtype, bits } => write!(f, "{dtype}={bits:x}"),
            Discriminator::ScalarType(dtype) => write!(f, "{dtype}"),
            Discriminator::Storage(id) => write!(f, "storage{id}"),
            Discriminator::Object(id) => write!(f, "object{id}"),
            Discriminator::Enum { type_name, value } => write!(f, "{type_name}={value}"),
            Discriminator::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Discriminator::Record { type_name, fields } => {
                write!(f, "{type_name}{{")?;
                for (i, (name, item)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{name}:{item}")?;
                }
                f.write_str("}")
            }
            Discriminator::Array {
                dtype,
                rank,
                element_shape,
                needs_grad,
                external,
            } => write!(
                f,
                "{}<{dtype},{rank},{element_shape:?},{needs_grad}>",
                if *external { "external" } else { "array" }
            ),
            Discriminator::Placeholder => f.write_str("#"),
        }
    }
}

/// Ordered per-parameter discriminators of one call.
///
/// Calls with equal keys are served by the same compiled variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpecializationKey(pub Vec<Discriminator>);

impl SpecializationKey {
    /// Returns `true` if the key references the object `id`.
    pub fn mentions_object(&self, id: LogicalId) -> bool {
        fn walk(d: &Discriminator, id: LogicalId) -> bool {
            match d {
                Discriminator::Object(o) => *o == id,
                Discriminator::Tuple(items) => items.iter().any(|i| walk(i, id)),
                Discriminator::Record { fields, .. } => fields.iter().any(|(_, f)| walk(f, id)),
                _ => false,
            }
        }
        self.0.iter().any(|d| walk(d, id))
    }

    /// Returns `false` if any part of the key is a
    /// [`Placeholder`](Discriminator::Placeholder). Such a call may not
    /// reuse a variant compiled for another call with an equal key.
    pub fn is_shareable(&self) -> bool {
        fn walk(d: &Discriminator) -> bool {
            match d {
                Discriminator::Placeholder => false,
                Discriminator::Tuple(items) => items.iter().all(walk),
                Discriminator::Record { fields, .. } => fields.iter().all(|(_, f)| walk(f)),
                _ => true,
            }
        }
        self.0.iter().all(walk)
    }
}

/// A specialization key plus non-owning handles to the objects it names.
#[derive(Debug, Clone)]
pub struct Specialization {
    /// The key.
    pub key: SpecializationKey,
    /// Weak handles to every structural object in the key.
    pub objects: Vec<WeakObject>,
}

/// Errors computing a specialization key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecializationError {
    /// The number of arguments does not match the signature.
    #[error("expected {expected} argument(s), got {got}")]
    Arity {
        /// Declared parameter count.
        expected: usize,
        /// Supplied argument count.
        got: usize,
    },

    /// A reference array was passed to a structural parameter.
    #[error("argument {index} is an array passed by reference and cannot be structural")]
    ArrayAsStructural {
        /// Zero-based argument index.
        index: usize,
    },

    /// An opaque value was passed to a structural parameter.
    #[error("argument {index} has no logical identity and cannot be structural")]
    OpaqueStructural {
        /// Zero-based argument index.
        index: usize,
    },
}

/// Computes the specialization of a call.
pub fn specialize(
    signature: &Signature,
    args: &[ArgValue],
) -> Result<Specialization, SpecializationError> {
    if signature.len() != args.len() {
        return Err(SpecializationError::Arity {
            expected: signature.len(),
            got: args.len(),
        });
    }
    let mut objects = Vec::new();
    let mut key = Vec::with_capacity(args.len());
    for (index, (param, arg)) in signature.params.iter().zip(args).enumerate() {
        let d = match param.kind {
            ParamKind::Structural => structural(index, arg, &mut objects)?,
            ParamKind::Value => value(arg),
        };
        key.push(d);
    }
    Ok(Specialization {
        key: SpecializationKey(key),
        objects,
    })
}

fn structural(
    index: usize,
    arg: &ArgValue,
    objects: &mut Vec<WeakObject>,
) -> Result<Discriminator, SpecializationError> {
    Ok(match arg {
        ArgValue::Scalar(s) => Discriminator::Scalar {
            dtype: s.dtype(),
            bits: s.bits(),
        },
        ArgValue::Array(ArrayArg {
            kind: ArrayKind::Field(id),
            ..
        }) => Discriminator::Storage(*id),
        ArgValue::Array(_) => return Err(SpecializationError::ArrayAsStructural { index }),
        ArgValue::Object(obj) => {
            objects.push(obj.downgrade());
            Discriminator::Object(obj.id())
        }
        ArgValue::Enum(e) => Discriminator::Enum {
            type_name: e.type_name.clone(),
            value: e.value,
        },
        ArgValue::Tuple(items) => Discriminator::Tuple(
            items
                .iter()
                .map(|item| structural(index, item, objects))
                .collect::<Result<_, _>>()?,
        ),
        ArgValue::Record(r) => Discriminator::Record {
            type_name: r.type_name.clone(),
            fields: r
                .fields
                .iter()
                .map(|f| structural(index, &f.value, objects).map(|d| (f.name.clone(), d)))
                .collect::<Result<_, _>>()?,
        },
        ArgValue::Opaque => return Err(SpecializationError::OpaqueStructural { index }),
    })
}

fn value(arg: &ArgValue) -> Discriminator {
    match arg {
        ArgValue::Scalar(s) => Discriminator::ScalarType(s.dtype()),
        ArgValue::Array(ArrayArg {
            kind: ArrayKind::Field(id),
            ..
        }) => Discriminator::Storage(*id),
        ArgValue::Array(a) => Discriminator::Array {
            dtype: a.dtype,
            rank: a.rank(),
            element_shape: a.element_shape.clone(),
            needs_grad: a.needs_grad,
            external: a.kind == ArrayKind::External,
        },
        ArgValue::Enum(e) => Discriminator::Enum {
            type_name: e.type_name.clone(),
            value: e.value,
        },
        ArgValue::Tuple(items) => Discriminator::Tuple(items.iter().map(value).collect()),
        ArgValue::Record(r) => Discriminator::Record {
            type_name: r.type_name.clone(),
            fields: r
                .fields
                .iter()
                .map(|f| {
                    let d = match (&f.value, f.pin_value) {
                        (ArgValue::Scalar(s), true) => Discriminator::Scalar {
                            dtype: s.dtype(),
                            bits: s.bits(),
                        },
                        (v, _) => value(v),
                    };
                    (f.name.clone(), d)
                })
                .collect(),
        },
        ArgValue::Object(_) | ArgValue::Opaque => Discriminator::Placeholder,
    }
}
