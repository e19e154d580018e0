//! Structural descriptors: the type-level summary of one argument.

use crate::value::{ArgValue, ArrayArg, ArrayKind, Dtype, Record, Scalar};
use kcache_common::LogicalId;
use std::fmt;

/// Storage layout of a described array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// Runtime-allocated ndarray.
    Ndarray,
    /// Foreign array.
    External,
    /// Global storage node; its identity and full shape are compiled in.
    Field {
        /// Logical id of the storage node.
        storage: LogicalId,
        /// Full shape of the storage node.
        shape: Vec<usize>,
    },
}

/// Type-discriminating summary of one argument value.
///
/// Scalar values, array shapes and array contents are excluded unless they
/// are compiled into the kernel (pinned record fields, enum variants, field
/// storage). The [`Display`](fmt::Display) form is the canonical
/// serialization hashed by the argument fingerprinter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentDescriptor {
    /// A scalar of the given type.
    Scalar(Dtype),
    /// A scalar whose value is part of the key.
    PinnedScalar {
        /// Scalar type.
        dtype: Dtype,
        /// Value bits as returned by [`Scalar::bits`].
        bits: u64,
    },
    /// An array.
    Array {
        /// Element scalar type.
        dtype: Dtype,
        /// Indexing rank.
        rank: usize,
        /// Trailing element dimensions.
        element_shape: Vec<usize>,
        /// Storage layout.
        layout: Layout,
        /// Whether the array carries a gradient.
        needs_grad: bool,
    },
    /// A record (or tuple) described field by field in declared order.
    StructuredRecord {
        /// Record type name (`tuple` for tuples).
        type_name: String,
        /// `(field name, descriptor)` pairs in declared order.
        fields: Vec<(String, ArgumentDescriptor)>,
    },
    /// An enumeration variant.
    EnumVariant {
        /// Enumeration type name.
        type_name: String,
        /// Variant name.
        variant: String,
        /// Variant discriminant.
        value: i64,
    },
    /// A declared structural object, identified by logical id.
    OpaqueReference(LogicalId),
    /// The value cannot be described; the whole call abstains.
    Unrepresentable,
}

impl ArgumentDescriptor {
    /// Returns `true` if this descriptor, or anything nested in it, is
    /// [`Unrepresentable`](Self::Unrepresentable).
    pub fn is_unrepresentable(&self) -> bool {
        match self {
            ArgumentDescriptor::Unrepresentable => true,
            ArgumentDescriptor::StructuredRecord { fields, .. } => {
                fields.iter().any(|(_, d)| d.is_unrepresentable())
            }
            _ => false,
        }
    }
}

/// Describes `value`.
///
/// `structural` states whether the value is passed to a declared structural
/// parameter; only then does an object get an
/// [`OpaqueReference`](ArgumentDescriptor::OpaqueReference). Any
/// undescribable field of a record makes the whole record
/// [`Unrepresentable`](ArgumentDescriptor::Unrepresentable).
pub fn describe(value: &ArgValue, structural: bool) -> ArgumentDescriptor {
    match value {
        ArgValue::Scalar(s) => ArgumentDescriptor::Scalar(s.dtype()),
        ArgValue::Array(a) => describe_array(a),
        ArgValue::Record(r) => describe_record(r, structural),
        ArgValue::Enum(e) => ArgumentDescriptor::EnumVariant {
            type_name: e.type_name.clone(),
            variant: e.variant.clone(),
            value: e.value,
        },
        ArgValue::Tuple(items) => {
            let mut fields = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let d = describe(item, structural);
                if d.is_unrepresentable() {
                    return ArgumentDescriptor::Unrepresentable;
                }
                fields.push((i.to_string(), d));
            }
            ArgumentDescriptor::StructuredRecord {
                type_name: "tuple".to_string(),
                fields,
            }
        }
        ArgValue::Object(obj) if structural => ArgumentDescriptor::OpaqueReference(obj.id()),
        ArgValue::Object(_) | ArgValue::Opaque => ArgumentDescriptor::Unrepresentable,
    }
}

fn describe_array(a: &ArrayArg) -> ArgumentDescriptor {
    let layout = match a.kind {
        ArrayKind::Ndarray => Layout::Ndarray,
        ArrayKind::External => Layout::External,
        ArrayKind::Field(storage) => Layout::Field {
            storage,
            shape: a.shape.clone(),
        },
    };
    ArgumentDescriptor::Array {
        dtype: a.dtype,
        rank: a.rank(),
        element_shape: a.element_shape.clone(),
        layout,
        needs_grad: a.needs_grad,
    }
}

fn describe_record(r: &Record, structural: bool) -> ArgumentDescriptor {
    let mut fields = Vec::with_capacity(r.fields.len());
    for field in &r.fields {
        let d = match (&field.value, field.pin_value) {
            (ArgValue::Scalar(s), true) => pinned(*s),
            (value, _) => describe(value, structural),
        };
        if d.is_unrepresentable() {
            return ArgumentDescriptor::Unrepresentable;
        }
        fields.push((field.name.clone(), d));
    }
    ArgumentDescriptor::StructuredRecord {
        type_name: r.type_name.clone(),
        fields,
    }
}

fn pinned(s: Scalar) -> ArgumentDescriptor {
    ArgumentDescriptor::PinnedScalar {
        dtype: s.dtype(),
        bits: s.bits(),
    }
}

fn write_dims(f: &mut fmt::Formatter<'_>, dims: &[usize]) -> fmt::Result {
    f.write_str("(")?;
    for (i, d) in dims.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{d}")?;
    }
    f.write_str(")")
}

impl fmt::Display for ArgumentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgumentDescriptor::Scalar(dtype) => write!(f, "[s-{dtype}]"),
            ArgumentDescriptor::PinnedScalar { dtype, bits } => write!(f, "[v-{dtype}-{bits:x}]"),
            ArgumentDescriptor::Array {
                dtype,
                rank,
                element_shape,
                layout,
                needs_grad,
            } => {
                match layout {
                    Layout::Ndarray => f.write_str("[nd-")?,
                    Layout::External => f.write_str("[ext-")?,
                    Layout::Field { storage, shape } => {
                        write!(f, "[f{storage}")?;
                        write_dims(f, shape)?;
                        f.write_str("-")?;
                    }
                }
                write!(f, "{dtype}-{rank}-")?;
                write_dims(f, element_shape)?;
                write!(f, "-{}]", u8::from(*needs_grad))
            }
            ArgumentDescriptor::StructuredRecord { type_name, fields } => {
                write!(f, "[r-{type_name}{{")?;
                for (i, (name, d)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{name}={d}")?;
                }
                f.write_str("}]")
            }
            ArgumentDescriptor::EnumVariant {
                type_name,
                variant,
                value,
            } => write!(f, "[e-{type_name}.{variant}-{value}]"),
            ArgumentDescriptor::OpaqueReference(id) => write!(f, "[o-{id}]"),
            ArgumentDescriptor::Unrepresentable => f.write_str("[?]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{EnumArg, RecordField, StructuralObject};
    use kcache_common::Epoch;

    fn record(fields: Vec<RecordField>) -> ArgValue {
        ArgValue::Record(Record {
            type_name: "Params".to_string(),
            fields,
        })
    }

    #[test]
    fn scalars_describe_type_not_value() {
        let a = describe(&Scalar::I32(3).into(), false);
        let b = describe(&Scalar::I32(7).into(), false);
        let c = describe(&Scalar::F32(3.0).into(), false);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "[s-i32]");
    }

    #[test]
    fn arrays_describe_rank_not_shape() {
        let a = describe(&ArrayArg::ndarray(Dtype::F32, vec![10]).into(), false);
        let b = describe(&ArrayArg::ndarray(Dtype::F32, vec![99]).into(), false);
        let c = describe(&ArrayArg::ndarray(Dtype::F32, vec![10, 10]).into(), false);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "[nd-f32-1-()-0]");
    }

    #[test]
    fn field_arrays_carry_identity_and_shape() {
        let epoch = Epoch::new();
        let field = ArrayArg::field(&epoch, Dtype::F64, vec![4, 4]);
        let d = describe(&field.clone().into(), false);
        assert_eq!(d.to_string(), "[f#0(4,4)-f64-2-()-0]");
        let other = ArrayArg::field(&epoch, Dtype::F64, vec![4, 4]);
        assert_ne!(d, describe(&other.into(), false));
    }

    #[test]
    fn element_shape_and_grad() {
        let a = ArrayArg::ndarray(Dtype::F32, vec![8, 3])
            .with_element_shape(vec![3])
            .with_grad();
        assert_eq!(describe(&a.into(), false).to_string(), "[nd-f32-1-(3)-1]");
    }

    #[test]
    fn records_recurse_in_declared_order() {
        let v = record(vec![
            RecordField::new("x", Scalar::F32(1.0).into()),
            RecordField::new("n", Scalar::I64(2).into()),
        ]);
        assert_eq!(
            describe(&v, false).to_string(),
            "[r-Params{x=[s-f32],n=[s-i64]}]"
        );
    }

    #[test]
    fn pinned_fields_include_value() {
        let a = record(vec![RecordField::pinned("mode", Scalar::I32(1).into())]);
        let b = record(vec![RecordField::pinned("mode", Scalar::I32(2).into())]);
        assert_ne!(describe(&a, false), describe(&b, false));

        let c = record(vec![RecordField::new("mode", Scalar::I32(1).into())]);
        let d = record(vec![RecordField::new("mode", Scalar::I32(2).into())]);
        assert_eq!(describe(&c, false), describe(&d, false));
    }

    #[test]
    fn undescribable_field_poisons_record() {
        let v = record(vec![
            RecordField::new("ok", Scalar::I32(1).into()),
            RecordField::new("bad", ArgValue::Opaque),
        ]);
        assert_eq!(describe(&v, false), ArgumentDescriptor::Unrepresentable);
        let t = ArgValue::Tuple(vec![Scalar::I32(1).into(), ArgValue::Opaque]);
        assert_eq!(describe(&t, false), ArgumentDescriptor::Unrepresentable);
    }

    #[test]
    fn enums_include_variant() {
        let e = |variant: &str, value| {
            ArgValue::Enum(EnumArg {
                type_name: "Mode".to_string(),
                variant: variant.to_string(),
                value,
            })
        };
        assert_ne!(describe(&e("Fast", 0), false), describe(&e("Exact", 1), false));
        assert_eq!(describe(&e("Fast", 0), false).to_string(), "[e-Mode.Fast-0]");
    }

    #[test]
    fn objects_only_describable_when_structural() {
        let epoch = Epoch::new();
        let obj: ArgValue = StructuralObject::new(&epoch, "Solver").into();
        assert_eq!(describe(&obj, false), ArgumentDescriptor::Unrepresentable);
        assert_eq!(
            describe(&obj, true),
            ArgumentDescriptor::OpaqueReference(kcache_common::LogicalId::from_raw(0))
        );
        assert!(describe(&ArgValue::Opaque, true).is_unrepresentable());
    }
}
