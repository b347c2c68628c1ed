//! Host records mapped onto engine tables
//!
//! Records are described by an explicit field-descriptor table: one
//! `(name, TypeTag)` pair per field, in declaration order. The
//! [`host_struct!`](crate::host_struct) macro generates both the descriptor
//! table and the typed read/write code from a plain struct definition.

use crate::codec::TypeTag;
use crate::error::DecodeError;
use crate::stack::Stack;
use crate::value::Value;

/// Name and tag of one record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub tag: TypeTag,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, tag: TypeTag) -> Self {
        Self { name, tag }
    }
}

/// A host struct whose fields map one-to-one onto same-named table entries.
///
/// Implement through [`host_struct!`](crate::host_struct).
pub trait LuaStruct: Sized {
    /// Record name used in diagnostics.
    const NAME: &'static str;

    const FIELDS: &'static [FieldDescriptor];

    /// Read every field from the table on top of `stack`.
    fn read_fields(stack: &mut Stack) -> Result<Self, DecodeError>;

    /// Write every field into the table on top of `stack`.
    fn write_fields(self, stack: &mut Stack) -> Result<(), DecodeError>;
}

/// Field values read through a runtime descriptor table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    entries: Vec<(&'static str, Value)>,
}

impl Record {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn insert(&mut self, name: &'static str, value: Value) {
        self.entries.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fields in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.entries.iter().map(|(name, value)| (*name, value))
    }
}

/// Declare a struct that can be read from and written to an engine table.
///
/// Every field type must be an owned codec type (numbers, `bool`, `String`,
/// `Vec<u8>`, `Option<_>`, pointers, `NativeFn`); anything else fails to
/// compile.
///
/// # Example
/// ```ignore
/// host_struct! {
///     #[derive(Debug, PartialEq)]
///     pub struct Sample {
///         pub c: i32,
///         pub e: f64,
///     }
/// }
///
/// session.get_global("sample")?;
/// let sample: Sample = session.read_struct()?;
/// ```
#[macro_export]
macro_rules! host_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_vis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[$field_meta])*
                $field_vis $field: $ty,
            )*
        }

        impl $crate::LuaStruct for $name {
            const NAME: &'static str = stringify!($name);

            const FIELDS: &'static [$crate::FieldDescriptor] = &[
                $(
                    $crate::FieldDescriptor::new(
                        stringify!($field),
                        <$ty as $crate::Tagged>::TAG,
                    ),
                )*
            ];

            fn read_fields(
                stack: &mut $crate::Stack,
            ) -> ::std::result::Result<Self, $crate::DecodeError> {
                ::std::result::Result::Ok(Self {
                    $(
                        $field: stack.read_field::<$ty>(stringify!($field))?,
                    )*
                })
            }

            fn write_fields(
                self,
                stack: &mut $crate::Stack,
            ) -> ::std::result::Result<(), $crate::DecodeError> {
                $(
                    stack.write_field(stringify!($field), self.$field)?;
                )*
                ::std::result::Result::Ok(())
            }
        }
    };
}
