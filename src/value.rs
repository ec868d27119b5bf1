//! Runtime-tagged scalar values.
//!
//! Thresholds and leaf outputs are stored as [`TypedValue`], a closed sum
//! type over the supported numeric element types. One tree representation
//! thereby serves every numeric precision: the tag is fixed at
//! construction and extraction is checked against it.

use std::fmt;
use std::str::FromStr;

/// Element types a [`TypedValue`] can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// 32-bit IEEE 754 float.
    Float32,
    /// 64-bit IEEE 754 float.
    Float64,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
}

impl ElementType {
    /// Size in bytes of one scalar of this type.
    pub fn size_of(self) -> usize {
        match self {
            ElementType::Float32 | ElementType::Int32 => 4,
            ElementType::Float64 | ElementType::Int64 => 8,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::Float32 => "float32",
            ElementType::Float64 => "float64",
            ElementType::Int32 => "int32",
            ElementType::Int64 => "int64",
        };
        f.write_str(name)
    }
}

impl FromStr for ElementType {
    type Err = TypeError;

    /// Parse a type tag from the closed set `float32 | float64 | int32 | int64`.
    ///
    /// Unrecognized tags fail with [`TypeError::UnknownTypeTag`]; this is the
    /// validation point for type strings arriving over external call surfaces.
    fn from_str(s: &str) -> Result<Self, TypeError> {
        match s {
            "float32" => Ok(ElementType::Float32),
            "float64" => Ok(ElementType::Float64),
            "int32" => Ok(ElementType::Int32),
            "int64" => Ok(ElementType::Int64),
            _ => Err(TypeError::UnknownTypeTag(s.to_string())),
        }
    }
}

/// Errors raised at the typed-value boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    /// Extraction requested a type other than the stored tag.
    #[error("value holds {actual}, extraction as {expected} is not allowed")]
    Mismatch {
        expected: ElementType,
        actual: ElementType,
    },
    /// A type tag string outside the closed set.
    #[error("unrecognized element type tag `{0}`")]
    UnknownTypeTag(String),
}

mod private {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
}

/// Scalar types that can be stored in a [`TypedValue`].
pub trait Element: Copy + private::Sealed {
    /// The tag corresponding to `Self`.
    const ELEMENT_TYPE: ElementType;

    /// Wrap into a tagged value.
    fn wrap(self) -> TypedValue;

    /// Extract from a tagged value; `None` on tag mismatch.
    fn try_unwrap(value: &TypedValue) -> Option<Self>;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const ELEMENT_TYPE: ElementType = ElementType::$variant;

            #[inline]
            fn wrap(self) -> TypedValue {
                TypedValue::$variant(self)
            }

            #[inline]
            fn try_unwrap(value: &TypedValue) -> Option<Self> {
                match value {
                    TypedValue::$variant(v) => Some(*v),
                    _ => None,
                }
            }
        }
    };
}

impl_element!(f32, Float32);
impl_element!(f64, Float64);
impl_element!(i32, Int32);
impl_element!(i64, Int64);

/// A scalar that remembers its own element type.
///
/// The tag never changes after construction. Copying is cheap; the value
/// owns nothing beyond the scalar itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TypedValue {
    Float32(f32),
    Float64(f64),
    Int32(i32),
    Int64(i64),
}

impl TypedValue {
    /// Wrap a typed scalar. Infallible.
    #[inline]
    pub fn new<T: Element>(value: T) -> Self {
        value.wrap()
    }

    /// Read one scalar (little-endian) from an untyped buffer.
    ///
    /// # Panics
    ///
    /// `bytes` holding at least `ty.size_of()` bytes is a precondition;
    /// a shorter buffer is a contract violation and panics.
    pub fn from_bytes(bytes: &[u8], ty: ElementType) -> Self {
        assert!(
            bytes.len() >= ty.size_of(),
            "buffer of {} bytes cannot hold one {}",
            bytes.len(),
            ty
        );
        match ty {
            ElementType::Float32 => {
                TypedValue::Float32(f32::from_le_bytes(bytes[..4].try_into().expect("length checked")))
            }
            ElementType::Float64 => {
                TypedValue::Float64(f64::from_le_bytes(bytes[..8].try_into().expect("length checked")))
            }
            ElementType::Int32 => {
                TypedValue::Int32(i32::from_le_bytes(bytes[..4].try_into().expect("length checked")))
            }
            ElementType::Int64 => {
                TypedValue::Int64(i64::from_le_bytes(bytes[..8].try_into().expect("length checked")))
            }
        }
    }

    /// The stored tag.
    #[inline]
    pub fn element_type(&self) -> ElementType {
        match self {
            TypedValue::Float32(_) => ElementType::Float32,
            TypedValue::Float64(_) => ElementType::Float64,
            TypedValue::Int32(_) => ElementType::Int32,
            TypedValue::Int64(_) => ElementType::Int64,
        }
    }

    /// Checked extraction as `T`.
    #[inline]
    pub fn get<T: Element>(&self) -> Result<T, TypeError> {
        T::try_unwrap(self).ok_or(TypeError::Mismatch {
            expected: T::ELEMENT_TYPE,
            actual: self.element_type(),
        })
    }

    /// Resolve the tag at runtime and hand the concretely typed scalar to
    /// `visitor`.
    ///
    /// This is how type-specialized code paths are generated without the
    /// tag enumeration leaking to every call site.
    #[inline]
    pub fn dispatch<V: ValueVisitor>(&self, visitor: V) -> V::Output {
        match *self {
            TypedValue::Float32(v) => visitor.visit_f32(v),
            TypedValue::Float64(v) => visitor.visit_f64(v),
            TypedValue::Int32(v) => visitor.visit_i32(v),
            TypedValue::Int64(v) => visitor.visit_i64(v),
        }
    }

    /// Numeric widening used for split comparisons and leaf aggregation.
    #[inline]
    pub(crate) fn to_f64(self) -> f64 {
        match self {
            TypedValue::Float32(v) => v as f64,
            TypedValue::Float64(v) => v,
            TypedValue::Int32(v) => v as f64,
            TypedValue::Int64(v) => v as f64,
        }
    }
}

/// Visitor over the concrete element types.
pub trait ValueVisitor {
    /// Result of the visitation.
    type Output;

    fn visit_f32(self, value: f32) -> Self::Output;
    fn visit_f64(self, value: f64) -> Self::Output;
    fn visit_i32(self, value: i32) -> Self::Output;
    fn visit_i64(self, value: i64) -> Self::Output;
}
