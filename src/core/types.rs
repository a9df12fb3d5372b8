//! Type descriptors for native arguments and return values
//!
//! A `TypeDescriptor` is an immutable view of one native type as described by
//! the introspection repository. It carries no behavior beyond classification
//! queries; conversions live in `interop::marshal`.

use crate::errors::{MarshalError, Result};
use std::fmt;
use std::sync::Arc;

/// Parameter direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
    InOut,
}

impl Direction {
    /// Managed value flows into the native call
    #[inline]
    pub const fn is_inbound(self) -> bool {
        matches!(self, Self::In | Self::InOut)
    }

    /// Native call produces a value for the caller
    #[inline]
    pub const fn is_outbound(self) -> bool {
        matches!(self, Self::Out | Self::InOut)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::In => "in",
            Self::Out => "out",
            Self::InOut => "inout",
        })
    }
}

/// What the binding side must release once a transferred value is consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Ownership {
    #[default]
    None,
    Container,
    Everything,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntWidth {
    #[inline]
    pub const fn bits(self) -> u32 {
        match self {
            Self::W8 => 8,
            Self::W16 => 16,
            Self::W32 => 32,
            Self::W64 => 64,
        }
    }

    /// Inclusive range of a signed integer of this width
    pub const fn signed_range(self) -> (i64, i64) {
        match self {
            Self::W8 => (i8::MIN as i64, i8::MAX as i64),
            Self::W16 => (i16::MIN as i64, i16::MAX as i64),
            Self::W32 => (i32::MIN as i64, i32::MAX as i64),
            Self::W64 => (i64::MIN, i64::MAX),
        }
    }

    pub const fn unsigned_max(self) -> u64 {
        match self {
            Self::W8 => u8::MAX as u64,
            Self::W16 => u16::MAX as u64,
            Self::W32 => u32::MAX as u64,
            Self::W64 => u64::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatWidth {
    F32,
    F64,
}

/// Kind of a registered (named) type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisteredKind {
    Object,
    Interface,
    Struct,
    Union,
}

/// Named type from the repository: objects, interfaces and structs
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredType {
    pub namespace: String,
    pub name: String,
    pub kind: RegisteredKind,
    pub parent: Option<Arc<RegisteredType>>,
    /// Instance size in bytes, used when the caller allocates storage
    pub size: usize,
}

impl RegisteredType {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, kind: RegisteredKind) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind,
            parent: None,
            size: 0,
        }
    }

    pub fn object(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(namespace, name, RegisteredKind::Object)
    }

    pub fn structure(namespace: impl Into<String>, name: impl Into<String>, size: usize) -> Self {
        Self::new(namespace, name, RegisteredKind::Struct).with_size(size)
    }

    pub fn with_parent(mut self, parent: Arc<RegisteredType>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    /// Walk this type and its declared parents, nearest first
    pub fn ancestry(&self) -> impl Iterator<Item = &RegisteredType> {
        std::iter::successors(Some(self), |ty| ty.parent.as_deref())
    }

    /// Whether this type is, or recursively derives from, `qualified`
    /// (written as `Namespace.Name`)
    pub fn is_a(&self, qualified: &str) -> bool {
        self.ancestry().any(|ty| {
            qualified
                .split_once('.')
                .map_or(false, |(ns, name)| ty.namespace == ns && ty.name == name)
        })
    }
}

/// Members of an enum or flags type
#[derive(Debug, Clone, PartialEq)]
pub struct EnumInfo {
    pub namespace: String,
    pub name: String,
    pub members: Vec<(String, i64)>,
}

impl EnumInfo {
    pub fn new<S: Into<String>>(
        namespace: impl Into<String>,
        name: impl Into<String>,
        members: impl IntoIterator<Item = (S, i64)>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            members: members.into_iter().map(|(n, v)| (n.into(), v)).collect(),
        }
    }

    pub fn value_of(&self, member: &str) -> Option<i64> {
        self.members.iter().find(|(n, _)| n == member).map(|(_, v)| *v)
    }

    pub fn name_of(&self, value: i64) -> Option<&str> {
        self.members.iter().find(|(_, v)| *v == value).map(|(n, _)| n.as_str())
    }
}

/// Signature of a callback type
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackInfo {
    pub namespace: String,
    pub name: String,
    pub args: Vec<TypeDescriptor>,
    pub return_type: TypeDescriptor,
}

impl CallbackInfo {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        args: Vec<TypeDescriptor>,
        return_type: TypeDescriptor,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            args,
            return_type,
        }
    }
}

/// Native representation tag
#[derive(Debug, Clone, PartialEq)]
pub enum TypeTag {
    Void,
    Boolean,
    Integer { width: IntWidth, signed: bool },
    Float(FloatWidth),
    Utf8,
    Enum(Arc<EnumInfo>),
    Flags(Arc<EnumInfo>),
    Struct(Arc<RegisteredType>),
    Object(Arc<RegisteredType>),
    Interface(Arc<RegisteredType>),
    /// C array sized by a fixed size or a linked length parameter
    Array,
    FixedCArray,
    ZeroTerminatedArray,
    /// Growable byte buffer
    ByteArray,
    GList,
    GSList,
    GHashTable,
    StringVector,
    Callback(Arc<CallbackInfo>),
    Pointer,
}

impl TypeTag {
    #[inline]
    pub fn is_array_like(&self) -> bool {
        matches!(
            self,
            Self::Array | Self::FixedCArray | Self::ZeroTerminatedArray | Self::ByteArray
        )
    }

    #[inline]
    pub fn is_container_like(&self) -> bool {
        matches!(self, Self::GList | Self::GSList | Self::GHashTable | Self::StringVector)
    }

    /// Registered types passed by native reference
    #[inline]
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Struct(_) | Self::Object(_) | Self::Interface(_))
    }

    #[inline]
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Integer { .. })
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("void"),
            Self::Boolean => f.write_str("gboolean"),
            Self::Integer { width, signed } => {
                write!(f, "{}{}", if *signed { "gint" } else { "guint" }, width.bits())
            }
            Self::Float(FloatWidth::F32) => f.write_str("gfloat"),
            Self::Float(FloatWidth::F64) => f.write_str("gdouble"),
            Self::Utf8 => f.write_str("utf8"),
            Self::Enum(info) | Self::Flags(info) => write!(f, "{}.{}", info.namespace, info.name),
            Self::Struct(ty) | Self::Object(ty) | Self::Interface(ty) => {
                f.write_str(&ty.qualified_name())
            }
            Self::Array => f.write_str("array"),
            Self::FixedCArray => f.write_str("fixed-c-array"),
            Self::ZeroTerminatedArray => f.write_str("zero-terminated-array"),
            Self::ByteArray => f.write_str("byte-array"),
            Self::GList => f.write_str("glist"),
            Self::GSList => f.write_str("gslist"),
            Self::GHashTable => f.write_str("ghashtable"),
            Self::StringVector => f.write_str("strv"),
            Self::Callback(info) => write!(f, "{}.{}", info.namespace, info.name),
            Self::Pointer => f.write_str("gpointer"),
        }
    }
}

/// Managed abstraction responsible for converting a tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WrapperClass {
    /// Scalars converted in place
    Plain,
    /// Null-terminated string or opaque pointer
    InPointer,
    SizedArray,
    ZeroTerminated,
    ByteArray,
    List,
    SList,
    HashTable,
    Strv,
    Enum(String),
    Callback(String),
    Registered(String),
}

impl fmt::Display for WrapperClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => f.write_str("Plain"),
            Self::InPointer => f.write_str("InPointer"),
            Self::SizedArray => f.write_str("SizedArray"),
            Self::ZeroTerminated => f.write_str("ZeroTerminated"),
            Self::ByteArray => f.write_str("ByteArray"),
            Self::List => f.write_str("List"),
            Self::SList => f.write_str("SList"),
            Self::HashTable => f.write_str("HashTable"),
            Self::Strv => f.write_str("Strv"),
            Self::Enum(name) | Self::Callback(name) | Self::Registered(name) => f.write_str(name),
        }
    }
}

/// Map a tag to the managed abstraction that converts it
pub fn wrapper_class_for(tag: &TypeTag) -> WrapperClass {
    match tag {
        TypeTag::Void | TypeTag::Utf8 | TypeTag::Pointer => WrapperClass::InPointer,
        TypeTag::Boolean | TypeTag::Integer { .. } | TypeTag::Float(_) => WrapperClass::Plain,
        TypeTag::Enum(info) | TypeTag::Flags(info) => {
            WrapperClass::Enum(format!("{}.{}", info.namespace, info.name))
        }
        TypeTag::Struct(ty) | TypeTag::Object(ty) | TypeTag::Interface(ty) => {
            WrapperClass::Registered(ty.qualified_name())
        }
        TypeTag::Array | TypeTag::FixedCArray => WrapperClass::SizedArray,
        TypeTag::ZeroTerminatedArray => WrapperClass::ZeroTerminated,
        TypeTag::ByteArray => WrapperClass::ByteArray,
        TypeTag::GList => WrapperClass::List,
        TypeTag::GSList => WrapperClass::SList,
        TypeTag::GHashTable => WrapperClass::HashTable,
        TypeTag::StringVector => WrapperClass::Strv,
        TypeTag::Callback(info) => WrapperClass::Callback(format!("{}.{}", info.namespace, info.name)),
    }
}

/// Immutable description of one native type
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    tag: TypeTag,
    element: Option<Box<TypeDescriptor>>,
    key: Option<Box<TypeDescriptor>>,
    fixed_size: Option<usize>,
    length_index: Option<usize>,
    ownership: Ownership,
    caller_allocates: bool,
}

impl TypeDescriptor {
    pub fn new(tag: TypeTag) -> Self {
        Self {
            tag,
            element: None,
            key: None,
            fixed_size: None,
            length_index: None,
            ownership: Ownership::None,
            caller_allocates: false,
        }
    }

    pub fn void() -> Self {
        Self::new(TypeTag::Void)
    }

    pub fn boolean() -> Self {
        Self::new(TypeTag::Boolean)
    }

    pub fn int(width: IntWidth, signed: bool) -> Self {
        Self::new(TypeTag::Integer { width, signed })
    }

    pub fn int32() -> Self {
        Self::int(IntWidth::W32, true)
    }

    pub fn uint32() -> Self {
        Self::int(IntWidth::W32, false)
    }

    pub fn uint8() -> Self {
        Self::int(IntWidth::W8, false)
    }

    pub fn double() -> Self {
        Self::new(TypeTag::Float(FloatWidth::F64))
    }

    pub fn utf8() -> Self {
        Self::new(TypeTag::Utf8)
    }

    pub fn pointer() -> Self {
        Self::new(TypeTag::Pointer)
    }

    pub fn object(ty: Arc<RegisteredType>) -> Self {
        Self::new(TypeTag::Object(ty))
    }

    pub fn structure(ty: Arc<RegisteredType>) -> Self {
        Self::new(TypeTag::Struct(ty))
    }

    pub fn callback(info: Arc<CallbackInfo>) -> Self {
        Self::new(TypeTag::Callback(info))
    }

    /// C array of `element`
    pub fn array_of(element: TypeDescriptor) -> Self {
        Self::new(TypeTag::Array).with_element(element)
    }

    pub fn fixed_array_of(element: TypeDescriptor, size: usize) -> Self {
        Self::new(TypeTag::FixedCArray)
            .with_element(element)
            .with_fixed_size(size)
    }

    pub fn zero_terminated_of(element: TypeDescriptor) -> Self {
        Self::new(TypeTag::ZeroTerminatedArray).with_element(element)
    }

    pub fn strv() -> Self {
        Self::new(TypeTag::StringVector).with_element(Self::utf8())
    }

    pub fn byte_array() -> Self {
        Self::new(TypeTag::ByteArray).with_element(Self::uint8())
    }

    pub fn glist_of(element: TypeDescriptor) -> Self {
        Self::new(TypeTag::GList).with_element(element)
    }

    pub fn gslist_of(element: TypeDescriptor) -> Self {
        Self::new(TypeTag::GSList).with_element(element)
    }

    pub fn hash_table_of(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        let mut ty = Self::new(TypeTag::GHashTable).with_element(value);
        ty.key = Some(Box::new(key));
        ty
    }

    pub fn with_element(mut self, element: TypeDescriptor) -> Self {
        self.element = Some(Box::new(element));
        self
    }

    pub fn with_fixed_size(mut self, size: usize) -> Self {
        self.fixed_size = Some(size);
        self
    }

    /// Element count supplied by the parameter at `index`
    pub fn with_length_index(mut self, index: usize) -> Self {
        self.length_index = Some(index);
        self
    }

    pub fn with_ownership(mut self, ownership: Ownership) -> Self {
        self.ownership = ownership;
        self
    }

    pub fn caller_allocated(mut self) -> Self {
        self.caller_allocates = true;
        self
    }

    #[inline]
    pub fn tag(&self) -> &TypeTag {
        &self.tag
    }

    #[inline]
    pub fn element(&self) -> Option<&TypeDescriptor> {
        self.element.as_deref()
    }

    #[inline]
    pub fn key(&self) -> Option<&TypeDescriptor> {
        self.key.as_deref()
    }

    #[inline]
    pub fn fixed_size(&self) -> Option<usize> {
        self.fixed_size
    }

    #[inline]
    pub fn length_index(&self) -> Option<usize> {
        self.length_index
    }

    #[inline]
    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    #[inline]
    pub fn caller_allocates(&self) -> bool {
        self.caller_allocates
    }

    #[inline]
    pub fn is_array_like(&self) -> bool {
        self.tag.is_array_like()
    }

    #[inline]
    pub fn is_container_like(&self) -> bool {
        self.tag.is_container_like()
    }

    #[inline]
    pub fn is_void(&self) -> bool {
        matches!(self.tag, TypeTag::Void)
    }

    pub fn wrapper_class(&self) -> WrapperClass {
        wrapper_class_for(&self.tag)
    }

    /// Whether the native value is a buffer the binding may have to release
    pub fn is_buffer(&self) -> bool {
        matches!(self.tag, TypeTag::Utf8) || self.is_array_like() || self.is_container_like()
    }

    /// Check structural invariants; `name` labels the error
    pub fn validate(&self, name: &str, direction: Direction) -> Result<()> {
        let fail = |detail: &str| Err(MarshalError::unsupported_because(name, self, direction, detail));
        let has_element = self.is_array_like() || self.is_container_like();

        if has_element != self.element.is_some() {
            return fail("element type must be present exactly for array and container tags");
        }
        if matches!(self.tag, TypeTag::GHashTable) != self.key.is_some() {
            return fail("key type must be present exactly for hash tables");
        }
        if self.fixed_size.is_some() && self.length_index.is_some() {
            return fail("fixed size and linked length are mutually exclusive");
        }
        if (self.fixed_size.is_some() || self.length_index.is_some())
            && !matches!(
                self.tag,
                TypeTag::Array | TypeTag::FixedCArray | TypeTag::ZeroTerminatedArray
            )
        {
            return fail("only C arrays carry a fixed size or linked length");
        }
        if matches!(self.tag, TypeTag::FixedCArray) && self.fixed_size.is_none() {
            return fail("fixed-c-array without a fixed size");
        }
        match (&self.tag, self.element()) {
            (TypeTag::StringVector, Some(el)) if !matches!(el.tag, TypeTag::Utf8) => {
                return fail("string vector elements must be utf8");
            }
            (TypeTag::ByteArray, Some(el))
                if el.tag != (TypeTag::Integer { width: IntWidth::W8, signed: false }) =>
            {
                return fail("byte array elements must be guint8");
            }
            _ => {}
        }
        if let Some(element) = self.element() {
            element.validate(name, direction)?;
            if element.length_index.is_some() {
                return fail("nested arrays cannot link a length parameter");
            }
        }
        if let Some(key) = self.key() {
            key.validate(name, direction)?;
        }
        Ok(())
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.tag, self.element(), self.key()) {
            (TypeTag::GHashTable, Some(value), Some(key)) => write!(f, "ghashtable<{}, {}>", key, value),
            (tag, Some(element), _) if self.is_array_like() || self.is_container_like() => {
                write!(f, "{}<{}>", tag, element)
            }
            (tag, _, _) => write!(f, "{}", tag),
        }
    }
}
