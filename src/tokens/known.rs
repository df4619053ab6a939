//! Fixed tokens of framework types.
//!
//! The execution engine special-cases these types (object headers, string and array
//! allocation, exception dispatch, primitive boxing) by comparing against hard-coded token
//! values, so they never go through the sequential allocator.

use strum::{EnumIter, IntoEnumIterator};

/// The largest token reserved for known types. Sequential allocation starts after it.
pub const LARGEST_KNOWN_TYPE_TOKEN: u32 = 40;

/// Framework types with a fixed remote token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
#[repr(u32)]
pub enum KnownTypeToken {
    /// `System.Object`
    Object = 1,
    /// `System.Type`
    Type = 2,
    /// `System.ValueType`
    ValueType = 3,
    /// `System.String`
    String = 4,
    /// `System.Reflection.TypeInfo`
    TypeInfo = 5,
    /// `System.RuntimeType`
    RuntimeType = 6,
    /// `System.Enum`
    Enum = 8,
    /// `System.Array`
    Array = 9,
    /// `System.Delegate`
    Delegate = 11,
    /// `System.MulticastDelegate`
    MulticastDelegate = 12,
    /// `System.Exception`
    Exception = 13,
    /// `System.SystemException`
    SystemException = 14,
    /// `System.Boolean`
    Boolean = 15,
    /// `System.Char`
    Char = 16,
    /// `System.SByte`
    SByte = 17,
    /// `System.Byte`
    Byte = 18,
    /// `System.Int16`
    Int16 = 19,
    /// `System.UInt16`
    UInt16 = 20,
    /// `System.Int32`
    Int32 = 21,
    /// `System.UInt32`
    UInt32 = 22,
    /// `System.Int64`
    Int64 = 23,
    /// `System.UInt64`
    UInt64 = 24,
    /// `System.Single`
    Single = 25,
    /// `System.Double`
    Double = 26,
    /// `System.IntPtr`
    IntPtr = 27,
    /// `System.UIntPtr`
    UIntPtr = 28,
}

impl KnownTypeToken {
    /// The token value.
    #[must_use]
    pub fn value(self) -> u32 {
        self as u32
    }

    /// The full name of the framework type.
    #[must_use]
    pub fn full_name(self) -> &'static str {
        match self {
            KnownTypeToken::Object => "System.Object",
            KnownTypeToken::Type => "System.Type",
            KnownTypeToken::ValueType => "System.ValueType",
            KnownTypeToken::String => "System.String",
            KnownTypeToken::TypeInfo => "System.Reflection.TypeInfo",
            KnownTypeToken::RuntimeType => "System.RuntimeType",
            KnownTypeToken::Enum => "System.Enum",
            KnownTypeToken::Array => "System.Array",
            KnownTypeToken::Delegate => "System.Delegate",
            KnownTypeToken::MulticastDelegate => "System.MulticastDelegate",
            KnownTypeToken::Exception => "System.Exception",
            KnownTypeToken::SystemException => "System.SystemException",
            KnownTypeToken::Boolean => "System.Boolean",
            KnownTypeToken::Char => "System.Char",
            KnownTypeToken::SByte => "System.SByte",
            KnownTypeToken::Byte => "System.Byte",
            KnownTypeToken::Int16 => "System.Int16",
            KnownTypeToken::UInt16 => "System.UInt16",
            KnownTypeToken::Int32 => "System.Int32",
            KnownTypeToken::UInt32 => "System.UInt32",
            KnownTypeToken::Int64 => "System.Int64",
            KnownTypeToken::UInt64 => "System.UInt64",
            KnownTypeToken::Single => "System.Single",
            KnownTypeToken::Double => "System.Double",
            KnownTypeToken::IntPtr => "System.IntPtr",
            KnownTypeToken::UIntPtr => "System.UIntPtr",
        }
    }

    /// Looks up a known type by its full name.
    #[must_use]
    pub fn from_full_name(name: &str) -> Option<Self> {
        KnownTypeToken::iter().find(|known| known.full_name() == name)
    }

    /// Looks up a known type by its token value.
    #[must_use]
    pub fn from_value(value: u32) -> Option<Self> {
        KnownTypeToken::iter().find(|known| known.value() == value)
    }
}

/// Open generic definitions with a reserved generic slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum KnownGenericToken {
    /// ``System.ByReference`1``
    ByReference = 1,
    /// ``System.Nullable`1``
    Nullable = 2,
    /// ``System.Span`1``
    Span = 3,
}

impl KnownGenericToken {
    /// The slot index; the token is `slot * GENERIC_TOKEN_STEP`.
    #[must_use]
    pub fn slot(self) -> u32 {
        self as u32
    }

    /// The full name of the open definition.
    #[must_use]
    pub fn full_name(self) -> &'static str {
        match self {
            KnownGenericToken::ByReference => "System.ByReference`1",
            KnownGenericToken::Nullable => "System.Nullable`1",
            KnownGenericToken::Span => "System.Span`1",
        }
    }

    /// Looks up a known generic definition by its full name.
    #[must_use]
    pub fn from_full_name(name: &str) -> Option<Self> {
        KnownGenericToken::iter().find(|known| known.full_name() == name)
    }
}
