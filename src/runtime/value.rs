//! Values exchanged with remote tasks.

use std::fmt;

use serde::Serialize;

use crate::{
    metadata::{types::PrimitiveKind, universe::Universe, MethodId},
    Result,
};

/// A task argument or return value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Value {
    /// No value, for `void` methods and constructors
    Void,
    /// `System.Boolean`
    Bool(bool),
    /// Signed integers up to 32 bits
    Int32(i32),
    /// Unsigned integers up to 32 bits
    UInt32(u32),
    /// `System.Int64`
    Int64(i64),
    /// `System.UInt64`
    UInt64(u64),
    /// `System.Single`
    Single(f32),
    /// `System.Double`
    Double(f64),
    /// An object reference; only null can be passed from the host
    Null,
}

impl Value {
    /// The little-endian bytes of the value as the engine stores it in an argument slot.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            Value::Void => Vec::new(),
            Value::Bool(b) => i32::from(b).to_le_bytes().to_vec(),
            Value::Int32(v) => v.to_le_bytes().to_vec(),
            Value::UInt32(v) => v.to_le_bytes().to_vec(),
            Value::Null => 0u32.to_le_bytes().to_vec(),
            Value::Int64(v) => v.to_le_bytes().to_vec(),
            Value::UInt64(v) => v.to_le_bytes().to_vec(),
            Value::Single(v) => v.to_le_bytes().to_vec(),
            Value::Double(v) => v.to_le_bytes().to_vec(),
        }
    }

    /// Decodes the return value of `method` from the bytes of a `Stopped` reply.
    ///
    /// Constructors and `void` methods always yield [`Value::Void`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the data is too short for the return type, or
    /// the return type is neither a primitive nor an enum.
    pub fn decode_return(universe: &Universe, method: MethodId, data: &[u8]) -> Result<Value> {
        let def = universe.method(method);
        let Some(return_type) = def.return_type.filter(|_| !def.is_constructor()) else {
            return Ok(Value::Void);
        };
        let ty = universe.type_def(return_type);
        let primitive = if ty.is_enum() {
            Some(PrimitiveKind::Int32)
        } else {
            ty.primitive
        };
        let Some(primitive) = primitive else {
            if universe.is_reference_type(return_type) {
                return Ok(Value::Null);
            }
            return Err(malformed_error!(
                "Unsupported return type {} of {}",
                ty.full_name(),
                universe.method_signature(method)
            ));
        };

        let read4 = || -> Result<[u8; 4]> {
            data.get(..4)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| malformed_error!("Return value needs 4 bytes, got {}", data.len()))
        };
        let read8 = || -> Result<[u8; 8]> {
            data.get(..8)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| malformed_error!("Return value needs 8 bytes, got {}", data.len()))
        };

        Ok(match primitive {
            PrimitiveKind::Boolean => Value::Bool(
                *data
                    .first()
                    .ok_or_else(|| malformed_error!("Empty boolean return value"))?
                    != 0,
            ),
            PrimitiveKind::SByte | PrimitiveKind::Int16 | PrimitiveKind::Int32 => {
                Value::Int32(i32::from_le_bytes(read4()?))
            }
            PrimitiveKind::Byte
            | PrimitiveKind::UInt16
            | PrimitiveKind::Char
            | PrimitiveKind::UInt32
            | PrimitiveKind::IntPtr
            | PrimitiveKind::UIntPtr => Value::UInt32(u32::from_le_bytes(read4()?)),
            PrimitiveKind::Int64 => Value::Int64(i64::from_le_bytes(read8()?)),
            PrimitiveKind::UInt64 => Value::UInt64(u64::from_le_bytes(read8()?)),
            PrimitiveKind::Single => Value::Single(f32::from_le_bytes(read4()?)),
            PrimitiveKind::Double => Value::Double(f64::from_le_bytes(read8()?)),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => f.write_str("void"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::UInt32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::Single(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Null => f.write_str("null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::method::{MethodAttributes, MethodBody};

    fn method_returning(universe: &Universe, name: Option<&str>) -> MethodId {
        let owner = universe.define_type("Demo", "Values").build();
        let mut builder = universe
            .define_method(owner, "Get")
            .attributes(MethodAttributes::STATIC)
            .body(MethodBody::new(vec![0x2A], 1));
        if let Some(name) = name {
            builder = builder.returns(universe.find_type(name).unwrap());
        }
        builder.build()
    }

    #[test]
    fn return_values_follow_the_declared_type() {
        let universe = Universe::with_core_library();
        let int = method_returning(&universe, Some("System.Int32"));
        assert_eq!(
            Value::decode_return(&universe, int, &(-5i32).to_le_bytes()).unwrap(),
            Value::Int32(-5)
        );

        let universe = Universe::with_core_library();
        let double = method_returning(&universe, Some("System.Double"));
        assert_eq!(
            Value::decode_return(&universe, double, &2.5f64.to_le_bytes()).unwrap(),
            Value::Double(2.5)
        );

        let universe = Universe::with_core_library();
        let void = method_returning(&universe, None);
        assert_eq!(Value::decode_return(&universe, void, &[]).unwrap(), Value::Void);
    }

    #[test]
    fn short_data_is_rejected() {
        let universe = Universe::with_core_library();
        let long = method_returning(&universe, Some("System.Int64"));
        assert!(Value::decode_return(&universe, long, &[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn argument_bytes() {
        assert_eq!(Value::Bool(true).to_bytes(), vec![1, 0, 0, 0]);
        assert_eq!(Value::UInt32(0x0102_0304).to_bytes(), vec![4, 3, 2, 1]);
        assert_eq!(Value::Null.to_bytes(), vec![0, 0, 0, 0]);
        assert_eq!(Value::Int64(-1).to_bytes(), vec![0xFF; 8]);
        assert!(Value::Void.to_bytes().is_empty());
    }
}
