//! Value handles
//!
//! A [`ValueHandle`] pairs a type descriptor with one of three backings:
//! an address in debuggee memory (read lazily), a buffer of bytes already
//! in the engine (a synthesized or register-held value), or an opaque
//! native value owned by the host debugger. All interpretation goes
//! through the [`Inspector`], mirroring the resolution model of
//! [`TypeHandle`](crate::types::TypeHandle).
//!
//! [`Inspector`]: crate::engine::Inspector

use crate::backend::NativeValueId;
use crate::engine::Inspector;
use crate::error::{Result, ValViewError};
use crate::layout::{decode, describe_layout, Extracted};
use crate::memory::{extract_float, extract_integer};
use crate::types::{is_unsigned_name, Field, TypeCode, TypeHandle};

/// Storage backing a value.
#[derive(Debug, Clone)]
pub enum ValueRepr {
    /// Lives in debuggee memory at this address
    Address(u64),
    /// Bytes held by the engine, with the address they came from if any
    Bytes { data: Vec<u8>, address: Option<u64> },
    /// Owned by the host debugger
    Native(NativeValueId),
}

/// A typed value under inspection.
#[derive(Debug, Clone)]
pub struct ValueHandle {
    /// Display name, usually the member or variable name
    pub name: Option<String>,
    pub ty: TypeHandle,
    pub repr: ValueRepr,
    /// Cleared for variables the compiler reports as out of scope
    pub in_scope: bool,
}

impl ValueHandle {
    pub fn plain(ty: TypeHandle, repr: ValueRepr) -> Self {
        ValueHandle {
            name: None,
            ty,
            repr,
            in_scope: true,
        }
    }

    /// A value at a known address in debuggee memory.
    pub fn at_address(ty: TypeHandle, address: u64) -> Self {
        Self::plain(ty, ValueRepr::Address(address))
    }

    /// A value backed by bytes the engine already holds.
    pub fn from_bytes(ty: TypeHandle, data: Vec<u8>) -> Self {
        Self::plain(
            ty,
            ValueRepr::Bytes {
                data,
                address: None,
            },
        )
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Address of this value in debuggee memory, when known.
    pub fn address(&self, d: &mut Inspector) -> Option<u64> {
        match &self.repr {
            ValueRepr::Address(a) => Some(*a),
            ValueRepr::Bytes { address, .. } => *address,
            ValueRepr::Native(id) => d.backend.value_address(*id),
        }
    }

    /// The first `size` bytes backing this value.
    pub fn data(&self, d: &mut Inspector, size: usize) -> Result<Vec<u8>> {
        match &self.repr {
            ValueRepr::Address(a) => d.backend.read_memory(*a, size),
            ValueRepr::Bytes { data, .. } => {
                if data.len() < size {
                    Err(ValViewError::IndeterminateSize(format!(
                        "need {size} bytes, have {}",
                        data.len()
                    )))
                } else {
                    Ok(data[..size].to_vec())
                }
            }
            ValueRepr::Native(id) => {
                let native = d.backend.value_bytes(*id)?;
                if native.bytes.len() < size {
                    Err(ValViewError::IndeterminateSize(format!(
                        "native value has {} bytes, need {size}",
                        native.bytes.len()
                    )))
                } else {
                    Ok(native.bytes[..size].to_vec())
                }
            }
        }
    }

    /// All bytes of this value per its type size.
    pub fn data_sized(&self, d: &mut Inspector) -> Result<Vec<u8>> {
        let size = self.ty.size(d)?;
        self.data(d, size as usize)
    }

    /// Extract a little-endian integer of `bitsize` bits.
    pub fn extract_integer(&self, d: &mut Inspector, bitsize: u64, signed: bool) -> Result<i128> {
        let size = ((bitsize + 7) >> 3) as usize;
        let bytes = self.data(d, size)?;
        Ok(extract_integer(&bytes, size, signed))
    }

    /// Extract an IEEE float per the type's size.
    pub fn extract_float(&self, d: &mut Inspector) -> Result<f64> {
        let size = self.ty.size(d)?;
        let bytes = self.data(d, size as usize)?;
        extract_float(&bytes, size as usize).ok_or_else(|| {
            ValViewError::IndeterminateSize(format!("bad float width {size} for {}", self.ty))
        })
    }

    /// The value as an integer, signedness taken from the type name.
    pub fn integer(&self, d: &mut Inspector) -> Result<i128> {
        let stripped = self.ty.strip_typedefs(d)?;
        let signed = !is_unsigned_name(&stripped.name);
        let bits = self.ty.bits(d)?;
        self.extract_integer(d, bits, signed)
    }

    /// The value as a pointer.
    pub fn pointer(&self, d: &mut Inspector) -> Result<u64> {
        let bits = 8 * d.ptr_size() as u64;
        Ok(self.extract_integer(d, bits, false)? as u64)
    }

    /// Scalar rendering for integral, float, enum and pointer types.
    /// `None` for aggregates.
    pub fn simple_display(&self, d: &mut Inspector) -> Result<Option<String>> {
        match self.ty.code {
            TypeCode::Enum => {
                let v = self.integer(d)?;
                Ok(Some(self.ty.enum_display(d, v)))
            }
            TypeCode::Integral => Ok(Some(render_integer(self, d)?)),
            TypeCode::Float => Ok(Some(format_float(self.extract_float(d)?))),
            TypeCode::Pointer => Ok(Some(format!("0x{:x}", self.pointer(d)?))),
            TypeCode::Typedef => {
                let stripped = self.ty.strip_typedefs(d)?;
                if stripped.name == self.ty.name {
                    Ok(None)
                } else {
                    self.cast(d, stripped)?.simple_display(d)
                }
            }
            _ => Ok(None),
        }
    }

    /// Follow a pointer or reference. The stored bytes are the target
    /// address; the result lives at that address with the target type.
    pub fn dereference(&self, d: &mut Inspector) -> Result<ValueHandle> {
        let stripped = self.ty.strip_typedefs(d)?;
        match stripped.code {
            TypeCode::Pointer | TypeCode::Reference => {}
            _ => {
                return Err(ValViewError::Dereference(format!(
                    "{} is not a pointer or reference",
                    self.ty
                )))
            }
        }
        if let ValueRepr::Native(id) = self.repr {
            if let Ok((native, ty)) = d.backend.value_dereference(id) {
                return Ok(ValueHandle::plain(ty, ValueRepr::Native(native)));
            }
        }
        let target = stripped.target(d)?;
        let address = self.pointer(d)?;
        Ok(ValueHandle::at_address(target, address))
    }

    /// Reinterpret as another type, keeping the backing.
    pub fn cast(&self, d: &mut Inspector, to: TypeHandle) -> Result<ValueHandle> {
        if let ValueRepr::Native(id) = self.repr {
            if let Ok(native) = d.backend.value_cast(id, &to) {
                return Ok(ValueHandle {
                    name: self.name.clone(),
                    ty: to,
                    repr: ValueRepr::Native(native),
                    in_scope: self.in_scope,
                });
            }
        }
        Ok(ValueHandle {
            name: self.name.clone(),
            ty: to,
            repr: self.repr.clone(),
            in_scope: self.in_scope,
        })
    }

    /// Zero-extend to `size` bytes, detaching from any address.
    pub fn extend(&self, d: &mut Inspector, size: u64) -> Result<ValueHandle> {
        let own = self.ty.size(d)?;
        if own == size {
            return Ok(self.clone());
        }
        if own > size {
            return Err(ValViewError::IndeterminateSize(format!(
                "cannot shrink {} from {own} to {size} bytes",
                self.ty
            )));
        }
        let mut data = self.data(d, own as usize)?;
        data.resize(size as usize, 0);
        Ok(ValueHandle {
            name: self.name.clone(),
            ty: self.ty.clone(),
            repr: ValueRepr::Bytes {
                data,
                address: None,
            },
            in_scope: self.in_scope,
        })
    }

    /// Direct members, base class subobjects excluded.
    pub fn members(&self, d: &mut Inspector) -> Result<Vec<ValueHandle>> {
        let mut out = Vec::new();
        for field in self.ty.fields(d)? {
            if !field.is_base_class {
                out.push(self.extract_field(d, &field)?);
            }
        }
        Ok(out)
    }

    /// Member lookup by name, resolving through typedefs and pointers the
    /// way source-level member access does.
    pub fn member(&self, d: &mut Inspector, name: &str) -> Result<Option<ValueHandle>> {
        match self.ty.code {
            TypeCode::Typedef => {
                let stripped = self.ty.strip_typedefs(d)?;
                if stripped.name == self.ty.name {
                    return Err(ValViewError::UnresolvedType(self.ty.name.clone()));
                }
                self.cast(d, stripped)?.member(d, name)
            }
            TypeCode::Pointer => self.dereference(d)?.member(d, name),
            _ => match self.ty.field(d, name)? {
                Some(field) => Ok(Some(self.extract_field(d, &field)?)),
                None => Ok(None),
            },
        }
    }

    /// Carve a member out of this value.
    ///
    /// Byte-aligned members of addressable parents stay lazy (address
    /// arithmetic only). Bitfields are read eagerly, shifted down to bit
    /// zero and masked, and lose their address.
    pub fn extract_field(&self, d: &mut Inspector, field: &Field) -> Result<ValueHandle> {
        let offset = field.offset();
        let mut val = match &self.repr {
            ValueRepr::Address(a) => ValueHandle::at_address(field.ty.clone(), a + offset),
            ValueRepr::Bytes { data, address } => {
                let size = field.ty.size(d)? as usize;
                let start = offset as usize;
                if data.len() < start + size {
                    return Err(ValViewError::IndeterminateSize(format!(
                        "member {} past end of data",
                        field.name.as_deref().unwrap_or("?")
                    )));
                }
                ValueHandle::plain(
                    field.ty.clone(),
                    ValueRepr::Bytes {
                        data: data[start..start + size].to_vec(),
                        address: address.map(|a| a + offset),
                    },
                )
            }
            ValueRepr::Native(_) => {
                // Without a native child hook, fall back to flat bytes.
                let size = self.ty.size(d)?;
                let data = self.data(d, size as usize)?;
                let base = self.address(d);
                return ValueHandle::plain(
                    self.ty.clone(),
                    ValueRepr::Bytes {
                        data,
                        address: base,
                    },
                )
                .extract_field(d, field);
            }
        };
        val.name = field.name.clone();

        if let Some(bitsize) = field.bitsize {
            if bitsize % 8 != 0 || field.bitpos % 8 != 0 {
                let shift = field.bitpos % 8;
                let read_bits = shift + bitsize;
                let raw = val.extract_integer(d, read_bits, false)?;
                let masked = (raw >> shift) & ((1i128 << bitsize) - 1);
                let mut ty = field.ty.clone();
                ty.bitsize = Some(bitsize);
                return Ok(ValueHandle {
                    name: field.name.clone(),
                    ty,
                    repr: ValueRepr::Bytes {
                        data: masked.to_le_bytes()[..16].to_vec(),
                        address: None,
                    },
                    in_scope: self.in_scope,
                });
            }
        }
        val.in_scope = self.in_scope;
        Ok(val)
    }

    /// Decode this value against a layout pattern.
    pub fn split(&self, d: &mut Inspector, pattern: &str) -> Result<Vec<Extracted>> {
        let layout = describe_layout(d, pattern)?;
        let bytes = self.data(d, layout.size as usize)?;
        let address = self.address(d);
        decode(d, &layout, &bytes, address)
    }

    /// Decode the single leading field of a layout pattern.
    pub fn to_field(&self, d: &mut Inspector, pattern: &str) -> Result<Extracted> {
        self.split(d, pattern)?
            .into_iter()
            .next()
            .ok_or_else(|| ValViewError::layout(pattern, "empty pattern"))
    }
}

fn render_integer(value: &ValueHandle, d: &mut Inspector) -> Result<String> {
    let v = value.integer(d)?;
    if value.ty.name == "bool" {
        return Ok(if v == 0 { "false" } else { "true" }.to_string());
    }
    Ok(v.to_string())
}

fn format_float(v: f64) -> String {
    format!("{v}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::engine::{DumpOptions, Inspector};

    fn inspector_with(backend: MockBackend) -> Inspector {
        Inspector::new(Box::new(backend), DumpOptions::default())
    }

    #[test]
    fn test_integer_extraction() {
        let mut mock = MockBackend::new(8);
        mock.map_region(0x1000, (-7i32).to_le_bytes().to_vec());
        let mut d = inspector_with(mock);
        let ty = d.create_type("int").unwrap();
        let v = ValueHandle::at_address(ty, 0x1000);
        assert_eq!(v.integer(&mut d).unwrap(), -7);
        assert_eq!(v.simple_display(&mut d).unwrap().unwrap(), "-7");
    }

    #[test]
    fn test_unsigned_wraps() {
        let mut mock = MockBackend::new(8);
        mock.map_region(0x1000, 0xFFu8.to_le_bytes().to_vec());
        let mut d = inspector_with(mock);
        let ty = d.create_type("unsigned char").unwrap();
        let v = ValueHandle::at_address(ty, 0x1000);
        assert_eq!(v.integer(&mut d).unwrap(), 255);
    }

    #[test]
    fn test_float_extraction() {
        let mut d = inspector_with(MockBackend::new(8));
        let ty = d.create_type("double").unwrap();
        let v = ValueHandle::from_bytes(ty, 2.5f64.to_le_bytes().to_vec());
        assert_eq!(v.extract_float(&mut d).unwrap(), 2.5);
    }

    #[test]
    fn test_dereference() {
        let mut mock = MockBackend::new(8);
        mock.map_region(0x1000, 0x2000u64.to_le_bytes().to_vec());
        mock.map_region(0x2000, 42i32.to_le_bytes().to_vec());
        let mut d = inspector_with(mock);
        let ty = d.create_type("int*").unwrap();
        let ptr = ValueHandle::at_address(ty, 0x1000);
        let pointee = ptr.dereference(&mut d).unwrap();
        assert_eq!(pointee.ty.name, "int");
        assert_eq!(pointee.address(&mut d), Some(0x2000));
        assert_eq!(pointee.integer(&mut d).unwrap(), 42);
    }

    #[test]
    fn test_dereference_rejects_non_pointer() {
        let mut d = inspector_with(MockBackend::new(8));
        let ty = d.create_type("int").unwrap();
        let v = ValueHandle::from_bytes(ty, vec![0; 4]);
        assert!(v.dereference(&mut d).is_err());
    }

    #[test]
    fn test_member_extraction() {
        let mut mock = MockBackend::new(8);
        let int_ty = mock.type_handle("int");
        mock.register_struct(
            "Point",
            8,
            vec![
                Field::new("x", int_ty.clone(), 0),
                Field::new("y", int_ty, 4),
            ],
        );
        let mut bytes = 3i32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&4i32.to_le_bytes());
        mock.map_region(0x1000, bytes);
        let mut d = inspector_with(mock);
        let ty = d.create_type("Point").unwrap();
        let v = ValueHandle::at_address(ty, 0x1000);
        let y = v.member(&mut d, "y").unwrap().unwrap();
        assert_eq!(y.integer(&mut d).unwrap(), 4);
        assert_eq!(y.address(&mut d), Some(0x1004));
        assert!(v.member(&mut d, "z").unwrap().is_none());
    }

    #[test]
    fn test_member_through_pointer() {
        let mut mock = MockBackend::new(8);
        let int_ty = mock.type_handle("int");
        mock.register_struct("Cell", 4, vec![Field::new("v", int_ty, 0)]);
        mock.map_region(0x1000, 0x2000u64.to_le_bytes().to_vec());
        mock.map_region(0x2000, 9i32.to_le_bytes().to_vec());
        let mut d = inspector_with(mock);
        let ty = d.create_type("Cell*").unwrap();
        let p = ValueHandle::at_address(ty, 0x1000);
        let v = p.member(&mut d, "v").unwrap().unwrap();
        assert_eq!(v.integer(&mut d).unwrap(), 9);
    }

    #[test]
    fn test_bitfield_extraction() {
        let mut mock = MockBackend::new(8);
        let int_ty = mock.type_handle("unsigned int");
        // flags: 3 bits at bit offset 2, value 0b101 inside 0b..10110..
        let field = Field {
            name: Some("flags".into()),
            ty: int_ty,
            bitpos: 2,
            bitsize: Some(3),
            is_base_class: false,
        };
        mock.register_struct("Packed", 4, vec![field.clone()]);
        mock.map_region(0x1000, 0b10110u32.to_le_bytes().to_vec());
        let mut d = inspector_with(mock);
        let ty = d.create_type("Packed").unwrap();
        let v = ValueHandle::at_address(ty, 0x1000);
        let f = v.extract_field(&mut d, &field).unwrap();
        assert_eq!(f.integer(&mut d).unwrap(), 0b101);
        // Bitfields detach from memory
        assert_eq!(f.address(&mut d), None);
    }

    #[test]
    fn test_extend() {
        let mut d = inspector_with(MockBackend::new(8));
        let ty = d.create_type("unsigned int").unwrap();
        let v = ValueHandle::from_bytes(ty, 5u32.to_le_bytes().to_vec());
        let wide = v.extend(&mut d, 8).unwrap();
        assert_eq!(wide.data(&mut d, 8).unwrap(), vec![5, 0, 0, 0, 0, 0, 0, 0]);
        assert!(v.extend(&mut d, 2).is_err());
    }

    #[test]
    fn test_split() {
        let mut mock = MockBackend::new(8);
        let mut bytes = 0xCAFEu64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(-1i32).to_le_bytes());
        mock.map_region(0x1000, bytes);
        let mut d = inspector_with(mock);
        let ty = d.create_type("Blob").unwrap();
        let v = ValueHandle::at_address(ty, 0x1000);
        let parts = v.split(&mut d, "pi").unwrap();
        assert_eq!(parts[0].as_u64().unwrap(), 0xCAFE);
        assert_eq!(parts[1].as_i64().unwrap(), -1);
    }
}
