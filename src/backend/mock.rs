//! Mock backend for tests
//!
//! Simulates a debuggee without a live target: memory is a set of mapped
//! byte regions, and the type table is populated by the test. Reads are
//! byte-exact, so a read reaching past a mapped region fails the way a
//! real transport does, which the string-preview retry logic depends on.

use std::collections::{BTreeMap, HashMap};

use crate::backend::{DebugBackend, NativeTypeId};
use crate::error::{Result, ValViewError};
use crate::memory::MemoryView;
use crate::types::{guess_type_code, Field, TypeCode, TypeHandle};
use crate::value::ValueHandle;

struct MockType {
    handle: TypeHandle,
    fields: Vec<Field>,
    underlying: Option<String>,
    variants: Vec<(String, i128)>,
}

struct MockSymbol {
    address: u64,
    type_name: String,
}

/// An in-memory [`DebugBackend`].
pub struct MockBackend {
    ptr_size: usize,
    regions: BTreeMap<u64, Vec<u8>>,
    types: Vec<MockType>,
    by_name: HashMap<String, usize>,
    symbols: HashMap<String, MockSymbol>,
}

impl MockBackend {
    pub fn new(ptr_size: usize) -> Self {
        MockBackend {
            ptr_size,
            regions: BTreeMap::new(),
            types: Vec::new(),
            by_name: HashMap::new(),
            symbols: HashMap::new(),
        }
    }

    /// Map `bytes` at `address`. Later mappings shadow earlier ones when
    /// they overlap.
    pub fn map_region(&mut self, address: u64, bytes: Vec<u8>) {
        self.regions.insert(address, bytes);
    }

    /// A handle for `name`: the registered type if present, otherwise a
    /// synthetic descriptor with builtin scalar and pointer sizes.
    pub fn type_handle(&self, name: &str) -> TypeHandle {
        if let Some(&idx) = self.by_name.get(name) {
            return self.types[idx].handle.clone();
        }
        let mut t = TypeHandle::synthetic(name);
        if t.bitsize.is_none() {
            t.bitsize = builtin_bits(name, t.code, self.ptr_size);
        }
        t
    }

    /// Make an expression or variable name resolvable by `evaluate`.
    pub fn define_symbol(&mut self, name: &str, address: u64, type_name: &str) {
        self.symbols.insert(
            name.to_string(),
            MockSymbol {
                address,
                type_name: type_name.to_string(),
            },
        );
    }

    pub fn register_primitive(&mut self, name: &str, size: u64) -> TypeHandle {
        let code = guess_type_code(name);
        self.register(name, code, Some(size * 8), Vec::new(), None, Vec::new())
    }

    pub fn register_struct(&mut self, name: &str, size: u64, fields: Vec<Field>) -> TypeHandle {
        self.register(
            name,
            TypeCode::Struct,
            Some(size * 8),
            fields,
            None,
            Vec::new(),
        )
    }

    pub fn register_typedef(&mut self, name: &str, underlying: &str) -> TypeHandle {
        self.register(
            name,
            TypeCode::Typedef,
            None,
            Vec::new(),
            Some(underlying.to_string()),
            Vec::new(),
        )
    }

    pub fn register_enum(
        &mut self,
        name: &str,
        size: u64,
        variants: Vec<(&str, i128)>,
    ) -> TypeHandle {
        let variants = variants
            .into_iter()
            .map(|(n, v)| (n.to_string(), v))
            .collect();
        self.register(name, TypeCode::Enum, Some(size * 8), Vec::new(), None, variants)
    }

    fn register(
        &mut self,
        name: &str,
        code: TypeCode,
        bitsize: Option<u64>,
        fields: Vec<Field>,
        underlying: Option<String>,
        variants: Vec<(String, i128)>,
    ) -> TypeHandle {
        let id = NativeTypeId(self.types.len() as u64);
        let handle = TypeHandle {
            name: name.to_string(),
            code,
            bitsize,
            native: Some(id),
        };
        self.by_name.insert(name.to_string(), self.types.len());
        self.types.push(MockType {
            handle: handle.clone(),
            fields,
            underlying,
            variants,
        });
        handle
    }

    fn entry(&self, id: NativeTypeId) -> Result<&MockType> {
        self.types
            .get(id.0 as usize)
            .ok_or_else(|| ValViewError::Backend(format!("unknown type id {}", id.0)))
    }
}

impl MemoryView for MockBackend {
    fn ptr_size(&self) -> usize {
        self.ptr_size
    }

    fn read_memory(&mut self, address: u64, size: usize) -> Result<Vec<u8>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        if let Some((&start, bytes)) = self.regions.range(..=address).next_back() {
            let offset = (address - start) as usize;
            if offset + size <= bytes.len() {
                return Ok(bytes[offset..offset + size].to_vec());
            }
        }
        Err(ValViewError::MemoryAccess {
            address,
            message: format!("no mapped region covers {size} bytes"),
        })
    }
}

impl DebugBackend for MockBackend {
    fn lookup_type(&mut self, name: &str) -> Option<TypeHandle> {
        let idx = *self.by_name.get(name)?;
        Some(self.types[idx].handle.clone())
    }

    fn type_fields(&mut self, id: NativeTypeId) -> Result<Vec<Field>> {
        Ok(self.entry(id)?.fields.clone())
    }

    fn type_strip_typedef(&mut self, id: NativeTypeId) -> Option<TypeHandle> {
        let underlying = self.types.get(id.0 as usize)?.underlying.clone()?;
        Some(self.type_handle(&underlying))
    }

    fn type_first_base(&mut self, id: NativeTypeId) -> Option<TypeHandle> {
        self.types
            .get(id.0 as usize)?
            .fields
            .iter()
            .find(|f| f.is_base_class)
            .map(|f| f.ty.clone())
    }

    fn enum_display(&mut self, id: NativeTypeId, int_value: i128) -> Option<String> {
        let entry = self.types.get(id.0 as usize)?;
        if let Some((name, _)) = entry.variants.iter().find(|(_, v)| *v == int_value) {
            return Some(format!("{name} ({int_value})"));
        }
        // Flag enums display as an or-ed combination
        let mut remaining = int_value;
        let mut parts = Vec::new();
        for (name, v) in &entry.variants {
            if *v != 0 && remaining & v == *v {
                parts.push(name.as_str());
                remaining &= !v;
            }
        }
        if remaining == 0 && !parts.is_empty() {
            return Some(format!("({}) ({int_value})", parts.join(" | ")));
        }
        None
    }

    fn evaluate(&mut self, expression: &str) -> Result<ValueHandle> {
        let symbol = self.symbols.get(expression).ok_or_else(|| {
            ValViewError::Backend(format!("cannot evaluate '{expression}'"))
        })?;
        let ty = self.type_handle(&symbol.type_name);
        Ok(ValueHandle::at_address(ty, symbol.address).named(expression))
    }
}

fn builtin_bits(name: &str, code: TypeCode, ptr_size: usize) -> Option<u64> {
    let ptr_bits = 8 * ptr_size as u64;
    match code {
        TypeCode::Pointer | TypeCode::Reference | TypeCode::MemberPointer => {
            return Some(ptr_bits)
        }
        _ => {}
    }
    Some(match name {
        "bool" | "char" | "signed char" | "unsigned char" => 8,
        "short" | "unsigned short" | "char16_t" => 16,
        "int" | "unsigned int" | "float" | "wchar_t" | "char32_t" => 32,
        "long" | "unsigned long" => ptr_bits,
        "long long" | "unsigned long long" | "double" => 64,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_memory_exact() {
        let mut mock = MockBackend::new(8);
        mock.map_region(0x1000, vec![1, 2, 3, 4]);
        assert_eq!(mock.read_memory(0x1000, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(mock.read_memory(0x1002, 2).unwrap(), vec![3, 4]);
        assert!(mock.read_memory(0x1000, 5).is_err());
        assert!(mock.read_memory(0x2000, 1).is_err());
    }

    #[test]
    fn test_lookup_registered_only() {
        let mut mock = MockBackend::new(8);
        mock.register_primitive("int", 4);
        assert!(mock.lookup_type("int").is_some());
        assert!(mock.lookup_type("Foo").is_none());
    }

    #[test]
    fn test_typedef_resolution() {
        let mut mock = MockBackend::new(8);
        mock.register_primitive("unsigned int", 4);
        let td = mock.register_typedef("u32", "unsigned int");
        let id = td.native.unwrap();
        let underlying = mock.type_strip_typedef(id).unwrap();
        assert_eq!(underlying.name, "unsigned int");
        assert_eq!(underlying.code, TypeCode::Integral);
    }

    #[test]
    fn test_enum_display() {
        let mut mock = MockBackend::new(8);
        let e = mock.register_enum("Color", 4, vec![("Red", 1), ("Green", 2), ("Blue", 4)]);
        let id = e.native.unwrap();
        assert_eq!(mock.enum_display(id, 2).unwrap(), "Green (2)");
        assert_eq!(mock.enum_display(id, 5).unwrap(), "(Red | Blue) (5)");
        assert_eq!(mock.enum_display(id, 8), None);
    }

    #[test]
    fn test_first_base() {
        let mut mock = MockBackend::new(8);
        let int_ty = mock.type_handle("int");
        let base = mock.register_struct("Base", 4, vec![Field::new("b", int_ty.clone(), 0)]);
        let mut base_field = Field::new("Base", base.clone(), 0);
        base_field.is_base_class = true;
        let derived =
            mock.register_struct("Derived", 8, vec![base_field, Field::new("d", int_ty, 4)]);
        let first = mock.type_first_base(derived.native.unwrap()).unwrap();
        assert_eq!(first.name, "Base");
    }

    #[test]
    fn test_evaluate_symbols() {
        let mut mock = MockBackend::new(8);
        mock.register_primitive("int", 4);
        mock.define_symbol("counter", 0x3000, "int");
        let v = mock.evaluate("counter").unwrap();
        assert_eq!(v.name.as_deref(), Some("counter"));
        assert!(mock.evaluate("missing").is_err());
    }
}
