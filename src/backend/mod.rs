//! Host debugger backend abstraction
//!
//! The engine is embedded in a debugger front end that already owns a
//! connection to the debuggee and a parsed view of its debug info. That
//! host exposes itself through the [`DebugBackend`] trait: memory reads
//! via the [`MemoryView`] supertrait, plus optional hooks for native type
//! lookup, field enumeration, expression evaluation and dynamic type
//! detection.
//!
//! # Components
//!
//! - [`DebugBackend`] - Trait the embedding debugger implements
//! - [`NativeTypeId`] / [`NativeValueId`] - Opaque handles into the host's
//!   own type and value tables
//! - [`mock::MockBackend`] - In-memory backend for tests
//!
//! Every hook except memory access has a default body that reports the
//! capability as absent. A minimal host only needs `ptr_size`,
//! `read_memory` and `lookup_type`; the engine falls back to textual type
//! arithmetic for the rest.

pub mod mock;

pub use mock::MockBackend;

use crate::error::{Result, ValViewError};
use crate::memory::MemoryView;
use crate::types::{Field, TypeHandle};

/// Opaque handle to a type record owned by the host debugger.
///
/// The engine never interprets the payload, it only passes it back to the
/// backend that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeTypeId(pub u64);

/// Opaque handle to a value record owned by the host debugger.
///
/// Used for values that live outside addressable memory, typically
/// register-allocated or synthetic values produced by expression
/// evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeValueId(pub u64);

/// Bytes backing a native value, with the address they came from when the
/// value happens to be memory-resident after all.
#[derive(Debug, Clone)]
pub struct NativeValueBytes {
    pub bytes: Vec<u8>,
    pub address: Option<u64>,
}

/// Contract between the engine and the embedding debugger.
///
/// `MemoryView` is a supertrait: every backend can read debuggee memory.
/// The remaining hooks let a capable host supply authoritative debug-info
/// answers; the defaults make each capability optional.
pub trait DebugBackend: MemoryView {
    /// Resolve a type name to a handle, or `None` if the host has no
    /// record of it. The engine synthesizes pointer and array types
    /// textually when this returns `None` for a derived name.
    fn lookup_type(&mut self, name: &str) -> Option<TypeHandle>;

    /// Enumerate the fields of a native struct or union type, base class
    /// subobjects included.
    fn type_fields(&mut self, _id: NativeTypeId) -> Result<Vec<Field>> {
        Err(ValViewError::Backend("no native field info".into()))
    }

    /// Pointee, array element or referee type of a native derived type.
    fn type_target(&mut self, _id: NativeTypeId) -> Option<TypeHandle> {
        None
    }

    /// Underlying type of a native typedef.
    fn type_strip_typedef(&mut self, _id: NativeTypeId) -> Option<TypeHandle> {
        None
    }

    /// The `position`-th template argument of a native instantiated type.
    fn type_template_argument(&mut self, _id: NativeTypeId, _position: usize) -> Option<TypeHandle> {
        None
    }

    /// First base class of a native struct type, if any.
    fn type_first_base(&mut self, _id: NativeTypeId) -> Option<TypeHandle> {
        None
    }

    /// Symbolic rendering of an enum value, e.g. `Color::Red (1)` or an
    /// or-ed flag combination. `None` falls back to the plain integer.
    fn enum_display(&mut self, _id: NativeTypeId, _int_value: i128) -> Option<String> {
        None
    }

    /// Raw bytes of a native (non-addressable) value.
    fn value_bytes(&mut self, _id: NativeValueId) -> Result<NativeValueBytes> {
        Err(ValViewError::Backend("no native value bytes".into()))
    }

    /// Address of a native value if the host knows it is memory-resident.
    fn value_address(&mut self, _id: NativeValueId) -> Option<u64> {
        None
    }

    /// Dereference a native pointer or reference value.
    fn value_dereference(&mut self, _id: NativeValueId) -> Result<(NativeValueId, TypeHandle)> {
        Err(ValViewError::Backend("no native dereference".into()))
    }

    /// Reinterpret a native value as another type.
    fn value_cast(&mut self, _id: NativeValueId, _to: &TypeHandle) -> Result<NativeValueId> {
        Err(ValViewError::Backend("no native cast".into()))
    }

    /// Most-derived dynamic type of a polymorphic object at `address`
    /// whose static type is `static_type`, when the host can determine it
    /// from RTTI or vtable symbols.
    fn dynamic_type(&mut self, _static_type: &TypeHandle, _address: u64) -> Option<TypeHandle> {
        None
    }

    /// Evaluate a source-language expression in the current frame.
    fn evaluate(&mut self, _expression: &str) -> Result<crate::value::ValueHandle> {
        Err(ValViewError::Backend("no expression evaluation".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BareBackend;

    impl MemoryView for BareBackend {
        fn ptr_size(&self) -> usize {
            8
        }

        fn read_memory(&mut self, address: u64, _size: usize) -> Result<Vec<u8>> {
            Err(ValViewError::MemoryAccess {
                address,
                message: "unmapped".into(),
            })
        }
    }

    impl DebugBackend for BareBackend {
        fn lookup_type(&mut self, _name: &str) -> Option<TypeHandle> {
            None
        }
    }

    #[test]
    fn test_default_hooks_report_absent() {
        let mut b = BareBackend;
        assert!(b.type_fields(NativeTypeId(0)).is_err());
        assert!(b.type_target(NativeTypeId(0)).is_none());
        assert!(b.enum_display(NativeTypeId(0), 1).is_none());
        assert!(b.value_bytes(NativeValueId(0)).is_err());
        assert!(b.evaluate("1 + 1").is_err());
    }
}
