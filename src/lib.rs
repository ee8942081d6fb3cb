//! # ValView-RS: value inspection for debugger front ends
//!
//! A generic engine that turns raw debuggee memory into the display tree
//! a debugger's watch window shows: scalar previews, string elision,
//! container summaries via registered formatters, and expandable struct,
//! pointer and array nodes, emitted in a compact brace protocol.
//!
//! ## Architecture
//!
//! - **Backend**: The embedding debugger implements [`DebugBackend`] to
//!   provide memory reads and optional native type information
//! - **Engine**: [`Inspector`] runs the dump session: dispatch, report
//!   emission, caches and per-item display formats
//! - **Formatters**: [`FormatterRegistry`] maps type names to custom
//!   display routines driven through the same emitter primitives
//! - **Layouts**: pattern strings like `"pII@{Item}"` describe container
//!   headers without debug info
//!
//! ## Example
//!
//! ```ignore
//! use valview_rs::{DumpOptions, Inspector, MockBackend};
//!
//! let mut backend = MockBackend::new(8);
//! backend.map_region(0x1000, 42i32.to_le_bytes().to_vec());
//!
//! let mut inspector = Inspector::new(Box::new(backend), DumpOptions::default());
//! let value = inspector.create_value_at(0x1000, "int")?;
//! let report = inspector.dump_value("local.x", "x", &value)?;
//! assert!(report.contains("value=\"42\""));
//! ```

pub mod backend;
pub mod engine;
pub mod error;
pub mod layout;
pub mod memory;
pub mod registry;
pub mod types;
pub mod value;

// Re-export commonly used types
pub use backend::{DebugBackend, MockBackend, NativeTypeId, NativeValueId};
pub use engine::{ChildrenParams, DisplayFormat, DumpOptions, Inspector};
pub use error::{Result, ValViewError};
pub use layout::{describe_layout, Extracted};
pub use memory::MemoryView;
pub use registry::{Formatter, FormatterModule, FormatterRegistry, RegistryBuilder};
pub use types::{Field, TypeCode, TypeHandle};
pub use value::{ValueHandle, ValueRepr};
