//! Layout descriptor compilation and decoding
//!
//! Formatters describe the memory layout of a container header with a
//! compact pattern string instead of relying on debug info, which is often
//! absent for library internals. One character per field:
//!
//! - `p` pointer-sized unsigned integer
//! - `P` pointer-sized raw bytes
//! - `q` / `Q` signed / unsigned 64-bit integer
//! - `i` / `I` signed / unsigned 32-bit integer
//! - `h` / `H` signed / unsigned 16-bit integer
//! - `b` / `B` signed / unsigned 8-bit integer
//! - `d` / `f` 64-bit / 32-bit IEEE float
//! - `c` one raw byte
//! - `Ns` blob of N bytes (digits prefix the `s`)
//! - `{TypeName}` embedded value of a named type
//! - `@` insert alignment padding before the next field
//!
//! Compiled layouts are cached per session keyed on the exact pattern
//! string; decoding a value against a layout yields one [`Extracted`] per
//! field, padding included, so positions in the pattern map one to one to
//! positions in the result.

use std::sync::Arc;

use crate::engine::Inspector;
use crate::error::{Result, ValViewError};
use crate::memory::{extract_float, extract_integer, extract_pointer};
use crate::value::{ValueHandle, ValueRepr};

/// What a single pattern field decodes to.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    SignedInt,
    UnsignedInt,
    Float,
    /// `P`, `c`, `Ns` and alignment padding
    Bytes,
    /// `{TypeName}`
    Struct(String),
}

/// One field of a compiled layout.
#[derive(Debug, Clone)]
pub struct LayoutField {
    pub kind: FieldKind,
    /// Offset within the described block, in bits
    pub bitpos: u64,
    pub bitsize: u64,
    /// Set for `@`-generated padding, which is decoded but carries no data
    pub is_padding: bool,
}

impl LayoutField {
    pub fn offset(&self) -> u64 {
        self.bitpos >> 3
    }

    pub fn byte_size(&self) -> usize {
        ((self.bitsize + 7) >> 3) as usize
    }
}

/// A compiled layout pattern.
#[derive(Debug, Clone)]
pub struct CompiledLayout {
    pub pattern: String,
    /// Total described size in bytes, tail padding not included
    pub size: u64,
    pub fields: Vec<LayoutField>,
}

/// One decoded field.
#[derive(Debug, Clone)]
pub enum Extracted {
    Int(i128),
    Float(f64),
    Bytes(Vec<u8>),
    Value(ValueHandle),
}

impl Extracted {
    /// The field as an unsigned integer. Pointer fields decode this way.
    pub fn as_u64(&self) -> Result<u64> {
        match self {
            Extracted::Int(v) => Ok(*v as u64),
            _ => Err(ValViewError::Backend("field is not an integer".into())),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Extracted::Int(v) => Ok(*v as i64),
            _ => Err(ValViewError::Backend("field is not an integer".into())),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Extracted::Float(v) => Ok(*v),
            Extracted::Int(v) => Ok(*v as f64),
            _ => Err(ValViewError::Backend("field is not numeric".into())),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            Extracted::Bytes(b) => Ok(b),
            _ => Err(ValViewError::Backend("field is not raw bytes".into())),
        }
    }

    pub fn into_value(self) -> Result<ValueHandle> {
        match self {
            Extracted::Value(v) => Ok(v),
            _ => Err(ValViewError::Backend("field is not an embedded value".into())),
        }
    }
}

struct LayoutBuilder {
    current_bits: u64,
    fields: Vec<LayoutField>,
    auto_pad_next: bool,
}

impl LayoutBuilder {
    fn new() -> Self {
        LayoutBuilder {
            current_bits: 0,
            fields: Vec::new(),
            auto_pad_next: false,
        }
    }

    fn add(&mut self, d: &mut Inspector, kind: FieldKind, byte_size: u64) -> Result<()> {
        if self.auto_pad_next {
            self.auto_pad_next = false;
            let align = self.alignment_of(d, &kind, byte_size)?;
            // Fill up the current byte first
            self.current_bits = 8 * ((self.current_bits + 7) >> 3);
            let padding = (align - ((self.current_bits >> 3) % align)) % align;
            if padding > 0 {
                self.fields.push(LayoutField {
                    kind: FieldKind::Bytes,
                    bitpos: self.current_bits,
                    bitsize: padding * 8,
                    is_padding: true,
                });
                self.current_bits += padding * 8;
            }
        }
        self.fields.push(LayoutField {
            kind,
            bitpos: self.current_bits,
            bitsize: byte_size * 8,
            is_padding: false,
        });
        self.current_bits += byte_size * 8;
        Ok(())
    }

    fn alignment_of(&self, d: &mut Inspector, kind: &FieldKind, byte_size: u64) -> Result<u64> {
        if let FieldKind::Struct(type_name) = kind {
            let ty = d.create_type(type_name)?;
            if let Ok(a) = ty.alignment(d) {
                return Ok(a);
            }
        }
        Ok(if byte_size <= 8 {
            [1u64, 1, 2, 4, 4, 8, 8, 8, 8][byte_size as usize]
        } else {
            8
        })
    }
}

/// Compile a pattern, consulting the session cache first.
pub fn describe_layout(d: &mut Inspector, pattern: &str) -> Result<Arc<CompiledLayout>> {
    if let Some(cached) = d.layout_cache.get(pattern) {
        return Ok(Arc::clone(cached));
    }
    let compiled = Arc::new(compile(d, pattern)?);
    d.layout_cache
        .insert(pattern.to_string(), Arc::clone(&compiled));
    Ok(compiled)
}

fn compile(d: &mut Inspector, pattern: &str) -> Result<CompiledLayout> {
    let ptr_size = d.ptr_size() as u64;
    let mut builder = LayoutBuilder::new();
    let mut digits: Option<String> = None;
    let mut type_name: Option<String> = None;

    for c in pattern.chars() {
        if type_name.is_some() {
            if c == '}' {
                let name = type_name.take().unwrap_or_default();
                let size = match digits.take() {
                    Some(n) => parse_count(pattern, &n)?,
                    None => {
                        let ty = d.create_type(&name)?;
                        ty.size(d).map_err(|e| {
                            ValViewError::layout(pattern, format!("size of {name}: {e}"))
                        })?
                    }
                };
                builder.add(d, FieldKind::Struct(name), size)?;
            } else if let Some(name) = type_name.as_mut() {
                name.push(c);
            }
            continue;
        }
        match c {
            'p' => builder.add(d, FieldKind::UnsignedInt, ptr_size)?,
            'P' => builder.add(d, FieldKind::Bytes, ptr_size)?,
            'q' => builder.add(d, FieldKind::SignedInt, 8)?,
            'Q' => builder.add(d, FieldKind::UnsignedInt, 8)?,
            'd' => builder.add(d, FieldKind::Float, 8)?,
            'i' => builder.add(d, FieldKind::SignedInt, 4)?,
            'I' => builder.add(d, FieldKind::UnsignedInt, 4)?,
            'f' => builder.add(d, FieldKind::Float, 4)?,
            'h' => builder.add(d, FieldKind::SignedInt, 2)?,
            'H' => builder.add(d, FieldKind::UnsignedInt, 2)?,
            'b' => builder.add(d, FieldKind::SignedInt, 1)?,
            'B' => builder.add(d, FieldKind::UnsignedInt, 1)?,
            'c' => builder.add(d, FieldKind::Bytes, 1)?,
            '0'..='9' => digits.get_or_insert_with(String::new).push(c),
            's' => {
                let n = digits
                    .take()
                    .ok_or_else(|| ValViewError::layout(pattern, "'s' needs a byte count"))?;
                builder.add(d, FieldKind::Bytes, parse_count(pattern, &n)?)?;
            }
            '{' => type_name = Some(String::new()),
            '@' => builder.auto_pad_next = true,
            _ => {
                return Err(ValViewError::layout(
                    pattern,
                    format!("unknown layout code '{c}'"),
                ))
            }
        }
    }
    if type_name.is_some() {
        return Err(ValViewError::layout(pattern, "unterminated '{'"));
    }
    if let Some(n) = digits {
        return Err(ValViewError::layout(
            pattern,
            format!("dangling count '{n}'"),
        ));
    }

    Ok(CompiledLayout {
        pattern: pattern.to_string(),
        size: (builder.current_bits + 7) >> 3,
        fields: builder.fields,
    })
}

fn parse_count(pattern: &str, digits: &str) -> Result<u64> {
    digits
        .parse::<u64>()
        .map_err(|e| ValViewError::layout(pattern, format!("bad count '{digits}': {e}")))
}

/// Decode `bytes` against a compiled layout. `base_address` is the address
/// the bytes were read from, used to give embedded values an address.
pub fn decode(
    d: &mut Inspector,
    layout: &CompiledLayout,
    bytes: &[u8],
    base_address: Option<u64>,
) -> Result<Vec<Extracted>> {
    if (bytes.len() as u64) < layout.size {
        return Err(ValViewError::IndeterminateSize(format!(
            "layout '{}' needs {} bytes, got {}",
            layout.pattern,
            layout.size,
            bytes.len()
        )));
    }
    let mut out = Vec::with_capacity(layout.fields.len());
    for field in &layout.fields {
        let start = field.offset() as usize;
        let size = field.byte_size();
        let raw = &bytes[start..start + size];
        out.push(match &field.kind {
            FieldKind::SignedInt => Extracted::Int(extract_integer(raw, size, true)),
            FieldKind::UnsignedInt => {
                Extracted::Int(extract_integer(raw, size, false))
            }
            FieldKind::Float => Extracted::Float(extract_float(raw, size).ok_or_else(|| {
                ValViewError::layout(&layout.pattern, format!("bad float width {size}"))
            })?),
            FieldKind::Bytes => Extracted::Bytes(raw.to_vec()),
            FieldKind::Struct(type_name) => {
                let ty = d.create_type(type_name)?;
                let address = base_address.map(|a| a + field.offset());
                Extracted::Value(ValueHandle::plain(
                    ty,
                    ValueRepr::Bytes {
                        data: raw.to_vec(),
                        address,
                    },
                ))
            }
        });
    }
    Ok(out)
}

/// Read the first pattern field out of a raw pointer decode, used for
/// `value.to("p")` style one-shot extractions.
pub fn pointer_field(bytes: &[u8], ptr_size: usize) -> u64 {
    extract_pointer(bytes, ptr_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::engine::{DumpOptions, Inspector};

    fn inspector() -> Inspector {
        Inspector::new(Box::new(MockBackend::new(8)), DumpOptions::default())
    }

    #[test]
    fn test_compile_scalars() {
        let mut d = inspector();
        let layout = describe_layout(&mut d, "pIH").unwrap();
        assert_eq!(layout.size, 8 + 4 + 2);
        assert_eq!(layout.fields.len(), 3);
        assert_eq!(layout.fields[0].bitpos, 0);
        assert_eq!(layout.fields[1].bitpos, 64);
        assert_eq!(layout.fields[2].bitpos, 96);
    }

    #[test]
    fn test_compile_blob_and_padding() {
        let mut d = inspector();
        // One byte, then auto-pad to the 8-byte pointer alignment
        let layout = describe_layout(&mut d, "b@p").unwrap();
        assert_eq!(layout.size, 16);
        assert_eq!(layout.fields.len(), 3);
        assert!(layout.fields[1].is_padding);
        assert_eq!(layout.fields[1].byte_size(), 7);
        assert_eq!(layout.fields[2].bitpos, 64);
    }

    #[test]
    fn test_compile_no_padding_when_aligned() {
        let mut d = inspector();
        let layout = describe_layout(&mut d, "p@p").unwrap();
        assert_eq!(layout.size, 16);
        // Already aligned, no padding field inserted
        assert_eq!(layout.fields.len(), 2);
    }

    #[test]
    fn test_compile_errors_are_fatal() {
        let mut d = inspector();
        let err = describe_layout(&mut d, "pzq").unwrap_err();
        assert!(err.is_fatal());
        assert!(describe_layout(&mut d, "4").is_err());
        assert!(describe_layout(&mut d, "{Unclosed").is_err());
        assert!(describe_layout(&mut d, "s").is_err());
    }

    #[test]
    fn test_cache_reuses_compilation() {
        let mut d = inspector();
        let a = describe_layout(&mut d, "pp").unwrap();
        let b = describe_layout(&mut d, "pp").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_decode_values() {
        let mut d = inspector();
        let layout = describe_layout(&mut d, "Iib4s").unwrap();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&7u32.to_le_bytes());
        bytes.extend_from_slice(&(-3i32).to_le_bytes());
        bytes.push(0xFF);
        bytes.extend_from_slice(b"abcd");
        let fields = decode(&mut d, &layout, &bytes, None).unwrap();
        assert_eq!(fields[0].as_u64().unwrap(), 7);
        assert_eq!(fields[1].as_i64().unwrap(), -3);
        assert_eq!(fields[2].as_i64().unwrap(), -1);
        assert_eq!(fields[3].as_bytes().unwrap(), b"abcd");
    }

    #[test]
    fn test_decode_short_buffer() {
        let mut d = inspector();
        let layout = describe_layout(&mut d, "Q").unwrap();
        assert!(decode(&mut d, &layout, &[0u8; 4], None).is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_size_is_sum_of_fields(a in 0usize..4, b in 0usize..4) {
            let codes = ["q", "i", "h", "b"];
            let sizes = [8u64, 4, 2, 1];
            let pattern = format!("{}{}", codes[a], codes[b]);
            let mut d = inspector();
            let layout = describe_layout(&mut d, &pattern).unwrap();
            proptest::prop_assert_eq!(layout.size, sizes[a] + sizes[b]);
        }
    }
}
