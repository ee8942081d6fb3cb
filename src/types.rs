//! Type descriptors for debuggee values
//!
//! This module contains the structures that describe the static type of a
//! value being inspected.
//!
//! # Main Types
//!
//! - [`TypeCode`] - Classification of a type (integral, pointer, struct, ...)
//! - [`TypeHandle`] - A cheaply cloneable type descriptor, optionally backed
//!   by a native record in the host debugger
//! - [`Field`] - A member, base class subobject or bitfield of a struct type
//!
//! # Resolution model
//!
//! A `TypeHandle` carries what is known textually (name, guessed code,
//! possibly a size). Everything else is resolved on demand through the
//! [`Inspector`], which consults the host backend for native types and
//! falls back to type-name arithmetic for synthetic ones: `Foo*` knows its
//! pointee, `int[8]` knows its element type and count, `Map<K,V>` knows
//! its template arguments, all without any debug-info record.
//!
//! [`Inspector`]: crate::engine::Inspector

use crate::backend::NativeTypeId;
use crate::engine::Inspector;
use crate::error::{Result, ValViewError};

/// Classification of a type.
///
/// The variant order mirrors dispatch priority in the dump engine:
/// typedefs are stripped first, then structural categories are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCode {
    /// Alias for another type, display name preserved
    Typedef,
    /// Class, struct or union
    Struct,
    /// The `void` type
    Void,
    /// Integer of any width and signedness, including `bool` and chars
    Integral,
    /// IEEE floating point
    Float,
    /// Enumeration
    Enum,
    /// Data or function pointer
    Pointer,
    /// Fixed-size array `T[N]`
    Array,
    /// C99 `_Complex`
    Complex,
    /// Lvalue or rvalue reference
    Reference,
    /// Function type (not a function pointer)
    Function,
    /// Pointer to member
    MemberPointer,
    /// Backend-specific packed string (e.g. Fortran character data)
    OpaqueString,
}

/// A type descriptor.
///
/// Equality is by name: two handles naming the same type are
/// interchangeable even when only one carries a native id.
#[derive(Debug, Clone)]
pub struct TypeHandle {
    /// Fully qualified display name, e.g. `MyNs::Map<int, Str>`
    pub name: String,
    pub code: TypeCode,
    /// Size in bits when known up front
    pub bitsize: Option<u64>,
    /// Record in the host debugger's type table, if any
    pub native: Option<NativeTypeId>,
}

impl PartialEq for TypeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for TypeHandle {}

impl std::fmt::Display for TypeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// A member of a struct type.
#[derive(Debug, Clone)]
pub struct Field {
    /// Member name. `None` for anonymous members and padding.
    pub name: Option<String>,
    pub ty: TypeHandle,
    /// Offset of the member within its parent, in bits
    pub bitpos: u64,
    /// Width in bits when this is a bitfield, `None` otherwise
    pub bitsize: Option<u64>,
    /// Whether this member is a base class subobject
    pub is_base_class: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: TypeHandle, byte_offset: u64) -> Self {
        Field {
            name: Some(name.into()),
            ty,
            bitpos: byte_offset * 8,
            bitsize: None,
            is_base_class: false,
        }
    }

    /// Byte offset of the member. Bitfields round down to their
    /// containing byte.
    pub fn offset(&self) -> u64 {
        self.bitpos >> 3
    }

    /// Whether the member starts and ends on byte boundaries.
    pub fn is_byte_aligned(&self) -> bool {
        self.bitpos % 8 == 0 && self.bitsize.map_or(true, |b| b % 8 == 0)
    }
}

/// Remove an elaborated-type keyword or top-level qualifier prefix.
pub fn strip_class_tag(type_name: &str) -> &str {
    for prefix in ["class ", "struct ", "union ", "enum ", "const ", "volatile "] {
        if let Some(rest) = type_name.strip_prefix(prefix) {
            return rest;
        }
    }
    type_name
}

/// Split an array type name `T[N]` into element name and count, using the
/// last `[` so that arrays of arrays split outermost-first.
pub fn split_array_name(type_name: &str) -> Result<(String, u64)> {
    let pos1 = type_name
        .rfind('[')
        .ok_or_else(|| ValViewError::TypeName(format!("not an array type: {type_name}")))?;
    let pos2 = type_name[pos1..]
        .find(']')
        .map(|p| p + pos1)
        .ok_or_else(|| ValViewError::TypeName(format!("unterminated array type: {type_name}")))?;
    let count = type_name[pos1 + 1..pos2]
        .trim()
        .parse::<u64>()
        .map_err(|e| ValViewError::TypeName(format!("bad array count in {type_name}: {e}")))?;
    Ok((type_name[..pos1].trim().to_string(), count))
}

/// Extract the `position`-th top-level template argument from a type name,
/// honoring nested angle brackets and parentheses. Local types carried as
/// `f(int, char**)::Local` lose the function prefix.
pub fn extract_template_argument(type_name: &str, position: usize) -> Option<String> {
    let open = type_name.find('<')?;
    let body: Vec<char> = type_name[open + 1..].chars().collect();
    // Drop the trailing '>'
    let body = &body[..body.len().checked_sub(1)?];
    let mut level = 0i32;
    let mut skip_space = false;
    let mut inner = String::new();
    let mut remaining = position;
    for &c in body {
        match c {
            '<' | '(' => {
                inner.push(c);
                level += 1;
            }
            '>' | ')' => {
                inner.push(c);
                level -= 1;
            }
            ',' if level == 0 => {
                if remaining == 0 {
                    return Some(cleanup_template_argument(&inner));
                }
                remaining -= 1;
                inner.clear();
            }
            ',' => {
                inner.push(c);
                skip_space = true;
            }
            ' ' if skip_space => {}
            _ => {
                inner.push(c);
                skip_space = false;
            }
        }
    }
    if remaining == 0 && !inner.trim().is_empty() {
        Some(cleanup_template_argument(&inner))
    } else {
        None
    }
}

fn cleanup_template_argument(inner: &str) -> String {
    let inner = inner.trim();
    match inner.find(")::") {
        Some(p) => inner[p + 3..].to_string(),
        None => inner.to_string(),
    }
}

/// Transport encoding for a scalar type with a universally agreed layout,
/// used for compact array transfer. `None` for everything else.
pub fn simple_encoding(type_name: &str) -> Option<&'static str> {
    Some(match type_name {
        "bool" | "char" | "signed char" => "int:1",
        "unsigned char" => "uint:1",
        "short" => "int:2",
        "unsigned short" => "uint:2",
        "int" => "int:4",
        "unsigned int" => "uint:4",
        "long long" => "int:8",
        "unsigned long long" => "uint:8",
        "float" => "float:4",
        "double" => "float:8",
        _ => return None,
    })
}

const INTEGRAL_NAMES: &[&str] = &[
    "bool", "char", "signed char", "unsigned char", "wchar_t", "char16_t", "char32_t", "short",
    "unsigned short", "int", "unsigned int", "long", "unsigned long", "long long",
    "unsigned long long",
];

/// Guess a [`TypeCode`] from a type name alone, used for types the host
/// has no record of.
pub fn guess_type_code(name: &str) -> TypeCode {
    let name = strip_class_tag(name).trim();
    if name.ends_with('*') {
        TypeCode::Pointer
    } else if name.ends_with(']') {
        TypeCode::Array
    } else if name.ends_with('&') || name.ends_with("&&") {
        TypeCode::Reference
    } else if name == "void" {
        TypeCode::Void
    } else if name == "float" || name == "double" {
        TypeCode::Float
    } else if INTEGRAL_NAMES.contains(&name) {
        TypeCode::Integral
    } else {
        TypeCode::Struct
    }
}

/// Whether an integral type name denotes an unsigned type.
pub fn is_unsigned_name(name: &str) -> bool {
    name.starts_with("unsigned") || name == "bool" || matches!(name, "char16_t" | "char32_t")
}

/// Byte width of the character unit for a character type, or `None` when
/// the type is not a character type.
pub fn char_unit_size(name: &str, size: u64) -> Option<u64> {
    match strip_class_tag(name) {
        "char" | "signed char" | "unsigned char" => Some(1),
        "wchar_t" | "char16_t" | "char32_t" => Some(size),
        _ => None,
    }
}

impl TypeHandle {
    /// A purely textual handle with a guessed code and no size.
    pub fn synthetic(name: impl Into<String>) -> Self {
        let name = name.into();
        let code = guess_type_code(&name);
        TypeHandle {
            name,
            code,
            bitsize: None,
            native: None,
        }
    }

    /// A textual handle with a known byte size.
    pub fn sized(name: impl Into<String>, code: TypeCode, size: u64) -> Self {
        TypeHandle {
            name: name.into(),
            code,
            bitsize: Some(size * 8),
            native: None,
        }
    }

    pub fn is_simple(&self) -> bool {
        matches!(
            self.code,
            TypeCode::Integral | TypeCode::Float | TypeCode::Enum
        )
    }

    /// Size in bytes.
    ///
    /// Resolution order: explicit bitsize, the per-session size cache,
    /// pointer and reference widths, array arithmetic, then a fresh host
    /// lookup by name.
    pub fn size(&self, d: &mut Inspector) -> Result<u64> {
        Ok((self.bits(d)? + 7) >> 3)
    }

    /// Size in bits.
    pub fn bits(&self, d: &mut Inspector) -> Result<u64> {
        if let Some(b) = self.bitsize {
            return Ok(b);
        }
        if let Some(&b) = d.type_size_cache.get(&self.name) {
            return Ok(b);
        }
        let bits = self.compute_bits(d)?;
        d.type_size_cache.insert(self.name.clone(), bits);
        Ok(bits)
    }

    fn compute_bits(&self, d: &mut Inspector) -> Result<u64> {
        match self.code {
            TypeCode::Pointer | TypeCode::Reference | TypeCode::MemberPointer => {
                Ok(8 * d.ptr_size() as u64)
            }
            TypeCode::Array => {
                let (elem_name, count) = split_array_name(&self.name)?;
                let elem = d.create_type(&elem_name)?;
                Ok(count * elem.bits(d)?)
            }
            _ => {
                if self.native.is_none() {
                    if let Some(fresh) = d.backend.lookup_type(&self.name) {
                        if let Some(b) = fresh.bitsize {
                            return Ok(b);
                        }
                    }
                }
                Err(ValViewError::UnknownSize(self.name.clone()))
            }
        }
    }

    /// Natural alignment in bytes.
    ///
    /// Scalars align to their size (`double` to the pointer width as a
    /// crude approximation), pointers to the pointer width, aggregates to
    /// the maximum alignment of their members.
    pub fn alignment(&self, d: &mut Inspector) -> Result<u64> {
        match self.code {
            TypeCode::Typedef => self.strip_typedefs(d)?.alignment(d),
            TypeCode::Pointer | TypeCode::Reference => Ok(d.ptr_size() as u64),
            TypeCode::Array => {
                let (elem_name, _) = split_array_name(&self.name)?;
                d.create_type(&elem_name)?.alignment(d)
            }
            _ if self.is_simple() => {
                if self.name == "double" {
                    Ok(d.ptr_size() as u64)
                } else {
                    self.size(d)
                }
            }
            _ => {
                let mut align = 1;
                for field in self.fields(d)? {
                    let a = field.ty.alignment(d)?;
                    if a > align {
                        align = a;
                    }
                }
                Ok(align)
            }
        }
    }

    /// Members of a struct type, base class subobjects first.
    pub fn fields(&self, d: &mut Inspector) -> Result<Vec<Field>> {
        if let Some(id) = self.native {
            return d.backend.type_fields(id);
        }
        if let Some(fresh) = d.backend.lookup_type(&self.name) {
            if let Some(id) = fresh.native {
                return d.backend.type_fields(id);
            }
        }
        Err(ValViewError::UnresolvedType(self.name.clone()))
    }

    /// Find a member by name, descending into base classes. The returned
    /// field's offset is rebased to this type.
    pub fn field(&self, d: &mut Inspector, name: &str) -> Result<Option<Field>> {
        self.field_at(d, name, 0)
    }

    fn field_at(&self, d: &mut Inspector, name: &str, bitoffset: u64) -> Result<Option<Field>> {
        for f in self.fields(d)? {
            if f.name.as_deref() == Some(name) {
                let mut found = f;
                found.bitpos += bitoffset;
                return Ok(Some(found));
            }
            if f.is_base_class {
                if let Some(found) = f.ty.field_at(d, name, bitoffset + f.bitpos)? {
                    return Ok(Some(found));
                }
            }
        }
        Ok(None)
    }

    /// Resolve through typedef chains to the underlying type. Bounded so
    /// a cyclic host record cannot hang the dump.
    pub fn strip_typedefs(&self, d: &mut Inspector) -> Result<TypeHandle> {
        let mut current = self.clone();
        for _ in 0..32 {
            if current.code != TypeCode::Typedef {
                return Ok(current);
            }
            let id = match current.native {
                Some(id) => id,
                None => match d.backend.lookup_type(&current.name).and_then(|t| t.native) {
                    Some(id) => id,
                    None => return Ok(current),
                },
            };
            match d.backend.type_strip_typedef(id) {
                Some(next) if next.name != current.name => current = next,
                _ => return Ok(current),
            }
        }
        Err(ValViewError::UnresolvedType(format!(
            "typedef cycle at {}",
            self.name
        )))
    }

    /// Pointee, referee or array element type.
    pub fn target(&self, d: &mut Inspector) -> Result<TypeHandle> {
        if let Some(id) = self.native {
            if let Some(t) = d.backend.type_target(id) {
                return Ok(t);
            }
        }
        match self.code {
            TypeCode::Array => {
                let (elem_name, _) = split_array_name(&self.name)?;
                d.create_type(&elem_name)
            }
            TypeCode::Pointer | TypeCode::Reference => {
                let name = self.name.trim_end_matches(['*', '&', ' ']).trim();
                if name.is_empty() {
                    Err(ValViewError::TypeName(format!(
                        "no target in {}",
                        self.name
                    )))
                } else {
                    d.create_type(name)
                }
            }
            TypeCode::Typedef => {
                let stripped = self.strip_typedefs(d)?;
                if stripped.name != self.name {
                    stripped.target(d)
                } else {
                    Err(ValViewError::UnresolvedType(self.name.clone()))
                }
            }
            _ => Err(ValViewError::TypeName(format!(
                "no target for {}",
                self.name
            ))),
        }
    }

    /// Array element type and count.
    pub fn split_array(&self, d: &mut Inspector) -> Result<(TypeHandle, u64)> {
        let (elem_name, count) = split_array_name(&self.name)?;
        Ok((d.create_type(&elem_name)?, count))
    }

    /// The `position`-th template argument. Native info wins; synthetic
    /// template types are parsed textually.
    pub fn template_argument(&self, d: &mut Inspector, position: usize) -> Result<TypeHandle> {
        if let Some(id) = self.native {
            if let Some(t) = d.backend.type_template_argument(id, position) {
                return Ok(t);
            }
        }
        match extract_template_argument(&self.name, position) {
            Some(name) => d.create_type(&name),
            None => Err(ValViewError::TypeName(format!(
                "no template argument {position} in {}",
                self.name
            ))),
        }
    }

    /// First base class, if any.
    pub fn first_base(&self, d: &mut Inspector) -> Option<TypeHandle> {
        let id = self.native?;
        d.backend.type_first_base(id)
    }

    /// Symbolic rendering of an enum value, falling back to the integer.
    pub fn enum_display(&self, d: &mut Inspector, intval: i128) -> String {
        if let Some(id) = self.native {
            if let Some(s) = d.backend.enum_display(id, intval) {
                return s;
            }
        }
        intval.to_string()
    }

    /// Byte width of the character unit, or `None` for non-character types.
    pub fn char_size(&self, d: &mut Inspector) -> Option<u64> {
        let size = self.size(d).ok()?;
        char_unit_size(&self.name, size)
    }
}
