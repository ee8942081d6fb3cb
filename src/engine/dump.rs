//! Item dispatch
//!
//! `put_item` is the entry point for rendering one value. It classifies
//! the value's type and hands off to the matching branch: registered
//! formatters first, then typedef stripping, pointers, functions, enums,
//! arrays, scalars, references, and finally the generic struct fallback
//! that lists raw members. Each branch ends with the item's value, type
//! and child count proposed on the current report frame.

use tracing::trace;

use crate::engine::{DisplayFormat, Inspector};
use crate::error::{Result, ValViewError};
use crate::types::{strip_class_tag, Field, TypeCode};
use crate::value::ValueHandle;

impl Inspector {
    /// Render one value into the current item scope.
    pub fn put_item(&mut self, value: &ValueHandle) -> Result<()> {
        self.put_item_full(value, true)
    }

    /// Like [`put_item`] but with dynamic type detection disabled, used
    /// for base class subobjects where the static type is the point.
    ///
    /// [`put_item`]: Inspector::put_item
    pub fn put_item_full(&mut self, value: &ValueHandle, try_dynamic: bool) -> Result<()> {
        if self.depth >= self.options.max_depth {
            self.put_special_value("notaccessible", "");
            self.put_num_child(0);
            return Ok(());
        }
        self.depth += 1;
        let result = self.dispatch_item(value, try_dynamic);
        self.depth -= 1;
        result
    }

    fn dispatch_item(&mut self, value: &ValueHandle, try_dynamic: bool) -> Result<()> {
        let type_name = value.ty.name.clone();
        trace!(iname = %self.current_iname(), ty = %type_name, "put_item");

        let try_dynamic = try_dynamic && self.options.use_dynamic_type;
        if try_dynamic {
            let address = value.address(self);
            self.put_address(address);
        }

        if !value.in_scope {
            self.put_special_value("optimizedout", "");
            self.put_num_child(0);
            return Ok(());
        }

        // Formatters see the typedefed name on purpose.
        if self.try_put_pretty_item(&type_name, value)? {
            return Ok(());
        }

        match value.ty.code {
            TypeCode::Typedef => {
                let stripped = value.ty.strip_typedefs(self)?;
                if stripped.name == type_name {
                    return Err(ValViewError::UnresolvedType(type_name));
                }
                let cast = value.cast(self, stripped)?;
                self.put_item_full(&cast, try_dynamic)?;
                self.put_better_type(&type_name);
                Ok(())
            }
            TypeCode::Pointer => self.put_formatted_pointer(value),
            TypeCode::Function => {
                self.put_type(&type_name);
                let pointer = value.pointer(self)?;
                self.put_value(format!("0x{pointer:x}"));
                self.put_num_child(0);
                Ok(())
            }
            TypeCode::Enum => {
                self.put_type(&type_name);
                let intval = value.integer(self)?;
                let display = value.ty.enum_display(self, intval);
                self.put_value(display);
                self.put_num_child(0);
                Ok(())
            }
            TypeCode::Array => self.put_c_style_array(value),
            TypeCode::Integral | TypeCode::Float => {
                let display = value
                    .simple_display(self)?
                    .ok_or_else(|| ValViewError::UnresolvedType(type_name.clone()))?;
                self.put_value(display);
                self.put_num_child(0);
                self.put_type(&type_name);
                Ok(())
            }
            TypeCode::Reference => self.put_reference(value, &type_name, try_dynamic),
            TypeCode::Complex => {
                self.put_type(&type_name);
                let size = value.ty.size(self)?;
                let data = value.data(self, size as usize)?;
                let half = (size / 2) as usize;
                let re = crate::memory::extract_float(&data, half).unwrap_or(f64::NAN);
                let im = crate::memory::extract_float(&data[half..], half).unwrap_or(f64::NAN);
                self.put_value(format!("{re} + {im} * I"));
                self.put_num_child(0);
                Ok(())
            }
            TypeCode::OpaqueString => {
                let size = value.ty.size(self)?;
                let data = value.data(self, size as usize)?;
                self.put_value_enc(super::codec::hexencode(&data), "latin1", 0);
                self.put_type(&type_name);
                self.put_num_child(0);
                Ok(())
            }
            TypeCode::Void => {
                self.put_type(&type_name);
                self.put_value("");
                self.put_num_child(0);
                Ok(())
            }
            TypeCode::Struct | TypeCode::MemberPointer => self.put_struct_item(value, &type_name),
        }
    }

    /// Look for a registered formatter and run it. Raw format and
    /// disabled fancy display bypass the registry entirely.
    pub fn try_put_pretty_item(&mut self, type_name: &str, value: &ValueHandle) -> Result<bool> {
        if !self.options.use_fancy
            || self.current_item_format(Some(type_name)) == DisplayFormat::Raw
        {
            return Ok(false);
        }
        let formatter = match self.find_formatter(type_name) {
            Some(f) => f,
            None => return Ok(false),
        };
        self.put_type(type_name);
        formatter.format(self, value)?;
        Ok(true)
    }

    fn put_struct_item(&mut self, value: &ValueHandle, type_name: &str) -> Result<()> {
        self.put_type(type_name);
        self.put_num_child(1);
        self.put_empty_value();
        if self.is_expanded() {
            self.put("sortable=\"1\",");
            let value = value.clone();
            self.with_children_count(1, |d| d.put_fields(&value, true))?;
        }
        Ok(())
    }

    fn put_reference(
        &mut self,
        value: &ValueHandle,
        type_name: &str,
        try_dynamic: bool,
    ) -> Result<()> {
        // References are carried as a pointer to the referent.
        let referent = match value.pointer(self) {
            Ok(0) => {
                self.put_special_value("nullreference", "");
                self.put_num_child(0);
                self.put_type(type_name);
                return Ok(());
            }
            Ok(address) => address,
            Err(_) => {
                self.put_special_value("optimizedout", "");
                self.put_type(type_name);
                self.put_num_child(0);
                return Ok(());
            }
        };

        let mut target = value.ty.target(self)?;
        if try_dynamic {
            if let Some(dynamic) = self.backend.dynamic_type(&target, referent) {
                target = dynamic;
            }
        }
        match self.dispatch_referent(referent, target) {
            Ok(()) => {
                let better = format!(
                    "{} &",
                    self.current_type_name().unwrap_or(strip_class_tag(type_name))
                );
                self.put_better_type(&better);
                Ok(())
            }
            Err(e) if !e.is_fatal() => {
                self.put_special_value("optimizedout", "");
                self.put_type(type_name);
                self.put_num_child(0);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn dispatch_referent(&mut self, address: u64, target: crate::types::TypeHandle) -> Result<()> {
        let item = ValueHandle::at_address(target, address);
        self.put_item(&item)
    }

    /// Pointer rendering: null, unreadable, void, string previews, fixed
    /// array formats, function pointers, auto-dereference, and the plain
    /// expandable pointer node.
    pub fn put_formatted_pointer(&mut self, value: &ValueHandle) -> Result<()> {
        let pointer = value.pointer(self)?;
        let type_name = value.ty.name.clone();

        if pointer == 0 {
            self.put_type(&type_name);
            self.put_value("0x0");
            self.put_num_child(0);
            return Ok(());
        }

        self.put_address(Some(pointer));
        let origin = value.address(self);
        self.put_origin_address(origin);

        if self.backend.read_memory(pointer, 1).is_err() {
            // A dangling pointer still shows its raw value.
            self.put_value(format!("0x{pointer:x}"));
            self.put_type(&type_name);
            self.put_num_child(0);
            return Ok(());
        }

        let display_format = self.current_item_format(Some(&type_name));
        let inner_type = value.ty.target(self)?;
        let inner_type_name = strip_class_tag(&inner_type.name).to_string();

        if inner_type.code == TypeCode::Void || inner_type_name == "void" {
            self.put_type(&type_name);
            self.put_value(format!("0x{pointer:x}"));
            self.put_num_child(0);
            return Ok(());
        }

        if display_format == DisplayFormat::Raw {
            self.put_type(&type_name);
            self.put_value(format!("0x{pointer:x}"));
            self.put_num_child(1);
            if self.is_expanded() {
                let pointee = value.dereference(self)?;
                self.with_children_count(1, |d| {
                    d.with_sub_item("*", |d| d.put_item(&pointee))
                })?;
            }
            return Ok(());
        }

        let mut limit = self.options.display_string_limit;
        if matches!(
            display_format,
            DisplayFormat::SeparateLatin1String | DisplayFormat::SeparateUtf8String
        ) {
            limit = 1_000_000;
        }
        if self.try_put_simple_formatted_pointer(
            pointer,
            &type_name,
            &inner_type_name,
            display_format,
            limit,
        )? {
            self.put_num_child(0);
            return Ok(());
        }

        if let Some(n) = display_format.array_count() {
            self.put_type(&type_name);
            self.put_item_count(n, 1_000_000_000);
            self.put_array_data(pointer, n, &inner_type)?;
            return Ok(());
        }

        if inner_type.code == TypeCode::Function {
            self.put_value(format!("0x{pointer:x}"));
            self.put_type(&type_name);
            self.put_num_child(0);
            return Ok(());
        }

        let is_this = self.current_iname().ends_with(".this");
        if (self.options.auto_deref_pointers || is_this)
            && !matches!(
                inner_type_name.as_str(),
                "char" | "signed char" | "unsigned char" | "wchar_t"
            )
        {
            self.put_type(&inner_type_name);
            let pointee = value.dereference(self)?;
            self.put_item(&pointee)?;
            self.put_origin_address(origin);
            return Ok(());
        }

        self.put_type(&type_name);
        self.put_value(format!("0x{pointer:x}"));
        self.put_num_child(1);
        if self.is_expanded() {
            let pointee = value.dereference(self)?;
            self.with_children_count(1, |d| d.with_sub_item("*", |d| d.put_item(&pointee)))?;
        }
        Ok(())
    }

    /// Fixed-size array rendering with string previews for character
    /// element types.
    pub fn put_c_style_array(&mut self, value: &ValueHandle) -> Result<()> {
        let array_type = value.ty.clone();
        let (inner_type, declared_count) = array_type.split_array(self)?;
        let address = value.address(self);

        match address {
            Some(a) => self.put_value_full(format!("@0x{a:x}"), None, -1, 0),
            None => self.put_empty_value(),
        }
        self.put_type(&array_type.name);

        let display_format = self.current_item_format(Some(&array_type.name));
        let inner_size = inner_type.size(self)?;
        let array_byte_size = match array_type.size(self) {
            Ok(s) if s > 0 => s,
            // Some compilers emit zero-sized debug info for arrays of
            // incomplete types; fall back to the declared count.
            _ => declared_count * inner_size,
        };
        let n = array_byte_size / inner_size.max(1);

        if display_format != DisplayFormat::Raw {
            if let Some(p) = address {
                let inner_name = strip_class_tag(&inner_type.name);
                if inner_name == "char" || inner_name == "wchar_t" {
                    self.put_char_array_helper(p, n, &inner_type, display_format, false)?;
                } else {
                    self.try_put_simple_formatted_pointer(
                        p,
                        &array_type.name,
                        inner_name,
                        display_format,
                        array_byte_size,
                    )?;
                }
            }
        }
        self.put_num_child(n);

        if let Some(p) = address {
            if self.is_expanded() {
                self.put_array_data(p, n, &inner_type)?;
            }
            self.put_plot_data(p, n, &inner_type)?;
        }
        Ok(())
    }

    /// Emit raw members of a struct value: the vtable pseudo-member,
    /// base class subobjects, then data members in declaration order.
    pub fn put_fields(&mut self, value: &ValueHandle, dump_base: bool) -> Result<()> {
        let fields = value.ty.fields(self)?;
        let mut base_index = 0usize;
        let mut anon_index = 0usize;
        for field in fields {
            if let Some(name) = &field.name {
                if name.starts_with("_vptr.") || name == "_vptr" {
                    self.put_vptr_item(value, &field)?;
                    continue;
                }
            }
            if field.is_base_class {
                base_index += 1;
                if dump_base {
                    self.put_base_class_item(value, &field, base_index)?;
                }
                continue;
            }
            let name = field.name.clone().unwrap_or_else(|| {
                anon_index += 1;
                format!("#{anon_index}")
            });
            let child = value.extract_field(self, &field)?;
            self.with_sub_item(&name, |d| d.put_item(&child))?;
        }
        Ok(())
    }

    fn put_base_class_item(
        &mut self,
        value: &ValueHandle,
        field: &Field,
        base_index: usize,
    ) -> Result<()> {
        let base_value = value.extract_field(self, field)?;
        let display = field.name.clone().unwrap_or_else(|| field.ty.name.clone());
        self.with_unnamed_sub_item(&format!("@{base_index}"), |d| {
            let iname = d.current_iname().to_string();
            d.put_field("iname", &iname);
            d.put_name(&format!("[{display}]"));
            d.put_field("sortgroup", &(1000 - base_index).to_string());
            let address = base_value.address(d);
            d.put_address(address);
            d.put_item_full(&base_value, false)
        })
    }

    /// Probe the virtual table as a bounded pseudo-array of function
    /// pointers, stopping at the first null slot.
    fn put_vptr_item(&mut self, value: &ValueHandle, field: &Field) -> Result<()> {
        const MAX_VTABLE_SLOTS: u64 = 100;
        let vptr = value.extract_field(self, field)?;
        let label = field.name.clone().unwrap_or_else(|| "_vptr".to_string());
        self.with_sub_item("[vptr]", |d| {
            d.put_type(" ");
            d.put_field("sortgroup", "20");
            d.put_value(label);
            d.put_num_child(MAX_VTABLE_SLOTS);
            if d.is_expanded() {
                let table = vptr.pointer(d)?;
                let step = d.ptr_size() as u64;
                d.with_children_count(MAX_VTABLE_SLOTS, |d| {
                    for i in 0..MAX_VTABLE_SLOTS {
                        let slot = match d.backend.read_pointer_at(table + i * step) {
                            Ok(s) => s,
                            Err(_) => break,
                        };
                        if slot == 0 {
                            break;
                        }
                        d.with_sub_item(&i.to_string(), |d| {
                            d.put_value(format!("0x{slot:x}"));
                            d.put_type(" ");
                            d.put_num_child(0);
                            Ok(())
                        })?;
                    }
                    Ok(())
                })?;
            }
            Ok(())
        })
    }

    /// Special rendering for `char** argv`: walk to the terminating null
    /// entry and show the strings.
    pub fn put_special_argv(&mut self, value: &ValueHandle) -> Result<()> {
        let mut n = 0u64;
        if let Ok(base) = value.pointer(self) {
            if base != 0 {
                let step = self.ptr_size() as u64;
                while n <= 100 {
                    match self.backend.read_pointer_at(base + n * step) {
                        Ok(0) | Err(_) => break,
                        Ok(_) => n += 1,
                    }
                }
            }
        }

        let value = value.clone();
        self.with_top_level("local.argv", move |d| {
            d.put_field("iname", "local.argv");
            d.put_name("argv");
            d.put_item_count(n, 100);
            d.put_type("char **");
            if d.is_expanded() {
                let base = value.pointer(d)?;
                let step = d.ptr_size() as u64;
                let char_ptr = d.create_type("char *")?;
                d.with_children_count(n, |d| {
                    for i in 0..n {
                        let entry = ValueHandle::at_address(char_ptr.clone(), base + i * step);
                        d.with_sub_item(&i.to_string(), |d| d.put_item(&entry))?;
                    }
                    Ok(())
                })?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::engine::DumpOptions;

    fn inspector_with(backend: MockBackend) -> Inspector {
        Inspector::new(Box::new(backend), DumpOptions::default())
    }

    #[test]
    fn test_put_item_integral() {
        let mut mock = MockBackend::new(8);
        mock.map_region(0x1000, 7i32.to_le_bytes().to_vec());
        let mut d = inspector_with(mock);
        let v = d.create_value_at(0x1000, "int").unwrap();
        let out = d.dump_value("local.x", "x", &v).unwrap();
        assert!(out.contains("name=\"x\""));
        assert!(out.contains("type=\"int\""));
        assert!(out.contains("value=\"7\""));
        assert!(out.contains("numchild=\"0\""));
    }

    #[test]
    fn test_put_item_null_pointer() {
        let mut mock = MockBackend::new(8);
        mock.map_region(0x1000, 0u64.to_le_bytes().to_vec());
        let mut d = inspector_with(mock);
        let v = d.create_value_at(0x1000, "int*").unwrap();
        let out = d.dump_value("local.p", "p", &v).unwrap();
        assert!(out.contains("value=\"0x0\""));
        assert!(out.contains("numchild=\"0\""));
    }

    #[test]
    fn test_put_item_dangling_pointer_keeps_value() {
        let mut mock = MockBackend::new(8);
        mock.map_region(0x1000, 0xDEAD0000u64.to_le_bytes().to_vec());
        let mut d = inspector_with(mock);
        let v = d.create_value_at(0x1000, "int*").unwrap();
        let out = d.dump_value("local.p", "p", &v).unwrap();
        assert!(out.contains("value=\"0xdead0000\""));
        assert!(out.contains("numchild=\"0\""));
    }

    #[test]
    fn test_char_pointer_previews_utf8() {
        let mut mock = MockBackend::new(8);
        mock.map_region(0x1000, 0x2000u64.to_le_bytes().to_vec());
        mock.map_region(0x2000, b"Hi\0".to_vec());
        let mut d = inspector_with(mock);
        let v = d.create_value_at(0x1000, "char*").unwrap();
        let out = d.dump_value("local.s", "s", &v).unwrap();
        assert!(out.contains("valueencoded=\"utf8\""));
        assert!(out.contains("value=\"4869\""));
    }

    #[test]
    fn test_max_depth_terminates() {
        // A struct that contains itself by reference would recurse
        // forever without the ceiling.
        let mut mock = MockBackend::new(8);
        let node_ptr = mock.type_handle("Node*");
        mock.register_struct("Node", 8, vec![Field::new("next", node_ptr, 0)]);
        mock.map_region(0x1000, 0x1000u64.to_le_bytes().to_vec());
        let mut options = DumpOptions::default();
        options.max_depth = 5;
        options.auto_deref_pointers = true;
        let mut d = Inspector::new(Box::new(mock), options);
        for depth in 0..12 {
            let mut iname = "local.n".to_string();
            for _ in 0..depth {
                iname.push_str(".next");
            }
            d.expand(iname);
        }
        let v = d.create_value_at(0x1000, "Node").unwrap();
        let out = d.dump_value("local.n", "n", &v).unwrap();
        assert!(out.contains("notaccessible"));
    }
}
