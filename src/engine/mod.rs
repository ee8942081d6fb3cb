//! The inspection engine
//!
//! [`Inspector`] owns a dump session: the host backend, the formatter
//! registry, per-session caches, and the state of the report currently
//! being emitted. Reports use a compact brace protocol consumed by the
//! front end's watch model:
//!
//! ```text
//! {name="x",type="int",value="42",numchild="0"},
//! ```
//!
//! While an item is being produced, its value and type are accumulated in
//! [`ReportItem`] slots rather than written out directly. Dispatch runs
//! from generic to specific, and later, more specific knowledge can
//! override earlier guesses through a priority rule; the winning entry is
//! serialized once when the item's scope closes.
//!
//! # Components
//!
//! - [`Inspector`] - Session state and emitter primitives
//! - [`ReportItem`] - Best-so-far value or type for the current item
//! - [`DumpOptions`] - Per-session limits and switches
//! - [`DisplayFormat`] - Per-item and per-type display overrides
//! - [`dump`] - The `put_item` dispatch state machine
//! - [`codec`] - Transport encodings and bounded string reads

pub mod codec;
pub mod dump;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::DebugBackend;
use crate::error::{Result, ValViewError};
use crate::layout::CompiledLayout;
use crate::registry::{Formatter, FormatterModule, FormatterRegistry};
use crate::types::{guess_type_code, strip_class_tag, TypeCode, TypeHandle};
use crate::value::ValueHandle;

/// Display format override for an item or a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DisplayFormat {
    #[default]
    Automatic,
    /// Suppress all formatters and show raw members
    Raw,
    Latin1String,
    SeparateLatin1String,
    Utf8String,
    SeparateUtf8String,
    Local8BitString,
    Utf16String,
    Ucs4String,
    Array10,
    Array100,
    Array1000,
    Array10000,
    ArrayPlot,
    CompactMap,
}

impl DisplayFormat {
    /// Element count for the fixed-length array formats.
    pub fn array_count(self) -> Option<u64> {
        match self {
            DisplayFormat::Array10 => Some(10),
            DisplayFormat::Array100 => Some(100),
            DisplayFormat::Array1000 => Some(1000),
            DisplayFormat::Array10000 => Some(10000),
            _ => None,
        }
    }
}

/// Session limits and switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpOptions {
    /// Character budget for string previews
    pub display_string_limit: u64,
    /// Hard ceiling for any single string transfer
    pub string_cutoff: u64,
    /// Children emitted per container before eliding
    pub max_array_children: u64,
    /// Recursion ceiling for `put_item`
    pub max_depth: usize,
    /// Show pointees directly instead of a pointer node with one child
    pub auto_deref_pointers: bool,
    /// Query the backend for most-derived types of polymorphic objects
    pub use_dynamic_type: bool,
    /// Enable registered formatters
    pub use_fancy: bool,
    /// Library namespace prefix stripped before formatter lookup,
    /// e.g. `MyNs::`
    pub namespace: String,
}

impl Default for DumpOptions {
    fn default() -> Self {
        DumpOptions {
            display_string_limit: 100,
            string_cutoff: 10000,
            max_array_children: 10000,
            max_depth: 100,
            auto_deref_pointers: false,
            use_dynamic_type: true,
            use_fancy: true,
            namespace: String::new(),
        }
    }
}

/// Best-so-far information about the value or type to be reported for the
/// item currently in scope. A later proposal replaces an earlier one only
/// when it is strictly more confident, so the first proposal at a given
/// priority wins.
#[derive(Debug, Clone)]
pub struct ReportItem {
    pub value: Option<String>,
    pub encoding: Option<String>,
    pub priority: i32,
    /// 0 when complete, the true length when elided, -1 when the true
    /// length is unknown
    pub elided: i64,
}

impl Default for ReportItem {
    fn default() -> Self {
        ReportItem {
            value: None,
            encoding: None,
            priority: -100,
            elided: 0,
        }
    }
}

struct ItemFrame {
    saved_iname: String,
    saved_value: ReportItem,
    saved_type: ReportItem,
}

struct ChildrenFrame {
    saved_child_type: Option<String>,
    saved_child_num_child: Option<u64>,
    saved_num_child: u64,
    saved_max_num_child: Option<u64>,
}

/// Parameters for a children scope.
#[derive(Default)]
pub struct ChildrenParams {
    pub num_child: u64,
    pub child_type: Option<String>,
    pub child_num_child: Option<u64>,
    pub max_num_child: Option<u64>,
    pub addr_base: Option<u64>,
    pub addr_step: Option<u64>,
}

impl ChildrenParams {
    pub fn count(num_child: u64) -> Self {
        ChildrenParams {
            num_child,
            ..Default::default()
        }
    }
}

/// A value inspection session.
pub struct Inspector {
    pub backend: Box<dyn DebugBackend>,
    pub options: DumpOptions,
    formatters: FormatterRegistry,

    pub(crate) layout_cache: HashMap<String, Arc<CompiledLayout>>,
    pub(crate) type_size_cache: HashMap<String, u64>,

    out: String,
    current_iname: String,
    current_value: ReportItem,
    current_type: ReportItem,
    item_frames: Vec<ItemFrame>,

    current_child_type: Option<String>,
    current_child_num_child: Option<u64>,
    current_num_child: u64,
    current_max_num_child: Option<u64>,
    children_frames: Vec<ChildrenFrame>,

    expanded: HashSet<String>,
    item_formats: HashMap<String, DisplayFormat>,
    type_formats: HashMap<String, DisplayFormat>,
    pub(crate) depth: usize,
}

impl Inspector {
    pub fn new(backend: Box<dyn DebugBackend>, options: DumpOptions) -> Self {
        Inspector {
            backend,
            options,
            formatters: FormatterRegistry::new(),
            layout_cache: HashMap::new(),
            type_size_cache: HashMap::new(),
            out: String::new(),
            current_iname: String::new(),
            current_value: ReportItem::default(),
            current_type: ReportItem::default(),
            item_frames: Vec::new(),
            current_child_type: None,
            current_child_num_child: None,
            current_num_child: 1,
            current_max_num_child: None,
            children_frames: Vec::new(),
            expanded: HashSet::new(),
            item_formats: HashMap::new(),
            type_formats: HashMap::new(),
            depth: 0,
        }
    }

    pub fn ptr_size(&self) -> usize {
        self.backend.ptr_size()
    }

    /// The report produced so far.
    pub fn output(&self) -> &str {
        &self.out
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.out)
    }

    /// Internal name of the item currently in scope, e.g. `local.map.0.key`.
    pub fn current_iname(&self) -> &str {
        &self.current_iname
    }

    // ----- expansion and formats -------------------------------------

    /// Replace the set of items the user has expanded in the view.
    pub fn set_expanded(&mut self, inames: impl IntoIterator<Item = String>) {
        self.expanded = inames.into_iter().collect();
    }

    pub fn expand(&mut self, iname: impl Into<String>) {
        self.expanded.insert(iname.into());
    }

    /// Whether children of the current item were requested.
    pub fn is_expanded(&self) -> bool {
        self.expanded.contains(&self.current_iname)
    }

    pub fn set_item_format(&mut self, iname: impl Into<String>, format: DisplayFormat) {
        self.item_formats.insert(iname.into(), format);
    }

    pub fn set_type_format(&mut self, type_name: &str, format: DisplayFormat) {
        self.type_formats
            .insert(strip_for_format(type_name), format);
    }

    /// Effective display format for the current item: a per-item override
    /// wins, then a per-type override, then automatic.
    pub fn current_item_format(&self, type_name: Option<&str>) -> DisplayFormat {
        if let Some(&f) = self.item_formats.get(&self.current_iname) {
            if f != DisplayFormat::Automatic {
                return f;
            }
        }
        let needle = type_name
            .map(|t| t.to_string())
            .or_else(|| self.current_type.value.clone());
        if let Some(needle) = needle {
            if let Some(&f) = self.type_formats.get(&strip_for_format(&needle)) {
                return f;
            }
        }
        DisplayFormat::Automatic
    }

    // ----- formatters -------------------------------------------------

    pub fn register_formatter(&mut self, type_name: &str, formatter: impl Formatter + 'static) {
        self.formatters.register(type_name, formatter);
    }

    pub fn add_formatter_module(&mut self, module: Arc<dyn FormatterModule>) {
        self.formatters.add_module(module);
    }

    /// Rebuild the formatter table from the installed modules. Memoized
    /// sizes and layouts may come from formatter code, so they go too.
    pub fn reload_formatters(&mut self) {
        self.formatters.reload();
        self.reset_caches();
    }

    pub(crate) fn find_formatter(&self, type_name: &str) -> Option<Arc<dyn Formatter>> {
        self.formatters.lookup(type_name, &self.options.namespace)
    }

    /// Drop memoized type sizes and layouts, required after the debuggee
    /// loads or unloads code.
    pub fn reset_caches(&mut self) {
        self.layout_cache.clear();
        self.type_size_cache.clear();
    }

    // ----- type and value construction --------------------------------

    /// Resolve a type name, synthesizing a descriptor when the host has
    /// no record of it.
    pub fn create_type(&mut self, name: &str) -> Result<TypeHandle> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValViewError::TypeName("empty type name".into()));
        }
        if let Some(t) = self.backend.lookup_type(name) {
            return Ok(t);
        }
        let mut t = TypeHandle::synthetic(name);
        if t.bitsize.is_none() {
            t.bitsize = self.builtin_bits(name, t.code);
        }
        Ok(t)
    }

    fn builtin_bits(&self, name: &str, code: TypeCode) -> Option<u64> {
        let ptr_bits = 8 * self.ptr_size() as u64;
        match code {
            TypeCode::Pointer | TypeCode::Reference | TypeCode::MemberPointer => {
                return Some(ptr_bits)
            }
            _ => {}
        }
        Some(match strip_class_tag(name) {
            "bool" | "char" | "signed char" | "unsigned char" => 8,
            "short" | "unsigned short" | "char16_t" => 16,
            "int" | "unsigned int" | "float" | "wchar_t" | "char32_t" => 32,
            "long" | "unsigned long" => ptr_bits,
            "long long" | "unsigned long long" | "double" => 64,
            _ => return None,
        })
    }

    /// A value of type `type_name` living at `address`.
    pub fn create_value_at(&mut self, address: u64, type_name: &str) -> Result<ValueHandle> {
        Ok(ValueHandle::at_address(
            self.create_type(type_name)?,
            address,
        ))
    }

    /// A value of type `type_name` backed by bytes already in hand.
    pub fn create_value_from_bytes(
        &mut self,
        data: Vec<u8>,
        type_name: &str,
    ) -> Result<ValueHandle> {
        let mut ty = self.create_type(type_name)?;
        ty.bitsize = Some(8 * data.len() as u64);
        Ok(ValueHandle::from_bytes(ty, data))
    }

    // ----- raw emission ------------------------------------------------

    pub fn put(&mut self, s: &str) {
        self.out.push_str(s);
    }

    /// Emit `name="value",` directly, outside the priority machinery.
    pub fn put_field(&mut self, name: &str, value: &str) {
        self.out.push_str(name);
        self.out.push_str("=\"");
        self.out.push_str(value);
        self.out.push_str("\",");
    }

    pub fn put_name(&mut self, name: &str) {
        self.put_field("name", name);
    }

    pub fn put_address(&mut self, address: Option<u64>) {
        if let Some(a) = address {
            self.put(&format!("address=\"0x{a:x}\","));
        }
    }

    pub fn put_origin_address(&mut self, address: Option<u64>) {
        if let Some(a) = address {
            self.put(&format!("origaddr=\"0x{a:x}\","));
        }
    }

    /// Emit the child count. Written immediately; skipped when a
    /// surrounding children scope already declared it for all children.
    pub fn put_num_child(&mut self, numchild: u64) {
        if Some(numchild) != self.current_child_num_child {
            self.put(&format!("numchild=\"{numchild}\","));
        }
    }

    /// Emit an out-of-band display payload for the separate-window and
    /// plot formats.
    pub fn put_display(&mut self, edit_format: &str, edit_value: &str) {
        self.put_field("editformat", edit_format);
        self.put_field("editvalue", edit_value);
    }

    // ----- value and type proposals ------------------------------------

    /// Propose a display value. Kept only when strictly more confident
    /// than the current proposal, so at equal priority the first caller
    /// wins.
    pub fn put_value(&mut self, value: impl Into<String>) {
        self.put_value_full(value, None, 0, 0);
    }

    pub fn put_value_enc(&mut self, value: impl Into<String>, encoding: &str, elided: i64) {
        self.put_value_full(value, Some(encoding), 0, elided);
    }

    pub fn put_value_full(
        &mut self,
        value: impl Into<String>,
        encoding: Option<&str>,
        priority: i32,
        elided: i64,
    ) {
        if priority > self.current_value.priority || self.current_value.value.is_none() {
            self.current_value = ReportItem {
                value: Some(value.into()),
                encoding: encoding.map(str::to_string),
                priority,
                elided,
            };
        }
    }

    /// Propose a tagged non-literal display such as `itemcount` or
    /// `optimizedout`. The tag travels in the encoding slot.
    pub fn put_special_value(&mut self, tag: &str, value: impl Into<String>) {
        self.put_value_full(value, Some(tag), 0, 0);
    }

    /// Propose an empty value at low priority, the default for
    /// expandable aggregates.
    pub fn put_empty_value(&mut self) {
        self.put_empty_value_priority(-10);
    }

    pub fn put_empty_value_priority(&mut self, priority: i32) {
        if priority > self.current_value.priority || self.current_value.value.is_none() {
            self.current_value = ReportItem {
                value: Some(String::new()),
                encoding: None,
                priority,
                elided: 0,
            };
        }
    }

    /// Propose an item count display, clamped to `maximum`.
    pub fn put_item_count(&mut self, count: u64, maximum: u64) {
        if count > maximum {
            self.put_special_value("minimumitemcount", maximum.to_string());
        } else {
            self.put_special_value("itemcount", count.to_string());
        }
        self.put_num_child(count);
    }

    /// Emit a named integer child, a convenience for formatters.
    pub fn put_int_item(&mut self, name: &str, value: i128) -> Result<()> {
        self.with_sub_item(name, |d| {
            d.put_value(value.to_string());
            d.put_type("int");
            d.put_num_child(0);
            Ok(())
        })
    }

    /// Emit a named boolean child, a convenience for formatters.
    pub fn put_bool_item(&mut self, name: &str, value: bool) -> Result<()> {
        self.with_sub_item(name, |d| {
            d.put_value(if value { "true" } else { "false" });
            d.put_type("bool");
            d.put_num_child(0);
            Ok(())
        })
    }

    /// Emit a named fixed-array child of `n` elements at `address`, a
    /// convenience for formatters exposing internal buffers.
    pub fn put_array_item(
        &mut self,
        name: &str,
        address: u64,
        n: u64,
        element_type_name: &str,
    ) -> Result<()> {
        let element = self.create_type(element_type_name)?;
        self.with_sub_item(name, |d| {
            d.put_empty_value();
            d.put_type(&format!("{element_type_name} [{n}]"));
            d.put_address(Some(address));
            d.put_num_child(n);
            if d.is_expanded() {
                d.put_array_data(address, n, &element)?;
            }
            Ok(())
        })
    }

    /// Propose the display type name.
    pub fn put_type(&mut self, type_name: &str) {
        self.put_type_priority(type_name, 0);
    }

    pub fn put_type_priority(&mut self, type_name: &str, priority: i32) {
        // Unlike values, a later type proposal at the same priority wins:
        // dispatch refines the type as it descends.
        if priority >= self.current_type.priority {
            self.current_type.value = Some(type_name.to_string());
            self.current_type.priority = priority;
        }
    }

    /// Replace the reported type unconditionally and raise its priority,
    /// used when an outer dispatch layer knows a better display name than
    /// the inner one it delegated to (typedefs, references).
    pub fn put_better_type(&mut self, type_name: &str) {
        self.current_type.value = Some(type_name.to_string());
        self.current_type.priority += 1;
    }

    /// The type proposed so far for the current item.
    pub fn current_type_name(&self) -> Option<&str> {
        self.current_type.value.as_deref()
    }

    /// Mark the current item unreadable, overriding any earlier proposal.
    pub fn put_not_accessible(&mut self) {
        self.current_value = ReportItem {
            value: Some(String::new()),
            encoding: Some("notaccessible".to_string()),
            priority: i32::MAX,
            elided: 0,
        };
        self.put_num_child(0);
    }

    // ----- item scopes -------------------------------------------------

    /// Emit one named child item. The body proposes value, type and
    /// children; serialization happens when the scope closes. A non-fatal
    /// error inside the body degrades this item to "not accessible".
    pub fn with_sub_item(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        let iname = format!("{}.{}", self.current_iname, name);
        self.enter_item(iname, Some(name));
        let result = f(self);
        self.finish_item(result)
    }

    /// Like [`with_sub_item`] but the iname component is not shown as the
    /// name; the body emits `name=` itself. Used for base classes whose
    /// display names contain characters unfit for inames.
    ///
    /// [`with_sub_item`]: Inspector::with_sub_item
    pub fn with_unnamed_sub_item(
        &mut self,
        component: &str,
        f: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        let iname = format!("{}.{}", self.current_iname, component);
        self.enter_item(iname, None);
        let result = f(self);
        self.finish_item(result)
    }

    /// Emit a top-level item with an absolute iname.
    pub fn with_top_level(
        &mut self,
        iname: &str,
        f: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        self.enter_item(iname.to_string(), None);
        let result = f(self);
        self.finish_item(result)
    }

    fn enter_item(&mut self, iname: String, name: Option<&str>) {
        self.put("{");
        if let Some(name) = name {
            self.put_name(name);
        }
        self.item_frames.push(ItemFrame {
            saved_iname: std::mem::replace(&mut self.current_iname, iname),
            saved_value: std::mem::take(&mut self.current_value),
            saved_type: std::mem::take(&mut self.current_type),
        });
    }

    fn finish_item(&mut self, result: Result<()>) -> Result<()> {
        let fatal = match result {
            Ok(()) => None,
            Err(e) if e.is_fatal() => Some(e),
            Err(e) => {
                warn!(iname = %self.current_iname, error = %e, "item not accessible");
                self.put_not_accessible();
                None
            }
        };

        if let Some(type_name) = self.current_type.value.clone() {
            if !type_name.is_empty() && self.current_child_type.as_deref() != Some(&type_name) {
                self.put_field("type", &type_name);
            }
        }
        match self.current_value.value.clone() {
            None => self.put("value=\"\",encoding=\"notaccessible\",numchild=\"0\","),
            Some(value) => {
                if let Some(encoding) = self.current_value.encoding.clone() {
                    self.put_field("valueencoded", &encoding);
                }
                if self.current_value.elided != 0 {
                    self.put_field("valueelided", &self.current_value.elided.to_string());
                }
                self.put_field("value", &value);
            }
        }
        self.put("},");

        if let Some(frame) = self.item_frames.pop() {
            self.current_iname = frame.saved_iname;
            self.current_value = frame.saved_value;
            self.current_type = frame.saved_type;
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ----- children scopes ---------------------------------------------

    /// Emit the `children=[...]` block for the current item.
    pub fn with_children(
        &mut self,
        params: ChildrenParams,
        f: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        let child_type = params.child_type.map(|t| strip_class_tag(&t).to_string());
        if let Some(t) = &child_type {
            self.put_field("childtype", t);
            if let Some(n) = params.child_num_child {
                self.put_field("childnumchild", &n.to_string());
            }
        }
        if let (Some(base), Some(step)) = (params.addr_base, params.addr_step) {
            self.put(&format!("addrbase=\"0x{base:x}\",addrstep=\"{step}\","));
        }
        self.children_frames.push(ChildrenFrame {
            saved_child_type: std::mem::replace(&mut self.current_child_type, child_type),
            saved_child_num_child: std::mem::replace(
                &mut self.current_child_num_child,
                params.child_num_child,
            ),
            saved_num_child: std::mem::replace(&mut self.current_num_child, params.num_child),
            saved_max_num_child: std::mem::replace(
                &mut self.current_max_num_child,
                params.max_num_child,
            ),
        });
        self.put("children=[");

        let result = f(self);
        let fatal = match result {
            Ok(()) => None,
            Err(e) if e.is_fatal() => Some(e),
            Err(e) => {
                warn!(iname = %self.current_iname, error = %e, "children not accessible");
                self.put_not_accessible();
                None
            }
        };

        if let Some(max) = self.current_max_num_child {
            if max < self.current_num_child {
                self.put("{name=\"<incomplete>\",value=\"\",type=\"\",numchild=\"0\"},");
            }
        }
        if let Some(frame) = self.children_frames.pop() {
            self.current_child_type = frame.saved_child_type;
            self.current_child_num_child = frame.saved_child_num_child;
            self.current_num_child = frame.saved_num_child;
            self.current_max_num_child = frame.saved_max_num_child;
        }
        self.put("],");

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// A children scope with only a child count, for hand-built children.
    pub fn with_children_count(
        &mut self,
        num_child: u64,
        f: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        self.with_children(ChildrenParams::count(num_child), f)
    }

    /// Indices to actually emit inside the current children scope.
    pub fn child_range(&self) -> std::ops::Range<u64> {
        let n = match self.current_max_num_child {
            Some(max) => max.min(self.current_num_child),
            None => self.current_num_child,
        };
        0..n
    }

    // ----- entry points -------------------------------------------------

    /// Produce the complete report for one value and return it.
    pub fn dump_value(&mut self, iname: &str, name: &str, value: &ValueHandle) -> Result<String> {
        debug!(iname, name, ty = %value.ty, "dump");
        self.out.clear();
        self.depth = 0;
        let iname_field = iname.to_string();
        let name_owned = name.to_string();
        let value = value.clone();
        self.with_top_level(iname, move |d| {
            d.put_field("iname", &iname_field);
            d.put_name(&name_owned);
            d.put_item(&value)
        })?;
        Ok(self.take_output())
    }

    /// Evaluate an expression in the current frame and dump the result.
    pub fn dump_expression(&mut self, iname: &str, expression: &str) -> Result<String> {
        let value = self.backend.evaluate(expression)?;
        self.dump_value(iname, expression, &value)
    }
}

impl crate::memory::MemoryView for Inspector {
    fn ptr_size(&self) -> usize {
        self.backend.ptr_size()
    }

    fn read_memory(&mut self, address: u64, size: usize) -> Result<Vec<u8>> {
        self.backend.read_memory(address, size)
    }
}

/// Normalize a type name for per-type format lookup: drop elaborated-type
/// keywords and template argument lists.
pub fn strip_for_format(type_name: &str) -> String {
    let mut s = strip_class_tag(type_name).to_string();
    while let Some(pos) = s.find('<') {
        match s.rfind('>') {
            Some(end) if end > pos => {
                s = format!("{}{}", &s[..pos], &s[end + 1..]);
            }
            _ => break,
        }
    }
    s
}

/// Guess whether a type name denotes something scalar for sorting
/// purposes; mirrors [`guess_type_code`].
pub fn is_scalar_name(name: &str) -> bool {
    matches!(
        guess_type_code(name),
        TypeCode::Integral | TypeCode::Float | TypeCode::Pointer
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;

    fn inspector() -> Inspector {
        Inspector::new(Box::new(MockBackend::new(8)), DumpOptions::default())
    }

    #[test]
    fn test_value_priority_first_wins_on_tie() {
        let mut d = inspector();
        d.enter_item("local.x".into(), Some("x"));
        d.put_value("first");
        d.put_value("second");
        assert_eq!(d.current_value.value.as_deref(), Some("first"));
        d.put_value_full("better", None, 1, 0);
        assert_eq!(d.current_value.value.as_deref(), Some("better"));
        d.finish_item(Ok(())).unwrap();
    }

    #[test]
    fn test_empty_value_does_not_override() {
        let mut d = inspector();
        d.enter_item("local.x".into(), Some("x"));
        d.put_value("42");
        d.put_empty_value();
        assert_eq!(d.current_value.value.as_deref(), Some("42"));
        d.finish_item(Ok(())).unwrap();
    }

    #[test]
    fn test_sub_item_wire_shape() {
        let mut d = inspector();
        d.with_top_level("local.x", |d| {
            d.put_value("42");
            d.put_type("int");
            d.put_num_child(0);
            Ok(())
        })
        .unwrap();
        assert_eq!(
            d.output(),
            "{numchild=\"0\",type=\"int\",value=\"42\",},"
        );
    }

    #[test]
    fn test_error_degrades_to_not_accessible() {
        let mut d = inspector();
        d.with_top_level("local.x", |d| {
            d.put_value("partial");
            Err(ValViewError::MemoryAccess {
                address: 0x10,
                message: "unmapped".into(),
            })
        })
        .unwrap();
        let out = d.output();
        assert!(out.contains("valueencoded=\"notaccessible\""));
        assert!(!out.contains("partial"));
    }

    #[test]
    fn test_fatal_error_propagates() {
        let mut d = inspector();
        let res = d.with_top_level("local.x", |_| Err(ValViewError::layout("z", "bad")));
        assert!(res.is_err());
    }

    #[test]
    fn test_missing_value_encodes_not_accessible() {
        let mut d = inspector();
        d.with_top_level("local.x", |_| Ok(())).unwrap();
        assert!(d
            .output()
            .contains("value=\"\",encoding=\"notaccessible\",numchild=\"0\","));
    }

    #[test]
    fn test_children_share_declared_type_and_numchild() {
        let mut d = inspector();
        d.with_top_level("local.a", |d| {
            d.put_type("int [2]");
            d.put_num_child(2);
            d.with_children(
                ChildrenParams {
                    num_child: 2,
                    child_type: Some("int".into()),
                    child_num_child: Some(0),
                    ..Default::default()
                },
                |d| {
                    d.with_sub_item("0", |d| {
                        d.put_type("int");
                        d.put_value("1");
                        d.put_num_child(0);
                        Ok(())
                    })?;
                    d.with_sub_item("1", |d| {
                        d.put_value("2");
                        d.put_num_child(0);
                        Ok(())
                    })
                },
            )
        })
        .unwrap();
        let out = d.output();
        assert!(out.contains("childtype=\"int\""));
        assert!(out.contains("childnumchild=\"0\""));
        // The declared childtype suppresses per-child type fields and
        // the declared childnumchild suppresses numchild="0"
        assert!(!out.contains("{name=\"0\",type="));
        assert!(!out.contains("numchild=\"0\",value=\"1\""));
    }

    #[test]
    fn test_incomplete_marker() {
        let mut d = inspector();
        d.with_top_level("local.a", |d| {
            d.put_empty_value();
            d.with_children(
                ChildrenParams {
                    num_child: 100,
                    max_num_child: Some(2),
                    ..Default::default()
                },
                |d| {
                    for i in d.child_range().collect::<Vec<_>>() {
                        d.with_sub_item(&i.to_string(), |d| {
                            d.put_value("0");
                            d.put_num_child(0);
                            Ok(())
                        })?;
                    }
                    Ok(())
                },
            )
        })
        .unwrap();
        let out = d.output();
        assert!(out.contains("name=\"<incomplete>\""));
        assert_eq!(out.matches("value=\"0\"").count(), 2);
    }

    #[test]
    fn test_int_and_bool_item_helpers() {
        let mut d = inspector();
        d.with_top_level("local.s", |d| {
            d.put_empty_value();
            d.put_num_child(2);
            d.with_children_count(2, |d| {
                d.put_int_item("size", 3)?;
                d.put_bool_item("sorted", true)
            })
        })
        .unwrap();
        let out = d.output();
        assert!(out.contains("{name=\"size\",numchild=\"0\",type=\"int\",value=\"3\",},"));
        assert!(out.contains("{name=\"sorted\",numchild=\"0\",type=\"bool\",value=\"true\",},"));
    }

    #[test]
    fn test_put_array_item_helper() {
        let mut mock = MockBackend::new(8);
        let mut bytes = 7i32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&8i32.to_le_bytes());
        mock.map_region(0x1000, bytes);
        let mut d = Inspector::new(Box::new(mock), DumpOptions::default());
        d.expand("local.s.buf");
        d.with_top_level("local.s", |d| {
            d.put_empty_value();
            d.put_num_child(1);
            d.with_children_count(1, |d| d.put_array_item("buf", 0x1000, 2, "int"))
        })
        .unwrap();
        let out = d.output();
        assert!(out.contains("name=\"buf\""));
        assert!(out.contains("type=\"int [2]\""));
        assert!(out.contains("numchild=\"2\""));
        assert!(out.contains("value=\"7\""));
        assert!(out.contains("value=\"8\""));
    }

    #[test]
    fn test_expansion_tracking() {
        let mut d = inspector();
        d.expand("local.s");
        d.enter_item("local.s".into(), None);
        assert!(d.is_expanded());
        d.finish_item(Ok(())).unwrap();
    }

    #[test]
    fn test_format_lookup_precedence() {
        let mut d = inspector();
        d.set_type_format("Str", DisplayFormat::Latin1String);
        d.set_item_format("local.s", DisplayFormat::Utf16String);
        d.enter_item("local.s".into(), None);
        assert_eq!(
            d.current_item_format(Some("Str")),
            DisplayFormat::Utf16String
        );
        d.finish_item(Ok(())).unwrap();

        d.enter_item("local.other".into(), None);
        assert_eq!(
            d.current_item_format(Some("Str<char>")),
            DisplayFormat::Latin1String
        );
        assert_eq!(
            d.current_item_format(Some("Plain")),
            DisplayFormat::Automatic
        );
        d.finish_item(Ok(())).unwrap();
    }

    #[test]
    fn test_strip_for_format() {
        assert_eq!(strip_for_format("Map<int, Str>"), "Map");
        assert_eq!(strip_for_format("struct Foo"), "Foo");
        assert_eq!(strip_for_format("int"), "int");
    }

    #[test]
    fn test_builtin_sizes() {
        let mut d = inspector();
        let t = d.create_type("unsigned long long").unwrap();
        assert_eq!(t.bitsize, Some(64));
        let p = d.create_type("Foo*").unwrap();
        assert_eq!(p.bitsize, Some(64));
    }
}
