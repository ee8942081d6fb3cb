//! Transport encodings and bounded string reads
//!
//! Strings and blobs travel hex-encoded inside the report so the brace
//! protocol never needs escaping; the `valueencoded` tag tells the front
//! end how to decode them. Reads from the debuggee are bounded by the
//! session's display limit, and an elision note carries the true length
//! when a preview was cut short.

use crate::engine::{DisplayFormat, Inspector};
use crate::error::Result;
use crate::memory::extract_integer;
use crate::types::TypeHandle;

use super::ChildrenParams;

/// Lowercase base16, two digits per byte.
pub fn hexencode(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for b in data {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Inverse of [`hexencode`], tolerant of uppercase digits.
pub fn hexdecode(data: &str) -> Option<Vec<u8>> {
    if data.len() % 2 != 0 {
        return None;
    }
    (0..data.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&data[i..i + 2], 16).ok())
        .collect()
}

/// Clamp a transfer of `size` bytes to `limit`.
///
/// Returns `(elided, shown)`: `elided` is 0 when everything fits and the
/// true size otherwise.
pub fn compute_limit(size: u64, limit: u64) -> (i64, u64) {
    if size <= limit {
        (0, size)
    } else {
        (size as i64, limit)
    }
}

impl Inspector {
    /// Read `size` bytes and hex-encode them for transport.
    pub fn read_memory_hex(&mut self, address: u64, size: u64) -> Result<String> {
        let bytes = self.backend.read_memory(address, size as usize)?;
        Ok(hexencode(&bytes))
    }

    /// Read units of `unit_size` bytes starting at `base` until a zero
    /// unit, reading at most `maximum` bytes.
    ///
    /// When the initial read fails the window is halved and retried, so a
    /// string near the end of a mapped page still produces a preview.
    /// Returns `(elided, data)` where `elided` is 0 when the terminator
    /// was found and -1 when the true length is unknown.
    pub fn read_to_first_zero(
        &mut self,
        base: u64,
        unit_size: u64,
        maximum: u64,
    ) -> Result<(i64, Vec<u8>)> {
        let mut maximum = maximum;
        let mut blob = Vec::new();
        while maximum > 1 {
            match self.backend.read_memory(base, maximum as usize) {
                Ok(data) => {
                    blob = data;
                    break;
                }
                Err(_) => maximum /= 2,
            }
        }
        let unit = unit_size as usize;
        if unit == 0 || blob.len() < unit {
            return Ok((-1, blob));
        }
        let mut i = 0;
        while i + unit <= blob.len() {
            if extract_integer(&blob[i..i + unit], unit, false) == 0 {
                blob.truncate(i);
                return Ok((0, blob));
            }
            i += unit;
        }
        Ok((-1, blob))
    }

    /// Hex-encode a zero-terminated array at `p`, bounded by `limit`
    /// bytes. Returns `(elided, hex)`.
    pub fn encode_c_array(&mut self, p: u64, unit_size: u64, limit: u64) -> Result<(i64, String)> {
        let (elided, blob) = self.read_to_first_zero(p, unit_size, limit)?;
        Ok((elided, hexencode(&blob)))
    }

    /// Put a latin1 preview of a char buffer; reads to the terminator
    /// when `size` is unknown.
    pub fn put_simple_char_array(&mut self, base: u64, size: Option<u64>) -> Result<()> {
        let limit = self.options.display_string_limit;
        let (elided, data) = match size {
            None => {
                let (elided, blob) = self.read_to_first_zero(base, 1, limit)?;
                (elided, hexencode(&blob))
            }
            Some(size) => {
                let (elided, shown) = compute_limit(size, limit);
                (elided, self.read_memory_hex(base, shown)?)
            }
        };
        self.put_value_enc(data, "latin1", elided);
        Ok(())
    }

    /// Put the preview for a sized character array, choosing the
    /// encoding from the character width, optionally with per-character
    /// children.
    pub fn put_char_array_helper(
        &mut self,
        data: u64,
        size: u64,
        char_type: &TypeHandle,
        display_format: DisplayFormat,
        make_expandable: bool,
    ) -> Result<()> {
        let char_size = char_type.size(self)?;
        let byte_len = size * char_size;
        let (elided, shown) = compute_limit(byte_len, self.options.display_string_limit);
        let mem = self.read_memory_hex(data, shown)?;
        let encoding = match char_size {
            1 => match display_format {
                DisplayFormat::Latin1String | DisplayFormat::SeparateLatin1String => "latin1",
                _ => "utf8",
            },
            2 => "utf16",
            _ => "ucs4",
        };
        self.put_value_enc(mem, encoding, elided);

        if matches!(
            display_format,
            DisplayFormat::SeparateLatin1String | DisplayFormat::SeparateUtf8String
        ) {
            let (_, shown) = compute_limit(byte_len, 100000);
            let payload = self.read_memory_hex(data, shown)?;
            let format = format!("{encoding}:separate");
            self.put_display(&format, &payload);
        }

        if make_expandable {
            self.put_num_child(size);
            if self.is_expanded() {
                let char_ty = char_type.clone();
                self.with_children_count(size, |d| {
                    for i in d.child_range().collect::<Vec<_>>() {
                        let item =
                            crate::value::ValueHandle::at_address(char_ty.clone(), data + i * char_size);
                        d.with_sub_item(&i.to_string(), |d| d.put_item(&item))?;
                    }
                    Ok(())
                })?;
            }
        }
        Ok(())
    }

    /// Shared string rendering for pointers and arrays under an explicit
    /// or defaulted string format. Returns whether a rendering applied.
    pub fn try_put_simple_formatted_pointer(
        &mut self,
        ptr: u64,
        type_name: &str,
        inner_type_name: &str,
        display_format: DisplayFormat,
        limit: u64,
    ) -> Result<bool> {
        let put_string = |d: &mut Self, unit: u64, encoding: &str| -> Result<bool> {
            d.put_type(type_name);
            let (elided, data) = d.encode_c_array(ptr, unit, limit)?;
            d.put_value_enc(data, encoding, elided);
            Ok(true)
        };

        match display_format {
            DisplayFormat::Automatic => match inner_type_name {
                // UTF-8 is the assumed default for plain char data.
                "char" => put_string(self, 1, "utf8"),
                "wchar_t" => {
                    let char_size = self.create_type("wchar_t")?.size(self)?;
                    if char_size == 2 {
                        put_string(self, 2, "utf16")
                    } else {
                        put_string(self, 4, "ucs4")
                    }
                }
                _ => Ok(false),
            },
            DisplayFormat::Latin1String => put_string(self, 1, "latin1"),
            DisplayFormat::SeparateLatin1String => {
                let done = put_string(self, 1, "latin1")?;
                let (_, data) = self.encode_c_array(ptr, 1, limit)?;
                self.put_display("latin1:separate", &data);
                Ok(done)
            }
            DisplayFormat::Utf8String => put_string(self, 1, "utf8"),
            DisplayFormat::SeparateUtf8String => {
                let done = put_string(self, 1, "utf8")?;
                let (_, data) = self.encode_c_array(ptr, 1, limit)?;
                self.put_display("utf8:separate", &data);
                Ok(done)
            }
            DisplayFormat::Local8BitString => put_string(self, 1, "local8bit"),
            DisplayFormat::Utf16String => put_string(self, 2, "utf16"),
            DisplayFormat::Ucs4String => put_string(self, 4, "ucs4"),
            _ => Ok(false),
        }
    }

    /// Emit the children of a contiguous array of `n` items at `base`.
    /// Past the per-session cap only the elision note and an
    /// `<incomplete>` marker are produced.
    pub fn put_array_data(&mut self, base: u64, n: u64, inner_type: &TypeHandle) -> Result<()> {
        let inner_size = inner_type.size(self)?;
        let max = self.options.max_array_children;
        if n > max {
            self.put_field("childrenelided", &n.to_string());
        }
        let inner = inner_type.clone();
        self.with_children(
            ChildrenParams {
                num_child: n,
                child_type: Some(inner.name.clone()),
                max_num_child: Some(max),
                addr_base: Some(base),
                addr_step: Some(inner_size),
                ..Default::default()
            },
            |d| {
                for i in d.child_range().collect::<Vec<_>>() {
                    let item =
                        crate::value::ValueHandle::at_address(inner.clone(), base + i * inner_size);
                    d.with_sub_item(&i.to_string(), |d| d.put_item(&item))?;
                }
                Ok(())
            },
        )
    }

    /// For the plot format, ship the raw samples out of band so the
    /// front end can chart them.
    pub fn put_plot_data(&mut self, base: u64, n: u64, inner_type: &TypeHandle) -> Result<()> {
        const PLOT_CAP: u64 = 1_000_000;
        let mut n = n;
        if n > PLOT_CAP {
            self.put_field("plotelided", &n.to_string());
            n = PLOT_CAP;
        }
        if self.current_item_format(None) == DisplayFormat::ArrayPlot && inner_type.is_simple() {
            if let Some(enc) = crate::types::simple_encoding(&inner_type.name) {
                let inner_size = inner_type.size(self)?;
                self.put_field("editencoding", enc);
                let payload = self.read_memory_hex(base, n * inner_size)?;
                self.put_display("plotdata:separate", &payload);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::engine::DumpOptions;
    use proptest::prelude::*;

    fn inspector_with(backend: MockBackend) -> Inspector {
        Inspector::new(Box::new(backend), DumpOptions::default())
    }

    #[test]
    fn test_hexencode_lowercase() {
        assert_eq!(hexencode(b"Hi\x00"), "486900");
        assert_eq!(hexencode(&[0xAB, 0x01]), "ab01");
        assert_eq!(hexencode(&[]), "");
    }

    #[test]
    fn test_compute_limit() {
        assert_eq!(compute_limit(5, 100), (0, 5));
        assert_eq!(compute_limit(100, 100), (0, 100));
        assert_eq!(compute_limit(250, 100), (250, 100));
    }

    #[test]
    fn test_read_to_first_zero_terminated() {
        let mut mock = MockBackend::new(8);
        mock.map_region(0x1000, b"hello\0world".to_vec());
        let mut d = inspector_with(mock);
        let (elided, data) = d.read_to_first_zero(0x1000, 1, 100).unwrap();
        assert_eq!(elided, 0);
        assert_eq!(data, b"hello");
    }

    #[test]
    fn test_read_to_first_zero_unterminated() {
        let mut mock = MockBackend::new(8);
        mock.map_region(0x1000, b"abcd".to_vec());
        let mut d = inspector_with(mock);
        // The 100-byte read fails, halving lands inside the region
        let (elided, data) = d.read_to_first_zero(0x1000, 1, 4).unwrap();
        assert_eq!(elided, -1);
        assert_eq!(data, b"abcd");
    }

    #[test]
    fn test_read_to_first_zero_shrinks_on_failure() {
        let mut mock = MockBackend::new(8);
        let mut region = b"xy".to_vec();
        region.push(0);
        region.push(b'z');
        mock.map_region(0x1000, region);
        let mut d = inspector_with(mock);
        let (elided, data) = d.read_to_first_zero(0x1000, 1, 64).unwrap();
        assert_eq!(elided, 0);
        assert_eq!(data, b"xy");
    }

    #[test]
    fn test_read_to_first_zero_wide_units() {
        let mut mock = MockBackend::new(8);
        let mut bytes = Vec::new();
        for c in [0x48u16, 0x69, 0] {
            bytes.extend_from_slice(&c.to_le_bytes());
        }
        mock.map_region(0x1000, bytes);
        let mut d = inspector_with(mock);
        let (elided, data) = d.read_to_first_zero(0x1000, 2, 6).unwrap();
        assert_eq!(elided, 0);
        assert_eq!(data.len(), 4);
    }

    #[test]
    fn test_encode_c_array() {
        let mut mock = MockBackend::new(8);
        mock.map_region(0x1000, b"AB\0".to_vec());
        let mut d = inspector_with(mock);
        let (elided, hex) = d.encode_c_array(0x1000, 1, 100).unwrap();
        assert_eq!(elided, 0);
        assert_eq!(hex, "4142");
    }

    proptest! {
        #[test]
        fn prop_hex_roundtrip(data: Vec<u8>) {
            let enc = hexencode(&data);
            prop_assert_eq!(hexdecode(&enc).unwrap(), data);
        }

        #[test]
        fn prop_limit_shown_never_exceeds(size in 0u64..10000, limit in 1u64..500) {
            let (elided, shown) = compute_limit(size, limit);
            prop_assert!(shown <= limit.max(size.min(limit)));
            prop_assert!(shown <= size);
            if elided != 0 {
                prop_assert_eq!(elided, size as i64);
            }
        }
    }
}
