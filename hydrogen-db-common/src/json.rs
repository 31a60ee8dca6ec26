//! Canonical row-to-JSON serialization (spec §4.9).
//!
//! `format_value` is kept at the literal buffer-and-length level the spec
//! describes (rather than just building a `String`) because several
//! invariants are about buffer sizing: the caller must be able to probe
//! "does this fit" without a partial write leaking through on failure.

use crate::error::DbError;

/// One field of a result row, as handed to the serializer by an engine
/// adapter after it has decided null-ness and numeric-ness for the column.
#[derive(Debug, Clone)]
pub struct CellValue {
    pub column_name: String,
    /// `None` means SQL NULL; distinct from `Some(String::new())`, an empty
    /// string value.
    pub value: Option<String>,
    pub is_numeric: bool,
}

/// Writes one `"column":value` (or bare `value` when `column_name` is
/// empty) JSON field into `out`, returning the number of bytes written.
///
/// Known quirk, preserved intentionally (see spec §9): a quote embedded in
/// `column_name` is emitted verbatim, not re-escaped.
pub fn format_value(cell: &CellValue, out: &mut [u8]) -> Result<usize, DbError> {
    let rendered = render_segment(cell)?;
    let bytes = rendered.as_bytes();
    if bytes.len() > out.len() {
        return Err(DbError::resource_exhausted(format!(
            "buffer of {} bytes too small for {} byte field",
            out.len(),
            bytes.len()
        )));
    }
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(bytes.len())
}

fn render_segment(cell: &CellValue) -> Result<String, DbError> {
    let prefix = if cell.column_name.is_empty() {
        String::new()
    } else {
        format!("\"{}\":", cell.column_name)
    };

    let Some(value) = cell.value.as_deref() else {
        // SQL NULL is representable with an absent value; anything else
        // claiming non-null with no value is a caller bug.
        return Err(DbError::parameter_invalid(
            "non-null cell carries no value",
        ));
    };

    if cell.is_numeric {
        if value.is_empty() {
            return Err(DbError::parameter_invalid("numeric value is empty"));
        }
        return Ok(format!("{prefix}{value}"));
    }

    if value.is_empty() {
        return Err(DbError::parameter_invalid("string value is empty"));
    }
    Ok(format!("{prefix}\"{}\"", escape_json_string(value)))
}

/// Renders the null case separately since `format_value`'s contract treats
/// `is_null` as overriding everything else about `value`.
pub fn format_null(column_name: &str, out: &mut [u8]) -> Result<usize, DbError> {
    let prefix = if column_name.is_empty() {
        String::new()
    } else {
        format!("\"{column_name}\":")
    };
    let rendered = format!("{prefix}null");
    let bytes = rendered.as_bytes();
    if bytes.len() > out.len() {
        return Err(DbError::resource_exhausted("buffer too small for null"));
    }
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(bytes.len())
}

fn escape_json_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push_str("\\t"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Grows `buf`'s capacity to hold `need` more bytes, doubling like the
/// spec's `ensure_buffer_capacity`: `max(cap*2, cur+need+1024)`. Existing
/// contents are always preserved (`Vec::reserve` never truncates).
pub fn ensure_buffer_capacity(buf: &mut Vec<u8>, need: usize) {
    let cur = buf.len();
    let cap = buf.capacity();
    let target = (cap.saturating_mul(2)).max(cur + need + 1024);
    if target > cap {
        buf.reserve(target - cur);
    }
}

/// One full result row: an ordered list of named cells, rendered as a JSON
/// object. A row-set renders as a JSON array of such objects — the
/// "canonical array-of-objects JSON" the spec refers to throughout.
pub fn rows_to_json(rows: &[Vec<CellValue>]) -> Result<String, DbError> {
    let mut buf = Vec::new();
    ensure_buffer_capacity(&mut buf, 2);
    buf.push(b'[');
    for (row_idx, row) in rows.iter().enumerate() {
        if row_idx > 0 {
            buf.push(b',');
        }
        buf.push(b'{');
        for (col_idx, cell) in row.iter().enumerate() {
            if col_idx > 0 {
                buf.push(b',');
            }
            let segment = if cell.value.is_none() {
                let mut scratch = vec![0u8; estimate_len(cell)];
                let len = format_null(&cell.column_name, &mut scratch)?;
                scratch.truncate(len);
                scratch
            } else {
                let mut scratch = vec![0u8; estimate_len(cell)];
                let len = format_value(cell, &mut scratch)?;
                scratch.truncate(len);
                scratch
            };
            ensure_buffer_capacity(&mut buf, segment.len());
            buf.extend_from_slice(&segment);
        }
        buf.push(b'}');
    }
    buf.push(b']');
    String::from_utf8(buf).map_err(|e| DbError::internal(format!("non-utf8 json output: {e}")))
}

fn estimate_len(cell: &CellValue) -> usize {
    cell.column_name.len() + cell.value.as_ref().map_or(4, |v| v.len() * 2) + 16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(name: &str, value: Option<&str>, numeric: bool) -> CellValue {
        CellValue {
            column_name: name.to_owned(),
            value: value.map(str::to_owned),
            is_numeric: numeric,
        }
    }

    #[test]
    fn null_value_ignores_is_numeric() {
        let mut out = [0u8; 32];
        let len = format_null("age", &mut out).unwrap();
        assert_eq!(&out[..len], b"\"age\":null");
    }

    #[test]
    fn numeric_value_is_verbatim() {
        let c = cell("age", Some("42"), true);
        let mut out = [0u8; 32];
        let len = format_value(&c, &mut out).unwrap();
        assert_eq!(&out[..len], b"\"age\":42");
    }

    #[test]
    fn string_value_is_escaped() {
        let c = cell("note", Some("say \"hi\"\nnow\tthen"), false);
        let mut out = [0u8; 64];
        let len = format_value(&c, &mut out).unwrap();
        assert_eq!(
            &out[..len],
            b"\"note\":\"say \\\"hi\\\"\\nnow\\tthen\""
        );
    }

    #[test]
    fn empty_column_name_omits_prefix() {
        let c = cell("", Some("13"), true);
        let mut out = [0u8; 16];
        let len = format_value(&c, &mut out).unwrap();
        assert_eq!(&out[..len], b"13");
    }

    #[test]
    fn numeric_empty_string_fails() {
        let c = cell("age", Some(""), true);
        let mut out = [0u8; 16];
        assert!(format_value(&c, &mut out).is_err());
    }

    #[test]
    fn string_empty_value_fails() {
        let c = cell("note", Some(""), false);
        let mut out = [0u8; 16];
        assert!(format_value(&c, &mut out).is_err());
    }

    #[test]
    fn exact_size_buffer_succeeds_one_less_fails() {
        let c = cell("a", Some("7"), true); // renders to `"a":7`, 5 bytes
        let mut exact = [0u8; 5];
        assert_eq!(format_value(&c, &mut exact).unwrap(), 5);

        let mut short = [0u8; 4];
        assert!(format_value(&c, &mut short).is_err());
        assert_eq!(short, [0u8; 4], "no partial write on failure");
    }

    #[test]
    fn buffer_growth_preserves_prefix() {
        let mut buf = vec![1u8, 2, 3];
        let snapshot = buf.clone();
        ensure_buffer_capacity(&mut buf, 4096);
        assert_eq!(&buf[..3], &snapshot[..]);
    }

    #[test]
    fn rows_render_as_array_of_objects() {
        let rows = vec![vec![cell("id", Some("1"), true), cell("name", Some("a"), false)]];
        let json = rows_to_json(&rows).unwrap();
        assert_eq!(json, r#"[{"id":1,"name":"a"}]"#);
    }
}
