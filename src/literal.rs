//! Literal parameter substitution for statements that are not prepared.
//!
//! Placeholders (`?`, `?N`, `$N`) inside quoted strings, comments and
//! dollar-quoted blocks are left alone.

use std::borrow::Cow;
use std::fmt::Write;

use crate::error::LoadgenError;
use crate::types::RowValues;

#[derive(Clone)]
enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment(u32),
    DollarQuoted(String),
}

/// Render `value` as a SQL literal.
#[must_use]
pub fn to_sql_literal(value: &RowValues) -> String {
    match value {
        RowValues::Int(i) => i.to_string(),
        RowValues::Float(f) if f.is_finite() => f.to_string(),
        RowValues::Float(f) => quote(&f.to_string()),
        RowValues::Text(s) => quote(s),
        RowValues::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        RowValues::Timestamp(dt) => quote(&dt.format("%F %T%.f").to_string()),
        RowValues::Null => "NULL".to_string(),
        RowValues::JSON(v) => quote(&v.to_string()),
        RowValues::Blob(bytes) => {
            let mut out = String::with_capacity(bytes.len() * 2 + 3);
            out.push_str("X'");
            for b in bytes {
                let _ = write!(out, "{b:02X}");
            }
            out.push('\'');
            out
        }
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Replace every placeholder in `sql` with the literal form of its bound value.
///
/// `?` takes the next value in order; `?N` and `$N` take the N-th (1-based).
/// Returns a borrowed `Cow` when `sql` has no placeholders.
///
/// # Errors
/// Returns [`LoadgenError::ExecutionError`] if a placeholder has no bound value.
pub fn substitute_params<'a>(
    sql: &'a str,
    params: &[RowValues],
) -> Result<Cow<'a, str>, LoadgenError> {
    let bytes = sql.as_bytes();
    let mut out: Option<String> = None;
    let mut state = State::Normal;
    let mut next_positional = 0usize;
    let mut copied_to = 0usize;
    let mut idx = 0usize;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                b'-' if bytes.get(idx + 1) == Some(&b'-') => state = State::LineComment,
                b'/' if bytes.get(idx + 1) == Some(&b'*') => {
                    state = State::BlockComment(1);
                    idx += 1;
                }
                b'?' | b'$' => {
                    let digits_end = scan_digits(bytes, idx + 1);
                    let param_no = if digits_end > idx + 1 {
                        sql[idx + 1..digits_end].parse::<usize>().ok()
                    } else {
                        None
                    };
                    let index = match (b, param_no) {
                        (_, Some(n)) if n > 0 => Some(n - 1),
                        (b'?', None) => {
                            next_positional += 1;
                            Some(next_positional - 1)
                        }
                        (b'$', None) => {
                            if let Some((tag, end)) = dollar_quote_tag(bytes, idx) {
                                state = State::DollarQuoted(tag);
                                idx = end;
                            }
                            None
                        }
                        _ => None,
                    };
                    if let Some(index) = index {
                        let value = params.get(index).ok_or_else(|| {
                            LoadgenError::ExecutionError(format!(
                                "no value bound for placeholder {} in: {sql}",
                                index + 1
                            ))
                        })?;
                        let buf = out.get_or_insert_with(|| String::with_capacity(sql.len() + 16));
                        buf.push_str(&sql[copied_to..idx]);
                        buf.push_str(&to_sql_literal(value));
                        copied_to = digits_end;
                        idx = digits_end;
                        continue;
                    }
                }
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    if bytes.get(idx + 1) == Some(&b'\'') {
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    state = State::Normal;
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if b == b'/' && bytes.get(idx + 1) == Some(&b'*') {
                    state = State::BlockComment(depth + 1);
                    idx += 1;
                } else if b == b'*' && bytes.get(idx + 1) == Some(&b'/') {
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                    idx += 1;
                }
            }
            State::DollarQuoted(ref tag) => {
                let closing = format!("${tag}$");
                if sql[idx..].starts_with(&closing) {
                    idx += closing.len() - 1;
                    state = State::Normal;
                }
            }
        }
        idx += 1;
    }

    match out {
        Some(mut buf) => {
            buf.push_str(&sql[copied_to..]);
            Ok(Cow::Owned(buf))
        }
        None => Ok(Cow::Borrowed(sql)),
    }
}

fn scan_digits(bytes: &[u8], start: usize) -> usize {
    let mut idx = start;
    while idx < bytes.len() && bytes[idx].is_ascii_digit() {
        idx += 1;
    }
    idx
}

/// Tag and index of the closing `$` of a dollar-quote opener at `start`.
fn dollar_quote_tag(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    let mut idx = start + 1;
    while idx < bytes.len() && bytes[idx] != b'$' {
        let b = bytes[idx];
        if !(b.is_ascii_alphanumeric() || b == b'_') {
            return None;
        }
        idx += 1;
    }
    if idx < bytes.len() {
        let tag = String::from_utf8(bytes[start + 1..idx].to_vec()).ok()?;
        Some((tag, idx))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_and_numbered() {
        let params = vec![RowValues::Int(7), RowValues::Text("o'k".into())];
        let sql = substitute_params("SELECT * FROM t WHERE id = ? AND n = ?", &params).unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE id = 7 AND n = 'o''k'");

        let sql = substitute_params("UPDATE t SET n = $2 WHERE id = $1", &params).unwrap();
        assert_eq!(sql, "UPDATE t SET n = 'o''k' WHERE id = 7");

        let sql = substitute_params("SELECT ?2, ?1", &params).unwrap();
        assert_eq!(sql, "SELECT 'o''k', 7");
    }

    #[test]
    fn quoted_and_commented_placeholders_are_kept() {
        let params = vec![RowValues::Int(1)];
        let sql = substitute_params(
            "SELECT '?', \"$1\" -- ?\n, /* ? */ $$ ? $$, ?",
            &params,
        )
        .unwrap();
        assert_eq!(sql, "SELECT '?', \"$1\" -- ?\n, /* ? */ $$ ? $$, 1");
    }

    #[test]
    fn no_placeholders_borrows() {
        let sql = substitute_params("COMMIT", &[]).unwrap();
        assert!(matches!(sql, Cow::Borrowed("COMMIT")));
    }

    #[test]
    fn missing_value_is_an_error() {
        let err = substitute_params("SELECT ?, ?", &[RowValues::Int(1)]).unwrap_err();
        assert!(matches!(err, LoadgenError::ExecutionError(_)));
    }

    #[test]
    fn literal_rendering() {
        assert_eq!(to_sql_literal(&RowValues::Null), "NULL");
        assert_eq!(to_sql_literal(&RowValues::Bool(true)), "TRUE");
        assert_eq!(to_sql_literal(&RowValues::Blob(vec![0xAB, 0x01])), "X'AB01'");
        assert_eq!(to_sql_literal(&RowValues::Float(1.5)), "1.5");
    }
}
