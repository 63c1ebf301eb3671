/// Field scraping for the version descriptor
///
/// The descriptor is not run through a JSON parser. Fields are located by their
/// quoted key and cut out of the line with a handful of terminator rules; the
/// only structure that is understood is bracket/brace nesting.
///
/// Two quirks are deliberate and covered by tests:
/// - the LAST occurrence of a key wins
/// - a missing key yields an empty string, never an error
///
/// Values may start after blank space following the colon. The terminator is
/// picked from the first non-blank character: a `{` or `[` runs to its matching
/// closer, anything else runs to the next `,`. The returned slice keeps the
/// leading blanks.

/// Return the raw text of field `name` in `data`, or `""` if absent.
///
/// The value is returned as-is: quotes and whitespace are kept.
pub fn find_field<'a>(data: &'a str, name: &str) -> &'a str {
    let key = format!("\"{}\":", name);
    let Some(index) = data.rfind(&key) else {
        return "";
    };

    let rest = &data[index + key.len()..];
    let end = value_end(rest);
    &rest[..end]
}

#[cfg(test)]
fn has_field(data: &str, name: &str) -> bool {
    data.contains(&format!("\"{}\":", name))
}

fn value_end(rest: &str) -> usize {
    let value = rest.trim_start();
    let lead = rest.len() - value.len();
    let terminated = match value.as_bytes().first() {
        Some(b'{' | b'[') => Scanner::new(value).group_end().map(|end| lead + end),
        _ => rest.find(','),
    };

    terminated
        .or_else(|| rest.find('}'))
        .unwrap_or(rest.len())
}

/// Recursive-descent scanner over nested `{}` / `[]` groups.
///
/// Quoted strings are skipped as opaque tokens so brackets inside them do not
/// count. Anything else is treated as scalar text.
struct Scanner<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
        }
    }

    /// Byte offset just past the group that opens at the current position
    fn group_end(mut self) -> Option<usize> {
        self.group()?;
        Some(self.pos)
    }

    fn group(&mut self) -> Option<()> {
        let close = match self.src.get(self.pos)? {
            b'{' => b'}',
            b'[' => b']',
            _ => return None,
        };
        self.pos += 1;

        loop {
            match *self.src.get(self.pos)? {
                b'"' => self.string()?,
                b'{' | b'[' => self.group()?,
                c if c == close => {
                    self.pos += 1;
                    return Some(());
                }
                // mismatched closer
                b'}' | b']' => return None,
                _ => self.pos += 1,
            }
        }
    }

    fn string(&mut self) -> Option<()> {
        self.pos += 1;
        loop {
            match *self.src.get(self.pos)? {
                b'\\' => self.pos += 2,
                b'"' => {
                    self.pos += 1;
                    return Some(());
                }
                _ => self.pos += 1,
            }
        }
    }
}

/// Split a bracketed literal `[a, b, c]` on every comma.
///
/// No nesting awareness: elements containing commas are not supported. Each
/// element is trimmed but keeps its quotes, see [`unquote`].
pub fn split_array(literal: &str) -> Vec<String> {
    let trimmed = literal.trim();
    let inner = trimmed.strip_prefix('[').unwrap_or(trimmed);
    let inner = inner.strip_suffix(']').unwrap_or(inner);

    if inner.trim().is_empty() {
        return Vec::new();
    }

    inner.split(',').map(|e| e.trim().to_string()).collect()
}

/// Strip one pair of surrounding double quotes, if present
pub fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Read a leading integer the way C `atol` does and truncate it to 8 bits.
///
/// Leading whitespace and one sign are accepted, parsing stops at the first
/// non-digit, and text without digits reads as 0. `256` therefore becomes `0`.
pub fn parse_u8_lenient(value: &str) -> u8 {
    let s = value.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let magnitude = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, d| {
            acc.wrapping_mul(10).wrapping_add(i64::from(d - b'0'))
        });

    let n = if negative { magnitude.wrapping_neg() } else { magnitude };
    n as u8
}
