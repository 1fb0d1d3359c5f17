//! Secret payloads.
//!
//! Structured layout:
//!
//! ```text
//! Username: alice
//! Url: https://example.org
//! Url: https://example.com
//!
//! free-form body, usually starting with the password
//! ```
//!
//! Header lines run up to the first empty line (or the end of input). A
//! header key is non-empty, has no whitespace and no `:`. Repeated keys
//! keep every value in order. Anything that does not fit is [`Secret::Plain`].

use std::collections::BTreeMap;

use zeroize::Zeroize;

const SEP: &str = ": ";

#[derive(Clone, PartialEq, Eq)]
pub enum Secret {
    Plain(Vec<u8>),
    Structured {
        headers: BTreeMap<String, Vec<String>>,
        body: Vec<u8>,
    },
}

impl Secret {
    /// Parse `input`, preferring the structured form.
    pub fn parse(input: &[u8]) -> Secret {
        match parse_structured(input) {
            Some((headers, body)) => Secret::Structured { headers, body },
            None => {
                tracing::trace!(bytes = input.len(), "treating secret as plain");
                Secret::Plain(input.to_vec())
            }
        }
    }

    /// Serialized form; `parse(to_bytes())` yields an equal secret.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Secret::Plain(raw) => raw.clone(),
            Secret::Structured { headers, body } => {
                let mut out = Vec::new();
                for (key, values) in headers {
                    for value in values {
                        out.extend_from_slice(key.as_bytes());
                        out.extend_from_slice(SEP.as_bytes());
                        out.extend_from_slice(value.as_bytes());
                        out.push(b'\n');
                    }
                }
                if !body.is_empty() {
                    out.push(b'\n');
                    out.extend_from_slice(body);
                }
                out
            }
        }
    }

    /// Everything that is not a header.
    pub fn body(&self) -> &[u8] {
        match self {
            Secret::Plain(raw) => raw,
            Secret::Structured { body, .. } => body,
        }
    }

    /// First line of the body, without the line ending.
    pub fn password(&self) -> Option<&str> {
        let body = self.body();
        let line = body.split(|&b| b == b'\n').next()?;
        let line = std::str::from_utf8(line).ok()?;
        let line = line.strip_suffix('\r').unwrap_or(line);
        (!line.is_empty()).then_some(line)
    }

    /// Header keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Secret::Plain(_) => Vec::new(),
            Secret::Structured { headers, .. } => headers.keys().map(String::as_str).collect(),
        }
    }

    /// First value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values(key).first().map(String::as_str)
    }

    pub fn values(&self, key: &str) -> &[String] {
        match self {
            Secret::Structured { headers, .. } => {
                headers.get(key).map(Vec::as_slice).unwrap_or_default()
            }
            Secret::Plain(_) => &[],
        }
    }

    /// Replace all values of `key` with `value`. A plain secret becomes
    /// structured with its bytes as the body.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), InvalidHeader> {
        validate(key, value)?;
        self.headers_mut().insert(key.to_string(), vec![value.to_string()]);
        Ok(())
    }

    /// Append a value to `key`.
    pub fn add(&mut self, key: &str, value: &str) -> Result<(), InvalidHeader> {
        validate(key, value)?;
        self.headers_mut()
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        Ok(())
    }

    /// Remove `key` and all its values. Returns whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        match self {
            Secret::Plain(_) => false,
            Secret::Structured { headers, .. } => match headers.remove(key) {
                Some(mut values) => {
                    values.iter_mut().for_each(Zeroize::zeroize);
                    true
                }
                None => false,
            },
        }
    }

    fn headers_mut(&mut self) -> &mut BTreeMap<String, Vec<String>> {
        if let Secret::Plain(raw) = self {
            let body = std::mem::take(raw);
            *self = Secret::Structured {
                headers: BTreeMap::new(),
                body,
            };
        }
        match self {
            Secret::Structured { headers, .. } => headers,
            Secret::Plain(_) => unreachable!("converted above"),
        }
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Secret::Plain(raw) => f
                .debug_struct("Plain")
                .field("len", &raw.len())
                .finish(),
            Secret::Structured { headers, body } => f
                .debug_struct("Structured")
                .field("keys", &headers.keys().collect::<Vec<_>>())
                .field("body_len", &body.len())
                .finish(),
        }
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        match self {
            Secret::Plain(raw) => raw.zeroize(),
            Secret::Structured { headers, body } => {
                headers
                    .values_mut()
                    .flat_map(|v| v.iter_mut())
                    .for_each(Zeroize::zeroize);
                body.zeroize();
            }
        }
    }
}

/// A header key or value that cannot be written in the structured layout.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid secret header: {0}")]
pub struct InvalidHeader(pub String);

fn valid_key(key: &str) -> bool {
    !key.is_empty() && !key.contains(':') && !key.chars().any(char::is_whitespace)
}

fn validate(key: &str, value: &str) -> Result<(), InvalidHeader> {
    if !valid_key(key) {
        return Err(InvalidHeader(format!("key {key:?}")));
    }
    if value.contains('\n') || value.contains('\r') || value.trim() != value {
        return Err(InvalidHeader(format!("value for {key:?}")));
    }
    Ok(())
}

type Parsed = (BTreeMap<String, Vec<String>>, Vec<u8>);

fn parse_structured(input: &[u8]) -> Option<Parsed> {
    let (head, body) = match find_blank_line(input) {
        Some((end, body_start)) => (&input[..end], &input[body_start..]),
        None => (input, &[][..]),
    };
    let head = std::str::from_utf8(head).ok()?;

    let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for line in head.lines() {
        let (key, value) = line.split_once(SEP)?;
        if !valid_key(key) {
            return None;
        }
        let value = value.trim();
        if value.contains('\r') {
            return None;
        }
        headers.entry(key.to_string()).or_default().push(value.to_string());
    }
    if headers.is_empty() {
        return None;
    }
    Some((headers, body.to_vec()))
}

/// End of the header block and start of the body around the first empty line.
fn find_blank_line(input: &[u8]) -> Option<(usize, usize)> {
    if input.starts_with(b"\n") {
        return Some((0, 1));
    }
    input
        .windows(2)
        .position(|w| w == b"\n\n")
        .map(|i| (i + 1, i + 2))
}
