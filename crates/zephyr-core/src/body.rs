//! Request body parsing
//!
//! Bodies are parsed eagerly at request construction according to the
//! declared content type. Size limits are enforced before and during
//! parsing; a violation fails the request with a 400-class error before
//! any middleware runs.

use crate::{Error, Result};
use bytes::Bytes;
use std::collections::HashMap;

/// Limits enforced during body parsing
#[derive(Debug, Clone)]
pub struct BodyLimits {
    /// Maximum total body size in bytes
    pub max_body_size: usize,
    /// Maximum size of a single multipart upload in bytes
    pub max_file_size: usize,
    /// Maximum number of multipart uploads
    pub max_files: usize,
}

impl Default for BodyLimits {
    fn default() -> Self {
        Self {
            max_body_size: 10 * 1024 * 1024,
            max_file_size: 5 * 1024 * 1024,
            max_files: 16,
        }
    }
}

/// One uploaded file from a multipart form
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Form field name
    pub field: String,
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

/// Parsed multipart form: plain fields plus uploaded files
#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    pub fields: HashMap<String, String>,
    pub files: Vec<UploadedFile>,
}

/// Parsed request body, keyed by declared content type
#[derive(Debug, Clone)]
pub enum ParsedBody {
    /// No body, or unrecognized content type (empty-object default)
    Empty,
    Json(serde_json::Value),
    Form(HashMap<String, String>),
    Multipart(MultipartForm),
    Text(String),
    Bytes(Bytes),
}

impl ParsedBody {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ParsedBody::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParsedBody::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Look up a value across form, multipart fields, or JSON object keys
    pub fn value(&self, key: &str) -> Option<String> {
        match self {
            ParsedBody::Form(map) => map.get(key).cloned(),
            ParsedBody::Multipart(form) => form.fields.get(key).cloned(),
            ParsedBody::Json(serde_json::Value::Object(map)) => map.get(key).map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ParsedBody::Empty)
    }
}

/// Parse a raw body under its declared content type, enforcing limits
pub fn parse_body(
    content_type: Option<&str>,
    body: &Bytes,
    limits: &BodyLimits,
) -> Result<ParsedBody> {
    if body.len() > limits.max_body_size {
        return Err(Error::BodyTooLarge {
            size: body.len(),
            limit: limits.max_body_size,
        });
    }

    if body.is_empty() {
        return Ok(ParsedBody::Empty);
    }

    let raw_type = content_type.unwrap_or("");
    let media_type = raw_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    match media_type.as_str() {
        "application/json" => {
            let value: serde_json::Value =
                serde_json::from_slice(body).map_err(|e| Error::BodyParse(e.to_string()))?;
            Ok(ParsedBody::Json(value))
        }
        "application/x-www-form-urlencoded" => {
            let text = std::str::from_utf8(body)
                .map_err(|e| Error::BodyParse(e.to_string()))?;
            Ok(ParsedBody::Form(parse_query(text)))
        }
        "multipart/form-data" => {
            let boundary = boundary_param(raw_type)
                .ok_or_else(|| Error::BodyParse("multipart body without boundary".to_string()))?;
            Ok(ParsedBody::Multipart(parse_multipart(
                body, &boundary, limits,
            )?))
        }
        "text/plain" => {
            let text = std::str::from_utf8(body)
                .map_err(|e| Error::BodyParse(e.to_string()))?;
            Ok(ParsedBody::Text(text.to_string()))
        }
        "application/octet-stream" => Ok(ParsedBody::Bytes(body.clone())),
        _ => Ok(ParsedBody::Empty),
    }
}

/// Parse a query or urlencoded-form string into decoded key-value pairs
pub fn parse_query(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            params.insert(percent_decode(key), percent_decode(value));
        }
    }
    params
}

/// Simple URL decoding (no external dependency)
pub(crate) fn percent_decode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '%' {
            let hex: String = chars.by_ref().take(2).collect();
            if hex.len() == 2 {
                if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                    result.push(byte as char);
                    continue;
                }
            }
            result.push('%');
            result.push_str(&hex);
        } else if c == '+' {
            result.push(' ');
        } else {
            result.push(c);
        }
    }
    result
}

/// Extract the boundary parameter from a multipart content type
fn boundary_param(content_type: &str) -> Option<String> {
    for param in content_type.split(';').skip(1) {
        let param = param.trim();
        if let Some(value) = param.strip_prefix("boundary=") {
            return Some(value.trim_matches('"').to_string());
        }
    }
    None
}

/// Find a byte needle in a haystack
fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_multipart(body: &Bytes, boundary: &str, limits: &BodyLimits) -> Result<MultipartForm> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let bytes: &[u8] = body;

    let mut form = MultipartForm::default();
    let mut pos = find_bytes(bytes, delimiter)
        .ok_or_else(|| Error::BodyParse("multipart boundary not found in body".to_string()))?
        + delimiter.len();

    loop {
        let rest = &bytes[pos..];
        if rest.starts_with(b"--") {
            // Closing delimiter
            break;
        }
        let start = if rest.starts_with(b"\r\n") {
            pos + 2
        } else if rest.starts_with(b"\n") {
            pos + 1
        } else {
            return Err(Error::BodyParse("malformed multipart delimiter".to_string()));
        };

        let next = find_bytes(&bytes[start..], delimiter)
            .ok_or_else(|| Error::BodyParse("unterminated multipart part".to_string()))?
            + start;

        let mut end = next;
        if end >= 2 && &bytes[end - 2..end] == b"\r\n" {
            end -= 2;
        } else if end >= 1 && bytes[end - 1] == b'\n' {
            end -= 1;
        }

        parse_part(&body.slice(start..end), &mut form, limits)?;
        pos = next + delimiter.len();
    }

    Ok(form)
}

fn parse_part(part: &Bytes, form: &mut MultipartForm, limits: &BodyLimits) -> Result<()> {
    let bytes: &[u8] = part;
    let header_end = find_bytes(bytes, b"\r\n\r\n")
        .map(|i| (i, i + 4))
        .or_else(|| find_bytes(bytes, b"\n\n").map(|i| (i, i + 2)))
        .ok_or_else(|| Error::BodyParse("multipart part without headers".to_string()))?;

    let headers = std::str::from_utf8(&bytes[..header_end.0])
        .map_err(|e| Error::BodyParse(e.to_string()))?;
    let data = part.slice(header_end.1..);

    let mut name = None;
    let mut filename = None;
    let mut content_type = "application/octet-stream".to_string();

    for line in headers.lines() {
        let lower = line.to_lowercase();
        if lower.starts_with("content-disposition:") {
            name = quoted_param(line, "name");
            filename = quoted_param(line, "filename");
        } else if let Some(value) = lower.strip_prefix("content-type:") {
            content_type = value.trim().to_string();
        }
    }

    let name = name
        .ok_or_else(|| Error::BodyParse("multipart part without a field name".to_string()))?;

    match filename {
        Some(filename) => {
            if form.files.len() >= limits.max_files {
                return Err(Error::TooManyFiles {
                    count: form.files.len() + 1,
                    limit: limits.max_files,
                });
            }
            if data.len() > limits.max_file_size {
                return Err(Error::FileTooLarge {
                    name: filename,
                    size: data.len(),
                    limit: limits.max_file_size,
                });
            }
            form.files.push(UploadedFile {
                field: name,
                filename,
                content_type,
                data,
            });
        }
        None => {
            let value = std::str::from_utf8(&data)
                .map_err(|e| Error::BodyParse(e.to_string()))?
                .to_string();
            form.fields.insert(name, value);
        }
    }

    Ok(())
}

/// Extract a quoted parameter (`key="value"`) from a header line.
///
/// Parameters are split on `;` and matched whole, so `name` never matches
/// inside `filename` regardless of parameter order.
fn quoted_param(line: &str, key: &str) -> Option<String> {
    for param in line.split(';').skip(1) {
        let param = param.trim();
        if let Some(rest) = param.strip_prefix(key) {
            if let Some(quoted) = rest.strip_prefix("=\"") {
                let end = quoted.find('"')?;
                return Some(quoted[..end].to_string());
            }
        }
    }
    None
}
