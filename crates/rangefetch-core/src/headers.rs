//! Header plumbing: request merge, persistence and `Content-Range` parsing

use crate::error::{ConfigError, TransferError};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_RANGE, RANGE};
use std::collections::BTreeMap;

/// Caller headers plus `Range: bytes=<offset>-`.
///
/// The range is inserted last, so a caller-supplied `Range` never survives.
pub fn request_headers(caller: &HeaderMap, offset: u64) -> Result<HeaderMap, TransferError> {
    let range = HeaderValue::from_str(&format!("bytes={}-", offset))
        .map_err(|e| TransferError::RequestBuild(e.to_string()))?;
    let mut headers = caller.clone();
    headers.insert(RANGE, range);
    Ok(headers)
}

/// Parse one header pair, validating both halves
pub fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), ConfigError> {
    let header_name =
        HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| ConfigError::InvalidHeader {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
    let header_value =
        HeaderValue::from_str(value.trim()).map_err(|e| ConfigError::InvalidHeader {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
    Ok((header_name, header_value))
}

/// Parse a `Name: value` line as given on a command line
pub fn parse_header_line(line: &str) -> Result<(HeaderName, HeaderValue), ConfigError> {
    let (name, value) = line.split_once(':').ok_or_else(|| ConfigError::InvalidHeader {
        name: line.to_string(),
        reason: "expected `Name: value`".to_string(),
    })?;
    parse_header(name, value)
}

/// Flatten a header map for the JSON record
pub fn to_record(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        out.entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    out
}

/// Rebuild a header map from a record, dropping entries that no longer parse
pub fn from_record(record: &BTreeMap<String, Vec<String>>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, values) in record {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.append(name.clone(), value);
            }
        }
    }
    headers
}

/// A parsed `Content-Range: bytes <first>-<last>/<total>` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// First and last byte of the enclosed part; None for `bytes */<total>`
    pub span: Option<(u64, u64)>,
    /// Complete length; None when the server sent `*`
    pub total: Option<u64>,
}

impl ContentRange {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(Self::parse)
    }

    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.trim().strip_prefix("bytes")?.trim_start();
        let (span, total) = rest.split_once('/')?;
        let total = match total.trim() {
            "*" => None,
            n => Some(n.parse().ok()?),
        };
        let span = match span.trim() {
            "*" => None,
            s => {
                let (first, last) = s.split_once('-')?;
                Some((first.trim().parse().ok()?, last.trim().parse().ok()?))
            }
        };
        Some(Self { span, total })
    }

    pub fn start(&self) -> Option<u64> {
        self.span.map(|(first, _)| first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_overrides_caller_range() {
        let mut caller = HeaderMap::new();
        caller.insert(RANGE, HeaderValue::from_static("bytes=0-10"));
        caller.insert("x-token", HeaderValue::from_static("abc"));

        let headers = request_headers(&caller, 4096).unwrap();
        assert_eq!(headers.get(RANGE).unwrap(), "bytes=4096-");
        assert_eq!(headers.get_all(RANGE).iter().count(), 1);
        assert_eq!(headers.get("x-token").unwrap(), "abc");
    }

    #[test]
    fn header_line_parsing() {
        let (name, value) = parse_header_line("Authorization: Bearer x:y").unwrap();
        assert_eq!(name, "authorization");
        assert_eq!(value, "Bearer x:y");
        assert!(parse_header_line("no separator").is_err());
        assert!(parse_header_line("bad name: v").is_err());
    }

    #[test]
    fn records_keep_repeated_values() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));

        let record = to_record(&headers);
        assert_eq!(record["set-cookie"], vec!["a=1", "b=2"]);

        let rebuilt = from_record(&record);
        assert_eq!(rebuilt.get_all("set-cookie").iter().count(), 2);
        assert_eq!(rebuilt.get("content-type").unwrap(), "text/plain");
    }

    #[test]
    fn content_range_forms() {
        let range = ContentRange::parse("bytes 4096-10239/10240").unwrap();
        assert_eq!(range.start(), Some(4096));
        assert_eq!(range.total, Some(10240));

        let unsatisfied = ContentRange::parse("bytes */10240").unwrap();
        assert_eq!(unsatisfied.span, None);
        assert_eq!(unsatisfied.total, Some(10240));

        let unknown_total = ContentRange::parse("bytes 0-9/*").unwrap();
        assert_eq!(unknown_total.total, None);

        assert!(ContentRange::parse("items 0-9/10").is_none());
        assert!(ContentRange::parse("bytes x-9/10").is_none());
    }
}
