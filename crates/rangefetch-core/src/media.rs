//! Views derived from response headers: media type, extension, modification time

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, CONTENT_TYPE, LAST_MODIFIED};

/// HTTP-date layouts: IMF-fixdate, obsolete RFC 850, ANSI C asctime
const HTTP_DATE_FORMATS: [&str; 3] = [
    "%a, %d %b %Y %H:%M:%S GMT",
    "%A, %d-%b-%y %H:%M:%S GMT",
    "%a %b %e %H:%M:%S %Y",
];

/// Media type without parameters, lowercased (`text/html; charset=utf-8` -> `text/html`)
pub fn media_type(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let essence = raw.split(';').next()?.trim();
    if essence.is_empty() || !essence.contains('/') {
        return None;
    }
    Some(essence.to_ascii_lowercase())
}

/// Preferred file extension for a media type, dot included.
///
/// A few common types are pinned ahead of the registry's first entry.
pub fn extension_for(media_type: &str) -> Option<String> {
    let pinned = match media_type {
        "application/javascript" | "application/x-javascript" => Some(".js"),
        "image/jpeg" => Some(".jpg"),
        "font/opentype" => Some(".otf"),
        "text/plain" => Some(".txt"),
        "text/html" => Some(".html"),
        _ => None,
    };
    if let Some(ext) = pinned {
        return Some(ext.to_string());
    }

    mime_guess::get_mime_extensions_str(media_type)
        .and_then(|exts| exts.first())
        .map(|ext| format!(".{}", ext))
}

/// `Last-Modified` as a timestamp, or now when absent or unparsable
pub fn modified_time(headers: &HeaderMap) -> DateTime<Utc> {
    headers
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
        .unwrap_or_else(Utc::now)
}

/// Parse any of the three HTTP-date formats
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    HTTP_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}
