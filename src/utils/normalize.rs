//! Shape normalization for generation responses.
//!
//! Every endpoint answers with loosely structured JSON. Each response gets a
//! tagged classification here plus one function that turns it into the
//! canonical in-memory form. Nothing in this module performs I/O.

use crate::core::error::PipelineError;
use crate::core::state::{Character, Clip, ScriptRow};
use crate::utils::media::{absolute_image_url, is_data_url, BASE64_MARKER, CANONICAL_IMAGE_PREFIX};
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::sync::OnceLock;

pub const IMAGE_FIELDS: [&str; 3] = ["image", "base64", "data"];

/// Text of a scalar cell. `null` counts as absent.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn string_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// --- Images ---

/// Canonical data URL for whatever the image endpoint handed back: raw
/// base64, a data URL, or a data URL with duplicated prefixes.
pub fn normalize_image_payload(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(idx) = s.rfind(BASE64_MARKER) {
        let payload = &s[idx + BASE64_MARKER.len()..];
        return Some(format!("{}{}", CANONICAL_IMAGE_PREFIX, payload));
    }
    if is_data_url(s) {
        return Some(s.to_string());
    }
    Some(format!("{}{}", CANONICAL_IMAGE_PREFIX, s))
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageResponse {
    Found { field: &'static str, raw: String },
    Missing,
}

impl ImageResponse {
    /// First non-empty string among `image`, `base64`, `data`.
    pub fn classify(value: &Value) -> Self {
        for field in IMAGE_FIELDS {
            if let Some(s) = value.get(field).and_then(Value::as_str) {
                if !s.is_empty() {
                    return Self::Found {
                        field,
                        raw: s.to_string(),
                    };
                }
            }
        }
        Self::Missing
    }

    pub fn into_payload(self) -> Result<String, PipelineError> {
        match self {
            Self::Found { raw, .. } => normalize_image_payload(&raw)
                .ok_or_else(|| PipelineError::invalid_response("generate-image")),
            Self::Missing => Err(PipelineError::invalid_response("generate-image")),
        }
    }
}

// --- Descriptions ---

fn bullet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^[ \t]*[-*][ \t]+").expect("valid regex"))
}

fn strong_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*|__").expect("valid regex"))
}

fn emphasis_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(^|\s)[*_]([A-Za-z0-9_\s]+)[*_](\s|$)").expect("valid regex")
    })
}

fn label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*([A-Za-z][A-Za-z \t]+?)[ \t]*:[ \t]*").expect("valid regex")
    })
}

/// One left-to-right pass. The boundary after a match is left in place so it
/// can open the next match; replaced text is never rescanned.
fn unwrap_emphasis(s: &str) -> String {
    let re = emphasis_re();
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    while let Some(caps) = re.captures_at(s, last) {
        let (Some(whole), Some(lead), Some(word), Some(trail)) =
            (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
        else {
            break;
        };
        out.push_str(&s[last..whole.start()]);
        out.push_str(lead.as_str());
        out.push_str(word.as_str());
        last = trail.start();
    }
    out.push_str(&s[last..]);
    out
}

/// Strips markdown leftovers from generated descriptions so that lines read
/// `Label: value`.
pub fn normalize_description(raw: &str) -> String {
    let s = raw.replace("\r\n", "\n");
    let s = bullet_re().replace_all(&s, "");
    let s = strong_re().replace_all(&s, "");
    let s = unwrap_emphasis(&s);

    let s = label_re().replace_all(&s, |caps: &Captures| format!("{}: ", caps[1].trim()));
    s.trim().to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub enum DescriptionResponse {
    Text(String),
    Malformed,
}

impl DescriptionResponse {
    pub fn classify(value: &Value) -> Self {
        match value.get("description") {
            Some(Value::String(s)) => Self::Text(s.clone()),
            _ => Self::Malformed,
        }
    }

    pub fn into_description(self) -> Result<String, PipelineError> {
        match self {
            Self::Text(s) => Ok(normalize_description(&s)),
            Self::Malformed => Err(PipelineError::invalid_response("generate-description")),
        }
    }
}

// --- Scripts ---

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptResponse {
    /// A bare sequence.
    Rows(Vec<Value>),
    /// `{ "script": [...] }`.
    Wrapped(Vec<Value>),
    Single(Map<String, Value>),
    Scalar(Value),
}

impl ScriptResponse {
    pub fn classify(value: Value) -> Self {
        match value {
            Value::Array(items) => Self::Rows(items),
            Value::Object(mut map) => {
                if map.get("script").is_some_and(Value::is_array) {
                    if let Some(Value::Array(items)) = map.remove("script") {
                        return Self::Wrapped(items);
                    }
                }
                Self::Single(map)
            }
            other => Self::Scalar(other),
        }
    }

    /// Never empty: an empty sequence becomes one blank `value` row.
    pub fn into_rows(self) -> Vec<ScriptRow> {
        match self {
            Self::Rows(items) | Self::Wrapped(items) => {
                if items.is_empty() {
                    return vec![ScriptRow::single("value", Value::String(String::new()))];
                }
                items.into_iter().map(row_from_value).collect()
            }
            Self::Single(map) => vec![ScriptRow::from_map(map)],
            Self::Scalar(value) => vec![ScriptRow::single(
                "value",
                Value::String(string_form(&value)),
            )],
        }
    }
}

fn row_from_value(value: Value) -> ScriptRow {
    match value {
        Value::Object(map) => ScriptRow::from_map(map),
        other => ScriptRow::single("value", Value::String(string_form(&other))),
    }
}

pub fn normalize_script_response(value: Value) -> Vec<ScriptRow> {
    ScriptResponse::classify(value).into_rows()
}

// --- Videos ---

#[derive(Debug, Clone, PartialEq)]
pub enum VideoResponse {
    Clips(Vec<Value>),
    /// No `clips` array; the backend produced nothing to show.
    Empty,
}

impl VideoResponse {
    pub fn classify(value: &Value) -> Self {
        match value.get("clips") {
            Some(Value::Array(items)) => Self::Clips(items.clone()),
            _ => Self::Empty,
        }
    }

    /// Entries without a `url` are dropped.
    pub fn into_clips(self) -> Vec<Clip> {
        let Self::Clips(items) = self else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                let url = item.get("url").and_then(Value::as_str)?;
                Some(Clip {
                    time: item.get("time").and_then(value_text).unwrap_or_default(),
                    url: url.to_string(),
                    details: item.get("details").filter(|d| !d.is_null()).cloned(),
                })
            })
            .collect()
    }
}

pub fn normalize_clips(value: &Value) -> Vec<Clip> {
    VideoResponse::classify(value).into_clips()
}

// --- Characters ---

/// Accepts a bare array or a `{ "characters": [...] }` wrapper. Relative
/// image paths are rewritten against `base_url`.
pub fn normalize_character_listing(value: Value, base_url: &str) -> Vec<Character> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("characters") {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<Character>(item) {
            Ok(mut c) => {
                c.image = absolute_image_url(base_url, c.image.as_deref());
                Some(c)
            }
            Err(e) => {
                log::warn!("Skipping malformed character entry: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_image_payload_keeps_content_after_last_marker() {
        let nested = "data:image/png;base64,data:image/jpeg;base64,data:image/png;base64,iVBOR";
        assert_eq!(
            normalize_image_payload(nested).as_deref(),
            Some("data:image/png;base64,iVBOR")
        );
        assert_eq!(
            normalize_image_payload("garbage base64,QUJD").as_deref(),
            Some("data:image/png;base64,QUJD")
        );
        assert_eq!(
            normalize_image_payload("data:image/webp;base64,QUJD").as_deref(),
            Some("data:image/png;base64,QUJD")
        );
    }

    #[test]
    fn test_image_payload_raw_and_empty() {
        assert_eq!(
            normalize_image_payload("  iVBORw0KGgo= ").as_deref(),
            Some("data:image/png;base64,iVBORw0KGgo=")
        );
        assert_eq!(normalize_image_payload("   "), None);
    }

    #[test]
    fn test_image_response_field_priority() {
        let value = json!({ "image": "", "base64": "QUJD", "data": "WFla" });
        assert_eq!(
            ImageResponse::classify(&value),
            ImageResponse::Found { field: "base64", raw: "QUJD".to_string() }
        );
        assert_eq!(
            ImageResponse::classify(&value).into_payload().unwrap(),
            "data:image/png;base64,QUJD"
        );

        let nested = json!({ "image": { "url": "x" }, "base64": "QUJD" });
        assert_eq!(
            ImageResponse::classify(&nested),
            ImageResponse::Found { field: "base64", raw: "QUJD".to_string() }
        );

        let missing = ImageResponse::classify(&json!({ "url": "x" }));
        assert_eq!(missing, ImageResponse::Missing);
        assert!(matches!(
            missing.into_payload(),
            Err(PipelineError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_description_cleanup() {
        let raw = "* **Age:** 12 years old\r\n- Hair :   short, *messy* brown\r\n  **Eyes**:hazel";
        assert_eq!(
            normalize_description(raw),
            "Age: 12 years old\nHair: short, messy brown\nEyes: hazel"
        );
    }

    #[test]
    fn test_description_adjacent_emphasis() {
        assert_eq!(normalize_description("_very_ *bold* look"), "very bold look");
        assert_eq!(normalize_description("*a* *b* *c*"), "a b c");
        // Nested wrappers lose only the outer pair.
        assert_eq!(normalize_description("*_a_*"), "_a_");
        assert_eq!(normalize_description("Pose: *mid stride*, calm"), "Pose: *mid stride*, calm");
        assert_eq!(normalize_description("plain text"), "plain text");
        assert_eq!(normalize_description(""), "");
    }

    #[test]
    fn test_description_response() {
        let ok = DescriptionResponse::classify(&json!({ "description": "- Style: painterly" }));
        assert_eq!(ok.into_description().unwrap(), "Style: painterly");

        let bad = DescriptionResponse::classify(&json!({ "text": "Style: painterly" }));
        assert!(matches!(
            bad.into_description(),
            Err(PipelineError::InvalidResponse(ref e)) if e == "generate-description"
        ));
        let wrong_type = DescriptionResponse::classify(&json!({ "description": 3 }));
        assert_eq!(wrong_type, DescriptionResponse::Malformed);
    }

    #[test]
    fn test_script_response_shapes() {
        let bare = normalize_script_response(json!([{ "time": "0-4s" }, { "time": "4-8s" }]));
        assert_eq!(bare.len(), 2);
        assert_eq!(bare[1].get("time"), Some(&json!("4-8s")));

        let wrapped = normalize_script_response(json!({ "script": [{ "audio": "Hi" }] }));
        assert_eq!(wrapped, vec![ScriptRow::single("audio", json!("Hi"))]);

        let single = normalize_script_response(json!({ "time": "0-4s", "script": "inline" }));
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].get("script"), Some(&json!("inline")));

        let scalar = normalize_script_response(json!("just text"));
        assert_eq!(scalar, vec![ScriptRow::single("value", json!("just text"))]);

        let number = normalize_script_response(json!(7));
        assert_eq!(number, vec![ScriptRow::single("value", json!("7"))]);
    }

    #[test]
    fn test_script_response_is_never_empty_and_idempotent() {
        let inputs = vec![
            json!([]),
            json!({ "script": [] }),
            json!({}),
            json!(null),
            json!([1, { "time": "0-4s" }, "x"]),
            json!({ "script": [{ "time": "0-4s", "characters": "[{\"name\":\"Ana\"}]" }] }),
        ];
        for input in inputs {
            let once = normalize_script_response(input.clone());
            assert!(!once.is_empty(), "empty rows for {}", input);
            let twice = normalize_script_response(serde_json::to_value(&once).unwrap());
            assert_eq!(once, twice, "not idempotent for {}", input);
        }
    }

    #[test]
    fn test_clips() {
        let clips = normalize_clips(&json!({
            "clips": [
                { "time": "0-4s", "url": "https://v/1.mp4", "details": { "seed": 1 } },
                { "time": 4, "url": "https://v/2.mp4", "details": null },
                { "time": "8-12s" }
            ]
        }));
        assert_eq!(clips.len(), 2);
        assert_eq!(clips[0].details, Some(json!({ "seed": 1 })));
        assert_eq!(clips[1].time, "4");
        assert!(clips[1].details.is_none());

        assert!(normalize_clips(&json!({ "status": "queued" })).is_empty());
        assert!(normalize_clips(&json!("ok")).is_empty());
        assert_eq!(
            VideoResponse::classify(&json!({ "clips": null })),
            VideoResponse::Empty
        );
    }

    #[test]
    fn test_character_listing() {
        let base = "http://localhost:3001";
        let wrapped = normalize_character_listing(
            json!({ "characters": [
                { "id": 1, "name": "Ana", "image": "/uploads/ana.png" },
                { "id": "b", "name": "Bo", "image": "https://cdn.test/bo.png" },
                { "name": "Cy", "image": null },
                { "name": 5 }
            ]}),
            base,
        );
        assert_eq!(wrapped.len(), 3);
        assert_eq!(
            wrapped[0].image.as_deref(),
            Some("http://localhost:3001/uploads/ana.png")
        );
        assert_eq!(wrapped[1].image.as_deref(), Some("https://cdn.test/bo.png"));
        assert!(wrapped[2].image.is_none());

        let bare = normalize_character_listing(json!([{ "name": "Ana" }]), base);
        assert_eq!(bare.len(), 1);

        assert!(normalize_character_listing(json!({ "error": "down" }), base).is_empty());
    }
}
