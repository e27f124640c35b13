//! Request parameters shared by controllers, helpers and connectors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RequestError;

/// One entry of the `includes` list: populate `path`, optionally projecting
/// the referenced record down to `_id` plus `select`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Include {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<String>,
}

impl Include {
    #[must_use]
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            select: None,
        }
    }

    #[must_use]
    pub fn select(mut self, select: impl Into<String>) -> Self {
        self.select = Some(select.into());
        self
    }
}

/// Options carried by one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    pub includes: Vec<Include>,
    /// Reference path the request addresses (`/:id/:ref` routes).
    pub reference: Option<String>,
    /// Remove properties absent from the payload on update.
    pub delete_missing: bool,
    /// Allow writing read-only properties. In-process callers only; never
    /// read from a query string.
    pub ignore_read_only: bool,
}

impl Parameters {
    /// The include entry for `path`, if requested.
    #[must_use]
    pub fn include(&self, path: &str) -> Option<&Include> {
        self.includes.iter().find(|i| i.path == path)
    }

    #[must_use]
    pub fn with_includes(mut self, includes: Vec<Include>) -> Self {
        self.includes = includes;
        self
    }

    #[must_use]
    pub fn delete_missing(mut self, delete_missing: bool) -> Self {
        self.delete_missing = delete_missing;
        self
    }

    /// Reads `includes` and `deleteMissing` from a query string map.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::BadRequest`] for a malformed `includes` value.
    pub fn from_query(query: &BTreeMap<String, String>) -> Result<Self, RequestError> {
        let includes = match query.get("includes") {
            Some(raw) => parse_includes(raw)?,
            None => Vec::new(),
        };
        Ok(Self {
            includes,
            reference: None,
            delete_missing: query.get("deleteMissing").is_some_and(|v| is_truthy(v)),
            ignore_read_only: false,
        })
    }
}

fn is_truthy(raw: &str) -> bool {
    matches!(raw, "true" | "1" | "")
}

/// Parses an `includes` value.
///
/// Accepts a JSON array (`[{"path":"owner","select":"name"}]`, or plain
/// strings), a single JSON object, or a comma separated `path[.select]` list.
///
/// # Errors
///
/// Returns [`RequestError::BadRequest`] for JSON that is not an include list.
pub fn parse_includes(raw: &str) -> Result<Vec<Include>, RequestError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        let value: Value = serde_json::from_str(trimmed)
            .map_err(|e| RequestError::BadRequest(format!("invalid includes: {e}")))?;
        let items = match value {
            Value::Array(items) => items,
            single => vec![single],
        };
        return items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(parse_include_item(&s)),
                other => serde_json::from_value(other)
                    .map_err(|e| RequestError::BadRequest(format!("invalid include: {e}"))),
            })
            .collect();
    }
    Ok(trimmed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_include_item)
        .collect())
}

fn parse_include_item(item: &str) -> Include {
    match item.split_once('.') {
        Some((path, select)) if !select.is_empty() => Include::path(path).select(select),
        _ => Include::path(item.trim_end_matches('.')),
    }
}

/// Parses the `where` query value into an equality filter.
///
/// # Errors
///
/// Returns [`RequestError::BadRequest`] unless the value is a JSON object.
pub fn parse_filter(query: &BTreeMap<String, String>) -> Result<Map<String, Value>, RequestError> {
    let Some(raw) = query.get("where") else {
        return Ok(Map::new());
    };
    match serde_json::from_str(raw) {
        Ok(Value::Object(filter)) => Ok(filter),
        Ok(_) => Err(RequestError::BadRequest(
            "'where' must be a JSON object".to_string(),
        )),
        Err(e) => Err(RequestError::BadRequest(format!("invalid 'where' filter: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn query(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn comma_list_with_selects() {
        let includes = parse_includes("owner.name, pets").unwrap();
        assert_eq!(
            includes,
            vec![Include::path("owner").select("name"), Include::path("pets")]
        );
    }

    #[test]
    fn json_includes_accept_objects_and_strings() {
        let includes = parse_includes(r#"[{"path":"owner","select":"title"},"pets"]"#).unwrap();
        assert_eq!(
            includes,
            vec![Include::path("owner").select("title"), Include::path("pets")]
        );
        let single = parse_includes(r#"{"path":"owner"}"#).unwrap();
        assert_eq!(single, vec![Include::path("owner")]);
    }

    #[test]
    fn malformed_json_includes_are_rejected() {
        assert!(matches!(
            parse_includes("[1, 2]"),
            Err(RequestError::BadRequest(_))
        ));
    }

    #[test]
    fn flags_are_read_from_query() {
        let params =
            Parameters::from_query(&query(&[("deleteMissing", "true"), ("includes", "owner")]))
                .unwrap();
        assert!(params.delete_missing);
        assert!(!params.ignore_read_only);
        assert!(params.include("owner").is_some());
        assert!(params.include("pets").is_none());
    }

    #[test]
    fn read_only_override_is_not_taken_from_query() {
        let params = Parameters::from_query(&query(&[("ignoreReadOnly", "true")])).unwrap();
        assert!(!params.ignore_read_only);
    }

    #[test]
    fn where_filter_must_be_an_object() {
        let filter = parse_filter(&query(&[("where", r#"{"title":"a"}"#)])).unwrap();
        assert_eq!(filter.get("title"), Some(&json!("a")));
        assert!(parse_filter(&query(&[("where", "[1]")])).is_err());
        assert!(parse_filter(&query(&[])).unwrap().is_empty());
    }
}
