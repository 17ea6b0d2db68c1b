//! Branch list normalization

use openapi_client::models::BranchInfo;
use serde_json::Value;

/// Reduce a branches payload to plain names.
///
/// The gateway answers either `["main", "dev"]` or
/// `[{"name": "main", "commit": {...}}, ...]`; anything that is not an array
/// yields an empty list.
pub fn normalize_branches(payload: Value) -> Vec<String> {
    let Value::Array(items) = payload else {
        return Vec::new();
    };

    items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(name) => Some(name),
            Value::Object(_) => serde_json::from_value::<BranchInfo>(item)
                .ok()
                .map(|b| b.name),
            _ => None,
        })
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// `main`, then `master`, then whatever comes first.
pub fn default_branch(branches: &[String]) -> Option<&str> {
    ["main", "master"]
        .iter()
        .find_map(|wanted| branches.iter().find(|b| b.as_str() == *wanted))
        .or_else(|| branches.first())
        .map(String::as_str)
}
