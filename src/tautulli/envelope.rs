use serde_json::Value;

/// Locations where Tautulli versions and proxies have been seen to put history rows
const KNOWN_ROW_PATHS: &[&str] = &[
    "/data",
    "/rows",
    "/data/data",
    "/history/data",
    "/history/rows",
    "/response/data/data",
];

const MAX_SEARCH_DEPTH: usize = 4;

/// Find the row array inside a history response.
///
/// Known envelope shapes are tried first (an empty array there is a valid
/// empty page). Otherwise the first non-empty array of objects within
/// `MAX_SEARCH_DEPTH` levels is used. `None` means the shape is unrecognized.
pub fn extract_rows(doc: &Value) -> Option<&[Value]> {
    if let Value::Array(rows) = doc {
        return Some(rows);
    }

    KNOWN_ROW_PATHS
        .iter()
        .find_map(|path| doc.pointer(path).and_then(Value::as_array))
        .map(Vec::as_slice)
        .or_else(|| find_row_array(doc, MAX_SEARCH_DEPTH))
}

fn is_row_array(items: &[Value]) -> bool {
    !items.is_empty() && items.iter().all(Value::is_object)
}

fn find_row_array(value: &Value, depth: usize) -> Option<&[Value]> {
    match value {
        Value::Array(items) if is_row_array(items) => Some(items),
        Value::Object(map) if depth > 0 => map
            .values()
            .find_map(|child| find_row_array(child, depth - 1)),
        _ => None,
    }
}

/// Top-level keys of a document, for logging unrecognized shapes
pub fn shape_hint(doc: &Value) -> String {
    match doc {
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            format!("object with keys [{}]", keys.join(", "))
        }
        Value::Array(items) => format!("array of {} items", items.len()),
        Value::Null => "null".to_string(),
        other => format!("scalar {other}"),
    }
}
