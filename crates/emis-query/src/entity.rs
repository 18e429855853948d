//! The only structure the client reads from entities: their identifier.

use serde_json::Value;

/// Identifier fields, in lookup order.
const ID_FIELDS: [&str; 2] = ["id", "ukid"];

/// Textual identifier of an entity (`id`, else `ukid`). Numbers compare by
/// their decimal form so `7` and `"7"` are the same entity.
pub fn entity_id(entity: &Value) -> Option<String> {
    ID_FIELDS.iter().find_map(|field| match entity.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// The entities of a collection value: a bare array, or the `results` array
/// of a paginated page.
pub fn items(collection: &Value) -> Option<&Vec<Value>> {
    match collection {
        Value::Array(items) => Some(items),
        Value::Object(page) => page.get("results")?.as_array(),
        _ => None,
    }
}

/// `collection` without the entity `id`, or `None` if it holds no such
/// entity. A paginated page also has its `count` decremented.
pub fn without_entity(collection: &Value, id: &str) -> Option<Value> {
    let keep = |item: &Value| entity_id(item).as_deref() != Some(id);

    let original = items(collection)?;
    let kept: Vec<Value> = original.iter().filter(|item| keep(*item)).cloned().collect();
    let removed = original.len() - kept.len();
    if removed == 0 {
        return None;
    }

    match collection {
        Value::Array(_) => Some(Value::Array(kept)),
        Value::Object(page) => {
            let mut page = page.clone();
            if let Some(count) = page.get("count").and_then(Value::as_u64) {
                page.insert(
                    "count".to_string(),
                    Value::from(count.saturating_sub(removed as u64)),
                );
            }
            page.insert("results".to_string(), Value::Array(kept));
            Some(Value::Object(page))
        }
        _ => None,
    }
}
