//! Version 1 → 2: the unversioned legacy layout.
//!
//! * `groupCalls` is renamed to `group_calls`.
//! * Ephemeral 1:1 `calls` are dropped; they are never persisted.
//! * Marketplace collections (`nfts`, `nftMarket`) are dropped.
//! * Channel entries that stored `likes` as a counter get an empty like set.
//! * Missing collections are created empty.

use serde_json::{Map, Value};

use crate::error::Result;

const COLLECTIONS: &[&str] = &[
    "users",
    "sessions",
    "chats",
    "groups",
    "channels",
    "messages",
    "group_calls",
];

const DROPPED: &[&str] = &["calls", "nfts", "nftMarket"];

pub fn up(doc: &mut Map<String, Value>) -> Result<()> {
    if let Some(calls) = doc.remove("groupCalls") {
        doc.entry("group_calls").or_insert(calls);
    }

    for key in DROPPED {
        if doc.remove(*key).is_some() {
            tracing::warn!(collection = key, "dropping legacy collection");
        }
    }

    for key in COLLECTIONS {
        let slot = doc.entry(*key).or_insert_with(|| Value::Object(Map::new()));
        if slot.is_null() {
            *slot = Value::Object(Map::new());
        }
    }

    if let Some(Value::Object(channels)) = doc.get_mut("channels") {
        for channel in channels.values_mut() {
            for seq in ["posts", "chat"] {
                if let Some(Value::Array(entries)) = channel.get_mut(seq) {
                    entries.iter_mut().for_each(normalize_likes);
                }
            }
        }
    }

    Ok(())
}

fn normalize_likes(entry: &mut Value) {
    if let Some(obj) = entry.as_object_mut() {
        if !matches!(obj.get("likes"), Some(Value::Array(_)) | None) {
            obj.insert("likes".into(), Value::Array(Vec::new()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_layout_is_upgraded() {
        let mut doc = json!({
            "users": {},
            "calls": { "c1": { "from": "a", "to": "b" } },
            "groupCalls": { "g1": { "id": "x", "groupId": "g1", "participants": ["a"] } },
            "nftMarket": [],
            "channels": {
                "ch": { "posts": [{ "id": "p", "likes": 0 }], "chat": [{ "id": "m", "likes": ["a"] }] }
            }
        });
        up(doc.as_object_mut().unwrap()).unwrap();

        assert!(doc.get("calls").is_none());
        assert!(doc.get("nftMarket").is_none());
        assert!(doc.get("groupCalls").is_none());
        assert_eq!(doc["group_calls"]["g1"]["participants"][0], "a");
        assert!(doc["sessions"].is_object());
        assert!(doc["messages"].is_object());
        assert_eq!(doc["channels"]["ch"]["posts"][0]["likes"], json!([]));
        assert_eq!(doc["channels"]["ch"]["chat"][0]["likes"], json!(["a"]));
    }
}
