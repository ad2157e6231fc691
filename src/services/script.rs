use crate::core::state::{name_key, Character, ChunkCharacter, ScriptChunk, ScriptRow};
use crate::services::resolver::ImageMap;
use crate::utils::normalize::value_text;
use serde_json::Value;

const TIME_FIELDS: [&str; 3] = ["time", "t", "timecode"];
const AUDIO_FIELDS: [&str; 2] = ["audio", "voice"];
const VISUAL_FIELDS: [&str; 2] = ["visuals", "action"];

fn first_text(row: &ScriptRow, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .find_map(|f| row.get(f).and_then(value_text))
}

fn image_for(images: &ImageMap, key: &str) -> Option<String> {
    images.get(key).cloned().flatten()
}

/// Per-row character override. A JSON string is parsed; anything that does
/// not end up as a non-empty array means "no override".
fn row_characters(row: &ScriptRow) -> Option<Vec<Value>> {
    let parsed = match row.get("characters")? {
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(v) => v,
            Err(e) => {
                log::debug!("Ignoring unparseable characters cell: {}", e);
                return None;
            }
        },
        other => other.clone(),
    };
    match parsed {
        Value::Array(items) if !items.is_empty() => Some(items),
        _ => None,
    }
}

fn override_character(item: &Value, selected: &[Character], images: &ImageMap) -> ChunkCharacter {
    let name = match item.get("name") {
        Some(v) if !v.is_null() => value_text(v).unwrap_or_default(),
        _ => value_text(item).unwrap_or_default(),
    };
    let name = name.trim().to_string();
    let key = name_key(Some(&name));

    let description = item
        .get("description")
        .and_then(value_text)
        .or_else(|| {
            selected
                .iter()
                .find(|c| c.name_key() == key)
                .and_then(|c| c.description.clone())
        });

    ChunkCharacter {
        image: image_for(images, &key),
        name,
        description,
    }
}

/// The top-level `characters` list of a video request: every selected
/// character with its resolved image.
pub fn build_enriched_characters(selected: &[Character], images: &ImageMap) -> Vec<ChunkCharacter> {
    selected
        .iter()
        .map(|c| ChunkCharacter {
            name: c.display_name().to_string(),
            description: c.description.clone(),
            image: image_for(images, &c.name_key()),
        })
        .collect()
}

/// Merges edited rows with the selected characters and their resolved
/// images into video-generation chunks.
pub fn build_script_chunks(
    rows: &[ScriptRow],
    selected: &[Character],
    images: &ImageMap,
    default_time: &str,
) -> Vec<ScriptChunk> {
    rows.iter()
        .map(|row| {
            let characters = match row_characters(row) {
                Some(items) => items
                    .iter()
                    .map(|item| override_character(item, selected, images))
                    .collect(),
                None => build_enriched_characters(selected, images),
            };

            ScriptChunk {
                time: first_text(row, &TIME_FIELDS).unwrap_or_else(|| default_time.to_string()),
                audio: first_text(row, &AUDIO_FIELDS),
                visuals: first_text(row, &VISUAL_FIELDS),
                characters,
            }
        })
        .collect()
}

// --- Row editing ---

pub fn add_row(rows: &mut Vec<ScriptRow>) {
    let blank = match rows.first() {
        Some(first) => first.blank_like(),
        None => ScriptRow::single("value", Value::String(String::new())),
    };
    rows.push(blank);
}

pub fn delete_row(rows: &mut Vec<ScriptRow>, index: usize) -> bool {
    if index < rows.len() {
        rows.remove(index);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::normalize::normalize_script_response;
    use serde_json::json;

    fn selected() -> Vec<Character> {
        vec![
            Character {
                name: Some("Ana".to_string()),
                description: Some("tall".to_string()),
                ..Default::default()
            },
            Character {
                name: Some("Bo".to_string()),
                description: Some("short".to_string()),
                ..Default::default()
            },
        ]
    }

    fn images() -> ImageMap {
        let mut map = ImageMap::new();
        map.insert("ana".to_string(), Some("X".to_string()));
        map.insert("bo".to_string(), None);
        map
    }

    fn row(value: Value) -> ScriptRow {
        ScriptRow::from_map(value.as_object().cloned().unwrap())
    }

    #[test]
    fn test_string_encoded_characters_are_resolved() {
        let rows = normalize_script_response(json!({
            "script": [{ "time": "0-4s", "audio": "Hello", "characters": "[{\"name\":\"Ana\"}]" }]
        }));
        let chunks = build_script_chunks(&rows, &selected(), &images(), "0-8seconds");

        assert_eq!(
            chunks,
            vec![ScriptChunk {
                time: "0-4s".to_string(),
                audio: Some("Hello".to_string()),
                visuals: None,
                characters: vec![ChunkCharacter {
                    name: "Ana".to_string(),
                    description: Some("tall".to_string()),
                    image: Some("X".to_string()),
                }],
            }]
        );
    }

    #[test]
    fn test_missing_characters_default_to_selection_in_order() {
        let chunks = build_script_chunks(
            &[row(json!({ "visuals": "rain" }))],
            &selected(),
            &images(),
            "0-8seconds",
        );
        assert_eq!(chunks[0].time, "0-8seconds");
        assert_eq!(chunks[0].visuals.as_deref(), Some("rain"));
        assert_eq!(chunks[0].characters, build_enriched_characters(&selected(), &images()));
        let names: Vec<_> = chunks[0].characters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Ana", "Bo"]);
    }

    #[test]
    fn test_unparseable_characters_fall_back() {
        let rows = vec![
            row(json!({ "time": "0-4s", "characters": "[{\"name\": Ana" })),
            row(json!({ "time": "4-8s", "characters": [] })),
            row(json!({ "time": "8-12s", "characters": "{\"name\":\"Ana\"}" })),
        ];
        let chunks = build_script_chunks(&rows, &selected(), &images(), "0-8seconds");
        for chunk in chunks {
            assert_eq!(chunk.characters.len(), 2, "chunk {} should use the selection", chunk.time);
        }
    }

    #[test]
    fn test_alternate_field_names_and_overrides() {
        let rows = vec![row(json!({
            "t": 3,
            "voice": "Run!",
            "action": "chase",
            "characters": [
                { "name": " bo ", "description": "in a hurry" },
                "Ana",
                { "name": "Zed" }
            ]
        }))];
        let chunks = build_script_chunks(&rows, &selected(), &images(), "0-8seconds");
        let chunk = &chunks[0];

        assert_eq!(chunk.time, "3");
        assert_eq!(chunk.audio.as_deref(), Some("Run!"));
        assert_eq!(chunk.visuals.as_deref(), Some("chase"));

        assert_eq!(chunk.characters[0].name, "bo");
        assert_eq!(chunk.characters[0].description.as_deref(), Some("in a hurry"));
        assert_eq!(chunk.characters[0].image, None);

        assert_eq!(chunk.characters[1].name, "Ana");
        assert_eq!(chunk.characters[1].description.as_deref(), Some("tall"));
        assert_eq!(chunk.characters[1].image.as_deref(), Some("X"));

        assert_eq!(chunk.characters[2].name, "Zed");
        assert_eq!(chunk.characters[2].description, None);
    }

    #[test]
    fn test_null_time_uses_next_field() {
        let chunks = build_script_chunks(
            &[row(json!({ "time": null, "timecode": "00:04" }))],
            &[],
            &ImageMap::new(),
            "0-8seconds",
        );
        assert_eq!(chunks[0].time, "00:04");
        assert!(chunks[0].characters.is_empty());
    }

    #[test]
    fn test_add_and_delete_rows() {
        let mut rows = Vec::new();
        add_row(&mut rows);
        assert_eq!(rows, vec![ScriptRow::single("value", json!(""))]);

        let mut rows = vec![row(json!({ "time": "0-4s", "audio": "Hi" }))];
        add_row(&mut rows);
        assert_eq!(rows[1], row(json!({ "time": "", "audio": "" })));

        assert!(delete_row(&mut rows, 0));
        assert!(!delete_row(&mut rows, 5));
        assert_eq!(rows.len(), 1);
    }
}
