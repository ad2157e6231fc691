use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum CharacterId {
    Number(i64),
    Text(String),
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct Character {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CharacterId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Absolute URL, backend-relative path, or data URL.
    #[serde(default)]
    pub image: Option<String>,
}

/// Lower-cased, trimmed name. Every cross-stage lookup goes through this.
pub fn name_key(name: Option<&str>) -> String {
    name.unwrap_or("").trim().to_lowercase()
}

impl Character {
    pub fn name_key(&self) -> String {
        name_key(self.name.as_deref())
    }

    /// Identity used by the selection set: the id when present, else the name key.
    pub fn selection_key(&self) -> String {
        match &self.id {
            Some(id) => id.to_string(),
            None => self.name_key(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

/// A character as it appears inside a script chunk or video request.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct ChunkCharacter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ScriptChunk {
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visuals: Option<String>,
    #[serde(default)]
    pub characters: Vec<ChunkCharacter>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Clip {
    pub time: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Start image attached to a script request; doubles as the video's first frame.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Attachment {
    pub name: String,
    #[serde(rename = "type")]
    pub mime: String,
    #[serde(rename = "dataUrl")]
    pub data_url: String,
}

/// One editable row of a generated script, columns kept in response order.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct ScriptRow(pub Map<String, Value>);

impl ScriptRow {
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn single(column: &str, value: Value) -> Self {
        let mut map = Map::new();
        map.insert(column.to_string(), value);
        Self(map)
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn columns(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    /// Text shown in an editor for `column`. Nested values are pretty JSON.
    pub fn cell_text(&self, column: &str) -> String {
        match self.0.get(column) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(v @ (Value::Object(_) | Value::Array(_))) => {
                serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
            }
            Some(v) => v.to_string(),
        }
    }

    /// Commits edited text. Nested cells are re-parsed and keep the raw text
    /// when it is not valid JSON; scalar cells always store the text.
    pub fn set_cell_text(&mut self, column: &str, text: &str) {
        let nested = matches!(
            self.0.get(column),
            Some(Value::Object(_) | Value::Array(_))
        );
        let value = if nested {
            match serde_json::from_str::<Value>(text) {
                Ok(parsed) => parsed,
                Err(e) => {
                    log::debug!("Cell '{}' kept as text: {}", column, e);
                    Value::String(text.to_string())
                }
            }
        } else {
            Value::String(text.to_string())
        };
        self.0.insert(column.to_string(), value);
    }

    /// Same columns, every cell blank.
    pub fn blank_like(&self) -> Self {
        Self(
            self.0
                .keys()
                .map(|k| (k.clone(), Value::String(String::new())))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    Added,
    Removed,
    LimitReached,
    /// Another selected character already has the same name key.
    DuplicateName,
}

/// Ordered set of selection keys with a hard cap.
#[derive(Debug, Clone)]
pub struct Selection {
    keys: Vec<String>,
    max: usize,
}

impl Selection {
    pub fn new(max: usize) -> Self {
        Self {
            keys: Vec::new(),
            max,
        }
    }

    pub fn toggle(&mut self, key: &str) -> SelectionOutcome {
        if let Some(pos) = self.keys.iter().position(|k| k == key) {
            self.keys.remove(pos);
            return SelectionOutcome::Removed;
        }
        if self.keys.len() >= self.max {
            return SelectionOutcome::LimitReached;
        }
        self.keys.push(key.to_string());
        SelectionOutcome::Added
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn retain(&mut self, f: impl FnMut(&String) -> bool) {
        self.keys.retain(f);
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }
}
