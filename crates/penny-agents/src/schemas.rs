//! Structured-output schemas for LLM calls.
//!
//! Each structured call declares an explicit JSON schema and parses the wire
//! response with the matching serde type. Missing or malformed output fails
//! soft: the caller gets an empty result and a WARN log, and marks its input
//! processed anyway so it isn't retried forever.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;

/// Parse a structured LLM response, returning `None` (with a WARN) on empty
/// or malformed content.
pub fn parse_structured<T: DeserializeOwned>(label: &str, content: &str) -> Option<T> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        warn!(call = label, "empty structured LLM response");
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(call = label, "malformed structured LLM response: {e}");
            None
        }
    }
}

/// Pass 1: which known and new entities appear in the text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentifiedEntities {
    #[serde(default)]
    pub known: Vec<String>,
    #[serde(default)]
    pub new: Vec<IdentifiedNewEntity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentifiedNewEntity {
    pub name: String,
}

impl IdentifiedEntities {
    pub fn is_empty(&self) -> bool {
        self.known.is_empty() && self.new.is_empty()
    }

    pub fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "known": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Names of already-known entities that appear in this text"
                },
                "new": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": {
                                "type": "string",
                                "description": "Entity name (e.g., 'KEF LS50 Meta', 'NVIDIA Jetson')"
                            }
                        },
                        "required": ["name"]
                    },
                    "description": "New entities found in this text (not in the known list)"
                }
            },
            "required": ["known", "new"]
        })
    }
}

/// Pass 2: new facts about a single entity.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedFacts {
    #[serde(default)]
    pub facts: Vec<String>,
}

impl ExtractedFacts {
    pub fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "facts": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "NEW specific, verifiable facts about the entity from the text"
                }
            },
            "required": ["facts"]
        })
    }
}

/// Newly discovered preference topics for one valence.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedTopics {
    #[serde(default)]
    pub topics: Vec<String>,
}

impl ExtractedTopics {
    pub fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "topics": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "List of new topics found (short phrases, 1-4 words each)"
                }
            },
            "required": ["topics"]
        })
    }
}

/// Related entities found in enrichment search results.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveredEntities {
    #[serde(default)]
    pub entities: Vec<DiscoveredEntity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveredEntity {
    pub name: String,
    #[serde(default)]
    pub tagline: String,
}

impl DiscoveredEntities {
    pub fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "entities": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string" },
                            "tagline": {
                                "type": "string",
                                "description": "Short 3-8 word description of what the entity is"
                            }
                        },
                        "required": ["name"]
                    }
                }
            },
            "required": ["entities"]
        })
    }
}

/// Topic tags extracted from an event headline (relevance fallback).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeadlineTags {
    #[serde(default)]
    pub tags: Vec<String>,
}

impl HeadlineTags {
    pub fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "tags": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "2-4 short topic tags for the headline"
                }
            },
            "required": ["tags"]
        })
    }
}
