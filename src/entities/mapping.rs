// EntityMapping - one canonical display name and the raw spellings behind it
//
// "JOHN D", "johndoe99", "John  Doe" -> "John Doe"
// Raw names compare case-insensitively with whitespace collapsed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityType {
    Person,
    Store,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "PERSON",
            EntityType::Store => "STORE",
        }
    }

    pub fn parse(value: &str) -> Option<EntityType> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PERSON" => Some(EntityType::Person),
            "STORE" => Some(EntityType::Store),
            _ => None,
        }
    }

    pub fn all() -> [EntityType; 2] {
        [EntityType::Person, EntityType::Store]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMapping {
    pub id: String,
    pub user_id: String,
    pub entity_type: EntityType,
    pub canonical_name: String,
    pub mapped_names: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EntityMapping {
    pub fn new(user_id: &str, entity_type: EntityType, canonical_name: &str, mapped_names: Vec<String>) -> Self {
        let now = Utc::now();
        EntityMapping {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            entity_type,
            canonical_name: canonical_name.trim().to_string(),
            mapped_names,
            created_at: now,
            updated_at: now,
        }
    }

    /// True if `raw` is one of this mapping's spellings
    pub fn claims(&self, raw: &str) -> bool {
        let key = normalize_name(raw);
        self.mapped_names.iter().any(|n| normalize_name(n) == key)
    }
}

/// Comparison key for raw names: trimmed, inner whitespace collapsed, lowercased
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Trim names and drop case/whitespace duplicates, keeping first spelling.
/// Fails on a blank name.
pub fn clean_names(names: &[String]) -> Result<Vec<String>, String> {
    let mut seen = std::collections::HashSet::new();
    let mut cleaned = Vec::new();
    for name in names {
        let key = normalize_name(name);
        if key.is_empty() {
            return Err("mapped names must not be blank".to_string());
        }
        if seen.insert(key) {
            cleaned.push(name.trim().to_string());
        }
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  John   DOE "), "john doe");
        assert_eq!(normalize_name("JOHN\tD"), "john d");
        assert_eq!(normalize_name("   "), "");
    }

    #[test]
    fn test_clean_names_dedups_case_insensitively() {
        let names = vec!["JOHN D".to_string(), "john  d".to_string(), "johndoe99".to_string()];
        assert_eq!(clean_names(&names).unwrap(), vec!["JOHN D", "johndoe99"]);
        assert!(clean_names(&["ok".to_string(), " ".to_string()]).is_err());
    }

    #[test]
    fn test_claims() {
        let mapping = EntityMapping::new("u1", EntityType::Person, "John Doe", vec!["JOHN D".to_string()]);
        assert!(mapping.claims("john d"));
        assert!(!mapping.claims("jane"));
    }

    #[test]
    fn test_entity_type_serde() {
        assert_eq!(serde_json::to_value(EntityType::Store).unwrap(), "STORE");
        assert_eq!(EntityType::parse("person"), Some(EntityType::Person));
        assert_eq!(EntityType::parse("bank"), None);
    }
}
