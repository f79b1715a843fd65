//! Feature record types.
//!
//! A feature is one backlog item: a unit of implementation work plus the
//! ordered acceptance steps the validation loop walks through. Feature
//! lists are stored as a JSON array and come in two shapes: a simple
//! hand-written form (`category`/`description`/`steps`/`passes`) where the
//! array position serves as the implicit id, and an enriched form where
//! `id` and `priority` are explicit. Optional fields are skipped on
//! serialization so simple-form lists round-trip unchanged.

use serde::{Deserialize, Serialize};

fn default_category() -> String {
    "general".to_string()
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// A single feature in the backlog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    /// Explicit identifier. Absent in simple-form lists, where the array
    /// position is the id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    /// Ordering hint assigned at creation. The physical order of the list
    /// is what actually defines serving order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u64>,

    /// Feature category (e.g. "ui", "api", "general").
    #[serde(default = "default_category")]
    pub category: String,

    /// Short human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// What needs to be built. Required and non-empty for a well-formed
    /// record.
    #[serde(default)]
    pub description: String,

    /// Ordered acceptance steps. Required and non-empty for a well-formed
    /// record.
    #[serde(default)]
    pub steps: Vec<String>,

    /// Whether the feature has been implemented and validated.
    #[serde(default)]
    pub passes: bool,

    /// Whether the feature is currently being worked on. `None` means the
    /// field is absent from the record; `mark_passing` only clears this
    /// flag when the field already exists, so presence is preserved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_progress: Option<bool>,

    /// Number of validation attempts made so far.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub attempt_count: u32,

    /// Error message from the most recent failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Default for Feature {
    fn default() -> Self {
        Self {
            id: None,
            priority: None,
            category: default_category(),
            name: None,
            description: String::new(),
            steps: Vec::new(),
            passes: false,
            in_progress: None,
            attempt_count: 0,
            last_error: None,
        }
    }
}

impl Feature {
    /// Create a minimal feature with the given description and steps.
    pub fn new(description: impl Into<String>, steps: Vec<String>) -> Self {
        Self {
            description: description.into(),
            steps,
            ..Self::default()
        }
    }

    /// The id this feature answers to: the explicit `id` field when
    /// present, otherwise its array position.
    pub fn effective_id(&self, position: usize) -> u64 {
        self.id.unwrap_or(position as u64)
    }

    /// Whether the feature is currently flagged as being worked on.
    pub fn is_in_progress(&self) -> bool {
        self.in_progress.unwrap_or(false)
    }

    /// The text used when naming this feature in receipts and logs:
    /// the description, falling back to the name.
    pub fn display_text(&self) -> &str {
        if !self.description.is_empty() {
            &self.description
        } else {
            self.name.as_deref().unwrap_or("")
        }
    }

    /// Check this record for well-formedness problems.
    ///
    /// Returns an empty vec for a valid record. Validation is advisory:
    /// queue operations work on malformed records too.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.description.is_empty() {
            errors.push("description is missing or empty".to_string());
        }
        if self.steps.is_empty() {
            errors.push("steps are missing or empty".to_string());
        }
        errors
    }
}

/// Input record for bulk feature creation.
///
/// Ids, priorities, and bookkeeping flags are assigned by the queue;
/// callers supply only the content fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFeature {
    /// Feature category; defaults to "general" when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Short human-readable name; defaults to "Feature {id}" when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// What needs to be built.
    #[serde(default)]
    pub description: String,

    /// Ordered acceptance steps.
    #[serde(default)]
    pub steps: Vec<String>,
}

/// A validation problem found in a stored feature list.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    /// Array position of the offending record.
    pub index: usize,
    /// Excerpt of the record's description, for identification.
    pub description: String,
    /// The problems found.
    pub errors: Vec<String>,
}

/// Check every record in a feature list for well-formedness.
///
/// Returns one issue per malformed record, in list order. An empty result
/// means the whole list is well-formed.
pub fn validate_features(features: &[Feature]) -> Vec<ValidationIssue> {
    features
        .iter()
        .enumerate()
        .filter_map(|(index, feature)| {
            let errors = feature.validate();
            if errors.is_empty() {
                None
            } else {
                Some(ValidationIssue {
                    index,
                    description: feature.description.chars().take(50).collect(),
                    errors,
                })
            }
        })
        .collect()
}
