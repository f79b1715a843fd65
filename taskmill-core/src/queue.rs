//! Queue operations over the persisted feature list.
//!
//! Every operation follows the same shape: load the full list, resolve
//! the target, mutate, persist. There is exactly one writer per project
//! directory and no locking; saves replace the whole document.
//!
//! Domain sentinels vs errors: an id that does not resolve, or a mutation
//! attempted on an already-passing feature, comes back as `None`. Only
//! real I/O failures surface as `Err`.

use crate::error::Result;
use crate::feature::{validate_features, Feature, NewFeature, ValidationIssue};
use crate::store::FeatureStore;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::path::Path;

/// Progress statistics for a feature list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    /// Number of features with `passes == true`.
    pub passing: usize,
    /// Number of features currently flagged in-progress.
    pub in_progress: usize,
    /// Total number of features.
    pub total: usize,
    /// Passing share as a percentage, rounded to one decimal place.
    /// `0.0` for an empty list.
    pub percentage: f64,
}

/// Receipt returned by [`FeatureQueue::skip`].
#[derive(Debug, Clone, Serialize)]
pub struct SkipReceipt {
    /// The id the caller asked to skip.
    pub id: u64,
    /// Description (or name) of the skipped feature.
    pub description: String,
    /// Human-readable confirmation.
    pub message: String,
}

/// All queue operations, built atop a [`FeatureStore`].
///
/// Features are addressed two ways at once: by their explicit `id` field,
/// and, for simple-form lists, by raw array position. Resolution tries
/// the explicit id first (first match wins) and falls back to treating the
/// id as a bounds-checked position.
#[derive(Debug, Clone)]
pub struct FeatureQueue {
    store: FeatureStore,
}

/// Resolve a feature id to an array position.
///
/// Explicit `id` fields take precedence; otherwise the id is used as a
/// position if it is in bounds. `None` means the id does not resolve
/// either way.
fn resolve(features: &[Feature], id: u64) -> Option<usize> {
    if let Some(position) = features.iter().position(|f| f.id == Some(id)) {
        return Some(position);
    }
    let position = id as usize;
    if position < features.len() {
        Some(position)
    } else {
        None
    }
}

impl FeatureQueue {
    /// Create a queue over the feature list inside `project_dir`.
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self {
            store: FeatureStore::new(project_dir),
        }
    }

    /// Create a queue over an existing store handle.
    pub fn from_store(store: FeatureStore) -> Self {
        Self { store }
    }

    /// The underlying store handle.
    pub fn store(&self) -> &FeatureStore {
        &self.store
    }

    /// Progress statistics for the current list.
    pub fn stats(&self) -> QueueStats {
        let features = self.store.load();
        let total = features.len();
        let passing = features.iter().filter(|f| f.passes).count();
        let in_progress = features.iter().filter(|f| f.is_in_progress()).count();
        let percentage = if total > 0 {
            (passing as f64 / total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };

        QueueStats {
            passing,
            in_progress,
            total,
            percentage,
        }
    }

    /// The next feature to work on: the first one in physical order that
    /// does not pass, with its id synthesized from its position when the
    /// record carries none. `None` when every feature passes.
    pub fn next(&self) -> Option<Feature> {
        let features = self.store.load();
        features.iter().enumerate().find_map(|(position, f)| {
            if f.passes {
                return None;
            }
            let mut feature = f.clone();
            feature.id = Some(feature.effective_id(position));
            Some(feature)
        })
    }

    /// Look up a feature by id (explicit field first, array position as
    /// fallback). Positional hits get the requested id synthesized in.
    pub fn get(&self, id: u64) -> Option<Feature> {
        let features = self.store.load();
        let position = resolve(&features, id)?;
        let mut feature = features[position].clone();
        if feature.id.is_none() {
            feature.id = Some(id);
        }
        Some(feature)
    }

    /// Mark a feature as passing.
    ///
    /// Clears the in-progress flag only when that field already exists on
    /// the record; it is never introduced here. Returns the updated
    /// record, or `None` if the id does not resolve.
    pub fn mark_passing(&self, id: u64) -> Result<Option<Feature>> {
        let mut features = self.store.load();
        let Some(position) = resolve(&features, id) else {
            return Ok(None);
        };

        features[position].passes = true;
        if features[position].in_progress.is_some() {
            features[position].in_progress = Some(false);
        }
        let updated = features[position].clone();
        self.store.save(&features)?;
        Ok(Some(updated))
    }

    /// Flag a feature as being worked on.
    ///
    /// Returns `None` if the id does not resolve or the feature already
    /// passes. Passing features cannot re-enter progress.
    pub fn mark_in_progress(&self, id: u64) -> Result<Option<Feature>> {
        let mut features = self.store.load();
        let Some(position) = resolve(&features, id) else {
            return Ok(None);
        };
        if features[position].passes {
            return Ok(None);
        }

        features[position].in_progress = Some(true);
        let updated = features[position].clone();
        self.store.save(&features)?;
        Ok(Some(updated))
    }

    /// Unconditionally clear the in-progress flag, creating the field when
    /// the record had none. Returns `None` if the id does not resolve.
    pub fn clear_in_progress(&self, id: u64) -> Result<Option<Feature>> {
        let mut features = self.store.load();
        let Some(position) = resolve(&features, id) else {
            return Ok(None);
        };

        features[position].in_progress = Some(false);
        let updated = features[position].clone();
        self.store.save(&features)?;
        Ok(Some(updated))
    }

    /// Move a feature to the back of the queue.
    ///
    /// The feature is removed from its current position, its in-progress
    /// flag cleared, and appended at the end; the relative order of every
    /// other feature is preserved. This is the only reordering mechanism.
    /// Returns `None` if the id does not resolve or the feature already
    /// passes.
    pub fn skip(&self, id: u64) -> Result<Option<SkipReceipt>> {
        let mut features = self.store.load();
        let Some(position) = resolve(&features, id) else {
            return Ok(None);
        };
        if features[position].passes {
            return Ok(None);
        }

        let mut feature = features.remove(position);
        feature.in_progress = Some(false);
        let description = feature.display_text().to_string();
        features.push(feature);
        self.store.save(&features)?;

        Ok(Some(SkipReceipt {
            id,
            description,
            message: "feature moved to the end of the queue".to_string(),
        }))
    }

    /// Record a validation attempt against a feature.
    ///
    /// Increments `attempt_count`; a provided error message overwrites
    /// `last_error`. No cap is enforced here; the validation loop owns
    /// the cap. Returns `None` if the id does not resolve.
    pub fn increment_attempt(&self, id: u64, error: Option<&str>) -> Result<Option<Feature>> {
        let mut features = self.store.load();
        let Some(position) = resolve(&features, id) else {
            return Ok(None);
        };

        features[position].attempt_count += 1;
        if let Some(error) = error {
            features[position].last_error = Some(error.to_string());
        }
        let updated = features[position].clone();
        self.store.save(&features)?;
        Ok(Some(updated))
    }

    /// Append a batch of new features to the queue.
    ///
    /// Each record is assigned a fresh id and priority, starting one past
    /// the current maxima and incrementing per item in input order. Returns
    /// the number of features created.
    pub fn create_bulk(&self, items: &[NewFeature]) -> Result<usize> {
        let mut features = self.store.load();

        let max_id = features.iter().filter_map(|f| f.id).max().unwrap_or(0);
        let max_priority = features
            .iter()
            .filter_map(|f| f.priority)
            .max()
            .unwrap_or(0);

        for (offset, item) in items.iter().enumerate() {
            let id = max_id + offset as u64 + 1;
            features.push(Feature {
                id: Some(id),
                priority: Some(max_priority + offset as u64 + 1),
                category: item
                    .category
                    .clone()
                    .unwrap_or_else(|| "general".to_string()),
                name: Some(
                    item.name
                        .clone()
                        .unwrap_or_else(|| format!("Feature {id}")),
                ),
                description: item.description.clone(),
                steps: item.steps.clone(),
                passes: false,
                in_progress: Some(false),
                attempt_count: 0,
                last_error: None,
            });
        }

        self.store.save(&features)?;
        Ok(items.len())
    }

    /// A random sample of passing features for regression checks.
    ///
    /// Returns `min(limit, passing_count)` features drawn uniformly
    /// without replacement; empty when nothing passes.
    pub fn for_regression(&self, limit: usize) -> Vec<Feature> {
        let features = self.store.load();
        let passing: Vec<&Feature> = features.iter().filter(|f| f.passes).collect();

        let mut rng = rand::thread_rng();
        passing
            .choose_multiple(&mut rng, limit)
            .map(|f| (*f).clone())
            .collect()
    }

    /// Whether the feature list document exists on disk.
    pub fn exists(&self) -> bool {
        self.store.exists()
    }

    /// Whether the queue is non-empty and every feature passes.
    pub fn is_complete(&self) -> bool {
        let features = self.store.load();
        !features.is_empty() && features.iter().all(|f| f.passes)
    }

    /// Check every stored record for well-formedness.
    ///
    /// Uses the strict loading path: a corrupt store is reported as an
    /// error rather than silently validated as empty.
    pub fn validate(&self) -> Result<Vec<ValidationIssue>> {
        let features = self.store.try_load()?;
        Ok(validate_features(&features))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn queue_with(features: Vec<Feature>) -> (TempDir, FeatureQueue) {
        let dir = TempDir::new().unwrap();
        let queue = FeatureQueue::new(dir.path());
        queue.store().save(&features).unwrap();
        (dir, queue)
    }

    fn simple(description: &str, passes: bool) -> Feature {
        Feature {
            passes,
            ..Feature::new(description, vec!["step 1".to_string()])
        }
    }

    fn with_id(id: u64, description: &str, passes: bool) -> Feature {
        Feature {
            id: Some(id),
            priority: Some(id),
            passes,
            ..Feature::new(description, vec!["step 1".to_string()])
        }
    }

    #[test]
    fn test_stats_mixed_list() {
        let (_dir, queue) = queue_with(vec![simple("A", false), simple("B", true)]);

        let stats = queue.stats();
        assert_eq!(stats.passing, 1);
        assert_eq!(stats.in_progress, 0);
        assert_eq!(stats.total, 2);
        assert!((stats.percentage - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stats_empty_list() {
        let (_dir, queue) = queue_with(vec![]);

        let stats = queue.stats();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.percentage, 0.0);
    }

    #[test]
    fn test_stats_percentage_rounds_to_one_decimal() {
        let (_dir, queue) = queue_with(vec![
            simple("A", true),
            simple("B", false),
            simple("C", false),
        ]);

        // 1/3 = 33.333... -> 33.3
        assert!((queue.stats().percentage - 33.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_next_returns_first_pending_with_synthesized_id() {
        let (_dir, queue) = queue_with(vec![simple("A", false), simple("B", true)]);

        let next = queue.next().unwrap();
        assert_eq!(next.description, "A");
        assert_eq!(next.id, Some(0));

        // Reading must not mutate the store
        let stored = queue.store().load();
        assert_eq!(stored[0].id, None);
    }

    #[test]
    fn test_next_skips_passing_prefix() {
        let (_dir, queue) = queue_with(vec![
            simple("A", true),
            simple("B", false),
            simple("C", false),
        ]);

        let next = queue.next().unwrap();
        assert_eq!(next.description, "B");
        assert_eq!(next.id, Some(1));
    }

    #[test]
    fn test_next_none_when_all_pass() {
        let (_dir, queue) = queue_with(vec![simple("A", true)]);
        assert!(queue.next().is_none());
    }

    #[test]
    fn test_get_prefers_explicit_id_over_position() {
        // Explicit id 0 sits at position 1; a lookup for 0 must find it,
        // not the record at position 0.
        let (_dir, queue) = queue_with(vec![with_id(7, "at zero", false), with_id(0, "B", false)]);

        let found = queue.get(0).unwrap();
        assert_eq!(found.description, "B");
    }

    #[test]
    fn test_get_falls_back_to_position() {
        let (_dir, queue) = queue_with(vec![simple("A", false), simple("B", false)]);

        let found = queue.get(1).unwrap();
        assert_eq!(found.description, "B");
        assert_eq!(found.id, Some(1));
    }

    #[test]
    fn test_get_out_of_bounds_is_none() {
        let (_dir, queue) = queue_with(vec![simple("A", false)]);
        assert!(queue.get(5).is_none());
    }

    #[test]
    fn test_mark_passing_sets_flag() {
        let (_dir, queue) = queue_with(vec![with_id(1, "A", false)]);

        let updated = queue.mark_passing(1).unwrap().unwrap();
        assert!(updated.passes);
        assert!(queue.get(1).unwrap().passes);
    }

    #[test]
    fn test_mark_passing_clears_existing_in_progress() {
        let mut feature = with_id(1, "A", false);
        feature.in_progress = Some(true);
        let (_dir, queue) = queue_with(vec![feature]);

        let updated = queue.mark_passing(1).unwrap().unwrap();
        assert_eq!(updated.in_progress, Some(false));
    }

    #[test]
    fn test_mark_passing_does_not_introduce_in_progress() {
        let (_dir, queue) = queue_with(vec![simple("A", false)]);

        let updated = queue.mark_passing(0).unwrap().unwrap();
        assert_eq!(updated.in_progress, None);

        let stored = queue.store().load();
        assert_eq!(stored[0].in_progress, None);
    }

    #[test]
    fn test_mark_passing_unknown_id_is_none() {
        let (_dir, queue) = queue_with(vec![simple("A", false)]);
        assert!(queue.mark_passing(9).unwrap().is_none());
    }

    #[test]
    fn test_mark_in_progress_sets_flag() {
        let (_dir, queue) = queue_with(vec![simple("A", false)]);

        let updated = queue.mark_in_progress(0).unwrap().unwrap();
        assert_eq!(updated.in_progress, Some(true));
    }

    #[test]
    fn test_mark_in_progress_rejects_passing_feature() {
        let (_dir, queue) = queue_with(vec![simple("A", true)]);
        assert!(queue.mark_in_progress(0).unwrap().is_none());
    }

    #[test]
    fn test_clear_in_progress_creates_field() {
        let (_dir, queue) = queue_with(vec![simple("A", false)]);

        let updated = queue.clear_in_progress(0).unwrap().unwrap();
        assert_eq!(updated.in_progress, Some(false));
    }

    #[test]
    fn test_skip_moves_to_end_preserving_order() {
        let (_dir, queue) = queue_with(vec![
            with_id(1, "A", false),
            with_id(2, "B", false),
            with_id(3, "C", false),
        ]);

        let receipt = queue.skip(1).unwrap().unwrap();
        assert_eq!(receipt.id, 1);
        assert_eq!(receipt.description, "A");

        let stored = queue.store().load();
        let order: Vec<&str> = stored.iter().map(|f| f.description.as_str()).collect();
        assert_eq!(order, vec!["B", "C", "A"]);
        assert_eq!(stored[2].in_progress, Some(false));
    }

    #[test]
    fn test_skip_passing_feature_is_none() {
        let (_dir, queue) = queue_with(vec![with_id(1, "A", true), with_id(2, "B", false)]);

        assert!(queue.skip(1).unwrap().is_none());

        let stored = queue.store().load();
        assert_eq!(stored[0].description, "A");
    }

    #[test]
    fn test_increment_attempt_counts_up() {
        let (_dir, queue) = queue_with(vec![with_id(1, "A", false)]);

        queue.increment_attempt(1, None).unwrap().unwrap();
        let updated = queue.increment_attempt(1, None).unwrap().unwrap();
        assert_eq!(updated.attempt_count, 2);
        assert_eq!(updated.last_error, None);
    }

    #[test]
    fn test_increment_attempt_overwrites_last_error() {
        let (_dir, queue) = queue_with(vec![with_id(1, "A", false)]);

        queue.increment_attempt(1, Some("first failure")).unwrap();
        let updated = queue
            .increment_attempt(1, Some("second failure"))
            .unwrap()
            .unwrap();
        assert_eq!(updated.last_error.as_deref(), Some("second failure"));
    }

    #[test]
    fn test_increment_attempt_without_error_keeps_previous() {
        let (_dir, queue) = queue_with(vec![with_id(1, "A", false)]);

        queue.increment_attempt(1, Some("boom")).unwrap();
        let updated = queue.increment_attempt(1, None).unwrap().unwrap();
        assert_eq!(updated.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_create_bulk_assigns_increasing_ids() {
        let (_dir, queue) = queue_with(vec![with_id(4, "existing", true)]);

        let created = queue
            .create_bulk(&[
                NewFeature {
                    category: Some("ui".to_string()),
                    name: Some("First new".to_string()),
                    description: "Build the first thing".to_string(),
                    steps: vec!["step".to_string()],
                },
                NewFeature {
                    category: None,
                    name: None,
                    description: "Build the second thing".to_string(),
                    steps: vec!["step".to_string()],
                },
            ])
            .unwrap();
        assert_eq!(created, 2);

        let stored = queue.store().load();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[1].id, Some(5));
        assert_eq!(stored[2].id, Some(6));
        assert_eq!(stored[1].priority, Some(5));
        assert_eq!(stored[2].category, "general");
        assert_eq!(stored[2].name.as_deref(), Some("Feature 6"));
        assert!(!stored[1].passes);
        assert_eq!(stored[1].in_progress, Some(false));
        assert_eq!(stored[1].attempt_count, 0);
    }

    #[test]
    fn test_create_bulk_on_empty_store_starts_at_one() {
        let (_dir, queue) = queue_with(vec![]);

        queue
            .create_bulk(&[NewFeature {
                category: None,
                name: None,
                description: "X".to_string(),
                steps: vec!["s".to_string()],
            }])
            .unwrap();

        let stored = queue.store().load();
        assert_eq!(stored[0].id, Some(1));
        assert_eq!(stored[0].priority, Some(1));
    }

    #[test]
    fn test_for_regression_samples_only_passing() {
        let (_dir, queue) = queue_with(vec![
            with_id(1, "A", true),
            with_id(2, "B", false),
            with_id(3, "C", true),
            with_id(4, "D", true),
        ]);

        let sample = queue.for_regression(2);
        assert_eq!(sample.len(), 2);
        for f in &sample {
            assert!(f.passes);
        }
    }

    #[test]
    fn test_for_regression_limit_exceeds_passing_count() {
        let (_dir, queue) = queue_with(vec![with_id(1, "A", true), with_id(2, "B", false)]);

        let sample = queue.for_regression(10);
        assert_eq!(sample.len(), 1);
        assert_eq!(sample[0].description, "A");
    }

    #[test]
    fn test_for_regression_empty_when_none_pass() {
        let (_dir, queue) = queue_with(vec![simple("A", false)]);
        assert!(queue.for_regression(3).is_empty());
    }

    #[test]
    fn test_is_complete() {
        let (_dir, queue) = queue_with(vec![]);
        assert!(!queue.is_complete());

        queue.store().save(&[simple("A", true)]).unwrap();
        assert!(queue.is_complete());

        queue
            .store()
            .save(&[simple("A", true), simple("B", false)])
            .unwrap();
        assert!(!queue.is_complete());
    }

    #[test]
    fn test_exists_tracks_store_file() {
        let dir = TempDir::new().unwrap();
        let queue = FeatureQueue::new(dir.path());
        assert!(!queue.exists());

        queue.store().save(&[]).unwrap();
        assert!(queue.exists());
    }

    #[test]
    fn test_validate_reports_malformed_records() {
        let (_dir, queue) = queue_with(vec![simple("ok", false), Feature::new("", vec![])]);

        let issues = queue.validate().unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].index, 1);
    }
}
