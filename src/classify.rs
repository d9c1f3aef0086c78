//! Base-OS estimation and custom-file tagging.
//!
//! Both algorithms work on bare path sets (membership at the `BASE` level,
//! the loosest filter) rather than full fingerprints:
//! - **OS estimation** scores a query image against a catalogue of reference
//!   base-OS images by the Dice coefficient over path sets and picks the
//!   arg-max.
//! - **Custom-file isolation** subtracts the estimated base OS's paths from
//!   the query's paths and buckets what remains by immediate parent
//!   directory name, approximating "installed software" tags.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::guts::{extract_guts, GutsOptions};
use crate::levels::{get_level, DEFAULT_VERSION};
use crate::notifier::Notifier;
use crate::sources::ImageSource;

/// Dice coefficient over two path sets: `2 * |a ∩ b| / (|a| + |b|)`.
///
/// The denominator is the sum of the two sizes, matching the scoring
/// convention used by the diff engine. Zero when both sets are empty.
pub fn dice_paths(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let total_count = a.len() + b.len();
    if total_count == 0 {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    2.0 * shared as f64 / total_count as f64
}

/// Path membership of an image at the `BASE` level.
pub fn file_set(
    image: &str,
    source: &dyn ImageSource,
    notifier: &Notifier,
) -> Result<BTreeSet<String>> {
    let level = get_level("BASE", DEFAULT_VERSION, &[], &[])?;
    let options = GutsOptions {
        tag_root: false,
        include_sizes: false,
    };
    let guts = extract_guts(image, source.export(image)?, &level, &options, source, notifier)?;
    Ok(guts.paths().map(str::to_string).collect())
}

/// Candidate-image similarity scores for one query image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimilarityVector {
    pub scores: BTreeMap<String, f64>,
}

impl SimilarityVector {
    /// Arg-max candidate. Ties are broken by reverse-lexicographic key
    /// ordering so the result is deterministic.
    pub fn best(&self) -> Option<(&str, f64)> {
        let mut best: Option<(&str, f64)> = None;
        for (candidate, &score) in &self.scores {
            match best {
                Some((_, best_score)) if score < best_score => {}
                // Equal scores replace the previous winner: iterating in
                // ascending key order, the greatest key wins a tie.
                _ => best = Some((candidate, score)),
            }
        }
        best
    }

    /// Candidates ranked best-first.
    pub fn ranked(&self) -> Vec<(&str, f64)> {
        let mut ranked: Vec<(&str, f64)> = self
            .scores
            .iter()
            .map(|(candidate, &score)| (candidate.as_str(), score))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.0.cmp(a.0))
        });
        ranked
    }
}

/// Catalogue of reference base-OS path sets.
#[derive(Debug, Clone, Default)]
pub struct OsCatalogue {
    sets: BTreeMap<String, BTreeSet<String>>,
}

impl OsCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a precomputed path set for a reference image.
    pub fn insert(&mut self, id: &str, paths: BTreeSet<String>) {
        self.sets.insert(id.to_string(), paths);
    }

    /// Builds the catalogue by walking each reference image once.
    pub fn from_source(
        source: &dyn ImageSource,
        ids: &[&str],
        notifier: &Notifier,
    ) -> Result<Self> {
        let mut catalogue = Self::new();
        let bar = notifier.create_progress_bar(ids.len() as u64, "Building OS catalogue");

        for (i, id) in ids.iter().enumerate() {
            catalogue.insert(id, file_set(id, source, notifier)?);
            if let Some(bar) = &bar {
                bar.inc(1);
            }
            notifier.progress((i + 1) as u64, ids.len() as u64, "reference images walked");
        }
        if let Some(bar) = &bar {
            bar.finish_and_clear();
        }
        Ok(catalogue)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }

    pub fn paths(&self, id: &str) -> Option<&BTreeSet<String>> {
        self.sets.get(id)
    }

    /// Scores the query against every catalogue entry.
    pub fn estimate(&self, query: &BTreeSet<String>) -> SimilarityVector {
        let scores = self
            .sets
            .iter()
            .map(|(id, paths)| (id.clone(), dice_paths(query, paths)))
            .collect();
        SimilarityVector { scores }
    }

    /// Most similar reference OS, or `None` for an empty catalogue.
    pub fn classify(&self, query: &BTreeSet<String>) -> Option<(String, f64)> {
        let vector = self.estimate(query);
        vector.best().map(|(id, score)| (id.to_string(), score))
    }
}

/// Paths present in the query image but absent from its base OS.
pub fn custom_files(
    query: &BTreeSet<String>,
    base: &BTreeSet<String>,
) -> BTreeSet<String> {
    query.difference(base).cloned().collect()
}

/// Buckets custom paths by immediate parent directory name; the bucket names
/// (e.g. `bin`) serve as software tags. Top-level files without a parent
/// directory are not tagged.
pub fn software_tags(custom: &BTreeSet<String>) -> BTreeMap<String, Vec<String>> {
    let mut tags: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for path in custom {
        let Some((dir, _file)) = path.rsplit_once('/') else {
            continue;
        };
        let parent = dir.rsplit('/').next().unwrap_or(dir);
        if parent.is_empty() {
            continue;
        }
        tags.entry(parent.to_string()).or_default().push(path.clone());
    }
    tags
}
