//! Pairwise guts comparison and Dice-coefficient scoring.
//!
//! [`diff`] reconciles two [`Guts`] under one level's policy, classifying
//! every path as same, different (present on one side only), or
//! intersect-different (present on both with unequal hashes after
//! resolution), and derives a normalized similarity score.
//!
//! Scoring follows the Dice convention: the denominator is the *sum* of the
//! two fingerprint sizes (`total_count`), never the size of the deduplicated
//! path union. Misreading that as a Jaccard-style set union is the classic
//! mistake here; the field name exists to prevent it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::guts::{extract_guts, hex_digest, Guts, GutsOptions};
use crate::levels::get_levels;
use crate::notifier::Notifier;
use crate::sources::ImageSource;

/// Result of comparing two guts under one level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffReport {
    pub level: String,
    /// Paths present in exactly one of the two guts.
    pub difference: Vec<String>,
    /// Paths present in both but different after resolution.
    pub intersect_different: Vec<String>,
    /// Count of paths with equal hashes.
    pub same: usize,
    /// Dice denominator: `|hashes1| + |hashes2|`, the unreduced sum.
    pub total_count: usize,
    /// `2 * same / total_count`, or 0 when `total_count` is 0.
    pub score: f64,
}

/// Reports for every registered level, keyed by level name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffSummary {
    pub reports: BTreeMap<String, DiffReport>,
}

impl DiffSummary {
    pub fn get(&self, level: &str) -> Option<&DiffReport> {
        self.reports.get(level)
    }

    /// Per-level scores, for callers that only want the numbers.
    pub fn scores(&self) -> BTreeMap<String, f64> {
        self.reports
            .iter()
            .map(|(name, report)| (name.clone(), report.score))
            .collect()
    }
}

fn dice_score(same: usize, total_count: usize) -> f64 {
    if total_count == 0 {
        0.0
    } else {
        2.0 * same as f64 / total_count as f64
    }
}

fn sizes_match(guts1: &Guts, guts2: &Guts, path: &str) -> bool {
    match (guts1.sizes.get(path), guts2.sizes.get(path)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn root_owned_either(guts1: &Guts, guts2: &Guts, path: &str) -> bool {
    guts1.root_owned.get(path).copied().unwrap_or(false)
        || guts2.root_owned.get(path).copied().unwrap_or(false)
}

/// Compares two guts under one level's resolution policy.
///
/// Hash mismatches ("contenders") are resolved per level:
/// - with `size_heuristic`, a contender that is root-owned on either side is
///   settled by its own size comparison alone — content is never read;
/// - at `IDENTICAL`, contenders are never resolved: the raw-bytes mismatch
///   already disqualifies them;
/// - otherwise both sides' decoded content is read and re-hashed; unreadable
///   or empty content on either side degrades to a size comparison rather
///   than failing the diff.
pub fn diff(
    guts1: &Guts,
    guts2: &Guts,
    level_name: &str,
    size_heuristic: bool,
    source: &dyn ImageSource,
    notifier: &Notifier,
) -> Result<DiffReport> {
    let mut difference = Vec::new();
    let mut intersect_different = Vec::new();
    let mut same = 0usize;

    let all_paths: BTreeSet<&str> = guts1.paths().chain(guts2.paths()).collect();

    for path in all_paths {
        let (hash1, hash2) = match (guts1.hashes.get(path), guts2.hashes.get(path)) {
            (Some(h1), Some(h2)) => (h1, h2),
            _ => {
                difference.push(path.to_string());
                continue;
            }
        };

        if hash1 == hash2 {
            same += 1;
            continue;
        }

        // Contender: present in both, hashes disagree.
        if size_heuristic && root_owned_either(guts1, guts2, path) {
            // Root-owned files are settled by their own size, skipping
            // content reads entirely.
            if sizes_match(guts1, guts2, path) {
                same += 1;
            } else {
                intersect_different.push(path.to_string());
            }
            continue;
        }

        if level_name == "IDENTICAL" {
            intersect_different.push(path.to_string());
            continue;
        }

        let content1 = source.read_file_content(&guts1.image, path)?;
        let content2 = source.read_file_content(&guts2.image, path)?;
        let readable1 = content1.as_deref().filter(|c| !c.is_empty());
        let readable2 = content2.as_deref().filter(|c| !c.is_empty());

        let resolved_same = match (readable1, readable2) {
            (Some(c1), Some(c2)) => hex_digest(c1) == hex_digest(c2),
            // Either side unreadable or empty: fall back to sizes
            _ => sizes_match(guts1, guts2, path),
        };

        if resolved_same {
            same += 1;
        } else {
            intersect_different.push(path.to_string());
        }
    }

    let total_count = guts1.len() + guts2.len();
    let score = dice_score(same, total_count);

    notifier.debug(&format!(
        "{} vs {} at {}: same={} different={} intersect_different={} score={:.4}",
        guts1.image,
        guts2.image,
        level_name,
        same,
        difference.len(),
        intersect_different.len(),
        score
    ));

    Ok(DiffReport {
        level: level_name.to_string(),
        difference,
        intersect_different,
        same,
        total_count,
        score,
    })
}

/// Standard entry point: diff two images across every registered level.
///
/// Streams are single-pass, so each level exports a fresh stream per image.
pub fn assess_differences(
    image1: &str,
    image2: &str,
    source: &dyn ImageSource,
    version: &str,
    size_heuristic: bool,
    notifier: &Notifier,
) -> Result<DiffSummary> {
    let levels = get_levels(version)?;
    let options = GutsOptions::default();
    let mut reports = BTreeMap::new();

    for (name, level) in &levels {
        notifier.info(&format!("Comparing {image1} and {image2} at level {name}"));
        let guts1 = extract_guts(image1, source.export(image1)?, level, &options, source, notifier)?;
        let guts2 = extract_guts(image2, source.export(image2)?, level, &options, source, notifier)?;
        let report = diff(&guts1, &guts2, name, size_heuristic, source, notifier)?;
        reports.insert(name.clone(), report);
    }

    Ok(DiffSummary { reports })
}
