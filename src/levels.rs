//! Level registry: named filter specifications controlling which filesystem
//! paths participate in a fingerprint or comparison, and how.
//!
//! Levels are looked up from a versioned built-in table and are always
//! returned as independent values — callers may customize a copy freely
//! without affecting other comparisons running against the same table.
//!
//! Precedence is fixed: `skip_files` beats `include_files` beats `regexp`,
//! and the archive root (empty normalized path) is never included.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};

/// Current schema version of the built-in level table.
pub const DEFAULT_VERSION: &str = "2.3";

/// Directory inside the image filesystem holding build metadata
/// (recipe, runscript, environment, labels).
pub const METADATA_DIR: &str = ".image.d";

/// A named filter specification.
///
/// `regexp` defaults to `"."` (match everything). All list-valued fields are
/// kept as sets for O(1) membership tests.
#[derive(Debug, Clone)]
pub struct Level {
    pub name: String,
    pub description: String,
    pub regexp: Regex,
    pub skip_files: BTreeSet<String>,
    pub include_files: BTreeSet<String>,
    pub assess_content: BTreeSet<String>,
}

impl Level {
    fn new(name: &str, description: &str, pattern: &str) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            description: description.to_string(),
            regexp: compile_pattern(pattern)?,
            skip_files: BTreeSet::new(),
            include_files: BTreeSet::new(),
            assess_content: BTreeSet::new(),
        })
    }

    /// Whether a normalized path participates in a fingerprint at this level.
    ///
    /// `skip_files` wins over everything; `include_files` wins over the
    /// pattern; the archive root (empty path) is never included.
    pub fn includes(&self, path: &str) -> bool {
        if path.is_empty() {
            return false;
        }
        if self.skip_files.contains(path) {
            return false;
        }
        if self.include_files.contains(path) {
            return true;
        }
        self.regexp.is_match(path)
    }

    /// Whether this path's *decoded content* must be hashed instead of the
    /// raw archive-entry bytes (used for files whose metadata is volatile
    /// across builds but whose content is stable).
    pub fn wants_content(&self, path: &str) -> bool {
        self.assess_content.contains(path) && !self.skip_files.contains(path)
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| Error::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

fn metadata_file(name: &str) -> String {
    format!("{METADATA_DIR}/{name}")
}

/// Host-volatile files the looser levels always ignore: they are rewritten
/// by the runtime at build/run time and carry no reproducibility signal.
fn volatile_files() -> BTreeSet<String> {
    ["etc/hosts", "etc/hostname", "etc/resolv.conf", "etc/mtab"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn builtin_levels() -> Result<BTreeMap<String, Level>> {
    let recipe = metadata_file("recipe");
    let runscript = metadata_file("runscript");
    let environment = metadata_file("env/environment.sh");
    let labels = metadata_file("labels.json");

    let mut levels = BTreeMap::new();

    let identical = Level::new(
        "IDENTICAL",
        "Strictest comparison: every file must match on raw archive bytes, metadata included",
        ".",
    )?;
    levels.insert(identical.name.clone(), identical);

    let mut replicate = Level::new(
        "REPLICATE",
        "Rebuild from the same recipe: metadata files compared by content, host-volatile files ignored",
        ".",
    )?;
    replicate.skip_files = volatile_files();
    replicate.assess_content = [&recipe, &runscript, &environment, &labels]
        .iter()
        .map(|s| s.to_string())
        .collect();
    levels.insert(replicate.name.clone(), replicate);

    let mut base = Level::new(
        "BASE",
        "Base filesystem only: image metadata directory and host-volatile files ignored",
        ".",
    )?;
    base.skip_files = volatile_files();
    base.skip_files.extend(
        [&recipe, &runscript, &environment, &labels]
            .iter()
            .map(|s| s.to_string()),
    );
    levels.insert(base.name.clone(), base);

    let mut recipe_level = Level::new(
        "RECIPE",
        "Only the image metadata directory, compared by content",
        &format!("^{}/", regex::escape(METADATA_DIR)),
    )?;
    recipe_level.assess_content = [&recipe, &runscript, &environment, &labels]
        .iter()
        .map(|s| s.to_string())
        .collect();
    levels.insert(recipe_level.name.clone(), recipe_level);

    let mut runscript_level = Level::new(
        "RUNSCRIPT",
        "Only the runscript, compared by content",
        &format!("^{}$", regex::escape(&runscript)),
    )?;
    runscript_level.include_files.insert(runscript.clone());
    runscript_level.assess_content.insert(runscript.clone());
    levels.insert(runscript_level.name.clone(), runscript_level);

    let mut environment_level = Level::new(
        "ENVIRONMENT",
        "Only the environment definition, compared by content",
        &format!("^{}/env/", regex::escape(METADATA_DIR)),
    )?;
    environment_level.assess_content.insert(environment.clone());
    levels.insert(environment_level.name.clone(), environment_level);

    let mut labels_level = Level::new(
        "LABELS",
        "Only the labels file, compared by content",
        &format!("^{}$", regex::escape(&labels)),
    )?;
    labels_level.include_files.insert(labels.clone());
    labels_level.assess_content.insert(labels.clone());
    levels.insert(labels_level.name.clone(), labels_level);

    Ok(levels)
}

/// Built-in level table for a schema version.
///
/// Version `"2.2"` predates the `LABELS` level; unknown versions fail with
/// [`Error::UnsupportedVersion`].
pub fn get_levels(version: &str) -> Result<BTreeMap<String, Level>> {
    match version {
        "2.3" => builtin_levels(),
        "2.2" => {
            let mut levels = builtin_levels()?;
            levels.remove("LABELS");
            Ok(levels)
        }
        other => Err(Error::UnsupportedVersion(other.to_string())),
    }
}

/// Look up one named level, optionally augmenting its skip/include sets.
///
/// The returned level is an independent copy; customizing it never touches
/// the built-in table.
pub fn get_level(
    name: &str,
    version: &str,
    skip_files: &[&str],
    include_files: &[&str],
) -> Result<Level> {
    let levels = get_levels(version)?;
    let Some(level) = levels.get(name) else {
        log::warn!("level '{name}' not found in version {version} table");
        return Err(Error::LevelNotFound(name.to_string()));
    };

    let mut level = level.clone();
    level
        .skip_files
        .extend(skip_files.iter().map(|s| s.to_string()));
    level
        .include_files
        .extend(include_files.iter().map(|s| s.to_string()));
    Ok(level)
}

/// Functionally update one field of a level, returning a new value.
///
/// Valid fields are `regexp` (the last value replaces the pattern),
/// `skip_files` and `include_files` (appended when `append`, replaced
/// otherwise). Any other field name is rejected.
pub fn modify_level(level: &Level, field: &str, values: &[&str], append: bool) -> Result<Level> {
    let mut modified = level.clone();
    match field {
        "regexp" => {
            let Some(pattern) = values.last() else {
                return Ok(modified);
            };
            modified.regexp = compile_pattern(pattern)?;
        }
        "skip_files" => {
            if !append {
                modified.skip_files.clear();
            }
            modified
                .skip_files
                .extend(values.iter().map(|s| s.to_string()));
        }
        "include_files" => {
            if !append {
                modified.include_files.clear();
            }
            modified
                .include_files
                .extend(values.iter().map(|s| s.to_string()));
        }
        other => return Err(Error::InvalidLevelField(other.to_string())),
    }
    Ok(modified)
}

/// Build an ad hoc level. The default pattern `"."` matches everything.
pub fn get_custom_level(
    regexp: Option<&str>,
    description: Option<&str>,
    skip_files: &[&str],
    include_files: &[&str],
) -> Result<Level> {
    let mut level = Level::new(
        "CUSTOM",
        description.unwrap_or("Custom level"),
        regexp.unwrap_or("."),
    )?;
    level.skip_files = skip_files.iter().map(|s| s.to_string()).collect();
    level.include_files = include_files.iter().map(|s| s.to_string()).collect();
    Ok(level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_absent_in_oldest_version() {
        let old = get_levels("2.2").unwrap();
        assert!(!old.contains_key("LABELS"));

        let current = get_levels("2.3").unwrap();
        assert!(current.contains_key("LABELS"));
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let err = get_levels("1.0").unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion(v) if v == "1.0"));
    }

    #[test]
    fn test_unknown_level_name_is_rejected() {
        let err = get_level("NOPE", DEFAULT_VERSION, &[], &[]).unwrap_err();
        assert!(matches!(err, Error::LevelNotFound(n) if n == "NOPE"));
    }

    #[test]
    fn test_all_expected_levels_present() {
        let levels = get_levels(DEFAULT_VERSION).unwrap();
        for name in [
            "IDENTICAL",
            "BASE",
            "REPLICATE",
            "RECIPE",
            "RUNSCRIPT",
            "ENVIRONMENT",
            "LABELS",
        ] {
            assert!(levels.contains_key(name), "missing level {name}");
        }
    }

    #[test]
    fn test_skip_wins_over_include_and_pattern() {
        let level =
            get_custom_level(Some("."), None, &["etc/passwd"], &["etc/passwd"]).unwrap();
        assert!(!level.includes("etc/passwd"));
        assert!(level.includes("etc/group"));
    }

    #[test]
    fn test_include_wins_over_pattern() {
        let level = get_custom_level(Some("^usr/"), None, &[], &["etc/os-release"]).unwrap();
        assert!(level.includes("etc/os-release"));
        assert!(level.includes("usr/bin/env"));
        assert!(!level.includes("etc/passwd"));
    }

    #[test]
    fn test_archive_root_never_included() {
        let level = get_custom_level(None, None, &[], &[]).unwrap();
        assert!(!level.includes(""));
    }

    #[test]
    fn test_assess_content_respects_skip() {
        let levels = get_levels(DEFAULT_VERSION).unwrap();
        let replicate = &levels["REPLICATE"];
        let runscript = metadata_file("runscript");
        assert!(replicate.wants_content(&runscript));

        let modified = modify_level(replicate, "skip_files", &[&runscript], true).unwrap();
        assert!(!modified.wants_content(&runscript));
    }

    #[test]
    fn test_modify_level_rejects_unknown_field() {
        let level = get_custom_level(None, None, &[], &[]).unwrap();
        let err = modify_level(&level, "assess_content", &["x"], true).unwrap_err();
        assert!(matches!(err, Error::InvalidLevelField(f) if f == "assess_content"));
    }

    #[test]
    fn test_modify_level_append_and_replace() {
        let level = get_custom_level(None, None, &["a"], &[]).unwrap();

        let appended = modify_level(&level, "skip_files", &["b"], true).unwrap();
        assert!(appended.skip_files.contains("a"));
        assert!(appended.skip_files.contains("b"));

        let replaced = modify_level(&level, "skip_files", &["b"], false).unwrap();
        assert!(!replaced.skip_files.contains("a"));
        assert!(replaced.skip_files.contains("b"));

        // Original is untouched in both cases
        assert!(level.skip_files.contains("a"));
        assert!(!level.skip_files.contains("b"));
    }

    #[test]
    fn test_modify_level_regexp_replaces_pattern() {
        let level = get_custom_level(None, None, &[], &[]).unwrap();
        let modified = modify_level(&level, "regexp", &["^usr/"], true).unwrap();
        assert!(modified.includes("usr/bin/env"));
        assert!(!modified.includes("etc/passwd"));
    }

    #[test]
    fn test_narrow_levels_match_only_their_files() {
        let levels = get_levels(DEFAULT_VERSION).unwrap();

        let runscript = &levels["RUNSCRIPT"];
        assert!(runscript.includes(".image.d/runscript"));
        assert!(!runscript.includes("etc/passwd"));
        assert!(!runscript.includes(".image.d/labels.json"));

        let recipe = &levels["RECIPE"];
        assert!(recipe.includes(".image.d/recipe"));
        assert!(recipe.includes(".image.d/env/environment.sh"));
        assert!(!recipe.includes("usr/bin/env"));
    }

    #[test]
    fn test_custom_level_bad_pattern() {
        let err = get_custom_level(Some("("), None, &[], &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
    }
}
