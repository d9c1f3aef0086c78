pub mod archive;
pub mod classify;
pub mod diff;
pub mod error;
pub mod guts;
pub mod hasher;
pub mod levels;
pub mod notifier;
pub mod sources;

// Re-exports for easy access
pub use archive::{normalize_path, ArchiveEntry, ArchiveWalker};
pub use classify::{custom_files, dice_paths, file_set, software_tags, OsCatalogue, SimilarityVector};
pub use diff::{assess_differences, diff, DiffReport, DiffSummary};
pub use error::{Error, Result};
pub use guts::{extract_guts, Guts, GutsOptions};
pub use hasher::{image_digest, image_digests_all_levels};
pub use levels::{get_custom_level, get_level, get_levels, modify_level, Level, DEFAULT_VERSION};
pub use notifier::Notifier;
pub use sources::{ImageSource, TarballSource};
