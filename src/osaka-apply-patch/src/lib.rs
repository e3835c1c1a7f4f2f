//! Osaka Apply Patch - validated single-file patch application.
//!
//! This crate provides the Patch Applier of the Osaka edit engine:
//! - the [`Patch`] tagged variant (create / modify / delete)
//! - unified diff parsing into patches
//! - hunk location tolerant of stale line numbers
//! - two-phase application: [`PatchApplier::prepare`] validates and computes,
//!   [`PatchApplier::commit`] re-checks and writes durably
//! - unified diff previews for dry runs
//!
//! # Example
//!
//! ```no_run
//! use osaka_apply_patch::{Patch, PatchApplier};
//!
//! let applier = PatchApplier::new(".");
//! let result = applier.apply(&Patch::create("notes.txt", "hello\n"))?;
//! println!("{} -> {:?}", result.path.display(), result.new_hash);
//! # Ok::<(), osaka_apply_patch::PatchError>(())
//! ```

mod applier;
mod error;
mod hunk;
mod locate;
mod parser;
mod patch;
mod preview;

pub use applier::{AppliedResult, HunkReport, PatchApplier, PreparedPatch};
pub use error::{ConflictReason, MismatchReason, PatchError, PatchResult};
pub use hunk::{Hunk, HunkLine, find_overlap};
pub use locate::{HunkLocator, MatchConfig, MatchQuality};
pub use parser::parse_unified_diff;
pub use patch::{Edit, Patch, PatchKind};
pub use preview::render_diff;
