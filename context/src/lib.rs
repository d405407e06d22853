//! Context window builder.
//!
//! Assembles the message list sent to the model on every turn, bounded by a
//! character budget:
//!
//! ```text
//! ContextBuilder
//! ├── limits: ContextLimits
//! ├── cache: PartCache (written paths + sizes per part)
//! └── collapse_cutoff (sticky, moves forward only)
//!
//! PreparedContext (proof the result fits)
//! ├── messages: listing, relevant files, history
//! └── usage: ContextUsage
//! ```

mod builder;
mod memo;
mod usage;

pub use builder::{ContextBuildError, ContextBuilder, ContextLimits, PreparedContext};
pub use usage::ContextUsage;
