//! # Declaration Synchronization Ground Truth
//!
//! ## Placement Invariants
//!
//! 1. **Hosts**: only the module and real function bodies (function, method,
//!    arrow and accessor bodies) host a declaration of the handle. Control-flow
//!    blocks, call arguments and literals are transparent and belong to the
//!    nearest host above them.
//!
//! 2. **Exactly One**: after synchronization every host that needs the handle
//!    declares it exactly once, as its first statement after any directive.
//!
//! 3. **Nowhere Else**: no managed declaration survives inside a parameter list,
//!    object or array literal, type annotation or import block.
//!
//! 4. **Lifetime Policy**: server-side hosts construct the handle per invocation
//!    (`const supabase = await createClient();`) and therefore declare their own.
//!    Client-side hosts share the one built by the module
//!    (`const supabase = createClient();`).
//!
//! 5. **User Bindings**: parameters named like the handle and declarations that
//!    match neither canonical form belong to the user. They satisfy the usages
//!    beneath them and are never edited.
//!
//! 6. **Fixpoint**: running the engine on its own output produces no edit. A file
//!    that still needs work after one pass fails with `SYNC-ERR-CONVERGENCE`
//!    and is left untouched.

#[cfg(feature = "napi")]
use napi_derive::napi;

mod cache;
mod classify;
mod config;
mod discovery;
mod resolve;
mod scan;
mod scope;
mod transform;
mod validate;
mod visitor;

#[cfg(test)]
mod discovery_tests;
#[cfg(test)]
mod sync_tests;

pub use cache::IncrementalCache;
pub use classify::classify_tree;
pub use config::{ConfigError, CorpusConfig, HandleConfig, ImportSources, SyncConfig, CONFIG_FILE_NAME};
pub use discovery::{CorpusWalker, FileOutcome, FileReport, Summary, WalkOptions};
pub use resolve::{resolve, RemovalReason, ResolutionPlan, ResolvedAction};
pub use scan::{scan, HandlePatterns, ScanResult};
pub use scope::RegionTree;
pub use transform::{apply_edits, plan_edits, synchronize, Analysis, SyncResult, Synchronizer};
pub use validate::*;
pub use visitor::{walk_region, HostCollector, RegionVisitor};

#[cfg(feature = "napi")]
pub use discovery::synchronize_corpus_native;
#[cfg(feature = "napi")]
pub use transform::synchronize_native;

#[cfg(feature = "napi")]
#[napi]
pub fn sync_bridge() -> String {
    "DeclSync Native Bridge Connected".to_string()
}
