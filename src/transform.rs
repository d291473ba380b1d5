//! Repair & Injection Engine
//!
//! Converts a resolution plan into non-overlapping edits, applies them from the
//! end of the file backwards, then rebuilds everything from the edited text and
//! demands an empty plan. A file that still needs work after one application is
//! reported, never retried.

use lazy_static::lazy_static;
#[cfg(feature = "napi")]
use napi_derive::napi;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classify::classify_tree;
use crate::config::{ConfigError, HandleConfig};
use crate::resolve::{resolve, ResolutionPlan, ResolvedAction};
use crate::scan::{scan, HandlePatterns, ScanResult};
use crate::scope::RegionTree;
use crate::validate::{ContextHint, Diagnostic, Edit, EditKind, EngineError, Span};

lazy_static! {
    // `HandleConfig::default()` is always valid.
    static ref DEFAULT_SYNCHRONIZER: Synchronizer =
        Synchronizer::new(&HandleConfig::default()).expect("default handle configuration is valid");
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESULT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub new_text: String,
    /// Edits in the order they were applied (descending offset).
    pub edits: Vec<Edit>,
    pub diagnostics: Vec<Diagnostic>,
}

impl SyncResult {
    pub fn changed(&self) -> bool {
        !self.edits.is_empty()
    }
}

/// Everything derived from one text: tree, records and plan.
pub struct Analysis {
    pub tree: RegionTree,
    pub scan: ScanResult,
    pub plan: ResolutionPlan,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// A handle configuration with its patterns compiled, reusable across files.
#[derive(Debug, Clone)]
pub struct Synchronizer {
    handle: HandleConfig,
    patterns: HandlePatterns,
}

impl Synchronizer {
    pub fn new(handle: &HandleConfig) -> Result<Self, ConfigError> {
        Ok(Synchronizer {
            handle: handle.clone(),
            patterns: HandlePatterns::new(handle)?,
        })
    }

    pub fn handle(&self) -> &HandleConfig {
        &self.handle
    }

    pub fn analyze(&self, text: &str, hint: ContextHint) -> Result<Analysis, EngineError> {
        let mut tree = RegionTree::build(text)?;
        classify_tree(&mut tree, text, hint.resolve());
        let records = scan(&tree, text, &self.patterns);
        let plan = resolve(&tree, text, &records, &self.handle, hint);
        debug!(
            regions = tree.len(),
            usages = records.usages.len(),
            declarations = records.declarations.len(),
            pending = plan.pending().count(),
            "analyzed source"
        );
        Ok(Analysis {
            tree,
            scan: records,
            plan,
        })
    }

    pub fn synchronize(&self, text: &str, hint: ContextHint) -> Result<SyncResult, EngineError> {
        let analysis = self.analyze(text, hint)?;
        let ResolutionPlan {
            actions,
            diagnostics,
        } = analysis.plan;

        let edits = plan_edits(text, &actions);
        let (new_text, edits) = apply_edits(text, edits);

        if !edits.is_empty() {
            let recheck = self.analyze(&new_text, hint)?;
            if !recheck.plan.is_converged() {
                let residual_actions = recheck.plan.pending().map(|a| a.to_string()).collect();
                return Err(EngineError::Convergence { residual_actions });
            }
        }

        Ok(SyncResult {
            new_text,
            edits,
            diagnostics,
        })
    }
}

/// Synchronize `text` against the default handle configuration.
pub fn synchronize(text: &str, context_hint: ContextHint) -> Result<SyncResult, EngineError> {
    DEFAULT_SYNCHRONIZER.synchronize(text, context_hint)
}

// ═══════════════════════════════════════════════════════════════════════════════
// EDIT PLANNING
// ═══════════════════════════════════════════════════════════════════════════════

/// Edits in plan order. At a shared offset, earlier edits end up earlier in the text.
pub fn plan_edits(text: &str, actions: &[ResolvedAction]) -> Vec<Edit> {
    let mut edits = Vec::new();
    for action in actions {
        match action {
            ResolvedAction::NoAction { .. } => {}
            ResolvedAction::Insert { offset, text: form, .. } => {
                edits.push(Edit::insert(*offset, form.clone()))
            }
            ResolvedAction::AddImport { offset, text: line } => {
                edits.push(Edit::insert(*offset, line.clone()))
            }
            ResolvedAction::Remove { span, .. } => {
                let range = removal_range(text, *span);
                edits.push(Edit::delete(range.start, &text[range.start..range.end]));
            }
            ResolvedAction::Reform { span, text: form, .. } => {
                edits.push(Edit::delete(span.start, &text[span.start..span.end]));
                edits.push(Edit::insert(span.start, form.clone()));
            }
        }
    }
    edits
}

/// Whole line when the declaration stands alone on it, otherwise the
/// declaration and the blanks that follow it.
fn removal_range(text: &str, span: Span) -> Span {
    let bytes = text.as_bytes();
    let line_start = text[..span.start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = text[span.end..]
        .find('\n')
        .map(|i| span.end + i)
        .unwrap_or(text.len());
    let alone = text[line_start..span.start].trim().is_empty()
        && text[span.end..line_end].trim().is_empty();

    if alone {
        if line_end < text.len() {
            Span::new(line_start, line_end + 1)
        } else if line_start > 0 {
            Span::new(line_start - 1, line_end)
        } else {
            Span::new(0, text.len())
        }
    } else {
        let mut end = span.end;
        while end < line_end && (bytes[end] == b' ' || bytes[end] == b'\t') {
            end += 1;
        }
        Span::new(span.start, end)
    }
}

/// Apply edits from the end of the text backwards. Returns the new text and
/// the edits actually applied, in application order.
pub fn apply_edits(text: &str, edits: Vec<Edit>) -> (String, Vec<Edit>) {
    let mut ordered: Vec<(usize, Edit)> = edits.into_iter().enumerate().collect();
    ordered.sort_by(|(ia, a), (ib, b)| {
        b.offset
            .cmp(&a.offset)
            .then(kind_rank(a.kind).cmp(&kind_rank(b.kind)))
            .then(ib.cmp(ia))
    });

    let mut result = text.to_string();
    let mut applied = Vec::with_capacity(ordered.len());
    let mut floor = usize::MAX;
    for (_, edit) in ordered {
        if edit.end() > floor {
            debug!(offset = edit.offset, "dropping overlapping edit");
            continue;
        }
        match edit.kind {
            EditKind::Insert => result.insert_str(edit.offset, &edit.text),
            EditKind::Delete => result.replace_range(edit.offset..edit.end(), ""),
        }
        floor = edit.offset;
        applied.push(edit);
    }
    (result, applied)
}

fn kind_rank(kind: EditKind) -> u8 {
    match kind {
        EditKind::Delete => 0,
        EditKind::Insert => 1,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE BINDING
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "napi")]
#[napi]
pub fn synchronize_native(
    text: String,
    context_hint: Option<String>,
    config_json: Option<String>,
) -> napi::Result<serde_json::Value> {
    let config = match config_json {
        Some(json) => crate::config::SyncConfig::from_json(&json)
            .map_err(|e| napi::Error::from_reason(format!("Config parse error: {}", e)))?,
        None => crate::config::SyncConfig::default(),
    };
    let hint = match context_hint {
        Some(raw) => raw.parse::<ContextHint>().map_err(napi::Error::from_reason)?,
        None => config.default_context,
    };
    let synchronizer =
        Synchronizer::new(&config.handle).map_err(|e| napi::Error::from_reason(e.to_string()))?;
    let result = synchronizer
        .synchronize(&text, hint)
        .map_err(|e| napi::Error::from_reason(format!("{}: {}", e.code(), e)))?;
    serde_json::to_value(&result)
        .map_err(|e| napi::Error::from_reason(format!("Serialize error: {}", e)))
}
