//! Corpus Walker
//!
//! Finds the source files under the configured roots, runs the engine on each
//! of them in parallel and writes back only the files whose text changed. A
//! failing file is reported and left untouched; the batch always completes.

#[cfg(feature = "napi")]
use napi_derive::napi;
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cache::IncrementalCache;
use crate::config::{ConfigError, SyncConfig};
use crate::transform::Synchronizer;
use crate::validate::{ContextHint, Diagnostic};

/// Directory holding engine state; never walked.
const STATE_DIR: &str = ".declsync";

// ═══════════════════════════════════════════════════════════════════════════════
// REPORT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum FileOutcome {
    Unchanged,
    /// Already converged on a previous run with the same configuration.
    Cached,
    #[serde(rename_all = "camelCase")]
    Rewritten { edits: usize },
    #[serde(rename_all = "camelCase")]
    Failed { code: String, error: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    pub path: PathBuf,
    #[serde(flatten)]
    pub outcome: FileOutcome,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub files: usize,
    pub rewritten: usize,
    pub unchanged: usize,
    pub cached: usize,
    pub failed: usize,
    pub diagnostics: usize,
    pub dry_run: bool,
    pub reports: Vec<FileReport>,
}

impl Summary {
    fn from_reports(reports: Vec<FileReport>, dry_run: bool) -> Self {
        let mut summary = Summary {
            files: reports.len(),
            dry_run,
            ..Summary::default()
        };
        for report in &reports {
            summary.diagnostics += report.diagnostics.len();
            match report.outcome {
                FileOutcome::Unchanged => summary.unchanged += 1,
                FileOutcome::Cached => summary.cached += 1,
                FileOutcome::Rewritten { .. } => summary.rewritten += 1,
                FileOutcome::Failed { .. } => summary.failed += 1,
            }
        }
        summary.reports = reports;
        summary
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WALKER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Compute everything, write nothing.
    pub dry_run: bool,
    pub use_cache: bool,
    /// Overrides the configured default context.
    pub context: Option<ContextHint>,
}

pub struct CorpusWalker {
    base: PathBuf,
    config: SyncConfig,
    options: WalkOptions,
    synchronizer: Synchronizer,
    /// Context applied to files without a directive.
    hint: ContextHint,
    cache: Option<IncrementalCache>,
}

impl CorpusWalker {
    pub fn new(base: &Path, config: SyncConfig, options: WalkOptions) -> Result<Self, ConfigError> {
        let synchronizer = Synchronizer::new(&config.handle)?;
        let hint = options.context.unwrap_or(config.default_context);
        // A converged file only stays converged under the same context.
        let cache = if options.use_cache && !options.dry_run {
            let fingerprint = format!("{}:{:?}", config.handle.fingerprint(), hint);
            Some(IncrementalCache::new(base, fingerprint))
        } else {
            None
        };
        Ok(CorpusWalker {
            base: base.to_path_buf(),
            config,
            options,
            synchronizer,
            hint,
            cache,
        })
    }

    pub fn root_count(&self) -> usize {
        self.config.corpus.roots.len()
    }

    /// Configured roots that do not exist under the base directory.
    pub fn missing_roots(&self) -> Vec<PathBuf> {
        self.config
            .corpus
            .roots
            .iter()
            .map(|root| self.base.join(root))
            .filter(|path| !path.exists())
            .collect()
    }

    /// Every eligible file under the roots, sorted and deduplicated.
    pub fn discover(&self) -> Vec<PathBuf> {
        let corpus = &self.config.corpus;
        let mut files = Vec::new();

        for root in &corpus.roots {
            let root = self.base.join(root);
            if !root.exists() {
                debug!(root = %root.display(), "root does not exist");
                continue;
            }
            let walker = WalkDir::new(&root).into_iter().filter_entry(|entry| {
                if !entry.file_type().is_dir() || entry.depth() == 0 {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                name != STATE_DIR && !corpus.exclude_dirs.iter().any(|d| d.as_str() == name)
            });
            for entry in walker.filter_map(Result::ok) {
                let path = entry.path();
                if entry.file_type().is_file() && self.is_eligible(path) {
                    files.push(path.to_path_buf());
                }
            }
        }

        files.sort();
        files.dedup();
        files
    }

    fn is_eligible(&self, path: &Path) -> bool {
        let corpus = &self.config.corpus;
        let extension_ok = path
            .extension()
            .map(|ext| corpus.extensions.iter().any(|e| ext == e.as_str()))
            .unwrap_or(false);
        if !extension_ok {
            return false;
        }
        let normalized = path.to_string_lossy().replace('\\', "/");
        !corpus
            .skip_files
            .iter()
            .any(|skip| normalized.ends_with(skip.as_str()))
    }

    fn display_path(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.base).unwrap_or(path).to_path_buf()
    }

    pub fn process_file(&self, path: &Path) -> FileReport {
        let shown = self.display_path(path);
        let report = |outcome, diagnostics| FileReport {
            path: shown.clone(),
            outcome,
            diagnostics,
        };

        let source = match fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) => {
                warn!(file = %shown.display(), error = %e, "failed to read");
                return report(
                    FileOutcome::Failed {
                        code: "SYNC-ERR-IO".to_string(),
                        error: e.to_string(),
                    },
                    Vec::new(),
                );
            }
        };

        if let Some(cache) = &self.cache {
            if cache.is_converged(&shown, &source) {
                debug!(file = %shown.display(), "cached");
                return report(FileOutcome::Cached, Vec::new());
            }
        }

        let result = match self.synchronizer.synchronize(&source, self.hint) {
            Ok(result) => result,
            Err(e) => {
                warn!(file = %shown.display(), code = e.code(), error = %e, "file skipped");
                return report(
                    FileOutcome::Failed {
                        code: e.code().to_string(),
                        error: e.to_string(),
                    },
                    Vec::new(),
                );
            }
        };

        if !result.changed() {
            if let Some(cache) = &self.cache {
                cache.record(&shown, &source);
            }
            return report(FileOutcome::Unchanged, result.diagnostics);
        }

        if !self.options.dry_run {
            if let Err(e) = fs::write(path, &result.new_text) {
                warn!(file = %shown.display(), error = %e, "failed to write");
                return report(
                    FileOutcome::Failed {
                        code: "SYNC-ERR-IO".to_string(),
                        error: e.to_string(),
                    },
                    result.diagnostics,
                );
            }
            if let Some(cache) = &self.cache {
                cache.record(&shown, &result.new_text);
            }
        }

        info!(
            file = %shown.display(),
            edits = result.edits.len(),
            dry_run = self.options.dry_run,
            "rewrote"
        );
        report(
            FileOutcome::Rewritten {
                edits: result.edits.len(),
            },
            result.diagnostics,
        )
    }

    /// Process every discovered file, one task per file.
    pub fn run(&self) -> Summary {
        let files = self.discover();
        info!(files = files.len(), "synchronizing corpus");
        let reports: Vec<FileReport> = files.par_iter().map(|f| self.process_file(f)).collect();
        Summary::from_reports(reports, self.options.dry_run)
    }
}

/// Synchronize every file under `base_dir` according to `config_json`.
#[cfg(feature = "napi")]
#[napi]
pub fn synchronize_corpus_native(
    base_dir: String,
    config_json: Option<String>,
    dry_run: Option<bool>,
) -> napi::Result<serde_json::Value> {
    let config = match config_json {
        Some(json) => SyncConfig::from_json(&json)
            .map_err(|e| napi::Error::from_reason(format!("Config parse error: {}", e)))?,
        None => SyncConfig::default(),
    };
    let options = WalkOptions {
        dry_run: dry_run.unwrap_or(false),
        use_cache: false,
        context: None,
    };
    let walker = CorpusWalker::new(Path::new(&base_dir), config, options)
        .map_err(|e| napi::Error::from_reason(e.to_string()))?;
    serde_json::to_value(walker.run())
        .map_err(|e| napi::Error::from_reason(format!("Serialize error: {}", e)))
}
