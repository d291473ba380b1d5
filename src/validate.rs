use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTIC CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const SYNC_AMBIGUOUS_CONTEXT: &str = "SYNC-AMBIGUOUS-CONTEXT";
pub const SYNC_UNREACHABLE_USAGE: &str = "SYNC-UNREACHABLE-USAGE";
pub const SYNC_REMOVE_INVALID: &str = "SYNC-REMOVE-INVALID";
pub const SYNC_DEDUPLICATE: &str = "SYNC-DEDUPLICATE";
pub const SYNC_PRUNE: &str = "SYNC-PRUNE";
pub const SYNC_RELOCATE: &str = "SYNC-RELOCATE";
pub const SYNC_REFORM: &str = "SYNC-REFORM";
pub const SYNC_IMPORT_ADDED: &str = "SYNC-IMPORT-ADDED";
pub const SYNC_UNMANAGED_INVALID: &str = "SYNC-UNMANAGED-INVALID";
pub const SYNC_UNMANAGED_DUPLICATE: &str = "SYNC-UNMANAGED-DUPLICATE";

// ═══════════════════════════════════════════════════════════════════════════════
// GUARANTEES
// ═══════════════════════════════════════════════════════════════════════════════

fn get_guarantee(code: &str) -> &'static str {
    match code {
        SYNC_AMBIGUOUS_CONTEXT => {
            "Files without a directive or hint are treated as server-side code."
        }
        SYNC_UNREACHABLE_USAGE => {
            "Usages inside imports or type annotations never request a declaration."
        }
        SYNC_REMOVE_INVALID => {
            "Declarations only live in module or executable bodies, never in parameter lists, literals, types or imports."
        }
        SYNC_DEDUPLICATE => "Every hosting region declares the handle exactly once.",
        SYNC_PRUNE => "Regions without usages carry no managed declaration.",
        SYNC_RELOCATE => "A declaration is the first statement of the region it serves.",
        SYNC_REFORM => {
            "Client regions use the client form, server regions use the server form."
        }
        SYNC_IMPORT_ADDED => "The factory used by a managed declaration is always in scope.",
        SYNC_UNMANAGED_INVALID | SYNC_UNMANAGED_DUPLICATE => {
            "User-written bindings of the handle are never edited."
        }
        _ => "Unknown invariant.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGION MODEL
// ═══════════════════════════════════════════════════════════════════════════════

pub type RegionId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RegionKind {
    Module,
    ExecutableBody,
    ParameterList,
    ObjectLiteral,
    TypeAnnotation,
    ImportBlock,
}

impl RegionKind {
    /// Kinds in which a declaration statement is syntactically legal.
    pub fn accepts_declaration(self) -> bool {
        matches!(self, RegionKind::Module | RegionKind::ExecutableBody)
    }

    /// Kinds whose usages are dead for declaration purposes.
    pub fn is_unreachable(self) -> bool {
        matches!(self, RegionKind::ImportBlock | RegionKind::TypeAnnotation)
    }
}

/// Structural bracket that opened a region. The module region has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Delimiter {
    None,
    Brace,
    Bracket,
    Paren,
}

impl Delimiter {
    pub fn from_open(c: u8) -> Option<Self> {
        match c {
            b'{' => Some(Delimiter::Brace),
            b'[' => Some(Delimiter::Bracket),
            b'(' => Some(Delimiter::Paren),
            _ => None,
        }
    }

    pub fn close(self) -> Option<u8> {
        match self {
            Delimiter::None => None,
            Delimiter::Brace => Some(b'}'),
            Delimiter::Bracket => Some(b']'),
            Delimiter::Paren => Some(b')'),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionContext {
    ClientSide,
    #[default]
    ServerSide,
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionContext::ClientSide => write!(f, "client"),
            ExecutionContext::ServerSide => write!(f, "server"),
        }
    }
}

/// Default context supplied by the caller for files without a directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextHint {
    #[serde(alias = "clientSide")]
    Client,
    #[serde(alias = "serverSide")]
    Server,
    #[default]
    Unknown,
}

impl ContextHint {
    pub fn resolve(self) -> Option<ExecutionContext> {
        match self {
            ContextHint::Client => Some(ExecutionContext::ClientSide),
            ContextHint::Server => Some(ExecutionContext::ServerSide),
            ContextHint::Unknown => None,
        }
    }
}

impl FromStr for ContextHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "client" | "clientside" => Ok(ContextHint::Client),
            "server" | "serverside" => Ok(ContextHint::Server),
            "unknown" | "auto" => Ok(ContextHint::Unknown),
            other => Err(format!(
                "unknown context '{}', expected client, server or unknown",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: RegionId,
    pub kind: RegionKind,
    pub parent: Option<RegionId>,
    pub children: Vec<RegionId>,
    /// Opening delimiter through closing delimiter (whole text for the module).
    pub span: Span,
    pub delimiter: Delimiter,
    pub execution_context: ExecutionContext,
    /// Context marker written as this region's first statement, if any.
    pub directive: Option<ExecutionContext>,
    /// Kind was copied from the parent (control-flow blocks, call arguments, ...).
    pub inherited: bool,
    /// For executable bodies: the parameter list of their signature.
    pub signature: Option<RegionId>,
}

impl Region {
    /// Byte range strictly between the delimiters.
    pub fn inner(&self) -> Span {
        match self.delimiter {
            Delimiter::None => self.span,
            _ => Span::new(self.span.start + 1, self.span.end.saturating_sub(1)),
        }
    }

    /// Regions a declaration may be attributed to: the module and real function bodies.
    pub fn is_host(&self) -> bool {
        match self.kind {
            RegionKind::Module => self.parent.is_none(),
            RegionKind::ExecutableBody => !self.inherited,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSite {
    pub region_id: RegionId,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Declaration {
    pub region_id: RegionId,
    pub span: Span,
    pub valid: bool,
    /// Matches one of the canonical forms and may be edited by the engine.
    pub managed: bool,
    /// Which canonical form it matches (managed declarations only).
    pub form: Option<ExecutionContext>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EDITS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EditKind {
    Insert,
    Delete,
}

/// A single text change. `text` is the inserted text, or the exact text removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edit {
    pub kind: EditKind,
    pub offset: usize,
    pub text: String,
}

impl Edit {
    pub fn insert(offset: usize, text: impl Into<String>) -> Self {
        Edit {
            kind: EditKind::Insert,
            offset,
            text: text.into(),
        }
    }

    pub fn delete(offset: usize, text: impl Into<String>) -> Self {
        Edit {
            kind: EditKind::Delete,
            offset,
            text: text.into(),
        }
    }

    pub fn end(&self) -> usize {
        match self.kind {
            EditKind::Insert => self.offset,
            EditKind::Delete => self.offset + self.text.len(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIAGNOSTICS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    /// 1-based line and column (in characters) of a byte offset.
    pub fn of(text: &str, offset: usize) -> Self {
        let offset = offset.min(text.len());
        let before = text.get(..offset).unwrap_or(text);
        let line = before.matches('\n').count() as u32 + 1;
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let column = before[line_start..].chars().count() as u32 + 1;
        SourceLocation { line, column }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub code: String,
    pub severity: Severity,
    pub message: String,
    pub guarantee: String,
    pub offset: usize,
    pub location: SourceLocation,
}

impl Diagnostic {
    pub fn new(code: &str, severity: Severity, message: &str, text: &str, offset: usize) -> Self {
        Diagnostic {
            code: code.to_string(),
            severity,
            message: message.to_string(),
            guarantee: get_guarantee(code).to_string(),
            offset,
            location: SourceLocation::of(text, offset),
        }
    }

    pub fn info(code: &str, message: &str, text: &str, offset: usize) -> Self {
        Self::new(code, Severity::Info, message, text, offset)
    }

    pub fn warning(code: &str, message: &str, text: &str, offset: usize) -> Self {
        Self::new(code, Severity::Warning, message, text, offset)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} [{}] {}",
            self.location.line, self.location.column, self.code, self.message
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("malformed source at {line}:{column}: {reason}")]
    MalformedSource {
        offset: usize,
        line: u32,
        column: u32,
        reason: String,
    },
    #[error("edits did not converge, {} action(s) still pending: {}", .residual_actions.len(), .residual_actions.join("; "))]
    Convergence { residual_actions: Vec<String> },
}

impl EngineError {
    pub fn malformed(text: &str, offset: usize, reason: impl Into<String>) -> Self {
        let loc = SourceLocation::of(text, offset);
        EngineError::MalformedSource {
            offset,
            line: loc.line,
            column: loc.column,
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::MalformedSource { .. } => "SYNC-ERR-MALFORMED",
            EngineError::Convergence { .. } => "SYNC-ERR-CONVERGENCE",
        }
    }
}
