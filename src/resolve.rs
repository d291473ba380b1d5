//! Declaration Resolver
//!
//! Turns the scanner's records into one plan per file. Every hosting region
//! (the module and every real function body) gets exactly one verdict, and
//! every managed declaration that does not survive gets a removal.
//!
//! Lifetime policy: a server-side host owns its handle and builds it per
//! invocation, so it declares its own. A client-side host shares the handle
//! built once by the outermost client-side host above it, normally the module.
//! User-written bindings (parameters, unmanaged declarations) are respected
//! wherever they sit and satisfy every usage beneath them.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::config::HandleConfig;
use crate::scan::ScanResult;
use crate::scope::{leading_directive, skip_trivia, RegionTree, ROOT};
use crate::validate::{
    ContextHint, Declaration, Diagnostic, ExecutionContext, Region, RegionId, RegionKind, Span,
    SYNC_AMBIGUOUS_CONTEXT, SYNC_DEDUPLICATE, SYNC_IMPORT_ADDED, SYNC_PRUNE, SYNC_REFORM,
    SYNC_RELOCATE, SYNC_REMOVE_INVALID, SYNC_UNMANAGED_DUPLICATE, SYNC_UNMANAGED_INVALID,
    SYNC_UNREACHABLE_USAGE,
};
use crate::visitor::{HostCollector, RegionVisitor};

lazy_static! {
    static ref IMPORT_STMT_RE: Regex = Regex::new(r#"^import(?:\s+|\s*[{*'"])"#).unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RemovalReason {
    /// Sits in a parameter list, literal, type or import block.
    InvalidRegion,
    /// A second declaration in the same host.
    Duplicate,
    /// The host has no usage that needs it.
    Unneeded,
    /// Nested inside a block of the host, or after the host's first usage.
    Misplaced,
    /// The host already binds the handle through a parameter or a user binding.
    Shadowed,
}

impl RemovalReason {
    fn code(self) -> &'static str {
        match self {
            RemovalReason::InvalidRegion => SYNC_REMOVE_INVALID,
            RemovalReason::Duplicate | RemovalReason::Shadowed => SYNC_DEDUPLICATE,
            RemovalReason::Unneeded => SYNC_PRUNE,
            RemovalReason::Misplaced => SYNC_RELOCATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ResolvedAction {
    #[serde(rename_all = "camelCase")]
    NoAction { region_id: RegionId },
    #[serde(rename_all = "camelCase")]
    Insert {
        region_id: RegionId,
        offset: usize,
        context: ExecutionContext,
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    Remove {
        region_id: RegionId,
        span: Span,
        reason: RemovalReason,
    },
    #[serde(rename_all = "camelCase")]
    Reform {
        region_id: RegionId,
        span: Span,
        context: ExecutionContext,
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    AddImport { offset: usize, text: String },
}

impl ResolvedAction {
    pub fn is_no_action(&self) -> bool {
        matches!(self, ResolvedAction::NoAction { .. })
    }
}

impl fmt::Display for ResolvedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedAction::NoAction { region_id } => write!(f, "no action in region {}", region_id),
            ResolvedAction::Insert {
                region_id, context, ..
            } => write!(f, "insert {} declaration in region {}", context, region_id),
            ResolvedAction::Remove {
                region_id,
                span,
                reason,
            } => write!(
                f,
                "remove declaration at {} in region {} ({:?})",
                span.start, region_id, reason
            ),
            ResolvedAction::Reform {
                region_id, context, ..
            } => write!(f, "reform declaration in region {} to {} form", region_id, context),
            ResolvedAction::AddImport { offset, .. } => write!(f, "add factory import at {}", offset),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolutionPlan {
    pub actions: Vec<ResolvedAction>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ResolutionPlan {
    /// Actions that change the text.
    pub fn pending(&self) -> impl Iterator<Item = &ResolvedAction> {
        self.actions.iter().filter(|a| !a.is_no_action())
    }

    pub fn is_converged(&self) -> bool {
        self.pending().next().is_none()
    }
}

pub fn resolve(
    tree: &RegionTree,
    text: &str,
    scan: &ScanResult,
    handle: &HandleConfig,
    hint: ContextHint,
) -> ResolutionPlan {
    Resolver::new(tree, text, scan, handle).run(hint)
}

struct Resolver<'a> {
    tree: &'a RegionTree,
    text: &'a str,
    scan: &'a ScanResult,
    handle: &'a HandleConfig,
    /// Hosts with a parameter binding or a valid unmanaged declaration.
    user_bound: BTreeSet<RegionId>,
    /// Valid declarations grouped by host, source order.
    by_host: BTreeMap<RegionId, Vec<&'a Declaration>>,
    plan: ResolutionPlan,
}

impl<'a> Resolver<'a> {
    fn new(tree: &'a RegionTree, text: &'a str, scan: &'a ScanResult, handle: &'a HandleConfig) -> Self {
        let mut by_host: BTreeMap<RegionId, Vec<&Declaration>> = BTreeMap::new();
        let mut user_bound: BTreeSet<RegionId> = scan.parameter_bindings.iter().copied().collect();
        for decl in scan.declarations.iter().filter(|d| d.valid) {
            let host = tree.host_of(decl.region_id);
            if !decl.managed {
                user_bound.insert(host);
            }
            by_host.entry(host).or_default().push(decl);
        }
        Resolver {
            tree,
            text,
            scan,
            handle,
            user_bound,
            by_host,
            plan: ResolutionPlan::default(),
        }
    }

    fn run(mut self, hint: ContextHint) -> ResolutionPlan {
        self.report_context(hint);
        self.report_unreachable();
        self.remove_invalid();

        // Host -> offsets of usages attributed to it
        let mut required: BTreeMap<RegionId, Vec<usize>> = BTreeMap::new();
        for usage in &self.scan.usages {
            let host = self.tree.host_of(usage.region_id);
            let target = self.target_host(host);
            let direct = if target == host { Some(usage.offset) } else { None };
            let entry = required.entry(target).or_default();
            entry.extend(direct);
        }

        let mut collector = HostCollector::default();
        collector.visit_tree(self.tree);
        for host in collector.hosts {
            let usages = required.get(&host);
            self.resolve_host(host, usages.map(|u| u.as_slice()));
        }

        self.ensure_import();
        self.plan
    }

    fn report_context(&mut self, hint: ContextHint) {
        let root = self.tree.root();
        let relevant = !self.scan.usages.is_empty() || !self.scan.declarations.is_empty();
        if root.directive.is_none() && hint == ContextHint::Unknown && relevant {
            self.plan.diagnostics.push(Diagnostic::warning(
                SYNC_AMBIGUOUS_CONTEXT,
                "no directive and no context hint, assuming server-side",
                self.text,
                0,
            ));
        }
    }

    fn report_unreachable(&mut self) {
        for usage in &self.scan.unreachable {
            let kind = self.tree.get(usage.region_id).kind;
            self.plan.diagnostics.push(Diagnostic::warning(
                SYNC_UNREACHABLE_USAGE,
                &format!("usage of '{}' inside {:?} is ignored", self.handle.name, kind),
                self.text,
                usage.offset,
            ));
        }
    }

    fn remove_invalid(&mut self) {
        let scan = self.scan;
        for decl in scan.declarations.iter().filter(|d| !d.valid) {
            let kind = self.tree.get(decl.region_id).kind;
            if decl.managed {
                self.remove(decl, RemovalReason::InvalidRegion);
            } else {
                self.plan.diagnostics.push(Diagnostic::warning(
                    SYNC_UNMANAGED_INVALID,
                    &format!("binding of '{}' inside {:?} left untouched", self.handle.name, kind),
                    self.text,
                    decl.span.start,
                ));
            }
        }
    }

    /// Host that must provide the declaration for a usage whose own host is `host`.
    fn target_host(&self, host: RegionId) -> RegionId {
        let mut hosts = self.tree.ancestors(host).filter(|r| r.is_host());
        if let Some(bound) = self
            .tree
            .ancestors(host)
            .filter(|r| r.is_host())
            .find(|r| self.user_bound.contains(&r.id))
        {
            return bound.id;
        }

        let Some(own) = hosts.next() else { return ROOT };
        if own.execution_context == ExecutionContext::ServerSide {
            return own.id;
        }
        let mut target = own.id;
        for outer in hosts {
            if outer.execution_context != ExecutionContext::ClientSide {
                break;
            }
            target = outer.id;
        }
        target
    }

    fn resolve_host(&mut self, host: RegionId, usages: Option<&[usize]>) {
        let decls = self.by_host.get(&host).cloned().unwrap_or_default();
        let managed: Vec<&Declaration> = decls.iter().copied().filter(|d| d.managed).collect();
        let unmanaged = decls.iter().filter(|d| !d.managed).count();
        let before = self.plan.actions.len();

        if unmanaged > 1 {
            if let Some(second) = decls.iter().filter(|d| !d.managed).nth(1) {
                self.plan.diagnostics.push(Diagnostic::warning(
                    SYNC_UNMANAGED_DUPLICATE,
                    &format!("'{}' is bound more than once in this scope", self.handle.name),
                    self.text,
                    second.span.start,
                ));
            }
        }

        if self.user_bound.contains(&host) {
            for decl in managed {
                self.remove(decl, RemovalReason::Shadowed);
            }
        } else if let Some(usages) = usages {
            self.satisfy(host, &managed, usages);
        } else {
            for decl in managed {
                self.remove(decl, RemovalReason::Unneeded);
            }
        }

        if self.plan.actions.len() == before {
            self.plan.actions.push(ResolvedAction::NoAction { region_id: host });
        }
    }

    /// Keep one well-placed declaration in `host`, or insert one.
    fn satisfy(&mut self, host: RegionId, managed: &[&Declaration], direct_usages: &[usize]) {
        let region = self.tree.get(host);
        let context = region.execution_context;
        let first_usage = direct_usages.iter().min().copied().unwrap_or(usize::MAX);

        let keeper = managed
            .iter()
            .position(|d| d.region_id == host && d.span.start < first_usage);

        for (idx, decl) in managed.iter().enumerate() {
            match keeper {
                Some(k) if k == idx => {}
                Some(k) if decl.region_id == host && idx > k => {
                    self.remove(decl, RemovalReason::Duplicate)
                }
                _ => self.remove(decl, RemovalReason::Misplaced),
            }
        }

        match keeper.map(|k| managed[k]) {
            Some(decl) if decl.form != Some(context) => {
                let text = self.form_for(context).to_string();
                self.plan.diagnostics.push(Diagnostic::info(
                    SYNC_REFORM,
                    &format!("declaration rewritten to the {} form", context),
                    self.text,
                    decl.span.start,
                ));
                self.plan.actions.push(ResolvedAction::Reform {
                    region_id: host,
                    span: decl.span,
                    context,
                    text,
                });
            }
            Some(_) => {}
            None => {
                let (offset, text) = self.insertion(region);
                self.plan.actions.push(ResolvedAction::Insert {
                    region_id: host,
                    offset,
                    context,
                    text,
                });
            }
        }
    }

    fn remove(&mut self, decl: &Declaration, reason: RemovalReason) {
        let message = match reason {
            RemovalReason::InvalidRegion => format!(
                "declaration inside {:?} removed",
                self.tree.get(decl.region_id).kind
            ),
            RemovalReason::Duplicate => "duplicate declaration removed".to_string(),
            RemovalReason::Unneeded => "declaration without usages removed".to_string(),
            RemovalReason::Misplaced => "declaration moved to the top of its scope".to_string(),
            RemovalReason::Shadowed => {
                format!("'{}' is already bound in this scope", self.handle.name)
            }
        };
        let diagnostic = match reason {
            RemovalReason::InvalidRegion => {
                Diagnostic::warning(reason.code(), &message, self.text, decl.span.start)
            }
            _ => Diagnostic::info(reason.code(), &message, self.text, decl.span.start),
        };
        self.plan.diagnostics.push(diagnostic);
        self.plan.actions.push(ResolvedAction::Remove {
            region_id: decl.region_id,
            span: decl.span,
            reason,
        });
    }

    fn form_for(&self, context: ExecutionContext) -> &'a str {
        match context {
            ExecutionContext::ClientSide => self.handle.client_form.trim(),
            ExecutionContext::ServerSide => self.handle.server_form.trim(),
        }
    }

    /// Offset and text of a fresh declaration at the top of `region`.
    fn insertion(&self, region: &Region) -> (usize, String) {
        let form = self.form_for(region.execution_context);
        if region.kind == RegionKind::Module {
            let offset = self.prologue_end();
            return if offset == 0 {
                (0, format!("{}\n\n", form))
            } else {
                (offset, format!("\n\n{}", form))
            };
        }

        let open = region.span.start + 1;
        let offset = leading_directive(self.text, open)
            .map(|(_, end)| end)
            .unwrap_or(open);
        let indent = self.body_indent(region, offset);
        (offset, format!("\n{}{}", indent, form))
    }

    /// Indentation of the first statement of a body, or one level below its brace.
    fn body_indent(&self, region: &Region, offset: usize) -> String {
        let rest = &self.text[offset..region.span.end.min(self.text.len())];
        if let Some(nl) = rest.find('\n') {
            if rest[..nl].trim().is_empty() {
                let line = rest[nl + 1..].lines().find(|l| !l.trim().is_empty()).unwrap_or("");
                let trimmed = line.trim_start();
                if !trimmed.is_empty() && !trimmed.starts_with('}') {
                    return line[..line.len() - trimmed.len()].to_string();
                }
            }
        }
        format!("{}  ", line_indent(self.text, region.span.start))
    }

    /// End of the module prologue: directives and top-level import statements.
    fn prologue_end(&self) -> usize {
        let mut end = leading_directive(self.text, 0)
            .map(|(_, end)| end)
            .unwrap_or(0);
        loop {
            let next = skip_trivia(self.text, end);
            if !IMPORT_STMT_RE.is_match(&self.text[next..]) {
                return end;
            }
            match self.import_end(next) {
                Some(stmt_end) => end = stmt_end,
                None => return end,
            }
        }
    }

    /// End of the import statement starting at `start`, just past its `;` if any.
    fn import_end(&self, start: usize) -> Option<usize> {
        let bytes = self.text.as_bytes();
        let mut i = start + "import".len();
        while i < bytes.len() {
            match bytes[i] {
                b'{' => i = self.tree.get(self.tree.innermost_at(i)).span.end,
                b'\'' | b'"' => {
                    let literal = self.tree.literal_at(i)?;
                    let mut j = literal.end;
                    while j < bytes.len() && (bytes[j] == b' ' || bytes[j] == b'\t') {
                        j += 1;
                    }
                    if bytes.get(j) == Some(&b';') {
                        j += 1;
                    }
                    return Some(j);
                }
                b';' => return Some(i + 1),
                _ => i += 1,
            }
        }
        None
    }

    /// Add the factory import when a managed declaration will need it.
    fn ensure_import(&mut self) {
        let inserting = self
            .plan
            .actions
            .iter()
            .any(|a| matches!(a, ResolvedAction::Insert { .. } | ResolvedAction::Reform { .. }));
        let removed: BTreeSet<usize> = self
            .plan
            .actions
            .iter()
            .filter_map(|a| match a {
                ResolvedAction::Remove { span, .. } => Some(span.start),
                _ => None,
            })
            .collect();
        let keeping = self
            .scan
            .declarations
            .iter()
            .any(|d| d.managed && !removed.contains(&d.span.start));
        if !(inserting || keeping) || self.factory_bound() {
            return;
        }

        let root = self.tree.root();
        let import = match root.execution_context {
            ExecutionContext::ClientSide => self.handle.imports.client.trim(),
            ExecutionContext::ServerSide => self.handle.imports.server.trim(),
        };
        if import.is_empty() {
            return;
        }
        let (offset, text) = match leading_directive(self.text, 0) {
            Some((_, end)) => (end, format!("\n{}", import)),
            None => (0, format!("{}\n", import)),
        };
        self.plan.diagnostics.push(Diagnostic::info(
            SYNC_IMPORT_ADDED,
            &format!("import for '{}' added", self.handle.factory),
            self.text,
            offset,
        ));
        // Precedes a module declaration inserted at the same offset.
        self.plan
            .actions
            .insert(0, ResolvedAction::AddImport { offset, text });
    }

    fn factory_bound(&self) -> bool {
        let factory = regex::escape(&self.handle.factory);
        let pattern = format!(
            r"\bimport\s+(?:type\s+)?(?:[\w$]+\s*,\s*)?\{{[^}}]*\b{f}\b[^}}]*\}}|\bimport\s+{f}\b|\bimport\s*\*\s*as\s+{f}\b|\b(?:function\*?|class|const|let|var)\s+{f}\b|\b(?:const|let|var)\s*\{{[^}}]*\b{f}\b[^}}]*\}}\s*=",
            f = factory
        );
        match Regex::new(&pattern) {
            Ok(re) => re
                .find_iter(self.text)
                .any(|m| !self.tree.in_literal(m.start())),
            Err(_) => false,
        }
    }
}

fn line_indent(text: &str, offset: usize) -> &str {
    let line_start = text[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line = &text[line_start..];
    let width = line
        .bytes()
        .take_while(|b| *b == b' ' || *b == b'\t')
        .count();
    &line[..width]
}
