//! Region Classifier
//!
//! Assigns a `RegionKind` to every region from its header: the text between the
//! start of the enclosing statement (or the parent's opening delimiter) and the
//! region's own opening delimiter. Rules are evaluated in a fixed order and the
//! first match wins:
//!
//! 1. `import {` / `export {` braces → `ImportBlock`
//! 2. braces after a function, method or arrow signature → `ExecutableBody`
//! 3. braces/brackets in type position → `TypeAnnotation`
//! 4. signature parentheses, and anything nested in them → `ParameterList`
//! 5. braces in expression position, class bodies, brackets → `ObjectLiteral`
//! 6. the root → `Module`
//! 7. everything else inherits the parent's kind (control-flow blocks, calls)
//!
//! Destructured parameters look like object literals; rule 4 keeps them
//! parameter lists.

use lazy_static::lazy_static;
use regex::Regex;

use crate::scope::{leading_directive, skip_trivia, RegionTree, ROOT};
use crate::validate::{Delimiter, ExecutionContext, Region, RegionId, RegionKind};

/// How far the classifier looks around a parenthesis to decide if it is a signature.
const LOOK_WINDOW: usize = 400;

const CONTROL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "with", "return", "typeof", "await", "new",
    "delete", "void", "in", "of", "else", "do", "yield", "throw",
];

lazy_static! {
    static ref IMPORT_HEADER_RE: Regex =
        Regex::new(r"^(?:import|export)(?:\s+type)?(?:\s+[\w$]+\s*,)?$").unwrap();
    static ref RETURN_TYPE_TAIL_RE: Regex =
        Regex::new(r"^\s*(?::[^;=]*[\w$\]>)}?])?\s*$").unwrap();
    static ref ARROW_AFTER_RE: Regex =
        Regex::new(r"^\s*(?::(?:[^;={}]|\{\})*?)?=>").unwrap();
    static ref BLOCK_AFTER_RE: Regex = Regex::new(r"^\s*(?::[^;=]*?)?\{").unwrap();
    static ref FUNCTION_HEAD_RE: Regex =
        Regex::new(r"\bfunction\s*\*?\s*[\w$]*\s*(?:<[^()]*>)?\s*$").unwrap();
    static ref METHOD_HEAD_RE: Regex = Regex::new(
        r"(?:^|[\s,{;}*])(?:(?:async|static|public|private|protected|readonly|override|get|set)\s+)*#?([\w$]+)\s*(?:<[^()]*>)?\??\s*$"
    )
    .unwrap();
    static ref TYPE_DECL_RE: Regex = Regex::new(
        r"^(?:export\s+)?(?:default\s+)?(?:declare\s+)?(?:const\s+)?(?:interface|enum)\s+[\w$]"
    )
    .unwrap();
    static ref TYPE_ALIAS_RE: Regex = Regex::new(r"\btype\s+[\w$]+\s*(?:<[^=]*>)?\s*=$").unwrap();
    static ref TYPE_TAIL_RE: Regex = Regex::new(
        r"(?:(?:^|[^|])\||(?:^|[^&])&|<|\bas|\bsatisfies|\bextends|\bkeyof|\)\s*:|\b(?:const|let|var)\s+[\w$]+\s*:|\bdeclare\s+(?:module\s+\S+|global))$"
    )
    .unwrap();
    static ref ASSIGN_TAIL_RE: Regex = Regex::new(r"(?:^|[^=!<>])=$").unwrap();
    static ref OBJECT_TAIL_RE: Regex =
        Regex::new(r"(?:\breturn|\byield|\?|\?\?|\|\||&&|\.\.\.|\bexport\s+default)$").unwrap();
    static ref CLASS_HEAD_RE: Regex = Regex::new(
        r"(?:^|\s)class(?:\s+[\w$]+)?(?:\s*<[^{}]*>)?(?:\s+(?:extends|implements)\s+[^{};]+)?$"
    )
    .unwrap();
    static ref PROPERTY_START_RE: Regex =
        Regex::new(r#"^(?:[\w$]+|'[^'\n]*'|"[^"\n]*"|\[[^\]\n]*\])\s*\??\s*:[^:]"#).unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Classification {
    kind: RegionKind,
    inherited: bool,
    signature: Option<RegionId>,
    directive: Option<ExecutionContext>,
}

impl Classification {
    fn matched(kind: RegionKind) -> Self {
        Classification {
            kind,
            inherited: false,
            signature: None,
            directive: None,
        }
    }
}

/// Classify every region of `tree` in place, top-down and in source order.
///
/// The module's context comes from a leading directive, then `hint`, then
/// defaults to server-side.
pub fn classify_tree(tree: &mut RegionTree, text: &str, hint: Option<ExecutionContext>) {
    let directive = leading_directive(text, 0).map(|(ctx, _)| ctx);
    {
        let root = tree.get_mut(ROOT);
        root.kind = RegionKind::Module;
        root.inherited = false;
        root.directive = directive;
        root.execution_context = directive.or(hint).unwrap_or_default();
    }

    // Explicit stack keeps deep nesting off the call stack.
    let mut pending = vec![ROOT];
    while let Some(parent) = pending.pop() {
        let children = tree.get(parent).children.clone();
        for (idx, &child) in children.iter().enumerate() {
            let c = classify_region(tree, text, parent, &children[..idx], child);
            let parent_ctx = tree.get(parent).execution_context;
            let region = tree.get_mut(child);
            region.kind = c.kind;
            region.inherited = c.inherited;
            region.signature = c.signature;
            region.directive = c.directive;
            region.execution_context = c.directive.unwrap_or(parent_ctx);
        }
        // Reverse so children are processed in source order.
        pending.extend(children.iter().rev());
    }
}

fn classify_region(
    tree: &RegionTree,
    text: &str,
    parent_id: RegionId,
    siblings: &[RegionId],
    id: RegionId,
) -> Classification {
    let parent = tree.get(parent_id);
    let region = tree.get(id);
    let open = region.span.start;
    let start = header_start(tree, text, parent, siblings, open);
    let header = text[start..open].trim();

    if region.delimiter == Delimiter::Brace {
        // Rule 1
        if IMPORT_HEADER_RE.is_match(header) {
            return Classification::matched(RegionKind::ImportBlock);
        }
        // Rule 2
        let params = last_parameter_list(tree, siblings, start);
        let is_body = header.ends_with("=>")
            || params
                .map(|p| {
                    let tail = collapse(tree, text, parent, tree.get(p).span.end, open);
                    RETURN_TYPE_TAIL_RE.is_match(&tail)
                })
                .unwrap_or(false);
        if is_body {
            return Classification {
                kind: RegionKind::ExecutableBody,
                inherited: false,
                signature: params,
                directive: leading_directive(text, open + 1).map(|(ctx, _)| ctx),
            };
        }
    }

    // Rule 3
    if matches!(region.delimiter, Delimiter::Brace | Delimiter::Bracket)
        && (parent.kind == RegionKind::TypeAnnotation || is_type_header(header))
    {
        return Classification::matched(RegionKind::TypeAnnotation);
    }

    // Rule 4
    if parent.kind == RegionKind::ParameterList
        || (region.delimiter == Delimiter::Paren && is_signature_paren(tree, text, parent, region))
    {
        return Classification::matched(RegionKind::ParameterList);
    }

    // Rule 5
    let object = match region.delimiter {
        Delimiter::Bracket => true,
        Delimiter::Brace => is_object_header(text, header, parent, region),
        _ => false,
    };
    if object {
        return Classification::matched(RegionKind::ObjectLiteral);
    }

    // Rule 7
    Classification {
        kind: parent.kind,
        inherited: true,
        signature: None,
        directive: None,
    }
}

/// Walk back from `open` to the start of the enclosing statement, stepping over
/// earlier sibling regions (parameter lists, type literals) that are part of it.
fn header_start(
    tree: &RegionTree,
    text: &str,
    parent: &Region,
    siblings: &[RegionId],
    open: usize,
) -> usize {
    let bytes = text.as_bytes();
    let floor = parent.inner().start;
    let comma_ends_statement = matches!(parent.delimiter, Delimiter::Paren | Delimiter::Bracket)
        || parent.kind == RegionKind::ObjectLiteral;
    let mut remaining = siblings;
    let mut i = open;

    while i > floor {
        if let Some((&last, rest)) = remaining.split_last() {
            let sibling = tree.get(last);
            if sibling.span.end == i {
                if sibling.delimiter == Delimiter::Brace && !continues_type(text, sibling) {
                    break;
                }
                i = sibling.span.start;
                remaining = rest;
                continue;
            }
        }
        match bytes[i - 1] {
            b';' => break,
            b',' if comma_ends_statement => break,
            _ => i -= 1,
        }
    }

    skip_trivia(text, i).min(open)
}

/// A type literal followed by more of the same type or signature (`> {`, `| ...`).
fn continues_type(text: &str, sibling: &Region) -> bool {
    sibling.kind == RegionKind::TypeAnnotation
        && matches!(
            text[sibling.span.end..].trim_start().as_bytes().first(),
            Some(b'>' | b'|' | b'&' | b'[' | b'=' | b'{' | b')' | b',')
        )
}

/// The last signature parenthesis among the siblings that belong to this header.
fn last_parameter_list(tree: &RegionTree, siblings: &[RegionId], start: usize) -> Option<RegionId> {
    siblings
        .iter()
        .rev()
        .map(|&s| tree.get(s))
        .take_while(|s| s.span.start >= start)
        .find(|s| s.kind == RegionKind::ParameterList && s.delimiter == Delimiter::Paren)
        .map(|s| s.id)
}

fn is_type_header(header: &str) -> bool {
    TYPE_DECL_RE.is_match(header) || TYPE_ALIAS_RE.is_match(header) || TYPE_TAIL_RE.is_match(header)
}

fn is_signature_paren(tree: &RegionTree, text: &str, parent: &Region, region: &Region) -> bool {
    let after = collapse(tree, text, parent, region.span.end, parent.inner().end);
    if ARROW_AFTER_RE.is_match(&after) {
        return true;
    }
    if !BLOCK_AFTER_RE.is_match(&after) {
        return false;
    }
    let before = window_before(text, parent.inner().start, region.span.start);
    if FUNCTION_HEAD_RE.is_match(before) {
        return true;
    }
    METHOD_HEAD_RE
        .captures(before)
        .and_then(|caps| caps.get(1))
        .map(|name| !CONTROL_KEYWORDS.contains(&name.as_str()))
        .unwrap_or(false)
}

fn is_object_header(text: &str, header: &str, parent: &Region, region: &Region) -> bool {
    // Class bodies hold members, not statements.
    if CLASS_HEAD_RE.is_match(header) {
        return true;
    }
    let expression_slot = header.is_empty() || header.ends_with(',');
    if matches!(parent.delimiter, Delimiter::Paren | Delimiter::Bracket) && expression_slot {
        return true;
    }
    if parent.kind == RegionKind::ObjectLiteral && (expression_slot || header.ends_with(':')) {
        return true;
    }
    if ASSIGN_TAIL_RE.is_match(header) || OBJECT_TAIL_RE.is_match(header) {
        return true;
    }
    // Call argument starting with `name:`.
    parent.delimiter == Delimiter::Paren
        && PROPERTY_START_RE.is_match(&text[skip_trivia(text, region.span.start + 1)..])
}

/// `text[from..to]` with each child region of `parent` reduced to its bare
/// delimiters (`{}`, `()`, `[]`), each string or regex to `''` and each comment
/// to a space. Type literals and defaults inside a signature then cannot hide
/// its shape. At most `LOOK_WINDOW` bytes are produced.
fn collapse(tree: &RegionTree, text: &str, parent: &Region, from: usize, to: usize) -> String {
    let bytes = text.as_bytes();
    let children = &parent.children;
    let mut next = children.partition_point(|&c| tree.get(c).span.start < from);
    let mut out = String::new();
    let mut i = from;

    while i < to && out.len() < LOOK_WINDOW {
        if let Some(child) = children.get(next).map(|&c| tree.get(c)) {
            if child.span.start == i {
                out.push(bytes[child.span.start] as char);
                out.push(bytes[child.span.end - 1] as char);
                i = child.span.end;
                next += 1;
                continue;
            }
        }
        if let Some(literal) = tree.literal_at(i) {
            let comment = bytes[i] == b'/' && matches!(bytes.get(i + 1), Some(b'/' | b'*'));
            out.push_str(if comment { " " } else { "''" });
            i = literal.end.max(i + 1);
            continue;
        }
        match text[i..].chars().next() {
            Some(ch) => {
                out.push(ch);
                i += ch.len_utf8();
            }
            None => break,
        }
    }
    out
}

fn window_before(text: &str, floor: usize, to: usize) -> &str {
    let mut start = to.saturating_sub(LOOK_WINDOW).max(floor);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..to]
}
