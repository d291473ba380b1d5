//! Scope Tree Builder
//!
//! Splits source text into a tree of regions delimited by `{}`, `[]` and `()`,
//! skipping delimiters inside strings, template literals, comments, regex
//! literals and JSX text. The whole file is the implicit module region (id 0).
//! Braces of JSX expression containers are ordinary regions.
//!
//! Regions come out unclassified; `classify::classify_tree` assigns kinds.

use crate::validate::{
    Delimiter, EngineError, ExecutionContext, Region, RegionId, RegionKind, Span,
};

pub const ROOT: RegionId = 0;

/// Keywords after which a `/` starts a regex literal rather than a division.
const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "yield", "await", "in", "of", "void", "delete", "throw", "else",
    "do", "instanceof", "new",
];

#[derive(Debug, Clone)]
pub struct RegionTree {
    regions: Vec<Region>,
    /// Strings, comments, regex literals and template text, in source order.
    literals: Vec<Span>,
}

enum Frame {
    Open(RegionId),
    /// `${` inside a template literal; its `}` resumes the template.
    Interpolation,
    /// JSX suspended at a `{` expression container; the brace's close resumes it.
    Jsx(JsxState),
}

#[derive(Debug, Clone, Copy)]
struct JsxState {
    /// Elements whose children are being scanned.
    depth: usize,
    /// Inside an opening tag, among its attributes.
    in_tag: bool,
}

impl RegionTree {
    /// Build the region tree in one linear pass.
    pub fn build(text: &str) -> Result<RegionTree, EngineError> {
        let mut builder = Builder {
            text,
            bytes: text.as_bytes(),
            regions: vec![Region {
                id: ROOT,
                kind: RegionKind::Module,
                parent: None,
                children: Vec::new(),
                span: Span::new(0, text.len()),
                delimiter: Delimiter::None,
                execution_context: ExecutionContext::default(),
                directive: None,
                inherited: false,
                signature: None,
            }],
            stack: Vec::new(),
            literals: Vec::new(),
        };
        builder.run()?;
        Ok(RegionTree {
            regions: builder.regions,
            literals: builder.literals,
        })
    }

    pub fn root(&self) -> &Region {
        &self.regions[ROOT]
    }

    pub fn get(&self, id: RegionId) -> &Region {
        &self.regions[id]
    }

    pub fn get_mut(&mut self, id: RegionId) -> &mut Region {
        &mut self.regions[id]
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Innermost region containing `offset`, by interval search over sorted children.
    pub fn innermost_at(&self, offset: usize) -> RegionId {
        let mut current = ROOT;
        loop {
            let children = &self.regions[current].children;
            let idx = children.partition_point(|&c| self.regions[c].span.start <= offset);
            if idx == 0 {
                return current;
            }
            let candidate = children[idx - 1];
            if self.regions[candidate].span.contains(offset) {
                current = candidate;
            } else {
                return current;
            }
        }
    }

    /// `id` and all of its ancestors, innermost first.
    pub fn ancestors(&self, id: RegionId) -> impl Iterator<Item = &Region> + '_ {
        let mut next = Some(id);
        std::iter::from_fn(move || {
            let region = &self.regions[next?];
            next = region.parent;
            Some(region)
        })
    }

    /// Nearest region (self included) able to host a declaration.
    pub fn host_of(&self, id: RegionId) -> RegionId {
        self.ancestors(id)
            .find(|r| r.is_host())
            .map(|r| r.id)
            .unwrap_or(ROOT)
    }

    /// The string, comment, regex or template text covering `offset`.
    pub fn literal_at(&self, offset: usize) -> Option<Span> {
        let idx = self.literals.partition_point(|s| s.start <= offset);
        if idx == 0 {
            return None;
        }
        let span = self.literals[idx - 1];
        span.contains(offset).then_some(span)
    }

    pub fn in_literal(&self, offset: usize) -> bool {
        self.literal_at(offset).is_some()
    }
}

struct Builder<'a> {
    text: &'a str,
    bytes: &'a [u8],
    regions: Vec<Region>,
    stack: Vec<Frame>,
    literals: Vec<Span>,
}

impl<'a> Builder<'a> {
    fn run(&mut self) -> Result<(), EngineError> {
        let len = self.bytes.len();
        let mut i = 0;
        let mut prev_sig: Option<usize> = None;

        while i < len {
            let c = self.bytes[i];
            match c {
                b'/' if self.peek(i + 1) == Some(b'/') => {
                    let end = skip_line_comment(self.bytes, i);
                    self.literals.push(Span::new(i, end));
                    i = end;
                    continue;
                }
                b'/' if self.peek(i + 1) == Some(b'*') => {
                    let end = skip_block_comment(self.bytes, i)
                        .ok_or_else(|| EngineError::malformed(self.text, i, "unterminated comment"))?;
                    self.literals.push(Span::new(i, end));
                    i = end;
                    continue;
                }
                b'/' if self.regex_allowed(prev_sig) && !self.closes_tag(i, prev_sig) => {
                    if let Some(end) = skip_regex(self.bytes, i) {
                        self.literals.push(Span::new(i, end));
                        prev_sig = Some(end - 1);
                        i = end;
                        continue;
                    }
                }
                // An unterminated quote is plain text (JSX prose that slipped through).
                b'\'' | b'"' => {
                    if let Some(end) = skip_string(self.bytes, i) {
                        self.literals.push(Span::new(i, end));
                        prev_sig = Some(end - 1);
                        i = end;
                        continue;
                    }
                }
                b'<' if self.jsx_starts(i, prev_sig) => {
                    i = self.start_jsx(i)?;
                    prev_sig = Some(i - 1);
                    continue;
                }
                b'`' => {
                    i = self.scan_template(i + 1)?;
                    prev_sig = Some(i - 1);
                    continue;
                }
                b'{' | b'[' | b'(' => self.open(i, c),
                b'}' | b']' | b')' => {
                    if let Some(resume) = self.close(i, c)? {
                        i = resume;
                        prev_sig = Some(i - 1);
                        continue;
                    }
                }
                _ => {}
            }
            if !c.is_ascii_whitespace() {
                prev_sig = Some(i);
            }
            i += 1;
        }

        match self.stack.last() {
            None => Ok(()),
            Some(Frame::Open(id)) => {
                let region = &self.regions[*id];
                let open = region.span.start;
                Err(EngineError::malformed(
                    self.text,
                    open,
                    format!("unclosed '{}'", self.bytes[open] as char),
                ))
            }
            Some(Frame::Interpolation) | Some(Frame::Jsx(_)) => Err(EngineError::malformed(
                self.text,
                len,
                "unterminated template literal or JSX element",
            )),
        }
    }

    fn peek(&self, i: usize) -> Option<u8> {
        self.bytes.get(i).copied()
    }

    fn current_region(&self) -> RegionId {
        self.stack
            .iter()
            .rev()
            .find_map(|f| match f {
                Frame::Open(id) => Some(*id),
                Frame::Interpolation | Frame::Jsx(_) => None,
            })
            .unwrap_or(ROOT)
    }

    fn open(&mut self, at: usize, c: u8) {
        let delimiter = Delimiter::from_open(c).unwrap_or(Delimiter::None);
        let parent = self.current_region();
        let id = self.regions.len();
        self.regions.push(Region {
            id,
            kind: RegionKind::Module,
            parent: Some(parent),
            children: Vec::new(),
            span: Span::new(at, at + 1),
            delimiter,
            execution_context: ExecutionContext::default(),
            directive: None,
            inherited: true,
            signature: None,
        });
        self.regions[parent].children.push(id);
        self.stack.push(Frame::Open(id));
    }

    /// Returns a resume offset when the brace closed a template interpolation.
    fn close(&mut self, at: usize, c: u8) -> Result<Option<usize>, EngineError> {
        match self.stack.pop() {
            Some(Frame::Interpolation) if c == b'}' => self.scan_template(at + 1).map(Some),
            Some(Frame::Open(id)) if self.regions[id].delimiter.close() == Some(c) => {
                self.regions[id].span.end = at + 1;
                if let Some(Frame::Jsx(state)) = self.stack.last() {
                    let state = *state;
                    self.stack.pop();
                    return self.scan_jsx(at + 1, state).map(Some);
                }
                Ok(None)
            }
            Some(Frame::Open(id)) => {
                let open = self.regions[id].span.start;
                Err(EngineError::malformed(
                    self.text,
                    at,
                    format!(
                        "'{}' does not match '{}' opened at byte {}",
                        c as char, self.bytes[open] as char, open
                    ),
                ))
            }
            Some(Frame::Interpolation) => Err(EngineError::malformed(
                self.text,
                at,
                format!("'{}' inside template interpolation", c as char),
            )),
            Some(Frame::Jsx(_)) => Err(EngineError::malformed(
                self.text,
                at,
                format!("unexpected '{}' in JSX", c as char),
            )),
            None => Err(EngineError::malformed(
                self.text,
                at,
                format!("unexpected '{}'", c as char),
            )),
        }
    }

    /// Scan template literal text starting at `i`. Returns the offset after the
    /// closing backtick, or after `${` (pushing an interpolation frame).
    fn scan_template(&mut self, mut i: usize) -> Result<usize, EngineError> {
        let segment_start = i.saturating_sub(1);
        while i < self.bytes.len() {
            match self.bytes[i] {
                b'\\' => i += 2,
                b'`' => {
                    self.literals.push(Span::new(segment_start, i + 1));
                    return Ok(i + 1);
                }
                b'$' if self.peek(i + 1) == Some(b'{') => {
                    self.literals.push(Span::new(segment_start, i + 2));
                    self.stack.push(Frame::Interpolation);
                    return Ok(i + 2);
                }
                _ => i += 1,
            }
        }
        Err(EngineError::malformed(
            self.text,
            self.bytes.len(),
            "unterminated template literal",
        ))
    }

    /// `<` in expression position opening an element or fragment, as opposed
    /// to a comparison, a type argument list or a generic arrow's parameters.
    fn jsx_starts(&self, i: usize, prev_sig: Option<usize>) -> bool {
        if !self.regex_allowed(prev_sig) || prev_sig.map(|p| self.bytes[p]) == Some(b'}') {
            return false;
        }
        match self.peek(i + 1) {
            Some(b'>') => self.text[i + 2..].contains("</>"),
            Some(b) if b.is_ascii_alphabetic() || b == b'_' || b == b'$' => {
                let name_end = jsx_name_end(self.bytes, i + 1);
                let name = &self.text[i + 1..name_end];
                let after = &self.text[skip_inline_space(self.text, name_end)..];
                if after.starts_with(',') || after.starts_with("extends ") {
                    return false;
                }
                self_closing_tag(self.bytes, name_end) || has_closing_tag(self.text, name_end, name)
            }
            _ => false,
        }
    }

    /// `/>` right after an attribute container is the end of a tag.
    fn closes_tag(&self, i: usize, prev_sig: Option<usize>) -> bool {
        self.peek(i + 1) == Some(b'>') && prev_sig.map(|p| self.bytes[p]) == Some(b'}')
    }

    fn start_jsx(&mut self, i: usize) -> Result<usize, EngineError> {
        if self.peek(i + 1) == Some(b'>') {
            let state = JsxState {
                depth: 1,
                in_tag: false,
            };
            return self.scan_jsx(i + 2, state);
        }
        let state = JsxState {
            depth: 0,
            in_tag: true,
        };
        self.scan_jsx(i + 1, state)
    }

    /// Scan JSX from `i` until the outermost element closes and return the
    /// offset after it. At a `{` expression container, suspend on the frame
    /// stack and return the brace's offset instead.
    fn scan_jsx(&mut self, mut i: usize, mut state: JsxState) -> Result<usize, EngineError> {
        let len = self.bytes.len();
        let mut text_start = i;
        while i < len {
            let c = self.bytes[i];
            if state.in_tag {
                match c {
                    b'{' => {
                        self.stack.push(Frame::Jsx(state));
                        return Ok(i);
                    }
                    b'"' | b'\'' => {
                        let end = self.bytes[i + 1..]
                            .iter()
                            .position(|&b| b == c)
                            .map(|p| i + p + 2)
                            .unwrap_or(len);
                        self.literals.push(Span::new(i, end));
                        i = end;
                    }
                    b'/' if self.peek(i + 1) == Some(b'>') => {
                        i += 2;
                        if state.depth == 0 {
                            return Ok(i);
                        }
                        state.in_tag = false;
                        text_start = i;
                    }
                    b'>' => {
                        i += 1;
                        state.depth += 1;
                        state.in_tag = false;
                        text_start = i;
                    }
                    _ => i += 1,
                }
                continue;
            }

            match c {
                b'{' => {
                    self.push_jsx_text(text_start, i);
                    self.stack.push(Frame::Jsx(state));
                    return Ok(i);
                }
                b'<' => {
                    self.push_jsx_text(text_start, i);
                    let next = skip_trivia(self.text, i + 1);
                    match self.peek(next) {
                        Some(b'/') => {
                            i = self.bytes[next..]
                                .iter()
                                .position(|&b| b == b'>')
                                .map(|p| next + p + 1)
                                .unwrap_or(len);
                            state.depth = state.depth.saturating_sub(1);
                            if state.depth == 0 {
                                return Ok(i);
                            }
                        }
                        Some(b'>') => {
                            i = next + 1;
                            state.depth += 1;
                        }
                        _ => {
                            i += 1;
                            state.in_tag = true;
                        }
                    }
                    text_start = i;
                }
                _ => i += 1,
            }
        }
        Err(EngineError::malformed(self.text, len, "unterminated JSX element"))
    }

    fn push_jsx_text(&mut self, start: usize, end: usize) {
        if !self.text[start..end].trim().is_empty() {
            self.literals.push(Span::new(start, end));
        }
    }

    fn regex_allowed(&self, prev_sig: Option<usize>) -> bool {
        let Some(p) = prev_sig else {
            return true;
        };
        match self.bytes[p] {
            b'(' | b',' | b'=' | b':' | b'[' | b'!' | b'&' | b'|' | b'?' | b'{' | b'}' | b';'
            | b'+' | b'-' | b'*' | b'%' | b'~' | b'^' => true,
            b'>' => p > 0 && self.bytes[p - 1] == b'=',
            b if is_ident_byte(b) => {
                let start = self.bytes[..=p]
                    .iter()
                    .rposition(|b| !is_ident_byte(*b))
                    .map(|s| s + 1)
                    .unwrap_or(0);
                REGEX_PREFIX_KEYWORDS.contains(&&self.text[start..=p])
            }
            _ => false,
        }
    }
}

pub fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn skip_line_comment(bytes: &[u8], i: usize) -> usize {
    bytes[i..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| i + p)
        .unwrap_or(bytes.len())
}

fn skip_block_comment(bytes: &[u8], i: usize) -> Option<usize> {
    bytes[i + 2..]
        .windows(2)
        .position(|w| w == b"*/")
        .map(|p| i + 2 + p + 2)
}

/// Offset past the closing quote, or `None` when the line ends first.
fn skip_string(bytes: &[u8], i: usize) -> Option<usize> {
    let quote = bytes[i];
    let mut j = i + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'\n' => return None,
            b if b == quote => return Some(j + 1),
            _ => j += 1,
        }
    }
    None
}

fn jsx_name_end(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && (is_ident_byte(bytes[i]) || matches!(bytes[i], b'.' | b':' | b'-')) {
        i += 1;
    }
    i
}

/// Whether the tag whose name ends at `i` closes itself with `/>`.
fn self_closing_tag(bytes: &[u8], mut i: usize) -> bool {
    let mut depth = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            q @ (b'"' | b'\'') if depth == 0 => {
                match bytes[i + 1..].iter().position(|&b| b == q) {
                    Some(p) => i += p + 1,
                    None => return false,
                }
            }
            b'/' if depth == 0 && bytes.get(i + 1) == Some(&b'>') => return true,
            b'>' | b';' if depth == 0 => return false,
            _ => {}
        }
        i += 1;
    }
    false
}

/// Whether `</name` appears after `from`.
fn has_closing_tag(text: &str, from: usize, name: &str) -> bool {
    let needle = format!("</{}", name);
    text[from..].match_indices(&needle).any(|(at, _)| {
        let end = from + at + needle.len();
        text.as_bytes()
            .get(end)
            .map(|&b| !is_ident_byte(b) && !matches!(b, b'.' | b':' | b'-'))
            .unwrap_or(false)
    })
}

/// Regex literal ending on the same line, or `None` if this `/` is a division.
fn skip_regex(bytes: &[u8], i: usize) -> Option<usize> {
    let mut j = i + 1;
    let mut in_class = false;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'\n' => return None,
            b'[' => {
                in_class = true;
                j += 1;
            }
            b']' => {
                in_class = false;
                j += 1;
            }
            b'/' if !in_class => {
                j += 1;
                while j < bytes.len() && bytes[j].is_ascii_alphabetic() {
                    j += 1;
                }
                return Some(j);
            }
            _ => j += 1,
        }
    }
    None
}

/// Skip whitespace and comments from `i`.
pub fn skip_trivia(text: &str, mut i: usize) -> usize {
    let bytes = text.as_bytes();
    while i < bytes.len() {
        match bytes[i] {
            b if b.is_ascii_whitespace() => i += 1,
            b'/' if bytes.get(i + 1) == Some(&b'/') => i = skip_line_comment(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => match skip_block_comment(bytes, i) {
                Some(end) => i = end,
                None => return bytes.len(),
            },
            _ => break,
        }
    }
    i
}

/// A `'use client'` / `'use server'` statement starting at the first token
/// after `from`. Returns the context and the offset just past the statement.
pub fn leading_directive(text: &str, from: usize) -> Option<(ExecutionContext, usize)> {
    let mut i = skip_trivia(text, from);
    let mut found = None;
    // Several directives may be stacked ('use strict'; 'use client';).
    loop {
        let bytes = text.as_bytes();
        if !matches!(bytes.get(i), Some(b'\'' | b'"')) {
            break;
        }
        let Some(end) = skip_string(bytes, i) else {
            break;
        };
        let body = &text[i + 1..end - 1];
        let mut stmt_end = end;
        let after = skip_inline_space(text, end);
        if bytes.get(after) == Some(&b';') {
            stmt_end = after + 1;
        } else if !matches!(bytes.get(after), None | Some(b'\n') | Some(b'\r') | Some(b'}')) {
            // A string expression, not a directive statement.
            break;
        }
        match body {
            "use client" => found = Some((ExecutionContext::ClientSide, stmt_end)),
            "use server" => found = Some((ExecutionContext::ServerSide, stmt_end)),
            b if b.starts_with("use ") => {
                if let Some((ctx, _)) = found {
                    found = Some((ctx, stmt_end));
                }
            }
            _ => break,
        }
        i = skip_trivia(text, stmt_end);
    }
    found
}

fn skip_inline_space(text: &str, mut i: usize) -> usize {
    let bytes = text.as_bytes();
    while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
        i += 1;
    }
    i
}
