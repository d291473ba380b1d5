//! Usage & Declaration Scanner
//!
//! One pass over the text per pattern. Every hit inside a string, comment,
//! regex or template text is ignored. Each record is attributed to the
//! innermost region containing it.

use regex::Regex;

use crate::config::{ConfigError, HandleConfig};
use crate::scope::RegionTree;
use crate::validate::{Declaration, ExecutionContext, RegionId, Span, UsageSite};

/// Handle-specific patterns, compiled once per configuration.
#[derive(Debug, Clone)]
pub struct HandlePatterns {
    pub name: String,
    usage: Regex,
    binding: Regex,
    parameter: Regex,
    client_form: Regex,
    server_form: Regex,
}

impl HandlePatterns {
    pub fn new(config: &HandleConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let name = regex::escape(&config.name);
        Ok(HandlePatterns {
            name: config.name.clone(),
            usage: Regex::new(&format!(r"(?:^|[^\w$.])({})\s*\??\.\s*[\w$#]", name))?,
            binding: Regex::new(&format!(r"(?:^|[^\w$.])((?:const|let|var)\s+{})(?:[^\w$]|$)", name))?,
            parameter: Regex::new(&format!(r"(?:^|[^\w$.:])({})\s*(?:[?:,=)}}\]]|$)", name))?,
            client_form: Regex::new(&form_pattern(&config.client_form))?,
            server_form: Regex::new(&form_pattern(&config.server_form))?,
        })
    }

    /// Canonical form matched at the start of `text`, with its length.
    fn managed_form(&self, text: &str) -> Option<(ExecutionContext, usize)> {
        if let Some(m) = self.server_form.find(text) {
            return Some((ExecutionContext::ServerSide, m.end()));
        }
        self.client_form
            .find(text)
            .map(|m| (ExecutionContext::ClientSide, m.end()))
    }
}

/// Compile a canonical form into a whitespace-tolerant, anchored pattern.
/// `const` also matches `let` and `var`; the trailing semicolon is optional.
fn form_pattern(form: &str) -> String {
    let mut tokens: Vec<String> = Vec::new();
    let mut word = String::new();
    for c in form.trim().chars() {
        if c.is_alphanumeric() || c == '_' || c == '$' {
            word.push(c);
            continue;
        }
        if !word.is_empty() {
            tokens.push(std::mem::take(&mut word));
        }
        if !c.is_whitespace() {
            tokens.push(c.to_string());
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }

    let trailing_semi = tokens.last().map(|t| t == ";").unwrap_or(false);
    if trailing_semi {
        tokens.pop();
    }

    let mut pattern = String::from("^");
    let mut prev_word = false;
    for (idx, token) in tokens.iter().enumerate() {
        let is_word = token.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$');
        if idx > 0 {
            pattern.push_str(if prev_word && is_word { r"\s+" } else { r"\s*" });
        }
        if idx == 0 && token == "const" {
            pattern.push_str("(?:const|let|var)");
        } else {
            pattern.push_str(&regex::escape(token));
        }
        prev_word = is_word;
    }
    if trailing_semi {
        pattern.push_str(r"(?:[ \t]*;)?");
    }
    pattern
}

#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub usages: Vec<UsageSite>,
    /// Usages in import blocks or type annotations.
    pub unreachable: Vec<UsageSite>,
    pub declarations: Vec<Declaration>,
    /// Executable bodies whose own parameter list binds the handle.
    pub parameter_bindings: Vec<RegionId>,
}

pub fn scan(tree: &RegionTree, text: &str, patterns: &HandlePatterns) -> ScanResult {
    let mut result = ScanResult::default();

    for caps in patterns.usage.captures_iter(text) {
        let Some(m) = caps.get(1) else { continue };
        if tree.in_literal(m.start()) {
            continue;
        }
        let region_id = tree.innermost_at(m.start());
        let site = UsageSite {
            region_id,
            offset: m.start(),
        };
        if tree.get(region_id).kind.is_unreachable() {
            result.unreachable.push(site);
        } else {
            result.usages.push(site);
        }
    }

    for caps in patterns.binding.captures_iter(text) {
        let Some(m) = caps.get(1) else { continue };
        if tree.in_literal(m.start()) {
            continue;
        }
        let region_id = tree.innermost_at(m.start());
        let valid = tree.get(region_id).kind.accepts_declaration();
        let declaration = match patterns.managed_form(&text[m.start()..]) {
            Some((form, len)) => Declaration {
                region_id,
                span: Span::new(m.start(), m.start() + len),
                valid,
                managed: true,
                form: Some(form),
            },
            None => Declaration {
                region_id,
                span: Span::new(m.start(), m.end()),
                valid,
                managed: false,
                form: None,
            },
        };
        result.declarations.push(declaration);
    }

    for region in tree.regions() {
        let Some(signature) = region.signature else { continue };
        if !region.is_host() {
            continue;
        }
        let inner = tree.get(signature).inner();
        let params = &text[inner.start..inner.end];
        let bound = patterns
            .parameter
            .captures_iter(params)
            .filter_map(|c| c.get(1))
            .filter(|m| !tree.in_literal(inner.start + m.start()))
            .filter(|m| !inside_declaration(&result.declarations, inner.start + m.start()))
            .any(|m| !is_renamed_key(params, m.start(), m.end()));
        if bound {
            result.parameter_bindings.push(region.id);
        }
    }

    result
}

/// Declarations a previous rewrite left in a parameter list are not parameters.
fn inside_declaration(declarations: &[Declaration], offset: usize) -> bool {
    declarations.iter().any(|d| d.span.contains(offset))
}

/// `{ supabase: other }` inside a destructuring pattern binds `other`, not the handle.
fn is_renamed_key(params: &str, start: usize, end: usize) -> bool {
    let follows_colon = params[end..].trim_start().starts_with(':');
    if !follows_colon {
        return false;
    }
    let depth = params[..start].bytes().fold(0i32, |depth, b| match b {
        b'{' | b'[' => depth + 1,
        b'}' | b']' => depth - 1,
        _ => depth,
    });
    depth > 0
}
