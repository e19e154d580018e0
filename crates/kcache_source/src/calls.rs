//! Call-site and name-reference discovery over normalized tokens.

use std::collections::BTreeSet;

use crate::normalize::{Token, TokenKind};

/// Reserved words that never name a call target or a variable reference.
const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

/// Operators that bind the names on their left.
const ASSIGN_OPS: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "//=", "%=", "**=", "&=", "|=", "^=", ">>=", "<<=", "@=",
];

/// Statement keywords that may carry a one-line body after `:`.
const COMPOUND: &[&str] = &[
    "if", "elif", "else", "while", "for", "with", "try", "except", "finally",
];

fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

/// A call expression found in a fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    /// Flattened callee: `f`, `mod.f`, `obj.method`, or `.method` when the
    /// receiver is itself an expression (`g(x).method()`, `a[i].method()`).
    pub path: String,
    /// 1-indexed line within the fragment.
    pub line: u32,
}

impl CallSite {
    /// Returns `true` if the callee is a method on an unnamed expression.
    pub fn is_expression_method(&self) -> bool {
        self.path.starts_with('.')
    }
}

/// An identifier used as a value (not an attribute, keyword argument name,
/// or definition name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRef {
    /// The referenced name.
    pub name: String,
    /// 1-indexed line within the fragment.
    pub line: u32,
}

/// Returns every call expression in appearance order (by opening parenthesis).
pub fn call_sites(tokens: &[Token<'_>]) -> Vec<CallSite> {
    let mut sites = Vec::new();
    for (i, tok) in tokens.iter().enumerate() {
        if !tok.is_op("(") || i == 0 {
            continue;
        }
        let Some((start, segments)) = dotted_chain_ending_at(tokens, i - 1) else {
            continue;
        };
        let before = start.checked_sub(1).map(|j| &tokens[j]);
        let path = if before.is_some_and(|t| t.is_op(".")) {
            format!(".{}", segments.join("."))
        } else {
            if is_keyword(segments[0]) {
                continue;
            }
            if before.is_some_and(|t| t.is_ident("def") || t.is_ident("class")) {
                continue;
            }
            segments.join(".")
        };
        sites.push(CallSite {
            path,
            line: tok.line,
        });
    }
    sites
}

/// Returns every identifier referenced as a value, in appearance order.
pub fn name_references(tokens: &[Token<'_>]) -> Vec<NameRef> {
    let mut refs = Vec::new();
    let mut depth = 0usize;
    for (i, tok) in tokens.iter().enumerate() {
        match tok.kind {
            TokenKind::Op if matches!(tok.text, "(" | "[" | "{") => depth += 1,
            TokenKind::Op if matches!(tok.text, ")" | "]" | "}") => {
                depth = depth.saturating_sub(1)
            }
            TokenKind::Ident => {
                if is_keyword(tok.text) {
                    continue;
                }
                let prev = i.checked_sub(1).map(|j| &tokens[j]);
                if prev.is_some_and(|t| t.is_op(".") || t.is_ident("def") || t.is_ident("class"))
                {
                    continue;
                }
                let next = tokens.get(i + 1);
                if depth > 0 && next.is_some_and(|t| t.is_op("=")) {
                    continue;
                }
                refs.push(NameRef {
                    name: tok.text.to_string(),
                    line: tok.line,
                });
            }
            _ => {}
        }
    }
    refs
}

/// Returns every name the fragment binds locally.
///
/// Covers assignment and augmented-assignment targets, `for` targets,
/// `def` names and parameters, `lambda` parameters, `as` targets and `:=`
/// targets. Names declared `global` or `nonlocal` anywhere in the fragment
/// are not local. Subscript and attribute targets (`x[i] = ..`, `x.y = ..`)
/// bind nothing.
pub fn local_bindings(tokens: &[Token<'_>]) -> BTreeSet<String> {
    let mut bound = BTreeSet::new();
    let mut outer = BTreeSet::new();
    let breaks = |t: &Token<'_>| {
        matches!(
            t.kind,
            TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent
        )
    };
    for line in tokens.split(breaks).filter(|l| !l.is_empty()) {
        if line[0].is_ident("global") || line[0].is_ident("nonlocal") {
            outer.extend(
                line[1..]
                    .iter()
                    .filter(|t| t.kind == TokenKind::Ident)
                    .map(|t| t.text.to_string()),
            );
            continue;
        }
        assignment_targets(line, &mut bound);
        for (i, tok) in line.iter().enumerate() {
            if tok.kind != TokenKind::Ident {
                continue;
            }
            let next = line.get(i + 1);
            match tok.text {
                "for" => {
                    let rest = &line[i + 1..];
                    let end = rest
                        .iter()
                        .position(|t| t.is_ident("in"))
                        .unwrap_or(rest.len());
                    targets(&rest[..end], &mut bound);
                }
                "lambda" => bound.extend(parameters(&line[i + 1..], |t| t.is_op(":"))),
                "def" => {
                    if let Some(name) = next.filter(|t| t.kind == TokenKind::Ident) {
                        bound.insert(name.text.to_string());
                    }
                    if line.get(i + 2).is_some_and(|t| t.is_op("(")) {
                        bound.extend(parameters(&line[i + 3..], |t| t.is_op(")")));
                    }
                }
                "as" => {
                    if let Some(name) = next.filter(|t| t.kind == TokenKind::Ident) {
                        bound.insert(name.text.to_string());
                    }
                }
                name if next.is_some_and(|t| t.is_op(":=")) && !is_keyword(name) => {
                    bound.insert(name.to_string());
                }
                _ => {}
            }
        }
    }
    bound.retain(|name| !outer.contains(name));
    bound
}

/// Adds the names left of every top-level assignment operator in `line`.
fn assignment_targets(line: &[Token<'_>], out: &mut BTreeSet<String>) {
    let mut depth = 0usize;
    let mut start = 0;
    for (i, tok) in line.iter().enumerate() {
        if tok.kind != TokenKind::Op {
            continue;
        }
        match tok.text {
            "(" | "[" | "{" => depth += 1,
            ")" | "]" | "}" => depth = depth.saturating_sub(1),
            op if depth == 0 && ASSIGN_OPS.contains(&op) => {
                targets(target_part(&line[start..i]), out);
                start = i + 1;
            }
            _ => {}
        }
    }
}

/// Strips a leading `if c:` style header or a trailing `: annotation`.
fn target_part<'s, 'a>(segment: &'s [Token<'a>]) -> &'s [Token<'a>] {
    let colons = top_level_positions(segment, ":");
    let compound = segment
        .first()
        .is_some_and(|t| t.kind == TokenKind::Ident && COMPOUND.contains(&t.text));
    match (compound, colons.first(), colons.last()) {
        (true, _, Some(&last)) => &segment[last + 1..],
        (true, _, None) => &[],
        (false, Some(&first), _) => &segment[..first],
        (false, None, _) => segment,
    }
}

fn top_level_positions(tokens: &[Token<'_>], op: &str) -> Vec<usize> {
    let mut depth = 0usize;
    let mut found = Vec::new();
    for (i, tok) in tokens.iter().enumerate() {
        match tok.kind {
            TokenKind::Op if matches!(tok.text, "(" | "[" | "{") => depth += 1,
            TokenKind::Op if matches!(tok.text, ")" | "]" | "}") => {
                depth = depth.saturating_sub(1)
            }
            _ if depth == 0 && tok.is_op(op) => found.push(i),
            _ => {}
        }
    }
    found
}

/// Adds plain names of a target expression; subscripted and attribute
/// targets are skipped.
fn targets(tokens: &[Token<'_>], out: &mut BTreeSet<String>) {
    let mut subscript = 0usize;
    for (i, tok) in tokens.iter().enumerate() {
        match tok.kind {
            TokenKind::Op if tok.text == "[" => subscript += 1,
            TokenKind::Op if tok.text == "]" => subscript = subscript.saturating_sub(1),
            TokenKind::Ident if subscript == 0 && !is_keyword(tok.text) => {
                let after_dot = i > 0 && tokens[i - 1].is_op(".");
                let receiver = tokens
                    .get(i + 1)
                    .is_some_and(|t| t.is_op(".") || t.is_op("[") || t.is_op("("));
                if !after_dot && !receiver {
                    out.insert(tok.text.to_string());
                }
            }
            _ => {}
        }
    }
}

/// Parameter names up to the first top-level token matching `stop`.
fn parameters(tokens: &[Token<'_>], stop: impl Fn(&Token<'_>) -> bool) -> Vec<String> {
    let mut names = Vec::new();
    let mut depth = 0usize;
    let mut prev: Option<&Token<'_>> = None;
    for tok in tokens {
        if depth == 0 && stop(tok) {
            break;
        }
        match tok.kind {
            TokenKind::Op if matches!(tok.text, "(" | "[" | "{") => depth += 1,
            TokenKind::Op if matches!(tok.text, ")" | "]" | "}") => {
                depth = depth.saturating_sub(1)
            }
            TokenKind::Ident
                if depth == 0
                    && prev.map_or(true, |p| p.is_op(",") || p.is_op("*") || p.is_op("**")) =>
            {
                names.push(tok.text.to_string());
            }
            _ => {}
        }
        prev = Some(tok);
    }
    names
}

/// Walks backward from `end` over `ident (. ident)*` and returns the index of
/// the first identifier together with the segments.
fn dotted_chain_ending_at<'a>(tokens: &[Token<'a>], end: usize) -> Option<(usize, Vec<&'a str>)> {
    if tokens[end].kind != TokenKind::Ident {
        return None;
    }
    let mut start = end;
    while start >= 2 && tokens[start - 1].is_op(".") && tokens[start - 2].kind == TokenKind::Ident
    {
        start -= 2;
    }
    let segments = tokens[start..=end]
        .iter()
        .filter(|t| t.kind == TokenKind::Ident)
        .map(|t| t.text)
        .collect();
    Some((start, segments))
}
