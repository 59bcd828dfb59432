// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Import and re-export specifier discovery on top of the token stream.

use super::{Scanner, Span, Token, TokenKind};
use serde::{Deserialize, Serialize};

/// A module specifier found in source text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSpan {
    /// Span of the whole statement (or `import(...)` expression)
    pub statement: Span,
    /// Span of the specifier text, between the quotes for string literals
    pub specifier: Span,
    /// Quote character around the specifier, `None` for non-literal arguments
    pub quote: Option<char>,
    /// Specifier value, `None` when a dynamic import argument is not a
    /// plain string literal
    pub value: Option<String>,
    /// Whether this is a dynamic `import()`
    pub dynamic: bool,
}

/// Module syntax found in a source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Syntax {
    /// Static `import` or any `export`
    pub has_esm: bool,
    /// `require(...)`, `module.exports` or `exports.x`
    pub has_cjs: bool,
}

/// Scan a source for every import and re-export specifier, in source order.
///
/// `import.meta` expressions and member calls like `loader.import(x)` are
/// not reported.
pub fn scan_imports(source: &str) -> Vec<ImportSpan> {
    let tokens: Vec<Token> = Scanner::new(source).collect();
    let mut imports = Vec::new();

    for i in 0..tokens.len() {
        if is_member_access(&tokens, i) {
            continue;
        }
        let found = match tokens[i].kind {
            TokenKind::Import => parse_import(&tokens, i),
            TokenKind::Export => parse_export(&tokens, i),
            _ => None,
        };
        imports.extend(found);
    }

    imports
}

/// Detect which module systems a source uses
pub fn detect_syntax(source: &str) -> Syntax {
    let tokens: Vec<Token> = Scanner::new(source).collect();
    let mut syntax = Syntax::default();

    for i in 0..tokens.len() {
        if is_member_access(&tokens, i) {
            continue;
        }
        let next = tokens.get(i + 1);
        match &tokens[i].kind {
            TokenKind::Export => syntax.has_esm = true,
            TokenKind::Import => {
                if !next.is_some_and(|t| t.is_punct('(') || t.is_punct('.')) {
                    syntax.has_esm = true;
                }
            }
            TokenKind::Identifier(name) if name == "require" => {
                if next.is_some_and(|t| t.is_punct('(')) {
                    syntax.has_cjs = true;
                }
            }
            TokenKind::Identifier(name) if name == "module" => {
                if next.is_some_and(|t| t.is_punct('.'))
                    && tokens.get(i + 2).is_some_and(|t| t.is_ident("exports"))
                {
                    syntax.has_cjs = true;
                }
            }
            TokenKind::Identifier(name) if name == "exports" => {
                if next.is_some_and(|t| t.is_punct('.')) {
                    syntax.has_cjs = true;
                }
            }
            _ => {}
        }
    }

    syntax
}

fn is_member_access(tokens: &[Token], i: usize) -> bool {
    i > 0 && tokens[i - 1].is_punct('.')
}

fn parse_import(tokens: &[Token], i: usize) -> Option<ImportSpan> {
    let start = tokens[i].span.start;
    let next = tokens.get(i + 1)?;

    match &next.kind {
        // import.meta
        TokenKind::Punct('.') => None,
        TokenKind::Punct('(') => parse_dynamic_import(tokens, i),
        // import "side-effect"
        TokenKind::String { .. } => Some(static_import(start, next)),
        _ => {
            let spec = find_from_clause(tokens, i + 1)?;
            Some(static_import(start, spec))
        }
    }
}

fn parse_dynamic_import(tokens: &[Token], i: usize) -> Option<ImportSpan> {
    let start = tokens[i].span.start;
    let open = i + 1;

    // Find the matching closing paren
    let mut depth = 0usize;
    let mut close = None;
    for (j, token) in tokens.iter().enumerate().skip(open) {
        match token.kind {
            TokenKind::Punct('(') => depth += 1,
            TokenKind::Punct(')') => {
                depth -= 1;
                if depth == 0 {
                    close = Some(j);
                    break;
                }
            }
            _ => {}
        }
    }
    let close = close?;
    if close == open + 1 {
        // `import()` with no argument
        return None;
    }

    let statement = Span::new(start, tokens[close].span.end);
    let arg = &tokens[open + 1];
    let after = &tokens[open + 2];
    let is_plain_literal = after.is_punct(')') || after.is_punct(',');

    match &arg.kind {
        TokenKind::String { value, quote } if is_plain_literal => Some(ImportSpan {
            statement,
            specifier: inner_span(arg),
            quote: Some(*quote),
            value: Some(value.clone()),
            dynamic: true,
        }),
        _ => Some(ImportSpan {
            statement,
            specifier: Span::new(arg.span.start, tokens[close - 1].span.end),
            quote: None,
            value: None,
            dynamic: true,
        }),
    }
}

fn parse_export(tokens: &[Token], i: usize) -> Option<ImportSpan> {
    let start = tokens[i].span.start;
    let mut k = i + 1;

    // export type { A } from "m"
    if tokens.get(k)?.is_ident("type") {
        k += 1;
    }

    let next = tokens.get(k)?;
    if next.is_punct('*') {
        // export * from "m" / export * as ns from "m"
        let spec = find_from_clause(tokens, k + 1)?;
        Some(static_import(start, spec))
    } else if next.is_punct('{') {
        let close = tokens
            .iter()
            .enumerate()
            .skip(k)
            .find(|(_, t)| t.is_punct('}'))
            .map(|(j, _)| j)?;
        let from = tokens.get(close + 1)?;
        let spec = tokens.get(close + 2)?;
        if from.is_ident("from") && matches!(spec.kind, TokenKind::String { .. }) {
            Some(static_import(start, spec))
        } else {
            None
        }
    } else {
        None
    }
}

/// Find the specifier token of a `... from "m"` clause starting at `k`.
fn find_from_clause(tokens: &[Token], k: usize) -> Option<&Token> {
    for j in k..tokens.len() {
        let token = &tokens[j];
        match &token.kind {
            TokenKind::Identifier(name) if name == "from" => {
                if let Some(spec) = tokens.get(j + 1) {
                    if matches!(spec.kind, TokenKind::String { .. }) {
                        return Some(spec);
                    }
                }
            }
            // Not an import clause (`import x = require(...)`, statement end)
            TokenKind::Punct(';' | '=' | '(') | TokenKind::Import | TokenKind::Export => return None,
            TokenKind::String { .. } | TokenKind::Template | TokenKind::RegExp => return None,
            _ => {}
        }
    }
    None
}

fn static_import(start: usize, spec: &Token) -> ImportSpan {
    let (value, quote) = match &spec.kind {
        TokenKind::String { value, quote } => (Some(value.clone()), Some(*quote)),
        _ => (None, None),
    };
    ImportSpan {
        statement: Span::new(start, spec.span.end),
        specifier: inner_span(spec),
        quote,
        value,
        dynamic: false,
    }
}

fn inner_span(string_token: &Token) -> Span {
    Span::new(string_token.span.start + 1, string_token.span.end - 1)
}
