// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Token definitions for the import scanner.

use serde::{Deserialize, Serialize};

/// A span in the source code, as byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Start byte offset (inclusive)
    pub start: usize,
    /// End byte offset (exclusive)
    pub end: usize,
}

impl Span {
    /// Creates a new span.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Returns the length of this span in bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns true if this span is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns the text covered by this span.
    pub fn slice<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

/// A token produced by the scanner.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The span in the source code
    pub span: Span,
}

impl Token {
    /// Creates a new token.
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Returns true if this token is the given punctuator.
    pub fn is_punct(&self, ch: char) -> bool {
        self.kind == TokenKind::Punct(ch)
    }

    /// Returns true if this token is the given identifier.
    pub fn is_ident(&self, name: &str) -> bool {
        matches!(&self.kind, TokenKind::Identifier(n) if n == name)
    }
}

/// The kinds of tokens the import scanner distinguishes.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// `import`
    Import,
    /// `export`
    Export,
    /// Any other identifier or keyword
    Identifier(String),
    /// String literal with its unescaped value and quote character
    String {
        /// Unescaped value
        value: String,
        /// Quote character (`'` or `"`)
        quote: char,
    },
    /// Template literal chunk (up to the closing backtick or a `${`)
    Template,
    /// Regular expression literal
    RegExp,
    /// Numeric literal
    Number,
    /// A single punctuation character
    Punct(char),
    /// Unterminated literal or stray character
    Invalid,
    /// End of input
    Eof,
}
