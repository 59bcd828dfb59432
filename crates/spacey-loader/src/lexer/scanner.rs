// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The scanner that produces tokens from source text.

use super::{Span, Token, TokenKind};

/// Keywords after which a `/` starts a regular expression.
const REGEX_PRECEDING_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

/// A scanner that tokenizes JavaScript source code.
pub struct Scanner<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    current_pos: usize,
    /// Depth of currently open `{`
    brace_depth: usize,
    /// Brace depths at which a template `${` expression was opened
    template_stack: Vec<usize>,
    /// Whether a `/` at this point starts a regular expression
    regex_allowed: bool,
}

impl<'a> Scanner<'a> {
    /// Creates a new scanner for the given source code.
    pub fn new(source: &'a str) -> Self {
        let mut scanner = Self {
            source,
            chars: source.char_indices().peekable(),
            current_pos: 0,
            brace_depth: 0,
            template_stack: Vec::new(),
            regex_allowed: true,
        };
        scanner.skip_hashbang();
        scanner
    }

    /// Returns the next token from the source.
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();

        let start = self.current_pos;

        let Some((_pos, ch)) = self.advance() else {
            return Token::new(TokenKind::Eof, Span::new(start, start));
        };

        let kind = match ch {
            '"' | '\'' => self.scan_string(ch),
            '`' => self.scan_template(),
            '{' => {
                self.brace_depth += 1;
                TokenKind::Punct('{')
            }
            '}' => {
                if self.template_stack.last() == Some(&self.brace_depth) {
                    // Closing a `${ ... }` template expression
                    self.template_stack.pop();
                    self.scan_template()
                } else {
                    self.brace_depth = self.brace_depth.saturating_sub(1);
                    TokenKind::Punct('}')
                }
            }
            '/' if self.regex_allowed => self.scan_regex(),
            '.' if self.peek().is_some_and(|c| c.is_ascii_digit()) => self.scan_number(),
            '0'..='9' => self.scan_number(),
            '#' => self.scan_identifier(start),
            _ if is_id_start(ch) || ch == '\\' => self.scan_identifier(start),
            _ if ch.is_ascii_punctuation() => TokenKind::Punct(ch),
            _ => TokenKind::Invalid,
        };

        if kind != TokenKind::Template {
            self.regex_allowed = match &kind {
                TokenKind::Identifier(name) => REGEX_PRECEDING_KEYWORDS.contains(&name.as_str()),
                TokenKind::Punct(')' | ']' | '}') => false,
                TokenKind::Punct(_) => true,
                TokenKind::Import | TokenKind::Export | TokenKind::Invalid => true,
                _ => false,
            };
        }

        Token::new(kind, Span::new(start, self.current_pos))
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        let result = self.chars.next();
        if let Some((pos, ch)) = result {
            self.current_pos = pos + ch.len_utf8();
        }
        result
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, ch)| *ch)
    }

    fn peek_next(&self) -> Option<char> {
        let mut iter = self.chars.clone();
        iter.next();
        iter.next().map(|(_, ch)| ch)
    }

    fn skip_hashbang(&mut self) {
        if self.source.starts_with("#!") {
            while let Some(ch) = self.peek() {
                if ch == '\n' {
                    break;
                }
                self.advance();
            }
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(ch) if ch.is_whitespace() || ch == '\u{feff}' => {
                    self.advance();
                }
                Some('/') => {
                    match self.peek_next() {
                        Some('/') => {
                            // Single-line comment: skip until end of line
                            while let Some(ch) = self.peek() {
                                if ch == '\n' || ch == '\r' {
                                    break;
                                }
                                self.advance();
                            }
                        }
                        Some('*') => {
                            // Multi-line comment: skip until */
                            self.advance(); // consume '/'
                            self.advance(); // consume '*'
                            let mut prev = ' ';
                            while let Some((_, ch)) = self.advance() {
                                if prev == '*' && ch == '/' {
                                    break;
                                }
                                prev = ch;
                            }
                        }
                        _ => break, // Not a comment
                    }
                }
                _ => break,
            }
        }
    }

    fn scan_string(&mut self, quote: char) -> TokenKind {
        let mut value = String::new();

        loop {
            match self.advance() {
                None | Some((_, '\n')) => return TokenKind::Invalid, // Unterminated string
                Some((_, ch)) if ch == quote => break,
                Some((_, '\\')) => {
                    if let Some((_, escaped)) = self.advance() {
                        match escaped {
                            'n' => value.push('\n'),
                            'r' => value.push('\r'),
                            't' => value.push('\t'),
                            '0' => value.push('\0'),
                            // Line continuation
                            '\n' => {}
                            _ => value.push(escaped),
                        }
                    }
                }
                Some((_, ch)) => value.push(ch),
            }
        }

        TokenKind::String { value, quote }
    }

    /// Scans template text up to the closing backtick or the next `${`.
    fn scan_template(&mut self) -> TokenKind {
        loop {
            match self.advance() {
                None => return TokenKind::Invalid, // Unterminated template
                Some((_, '`')) => {
                    self.regex_allowed = false;
                    break;
                }
                Some((_, '$')) if self.peek() == Some('{') => {
                    self.advance();
                    self.template_stack.push(self.brace_depth);
                    self.regex_allowed = true;
                    break;
                }
                Some((_, '\\')) => {
                    self.advance();
                }
                Some(_) => {}
            }
        }

        TokenKind::Template
    }

    fn scan_regex(&mut self) -> TokenKind {
        let mut in_class = false;

        loop {
            match self.advance() {
                None | Some((_, '\n')) => return TokenKind::Invalid,
                Some((_, '\\')) => {
                    self.advance();
                }
                Some((_, '[')) => in_class = true,
                Some((_, ']')) => in_class = false,
                Some((_, '/')) if !in_class => break,
                Some(_) => {}
            }
        }

        // Flags
        while let Some(ch) = self.peek() {
            if is_id_continue(ch) {
                self.advance();
            } else {
                break;
            }
        }

        TokenKind::RegExp
    }

    fn scan_number(&mut self) -> TokenKind {
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' {
                self.advance();
            } else if matches!(ch, '+' | '-')
                && matches!(self.source[..self.current_pos].chars().last(), Some('e' | 'E'))
            {
                // Exponent sign
                self.advance();
            } else {
                break;
            }
        }
        TokenKind::Number
    }

    /// Scan the rest of an identifier whose first char starts at `start`
    fn scan_identifier(&mut self, start: usize) -> TokenKind {
        while let Some(ch) = self.peek() {
            if is_id_continue(ch) || ch == '\\' {
                self.advance();
            } else {
                break;
            }
        }

        match &self.source[start..self.current_pos] {
            "import" => TokenKind::Import,
            "export" => TokenKind::Export,
            name => TokenKind::Identifier(name.to_string()),
        }
    }
}

/// Checks if a character can start an identifier.
fn is_id_start(ch: char) -> bool {
    ch == '_' || ch == '$' || unicode_xid::UnicodeXID::is_xid_start(ch)
}

/// Checks if a character can continue an identifier.
fn is_id_continue(ch: char) -> bool {
    ch == '_' || ch == '$' || unicode_xid::UnicodeXID::is_xid_continue(ch)
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Token;

    fn next(&mut self) -> Option<Self::Item> {
        let token = self.next_token();
        if token.kind == TokenKind::Eof {
            None
        } else {
            Some(token)
        }
    }
}
