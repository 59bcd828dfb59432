// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Import-aware lexical scanning of JavaScript and TypeScript sources.
//!
//! The scanner only distinguishes what is needed to find module
//! specifiers reliably: comments, string, template and regular expression
//! literals are consumed whole, so import-looking text inside them is
//! never reported.
//!
//! ## Usage
//!
//! ```rust
//! use spacey_loader::lexer::scan_imports;
//!
//! let source = r#"import lp from "left-pad"; const m = import('./m.js');"#;
//! let imports = scan_imports(source);
//!
//! assert_eq!(imports[0].value.as_deref(), Some("left-pad"));
//! assert!(imports[1].dynamic);
//! ```

mod imports;
mod scanner;
mod token;

pub use imports::{detect_syntax, scan_imports, ImportSpan, Syntax};
pub use scanner::Scanner;
pub use token::{Span, Token, TokenKind};
