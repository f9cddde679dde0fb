/*
 * format.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Source formatting of the generated Solidity code.
//!
//! The compiler assembles unindented source text and hands it to a
//! [`SourceFormatter`]. [`IndentFormatter`] is the built-in implementation;
//! callers wanting prettier-grade output can plug in their own.

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};

/// Formatting options, passed through to the formatter unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormatOptions {
    pub print_width: usize,
    pub tab_width: usize,
    pub use_tabs: bool,
    pub single_quote: bool,
    pub bracket_spacing: bool,
    /// Spell `uint`/`int` as `uint256`/`int256`.
    pub explicit_types: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            print_width: 80,
            tab_width: 4,
            use_tabs: false,
            single_quote: false,
            bracket_spacing: false,
            explicit_types: true,
        }
    }
}

pub trait SourceFormatter {
    fn format(&self, source: &str, options: &FormatOptions) -> CompileResult<String>;
}

/// Re-indents by brace depth and normalizes blank lines.
///
/// Braces inside string literals and comments are ignored. At most one
/// blank line is kept between statements, and none directly after an
/// opening or before a closing brace. Long lines are not wrapped.
#[derive(Debug, Default, Clone, Copy)]
pub struct IndentFormatter;

impl SourceFormatter for IndentFormatter {
    fn format(&self, source: &str, options: &FormatOptions) -> CompileResult<String> {
        let unit = if options.use_tabs {
            "\t".to_string()
        } else {
            " ".repeat(options.tab_width)
        };

        let mut out = String::with_capacity(source.len());
        let mut depth: usize = 0;
        let mut scanner = BraceScanner::default();
        let mut pending_blank = false;
        let mut after_open = true;

        for (number, raw) in source.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                pending_blank = true;
                continue;
            }

            let counts = scanner.scan(line);
            if counts.closes > depth + counts.opens {
                return Err(CompileError::Format {
                    message: format!("unmatched '}}' on line {}", number + 1),
                });
            }
            if pending_blank && !after_open && counts.leading_closes == 0 {
                out.push('\n');
            }
            pending_blank = false;

            let level = depth.saturating_sub(counts.leading_closes);
            for _ in 0..level {
                out.push_str(&unit);
            }
            out.push_str(line);
            out.push('\n');

            depth = (depth + counts.opens).saturating_sub(counts.closes);
            after_open = line.ends_with('{');
        }

        if depth > 0 {
            return Err(CompileError::Format {
                message: format!("{} unclosed '{{'", depth),
            });
        }
        Ok(out)
    }
}

#[derive(Debug, Default)]
struct BraceCounts {
    opens: usize,
    closes: usize,
    /// Closing braces before any other code on the line.
    leading_closes: usize,
}

/// Tracks string and block comment state across lines.
#[derive(Debug, Default)]
struct BraceScanner {
    in_block_comment: bool,
}

impl BraceScanner {
    fn scan(&mut self, line: &str) -> BraceCounts {
        let mut counts = BraceCounts::default();
        let mut leading = true;
        let mut quote: Option<char> = None;
        let mut chars = line.chars().peekable();

        while let Some(c) = chars.next() {
            if self.in_block_comment {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    self.in_block_comment = false;
                }
                continue;
            }
            if let Some(q) = quote {
                if c == '\\' {
                    chars.next();
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '"' | '\'' => {
                    quote = Some(c);
                    leading = false;
                }
                '/' if chars.peek() == Some(&'/') => break,
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    self.in_block_comment = true;
                }
                '{' => {
                    counts.opens += 1;
                    leading = false;
                }
                '}' => {
                    counts.closes += 1;
                    if leading {
                        counts.leading_closes += 1;
                    }
                }
                c if c.is_whitespace() => {}
                _ => leading = false,
            }
        }
        counts
    }
}
