/*
 * optimizer.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Content deduplication.
//!
//! Literal text is the bulk of a compiled template's bytecode. Substrings
//! that repeat across the template and its partials are factored into
//! shared string constants, and the content statements are rewritten into
//! literal pieces interleaved with [`Statement::Constant`] references.

use std::collections::HashSet;

use hashlink::LinkedHashMap;

use crate::ast::{ConstantRef, ContentStatement, Program, Statement};
use crate::error::{CompileError, CompileResult};
use crate::parser::{condense_whitespace, parse};

/// Prefix of generated constant names (`__constant0`, `__constant1`, ...).
pub const CONSTANT_PREFIX: &str = "__constant";

/// A piece of a split content string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Literal(String),
    /// Reference to `substrings[n]`.
    Substring(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatingSubstrings {
    pub chunks: Vec<Chunk>,
    /// For every chunk, the index of the input string it was split out of.
    pub index_map: Vec<usize>,
    pub substrings: Vec<String>,
}

/// Find the first occurrence of `needle` in a literal chunk, scanning from
/// `start_char` (a byte offset) in chunk `start_chunk` onwards.
pub fn index_of(
    chunks: &[Chunk],
    needle: &str,
    start_chunk: usize,
    start_char: usize,
) -> Option<(usize, usize)> {
    for (i, chunk) in chunks.iter().enumerate().skip(start_chunk) {
        let Chunk::Literal(text) = chunk else {
            continue;
        };
        let from = if i == start_chunk { start_char } else { 0 };
        if from > text.len() || !text.is_char_boundary(from) {
            continue;
        }
        if let Some(found) = text[from..].find(needle) {
            return Some((i, from + found));
        }
    }
    None
}

/// Greedily factor substrings of at least `min_length` characters that
/// occur more than once across `strings`, preferring the longest repeat at
/// each scan position.
pub fn find_repeating_substrings(strings: &[String], min_length: usize) -> RepeatingSubstrings {
    let min_length = min_length.max(1);
    let mut chunks: Vec<Chunk> = strings.iter().cloned().map(Chunk::Literal).collect();
    let mut index_map: Vec<usize> = (0..strings.len()).collect();
    let mut substrings: Vec<String> = Vec::new();

    let mut i = 0;
    'chunks: while i < chunks.len() {
        let Chunk::Literal(chunk) = &chunks[i] else {
            i += 1;
            continue;
        };
        let chunk = chunk.clone();
        let boundaries: Vec<usize> = chunk
            .char_indices()
            .map(|(pos, _)| pos)
            .chain(std::iter::once(chunk.len()))
            .collect();
        let char_count = boundaries.len() - 1;

        if char_count >= min_length {
            for start in 0..=(char_count - min_length) {
                let j = boundaries[start];
                let mut length = min_length;
                while start + length <= char_count
                    && index_of(
                        &chunks,
                        &chunk[j..boundaries[start + length]],
                        i,
                        boundaries[start + length],
                    )
                    .is_some()
                {
                    length += 1;
                }

                // `length` overshoots the longest repeat by one
                if length > min_length {
                    length -= 1;
                    let substring = chunk[j..boundaries[start + length]].to_string();
                    let symbol = substrings.len();
                    substrings.push(substring.clone());

                    let mut new_chunks = Vec::with_capacity(chunks.len() + 2);
                    let mut new_index_map = Vec::with_capacity(index_map.len() + 2);
                    let mut resume = 0;
                    for (k, old) in chunks.iter().enumerate() {
                        if k == i {
                            resume = new_chunks.len() + usize::from(j > 0) + 1;
                        }
                        match old {
                            Chunk::Substring(_) => {
                                new_chunks.push(old.clone());
                                new_index_map.push(index_map[k]);
                            }
                            Chunk::Literal(text) => {
                                for piece in split_with(text, &substring, symbol) {
                                    new_chunks.push(piece);
                                    new_index_map.push(index_map[k]);
                                }
                            }
                        }
                    }

                    tracing::debug!(substring = %substring, "factored repeated content");
                    chunks = new_chunks;
                    index_map = new_index_map;
                    i = resume;
                    continue 'chunks;
                }
            }
        }

        i += 1;
    }

    RepeatingSubstrings {
        chunks,
        index_map,
        substrings,
    }
}

/// Split `text` on `separator`, putting a reference to `symbol` between the
/// pieces and dropping empty literals.
fn split_with(text: &str, separator: &str, symbol: usize) -> Vec<Chunk> {
    let mut pieces = Vec::new();
    for (n, literal) in text.split(separator).enumerate() {
        if n > 0 {
            pieces.push(Chunk::Substring(symbol));
        }
        if !literal.is_empty() {
            pieces.push(Chunk::Literal(literal.to_string()));
        }
    }
    pieces
}

/// A parsed template with its reachable partials and factored constants.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTemplate {
    pub program: Program,
    pub partials: LinkedHashMap<String, Program>,
    /// Constant name to value, in first-use order.
    pub constants: LinkedHashMap<String, String>,
}

/// Parse the template and every partial it reaches, then factor repeated
/// content into constants.
pub fn optimizing_parse(
    template: &str,
    partial_sources: &LinkedHashMap<String, String>,
    condense: bool,
    min_length: usize,
) -> CompileResult<ParsedTemplate> {
    let read = |source: &str| {
        if condense {
            parse(&condense_whitespace(source))
        } else {
            parse(source)
        }
    };

    let mut program = read(template)?;
    let mut partials = LinkedHashMap::new();

    // collect non-empty content, dropping empty statements
    let mut contents: Vec<String> = Vec::new();
    ContentPass::new(&mut partials, partial_sources, &read, |content: ContentStatement, _: usize| {
        if content.value.is_empty() {
            Vec::new()
        } else {
            contents.push(content.value.clone());
            vec![Statement::Content(content)]
        }
    })
    .program(&mut program)?;

    let RepeatingSubstrings {
        chunks,
        index_map,
        substrings,
    } = find_repeating_substrings(&contents, min_length);

    let mut constant_names: Vec<Option<String>> = vec![None; substrings.len()];
    let mut constants = LinkedHashMap::new();
    let rewrite = |content: ContentStatement, index: usize| {
        let Some(first) = index_map.iter().position(|i| *i == index) else {
            return vec![Statement::Content(content)];
        };
        let mut rewritten = Vec::new();
        for (chunk, _) in chunks[first..]
            .iter()
            .zip(&index_map[first..])
            .take_while(|(_, i)| **i == index)
        {
            match chunk {
                Chunk::Literal(value) => rewritten.push(Statement::Content(ContentStatement {
                    value: value.clone(),
                    span: content.span,
                })),
                Chunk::Substring(symbol) => {
                    let name = match &constant_names[*symbol] {
                        Some(name) => name.clone(),
                        None => {
                            let name = format!("{}{}", CONSTANT_PREFIX, constants.len());
                            constants.insert(name.clone(), substrings[*symbol].clone());
                            constant_names[*symbol] = Some(name.clone());
                            name
                        }
                    };
                    rewritten.push(Statement::Constant(ConstantRef {
                        name,
                        span: content.span,
                    }));
                }
            }
        }
        rewritten
    };
    ContentPass::new(&mut partials, partial_sources, &read, rewrite).program(&mut program)?;

    tracing::debug!(
        partials = partials.len(),
        constants = constants.len(),
        "parsed template"
    );

    Ok(ParsedTemplate {
        program,
        partials,
        constants,
    })
}

/// One traversal over every content statement of a template and the
/// partials it reaches, in first-encounter order.
struct ContentPass<'a, R, F> {
    partials: &'a mut LinkedHashMap<String, Program>,
    sources: &'a LinkedHashMap<String, String>,
    read: &'a R,
    rewrite: F,
    index: usize,
    visited: HashSet<String>,
}

impl<'a, R, F> ContentPass<'a, R, F>
where
    R: Fn(&str) -> CompileResult<Program>,
    F: FnMut(ContentStatement, usize) -> Vec<Statement>,
{
    fn new(
        partials: &'a mut LinkedHashMap<String, Program>,
        sources: &'a LinkedHashMap<String, String>,
        read: &'a R,
        rewrite: F,
    ) -> Self {
        Self {
            partials,
            sources,
            read,
            rewrite,
            index: 0,
            visited: HashSet::new(),
        }
    }

    fn program(&mut self, program: &mut Program) -> CompileResult<()> {
        let body = std::mem::take(&mut program.body);
        for statement in body {
            match statement {
                Statement::Content(content) => {
                    let index = self.index;
                    self.index += 1;
                    program.body.extend((self.rewrite)(content, index));
                }
                Statement::Block(mut block) => {
                    self.program(&mut block.program)?;
                    if let Some(inverse) = &mut block.inverse {
                        self.program(inverse)?;
                    }
                    program.body.push(Statement::Block(block));
                }
                Statement::Partial(partial) => {
                    self.partial(&partial.name)?;
                    program.body.push(Statement::Partial(partial));
                }
                other => program.body.push(other),
            }
        }
        Ok(())
    }

    fn partial(&mut self, name: &str) -> CompileResult<()> {
        if !self.visited.insert(name.to_string()) {
            return Ok(());
        }
        let mut program = match self.partials.remove(name) {
            Some(program) => program,
            None => {
                let source =
                    self.sources
                        .get(name)
                        .ok_or_else(|| CompileError::UnknownPartial {
                            name: name.to_string(),
                        })?;
                (self.read)(source)?
            }
        };
        self.program(&mut program)?;
        self.partials.insert(name.to_string(), program);
        Ok(())
    }
}
