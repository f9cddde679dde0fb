/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Compile Handlebars-style templates into Solidity rendering libraries.
 *
 * The render input type is inferred from how the template dereferences its
 * data, and the generated `render` function concatenates the output with
 * `abi.encodePacked`.
 */

pub mod ast;
pub mod error;
pub mod format;
pub mod input_type;
pub mod lower;
pub mod optimizer;
pub mod options;
pub mod parser;
pub mod scope;
pub mod solidity;
pub mod type_names;

pub use error::{CompileError, CompileResult};
pub use format::{FormatOptions, IndentFormatter, SourceFormatter};
pub use options::CompileOptions;
pub use parser::parse;

use crate::input_type::InputType;
use crate::lower::Compiler;
use crate::optimizer::optimizing_parse;
use crate::scope::{Scope, VarRegistry};
use crate::solidity::Emitter;
use crate::type_names::TypeNames;

/// Compile a template to formatted Solidity source.
pub fn compile(template: &str, options: &CompileOptions) -> CompileResult<String> {
    compile_with_formatter(template, options, &IndentFormatter)
}

/// Like [`compile`], with a caller-supplied formatter for the final source.
pub fn compile_with_formatter(
    template: &str,
    options: &CompileOptions,
    formatter: &dyn SourceFormatter,
) -> CompileResult<String> {
    options.validate()?;

    let parsed = optimizing_parse(
        template,
        &options.partials,
        options.condense_whitespace,
        options.min_repeating_substring_length,
    )?;

    let mut compiler = Compiler::new(&parsed.partials);
    let root = compiler.new_root();
    let vars = VarRegistry::new();
    let scope = Scope::root(root, &vars);
    let render_lines = compiler.lower_program(&parsed.program, &scope)?;
    let (tree, partials) = compiler.finish()?;

    if matches!(tree.get(root), InputType::Struct { members } if members.is_empty()) {
        return Err(CompileError::EmptyTemplate);
    }

    let names = TypeNames::generate(&tree, root, options.formatting.explicit_types)?;
    tracing::debug!(
        input = %tree.display(root),
        partials = partials.len(),
        "inferred input type"
    );

    let source =
        Emitter::new(&tree, &names, options).emit(&render_lines, &partials, &parsed.constants)?;
    formatter.format(&source, &options.formatting)
}
