/*
 * lower.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Lowering of template statements to Solidity statements.
//!
//! Each statement lowers to a list of [`Output`]s. Appends are kept as
//! fragment lists until the enclosing program is complete, so that adjacent
//! appends can share one `abi.encodePacked` call. Lowering also drives type
//! inference: every dereferenced path narrows the shared [`TypeTree`].

use hashlink::LinkedHashMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::ast::{
    BlockStatement, Expression, Hash, MustacheStatement, PartialStatement, PathExpression, Program,
    Statement,
};
use crate::error::{CompileError, CompileResult};
use crate::input_type::{Kind, TypeId, TypeTree};
use crate::options::is_identifier;
use crate::scope::{INDEX_ALIAS, Scope, TargetPath, VarRegistry};
use crate::solidity::{append_statement, helper_call, string_literal};

/// Most fragments one `abi.encodePacked` call may take before running out
/// of EVM stack slots.
pub const MAX_APPEND_ARITY: usize = 16;

const INDEX_VAR_BASE: &str = "__i";

#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// A complete statement.
    Line(String),
    /// String expressions to append to the result.
    Append(Vec<String>),
}

/// Fold runs of appends into batches of at most [`MAX_APPEND_ARITY`]
/// fragments, then turn everything into statements.
pub fn merge_appends(outputs: Vec<Output>) -> Vec<String> {
    let mut merged: Vec<Output> = Vec::with_capacity(outputs.len());
    for output in outputs {
        match (merged.last_mut(), output) {
            (Some(Output::Append(last)), Output::Append(items))
                if last.len() + items.len() <= MAX_APPEND_ARITY =>
            {
                last.extend(items);
            }
            (_, output) => merged.push(output),
        }
    }
    merged
        .into_iter()
        .map(|output| match output {
            Output::Line(line) => line,
            Output::Append(items) => append_statement(&items),
        })
        .collect()
}

/// A lowered partial, emitted as its own function.
#[derive(Debug, Clone, PartialEq)]
pub struct Partial {
    pub name: String,
    pub input_type: TypeId,
    pub lines: Vec<String>,
    /// Extraction group: the library the function is moved into.
    pub extra: Option<String>,
    /// Every context the partial is called with, in template order.
    pub call_sites: Vec<CallSite>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallSite {
    pub input_type: TypeId,
    /// The context path as emitted, for error messages.
    pub context: String,
}

/// The lowered form of a conditional branch.
enum Branch {
    Empty,
    /// A single string expression, usable in a ternary.
    Expression(String),
    Lines(Vec<String>),
}

impl Branch {
    fn into_lines(self) -> Vec<String> {
        match self {
            Branch::Empty => Vec::new(),
            Branch::Expression(expr) => vec![append_statement(&[expr])],
            Branch::Lines(lines) => lines,
        }
    }
}

enum Helper {
    Integer { signed: bool, width: Option<u32> },
    Bytes(u32),
}

static INTEGER_HELPER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(uint|int)(\d*)$").unwrap());
static BYTES_HELPER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^bytes(\d+)$").unwrap());

fn classify_helper(name: &str) -> CompileResult<Option<Helper>> {
    if let Some(caps) = INTEGER_HELPER.captures(name) {
        let signed = &caps[1] == "int";
        let width = match &caps[2] {
            "" => None,
            digits => {
                let width = digits.parse::<u32>().unwrap_or(0);
                if width == 0 || width > 256 || width % 8 != 0 {
                    return Err(CompileError::unsupported(format!(
                        "{} is not a valid integer width",
                        name
                    )));
                }
                Some(width)
            }
        };
        return Ok(Some(Helper::Integer { signed, width }));
    }
    if let Some(caps) = BYTES_HELPER.captures(name) {
        let width = caps[1].parse::<u32>().unwrap_or(0);
        if !(1..=32).contains(&width) {
            return Err(CompileError::unsupported(format!(
                "{} is not a valid fixed bytes width",
                name
            )));
        }
        return Ok(Some(Helper::Bytes(width)));
    }
    Ok(None)
}

fn integer_literal(expr: &Expression, key: &str) -> CompileResult<u32> {
    match expr {
        Expression::Number(text) => text.parse::<u32>().map_err(|_| {
            CompileError::unsupported(format!(
                "{} must be a non-negative integer, got {}",
                key, text
            ))
        }),
        other => Err(CompileError::unsupported(format!(
            "{} must be a number literal, got {}",
            key,
            other.type_name()
        ))),
    }
}

fn expect_hash_keys(hash: &Hash, allowed: &[&str], context: &str) -> CompileResult<()> {
    match hash.pairs.iter().find(|pair| !allowed.contains(&pair.key.as_str())) {
        Some(pair) => Err(CompileError::unsupported(format!(
            "unknown argument {} for {}",
            pair.key, context
        ))),
        None => Ok(()),
    }
}

fn path_param<'e>(params: &'e [Expression], context: &str) -> CompileResult<&'e PathExpression> {
    match params {
        [Expression::Path(path)] => Ok(path),
        [Expression::SubExpression(_)] => Err(CompileError::unsupported("sub-expressions")),
        [other] => Err(CompileError::unsupported(format!(
            "{} expects a path parameter, got {}",
            context,
            other.type_name()
        ))),
        _ => Err(CompileError::unsupported(format!(
            "{} expects exactly one parameter",
            context
        ))),
    }
}

fn to_lines(lines: Vec<String>) -> impl Iterator<Item = Output> {
    lines.into_iter().map(Output::Line)
}

/// Ternary branches must agree on a type, so literals are converted.
fn ternary_operand(expr: String) -> String {
    if expr.starts_with('"') {
        format!("string({})", expr)
    } else {
        expr
    }
}

/// Lowers templates and partials, sharing one type tree and one partial
/// registry for a whole compile.
pub struct Compiler<'a> {
    types: TypeTree,
    partial_programs: &'a LinkedHashMap<String, Program>,
    partials: Vec<Partial>,
    /// Partials currently being lowered, innermost last.
    in_progress: Vec<String>,
}

impl<'a> Compiler<'a> {
    pub fn new(partial_programs: &'a LinkedHashMap<String, Program>) -> Self {
        Self {
            types: TypeTree::new(),
            partial_programs,
            partials: Vec::new(),
            in_progress: Vec::new(),
        }
    }

    /// Allocate the input struct of a template.
    pub fn new_root(&mut self) -> TypeId {
        self.types.new_struct_root()
    }

    /// The type tree and the partials in first-use order.
    ///
    /// Every call site of a partial must end up with the same shape as the
    /// partial's input type, since the emitted function takes a single
    /// struct type. Narrowing that happens after a call (`{{> card b}}{{b.x}}`)
    /// is folded back into the partial input and out to all other call
    /// sites until the tree stops changing.
    pub fn finish(mut self) -> CompileResult<(TypeTree, Vec<Partial>)> {
        loop {
            let before = self.types.clone();
            for partial in &self.partials {
                let sites = || {
                    partial
                        .call_sites
                        .iter()
                        .filter(|site| site.input_type != partial.input_type)
                };
                for site in sites() {
                    self.types
                        .unify(partial.input_type, site.input_type, &site.context)?;
                }
                for site in sites() {
                    self.types
                        .unify(site.input_type, partial.input_type, &site.context)?;
                }
            }
            if self.types == before {
                break;
            }
        }

        for partial in &self.partials {
            for site in &partial.call_sites {
                if !self.types.compatible(site.input_type, partial.input_type) {
                    return Err(CompileError::unsupported(format!(
                        "partial {} is called with {} of type {}, expected {}",
                        partial.name,
                        site.context,
                        self.types.display(site.input_type),
                        self.types.display(partial.input_type)
                    )));
                }
            }
        }
        Ok((self.types, self.partials))
    }

    pub fn lower_program(
        &mut self,
        program: &Program,
        scope: &Scope<'_>,
    ) -> CompileResult<Vec<String>> {
        let outputs = self.lower_statements(&program.body, scope)?;
        Ok(merge_appends(outputs))
    }

    fn lower_statements(
        &mut self,
        body: &[Statement],
        scope: &Scope<'_>,
    ) -> CompileResult<Vec<Output>> {
        let mut outputs = Vec::new();
        for statement in body {
            outputs.extend(self.lower_statement(statement, scope)?);
        }
        Ok(outputs)
    }

    fn lower_statement(
        &mut self,
        statement: &Statement,
        scope: &Scope<'_>,
    ) -> CompileResult<Vec<Output>> {
        match statement {
            Statement::Content(content) if content.value.is_empty() => Ok(Vec::new()),
            Statement::Content(content) => {
                Ok(vec![Output::Append(vec![string_literal(&content.value)])])
            }
            Statement::Constant(constant) => {
                Ok(vec![Output::Append(vec![constant.name.clone()])])
            }
            Statement::Mustache(mustache) => self.mustache(mustache, scope),
            Statement::Block(block) => self.block(block, scope),
            Statement::Partial(partial) => self.partial(partial, scope),
            Statement::Comment(_) => Ok(Vec::new()),
        }
    }

    fn mustache(
        &mut self,
        statement: &MustacheStatement,
        scope: &Scope<'_>,
    ) -> CompileResult<Vec<Output>> {
        let path = match &statement.path {
            Expression::Path(path) => path,
            other => {
                return Err(CompileError::unsupported(format!(
                    "Unsupported path type: {}",
                    other.type_name()
                )));
            }
        };

        let helper = if path.depth == 0 && !path.data && path.parts.len() == 1 {
            classify_helper(&path.original)?
        } else {
            None
        };

        let fragment = match helper {
            Some(Helper::Integer { signed, width }) => {
                expect_hash_keys(&statement.hash, &["decimals"], &path.original)?;
                let decimals = statement
                    .hash
                    .get("decimals")
                    .map(|value| integer_literal(value, "decimals"))
                    .transpose()?
                    .unwrap_or(0);
                let param = path_param(&statement.params, &path.original)?;
                let target = scope.resolve(param)?;
                let kind = if signed { Kind::Int } else { Kind::Uint };
                self.types.narrow(scope.root_type(), &target, kind, width)?;
                let function = if signed { "intToString" } else { "uintToString" };
                helper_call(function, &target.to_string(), decimals)
            }
            Some(Helper::Bytes(width)) => {
                expect_hash_keys(&statement.hash, &[], &path.original)?;
                let param = path_param(&statement.params, &path.original)?;
                let target = scope.resolve(param)?;
                self.types.narrow(scope.root_type(), &target, Kind::String, Some(width))?;
                target.to_string()
            }
            None => {
                if !statement.params.is_empty() || !statement.hash.is_empty() {
                    return Err(CompileError::unsupported(format!(
                        "unknown helper {}",
                        path.original
                    )));
                }
                let target = scope.resolve(path)?;
                if target.is_local_variable() {
                    helper_call("uintToString", &target.to_string(), 0)
                } else {
                    self.types.narrow(scope.root_type(), &target, Kind::String, None)?;
                    target.to_string()
                }
            }
        };

        Ok(vec![Output::Append(vec![fragment])])
    }

    fn block(&mut self, block: &BlockStatement, scope: &Scope<'_>) -> CompileResult<Vec<Output>> {
        let path = &block.path;
        let keyword = if path.depth == 0 && !path.data && path.parts.len() == 1 {
            path.head()
        } else {
            None
        };

        match keyword {
            Some("each") => self.each(block, scope),
            Some("with") => self.with(block, scope),
            Some("if") => self.conditional(block, scope, false),
            Some("unless") => self.conditional(block, scope, true),
            _ if !block.params.is_empty() => Err(CompileError::unsupported(format!(
                "Unsupported block statement with params: {}",
                path.original
            ))),
            _ => self.conditional(block, scope, false),
        }
    }

    fn each(&mut self, block: &BlockStatement, scope: &Scope<'_>) -> CompileResult<Vec<Output>> {
        if block.inverse.is_some() {
            return Err(CompileError::unsupported("else in each blocks"));
        }
        expect_hash_keys(&block.hash, &["length"], "each")?;
        let length = block
            .hash
            .get("length")
            .map(|value| integer_literal(value, "length"))
            .transpose()?;

        let iteratee = scope.resolve(path_param(&block.params, "each")?)?;
        if iteratee.is_local_variable() {
            return Err(CompileError::unsupported(format!(
                "cannot iterate over loop index {}",
                iteratee
            )));
        }
        self.types.narrow(scope.root_type(), &iteratee, Kind::Array, length)?;

        let index = scope.allocate_var(INDEX_VAR_BASE);
        let item_alias = block.program.block_params.first().map_or("this", String::as_str);
        let index_alias = block.program.block_params.get(1).map_or(INDEX_ALIAS, String::as_str);
        let item = iteratee.clone().index(index.clone());

        let mut aliases = vec![(index_alias.to_string(), TargetPath::local(index.clone()))];
        if item_alias != "this" {
            aliases.push((item_alias.to_string(), item.clone()));
        }
        let child = scope.dive(item, aliases);
        let body = self.lower_program(&block.program, &child)?;

        let mut outputs = vec![Output::Line(format!(
            "for(uint256 {index}; {index} < {iteratee}.length; {index}++) {{"
        ))];
        outputs.extend(to_lines(body));
        outputs.push(Output::Line("}".to_string()));
        Ok(outputs)
    }

    fn with(&mut self, block: &BlockStatement, scope: &Scope<'_>) -> CompileResult<Vec<Output>> {
        if block.inverse.is_some() {
            return Err(CompileError::unsupported("else in with blocks"));
        }
        expect_hash_keys(&block.hash, &[], "with")?;
        let target = scope.resolve(path_param(&block.params, "with")?)?;
        let child = scope.dive(target, std::iter::empty());
        let lines = self.lower_program(&block.program, &child)?;
        Ok(to_lines(lines).collect())
    }

    fn conditional(
        &mut self,
        block: &BlockStatement,
        scope: &Scope<'_>,
        negate: bool,
    ) -> CompileResult<Vec<Output>> {
        expect_hash_keys(&block.hash, &[], &block.path.original)?;
        let keyword = matches!(block.path.head(), Some("if") | Some("unless"));
        let condition_path = if block.params.is_empty() && !keyword {
            &block.path
        } else {
            path_param(&block.params, &block.path.original)?
        };

        let target = scope.resolve(condition_path)?;
        if target.is_local_variable() {
            return Err(CompileError::unsupported(format!(
                "loop index {} cannot be used as a condition",
                target
            )));
        }
        self.types.narrow(scope.root_type(), &target, Kind::Bool, None)?;

        let condition = |negated: bool| format!("{}{}", if negated { "!" } else { "" }, target);

        let then_branch = self.branch(&block.program, scope)?;
        let else_branch = match &block.inverse {
            Some(inverse) => self.branch(inverse, scope)?,
            None => Branch::Empty,
        };

        let outputs = match (then_branch, else_branch) {
            (Branch::Empty, Branch::Empty) => Vec::new(),
            (Branch::Expression(then_expr), Branch::Empty) => vec![Output::Append(vec![format!(
                "{} ? {} : \"\"",
                condition(negate),
                ternary_operand(then_expr)
            )])],
            (Branch::Empty, Branch::Expression(else_expr)) => vec![Output::Append(vec![format!(
                "{} ? {} : \"\"",
                condition(!negate),
                ternary_operand(else_expr)
            )])],
            (Branch::Expression(then_expr), Branch::Expression(else_expr)) => {
                vec![Output::Append(vec![format!(
                    "{} ? {} : {}",
                    condition(negate),
                    ternary_operand(then_expr),
                    ternary_operand(else_expr)
                )])]
            }
            (Branch::Empty, else_branch) => {
                let mut outputs = vec![Output::Line(format!("if({}) {{", condition(!negate)))];
                outputs.extend(to_lines(else_branch.into_lines()));
                outputs.push(Output::Line("}".to_string()));
                outputs
            }
            (then_branch, Branch::Empty) => {
                let mut outputs = vec![Output::Line(format!("if({}) {{", condition(negate)))];
                outputs.extend(to_lines(then_branch.into_lines()));
                outputs.push(Output::Line("}".to_string()));
                outputs
            }
            (then_branch, else_branch) => {
                let mut outputs = vec![Output::Line(format!("if({}) {{", condition(negate)))];
                outputs.extend(to_lines(then_branch.into_lines()));
                outputs.push(Output::Line("} else {".to_string()));
                outputs.extend(to_lines(else_branch.into_lines()));
                outputs.push(Output::Line("}".to_string()));
                outputs
            }
        };
        Ok(outputs)
    }

    /// Lower a conditional branch once, keeping a lone non-block statement
    /// that appends a single expression available for a ternary.
    fn branch(&mut self, program: &Program, scope: &Scope<'_>) -> CompileResult<Branch> {
        let outputs = self.lower_statements(&program.body, scope)?;
        if outputs.is_empty() {
            return Ok(Branch::Empty);
        }
        let single_statement =
            program.body.len() == 1 && !matches!(program.body[0], Statement::Block(_));
        if single_statement {
            if let [Output::Append(items)] = outputs.as_slice() {
                if let [expr] = items.as_slice() {
                    return Ok(Branch::Expression(expr.clone()));
                }
            }
        }
        Ok(Branch::Lines(merge_appends(outputs)))
    }

    fn partial(
        &mut self,
        statement: &PartialStatement,
        scope: &Scope<'_>,
    ) -> CompileResult<Vec<Output>> {
        let name = statement.name.as_str();
        if !is_identifier(name) {
            return Err(CompileError::unsupported(format!(
                "partial name {} is not a valid identifier",
                name
            )));
        }
        let programs = self.partial_programs;
        let program = programs
            .get(name)
            .ok_or_else(|| CompileError::UnknownPartial { name: name.to_string() })?;

        expect_hash_keys(&statement.hash, &["extra"], name)?;
        let extra = match statement.hash.get("extra") {
            None => None,
            Some(Expression::String(group)) if is_identifier(group) => Some(group.clone()),
            Some(other) => {
                return Err(CompileError::unsupported(format!(
                    "extra must be an identifier string, got {}",
                    match other {
                        Expression::String(value) => value.clone(),
                        other => other.type_name().to_string(),
                    }
                )));
            }
        };

        let context = match statement.params.as_slice() {
            [] => scope.path().clone(),
            params => scope.resolve(path_param(params, name)?)?,
        };

        match self.partials.iter().position(|p| p.name == name) {
            Some(index) => {
                let cached = &self.partials[index];
                if cached.extra != extra {
                    return Err(CompileError::InconsistentPartialGroup {
                        name: name.to_string(),
                        first: cached.extra.clone(),
                        requested: extra,
                    });
                }
                let recorded = cached.input_type;
                let context_type = self.types.resolve_type(scope.root_type(), &context)?;
                self.types.unify(context_type, recorded, &context.to_string())?;
                self.partials[index].call_sites.push(CallSite {
                    input_type: context_type,
                    context: context.to_string(),
                });
            }
            None => {
                if self.in_progress.iter().any(|p| p == name) {
                    return Err(CompileError::RecursivePartial { name: name.to_string() });
                }
                let input_type = self.types.resolve_type(scope.root_type(), &context)?;

                self.in_progress.push(name.to_string());
                let vars = VarRegistry::new();
                let partial_scope = Scope::root(input_type, &vars);
                let lines = self.lower_program(program, &partial_scope);
                self.in_progress.pop();
                let lines = lines?;

                tracing::debug!(partial = name, extra = ?extra, "lowered partial");
                self.partials.push(Partial {
                    name: name.to_string(),
                    input_type,
                    lines,
                    extra: extra.clone(),
                    call_sites: vec![CallSite {
                        input_type,
                        context: context.to_string(),
                    }],
                });
            }
        }

        let prefix = extra.map(|group| format!("{}.", group)).unwrap_or_default();
        Ok(vec![Output::Append(vec![format!("{}{}({})", prefix, name, context)])])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::optimizing_parse;
    use pretty_assertions::assert_eq;

    struct Lowered {
        lines: Vec<String>,
        input: String,
        partials: Vec<Partial>,
    }

    fn lower_with(template: &str, partials: &[(&str, &str)]) -> CompileResult<Lowered> {
        let sources: LinkedHashMap<String, String> = partials
            .iter()
            .map(|(name, source)| (name.to_string(), source.to_string()))
            .collect();
        let parsed = optimizing_parse(template, &sources, false, 1000)?;
        let mut compiler = Compiler::new(&parsed.partials);
        let root = compiler.new_root();
        let vars = VarRegistry::new();
        let scope = Scope::root(root, &vars);
        let lines = compiler.lower_program(&parsed.program, &scope)?;
        let (tree, partials) = compiler.finish()?;
        let input = tree.display(root);
        Ok(Lowered {
            lines,
            input,
            partials,
        })
    }

    fn lower(template: &str) -> CompileResult<Lowered> {
        lower_with(template, &[])
    }

    fn append(fragments: &[&str]) -> String {
        let fragments: Vec<String> = fragments.iter().map(|f| f.to_string()).collect();
        append_statement(&fragments)
    }

    #[test]
    fn test_merge_appends_respects_arity() {
        let outputs = (0..20).map(|i| Output::Append(vec![format!("a{}", i)])).collect();
        let lines = merge_appends(outputs);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].matches(", a").count(), 16);
        assert_eq!(lines[1].matches(", a").count(), 4);
    }

    #[test]
    fn test_merge_appends_breaks_on_lines() {
        let lines = merge_appends(vec![
            Output::Append(vec!["a".to_string()]),
            Output::Line("x;".to_string()),
            Output::Append(vec!["b".to_string()]),
            Output::Append(vec!["c".to_string()]),
        ]);
        assert_eq!(lines, vec![append(&["a"]), "x;".to_string(), append(&["b", "c"])]);
    }

    #[test]
    fn test_twenty_interpolations() {
        let template: String = (0..20).map(|i| format!("{{{{f{}}}}}", i)).collect();
        let lowered = lower(&template).unwrap();
        assert_eq!(lowered.lines.len(), 2);
        assert!(lowered.lines.iter().all(|l| l.matches("__input.f").count() <= 16));
    }

    #[test]
    fn test_content_and_interpolation_merge() {
        let lowered = lower("Hello {{name}}!").unwrap();
        assert_eq!(lowered.lines, vec![append(&["\"Hello \"", "__input.name", "\"!\""])]);
        assert_eq!(lowered.input, "{ name: string }");
    }

    #[test]
    fn test_if_single_expression_becomes_ternary() {
        let lowered = lower("{{#if flag}}{{value}}{{/if}}").unwrap();
        assert_eq!(lowered.lines, vec![append(&["__input.flag ? __input.value : \"\""])]);
        assert_eq!(lowered.input, "{ flag: bool, value: string }");
    }

    #[test]
    fn test_if_else_literals_are_converted() {
        let lowered = lower("{{#if flag}}yes{{else}}no{{/if}}").unwrap();
        assert_eq!(
            lowered.lines,
            vec![append(&["__input.flag ? string(\"yes\") : string(\"no\")"])]
        );
    }

    #[test]
    fn test_unless_and_inverse_negate() {
        let unless = lower("{{#unless flag}}{{x}}{{/unless}}").unwrap();
        assert_eq!(unless.lines, vec![append(&["!__input.flag ? __input.x : \"\""])]);

        let inverse = lower("{{#if flag}}{{else}}off{{/if}}").unwrap();
        assert_eq!(inverse.lines, vec![append(&["!__input.flag ? string(\"off\") : \"\""])]);
    }

    #[test]
    fn test_if_with_several_statements_is_a_block() {
        let lowered = lower("{{#if flag}}a{{b}}{{else}}c{{/if}}").unwrap();
        assert_eq!(
            lowered.lines,
            vec![
                "if(__input.flag) {".to_string(),
                append(&["\"a\"", "__input.b"]),
                "} else {".to_string(),
                append(&["\"c\""]),
                "}".to_string(),
            ]
        );
    }

    #[test]
    fn test_bare_head_block_is_a_conditional() {
        let lowered = lower("{{#visible}}<b>{{label}}</b>{{/visible}}").unwrap();
        assert_eq!(lowered.lines[0], "if(__input.visible) {");
        assert_eq!(lowered.input, "{ visible: bool, label: string }");
    }

    #[test]
    fn test_each_loop() {
        let lowered = lower("{{#each items length=3}}{{name}}{{/each}}").unwrap();
        assert_eq!(
            lowered.lines,
            vec![
                "for(uint256 __i; __i < __input.items.length; __i++) {".to_string(),
                append(&["__input.items[__i].name"]),
                "}".to_string(),
            ]
        );
        assert_eq!(lowered.input, "{ items: { name: string }[3] }");
    }

    #[test]
    fn test_nested_each_allocates_fresh_index() {
        let lowered =
            lower("{{#each rows}}{{#each cells}}{{this}}{{@index}}{{/each}}{{/each}}").unwrap();
        assert_eq!(
            lowered.lines[1],
            "for(uint256 __i2; __i2 < __input.rows[__i].cells.length; __i2++) {"
        );
        assert_eq!(
            lowered.lines[2],
            append(&[
                "__input.rows[__i].cells[__i2]",
                "SolidMustacheHelpers.uintToString(__i2, 0)"
            ])
        );
        assert_eq!(lowered.input, "{ rows: { cells: string[] }[] }");
    }

    #[test]
    fn test_each_block_params() {
        let lowered =
            lower("{{#each planets as |planet n|}}{{n}}:{{planet.name}}{{/each}}").unwrap();
        assert_eq!(
            lowered.lines[1],
            append(&[
                "SolidMustacheHelpers.uintToString(__i, 0)",
                "\":\"",
                "__input.planets[__i].name"
            ])
        );
    }

    #[test]
    fn test_parent_path_inside_each() {
        let lowered = lower("{{#each items}}{{../title}}{{/each}}").unwrap();
        assert_eq!(lowered.lines[1], append(&["__input.title"]));
    }

    #[test]
    fn test_with_dives_into_member() {
        let lowered = lower("{{#with person}}{{name}}{{/with}}").unwrap();
        assert_eq!(lowered.lines, vec![append(&["__input.person.name"])]);
    }

    #[test]
    fn test_integer_and_bytes_helpers() {
        let lowered =
            lower("{{uint256 price decimals=2}} {{int8 delta}} {{bytes8 code}} {{uint count}}")
                .unwrap();
        assert_eq!(
            lowered.lines,
            vec![append(&[
                "SolidMustacheHelpers.uintToString(__input.price, 2)",
                "\" \"",
                "SolidMustacheHelpers.intToString(__input.delta, 0)",
                "\" \"",
                "__input.code",
                "\" \"",
                "SolidMustacheHelpers.uintToString(__input.count, 0)",
            ])]
        );
        assert_eq!(
            lowered.input,
            "{ price: uint256, delta: int8, code: bytes8, count: uint }"
        );
    }

    #[test]
    fn test_helper_validation() {
        for template in [
            "{{uint12 x}}",
            "{{bytes33 x}}",
            "{{uint x y}}",
            "{{uint x decimals=\"2\"}}",
            "{{format x}}",
            "{{uint (lookup x)}}",
            "{{#if}}x{{/if}}",
            "{{#each items}}a{{else}}b{{/each}}",
            "{{#custom a}}x{{/custom}}",
        ] {
            let err = lower(template).err();
            assert!(
                matches!(err, Some(CompileError::Unsupported { .. })),
                "{} should be unsupported, got {:?}",
                template,
                err
            );
        }
    }

    #[test]
    fn test_type_conflict_between_statements() {
        let err = lower("{{x.y}}{{uint x.y}}").err().unwrap();
        assert_eq!(
            err,
            CompileError::TypeConflict {
                path: "__input.x.y".to_string(),
                requested: Kind::Uint,
                previous: Kind::String,
            }
        );
    }

    #[test]
    fn test_partial_is_lowered_once() {
        let lowered = lower_with(
            "{{> card a}}{{> card b}}{{> card c}}",
            &[("card", "<p>{{title}}</p>")],
        )
        .unwrap();
        assert_eq!(lowered.partials.len(), 1);
        assert_eq!(
            lowered.lines,
            vec![append(&["card(__input.a)", "card(__input.b)", "card(__input.c)"])]
        );
        assert_eq!(
            lowered.input,
            "{ a: { title: string }, b: { title: string }, c: { title: string } }"
        );
        assert_eq!(
            lowered.partials[0].lines,
            vec![append(&["\"<p>\"", "__input.title", "\"</p>\""])]
        );
    }

    #[test]
    fn test_partial_call_sites_are_recorded() {
        let lowered =
            lower_with("{{> card a}}{{> card b}}", &[("card", "{{title}}")]).unwrap();
        let contexts: Vec<&str> = lowered.partials[0]
            .call_sites
            .iter()
            .map(|site| site.context.as_str())
            .collect();
        assert_eq!(contexts, vec!["__input.a", "__input.b"]);
    }

    #[test]
    fn test_narrowing_after_partial_call_reaches_every_call_site() {
        let lowered = lower_with(
            "{{> card a}}{{> card b}}{{b.extra}}",
            &[("card", "{{title}}")],
        )
        .unwrap();
        assert_eq!(
            lowered.input,
            "{ a: { title: string, extra: string }, b: { title: string, extra: string } }"
        );
    }

    #[test]
    fn test_conflict_after_partial_call_is_reported() {
        let err = lower_with(
            "{{> card a}}{{> card b}}{{uint a.count}}{{b.count}}",
            &[("card", "{{title}}")],
        )
        .err()
        .unwrap();
        assert!(
            matches!(err, CompileError::TypeConflict { .. }),
            "got {:?}",
            err
        );
    }

    #[test]
    fn test_partial_extra_group_prefix() {
        let lowered =
            lower_with("{{> card this extra=\"Cards\"}}", &[("card", "{{title}}")]).unwrap();
        assert_eq!(lowered.lines, vec![append(&["Cards.card(__input)"])]);
        assert_eq!(lowered.partials[0].extra.as_deref(), Some("Cards"));
    }

    #[test]
    fn test_partial_inconsistent_group() {
        let err = lower_with("{{> card extra=\"Cards\"}}{{> card}}", &[("card", "{{title}}")])
            .err()
            .unwrap();
        assert_eq!(
            err,
            CompileError::InconsistentPartialGroup {
                name: "card".to_string(),
                first: Some("Cards".to_string()),
                requested: None,
            }
        );
    }

    #[test]
    fn test_unknown_partial() {
        let err = lower("{{> missing}}").err().unwrap();
        assert_eq!(err, CompileError::UnknownPartial { name: "missing".to_string() });
    }

    #[test]
    fn test_recursive_partial_is_detected() {
        let err = lower_with("{{> a}}", &[("a", "{{x}}{{> b}}"), ("b", "{{> a}}")]).err().unwrap();
        assert_eq!(err, CompileError::RecursivePartial { name: "a".to_string() });
    }

    #[test]
    fn test_constants_append_by_name() {
        let sources = LinkedHashMap::new();
        let parsed =
            optimizing_parse("<div class=\"x\">{{a}}<div class=\"x\">", &sources, false, 8)
                .unwrap();
        let mut compiler = Compiler::new(&parsed.partials);
        let root = compiler.new_root();
        let vars = VarRegistry::new();
        let lines = compiler.lower_program(&parsed.program, &Scope::root(root, &vars)).unwrap();
        assert_eq!(lines, vec![append(&["__constant0", "__input.a", "__constant0"])]);
    }
}
