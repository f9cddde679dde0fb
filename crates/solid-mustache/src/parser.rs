/*
 * parser.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template parsing.
//!
//! Tokenizing, whitespace control (standalone lines and `~` markers) and
//! block nesting are handled by the `handlebars` crate. This module converts
//! its template tree into the [`Program`] the compiler lowers, splitting
//! path references into parts and rejecting constructs that have no
//! Solidity counterpart (decorators, partial blocks, object literals).

use std::collections::HashMap;

use handlebars::TemplateError;
use handlebars::template::{
    BlockParam, DecoratorTemplate, HelperTemplate, Parameter, Template, TemplateElement,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::ast::{
    BlockStatement, CommentStatement, ContentStatement, Expression, Hash, HashPair,
    MustacheStatement, PartialStatement, PathExpression, Program, Span, Statement, SubExpression,
};
use crate::error::{CompileError, CompileResult};

/// Parse template source text into a [`Program`].
pub fn parse(source: &str) -> CompileResult<Program> {
    let template = Template::compile(source).map_err(template_error)?;
    program(&template, Vec::new())
}

/// Collapse every run of whitespace into a single space.
pub fn condense_whitespace(source: &str) -> String {
    static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
    WHITESPACE.replace_all(source, " ").into_owned()
}

fn template_error(err: TemplateError) -> CompileError {
    let (line, column) = err.pos().unwrap_or((0, 0));
    CompileError::Parse {
        message: err.reason().to_string(),
        line,
        column,
    }
}

fn program(template: &Template, block_params: Vec<String>) -> CompileResult<Program> {
    let mut body = Vec::with_capacity(template.elements.len());
    for (index, element) in template.elements.iter().enumerate() {
        let span = template
            .mapping
            .get(index)
            .map_or_else(Span::default, |mapping| Span::new(mapping.0, mapping.1));
        body.push(statement(element, span)?);
    }
    Ok(Program { body, block_params })
}

fn statement(element: &TemplateElement, span: Span) -> CompileResult<Statement> {
    match element {
        TemplateElement::RawString(text) => Ok(Statement::Content(ContentStatement {
            value: text.clone(),
            span,
        })),
        TemplateElement::Comment(text) => Ok(Statement::Comment(CommentStatement {
            value: text.clone(),
            span,
        })),
        TemplateElement::Expression(helper) => mustache(helper, true, span),
        TemplateElement::HtmlExpression(helper) => mustache(helper, false, span),
        TemplateElement::HelperBlock(helper) => block(helper, span),
        TemplateElement::PartialExpression(partial) => partial_statement(partial, span),
        TemplateElement::PartialBlock(_) => {
            Err(CompileError::unsupported("partial blocks are not supported"))
        }
        _ => Err(CompileError::unsupported("decorators are not supported")),
    }
}

fn mustache(helper: &HelperTemplate, escaped: bool, span: Span) -> CompileResult<Statement> {
    Ok(Statement::Mustache(MustacheStatement {
        path: expression(&helper.name, span)?,
        params: params(&helper.params, span)?,
        hash: hash(&helper.hash, span)?,
        escaped,
        span,
    }))
}

fn block(helper: &HelperTemplate, span: Span) -> CompileResult<Statement> {
    let Some(name) = helper.name.as_name() else {
        return Err(CompileError::unsupported("block helpers must be named by a path"));
    };
    let block_params = match &helper.block_param {
        None => Vec::new(),
        Some(BlockParam::Single(param)) => vec![block_param_name(param)?],
        Some(BlockParam::Pair((first, second))) => {
            vec![block_param_name(first)?, block_param_name(second)?]
        }
        Some(_) => return Err(CompileError::unsupported("unsupported block parameters")),
    };

    let body = match &helper.template {
        Some(template) => program(template, block_params)?,
        None => Program {
            body: Vec::new(),
            block_params,
        },
    };
    let inverse = helper
        .inverse
        .as_ref()
        .map(|template| program(template, Vec::new()))
        .transpose()?;

    Ok(Statement::Block(BlockStatement {
        path: path(name, span)?,
        params: params(&helper.params, span)?,
        hash: hash(&helper.hash, span)?,
        program: body,
        inverse,
        span,
    }))
}

fn block_param_name(param: &Parameter) -> CompileResult<String> {
    param
        .as_name()
        .map(str::to_string)
        .ok_or_else(|| CompileError::unsupported("block parameters must be plain names"))
}

fn partial_statement(partial: &DecoratorTemplate, span: Span) -> CompileResult<Statement> {
    let name = match &partial.name {
        Parameter::Literal(Value::String(name)) => name.clone(),
        other => match other.as_name() {
            Some(name) => name.to_string(),
            None => {
                return Err(CompileError::unsupported(
                    "dynamic partial names are not supported",
                ));
            }
        },
    };
    Ok(Statement::Partial(PartialStatement {
        name,
        params: params(&partial.params, span)?,
        hash: hash(&partial.hash, span)?,
        span,
    }))
}

fn params(params: &[Parameter], span: Span) -> CompileResult<Vec<Expression>> {
    params.iter().map(|param| expression(param, span)).collect()
}

fn hash(hash: &HashMap<String, Parameter>, span: Span) -> CompileResult<Hash> {
    let mut pairs = hash
        .iter()
        .map(|(key, value)| {
            Ok(HashPair {
                key: key.clone(),
                value: expression(value, span)?,
            })
        })
        .collect::<CompileResult<Vec<_>>>()?;
    pairs.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(Hash { pairs })
}

fn expression(param: &Parameter, span: Span) -> CompileResult<Expression> {
    if let Some(name) = param.as_name() {
        return path(name, span).map(Expression::Path);
    }
    match param {
        Parameter::Literal(value) => literal(value),
        Parameter::Subexpression(sub) => match sub.as_element() {
            TemplateElement::Expression(helper) => {
                Ok(Expression::SubExpression(Box::new(SubExpression {
                    path: expression(&helper.name, span)?,
                    params: params(&helper.params, span)?,
                    hash: hash(&helper.hash, span)?,
                })))
            }
            _ => Err(CompileError::unsupported("malformed sub-expression")),
        },
        _ => Err(CompileError::unsupported("unrecognized parameter")),
    }
}

fn literal(value: &Value) -> CompileResult<Expression> {
    match value {
        Value::String(text) => Ok(Expression::String(text.clone())),
        Value::Number(number) => Ok(Expression::Number(number.to_string())),
        Value::Bool(flag) => Ok(Expression::Boolean(*flag)),
        Value::Null => Ok(Expression::Null),
        Value::Array(_) | Value::Object(_) => {
            Err(CompileError::unsupported("array and object literals are not supported"))
        }
    }
}

fn path(text: &str, span: Span) -> CompileResult<PathExpression> {
    parse_path(text, span).map_err(|message| CompileError::Parse {
        message,
        line: span.line,
        column: span.column,
    })
}

/// Parse a path such as `../items.[0].name` into its parts.
pub(crate) fn parse_path(text: &str, span: Span) -> Result<PathExpression, String> {
    let (data, mut rest) = match text.strip_prefix('@') {
        Some(rest) => (true, rest),
        None => (false, text),
    };

    let mut depth = 0;
    loop {
        if rest == ".." {
            depth += 1;
            rest = "";
            break;
        }
        match rest.strip_prefix("../") {
            Some(r) => {
                depth += 1;
                rest = r;
            }
            None => break,
        }
    }

    let mut explicit_this = false;
    if rest == "." || rest == "this" {
        explicit_this = true;
        rest = "";
    } else if let Some(r) = rest
        .strip_prefix("./")
        .or_else(|| rest.strip_prefix("this."))
        .or_else(|| rest.strip_prefix("this/"))
    {
        explicit_this = true;
        rest = r;
    }

    let parts = split_segments(rest)?;
    if data && parts.is_empty() {
        return Err(format!("invalid data variable '{}'", text));
    }

    Ok(PathExpression {
        original: text.to_string(),
        parts,
        depth,
        data,
        explicit_this,
        span,
    })
}

fn split_segments(text: &str) -> Result<Vec<String>, String> {
    let mut parts = Vec::new();
    if text.is_empty() {
        return Ok(parts);
    }

    let mut current = String::new();
    let mut bracketed = false;
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '[' if current.is_empty() => {
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    current.push(inner);
                }
                bracketed = true;
            }
            '.' | '/' => {
                if current.is_empty() && !bracketed {
                    return Err(format!("invalid path '{}'", text));
                }
                parts.push(std::mem::take(&mut current));
                bracketed = false;
            }
            _ => current.push(c),
        }
    }
    if current.is_empty() && !bracketed {
        return Err(format!("invalid path '{}'", text));
    }
    parts.push(current);
    Ok(parts)
}
