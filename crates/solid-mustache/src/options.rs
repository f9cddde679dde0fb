/*
 * options.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Compile options.

use hashlink::LinkedHashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};
use crate::format::FormatOptions;

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap());

/// Whether `name` is a valid Solidity identifier.
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Options for [`crate::compile`].
///
/// Deserializes from the camelCase JSON keys used by configuration files;
/// every key is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompileOptions {
    /// Name of the generated library or contract.
    pub name: String,
    /// Text placed before the pragma, usually a license marker.
    pub header: String,
    #[serde(alias = "pragma")]
    pub solidity_pragma: String,
    /// Emit a `contract` instead of a `library`.
    pub contract: bool,
    /// Partial sources by name.
    pub partials: LinkedHashMap<String, String>,
    /// Collapse whitespace runs in template text to a single space.
    pub condense_whitespace: bool,
    /// Shortest substring factored out into a shared constant.
    pub min_repeating_substring_length: usize,
    #[serde(flatten)]
    pub formatting: FormatOptions,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            name: "Template".to_string(),
            header: "// SPDX-License-Identifier: UNLICENSED".to_string(),
            solidity_pragma: "^0.8.6".to_string(),
            contract: false,
            partials: LinkedHashMap::new(),
            condense_whitespace: false,
            min_repeating_substring_length: 16,
            formatting: FormatOptions::default(),
        }
    }
}

impl CompileOptions {
    pub fn from_json(json: &str) -> CompileResult<Self> {
        serde_json::from_str(json).map_err(|e| CompileError::InvalidOptions {
            message: e.to_string(),
        })
    }

    pub fn validate(&self) -> CompileResult<()> {
        if !is_identifier(&self.name) {
            return Err(CompileError::InvalidOptions {
                message: format!("name '{}' is not a valid identifier", self.name),
            });
        }
        if self.min_repeating_substring_length == 0 {
            return Err(CompileError::InvalidOptions {
                message: "minRepeatingSubstringLength must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn with_partial(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.partials.insert(name.into(), source.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_contract(mut self, contract: bool) -> Self {
        self.contract = contract;
        self
    }
}
