/*
 * type_names.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Naming of the struct declarations needed by the inferred input type.
//!
//! Structs are named after the field that holds them (singularized for
//! array elements) and share one declaration whenever their shapes are
//! compatible.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CompileError, CompileResult};
use crate::input_type::{InputType, TypeId, TypeTree};

/// Name of the render input struct.
pub const INPUT_STRUCT_NAME: &str = "__Input";

#[derive(Debug, Clone, PartialEq)]
pub struct TypeName {
    pub name: String,
    pub ty: TypeId,
}

/// Ordered registry of struct names, one entry per struct node visited.
#[derive(Debug)]
pub struct TypeNames {
    entries: Vec<TypeName>,
    explicit_types: bool,
}

impl TypeNames {
    /// Walk the input struct rooted at `root` depth-first, in member
    /// insertion order, and name every struct reachable from it.
    ///
    /// With `explicit_types`, unsized integers are spelled `uint256` and
    /// `int256`.
    pub fn generate(tree: &TypeTree, root: TypeId, explicit_types: bool) -> CompileResult<Self> {
        let mut names = Self {
            entries: vec![TypeName {
                name: INPUT_STRUCT_NAME.to_string(),
                ty: root,
            }],
            explicit_types,
        };
        names.visit_struct(tree, root)?;
        tracing::debug!(
            structs = names.structs().len(),
            "generated struct type names"
        );
        Ok(names)
    }

    fn visit_struct(&mut self, tree: &TypeTree, id: TypeId) -> CompileResult<()> {
        let InputType::Struct { members } = tree.get(id) else {
            return Ok(());
        };
        for (field, member) in members.iter() {
            match tree.get(*member) {
                InputType::Array { element, .. } => match tree.get(*element) {
                    InputType::Array { .. } => {
                        return Err(CompileError::MultiDimensionalArray {
                            field: field.clone(),
                        });
                    }
                    InputType::Struct { .. } => {
                        self.use_existing_or_add(tree, &singularize(field), *element);
                        self.visit_struct(tree, *element)?;
                    }
                    _ => {}
                },
                InputType::Struct { .. } => {
                    self.use_existing_or_add(tree, field, *member);
                    self.visit_struct(tree, *member)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn use_existing_or_add(&mut self, tree: &TypeTree, field: &str, id: TypeId) -> String {
        let mut name = capitalize(field);
        let existing = self
            .entries
            .iter()
            .filter(|entry| entry.name != INPUT_STRUCT_NAME)
            .find(|entry| tree.compatible(entry.ty, id))
            .map(|entry| entry.name.clone());

        match existing {
            Some(existing) => {
                let shorter_and_unique = name.len() < existing.len() && !self.is_taken(&name);
                if shorter_and_unique {
                    for entry in self.entries.iter_mut().filter(|e| e.name == existing) {
                        entry.name = name.clone();
                    }
                } else {
                    name = existing;
                }
            }
            None => {
                while self.is_taken(&name) {
                    name = increment_name(&name);
                }
            }
        }

        self.entries.push(TypeName {
            name: name.clone(),
            ty: id,
        });
        name
    }

    fn is_taken(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }

    /// Struct name registered for `id`: the entry recorded for that very
    /// node, else the first compatible one other than the input struct.
    pub fn find(&self, tree: &TypeTree, id: TypeId) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.ty == id)
            .or_else(|| {
                self.entries
                    .iter()
                    .filter(|entry| entry.name != INPUT_STRUCT_NAME)
                    .find(|entry| tree.compatible(entry.ty, id))
            })
            .map(|entry| entry.name.as_str())
    }

    /// Distinct struct declarations in registration order.
    pub fn structs(&self) -> Vec<&TypeName> {
        let mut unique: Vec<&TypeName> = Vec::new();
        for entry in &self.entries {
            if !unique.iter().any(|u| u.name == entry.name) {
                unique.push(entry);
            }
        }
        unique
    }

    /// Solidity spelling of the type of `id`.
    pub fn type_name(&self, tree: &TypeTree, id: TypeId) -> CompileResult<String> {
        let sized = |base: &str, length: &Option<u32>| match length {
            Some(length) => format!("{}{}", base, length),
            None if self.explicit_types => format!("{}256", base),
            None => base.to_string(),
        };
        Ok(match tree.get(id) {
            InputType::Unknown | InputType::String { length: None } => "string".to_string(),
            InputType::String {
                length: Some(length),
            } => format!("bytes{}", length),
            InputType::Uint { length } => sized("uint", length),
            InputType::Int { length } => sized("int", length),
            InputType::Bool => "bool".to_string(),
            InputType::Array { length, element } => {
                if let InputType::Array { .. } = tree.get(*element) {
                    return Err(CompileError::MultiDimensionalArray {
                        field: tree.display(id),
                    });
                }
                let element = self.type_name(tree, *element)?;
                match length {
                    Some(length) => format!("{}[{}]", element, length),
                    None => format!("{}[]", element),
                }
            }
            InputType::Struct { .. } => self
                .find(tree, id)
                .map(str::to_string)
                .ok_or_else(|| CompileError::UnnamedType {
                    description: tree.display(id),
                })?,
        })
    }
}

/// Static size in bits; `None` for dynamically sized types.
pub fn static_size(tree: &TypeTree, id: TypeId) -> Option<u64> {
    match tree.get(id) {
        InputType::Uint { length } | InputType::Int { length } => {
            Some(u64::from(length.unwrap_or(256)))
        }
        InputType::Bool => Some(8),
        InputType::String { length } => length.map(|bytes| u64::from(bytes) * 8),
        InputType::Array { length, element } => {
            let length = u64::from((*length)?);
            static_size(tree, *element).map(|size| size.saturating_mul(length))
        }
        InputType::Struct { members } => members
            .values()
            .try_fold(0u64, |acc, member| {
                static_size(tree, *member).map(|size| acc.saturating_add(size))
            }),
        InputType::Unknown => None,
    }
}

static NAME_COUNTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\w+?)(\d*)$").unwrap());

/// Bump the numeric suffix of a name: `Item` -> `Item2`, `__i2` -> `__i3`.
pub fn increment_name(name: &str) -> String {
    let Some(caps) = NAME_COUNTER.captures(name) else {
        return format!("{}2", name);
    };
    let base = caps.get(1).map_or("", |m| m.as_str());
    let counter = caps
        .get(2)
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .unwrap_or(1);
    format!("{}{}", base, counter + 1)
}

pub fn singularize(name: &str) -> String {
    name.strip_suffix('s').unwrap_or(name).to_string()
}

pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
