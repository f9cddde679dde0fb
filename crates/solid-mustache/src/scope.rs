/*
 * scope.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Scope chain used to resolve template paths to Solidity expressions.
//!
//! Every `each`/`with` block dives into a child scope that borrows its
//! parent. Children share the type root and the generated-identifier
//! registry, and extend the alias map with loop item and index names.

use std::cell::RefCell;
use std::fmt;

use hashlink::LinkedHashMap;

use crate::ast::PathExpression;
use crate::error::{CompileError, CompileResult};
use crate::input_type::TypeId;
use crate::type_names::increment_name;

/// Name of the render input parameter in generated code.
pub const INPUT_VAR_NAME: &str = "__input";

/// Data variable bound to the current loop index.
pub const INDEX_ALIAS: &str = "@index";

/// Where a resolved path starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathRoot {
    /// The render input (or the context parameter of a partial).
    Input,
    /// A generated local variable, such as a loop index.
    Local(String),
}

impl fmt::Display for PathRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathRoot::Input => f.write_str(INPUT_VAR_NAME),
            PathRoot::Local(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// `.name`
    Member(String),
    /// `[expr]`, either a literal index or a loop variable.
    Index(String),
}

/// A resolved path in generated code, e.g. `__input.items[__i].name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPath {
    pub root: PathRoot,
    pub segments: Vec<Segment>,
}

impl TargetPath {
    pub fn input() -> Self {
        Self {
            root: PathRoot::Input,
            segments: Vec::new(),
        }
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self {
            root: PathRoot::Local(name.into()),
            segments: Vec::new(),
        }
    }

    pub fn member(mut self, name: impl Into<String>) -> Self {
        self.segments.push(Segment::Member(name.into()));
        self
    }

    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.segments.push(Segment::Index(index.into()));
        self
    }

    /// A bare local variable, which is always a loop index.
    pub fn is_local_variable(&self) -> bool {
        matches!(self.root, PathRoot::Local(_)) && self.segments.is_empty()
    }
}

impl fmt::Display for TargetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for segment in &self.segments {
            match segment {
                Segment::Member(name) => write!(f, ".{}", name)?,
                Segment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

/// Registry of generated identifiers, shared by a whole scope chain.
#[derive(Debug)]
pub struct VarRegistry {
    names: RefCell<Vec<String>>,
}

impl Default for VarRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VarRegistry {
    pub fn new() -> Self {
        Self {
            names: RefCell::new(vec![INPUT_VAR_NAME.to_string()]),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.borrow().iter().any(|n| n == name)
    }

    /// Reserve `base`, or the first free name derived from it by bumping
    /// its numeric suffix (`__i`, `__i2`, `__i3`, ...).
    pub fn allocate(&self, base: &str) -> String {
        let mut name = base.to_string();
        while self.contains(&name) {
            name = increment_name(&name);
        }
        self.names.borrow_mut().push(name.clone());
        name
    }
}

#[derive(Debug)]
pub struct Scope<'a> {
    path: TargetPath,
    root_type: TypeId,
    var_names: &'a VarRegistry,
    aliases: LinkedHashMap<String, TargetPath>,
    parent: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    /// Root scope of a template or partial, addressing `__input`.
    pub fn root(root_type: TypeId, var_names: &'a VarRegistry) -> Self {
        Self {
            path: TargetPath::input(),
            root_type,
            var_names,
            aliases: LinkedHashMap::new(),
            parent: None,
        }
    }

    pub fn path(&self) -> &TargetPath {
        &self.path
    }

    pub fn root_type(&self) -> TypeId {
        self.root_type
    }

    pub fn allocate_var(&self, base: &str) -> String {
        self.var_names.allocate(base)
    }

    /// Child scope rooted at `path`. `aliases` are layered over the
    /// inherited ones.
    pub fn dive<'s>(
        &'s self,
        path: TargetPath,
        aliases: impl IntoIterator<Item = (String, TargetPath)>,
    ) -> Scope<'s> {
        let mut merged = self.aliases.clone();
        for (name, target) in aliases {
            merged.replace(name, target);
        }
        Scope {
            path,
            root_type: self.root_type,
            var_names: self.var_names,
            aliases: merged,
            parent: Some(self),
        }
    }

    /// The ancestor `depth` levels up, if the chain is that long.
    pub fn climb(&self, depth: usize) -> Option<&Scope<'a>> {
        let mut scope = self;
        for _ in 0..depth {
            scope = scope.parent?;
        }
        Some(scope)
    }

    pub fn resolve(&self, path: &PathExpression) -> CompileResult<TargetPath> {
        if path.depth > 0 {
            let ancestor = self
                .climb(path.depth)
                .ok_or_else(|| CompileError::ExcessiveDepth {
                    original: path.original.clone(),
                })?;
            return ancestor.resolve(&path.without_depth());
        }

        if path.data {
            let name = format!("@{}", path.parts.join("."));
            if name != INDEX_ALIAS {
                return Err(CompileError::unsupported(format!(
                    "data variable {}",
                    path.original
                )));
            }
            return self
                .aliases
                .get(INDEX_ALIAS)
                .cloned()
                .ok_or(CompileError::UnresolvedBuiltIn { name });
        }

        let Some((head, rest)) = path.parts.split_first() else {
            return Ok(self.path.clone());
        };

        let aliased = if path.explicit_this {
            None
        } else {
            self.aliases.get(head).cloned()
        };
        let origin = match aliased {
            Some(target) => target,
            None => append_segment(self.path.clone(), head),
        };

        Ok(rest.iter().fold(origin, |target, part| append_segment(target, part)))
    }
}

fn append_segment(target: TargetPath, part: &str) -> TargetPath {
    if !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()) {
        target.index(part)
    } else {
        target.member(part)
    }
}
