/*
 * input_type.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Structural type inference for the render input.
//!
//! The input shape is discovered lazily: every path the template dereferences
//! narrows the nodes along that path, starting from [`InputType::Unknown`].
//! Nodes live in a single [`TypeTree`] arena so that scopes, partials and the
//! type namer can all address the same node through a [`TypeId`].

use std::fmt;

use hashlink::LinkedHashMap;

use crate::error::{CompileError, CompileResult};
use crate::scope::{PathRoot, Segment, TargetPath};

/// Handle to a node in a [`TypeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(usize);

/// The concrete kinds a node can be narrowed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    String,
    Uint,
    Int,
    Bool,
    Array,
    Struct,
}

impl Kind {
    /// Whether nodes of this kind carry a fixed length (bytes, bit width,
    /// or element count).
    pub fn has_length(self) -> bool {
        matches!(self, Kind::String | Kind::Uint | Kind::Int | Kind::Array)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::String => "string",
            Kind::Uint => "uint",
            Kind::Int => "int",
            Kind::Bool => "bool",
            Kind::Array => "array",
            Kind::Struct => "struct",
        };
        f.write_str(name)
    }
}

/// A node of the inferred input type.
#[derive(Debug, Clone, PartialEq)]
pub enum InputType {
    /// Not yet narrowed.
    Unknown,
    String { length: Option<u32> },
    Uint { length: Option<u32> },
    Int { length: Option<u32> },
    Bool,
    Array { length: Option<u32>, element: TypeId },
    Struct { members: LinkedHashMap<String, TypeId> },
}

impl InputType {
    pub fn kind(&self) -> Option<Kind> {
        match self {
            InputType::Unknown => None,
            InputType::String { .. } => Some(Kind::String),
            InputType::Uint { .. } => Some(Kind::Uint),
            InputType::Int { .. } => Some(Kind::Int),
            InputType::Bool => Some(Kind::Bool),
            InputType::Array { .. } => Some(Kind::Array),
            InputType::Struct { .. } => Some(Kind::Struct),
        }
    }

    pub fn length(&self) -> Option<u32> {
        match self {
            InputType::String { length }
            | InputType::Uint { length }
            | InputType::Int { length }
            | InputType::Array { length, .. } => *length,
            _ => None,
        }
    }

    fn length_mut(&mut self) -> Option<&mut Option<u32>> {
        match self {
            InputType::String { length }
            | InputType::Uint { length }
            | InputType::Int { length }
            | InputType::Array { length, .. } => Some(length),
            _ => None,
        }
    }
}

/// Arena holding every inferred type node of one compile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeTree {
    nodes: Vec<InputType>,
}

impl TypeTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, ty: InputType) -> TypeId {
        self.nodes.push(ty);
        TypeId(self.nodes.len() - 1)
    }

    /// Allocate an empty struct, the root of a render input.
    pub fn new_struct_root(&mut self) -> TypeId {
        self.alloc(InputType::Struct {
            members: LinkedHashMap::new(),
        })
    }

    pub fn get(&self, id: TypeId) -> &InputType {
        &self.nodes[id.0]
    }

    fn get_mut(&mut self, id: TypeId) -> &mut InputType {
        &mut self.nodes[id.0]
    }

    /// Narrow the node addressed by `path` (relative to `root`) to `kind`,
    /// widening every node along the way to the container kind the access
    /// requires.
    ///
    /// Paths rooted at a local variable are left alone: they are narrowed
    /// through the input path they alias.
    pub fn narrow(
        &mut self,
        root: TypeId,
        path: &TargetPath,
        kind: Kind,
        length: Option<u32>,
    ) -> CompileResult<()> {
        if !matches!(path.root, PathRoot::Input) {
            return Ok(());
        }

        let mut current = root;
        for (i, segment) in path.segments.iter().enumerate() {
            let requested = match segment {
                Segment::Index(_) => Kind::Array,
                Segment::Member(_) => Kind::Struct,
            };
            let previous = match self.get(current).kind() {
                None => {
                    self.widen(current, requested);
                    requested
                }
                Some(kind) => kind,
            };
            if previous != requested {
                return Err(CompileError::AccessConflict {
                    path: path.to_string(),
                    field: field_label(path, i),
                    requested,
                    previous,
                });
            }
            current = self.step(current, segment);
        }

        let existing = self.get(current).kind();
        match existing {
            Some(previous) if previous != kind => {
                return Err(CompileError::TypeConflict {
                    path: path.to_string(),
                    requested: kind,
                    previous,
                });
            }
            Some(_) => {}
            None => self.widen(current, kind),
        }

        if let Some(length) = length.filter(|l| *l > 0) {
            match self.get_mut(current).length_mut() {
                Some(slot) => *slot = Some(slot.map_or(length, |l| l.max(length))),
                None => return Err(CompileError::LengthlessKind { kind }),
            }
        }

        Ok(())
    }

    /// Read-only walk used to find a partial's context type.
    ///
    /// Missing members are inserted and `Unknown` intermediates are widened
    /// to the container kind the access requires; an existing node of the
    /// wrong kind is an error.
    pub fn resolve_type(&mut self, root: TypeId, path: &TargetPath) -> CompileResult<TypeId> {
        if let PathRoot::Local(name) = &path.root {
            return Err(CompileError::unsupported(format!(
                "partial context {} is not part of the input",
                name
            )));
        }

        let mut current = root;
        for (i, segment) in path.segments.iter().enumerate() {
            let requested = match segment {
                Segment::Index(_) => Kind::Array,
                Segment::Member(_) => Kind::Struct,
            };
            match self.get(current).kind() {
                None => self.widen(current, requested),
                Some(actual) if actual != requested => {
                    return Err(CompileError::Resolution {
                        field: field_label(path, i),
                        requested,
                        actual,
                    });
                }
                Some(_) => {}
            }
            current = self.step(current, segment);
        }
        Ok(current)
    }

    /// Whether two nodes can share one declaration.
    pub fn compatible(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        match (self.get(a), self.get(b)) {
            (InputType::Unknown, _) | (_, InputType::Unknown) => true,
            (
                InputType::Array {
                    length: la,
                    element: ea,
                },
                InputType::Array {
                    length: lb,
                    element: eb,
                },
            ) => la == lb && self.compatible(*ea, *eb),
            (InputType::Struct { members: ma }, InputType::Struct { members: mb }) => {
                ma.len() == mb.len()
                    && ma.iter().all(|(name, ta)| {
                        mb.get(name).is_some_and(|tb| self.compatible(*ta, *tb))
                    })
            }
            (a, b) => a.kind() == b.kind() && a.length() == b.length(),
        }
    }

    /// Whether `inner` is `outer` or one of its descendants.
    pub fn contains(&self, outer: TypeId, inner: TypeId) -> bool {
        if outer == inner {
            return true;
        }
        match self.get(outer) {
            InputType::Array { element, .. } => self.contains(*element, inner),
            InputType::Struct { members } => members.values().any(|m| self.contains(*m, inner)),
            _ => false,
        }
    }

    /// Narrow `target` to everything already known about `source`.
    ///
    /// Used when a cached partial is called with a context located at a
    /// different node than the one it was first lowered against.
    pub fn unify(&mut self, target: TypeId, source: TypeId, path: &str) -> CompileResult<()> {
        if target == source {
            return Ok(());
        }
        if self.contains(target, source) || self.contains(source, target) {
            return Err(CompileError::unsupported(format!(
                "partial context {} is nested inside another context of the same partial",
                path
            )));
        }
        self.unify_nodes(target, source, path)
    }

    fn unify_nodes(&mut self, target: TypeId, source: TypeId, path: &str) -> CompileResult<()> {
        let source_ty = self.get(source).clone();
        let Some(kind) = source_ty.kind() else {
            return Ok(());
        };

        match self.get(target).kind() {
            None => self.widen(target, kind),
            Some(previous) if previous != kind => {
                return Err(CompileError::TypeConflict {
                    path: path.to_string(),
                    requested: kind,
                    previous,
                });
            }
            Some(_) => {}
        }

        if let Some(length) = source_ty.length() {
            if let Some(slot) = self.get_mut(target).length_mut() {
                *slot = Some(slot.map_or(length, |l| l.max(length)));
            }
        }

        match source_ty {
            InputType::Array { element, .. } => {
                let target_element = self.step(target, &Segment::Index(String::new()));
                self.unify_nodes(target_element, element, &format!("{}[]", path))
            }
            InputType::Struct { members } => {
                for (name, member) in members.iter() {
                    let target_member = self.step(target, &Segment::Member(name.clone()));
                    self.unify_nodes(target_member, *member, &format!("{}.{}", path, name))?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Turn an `Unknown` node into an empty node of `kind`.
    fn widen(&mut self, id: TypeId, kind: Kind) {
        let ty = match kind {
            Kind::String => InputType::String { length: None },
            Kind::Uint => InputType::Uint { length: None },
            Kind::Int => InputType::Int { length: None },
            Kind::Bool => InputType::Bool,
            Kind::Array => InputType::Array {
                length: None,
                element: self.alloc(InputType::Unknown),
            },
            Kind::Struct => InputType::Struct {
                members: LinkedHashMap::new(),
            },
        };
        *self.get_mut(id) = ty;
    }

    /// Dereference one segment of an already-widened container node.
    fn step(&mut self, current: TypeId, segment: &Segment) -> TypeId {
        match (self.get(current), segment) {
            (InputType::Array { element, .. }, Segment::Index(_)) => *element,
            (InputType::Struct { members }, Segment::Member(name)) => {
                if let Some(existing) = members.get(name) {
                    return *existing;
                }
                let member = self.alloc(InputType::Unknown);
                if let InputType::Struct { members } = self.get_mut(current) {
                    members.insert(name.clone(), member);
                }
                member
            }
            // callers widen before stepping
            _ => current,
        }
    }

    /// Render a node as a compact type expression.
    pub fn display(&self, id: TypeId) -> String {
        let mut out = String::new();
        self.write_node(&mut out, id);
        out
    }

    fn write_node(&self, out: &mut String, id: TypeId) {
        let with_length = |out: &mut String, name: &str, length: &Option<u32>| {
            out.push_str(name);
            if let Some(length) = length {
                out.push_str(&length.to_string());
            }
        };
        match self.get(id) {
            InputType::Unknown => out.push('?'),
            InputType::String { length } => match length {
                Some(_) => with_length(out, "bytes", length),
                None => out.push_str("string"),
            },
            InputType::Uint { length } => with_length(out, "uint", length),
            InputType::Int { length } => with_length(out, "int", length),
            InputType::Bool => out.push_str("bool"),
            InputType::Array { length, element } => {
                self.write_node(out, *element);
                out.push('[');
                if let Some(length) = length {
                    out.push_str(&length.to_string());
                }
                out.push(']');
            }
            InputType::Struct { members } => {
                out.push('{');
                for (i, (name, member)) in members.iter().enumerate() {
                    out.push_str(if i == 0 { " " } else { ", " });
                    out.push_str(name);
                    out.push_str(": ");
                    self.write_node(out, *member);
                }
                out.push_str(if members.is_empty() { "}" } else { " }" });
            }
        }
    }
}

/// Name of the field dereferenced by segment `index`, for error messages.
fn field_label(path: &TargetPath, index: usize) -> String {
    match index.checked_sub(1).map(|i| &path.segments[i]) {
        None => path.root.to_string(),
        Some(Segment::Member(name)) => name.clone(),
        Some(Segment::Index(index)) => format!("[{}]", index),
    }
}
