/*
 * solidity.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Solidity source generation.
//!
//! Small string builders used during lowering, and the final assembly of
//! the compiled module.

use hashlink::LinkedHashMap;

use crate::error::CompileResult;
use crate::input_type::{InputType, TypeId, TypeTree};
use crate::lower::Partial;
use crate::options::CompileOptions;
use crate::scope::INPUT_VAR_NAME;
use crate::type_names::{INPUT_STRUCT_NAME, TypeNames, static_size};

/// Accumulator the render functions append to.
pub const RESULT_VAR_NAME: &str = "__result";

pub const HELPER_LIBRARY_NAME: &str = "SolidMustacheHelpers";

const HELPER_LIBRARY: &str = r#"library SolidMustacheHelpers {
function intToString(int256 i, uint256 decimals) internal pure returns (string memory) {
if (i >= 0) {
return uintToString(uint256(i), decimals);
}
return string(abi.encodePacked("-", uintToString(uint256(-i), decimals)));
}

function uintToString(uint256 i, uint256 decimals) internal pure returns (string memory) {
if (i == 0) {
return "0";
}
uint256 j = i;
uint256 len;
while (j != 0) {
len++;
j /= 10;
}
uint256 strLen = decimals >= len ? decimals + 2 : (decimals > 0 ? len + 1 : len);

bytes memory bstr = new bytes(strLen);
uint256 k = strLen;
while (k > 0) {
k -= 1;
uint8 temp = (48 + uint8(i - (i / 10) * 10));
i /= 10;
bstr[k] = bytes1(temp);
if (decimals > 0 && strLen - k == decimals) {
k -= 1;
bstr[k] = ".";
}
}
return string(bstr);
}
}"#;

/// Escape text for a double-quoted Solidity string literal.
///
/// Non-ASCII characters are written as their UTF-8 bytes, since plain
/// Solidity literals only admit printable ASCII.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\x0c' => out.push_str("\\f"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x0b' => out.push_str("\\v"),
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            c => {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("\\x{:02x}", byte));
                }
            }
        }
    }
    out
}

pub fn string_literal(text: &str) -> String {
    format!("\"{}\"", escape(text))
}

/// `__result = string(abi.encodePacked(__result, a, b));`
pub fn append_statement(fragments: &[String]) -> String {
    let mut args = vec![RESULT_VAR_NAME.to_string()];
    args.extend(fragments.iter().cloned());
    format!(
        "{} = string(abi.encodePacked({}));",
        RESULT_VAR_NAME,
        args.join(", ")
    )
}

/// Call of a formatting helper: `SolidMustacheHelpers.uintToString(x, 2)`.
pub fn helper_call(helper: &str, argument: &str, decimals: u32) -> String {
    format!("{}.{}({}, {})", HELPER_LIBRARY_NAME, helper, argument, decimals)
}

/// Assembles the final module from the lowered pieces.
pub struct Emitter<'a> {
    tree: &'a TypeTree,
    names: &'a TypeNames,
    options: &'a CompileOptions,
}

impl<'a> Emitter<'a> {
    pub fn new(tree: &'a TypeTree, names: &'a TypeNames, options: &'a CompileOptions) -> Self {
        Self {
            tree,
            names,
            options,
        }
    }

    pub fn emit(
        &self,
        render_lines: &[String],
        partials: &[Partial],
        constants: &LinkedHashMap<String, String>,
    ) -> CompileResult<String> {
        let mut out = String::new();
        out.push_str(&self.options.header);
        out.push('\n');
        out.push_str(&format!("pragma solidity {};\n\n", self.options.solidity_pragma));

        for (name, value) in constants.iter() {
            out.push_str(&format!("string constant {} = {};\n", name, string_literal(value)));
        }
        if !constants.is_empty() {
            out.push('\n');
        }

        let kind = if self.options.contract {
            "contract"
        } else {
            "library"
        };
        out.push_str(&format!("{} {} {{\n", kind, self.options.name));

        out.push_str(&self.structs()?);

        out.push_str(&format!(
            "function render({} memory {}) public pure returns (string memory {}) {{\n",
            INPUT_STRUCT_NAME, INPUT_VAR_NAME, RESULT_VAR_NAME
        ));
        push_lines(&mut out, render_lines);
        out.push_str("}\n\n");

        for partial in partials.iter().filter(|p| p.extra.is_none()) {
            out.push_str(&self.partial_function(partial, "internal", None)?);
            out.push('\n');
        }
        out.push_str("}\n\n");

        // one library per extraction group, in first-use order
        let mut groups: LinkedHashMap<&str, Vec<&Partial>> = LinkedHashMap::new();
        for partial in partials {
            if let Some(extra) = &partial.extra {
                groups
                    .entry(extra.as_str())
                    .or_insert_with(Vec::new)
                    .push(partial);
            }
        }
        for (group, members) in groups.iter() {
            out.push_str(&format!("library {} {{\n", group));
            for partial in members {
                out.push_str(&self.partial_function(
                    partial,
                    "external",
                    Some(&self.options.name),
                )?);
                out.push('\n');
            }
            out.push_str("}\n\n");
        }

        out.push_str(HELPER_LIBRARY);
        out.push('\n');
        Ok(out)
    }

    fn structs(&self) -> CompileResult<String> {
        let mut out = String::new();
        for entry in self.names.structs() {
            let InputType::Struct { members } = self.tree.get(entry.ty) else {
                continue;
            };
            let mut fields: Vec<(&String, &TypeId)> = members.iter().collect();
            // fixed size fields first, smallest first; dynamic fields last
            fields.sort_by_key(|(_, ty)| static_size(self.tree, **ty).unwrap_or(u64::MAX));

            out.push_str(&format!("struct {} {{\n", entry.name));
            for (field, ty) in fields {
                out.push_str(&format!(
                    "{} {};\n",
                    self.names.type_name(self.tree, *ty)?,
                    field
                ));
            }
            out.push_str("}\n\n");
        }
        Ok(out)
    }

    fn partial_function(
        &self,
        partial: &Partial,
        visibility: &str,
        qualifier: Option<&str>,
    ) -> CompileResult<String> {
        let type_name = self.names.type_name(self.tree, partial.input_type)?;
        let prefix = match qualifier {
            Some(module) if self.is_struct_based(partial.input_type) => format!("{}.", module),
            _ => String::new(),
        };
        let location = if self.is_value_type(partial.input_type) {
            ""
        } else {
            " memory"
        };

        let mut out = format!(
            "function {}({}{}{} {}) {} pure returns (string memory {}) {{\n",
            partial.name,
            prefix,
            type_name,
            location,
            INPUT_VAR_NAME,
            visibility,
            RESULT_VAR_NAME
        );
        push_lines(&mut out, &partial.lines);
        out.push_str("}\n");
        Ok(out)
    }

    fn is_value_type(&self, id: TypeId) -> bool {
        matches!(
            self.tree.get(id),
            InputType::Bool
                | InputType::Uint { .. }
                | InputType::Int { .. }
                | InputType::String { length: Some(_) }
        )
    }

    fn is_struct_based(&self, id: TypeId) -> bool {
        match self.tree.get(id) {
            InputType::Struct { .. } => true,
            InputType::Array { element, .. } => self.is_struct_based(*element),
            _ => false,
        }
    }
}

fn push_lines(out: &mut String, lines: &[String]) {
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
}
