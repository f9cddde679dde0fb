/*
 * compile.rs
 * Copyright (c) 2025 Posit, PBC
 */

use pretty_assertions::assert_eq;
use solid_mustache::{
    CompileError, CompileOptions, CompileResult, FormatOptions, SourceFormatter, compile,
    compile_with_formatter,
};

fn compile_default(template: &str) -> String {
    compile(template, &CompileOptions::default()).unwrap()
}

/// Returns the generated source untouched.
struct Passthrough;

impl SourceFormatter for Passthrough {
    fn format(&self, source: &str, _options: &FormatOptions) -> CompileResult<String> {
        Ok(source.to_string())
    }
}

#[test]
fn test_hello_world_module() {
    let output = compile_default("Hello {{name}}!");
    let expected = r#"// SPDX-License-Identifier: UNLICENSED
pragma solidity ^0.8.6;

library Template {
    struct __Input {
        string name;
    }

    function render(__Input memory __input) public pure returns (string memory __result) {
        __result = string(abi.encodePacked(__result, "Hello ", __input.name, "!"));
    }
}

library SolidMustacheHelpers {
"#;
    assert!(
        output.starts_with(expected),
        "unexpected module prefix:\n{}",
        output
    );
    assert!(output.contains("    function uintToString(uint256 i, uint256 decimals)"));
}

#[test]
fn test_many_interpolations_are_batched() {
    let template: String = (0..20).map(|i| format!("{{{{field{}}}}}", i)).collect();
    let output = compile_default(&template);
    let appends: Vec<&str> = output
        .lines()
        .filter(|line| line.contains("abi.encodePacked(__result"))
        .collect();
    assert_eq!(appends.len(), 2);
    for append in appends {
        assert!(append.matches("__input.field").count() <= 16);
    }
}

#[test]
fn test_conditional_ternary() {
    let output = compile_default("{{#if flag}}{{value}}{{/if}}");
    assert!(output.contains(
        r#"__result = string(abi.encodePacked(__result, __input.flag ? __input.value : ""));"#
    ));
    assert!(output.contains("        bool flag;\n        string value;\n"));
    assert!(!output.contains("if(__input.flag)"));
}

#[test]
fn test_else_if_chain() {
    let output = compile_default("{{#if a}}A{{else if b}}B{{else}}C{{/if}}");
    assert!(output.contains("if(__input.a) {"));
    assert!(output.contains("} else {"));
    assert!(output.contains(r#"__input.b ? string("B") : string("C")"#));
}

#[test]
fn test_compatible_structs_share_a_declaration() {
    let output =
        compile_default("{{#each owners}}{{name}}{{/each}}{{#each admins}}{{name}}{{/each}}");
    assert_eq!(output.matches("struct Owner {").count(), 1);
    assert!(!output.contains("struct Admin"));
    assert!(output.contains("Owner[] admins;"));
}

#[test]
fn test_shorter_name_wins_for_shared_struct() {
    let output = compile_default(
        "{{#each participants}}{{name}}{{/each}}{{#each tags}}{{name}}{{/each}}",
    );
    assert!(output.contains("struct Tag {"));
    assert!(!output.contains("struct Participant"));
    assert!(output.contains("Tag[] participants;"));
    assert!(output.contains("Tag[] tags;"));
}

#[test]
fn test_fields_are_ordered_by_static_size() {
    let output = compile_default("{{bytes32 hash}}{{name}}{{#if ok}}x{{/if}}{{uint16 count}}");
    assert!(output.contains(
        "        bool ok;\n        uint16 count;\n        bytes32 hash;\n        string name;\n"
    ));
}

#[test]
fn test_partial_is_emitted_once() {
    let options = CompileOptions::default().with_partial("card", "<h2>{{title}}</h2>");
    let output = compile("{{> card first}}{{> card second}}{{> card third}}", &options).unwrap();
    assert_eq!(output.matches("function card(").count(), 1);
    assert!(output.contains(
        "function card(First memory __input) internal pure returns (string memory __result) {"
    ));
    assert!(output.contains("card(__input.first), card(__input.second), card(__input.third)"));
    assert!(output.contains("First second;"));
}

#[test]
fn test_partial_call_sites_share_the_parameter_struct() {
    let options = CompileOptions::default().with_partial("card", "{{title}}");
    let output = compile("{{> card a}}{{> card b}}{{b.extra}}", &options).unwrap();
    assert!(output.contains("        string title;\n        string extra;\n"));
    assert!(!output.contains("struct B"));
    assert!(output.contains("        A a;\n        A b;\n"));
    assert!(output.contains("function card(A memory __input)"));
    assert!(output.contains("card(__input.a), card(__input.b), __input.b.extra"));
}

#[test]
fn test_partial_call_site_conflict_is_reported() {
    let options = CompileOptions::default().with_partial("card", "{{title}}");
    let err = compile("{{> card a}}{{> card b}}{{uint a.count}}{{b.count}}", &options);
    assert!(
        matches!(err, Err(CompileError::TypeConflict { .. })),
        "got {:?}",
        err
    );
}

#[test]
fn test_nested_struct_is_not_named_after_the_input() {
    let options = CompileOptions::default().with_partial("p", "hello");
    let output = compile("{{> p a.a}}", &options).unwrap();
    assert!(output.contains("    struct A {\n        string a;\n    }"));
    assert!(output.contains("        A a;\n"));
    assert!(!output.contains("__Input a;"));
}

#[test]
fn test_extra_group_library() {
    let options = CompileOptions::default().with_partial("planet", "{{name}} {{uint radius}}");
    let output = compile(
        r#"{{#each planets}}{{> planet this extra="Planets"}}{{/each}}"#,
        &options,
    )
    .unwrap();
    assert!(output.contains("library Planets {"));
    assert!(output.contains(
        "function planet(Template.Planet memory __input) external pure returns (string memory __result) {"
    ));
    assert!(output.contains("Planets.planet(__input.planets[__i])"));
    assert!(output.contains("        uint256 radius;\n        string name;\n"));

    // the group library follows the main module
    let main = output.find("library Template {").unwrap();
    let group = output.find("library Planets {").unwrap();
    assert!(main < group);
}

#[test]
fn test_repeated_content_becomes_constant() {
    let output = compile_default(r#"<div class="card">{{a}}</div><div class="card">{{b}}</div>"#);
    assert!(output.contains(r#"string constant __constant0 = "<div class=\"card\">";"#));
    assert!(output.contains(
        r#"__result = string(abi.encodePacked(__result, __constant0, __input.a, "</div>", __constant0, __input.b, "</div>"));"#
    ));
}

#[test]
fn test_number_helpers() {
    let output = compile_default("{{uint8 level}} {{int amount decimals=2}}");
    assert!(output.contains("SolidMustacheHelpers.uintToString(__input.level, 0)"));
    assert!(output.contains("SolidMustacheHelpers.intToString(__input.amount, 2)"));
    assert!(output.contains("        uint8 level;\n        int256 amount;\n"));
    assert!(output.contains("library SolidMustacheHelpers {"));
}

#[test]
fn test_implicit_integer_width_without_explicit_types() {
    let mut options = CompileOptions::default();
    options.formatting.explicit_types = false;
    let output = compile("{{uint amount}}", &options).unwrap();
    assert!(output.contains("        uint amount;\n"));
}

#[test]
fn test_contract_and_header_options() {
    let options = CompileOptions {
        header: "// SPDX-License-Identifier: MIT".to_string(),
        solidity_pragma: "0.8.17".to_string(),
        ..CompileOptions::default().with_name("Badge").with_contract(true)
    };
    let output = compile("{{label}}", &options).unwrap();
    assert!(output.starts_with("// SPDX-License-Identifier: MIT\npragma solidity 0.8.17;\n"));
    assert!(output.contains("contract Badge {"));
}

#[test]
fn test_condense_whitespace() {
    let options = CompileOptions {
        condense_whitespace: true,
        ..CompileOptions::default()
    };
    let output = compile("<p>\n     {{a}}\n</p>", &options).unwrap();
    assert!(output.contains(r#""<p> ", __input.a, " </p>""#));
}

#[test]
fn test_custom_formatter_receives_raw_source() {
    let output =
        compile_with_formatter("{{name}}", &CompileOptions::default(), &Passthrough).unwrap();
    assert!(output.contains("struct __Input {\nstring name;\n}\n"));
}

#[test]
fn test_template_without_expressions_is_rejected() {
    for template in ["", "just text", "{{! a comment }}"] {
        let err = compile(template, &CompileOptions::default()).unwrap_err();
        assert_eq!(err, CompileError::EmptyTemplate);
    }
}

#[test]
fn test_type_conflict_is_reported() {
    let err = compile("{{#if a}}{{/if}}{{a}}", &CompileOptions::default()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Type narrowing conflict: Trying to identify __input.a as string, but it was previously identified as bool"
    );
}

#[test]
fn test_unknown_partial_is_reported() {
    let err = compile("{{> footer}}", &CompileOptions::default()).unwrap_err();
    assert_eq!(err, CompileError::UnknownPartial { name: "footer".to_string() });
}

#[test]
fn test_multi_dimensional_arrays_are_rejected() {
    let err = compile(
        "{{#each rows}}{{#each this}}{{this}}{{/each}}{{/each}}",
        &CompileOptions::default(),
    )
    .unwrap_err();
    assert_eq!(err, CompileError::MultiDimensionalArray { field: "rows".to_string() });
}

#[test]
fn test_invalid_options_are_rejected() {
    let options = CompileOptions::default().with_name("not a name");
    let err = compile("{{a}}", &options).unwrap_err();
    assert!(matches!(err, CompileError::InvalidOptions { .. }));
}

#[test]
fn test_parse_errors_are_reported() {
    let err = compile("line one\n{{#if a}}", &CompileOptions::default()).unwrap_err();
    assert!(matches!(err, CompileError::Parse { .. }), "got {:?}", err);
    assert!(err.to_string().starts_with("Parse error at "));
}
