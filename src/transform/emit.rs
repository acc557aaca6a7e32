//! Tree-sitter driven rewriter for script files.
//!
//! The emitter copies source text verbatim and only rewrites the nodes it
//! knows about. Erased TypeScript syntax is replaced by whitespace that keeps
//! the original line breaks, so line numbers in runtime stack traces still
//! point at the generated source.

use std::collections::HashSet;

use tree_sitter::{Node, Parser};

use crate::errors::Fault;
use crate::project::extension_of;

use super::{ExportSummary, TransformConfig, json_string};

/// Named node kinds that exist only for the type checker.
const ERASED_KINDS: [&str; 17] = [
    "type_annotation",
    "type_parameters",
    "type_arguments",
    "interface_declaration",
    "type_alias_declaration",
    "ambient_declaration",
    "function_signature",
    "method_signature",
    "abstract_method_signature",
    "index_signature",
    "accessibility_modifier",
    "override_modifier",
    "implements_clause",
    "asserts_annotation",
    "type_predicate_annotation",
    "omitting_type_annotation",
    "opting_type_annotation",
];

/// Keyword tokens erased wherever they appear as modifiers.
const ERASED_MODIFIERS: [&str; 4] = ["readonly", "declare", "abstract", "override"];

#[derive(Debug)]
pub(super) struct Lowered {
    pub code: String,
    pub dependencies: Vec<String>,
    pub exports: ExportSummary,
}

pub(super) fn lower_script(path: &str, content: &str, config: &TransformConfig) -> Result<Lowered, Fault> {
    let language = match extension_of(path) {
        Some("ts" | "mts") => tree_sitter_typescript::LANGUAGE_TYPESCRIPT,
        _ => tree_sitter_typescript::LANGUAGE_TSX,
    };
    let mut parser = Parser::new();
    parser
        .set_language(&language.into())
        .map_err(|e| transform_fault(path, format!("parser unavailable: {e}"), 1, 1))?;
    let tree = parser
        .parse(content, None)
        .ok_or_else(|| transform_fault(path, "parser produced no tree".to_string(), 1, 1))?;

    let root = tree.root_node();
    if let Some(bad) = first_error(root) {
        let position = bad.start_position();
        return Err(transform_fault(
            path,
            describe_error(bad, content),
            position.row + 1,
            position.column + 1,
        ));
    }

    let mut emitter = Emitter::new(content, config);
    emitter.collect_type_names(root);
    emitter.emit(root);
    if let Some((message, line, column)) = emitter.unsupported.take() {
        return Err(transform_fault(path, message, line, column));
    }
    Ok(emitter.finish())
}

fn transform_fault(path: &str, message: String, line: usize, column: usize) -> Fault {
    Fault::Transform {
        path: path.to_string(),
        message,
        line,
        column,
    }
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    children(node).into_iter().find_map(first_error)
}

fn describe_error(node: Node<'_>, source: &str) -> String {
    if node.is_missing() {
        return format!("Missing '{}'", node.kind());
    }
    let text = source[node.start_byte()..node.end_byte()].trim();
    if text.is_empty() {
        return "Unexpected end of input".to_string();
    }
    let snippet: String = text.chars().take(24).collect();
    let snippet = snippet.lines().next().unwrap_or_default();
    format!("Unexpected token '{snippet}'")
}

pub(super) fn children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

/// Named children, skipping comments.
pub(super) fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| child.kind() != "comment")
        .collect()
}

pub(super) fn has_token(node: Node<'_>, token: &str) -> bool {
    children(node)
        .iter()
        .any(|child| !child.is_named() && child.kind() == token)
}

pub(super) struct Emitter<'a> {
    pub(super) src: &'a str,
    pub(super) config: &'a TransformConfig,
    pub(super) out: String,
    /// Statements placed before the body (exports of hoisted functions).
    pub(super) header: String,
    pub(super) dependencies: Vec<String>,
    pub(super) exports: ExportSummary,
    pub(super) type_names: HashSet<String>,
    pub(super) module_syntax: bool,
    /// First construct that has runtime meaning but no lowering.
    unsupported: Option<(String, usize, usize)>,
    temp_counter: usize,
}

/// Value an enum member without an initializer receives.
#[derive(Clone)]
enum AutoValue {
    Known(i64),
    /// One more than the member with this (quoted) key.
    After(String),
    /// Follows a string member; an initializer is required.
    Missing,
}

/// Words that cannot be declared as a local binding.
const RESERVED_WORDS: [&str; 40] = [
    "arguments", "await", "break", "case", "catch", "class", "const", "continue", "debugger",
    "default", "delete", "do", "else", "enum", "eval", "export", "extends", "false", "finally",
    "for", "function", "if", "implements", "import", "in", "instanceof", "interface", "let", "new",
    "null", "package", "return", "static", "super", "switch", "this", "throw", "true", "typeof",
    "var",
];

impl<'a> Emitter<'a> {
    fn new(src: &'a str, config: &'a TransformConfig) -> Self {
        Self {
            src,
            config,
            out: String::with_capacity(src.len() + 256),
            header: String::new(),
            dependencies: Vec::new(),
            exports: ExportSummary::default(),
            type_names: HashSet::new(),
            module_syntax: false,
            unsupported: None,
            temp_counter: 0,
        }
    }

    fn finish(self) -> Lowered {
        let mut code = String::with_capacity(self.out.len() + self.header.len() + 96);
        if self.module_syntax {
            code.push_str("\"use strict\";Object.defineProperty(exports, \"__esModule\", { value: true });");
        }
        code.push_str(&self.header);
        code.push_str(&self.out);
        Lowered {
            code,
            dependencies: self.dependencies,
            exports: self.exports,
        }
    }

    pub(super) fn text(&self, node: Node<'_>) -> &'a str {
        &self.src[node.start_byte()..node.end_byte()]
    }

    /// Interface and type alias names declared at the top level.
    fn collect_type_names(&mut self, root: Node<'_>) {
        for child in named_children(root) {
            let declaration = if child.kind() == "export_statement" {
                child.child_by_field_name("declaration")
            } else {
                Some(child)
            };
            if let Some(declaration) = declaration
                && matches!(
                    declaration.kind(),
                    "interface_declaration" | "type_alias_declaration"
                )
                && let Some(name) = declaration.child_by_field_name("name")
            {
                self.type_names.insert(self.text(name).to_string());
            }
        }
    }

    fn unsupported(&mut self, node: Node<'_>, message: &str) {
        if self.unsupported.is_none() {
            let position = node.start_position();
            self.unsupported = Some((message.to_string(), position.row + 1, position.column + 1));
        }
    }

    pub(super) fn temp(&mut self, purpose: &str) -> String {
        let name = format!("__stagehand_{purpose}_{}", self.temp_counter);
        self.temp_counter += 1;
        name
    }

    /// Record a dependency and return the rewritten specifier.
    pub(super) fn record_dependency(&mut self, specifier: &str) -> String {
        let rewritten = super::rewrite_specifier(specifier);
        if !self.dependencies.contains(&rewritten) {
            self.dependencies.push(rewritten.clone());
        }
        rewritten
    }

    /// Run `f` against a scratch buffer and return what it wrote.
    pub(super) fn capture(&mut self, f: impl FnOnce(&mut Self)) -> String {
        let saved = std::mem::take(&mut self.out);
        f(self);
        std::mem::replace(&mut self.out, saved)
    }

    /// Write `text` in place of `node`, padding with the line breaks the
    /// replacement dropped.
    pub(super) fn replace(&mut self, node: Node<'_>, text: &str) {
        self.out.push_str(text);
        let dropped = self
            .text(node)
            .matches('\n')
            .count()
            .saturating_sub(text.matches('\n').count());
        for _ in 0..dropped {
            self.out.push('\n');
        }
    }

    /// Drop a node, keeping its line breaks (or a single space).
    pub(super) fn blank(&mut self, node: Node<'_>) {
        let breaks = self.text(node).matches('\n').count();
        if breaks == 0 {
            self.out.push(' ');
        }
        for _ in 0..breaks {
            self.out.push('\n');
        }
    }

    pub(super) fn emit(&mut self, node: Node<'a>) {
        let kind = node.kind();
        if ERASED_KINDS.contains(&kind) {
            self.blank(node);
            return;
        }
        match kind {
            "as_expression" | "satisfies_expression" | "non_null_expression" => {
                self.emit_unwrapped(node, named_children(node).first().copied())
            }
            "type_assertion" => self.emit_unwrapped(node, named_children(node).last().copied()),
            "import_statement" => {
                self.module_syntax = true;
                self.lower_import(node);
            }
            "export_statement" => {
                self.module_syntax = true;
                self.lower_export(node);
            }
            "jsx_element" | "jsx_self_closing_element" => self.lower_jsx(node),
            "call_expression" => self.lower_call(node),
            "enum_declaration" => self.lower_enum(node),
            "method_definition" => self.lower_method(node),
            "public_field_definition" if has_token(node, "declare") || has_token(node, "abstract") => {
                self.blank(node)
            }
            _ => self.emit_children(node),
        }
    }

    pub(super) fn emit_children(&mut self, node: Node<'a>) {
        let mut cursor = node.start_byte();
        for child in children(node) {
            self.out.push_str(&self.src[cursor..child.start_byte()]);
            if is_erased_token(node, child) {
                self.blank(child);
            } else {
                self.emit(child);
            }
            cursor = child.end_byte();
        }
        self.out.push_str(&self.src[cursor..node.end_byte()]);
    }

    fn emit_unwrapped(&mut self, node: Node<'a>, inner: Option<Node<'a>>) {
        match inner {
            Some(inner) => {
                let code = self.capture(|e| e.emit(inner));
                self.replace(node, &code);
            }
            None => self.emit_children(node),
        }
    }

    /// `require("x")` and `import("x")` with literal specifiers.
    fn lower_call(&mut self, node: Node<'a>) {
        let function = node.child_by_field_name("function");
        let arguments = node.child_by_field_name("arguments");
        match (function, arguments) {
            (Some(function), Some(arguments)) if function.kind() == "import" => {
                let target = match self.string_argument(arguments) {
                    Some(specifier) => {
                        let rewritten = self.record_dependency(&specifier);
                        format!("({})", json_string(&rewritten))
                    }
                    None => self.capture(|e| e.emit(arguments)),
                };
                self.replace(
                    node,
                    &format!("Promise.resolve().then(function () {{ return require{target}; }})"),
                );
            }
            (Some(function), Some(arguments))
                if function.kind() == "identifier" && self.text(function) == "require" =>
            {
                match self.string_argument(arguments) {
                    Some(specifier) => {
                        let rewritten = self.record_dependency(&specifier);
                        self.replace(node, &format!("require({})", json_string(&rewritten)));
                    }
                    None => self.emit_children(node),
                }
            }
            _ => self.emit_children(node),
        }
    }

    fn string_argument(&self, arguments: Node<'_>) -> Option<String> {
        match named_children(arguments).as_slice() {
            [only] if only.kind() == "string" => Some(string_value(self.text(*only))),
            _ => None,
        }
    }

    /// Constructors assign their parameter properties
    /// (`constructor(private x)`) at the top of the body, or right after a
    /// top-level `super(...)` call.
    fn lower_method(&mut self, node: Node<'a>) {
        let is_constructor = node
            .child_by_field_name("name")
            .is_some_and(|name| self.text(name) == "constructor");
        let fields = if is_constructor {
            self.parameter_properties(node)
        } else {
            Vec::new()
        };
        let Some(body) = node.child_by_field_name("body").filter(|_| !fields.is_empty()) else {
            self.emit_children(node);
            return;
        };

        let mut cursor = node.start_byte();
        for child in children(node) {
            self.out.push_str(&self.src[cursor..child.start_byte()]);
            if child.id() == body.id() {
                self.emit_constructor_body(body, &fields);
            } else if is_erased_token(node, child) {
                self.blank(child);
            } else {
                self.emit(child);
            }
            cursor = child.end_byte();
        }
        self.out.push_str(&self.src[cursor..node.end_byte()]);
    }

    fn parameter_properties(&mut self, method: Node<'_>) -> Vec<String> {
        let Some(parameters) = method.child_by_field_name("parameters") else {
            return Vec::new();
        };
        let mut names = Vec::new();
        for parameter in named_children(parameters) {
            if !matches!(parameter.kind(), "required_parameter" | "optional_parameter") {
                continue;
            }
            let is_property = has_token(parameter, "readonly")
                || named_children(parameter)
                    .iter()
                    .any(|c| matches!(c.kind(), "accessibility_modifier" | "override_modifier"));
            if !is_property {
                continue;
            }
            match parameter.child_by_field_name("pattern") {
                Some(pattern) if pattern.kind() == "identifier" => {
                    names.push(self.text(pattern).to_string())
                }
                _ => self.unsupported(parameter, "A parameter property must be a plain identifier"),
            }
        }
        names
    }

    fn emit_constructor_body(&mut self, body: Node<'a>, fields: &[String]) {
        let assignments: String = fields
            .iter()
            .map(|name| format!(" this.{name} = {name};"))
            .collect();
        let super_call = named_children(body).into_iter().find(|s| is_super_call(*s));

        let mut pending = Some(assignments);
        let mut cursor = body.start_byte();
        for child in children(body) {
            self.out.push_str(&self.src[cursor..child.start_byte()]);
            self.emit(child);
            cursor = child.end_byte();
            let anchor = match super_call {
                Some(call) => child.id() == call.id(),
                None => child.kind() == "{",
            };
            if anchor && let Some(text) = pending.take() {
                if let Some(call) = super_call
                    && !self.text(call).trim_end().ends_with(';')
                {
                    self.out.push(';');
                }
                self.out.push_str(&text);
            }
        }
        self.out.push_str(&self.src[cursor..body.end_byte()]);
    }

    /// `enum E { A, B = 5, C = "c" }` becomes an IIFE filling an object with
    /// forward (and, for numbers, reverse) mappings. Members are also bound
    /// as locals so initializers can refer to earlier members by name.
    fn lower_enum(&mut self, node: Node<'a>) {
        let (Some(name), Some(body)) = (
            node.child_by_field_name("name"),
            node.child_by_field_name("body"),
        ) else {
            self.blank(node);
            return;
        };
        let name = self.text(name).to_string();
        let mut locals: Vec<String> = Vec::new();
        let mut statements = String::new();
        let mut next = AutoValue::Known(0);
        for member in named_children(body) {
            let (key_node, value_node) = match member.kind() {
                "enum_assignment" => {
                    let parts = named_children(member);
                    (parts.first().copied(), parts.get(1).copied())
                }
                _ => (Some(member), None),
            };
            let Some(key_node) = key_node else { continue };
            let key_text = self.text(key_node);
            let (key, local) = if key_node.kind() == "string" {
                (json_string(&string_value(key_text)), None)
            } else {
                let local = (key_text != name && !RESERVED_WORDS.contains(&key_text))
                    .then(|| key_text.to_string());
                (json_string(key_text), local)
            };

            let (value, numeric) = match value_node {
                None => match next.clone() {
                    AutoValue::Known(n) => {
                        next = successor(n, &key);
                        (n.to_string(), true)
                    }
                    AutoValue::After(previous) => {
                        next = AutoValue::After(key.clone());
                        (format!("{name}[{previous}] + 1"), true)
                    }
                    AutoValue::Missing => {
                        self.unsupported(member, "Enum member must have an initializer");
                        ("undefined".to_string(), false)
                    }
                },
                Some(value) => match integer_literal(value, self.src) {
                    Some(n) => {
                        next = successor(n, &key);
                        (n.to_string(), true)
                    }
                    None => {
                        let code = self.capture(|e| e.emit(value));
                        let numeric = value.kind() != "string" && value.kind() != "template_string";
                        next = if numeric {
                            AutoValue::After(key.clone())
                        } else {
                            AutoValue::Missing
                        };
                        (code, numeric)
                    }
                },
            };

            let value = match &local {
                Some(local) => format!("{local} = {value}"),
                None => value,
            };
            if numeric {
                statements.push_str(&format!("{name}[{name}[{key}] = {value}] = {key}; "));
            } else {
                statements.push_str(&format!("{name}[{key}] = {value}; "));
            }
            if let Some(local) = local
                && !locals.contains(&local)
            {
                locals.push(local);
            }
        }
        let declarations = if locals.is_empty() {
            String::new()
        } else {
            format!("var {}; ", locals.join(", "))
        };
        self.replace(
            node,
            &format!(
                "var {name} = (function ({name}) {{ {declarations}{statements}return {name}; }})({name} || {{}});"
            ),
        );
    }
}

fn successor(n: i64, key: &str) -> AutoValue {
    n.checked_add(1)
        .map_or_else(|| AutoValue::After(key.to_string()), AutoValue::Known)
}

fn is_super_call(statement: Node<'_>) -> bool {
    statement.kind() == "expression_statement"
        && named_children(statement).first().is_some_and(|expression| {
            expression.kind() == "call_expression"
                && expression
                    .child_by_field_name("function")
                    .is_some_and(|f| f.kind() == "super")
        })
}

/// Integer value of a numeric literal, optionally negated.
fn integer_literal(node: Node<'_>, src: &str) -> Option<i64> {
    fn text<'s>(src: &'s str, node: Node<'_>) -> &'s str {
        &src[node.start_byte()..node.end_byte()]
    }
    match node.kind() {
        "number" => parse_integer(text(src, node)),
        "unary_expression" => {
            let operator = node.child_by_field_name("operator")?;
            let argument = node.child_by_field_name("argument")?;
            if argument.kind() != "number" {
                return None;
            }
            let n = parse_integer(text(src, argument))?;
            match text(src, operator) {
                "-" => n.checked_neg(),
                "+" => Some(n),
                _ => None,
            }
        }
        _ => None,
    }
}

fn parse_integer(literal: &str) -> Option<i64> {
    let digits = literal.replace('_', "");
    let lower = digits.to_ascii_lowercase();
    let (radix, body) = if let Some(rest) = lower.strip_prefix("0x") {
        (16, rest)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (8, rest)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (2, rest)
    } else {
        (10, lower.as_str())
    };
    i64::from_str_radix(body, radix).ok()
}

/// Anonymous tokens that only mean something to the type checker.
fn is_erased_token(parent: Node<'_>, child: Node<'_>) -> bool {
    if child.is_named() {
        return false;
    }
    let token = child.kind();
    if ERASED_MODIFIERS.contains(&token) {
        return true;
    }
    match token {
        "?" => matches!(
            parent.kind(),
            "optional_parameter" | "public_field_definition" | "method_definition"
        ),
        "!" => matches!(parent.kind(), "variable_declarator" | "public_field_definition"),
        _ => false,
    }
}

/// Contents of a string literal token, without its quotes.
pub(super) fn string_value(literal: &str) -> String {
    let inner = literal
        .strip_prefix(['"', '\''])
        .and_then(|s| s.strip_suffix(['"', '\'']))
        .unwrap_or(literal);
    inner.to_string()
}
