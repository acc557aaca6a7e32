//! ES module syntax lowered to `require` / `exports`.

use tree_sitter::Node;

use crate::loader::resolve::{CANONICAL_EXTENSION, SOURCE_ONLY_EXTENSIONS, is_relative};

use super::emit::{Emitter, children, has_token, named_children, string_value};
use super::{DefaultExport, json_string};

/// Rewrite a relative specifier with a source-only extension to the
/// canonical executable extension. Other specifiers are returned unchanged.
pub fn rewrite_specifier(specifier: &str) -> String {
    if is_relative(specifier) {
        for ext in SOURCE_ONLY_EXTENSIONS {
            if let Some(stem) = specifier.strip_suffix(ext) {
                return format!("{stem}{CANONICAL_EXTENSION}");
            }
        }
    }
    specifier.to_string()
}

impl<'a> Emitter<'a> {
    pub(super) fn lower_import(&mut self, node: Node<'a>) {
        if has_token(node, "type") {
            self.blank(node);
            return;
        }

        if let Some(clause) = named_children(node)
            .into_iter()
            .find(|child| child.kind() == "import_require_clause")
        {
            let name = named_children(clause)
                .into_iter()
                .find(|child| child.kind() == "identifier");
            let source = clause.child_by_field_name("source");
            if let (Some(name), Some(source)) = (name, source) {
                let specifier = self.record_dependency(&string_value(self.text(source)));
                let code = format!("const {} = require({});", self.text(name), json_string(&specifier));
                self.replace(node, &code);
            } else {
                self.blank(node);
            }
            return;
        }

        let Some(source) = node.child_by_field_name("source") else {
            self.blank(node);
            return;
        };
        let specifier = self.record_dependency(&string_value(self.text(source)));
        let required = format!("require({})", json_string(&specifier));

        let Some(clause) = named_children(node)
            .into_iter()
            .find(|child| child.kind() == "import_clause")
        else {
            self.replace(node, &format!("{required};"));
            return;
        };

        let module = self.temp("import");
        let mut code = format!("const {module} = {required};");
        for part in named_children(clause) {
            match part.kind() {
                "identifier" => code.push_str(&format!(
                    " const {} = {module} && {module}.__esModule ? {module}.default : {module};",
                    self.text(part)
                )),
                "namespace_import" => {
                    if let Some(name) = named_children(part).last() {
                        code.push_str(&format!(" const {} = {module};", self.text(*name)));
                    }
                }
                "named_imports" => {
                    let bindings: Vec<String> = named_children(part)
                        .into_iter()
                        .filter(|spec| spec.kind() == "import_specifier" && !has_token(*spec, "type"))
                        .filter_map(|spec| self.import_binding(spec))
                        .collect();
                    if !bindings.is_empty() {
                        code.push_str(&format!(" const {{ {} }} = {module};", bindings.join(", ")));
                    }
                }
                _ => {}
            }
        }
        self.replace(node, &code);
    }

    fn import_binding(&self, spec: Node<'_>) -> Option<String> {
        let name = self.text(spec.child_by_field_name("name")?);
        let name = if name.starts_with(['"', '\'']) {
            json_string(&string_value(name))
        } else {
            name.to_string()
        };
        Some(match spec.child_by_field_name("alias") {
            Some(alias) => format!("{name}: {}", self.text(alias)),
            None => name,
        })
    }

    pub(super) fn lower_export(&mut self, node: Node<'a>) {
        if has_token(node, "type") {
            self.blank(node);
            return;
        }
        let is_default = has_token(node, "default");

        if let Some(declaration) = node.child_by_field_name("declaration") {
            self.lower_export_declaration(node, declaration, is_default);
            return;
        }

        if let Some(value) = node.child_by_field_name("value") {
            if is_default {
                self.exports.default = Some(classify_default(value, self.src));
                let code = self.capture(|e| e.emit(value));
                self.replace(node, &format!("exports.default = {code};"));
            } else {
                // `export = value`
                let code = self.capture(|e| e.emit(value));
                self.replace(node, &format!("module.exports = {code};"));
            }
            return;
        }

        let source = node.child_by_field_name("source");
        let parts = named_children(node);
        let clause = parts.iter().find(|p| p.kind() == "export_clause").copied();
        let namespace = parts.iter().find(|p| p.kind() == "namespace_export").copied();

        let code = match (source, clause, namespace) {
            (None, Some(clause), _) => self.local_export_clause(clause),
            (Some(source), Some(clause), _) => {
                let module = self.required_temp(source, "reexport");
                let mut code = module.0;
                for (local, exported) in self.export_specifiers(clause) {
                    if exported == "default" {
                        self.exports.default = Some(DefaultExport::Binding);
                    } else {
                        self.push_named(&exported);
                    }
                    code.push_str(&getter(&exported, &format!("{}[{}]", module.1, json_string(&local))));
                }
                code
            }
            (Some(source), None, Some(namespace)) => {
                let specifier = self.record_dependency(&string_value(self.text(source)));
                match named_children(namespace).last() {
                    Some(name) => {
                        let name = self.text(*name).to_string();
                        self.push_named(&name);
                        format!("exports[{}] = require({});", json_string(&name), json_string(&specifier))
                    }
                    None => format!("require({});", json_string(&specifier)),
                }
            }
            (Some(source), None, None) => {
                let specifier = self.record_dependency(&string_value(self.text(source)));
                if !self.exports.star_from.contains(&specifier) {
                    self.exports.star_from.push(specifier.clone());
                }
                let module = self.temp("star");
                format!(
                    "const {module} = require({}); Object.keys({module}).forEach(function (k) {{ \
                     if (k === \"default\" || k === \"__esModule\" || Object.prototype.hasOwnProperty.call(exports, k)) return; \
                     Object.defineProperty(exports, k, {{ enumerable: true, get: function () {{ return {module}[k]; }} }}); }});",
                    json_string(&specifier)
                )
            }
            (None, None, _) => String::new(),
        };
        self.replace(node, &code);
    }

    fn lower_export_declaration(&mut self, node: Node<'a>, declaration: Node<'a>, is_default: bool) {
        match declaration.kind() {
            "interface_declaration" | "type_alias_declaration" | "ambient_declaration" => {
                self.blank(node);
                return;
            }
            _ => {}
        }

        // Keep everything but the `export` / `default` keywords.
        let mut cursor = node.start_byte();
        for child in children(node) {
            self.out.push_str(&self.src[cursor..child.start_byte()]);
            if !child.is_named() && matches!(child.kind(), "export" | "default") {
                self.blank(child);
            } else {
                self.emit(child);
            }
            cursor = child.end_byte();
        }
        self.out.push_str(&self.src[cursor..node.end_byte()]);

        let names = declared_names(declaration, self.src);
        match declaration.kind() {
            "function_declaration" | "generator_function_declaration" => {
                for name in names {
                    let exported = if is_default { "default" } else { name.as_str() };
                    self.record_export(exported, is_default, DefaultExport::Component);
                    self.header.push_str(&assign(exported, &name));
                }
            }
            kind => {
                let shape = if kind.contains("class") {
                    DefaultExport::Component
                } else {
                    DefaultExport::Binding
                };
                let mut trailer = String::new();
                for name in names {
                    let exported = if is_default { "default" } else { name.as_str() };
                    self.record_export(exported, is_default, shape.clone());
                    trailer.push_str(&assign(exported, &name));
                }
                self.out.push_str(&trailer);
            }
        }
    }

    fn record_export(&mut self, exported: &str, is_default: bool, shape: DefaultExport) {
        if is_default {
            self.exports.default = Some(shape);
        } else {
            self.push_named(exported);
        }
    }

    fn push_named(&mut self, name: &str) {
        if !self.exports.named.iter().any(|n| n == name) {
            self.exports.named.push(name.to_string());
        }
    }

    fn local_export_clause(&mut self, clause: Node<'a>) -> String {
        let mut code = String::new();
        for (local, exported) in self.export_specifiers(clause) {
            if self.type_names.contains(&local) {
                continue;
            }
            if exported == "default" {
                self.exports.default = Some(DefaultExport::Binding);
            } else {
                self.push_named(&exported);
            }
            code.push_str(&assign(&exported, &local));
        }
        code
    }

    /// `(local, exported)` pairs of an export clause, without type-only specifiers.
    fn export_specifiers(&self, clause: Node<'_>) -> Vec<(String, String)> {
        named_children(clause)
            .into_iter()
            .filter(|spec| spec.kind() == "export_specifier" && !has_token(*spec, "type"))
            .filter_map(|spec| {
                let local = string_or_ident(self.text(spec.child_by_field_name("name")?));
                let exported = spec
                    .child_by_field_name("alias")
                    .map(|alias| string_or_ident(self.text(alias)))
                    .unwrap_or_else(|| local.clone());
                Some((local, exported))
            })
            .collect()
    }

    fn required_temp(&mut self, source: Node<'_>, purpose: &str) -> (String, String) {
        let specifier = self.record_dependency(&string_value(self.text(source)));
        let module = self.temp(purpose);
        (
            format!("const {module} = require({});", json_string(&specifier)),
            module,
        )
    }
}

fn string_or_ident(text: &str) -> String {
    if text.starts_with(['"', '\'']) {
        string_value(text)
    } else {
        text.to_string()
    }
}

fn assign(exported: &str, local: &str) -> String {
    format!(" exports[{}] = {local};", json_string(exported))
}

fn getter(exported: &str, expression: &str) -> String {
    format!(
        " Object.defineProperty(exports, {}, {{ enumerable: true, get: function () {{ return {expression}; }} }});",
        json_string(exported)
    )
}

/// Binding names introduced by a declaration, including destructured ones.
fn declared_names(declaration: Node<'_>, src: &str) -> Vec<String> {
    let mut names = Vec::new();
    match declaration.kind() {
        "lexical_declaration" | "variable_declaration" => {
            for declarator in named_children(declaration) {
                if declarator.kind() == "variable_declarator"
                    && let Some(name) = declarator.child_by_field_name("name")
                {
                    collect_pattern_names(name, src, &mut names);
                }
            }
        }
        _ => {
            if let Some(name) = declaration.child_by_field_name("name") {
                names.push(src[name.start_byte()..name.end_byte()].to_string());
            }
        }
    }
    names
}

fn collect_pattern_names(pattern: Node<'_>, src: &str, names: &mut Vec<String>) {
    match pattern.kind() {
        "identifier" | "shorthand_property_identifier_pattern" => {
            names.push(src[pattern.start_byte()..pattern.end_byte()].to_string());
        }
        "assignment_pattern" | "object_assignment_pattern" => {
            if let Some(left) = pattern.child_by_field_name("left") {
                collect_pattern_names(left, src, names);
            }
        }
        "pair_pattern" => {
            if let Some(value) = pattern.child_by_field_name("value") {
                collect_pattern_names(value, src, names);
            }
        }
        _ => {
            for child in named_children(pattern) {
                collect_pattern_names(child, src, names);
            }
        }
    }
}

/// Statically classify the value of `export default <expr>`.
fn classify_default(value: Node<'_>, src: &str) -> DefaultExport {
    match value.kind() {
        "arrow_function" | "function_expression" | "function" | "generator_function" | "class" => {
            DefaultExport::Component
        }
        "parenthesized_expression" | "as_expression" | "satisfies_expression" | "non_null_expression" => {
            match named_children(value).first() {
                Some(inner) => classify_default(*inner, src),
                None => DefaultExport::Binding,
            }
        }
        "string" | "template_string" => DefaultExport::Value("a string".to_string()),
        "number" => DefaultExport::Value(format!(
            "the number {}",
            &src[value.start_byte()..value.end_byte()]
        )),
        "true" | "false" => DefaultExport::Value("a boolean".to_string()),
        "null" => DefaultExport::Value("null".to_string()),
        "undefined" => DefaultExport::Value("undefined".to_string()),
        "object" => DefaultExport::Value("a plain object".to_string()),
        "array" => DefaultExport::Value("an array".to_string()),
        "regex" => DefaultExport::Value("a regular expression".to_string()),
        "jsx_element" | "jsx_self_closing_element" => {
            DefaultExport::Value("a JSX element (export a component instead)".to_string())
        }
        _ => DefaultExport::Binding,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{TransformConfig, TransformedModule, transform};

    fn run(path: &str, source: &str) -> TransformedModule {
        transform(path, source, &TransformConfig::default()).unwrap()
    }

    #[test]
    fn test_rewrite_specifier() {
        assert_eq!(rewrite_specifier("./Button.tsx"), "./Button.js");
        assert_eq!(rewrite_specifier("../lib/util.ts"), "../lib/util.js");
        assert_eq!(rewrite_specifier("./View.jsx"), "./View.js");
        assert_eq!(rewrite_specifier("./util"), "./util");
        assert_eq!(rewrite_specifier("./data.json"), "./data.json");
        assert_eq!(rewrite_specifier("pkg/file.ts"), "pkg/file.ts");
    }

    #[test]
    fn test_dependencies_are_rewritten_and_ordered() {
        let module = run(
            "src/App.tsx",
            "import React from 'react';\nimport Button from './components/Button.tsx';\nimport { format } from './lib/util';\nimport './index.css';\n",
        );
        assert_eq!(
            module.dependencies,
            vec!["react", "./components/Button.js", "./lib/util", "./index.css"]
        );
        assert!(module.code.contains("require(\"./components/Button.js\")"));
        assert!(!module.code.contains("Button.tsx"));
    }

    #[test]
    fn test_import_forms() {
        let module = run(
            "a.ts",
            "import Def, * as ns from './x';\nimport { a, b as c, type T } from './y';\n",
        );
        assert!(module.code.contains("const Def = __stagehand_import_0 && __stagehand_import_0.__esModule ? __stagehand_import_0.default : __stagehand_import_0;"));
        assert!(module.code.contains("const ns = __stagehand_import_0;"));
        assert!(module.code.contains("const { a, b: c } = __stagehand_import_1;"));
        assert_eq!(module.code.lines().count(), 2);
    }

    #[test]
    fn test_type_only_imports_are_dropped() {
        let module = run("a.ts", "import type { Props } from './types';\nexport type { Props };\n");
        assert!(module.dependencies.is_empty());
        assert!(!module.code.contains("require"));
    }

    #[test]
    fn test_side_effect_import() {
        let module = run("a.ts", "import './setup';\n");
        assert!(module.code.ends_with("require(\"./setup\");\n"));
    }

    #[test]
    fn test_default_function_export_is_hoisted() {
        let module = run("App.tsx", "export default function App() { return null; }\n");
        assert_eq!(module.exports.default, Some(DefaultExport::Component));
        let first_line = module.code.lines().next().unwrap();
        assert!(first_line.contains("exports[\"default\"] = App;"));
        assert!(first_line.contains("function App()"));
    }

    #[test]
    fn test_default_arrow_export() {
        let module = run("App.jsx", "export default () => <div />;\n");
        assert_eq!(module.exports.default, Some(DefaultExport::Component));
        assert!(module.code.contains("exports.default = () => React.createElement(\"div\", null);"));
    }

    #[test]
    fn test_default_literal_is_not_renderable() {
        let module = run("App.ts", "export default 42;\n");
        let default = module.exports.default.unwrap();
        assert!(!default.is_renderable());
        assert_eq!(default, DefaultExport::Value("the number 42".into()));
    }

    #[test]
    fn test_default_identifier_is_binding() {
        let module = run("App.tsx", "const App = () => null;\nexport default App;\n");
        assert_eq!(module.exports.default, Some(DefaultExport::Binding));
    }

    #[test]
    fn test_named_declarations() {
        let module = run(
            "util.ts",
            "export const a = 1, { b, c: d } = obj;\nexport class Store {}\nexport enum Mode { On }\nexport interface Shape {}\n",
        );
        assert_eq!(module.exports.named, vec!["a", "b", "d", "Store", "Mode"]);
        assert!(module.code.contains("exports[\"d\"] = d;"));
        assert!(module.code.contains("exports[\"Store\"] = Store;"));
        assert!(!module.code.contains("interface"));
    }

    #[test]
    fn test_export_clause_skips_types() {
        let module = run(
            "util.ts",
            "type Id = string;\nconst make = () => 1;\nexport { make as create, Id };\n",
        );
        assert_eq!(module.exports.named, vec!["create"]);
        assert!(module.code.contains("exports[\"create\"] = make;"));
    }

    #[test]
    fn test_reexports() {
        let module = run(
            "index.ts",
            "export { default as Button } from './Button.tsx';\nexport * from './hooks';\nexport * as icons from './icons';\n",
        );
        assert_eq!(module.dependencies, vec!["./Button.js", "./hooks", "./icons"]);
        assert_eq!(module.exports.named, vec!["Button", "icons"]);
        assert_eq!(module.exports.star_from, vec!["./hooks"]);
        assert!(module.code.contains("return __stagehand_reexport_0[\"default\"];"));
    }

    #[test]
    fn test_module_header_only_for_module_syntax() {
        let module = run("a.ts", "export const x = 1;\n");
        assert!(module.code.starts_with("\"use strict\";Object.defineProperty(exports, \"__esModule\", { value: true });"));
        assert_eq!(module.code.lines().count(), 1);
    }
}
