//! JSX lowering to classic `factory(tag, props, ...children)` calls.

use tree_sitter::Node;

use super::emit::{Emitter, children, named_children, string_value};
use super::json_string;

impl<'a> Emitter<'a> {
    pub(super) fn lower_jsx(&mut self, node: Node<'a>) {
        let code = self.jsx_code(node);
        self.replace(node, &code);
    }

    fn jsx_code(&mut self, node: Node<'a>) -> String {
        let (opening, body) = match node.kind() {
            "jsx_self_closing_element" => (node, Vec::new()),
            _ => match node.child_by_field_name("open_tag") {
                Some(open) => (open, children(node)),
                None => return self.text(node).to_string(),
            },
        };

        let tag = match opening.child_by_field_name("name") {
            Some(name) => self.jsx_tag(name),
            None => self.config.jsx_fragment.clone(),
        };
        let props = self.jsx_props(opening);

        let mut args = vec![tag, props];
        args.extend(self.jsx_children(&body));
        format!("{}({})", self.config.jsx_factory, args.join(", "))
    }

    fn jsx_tag(&self, name: Node<'_>) -> String {
        let text = self.text(name);
        let intrinsic = name.kind() == "jsx_namespace_name"
            || text.contains('-')
            || text.starts_with(|c: char| c.is_ascii_lowercase());
        if intrinsic && name.kind() != "member_expression" {
            json_string(text)
        } else {
            text.to_string()
        }
    }

    fn jsx_props(&mut self, opening: Node<'a>) -> String {
        let mut cursor = opening.walk();
        let attributes: Vec<Node<'a>> = opening
            .children_by_field_name("attribute", &mut cursor)
            .collect();
        if attributes.is_empty() {
            return "null".to_string();
        }

        let mut entries = Vec::with_capacity(attributes.len());
        for attribute in attributes {
            if attribute.kind() == "jsx_expression" {
                // `{...props}`
                if let Some(spread) = named_children(attribute).first().copied() {
                    entries.push(self.capture(|e| e.emit(spread)));
                }
                continue;
            }
            let parts = named_children(attribute);
            let Some(name) = parts.first() else { continue };
            let key = property_key(self.text(*name));
            let value = match parts.get(1) {
                None => "true".to_string(),
                Some(value) => self.jsx_attribute_value(*value),
            };
            entries.push(format!("{key}: {value}"));
        }
        format!("{{ {} }}", entries.join(", "))
    }

    fn jsx_attribute_value(&mut self, value: Node<'a>) -> String {
        match value.kind() {
            "string" => json_string(&decode_entities(&string_value(self.text(value)))),
            "jsx_expression" => match named_children(value).first().copied() {
                Some(inner) => self.capture(|e| e.emit(inner)),
                None => "undefined".to_string(),
            },
            "jsx_element" | "jsx_self_closing_element" => self.jsx_code(value),
            _ => self.capture(|e| e.emit(value)),
        }
    }

    fn jsx_children(&mut self, body: &[Node<'a>]) -> Vec<String> {
        let mut out = Vec::new();
        let mut text_run = String::new();
        for child in body {
            match child.kind() {
                "jsx_text" | "html_character_reference" => {
                    text_run.push_str(self.text(*child));
                    continue;
                }
                _ => flush_text(&mut text_run, &mut out),
            }
            match child.kind() {
                "jsx_element" | "jsx_self_closing_element" => out.push(self.jsx_code(*child)),
                "jsx_expression" => {
                    if let Some(inner) = named_children(*child).first().copied() {
                        out.push(self.capture(|e| e.emit(inner)));
                    }
                }
                _ => {}
            }
        }
        flush_text(&mut text_run, &mut out);
        out
    }
}

fn flush_text(run: &mut String, out: &mut Vec<String>) {
    if run.is_empty() {
        return;
    }
    let text = collapse_jsx_whitespace(run);
    if !text.is_empty() {
        out.push(json_string(&decode_entities(&text)));
    }
    run.clear();
}

/// JSX text whitespace rule: lines are trimmed where they touch a line
/// break, blank lines vanish and the remaining lines join with one space.
fn collapse_jsx_whitespace(raw: &str) -> String {
    let lines: Vec<&str> = raw.split('\n').collect();
    let last = lines.len().saturating_sub(1);
    let mut kept: Vec<&str> = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let mut line = line.trim_end_matches('\r');
        if i > 0 {
            line = line.trim_start();
        }
        if i < last {
            line = line.trim_end();
        }
        if !line.is_empty() {
            kept.push(line);
        }
    }
    kept.join(" ")
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn property_key(name: &str) -> String {
    if is_identifier(name) {
        name.to_string()
    } else {
        json_string(name)
    }
}

/// Decode the HTML character references JSX text and attribute strings allow.
pub(super) fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let decoded = tail
            .find(';')
            .filter(|end| *end <= 10)
            .and_then(|end| decode_entity(&tail[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    }
    if let Some(dec) = name.strip_prefix('#') {
        return dec.parse::<u32>().ok().and_then(char::from_u32);
    }
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "copy" => '\u{a9}',
        "reg" => '\u{ae}',
        "trade" => '\u{2122}',
        "hellip" => '\u{2026}',
        "mdash" => '\u{2014}',
        "ndash" => '\u{2013}',
        "middot" => '\u{b7}',
        "bull" => '\u{2022}',
        "times" => '\u{d7}',
        "larr" => '\u{2190}',
        "rarr" => '\u{2192}',
        "uarr" => '\u{2191}',
        "darr" => '\u{2193}',
        "laquo" => '\u{ab}',
        "raquo" => '\u{bb}',
        "deg" => '\u{b0}',
        "euro" => '\u{20ac}',
        _ => return None,
    };
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{TransformConfig, transform};

    fn code(source: &str) -> String {
        transform("App.jsx", source, &TransformConfig::default())
            .unwrap()
            .code
    }

    #[test]
    fn test_intrinsic_element_with_props() {
        let out = code("const el = <div className=\"box\" hidden>hi</div>;");
        assert!(out.contains("React.createElement(\"div\", { className: \"box\", hidden: true }, \"hi\")"));
    }

    #[test]
    fn test_component_reference_and_expression_child() {
        let out = code("const el = <Button onClick={go}>{label}</Button>;");
        assert!(out.contains("React.createElement(Button, { onClick: go }, label)"));
    }

    #[test]
    fn test_fragment_uses_configured_fragment() {
        let out = code("const el = <><span /></>;");
        assert!(out.contains("React.createElement(React.Fragment, null, React.createElement(\"span\", null))"));
    }

    #[test]
    fn test_spread_and_dashed_attributes() {
        let out = code("const el = <input {...rest} aria-label=\"x\" />;");
        assert!(out.contains("{ ...rest, \"aria-label\": \"x\" }"));
    }

    #[test]
    fn test_member_expression_tag() {
        let out = code("const el = <Ctx.Provider value={v} />;");
        assert!(out.contains("React.createElement(Ctx.Provider, { value: v })"));
    }

    #[test]
    fn test_nested_jsx_in_expression() {
        let out = code("const el = <ul>{items.map(i => <li key={i}>{i}</li>)}</ul>;");
        assert!(out.contains("items.map(i => React.createElement(\"li\", { key: i }, i))"));
    }

    #[test]
    fn test_multiline_text_collapses_and_keeps_line_count() {
        let source = "const el = (\n  <p>\n    Hello\n    world\n  </p>\n);\n";
        let out = code(source);
        assert!(out.contains("React.createElement(\"p\", null, \"Hello world\")"));
        assert_eq!(out.matches('\n').count(), source.matches('\n').count());
    }

    #[test]
    fn test_custom_factory() {
        let config = TransformConfig {
            jsx_factory: "h".into(),
            jsx_fragment: "Fragment".into(),
        };
        let out = transform("a.jsx", "const x = <a href=\"/\" />;", &config).unwrap().code;
        assert!(out.contains("h(\"a\", { href: \"/\" })"));
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_jsx_whitespace("  a  b  "), "  a  b  ");
        assert_eq!(collapse_jsx_whitespace("\n   a\n   b\n "), "a b");
        assert_eq!(collapse_jsx_whitespace("\n   \n"), "");
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("a &amp; b"), "a & b");
        assert_eq!(decode_entities("&#65;&#x42;"), "AB");
        assert_eq!(decode_entities("&unknown; &"), "&unknown; &");
    }
}
