//! Host document handling: mount point detection and document composition.

use serde::Serialize;

use crate::errors::Fault;
use crate::registry::Snapshot;

use super::StyleSheet;

pub const HOST_DOCUMENT_PATH: &str = "index.html";

pub const DEFAULT_MOUNT_ID: &str = "root";

/// An element of the host document carrying an `id` or a `class`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentElement {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
}

/// The document the preview renders into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDocument {
    source: String,
    from_project: bool,
}

impl HostDocument {
    /// The project's own `index.html`, or a minimal template with one mount point.
    pub fn from_snapshot(snapshot: &Snapshot, mount_id: &str) -> Self {
        match snapshot.get(HOST_DOCUMENT_PATH) {
            Some(source) => Self {
                source: source.to_string(),
                from_project: true,
            },
            None => Self {
                source: default_template(mount_id),
                from_project: false,
            },
        }
    }

    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            from_project: true,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_from_project(&self) -> bool {
        self.from_project
    }

    pub fn ensure_mount(&self, mount_id: &str) -> Result<(), Fault> {
        if find_element(&self.source, mount_id).is_some() {
            Ok(())
        } else {
            Err(Fault::NoMountPoint {
                mount_id: mount_id.to_string(),
            })
        }
    }

    /// Elements addressable by id or class, in document order.
    pub fn elements(&self) -> Vec<DocumentElement> {
        let mut out = Vec::new();
        let mut offset = 0;
        while let Some(rel) = self.source[offset..].find('<') {
            let start = offset + rel;
            let Some(end) = self.source[start..].find('>').map(|i| start + i) else {
                break;
            };
            let tag = &self.source[start + 1..end];
            offset = end + 1;
            if tag.starts_with(['/', '!', '?']) {
                continue;
            }
            let name: String = tag
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
                .collect::<String>()
                .to_ascii_lowercase();
            if name.is_empty() || name == "script" || name == "style" {
                continue;
            }
            let id = attribute_value(tag, "id").filter(|v| !v.is_empty());
            let classes: Vec<String> = attribute_value(tag, "class")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default();
            if id.is_some() || !classes.is_empty() {
                out.push(DocumentElement {
                    tag: name,
                    id,
                    classes,
                });
            }
        }
        out
    }

    /// Produce the final document.
    ///
    /// With a mount id, `mount_html` replaces the mount element's content
    /// and project module scripts are removed (the program has already been
    /// rendered). Without one the document keeps its own scripts.
    pub fn compose(
        &self,
        mount: Option<(&str, &str)>,
        styles: &[StyleSheet],
        base_href: Option<&str>,
    ) -> String {
        let mut html = self.source.clone();
        if let Some((mount_id, mount_html)) = mount {
            html = strip_module_scripts(&html);
            if let Some(element) = find_element(&html, mount_id) {
                html.replace_range(element.inner_start..element.inner_end, mount_html);
            }
        }

        let mut head = String::new();
        if let Some(base) = base_href {
            head.push_str(&format!("<base href=\"{}\" />", escape_attribute(base)));
        }
        for style in styles {
            head.push_str(&format!(
                "<style data-stagehand-path=\"{}\">{}</style>",
                escape_attribute(&style.path),
                style.css.replace("</style", "<\\/style")
            ));
        }
        if !head.is_empty() {
            insert_into_head(&mut html, &head);
        }
        html
    }
}

pub fn default_template(mount_id: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\" />\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\" />\n\
         <title>Preview</title>\n</head>\n<body>\n<div id=\"{}\"></div>\n</body>\n</html>\n",
        escape_attribute(mount_id)
    )
}

pub(crate) fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn insert_into_head(html: &mut String, content: &str) {
    let lower = html.to_ascii_lowercase();
    if let Some(idx) = lower.find("</head>") {
        html.insert_str(idx, content);
    } else if let Some(idx) = lower.find("<body") {
        html.insert_str(idx, &format!("<head>{content}</head>"));
    } else {
        html.insert_str(0, content);
    }
}

/// Byte ranges of one element located by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Element {
    inner_start: usize,
    inner_end: usize,
}

/// Locate the element whose `id` attribute equals `id`.
fn find_element(html: &str, id: &str) -> Option<Element> {
    let mut offset = 0;
    while let Some(rel) = html[offset..].find('<') {
        let start = offset + rel;
        let end = start + html[start..].find('>')?;
        let tag = &html[start + 1..end];
        offset = end + 1;
        if tag.starts_with(['/', '!', '?']) {
            continue;
        }
        if attribute_value(tag, "id").as_deref() != Some(id) {
            continue;
        }
        let name: String = tag
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect::<String>()
            .to_ascii_lowercase();
        if tag.trim_end().ends_with('/') {
            return Some(Element {
                inner_start: end + 1,
                inner_end: end + 1,
            });
        }
        let inner_end = matching_close(html, end + 1, &name).unwrap_or(end + 1);
        return Some(Element {
            inner_start: end + 1,
            inner_end,
        });
    }
    None
}

/// Start of the closing tag matching an element opened just before `from`.
fn matching_close(html: &str, from: usize, name: &str) -> Option<usize> {
    let lower = html.to_ascii_lowercase();
    let open = format!("<{name}");
    let close = format!("</{name}");
    let mut depth = 1usize;
    let mut cursor = from;
    loop {
        let next_open = lower[cursor..].find(&open).map(|i| cursor + i);
        let next_close = lower[cursor..].find(&close).map(|i| cursor + i)?;
        match next_open {
            Some(o) if o < next_close => {
                depth += 1;
                cursor = o + open.len();
            }
            _ => {
                depth -= 1;
                if depth == 0 {
                    return Some(next_close);
                }
                cursor = next_close + close.len();
            }
        }
    }
}

fn attribute_value(tag: &str, name: &str) -> Option<String> {
    let bytes = tag.as_bytes();
    let mut i = 0;
    // Skip the tag name.
    while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    while i < bytes.len() {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
            i += 1;
        }
        let key_start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'=' && bytes[i] != b'/' {
            i += 1;
        }
        let key = &tag[key_start..i];
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let mut value = None;
        if i < bytes.len() && bytes[i] == b'=' {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'') {
                let quote = bytes[i];
                let value_start = i + 1;
                i = value_start;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                value = Some(tag[value_start..i.min(bytes.len())].to_string());
                i += 1;
            } else {
                let value_start = i;
                while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                value = Some(tag[value_start..i].to_string());
            }
        }
        if key.eq_ignore_ascii_case(name) {
            return value;
        }
        if key.is_empty() {
            i += 1;
        }
    }
    None
}

/// Remove `<script type="module" ...>...</script>` elements.
fn strip_module_scripts(html: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;
    while let Some(rel) = lower[cursor..].find("<script") {
        let start = cursor + rel;
        let Some(tag_end) = lower[start..].find('>').map(|i| start + i) else {
            break;
        };
        let is_module = attribute_value(&html[start + 1..tag_end], "type")
            .is_some_and(|t| t.eq_ignore_ascii_case("module"));
        let close = lower[tag_end..]
            .find("</script>")
            .map(|i| tag_end + i + "</script>".len())
            .unwrap_or(tag_end + 1);
        out.push_str(&html[cursor..start]);
        if !is_module {
            out.push_str(&html[start..close]);
        }
        cursor = close;
    }
    out.push_str(&html[cursor..]);
    out
}
