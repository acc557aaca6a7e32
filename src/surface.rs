//! What the preview shows.
//!
//! The surface is never blank: before the first boot it explains that it
//! is waiting, while a build streams it lists the files written so far,
//! and a failed boot renders every fault as a panel.

use serde::Serialize;

use crate::errors::FaultSignal;
use crate::orchestrator::BuildState;

/// Script added to generated pages so they reload after each boot.
pub const LIVE_RELOAD_SCRIPT: &str = r#"<script data-stagehand-reload>(function () {
  var proto = location.protocol === "https:" ? "wss://" : "ws://";
  var socket = new WebSocket(proto + location.host + "/__stagehand/events");
  socket.onmessage = function (message) {
    try {
      var event = JSON.parse(message.data);
      if (event.type === "BootFinished" || event.type === "BuildStarted") location.reload();
    } catch (_) {}
  };
})();</script>"#;

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Surface {
    #[default]
    Empty,
    Building {
        state: BuildState,
        files: Vec<String>,
    },
    Running {
        version: u64,
        document: String,
    },
    Faulted {
        version: u64,
        faults: Vec<FaultSignal>,
    },
}

impl Surface {
    pub fn status(&self) -> &'static str {
        match self {
            Surface::Empty => "empty",
            Surface::Building { .. } => "building",
            Surface::Running { .. } => "running",
            Surface::Faulted { .. } => "faulted",
        }
    }

    /// Registry version of the boot this surface shows.
    pub fn version(&self) -> Option<u64> {
        match self {
            Surface::Running { version, .. } | Surface::Faulted { version, .. } => Some(*version),
            Surface::Empty | Surface::Building { .. } => None,
        }
    }

    /// Full HTML page for this surface.
    pub fn render(&self) -> String {
        match self {
            Surface::Empty => panel(
                "Waiting for files",
                "<p>No project has been loaded yet.</p>",
            ),
            Surface::Building { state, files } => {
                let mut body = format!("<p class=\"state\">{}</p><ul>", escape_html(&state.label()));
                for file in files {
                    body.push_str(&format!("<li><code>{}</code></li>", escape_html(file)));
                }
                body.push_str("</ul>");
                panel("Building preview", &body)
            }
            Surface::Running { document, .. } => with_live_reload(document),
            Surface::Faulted { faults, .. } => {
                let mut body = String::new();
                for fault in faults {
                    body.push_str("<section class=\"fault\">");
                    body.push_str(&format!(
                        "<span class=\"kind\">{} fault</span>",
                        escape_html(&fault.kind.to_string())
                    ));
                    if let Some(path) = &fault.path {
                        body.push_str(&format!("<code class=\"path\">{}</code>", escape_html(path)));
                    }
                    body.push_str(&format!("<pre>{}</pre></section>", escape_html(&fault.message)));
                }
                let title = if faults.len() == 1 {
                    "The preview failed to start".to_string()
                } else {
                    format!("The preview failed to start ({} faults)", faults.len())
                };
                panel(&title, &body)
            }
        }
    }
}

fn panel(title: &str, body: &str) -> String {
    let page = format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\" />\n\
         <title>{title}</title>\n<style>{PANEL_CSS}</style>\n</head>\n\
         <body>\n<main class=\"stagehand-panel\">\n<h1>{title}</h1>\n{body}\n</main>\n</body>\n</html>\n",
        title = escape_html(title),
    );
    with_live_reload(&page)
}

fn with_live_reload(document: &str) -> String {
    match document.rfind("</body>") {
        Some(idx) => {
            let mut html = String::with_capacity(document.len() + LIVE_RELOAD_SCRIPT.len());
            html.push_str(&document[..idx]);
            html.push_str(LIVE_RELOAD_SCRIPT);
            html.push_str(&document[idx..]);
            html
        }
        None => format!("{document}{LIVE_RELOAD_SCRIPT}"),
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

const PANEL_CSS: &str = "body{margin:0;font-family:system-ui,sans-serif;background:#111;color:#eee}\
.stagehand-panel{max-width:760px;margin:48px auto;padding:0 24px}\
h1{font-size:20px}.state{color:#9ab}code{font-family:ui-monospace,monospace}\
.fault{border-left:3px solid #e55;background:#1c1c1c;margin:16px 0;padding:12px 16px}\
.kind{text-transform:uppercase;font-size:12px;color:#e88;margin-right:8px}\
pre{white-space:pre-wrap;margin:8px 0 0}";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Fault;
    use uuid::Uuid;

    #[test]
    fn test_every_surface_renders_something() {
        let surfaces = [
            Surface::Empty,
            Surface::Building {
                state: BuildState::Planning {
                    build_id: Uuid::nil(),
                },
                files: vec![],
            },
            Surface::Running {
                version: 1,
                document: "<html><body><p>ok</p></body></html>".into(),
            },
            Surface::Faulted {
                version: 1,
                faults: vec![Fault::runtime("boom").to_signal()],
            },
        ];
        for surface in surfaces {
            let html = surface.render();
            assert!(html.contains("<body"), "{} rendered nothing", surface.status());
            assert!(html.contains("data-stagehand-reload"));
        }
    }

    #[test]
    fn test_fault_panel_lists_each_fault_escaped() {
        let faults = vec![
            Fault::Transform {
                path: "src/App.tsx".into(),
                message: "Unexpected token '<'".into(),
                line: 2,
                column: 5,
            }
            .to_signal(),
            Fault::EntryNotFound { entry: "App".into() }.to_signal(),
        ];
        let html = Surface::Faulted { version: 3, faults }.render();
        assert!(html.contains("(2 faults)"));
        assert!(html.contains("transform fault"));
        assert!(html.contains("startup fault"));
        assert!(html.contains("<code class=\"path\">src/App.tsx</code>"));
        assert!(html.contains("Unexpected token &#39;&lt;&#39;"));
    }

    #[test]
    fn test_building_lists_files() {
        let html = Surface::Building {
            state: BuildState::Streaming {
                build_id: Uuid::nil(),
                index: 0,
                path: "src/App.tsx".into(),
            },
            files: vec!["src/App.tsx".into()],
        }
        .render();
        assert!(html.contains("streaming #1 src/App.tsx"));
        assert!(html.contains("<li><code>src/App.tsx</code></li>"));
    }

    #[test]
    fn test_running_document_gets_reload_before_body_close() {
        let html = Surface::Running {
            version: 1,
            document: "<html><body><div id=\"root\"></div></body></html>".into(),
        }
        .render();
        let script = html.find("data-stagehand-reload").unwrap();
        assert!(script < html.find("</body>").unwrap());
    }
}
