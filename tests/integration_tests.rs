//! Integration tests for the stagehand binary.
//!
//! Every boot here faults before the sandbox is started, so none of these
//! tests need a JavaScript runtime.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn stagehand() -> Command {
    let mut cmd = cargo_bin_cmd!("stagehand");
    cmd.env_remove("STAGEHAND_PORT")
        .env_remove("STAGEHAND_UPSTREAM")
        .env_remove("STAGEHAND_NODE")
        .env_remove("RUST_LOG");
    cmd
}

fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (path, content) in files {
        write(dir.path(), path, content);
    }
    dir
}

fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, content).unwrap();
}

// =============================================================================
// Basic CLI
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        stagehand()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("replay"))
            .stdout(predicate::str::contains("resolve"));
    }

    #[test]
    fn test_version() {
        stagehand()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("stagehand"));
    }

    #[test]
    fn test_unknown_command_fails() {
        stagehand().arg("deploy").assert().failure();
    }
}

// =============================================================================
// transform
// =============================================================================

mod transform {
    use super::*;

    #[test]
    fn test_strips_types_and_lowers_default_export() {
        let dir = project(&[("Counter.ts", "const n: number = 1;\nexport default n;\n")]);
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("transform")
            .arg(dir.path().join("Counter.ts"))
            .assert()
            .success()
            .stdout(predicate::str::contains("exports.default = n;"))
            .stdout(predicate::str::contains(": number").not());
    }

    #[test]
    fn test_lowers_jsx_with_classic_pragma() {
        let dir = project(&[(
            "App.tsx",
            "export default function App() { return <h1 className=\"t\">Hi</h1>; }\n",
        )]);
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("transform")
            .arg(dir.path().join("App.tsx"))
            .assert()
            .success()
            .stdout(predicate::str::contains("React.createElement(\"h1\""));
    }

    #[test]
    fn test_json_output_lists_dependencies() {
        let dir = project(&[(
            "App.tsx",
            "import { helper } from './lib/helper';\nexport default () => helper();\n",
        )]);
        let output = stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("transform")
            .arg("--json")
            .arg(dir.path().join("App.tsx"))
            .output()
            .unwrap();
        assert!(output.status.success());
        let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(json["path"], "App.tsx");
        assert_eq!(json["kind"], "script");
        assert_eq!(json["dependencies"][0], "./lib/helper");
    }

    #[test]
    fn test_syntax_error_is_transform_fault() {
        let dir = project(&[("Broken.tsx", "export default () => <div>;\n")]);
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("transform")
            .arg(dir.path().join("Broken.tsx"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("Transform fault in Broken.tsx"));
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = project(&[]);
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("transform")
            .arg(dir.path().join("Nope.tsx"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read"));
    }
}

// =============================================================================
// resolve
// =============================================================================

mod resolve {
    use super::*;

    fn multi_file() -> TempDir {
        project(&[
            ("src/App.tsx", "import './lib/util';\nexport default () => null;\n"),
            ("src/lib/util.ts", "export const x = 1;\n"),
            ("src/components/Button.tsx", "export default () => null;\n"),
        ])
    }

    #[test]
    fn test_probes_extensions() {
        let dir = multi_file();
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["resolve", "src/App.tsx", "./lib/util"])
            .assert()
            .success()
            .stdout(predicate::str::diff("src/lib/util.ts\n"));
    }

    #[test]
    fn test_js_specifier_aliases_source_file() {
        let dir = multi_file();
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["resolve", "src/App.tsx", "./components/Button.js"])
            .assert()
            .success()
            .stdout(predicate::str::diff("src/components/Button.tsx\n"));
    }

    #[test]
    fn test_known_external() {
        let dir = multi_file();
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["resolve", "src/App.tsx", "react"])
            .assert()
            .success()
            .stdout(predicate::str::diff("external:react\n"));
    }

    #[test]
    fn test_configured_external() {
        let dir = multi_file();
        write(
            dir.path(),
            ".stagehand/stagehand.toml",
            "[externals]\n\"lodash\" = \"_\"\n",
        );
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["resolve", "src/App.tsx", "lodash"])
            .assert()
            .success()
            .stdout(predicate::str::diff("external:lodash\n"));
    }

    #[test]
    fn test_missing_module_names_specifier_and_importer() {
        let dir = multi_file();
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["resolve", "src/App.tsx", "./missing"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Cannot resolve module './missing' from src/App.tsx"));
    }

    #[test]
    fn test_unknown_package_fails() {
        let dir = multi_file();
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["resolve", "src/App.tsx", "left-pad"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("left-pad"));
    }
}

// =============================================================================
// config
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_show_defaults() {
        let dir = project(&[]);
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No stagehand.toml"))
            .stdout(predicate::str::contains("[gateway]"))
            .stdout(predicate::str::contains("port = 4173"));
    }

    #[test]
    fn test_show_applies_env_override() {
        let dir = project(&[]);
        stagehand()
            .env("STAGEHAND_PORT", "9123")
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 9123"));
    }

    #[test]
    fn test_dotenv_file_is_loaded() {
        let dir = project(&[(".env", "STAGEHAND_NODE=/opt/node22/bin/node\n")]);
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("/opt/node22/bin/node"));
    }

    #[test]
    fn test_init_then_validate() {
        let dir = project(&[]);
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created stagehand.toml"));
        assert!(dir.path().join(".stagehand/stagehand.toml").exists());

        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_validate_reports_invalid_values() {
        let dir = project(&[(
            ".stagehand/stagehand.toml",
            "[project]\nkind = \"spa\"\n\n[sandbox]\ntimeout_secs = 0\n",
        )]);
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "validate"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("Invalid project kind 'spa'"))
            .stdout(predicate::str::contains("timeout_secs"));
    }

    #[test]
    fn test_unparseable_config_is_error() {
        let dir = project(&[(".stagehand/stagehand.toml", "[gateway\nport = ")]);
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse stagehand.toml"));
    }
}

// =============================================================================
// boot
// =============================================================================

mod boot {
    use super::*;

    #[test]
    fn test_empty_project_is_entry_not_found() {
        let dir = project(&[]);
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("boot")
            .assert()
            .code(1)
            .stderr(predicate::str::contains(
                "startup fault [App]: Entry not found: no module matches 'App'",
            ));
    }

    #[test]
    fn test_multi_file_entry_designator() {
        let dir = project(&[("src/main.tsx", "export default () => null;\n")]);
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("boot")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("no module matches 'src/App'"));
    }

    #[test]
    fn test_transform_fault_names_file() {
        let dir = project(&[
            ("App.tsx", "import Broken from './Broken';\nexport default Broken;\n"),
            ("Broken.tsx", "export default () => <div>;\n"),
        ]);
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("boot")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("transform fault [Broken.tsx]"));
    }

    #[test]
    fn test_unresolved_import_is_resolution_fault() {
        let dir = project(&[(
            "App.tsx",
            "import Header from './Header';\nexport default () => <Header />;\n",
        )]);
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("boot")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("resolution fault"))
            .stderr(predicate::str::contains("Cannot resolve module './Header' from App.tsx"));
    }

    #[test]
    fn test_missing_mount_point_is_startup_fault() {
        let dir = project(&[
            ("index.html", "<html><body><div id=\"app\"></div></body></html>"),
            ("App.tsx", "export default () => null;\n"),
        ]);
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("boot")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("startup fault"))
            .stderr(predicate::str::contains("root"));
    }

    #[test]
    fn test_json_reports_invalid_default_export() {
        let dir = project(&[("App.tsx", "export default 42;\n")]);
        let output = stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["boot", "--json"])
            .output()
            .unwrap();
        assert_eq!(output.status.code(), Some(1));
        let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(json["entry"], "App");
        assert!(json["document"].is_null());
        let faults = json["faults"].as_array().unwrap();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0]["kind"], "startup");
        assert!(
            faults[0]["message"]
                .as_str()
                .unwrap()
                .contains("must default-export a component")
        );
    }

    #[test]
    fn test_entry_flag_overrides_designator() {
        let dir = project(&[("Main.tsx", "export default 'text';\n")]);
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["boot", "--entry", "Main"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Main.tsx"))
            .stderr(predicate::str::contains("must default-export a component"));
    }
}

// =============================================================================
// replay
// =============================================================================

mod replay {
    use super::*;

    #[test]
    fn test_missing_recording_is_error() {
        let dir = project(&[]);
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("replay")
            .arg(dir.path().join("missing.json"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read recording"));
    }

    #[test]
    fn test_replayed_resolution_fault_exits_nonzero() {
        let dir = project(&[(
            "recording.json",
            r#"{"files":[{"path":"App.tsx","chunks":["import X from './X';\n","export default X;\n"]}]}"#,
        )]);
        stagehand()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("replay")
            .arg(dir.path().join("recording.json"))
            .assert()
            .code(1)
            .stdout(predicate::str::contains("Replaying"))
            .stderr(predicate::str::contains("Cannot resolve module './X' from App.tsx"));
    }
}
