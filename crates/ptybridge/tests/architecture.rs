//! Architecture rule tests.

use std::fs;
use std::path::{Path, PathBuf};

const FORBIDDEN_DOMAIN_IMPORTS: &[&str] = &[
    "crate::infra",
    "crate::app",
    "crate::usecases",
    "tokio::",
    "axum::",
    "crossterm::",
    "tower_http::",
    "reqwest::",
    "tokio_tungstenite::",
    "tracing::",
];

const FORBIDDEN_USECASE_IMPORTS: &[&str] = &[
    "crate::infra",
    "crate::app",
    "axum::",
    "crossterm::",
    "tower_http::",
    "reqwest::",
    "tokio_tungstenite::",
    "signal_hook::",
];

fn collect_rs_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_rs_files(&path, files)?;
        } else if path.extension().and_then(|ext| ext.to_str()) == Some("rs") {
            files.push(path);
        }
    }
    Ok(())
}

fn assert_no_forbidden_imports(layer: &str, root: &Path, forbidden: &[&str]) {
    let mut files = Vec::new();
    if let Err(err) = collect_rs_files(root, &mut files) {
        panic!("collect source files: {err}");
    }
    assert!(!files.is_empty(), "no sources found under {}", root.display());

    let mut violations = Vec::new();
    for file in files {
        let Ok(contents) = fs::read_to_string(&file) else {
            continue;
        };
        for token in forbidden {
            if contents.contains(token) {
                violations.push(format!("{}: {}", file.display(), token));
            }
        }
    }

    assert!(
        violations.is_empty(),
        "Found forbidden dependencies in {} layer:\n{}",
        layer,
        violations.join("\n")
    );
}

fn src(layer: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src").join(layer)
}

#[test]
fn domain_layer_has_no_outward_dependencies() {
    assert_no_forbidden_imports("domain", &src("domain"), FORBIDDEN_DOMAIN_IMPORTS);
}

#[test]
fn usecase_layer_has_no_outward_dependencies() {
    assert_no_forbidden_imports("usecases", &src("usecases"), FORBIDDEN_USECASE_IMPORTS);
}

#[test]
fn infra_layer_does_not_depend_on_app() {
    assert_no_forbidden_imports("infra", &src("infra"), &["crate::app"]);
}
