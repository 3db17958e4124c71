//! Generation from a bundle produced by the compiler, through to files on
//! disk.

use pretty_assertions::assert_eq;
use rcl_codegen::{generate_module, write_outputs, ModuleConfig, ModuleFormat, OutputConfig, OutputFormat};
use rcl_core::{CancellationToken, CompileOptions, Compiler, SourceInput};
use std::fs;

const SOURCE: &str = "\
agent Pizza
  displayName: \"Pizza Place\"
  flow Order
    start: Welcome
    on Welcome
      match @reply.text
        \"Yes\" -> Done
        :default -> Welcome
    on Done
      -> :end
  messages Messages
    text Welcome \"Pizza?\"
    text Done \"On its way\"
";

fn interchange() -> serde_json::Value {
    let out = Compiler::new(CompileOptions::default())
        .compile(&SourceInput::text("pizza.rcl", SOURCE), &CancellationToken::new())
        .expect("compile");
    assert!(!out.has_errors(), "{:?}", out.diagnostics);
    out.bundle.expect("bundle").to_interchange()
}

#[test]
fn writes_every_requested_format() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = OutputConfig {
        out_dir: dir.path().join("dist"),
        stem: None,
        formats: OutputFormat::ALL.to_vec(),
    };
    let written = write_outputs(&interchange(), &config).expect("write");
    let names: Vec<_> = written
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["Pizza.json", "Pizza.js", "Pizza.ts"]);

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&written[0]).unwrap()).unwrap();
    assert_eq!(json, interchange());

    let ts = fs::read_to_string(&written[2]).unwrap();
    assert!(ts.contains("export type MessageId = \"Done\" | \"Welcome\";"));
    assert!(ts.contains("  \"Order\": \"Done\" | \"Welcome\";"));
}

#[test]
fn repeated_formats_write_once() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = OutputConfig {
        out_dir: dir.path().to_path_buf(),
        stem: Some("agent".into()),
        formats: vec![OutputFormat::Js, OutputFormat::Js],
    };
    let written = write_outputs(&interchange(), &config).expect("write");
    assert_eq!(written, vec![dir.path().join("agent.js")]);
}

#[test]
fn module_matches_written_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let bundle = interchange();
    let config = OutputConfig {
        out_dir: dir.path().to_path_buf(),
        stem: None,
        formats: vec![OutputFormat::Js],
    };
    let written = write_outputs(&bundle, &config).expect("write");
    let module = generate_module(
        &bundle,
        &ModuleConfig {
            format: ModuleFormat::Esm,
        },
    )
    .unwrap();
    assert_eq!(fs::read_to_string(&written[0]).unwrap(), module);
}

#[test]
fn invalid_bundle_writes_nothing() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = OutputConfig {
        out_dir: dir.path().join("dist"),
        stem: None,
        formats: vec![OutputFormat::Json],
    };
    let err = write_outputs(&serde_json::json!({"version": "1.0.0"}), &config).unwrap_err();
    assert!(err.to_string().starts_with("invalid bundle"));
    assert!(!dir.path().join("dist").exists());
}
