use std::fs;
use std::path::Path;

use fox_vm::{Config, ErrorKind, FoxError, Runtime, Value};
use tempfile::TempDir;

fn write(dir: &Path, rel: &str, source: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create module dir");
    }
    fs::write(path, source).expect("write module");
}

fn runtime(dir: &TempDir) -> Runtime {
    let mut rt = Runtime::new(Config::default().with_import_dir(dir.path()));
    rt.capture_output();
    rt
}

#[test]
fn import_runs_module_once() {
    let dir = TempDir::new().expect("tempdir");
    write(dir.path(), "util.fox", "print(\"util init\")\ndef twice(x) { return x * 2 }\nvar calls = 0");
    let mut rt = runtime(&dir);
    rt.run_source("main", "import util\nimport util\nprint(util.twice(21))")
        .expect("runs");
    rt.run_source("second", "import util\nprint(util.twice(1))").expect("runs");
    assert_eq!(rt.take_output(), "util init\n42\n2\n");
}

#[test]
fn dotted_import_with_alias() {
    let dir = TempDir::new().expect("tempdir");
    write(
        dir.path(),
        "geo/shapes.fox",
        "class Square(side) {\n  var side = side\n  def area() { return this.side * this.side }\n}",
    );
    let mut rt = runtime(&dir);
    rt.run_source(
        "main",
        "import geo.shapes -> sh\nlet s = sh.Square(3)\ndef describe(x: sh.Square) { return x.area() }\nprint(describe(s))",
    )
    .expect("runs");
    assert_eq!(rt.take_output(), "9\n");
}

#[test]
fn qualified_type_checks_reject_other_classes() {
    let dir = TempDir::new().expect("tempdir");
    write(dir.path(), "geo.fox", "class Point {}\nclass Line {}");
    let mut rt = runtime(&dir);
    let err = rt
        .run_source("main", "import geo\ndef f(p: geo.Point) { return p }\nf(geo.Line())")
        .expect_err("type check fails");
    assert_eq!(err.class_name(), "TypeError");
}

#[test]
fn cyclic_imports_see_each_other() {
    let dir = TempDir::new().expect("tempdir");
    write(dir.path(), "ping.fox", "import pong\ndef ping(n) {\n  if n == 0 { return \"ping\" }\n  return pong.pong(n - 1)\n}");
    write(dir.path(), "pong.fox", "import ping\ndef pong(n) {\n  if n == 0 { return \"pong\" }\n  return ping.ping(n - 1)\n}");
    let mut rt = runtime(&dir);
    rt.run_source("main", "import ping\nprint(ping.ping(3), ping.ping(4))").expect("runs");
    assert_eq!(rt.take_output(), "pong ping\n");
}

#[test]
fn class_from_a_later_module_is_linked() {
    let dir = TempDir::new().expect("tempdir");
    write(dir.path(), "base.fox", "class Base {\n  def hello() { return \"hello from base\" }\n}");
    let mut rt = runtime(&dir);
    rt.run_source("main", "import base\nclass Child extends base.Base {}\nprint(Child().hello())")
        .expect("runs");
    assert_eq!(rt.take_output(), "hello from base\n");
}

#[test]
fn missing_module_is_an_import_error() {
    let dir = TempDir::new().expect("tempdir");
    let mut rt = runtime(&dir);
    match rt.run_source("main", "import nowhere.to.be.found") {
        Err(FoxError::Compile(d)) => {
            assert_eq!(d.kind, ErrorKind::Import);
            assert_eq!(d.message, "no module named 'nowhere.to.be.found'");
            assert_eq!(d.line, 1);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn error_in_imported_module_names_that_module() {
    let dir = TempDir::new().expect("tempdir");
    write(dir.path(), "broken.fox", "def ok() { }\n\ndef bad( { }");
    let mut rt = runtime(&dir);
    match rt.run_source("main", "import broken") {
        Err(FoxError::Compile(d)) => {
            assert_eq!(d.kind, ErrorKind::Syntax);
            assert_eq!(d.module, "broken");
            assert_eq!(d.line, 3);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn undefined_names_across_modules_are_reported_together() {
    let dir = TempDir::new().expect("tempdir");
    write(dir.path(), "lib.fox", "def f() { return missing_one }");
    let mut rt = runtime(&dir);
    match rt.run_source("main", "import lib\nprint(missing_two)") {
        Err(FoxError::Link(ds)) => {
            let mut names: Vec<_> = ds.iter().map(|d| (d.module.as_str(), d.message.as_str())).collect();
            names.sort();
            assert_eq!(
                names,
                vec![
                    ("lib", "undefined name 'missing_one'"),
                    ("main", "undefined name 'missing_two'"),
                ]
            );
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn run_file_searches_its_own_directory() {
    let dir = TempDir::new().expect("tempdir");
    write(dir.path(), "app/helper.fox", "let GREETING = \"hi\"");
    write(dir.path(), "app/main.fox", "import helper\nreturn helper.GREETING");
    let mut rt = Runtime::default();
    rt.capture_output();
    let v = rt.run_file(&dir.path().join("app/main.fox")).expect("runs");
    assert_eq!(rt.display(v).expect("displays"), "hi");
}

#[test]
fn host_import_initializes() {
    let dir = TempDir::new().expect("tempdir");
    write(dir.path(), "counter.fox", "var count = 5\ncount += 1");
    let mut rt = runtime(&dir);
    let m = rt.import("counter").expect("imports");
    assert_eq!(rt.global(m, "count"), Some(Value::Int(6)));
}

#[test]
fn env_directive_is_visible_to_sys() {
    let dir = TempDir::new().expect("tempdir");
    let mut rt = runtime(&dir);
    rt.run_source("main", "#@env FOX_IT_MODE=fast\n#@native sys\nprint(sys.env(\"FOX_IT_MODE\"))")
        .expect("runs");
    assert_eq!(rt.take_output(), "fast\n");
}
