//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Once;
use tufo_core::{Model, Store, StoreConfig};

/// Forms and types exercised by the integration tests.
pub const TEST_MODEL: &str = r#"{
    "ctors": [
        ["testtype", "str", {"lower": true}, {"doc": "A lower case serial."}]
    ],
    "types": [
        ["testint", ["int", {}], {}],
        ["testlower", ["str", {"lower": true}], {}],
        ["testcomp", ["comp", {"fields": [["hehe", "testint"], ["haha", "testlower"]]}], {"doc": "A fake comp type."}],
        ["testcomp2", ["comp", {"fields": [["haha", "testlower"], ["hehe", "testint"]]}], {}],
        ["teststr", ["str", {}], {}],
        ["widget", ["str", {"lower": true}], {"doc": "A widget."}],
        ["pivtarg", ["str", {}], {}],
        ["pivcomp", ["comp", {"fields": [["targ", "pivtarg"], ["lulz", "teststr"]]}], {}]
    ],
    "forms": [
        ["widget", {}, [
            ["intprop", ["int", {"min": 20, "max": 30}], {"defval": 20}],
            ["strprop", ["str", {"lower": 1}], {"defval": "asdf"}],
            ["guidprop", ["guid", {}], {"defval": "*"}],
            ["serial", ["testtype", {}], {"ro": 1}],
            ["seen", ["time", {}], {}],
            ["locprop", ["loc", {}], {"defval": "??"}]
        ]],
        ["testcomp", {}, [
            ["hehe", ["testint", {}], {"ro": 1}],
            ["haha", ["testlower", {}], {"ro": 1}]
        ]],
        ["testcomp2", {}, []],
        ["teststr", {}, [
            ["bar", ["ndef", {}], {}],
            ["baz", ["nodeprop", {}], {}],
            ["num", ["testint", {}], {}],
            ["tick", ["time", {}], {}]
        ]],
        ["pivtarg", {}, [["name", ["str", {}], {}]]],
        ["pivcomp", {}, [
            ["targ", ["pivtarg", {}], {"ro": 1}],
            ["lulz", ["teststr", {}], {"ro": 1}]
        ]]
    ]
}"#;

static TRACING: Once = Once::new();

/// Route store logs to the test output; filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn model() -> Model {
    Model::from_json_str("test", TEST_MODEL).expect("test model")
}

/// A volatile single-layer store.
pub fn mem_store() -> Store {
    init_tracing();
    Store::open(StoreConfig::in_memory(), model()).expect("in-memory store")
}

/// A store with its write layer in a file.
pub fn file_store(path: &Path) -> Store {
    init_tracing();
    Store::open(StoreConfig::at(path), model()).expect("file store")
}

/// A store with a fresh write layer over one read-only overlay.
pub fn overlay_store(top: &Path, base: &Path) -> Store {
    init_tracing();
    Store::open(StoreConfig::at(top).with_overlay("base", base), model()).expect("overlay store")
}
