//! Build script for costack-runtime
//!
//! Writes `OUT_DIR/costack_merged_config.rs`: one `pub const` per engine
//! default. When `COSTACK_CONFIG_RS` names a file, any of its
//! `pub const NAME: TYPE = VALUE;` lines whose NAME is known replace the
//! library default; everything else keeps the default.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::{env, fs};

const CONFIG_ENV: &str = "COSTACK_CONFIG_RS";

/// (name, type, library default)
const DEFAULTS: &[(&str, &str, &str)] = &[
    ("STACK_SIZE", "usize", "costack_core::constants::DEFAULT_STACK_SIZE"),
    ("GUARD_PAGES", "bool", "cfg!(debug_assertions)"),
    ("HEAP_STACKS", "bool", "false"),
    ("ABORT_ON_ALLOC_FAILURE", "bool", "true"),
    ("BLOCK_ON_DEADLOCK", "bool", "true"),
    ("DEADLOCK_POLL_MS", "u64", "1000"),
    ("WATCHDOG_QUANTUM_MS", "u64", "5000"),
    ("WATCHDOG_THRESHOLD_MS", "u64", "0"),
];

fn main() {
    println!("cargo:rerun-if-env-changed={}", CONFIG_ENV);
    println!("cargo:rerun-if-changed=build.rs");

    let mut overrides = BTreeMap::new();
    let user_file = env::var(CONFIG_ENV).ok();
    if let Some(path) = &user_file {
        println!("cargo:rerun-if-changed={}", path);
        match fs::read_to_string(path) {
            Ok(text) => {
                overrides = user_overrides(&text);
                println!("cargo:warning=costack config overrides from {}", path);
            }
            Err(e) => println!("cargo:warning=cannot read {} ({}): {}", CONFIG_ENV, path, e),
        }
    }

    let Some(out_dir) = env::var_os("OUT_DIR") else {
        panic!("cargo did not set OUT_DIR");
    };
    let dest = Path::new(&out_dir).join("costack_merged_config.rs");
    let source = render(&overrides, user_file.is_some());
    if let Err(e) = fs::write(&dest, source) {
        panic!("writing {}: {}", dest.display(), e);
    }
}

/// Known constants set by the user file, name -> value expression
fn user_overrides(text: &str) -> BTreeMap<String, String> {
    let mut found = BTreeMap::new();
    for (name, value) in text.lines().filter_map(const_decl) {
        if DEFAULTS.iter().any(|(known, _, _)| *known == name) {
            found.insert(name, value);
        } else {
            println!("cargo:warning=ignoring unknown costack constant {}", name);
        }
    }
    found
}

/// Split `pub const NAME: TYPE = VALUE;` into (NAME, VALUE)
fn const_decl(line: &str) -> Option<(String, String)> {
    let decl = line.trim().strip_prefix("pub const ")?;
    let (name, rest) = decl.split_once(':')?;
    let (_ty, value) = rest.split_once('=')?;
    let value = value.trim().trim_end_matches(';').trim();
    if value.is_empty() {
        return None;
    }
    Some((name.trim().to_string(), value.to_string()))
}

fn render(overrides: &BTreeMap<String, String>, has_user_file: bool) -> String {
    let mut out = String::from("// generated by costack-runtime/build.rs\n");
    if has_user_file {
        out.push_str("// includes overrides from the COSTACK_CONFIG_RS file\n");
    }
    for (name, ty, default) in DEFAULTS {
        let value = overrides.get(*name).map_or(*default, String::as_str);
        let _ = writeln!(out, "pub const {}: {} = {};", name, ty, value);
    }
    out
}
