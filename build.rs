// Copyright (c) 2022 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

use std::env;
use std::fs;
use std::path::Path;
use std::process::Command;

fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // The built crate's git2 feature doesn't cross-compile: use the git command line instead
    let git_version = git(&["describe", "--match", "v[0-9]*", "--tags", "HEAD"])
        .map(|v| v.trim_start_matches('v').to_string())
        .or_else(|| git(&["rev-parse", "--short", "HEAD"]));
    let git_dirty = git(&["diff-index", "--name-only", "HEAD", "--"]).is_some();

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR must be set by cargo");
    let content = format!(
        "// Git information generated at build time\n\
         pub const GIT_VERSION: Option<&'static str> = {};\n\
         pub const GIT_DIRTY: Option<bool> = {};\n",
        match git_version {
            Some(v) => format!("Some({v:?})"),
            None => "None".into(),
        },
        if git_dirty { "Some(true)" } else { "None" }
    );
    fs::write(Path::new(&out_dir).join("git_built.rs"), content)
        .expect("Failed to write git_built.rs");
}

/// Run a git command and return its trimmed, non-empty output.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let out = String::from_utf8(output.stdout).ok()?;
    let out = out.trim();
    if out.is_empty() {
        None
    } else {
        Some(out.to_string())
    }
}
