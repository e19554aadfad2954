// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Links the sample for region B unless `IAP_APP_SLOT=A` is set.

use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let linker_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap())
        .parent()
        .unwrap()
        .join("linker_scripts");

    let script = match env::var("IAP_APP_SLOT").as_deref() {
        Ok("A") | Ok("a") => "app_h503_a.x",
        _ => "app_h503_b.x",
    };

    let linker_script =
        fs::read_to_string(linker_dir.join(script)).expect("Failed to read app linker script");
    fs::write(out_dir.join("memory.x"), linker_script).expect("Failed to write memory.x");

    println!("cargo:rustc-link-search={}", out_dir.display());
    println!("cargo:rustc-link-arg=-Tlink.x");
    println!("cargo:rustc-link-arg=-Tdefmt.x");
    println!("cargo:rerun-if-changed={}", linker_dir.join(script).display());
    println!("cargo:rerun-if-env-changed=IAP_APP_SLOT");
    println!("cargo:rerun-if-changed=build.rs");
}
