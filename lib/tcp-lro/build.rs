// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

// The usdt probes in `lro_provider` need inline asm, and `asm_sym` on
// macOS; older toolchains only had these as nightly features.
fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    enable_if_min("usdt_stable_asm", "1.59", true);
    enable_if_min("usdt_stable_asm_sym", "1.66", cfg!(target_os = "macos"));
}

fn enable_if_min(cfg: &str, version: &str, wanted: bool) {
    println!("cargo::rustc-check-cfg=cfg({cfg})");
    if wanted && version_check::is_min_version(version).unwrap_or(false) {
        println!("cargo:rustc-cfg={cfg}");
    }
}
