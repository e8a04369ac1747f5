//! Build script for rdebug-core
//!
//! Checks the toolchain before compilation:
//! - Minimum Rust version (let-else, `Option::is_some_and`)
//! - The vendored Lua build needs a C compiler; `mlua` reports that itself

fn main()
{
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src/platform/lua/helper.lua");

    let Ok(found) = rustc_version::version() else {
        // Some build environments hide rustc; warn rather than fail.
        println!("cargo:warning=could not verify Rust version");
        return;
    };
    let Ok(minimum) = rustc_version::Version::parse("1.70.0") else {
        return;
    };
    assert!(found >= minimum, "rdebug-core requires Rust {minimum} or newer, found {found}");
}
