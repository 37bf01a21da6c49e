use std::env;
use std::path::PathBuf;

fn main() {
    // Only emit linking directives when the `avaspec-sdk` feature is enabled.
    // Without it the crate only exposes the struct layouts and constants.
    if env::var_os("CARGO_FEATURE_AVASPEC_SDK").is_none() {
        return;
    }

    println!("cargo:rerun-if-env-changed=AVASPEC_LIB_DIR");

    let lib_dir = env::var("AVASPEC_LIB_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/usr/local/lib"));

    // The lib path might not exist if the library is installed in a system
    // directory the linker already searches. Warn rather than fail.
    if !lib_dir.exists() {
        println!(
            "cargo:warning=AvaSpec lib path does not exist: {}",
            lib_dir.display()
        );
    }

    println!("cargo:rustc-link-search=native={}", lib_dir.display());
    println!("cargo:rustc-link-lib=avs");
}
