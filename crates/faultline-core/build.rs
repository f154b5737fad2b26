//! Build script for faultline-core
//!
//! This script checks system requirements before compilation:
//! - Minimum Rust version (`OnceLock` and `JoinHandle::is_finished` need 1.70)
//! - Target architecture for the Windows backend
//!
//! ## Requirements
//!
//! - **Rust**: 1.70.0 or newer
//! - **Windows**: x86 or x86_64 (the register rewriting only knows those layouts)

fn main()
{
    println!("cargo:rerun-if-changed=build.rs");

    if let Ok(rustc_version) = rustc_version::version() {
        let min_rust_version = rustc_version::Version::new(1, 70, 0);

        if rustc_version < min_rust_version {
            panic!(
                "faultline-core requires Rust {} or newer, found {}",
                min_rust_version, rustc_version
            );
        }
    } else {
        // If we can't get version (e.g., in some build environments), just warn
        println!("cargo:warning=could not verify Rust version");
    }

    check_windows_architecture();
}

fn check_windows_architecture()
{
    let os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();

    if os == "windows" && arch != "x86_64" && arch != "x86" {
        println!(
            "cargo:warning=faultline-core has no register layout for windows/{arch}; \
             the Windows backend is disabled"
        );
    }
}
