use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    // Copy the linker fragments into OUT_DIR so cortex-m-rt's link.x can find them
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    for script in ["memory.x", "device.x"] {
        fs::copy(script, out_dir.join(script)).unwrap();
        println!("cargo:rerun-if-changed={script}");
    }
    println!("cargo:rustc-link-search={}", out_dir.display());

    // Only the firmware image links against cortex-m-rt
    if env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("none") {
        println!("cargo:rustc-link-arg-bins=-Tlink.x");
        if env::var_os("CARGO_FEATURE_DEFMT").is_some() {
            println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
        }
    }
    println!("cargo:rerun-if-changed=build.rs");
}
