//! Build script for wfs-sys.
//!
//! With the `wfs-sdk` feature the vendor import library is linked:
//! `WFS_64` on 64-bit targets, `WFS_32` otherwise. The search path comes from
//! `WFS_SDK_DIR` (or `WFS_LIB_DIR` for the library folder itself) and falls back
//! to the IVI Foundation VISA install location used by the Thorlabs installer.
//! Without the feature nothing is linked and only constants are usable.

fn main() {
    println!("cargo:rerun-if-env-changed=WFS_SDK_DIR");
    println!("cargo:rerun-if-env-changed=WFS_LIB_DIR");

    #[cfg(feature = "wfs-sdk")]
    link_vendor_library();
}

#[cfg(feature = "wfs-sdk")]
fn link_vendor_library() {
    use std::env;
    use std::path::PathBuf;

    let wide = env::var("CARGO_CFG_TARGET_POINTER_WIDTH").map_or(true, |w| w == "64");
    let (lib_name, default_dir) = if wide {
        (
            "WFS_64",
            r"C:\Program Files\IVI Foundation\VISA\Win64\Lib_x64\msc",
        )
    } else {
        (
            "WFS_32",
            r"C:\Program Files (x86)\IVI Foundation\VISA\WinNT\lib\msc",
        )
    };

    let lib_dir = if let Ok(dir) = env::var("WFS_LIB_DIR") {
        PathBuf::from(dir)
    } else if let Ok(sdk) = env::var("WFS_SDK_DIR") {
        PathBuf::from(sdk).join("lib")
    } else {
        PathBuf::from(default_dir)
    };

    // The library may also be on the system search path; warn rather than fail.
    if !lib_dir.exists() {
        println!(
            "cargo:warning=WFS library directory does not exist: {}",
            lib_dir.display()
        );
    }

    println!("cargo:rustc-link-search=native={}", lib_dir.display());
    println!("cargo:rustc-link-lib=dylib={}", lib_name);
}
