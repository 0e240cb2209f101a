use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    // Make memory.x visible to the linker for firmware builds; host
    // builds copy it and never reference it.
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    fs::copy("memory.x", out_dir.join("memory.x")).unwrap();
    println!("cargo:rustc-link-search={}", out_dir.display());
    println!("cargo:rerun-if-changed=memory.x");
}
