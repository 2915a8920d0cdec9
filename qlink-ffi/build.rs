use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=src/lib.rs");

    let crate_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => dir,
        Err(_) => return,
    };
    let out_dir = match env::var("OUT_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => return,
    };

    match cbindgen::Builder::new()
        .with_crate(crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("QLINK_H")
        .generate()
    {
        Ok(bindings) => {
            bindings.write_to_file(out_dir.join("qlink.h"));
        }
        Err(e) => println!("cargo:warning=Unable to generate C bindings: {}", e),
    }
}
