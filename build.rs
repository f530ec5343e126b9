use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn main() {
    // Use the vendored protoc so builds do not depend on a system install.
    if let Ok(path) = protoc_bin_vendored::protoc_bin_path() {
        std::env::set_var("PROTOC", &path);
        eprintln!("build.rs: Using vendored protoc at {}", path.display());
    }

    println!("cargo:rerun-if-env-changed=MESHTASTIC_PROTO_DIR");
    println!("cargo:rerun-if-changed=protos");

    // MESHTASTIC_PROTO_DIR may point at a full upstream protobufs checkout
    // (the directory that contains `meshtastic/`).
    let proto_root = PathBuf::from(env::var("MESHTASTIC_PROTO_DIR").unwrap_or_else(|_| "protos".into()));

    fn collect_protos(dir: &Path, acc: &mut Vec<PathBuf>) {
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    collect_protos(&path, acc);
                } else if path.extension().and_then(|e| e.to_str()) == Some("proto") {
                    acc.push(path);
                }
            }
        }
    }

    let mut protos = Vec::new();
    collect_protos(&proto_root.join("meshtastic"), &mut protos);
    if protos.is_empty() {
        panic!(
            "No Meshtastic .proto files found under {}/meshtastic",
            proto_root.display()
        );
    }
    // Each file must be passed exactly once or protoc reports redefinitions.
    protos.sort();
    protos.dedup();

    eprintln!("build.rs: Compiling {} proto files", protos.len());
    for p in &protos {
        eprintln!("  proto: {}", p.display());
    }

    let mut config = prost_build::Config::new();
    config.bytes(["."]);
    config
        .compile_protos(&protos, &[proto_root.as_path()])
        .expect("Failed to compile protos");
}
