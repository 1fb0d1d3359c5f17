fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Vendored protoc, no system installation required
    let protoc_path = protoc_bin_vendored::protoc_bin_path()
        .expect("protoc-bin-vendored: no binary for this platform");
    let include_path = protoc_bin_vendored::include_path()
        .expect("protoc-bin-vendored: no include dir for this platform");

    // BTreeMap keeps encodings deterministic and recipients sorted.
    prost_build::Config::new()
        .protoc_executable(protoc_path)
        .btree_map(["."])
        .compile_protos(
            &["src/proto/xc.proto", "src/proto/index.proto"],
            &[std::path::PathBuf::from("src/proto"), include_path],
        )?;

    println!("cargo:rerun-if-changed=src/proto/xc.proto");
    println!("cargo:rerun-if-changed=src/proto/index.proto");
    Ok(())
}
