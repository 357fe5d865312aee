// ABOUTME: Build script for generating Rust code from the cble proto files.
// ABOUTME: Uses tonic-build with a vendored protoc to compile protobuf definitions.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the vendored protoc so builds do not depend on a system install
    let protoc = protoc_bin_vendored::protoc_bin_path()?;
    std::env::set_var("PROTOC", protoc);
    let include_path = protoc_bin_vendored::include_path()?;

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[
                "proto-src/common.proto",
                "proto-src/cble.proto",
                "proto-src/provider.proto",
            ],
            &[
                "proto-src",
                include_path.to_str().ok_or("invalid protoc include path")?,
            ],
        )?;

    println!("cargo:rerun-if-changed=proto-src");

    Ok(())
}
