fn main() -> Result<(), Box<dyn std::error::Error>> {
    // List of proto files containing a service definition
    let proto_files = &["proto/echo.proto", "proto/greeter.proto"];

    // Name of the folder containing the proto definitions
    let proto_folder = "proto";

    println!("cargo:rerun-if-changed={proto_folder}");

    let file_descriptors = protox::compile(proto_files, [proto_folder])?;

    tonic_prost_build::configure()
        .build_client(false)
        .compile_fds(file_descriptors)?;

    Ok(())
}
