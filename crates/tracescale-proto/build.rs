fn main() {
    // prost-build locates protoc through the PROTOC variable.
    let protoc = protoc_bin_vendored::protoc_bin_path().expect("vendored protoc binary");
    // SAFETY: build scripts are single-threaded.
    unsafe {
        std::env::set_var("PROTOC", protoc);
    }

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[
                "proto/opentelemetry/proto/common/v1/common.proto",
                "proto/opentelemetry/proto/resource/v1/resource.proto",
                "proto/opentelemetry/proto/trace/v1/trace.proto",
                "proto/opentelemetry/proto/collector/trace/v1/trace_service.proto",
                "proto/tracescale/sampler/v1/sampler.proto",
            ],
            &["proto"],
        )
        .expect("compile protobuf definitions");

    println!("cargo:rerun-if-changed=proto");
}
