//! Build script generating the tonic client and server for `ferry.v1.Builds`.
//!
//! Messages are declared by hand in `src/lib.rs` with prost derives, so no
//! `.proto` file or `protoc` is needed.

fn main() {
    let builds = tonic_build::manual::Service::builder()
        .name("Builds")
        .package("ferry.v1")
        .method(
            tonic_build::manual::Method::builder()
                .name("create_log_stream")
                .route_name("CreateLogStream")
                .input_type("crate::v1::LogLineSubmission")
                .output_type("crate::v1::LogStreamSummary")
                .codec_path("tonic::codec::ProstCodec")
                .client_streaming()
                .build(),
        )
        .build();

    tonic_build::manual::Builder::new().compile(&[builds]);

    println!("cargo:rerun-if-changed=build.rs");
}
