// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Compiles the OSM PBF `.proto` schema into Rust bindings at build time.
//!
//! The generated modules (`fileformat`, `osmformat`) are pulled into the
//! crate from `src/proto/mod.rs` via `include!`. Nothing here is specific to
//! OSM beyond pointing `protobuf-codegen` at `proto/*.proto`.

fn main() {
    protobuf_codegen::Codegen::new()
        .pure()
        .includes(["proto"])
        .input("proto/fileformat.proto")
        .input("proto/osmformat.proto")
        .cargo_out_dir("protos")
        .run_from_script();
}
