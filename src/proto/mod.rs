// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Generated Protocol Buffers bindings for the OSM PBF schema.
//!
//! The actual message structs are produced by `build.rs` from
//! `proto/fileformat.proto` and `proto/osmformat.proto` via `protobuf-codegen`
//! and pulled in here with `include!`. Nothing downstream of this module
//! should depend on how the bindings were generated.

pub mod fileformat {
    include!(concat!(env!("OUT_DIR"), "/protos/fileformat.rs"));
}

pub mod osmformat {
    include!(concat!(env!("OUT_DIR"), "/protos/osmformat.rs"));
}
