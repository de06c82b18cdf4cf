// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Streaming decoder for the [OpenStreetMap PBF format](https://wiki.openstreetmap.org/wiki/PBF_Format).
//!
//! [Decoder] reads a `.osm.pbf` file and yields [Node], [Way] and [Relation]
//! values - wrapped in [Entity] - in source order, decoding blocks across a
//! pool of worker threads while preserving that order.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//!
//! let file = File::open("monaco-latest.osm.pbf").expect("failed to open monaco.osm.pbf");
//! let decoder = pbfstream::Decoder::new(file);
//! decoder.start(4).expect("failed to read the PBF header");
//!
//! let mut nodes = 0u64;
//! for entity in &decoder {
//!     if let pbfstream::Entity::Node(_) = entity.expect("failed to decode entity") {
//!         nodes += 1;
//!     }
//! }
//! println!("found {nodes} nodes");
//! ```

mod decode;
mod decoder;
mod entity;
mod error;
mod frame;
mod header;
mod pipeline;
mod proto;

pub use decoder::{Decoder, Entities};
pub use entity::{Entity, Info, Member, MemberKind, Node, Relation, Way};
pub use error::{Error, Result};
pub use frame::DEFAULT_BUFFER_SIZE;
