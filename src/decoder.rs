// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! The public streaming API (§6): [Decoder] wraps a byte source, validates
//! the file's header synchronously in [Decoder::start], then hands
//! decoded entities off a background pipeline through [Decoder::next].

use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use crossbeam_channel::Receiver;

use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::frame::{decompress_blob, FrameReader, DEFAULT_BUFFER_SIZE};
use crate::header::validate_header_block;
use crate::pipeline::{Item, Pipeline};

/// Streams [Entity] values out of an OSM PBF file (§2, §6).
///
/// `next` takes `&self`, not `&mut self`: several consumers may pull from
/// the same `Decoder` concurrently (§5 "Consumer model"), each getting a
/// distinct subset of entities in producer order and, if decoding ever
/// fails, whichever one dequeues it sees the terminal [Error] (§4.5).
///
/// The receiving end of the serializer queue is cloned out of the
/// [Pipeline] into `output` once at `start` time, so `next` never blocks
/// while holding a lock - `crossbeam_channel::Receiver::recv` is already
/// safe to call from many threads against the same channel.
pub struct Decoder<R> {
    reader: Mutex<Option<R>>,
    buffer_size: AtomicUsize,
    pipeline: Mutex<Option<Pipeline>>,
    output: OnceLock<Receiver<Item>>,
}

impl<R> Decoder<R>
where
    R: Read + Send + 'static,
{
    /// Wraps `reader`. Nothing is read until [Decoder::start] is called.
    pub fn new(reader: R) -> Self {
        Self {
            reader: Mutex::new(Some(reader)),
            buffer_size: AtomicUsize::new(DEFAULT_BUFFER_SIZE),
            pipeline: Mutex::new(None),
            output: OnceLock::new(),
        }
    }

    /// Overrides the initial capacity of the scratch buffers each worker
    /// and the frame reader allocate (§5 "Resource policy"). Has no effect
    /// once [Decoder::start] has been called.
    pub fn set_buffer_size(&self, size: usize) {
        self.buffer_size.store(size.max(1), Ordering::Relaxed);
    }

    /// Reads and validates the leading `OSMHeader` frame synchronously, then
    /// spawns the background pipeline with `n_workers` decoder threads
    /// (clamped to at least 1). Must be called exactly once, before the
    /// first [Decoder::next].
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub fn start(&self, n_workers: usize) -> Result<()> {
        let reader = self
            .reader
            .lock()
            .unwrap()
            .take()
            .expect("Decoder::start called more than once");
        let buffer_size = self.buffer_size.load(Ordering::Relaxed);

        let mut frames = FrameReader::new(reader, buffer_size);
        let header_frame = frames.read_frame()?.ok_or(Error::Truncated)?;
        if header_frame.blob_type != "OSMHeader" {
            return Err(Error::UnexpectedBlobType {
                got: header_frame.blob_type,
                expected: "OSMHeader",
            });
        }

        let mut scratch = Vec::new();
        decompress_blob(&header_frame.blob, &mut scratch)?;
        validate_header_block(&scratch)?;

        let reader = frames.into_inner();
        let pipeline = Pipeline::start(reader, n_workers, buffer_size);
        self.output
            .set(pipeline.output.clone())
            .unwrap_or_else(|_| panic!("Decoder::start called more than once"));
        *self.pipeline.lock().unwrap() = Some(pipeline);

        Ok(())
    }

    /// Pulls the next decoded entity.
    ///
    /// Returns `None` once the stream is exhausted. If decoding fails, the
    /// failing call returns `Some(Err(..))` exactly once - whichever
    /// concurrent caller happens to dequeue it - and the queue is then
    /// closed, so every later call (from any consumer) returns `None`
    /// rather than the error again (§4.5 "sticky termination").
    ///
    /// # Panics
    ///
    /// Panics if called before [Decoder::start].
    pub fn next(&self) -> Option<Result<Entity>> {
        let output = self
            .output
            .get()
            .expect("Decoder::next called before Decoder::start");

        match output.recv() {
            Ok(Item::Entity(entity)) => Some(Ok(entity)),
            Ok(Item::Error(e)) => Some(Err(e)),
            Err(_) => None,
        }
    }

    /// Returns an [Iterator] adapter borrowing this decoder, for ergonomic
    /// `for`-loop consumption.
    pub fn entities(&self) -> Entities<'_, R> {
        Entities { decoder: self }
    }
}

/// [Iterator] adapter over a borrowed [Decoder], yielding `Result<Entity>`.
pub struct Entities<'a, R> {
    decoder: &'a Decoder<R>,
}

impl<R> Iterator for Entities<'_, R>
where
    R: Read + Send + 'static,
{
    type Item = Result<Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next()
    }
}

impl<'a, R> IntoIterator for &'a Decoder<R>
where
    R: Read + Send + 'static,
{
    type Item = Result<Entity>;
    type IntoIter = Entities<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use protobuf::Message;

    use super::*;
    use crate::entity::MemberKind;
    use crate::proto::fileformat::{Blob, BlobHeader};
    use crate::proto::osmformat::{DenseNodes, HeaderBlock, PrimitiveBlock, PrimitiveGroup, StringTable};

    fn write_frame(out: &mut Vec<u8>, blob_type: &str, payload: &[u8]) {
        let mut blob = Blob::new();
        blob.set_raw(payload.to_vec());
        let blob_bytes = blob.write_to_bytes().unwrap();

        let mut header = BlobHeader::new();
        header.set_type(blob_type.to_string());
        header.set_datasize(blob_bytes.len() as i32);
        let header_bytes = header.write_to_bytes().unwrap();

        out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(&blob_bytes);
    }

    fn synthetic_file() -> Vec<u8> {
        let header_block = HeaderBlock::new();
        let header_payload = header_block.write_to_bytes().unwrap();

        let mut stringtable = StringTable::new();
        stringtable.s = vec![b"".to_vec(), b"highway".to_vec(), b"residential".to_vec()];

        let mut dense = DenseNodes::new();
        dense.id = vec![1, 1]; // deltas: 1, 2
        dense.lat = vec![1_000_000, 0];
        dense.lon = vec![2_000_000, 0];
        dense.keys_vals = vec![1, 2, 0, 0];

        let mut group = PrimitiveGroup::new();
        group.dense = protobuf::MessageField::some(dense);

        let mut block = PrimitiveBlock::new();
        block.stringtable = stringtable;
        block.primitivegroup = vec![group];
        let data_payload = block.write_to_bytes().unwrap();

        let mut out = Vec::new();
        write_frame(&mut out, "OSMHeader", &header_payload);
        write_frame(&mut out, "OSMData", &data_payload);
        out
    }

    #[test]
    fn decodes_a_synthetic_file_end_to_end() {
        let decoder = Decoder::new(Cursor::new(synthetic_file()));
        decoder.start(2).unwrap();

        let entities: Vec<Entity> = decoder.entities().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(entities.len(), 2);

        let (id0, kind0) = entities[0].id_and_kind();
        assert_eq!(id0, 1);
        assert_eq!(kind0, MemberKind::Node);
        match &entities[0] {
            Entity::Node(n) => {
                assert!((n.lat - 0.1).abs() < 1e-9);
                assert!((n.lon - 0.2).abs() < 1e-9);
                assert_eq!(n.tags.get("highway").unwrap(), "residential");
            }
            other => panic!("expected a node, got {other:?}"),
        }

        let (id1, _) = entities[1].id_and_kind();
        assert_eq!(id1, 2);

        assert!(decoder.next().is_none());
    }

    #[test]
    fn rejects_unknown_required_feature_before_spawning_the_pipeline() {
        let mut header_block = HeaderBlock::new();
        header_block.required_features = vec!["HistoricalInformation".to_string()];
        let header_payload = header_block.write_to_bytes().unwrap();

        let mut out = Vec::new();
        write_frame(&mut out, "OSMHeader", &header_payload);

        let decoder = Decoder::new(Cursor::new(out));
        match decoder.start(1) {
            Err(Error::UnsupportedFeatures(missing)) => {
                assert_eq!(missing, vec!["HistoricalInformation".to_string()]);
            }
            other => panic!("expected UnsupportedFeatures, got {other:?}"),
        }
    }

    #[test]
    fn a_non_osmdata_frame_after_the_header_terminates_the_stream() {
        let header_block = HeaderBlock::new();
        let header_payload = header_block.write_to_bytes().unwrap();

        let mut out = Vec::new();
        write_frame(&mut out, "OSMHeader", &header_payload);
        write_frame(&mut out, "SomethingElse", b"");

        let decoder = Decoder::new(Cursor::new(out));
        decoder.start(1).unwrap();

        match decoder.next() {
            Some(Err(Error::UnexpectedBlobType { got, expected })) => {
                assert_eq!(got, "SomethingElse");
                assert_eq!(expected, "OSMData");
            }
            other => panic!("expected UnexpectedBlobType, got {other:?}"),
        }

        // Sticky: the error is delivered once, then the stream ends for good.
        assert!(decoder.next().is_none());
        assert!(decoder.next().is_none());
    }

    fn node_block(id: i64) -> Vec<u8> {
        let mut dense = DenseNodes::new();
        dense.id = vec![id];
        dense.lat = vec![0];
        dense.lon = vec![0];

        let mut group = PrimitiveGroup::new();
        group.dense = protobuf::MessageField::some(dense);

        let mut block = PrimitiveBlock::new();
        block.primitivegroup = vec![group];
        block.write_to_bytes().unwrap()
    }

    fn multi_block_file(ids: &[i64]) -> Vec<u8> {
        let header_payload = HeaderBlock::new().write_to_bytes().unwrap();
        let mut out = Vec::new();
        write_frame(&mut out, "OSMHeader", &header_payload);
        for &id in ids {
            write_frame(&mut out, "OSMData", &node_block(id));
        }
        out
    }

    #[test]
    fn order_preservation_across_worker_counts() {
        let ids: Vec<i64> = (0..20).collect();
        let expected = ids.clone();

        for n_workers in [1usize, 2, 3, 8, 64] {
            let decoder = Decoder::new(Cursor::new(multi_block_file(&ids)));
            decoder.start(n_workers).unwrap();
            let got: Vec<i64> = decoder
                .entities()
                .collect::<Result<Vec<_>>>()
                .unwrap()
                .iter()
                .map(|e| e.id_and_kind().0)
                .collect();
            assert_eq!(got, expected, "order diverged at n_workers={n_workers}");
        }
    }

    #[test]
    fn empty_osmdata_block_yields_nothing_then_end_of_stream() {
        let header_payload = HeaderBlock::new().write_to_bytes().unwrap();
        let mut out = Vec::new();
        write_frame(&mut out, "OSMHeader", &header_payload);
        write_frame(&mut out, "OSMData", &PrimitiveBlock::new().write_to_bytes().unwrap());

        let decoder = Decoder::new(Cursor::new(out));
        decoder.start(2).unwrap();
        assert!(decoder.next().is_none());
    }

    #[test]
    fn way_refs_and_relation_members_scenario() {
        use protobuf::EnumOrUnknown;

        use crate::proto::osmformat::relation::MemberType;
        use crate::proto::osmformat::{Relation, StringTable, Way};

        let mut stringtable = StringTable::new();
        stringtable.s = vec![b"".to_vec(), b"outer".to_vec()];

        let mut way = Way::new();
        way.set_id(1);
        way.refs = vec![100, 1, 1, -50]; // -> 100, 101, 102, 52

        let mut relation = Relation::new();
        relation.set_id(2);
        relation.memids = vec![5, 10, -3]; // -> 5, 15, 12
        relation.types = vec![
            EnumOrUnknown::new(MemberType::NODE),
            EnumOrUnknown::new(MemberType::WAY),
            EnumOrUnknown::new(MemberType::RELATION),
        ];
        relation.roles_sid = vec![1, 1, 1];

        let mut group = PrimitiveGroup::new();
        group.ways = vec![way];
        group.relations = vec![relation];

        let mut block = PrimitiveBlock::new();
        block.stringtable = stringtable;
        block.primitivegroup = vec![group];

        let header_payload = HeaderBlock::new().write_to_bytes().unwrap();
        let mut out = Vec::new();
        write_frame(&mut out, "OSMHeader", &header_payload);
        write_frame(&mut out, "OSMData", &block.write_to_bytes().unwrap());

        let decoder = Decoder::new(Cursor::new(out));
        decoder.start(1).unwrap();
        let entities: Vec<Entity> = decoder.entities().collect::<Result<Vec<_>>>().unwrap();

        match &entities[0] {
            Entity::Way(w) => assert_eq!(w.nodes, vec![100, 101, 102, 52]),
            other => panic!("expected a way, got {other:?}"),
        }
        match &entities[1] {
            Entity::Relation(r) => {
                let ids_and_kinds: Vec<(i64, MemberKind)> =
                    r.members.iter().map(|m| (m.id, m.kind)).collect();
                assert_eq!(
                    ids_and_kinds,
                    vec![
                        (5, MemberKind::Node),
                        (15, MemberKind::Way),
                        (12, MemberKind::Relation),
                    ]
                );
            }
            other => panic!("expected a relation, got {other:?}"),
        }
    }

    #[test]
    fn truncated_input_is_reported_via_next() {
        // Header frame plus a length prefix cut short mid-prefix.
        let header_payload = HeaderBlock::new().write_to_bytes().unwrap();
        let mut out = Vec::new();
        write_frame(&mut out, "OSMHeader", &header_payload);
        out.extend_from_slice(&[0u8, 0, 0]); // 3 of 4 length-prefix bytes

        let decoder = Decoder::new(Cursor::new(out));
        decoder.start(1).unwrap();
        assert!(matches!(decoder.next(), Some(Err(Error::Truncated))));
        assert!(decoder.next().is_none());
    }
}
