// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! §4.4/§4.5: the dispatch ring, worker pool, collector and serializer queue.
//!
//! Shape follows a standard parse/dispatch/worker-pool/ordered-collect
//! pipeline over bounded channels (see `DESIGN.md` for the transcoder this
//! was grounded on), specialized so dispatch and collection share the same
//! round-robin cursor - the trick that makes parallel decode reorder-free
//! (§9 "Parallel-with-order").

use std::io::Read;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, warn};

use crate::entity::Entity;
use crate::error::Error;
use crate::frame::{decompress_blob, FrameReader, RawFrame};

/// Capacity of the serializer queue that feeds the public `next()` call.
/// Sized to amortize over a typical block's entity count (§4.5).
pub const SERIALIZER_QUEUE_CAPACITY: usize = 8000;

/// A job handed from the producer to a worker: one still-compressed blob, or
/// the terminal error that ends the stream.
enum Job {
    Blob(RawFrame),
    Err(Error),
}

/// A worker's result, handed to the collector in dispatch order.
enum Outcome {
    Entities(Vec<Entity>),
    Err(Error),
}

/// One item flowing out of the serializer queue: either a decoded entity or
/// the single terminal error that ends the stream. After the `Error` item is
/// delivered, the queue is closed, so every later `recv()` - from any
/// consumer - sees a clean end-of-stream rather than the error again (§4.5
/// "sticky termination").
pub enum Item {
    Entity(Entity),
    Error(Error),
}

/// Handle to a running pipeline: owns the producer/worker/collector threads
/// and the receiving end of the serializer queue.
pub struct Pipeline {
    pub output: Receiver<Item>,
    threads: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Spawns the producer, `n_workers` decoder workers, and the collector,
    /// reading data frames (the header frame must already have been
    /// consumed and validated by the caller) from `reader`.
    pub fn start<R>(reader: R, n_workers: usize, buffer_size: usize) -> Self
    where
        R: Read + Send + 'static,
    {
        let n_workers = n_workers.max(1);

        let mut in_senders = Vec::with_capacity(n_workers);
        let mut in_receivers = Vec::with_capacity(n_workers);
        let mut out_senders = Vec::with_capacity(n_workers);
        let mut out_receivers = Vec::with_capacity(n_workers);

        for _ in 0..n_workers {
            let (tx, rx) = bounded::<Job>(1);
            in_senders.push(tx);
            in_receivers.push(rx);

            let (tx, rx) = bounded::<Outcome>(1);
            out_senders.push(tx);
            out_receivers.push(rx);
        }

        let (item_tx, item_rx) = bounded::<Item>(SERIALIZER_QUEUE_CAPACITY);

        let mut threads = Vec::with_capacity(n_workers + 2);

        for (i, (in_rx, out_tx)) in in_receivers.into_iter().zip(out_senders).enumerate() {
            threads.push(
                thread::Builder::new()
                    .name(format!("pbfstream-worker-{i}"))
                    .spawn(move || worker_loop(i, in_rx, out_tx))
                    .expect("failed to spawn pbfstream worker thread"),
            );
        }

        threads.push(
            thread::Builder::new()
                .name("pbfstream-producer".into())
                .spawn(move || producer_loop(reader, buffer_size, in_senders))
                .expect("failed to spawn pbfstream producer thread"),
        );

        threads.push(
            thread::Builder::new()
                .name("pbfstream-collector".into())
                .spawn(move || collector_loop(out_receivers, item_tx))
                .expect("failed to spawn pbfstream collector thread"),
        );

        Self {
            output: item_rx,
            threads,
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // Dropping `output` (done by the field drop order before this runs,
        // since `output` is declared first) drops one handle to the
        // serializer queue; once every handle - including any clone a
        // `Decoder` keeps for itself - is gone, sends to it fail, which
        // unblocks the collector, which drops the `out[*]` receivers and
        // unblocks the workers, which drop the `in[*]` senders and unblock
        // the producer. Joining here just waits for that cascade so threads
        // don't outlive the Pipeline that owns them.
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Reads frames sequentially and dispatches them to `in[0], in[1], ...,
/// in[N-1], in[0], ...` in round-robin order (§4.4 "Producer").
fn producer_loop<R: Read>(reader: R, buffer_size: usize, in_senders: Vec<Sender<Job>>) {
    let n = in_senders.len();
    let mut frames = FrameReader::new(reader, buffer_size);
    let mut cursor = 0usize;

    loop {
        let job = match frames.read_frame() {
            Ok(None) => break,
            Ok(Some(frame)) if frame.blob_type == "OSMData" => Job::Blob(frame),
            Ok(Some(frame)) => Job::Err(Error::UnexpectedBlobType {
                got: frame.blob_type,
                expected: "OSMData",
            }),
            Err(e) => Job::Err(e),
        };

        let is_err = matches!(job, Job::Err(_));
        if in_senders[cursor].send(job).is_err() {
            // Every worker has hung up (e.g. the Decoder was dropped); stop.
            return;
        }
        if is_err {
            break;
        }
        cursor = (cursor + 1) % n;
    }

    // Closing every `in[i]` tells each worker its input is exhausted.
    drop(in_senders);
}

/// One decoder worker: pulls jobs from its bound `in[i]`, decodes, and
/// writes to its bound `out[i]` (§4.4).
fn worker_loop(index: usize, in_rx: Receiver<Job>, out_tx: Sender<Outcome>) {
    let mut scratch = Vec::new();

    for job in in_rx {
        let outcome = match job {
            Job::Err(e) => Outcome::Err(e),
            Job::Blob(frame) => match decompress_blob(&frame.blob, &mut scratch) {
                Ok(()) => match crate::decode::decode_primitive_block(&scratch) {
                    Ok(entities) => Outcome::Entities(entities),
                    Err(e) => Outcome::Err(e),
                },
                Err(e) => Outcome::Err(e),
            },
        };

        debug!("worker {index} finished a block");
        if out_tx.send(outcome).is_err() {
            return;
        }
    }
}

/// Drains `out[0], out[1], ..., out[N-1], out[0], ...` in round-robin order,
/// feeding decoded entities into the serializer queue and terminating on the
/// first error (§4.4 "Collector", §4.5 "Sticky termination").
fn collector_loop(out_receivers: Vec<Receiver<Outcome>>, item_tx: Sender<Item>) {
    let n = out_receivers.len();
    let mut cursor = 0usize;

    loop {
        let outcome = match out_receivers[cursor].recv() {
            Ok(outcome) => outcome,
            Err(_) => return, // every worker closed its out[i]; clean end-of-stream
        };

        match outcome {
            Outcome::Entities(entities) => {
                for entity in entities {
                    if item_tx.send(Item::Entity(entity)).is_err() {
                        return;
                    }
                }
            }
            Outcome::Err(e) => {
                warn!("pipeline terminating with error: {e}");
                let _ = item_tx.send(Item::Error(e));
                return; // dropping item_tx here closes the queue for good
            }
        }

        cursor = (cursor + 1) % n;
    }
}
