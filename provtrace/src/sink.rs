/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Where records go. The supervisor calls [`EventSink::accept`] from its own
//! thread, once per record, in the order the side effects happened.

use std::io;
use std::io::Write;

use chrono::Utc;

use crate::record::ProcessRecord;
use crate::record::Record;
use crate::record::RecordKind;
use crate::record::process_records;

/// Consumer of the record stream. An implementation may buffer, but must not
/// reorder or drop records.
pub trait EventSink {
    /// Accepts the next record.
    fn accept(&mut self, record: Record) -> io::Result<()>;

    /// Called once after the last record.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: EventSink + ?Sized> EventSink for &mut T {
    fn accept(&mut self, record: Record) -> io::Result<()> {
        (**self).accept(record)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

impl<T: EventSink + ?Sized> EventSink for Box<T> {
    fn accept(&mut self, record: Record) -> io::Result<()> {
        (**self).accept(record)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default, Clone)]
pub struct Recorder {
    records: Vec<Record>,
}

impl Recorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// The records accepted so far.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Just the kinds, which is what tests usually compare.
    pub fn kinds(&self) -> impl Iterator<Item = &RecordKind> {
        self.records.iter().map(|r| &r.kind)
    }

    /// The records grouped by process.
    pub fn processes(&self) -> Vec<ProcessRecord> {
        process_records(&self.records)
    }

    /// Consumes the recorder.
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

impl EventSink for Recorder {
    fn accept(&mut self, record: Record) -> io::Result<()> {
        self.records.push(record);
        Ok(())
    }
}

/// Writes each record as one line of JSON.
pub struct JsonLines<W> {
    writer: W,
}

impl<W: Write> JsonLines<W> {
    /// Wraps a writer. Wrap it in a `BufWriter` for files.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Returns the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for JsonLines<W> {
    fn accept(&mut self, record: Record) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Stamps records with their position and time before handing them to the
/// sink. The first error of the sink is kept; later records are counted and
/// dropped because the stream would have a hole in it anyway.
pub(crate) struct Emitter<S> {
    sink: S,
    next_seq: u64,
    error: Option<io::Error>,
    dropped: u64,
}

impl<S: EventSink> Emitter<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            next_seq: 0,
            error: None,
            dropped: 0,
        }
    }

    pub fn emit(&mut self, kind: RecordKind) {
        if self.error.is_some() {
            self.dropped += 1;
            return;
        }
        let record = Record {
            seq: self.next_seq,
            time: Utc::now(),
            kind,
        };
        self.next_seq += 1;
        tracing::trace!("emit #{}: {:?}", record.seq, record.kind);
        if let Err(err) = self.sink.accept(record) {
            tracing::error!(
                "event sink failed at record #{}: {}; dropping the rest",
                self.next_seq - 1,
                err
            );
            self.error = Some(err);
        }
    }

    /// Flushes the sink and gives it back, with the first error and the
    /// number of records dropped after it, if any.
    pub fn finish(mut self) -> (S, Option<(io::Error, u64)>) {
        if self.error.is_none() {
            if let Err(err) = self.sink.flush() {
                tracing::error!("event sink failed to flush: {}", err);
                self.error = Some(err);
            }
        }
        if self.dropped > 0 {
            tracing::error!("{} records were dropped", self.dropped);
        }
        let dropped = self.dropped;
        (self.sink, self.error.map(|err| (err, dropped)))
    }
}
