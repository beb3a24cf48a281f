use std::mem;

use uuid::Uuid;

use super::event::PacketEvent;

// Bounded group of events, the granularity of the segment writer.
#[derive(Debug, Default)]
pub struct Chunk {
    events: Vec<PacketEvent>,
    bytes: usize,
}

impl Chunk {
    fn with_capacity(n: usize) -> Self {
        Chunk {
            events: Vec::with_capacity(n),
            bytes: 0,
        }
    }

    fn push(&mut self, event: PacketEvent) {
        self.bytes += event.size();
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn size(&self) -> usize {
        self.bytes
    }

    pub fn first_id(&self) -> Option<u64> {
        self.events.first().map(|e| e.id)
    }

    pub fn last_id(&self) -> Option<u64> {
        self.events.last().map(|e| e.id)
    }

    pub fn events(&self) -> &[PacketEvent] {
        &self.events
    }
}

// Byte-bounded, uniquely identified batch of chunks. Closed segments are
// immutable and handed to the consumer as a whole.
#[derive(Debug)]
pub struct Segment {
    id: Uuid,
    chunks: Vec<Chunk>,
    bytes: usize,
    events: usize,
}

impl Segment {
    pub fn new() -> Self {
        Segment {
            id: Uuid::new_v4(),
            chunks: vec![],
            bytes: 0,
            events: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn size(&self) -> usize {
        self.bytes
    }

    pub fn events(&self) -> usize {
        self.events
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    fn append(&mut self, chunk: Chunk) {
        self.bytes += chunk.size();
        self.events += chunk.len();
        self.chunks.push(chunk);
    }
}

impl Default for Segment {
    fn default() -> Self {
        Self::new()
    }
}

// Fills a segment chunk by chunk. `write` reports false once the segment
// cannot take the sealed chunk; the caller ships the segment and calls
// `attach` on a fresh one to carry the chunk over.
pub struct SegmentWriter {
    max_events_per_chunk: usize,
    max_segment_size: usize,
    chunk: Chunk,
    pending: Option<Chunk>,
}

impl SegmentWriter {
    pub fn new(max_events_per_chunk: usize, max_segment_size: usize) -> Self {
        SegmentWriter {
            max_events_per_chunk,
            max_segment_size,
            chunk: Chunk::with_capacity(max_events_per_chunk),
            pending: None,
        }
    }

    pub fn write(&mut self, segment: &mut Segment, event: PacketEvent) -> bool {
        self.chunk.push(event);
        if self.chunk.len() < self.max_events_per_chunk {
            return true;
        }
        let sealed = mem::replace(&mut self.chunk, Chunk::with_capacity(self.max_events_per_chunk));
        self.store(segment, sealed)
    }

    // Seals the partial chunk into the segment. False means the segment is
    // full; retry with a fresh segment after `attach`.
    pub fn flush(&mut self, segment: &mut Segment) -> bool {
        if let Some(chunk) = self.pending.take() {
            if !self.store(segment, chunk) {
                return false;
            }
        }
        if self.chunk.is_empty() {
            return true;
        }
        let sealed = mem::replace(&mut self.chunk, Chunk::with_capacity(self.max_events_per_chunk));
        self.store(segment, sealed)
    }

    pub fn attach(&mut self, segment: &mut Segment) {
        if let Some(chunk) = self.pending.take() {
            segment.append(chunk);
        }
    }

    fn store(&mut self, segment: &mut Segment, chunk: Chunk) -> bool {
        if !segment.is_empty() && segment.size() + chunk.size() > self.max_segment_size {
            self.pending = Some(chunk);
            return false;
        }
        segment.append(chunk);
        true
    }
}
