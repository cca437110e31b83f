//! Sharded connection index
//!
//! Flows are keyed by their forward 4-tuple and distributed over shards by
//! hashing the unordered endpoint pair, so both directions of a session land
//! in the same shard and appends to unrelated connections rarely contend.

use super::policy::{ClosePolicy, FlowState, NeverClose};
use super::{Connection, Direction, FourTuple, Packet, SegmentRecord};
use crate::config::{OverlapPolicy, ReassemblyConfig};
use crate::core::drivers::stream::StreamLayer;
use crate::core::layer::Layer;
use crate::error::ReassemblyError;
use crossbeam::channel;
use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};
use xxhash_rust::xxh3::xxh3_64;

/// Bound on packets queued per worker during parallel ingest
const WORKER_QUEUE_DEPTH: usize = 1024;

#[derive(Debug)]
struct ConnectionEntry {
    connection: Connection,
    /// Sorted by sequence relative to the ISN; equal keys keep arrival order
    segments: Vec<SegmentRecord>,
    payload_bytes: u64,
    closed: bool,
}

#[derive(Debug)]
struct Flow {
    forward: u64,
    reverse: Option<u64>,
    state: FlowState,
}

#[derive(Debug, Default)]
struct Shard {
    /// Open flows by forward tuple
    flows: HashMap<FourTuple, Flow>,
    /// Every connection ever created in this shard, open or closed
    connections: HashMap<u64, ConnectionEntry>,
}

/// Result of feeding one packet to the reassembler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    pub connection_id: u64,
    pub direction: Direction,
    /// A new connection (either direction) was created for this packet
    pub created: bool,
    /// The flow was closed by the close policy after this packet
    pub closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReassemblyStats {
    pub connections: usize,
    pub open_connections: usize,
    pub segments: usize,
    pub payload_bytes: u64,
}

/// Groups packets into connections and keeps per-direction segment tables
pub struct StreamReassembler {
    shards: Vec<CachePadded<Mutex<Shard>>>,
    next_id: AtomicU64,
    close_policy: Box<dyn ClosePolicy>,
    overlap_policy: OverlapPolicy,
}

impl StreamReassembler {
    pub fn new(config: &ReassemblyConfig) -> Self {
        let shards = (0..config.shards.max(1))
            .map(|_| CachePadded::new(Mutex::new(Shard::default())))
            .collect();

        StreamReassembler {
            shards,
            next_id: AtomicU64::new(1),
            close_policy: Box::new(NeverClose),
            overlap_policy: config.overlap_policy,
        }
    }

    /// Replace the default [`NeverClose`] policy
    pub fn with_close_policy<P: ClosePolicy + 'static>(mut self, policy: P) -> Self {
        self.close_policy = Box::new(policy);
        self
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn overlap_policy(&self) -> OverlapPolicy {
        self.overlap_policy
    }

    /// Shard owning a tuple; identical for a tuple and its reverse
    pub fn shard_for(&self, tuple: &FourTuple) -> usize {
        (xxh3_64(&tuple.unordered_key()) % self.shards.len() as u64) as usize
    }

    /// Feed one packet
    ///
    /// Exact tuple match selects the forward direction of an open flow, a
    /// reversed match selects (or creates) its reverse direction, anything
    /// else starts a new flow. Payload-carrying packets append a segment.
    pub fn ingest(&self, packet: &Packet) -> IngestOutcome {
        let tuple = packet.tuple();
        let mut shard = self.shards[self.shard_for(&tuple)].lock();
        self.ingest_locked(&mut shard, packet)
    }

    fn ingest_locked(&self, shard: &mut Shard, packet: &Packet) -> IngestOutcome {
        let tuple = packet.tuple();
        let mut created = false;

        let (key, direction) = if shard.flows.contains_key(&tuple) {
            (tuple, Direction::Forward)
        } else if shard.flows.contains_key(&tuple.reversed()) {
            (tuple.reversed(), Direction::Reverse)
        } else {
            let id = self.allocate(shard, packet, Direction::Forward, None);
            shard.flows.insert(
                tuple,
                Flow {
                    forward: id,
                    reverse: None,
                    state: FlowState::default(),
                },
            );
            created = true;
            (tuple, Direction::Forward)
        };

        let (forward, reverse) = {
            let flow = &shard.flows[&key];
            (flow.forward, flow.reverse)
        };

        let connection_id = match (direction, reverse) {
            (Direction::Forward, _) => forward,
            (Direction::Reverse, Some(id)) => id,
            (Direction::Reverse, None) => {
                let id = self.allocate(shard, packet, Direction::Reverse, Some(forward));
                if let Some(entry) = shard.connections.get_mut(&forward) {
                    entry.connection.peer = Some(id);
                }
                if let Some(flow) = shard.flows.get_mut(&key) {
                    flow.reverse = Some(id);
                }
                created = true;
                id
            }
        };

        if packet.payload_len > 0 {
            if let Some(entry) = shard.connections.get_mut(&connection_id) {
                let record = SegmentRecord {
                    connection_id,
                    packet_id: packet.packet_id,
                    seq: packet.seq,
                    length: packet.payload_len,
                    packet_offset: packet.payload_offset,
                };
                let isn = entry.connection.isn;
                let rel = record.relative_seq(isn);
                let at = entry.segments.partition_point(|s| s.relative_seq(isn) <= rel);
                entry.segments.insert(at, record);
                entry.payload_bytes += u64::from(packet.payload_len);
            }
        }

        let mut closed = false;
        if let Some(flow) = shard.flows.get_mut(&key) {
            flow.state.packets += 1;
            if packet.flags.fin {
                match direction {
                    Direction::Forward => flow.state.forward_fin = true,
                    Direction::Reverse => flow.state.reverse_fin = true,
                }
            }
            if packet.flags.rst {
                flow.state.reset = true;
            }
            closed = self.close_policy.should_close(&flow.state);
        }
        if closed {
            close_flow(shard, &key);
        }

        IngestOutcome {
            connection_id,
            direction,
            created,
            closed,
        }
    }

    fn allocate(
        &self,
        shard: &mut Shard,
        packet: &Packet,
        direction: Direction,
        peer: Option<u64>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let connection = Connection {
            id,
            src_ip: packet.src.ip,
            src_port: packet.src.port,
            dst_ip: packet.dst.ip,
            dst_port: packet.dst.port,
            isn: packet.seq,
            direction,
            peer,
        };
        debug!(
            "New connection {} {} (isn {})",
            id,
            connection.name(),
            connection.isn
        );
        shard.connections.insert(
            id,
            ConnectionEntry {
                connection,
                segments: Vec::new(),
                payload_bytes: 0,
                closed: false,
            },
        );
        id
    }

    /// Feed packets from worker threads, one worker per group of shards
    ///
    /// Packets of the same flow always go to the same worker in input order,
    /// so per-connection segment order matches [`ingest`](Self::ingest).
    /// Connection ids may be assigned in a different order. Returns the
    /// number of packets ingested.
    pub fn ingest_parallel<I>(&self, packets: I, workers: usize) -> usize
    where
        I: IntoIterator<Item = Packet>,
    {
        let workers = workers.clamp(1, self.shards.len());

        let result = crossbeam::thread::scope(|scope| {
            let mut senders = Vec::with_capacity(workers);
            for _ in 0..workers {
                let (tx, rx) = channel::bounded::<Packet>(WORKER_QUEUE_DEPTH);
                senders.push(tx);
                scope.spawn(move |_| {
                    for packet in rx.iter() {
                        self.ingest(&packet);
                    }
                });
            }

            let mut count = 0usize;
            for packet in packets {
                let worker = self.shard_for(&packet.tuple()) % workers;
                if senders[worker].send(packet).is_err() {
                    break;
                }
                count += 1;
            }
            drop(senders);
            count
        });

        match result {
            Ok(count) => {
                debug!("Ingested {} packets on {} workers", count, workers);
                count
            }
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Close every open flow (end of capture); returns how many were closed
    pub fn finish(&self) -> usize {
        let mut closed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            let keys: Vec<FourTuple> = shard.flows.keys().copied().collect();
            for key in keys {
                close_flow(&mut shard, &key);
                closed += 1;
            }
        }
        info!("Closed {} flows at end of capture", closed);
        closed
    }

    fn with_entry<T>(
        &self,
        id: u64,
        f: impl FnOnce(&ConnectionEntry) -> T,
    ) -> Result<T, ReassemblyError> {
        for shard in &self.shards {
            let shard = shard.lock();
            if let Some(entry) = shard.connections.get(&id) {
                return Ok(f(entry));
            }
        }
        Err(ReassemblyError::UnknownConnection { id })
    }

    pub fn connection(&self, id: u64) -> Result<Connection, ReassemblyError> {
        self.with_entry(id, |entry| entry.connection.clone())
    }

    /// Segment table of one direction in sequence order
    pub fn segments(&self, id: u64) -> Result<Vec<SegmentRecord>, ReassemblyError> {
        self.with_entry(id, |entry| entry.segments.clone())
    }

    pub fn is_closed(&self, id: u64) -> Result<bool, ReassemblyError> {
        self.with_entry(id, |entry| entry.closed)
    }

    /// All connections ordered by id
    pub fn connections(&self) -> Vec<Connection> {
        let mut all: Vec<Connection> = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .lock()
                    .connections
                    .values()
                    .map(|entry| entry.connection.clone())
                    .collect::<Vec<_>>()
            })
            .collect();
        all.sort_by_key(|c| c.id);
        all
    }

    pub fn stats(&self) -> ReassemblyStats {
        let mut stats = ReassemblyStats::default();
        for shard in &self.shards {
            let shard = shard.lock();
            for entry in shard.connections.values() {
                stats.connections += 1;
                if !entry.closed {
                    stats.open_connections += 1;
                }
                stats.segments += entry.segments.len();
                stats.payload_bytes += entry.payload_bytes;
            }
        }
        stats
    }

    /// Open one direction as a stream over the capture it was built from
    pub fn open_stream(
        &self,
        id: u64,
        capture: Box<dyn Layer>,
    ) -> Result<StreamLayer, ReassemblyError> {
        let (connection, segments) =
            self.with_entry(id, |entry| (entry.connection.clone(), entry.segments.clone()))?;
        Ok(StreamLayer::single(
            &connection,
            &segments,
            capture,
            self.overlap_policy,
        ))
    }

    /// Open several directions laid end to end in packet order
    pub fn open_combined(
        &self,
        ids: &[u64],
        capture: Box<dyn Layer>,
    ) -> Result<StreamLayer, ReassemblyError> {
        let mut segments = Vec::new();
        for &id in ids {
            segments.extend(self.segments(id)?);
        }
        Ok(StreamLayer::combined(segments, capture, self.overlap_policy))
    }
}

impl std::fmt::Debug for StreamReassembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReassembler")
            .field("shards", &self.shards.len())
            .field("close_policy", &self.close_policy)
            .field("overlap_policy", &self.overlap_policy)
            .finish()
    }
}

/// Forget a flow's tuple mapping and mark both directions closed
fn close_flow(shard: &mut Shard, key: &FourTuple) {
    if let Some(flow) = shard.flows.remove(key) {
        for id in std::iter::once(flow.forward).chain(flow.reverse) {
            if let Some(entry) = shard.connections.get_mut(&id) {
                entry.closed = true;
            }
        }
        debug!("Closed flow {} -> {}", key.src, key.dst);
    }
}
