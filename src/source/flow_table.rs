use std::collections::HashMap;

use log::debug;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::common::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowEntry {
    pub bytes_seen: u64,
    pub last_seen: u64,
}

// What the cutoff accounting decided for a packet: drop it, or record it
// with the given network-layer length (trimmed when the flow would
// otherwise exceed the cutoff).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accounting {
    Drop,
    Recorded(u64),
}

// Bounded map of connection -> per-flow byte accounting. Memory stays
// bounded under both flash crowds and long-lived flows: inactive entries
// are swept on a capture-time interval and a uniformly random entry is
// evicted whenever the size reaches a nonzero multiple of `max_flows`.
pub struct FlowTable {
    flows: HashMap<Connection, FlowEntry>,
    cutoff: u64,
    max_flows: usize,
    max_age: u64,
    expire_interval: u64,
    last_expire: u64,
    rng: StdRng,
}

impl FlowTable {
    pub fn new(cutoff: u64, max_flows: usize, max_age: u64, expire_interval: u64) -> Self {
        assert!(max_flows > 0);
        FlowTable {
            flows: HashMap::new(),
            cutoff,
            max_flows,
            max_age,
            expire_interval,
            last_expire: 0,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn get_or_insert(&mut self, conn: Connection, ts: u64) -> &mut FlowEntry {
        self.flows
            .entry(conn)
            .and_modify(|e| e.last_seen = ts)
            .or_insert(FlowEntry {
                bytes_seen: 0,
                last_seen: ts,
            })
    }

    // True when the flow is already tracked and has reached its cutoff.
    // A hit refreshes last_seen, so a dropped packet still counts as
    // activity, same as the accounting path.
    pub fn at_cutoff(&mut self, conn: &Connection, ts: u64) -> bool {
        match self.flows.get_mut(conn) {
            Some(entry) => {
                entry.last_seen = ts;
                entry.bytes_seen == self.cutoff
            }
            None => false,
        }
    }

    pub fn account(
        &mut self,
        conn: &Connection,
        ts: u64,
        payload_size: u64,
        packet_size: u64,
    ) -> Accounting {
        let cutoff = self.cutoff;
        let entry = self.get_or_insert(*conn, ts);
        if entry.bytes_seen == cutoff {
            return Accounting::Drop;
        }
        if entry.bytes_seen + payload_size <= cutoff {
            entry.bytes_seen += payload_size;
            Accounting::Recorded(packet_size)
        } else {
            // Trim the last packet so that the flow fits exactly.
            let overshoot = entry.bytes_seen + payload_size - cutoff;
            entry.bytes_seen = cutoff;
            Accounting::Recorded(packet_size.saturating_sub(overshoot))
        }
    }

    // Sweeps inactive entries, at most once per expire interval of capture
    // time. Returns how many entries were removed.
    pub fn maybe_expire(&mut self, now: u64) -> usize {
        if self.last_expire == 0 {
            self.last_expire = now;
            return 0;
        }
        if now.saturating_sub(self.last_expire) <= self.expire_interval {
            return 0;
        }
        self.last_expire = now;
        let before = self.flows.len();
        let max_age = self.max_age;
        self.flows
            .retain(|_, entry| now.saturating_sub(entry.last_seen) <= max_age);
        let expired = before - self.flows.len();
        if expired > 0 {
            debug!("expired {} inactive flows", expired);
        }
        expired
    }

    // Evicts one uniformly random entry when the table size is a nonzero
    // multiple of `max_flows`.
    pub fn maybe_cap_evict(&mut self) -> bool {
        if self.flows.is_empty() || self.flows.len() % self.max_flows != 0 {
            return false;
        }
        let index = self.rng.gen_range(0..self.flows.len());
        let victim = *self.flows.keys().nth(index).unwrap();
        self.flows.remove(&victim);
        debug!("flow table capacity eviction: {}", victim);
        true
    }

    pub fn get(&self, conn: &Connection) -> Option<&FlowEntry> {
        self.flows.get(conn)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}
