//! Per-packet entry point: parse, look up, select, forward.
//!
//! One `Pipeline` is shared by every ingress worker; `process` is `&self`,
//! synchronous, and allocation-free. All shared state is the upstream table
//! snapshot and a handful of atomic counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

use udp_steer_common::ServiceKey;

use crate::forward::{self, Outcome, RedirectSink, RouteResolver, Verdict};
use crate::packet::HeaderView;
use crate::select::{self, FlowKeyMode};
use crate::table::SharedTable;

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Per-pipeline counters, one increment per packet on the matching bucket.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub pkts_total: AtomicU64,
    pub pkts_passed: AtomicU64,
    pub pkts_redirected: AtomicU64,
    pub pkts_local_delivered: AtomicU64,
    pub pkts_malformed: AtomicU64,
    pub pkts_no_upstream: AtomicU64,
    pub pkts_no_route: AtomicU64,
    pub bytes_redirected: AtomicU64,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline<R, S> {
    table: SharedTable,
    resolver: R,
    sink: S,
    flow_mode: FlowKeyMode,
    stats: Arc<PipelineStats>,
}

impl<R: RouteResolver, S: RedirectSink> Pipeline<R, S> {
    pub fn new(table: SharedTable, resolver: R, sink: S, flow_mode: FlowKeyMode) -> Self {
        Self {
            table,
            resolver,
            sink,
            flow_mode,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Process one ingress frame and return the substrate-facing verdict.
    ///
    /// Any frame that is not steered keeps its original bytes (fail-open);
    /// a redirected frame has been rewritten in place and emitted through
    /// the sink.
    pub fn process(&self, frame: &mut [u8]) -> Verdict {
        let len = frame.len() as u64;
        self.stats.pkts_total.fetch_add(1, Ordering::Relaxed);

        let outcome = self.steer(frame);
        trace!(?outcome, len, "processed frame");

        match outcome {
            Outcome::MalformedInput => {
                self.stats.pkts_malformed.fetch_add(1, Ordering::Relaxed);
                self.stats.pkts_passed.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::LookupMiss => {
                self.stats.pkts_no_upstream.fetch_add(1, Ordering::Relaxed);
                self.stats.pkts_passed.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::RouteUnavailable => {
                self.stats.pkts_no_route.fetch_add(1, Ordering::Relaxed);
                self.stats.pkts_passed.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Redirected => {
                self.stats.pkts_redirected.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_redirected.fetch_add(len, Ordering::Relaxed);
            }
            Outcome::LocalDelivered => {
                self.stats.pkts_redirected.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .pkts_local_delivered
                    .fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_redirected.fetch_add(len, Ordering::Relaxed);
            }
        }

        outcome.verdict()
    }

    fn steer(&self, frame: &mut [u8]) -> Outcome {
        let (master_key, flow_key) = match HeaderView::parse(frame) {
            Ok(view) => (
                ServiceKey::master(view.dst_addr(), view.dst_port()),
                select::flow_key(self.flow_mode, frame, &view),
            ),
            Err(_) => return Outcome::MalformedInput,
        };

        // Two independent point-in-time lookups; a concurrent table write
        // between them can only turn this packet into a pass-through.
        let Some(master) = self.table.lookup(&master_key) else {
            return Outcome::LookupMiss;
        };

        let Some(slot) = select::select_slot(flow_key, master.count) else {
            return Outcome::LookupMiss;
        };

        let slave_key = ServiceKey {
            slot,
            ..master_key
        };
        let Some(upstream) = self.table.lookup(&slave_key) else {
            return Outcome::LookupMiss;
        };

        forward::forward(frame, &upstream, &self.resolver, &self.sink)
    }
}
