//! Forwarding decision: route lookup, rewrite, redirect, and the optional
//! local-delivery restore pass.
//!
//! Fail-open governs every branch. A frame that cannot be steered for any
//! reason keeps its original bytes and passes through; steering never drops
//! traffic.

use std::net::Ipv4Addr;

use tracing::warn;

use udp_steer_common::UpstreamRecord;

use crate::packet::HeaderView;
use crate::rewrite::{self, MacRewrite};

// ---------------------------------------------------------------------------
// Verdicts and Outcomes
// ---------------------------------------------------------------------------

/// What the hosting substrate should do with the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Continue normal processing with the frame as received.
    Pass,
    /// A rewritten clone was emitted on the egress interface; the original
    /// frame is consumed.
    Redirect,
    /// A rewritten clone was emitted and the frame, restored to its
    /// original client-visible endpoint, goes to the local stack.
    LocalDeliver,
}

/// Terminal state of one packet's trip through the pipeline. Each variant
/// names why the packet ended where it did; `verdict()` collapses them to
/// the substrate-facing action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Short frame, not IPv4, IP options, or not UDP.
    MalformedInput,
    /// No master record, count of zero, or the slave slot was missing.
    LookupMiss,
    /// Route resolution for the backend failed; nothing was mutated.
    RouteUnavailable,
    /// Rewritten and redirected to the egress interface.
    Redirected,
    /// Redirected, then restored and handed to the local stack.
    LocalDelivered,
}

impl Outcome {
    pub fn verdict(self) -> Verdict {
        match self {
            Outcome::MalformedInput | Outcome::LookupMiss | Outcome::RouteUnavailable => {
                Verdict::Pass
            }
            Outcome::Redirected => Verdict::Redirect,
            Outcome::LocalDelivered => Verdict::LocalDeliver,
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator Interfaces
// ---------------------------------------------------------------------------

/// Route/interface resolution for a backend address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub ifindex: u32,
    pub src_mac: [u8; 6],
    pub dst_mac: [u8; 6],
}

/// Resolves the egress interface and L2 addresses for a destination.
/// `None` means no route: the packet fails open.
pub trait RouteResolver: Send + Sync {
    fn resolve(&self, dst: Ipv4Addr) -> Option<Route>;
}

/// Emits a rewritten frame on an egress interface (clone semantics: the
/// sink copies the bytes, the caller keeps the buffer).
pub trait RedirectSink: Send + Sync {
    fn redirect(&self, frame: &[u8], ifindex: u32) -> bool;
}

// ---------------------------------------------------------------------------
// Forwarding
// ---------------------------------------------------------------------------

/// Drive a validated, matched frame to its terminal state.
///
/// Route resolution happens before any mutation, so `RouteUnavailable`
/// guarantees untouched bytes. Once the rewrite lands the redirect is
/// committed; a sink error at that point is logged and the verdict stands,
/// since the in-place mutation cannot be rolled back.
pub fn forward<R: RouteResolver + ?Sized, S: RedirectSink + ?Sized>(
    frame: &mut [u8],
    record: &UpstreamRecord,
    resolver: &R,
    sink: &S,
) -> Outcome {
    let (orig_dst, orig_dst_port) = match HeaderView::parse(frame) {
        Ok(view) => (view.dst_addr(), view.dst_port()),
        Err(_) => return Outcome::MalformedInput,
    };

    let target = record.target_addr();
    let target_port = record.target_port();

    let Some(route) = resolver.resolve(target) else {
        return Outcome::RouteUnavailable;
    };

    let macs = MacRewrite {
        src: route.src_mac,
        dst: route.dst_mac,
    };
    if rewrite::rewrite(frame, target, target_port, Some(macs)).is_err() {
        return Outcome::MalformedInput;
    }

    if !sink.redirect(frame, route.ifindex) {
        warn!(ifindex = route.ifindex, %target, "redirect emit failed");
    }

    if record.deliver_locally() {
        // Restore the client-visible endpoint for the local stack. The
        // frame was just rewritten by us, so this pass cannot fail.
        if rewrite::rewrite(frame, orig_dst, orig_dst_port, None).is_err() {
            return Outcome::MalformedInput;
        }
        Outcome::LocalDelivered
    } else {
        Outcome::Redirected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_collapse_to_verdicts() {
        assert_eq!(Outcome::MalformedInput.verdict(), Verdict::Pass);
        assert_eq!(Outcome::LookupMiss.verdict(), Verdict::Pass);
        assert_eq!(Outcome::RouteUnavailable.verdict(), Verdict::Pass);
        assert_eq!(Outcome::Redirected.verdict(), Verdict::Redirect);
        assert_eq!(Outcome::LocalDelivered.verdict(), Verdict::LocalDeliver);
    }
}
