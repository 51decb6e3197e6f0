//! Concurrently readable upstream table.
//!
//! Packet workers only ever call [`UpstreamTable::lookup`]; the write API is
//! reserved for the control-plane side (config load today, a provisioning
//! API tomorrow). Reads take a copy-on-write snapshot via `ArcSwap`: no
//! reader-side locking, no allocation on the lookup path, and a writer swap
//! never corrupts an in-flight read.
//!
//! There is deliberately no snapshot consistency across the master and
//! slave lookups a packet performs: a count change between the two can make
//! the slave lookup miss, which degrades that one packet to pass-through.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use arc_swap::ArcSwap;

use udp_steer_common::{ServiceKey, UpstreamRecord, MAX_TABLE_ENTRIES};

type Entries = HashMap<ServiceKey, UpstreamRecord>;

pub struct UpstreamTable {
    entries: ArcSwap<Entries>,
}

impl Default for UpstreamTable {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamTable {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Entries::new()),
        }
    }

    /// Point-in-time lookup. Identical keys against an unchanged table
    /// return identical records.
    pub fn lookup(&self, key: &ServiceKey) -> Option<UpstreamRecord> {
        self.entries.load().get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }
}

// ---------------------------------------------------------------------------
// Control-plane write API
// ---------------------------------------------------------------------------

// Config load drives replace_service; the rest is the surface a remote
// provisioner uses.
#[allow(dead_code)]
impl UpstreamTable {
    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    /// Insert or replace a single record.
    pub fn insert(&self, key: ServiceKey, record: UpstreamRecord) -> Result<()> {
        let mut rejected = false;
        self.entries.rcu(|current| {
            let mut next = (**current).clone();
            if !next.contains_key(&key) && next.len() >= MAX_TABLE_ENTRIES {
                rejected = true;
            } else {
                rejected = false;
                next.insert(key, record);
            }
            next
        });
        if rejected {
            bail!("upstream table full ({MAX_TABLE_ENTRIES} entries)");
        }
        Ok(())
    }

    /// Remove a single record. Missing keys are fine.
    pub fn remove(&self, key: &ServiceKey) {
        self.entries.rcu(|current| {
            let mut next = (**current).clone();
            next.remove(key);
            next
        });
    }

    /// Install the full record set for one virtual service in a single
    /// swap: the master record plus upstream slots 1..=N, with any stale
    /// higher slots from a previous generation removed.
    pub fn replace_service(
        &self,
        vip: std::net::Ipv4Addr,
        port: u16,
        upstreams: &[UpstreamRecord],
    ) -> Result<()> {
        if upstreams.len() > u8::MAX as usize {
            bail!("too many upstreams for {vip}:{port}: {}", upstreams.len());
        }
        let count = upstreams.len() as u8;

        let mut rejected = false;
        self.entries.rcu(|current| {
            let mut next = (**current).clone();
            next.retain(|k, _| !(k.service_addr() == vip && k.service_port() == port));

            if next.len() + 1 + upstreams.len() > MAX_TABLE_ENTRIES {
                rejected = true;
                return next;
            }
            rejected = false;

            next.insert(ServiceKey::master(vip, port), UpstreamRecord::master(count));
            for (i, record) in upstreams.iter().enumerate() {
                next.insert(ServiceKey::slot(vip, port, i as u8 + 1), *record);
            }
            next
        });
        if rejected {
            bail!(
                "upstream table full: {vip}:{port} needs {} entries, capacity {MAX_TABLE_ENTRIES}",
                upstreams.len() + 1
            );
        }
        Ok(())
    }

    /// Remove every record of a virtual service.
    pub fn remove_service(&self, vip: std::net::Ipv4Addr, port: u16) {
        self.entries.rcu(|current| {
            let mut next = (**current).clone();
            next.retain(|k, _| !(k.service_addr() == vip && k.service_port() == port));
            next
        });
    }
}

/// Shared handle used by packet workers and the control-plane side alike.
pub type SharedTable = Arc<UpstreamTable>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use udp_steer_common::{DELIVERY_ALSO_LOCAL, DELIVERY_REDIRECT_ONLY};

    fn vip() -> Ipv4Addr {
        Ipv4Addr::new(2, 2, 2, 2)
    }

    #[test]
    fn lookup_misses_on_empty_table() {
        let table = UpstreamTable::new();
        assert_eq!(table.lookup(&ServiceKey::master(vip(), 8125)), None);
    }

    #[test]
    fn replace_service_installs_master_and_slots() {
        let table = UpstreamTable::new();
        table
            .replace_service(
                vip(),
                8125,
                &[
                    UpstreamRecord::upstream(Ipv4Addr::new(7, 7, 7, 7), 8125, DELIVERY_REDIRECT_ONLY),
                    UpstreamRecord::upstream(Ipv4Addr::new(8, 8, 8, 8), 8125, DELIVERY_REDIRECT_ONLY),
                ],
            )
            .unwrap();

        let master = table.lookup(&ServiceKey::master(vip(), 8125)).unwrap();
        assert_eq!(master.count, 2);

        let slot2 = table.lookup(&ServiceKey::slot(vip(), 8125, 2)).unwrap();
        assert_eq!(slot2.target_addr(), Ipv4Addr::new(8, 8, 8, 8));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn replace_service_drops_stale_slots() {
        let table = UpstreamTable::new();
        let three: Vec<_> = (1..=3)
            .map(|i| {
                UpstreamRecord::upstream(Ipv4Addr::new(10, 0, 0, i), 9000, DELIVERY_REDIRECT_ONLY)
            })
            .collect();
        table.replace_service(vip(), 8125, &three).unwrap();
        assert_eq!(table.len(), 4);

        let one = [UpstreamRecord::upstream(
            Ipv4Addr::new(10, 0, 0, 9),
            9000,
            DELIVERY_ALSO_LOCAL,
        )];
        table.replace_service(vip(), 8125, &one).unwrap();

        assert_eq!(table.len(), 2);
        let master = table.lookup(&ServiceKey::master(vip(), 8125)).unwrap();
        assert_eq!(master.count, 1);
        assert_eq!(table.lookup(&ServiceKey::slot(vip(), 8125, 2)), None);
        assert_eq!(table.lookup(&ServiceKey::slot(vip(), 8125, 3)), None);
    }

    #[test]
    fn capacity_is_enforced() {
        let table = UpstreamTable::new();
        for i in 0..MAX_TABLE_ENTRIES {
            let key = ServiceKey::slot(Ipv4Addr::new(10, 0, (i / 250) as u8, (i % 250) as u8), 1, 1);
            table
                .insert(key, UpstreamRecord::master(1))
                .unwrap();
        }
        let overflow = ServiceKey::slot(Ipv4Addr::new(172, 16, 0, 1), 1, 1);
        assert!(table.insert(overflow, UpstreamRecord::master(1)).is_err());

        // Replacing an existing key still works at capacity.
        let existing = ServiceKey::slot(Ipv4Addr::new(10, 0, 0, 0), 1, 1);
        table.insert(existing, UpstreamRecord::master(9)).unwrap();
        assert_eq!(table.lookup(&existing).unwrap().count, 9);
    }

    #[test]
    fn remove_service_clears_all_records() {
        let table = UpstreamTable::new();
        table
            .replace_service(
                vip(),
                8125,
                &[UpstreamRecord::upstream(
                    Ipv4Addr::new(7, 7, 7, 7),
                    8125,
                    DELIVERY_REDIRECT_ONLY,
                )],
            )
            .unwrap();
        table
            .replace_service(
                vip(),
                9000,
                &[UpstreamRecord::upstream(
                    Ipv4Addr::new(7, 7, 7, 8),
                    9000,
                    DELIVERY_REDIRECT_ONLY,
                )],
            )
            .unwrap();

        table.remove_service(vip(), 8125);
        assert_eq!(table.lookup(&ServiceKey::master(vip(), 8125)), None);
        assert!(table.lookup(&ServiceKey::master(vip(), 9000)).is_some());
    }

    #[test]
    fn readers_see_old_or_new_snapshot_during_swap() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let table: SharedTable = Arc::new(UpstreamTable::new());
        let stop = Arc::new(AtomicBool::new(false));

        let reader = {
            let table = table.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    if let Some(master) = table.lookup(&ServiceKey::master(vip(), 8125)) {
                        // Whatever generation we read, the count is one of
                        // the values a writer ever installed.
                        assert!(master.count == 1 || master.count == 2);
                    }
                }
            })
        };

        let upstream =
            UpstreamRecord::upstream(Ipv4Addr::new(7, 7, 7, 7), 8125, DELIVERY_REDIRECT_ONLY);
        for _ in 0..500 {
            table.replace_service(vip(), 8125, &[upstream]).unwrap();
            table.replace_service(vip(), 8125, &[upstream, upstream]).unwrap();
        }

        stop.store(true, Ordering::Relaxed);
        reader.join().unwrap();
    }
}
