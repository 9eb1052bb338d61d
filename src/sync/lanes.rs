//! Per-item ordering of remote calls.
//!
//! Every mutation takes a ticket on its item's lane when it is issued. A ticket
//! waits for the previous ticket on the same lane, so remote calls for one item
//! reach the store in issuance order. A `clear` takes a ticket on every lane and
//! leaves a barrier that lanes opened after it wait on.
//!
//! Each lane also remembers the last state the remote store confirmed for its
//! item. Only the newest ticket of a lane settles the mirror; older completions
//! just move the confirmed state forward.

use super::mirror::MirrorEntry;
use futures::channel::oneshot;
use futures::future::{FutureExt, Shared, join_all};
use im::HashMap as ImHashMap;
use std::collections::HashMap;

/// Resolves once the ticket that owns it is released or dropped.
pub type Tail = Shared<oneshot::Receiver<()>>;

pub fn is_released(tail: &Tail) -> bool {
    tail.clone().now_or_never().is_some()
}

fn link() -> (oneshot::Sender<()>, Tail) {
    let (done, tail) = oneshot::channel();
    (done, tail.shared())
}

struct Lane {
    token: u64,
    tail: Tail,
    confirmed: Option<MirrorEntry>,
}

/// What a finished remote call says about the item's remote state.
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    Present(MirrorEntry),
    Absent,
    Unchanged,
}

/// A place in one or more lanes. Dropping it releases the next ticket.
pub struct Ticket {
    pub token: u64,
    waits: Vec<Tail>,
    done: oneshot::Sender<()>,
}

impl Ticket {
    /// Resolves once every earlier ticket on the same lanes has been released.
    pub async fn wait_turn(&mut self) {
        join_all(self.waits.iter().cloned()).await;
        self.waits.clear();
    }

    pub fn release(self) {
        let _ = self.done.send(());
    }
}

#[derive(Default)]
pub struct Lanes {
    lanes: HashMap<String, Lane>,
    barrier: Option<(u64, Tail)>,
}

impl Lanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items with remote calls still outstanding.
    pub fn in_flight(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_idle(&self) -> bool {
        self.lanes.is_empty() && self.barrier.is_none()
    }

    /// Issues a ticket for one item. `current` seeds the confirmed state when the
    /// item has no open lane; it must be the mirror entry from before the mutation.
    pub fn enqueue(&mut self, item_id: &str, token: u64, current: Option<MirrorEntry>) -> Ticket {
        let (done, tail) = link();
        let waits = match self.lanes.get_mut(item_id) {
            Some(lane) => {
                lane.token = token;
                vec![std::mem::replace(&mut lane.tail, tail)]
            }
            None => {
                let waits = self.barrier.iter().map(|(_, tail)| tail.clone()).collect();
                self.lanes.insert(
                    item_id.to_string(),
                    Lane {
                        token,
                        tail,
                        confirmed: current,
                    },
                );
                waits
            }
        };
        Ticket { token, waits, done }
    }

    /// Issues a ticket covering every open lane plus every item in `snapshot`.
    pub fn enqueue_all(&mut self, token: u64, snapshot: &ImHashMap<String, MirrorEntry>) -> Ticket {
        let (done, tail) = link();
        let mut waits: Vec<Tail> = self.barrier.take().map(|(_, tail)| tail).into_iter().collect();

        for lane in self.lanes.values_mut() {
            lane.token = token;
            waits.push(std::mem::replace(&mut lane.tail, tail.clone()));
        }
        for (item_id, entry) in snapshot {
            if !self.lanes.contains_key(item_id) {
                self.lanes.insert(
                    item_id.clone(),
                    Lane {
                        token,
                        tail: tail.clone(),
                        confirmed: Some(entry.clone()),
                    },
                );
            }
        }

        self.barrier = Some((token, tail));
        Ticket { token, waits, done }
    }

    /// Records a finished single-item call. Returns the state the mirror must take
    /// when `token` is still the newest ticket for the item, closing the lane.
    pub fn finish(
        &mut self,
        item_id: &str,
        token: u64,
        confirmation: Confirmation,
    ) -> Option<Option<MirrorEntry>> {
        let lane = self.lanes.get_mut(item_id)?;
        match confirmation {
            Confirmation::Present(entry) => lane.confirmed = Some(entry),
            Confirmation::Absent => lane.confirmed = None,
            Confirmation::Unchanged => {}
        }
        if lane.token != token {
            return None;
        }
        self.lanes.remove(item_id).map(|lane| lane.confirmed)
    }

    /// Records a finished `clear`. Returns the lanes it closed with their settled state.
    pub fn finish_all(&mut self, token: u64, succeeded: bool) -> Vec<(String, Option<MirrorEntry>)> {
        if succeeded {
            // Calls queued behind the clear have not reached the store yet.
            for lane in self.lanes.values_mut() {
                lane.confirmed = None;
            }
        }
        if matches!(self.barrier, Some((barrier_token, _)) if barrier_token == token) {
            self.barrier = None;
        }

        let settled: Vec<String> = self
            .lanes
            .iter()
            .filter(|(_, lane)| lane.token == token)
            .map(|(item_id, _)| item_id.clone())
            .collect();

        settled
            .into_iter()
            .filter_map(|item_id| {
                self.lanes
                    .remove(&item_id)
                    .map(|lane| (item_id, lane.confirmed))
            })
            .collect()
    }

    /// Forgets every lane and returns the tails of calls not yet released.
    /// Outstanding tickets still release their successors.
    pub fn reset(&mut self) -> Vec<Tail> {
        let mut tails: Vec<Tail> = self.lanes.drain().map(|(_, lane)| lane.tail).collect();
        tails.extend(self.barrier.take().map(|(_, tail)| tail));
        tails.retain(|tail| !is_released(tail));
        tails
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DisplayFields, ItemDraft, TrackedItem};
    use futures::FutureExt;

    fn entry(id: &str, seq: u64) -> MirrorEntry {
        MirrorEntry {
            seq,
            item: TrackedItem::pending("u1", ItemDraft::new(id, DisplayFields::new(id, 1.0))),
        }
    }

    #[test]
    fn later_ticket_waits_for_earlier_one() {
        let mut lanes = Lanes::new();
        let mut first = lanes.enqueue("p1", 1, None);
        let mut second = lanes.enqueue("p1", 2, None);

        assert!(first.wait_turn().now_or_never().is_some());
        assert!(second.wait_turn().now_or_never().is_none());

        first.release();
        assert!(second.wait_turn().now_or_never().is_some());
    }

    #[test]
    fn dropped_ticket_releases_successor() {
        let mut lanes = Lanes::new();
        let first = lanes.enqueue("p1", 1, None);
        let mut second = lanes.enqueue("p1", 2, None);
        drop(first);
        assert!(second.wait_turn().now_or_never().is_some());
    }

    #[test]
    fn only_newest_ticket_settles() {
        let mut lanes = Lanes::new();
        lanes.enqueue("p1", 1, None);
        lanes.enqueue("p1", 2, None);

        let stale = lanes.finish("p1", 1, Confirmation::Present(entry("p1", 1)));
        assert_eq!(stale, None);
        assert_eq!(lanes.in_flight(), 1);

        // Second call failed: the mirror falls back to what the store confirmed.
        let settled = lanes.finish("p1", 2, Confirmation::Unchanged);
        assert_eq!(settled, Some(Some(entry("p1", 1))));
        assert!(lanes.is_idle());
    }

    #[test]
    fn clear_waits_for_open_lanes_and_blocks_new_ones() {
        let mut lanes = Lanes::new();
        let add = lanes.enqueue("p1", 1, None);

        let mut snapshot = ImHashMap::new();
        snapshot.insert("p2".to_string(), entry("p2", 2));
        let mut clear = lanes.enqueue_all(2, &snapshot);
        let mut later = lanes.enqueue("p3", 3, None);

        assert!(clear.wait_turn().now_or_never().is_none());
        drop(add);
        assert!(clear.wait_turn().now_or_never().is_some());
        assert!(later.wait_turn().now_or_never().is_none());
        clear.release();
        assert!(later.wait_turn().now_or_never().is_some());
    }

    #[test]
    fn failed_clear_restores_untouched_items_only() {
        let mut lanes = Lanes::new();
        let mut snapshot = ImHashMap::new();
        snapshot.insert("p1".to_string(), entry("p1", 1));
        snapshot.insert("p2".to_string(), entry("p2", 2));
        lanes.enqueue_all(7, &snapshot);
        lanes.enqueue("p2", 8, None);

        let mut settled = lanes.finish_all(7, false);
        settled.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(settled, vec![("p1".to_string(), Some(entry("p1", 1)))]);

        // p2's newer call still sees the pre-clear row as confirmed.
        let p2 = lanes.finish("p2", 8, Confirmation::Unchanged);
        assert_eq!(p2, Some(Some(entry("p2", 2))));
    }

    #[test]
    fn reset_returns_unreleased_tails() {
        let mut lanes = Lanes::new();
        let held = lanes.enqueue("p1", 1, None);
        let released = lanes.enqueue("p2", 2, None);
        released.release();

        let mut tails = lanes.reset();
        assert!(lanes.is_idle());
        assert_eq!(tails.len(), 1);

        let tail = tails.remove(0);
        assert!(tail.clone().now_or_never().is_none());
        drop(held);
        assert!(tail.now_or_never().is_some());
    }

    #[test]
    fn successful_clear_confirms_absence_everywhere() {
        let mut lanes = Lanes::new();
        let mut snapshot = ImHashMap::new();
        snapshot.insert("p1".to_string(), entry("p1", 1));
        lanes.enqueue_all(1, &snapshot);
        lanes.enqueue("p1", 2, None);

        assert!(lanes.finish_all(1, true).is_empty());
        assert_eq!(lanes.finish("p1", 2, Confirmation::Unchanged), Some(None));
    }
}
