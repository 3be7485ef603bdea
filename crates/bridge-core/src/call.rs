//! Bounded table of active SIP calls.
//!
//! Fixed-capacity arena indexed by slot, with a call-id map for O(1)
//! lookup. Admission is idempotent; when the table is full, the resident
//! call with the numerically smallest call id is evicted and its slot
//! reused. The smallest-id victim choice is not a true oldest-first policy
//! when identifiers do not increase monotonically; it is kept as-is
//! deliberately (see DESIGN.md).

use std::collections::HashMap;

use tracing::{debug, info};

use crate::leg::MediaLeg;
use crate::types::{CallId, DialogId, Direction, MediaKind, StreamMode};

/// One active SIP call: its identifiers, SIP-side media leg and the
/// per-kind stream directions from the last negotiation.
#[derive(Debug)]
pub struct SipCall {
    /// Call identifier
    pub call_id: CallId,
    /// Dialog identifier
    pub dialog_id: DialogId,
    /// SIP-side media leg (up to four endpoints)
    pub leg: MediaLeg,
    /// Negotiated audio direction
    pub audio_dir: Direction,
    /// Negotiated video direction
    pub video_dir: Direction,
}

impl SipCall {
    pub(crate) fn new(call_id: CallId, dialog_id: DialogId) -> SipCall {
        SipCall {
            call_id,
            dialog_id,
            leg: MediaLeg::new(),
            audio_dir: Direction::SendRecv,
            video_dir: Direction::SendRecv,
        }
    }

    /// Direction for the media kind of `mode`.
    pub fn direction(&self, mode: StreamMode) -> Direction {
        match mode.kind() {
            MediaKind::Audio => self.audio_dir,
            MediaKind::Video => self.video_dir,
        }
    }

    /// Set the direction for a media kind.
    pub fn set_direction(&mut self, kind: MediaKind, dir: Direction) {
        match kind {
            MediaKind::Audio => self.audio_dir = dir,
            MediaKind::Video => self.video_dir = dir,
        }
    }
}

/// Outcome of [`CallTable::admit`].
#[derive(Debug)]
pub struct Admission {
    /// Slot index of the admitted call
    pub slot: usize,
    /// True when the call id was already resident (duplicate notification)
    pub existing: bool,
    /// The call evicted to make room, if the table was full. The caller is
    /// responsible for terminating its SIP dialog.
    pub evicted: Option<(CallId, DialogId)>,
}

/// Fixed-capacity call table.
#[derive(Debug)]
pub struct CallTable {
    slots: Vec<Option<SipCall>>,
    index: HashMap<CallId, usize>,
}

impl CallTable {
    /// Table with room for `max_calls` concurrent calls.
    pub fn new(max_calls: usize) -> CallTable {
        let mut slots = Vec::with_capacity(max_calls);
        slots.resize_with(max_calls, || None);
        CallTable { slots, index: HashMap::with_capacity(max_calls) }
    }

    /// Number of resident calls.
    pub fn count(&self) -> usize {
        self.index.len()
    }

    /// Table capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Admit `call_id`, reusing its slot when already resident (a duplicate
    /// new-call notification must not double-provision).
    ///
    /// When the table is full the resident call with the smallest id is
    /// evicted: its sockets close and its identifiers are handed back so the
    /// caller can close the SIP dialog.
    pub fn admit(&mut self, call_id: CallId, dialog_id: DialogId) -> Admission {
        if let Some(&slot) = self.index.get(&call_id) {
            debug!(%call_id, slot, "duplicate admission, reusing call slot");
            if let Some(call) = self.slots[slot].as_mut() {
                call.dialog_id = dialog_id;
            }
            return Admission { slot, existing: true, evicted: None };
        }

        let (slot, evicted) = match self.slots.iter().position(Option::is_none) {
            Some(free) => (free, None),
            None => {
                // Full: evict the numerically smallest resident call id.
                let (&victim_id, &slot) = self
                    .index
                    .iter()
                    .min_by_key(|(id, _)| *id)
                    .expect("full table has at least one resident call");
                self.index.remove(&victim_id);
                let victim = self.slots[slot].take().expect("indexed slot is occupied");
                info!(
                    victim = %victim_id,
                    replacement = %call_id,
                    "call table full, evicting lowest call id"
                );
                (slot, Some((victim.call_id, victim.dialog_id)))
            }
        };

        self.slots[slot] = Some(SipCall::new(call_id, dialog_id));
        self.index.insert(call_id, slot);
        debug!(%call_id, slot, count = self.count(), "admitted call");
        Admission { slot, existing: false, evicted }
    }

    /// Release a call, returning it so the caller controls when its sockets
    /// close. Unknown ids return `None`.
    pub fn release(&mut self, call_id: CallId) -> Option<SipCall> {
        let slot = self.index.remove(&call_id)?;
        let call = self.slots[slot].take();
        debug!(%call_id, slot, count = self.count(), "released call");
        call
    }

    /// Look up a resident call.
    pub fn lookup(&self, call_id: CallId) -> Option<&SipCall> {
        self.index.get(&call_id).and_then(|&slot| self.slots[slot].as_ref())
    }

    /// Look up a resident call mutably.
    pub fn lookup_mut(&mut self, call_id: CallId) -> Option<&mut SipCall> {
        let slot = *self.index.get(&call_id)?;
        self.slots[slot].as_mut()
    }

    /// Set the direction for one media kind of a call. Ignored for unknown
    /// calls.
    pub fn set_direction(&mut self, call_id: CallId, kind: MediaKind, dir: Direction) {
        if let Some(call) = self.lookup_mut(call_id) {
            call.set_direction(kind, dir);
        }
    }

    /// Direction for the media kind of `mode`, defaulting to SendRecv when
    /// the call is unknown ("no restriction known").
    pub fn direction(&self, call_id: CallId, mode: StreamMode) -> Direction {
        self.lookup(call_id)
            .map(|call| call.direction(mode))
            .unwrap_or(Direction::SendRecv)
    }

    /// Iterate resident calls.
    pub fn iter(&self) -> impl Iterator<Item = &SipCall> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    /// Iterate resident calls mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SipCall> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }

    /// Resident call ids, in slot order.
    pub fn call_ids(&self) -> Vec<CallId> {
        self.iter().map(|c| c.call_id).collect()
    }
}
