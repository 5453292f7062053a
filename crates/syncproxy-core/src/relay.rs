//! Event relay: local events → outbound RPC calls
//!
//! Each attached (source, event) pair occupies a slot. Slot ids are dense and
//! reused lowest-first once freed.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::catalog::MethodCatalog;
use crate::error::SyncError;
use crate::event::{RaisedEvent, SourceId};
use crate::protocol::ProtocolMessage;
use crate::value::{method_name, normalize_signature};

/// Identifier of a relay slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub usize);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// Dense id allocator backed by a free list
#[derive(Debug)]
pub struct SlotTable<T> {
    entries: Vec<Option<T>>,
    free: BinaryHeap<Reverse<usize>>,
}

impl<T> SlotTable<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: BinaryHeap::new(),
        }
    }

    /// Store `value` under the lowest unused id
    pub fn insert(&mut self, value: T) -> SlotId {
        match self.free.pop() {
            Some(Reverse(idx)) => {
                self.entries[idx] = Some(value);
                SlotId(idx)
            }
            None => {
                self.entries.push(Some(value));
                SlotId(self.entries.len() - 1)
            }
        }
    }

    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        let taken = self.entries.get_mut(id.0)?.take();
        if taken.is_some() {
            self.free.push(Reverse(id.0));
        }
        taken
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        self.entries.get(id.0).and_then(Option::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| entry.as_ref().map(|v| (SlotId(idx), v)))
    }

    pub fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for SlotTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One attached event
#[derive(Debug, Clone)]
pub struct RelaySlot {
    pub source: SourceId,
    /// Event name without parameter list
    pub event: String,
    pub wire_name: String,
    catalog: Arc<MethodCatalog>,
}

/// Turns local events into [`ProtocolMessage::RpcCall`]s
#[derive(Debug, Default)]
pub struct EventRelay {
    slots: SlotTable<RelaySlot>,
}

impl EventRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `event` of `source`; the wire name defaults to the declared signature
    ///
    /// Returns `None` when the catalog declares no such event.
    pub fn attach(
        &mut self,
        source: SourceId,
        catalog: Arc<MethodCatalog>,
        event: &str,
        wire_name: Option<&str>,
    ) -> Option<SlotId> {
        let declared = catalog.event(event)?;
        let event = declared.name.clone();
        let wire_name = match wire_name {
            Some(name) => normalize_signature(name),
            None => declared.signature.clone(),
        };

        let slot = self.slots.insert(RelaySlot {
            source,
            event,
            wire_name,
            catalog,
        });
        debug!(%source, %slot, "Attached event");
        Some(slot)
    }

    /// Detach one event of `source`, or all of them when `event` is `None`
    ///
    /// Returns the number of slots removed.
    pub fn detach(&mut self, source: SourceId, event: Option<&str>) -> usize {
        let wanted = event.map(|e| method_name(&normalize_signature(e)).to_string());

        let matching: Vec<SlotId> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.source == source)
            .filter(|(_, slot)| wanted.as_ref().map_or(true, |w| *w == slot.event))
            .map(|(id, _)| id)
            .collect();

        let to_remove = if wanted.is_some() {
            &matching[..matching.len().min(1)]
        } else {
            &matching[..]
        };

        for id in to_remove {
            self.slots.remove(*id);
        }
        to_remove.len()
    }

    /// Build the outbound calls for a raised event
    pub fn deliver(&self, raised: &RaisedEvent) -> Vec<ProtocolMessage> {
        let mut calls = Vec::new();

        for (id, slot) in self.slots.iter() {
            if slot.source != raised.source || slot.event != raised.event {
                continue;
            }

            let Some(declared) = slot.catalog.event(&slot.event) else {
                warn!(slot = %id, event = %slot.event, "Event vanished from catalog");
                continue;
            };

            if let Some(index) = declared.arg_types.iter().position(|t| !t.is_wire_type()) {
                let error = SyncError::UnregisteredType {
                    name: declared.signature.clone(),
                    index,
                };
                warn!(class = %slot.catalog.class_name(), %error, "Cannot relay event");
                continue;
            }

            if declared.arg_types.len() != raised.args.len() {
                warn!(
                    class = %slot.catalog.class_name(),
                    event = %slot.event,
                    declared = declared.arg_types.len(),
                    raised = raised.args.len(),
                    "Event raised with wrong argument count"
                );
                continue;
            }

            let mismatch = raised
                .args
                .iter()
                .zip(&declared.arg_types)
                .position(|(value, expected)| value.type_tag() != Some(*expected));
            if let Some(index) = mismatch {
                warn!(
                    class = %slot.catalog.class_name(),
                    event = %declared.signature,
                    index,
                    "Event raised with mistyped argument"
                );
                continue;
            }

            calls.push(ProtocolMessage::RpcCall {
                wire_name: slot.wire_name.clone(),
                args: raised.args.clone(),
            });
        }

        calls
    }

    /// Whether any slot is attached for `source`
    pub fn has_source(&self, source: SourceId) -> bool {
        self.slots.iter().any(|(_, slot)| slot.source == source)
    }

    pub fn slot(&self, id: SlotId) -> Option<&RelaySlot> {
        self.slots.get(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
