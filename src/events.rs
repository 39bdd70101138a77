// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Active fault events
//!
//! The controller exposes its currently asserted faults as a count register
//! followed by fixed 4-word slots:
//!
//! | word | content                          |
//! |------|----------------------------------|
//! | 0    | level (high byte), FMI (low byte) |
//! | 1    | object id                        |
//! | 2    | event id                         |
//! | 3    | parameter id (SPN)               |
//!
//! The table is a snapshot, so one missed poll must not clear a fault. The
//! [`EventTable`] keeps each key alive for a number of polls after its last
//! sighting and only reports it cleared once it has been absent that long.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::config::EventsConfig;
use crate::modbus::ConnectionManager;
use crate::store::{Point, EVENTS_MEASUREMENT};

/// Identity of an event: one table entry per distinct key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    pub fmi: u8,
    pub level: u8,
    pub param_id: u16,
}

impl EventKey {
    pub fn new(fmi: u8, level: u8, param_id: u16) -> Self {
        Self { fmi, level, param_id }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.fmi, self.level, self.param_id)
    }
}

/// One event slot as read from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSighting {
    pub level: u8,
    pub fmi: u8,
    pub object_id: u16,
    pub event_id: u16,
    pub param_id: u16,
}

impl EventSighting {
    /// Unpack a 4-word slot.
    pub fn from_words(words: &[u16]) -> Option<Self> {
        let [packed, object_id, event_id, param_id] = words.get(..4)? else {
            return None;
        };
        Some(Self {
            level: (packed >> 8) as u8,
            fmi: (packed & 0xFF) as u8,
            object_id: *object_id,
            event_id: *event_id,
            param_id: *param_id,
        })
    }

    pub fn key(&self) -> EventKey {
        EventKey::new(self.fmi, self.level, self.param_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveEvent {
    pub key: EventKey,
    pub level: u8,
    pub fmi: u8,
    pub param_id: u16,
    pub object_id: u16,
    pub event_id: u16,
    pub description: String,
    pub remaining_ttl: i32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl ActiveEvent {
    /// Store point for this event.
    pub fn to_point(&self, timestamp: DateTime<Utc>) -> Point {
        Point::new(EVENTS_MEASUREMENT)
            .tag("param_id", self.param_id.to_string())
            .tag("fmi", self.fmi.to_string())
            .tag("level", self.level.to_string())
            .tag("object_id", self.object_id.to_string())
            .tag("event_id", self.event_id.to_string())
            .field("message", self.description.as_str())
            .at(timestamp)
    }
}

/// Deduplicating TTL table of active events.
#[derive(Debug, Clone)]
pub struct EventTable {
    entries: BTreeMap<EventKey, ActiveEvent>,
    ttl: i32,
    descriptions: BTreeMap<String, String>,
}

impl EventTable {
    pub fn new(ttl: u8, descriptions: BTreeMap<String, String>) -> Self {
        Self {
            entries: BTreeMap::new(),
            ttl: i32::from(ttl.max(1)),
            descriptions,
        }
    }

    pub fn from_config(config: &EventsConfig) -> Self {
        Self::new(config.expiry_polls, config.descriptions.clone())
    }

    pub fn describe(&self, sighting: &EventSighting) -> String {
        self.descriptions
            .get(&sighting.key().to_string())
            .cloned()
            .unwrap_or_else(|| {
                format!(
                    "Unknown Event: Level={}, FMI={}, Param={}",
                    sighting.level, sighting.fmi, sighting.param_id
                )
            })
    }

    /// Apply one poll's sightings and return the keys cleared by it.
    ///
    /// Seen keys get a full TTL; unseen ones lose one poll and are purged
    /// when they reach zero.
    pub fn observe(&mut self, sightings: &[EventSighting], now: DateTime<Utc>) -> Vec<EventKey> {
        let mut seen = HashSet::new();
        for sighting in sightings {
            let key = sighting.key();
            seen.insert(key);
            let description = self.describe(sighting);
            let ttl = self.ttl;
            self.entries
                .entry(key)
                .and_modify(|event| {
                    event.remaining_ttl = ttl;
                    event.object_id = sighting.object_id;
                    event.event_id = sighting.event_id;
                    event.last_seen = now;
                })
                .or_insert_with(|| {
                    info!("New active event {}: {}", key, description);
                    ActiveEvent {
                        key,
                        level: sighting.level,
                        fmi: sighting.fmi,
                        param_id: sighting.param_id,
                        object_id: sighting.object_id,
                        event_id: sighting.event_id,
                        description,
                        remaining_ttl: ttl,
                        first_seen: now,
                        last_seen: now,
                    }
                });
        }

        let mut cleared = Vec::new();
        self.entries.retain(|key, event| {
            if seen.contains(key) {
                return true;
            }
            event.remaining_ttl -= 1;
            if event.remaining_ttl <= 0 {
                info!("Event cleared: {}", key);
                cleared.push(*key);
                false
            } else {
                true
            }
        });
        cleared
    }

    /// Entries still alive, in key order.
    pub fn active(&self) -> impl Iterator<Item = &ActiveEvent> {
        self.entries.values().filter(|e| e.remaining_ttl > 0)
    }

    pub fn get(&self, key: &EventKey) -> Option<&ActiveEvent> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reads the controller's event table and maintains an [`EventTable`].
#[derive(Debug, Clone)]
pub struct EventDetector {
    table: EventTable,
    /// 0-based offset of the count register
    count_offset: u16,
    max_events: u16,
    ignore: HashSet<String>,
}

impl EventDetector {
    pub fn new(config: &EventsConfig) -> Self {
        Self {
            table: EventTable::from_config(config),
            count_offset: config.base_address.saturating_sub(1),
            max_events: config.max_events,
            ignore: config.ignore_codes.iter().cloned().collect(),
        }
    }

    pub fn table(&self) -> &EventTable {
        &self.table
    }

    /// 0-based offset of a 4-word slot, `None` past the end of the address space.
    fn slot_offset(&self, slot: u16) -> Option<u16> {
        slot.checked_mul(4)
            .and_then(|words| words.checked_add(1))
            .and_then(|delta| self.count_offset.checked_add(delta))
            .filter(|offset| offset.checked_add(3).is_some())
    }

    /// Read the controller table and update the TTL table.
    ///
    /// Returns the points to write, one per live event not in the ignore
    /// list. A failed count read leaves the table untouched.
    pub async fn poll(&mut self, conn: &mut ConnectionManager) -> Vec<Point> {
        let now = Utc::now();
        let count = match conn.read_register_retrying(self.count_offset, 1).await {
            Ok(words) => words[0],
            Err(err) => {
                warn!("Could not read active event count: {}", err);
                return Vec::new();
            }
        };

        let slots = count.min(self.max_events);
        debug!("Controller reports {} active event(s), reading {}", count, slots);
        let mut sightings = Vec::with_capacity(usize::from(slots));
        for slot in 0..slots {
            let Some(offset) = self.slot_offset(slot) else {
                warn!("Event slot {} lies beyond the register space", slot);
                break;
            };
            match conn.read_register_retrying(offset, 4).await {
                Ok(words) => {
                    if let Some(sighting) = EventSighting::from_words(&words) {
                        sightings.push(sighting);
                    }
                }
                Err(err) => warn!("Skipping event slot {}: {}", slot, err),
            }
        }

        self.table.observe(&sightings, now);
        self.points(now)
    }

    /// Points for every live, non-ignored event.
    pub fn points(&self, timestamp: DateTime<Utc>) -> Vec<Point> {
        self.table
            .active()
            .filter(|event| !self.ignore.contains(&event.key.to_string()))
            .map(|event| event.to_point(timestamp))
            .collect()
    }
}
