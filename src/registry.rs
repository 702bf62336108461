// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bookkeeping for the streams bound to one filter instance.
//!
//! Entries are kept dependency ordered: the independent base stream sits at
//! index 0 and every enhancement stream comes after the stream it depends on,
//! regardless of bind order. Re-binds with an unchanged configuration
//! fingerprint are detected here so the filter can skip engine work.

use crate::port::InputConfig;
use crate::port::PortId;
use crate::Error;
use crate::MAX_STREAMS;

#[derive(Clone, Debug)]
pub struct StreamEntry {
    pub port: PortId,
    pub id: u32,
    pub dep_id: u32,
    /// CRC32 of the decoder configuration record at last attach, zero when
    /// unknown or deliberately invalidated.
    pub cfg_crc: u32,
    pub cfg: InputConfig,
}

/// What an attach did to the registry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttachOutcome {
    /// New stream inserted at this index.
    New(usize),
    /// Known stream whose configuration changed, now at this index.
    Updated(usize),
    /// Known stream, identical configuration fingerprint.
    Unchanged,
}

/// What a detach removed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Detach {
    /// The base stream went away, taking every dependent layer with it.
    Base,
    /// One enhancement layer went away.
    Layer,
    /// The port was not bound.
    Unknown,
}

#[derive(Default)]
pub struct StreamRegistry {
    entries: Vec<StreamEntry>,
}

impl StreamRegistry {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&StreamEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamEntry> {
        self.entries.iter()
    }

    pub fn index_of(&self, port: PortId) -> Option<usize> {
        self.entries.iter().position(|e| e.port == port)
    }

    /// Registers or refreshes a stream, keeping dependency order.
    pub fn attach(
        &mut self,
        port: PortId,
        cfg: InputConfig,
        cfg_crc: u32,
    ) -> Result<AttachOutcome, Error> {
        if let Some(idx) = self.index_of(port) {
            if cfg_crc != 0 && self.entries[idx].cfg_crc == cfg_crc {
                return Ok(AttachOutcome::Unchanged);
            }
            let entry = &mut self.entries[idx];
            entry.id = cfg.id;
            entry.dep_id = cfg.dep_id;
            entry.cfg_crc = cfg_crc;
            entry.cfg = cfg;
            return Ok(AttachOutcome::Updated(idx));
        }

        if self.entries.len() >= MAX_STREAMS {
            return Err(Error::CapacityExceeded);
        }

        let mut insert_at = self.entries.len();
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.dep_id == 0 && cfg.dep_id == 0 {
                return Err(Error::ConflictingBaseStreams);
            }
            if cfg.dep_id != 0 && entry.id == cfg.dep_id {
                insert_at = i + 1;
                break;
            }
            if entry.dep_id != 0 && entry.dep_id == cfg.id {
                insert_at = i;
                break;
            }
        }

        self.entries.insert(
            insert_at,
            StreamEntry {
                port,
                id: cfg.id,
                dep_id: cfg.dep_id,
                cfg_crc,
                cfg,
            },
        );
        Ok(AttachOutcome::New(insert_at))
    }

    pub fn detach(&mut self, port: PortId) -> Detach {
        match self.index_of(port) {
            Some(0) => {
                self.entries.clear();
                Detach::Base
            }
            Some(idx) => {
                self.entries.remove(idx);
                Detach::Layer
            }
            None => Detach::Unknown,
        }
    }

    /// Zeroes every stored fingerprint so the next attach of each stream is
    /// treated as a configuration change. Used when replaying configurations
    /// into a rebuilt engine.
    pub fn invalidate_fingerprints(&mut self) {
        for entry in &mut self.entries {
            entry.cfg_crc = 0;
        }
    }
}
