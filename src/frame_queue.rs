// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Timing side-channel between submitted access units and emitted pictures.
//!
//! The engine reports only a timestamp with each decoded picture, so the
//! packet metadata that must ride along (duration, random access class, seek
//! flag) is queued here at submit time and popped back in presentation order
//! when the picture comes out. One record per access unit, one pop per
//! picture.

use std::collections::VecDeque;

/// Packet metadata carried across the engine, keyed by composition time.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameInfo {
    pub cts: u64,
    pub duration: u32,
    pub sap_type: u8,
    pub seek: bool,
}

/// Queue of pending [`FrameInfo`]s, kept sorted by composition time.
#[derive(Default)]
pub struct FrameInfoQueue {
    entries: VecDeque<FrameInfo>,
}

impl FrameInfoQueue {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records one access unit's metadata. Layers of the same access unit
    /// report the same composition time, so an entry matching an already
    /// queued timestamp is dropped to keep the queue 1:1 with pictures.
    pub fn record_if_new(&mut self, info: FrameInfo) {
        match self.entries.back() {
            None => self.entries.push_back(info),
            Some(last) if last.cts == info.cts => (),
            Some(last) if last.cts < info.cts => self.entries.push_back(info),
            Some(_) => {
                // Out of order arrival, insert at the sorted position unless
                // the timestamp is already present.
                let pos = self.entries.partition_point(|e| e.cts < info.cts);
                if self.entries.get(pos).map(|e| e.cts) != Some(info.cts) {
                    self.entries.insert(pos, info);
                }
            }
        }
    }

    /// Pops the metadata of the oldest pending picture.
    pub fn pop_oldest(&mut self) -> Option<FrameInfo> {
        self.entries.pop_front()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(cts: u64) -> FrameInfo {
        FrameInfo {
            cts,
            duration: 40,
            sap_type: 0,
            seek: false,
        }
    }

    #[test]
    fn pops_in_cts_order() {
        let mut q = FrameInfoQueue::default();
        q.record_if_new(info(40));
        q.record_if_new(info(0));
        q.record_if_new(info(80));
        assert_eq!(q.pop_oldest().unwrap().cts, 0);
        assert_eq!(q.pop_oldest().unwrap().cts, 40);
        assert_eq!(q.pop_oldest().unwrap().cts, 80);
        assert!(q.pop_oldest().is_none());
    }

    #[test]
    fn duplicate_timestamps_collapse() {
        let mut q = FrameInfoQueue::default();
        q.record_if_new(info(0));
        q.record_if_new(info(0));
        q.record_if_new(info(40));
        q.record_if_new(info(0));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn clear_empties_the_queue() {
        let mut q = FrameInfoQueue::default();
        q.record_if_new(info(0));
        q.record_if_new(info(40));
        q.clear();
        assert!(q.is_empty());
    }
}
