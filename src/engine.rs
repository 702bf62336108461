// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Trait seam towards the external layered decoder engine.
//!
//! The filter never touches a concrete decoder directly: everything goes
//! through [`DecoderEngine`], created by an [`EngineFactory`]. This keeps the
//! filter testable against [`fake::FakeEngine`] and lets hosts plug in
//! whatever engine build they ship.

use std::sync::Arc;

use crate::ChromaFormat;
use crate::Error;
use crate::Fraction;

pub mod fake;

/// Engine-side threading model.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Threading {
    FrameSlice,
    #[default]
    Frame,
    Slice,
}

/// Static engine setup, fixed at creation time.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub threads: u32,
    pub threading: Threading,
    pub log_level: log::LevelFilter,
}

/// Which decoder inside the engine a call targets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LayerRole {
    Base,
    Enhancement,
}

/// Engine operating mode, chosen from the base stream's coding format.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EngineMode {
    Hevc,
    HybridAvcBase,
}

/// Geometry and format of one decoded picture as reported by the engine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PictureInfo {
    pub width: u32,
    pub height: u32,
    pub y_stride: u32,
    pub u_stride: u32,
    pub v_stride: u32,
    pub bit_depth: u32,
    pub chroma_format: ChromaFormat,
    pub sar: Fraction,
    pub timestamp: u64,
}

/// One plane of an engine-owned frame.
#[derive(Clone, Debug)]
pub struct HwPlane {
    pub data: Arc<[u8]>,
    pub offset: usize,
    pub stride: usize,
}

/// An engine-owned decoded frame, shared with the pipeline without copying.
///
/// The engine keeps the backing storage alive for as long as any clone of the
/// planes' `Arc` exists; the filter holds at most one such frame outstanding.
#[derive(Clone, Debug)]
pub struct HwFrame {
    pub planes: [HwPlane; 3],
    pub info: PictureInfo,
}

impl HwFrame {
    /// Returns the plane payload and its stride.
    pub fn plane(&self, idx: usize) -> Result<(&[u8], usize), Error> {
        let plane = self.planes.get(idx).ok_or(Error::BadParameter)?;
        Ok((&plane.data[plane.offset..], plane.stride))
    }
}

/// Caller-owned destination planes for a copy-out.
pub struct PlanarTarget<'a> {
    pub y: &'a mut [u8],
    pub u: &'a mut [u8],
    pub v: &'a mut [u8],
}

/// The external layered decoder.
///
/// Call order per access unit: `submit` for every layer payload, then if any
/// submit reported a picture, `picture_info` and one of `map_output` or
/// `copy_output`. `flush` drains buffered pictures after end of stream.
pub trait DecoderEngine {
    fn start(&mut self) -> Result<(), Error>;

    /// Selects how many of the configured decoders are active, zero based.
    fn set_active_decoders(&mut self, count: u32);

    /// Selects how many layers contribute to the output picture, zero based.
    fn set_view_layers(&mut self, count: u32);

    fn set_log_level(&mut self, _level: log::LevelFilter) {}

    /// Feeds a decoder configuration blob to one of the layer decoders.
    fn push_config(&mut self, role: LayerRole, dsi: &[u8]) -> Result<(), Error>;

    /// Submits one layer's payload for the access unit at `pts`. Returns
    /// whether a decoded picture is now ready.
    fn submit(&mut self, role: LayerRole, payload: &[u8], pts: u64) -> Result<bool, Error>;

    /// Drains one buffered picture after the last access unit. Returns
    /// whether a picture came out.
    fn flush(&mut self) -> Result<bool, Error>;

    fn picture_info(&mut self) -> Result<PictureInfo, Error>;

    /// Like [`DecoderEngine::picture_info`] but for the second output view.
    fn picture_info_copy(&mut self) -> Result<PictureInfo, Error>;

    /// Hands out the current picture without copying, when the engine
    /// supports it.
    fn map_output(&mut self) -> Result<Option<HwFrame>, Error>;

    /// Copies the current picture into caller storage. Returns false when
    /// the engine dropped the picture instead.
    fn copy_output(&mut self, target: PlanarTarget) -> Result<bool, Error>;

    fn version(&self) -> String;
}

/// Creates engines on demand, so the filter can tear one down and build a
/// fresh one on a stop/seek cycle.
pub trait EngineFactory {
    type Engine: DecoderEngine;

    fn new_engine(&mut self, mode: EngineMode, config: &EngineConfig) -> Result<Self::Engine, Error>;
}
