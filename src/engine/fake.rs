// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Scripted in-memory engine used by the filter tests.
//!
//! The fake records every call into a shared [`FakeState`] and plays back a
//! script of [`FakeStep`]s: each `submit` or `flush` consumes one step and
//! either holds the picture back or makes one available.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use crate::engine::DecoderEngine;
use crate::engine::EngineConfig;
use crate::engine::EngineFactory;
use crate::engine::EngineMode;
use crate::engine::HwFrame;
use crate::engine::HwPlane;
use crate::engine::LayerRole;
use crate::engine::PictureInfo;
use crate::engine::PlanarTarget;
use crate::ChromaFormat;
use crate::Error;
use crate::Fraction;

/// What the engine does on the next `submit` or `flush` call.
#[derive(Clone, Debug)]
pub enum FakeStep {
    /// Buffer the input, no picture yet.
    Hold,
    /// Make this picture the current output.
    Picture(FakePicture),
}

/// A canned output picture with per-plane fill bytes.
#[derive(Clone, Debug)]
pub struct FakePicture {
    pub info: PictureInfo,
    pub y_fill: u8,
    pub u_fill: u8,
    pub v_fill: u8,
    /// When set, `copy_output` reports the picture as dropped.
    pub copy_fails: bool,
}

impl FakePicture {
    pub fn new(info: PictureInfo) -> Self {
        Self {
            info,
            y_fill: 0x40,
            u_fill: 0x80,
            v_fill: 0xc0,
            copy_fails: false,
        }
    }
}

/// Builds an 8-bit 4:2:0 picture description with stride equal to width.
pub fn picture_info(width: u32, height: u32, timestamp: u64) -> PictureInfo {
    PictureInfo {
        width,
        height,
        y_stride: width,
        u_stride: width / 2,
        v_stride: width / 2,
        bit_depth: 8,
        chroma_format: ChromaFormat::C420,
        sar: Fraction::SQUARE,
        timestamp,
    }
}

/// Shared call log and playback state for one engine instance.
#[derive(Default)]
pub struct FakeState {
    pub started: bool,
    /// Engine instance dropped, set back to false by `Drop`.
    pub alive: bool,
    pub active_decoders: Option<u32>,
    pub view_layers: Option<u32>,
    pub log_level: Option<log::LevelFilter>,
    pub configs: Vec<(LayerRole, Vec<u8>)>,
    pub submissions: Vec<(LayerRole, Vec<u8>, u64)>,
    pub flushes: u32,
    pub script: VecDeque<FakeStep>,
    pub current: Option<FakePicture>,
}

pub struct FakeEngine {
    state: Rc<RefCell<FakeState>>,
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        self.state.borrow_mut().alive = false;
    }
}

impl FakeEngine {
    fn step(&mut self) -> bool {
        let mut state = self.state.borrow_mut();
        match state.script.pop_front() {
            Some(FakeStep::Picture(pic)) => {
                state.current = Some(pic);
                true
            }
            Some(FakeStep::Hold) | None => false,
        }
    }

    fn plane(len: usize, fill: u8, stride: usize) -> HwPlane {
        HwPlane {
            data: vec![fill; len].into(),
            offset: 0,
            stride,
        }
    }
}

impl DecoderEngine for FakeEngine {
    fn start(&mut self) -> Result<(), Error> {
        self.state.borrow_mut().started = true;
        Ok(())
    }

    fn set_active_decoders(&mut self, count: u32) {
        self.state.borrow_mut().active_decoders = Some(count);
    }

    fn set_view_layers(&mut self, count: u32) {
        self.state.borrow_mut().view_layers = Some(count);
    }

    fn set_log_level(&mut self, level: log::LevelFilter) {
        self.state.borrow_mut().log_level = Some(level);
    }

    fn push_config(&mut self, role: LayerRole, dsi: &[u8]) -> Result<(), Error> {
        self.state.borrow_mut().configs.push((role, dsi.to_vec()));
        Ok(())
    }

    fn submit(&mut self, role: LayerRole, payload: &[u8], pts: u64) -> Result<bool, Error> {
        self.state
            .borrow_mut()
            .submissions
            .push((role, payload.to_vec(), pts));
        Ok(self.step())
    }

    fn flush(&mut self) -> Result<bool, Error> {
        self.state.borrow_mut().flushes += 1;
        Ok(self.step())
    }

    fn picture_info(&mut self) -> Result<PictureInfo, Error> {
        let state = self.state.borrow();
        state
            .current
            .as_ref()
            .map(|p| p.info.clone())
            .ok_or(Error::BadParameter)
    }

    fn picture_info_copy(&mut self) -> Result<PictureInfo, Error> {
        self.picture_info()
    }

    fn map_output(&mut self) -> Result<Option<HwFrame>, Error> {
        let state = self.state.borrow();
        let Some(pic) = state.current.as_ref() else {
            return Ok(None);
        };
        let info = &pic.info;
        let h = info.height as usize;
        let chroma_h = match info.chroma_format {
            ChromaFormat::C420 => h / 2,
            _ => h,
        };
        Ok(Some(HwFrame {
            planes: [
                Self::plane(info.y_stride as usize * h, pic.y_fill, info.y_stride as usize),
                Self::plane(
                    info.u_stride as usize * chroma_h,
                    pic.u_fill,
                    info.u_stride as usize,
                ),
                Self::plane(
                    info.v_stride as usize * chroma_h,
                    pic.v_fill,
                    info.v_stride as usize,
                ),
            ],
            info: info.clone(),
        }))
    }

    fn copy_output(&mut self, target: PlanarTarget) -> Result<bool, Error> {
        let state = self.state.borrow();
        let Some(pic) = state.current.as_ref() else {
            return Ok(false);
        };
        if pic.copy_fails {
            return Ok(false);
        }
        // Offset the luma fill by the selected view count so stereo tests can
        // tell the two copies apart.
        let view = state.view_layers.unwrap_or(0) as u8;
        target.y.fill(pic.y_fill.wrapping_add(view));
        target.u.fill(pic.u_fill);
        target.v.fill(pic.v_fill);
        Ok(true)
    }

    fn version(&self) -> String {
        "FakeHEVC v2.0".into()
    }
}

/// Hands out [`FakeEngine`]s and keeps their state handles so tests can
/// inspect engines created mid-run, e.g. across a stop/seek reset.
#[derive(Default)]
pub struct FakeFactory {
    pub script: VecDeque<FakeStep>,
    pub states: Vec<Rc<RefCell<FakeState>>>,
    pub modes: Vec<EngineMode>,
    pub configs: Vec<EngineConfig>,
}

impl FakeFactory {
    pub fn with_script(script: impl IntoIterator<Item = FakeStep>) -> Self {
        Self {
            script: script.into_iter().collect(),
            ..Default::default()
        }
    }

    /// State handle of the most recently created engine.
    pub fn last_state(&self) -> Rc<RefCell<FakeState>> {
        Rc::clone(self.states.last().unwrap_or_else(|| {
            panic!("no engine created yet");
        }))
    }
}

impl EngineFactory for FakeFactory {
    type Engine = FakeEngine;

    fn new_engine(&mut self, mode: EngineMode, config: &EngineConfig) -> Result<FakeEngine, Error> {
        let state = Rc::new(RefCell::new(FakeState {
            alive: true,
            script: std::mem::take(&mut self.script),
            ..Default::default()
        }));
        self.modes.push(mode);
        self.configs.push(config.clone());
        self.states.push(Rc::clone(&state));
        Ok(FakeEngine { state })
    }
}
