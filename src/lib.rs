// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Filter plugin adapting an external layered HEVC/SHVC decoder engine into a
//! streaming media pipeline.
//!
//! The filter binds up to [`MAX_STREAMS`] elementary streams (an independent
//! base layer plus dependent enhancement layers) into one decode unit, drives
//! the engine one synchronized access unit at a time, and reformats the
//! engine's planar output into the layouts the downstream pipeline expects.
//! The host pipeline and the decoder engine are both external collaborators,
//! reached through the traits in [`port`] and [`engine`].

pub mod codec;
pub mod engine;
pub mod filter;
pub mod frame_queue;
pub mod output;
pub mod port;
pub mod registry;

pub(crate) mod bitstream;

use thiserror::Error;

/// Ceiling on simultaneously bound input streams, inherited from the target
/// engine's two-decoder limit.
pub const MAX_STREAMS: usize = 2;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Capability mismatch: unknown coding format, no engine available, or a
    /// configuration the engine cannot express. The offending port is left
    /// unbound.
    #[error("unsupported configuration: {0}")]
    Unsupported(&'static str),
    /// Two independent base streams were routed to the same filter instance.
    /// The host should instantiate a second filter instead.
    #[error("conflicting independent base streams")]
    ConflictingBaseStreams,
    /// The registry already holds the maximum number of streams.
    #[error("too many input streams for one decoder instance")]
    CapacityExceeded,
    /// A decoder configuration record failed to parse, or layers disagree on
    /// the NAL length field size.
    #[error("non compliant bitstream: {0}")]
    NonCompliantBitstream(String),
    /// Invalid plane index or output pointer requested by a consumer.
    #[error("bad parameter")]
    BadParameter,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self {
            width: value.0,
            height: value.1,
        }
    }
}

/// A rational number, used for sample aspect ratios.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Fraction {
    pub num: u32,
    pub den: u32,
}

impl Fraction {
    pub const SQUARE: Fraction = Fraction { num: 1, den: 1 };

    /// Equality by cross multiplication, so `2/2` compares equal to `1/1`
    /// without going through floats.
    pub fn cross_eq(&self, other: &Fraction) -> bool {
        self.num as u64 * other.den as u64 == self.den as u64 * other.num as u64
    }
}

impl Default for Fraction {
    fn default() -> Self {
        Self::SQUARE
    }
}

/// Chroma subsampling class, numbered like `chroma_format_idc`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, enumn::N)]
pub enum ChromaFormat {
    C420 = 1,
    C422 = 2,
    C444 = 3,
}

impl Default for ChromaFormat {
    /// 4:2:0 is assumed whenever no parameter set ever said otherwise.
    fn default() -> Self {
        ChromaFormat::C420
    }
}

/// Output pixel format identifier, derived from luma bit depth and chroma
/// subsampling.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Yuv420,
    Yuv420P10,
    Yuv422,
    Yuv422P10,
    Yuv444,
    Yuv444P10,
}

impl PixelFormat {
    pub fn from_depth(luma_bpp: u32, chroma: ChromaFormat) -> PixelFormat {
        match (chroma, luma_bpp) {
            (ChromaFormat::C420, 10) => PixelFormat::Yuv420P10,
            (ChromaFormat::C420, _) => PixelFormat::Yuv420,
            (ChromaFormat::C422, 10) => PixelFormat::Yuv422P10,
            (ChromaFormat::C422, _) => PixelFormat::Yuv422,
            (ChromaFormat::C444, 10) => PixelFormat::Yuv444P10,
            (ChromaFormat::C444, _) => PixelFormat::Yuv444,
        }
    }
}

/// Returns the size of a planar frame buffer of `stride`x`height` samples for
/// the given subsampling class.
pub fn frame_buffer_size(chroma: ChromaFormat, stride: u32, height: u32) -> usize {
    let luma = stride as usize * height as usize;
    match chroma {
        ChromaFormat::C420 => luma * 3 / 2,
        ChromaFormat::C422 => luma * 2,
        ChromaFormat::C444 => luma * 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_format_from_depth() {
        assert_eq!(
            PixelFormat::from_depth(8, ChromaFormat::C420),
            PixelFormat::Yuv420
        );
        assert_eq!(
            PixelFormat::from_depth(10, ChromaFormat::C420),
            PixelFormat::Yuv420P10
        );
        assert_eq!(
            PixelFormat::from_depth(10, ChromaFormat::C444),
            PixelFormat::Yuv444P10
        );
    }

    #[test]
    fn frame_buffer_size_per_class() {
        assert_eq!(
            frame_buffer_size(ChromaFormat::C420, 64, 32),
            64 * 32 * 3 / 2
        );
        assert_eq!(frame_buffer_size(ChromaFormat::C422, 64, 32), 64 * 32 * 2);
        assert_eq!(frame_buffer_size(ChromaFormat::C444, 64, 32), 64 * 32 * 3);
    }

    #[test]
    fn fraction_cross_eq() {
        let a = Fraction { num: 2, den: 2 };
        let b = Fraction { num: 1, den: 1 };
        assert!(a.cross_eq(&b));
        assert!(!Fraction { num: 4, den: 3 }.cross_eq(&b));
    }
}
