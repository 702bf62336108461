// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Traits and data types at the boundary between the filter and its host
//! pipeline: compressed packet sources, the decoded frame sink, and the
//! per-stream input configuration the host hands over at bind time.

use crate::engine::HwFrame;
use crate::frame_queue::FrameInfo;
use crate::Fraction;
use crate::PixelFormat;

/// Host-assigned identifier of one bound input stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PortId(pub u32);

/// Borrowed view of the packet at the head of an input queue.
#[derive(Clone, Debug)]
pub struct PacketRef<'a> {
    pub dts: Option<u64>,
    pub cts: Option<u64>,
    pub duration: u32,
    pub sap_type: u8,
    pub seek: bool,
    pub data: &'a [u8],
}

/// One input stream's compressed packet queue.
pub trait PacketSource {
    /// The packet at the head of the queue, if any. Repeated calls return
    /// the same packet until [`PacketSource::pop`].
    fn peek(&mut self) -> Option<PacketRef<'_>>;

    fn pop(&mut self);

    /// True once the stream is drained and no more packets will arrive.
    fn is_eos(&self) -> bool;
}

/// Decoded output stream properties, republished whenever geometry changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputProps {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub sar: Fraction,
}

/// One decoded frame owned by the filter, headed downstream.
#[derive(Clone, Debug)]
pub struct OutputFrame {
    pub data: Vec<u8>,
    pub info: FrameInfo,
}

/// The downstream end of the filter.
pub trait OutputSink {
    fn publish(&mut self, props: &OutputProps);

    fn set_decoder_name(&mut self, name: &str);

    fn send(&mut self, frame: OutputFrame);

    /// Sends an engine-owned frame without copying. The sink signals it is
    /// done with the frame by dropping it.
    fn send_hw(&mut self, frame: HwFrame, info: FrameInfo);

    fn eos(&mut self);
}

/// The filter's view of the pipeline it is mounted in.
pub trait HostPipeline {
    type Source: PacketSource;
    type Sink: OutputSink;

    fn source(&mut self, port: PortId) -> &mut Self::Source;

    fn sink(&mut self) -> &mut Self::Sink;

    /// Tears down the output stream, typically when the base input goes away.
    fn remove_sink(&mut self);
}

/// Coding format of a bound input stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CodingFormat {
    Hevc,
    /// HEVC enhancement layers carried in their own stream.
    Lhvc,
    Avc,
}

/// Everything the host declares about an input stream when binding it.
#[derive(Clone, Debug)]
pub struct InputConfig {
    pub id: u32,
    /// Identifier of the stream this one depends on, zero for independent
    /// base streams.
    pub dep_id: u32,
    pub format: CodingFormat,
    /// Set on streams flagged as carrying a scalable enhancement of another
    /// stream.
    pub scalable: bool,
    pub dsi: Option<Vec<u8>>,
}
