// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The layered decoder filter.
//!
//! [`ShvcFilter`] binds up to two elementary streams into one decode unit:
//! an independent HEVC or AVC base layer plus an optional LHVC enhancement
//! stream. Each process round selects the access unit with the smallest
//! decode timestamp across all inputs, submits every layer's payload to the
//! engine, and reformats whatever picture comes out for the downstream sink.

use byteorder::BigEndian;
use byteorder::WriteBytesExt;

use crate::codec::avc;
use crate::codec::hevc;
use crate::engine::DecoderEngine;
use crate::engine::EngineConfig;
use crate::engine::EngineFactory;
use crate::engine::EngineMode;
use crate::engine::LayerRole;
use crate::engine::Threading;
use crate::frame_queue::FrameInfo;
use crate::frame_queue::FrameInfoQueue;
use crate::output::OutputGeometry;
use crate::port::CodingFormat;
use crate::port::HostPipeline;
use crate::port::InputConfig;
use crate::port::OutputFrame;
use crate::port::OutputProps;
use crate::port::OutputSink;
use crate::port::PacketSource;
use crate::port::PortId;
use crate::registry::AttachOutcome;
use crate::registry::Detach;
use crate::registry::StreamRegistry;
use crate::ChromaFormat;
use crate::Error;
use crate::Fraction;
use crate::PixelFormat;
use crate::MAX_STREAMS;

/// Host-tunable filter options, fixed for the lifetime of the filter.
#[derive(Clone, Debug, Default)]
pub struct Options {
    pub threading: Threading,
    /// Engine thread count, zero for one less than the machine's cores.
    pub threads: u32,
    /// Hand engine-owned frames downstream instead of copying them out.
    pub no_copy: bool,
    /// Pack four consecutive pictures into one double-width, double-height
    /// output frame.
    pub pack_hfr: bool,
    /// Tear the engine down and rebuild it on a stop with data submitted,
    /// for engines that do not flush cleanly on seeks.
    pub seek_reset: bool,
    /// Emit multiview content as one top-bottom stereo frame per picture.
    pub force_stereo: bool,
}

/// Outcome of one process round.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Waiting on input packets or on the sink releasing a shared frame.
    Pending,
    /// One access unit consumed, call again.
    Consumed,
    /// End of stream signalled downstream, nothing left to do.
    Finished,
}

/// Pipeline events the filter reacts to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// Add or drop one enhancement layer.
    QualitySwitch { up: bool },
    Stop,
}

struct PackedFrame {
    data: Vec<u8>,
    info: FrameInfo,
}

pub struct ShvcFilter<F: EngineFactory> {
    opts: Options,
    factory: F,
    registry: StreamRegistry,
    engine: Option<F::Engine>,
    frame_infos: FrameInfoQueue,
    geometry: OutputGeometry,

    /// NAL length field size shared by all HEVC layers, zero until known.
    nal_length_size: u8,
    /// Base stream is AVC, engine runs in hybrid mode.
    hybrid: bool,
    nb_layers: u32,
    cur_layer: u32,
    is_multiview: bool,
    luma_bpp: u32,
    chroma_bpp: u32,
    chroma: ChromaFormat,

    decoder_started: bool,
    dec_frames: u64,
    /// Quadrant counter for the 2x2 packed mode.
    frame_idx: usize,
    packed: Option<PackedFrame>,
    /// An engine-owned frame is downstream; decode is paused until
    /// [`ShvcFilter::release_frame`].
    frame_out: bool,
    /// Whether the last published geometry was the double-height stereo
    /// layout, so a stereo toggle republishes even at constant picture size.
    published_stereo: bool,
    eos_sent: bool,
}

impl<F: EngineFactory> ShvcFilter<F> {
    pub fn new(factory: F, opts: Options) -> Self {
        Self {
            opts,
            factory,
            registry: StreamRegistry::default(),
            engine: None,
            frame_infos: FrameInfoQueue::default(),
            geometry: OutputGeometry::default(),
            nal_length_size: 0,
            hybrid: false,
            nb_layers: 1,
            cur_layer: 1,
            is_multiview: false,
            luma_bpp: 8,
            chroma_bpp: 8,
            chroma: ChromaFormat::default(),
            decoder_started: false,
            dec_frames: 0,
            frame_idx: 0,
            packed: None,
            frame_out: false,
            published_stereo: false,
            eos_sent: false,
        }
    }

    /// Binds or reconfigures one input stream.
    pub fn configure_input<H: HostPipeline>(
        &mut self,
        host: &mut H,
        port: PortId,
        cfg: InputConfig,
    ) -> Result<(), Error> {
        let enhancement = cfg.dep_id != 0 || cfg.format == CodingFormat::Lhvc;
        // An enhancement bound before the base does no engine work yet; leave
        // its fingerprint unset so the re-bind once the base is up is not
        // skipped as unchanged.
        let crc = if enhancement && self.engine.is_none() {
            0
        } else {
            cfg.dsi.as_deref().map(crc32fast::hash).unwrap_or(0)
        };
        if self.registry.attach(port, cfg.clone(), crc)? == AttachOutcome::Unchanged {
            return Ok(());
        }
        if enhancement {
            self.configure_enhancement(host, &cfg)
        } else {
            self.configure_base(host, &cfg)
        }
    }

    fn configure_enhancement<H: HostPipeline>(
        &mut self,
        host: &mut H,
        cfg: &InputConfig,
    ) -> Result<(), Error> {
        if !cfg.scalable {
            log::debug!("ignoring non scalable dependent stream {}", cfg.id);
            return Ok(());
        }
        self.nb_layers = 2;
        self.cur_layer = 2;

        if let Some(dsi) = cfg.dsi.as_deref() {
            if self.hybrid {
                // The hybrid engine takes the enhancement record as is.
                if let Some(engine) = self.engine.as_mut() {
                    engine.push_config(LayerRole::Enhancement, dsi)?;
                }
            } else {
                let rec = hevc::parse_hvcc(dsi)?;
                if self.nal_length_size != 0 && rec.nal_length_size != self.nal_length_size {
                    return Err(Error::NonCompliantBitstream(format!(
                        "enhancement NAL length field is {} bytes, base uses {}",
                        rec.nal_length_size, self.nal_length_size
                    )));
                }
                if self.nal_length_size == 0 {
                    self.nal_length_size = rec.nal_length_size;
                }

                // The engine takes enhancement parameter sets as one
                // length-prefixed NAL stream, matching the payload framing.
                let mut blob = Vec::new();
                for ps in &rec.param_sets {
                    blob.write_uint::<BigEndian>(
                        ps.data.len() as u64,
                        usize::from(self.nal_length_size),
                    )
                    .map_err(anyhow::Error::from)?;
                    blob.extend_from_slice(&ps.data);
                }
                if let Some(engine) = self.engine.as_mut() {
                    engine.push_config(LayerRole::Enhancement, &blob)?;
                }
            }
        }

        if let Some(engine) = self.engine.as_mut() {
            engine.set_active_decoders(self.cur_layer - 1);
            engine.set_view_layers(self.cur_layer - 1);
            let name = if self.hybrid {
                format!("{}-AVC|H264+LHVC", engine.version())
            } else {
                format!("{}-LHVC", engine.version())
            };
            host.sink().set_decoder_name(&name);
        }
        log::info!("bound enhancement stream {} on base {}", cfg.id, cfg.dep_id);
        Ok(())
    }

    fn configure_base<H: HostPipeline>(
        &mut self,
        host: &mut H,
        cfg: &InputConfig,
    ) -> Result<(), Error> {
        let mode = match cfg.format {
            CodingFormat::Hevc => EngineMode::Hevc,
            CodingFormat::Avc => EngineMode::HybridAvcBase,
            CodingFormat::Lhvc => {
                return Err(Error::Unsupported("enhancement stream bound as base"))
            }
        };
        self.hybrid = mode == EngineMode::HybridAvcBase;
        // A (re)established base starts over as a single-layer set; attached
        // enhancement streams raise it again.
        self.nb_layers = 1;
        self.cur_layer = 1;
        self.is_multiview = false;

        let mut width = 0u32;
        let mut height = 0u32;
        match (mode, cfg.dsi.as_deref()) {
            (EngineMode::Hevc, Some(dsi)) => {
                let rec = hevc::parse_hvcc(dsi)?;
                self.nal_length_size = rec.nal_length_size;
                for ps in &rec.param_sets {
                    match ps.nal_type {
                        hevc::NAL_SPS => {
                            let sps = hevc::parse_sps(&ps.data)?;
                            if sps.layer_id == 0 {
                                width = sps.width;
                                height = sps.height;
                            } else {
                                self.nb_layers = self.nb_layers.max(2);
                            }
                            self.luma_bpp = self.luma_bpp.max(sps.bit_depth_luma);
                            self.chroma_bpp = self.chroma_bpp.max(sps.bit_depth_chroma);
                            if let Some(c) = ChromaFormat::n(sps.chroma_format_idc as i64) {
                                self.chroma = c;
                            }
                        }
                        hevc::NAL_VPS => {
                            // A broken VPS only costs multiview detection.
                            if let Ok(vps) = hevc::parse_vps(&ps.data) {
                                if vps.multiview {
                                    self.is_multiview = true;
                                }
                                self.nb_layers =
                                    self.nb_layers.max(vps.max_layers.min(MAX_STREAMS as u32));
                            }
                        }
                        _ => (),
                    }
                }
            }
            (EngineMode::HybridAvcBase, Some(dsi)) => {
                let rec = avc::parse_avcc(dsi)?;
                log::debug!("AVC base NAL length field is {} bytes", rec.nal_length_size);
                self.luma_bpp = rec.luma_bit_depth;
                self.chroma_bpp = rec.chroma_bit_depth;
                if let Some(c) = ChromaFormat::n(rec.chroma_format_idc as i64) {
                    self.chroma = c;
                }
                for sps in &rec.sps {
                    let info = avc::parse_sps(sps)?;
                    width = width.max(info.width);
                    height = height.max(info.height);
                }
            }
            (_, None) => {
                // No record to inspect; trust the caller's scalability flag.
                if cfg.scalable {
                    self.nb_layers = 2;
                }
            }
        }

        if cfg.scalable && self.nb_layers > 1 {
            self.cur_layer = self.nb_layers;
        }

        if self.engine.is_none() {
            let config = self.engine_config();
            let mut engine = self.factory.new_engine(mode, &config)?;
            engine.set_log_level(config.log_level);
            self.engine = Some(engine);
        }
        if let (Some(engine), Some(dsi)) = (self.engine.as_mut(), cfg.dsi.as_deref()) {
            engine.push_config(LayerRole::Base, dsi)?;
        }
        if let Some(engine) = self.engine.as_mut() {
            if self.cur_layer > 1 {
                engine.set_active_decoders(self.cur_layer - 1);
                engine.set_view_layers(self.cur_layer - 1);
            }
            let name = match mode {
                EngineMode::Hevc if self.nb_layers > 1 => format!("{}-LHVC", engine.version()),
                EngineMode::Hevc => engine.version(),
                EngineMode::HybridAvcBase if self.nb_layers > 1 => {
                    format!("{}-AVC|H264+LHVC", engine.version())
                }
                EngineMode::HybridAvcBase => format!("{}-AVC|H264", engine.version()),
            };
            host.sink().set_decoder_name(&name);
        }

        // Advertise the parameter set geometry right away so downstream can
        // size itself before the first picture lands.
        if width > 0 {
            host.sink().publish(&OutputProps {
                width,
                height,
                stride: width,
                format: PixelFormat::from_depth(self.luma_bpp.max(self.chroma_bpp), self.chroma),
                sar: Fraction::SQUARE,
            });
        }
        log::info!("bound base stream {} ({} layers)", cfg.id, self.nb_layers);
        Ok(())
    }

    /// Unbinds one input stream. Losing the base tears the whole output
    /// down; losing an enhancement layer falls back to base-only decode.
    pub fn remove_input<H: HostPipeline>(&mut self, host: &mut H, port: PortId) {
        match self.registry.detach(port) {
            Detach::Base => {
                self.engine = None;
                self.decoder_started = false;
                self.frame_infos.clear();
                self.packed = None;
                self.frame_idx = 0;
                self.frame_out = false;
                self.eos_sent = false;
                self.dec_frames = 0;
                self.nb_layers = 1;
                self.cur_layer = 1;
                self.is_multiview = false;
                self.nal_length_size = 0;
                self.hybrid = false;
                self.luma_bpp = 8;
                self.chroma_bpp = 8;
                self.chroma = ChromaFormat::default();
                self.geometry = OutputGeometry::default();
                self.published_stereo = false;
                host.remove_sink();
            }
            Detach::Layer => {
                self.nb_layers = 1;
                self.cur_layer = 1;
                if let Some(engine) = self.engine.as_mut() {
                    engine.set_active_decoders(0);
                    engine.set_view_layers(0);
                }
            }
            Detach::Unknown => (),
        }
    }

    /// Runs one decode round: pick the access unit with the smallest decode
    /// timestamp, feed every layer, emit at most one picture.
    pub fn process<H: HostPipeline>(&mut self, host: &mut H) -> Result<ProcessStatus, Error> {
        if self.eos_sent {
            return Ok(ProcessStatus::Finished);
        }
        if self.frame_out {
            return Ok(ProcessStatus::Pending);
        }
        if self.engine.is_none() || self.registry.is_empty() {
            return Ok(ProcessStatus::Pending);
        }
        if !self.decoder_started {
            if let Some(engine) = self.engine.as_mut() {
                engine.start()?;
            }
            self.decoder_started = true;
        }

        let mut ports = [PortId(0); MAX_STREAMS];
        let n = self.registry.len();
        for (i, entry) in self.registry.iter().enumerate() {
            ports[i] = entry.port;
        }

        // Pass one: find the smallest decode timestamp across all inputs,
        // dropping empty clock packets on the way. A stream with no packet
        // and no end of stream blocks the whole access unit.
        let mut min_dts: Option<u64> = None;
        let mut nb_eos = 0;
        for &port in &ports[..n] {
            let src = host.source(port);
            loop {
                let head = match src.peek() {
                    None => {
                        if src.is_eos() {
                            nb_eos += 1;
                            break;
                        }
                        return Ok(ProcessStatus::Pending);
                    }
                    Some(pkt) => (pkt.data.is_empty(), pkt.dts.or(pkt.cts).unwrap_or(0)),
                };
                let (empty, dts) = head;
                if empty {
                    src.pop();
                    continue;
                }
                min_dts = Some(min_dts.map_or(dts, |m| m.min(dts)));
                break;
            }
        }

        if n > 0 && nb_eos == n {
            let flushed = match self.engine.as_mut() {
                Some(engine) => engine.flush()?,
                None => false,
            };
            if flushed {
                self.flush_picture(host)?;
                return Ok(ProcessStatus::Consumed);
            }
            log::debug!(
                "all inputs drained, {} access units submitted",
                self.dec_frames
            );
            host.sink().eos();
            self.eos_sent = true;
            return Ok(ProcessStatus::Finished);
        }
        let Some(min_dts) = min_dts else {
            return Ok(ProcessStatus::Pending);
        };

        // Pass two: submit every layer of that access unit.
        let mut has_pic = false;
        for (idx, &port) in ports[..n].iter().enumerate() {
            let src = host.source(port);
            let Some(pkt) = src.peek() else {
                continue;
            };
            let dts = pkt.dts.or(pkt.cts).unwrap_or(0);
            if dts != min_dts {
                continue;
            }
            let cts = pkt.cts.unwrap_or(dts);
            self.frame_infos.record_if_new(FrameInfo {
                cts,
                duration: pkt.duration,
                sap_type: pkt.sap_type,
                seek: pkt.seek,
            });
            let role = if idx == 0 {
                Some(LayerRole::Base)
            } else if self.cur_layer > 1 {
                Some(LayerRole::Enhancement)
            } else {
                // Enhancement data while only the base is selected is
                // consumed without decoding.
                None
            };
            if let Some(role) = role {
                if let Some(engine) = self.engine.as_mut() {
                    if engine.submit(role, pkt.data, cts)? {
                        has_pic = true;
                    }
                }
            }
            src.pop();
        }

        // One access unit went in, whether or not a picture comes out yet.
        self.dec_frames += 1;
        if has_pic {
            self.flush_picture(host)?;
        }
        Ok(ProcessStatus::Consumed)
    }

    fn flush_picture<H: HostPipeline>(&mut self, host: &mut H) -> Result<(), Error> {
        let stereo = self.opts.force_stereo
            && self.is_multiview
            && self.cur_layer > 1
            && !self.opts.no_copy;

        let info = match self.engine.as_mut() {
            Some(engine) => engine.picture_info()?,
            None => return Ok(()),
        };
        if self.geometry.needs_update(&info) || stereo != self.published_stereo {
            self.geometry.update(&info);
            self.published_stereo = stereo;
            let mut props = self.geometry.props();
            if self.opts.pack_hfr {
                props.width *= 2;
                props.height *= 2;
                props.stride *= 2;
            } else if stereo {
                props.height *= 2;
            }
            log::debug!(
                "decoded output now {}x{} stride {}",
                props.width,
                props.height,
                props.stride
            );
            host.sink().publish(&props);
        }

        if self.opts.pack_hfr {
            let frame = match self.engine.as_mut() {
                Some(engine) => engine.map_output()?,
                None => None,
            };
            let Some(frame) = frame else {
                return Ok(());
            };
            let fi = self.frame_infos.pop_oldest().unwrap_or_default();
            let size = self.geometry.out_size * 4;
            // The packed frame carries the timing of its first quadrant.
            let packed = self.packed.get_or_insert_with(|| PackedFrame {
                data: vec![0; size],
                info: fi,
            });
            self.geometry
                .pack_quadrant(&mut packed.data, &frame, self.frame_idx % 4)?;
            self.frame_idx += 1;
            if self.frame_idx % 4 == 0 {
                if let Some(done) = self.packed.take() {
                    host.sink().send(OutputFrame {
                        data: done.data,
                        info: done.info,
                    });
                }
            }
        } else if stereo {
            let fi = self.frame_infos.pop_oldest().unwrap_or_default();
            let mut data = vec![0u8; self.geometry.out_size * 2];
            {
                let (first, second) = self.geometry.stereo_targets(&mut data);
                if let Some(engine) = self.engine.as_mut() {
                    engine.set_view_layers(0);
                    engine.copy_output(first)?;
                    engine.set_view_layers(1);
                    engine.copy_output(second)?;
                }
            }
            host.sink().send(OutputFrame { data, info: fi });
        } else if self.opts.no_copy {
            let frame = match self.engine.as_mut() {
                Some(engine) => engine.map_output()?,
                None => None,
            };
            if let Some(frame) = frame {
                let fi = self.frame_infos.pop_oldest().unwrap_or_default();
                host.sink().send_hw(frame, fi);
                self.frame_out = true;
            }
        } else {
            let mut data = vec![0u8; self.geometry.out_size];
            let copied = match self.engine.as_mut() {
                Some(engine) => engine.copy_output(self.geometry.single_target(&mut data))?,
                None => false,
            };
            let fi = self.frame_infos.pop_oldest().unwrap_or_default();
            if copied {
                host.sink().send(OutputFrame { data, info: fi });
            }
        }
        Ok(())
    }

    /// Reacts to a pipeline event. Returns true when the event is fully
    /// handled and must not travel further upstream.
    pub fn handle_event<H: HostPipeline>(&mut self, host: &mut H, event: Event) -> bool {
        match event {
            Event::QualitySwitch { up } => {
                let target = if up {
                    (self.cur_layer + 1).min(self.nb_layers)
                } else {
                    self.cur_layer.saturating_sub(1).max(1)
                };
                if target != self.cur_layer {
                    self.cur_layer = target;
                    if let Some(engine) = self.engine.as_mut() {
                        engine.set_active_decoders(self.cur_layer - 1);
                        engine.set_view_layers(self.cur_layer - 1);
                    }
                    log::debug!(
                        "quality switch to {} of {} layers",
                        self.cur_layer,
                        self.nb_layers
                    );
                }
                false
            }
            Event::Stop => {
                self.frame_infos.clear();
                self.packed = None;
                self.frame_idx = 0;
                self.frame_out = false;
                self.eos_sent = false;
                if self.opts.seek_reset && self.dec_frames > 0 {
                    self.reset_engine_after_stop(host);
                }
                false
            }
        }
    }

    /// Drops the engine and rebuilds it from the registered stream
    /// configurations, for engines that cannot seek backwards reliably.
    fn reset_engine_after_stop<H: HostPipeline>(&mut self, host: &mut H) {
        let cur_layer = self.cur_layer;
        let nb_layers = self.nb_layers;
        self.engine = None;
        self.decoder_started = false;
        self.dec_frames = 0;
        // Fingerprints must go or the replay below would be skipped as an
        // unchanged reconfiguration.
        self.registry.invalidate_fingerprints();
        let replay: Vec<(PortId, InputConfig)> = self
            .registry
            .iter()
            .map(|e| (e.port, e.cfg.clone()))
            .collect();
        for (port, cfg) in replay {
            if let Err(err) = self.configure_input(host, port, cfg) {
                log::error!("failed to replay stream configuration after stop: {}", err);
            }
        }
        self.nb_layers = nb_layers;
        self.cur_layer = cur_layer.min(self.nb_layers.max(1));
        if let Some(engine) = self.engine.as_mut() {
            engine.set_active_decoders(self.cur_layer - 1);
            engine.set_view_layers(self.cur_layer - 1);
        }
        log::info!("engine rebuilt after stop");
    }

    /// Signals that the sink is done with the shared frame handed out in
    /// no-copy mode, unblocking decode.
    pub fn release_frame(&mut self) {
        self.frame_out = false;
    }

    fn engine_config(&self) -> EngineConfig {
        let threads = if self.opts.threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(2)
                .saturating_sub(1)
                .max(1)
        } else {
            self.opts.threads
        };
        EngineConfig {
            threads,
            threading: self.opts.threading,
            log_level: log::max_level(),
        }
    }
}
