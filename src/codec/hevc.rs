// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! HEVC decoder configuration record (hvcC/lhvC) walking and the narrow
//! SPS/VPS field extraction needed to configure the decoder engine.

use bytes::Buf;

use crate::bitstream::strip_emulation_prevention;
use crate::bitstream::RbspReader;
use crate::Error;

pub const NAL_VPS: u8 = 32;
pub const NAL_SPS: u8 = 33;
pub const NAL_PPS: u8 = 34;

/// One parameter set NAL unit carried by a configuration record.
#[derive(Debug, Clone)]
pub struct ParamSetNal {
    pub nal_type: u8,
    pub data: Vec<u8>,
}

/// Structured layer description parsed from an hvcC record: the NAL length
/// field size plus the ordered parameter set list.
#[derive(Debug, Clone)]
pub struct HevcConfigRecord {
    pub nal_length_size: u8,
    pub param_sets: Vec<ParamSetNal>,
}

fn short(what: &str) -> Error {
    Error::NonCompliantBitstream(format!("truncated hvcC record: {}", what))
}

/// Parses an ISO/IEC 14496-15 HEVCDecoderConfigurationRecord.
pub fn parse_hvcc(data: &[u8]) -> Result<HevcConfigRecord, Error> {
    let mut buf = data;
    // 22 bytes of profile/level/flags before the length size field.
    if buf.remaining() < 23 {
        return Err(short("header"));
    }
    buf.advance(21);
    let nal_length_size = (buf.get_u8() & 0x3) + 1;
    let num_arrays = buf.get_u8();

    let mut param_sets = Vec::new();
    for _ in 0..num_arrays {
        if buf.remaining() < 3 {
            return Err(short("nal array header"));
        }
        let nal_type = buf.get_u8() & 0x3f;
        let num_nalus = buf.get_u16();
        for _ in 0..num_nalus {
            if buf.remaining() < 2 {
                return Err(short("nalu length"));
            }
            let len = buf.get_u16() as usize;
            if buf.remaining() < len {
                return Err(short("nalu payload"));
            }
            param_sets.push(ParamSetNal {
                nal_type,
                data: buf.copy_to_bytes(len).to_vec(),
            });
        }
    }

    Ok(HevcConfigRecord {
        nal_length_size,
        param_sets,
    })
}

/// Fields extracted from a sequence parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpsInfo {
    pub width: u32,
    pub height: u32,
    pub bit_depth_luma: u32,
    pub bit_depth_chroma: u32,
    pub chroma_format_idc: u32,
    /// `nuh_layer_id` from the NAL header; nonzero means this SPS describes
    /// an enhancement layer.
    pub layer_id: u8,
}

/// Skips a profile_tier_level() structure.
fn skip_profile_tier_level(
    r: &mut RbspReader,
    profile_present: bool,
    max_sub_layers_minus1: u32,
) -> Result<(), Error> {
    if profile_present {
        // profile space/tier/idc, compatibility flags, constraint flags.
        r.skip(88)?;
    }
    // general_level_idc.
    r.skip(8)?;

    if max_sub_layers_minus1 > 0 {
        let mut profile_present_flag = [false; 8];
        let mut level_present_flag = [false; 8];
        for i in 0..max_sub_layers_minus1 as usize {
            profile_present_flag[i] = r.flag()?;
            level_present_flag[i] = r.flag()?;
        }
        for _ in max_sub_layers_minus1..8 {
            r.skip(2)?;
        }
        for i in 0..max_sub_layers_minus1 as usize {
            if profile_present_flag[i] {
                r.skip(88)?;
            }
            if level_present_flag[i] {
                r.skip(8)?;
            }
        }
    }
    Ok(())
}

/// Extracts geometry and depth fields from an SPS NAL unit (header included).
pub fn parse_sps(nal: &[u8]) -> Result<SpsInfo, Error> {
    if nal.len() < 3 {
        return Err(Error::NonCompliantBitstream("short SPS".into()));
    }
    let layer_id = ((nal[0] & 0x1) << 5) | (nal[1] >> 3);
    let rbsp = strip_emulation_prevention(&nal[2..]);
    let mut r = RbspReader::new(&rbsp);

    let _sps_video_parameter_set_id = r.f(4)?;
    let max_sub_layers_minus1 = r.f(3)?;
    let _temporal_id_nesting = r.flag()?;
    skip_profile_tier_level(&mut r, true, max_sub_layers_minus1)?;
    let _sps_seq_parameter_set_id = r.ue()?;

    let chroma_format_idc = r.ue()?;
    if chroma_format_idc == 3 {
        let _separate_colour_plane = r.flag()?;
    }
    let mut width = r.ue()?;
    let mut height = r.ue()?;
    if r.flag()? {
        // Conformance window, in chroma sample units.
        let left = r.ue()?;
        let right = r.ue()?;
        let top = r.ue()?;
        let bottom = r.ue()?;
        let sub_w = if chroma_format_idc == 1 || chroma_format_idc == 2 {
            2
        } else {
            1
        };
        let sub_h = if chroma_format_idc == 1 { 2 } else { 1 };
        width = width.saturating_sub((left + right) * sub_w);
        height = height.saturating_sub((top + bottom) * sub_h);
    }
    let bit_depth_luma = r.ue()? + 8;
    let bit_depth_chroma = r.ue()? + 8;

    Ok(SpsInfo {
        width,
        height,
        bit_depth_luma,
        bit_depth_chroma,
        chroma_format_idc,
        layer_id,
    })
}

/// Fields extracted from a video parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VpsInfo {
    pub max_layers: u32,
    /// The multiview bit of the VPS extension scalability mask.
    pub multiview: bool,
}

/// Extracts layer count and multiview signaling from a VPS NAL unit.
///
/// The walk stops short of HRD territory: a VPS carrying timing info is
/// reported without multiview rather than parsing the full timing tables.
pub fn parse_vps(nal: &[u8]) -> Result<VpsInfo, Error> {
    if nal.len() < 3 {
        return Err(Error::NonCompliantBitstream("short VPS".into()));
    }
    let rbsp = strip_emulation_prevention(&nal[2..]);
    let mut r = RbspReader::new(&rbsp);

    let _vps_video_parameter_set_id = r.f(4)?;
    let base_layer_internal = r.flag()?;
    let _base_layer_available = r.flag()?;
    let max_layers_minus1 = r.f(6)?;
    let max_sub_layers_minus1 = r.f(3)?;
    let _temporal_id_nesting = r.flag()?;
    let _reserved = r.f(16)?;
    skip_profile_tier_level(&mut r, true, max_sub_layers_minus1)?;

    let info = VpsInfo {
        max_layers: max_layers_minus1 + 1,
        multiview: false,
    };

    let sub_layer_ordering_present = r.flag()?;
    let first = if sub_layer_ordering_present {
        0
    } else {
        max_sub_layers_minus1
    };
    for _ in first..=max_sub_layers_minus1 {
        let _max_dec_pic_buffering = r.ue()?;
        let _num_reorder_pics = r.ue()?;
        let _max_latency_increase = r.ue()?;
    }
    let max_layer_id = r.f(6)?;
    let num_layer_sets_minus1 = r.ue()?;
    for _ in 1..=num_layer_sets_minus1 {
        for _ in 0..=max_layer_id {
            let _layer_id_included = r.flag()?;
        }
    }
    if r.flag()? {
        // vps_timing_info_present: HRD tables ahead, out of scope here.
        return Ok(info);
    }
    if !r.flag()? {
        // No vps_extension, so no scalability mask.
        return Ok(info);
    }
    r.byte_align()?;

    // vps_extension()
    if max_layers_minus1 > 0 && base_layer_internal {
        skip_profile_tier_level(&mut r, false, max_sub_layers_minus1)?;
    }
    let _splitting_flag = r.flag()?;
    let mut multiview = false;
    for i in 0..16 {
        let set = r.flag()?;
        if i == 1 {
            multiview = set;
        }
    }

    Ok(VpsInfo { multiview, ..info })
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn hvcc_round_trip() {
        let sps = build_sps(1920, 1080, 0, 0);
        let vps = build_vps(false);
        let rec =
            parse_hvcc(&build_hvcc(4, &[(NAL_VPS, vps), (NAL_SPS, sps)])).unwrap();
        assert_eq!(rec.nal_length_size, 4);
        assert_eq!(rec.param_sets.len(), 2);
        assert_eq!(rec.param_sets[0].nal_type, NAL_VPS);
        assert_eq!(rec.param_sets[1].nal_type, NAL_SPS);
    }

    #[test]
    fn hvcc_truncated() {
        let sps = build_sps(640, 480, 0, 0);
        let rec = build_hvcc(4, &[(NAL_SPS, sps)]);
        assert!(matches!(
            parse_hvcc(&rec[..rec.len() - 4]),
            Err(Error::NonCompliantBitstream(_))
        ));
        assert!(matches!(
            parse_hvcc(&[0u8; 10]),
            Err(Error::NonCompliantBitstream(_))
        ));
    }

    #[test]
    fn sps_geometry() {
        let info = parse_sps(&build_sps(1920, 1080, 0, 0)).unwrap();
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
        assert_eq!(info.bit_depth_luma, 8);
        assert_eq!(info.bit_depth_chroma, 8);
        assert_eq!(info.chroma_format_idc, 1);
        assert_eq!(info.layer_id, 0);
    }

    #[test]
    fn sps_ten_bit_enhancement_layer() {
        let info = parse_sps(&build_sps(3840, 2160, 2, 1)).unwrap();
        assert_eq!(info.bit_depth_luma, 10);
        assert_eq!(info.layer_id, 1);
    }

    #[test]
    fn vps_multiview_mask() {
        assert!(parse_vps(&build_vps(true)).unwrap().multiview);
        assert!(!parse_vps(&build_vps(false)).unwrap().multiview);
    }

    #[test]
    fn vps_layer_count() {
        let info = parse_vps(&build_vps(true)).unwrap();
        assert_eq!(info.max_layers, 2);
    }
}
