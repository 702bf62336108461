// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! AVC decoder configuration record (avcC) walking for hybrid operation,
//! where an H.264 base layer feeds the engine alongside LHVC enhancement.

use bytes::Buf;

use crate::bitstream::strip_emulation_prevention;
use crate::bitstream::RbspReader;
use crate::Error;

/// Structured contents of an AVCDecoderConfigurationRecord.
#[derive(Debug, Clone)]
pub struct AvcConfigRecord {
    pub nal_length_size: u8,
    pub sps: Vec<Vec<u8>>,
    pub pps: Vec<Vec<u8>>,
    pub profile_idc: u8,
    /// Depths and chroma class from the record extension. Records for
    /// non-high profiles carry no extension and report 8-bit 4:2:0.
    pub luma_bit_depth: u32,
    pub chroma_bit_depth: u32,
    pub chroma_format_idc: u32,
}

fn short(what: &str) -> Error {
    Error::NonCompliantBitstream(format!("truncated avcC record: {}", what))
}

fn read_nalus(buf: &mut &[u8], count: usize, out: &mut Vec<Vec<u8>>) -> Result<(), Error> {
    for _ in 0..count {
        if buf.remaining() < 2 {
            return Err(short("nalu length"));
        }
        let len = buf.get_u16() as usize;
        if buf.remaining() < len {
            return Err(short("nalu payload"));
        }
        out.push(buf.copy_to_bytes(len).to_vec());
    }
    Ok(())
}

/// Parses an ISO/IEC 14496-15 AVCDecoderConfigurationRecord.
pub fn parse_avcc(data: &[u8]) -> Result<AvcConfigRecord, Error> {
    let mut buf = data;
    if buf.remaining() < 6 {
        return Err(short("header"));
    }
    let _configuration_version = buf.get_u8();
    let profile_idc = buf.get_u8();
    let _profile_compatibility = buf.get_u8();
    let _level_idc = buf.get_u8();
    let nal_length_size = (buf.get_u8() & 0x3) + 1;

    let mut sps = Vec::new();
    let num_sps = (buf.get_u8() & 0x1f) as usize;
    read_nalus(&mut buf, num_sps, &mut sps)?;

    if buf.remaining() < 1 {
        return Err(short("pps count"));
    }
    let mut pps = Vec::new();
    let num_pps = buf.get_u8() as usize;
    read_nalus(&mut buf, num_pps, &mut pps)?;

    let mut rec = AvcConfigRecord {
        nal_length_size,
        sps,
        pps,
        profile_idc,
        luma_bit_depth: 8,
        chroma_bit_depth: 8,
        chroma_format_idc: 1,
    };

    // High profile records append chroma and bit depth fields.
    if matches!(profile_idc, 100 | 110 | 122 | 144) && buf.remaining() >= 4 {
        rec.chroma_format_idc = (buf.get_u8() & 0x3) as u32;
        rec.luma_bit_depth = (buf.get_u8() & 0x7) as u32 + 8;
        rec.chroma_bit_depth = (buf.get_u8() & 0x7) as u32 + 8;
    }

    Ok(rec)
}

/// Geometry extracted from an AVC sequence parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvcSpsInfo {
    pub width: u32,
    pub height: u32,
}

fn skip_scaling_list(r: &mut RbspReader, size: usize) -> Result<(), Error> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = r.se()?;
            next_scale = (last_scale + delta + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

/// Extracts the cropped picture geometry from an AVC SPS NAL unit (header
/// byte included).
pub fn parse_sps(nal: &[u8]) -> Result<AvcSpsInfo, Error> {
    if nal.len() < 4 {
        return Err(Error::NonCompliantBitstream("short AVC SPS".into()));
    }
    let rbsp = strip_emulation_prevention(&nal[1..]);
    let mut r = RbspReader::new(&rbsp);

    let profile_idc = r.f(8)?;
    let _constraint_flags = r.f(8)?;
    let _level_idc = r.f(8)?;
    let _sps_id = r.ue()?;

    let mut chroma_format_idc = 1;
    if matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    ) {
        chroma_format_idc = r.ue()?;
        if chroma_format_idc == 3 {
            let _separate_colour_plane = r.flag()?;
        }
        let _bit_depth_luma_minus8 = r.ue()?;
        let _bit_depth_chroma_minus8 = r.ue()?;
        let _qpprime_y_zero_transform_bypass = r.flag()?;
        if r.flag()? {
            let lists = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..lists {
                if r.flag()? {
                    skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    let _log2_max_frame_num_minus4 = r.ue()?;
    let pic_order_cnt_type = r.ue()?;
    if pic_order_cnt_type == 0 {
        let _log2_max_pic_order_cnt_lsb_minus4 = r.ue()?;
    } else if pic_order_cnt_type == 1 {
        let _delta_pic_order_always_zero = r.flag()?;
        let _offset_for_non_ref_pic = r.se()?;
        let _offset_for_top_to_bottom_field = r.se()?;
        let num_ref_frames_in_cycle = r.ue()?;
        for _ in 0..num_ref_frames_in_cycle {
            let _offset_for_ref_frame = r.se()?;
        }
    }
    let _max_num_ref_frames = r.ue()?;
    let _gaps_in_frame_num_allowed = r.flag()?;

    let pic_width_in_mbs_minus1 = r.ue()?;
    let pic_height_in_map_units_minus1 = r.ue()?;
    let frame_mbs_only = r.flag()?;
    if !frame_mbs_only {
        let _mb_adaptive_frame_field = r.flag()?;
    }
    let _direct_8x8_inference = r.flag()?;

    let frame_mult = if frame_mbs_only { 1 } else { 2 };
    let mut width = (pic_width_in_mbs_minus1 + 1) * 16;
    let mut height = frame_mult * (pic_height_in_map_units_minus1 + 1) * 16;

    if r.flag()? {
        let left = r.ue()?;
        let right = r.ue()?;
        let top = r.ue()?;
        let bottom = r.ue()?;
        let crop_x = if chroma_format_idc == 1 || chroma_format_idc == 2 {
            2
        } else {
            1
        };
        let crop_y = if chroma_format_idc == 1 { 2 } else { 1 } * frame_mult;
        width = width.saturating_sub((left + right) * crop_x);
        height = height.saturating_sub((top + bottom) * crop_y);
    }

    Ok(AvcSpsInfo { width, height })
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn avcc_baseline_record() {
        let sps = build_sps(120, 68, 66);
        let rec = parse_avcc(&build_avcc(4, 66, &[sps], 0)).unwrap();
        assert_eq!(rec.nal_length_size, 4);
        assert_eq!(rec.sps.len(), 1);
        assert!(rec.pps.is_empty());
        assert_eq!(rec.profile_idc, 66);
        assert_eq!(rec.luma_bit_depth, 8);
        assert_eq!(rec.chroma_format_idc, 1);
    }

    #[test]
    fn avcc_high_profile_extension() {
        let sps = build_sps(120, 68, 100);
        let rec = parse_avcc(&build_avcc(4, 100, &[sps], 2)).unwrap();
        assert_eq!(rec.luma_bit_depth, 10);
        assert_eq!(rec.chroma_bit_depth, 10);
        assert_eq!(rec.chroma_format_idc, 1);
    }

    #[test]
    fn avcc_truncated() {
        let sps = build_sps(8, 8, 66);
        let rec = build_avcc(4, 66, &[sps], 0);
        assert!(matches!(
            parse_avcc(&rec[..rec.len() - 3]),
            Err(Error::NonCompliantBitstream(_))
        ));
    }

    #[test]
    fn sps_geometry_baseline() {
        let info = parse_sps(&build_sps(120, 68, 66)).unwrap();
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1088);
    }

    #[test]
    fn sps_geometry_high_profile() {
        let info = parse_sps(&build_sps(80, 45, 100)).unwrap();
        assert_eq!(info.width, 1280);
        assert_eq!(info.height, 720);
    }
}
