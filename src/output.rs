// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Output geometry tracking and planar frame layout.
//!
//! [`OutputGeometry`] mirrors the last published output properties and tells
//! the filter when a decoded picture requires republishing. The layout
//! helpers carve caller buffers into planes for the single, top-bottom
//! stereo and 2x2 packed output modes.

use crate::engine::HwFrame;
use crate::engine::PictureInfo;
use crate::engine::PlanarTarget;
use crate::frame_buffer_size;
use crate::port::OutputProps;
use crate::ChromaFormat;
use crate::Error;
use crate::Fraction;
use crate::PixelFormat;

/// Last published output geometry. `out_size == 0` means nothing has been
/// published from a decoded picture yet.
#[derive(Copy, Clone, Debug, Default)]
pub struct OutputGeometry {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub bit_depth: u32,
    pub chroma: ChromaFormat,
    pub sar: Fraction,
    /// Byte size of one output frame at this geometry.
    pub out_size: usize,
}

impl OutputGeometry {
    /// Whether `info` differs from the published geometry. Aspect ratios
    /// compare by cross multiplication.
    pub fn needs_update(&self, info: &PictureInfo) -> bool {
        self.out_size == 0
            || self.width != info.width
            || self.height != info.height
            || self.stride != info.y_stride
            || self.bit_depth != info.bit_depth
            || self.chroma != info.chroma_format
            || !self.sar.cross_eq(&info.sar)
    }

    pub fn update(&mut self, info: &PictureInfo) {
        self.width = info.width;
        self.height = info.height;
        self.stride = info.y_stride;
        self.bit_depth = info.bit_depth;
        self.chroma = info.chroma_format;
        self.sar = info.sar;
        self.out_size = frame_buffer_size(self.chroma, self.stride, self.height);
    }

    pub fn props(&self) -> OutputProps {
        OutputProps {
            width: self.width,
            height: self.height,
            stride: self.stride,
            format: PixelFormat::from_depth(self.bit_depth, self.chroma),
            sar: self.sar,
        }
    }

    fn plane_sizes(&self) -> (usize, usize) {
        let luma = self.stride as usize * self.height as usize;
        let chroma = match self.chroma {
            ChromaFormat::C420 => luma / 4,
            ChromaFormat::C422 => luma / 2,
            ChromaFormat::C444 => luma,
        };
        (luma, chroma)
    }

    /// Splits one output buffer of [`OutputGeometry::out_size`] bytes into
    /// its Y, U and V planes.
    pub fn single_target<'a>(&self, buf: &'a mut [u8]) -> PlanarTarget<'a> {
        let (luma, chroma) = self.plane_sizes();
        let (y, uv) = buf.split_at_mut(luma);
        let (u, v) = uv.split_at_mut(chroma);
        PlanarTarget { y, u, v }
    }

    /// Splits a double-size buffer into two view targets, each view's planes
    /// stacked grouped by plane: Y0 Y1 U0 U1 V0 V1. 4:2:0 only.
    pub fn stereo_targets<'a>(&self, buf: &'a mut [u8]) -> (PlanarTarget<'a>, PlanarTarget<'a>) {
        let (luma, chroma) = self.plane_sizes();
        let (ys, rest) = buf.split_at_mut(2 * luma);
        let (y0, y1) = ys.split_at_mut(luma);
        let (us, vs) = rest.split_at_mut(2 * chroma);
        let (u0, u1) = us.split_at_mut(chroma);
        let (v0, v1) = vs.split_at_mut(chroma);
        (
            PlanarTarget {
                y: y0,
                u: u0,
                v: v0,
            },
            PlanarTarget {
                y: y1,
                u: u1,
                v: v1,
            },
        )
    }

    /// Copies a decoded frame into one quadrant of a 2x2 packed frame of
    /// four times [`OutputGeometry::out_size`] bytes. Quadrants are numbered
    /// row major: 0 top left, 1 top right, 2 bottom left, 3 bottom right.
    pub fn pack_quadrant(
        &self,
        dst: &mut [u8],
        frame: &HwFrame,
        quadrant: usize,
    ) -> Result<(), Error> {
        if quadrant >= 4 || dst.len() < self.out_size * 4 {
            return Err(Error::BadParameter);
        }
        let stride = self.stride as usize;
        let height = self.height as usize;
        let luma = stride * height;

        // Offsets of the quadrant inside the double-width planes.
        let idx_w = (quadrant % 2) * stride;
        let idx_h = (quadrant / 2) * height * 2 * stride;

        let (src_y, src_y_stride) = frame.plane(0)?;
        for row in 0..height {
            let d = idx_h + idx_w + row * 2 * stride;
            dst[d..d + stride].copy_from_slice(&src_y[row * src_y_stride..][..stride]);
        }

        let (chroma_rows, chroma_width, u_base, v_base, dst_chroma_stride) = match self.chroma {
            ChromaFormat::C420 => (
                height / 2,
                stride / 2,
                4 * luma + idx_w / 2 + idx_h / 4,
                5 * luma + idx_w / 2 + idx_h / 4,
                stride,
            ),
            ChromaFormat::C422 => (
                height,
                stride / 2,
                4 * luma + idx_w / 2 + idx_h / 2,
                6 * luma + idx_w / 2 + idx_h / 2,
                stride,
            ),
            ChromaFormat::C444 => (
                height,
                stride,
                4 * luma + idx_w + idx_h,
                8 * luma + idx_w + idx_h,
                2 * stride,
            ),
        };

        let (src_u, src_u_stride) = frame.plane(1)?;
        let (src_v, src_v_stride) = frame.plane(2)?;
        for row in 0..chroma_rows {
            let d = u_base + row * dst_chroma_stride;
            dst[d..d + chroma_width].copy_from_slice(&src_u[row * src_u_stride..][..chroma_width]);
            let d = v_base + row * dst_chroma_stride;
            dst[d..d + chroma_width].copy_from_slice(&src_v[row * src_v_stride..][..chroma_width]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::picture_info;
    use crate::engine::HwPlane;

    fn geometry(width: u32, height: u32) -> OutputGeometry {
        let mut g = OutputGeometry::default();
        g.update(&picture_info(width, height, 0));
        g
    }

    fn filled_frame(info: PictureInfo, y: u8, u: u8, v: u8) -> HwFrame {
        let h = info.height as usize;
        let plane = |fill: u8, stride: usize, rows: usize| HwPlane {
            data: vec![fill; stride * rows].into(),
            offset: 0,
            stride,
        };
        HwFrame {
            planes: [
                plane(y, info.y_stride as usize, h),
                plane(u, info.u_stride as usize, h / 2),
                plane(v, info.v_stride as usize, h / 2),
            ],
            info,
        }
    }

    #[test]
    fn update_needed_only_on_change() {
        let mut g = OutputGeometry::default();
        let info = picture_info(64, 32, 0);
        // First picture always publishes.
        assert!(g.needs_update(&info));
        g.update(&info);
        assert!(!g.needs_update(&info));

        let mut wider = info.clone();
        wider.width = 128;
        assert!(g.needs_update(&wider));

        let mut deeper = info.clone();
        deeper.bit_depth = 10;
        assert!(g.needs_update(&deeper));
    }

    #[test]
    fn sar_compares_by_cross_multiplication() {
        let mut g = OutputGeometry::default();
        let mut info = picture_info(64, 32, 0);
        info.sar = Fraction { num: 2, den: 2 };
        g.update(&info);
        info.sar = Fraction { num: 1, den: 1 };
        assert!(!g.needs_update(&info));
        info.sar = Fraction { num: 4, den: 3 };
        assert!(g.needs_update(&info));
    }

    #[test]
    fn out_size_per_chroma_class() {
        let mut g = OutputGeometry::default();
        let mut info = picture_info(64, 32, 0);
        g.update(&info);
        assert_eq!(g.out_size, 64 * 32 * 3 / 2);
        info.chroma_format = ChromaFormat::C444;
        g.update(&info);
        assert_eq!(g.out_size, 64 * 32 * 3);
    }

    #[test]
    fn single_target_plane_split() {
        let g = geometry(16, 8);
        let mut buf = vec![0u8; g.out_size];
        let t = g.single_target(&mut buf);
        assert_eq!(t.y.len(), 16 * 8);
        assert_eq!(t.u.len(), 16 * 8 / 4);
        assert_eq!(t.v.len(), 16 * 8 / 4);
    }

    #[test]
    fn stereo_targets_are_disjoint_and_ordered() {
        let g = geometry(16, 8);
        let mut buf = vec![0u8; g.out_size * 2];
        {
            let (first, second) = g.stereo_targets(&mut buf);
            first.y.fill(1);
            second.y.fill(2);
            first.u.fill(3);
            second.u.fill(4);
            first.v.fill(5);
            second.v.fill(6);
        }
        let luma = 16 * 8;
        let chroma = luma / 4;
        assert!(buf[..luma].iter().all(|&b| b == 1));
        assert!(buf[luma..2 * luma].iter().all(|&b| b == 2));
        assert!(buf[2 * luma..2 * luma + chroma].iter().all(|&b| b == 3));
        assert!(buf[2 * luma + chroma..2 * luma + 2 * chroma]
            .iter()
            .all(|&b| b == 4));
        assert!(buf[2 * luma + 2 * chroma..2 * luma + 3 * chroma]
            .iter()
            .all(|&b| b == 5));
        assert!(buf[2 * luma + 3 * chroma..].iter().all(|&b| b == 6));
    }

    #[test]
    fn pack_quadrants_tile_2x2() {
        let g = geometry(8, 8);
        let mut dst = vec![0u8; g.out_size * 4];
        for q in 0..4 {
            let frame = filled_frame(picture_info(8, 8, 0), 10 + q as u8, 20 + q as u8, 30 + q as u8);
            g.pack_quadrant(&mut dst, &frame, q).unwrap();
        }

        // Packed luma plane is 16x16 with quadrant fills.
        let packed_stride = 16;
        assert_eq!(dst[0], 10);
        assert_eq!(dst[8], 11);
        assert_eq!(dst[8 * packed_stride], 12);
        assert_eq!(dst[8 * packed_stride + 8], 13);

        // Packed chroma planes are 8x8 starting after the 16x16 luma.
        let u0 = 16 * 16;
        let v0 = u0 + 8 * 8;
        assert_eq!(dst[u0], 20);
        assert_eq!(dst[u0 + 4], 21);
        assert_eq!(dst[u0 + 4 * 8], 22);
        assert_eq!(dst[u0 + 4 * 8 + 4], 23);
        assert_eq!(dst[v0], 30);
        assert_eq!(dst[v0 + 4 * 8 + 4], 33);
    }

    #[test]
    fn pack_rejects_bad_quadrant_or_short_buffer() {
        let g = geometry(8, 8);
        let frame = filled_frame(picture_info(8, 8, 0), 1, 2, 3);
        let mut dst = vec![0u8; g.out_size * 4];
        assert!(matches!(
            g.pack_quadrant(&mut dst, &frame, 4),
            Err(Error::BadParameter)
        ));
        let mut short = vec![0u8; g.out_size];
        assert!(matches!(
            g.pack_quadrant(&mut short, &frame, 0),
            Err(Error::BadParameter)
        ));
    }
}
