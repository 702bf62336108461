// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decoder configuration record and parameter set field extraction.
//!
//! This is deliberately not a full bitstream parser: only the handful of
//! fields the layer configuration engine needs (geometry, bit depths, chroma
//! class, layer/multiview signaling) are read, everything else is skipped.

pub mod avc;
pub mod hevc;
