// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

pub mod recorder;
pub mod store;

pub use recorder::{CaptureMarkers, CaptureRecorder, CompletedCapture, RecorderMode};
pub use store::{CaptureStore, CapturedRequest, MatchedRequest};
