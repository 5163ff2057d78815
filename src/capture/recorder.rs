// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Capture Stream Recorder
 * Reconstructs discrete request captures from the proxy's delimited stdout
 *
 * The intercepting proxy prints each observed request between fixed
 * delimiter lines, one section at a time. This state machine re-assembles
 * those interleaved lines into complete captures.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use serde::{Deserialize, Serialize};

/// Delimiter lines the proxy script embeds in its stdout.
///
/// Kept as data so a proxy script revision only changes this table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureMarkers {
    pub begin: String,
    pub end: String,
    pub command_begin: String,
    pub command_end: String,
    pub headers_begin: String,
    pub headers_end: String,
    pub body_begin: String,
    pub body_end: String,
    /// Header field prefix used to extract the destination host
    pub host_prefix: String,
}

impl Default for CaptureMarkers {
    fn default() -> Self {
        Self {
            begin: "----POST_FETCH_BEGIN----".to_string(),
            end: "----POST_FETCH_END----".to_string(),
            command_begin: "----POST_FETCH_CMD_BEGIN----".to_string(),
            command_end: "----POST_FETCH_CMD_END----".to_string(),
            headers_begin: "----POST_FETCH_HEADERS_BEGIN----".to_string(),
            headers_end: "----POST_FETCH_HEADERS_END----".to_string(),
            body_begin: "----POST_FETCH_BODY_BEGIN----".to_string(),
            body_end: "----POST_FETCH_BODY_END----".to_string(),
            host_prefix: "Host:".to_string(),
        }
    }
}

/// Current position of the recorder within a capture cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderMode {
    Idle,
    Ready,
    Command,
    Headers,
    Body,
}

/// One fully reassembled capture, ready for watch-list filtering
#[derive(Debug, Clone)]
pub struct CompletedCapture {
    pub host: String,
    pub command: String,
    pub headers: String,
    pub body: String,
    pub raw: String,
}

/// Line-by-line state machine over the proxy's stdout.
///
/// One instance exists per proxy subprocess; the begin delimiter resets it,
/// so a capture truncated by a proxy restart is simply discarded.
pub struct CaptureRecorder {
    markers: CaptureMarkers,
    mode: RecorderMode,
    command: String,
    headers: String,
    body: String,
    raw: String,
    host: String,
}

impl CaptureRecorder {
    pub fn new(markers: CaptureMarkers) -> Self {
        Self {
            markers,
            mode: RecorderMode::Idle,
            command: String::new(),
            headers: String::new(),
            body: String::new(),
            raw: String::new(),
            host: String::new(),
        }
    }

    pub fn mode(&self) -> RecorderMode {
        self.mode
    }

    fn reset(&mut self) {
        self.mode = RecorderMode::Idle;
        self.command.clear();
        self.headers.clear();
        self.body.clear();
        self.raw.clear();
        self.host.clear();
    }

    /// Consume one stdout line. Returns a capture when the end delimiter
    /// closes a cycle that extracted a destination host.
    pub fn feed_line(&mut self, line: &str) -> Option<CompletedCapture> {
        let markers = &self.markers;

        if line.contains(&markers.begin) {
            self.reset();
            self.mode = RecorderMode::Ready;
            return None;
        }
        if line.contains(&markers.command_begin) {
            self.mode = RecorderMode::Command;
            return None;
        }
        if line.contains(&markers.headers_begin) {
            self.mode = RecorderMode::Headers;
            return None;
        }
        if line.contains(&markers.body_begin) {
            self.mode = RecorderMode::Body;
            return None;
        }
        if line.contains(&markers.command_end)
            || line.contains(&markers.headers_end)
            || line.contains(&markers.body_end)
        {
            self.mode = RecorderMode::Ready;
            return None;
        }
        if line.contains(&markers.end) {
            self.mode = RecorderMode::Idle;
            if self.host.is_empty() {
                // No host header observed; nothing to file the capture under.
                self.reset();
                return None;
            }
            let capture = CompletedCapture {
                host: std::mem::take(&mut self.host),
                command: std::mem::take(&mut self.command),
                headers: std::mem::take(&mut self.headers),
                body: std::mem::take(&mut self.body),
                raw: std::mem::take(&mut self.raw),
            };
            return Some(capture);
        }

        match self.mode {
            RecorderMode::Command => {
                self.command.push_str(line);
                self.command.push('\n');
                self.raw.push_str(line);
                self.raw.push('\n');
            }
            RecorderMode::Headers => {
                if let Some(idx) = line.find(&markers.host_prefix) {
                    self.host = line[idx + markers.host_prefix.len()..].trim().to_string();
                }
                self.headers.push_str(line);
                self.headers.push('\n');
                self.raw.push_str(line);
                self.raw.push('\n');
            }
            RecorderMode::Body => {
                self.body.push_str(line);
                self.body.push('\n');
                self.raw.push_str(line);
                self.raw.push('\n');
            }
            RecorderMode::Idle | RecorderMode::Ready => {}
        }
        None
    }
}
