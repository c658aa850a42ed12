//! Per-channel counters for the connection manager.
//!
//! Counters are atomics in a `DashMap` keyed by channel and rendered in the
//! Prometheus text exposition format. Channels are emitted in key order so
//! the output is deterministic.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use wsmux_core::ChannelKey;

#[derive(Default)]
pub struct ChannelCounter {
    map: DashMap<ChannelKey, AtomicU64>,
}

impl ChannelCounter {
    /// Increment by 1.
    pub fn inc(&self, key: ChannelKey) {
        self.map
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, key: ChannelKey) -> u64 {
        self.map
            .get(&key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {name} counter");
        let mut rows: Vec<(ChannelKey, u64)> = self
            .map
            .iter()
            .map(|r| (*r.key(), r.value().load(Ordering::Relaxed)))
            .collect();
        rows.sort();
        for (key, val) in rows {
            let _ = writeln!(out, "{name}{{channel=\"{key}\"}} {val}");
        }
    }
}

#[derive(Default)]
pub struct ChannelMetrics {
    pub opens: ChannelCounter,
    pub reconnects_scheduled: ChannelCounter,
    pub frames_in: ChannelCounter,
    pub frames_raw: ChannelCounter,
    pub frames_dropped: ChannelCounter,
    pub sends: ChannelCounter,
    pub sends_rejected: ChannelCounter,
    pub heartbeats: ChannelCounter,
}

impl ChannelMetrics {
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.opens.render("wsmux_opens_total", &mut out);
        self.reconnects_scheduled.render("wsmux_reconnects_scheduled_total", &mut out);
        self.frames_in.render("wsmux_frames_in_total", &mut out);
        self.frames_raw.render("wsmux_frames_raw_total", &mut out);
        self.frames_dropped.render("wsmux_frames_dropped_total", &mut out);
        self.sends.render("wsmux_sends_total", &mut out);
        self.sends_rejected.render("wsmux_sends_rejected_total", &mut out);
        self.heartbeats.render("wsmux_heartbeats_total", &mut out);
        out
    }
}
