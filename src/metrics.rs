//! Process-wide counters for the radio link and the bot.
//!
//! Counters are plain relaxed atomics; [`snapshot`] reads them all at once for logging or
//! the `nodes` JSON summary.
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

static FRAMES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static FRAMES_SENT: AtomicU64 = AtomicU64::new(0);
static NOISE_BYTES: AtomicU64 = AtomicU64::new(0);
static OVERSIZE_FRAMES: AtomicU64 = AtomicU64::new(0);
static DECODE_ERRORS: AtomicU64 = AtomicU64::new(0);
static MESSAGES_PUBLISHED: AtomicU64 = AtomicU64::new(0);
static ACKS_DELIVERED: AtomicU64 = AtomicU64::new(0);
static ACKS_FAILED: AtomicU64 = AtomicU64::new(0);
static ACKS_TIMED_OUT: AtomicU64 = AtomicU64::new(0);
static HANDLER_ERRORS: AtomicU64 = AtomicU64::new(0);

pub fn inc_frames_received() {
    FRAMES_RECEIVED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_frames_sent() {
    FRAMES_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn add_noise_bytes(n: u64) {
    NOISE_BYTES.fetch_add(n, Ordering::Relaxed);
}
pub fn inc_oversize_frames() {
    OVERSIZE_FRAMES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_decode_errors() {
    DECODE_ERRORS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_messages_published() {
    MESSAGES_PUBLISHED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_acks_delivered() {
    ACKS_DELIVERED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_acks_failed() {
    ACKS_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_acks_timed_out() {
    ACKS_TIMED_OUT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_handler_errors() {
    HANDLER_ERRORS.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Snapshot {
    pub frames_received: u64,
    pub frames_sent: u64,
    pub noise_bytes: u64,
    pub oversize_frames: u64,
    pub decode_errors: u64,
    pub messages_published: u64,
    pub acks_delivered: u64,
    pub acks_failed: u64,
    pub acks_timed_out: u64,
    pub handler_errors: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        frames_received: FRAMES_RECEIVED.load(Ordering::Relaxed),
        frames_sent: FRAMES_SENT.load(Ordering::Relaxed),
        noise_bytes: NOISE_BYTES.load(Ordering::Relaxed),
        oversize_frames: OVERSIZE_FRAMES.load(Ordering::Relaxed),
        decode_errors: DECODE_ERRORS.load(Ordering::Relaxed),
        messages_published: MESSAGES_PUBLISHED.load(Ordering::Relaxed),
        acks_delivered: ACKS_DELIVERED.load(Ordering::Relaxed),
        acks_failed: ACKS_FAILED.load(Ordering::Relaxed),
        acks_timed_out: ACKS_TIMED_OUT.load(Ordering::Relaxed),
        handler_errors: HANDLER_ERRORS.load(Ordering::Relaxed),
    }
}
