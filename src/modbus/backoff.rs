// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Retry timing for the controller link
//!
//! The delay computation is a plain function of the attempt number and the
//! waiting itself goes through the [`Sleeper`] trait, so the retry loops can
//! be driven in tests without real time passing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

/// Capped exponential backoff between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Doubling stops after this many steps
    pub max_exponent: u32,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            max_exponent: 5,
        }
    }

    /// Delay to wait after the `attempt`-th consecutive failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(self.max_exponent);
        self.base.saturating_mul(1u32 << exponent).min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(60))
    }
}

/// Fixed-pause retry budget for a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub pause: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, pause: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            pause,
        }
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real sleeper backed by the tokio timer.
///
/// When built with [`TokioSleeper::interruptible`], long waits are cut short
/// as soon as the shared running flag drops.
#[derive(Debug, Clone, Default)]
pub struct TokioSleeper {
    running: Option<Arc<AtomicBool>>,
}

impl TokioSleeper {
    const SLICE: Duration = Duration::from_millis(250);

    pub fn new() -> Self {
        Self { running: None }
    }

    pub fn interruptible(running: Arc<AtomicBool>) -> Self {
        Self {
            running: Some(running),
        }
    }
}

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        let Some(running) = &self.running else {
            tokio::time::sleep(duration).await;
            return;
        };

        let mut remaining = duration;
        while !remaining.is_zero() && running.load(Ordering::SeqCst) {
            let step = remaining.min(Self::SLICE);
            tokio::time::sleep(step).await;
            remaining -= step;
        }
    }
}

/// Sleeper that returns immediately and remembers what it was asked to wait.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|delays| delays.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
        tokio::task::yield_now().await;
    }
}
