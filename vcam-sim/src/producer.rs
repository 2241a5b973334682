//! 生产线程
//!
//! 每个正在推流的设备一个 OS 线程。每个 tick：
//! 1. 停止检查 → 取一块空 buffer (没有就跳过填充)；
//! 2. 在设备锁内取快照，锁外填充：帧源 → 居中放置 → 曝光/增益；
//! 3. 交还 buffer (Done)，推进帧索引；
//! 4. 按目标帧间隔睡眠，超时则降速；睡眠可被停止信号打断。

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use vcam_core::error::Result;
use vcam_core::frame::{BufferState, FrameBuffer, FrameMetadata};
use vcam_core::telemetry::ProducerTelemetry;
use vcam_core::time::{self, Pace};
use vcam_core::traits::BufferSink;

use crate::device::DeviceShared;
use crate::pipeline::{apply_exposure_gain, place};
use crate::source::fill_synthetic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProducerState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
}

/// 原子存储的 [`ProducerState`]
#[derive(Debug, Default)]
pub(crate) struct AtomicProducerState(AtomicU8);

impl AtomicProducerState {
    pub(crate) fn load(&self) -> ProducerState {
        match self.0.load(Ordering::Acquire) {
            1 => ProducerState::Running,
            2 => ProducerState::Stopping,
            _ => ProducerState::Idle,
        }
    }

    pub(crate) fn store(&self, state: ProducerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// 生产线程写、控制面读的计数器
#[derive(Debug, Default)]
pub(crate) struct ProducerCounters {
    frames_produced: AtomicU64,
    empty_ticks: AtomicU64,
    fallback_frames: AtomicU64,
    overruns: AtomicU64,
    aborted_rows: AtomicU64,
}

impl ProducerCounters {
    pub(crate) fn snapshot(&self, effective_fps: Option<f64>) -> ProducerTelemetry {
        ProducerTelemetry {
            frames_produced: self.frames_produced.load(Ordering::Relaxed),
            empty_ticks: self.empty_ticks.load(Ordering::Relaxed),
            fallback_frames: self.fallback_frames.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            aborted_rows: self.aborted_rows.load(Ordering::Relaxed),
            effective_fps,
        }
    }
}

/// 运行中的生产线程句柄
///
/// `stop` 或 Drop 都会等待线程退出后才返回。
#[derive(Debug)]
pub struct Producer {
    stop: Arc<AtomicBool>,
    wake: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Producer {
    pub(crate) fn spawn(shared: Arc<DeviceShared>) -> Result<Self> {
        let (wake, wake_rx) = crossbeam_channel::bounded(1);
        let stop = Arc::new(AtomicBool::new(false));

        let name = format!("vcam-producer-{}", shared.id().0);
        let handle = thread::Builder::new().name(name).spawn({
            let stop = stop.clone();
            move || run(shared, stop, wake_rx)
        })?;

        Ok(Self {
            stop,
            wake,
            handle: Some(handle),
        })
    }

    /// 发出停止信号并 join
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        // 打断正在进行的睡眠
        let _ = self.wake.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(target: "vcam::producer", "Producer thread panicked");
            }
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: Arc<DeviceShared>, stop: Arc<AtomicBool>, wake: Receiver<()>) {
    tracing::debug!(target: "vcam::producer", "{}: producer started", shared.id());
    let mut scratch = Vec::new();

    while !stop.load(Ordering::Acquire) {
        let tick_start = Instant::now();

        match shared.queue().pop_active() {
            Some(mut buffer) => {
                fill_buffer(&shared, &mut buffer, &mut scratch);
                shared.queue().mark_done(buffer, BufferState::Done);
                shared.counters().frames_produced.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                shared.counters().empty_ticks.fetch_add(1, Ordering::Relaxed);
            }
        }

        let interval = shared.interval_for_tick();
        match time::pace(tick_start.elapsed(), interval) {
            Pace::Overrun { interval } => {
                shared.counters().overruns.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    target: "vcam::producer",
                    "{}: tick overran, throttling to {:.2} fps",
                    shared.id(),
                    interval.fps()
                );
                shared.throttle(interval);
            }
            Pace::Sleep(remaining) => {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                match wake.recv_timeout(remaining) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }
    }

    tracing::debug!(target: "vcam::producer", "{}: producer exited", shared.id());
}

/// 在锁外填充一块 buffer。帧源失败时本帧退化为合成帧。
fn fill_buffer(shared: &DeviceShared, buffer: &mut FrameBuffer, scratch: &mut Vec<u8>) {
    let snap = shared.tick_snapshot();
    let format = snap.format;
    let mut metadata = FrameMetadata {
        exposure: snap.exposure,
        gain: snap.gain,
        ..Default::default()
    };

    // 排队之后格式变大了：本 tick 就地换成够大的 buffer
    let size = format.image_size() as usize;
    if buffer.capacity() < size {
        tracing::debug!(
            target: "vcam::producer",
            "{}: growing buffer {} from {} to {} bytes",
            shared.id(),
            buffer.index(),
            buffer.capacity(),
            size
        );
        *buffer = FrameBuffer::new(buffer.index(), size);
    }

    let plane = buffer.plane_mut();
    match snap.source.frame_bytes(snap.frame_index, scratch) {
        Ok(Some(src)) => {
            let report = place(src, &snap.source_format, plane, &format);
            if report.rows_aborted > 0 {
                shared
                    .counters()
                    .aborted_rows
                    .fetch_add(report.rows_aborted as u64, Ordering::Relaxed);
            }
            metadata.source_index = Some(snap.frame_index);
        }
        Ok(None) => fill_synthetic(plane, &format),
        Err(e) => {
            tracing::warn!(
                target: "vcam::producer",
                "{}: frame {} unavailable ({}), using synthetic frame",
                shared.id(),
                snap.frame_index,
                e
            );
            shared.counters().fallback_frames.fetch_add(1, Ordering::Relaxed);
            metadata.fallback = true;
            fill_synthetic(plane, &format);
        }
    }

    apply_exposure_gain(plane, &format, snap.exposure, snap.gain);

    buffer.bytes_used = size;
    buffer.sequence = shared.next_sequence();
    buffer.timestamp = time::now_timestamp();
    buffer.metadata = metadata;
    buffer.format = Some(format);

    shared.advance_frame();
}
