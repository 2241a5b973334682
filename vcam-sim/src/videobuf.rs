//! Buffer 队列：生产线程与消费端之间的所有权移交
//!
//! ```text
//!   consumer ──requeue──▶ active (Mutex<VecDeque>) ──pop──▶ producer
//!      ▲                                                      │
//!      └──────── done channel (tokio mpsc) ◀──mark_done───────┘
//! ```
//!
//! buffer 在任意时刻只属于一方：active 队列、生产线程或消费端。

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{ready, Context, Poll};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use vcam_core::error::{Result, VcamError};
use vcam_core::frame::{BufferState, FrameBuffer};
use vcam_core::traits::{BufferSink, Stream};
use vcam_core::FuturesStream;

use crate::device::VirtualDevice;
use crate::lock;

pub(crate) type Delivery = (FrameBuffer, BufferState);

#[derive(Debug, Default)]
pub struct BufferQueue {
    active: Mutex<VecDeque<FrameBuffer>>,
    /// None：没有消费端，或设备已拔出
    done_tx: Mutex<Option<UnboundedSender<Delivery>>>,
    /// 消费端当前持有 (已取出、未归还) 的 buffer 数
    outstanding: AtomicUsize,
    next_index: AtomicUsize,
    /// 当前这一轮分配的第一个编号；更早的 buffer 归还时直接丢弃
    generation: AtomicUsize,
    unplugged: AtomicBool,
}

impl BufferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// REQBUFS：分配 `count` 块大小为 `size` 的 buffer，返回给调用方排队
    pub fn allocate_buffers(&self, count: usize, size: usize) -> Vec<FrameBuffer> {
        let first = self.next_index.fetch_add(count, Ordering::Relaxed);
        self.generation.store(first, Ordering::Release);
        (first..first + count)
            .map(|i| FrameBuffer::new(i as u32, size))
            .collect()
    }

    /// QBUF：放回 active 队列。容量不足当前帧大小时就地扩容；
    /// 上一轮推流分配的 buffer 被丢弃。返回是否入队。
    pub fn queue_buffer(&self, mut buffer: FrameBuffer, min_size: usize) -> bool {
        let stale = (buffer.index() as usize) < self.generation.load(Ordering::Acquire);
        if stale || self.is_unplugged() {
            tracing::trace!(target: "vcam::device", "Dropping stale buffer {}", buffer.index());
            return false;
        }
        if buffer.capacity() < min_size {
            tracing::debug!(
                target: "vcam::device",
                "Growing buffer {} from {} to {} bytes",
                buffer.index(),
                buffer.capacity(),
                min_size
            );
            buffer = FrameBuffer::new(buffer.index(), min_size);
        }
        buffer.bytes_used = 0;
        lock(&self.active).push_back(buffer);
        true
    }

    /// 生产线程取下一块空 buffer
    pub fn pop_active(&self) -> Option<FrameBuffer> {
        lock(&self.active).pop_front()
    }

    pub fn active_len(&self) -> usize {
        lock(&self.active).len()
    }

    /// 停流：active 中所有 buffer 以 Error 状态交还
    pub fn flush_active(&self) -> usize {
        let drained: Vec<_> = lock(&self.active).drain(..).collect();
        let n = drained.len();
        for buffer in drained {
            self.mark_done(buffer, BufferState::Error);
        }
        n
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// 绑定唯一的消费端。已有存活的消费端时返回 Busy。
    pub fn attach_consumer(&self) -> Result<UnboundedReceiver<Delivery>> {
        if self.is_unplugged() {
            return Err(VcamError::Disconnected("device unplugged".into()));
        }
        let mut tx = lock(&self.done_tx);
        if let Some(existing) = tx.as_ref() {
            if !existing.is_closed() {
                return Err(VcamError::Busy {
                    outstanding: self.outstanding(),
                });
            }
        }
        let (new_tx, rx) = mpsc::unbounded_channel();
        *tx = Some(new_tx);
        self.outstanding.store(0, Ordering::Release);
        Ok(rx)
    }

    /// 设备拔出：关闭交付通道，消费端随后看到 Disconnected
    pub fn disconnect(&self) {
        self.unplugged.store(true, Ordering::Release);
        lock(&self.done_tx).take();
        lock(&self.active).clear();
    }

    pub fn is_unplugged(&self) -> bool {
        self.unplugged.load(Ordering::Acquire)
    }

    fn checked_out(&self) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    fn checked_in(&self, n: usize) {
        // 不会减到负数：只有消费端自己持有的 buffer 才会被归还
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_sub(n))
            });
    }
}

impl BufferSink for BufferQueue {
    fn mark_done(&self, buffer: FrameBuffer, state: BufferState) {
        let tx = lock(&self.done_tx);
        match tx.as_ref() {
            Some(tx) => {
                if tx.send((buffer, state)).is_err() {
                    tracing::trace!(target: "vcam::device", "Consumer gone, dropping buffer");
                }
            }
            None => tracing::trace!(target: "vcam::device", "No consumer attached, dropping buffer"),
        }
    }
}

/// 消费端句柄：DQBUF / QBUF / STREAMON / STREAMOFF
///
/// 同时实现了 `futures_core::Stream`，可以直接用 `StreamExt` 组合。
/// Drop 时自动停流。
#[derive(Debug)]
pub struct CaptureStream {
    device: Arc<VirtualDevice>,
    rx: UnboundedReceiver<Delivery>,
    /// 本句柄取出而尚未归还的 buffer
    held: usize,
    started: bool,
}

impl CaptureStream {
    pub(crate) fn new(device: Arc<VirtualDevice>, rx: UnboundedReceiver<Delivery>) -> Self {
        Self {
            device,
            rx,
            held: 0,
            started: false,
        }
    }

    pub fn device(&self) -> &Arc<VirtualDevice> {
        &self.device
    }

    fn take_done(&mut self, buffer: FrameBuffer) -> FrameBuffer {
        self.held += 1;
        self.device.queue().checked_out();
        buffer
    }

    /// 非阻塞地取一块已完成的 buffer
    pub fn try_next_frame(&mut self) -> Result<Option<FrameBuffer>> {
        loop {
            match self.rx.try_recv() {
                Ok((buffer, BufferState::Done)) => return Ok(Some(self.take_done(buffer))),
                Ok((_, BufferState::Error)) => continue,
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => {
                    return Err(VcamError::Disconnected(self.device.id().to_string()))
                }
            }
        }
    }
}

#[async_trait]
impl Stream for CaptureStream {
    async fn start(&mut self) -> Result<()> {
        self.device.start_streaming()?;
        self.started = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.started = false;
        self.device.stop_streaming()
    }

    async fn next_frame(&mut self) -> Result<FrameBuffer> {
        if !self.device.is_streaming() {
            // 停流后仍可取走已经完成的 buffer
            return match self.try_next_frame()? {
                Some(buffer) => Ok(buffer),
                None => Err(VcamError::StreamNotStarted),
            };
        }

        loop {
            match self.rx.recv().await {
                Some((buffer, BufferState::Done)) => return Ok(self.take_done(buffer)),
                // 停流时退回的空 buffer，丢弃
                Some((_, BufferState::Error)) => {
                    if !self.device.is_streaming() {
                        return Err(VcamError::StreamNotStarted);
                    }
                }
                None => return Err(VcamError::Disconnected(self.device.id().to_string())),
            }
        }
    }

    fn requeue(&mut self, buffer: FrameBuffer) -> Result<()> {
        if self.held == 0 {
            return Err(VcamError::InvalidArgument(format!(
                "buffer {} was not dequeued from this stream",
                buffer.index()
            )));
        }
        self.held -= 1;
        self.device.queue().checked_in(1);
        self.device.requeue(buffer)
    }
}

impl FuturesStream for CaptureStream {
    type Item = FrameBuffer;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match ready!(this.rx.poll_recv(cx)) {
                Some((buffer, BufferState::Done)) => return Poll::Ready(Some(this.take_done(buffer))),
                Some((_, BufferState::Error)) => continue,
                None => return Poll::Ready(None),
            }
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        // 丢弃的 buffer 不会再回来
        self.device.queue().checked_in(self.held);
        if self.started {
            if let Err(e) = self.device.stop_streaming() {
                tracing::warn!(target: "vcam::device", "Failed to stop stream on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_returns_buffers_as_errors() {
        let q = BufferQueue::new();
        let mut rx = q.attach_consumer().unwrap();
        for b in q.allocate_buffers(3, 16) {
            q.queue_buffer(b, 16);
        }
        assert_eq!(q.active_len(), 3);
        assert_eq!(q.flush_active(), 3);
        for _ in 0..3 {
            let (_, state) = rx.try_recv().unwrap();
            assert_eq!(state, BufferState::Error);
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn second_consumer_is_rejected_until_first_drops() {
        let q = BufferQueue::new();
        let rx = q.attach_consumer().unwrap();
        assert!(matches!(q.attach_consumer(), Err(VcamError::Busy { .. })));
        drop(rx);
        assert!(q.attach_consumer().is_ok());
    }

    #[test]
    fn undersized_buffer_is_grown_on_queue() {
        let q = BufferQueue::new();
        let b = q.allocate_buffers(1, 8).pop().unwrap();
        q.queue_buffer(b, 32);
        let b = q.pop_active().unwrap();
        assert_eq!(b.capacity(), 32);
        assert_eq!(b.index(), 0);
    }

    #[test]
    fn buffers_from_previous_round_are_dropped() {
        let q = BufferQueue::new();
        let old = q.allocate_buffers(2, 8);
        let fresh = q.allocate_buffers(2, 8);
        for b in old {
            assert!(!q.queue_buffer(b, 8));
        }
        for b in fresh {
            assert!(q.queue_buffer(b, 8));
        }
        assert_eq!(q.active_len(), 2);
    }

    #[test]
    fn disconnect_closes_channel() {
        let q = BufferQueue::new();
        let mut rx = q.attach_consumer().unwrap();
        q.disconnect();
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
        assert!(matches!(q.attach_consumer(), Err(VcamError::Disconnected(_))));
    }
}
