//! 虚拟采集设备
//!
//! 设备状态放在 `Arc<DeviceShared>` 里，与生产线程共享；
//! `VirtualDevice` 持有生产线程句柄，字段顺序保证先 join 线程再释放状态。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use vcam_core::builder::{FrameLoading, RegistryConfig};
use vcam_core::error::{Result, VcamError};
use vcam_core::format::{negotiate, FormatRequest, OutputFormat};
use vcam_core::pixel_format::{ColorScheme, FourCC, PixelLayout};
use vcam_core::spec::{DeviceSpec, DeviceSpecPatch, SpecChanges};
use vcam_core::telemetry::{DeviceHealthStatus, ProducerTelemetry};
use vcam_core::time::FrameInterval;

use crate::lock;
use crate::producer::{AtomicProducerState, Producer, ProducerCounters, ProducerState};
use crate::source::{count_frame_files, FrameSource};
use crate::videobuf::{BufferQueue, CaptureStream};

/// 设备的稳定标识，不随注册表索引移动而改变
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vcam{}", self.0)
    }
}

#[derive(Debug)]
struct DeviceState {
    spec: DeviceSpec,
    format: OutputFormat,
    source: Arc<FrameSource>,
    interval: FrameInterval,
}

/// 生产线程一个 tick 需要的全部状态，在锁内一次性拷出
#[derive(Debug)]
pub(crate) struct TickSnapshot {
    pub(crate) format: OutputFormat,
    /// 帧源按原始分辨率紧密排列
    pub(crate) source_format: OutputFormat,
    pub(crate) source: Arc<FrameSource>,
    pub(crate) exposure: i32,
    pub(crate) gain: i32,
    pub(crate) frame_index: u32,
}

#[derive(Debug)]
pub(crate) struct DeviceShared {
    id: DeviceId,
    state: Mutex<DeviceState>,
    queue: BufferQueue,
    counters: ProducerCounters,
    sequence: AtomicU64,
    producer_state: AtomicProducerState,
}

impl DeviceShared {
    fn state(&self) -> MutexGuard<'_, DeviceState> {
        lock(&self.state)
    }

    pub(crate) fn id(&self) -> DeviceId {
        self.id
    }

    pub(crate) fn queue(&self) -> &BufferQueue {
        &self.queue
    }

    pub(crate) fn counters(&self) -> &ProducerCounters {
        &self.counters
    }

    pub(crate) fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn tick_snapshot(&self) -> TickSnapshot {
        let st = self.state();
        TickSnapshot {
            format: st.format,
            source_format: OutputFormat::with_resolution(st.spec.origin(), st.format.layout()),
            source: Arc::clone(&st.source),
            exposure: st.spec.exposure,
            gain: st.spec.gain,
            frame_index: st.spec.frame_index,
        }
    }

    /// 非循环模式停在最后一帧
    pub(crate) fn advance_frame(&self) {
        let mut st = self.state();
        let count = st.source.frame_count();
        if count == 0 {
            return;
        }
        let next = st.spec.frame_index.saturating_add(1);
        st.spec.frame_index = if next < count {
            next
        } else if st.spec.looping {
            0
        } else {
            count - 1
        };
    }

    /// 从未设置过帧间隔时写回默认值
    pub(crate) fn interval_for_tick(&self) -> FrameInterval {
        let mut st = self.state();
        if !st.interval.is_set() {
            st.interval = FrameInterval::DEFAULT;
            tracing::debug!(
                target: "vcam::producer",
                "{}: no frame interval set, defaulting to {}/{}",
                self.id,
                st.interval.numerator,
                st.interval.denominator
            );
        }
        st.interval
    }

    pub(crate) fn throttle(&self, interval: FrameInterval) {
        let mut st = self.state();
        st.interval = interval;
        st.spec.fps = interval.fps_rounded();
    }
}

/// 一个虚拟采集设备
#[derive(Debug)]
pub struct VirtualDevice {
    // 先于 shared 析构：Drop 时先 join 生产线程
    producer: Mutex<Option<Producer>>,
    /// 串行化 modify，生产线程从不获取
    control: Mutex<()>,
    buffer_count: usize,
    loading: FrameLoading,
    shared: Arc<DeviceShared>,
}

impl VirtualDevice {
    /// 校验规格、协商格式、构建帧源。取值越界、几何过大或内存分配失败
    /// 会让创建失败，其余帧源错误退化为合成帧。
    pub fn create(id: DeviceId, requested: &DeviceSpec, config: &RegistryConfig) -> Result<Self> {
        let mut spec = resolve_spec(requested, &config.default_spec);
        spec.validate()?;
        let current = config
            .default_spec
            .color_scheme
            .layout()
            .unwrap_or(PixelLayout::Grey);
        let format = negotiate(&format_request(&spec), spec.resolution(), current)?;
        sync_derived(&mut spec, &format);
        spec.video_node = format!("{}{}", config.node_prefix, id.0);

        let source = build_source(id, &spec, format.layout(), config.frame_loading)?;
        let interval = FrameInterval::from_fps(spec.fps);

        tracing::info!(
            target: "vcam::device",
            "{}: created {} ({}x{} {}, origin {}, crop {}, {} source)",
            id,
            spec.video_node,
            format.width(),
            format.height(),
            format.fourcc(),
            spec.origin(),
            spec.crop_ratio,
            source.kind()
        );

        let shared = DeviceShared {
            id,
            state: Mutex::new(DeviceState {
                spec,
                format,
                source: Arc::new(source),
                interval,
            }),
            queue: BufferQueue::new(),
            counters: ProducerCounters::default(),
            sequence: AtomicU64::new(0),
            producer_state: AtomicProducerState::default(),
        };

        Ok(Self {
            producer: Mutex::new(None),
            control: Mutex::new(()),
            buffer_count: config.effective_buffer_count(),
            loading: config.frame_loading,
            shared: Arc::new(shared),
        })
    }

    pub fn id(&self) -> DeviceId {
        self.shared.id
    }

    pub(crate) fn queue(&self) -> &BufferQueue {
        &self.shared.queue
    }

    /// 当前规格，派生字段 (输出尺寸、fps、帧索引) 取实时值
    pub fn spec(&self) -> DeviceSpec {
        let st = self.shared.state();
        let mut spec = st.spec.clone();
        spec.fps = st.interval.or_default().fps_rounded();
        spec
    }

    pub fn output_format(&self) -> OutputFormat {
        self.shared.state().format
    }

    pub fn frame_interval(&self) -> FrameInterval {
        self.shared.state().interval.or_default()
    }

    pub fn source_kind(&self) -> &'static str {
        self.shared.state().source.kind()
    }

    /// 部分更新。新格式与新帧源都在锁外计算，最后在锁内一次性替换，
    /// 生产线程只会看到完整的旧状态或完整的新状态。
    pub fn modify(&self, patch: &DeviceSpecPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        patch.validate()?;

        let _serial = lock(&self.control);
        let id = self.id();
        let (current, current_format) = {
            let st = self.shared.state();
            (st.spec.clone(), st.format)
        };

        let changes = patch.changes();
        let mut next = current.clone();
        patch.apply_to(&mut next);

        if changes.contains(SpecChanges::FRAME_SOURCE)
            && patch.frame_count.is_none()
            && !next.frames_dir.as_os_str().is_empty()
        {
            next.frame_count = count_frame_files(&next.frames_dir).unwrap_or_else(|e| {
                tracing::warn!(target: "vcam::device", "{}: cannot count frames: {}", id, e);
                0
            });
        }

        let format = if changes.intersects(SpecChanges::RENEGOTIATE) {
            negotiate(
                &format_request(&next),
                current_format.resolution(),
                current_format.layout(),
            )?
        } else {
            current_format
        };
        sync_derived(&mut next, &format);

        let rebuild = changes.contains(SpecChanges::FRAME_SOURCE)
            || format.layout() != current_format.layout()
            || next.origin() != current.origin();
        let source = if rebuild {
            if patch.frame_index.is_none() {
                next.frame_index = 0;
            }
            Some(Arc::new(build_source(id, &next, format.layout(), self.loading)?))
        } else {
            None
        };

        let retired = {
            let mut st = self.shared.state();
            if changes.contains(SpecChanges::TIMING) {
                st.interval = FrameInterval::from_fps(next.fps);
            }
            st.spec = next;
            st.format = format;
            source.map(|s| std::mem::replace(&mut st.source, s))
        };
        // 旧帧源在锁外释放
        drop(retired);

        tracing::info!(
            target: "vcam::device",
            "{}: modified {:?}, now {}x{} {}",
            id,
            changes,
            format.width(),
            format.height(),
            format.fourcc()
        );
        Ok(())
    }

    /// S_PARM：分子或分母为 0 时保持当前值，返回生效的帧间隔
    pub fn set_frame_interval(&self, interval: FrameInterval) -> FrameInterval {
        let mut st = self.shared.state();
        if interval.is_set() {
            st.interval = interval;
            st.spec.fps = interval.fps_rounded();
        }
        st.interval.or_default()
    }

    /// TRY_FMT：只计算，不生效
    pub fn try_format(&self, fourcc: FourCC) -> OutputFormat {
        self.output_format().try_pixel_format(fourcc)
    }

    /// S_FMT：不支持的 FourCC 保留当前格式
    pub fn set_pixel_format(&self, fourcc: FourCC) -> Result<OutputFormat> {
        let current = self.output_format();
        let wanted = current.try_pixel_format(fourcc);
        if wanted.layout() != current.layout() {
            self.modify(&DeviceSpecPatch {
                color_scheme: Some(ColorScheme::from(wanted.layout())),
                ..Default::default()
            })?;
        }
        Ok(self.output_format())
    }

    pub fn is_streaming(&self) -> bool {
        self.shared.producer_state.load() == ProducerState::Running
    }

    pub fn producer_state(&self) -> ProducerState {
        self.shared.producer_state.load()
    }

    /// STREAMON：分配 buffer 全部排队，然后启动生产线程
    pub fn start_streaming(&self) -> Result<()> {
        if self.shared.queue.is_unplugged() {
            return Err(VcamError::Disconnected(self.id().to_string()));
        }
        let mut slot = lock(&self.producer);
        if slot.is_some() {
            return Ok(());
        }

        let format = self.output_format();
        let size = format.image_size() as usize;
        for buffer in self.shared.queue.allocate_buffers(self.buffer_count, size) {
            self.shared.queue.queue_buffer(buffer, size);
        }

        self.shared.producer_state.store(ProducerState::Running);
        match Producer::spawn(Arc::clone(&self.shared)) {
            Ok(producer) => *slot = Some(producer),
            Err(e) => {
                self.shared.producer_state.store(ProducerState::Idle);
                self.shared.queue.flush_active();
                tracing::error!(target: "vcam::device", "{}: failed to spawn producer: {}", self.id(), e);
                return Err(e);
            }
        }

        tracing::info!(
            target: "vcam::device",
            "{}: streaming started, {} buffers of {} bytes",
            self.id(),
            self.buffer_count,
            size
        );
        Ok(())
    }

    /// STREAMOFF：等待生产线程退出，然后把未填充的 buffer 以 Error 退回
    pub fn stop_streaming(&self) -> Result<()> {
        let mut slot = lock(&self.producer);
        let Some(producer) = slot.take() else {
            return Ok(());
        };

        self.shared.producer_state.store(ProducerState::Stopping);
        producer.stop();
        self.shared.producer_state.store(ProducerState::Idle);
        let returned = self.shared.queue.flush_active();

        tracing::info!(
            target: "vcam::device",
            "{}: streaming stopped, {} buffers returned",
            self.id(),
            returned
        );
        Ok(())
    }

    /// 打开唯一的消费端
    pub fn open_stream(self: &Arc<Self>) -> Result<CaptureStream> {
        let rx = self.shared.queue.attach_consumer()?;
        Ok(CaptureStream::new(Arc::clone(self), rx))
    }

    /// 消费端归还 buffer
    pub(crate) fn requeue(&self, buffer: vcam_core::frame::FrameBuffer) -> Result<()> {
        if self.shared.queue.is_unplugged() {
            return Err(VcamError::Disconnected(self.id().to_string()));
        }
        let size = self.output_format().image_size() as usize;
        self.shared.queue.queue_buffer(buffer, size);
        Ok(())
    }

    /// 消费端持有的 buffer 数；大于 0 时不能销毁
    pub fn outstanding_buffers(&self) -> usize {
        self.shared.queue.outstanding()
    }

    pub fn telemetry(&self) -> ProducerTelemetry {
        let fps = self.frame_interval().fps();
        self.shared.counters.snapshot(Some(fps))
    }

    pub fn health(&self) -> DeviceHealthStatus {
        self.telemetry().assess_health()
    }

    /// 拔出：停流并 join 生产线程，然后关闭交付通道。
    /// 返回后不会再有任何 buffer 被填充。
    pub fn shutdown(&self) {
        if let Err(e) = self.stop_streaming() {
            tracing::warn!(target: "vcam::device", "{}: stop on shutdown failed: {}", self.id(), e);
        }
        self.shared.queue.disconnect();
        tracing::info!(target: "vcam::device", "{}: disconnected", self.id());
    }

    /// 可持久化的配置快照
    pub fn export_state(&self) -> serde_json::Value {
        serde_json::json!({
            "backend": "vcam",
            "id": self.id(),
            "spec": self.spec(),
            "format": self.output_format(),
            "source": self.source_kind(),
            "streaming": self.is_streaming(),
            "telemetry": self.telemetry(),
        })
    }
}

/// 创建请求中的哨兵值用默认规格补齐。
/// 只给了输出分辨率时，原始分辨率取同一个值。
fn resolve_spec(requested: &DeviceSpec, defaults: &DeviceSpec) -> DeviceSpec {
    let mut patch = DeviceSpecPatch::from_sentinels(requested);
    if patch.origin.is_none() {
        patch.origin = patch.resolution;
    }

    let mut spec = defaults.clone();
    patch.apply_to(&mut spec);
    spec.frame_index = 0;

    if !spec.frames_dir.as_os_str().is_empty() && spec.frame_count == 0 {
        match count_frame_files(&spec.frames_dir) {
            Ok(n) => spec.frame_count = n,
            Err(e) => tracing::warn!(target: "vcam::device", "Cannot count frames: {}", e),
        }
    }
    spec
}

fn format_request(spec: &DeviceSpec) -> FormatRequest {
    FormatRequest {
        origin: spec.origin(),
        width: spec.width,
        height: spec.height,
        crop: spec.crop_ratio,
        bits_per_pixel: (spec.bits_per_pixel > 0).then_some(spec.bits_per_pixel),
        color_scheme: spec.color_scheme,
    }
}

/// 规格里的派生字段跟随协商结果
fn sync_derived(spec: &mut DeviceSpec, format: &OutputFormat) {
    spec.width = format.width();
    spec.height = format.height();
    spec.color_scheme = ColorScheme::from(format.layout());
    spec.bits_per_pixel = format.layout().bytes_per_pixel() * 8;
}

fn build_source(
    id: DeviceId,
    spec: &DeviceSpec,
    layout: PixelLayout,
    loading: FrameLoading,
) -> Result<FrameSource> {
    if !spec.has_frame_source() {
        return Ok(FrameSource::Synthetic);
    }
    let frame_size = spec.origin().frame_size(layout);
    match FrameSource::build(&spec.frames_dir, spec.frame_count, frame_size, loading) {
        Ok(source) => Ok(source),
        Err(e) if e.is_fatal_to_request() => Err(e),
        Err(e) => {
            tracing::warn!(
                target: "vcam::device",
                "{}: frame source {} unusable ({}), falling back to synthetic frames",
                id,
                spec.frames_dir.display(),
                e
            );
            Ok(FrameSource::Synthetic)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcam_core::format::{CropRatio, Resolution};

    fn device(spec: &DeviceSpec) -> VirtualDevice {
        VirtualDevice::create(DeviceId(0), spec, &RegistryConfig::new()).unwrap()
    }

    #[test]
    fn create_derives_geometry_and_node() {
        let spec = DeviceSpec::default()
            .with_origin(800, 700)
            .with_resolution(400, 350)
            .with_crop(1, 2);
        let dev = device(&spec);
        let got = dev.spec();
        assert_eq!(got.resolution(), Resolution::new(400, 350));
        assert_eq!(got.video_node, "/dev/video0");
        assert_eq!(got.fps, 30);
        assert_eq!(dev.output_format().image_size(), 140_000);
        assert_eq!(dev.source_kind(), "synthetic");
    }

    #[test]
    fn resolution_only_request_sets_origin() {
        let wire = DeviceSpec {
            orig_width: 0,
            orig_height: 0,
            ..DeviceSpec::default().with_resolution(640, 480)
        };
        let dev = device(&wire);
        assert_eq!(dev.spec().origin(), Resolution::new(640, 480));
        assert_eq!(dev.spec().resolution(), Resolution::new(640, 480));
    }

    #[test]
    fn missing_frames_dir_falls_back_to_synthetic() {
        let spec = DeviceSpec::default().with_frames("/definitely/not/here", 5);
        let dev = device(&spec);
        assert_eq!(dev.source_kind(), "synthetic");
    }

    #[test]
    fn modify_rejects_bad_crop_without_touching_state() {
        let dev = device(&DeviceSpec::default());
        let before = dev.spec();
        let err = dev
            .modify(&DeviceSpecPatch {
                crop_ratio: Some(CropRatio::new(3, 2)),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, VcamError::InvalidArgument(_)));
        assert_eq!(dev.spec(), before);
    }

    #[test]
    fn modify_renegotiates_format() {
        let dev = device(&DeviceSpec::default());
        dev.modify(&DeviceSpecPatch {
            color_scheme: Some(ColorScheme::Yuv422),
            crop_ratio: Some(CropRatio::new(1, 2)),
            resolution: Some(Resolution::new(100, 100)),
            ..Default::default()
        })
        .unwrap();
        let fmt = dev.output_format();
        assert_eq!(fmt.fourcc(), FourCC::YUYV);
        assert_eq!(fmt.resolution(), Resolution::new(400, 350));
        assert_eq!(dev.spec().bits_per_pixel, 16);
    }

    #[test]
    fn frame_interval_zero_keeps_current() {
        let dev = device(&DeviceSpec::default().with_fps(25));
        let iv = dev.set_frame_interval(FrameInterval::new(0, 30));
        assert_eq!(iv.fps_rounded(), 25);
        let iv = dev.set_frame_interval(FrameInterval::new(1, 60));
        assert_eq!(iv.fps_rounded(), 60);
        assert_eq!(dev.spec().fps, 60);
    }

    #[test]
    fn unsupported_fourcc_keeps_format() {
        let dev = device(&DeviceSpec::default());
        let before = dev.output_format();
        let after = dev
            .set_pixel_format(FourCC::new(b'M', b'J', b'P', b'G'))
            .unwrap();
        assert_eq!(before, after);

        let rgb = dev.set_pixel_format(FourCC::RGB3).unwrap();
        assert_eq!(rgb.layout(), PixelLayout::Rgb24);
        assert_eq!(dev.spec().color_scheme, ColorScheme::Rgb24);
    }

    #[test]
    fn looping_wraps_and_non_looping_sticks() {
        let dev = device(&DeviceSpec::default());
        // 手动塞入一个 3 帧的流式帧源
        {
            let mut st = dev.shared.state();
            st.source = Arc::new(FrameSource::Streamed(
                crate::source::StreamedDisk::new(std::path::Path::new("/tmp"), 3, 1).unwrap(),
            ));
            st.spec.frame_index = 2;
        }
        dev.shared.advance_frame();
        assert_eq!(dev.spec().frame_index, 0);

        dev.modify(&DeviceSpecPatch {
            looping: Some(false),
            frame_index: Some(2),
            ..Default::default()
        })
        .unwrap();
        dev.shared.advance_frame();
        assert_eq!(dev.spec().frame_index, 2);
    }
}
