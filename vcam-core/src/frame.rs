use crate::format::OutputFormat;
use crate::pixel_format::FourCC;
use std::time::Duration;

/// 消费端看到的帧视图
/// 使用生命周期 'a 绑定到已完成的 buffer，不拷贝像素。
#[derive(Debug)]
pub struct Frame<'a> {
    /// 原始图像数据切片 (长度 = bytes_used)
    pub data: &'a [u8],

    /// 图像宽度 (Pixels)
    pub width: u32,

    /// 图像高度 (Pixels)
    pub height: u32,

    /// 跨距/步长 (Bytes per line)
    pub stride: usize,

    pub format: FourCC,

    /// 帧序号 (生产线程每填充一帧 +1)
    pub sequence: u64,

    pub timestamp: Timestamp,

    pub metadata: FrameMetadata,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamp {
    /// 单调时钟 (纳秒，相对进程锚点)
    pub hw_raw_ns: u64,

    /// 与 hw_raw_ns 同源；虚拟设备没有独立的硬件时钟
    pub system_synced: Duration,
}

/// 帧级元数据
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameMetadata {
    /// 生成该帧时生效的曝光/增益
    pub exposure: i32,
    pub gain: i32,
    /// 帧源中的帧索引 (合成帧为 None)
    pub source_index: Option<u32>,
    /// 本帧是否因帧源失败而退化为合成帧
    pub fallback: bool,
}

/// buffer 交还给队列时的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// 已填充，可以被消费端取走
    Done,
    /// 停流时未被填充就被退回
    Error,
}

/// 由 buffer 队列分配、在生产线程和消费端之间移交所有权的一块帧内存。
///
/// 所有权移交保证了同一时刻只有一方能写它。
#[derive(Debug)]
pub struct FrameBuffer {
    index: u32,
    data: Vec<u8>,
    /// 有效负载字节数
    pub bytes_used: usize,
    pub sequence: u64,
    pub timestamp: Timestamp,
    pub metadata: FrameMetadata,
    /// 填充时生效的输出格式；未填充过为 None
    pub format: Option<OutputFormat>,
}

impl FrameBuffer {
    pub fn new(index: u32, size: usize) -> Self {
        Self {
            index,
            data: vec![0; size],
            bytes_used: 0,
            sequence: 0,
            timestamp: Timestamp::default(),
            metadata: FrameMetadata::default(),
            format: None,
        }
    }

    /// 在队列中的编号
    pub fn index(&self) -> u32 {
        self.index
    }

    /// 平面容量
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.bytes_used.min(self.data.len())]
    }

    /// 整个平面 (填充时使用)
    pub fn plane_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// 借出只读帧视图；从未被填充的 buffer 返回 None
    pub fn as_frame(&self) -> Option<Frame<'_>> {
        let format = self.format?;
        Some(Frame {
            data: self.data(),
            width: format.width(),
            height: format.height(),
            stride: format.bytes_per_line() as usize,
            format: format.fourcc(),
            sequence: self.sequence,
            timestamp: self.timestamp,
            metadata: self.metadata.clone(),
        })
    }
}
