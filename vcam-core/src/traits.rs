use crate::error::Result;
use crate::frame::{BufferState, FrameBuffer};
use crate::spec::{DeviceSpec, DeviceSpecPatch};
use async_trait::async_trait;

/// 1. 控制面：设备的热插拔与重配置
///
/// 索引是稠密的：销毁 index i 之后，更大的索引整体减一。
pub trait ControlPlane: Send + Sync {
    /// 创建设备，返回分配到的索引
    fn create_device(&self, spec: DeviceSpec) -> Result<usize>;

    /// 模拟拔出设备
    fn destroy_device(&self, index: usize) -> Result<()>;

    /// 返回设备当前规格 (含派生字段)
    fn get_device(&self, index: usize) -> Result<DeviceSpec>;

    /// 部分更新；`None` 字段保持不变
    fn modify_device(&self, index: usize, patch: &DeviceSpecPatch) -> Result<()>;

    fn list_devices(&self) -> Result<Vec<DeviceSpec>>;

    /// 打开设备的消费端数据流
    fn open(&self, index: usize) -> Result<Box<dyn Stream>>;

    /// 导出当前配置快照 (用于持久化)
    #[cfg(feature = "serialize")]
    fn export_state(&self, index: usize) -> Result<serde_json::Value>;
}

/// 2. 外部 buffer 队列的回调边界
///
/// 生产线程只通过它把 buffer 交还给队列，每块 buffer 每轮恰好一次。
pub trait BufferSink: Send + Sync {
    fn mark_done(&self, buffer: FrameBuffer, state: BufferState);
}

/// 3. 数据面：消费端取帧
/// 必须是 Send，以便在 Tokio 任务中运行
#[async_trait]
pub trait Stream: Send {
    /// 分配 buffer 并启动生产线程
    async fn start(&mut self) -> Result<()>;

    /// 停止生产线程 (阻塞到线程退出)
    async fn stop(&mut self) -> Result<()>;

    /// DQBUF：取出下一块已完成的 buffer，用完后必须 `requeue`
    async fn next_frame(&mut self) -> Result<FrameBuffer>;

    /// QBUF：把 buffer 交还给生产线程填充
    fn requeue(&mut self, buffer: FrameBuffer) -> Result<()>;
}

// 为 Box<T> 实现 Stream，这样 Box<dyn Stream> 也能被当做 Stream 使用
#[async_trait]
impl<S: Stream + ?Sized + Send> Stream for Box<S> {
    async fn start(&mut self) -> Result<()> {
        (**self).start().await
    }

    async fn stop(&mut self) -> Result<()> {
        (**self).stop().await
    }

    async fn next_frame(&mut self) -> Result<FrameBuffer> {
        (**self).next_frame().await
    }

    fn requeue(&mut self, buffer: FrameBuffer) -> Result<()> {
        (**self).requeue(buffer)
    }
}
