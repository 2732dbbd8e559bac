//! 延迟任务队列
//!
//! 宿主渲染器在遍历或分发事件时不允许修改场景结构，
//! 所有结构性写入都先排入队列，由宿主每个 tick 调用一次 [`TaskQueue::flush`]。
//!
//! - 队列从空变为非空时触发一次调度回调（通知宿主安排下一次 flush）
//! - flush 期间新排入的任务留到下一次 flush
//! - 单个任务失败（返回错误或 panic）只记录日志，不影响同批其余任务

use crate::error::Result;
use crate::scene::SceneGraph;
use std::panic::{self, AssertUnwindSafe};
use tracing::{error, trace};

/// 延迟任务
pub type Task = Box<dyn FnOnce(&mut dyn SceneGraph, &mut TaskQueue) -> Result<()>>;

struct PendingTask {
    name: String,
    task: Task,
}

/// 一次 flush 的执行结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub executed: usize,
    pub failed: usize,
}

/// 延迟任务队列，由编辑会话持有
#[derive(Default)]
pub struct TaskQueue {
    itinerary: Vec<PendingTask>,
    after_itinerary: Vec<PendingTask>,
    schedule_hook: Option<Box<dyn FnMut()>>,
    flush_scheduled: bool,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置调度回调：队列由空变为非空时调用一次
    pub fn set_schedule_hook(&mut self, hook: impl FnMut() + 'static) {
        self.schedule_hook = Some(Box::new(hook));
    }

    /// 排入任务，在下一次 flush 执行
    pub fn delay<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: FnOnce(&mut dyn SceneGraph, &mut TaskQueue) -> Result<()> + 'static,
    {
        self.itinerary.push(PendingTask {
            name: name.into(),
            task: Box::new(task),
        });
        self.schedule();
    }

    /// 排入任务，在同一次 flush 的主任务全部完成后执行
    pub fn delay_after<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: FnOnce(&mut dyn SceneGraph, &mut TaskQueue) -> Result<()> + 'static,
    {
        self.after_itinerary.push(PendingTask {
            name: name.into(),
            task: Box::new(task),
        });
        self.schedule();
    }

    fn schedule(&mut self) {
        if self.flush_scheduled {
            return;
        }
        self.flush_scheduled = true;
        if let Some(hook) = self.schedule_hook.as_mut() {
            hook();
        }
    }

    pub fn len(&self) -> usize {
        self.itinerary.len() + self.after_itinerary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.itinerary.is_empty() && self.after_itinerary.is_empty()
    }

    pub fn is_flush_scheduled(&self) -> bool {
        self.flush_scheduled
    }

    /// 按 FIFO 顺序执行当前排队的所有任务
    pub fn flush(&mut self, scene: &mut dyn SceneGraph) -> FlushReport {
        self.flush_scheduled = false;

        let itinerary = std::mem::take(&mut self.itinerary);
        let after = std::mem::take(&mut self.after_itinerary);

        let mut report = FlushReport::default();
        for pending in itinerary.into_iter().chain(after) {
            if self.run(pending, scene) {
                report.executed += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.executed + report.failed > 0 {
            trace!(
                "Flushed {} deferred tasks ({} failed)",
                report.executed + report.failed,
                report.failed
            );
        }
        report
    }

    fn run(&mut self, pending: PendingTask, scene: &mut dyn SceneGraph) -> bool {
        let PendingTask { name, task } = pending;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(scene, self)));

        match outcome {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("Deferred task '{}' failed: {}", name, e);
                false
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("Deferred task '{}' panicked: {}", name, message);
                false
            }
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("pending", &self.itinerary.len())
            .field("pending_after", &self.after_itinerary.len())
            .field("flush_scheduled", &self.flush_scheduled)
            .finish()
    }
}
