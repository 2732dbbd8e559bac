//! 宿主协作接口
//!
//! 引擎不直接持有场景图节点，只通过 [`SceneGraph`] 写入显示数据，
//! 通过 [`Viewport`] 做屏幕/世界坐标换算。所有 `SceneGraph` 写入都经由
//! [`TaskQueue`](crate::deferred::TaskQueue) 延迟到下一个 tick 执行。

use crate::entity::EntityId;
use crate::error::{Result, TrackerError};
use crate::math::{Matrix4, Point2, Point3};
use std::collections::{BTreeMap, HashSet};

/// 场景图写接口
pub trait SceneGraph {
    /// 替换节点的坐标
    fn set_coordinates(&mut self, node: EntityId, points: &[Point3]) -> Result<()>;

    /// 移除节点
    fn remove_node(&mut self, node: EntityId) -> Result<()>;

    /// 把整体拖拽的几何副本插入拖拽预览组
    fn insert_full_drag(&mut self, node: EntityId, points: &[Point3]) -> Result<()>;

    /// 设置整体拖拽预览组的变换
    fn set_drag_transform(&mut self, matrix: &Matrix4) -> Result<()>;

    /// 设置局部拖拽预览几何
    fn set_partial_preview(&mut self, node: EntityId, points: &[Point3]) -> Result<()>;

    /// 设置拖拽引导线，`None` 表示隐藏
    fn set_drag_line(&mut self, line: Option<[Point3; 2]>) -> Result<()>;

    /// 清空所有拖拽预览
    fn clear_drag_preview(&mut self) -> Result<()>;
}

/// 视口坐标换算
pub trait Viewport {
    fn screen_to_world(&self, screen: &Point2) -> Point3;

    fn world_to_screen(&self, world: &Point3) -> Point2;

    /// 节点局部坐标到世界坐标的变换
    fn node_transform(&self, _node: EntityId) -> Matrix4 {
        Matrix4::identity()
    }
}

/// 俯视正交视口：屏幕像素按比例映射到 XY 平面（屏幕 Y 向下）
#[derive(Debug, Clone, Copy)]
pub struct PlanarViewport {
    /// 屏幕原点对应的世界坐标
    pub origin: Point2,
    /// 每个世界单位对应的像素数
    pub scale: f64,
}

impl PlanarViewport {
    pub fn new(origin: Point2, scale: f64) -> Self {
        Self { origin, scale }
    }
}

impl Default for PlanarViewport {
    fn default() -> Self {
        Self::new(Point2::origin(), 1.0)
    }
}

impl Viewport for PlanarViewport {
    fn screen_to_world(&self, screen: &Point2) -> Point3 {
        Point3::new(
            self.origin.x + screen.x / self.scale,
            self.origin.y - screen.y / self.scale,
            0.0,
        )
    }

    fn world_to_screen(&self, world: &Point3) -> Point2 {
        Point2::new(
            (world.x - self.origin.x) * self.scale,
            (self.origin.y - world.y) * self.scale,
        )
    }
}

/// 内存场景图，记录所有写入
///
/// 用于无界面宿主与测试。
#[derive(Debug, Default, Clone)]
pub struct MemoryScene {
    pub nodes: BTreeMap<EntityId, Vec<Point3>>,
    pub full_drag: BTreeMap<EntityId, Vec<Point3>>,
    pub partial_drag: BTreeMap<EntityId, Vec<Point3>>,
    pub drag_transform: Option<Matrix4>,
    pub drag_line: Option<[Point3; 2]>,
    /// 写入失败的节点（模拟已被销毁的场景节点）
    pub rejected: HashSet<EntityId>,
    pub writes: usize,
}

impl MemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn coordinates(&self, node: EntityId) -> Option<&[Point3]> {
        self.nodes.get(&node).map(Vec::as_slice)
    }

    pub fn has_drag_preview(&self) -> bool {
        !self.full_drag.is_empty() || !self.partial_drag.is_empty() || self.drag_transform.is_some()
    }

    fn check(&self, node: EntityId) -> Result<()> {
        if self.rejected.contains(&node) {
            return Err(TrackerError::Scene(format!("node {:?} is not in the scene", node)));
        }
        Ok(())
    }
}

impl SceneGraph for MemoryScene {
    fn set_coordinates(&mut self, node: EntityId, points: &[Point3]) -> Result<()> {
        self.check(node)?;
        self.nodes.insert(node, points.to_vec());
        self.writes += 1;
        Ok(())
    }

    fn remove_node(&mut self, node: EntityId) -> Result<()> {
        self.nodes.remove(&node);
        self.full_drag.remove(&node);
        self.partial_drag.remove(&node);
        self.writes += 1;
        Ok(())
    }

    fn insert_full_drag(&mut self, node: EntityId, points: &[Point3]) -> Result<()> {
        self.check(node)?;
        self.full_drag.insert(node, points.to_vec());
        self.writes += 1;
        Ok(())
    }

    fn set_drag_transform(&mut self, matrix: &Matrix4) -> Result<()> {
        self.drag_transform = Some(*matrix);
        self.writes += 1;
        Ok(())
    }

    fn set_partial_preview(&mut self, node: EntityId, points: &[Point3]) -> Result<()> {
        self.check(node)?;
        self.partial_drag.insert(node, points.to_vec());
        self.writes += 1;
        Ok(())
    }

    fn set_drag_line(&mut self, line: Option<[Point3; 2]>) -> Result<()> {
        self.drag_line = line;
        self.writes += 1;
        Ok(())
    }

    fn clear_drag_preview(&mut self) -> Result<()> {
        self.full_drag.clear();
        self.partial_drag.clear();
        self.drag_transform = None;
        self.drag_line = None;
        self.writes += 1;
        Ok(())
    }
}
