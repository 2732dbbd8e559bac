//! 拖拽会话
//!
//! 持有一次拖拽手势的实时变换与预览几何：
//! - 整体拖拽的实体保存一份只读副本，预览时整体套用当前矩阵
//! - 局部拖拽的实体只快照 `[min-1, max+1]` 的索引窗口，每次更新重新计算
//!
//! 会话本身不修改任何实体坐标，提交由
//! [`EditSession::end_drag`](crate::session::EditSession::end_drag) 完成。

use crate::config::DragConfig;
use crate::entity::EntityId;
use crate::math::{
    bearing, normalize_angle, project, quantize, quantize_vector, unit, Matrix4, Point3, Vector3,
};
use crate::transform::{apply_points, DragTransform};
use std::collections::BTreeSet;
use tracing::{debug, trace, warn};

/// 拖拽方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragMode {
    Translating,
    Rotating,
}

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Dragging(DragMode),
}

/// 整体拖拽实体的预览副本
#[derive(Debug, Clone, PartialEq)]
pub struct FullDragPreview {
    pub entity: EntityId,
    pub points: Vec<Point3>,
}

/// 局部拖拽实体的预览窗口
#[derive(Debug, Clone, PartialEq)]
pub struct PartialDragPreview {
    pub entity: EntityId,
    /// 窗口在实体坐标中的起始索引
    pub start: usize,
    /// 窗口内坐标的快照
    base: Vec<Point3>,
    /// 窗口内被拖拽的相对索引
    indices: Vec<usize>,
    /// 当前预览坐标
    buffer: Vec<Point3>,
}

impl PartialDragPreview {
    /// 以拖拽索引前后各扩一位截取窗口，端点相邻线段才能正确插值
    ///
    /// 没有有效索引时返回 `None`。
    pub fn new(
        entity: EntityId,
        coordinates: &[Point3],
        drag_indices: &BTreeSet<usize>,
    ) -> Option<Self> {
        let last = coordinates.len().checked_sub(1)?;
        let min = *drag_indices.iter().find(|&&i| i <= last)?;
        let max = drag_indices.range(..=last).next_back().copied()?;

        let start = min.saturating_sub(1);
        let end = (max + 1).min(last);
        let base = coordinates[start..=end].to_vec();
        let indices = drag_indices.range(start..=end).map(|i| i - start).collect();

        Some(Self {
            entity,
            start,
            buffer: base.clone(),
            base,
            indices,
        })
    }

    /// 窗口覆盖的实体索引范围（闭区间）
    pub fn window(&self) -> (usize, usize) {
        (self.start, self.start + self.base.len() - 1)
    }

    /// 被拖拽的实体索引
    pub fn drag_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().map(|i| i + self.start)
    }

    pub fn buffer(&self) -> &[Point3] {
        &self.buffer
    }

    fn refresh(&mut self, matrix: &Matrix4) {
        self.buffer.clone_from(&self.base);
        for &i in &self.indices {
            self.buffer[i] = matrix.transform_point(&self.base[i]);
        }
    }
}

/// 拖拽会话，每个编辑会话持有一个
#[derive(Debug, Clone)]
pub struct DragSession {
    config: DragConfig,
    state: DragState,
    participants: Vec<EntityId>,
    center: Point3,
    /// 平移的参考指针位置
    anchor: Point3,
    last_pointer: Point3,
    /// 未量化的累计旋转角
    raw_rotation: f64,
    current_bearing: Option<f64>,
    transform: DragTransform,
    full_drag: Vec<FullDragPreview>,
    partial_drag: Vec<PartialDragPreview>,
    drag_line: Option<[Point3; 2]>,
}

impl Default for DragSession {
    fn default() -> Self {
        Self {
            config: DragConfig::default(),
            state: DragState::Idle,
            participants: Vec::new(),
            center: Point3::origin(),
            anchor: Point3::origin(),
            last_pointer: Point3::origin(),
            raw_rotation: 0.0,
            current_bearing: None,
            transform: DragTransform::identity(),
            full_drag: Vec::new(),
            partial_drag: Vec::new(),
            drag_line: None,
        }
    }
}

impl DragSession {
    pub fn new(config: DragConfig) -> Self {
        let mut session = Self::default();
        session.set_lock_axis(config.lock_axis);
        session.set_translate_increment(config.translate_increment);
        session.set_rotate_increment(config.rotate_increment);
        session.config.translation_enabled = config.translation_enabled;
        session.config.rotation_enabled = config.rotation_enabled;
        session.config.show_drag_line = config.show_drag_line;
        session.config.rotate_modifier = config.rotate_modifier;
        session
    }

    pub fn config(&self) -> &DragConfig {
        &self.config
    }

    pub fn state(&self) -> DragState {
        self.state
    }

    pub fn is_dragging(&self) -> bool {
        self.state != DragState::Idle
    }

    /// 设置平移约束轴，零向量视为取消约束
    pub fn set_lock_axis(&mut self, axis: Option<Vector3>) {
        self.config.lock_axis = match axis {
            Some(axis) => {
                let normalized = unit(&axis);
                if normalized.is_none() {
                    warn!("Ignoring zero-length lock axis");
                }
                normalized
            }
            None => None,
        };
    }

    /// 负数或非有限值视为连续
    pub fn set_translate_increment(&mut self, increment: f64) {
        self.config.translate_increment = checked_increment(increment);
    }

    pub fn set_rotate_increment(&mut self, increment: f64) {
        self.config.rotate_increment = checked_increment(increment);
    }

    pub fn enable_translation(&mut self, enabled: bool) {
        self.config.translation_enabled = enabled;
    }

    pub fn enable_rotation(&mut self, enabled: bool) {
        self.config.rotation_enabled = enabled;
    }

    pub fn participants(&self) -> &[EntityId] {
        &self.participants
    }

    pub fn center(&self) -> Point3 {
        self.center
    }

    /// 最近一次更新的指针位置
    pub fn last_pointer(&self) -> Point3 {
        self.last_pointer
    }

    /// 当前累计的刚体变换
    pub fn transform(&self) -> DragTransform {
        self.transform
    }

    pub fn matrix(&self) -> Matrix4 {
        self.transform.to_matrix()
    }

    pub fn full_drag(&self) -> &[FullDragPreview] {
        &self.full_drag
    }

    pub fn partial_drag(&self) -> &[PartialDragPreview] {
        &self.partial_drag
    }

    /// `[变换后的中心, 指针]` 引导线
    pub fn drag_line(&self) -> Option<[Point3; 2]> {
        self.drag_line
    }

    /// 整体拖拽副本套用当前矩阵后的坐标
    pub fn preview_coordinates(&self, entity: EntityId) -> Option<Vec<Point3>> {
        let matrix = self.matrix();
        self.full_drag
            .iter()
            .find(|preview| preview.entity == entity)
            .map(|preview| apply_points(&preview.points, &matrix))
    }

    pub(crate) fn start(
        &mut self,
        participants: Vec<EntityId>,
        center: Point3,
        pointer: Point3,
        full_drag: Vec<FullDragPreview>,
        partial_drag: Vec<PartialDragPreview>,
    ) {
        debug!(
            "Drag started: {} full, {} partial",
            full_drag.len(),
            partial_drag.len()
        );

        self.state = DragState::Dragging(DragMode::Translating);
        self.participants = participants;
        self.center = center;
        self.anchor = pointer;
        self.last_pointer = pointer;
        self.raw_rotation = 0.0;
        self.current_bearing = bearing(&(pointer - center));
        self.transform = DragTransform::with_center(center);
        self.full_drag = full_drag;
        self.partial_drag = partial_drag;
        self.drag_line = None;
    }

    /// 根据指针位置更新变换，变换有变化时返回 true
    ///
    /// `rotate` 表示旋转修饰键是否按下；方式切换时重新锚定，
    /// 已累计的变换保持不变。
    pub(crate) fn update(&mut self, pointer: Point3, rotate: bool) -> bool {
        let DragState::Dragging(mode) = self.state else {
            return false;
        };

        let next = if rotate {
            DragMode::Rotating
        } else {
            DragMode::Translating
        };
        if next != mode {
            self.reanchor(next, pointer);
        }
        self.last_pointer = pointer;

        let before = self.transform;
        match next {
            DragMode::Translating if self.config.translation_enabled => self.translate(pointer),
            DragMode::Rotating if self.config.rotation_enabled => self.rotate(pointer),
            _ => {}
        }
        self.update_drag_line(pointer);

        if self.transform == before {
            return false;
        }

        let matrix = self.matrix();
        for preview in &mut self.partial_drag {
            preview.refresh(&matrix);
        }
        trace!(
            "Drag transform: translation {:?}, rotation {:.4}",
            self.transform.translation,
            self.transform.rotation
        );
        true
    }

    /// 结束手势，返回最终变换并回到 Idle
    pub(crate) fn finish(&mut self) -> DragTransform {
        let transform = self.transform;
        self.clear();
        debug!("Drag finished: {:?}", transform);
        transform
    }

    /// 丢弃预览，回到 Idle
    pub(crate) fn clear(&mut self) {
        self.state = DragState::Idle;
        self.participants.clear();
        self.full_drag.clear();
        self.partial_drag.clear();
        self.drag_line = None;
        self.raw_rotation = 0.0;
        self.current_bearing = None;
        self.transform = DragTransform::with_center(self.center);
    }

    /// 当前变换下的旋转支点
    fn pivot(&self) -> Point3 {
        self.center + self.transform.translation
    }

    fn reanchor(&mut self, mode: DragMode, pointer: Point3) {
        match mode {
            // 指针等效地回到"当前平移"对应的位置
            DragMode::Translating => self.anchor = pointer - self.transform.translation,
            DragMode::Rotating => self.current_bearing = bearing(&(pointer - self.pivot())),
        }
        trace!("Re-anchored drag for {:?}", mode);
        self.state = DragState::Dragging(mode);
    }

    fn translate(&mut self, pointer: Point3) {
        let mut offset = pointer - self.anchor;
        if let Some(axis) = &self.config.lock_axis {
            offset = project(&offset, axis);
        }
        self.transform.translation = quantize_vector(&offset, self.config.translate_increment);
    }

    fn rotate(&mut self, pointer: Point3) {
        // 半径退化时角度不变
        let Some(angle) = bearing(&(pointer - self.pivot())) else {
            return;
        };

        if let Some(previous) = self.current_bearing {
            self.raw_rotation += normalize_angle(previous - angle);
        }
        self.current_bearing = Some(angle);
        self.transform.rotation = quantize(self.raw_rotation, self.config.rotate_increment);
    }

    fn update_drag_line(&mut self, pointer: Point3) {
        self.drag_line = self
            .config
            .show_drag_line
            .then(|| [self.pivot(), pointer]);
    }
}

fn checked_increment(increment: f64) -> f64 {
    if increment.is_finite() {
        increment.max(0.0)
    } else {
        warn!("Ignoring non-finite drag increment {}", increment);
        0.0
    }
}
