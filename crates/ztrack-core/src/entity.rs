//! 几何实体
//!
//! 实体持有一组有序坐标，坐标只能经由
//! [`EditSession::update`](crate::session::EditSession::update) 整体替换。
//! 拖拽状态（`is_full_drag` / `drag_indices`）由联动图在拖拽开始时写入，
//! 拖拽结束或取消时清除。

use crate::math::{Matrix4, Point3};
use std::collections::BTreeSet;

slotmap::new_key_type! {
    /// 实体唯一标识（同时用作场景节点标识）
    pub struct EntityId;
}

/// 提供坐标的能力接口
///
/// 拖拽能力只依赖这个窄接口，而不是具体实体类型。
pub trait CoordinateProvider {
    fn coordinates(&self) -> &[Point3];
}

/// 几何实体
#[derive(Debug, Clone, Default)]
pub struct GeometryEntity {
    name: String,
    coordinates: Vec<Point3>,
    previous_coordinates: Vec<Point3>,
    pub(crate) is_full_drag: bool,
    pub(crate) drag_indices: BTreeSet<usize>,
}

impl GeometryEntity {
    pub fn new(name: impl Into<String>, coordinates: Vec<Point3>) -> Self {
        Self {
            name: name.into(),
            coordinates,
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 当前坐标的拷贝
    pub fn get_coordinates(&self) -> Vec<Point3> {
        self.coordinates.clone()
    }

    /// 最近一次提交之前的坐标快照
    pub fn previous_coordinates(&self) -> &[Point3] {
        &self.previous_coordinates
    }

    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    pub fn is_full_drag(&self) -> bool {
        self.is_full_drag
    }

    pub fn drag_indices(&self) -> &BTreeSet<usize> {
        &self.drag_indices
    }

    /// 与给定坐标逐点完全相同
    pub fn same_coordinates(&self, coordinates: &[Point3]) -> bool {
        self.coordinates.len() == coordinates.len()
            && self.coordinates.iter().zip(coordinates).all(|(a, b)| a == b)
    }

    /// 当前拖拽索引经 `matrix` 变换后的完整坐标
    ///
    /// 没有拖拽索引时返回 `None`。
    pub fn drag_coordinates(&self, matrix: &Matrix4) -> Option<Vec<Point3>> {
        if self.coordinates.is_empty() || self.drag_indices.is_empty() {
            return None;
        }

        let mut coordinates = self.coordinates.clone();
        for &index in &self.drag_indices {
            if let Some(point) = coordinates.get_mut(index) {
                *point = matrix.transform_point(point);
            }
        }
        Some(coordinates)
    }

    /// 清空坐标
    pub fn reset(&mut self) {
        self.coordinates.clear();
        self.previous_coordinates.clear();
    }

    /// 提交新坐标，旧坐标成为 `previous_coordinates`
    pub(crate) fn commit(&mut self, coordinates: Vec<Point3>) {
        self.previous_coordinates = std::mem::replace(&mut self.coordinates, coordinates);
    }

    /// 同一轮传播中再次修改坐标，保留本轮开始前的快照
    pub(crate) fn amend(&mut self, coordinates: Vec<Point3>) {
        self.coordinates = coordinates;
    }

    pub(crate) fn mark_full_drag(&mut self) {
        self.is_full_drag = true;
        self.drag_indices = (0..self.coordinates.len()).collect();
    }

    pub(crate) fn clear_drag_state(&mut self) {
        self.is_full_drag = false;
        self.drag_indices.clear();
    }
}

impl CoordinateProvider for GeometryEntity {
    fn coordinates(&self) -> &[Point3] {
        &self.coordinates
    }
}
