//! 编辑会话
//!
//! [`EditSession`] 是引擎的上下文对象，持有：
//! - 实体存储（slotmap）
//! - 联动图
//! - 消息总线
//! - 延迟任务队列
//! - 拖拽会话
//!
//! 坐标只能经由 [`EditSession::update`] 修改，更新流程：
//! 1. 校验（实体存在、坐标数量一致、不在更新中）
//! 2. 坐标完全相同则直接返回
//! 3. 计算位移，沿联动图传播（每轮传播独立的已访问集合）
//! 4. 提交坐标，场景写入排入延迟队列
//! 5. 按需分发几何变化消息

use crate::config::DragConfig;
use crate::deferred::{FlushReport, TaskQueue};
use crate::drag::{DragSession, FullDragPreview, PartialDragPreview};
use crate::entity::{CoordinateProvider, EntityId, GeometryEntity};
use crate::error::{Result, TrackerError};
use crate::link::{Change, LinkGraph, LinkIndex, PropagationPass};
use crate::math::{coordinate_deltas, Matrix4, Point3, Vector3};
use crate::message::{BusHost, EventKind, Message, MessageBus};
use crate::scene::{SceneGraph, Viewport};
use crate::transform::apply_points;
use slotmap::SlotMap;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, trace, warn};

/// 更新来源：新坐标或作用于当前坐标的变换
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateSource {
    Coordinates(Vec<Point3>),
    Transform(Matrix4),
}

/// 更新结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// 空输入或实体正在更新中
    Ignored,
    /// 坐标未变化
    Unchanged,
    /// 已提交，`entities` 以被更新的实体开头，随后是联动更新的实体
    Committed {
        entities: Vec<EntityId>,
        delivered: usize,
    },
}

impl UpdateOutcome {
    pub fn committed(&self) -> &[EntityId] {
        match self {
            UpdateOutcome::Committed { entities, .. } => entities,
            _ => &[],
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, UpdateOutcome::Committed { .. })
    }
}

/// 编辑会话
pub struct EditSession {
    entities: SlotMap<EntityId, GeometryEntity>,
    links: LinkGraph,
    bus: MessageBus<EditSession>,
    queue: TaskQueue,
    drag: DragSession,
    /// 正在执行 `update` 的实体
    updating: HashSet<EntityId>,
    verbose: bool,
}

impl EditSession {
    pub fn new(config: DragConfig) -> Self {
        Self {
            entities: SlotMap::with_key(),
            links: LinkGraph::new(),
            bus: MessageBus::new(),
            queue: TaskQueue::new(),
            drag: DragSession::new(config),
            updating: HashSet::new(),
            verbose: false,
        }
    }

    /// 分发消息时输出 debug 日志
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    // ========== 实体 ==========

    /// 创建实体，场景节点在下一个 tick 写入
    pub fn create_entity(&mut self, name: impl Into<String>, coordinates: Vec<Point3>) -> EntityId {
        let entity = GeometryEntity::new(name, coordinates);
        let points = entity.get_coordinates();
        let id = self.entities.insert(entity);
        self.write_coordinates(id, points);
        debug!("Created entity {:?}", id);
        id
    }

    pub fn entity(&self, id: EntityId) -> Option<&GeometryEntity> {
        self.entities.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = (EntityId, &GeometryEntity)> {
        self.entities.iter()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get_coordinates(&self, id: EntityId) -> Result<Vec<Point3>> {
        self.get(id).map(GeometryEntity::get_coordinates)
    }

    pub fn is_updating(&self, id: EntityId) -> bool {
        self.updating.contains(&id)
    }

    fn get(&self, id: EntityId) -> Result<&GeometryEntity> {
        self.entities.get(id).ok_or_else(|| {
            warn!("Entity {:?} does not exist", id);
            TrackerError::EntityNotFound(id)
        })
    }

    /// 清空实体坐标
    pub fn reset(&mut self, id: EntityId) -> Result<()> {
        let entity = self.entities.get_mut(id).ok_or(TrackerError::EntityNotFound(id))?;
        entity.reset();
        self.write_coordinates(id, Vec::new());
        Ok(())
    }

    /// 销毁实体：移除所有联动边与订阅，场景节点在下一个 tick 移除
    pub fn finish(&mut self, id: EntityId) -> Result<()> {
        self.get(id)?;

        if self.drag.participants().contains(&id) {
            warn!("Finishing {:?} during a drag, cancelling the drag", id);
            self.cancel_drag();
        }

        self.links.unlink_all(id);
        self.bus.unregister_all(id);
        self.entities.remove(id);
        self.updating.remove(&id);

        self.queue
            .delay(format!("remove_node {:?}", id), move |scene, _| scene.remove_node(id));
        debug!("Finished entity {:?}", id);
        Ok(())
    }

    // ========== 联动 ==========

    pub fn links(&self) -> &LinkGraph {
        &self.links
    }

    /// 注册联动，顶点索引必须落在实体当前坐标范围内
    pub fn link(
        &mut self,
        source: EntityId,
        source_index: LinkIndex,
        target: EntityId,
        target_indices: &[LinkIndex],
        target_only: bool,
    ) -> Result<()> {
        self.check_index(source, source_index)?;
        for &index in target_indices {
            self.check_index(target, index)?;
        }

        self.links
            .link(source, source_index, target, target_indices, target_only);
        Ok(())
    }

    pub fn unlink(&mut self, a: EntityId, b: EntityId) {
        self.links.unlink(a, b);
    }

    fn check_index(&self, id: EntityId, index: LinkIndex) -> Result<()> {
        let len = self.get(id)?.len();
        match index {
            LinkIndex::Vertex(i) if len > 0 && i >= len => {
                warn!("Link index {} out of range for {:?}", i, id);
                Err(TrackerError::IndexOutOfRange { index: i, len })
            }
            _ => Ok(()),
        }
    }

    // ========== 更新 ==========

    /// 更新实体坐标，沿联动图传播并按需通知订阅者
    pub fn update(
        &mut self,
        id: EntityId,
        source: UpdateSource,
        notify: bool,
    ) -> Result<UpdateOutcome> {
        match source {
            UpdateSource::Coordinates(coordinates) => {
                self.commit_update(id, coordinates, None, notify)
            }
            UpdateSource::Transform(matrix) => {
                let entity = self.get(id)?;
                if entity.is_empty() {
                    return Ok(UpdateOutcome::Ignored);
                }
                let coordinates = apply_points(entity.coordinates(), &matrix);
                self.commit_update(id, coordinates, Some(&matrix), notify)
            }
        }
    }

    fn commit_update(
        &mut self,
        id: EntityId,
        coordinates: Vec<Point3>,
        matrix: Option<&Matrix4>,
        notify: bool,
    ) -> Result<UpdateOutcome> {
        let entity = self.get(id)?;

        if coordinates.is_empty() {
            return Ok(UpdateOutcome::Ignored);
        }
        if self.updating.contains(&id) {
            trace!("{:?} is already updating", id);
            return Ok(UpdateOutcome::Ignored);
        }
        if !entity.is_empty() && entity.len() != coordinates.len() {
            warn!(
                "Rejected update of {}: expected {} coordinates, found {}",
                entity.name(),
                entity.len(),
                coordinates.len()
            );
            return Err(TrackerError::CoordinateCount {
                expected: entity.len(),
                found: coordinates.len(),
            });
        }
        if entity.same_coordinates(&coordinates) {
            return Ok(UpdateOutcome::Unchanged);
        }

        let old = entity.get_coordinates();
        self.updating.insert(id);

        let mut pass = PropagationPass::new(id);
        for &busy in &self.updating {
            pass.lock(busy);
        }

        if !old.is_empty() {
            let deltas = coordinate_deltas(&coordinates, &old);
            let changed: BTreeSet<usize> = deltas
                .iter()
                .enumerate()
                .filter(|(_, d)| **d != Vector3::zeros())
                .map(|(i, _)| i)
                .collect();
            let change = Change {
                indices: &changed,
                deltas: &deltas,
                matrix,
            };
            self.links
                .propagate(&mut self.entities, &mut pass, id, None, &change);
        }

        if let Some(entity) = self.entities.get_mut(id) {
            entity.commit(coordinates);
        }

        let mut committed = Vec::with_capacity(pass.committed.len() + 1);
        committed.push(id);
        committed.extend(pass.committed);

        for &entity in &committed {
            if let Some(points) = self.entities.get(entity).map(GeometryEntity::get_coordinates) {
                self.write_coordinates(entity, points);
            }
        }
        trace!("Committed update of {:?}, {} linked", id, committed.len() - 1);

        let delivered = if notify {
            self.notify_committed(id, &committed)
        } else {
            0
        };

        self.updating.remove(&id);
        Ok(UpdateOutcome::Committed {
            entities: committed,
            delivered,
        })
    }

    /// 为本轮提交的每个实体分发几何消息，联动实体的消息不回送给发起者
    fn notify_committed(&mut self, root: EntityId, committed: &[EntityId]) -> usize {
        let mut delivered = 0;
        for &id in committed {
            let Some(points) = self.entities.get(id).map(GeometryEntity::get_coordinates) else {
                continue;
            };

            let linked = id != root;
            if linked {
                self.bus.push_excluded(id, root);
            }
            delivered += self.dispatch(&Message::geometry(id, points), EventKind::Geometry);
            if linked {
                self.bus.pop_excluded(id);
            }
        }
        delivered
    }

    fn write_coordinates(&mut self, id: EntityId, points: Vec<Point3>) {
        self.queue.delay(format!("set_coordinates {:?}", id), move |scene, _| {
            scene.set_coordinates(id, &points)
        });
    }

    // ========== 消息 ==========

    /// 同步分发消息，返回实际调用的回调数
    pub fn dispatch(&mut self, message: &Message, kind: EventKind) -> usize {
        let verbose = self.verbose;
        MessageBus::dispatch(self, message, kind, verbose)
    }

    /// `subscriber` 订阅 `publisher` 的几何消息，`duplex` 时反向也订阅
    ///
    /// `make_callback(subscriber, publisher)` 为每个方向生成回调。
    pub fn register_geometry<F, C>(
        &mut self,
        publisher: EntityId,
        subscriber: EntityId,
        duplex: bool,
        make_callback: F,
    ) where
        F: Fn(EntityId, EntityId) -> C,
        C: FnMut(&mut EditSession, EventKind, &Message) + 'static,
    {
        self.bus.register(
            publisher,
            subscriber,
            &[EventKind::Geometry],
            make_callback(subscriber, publisher),
        );
        if duplex {
            self.bus.register(
                subscriber,
                publisher,
                &[EventKind::Geometry],
                make_callback(publisher, subscriber),
            );
        }
    }

    // ========== 延迟队列 ==========

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut TaskQueue {
        &mut self.queue
    }

    /// 宿主每个 tick 调用一次
    pub fn tick(&mut self, scene: &mut dyn SceneGraph) -> FlushReport {
        self.queue.flush(scene)
    }

    // ========== 拖拽 ==========

    pub fn drag(&self) -> &DragSession {
        &self.drag
    }

    pub fn drag_mut(&mut self) -> &mut DragSession {
        &mut self.drag
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_dragging()
    }

    /// 开始拖拽
    ///
    /// 选择为空（或全部无效）时不做任何事并返回 `false`。
    pub fn begin_drag(
        &mut self,
        selection: &[EntityId],
        center: Point3,
        pointer: Point3,
    ) -> Result<bool> {
        if self.drag.is_dragging() {
            warn!("Rejected drag start: a drag is already active");
            return Err(TrackerError::AlreadyDragging);
        }

        let participants = self.links.setup_drag(&mut self.entities, selection);
        if participants.is_empty() {
            debug!("Nothing to drag");
            return Ok(false);
        }

        let mut full_drag = Vec::new();
        let mut partial_drag = Vec::new();
        for &id in &participants {
            let Some(entity) = self.entities.get(id) else {
                continue;
            };
            if entity.is_full_drag() {
                full_drag.push(FullDragPreview {
                    entity: id,
                    points: entity.get_coordinates(),
                });
            } else if let Some(preview) =
                PartialDragPreview::new(id, entity.coordinates(), entity.drag_indices())
            {
                partial_drag.push(preview);
            }
        }

        for preview in &full_drag {
            let (id, points) = (preview.entity, preview.points.clone());
            self.queue
                .delay("insert_full_drag", move |scene, _| scene.insert_full_drag(id, &points));
        }
        for preview in &partial_drag {
            self.write_partial_preview(preview);
        }

        self.drag
            .start(participants, center, pointer, full_drag, partial_drag);
        Ok(true)
    }

    /// 指针移动，变换有变化时返回 true
    pub fn update_drag(&mut self, pointer: Point3, rotate: bool) -> Result<bool> {
        if !self.drag.is_dragging() {
            warn!("Rejected drag update: no drag is active");
            return Err(TrackerError::NotDragging);
        }

        let line = self.drag.drag_line();
        let changed = self.drag.update(pointer, rotate);

        if changed {
            let matrix = self.drag.matrix();
            self.queue
                .delay("set_drag_transform", move |scene, _| scene.set_drag_transform(&matrix));

            let previews = self.drag.partial_drag().to_vec();
            for preview in &previews {
                self.write_partial_preview(preview);
            }
        }

        let next = self.drag.drag_line();
        if next != line {
            self.queue
                .delay("set_drag_line", move |scene, _| scene.set_drag_line(next));
        }
        Ok(changed)
    }

    /// 结束拖拽：按最终变换提交所有参与实体，返回被提交的实体
    pub fn end_drag(&mut self) -> Result<Vec<EntityId>> {
        if !self.drag.is_dragging() {
            warn!("Rejected drag end: no drag is active");
            return Err(TrackerError::NotDragging);
        }

        let transform = self.drag.transform();
        let matrix = transform.to_matrix();

        // 传播会改写参与者的坐标，最终坐标需要先全部算好
        let mut finals = Vec::new();
        if !transform.is_identity() {
            for &id in self.drag.participants() {
                let Some(entity) = self.entities.get(id) else {
                    continue;
                };
                if entity.is_full_drag() {
                    finals.push((id, apply_points(entity.coordinates(), &matrix), true));
                } else if let Some(coordinates) = entity.drag_coordinates(&matrix) {
                    finals.push((id, coordinates, false));
                }
            }
        }

        self.drag.finish();
        self.clear_drag_state();
        self.queue
            .delay("clear_drag_preview", |scene, _| scene.clear_drag_preview());

        let mut committed = Vec::new();
        for (id, coordinates, full) in finals {
            let outcome = self.commit_update(id, coordinates, full.then_some(&matrix), true)?;
            committed.extend_from_slice(outcome.committed());
        }

        debug!("Drag committed {} updates", committed.len());
        Ok(committed)
    }

    /// 取消拖拽：丢弃预览，不修改任何实体坐标
    ///
    /// 没有进行中的拖拽时返回 `false`。
    pub fn cancel_drag(&mut self) -> bool {
        if !self.drag.is_dragging() {
            return false;
        }

        self.drag.clear();
        self.clear_drag_state();
        self.queue
            .delay("clear_drag_preview", |scene, _| scene.clear_drag_preview());
        debug!("Drag cancelled");
        true
    }

    fn clear_drag_state(&mut self) {
        for entity in self.entities.values_mut() {
            entity.clear_drag_state();
        }
    }

    fn write_partial_preview(&mut self, preview: &PartialDragPreview) {
        let (id, points) = (preview.entity, preview.buffer().to_vec());
        self.queue
            .delay("set_partial_preview", move |scene, _| scene.set_partial_preview(id, &points));
    }

    /// 拖拽中实体的实时坐标：拖拽索引套用当前变换
    ///
    /// 实体不参与拖拽时返回 `None`。
    pub fn drag_coordinates(&self, id: EntityId) -> Option<Vec<Point3>> {
        if !self.drag.is_dragging() {
            return None;
        }
        self.entities.get(id)?.drag_coordinates(&self.drag.matrix())
    }

    /// 实体坐标经场景节点变换后的世界坐标
    pub fn world_coordinates(&self, id: EntityId, viewport: &dyn Viewport) -> Result<Vec<Point3>> {
        let entity = self.get(id)?;
        Ok(apply_points(entity.coordinates(), &viewport.node_transform(id)))
    }
}

impl Default for EditSession {
    fn default() -> Self {
        Self::new(DragConfig::default())
    }
}

impl BusHost for EditSession {
    fn bus(&self) -> &MessageBus<Self> {
        &self.bus
    }

    fn bus_mut(&mut self) -> &mut MessageBus<Self> {
        &mut self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::EPSILON;
    use crate::scene::MemoryScene;
    use std::cell::RefCell;
    use std::f64::consts::FRAC_PI_2;
    use std::rc::Rc;

    fn p(x: f64, y: f64) -> Point3 {
        Point3::new(x, y, 0.0)
    }

    fn close(a: &[Point3], b: &[Point3]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(a, b)| (a - b).norm() < 1e-9)
    }

    /// 单位正方形的四条边，首尾相连
    fn square(session: &mut EditSession) -> Vec<EntityId> {
        let corners = [p(0.0, 0.0), p(1.0, 0.0), p(1.0, 1.0), p(0.0, 1.0)];
        let sides: Vec<EntityId> = (0..4)
            .map(|i| session.create_entity("side", vec![corners[i], corners[(i + 1) % 4]]))
            .collect();
        for i in 0..4 {
            session
                .link(
                    sides[i],
                    LinkIndex::Vertex(1),
                    sides[(i + 1) % 4],
                    &[LinkIndex::Vertex(0)],
                    false,
                )
                .unwrap();
        }
        sides
    }

    fn counter(
        session: &mut EditSession,
        publisher: EntityId,
        subscriber: EntityId,
    ) -> Rc<RefCell<usize>> {
        let count = Rc::new(RefCell::new(0));
        let inner = count.clone();
        session.bus_mut().register(
            publisher,
            subscriber,
            &[EventKind::Geometry],
            move |_: &mut EditSession, _: EventKind, _: &Message| *inner.borrow_mut() += 1,
        );
        count
    }

    #[test]
    fn test_update_identical_coordinates_is_noop() {
        let mut session = EditSession::default();
        let a = session.create_entity("a", vec![p(0.0, 0.0), p(1.0, 0.0)]);
        let b = session.create_entity("b", vec![p(1.0, 0.0), p(2.0, 0.0)]);
        session.link(a, LinkIndex::Vertex(1), b, &[LinkIndex::Vertex(0)], false).unwrap();
        let count = counter(&mut session, a, b);
        let pending = session.queue().len();

        let outcome = session
            .update(a, UpdateSource::Coordinates(vec![p(0.0, 0.0), p(1.0, 0.0)]), true)
            .unwrap();

        assert_eq!(outcome, UpdateOutcome::Unchanged);
        assert!(session.entity(a).unwrap().previous_coordinates().is_empty());
        assert!(session.entity(b).unwrap().previous_coordinates().is_empty());
        assert_eq!(*count.borrow(), 0);
        assert_eq!(session.queue().len(), pending);
    }

    #[test]
    fn test_update_snapshots_previous_coordinates() {
        let mut session = EditSession::default();
        let a = session.create_entity("a", vec![p(0.0, 0.0), p(1.0, 0.0)]);

        let shift = Matrix4::new_translation(&Vector3::new(0.0, 2.0, 0.0));
        session
            .update(a, UpdateSource::Transform(shift), false)
            .unwrap();

        let entity = session.entity(a).unwrap();
        assert_eq!(entity.previous_coordinates(), &[p(0.0, 0.0), p(1.0, 0.0)]);
        assert_eq!(entity.coordinates(), &[p(0.0, 2.0), p(1.0, 2.0)]);
    }

    #[test]
    fn test_shared_endpoint_propagation() {
        let mut session = EditSession::default();
        let a = session.create_entity("a", vec![p(-1.0, 0.0), p(0.0, 0.0)]);
        let b = session.create_entity("b", vec![p(0.0, 0.0), p(1.0, 0.0)]);
        session.link(a, LinkIndex::Vertex(1), b, &[LinkIndex::Vertex(0)], false).unwrap();

        let outcome = session
            .update(a, UpdateSource::Coordinates(vec![p(-1.0, 0.0), p(1.0, 1.0)]), true)
            .unwrap();

        assert_eq!(outcome.committed(), &[a, b]);
        let b_coords = session.get_coordinates(b).unwrap();
        assert_eq!(b_coords[0], p(1.0, 1.0));
        assert_eq!(b_coords[1], p(1.0, 0.0));
        assert_eq!(session.entity(b).unwrap().previous_coordinates()[0], p(0.0, 0.0));
    }

    #[test]
    fn test_update_reaches_entity_through_every_path() {
        let mut session = EditSession::default();
        let a = session.create_entity("a", vec![p(0.0, 0.0), p(1.0, 0.0)]);
        let m = session.create_entity("m", vec![p(1.0, 0.0)]);
        let x = session.create_entity("x", vec![p(0.0, 0.0), p(1.0, 0.0)]);
        session.link(a, LinkIndex::Vertex(0), x, &[LinkIndex::Vertex(0)], false).unwrap();
        session.link(a, LinkIndex::Vertex(1), m, &[LinkIndex::Vertex(0)], false).unwrap();
        session.link(m, LinkIndex::Vertex(0), x, &[LinkIndex::Vertex(1)], false).unwrap();

        let outcome = session
            .update(a, UpdateSource::Coordinates(vec![p(0.0, 1.0), p(1.0, 1.0)]), true)
            .unwrap();

        // x 先经由 m 移动终点，随后 a 的直接联动仍然移动起点
        assert_eq!(session.get_coordinates(m).unwrap(), vec![p(1.0, 1.0)]);
        assert_eq!(session.get_coordinates(x).unwrap(), vec![p(0.0, 1.0), p(1.0, 1.0)]);
        assert_eq!(
            session.entity(x).unwrap().previous_coordinates(),
            &[p(0.0, 0.0), p(1.0, 0.0)]
        );
        assert_eq!(outcome.committed().iter().filter(|id| **id == x).count(), 1);
    }

    #[test]
    fn test_linked_update_does_not_echo_to_source() {
        let mut session = EditSession::default();
        let a = session.create_entity("a", vec![p(-1.0, 0.0), p(0.0, 0.0)]);
        let b = session.create_entity("b", vec![p(0.0, 0.0), p(1.0, 0.0)]);
        session.link(a, LinkIndex::Vertex(1), b, &[LinkIndex::Vertex(0)], false).unwrap();
        let to_b = counter(&mut session, a, b);
        let to_a = counter(&mut session, b, a);

        let outcome = session
            .update(a, UpdateSource::Coordinates(vec![p(-1.0, 0.0), p(0.5, 0.0)]), true)
            .unwrap();

        assert_eq!(*to_b.borrow(), 1);
        assert_eq!(*to_a.borrow(), 0);
        assert_eq!(outcome, UpdateOutcome::Committed { entities: vec![a, b], delivered: 1 });
        assert!(!session.is_updating(a));
    }

    #[test]
    fn test_reentrant_update_is_ignored() {
        let mut session = EditSession::default();
        let a = session.create_entity("a", vec![p(0.0, 0.0)]);
        let b = session.create_entity("b", vec![p(5.0, 5.0)]);
        let result = Rc::new(RefCell::new(None));
        let seen = result.clone();
        session.bus_mut().register(
            a,
            b,
            &[EventKind::Geometry],
            move |s: &mut EditSession, _: EventKind, _: &Message| {
                let outcome = s.update(a, UpdateSource::Coordinates(vec![p(9.0, 9.0)]), true);
                *seen.borrow_mut() = Some(outcome);
            },
        );

        session.update(a, UpdateSource::Coordinates(vec![p(1.0, 0.0)]), true).unwrap();

        assert!(matches!(*result.borrow(), Some(Ok(UpdateOutcome::Ignored))));
        assert_eq!(session.get_coordinates(a).unwrap(), vec![p(1.0, 0.0)]);
    }

    #[test]
    fn test_coordinate_count_mismatch_is_rejected() {
        let mut session = EditSession::default();
        let a = session.create_entity("a", vec![p(0.0, 0.0), p(1.0, 0.0)]);

        let result = session.update(a, UpdateSource::Coordinates(vec![p(0.0, 0.0)]), true);
        assert!(matches!(result, Err(TrackerError::CoordinateCount { expected: 2, found: 1 })));

        let empty = session.update(a, UpdateSource::Coordinates(Vec::new()), true).unwrap();
        assert_eq!(empty, UpdateOutcome::Ignored);
    }

    #[test]
    fn test_link_validates_indices() {
        let mut session = EditSession::default();
        let a = session.create_entity("a", vec![p(0.0, 0.0), p(1.0, 0.0)]);
        let b = session.create_entity("b", vec![p(1.0, 0.0)]);

        let result = session.link(a, LinkIndex::Vertex(2), b, &[LinkIndex::Vertex(0)], false);
        assert!(matches!(result, Err(TrackerError::IndexOutOfRange { index: 2, len: 2 })));
        assert!(session.links().is_empty());
    }

    #[test]
    fn test_deferred_writes_apply_on_tick() {
        let mut session = EditSession::default();
        let a = session.create_entity("a", vec![p(0.0, 0.0)]);
        let mut scene = MemoryScene::new();

        session.tick(&mut scene);
        session.update(a, UpdateSource::Coordinates(vec![p(3.0, 0.0)]), false).unwrap();
        assert_eq!(scene.coordinates(a), Some(&[p(0.0, 0.0)][..]));

        let report = session.tick(&mut scene);
        assert_eq!(report.failed, 0);
        assert_eq!(scene.coordinates(a), Some(&[p(3.0, 0.0)][..]));
    }

    #[test]
    fn test_target_only_marker_follows_line() {
        let mut session = EditSession::default();
        let line = session.create_entity("line", vec![p(0.0, 0.0), p(1.0, 0.0)]);
        let marker = session.create_entity("marker", vec![p(1.0, 0.0)]);
        session.link(line, LinkIndex::Vertex(1), marker, &[LinkIndex::Vertex(0)], true).unwrap();

        session
            .update(line, UpdateSource::Coordinates(vec![p(0.0, 0.0), p(2.0, 1.0)]), true)
            .unwrap();
        assert_eq!(session.get_coordinates(marker).unwrap(), vec![p(2.0, 1.0)]);

        session.update(marker, UpdateSource::Coordinates(vec![p(5.0, 5.0)]), true).unwrap();
        assert_eq!(session.get_coordinates(line).unwrap(), vec![p(0.0, 0.0), p(2.0, 1.0)]);
    }

    #[test]
    fn test_register_geometry_duplex_follow() {
        let mut session = EditSession::default();
        let a = session.create_entity("a", vec![p(0.0, 0.0)]);
        let b = session.create_entity("b", vec![p(0.0, 0.0)]);
        let calls = Rc::new(RefCell::new(Vec::new()));

        let log = calls.clone();
        session.register_geometry(a, b, true, move |me, _| {
            let log = log.clone();
            move |s: &mut EditSession, _: EventKind, message: &Message| {
                log.borrow_mut().push(me);
                if let Some(points) = message.points() {
                    let _ = s.update(me, UpdateSource::Coordinates(points.to_vec()), true);
                }
            }
        });

        session.update(a, UpdateSource::Coordinates(vec![p(4.0, 0.0)]), true).unwrap();

        assert_eq!(session.get_coordinates(b).unwrap(), vec![p(4.0, 0.0)]);
        // b 的回声被排除栈拦截
        assert_eq!(*calls.borrow(), vec![b]);
    }

    #[test]
    fn test_box_selection_drags_as_rigid_body() {
        let mut session = EditSession::default();
        let sides = square(&mut session);

        assert!(session.begin_drag(&sides, p(0.5, 0.5), p(0.5, 0.5)).unwrap());

        assert_eq!(session.drag().full_drag().len(), 4);
        assert!(session.drag().partial_drag().is_empty());
        for id in &sides {
            assert!(session.entity(*id).unwrap().is_full_drag());
        }
    }

    #[test]
    fn test_cancel_leaves_coordinates_unchanged() {
        let mut session = EditSession::default();
        let sides = square(&mut session);
        let before: Vec<Vec<Point3>> = sides
            .iter()
            .map(|id| session.get_coordinates(*id).unwrap())
            .collect();
        let mut scene = MemoryScene::new();

        session.begin_drag(&sides[..1], p(0.5, 0.0), p(0.5, 0.0)).unwrap();
        for x in 1..5 {
            session.update_drag(p(0.5 + x as f64, 0.3), x % 2 == 0).unwrap();
        }
        session.tick(&mut scene);
        assert!(scene.has_drag_preview());

        assert!(session.cancel_drag());
        session.tick(&mut scene);

        for (id, coords) in sides.iter().zip(&before) {
            assert_eq!(&session.get_coordinates(*id).unwrap(), coords);
            assert!(session.entity(*id).unwrap().drag_indices().is_empty());
        }
        assert!(!scene.has_drag_preview());
        assert!(!session.is_dragging());
        assert!(!session.cancel_drag());
    }

    #[test]
    fn test_end_drag_rotates_box() {
        let mut session = EditSession::default();
        let sides = square(&mut session);
        let center = p(0.5, 0.5);

        session.begin_drag(&sides, center, p(0.5, 1.5)).unwrap();
        session.update_drag(p(0.5, 1.5), true).unwrap();
        session.update_drag(p(1.5, 0.5), true).unwrap();
        assert!((session.drag().transform().rotation + FRAC_PI_2).abs() < EPSILON);

        let committed = session.end_drag().unwrap();

        assert!(sides.iter().all(|id| committed.contains(id)));
        // 顺时针旋转 90°
        assert!(close(&session.get_coordinates(sides[0]).unwrap(), &[p(0.0, 1.0), p(0.0, 0.0)]));
        assert!(close(&session.get_coordinates(sides[1]).unwrap(), &[p(0.0, 0.0), p(1.0, 0.0)]));
        assert!(close(&session.get_coordinates(sides[2]).unwrap(), &[p(1.0, 0.0), p(1.0, 1.0)]));
        assert!(close(&session.get_coordinates(sides[3]).unwrap(), &[p(1.0, 1.0), p(0.0, 1.0)]));
        assert!(!session.is_dragging());
    }

    #[test]
    fn test_end_drag_partial_polyline() {
        let mut session = EditSession::default();
        let polyline = session.create_entity(
            "polyline",
            (0..4).map(|i| p(i as f64, 0.0)).collect(),
        );
        let marker = session.create_entity("marker", vec![p(2.0, 0.0)]);
        session
            .link(marker, LinkIndex::Vertex(0), polyline, &[LinkIndex::Vertex(2)], false)
            .unwrap();

        session.begin_drag(&[marker], p(2.0, 0.0), p(2.0, 0.0)).unwrap();
        let preview = &session.drag().partial_drag()[0];
        assert_eq!(preview.entity, polyline);
        assert_eq!(preview.window(), (1, 3));

        session.update_drag(p(2.0, 1.0), false).unwrap();
        assert_eq!(session.drag_coordinates(polyline).unwrap()[2], p(2.0, 1.0));
        assert_eq!(session.get_coordinates(polyline).unwrap()[2], p(2.0, 0.0));

        session.end_drag().unwrap();

        assert_eq!(session.get_coordinates(marker).unwrap(), vec![p(2.0, 1.0)]);
        let coords = session.get_coordinates(polyline).unwrap();
        assert_eq!(coords, vec![p(0.0, 0.0), p(1.0, 0.0), p(2.0, 1.0), p(3.0, 0.0)]);
    }

    #[test]
    fn test_drag_guards() {
        let mut session = EditSession::default();
        let a = session.create_entity("a", vec![p(0.0, 0.0)]);

        assert!(!session.begin_drag(&[], p(0.0, 0.0), p(0.0, 0.0)).unwrap());
        assert!(matches!(session.end_drag(), Err(TrackerError::NotDragging)));
        assert!(matches!(session.update_drag(p(1.0, 0.0), false), Err(TrackerError::NotDragging)));

        session.begin_drag(&[a], p(0.0, 0.0), p(0.0, 0.0)).unwrap();
        assert!(matches!(
            session.begin_drag(&[a], p(0.0, 0.0), p(0.0, 0.0)),
            Err(TrackerError::AlreadyDragging)
        ));

        // 没有位移的拖拽不提交
        assert!(session.end_drag().unwrap().is_empty());
        assert!(session.entity(a).unwrap().previous_coordinates().is_empty());
    }

    #[test]
    fn test_finish_removes_links_and_node() {
        let mut session = EditSession::default();
        let sides = square(&mut session);
        let mut scene = MemoryScene::new();
        session.tick(&mut scene);

        session.finish(sides[0]).unwrap();
        session.tick(&mut scene);

        assert!(!session.contains(sides[0]));
        assert!(!session.links().is_linked(sides[1], sides[0]));
        assert!(!session.links().is_linked(sides[3], sides[0]));
        assert!(scene.coordinates(sides[0]).is_none());
        assert!(matches!(session.finish(sides[0]), Err(TrackerError::EntityNotFound(_))));
    }

    #[test]
    fn test_world_coordinates_use_node_transform() {
        struct Shifted;
        impl Viewport for Shifted {
            fn screen_to_world(&self, screen: &crate::math::Point2) -> Point3 {
                Point3::new(screen.x, screen.y, 0.0)
            }
            fn world_to_screen(&self, world: &Point3) -> crate::math::Point2 {
                crate::math::Point2::new(world.x, world.y)
            }
            fn node_transform(&self, _node: EntityId) -> Matrix4 {
                Matrix4::new_translation(&Vector3::new(10.0, 0.0, 0.0))
            }
        }

        let mut session = EditSession::default();
        let a = session.create_entity("a", vec![p(1.0, 1.0)]);
        assert_eq!(session.world_coordinates(a, &Shifted).unwrap(), vec![p(11.0, 1.0)]);
    }
}
