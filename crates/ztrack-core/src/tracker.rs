//! 追踪器
//!
//! 追踪器是用户可见的控制柄：一个实体加上若干能力（选择、拖拽），
//! 能力之间只通过窄接口协作，例如 [`Draggable`] 只依赖
//! [`CoordinateProvider`] 计算拖拽中心。

use crate::entity::{CoordinateProvider, EntityId};
use crate::error::{Result, TrackerError};
use crate::link::LinkIndex;
use crate::math::{manhattan, mean, Point3, Vector3, EPSILON};
use crate::message::{BusHost, EventKind, Message};
use crate::session::{EditSession, UpdateOutcome, UpdateSource};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// 拖拽中心的取法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DragStyle {
    /// 指针位置
    #[default]
    Cursor,
    /// 坐标平均值
    Average,
    /// 离指针最近的端点
    Endpoint,
}

/// 按拖拽方式计算旋转中心，没有坐标时退回指针位置
pub fn drag_center(style: DragStyle, coordinates: &[Point3], pointer: Point3) -> Point3 {
    match style {
        DragStyle::Cursor => pointer,
        DragStyle::Average => mean(coordinates).unwrap_or(pointer),
        DragStyle::Endpoint => {
            let (Some(first), Some(last)) = (coordinates.first(), coordinates.last()) else {
                return pointer;
            };
            if manhattan(first, &pointer) <= manhattan(last, &pointer) {
                *first
            } else {
                *last
            }
        }
    }
}

/// 追踪器种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerKind {
    Marker,
    Line,
    Polyline,
}

/// 选择能力
#[derive(Debug, Clone, Copy, Default)]
pub struct Selectable {
    selected: bool,
}

impl Selectable {
    pub fn select(&mut self) {
        self.selected = true;
    }

    pub fn deselect(&mut self) {
        self.selected = false;
    }

    pub fn toggle(&mut self) {
        self.selected = !self.selected;
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }
}

/// 拖拽回调的触发时机
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragPhase {
    Before,
    During,
    After,
}

/// 拖拽回调，参数为会话与追踪器的实体
pub type DragCallback = Box<dyn FnMut(&mut EditSession, EntityId)>;

struct RegisteredCallback {
    phase: DragPhase,
    /// 局部回调在每次手势结束后清除
    local: bool,
    callback: DragCallback,
}

/// 拖拽回调集合
#[derive(Default)]
pub struct DragCallbacks {
    callbacks: Vec<RegisteredCallback>,
}

impl DragCallbacks {
    /// 添加持久回调
    pub fn add(
        &mut self,
        phase: DragPhase,
        callback: impl FnMut(&mut EditSession, EntityId) + 'static,
    ) {
        self.push(phase, false, Box::new(callback));
    }

    /// 添加只对下一次手势生效的回调
    pub fn add_local(
        &mut self,
        phase: DragPhase,
        callback: impl FnMut(&mut EditSession, EntityId) + 'static,
    ) {
        self.push(phase, true, Box::new(callback));
    }

    fn push(&mut self, phase: DragPhase, local: bool, callback: DragCallback) {
        self.callbacks.push(RegisteredCallback {
            phase,
            local,
            callback,
        });
    }

    /// 按注册顺序执行某一阶段的回调
    pub fn run(&mut self, phase: DragPhase, session: &mut EditSession, entity: EntityId) -> usize {
        let mut count = 0;
        for registered in self.callbacks.iter_mut().filter(|c| c.phase == phase) {
            (registered.callback)(session, entity);
            count += 1;
        }
        count
    }

    pub fn clear_local(&mut self) {
        self.callbacks.retain(|c| !c.local);
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl std::fmt::Debug for DragCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DragCallbacks")
            .field("count", &self.callbacks.len())
            .finish()
    }
}

/// 拖拽能力
#[derive(Debug)]
pub struct Draggable {
    pub enabled: bool,
    pub style: DragStyle,
    pub callbacks: DragCallbacks,
}

impl Draggable {
    pub fn new(style: DragStyle) -> Self {
        Self {
            enabled: true,
            style,
            callbacks: DragCallbacks::default(),
        }
    }

    pub fn drag_center(&self, provider: &dyn CoordinateProvider, pointer: Point3) -> Point3 {
        drag_center(self.style, provider.coordinates(), pointer)
    }
}

/// 追踪器
#[derive(Debug)]
pub struct Tracker {
    id: EntityId,
    kind: TrackerKind,
    pub selectable: Selectable,
    pub draggable: Draggable,
}

impl Tracker {
    fn new(
        session: &mut EditSession,
        kind: TrackerKind,
        name: &str,
        points: Vec<Point3>,
        style: DragStyle,
    ) -> Self {
        let id = session.create_entity(name, points);
        debug!("Created {:?} tracker '{}'", kind, name);
        Self {
            id,
            kind,
            selectable: Selectable::default(),
            draggable: Draggable::new(style),
        }
    }

    /// 单点标记
    pub fn marker(session: &mut EditSession, name: &str, point: Point3) -> Self {
        Self::new(session, TrackerKind::Marker, name, vec![point], DragStyle::Cursor)
    }

    /// 两点线段
    pub fn line(session: &mut EditSession, name: &str, start: Point3, end: Point3) -> Self {
        Self::new(session, TrackerKind::Line, name, vec![start, end], DragStyle::Cursor)
    }

    pub fn polyline(session: &mut EditSession, name: &str, points: Vec<Point3>) -> Self {
        Self::new(session, TrackerKind::Polyline, name, points, DragStyle::Cursor)
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> TrackerKind {
        self.kind
    }

    pub fn is_selected(&self) -> bool {
        self.selectable.is_selected()
    }

    pub fn coordinates(&self, session: &EditSession) -> Result<Vec<Point3>> {
        session.get_coordinates(self.id)
    }

    pub fn update(&self, session: &mut EditSession, points: Vec<Point3>) -> Result<UpdateOutcome> {
        session.update(self.id, UpdateSource::Coordinates(points), true)
    }

    /// 把本追踪器的 `source_index` 联动到 `target` 的若干索引
    pub fn link(
        &self,
        session: &mut EditSession,
        source_index: LinkIndex,
        target: &Tracker,
        target_indices: &[LinkIndex],
        target_only: bool,
    ) -> Result<()> {
        session.link(self.id, source_index, target.id, target_indices, target_only)
    }

    /// 把标记挂到本追踪器的第 `index` 个顶点
    ///
    /// `follow_only` 时标记只跟随，拖动标记不会移动本追踪器。
    pub fn link_marker(
        &self,
        session: &mut EditSession,
        marker: &Tracker,
        index: usize,
        follow_only: bool,
    ) -> Result<()> {
        if marker.kind != TrackerKind::Marker {
            warn!("link_marker called with a {:?} tracker", marker.kind);
        }
        self.link(
            session,
            LinkIndex::Vertex(index),
            marker,
            &[LinkIndex::Vertex(0)],
            follow_only,
        )
    }

    /// 通过消息总线跟随 `publisher` 的第 `index` 个顶点（不建立联动边）
    pub fn follow_geometry_messages(
        &self,
        session: &mut EditSession,
        publisher: &Tracker,
        index: usize,
    ) {
        let me = self.id;
        session.bus_mut().register(
            publisher.id,
            me,
            &[EventKind::Geometry],
            move |session: &mut EditSession, _: EventKind, message: &Message| {
                let Some(point) = message.points().and_then(|points| points.get(index)) else {
                    return;
                };
                let Ok(mut target) = session.get_coordinates(me) else {
                    return;
                };
                match target.first_mut() {
                    Some(first) => *first = *point,
                    None => target.push(*point),
                }
                if let Err(e) = session.update(me, UpdateSource::Coordinates(target), true) {
                    warn!("Tracker {:?} failed to follow {:?}: {}", me, message.sender, e);
                }
            },
        );
    }

    /// 坐标平均值
    pub fn center(&self, session: &EditSession) -> Result<Point3> {
        let points = self.coordinates(session)?;
        mean(&points).ok_or(TrackerError::EmptyGeometry(self.id))
    }

    /// 折线总长
    pub fn length(&self, session: &EditSession) -> Result<f64> {
        let points = self.coordinates(session)?;
        Ok(points.windows(2).map(|pair| (pair[1] - pair[0]).norm()).sum())
    }

    /// 以中心为基点缩放到给定长度，长度为零的折线无法缩放
    pub fn set_length(&self, session: &mut EditSession, length: f64) -> Result<UpdateOutcome> {
        let current = self.length(session)?;
        if current < EPSILON {
            warn!("Cannot scale zero-length tracker {:?}", self.id);
            return Ok(UpdateOutcome::Ignored);
        }

        let center = self.center(session)?;
        let factor = length / current;
        let points = self
            .coordinates(session)?
            .iter()
            .map(|p| center + (p - center) * factor)
            .collect();
        self.update(session, points)
    }

    /// 当前指针下的拖拽中心
    pub fn drag_center(&self, session: &EditSession, pointer: Point3) -> Result<Point3> {
        let entity = session.entity(self.id).ok_or(TrackerError::EntityNotFound(self.id))?;
        Ok(self.draggable.drag_center(entity, pointer))
    }

    /// 销毁追踪器及其实体
    pub fn finish(self, session: &mut EditSession) -> Result<()> {
        session.finish(self.id)
    }
}

/// 分段折线：每对相邻顶点一条线段追踪器
///
/// `adjustable` 时相邻线段首尾联动，拖动一段会带动相邻段的端点；
/// 否则各段相互独立。`closed` 时追加一段把末点连回起点。
#[derive(Debug)]
pub struct PolylineTracker {
    segments: Vec<Tracker>,
    closed: bool,
    adjustable: bool,
}

impl PolylineTracker {
    /// 至少需要两个顶点
    pub fn new(
        session: &mut EditSession,
        name: &str,
        points: &[Point3],
        closed: bool,
        adjustable: bool,
    ) -> Result<Self> {
        if points.len() < 2 {
            warn!("Polyline '{}' needs at least two points", name);
            return Err(TrackerError::CoordinateCount {
                expected: 2,
                found: points.len(),
            });
        }

        let mut pairs: Vec<(Point3, Point3)> = points.windows(2).map(|w| (w[0], w[1])).collect();
        if closed {
            pairs.push((points[points.len() - 1], points[0]));
        }

        let segments: Vec<Tracker> = pairs
            .into_iter()
            .enumerate()
            .map(|(i, (start, end))| {
                Tracker::line(session, &format!("{}.segment{}", name, i), start, end)
            })
            .collect();

        if adjustable {
            let count = segments.len();
            let links = if closed { count } else { count - 1 };
            for i in 0..links {
                segments[i].link(
                    session,
                    LinkIndex::Vertex(1),
                    &segments[(i + 1) % count],
                    &[LinkIndex::Vertex(0)],
                    false,
                )?;
            }
        }

        debug!(
            "Built polyline '{}' with {} segments (closed: {}, adjustable: {})",
            name,
            segments.len(),
            closed,
            adjustable
        );
        Ok(Self {
            segments,
            closed,
            adjustable,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_adjustable(&self) -> bool {
        self.adjustable
    }

    pub fn segments(&self) -> &[Tracker] {
        &self.segments
    }

    pub fn segments_mut(&mut self) -> &mut [Tracker] {
        &mut self.segments
    }

    /// 拆出各段，联动关系保留在会话中
    pub fn into_segments(self) -> Vec<Tracker> {
        self.segments
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.segments.iter().map(Tracker::id).collect()
    }

    /// 折线顶点：每段的起点，开放折线再加上末段终点
    pub fn coordinates(&self, session: &EditSession) -> Result<Vec<Point3>> {
        let mut points = Vec::with_capacity(self.segments.len() + 1);
        for segment in &self.segments {
            let coordinates = segment.coordinates(session)?;
            let start = coordinates
                .first()
                .copied()
                .ok_or(TrackerError::EmptyGeometry(segment.id()))?;
            points.push(start);
        }

        if !self.closed {
            if let Some(last) = self.segments.last() {
                let coordinates = last.coordinates(session)?;
                let end = coordinates
                    .last()
                    .copied()
                    .ok_or(TrackerError::EmptyGeometry(last.id()))?;
                points.push(end);
            }
        }
        Ok(points)
    }

    pub fn select(&mut self) {
        for segment in &mut self.segments {
            segment.selectable.select();
        }
    }

    pub fn finish(self, session: &mut EditSession) -> Result<()> {
        for segment in self.segments {
            segment.finish(session)?;
        }
        Ok(())
    }
}

/// 矩形：闭合且首尾联动的四段折线
#[derive(Debug)]
pub struct BoxTracker {
    outline: PolylineTracker,
}

impl BoxTracker {
    /// `corners` 按顺序给出四个角点
    pub fn new(session: &mut EditSession, name: &str, corners: [Point3; 4]) -> Result<Self> {
        let outline = PolylineTracker::new(session, name, &corners, true, true)?;
        Ok(Self { outline })
    }

    /// 由两个对角点构造 XY 平面内的矩形
    pub fn from_corners(
        session: &mut EditSession,
        name: &str,
        min: Point3,
        max: Point3,
    ) -> Result<Self> {
        let corners = [
            Point3::new(min.x, min.y, min.z),
            Point3::new(max.x, min.y, min.z),
            Point3::new(max.x, max.y, min.z),
            Point3::new(min.x, max.y, min.z),
        ];
        Self::new(session, name, corners)
    }

    /// 由中心点与宽高构造
    pub fn from_center(
        session: &mut EditSession,
        name: &str,
        center: Point3,
        width: f64,
        height: f64,
    ) -> Result<Self> {
        let half = Vector3::new(width / 2.0, height / 2.0, 0.0);
        Self::from_corners(session, name, center - half, center + half)
    }

    pub fn sides(&self) -> &[Tracker] {
        self.outline.segments()
    }

    pub fn sides_mut(&mut self) -> &mut [Tracker] {
        self.outline.segments_mut()
    }

    /// 拆出四条边，联动关系保留在会话中
    pub fn into_sides(self) -> Vec<Tracker> {
        self.outline.into_segments()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.outline.ids()
    }

    /// 每条边的起点
    pub fn corners(&self, session: &EditSession) -> Result<Vec<Point3>> {
        self.outline.coordinates(session)
    }

    pub fn select(&mut self) {
        self.outline.select();
    }

    pub fn finish(self, session: &mut EditSession) -> Result<()> {
        self.outline.finish(session)
    }
}
