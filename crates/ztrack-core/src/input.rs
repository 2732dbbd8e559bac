//! 指针驱动
//!
//! 把宿主已去抖的指针事件翻译为拖拽会话的开始/更新/结束/取消。
//! 拾取由宿主完成：按下时参与拖拽的是已选中的追踪器。

use crate::config::RotateModifier;
use crate::entity::EntityId;
use crate::error::Result;
use crate::math::{Point2, Point3};
use crate::scene::Viewport;
use crate::session::EditSession;
use crate::tracker::{DragPhase, Tracker};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// 鼠标按钮
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// 修饰键状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Modifiers {
    pub alt: bool,
    pub ctrl: bool,
    pub shift: bool,
}

impl Modifiers {
    pub fn held(&self, modifier: RotateModifier) -> bool {
        match modifier {
            RotateModifier::Alt => self.alt,
            RotateModifier::Ctrl => self.ctrl,
            RotateModifier::Shift => self.shift,
        }
    }
}

/// 指针事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "button")]
pub enum PointerEventKind {
    Move,
    ButtonDown(MouseButton),
    ButtonUp(MouseButton),
    /// 指针离开视口
    Leave,
}

/// 指针事件（屏幕坐标）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerEvent {
    pub kind: PointerEventKind,
    pub position: Point2,
    #[serde(default)]
    pub modifiers: Modifiers,
}

impl PointerEvent {
    pub fn new(kind: PointerEventKind, position: Point2) -> Self {
        Self {
            kind,
            position,
            modifiers: Modifiers::default(),
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}

/// 事件处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverOutcome {
    /// 事件未触发任何拖拽行为
    Ignored,
    Started,
    /// 拖拽更新，参数表示变换是否变化
    Updated(bool),
    /// 拖拽提交，附带被更新的实体
    Committed(Vec<EntityId>),
    Cancelled,
}

/// 指针驱动
#[derive(Debug, Default)]
pub struct PointerDriver {
    /// 当前手势中参与拖拽的追踪器（在 `trackers` 切片中的下标）
    active: Vec<usize>,
}

impl PointerDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        !self.active.is_empty()
    }

    /// 处理一个指针事件
    pub fn handle(
        &mut self,
        session: &mut EditSession,
        trackers: &mut [Tracker],
        viewport: &dyn Viewport,
        event: &PointerEvent,
    ) -> Result<DriverOutcome> {
        let world = viewport.screen_to_world(&event.position);

        match event.kind {
            PointerEventKind::ButtonDown(MouseButton::Left) if !session.is_dragging() => {
                self.begin(session, trackers, world)
            }
            PointerEventKind::Move if session.is_dragging() => {
                let rotate = event.modifiers.held(session.drag().config().rotate_modifier);
                let changed = session.update_drag(world, rotate)?;
                if changed {
                    self.run(DragPhase::During, session, trackers);
                }
                Ok(DriverOutcome::Updated(changed))
            }
            PointerEventKind::ButtonUp(MouseButton::Left) if session.is_dragging() => {
                let committed = session.end_drag()?;
                self.run(DragPhase::After, session, trackers);
                self.finish_gesture(trackers);
                Ok(DriverOutcome::Committed(committed))
            }
            PointerEventKind::ButtonDown(MouseButton::Right) | PointerEventKind::Leave
                if session.is_dragging() =>
            {
                session.cancel_drag();
                self.finish_gesture(trackers);
                Ok(DriverOutcome::Cancelled)
            }
            _ => {
                trace!("Ignoring pointer event {:?}", event.kind);
                Ok(DriverOutcome::Ignored)
            }
        }
    }

    fn begin(
        &mut self,
        session: &mut EditSession,
        trackers: &mut [Tracker],
        world: Point3,
    ) -> Result<DriverOutcome> {
        self.active = trackers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_selected() && t.draggable.enabled)
            .map(|(i, _)| i)
            .collect();

        let Some(&first) = self.active.first() else {
            return Ok(DriverOutcome::Ignored);
        };

        let center = trackers[first].drag_center(session, world)?;
        let selection: Vec<EntityId> = self.active.iter().map(|&i| trackers[i].id()).collect();

        self.run(DragPhase::Before, session, trackers);
        if !session.begin_drag(&selection, center, world)? {
            self.finish_gesture(trackers);
            return Ok(DriverOutcome::Ignored);
        }

        debug!("Pointer drag started with {} trackers", selection.len());
        Ok(DriverOutcome::Started)
    }

    fn run(&self, phase: DragPhase, session: &mut EditSession, trackers: &mut [Tracker]) {
        for &i in &self.active {
            if let Some(tracker) = trackers.get_mut(i) {
                let id = tracker.id();
                tracker.draggable.callbacks.run(phase, session, id);
            }
        }
    }

    fn finish_gesture(&mut self, trackers: &mut [Tracker]) {
        for &i in &self.active {
            if let Some(tracker) = trackers.get_mut(i) {
                tracker.draggable.callbacks.clear_local();
            }
        }
        self.active.clear();
    }
}
