//! ZTrack 联动几何引擎
//!
//! 维护一组可拖拽控制柄（点、折线）之间的坐标联动关系，
//! 在拖拽过程中实时预览，手势结束后一次性提交。
//!
//! # 架构设计
//!
//! - `EditSession`: 会话上下文，持有实体、联动图、消息总线、延迟队列和拖拽会话
//! - `LinkGraph`: 实体之间索引级别的联动边，传播算法在这里
//! - `DragSession`: 指针驱动的刚体变换与预览几何
//! - `TaskQueue`: 场景写入延迟到宿主的下一个 tick
//! - `Tracker`: 面向用户的控制柄，由实体和若干能力组合而成
//!
//! # 示例
//!
//! ```rust
//! use ztrack_core::prelude::*;
//!
//! let mut session = EditSession::default();
//! let a = Tracker::line(&mut session, "a", Point3::new(-1.0, 0.0, 0.0), Point3::origin());
//! let b = Tracker::line(&mut session, "b", Point3::origin(), Point3::new(1.0, 0.0, 0.0));
//!
//! // a 的终点与 b 的起点联动
//! a.link(&mut session, LinkIndex::Vertex(1), &b, &[LinkIndex::Vertex(0)], false).unwrap();
//!
//! a.update(&mut session, vec![Point3::new(-1.0, 0.0, 0.0), Point3::new(1.0, 1.0, 0.0)]).unwrap();
//! assert_eq!(b.coordinates(&session).unwrap()[0], Point3::new(1.0, 1.0, 0.0));
//! ```

pub mod config;
pub mod deferred;
pub mod drag;
pub mod entity;
pub mod error;
pub mod input;
pub mod link;
pub mod math;
pub mod message;
pub mod scene;
pub mod session;
pub mod tracker;
pub mod transform;

pub mod prelude {
    //! 常用类型的便捷导入
    pub use crate::config::{DragConfig, RotateModifier};
    pub use crate::deferred::{FlushReport, TaskQueue};
    pub use crate::drag::{DragMode, DragSession, DragState};
    pub use crate::entity::{CoordinateProvider, EntityId, GeometryEntity};
    pub use crate::error::TrackerError;
    pub use crate::input::{
        DriverOutcome, Modifiers, MouseButton, PointerDriver, PointerEvent, PointerEventKind,
    };
    pub use crate::link::{LinkEdge, LinkGraph, LinkIndex};
    pub use crate::math::{Matrix4, Point2, Point3, Vector3};
    pub use crate::message::{BusHost, EventKind, Message, MessageBus, MessageData};
    pub use crate::scene::{MemoryScene, PlanarViewport, SceneGraph, Viewport};
    pub use crate::session::{EditSession, UpdateOutcome, UpdateSource};
    pub use crate::tracker::{
        BoxTracker, DragCallbacks, DragPhase, DragStyle, Draggable, PolylineTracker, Selectable,
        Tracker, TrackerKind,
    };
    pub use crate::transform::DragTransform;
}
