//! 场景脚本
//!
//! JSON 描述的追踪器、联动关系与一段指针手势，
//! 在内存场景里回放，用于无界面演示与回归检查。

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::cell::Cell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, info};
use ztrack_core::prelude::*;

/// 内置演示场景：矩形框带一根联动的摆臂和末端标记
pub const DEMO_SCENE: &str = r#"{
    "config": { "translate_increment": 0.5, "rotate_increment": 0.0 },
    "trackers": [
        {
            "type": "box", "name": "frame",
            "min": [0.0, 0.0, 0.0], "max": [4.0, 2.0, 0.0], "selected": true
        },
        { "type": "line", "name": "arm", "start": [4.0, 2.0, 0.0], "end": [6.0, 4.0, 0.0] },
        { "type": "marker", "name": "tip", "point": [6.0, 4.0, 0.0] }
    ],
    "links": [
        { "source": "frame.side1", "source_index": 1, "target": "arm", "target_indices": [0] },
        {
            "source": "arm", "source_index": 1,
            "target": "tip", "target_indices": [0], "target_only": true
        }
    ],
    "gesture": [
        { "kind": { "type": "button_down", "button": "left" }, "position": [2.0, -1.0] },
        { "kind": { "type": "move" }, "position": [3.2, -1.0] },
        { "kind": { "type": "move" }, "position": [4.1, -1.0] },
        { "kind": { "type": "button_up", "button": "left" }, "position": [4.1, -1.0] }
    ]
}"#;

/// 视口参数
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ViewportDef {
    pub origin: Point2,
    pub scale: f64,
}

impl Default for ViewportDef {
    fn default() -> Self {
        Self {
            origin: Point2::origin(),
            scale: 1.0,
        }
    }
}

/// 追踪器定义
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TrackerDef {
    Marker {
        name: String,
        point: Point3,
        #[serde(default)]
        selected: bool,
    },
    Line {
        name: String,
        start: Point3,
        end: Point3,
        #[serde(default)]
        selected: bool,
        #[serde(default)]
        style: DragStyle,
    },
    Polyline {
        name: String,
        points: Vec<Point3>,
        #[serde(default)]
        selected: bool,
        #[serde(default)]
        style: DragStyle,
    },
    /// 分段折线，各段命名为 `<name>.segment0` ..
    Path {
        name: String,
        points: Vec<Point3>,
        #[serde(default)]
        closed: bool,
        #[serde(default = "default_adjustable")]
        adjustable: bool,
        #[serde(default)]
        selected: bool,
    },
    /// 四条边分别命名为 `<name>.side0` .. `<name>.side3`
    Box {
        name: String,
        min: Point3,
        max: Point3,
        #[serde(default)]
        selected: bool,
    },
}

fn default_adjustable() -> bool {
    true
}

/// 联动定义，引用追踪器名称
#[derive(Debug, Clone, Deserialize)]
pub struct LinkDef {
    pub source: String,
    pub source_index: LinkIndex,
    pub target: String,
    pub target_indices: Vec<LinkIndex>,
    #[serde(default)]
    pub target_only: bool,
}

/// 场景脚本
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SceneScript {
    pub config: DragConfig,
    pub viewport: ViewportDef,
    pub trackers: Vec<TrackerDef>,
    pub links: Vec<LinkDef>,
    pub gesture: Vec<PointerEvent>,
}

/// 回放结果
#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<DriverOutcome>,
    /// 按创建顺序排列的 (名称, 最终坐标)
    pub coordinates: Vec<(String, Vec<Point3>)>,
    pub scene_writes: usize,
    pub failed_tasks: usize,
}

impl SceneScript {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse scene script")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scene script {}", path.display()))?;
        Self::from_json_str(&json)
    }

    pub fn demo() -> Result<Self> {
        Self::from_json_str(DEMO_SCENE)
    }

    /// 构建会话并回放手势
    pub fn run(&self, verbose: bool) -> Result<RunSummary> {
        let mut session = EditSession::new(self.config.clone());
        session.set_verbose(verbose);

        let scheduled = Rc::new(Cell::new(0usize));
        let counter = scheduled.clone();
        session
            .queue_mut()
            .set_schedule_hook(move || counter.set(counter.get() + 1));

        let mut names = Vec::new();
        let mut trackers = Vec::new();
        for def in &self.trackers {
            build_tracker(&mut session, def, &mut names, &mut trackers)?;
        }

        let index: HashMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let lookup = |name: &str| {
            index
                .get(name)
                .copied()
                .ok_or_else(|| anyhow!("Unknown tracker '{}'", name))
        };

        for link in &self.links {
            let source = lookup(&link.source)?;
            let target = lookup(&link.target)?;
            trackers[source]
                .link(
                    &mut session,
                    link.source_index,
                    &trackers[target],
                    &link.target_indices,
                    link.target_only,
                )
                .with_context(|| format!("Failed to link {} -> {}", link.source, link.target))?;
        }

        let mut scene = MemoryScene::new();
        let mut summary = RunSummary::default();
        summary.failed_tasks += session.tick(&mut scene).failed;

        let viewport = PlanarViewport::new(self.viewport.origin, self.viewport.scale);
        let mut driver = PointerDriver::new();
        for event in &self.gesture {
            let outcome = driver.handle(&mut session, &mut trackers, &viewport, event)?;
            debug!("{:?} -> {:?}", event.kind, outcome);
            summary.outcomes.push(outcome);
            summary.failed_tasks += session.tick(&mut scene).failed;
        }

        if session.is_dragging() {
            info!("Gesture ended without release, cancelling");
            session.cancel_drag();
            summary.failed_tasks += session.tick(&mut scene).failed;
        }

        for (name, tracker) in names.into_iter().zip(&trackers) {
            summary.coordinates.push((name, tracker.coordinates(&session)?));
        }
        summary.scene_writes = scene.writes;
        debug!("{} flushes scheduled", scheduled.get());

        Ok(summary)
    }
}

fn build_tracker(
    session: &mut EditSession,
    def: &TrackerDef,
    names: &mut Vec<String>,
    trackers: &mut Vec<Tracker>,
) -> Result<()> {
    match def {
        TrackerDef::Marker { name, point, selected } => {
            let mut tracker = Tracker::marker(session, name, *point);
            if *selected {
                tracker.selectable.select();
            }
            names.push(name.clone());
            trackers.push(tracker);
        }
        TrackerDef::Line {
            name,
            start,
            end,
            selected,
            style,
        } => {
            let mut tracker = Tracker::line(session, name, *start, *end);
            tracker.draggable.style = *style;
            if *selected {
                tracker.selectable.select();
            }
            names.push(name.clone());
            trackers.push(tracker);
        }
        TrackerDef::Polyline {
            name,
            points,
            selected,
            style,
        } => {
            let mut tracker = Tracker::polyline(session, name, points.clone());
            tracker.draggable.style = *style;
            if *selected {
                tracker.selectable.select();
            }
            names.push(name.clone());
            trackers.push(tracker);
        }
        TrackerDef::Path {
            name,
            points,
            closed,
            adjustable,
            selected,
        } => {
            let mut path = PolylineTracker::new(session, name, points, *closed, *adjustable)?;
            if *selected {
                path.select();
            }
            for (i, segment) in path.into_segments().into_iter().enumerate() {
                names.push(format!("{}.segment{}", name, i));
                trackers.push(segment);
            }
        }
        TrackerDef::Box {
            name,
            min,
            max,
            selected,
        } => {
            let mut rect = BoxTracker::from_corners(session, name, *min, *max)?;
            if *selected {
                rect.select();
            }
            for (i, side) in rect.into_sides().into_iter().enumerate() {
                names.push(format!("{}.side{}", name, i));
                trackers.push(side);
            }
        }
    }
    Ok(())
}
