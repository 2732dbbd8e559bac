//! 联动图
//!
//! 记录实体之间坐标索引级别的对应关系：
//! `source[source_index]` 的变化需要传播到 `target[target_indices]`。
//!
//! 图中允许环（闭合多边形的边首尾相连），传播的终止依赖
//! 每一轮传播独立的已访问集合，而不是无环性。

use crate::entity::{EntityId, GeometryEntity};
use crate::math::{coordinate_deltas, Matrix4, Vector3};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use tracing::{debug, trace};

/// 联动索引
///
/// `All` 对应外部约定的 `-1`：整个坐标列表作为刚体联动。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum LinkIndex {
    Vertex(usize),
    All,
}

impl TryFrom<i64> for LinkIndex {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(LinkIndex::All),
            v if v >= 0 => Ok(LinkIndex::Vertex(v as usize)),
            v => Err(format!("invalid link index {}", v)),
        }
    }
}

impl From<LinkIndex> for i64 {
    fn from(index: LinkIndex) -> Self {
        match index {
            LinkIndex::Vertex(i) => i as i64,
            LinkIndex::All => -1,
        }
    }
}

/// source 索引 -> target 索引集合
pub type IndexMapping = BTreeMap<LinkIndex, BTreeSet<LinkIndex>>;

/// 一条有向联动边（只读视图）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEdge {
    pub source: EntityId,
    pub source_index: LinkIndex,
    pub target: EntityId,
    pub target_indices: BTreeSet<LinkIndex>,
}

/// 联动图邻接结构，由所有实体共享
#[derive(Debug, Clone, Default)]
pub struct LinkGraph {
    /// source -> target -> 索引映射
    edges: BTreeMap<EntityId, BTreeMap<EntityId, IndexMapping>>,
}

impl LinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册联动关系
    ///
    /// 除非 `target_only`，反向边会自动注册：每个 `target_indices`
    /// 中的顶点索引回指 `source_index`。整体联动（`All`）不建立反向边。
    pub fn link(
        &mut self,
        source: EntityId,
        source_index: LinkIndex,
        target: EntityId,
        target_indices: &[LinkIndex],
        target_only: bool,
    ) {
        if source == target {
            debug!("Ignoring self link on {:?}", source);
            return;
        }

        self.insert(source, source_index, target, target_indices);

        if target_only {
            return;
        }

        for &index in target_indices {
            if index == LinkIndex::All {
                continue;
            }
            self.insert(target, index, source, &[source_index]);
        }
    }

    fn insert(
        &mut self,
        source: EntityId,
        source_index: LinkIndex,
        target: EntityId,
        target_indices: &[LinkIndex],
    ) {
        self.edges
            .entry(source)
            .or_default()
            .entry(target)
            .or_default()
            .entry(source_index)
            .or_default()
            .extend(target_indices.iter().copied());
    }

    /// 移除两实体之间的双向联动
    pub fn unlink(&mut self, a: EntityId, b: EntityId) {
        self.remove_edge(a, b);
        self.remove_edge(b, a);
    }

    fn remove_edge(&mut self, source: EntityId, target: EntityId) {
        if let Some(targets) = self.edges.get_mut(&source) {
            targets.remove(&target);
            if targets.is_empty() {
                self.edges.remove(&source);
            }
        }
    }

    /// 移除与实体相关的所有边（实体销毁时调用）
    pub fn unlink_all(&mut self, entity: EntityId) {
        self.edges.remove(&entity);
        self.edges.retain(|_, targets| {
            targets.remove(&entity);
            !targets.is_empty()
        });
    }

    /// `source` 到 `target` 的索引映射
    pub fn mapping(&self, source: EntityId, target: EntityId) -> Option<&IndexMapping> {
        self.edges.get(&source)?.get(&target)
    }

    /// `source` 的所有下游实体及对应映射
    pub fn targets(&self, source: EntityId) -> impl Iterator<Item = (EntityId, &IndexMapping)> {
        self.edges
            .get(&source)
            .into_iter()
            .flat_map(|targets| targets.iter().map(|(id, mapping)| (*id, mapping)))
    }

    pub fn neighbors(&self, source: EntityId) -> Vec<EntityId> {
        self.targets(source).map(|(id, _)| id).collect()
    }

    pub fn is_linked(&self, source: EntityId, target: EntityId) -> bool {
        self.mapping(source, target).is_some()
    }

    /// 展开为边列表
    pub fn edges(&self) -> Vec<LinkEdge> {
        let mut result = Vec::new();
        for (&source, targets) in &self.edges {
            for (&target, mapping) in targets {
                for (&source_index, target_indices) in mapping {
                    result.push(LinkEdge {
                        source,
                        source_index,
                        target,
                        target_indices: target_indices.clone(),
                    });
                }
            }
        }
        result
    }

    pub fn edge_count(&self) -> usize {
        self.edges
            .values()
            .flat_map(|targets| targets.values())
            .map(|mapping| mapping.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// 拖拽准备：从选中实体出发广度优先展开
    ///
    /// 选中实体整体拖拽；下游实体按映射累积 `drag_indices`，
    /// 索引集合增长时才重新展开，保证有环图也能终止。
    /// 所有索引都被覆盖的实体提升为整体拖拽。
    ///
    /// 返回参与拖拽的实体，按发现顺序排列。
    pub fn setup_drag(
        &self,
        entities: &mut SlotMap<EntityId, GeometryEntity>,
        selection: &[EntityId],
    ) -> Vec<EntityId> {
        for entity in entities.values_mut() {
            entity.clear_drag_state();
        }

        let mut participants = Vec::new();
        let mut queue = VecDeque::new();

        for &id in selection {
            let Some(entity) = entities.get_mut(id) else {
                continue;
            };
            if entity.is_empty() || entity.is_full_drag {
                continue;
            }
            entity.mark_full_drag();
            participants.push(id);
            queue.push_back(id);
        }

        // 每个实体记录上次展开时的索引数量
        let mut expanded: HashMap<EntityId, usize> = HashMap::new();

        while let Some(parent) = queue.pop_front() {
            let Some(parent_indices) = entities.get(parent).map(|e| e.drag_indices.clone()) else {
                continue;
            };
            if expanded.get(&parent) == Some(&parent_indices.len()) {
                continue;
            }
            expanded.insert(parent, parent_indices.len());

            for (target, mapping) in self.targets(parent) {
                let Some(entity) = entities.get_mut(target) else {
                    continue;
                };
                if entity.is_full_drag {
                    continue;
                }

                let (indices, full) = map_drag_indices(mapping, &parent_indices, entity.len());
                if !full && indices.is_empty() {
                    continue;
                }

                let first_visit = entity.drag_indices.is_empty();
                let before = entity.drag_indices.len();

                if full {
                    entity.mark_full_drag();
                } else {
                    entity.drag_indices.extend(indices);
                }

                if first_visit {
                    participants.push(target);
                }
                if entity.drag_indices.len() > before {
                    queue.push_back(target);
                }
            }
        }

        for &id in &participants {
            if let Some(entity) = entities.get_mut(id) {
                if !entity.is_full_drag && entity.drag_indices.len() == entity.len() {
                    trace!("Promoting {} to full drag", entity.name());
                    entity.mark_full_drag();
                }
            }
        }

        debug!(
            "Drag setup: {} selected, {} participating",
            selection.len(),
            participants.len()
        );

        participants
    }

    /// 把父实体的变化传播给所有下游实体（`exclude` 除外）
    pub(crate) fn propagate(
        &self,
        entities: &mut SlotMap<EntityId, GeometryEntity>,
        pass: &mut PropagationPass,
        parent: EntityId,
        exclude: Option<EntityId>,
        change: &Change<'_>,
    ) {
        for target in self.neighbors(parent) {
            if Some(target) == exclude {
                continue;
            }
            self.linked_update(entities, pass, target, parent, change);
        }
    }

    /// 单个下游实体根据父实体的变化重新计算联动坐标
    ///
    /// 同一轮传播中实体可以经由多条路径被更新，每个索引只接受第一次到达的位移。
    fn linked_update(
        &self,
        entities: &mut SlotMap<EntityId, GeometryEntity>,
        pass: &mut PropagationPass,
        target: EntityId,
        parent: EntityId,
        change: &Change<'_>,
    ) {
        let Some(mapping) = self.mapping(parent, target) else {
            return;
        };
        if pass.is_locked(target) {
            trace!("{:?} is updating, skipping linked update", target);
            return;
        }

        let Some(old) = entities.get(target).map(|e| e.get_coordinates()) else {
            return;
        };
        if old.is_empty() {
            return;
        }

        let applied = pass.applied(target);
        let mut new = old.clone();
        let mut mapped = BTreeSet::new();
        let mut rigid_delta = None;

        for (source_index, target_indices) in mapping {
            let Some(delta) = change.delta_for(*source_index) else {
                continue;
            };

            for target_index in target_indices {
                match *target_index {
                    LinkIndex::All => rigid_delta = Some(delta),
                    LinkIndex::Vertex(i) if i < old.len() && !applied.contains(&i) => {
                        new[i] = match change.matrix {
                            Some(matrix) => matrix.transform_point(&old[i]),
                            None => old[i] + delta,
                        };
                        mapped.insert(i);
                    }
                    LinkIndex::Vertex(_) => {}
                }
            }
        }

        if let Some(delta) = rigid_delta {
            for (i, point) in old.iter().enumerate() {
                if applied.contains(&i) {
                    continue;
                }
                new[i] = match change.matrix {
                    Some(matrix) => matrix.transform_point(point),
                    None => point + delta,
                };
                mapped.insert(i);
            }
        }

        if mapped.is_empty() {
            trace!("{:?} already updated in this pass", target);
            return;
        }
        pass.mark_applied(target, &mapped);

        let deltas = coordinate_deltas(&new, &old);
        let changed: BTreeSet<usize> = deltas
            .iter()
            .enumerate()
            .filter(|(_, d)| **d != Vector3::zeros())
            .map(|(i, _)| i)
            .collect();

        if changed.is_empty() {
            return;
        }

        if let Some(entity) = entities.get_mut(target) {
            trace!("Linked update of {} at {:?}", entity.name(), changed);
            if pass.committed.contains(&target) {
                entity.amend(new);
            } else {
                entity.commit(new);
                pass.committed.push(target);
            }
        }

        // 只有整体按矩阵移动时，矩阵才能继续描述下游的运动
        let matrix = change.matrix.filter(|_| mapped.len() == old.len());

        let child = Change {
            indices: &changed,
            deltas: &deltas,
            matrix,
        };
        self.propagate(entities, pass, target, Some(parent), &child);
    }
}

/// 把父实体的拖拽索引映射为子实体的索引，第二个值表示整体联动
fn map_drag_indices(
    mapping: &IndexMapping,
    parent_indices: &BTreeSet<usize>,
    len: usize,
) -> (BTreeSet<usize>, bool) {
    let mut indices = BTreeSet::new();
    let mut full = false;

    for (source_index, target_indices) in mapping {
        let matches = match source_index {
            LinkIndex::Vertex(i) => parent_indices.contains(i),
            LinkIndex::All => !parent_indices.is_empty(),
        };
        if !matches {
            continue;
        }

        for target_index in target_indices {
            match *target_index {
                LinkIndex::All => full = true,
                LinkIndex::Vertex(i) if i < len => {
                    indices.insert(i);
                }
                LinkIndex::Vertex(_) => {}
            }
        }
    }

    (indices, full)
}

/// 父实体的坐标变化
pub(crate) struct Change<'a> {
    /// 发生变化的父实体索引
    pub indices: &'a BTreeSet<usize>,
    /// 按父实体坐标索引排列的位移
    pub deltas: &'a [Vector3],
    /// 父实体整体按矩阵移动时的变换矩阵
    pub matrix: Option<&'a Matrix4>,
}

impl Change<'_> {
    fn delta_for(&self, source_index: LinkIndex) -> Option<Vector3> {
        match source_index {
            LinkIndex::Vertex(i) if self.indices.contains(&i) => self.deltas.get(i).copied(),
            LinkIndex::Vertex(_) => None,
            LinkIndex::All => self
                .indices
                .iter()
                .next()
                .and_then(|&i| self.deltas.get(i).copied()),
        }
    }
}

/// 一轮传播的状态
#[derive(Debug, Default)]
pub(crate) struct PropagationPass {
    /// 正在执行 `update` 的实体，不接受联动更新
    locked: HashSet<EntityId>,
    /// 本轮已经接受过位移的索引
    applied: HashMap<EntityId, BTreeSet<usize>>,
    /// 提交顺序，每个实体只出现一次
    pub committed: Vec<EntityId>,
}

impl PropagationPass {
    pub fn new(root: EntityId) -> Self {
        let mut pass = Self::default();
        pass.lock(root);
        pass
    }

    pub fn lock(&mut self, id: EntityId) {
        self.locked.insert(id);
    }

    pub fn is_locked(&self, id: EntityId) -> bool {
        self.locked.contains(&id)
    }

    fn applied(&self, id: EntityId) -> BTreeSet<usize> {
        self.applied.get(&id).cloned().unwrap_or_default()
    }

    fn mark_applied(&mut self, id: EntityId, indices: &BTreeSet<usize>) {
        self.applied
            .entry(id)
            .or_default()
            .extend(indices.iter().copied());
    }
}
