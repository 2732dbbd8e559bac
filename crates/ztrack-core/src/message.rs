//! 发布/订阅消息总线
//!
//! 每个发布者维护 事件类型 -> 订阅者回调 的映射，分发是同步的。
//!
//! 回调在宿主（通常是 [`EditSession`](crate::session::EditSession)）上执行，
//! 可以直接修改几何并再次分发消息。为了打断回声：
//! - 订阅者处理某个发送者的消息期间，发送者被压入该订阅者的排除栈，
//!   订阅者此时发出的消息不会回送给发送者
//! - 正在执行的回调不会被重入

use crate::entity::EntityId;
use crate::math::Point3;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use tracing::{debug, trace};

/// 消息事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Geometry,
    Widget,
    Custom(u32),
}

impl EventKind {
    pub fn name(&self) -> String {
        match self {
            EventKind::Geometry => "GEOMETRY".to_string(),
            EventKind::Widget => "WIDGET".to_string(),
            EventKind::Custom(id) => format!("CUSTOM_{}", id),
        }
    }
}

/// 消息内容
#[derive(Debug, Clone, PartialEq)]
pub enum MessageData {
    Geometry(Vec<Point3>),
    Text(String),
}

impl MessageData {
    pub fn is_empty(&self) -> bool {
        match self {
            MessageData::Geometry(points) => points.is_empty(),
            MessageData::Text(text) => text.is_empty(),
        }
    }
}

/// 消息
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub sender: EntityId,
    pub kind: EventKind,
    pub data: MessageData,
}

impl Message {
    pub fn geometry(sender: EntityId, points: Vec<Point3>) -> Self {
        Self {
            sender,
            kind: EventKind::Geometry,
            data: MessageData::Geometry(points),
        }
    }

    pub fn widget(sender: EntityId, text: impl Into<String>) -> Self {
        Self {
            sender,
            kind: EventKind::Widget,
            data: MessageData::Text(text.into()),
        }
    }

    pub fn points(&self) -> Option<&[Point3]> {
        match &self.data {
            MessageData::Geometry(points) => Some(points),
            MessageData::Text(_) => None,
        }
    }
}

/// 订阅回调
pub type Callback<H> = Rc<RefCell<dyn FnMut(&mut H, EventKind, &Message)>>;

/// 能够承载消息总线的宿主
pub trait BusHost: Sized {
    fn bus(&self) -> &MessageBus<Self>;
    fn bus_mut(&mut self) -> &mut MessageBus<Self>;
}

/// 消息总线
pub struct MessageBus<H> {
    /// 发布者 -> 事件 -> [(订阅者, 回调)]
    channels: HashMap<EntityId, BTreeMap<EventKind, Vec<(EntityId, Callback<H>)>>>,
    /// 发布者 -> 暂时排除的订阅者栈
    excluded: HashMap<EntityId, Vec<EntityId>>,
}

impl<H: BusHost> MessageBus<H> {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
            excluded: HashMap::new(),
        }
    }

    /// 为 `subscriber` 注册 `publisher` 的若干事件
    ///
    /// 发布者不能订阅自己；同一订阅者对同一事件只保留首次注册的回调。
    pub fn register<F>(
        &mut self,
        publisher: EntityId,
        subscriber: EntityId,
        kinds: &[EventKind],
        callback: F,
    ) where
        F: FnMut(&mut H, EventKind, &Message) + 'static,
    {
        if publisher == subscriber {
            return;
        }

        let callback: Callback<H> = Rc::new(RefCell::new(callback));
        let events = self.channels.entry(publisher).or_default();

        for &kind in kinds {
            let subscribers = events.entry(kind).or_default();
            if subscribers.iter().any(|(id, _)| *id == subscriber) {
                continue;
            }
            subscribers.push((subscriber, callback.clone()));
        }
    }

    pub fn unregister(&mut self, publisher: EntityId, subscriber: EntityId, kinds: &[EventKind]) {
        let Some(events) = self.channels.get_mut(&publisher) else {
            return;
        };

        for kind in kinds {
            if let Some(subscribers) = events.get_mut(kind) {
                subscribers.retain(|(id, _)| *id != subscriber);
                if subscribers.is_empty() {
                    events.remove(kind);
                }
            }
        }

        if events.is_empty() {
            self.channels.remove(&publisher);
        }
    }

    /// 移除实体作为发布者与订阅者的所有注册
    pub fn unregister_all(&mut self, entity: EntityId) {
        self.channels.remove(&entity);
        self.excluded.remove(&entity);

        for events in self.channels.values_mut() {
            for subscribers in events.values_mut() {
                subscribers.retain(|(id, _)| *id != entity);
            }
            events.retain(|_, subscribers| !subscribers.is_empty());
        }
        self.channels.retain(|_, events| !events.is_empty());
    }

    /// 当前会收到 `publisher` 的 `kind` 消息的订阅者（已过滤排除栈）
    ///
    /// `kind` 为 `None` 时返回所有事件的订阅者。
    pub fn subscribers(&self, publisher: EntityId, kind: Option<EventKind>) -> Vec<EntityId> {
        self.callbacks(publisher, kind)
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }

    fn callbacks(
        &self,
        publisher: EntityId,
        kind: Option<EventKind>,
    ) -> Vec<(EntityId, Callback<H>)> {
        let Some(events) = self.channels.get(&publisher) else {
            return Vec::new();
        };
        let excluded = self.excluded.get(&publisher);

        events
            .iter()
            .filter(|(k, _)| kind.map_or(true, |kind| **k == kind))
            .flat_map(|(_, subscribers)| subscribers.iter())
            .filter(|(id, _)| excluded.map_or(true, |stack| !stack.contains(id)))
            .map(|(id, callback)| (*id, callback.clone()))
            .collect()
    }

    /// 暂时阻止 `publisher` 向 `subscriber` 发送消息
    pub fn push_excluded(&mut self, publisher: EntityId, subscriber: EntityId) {
        self.excluded.entry(publisher).or_default().push(subscriber);
    }

    pub fn pop_excluded(&mut self, publisher: EntityId) -> Option<EntityId> {
        let stack = self.excluded.get_mut(&publisher)?;
        let popped = stack.pop();
        if stack.is_empty() {
            self.excluded.remove(&publisher);
        }
        popped
    }

    pub fn excluded(&self, publisher: EntityId) -> &[EntityId] {
        self.excluded.get(&publisher).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// 同步分发消息，返回实际调用的回调数
    ///
    /// 空消息不分发。
    pub fn dispatch(host: &mut H, message: &Message, kind: EventKind, verbose: bool) -> usize {
        if message.data.is_empty() {
            return 0;
        }

        let callbacks = host.bus().callbacks(message.sender, Some(kind));

        if verbose {
            debug!(
                "{:?} dispatching {} to {} subscribers: {:?}",
                message.sender,
                kind.name(),
                callbacks.len(),
                message.data
            );
        }

        let mut delivered = 0;
        for (subscriber, cell) in callbacks {
            let Ok(mut callback) = cell.try_borrow_mut() else {
                trace!("Skipping re-entrant callback of {:?}", subscriber);
                continue;
            };

            host.bus_mut().push_excluded(subscriber, message.sender);
            (&mut *callback)(host, kind, message);
            host.bus_mut().pop_excluded(subscriber);
            delivered += 1;
        }
        delivered
    }
}

impl<H: BusHost> Default for MessageBus<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> std::fmt::Debug for MessageBus<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("publishers", &self.channels.len())
            .field("excluded", &self.excluded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    /// 最小宿主：每个节点保存一个值，收到消息时复制发送者的值并转发
    struct Host {
        bus: MessageBus<Host>,
        values: HashMap<EntityId, Point3>,
        log: Vec<(EntityId, EntityId)>,
    }

    impl BusHost for Host {
        fn bus(&self) -> &MessageBus<Self> {
            &self.bus
        }

        fn bus_mut(&mut self) -> &mut MessageBus<Self> {
            &mut self.bus
        }
    }

    fn ids<const N: usize>() -> [EntityId; N] {
        let mut keys: SlotMap<EntityId, ()> = SlotMap::with_key();
        std::array::from_fn(|_| keys.insert(()))
    }

    fn host() -> Host {
        Host {
            bus: MessageBus::new(),
            values: HashMap::new(),
            log: Vec::new(),
        }
    }

    /// 订阅者收到消息后更新自身并重新发布
    fn follower(me: EntityId) -> impl FnMut(&mut Host, EventKind, &Message) {
        move |host: &mut Host, kind: EventKind, message: &Message| {
            host.log.push((message.sender, me));
            let Some(point) = message.points().and_then(|p| p.first()).copied() else {
                return;
            };
            if host.values.get(&me) == Some(&point) {
                return;
            }
            host.values.insert(me, point);
            MessageBus::dispatch(host, &Message::geometry(me, vec![point]), kind, false);
        }
    }

    #[test]
    fn test_register_and_dispatch() {
        let [a, b, c] = ids();
        let mut host = host();
        host.bus.register(a, b, &[EventKind::Geometry], follower(b));
        host.bus.register(a, c, &[EventKind::Widget], follower(c));
        host.bus.register(a, a, &[EventKind::Geometry], follower(a));

        assert_eq!(host.bus.subscribers(a, Some(EventKind::Geometry)), vec![b]);
        assert_eq!(host.bus.subscribers(a, None).len(), 2);

        let message = Message::geometry(a, vec![Point3::new(1.0, 2.0, 3.0)]);
        let delivered = MessageBus::dispatch(&mut host, &message, EventKind::Geometry, true);

        assert_eq!(delivered, 1);
        assert_eq!(host.values[&b], Point3::new(1.0, 2.0, 3.0));
        assert!(!host.values.contains_key(&c));
    }

    #[test]
    fn test_duplex_echo_is_suppressed() {
        let [a, b] = ids();
        let mut host = host();
        host.bus.register(a, b, &[EventKind::Geometry], follower(b));
        host.bus.register(b, a, &[EventKind::Geometry], follower(a));

        let message = Message::geometry(a, vec![Point3::new(5.0, 0.0, 0.0)]);
        MessageBus::dispatch(&mut host, &message, EventKind::Geometry, false);

        // b 重新发布时 a 被排除，不会回送
        assert_eq!(host.log, vec![(a, b)]);
        assert!(host.bus.excluded(b).is_empty());
    }

    #[test]
    fn test_chain_delivers_downstream() {
        let [a, b, c] = ids();
        let mut host = host();
        host.bus.register(a, b, &[EventKind::Geometry], follower(b));
        host.bus.register(b, c, &[EventKind::Geometry], follower(c));
        host.bus.register(c, a, &[EventKind::Geometry], follower(a));

        let message = Message::geometry(a, vec![Point3::new(0.0, 7.0, 0.0)]);
        MessageBus::dispatch(&mut host, &message, EventKind::Geometry, false);

        assert_eq!(host.values[&b], Point3::new(0.0, 7.0, 0.0));
        assert_eq!(host.values[&c], Point3::new(0.0, 7.0, 0.0));
        // a 再转发给 b 时 b 的回调仍在执行，被跳过
        assert_eq!(host.values[&a], Point3::new(0.0, 7.0, 0.0));
        assert_eq!(host.log.len(), 3);
    }

    #[test]
    fn test_unregister() {
        let [a, b, c] = ids();
        let mut host = host();
        host.bus.register(a, b, &[EventKind::Geometry, EventKind::Widget], follower(b));
        host.bus.register(c, b, &[EventKind::Geometry], follower(b));

        host.bus.unregister(a, b, &[EventKind::Widget]);
        assert_eq!(host.bus.subscribers(a, None), vec![b]);

        host.bus.unregister_all(b);
        assert!(host.bus.is_empty());
    }

    #[test]
    fn test_empty_message_not_sent() {
        let [a, b] = ids();
        let mut host = host();
        host.bus.register(a, b, &[EventKind::Geometry], follower(b));

        let empty = Message::geometry(a, vec![]);
        let delivered = MessageBus::dispatch(&mut host, &empty, EventKind::Geometry, false);
        assert_eq!(delivered, 0);
    }
}
