use bevy::prelude::*;
use crossbeam_channel::{Receiver, Sender};
use metaball_fx::prelude::{EventSink, FxEvent, FxEventKind};

/// Bevy message wrapping a simulation [`FxEvent`].
#[derive(Message, Debug, Clone)]
pub struct FxMessage {
    pub event: FxEvent,
}

/// Restricts which event kinds reach the bus. `None` forwards everything.
#[derive(Debug, Clone, Default)]
pub struct FxEventFilter {
    pub only: Option<Vec<FxEventKind>>,
}

impl FxEventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only(kinds: impl IntoIterator<Item = FxEventKind>) -> Self {
        Self {
            only: Some(kinds.into_iter().collect()),
        }
    }

    #[inline]
    pub fn allows(&self, kind: FxEventKind) -> bool {
        self.only.as_ref().map_or(true, |kinds| kinds.contains(&kind))
    }
}

/// Bus configuration. Change it at startup to silence noisy event kinds.
#[derive(Resource, Debug, Clone, Default)]
pub struct FxBusConfig {
    pub filter: FxEventFilter,
}

/// Global bus collecting simulation events until they are drained into [`FxMessage`]s.
#[derive(Resource)]
pub struct FxBus {
    tx: Sender<FxMessage>,
    rx: Receiver<FxMessage>,
}

impl Default for FxBus {
    fn default() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }
}

impl FxBus {
    pub fn sender(&self) -> &Sender<FxMessage> {
        &self.tx
    }

    pub fn receiver(&self) -> &Receiver<FxMessage> {
        &self.rx
    }

    /// A sink feeding this bus, filtered per `config`.
    pub fn sink(&self, config: &FxBusConfig) -> ChannelSink {
        ChannelSink {
            tx: self.tx.clone(),
            filter: config.filter.clone(),
        }
    }
}

/// Event sink that forwards events to the global fx bus.
pub struct ChannelSink {
    pub tx: Sender<FxMessage>,
    pub filter: FxEventFilter,
}

impl EventSink for ChannelSink {
    #[inline]
    fn send(&mut self, event: FxEvent) {
        if self.filter.allows(event.kind()) {
            let _ = self.tx.send(FxMessage { event });
        }
    }

    #[inline]
    fn wants(&self, kind: FxEventKind) -> bool {
        self.filter.allows(kind)
    }
}

#[cfg(test)]
mod tests {
    use metaball_fx::prelude::VolumeId;

    use super::*;

    #[test]
    fn filtered_sink_drops_unwanted_kinds() {
        let bus = FxBus::default();
        let config = FxBusConfig {
            filter: FxEventFilter::only([FxEventKind::VolumeAdded]),
        };
        let mut sink = bus.sink(&config);

        assert!(sink.wants(FxEventKind::VolumeAdded));
        assert!(!sink.wants(FxEventKind::MeshUpdated));

        sink.send(FxEvent::VolumeAdded {
            volume: VolumeId::new(0),
        });
        sink.send(FxEvent::FireDropped { volume: None });

        let drained: Vec<_> = bus.receiver().try_iter().collect();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].event.kind(), FxEventKind::VolumeAdded);
    }

    #[test]
    fn default_filter_forwards_everything() {
        let bus = FxBus::default();
        let mut sink = bus.sink(&FxBusConfig::default());
        sink.send(FxEvent::FireDropped { volume: None });
        sink.send(FxEvent::Warning {
            context: "test".into(),
            message: "hello".into(),
        });
        assert_eq!(bus.receiver().try_iter().count(), 2);
    }
}
