// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus - in-process pub/sub for run, task and learning events.
//
// Backed by a tokio broadcast channel. Slow receivers lag and lose the oldest
// events; publishing never blocks the orchestrator.

use crate::domain::events::{LearningEvent, RunEvent, TaskEvent};
use crate::domain::execution::RunId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Run(RunEvent),
    Task(TaskEvent),
    Learning(LearningEvent),
}

impl DomainEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            DomainEvent::Run(e) => e.run_id(),
            DomainEvent::Task(e) => e.run_id(),
            DomainEvent::Learning(e) => e.run_id(),
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// `capacity` events are buffered per receiver before the oldest are dropped.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1024)
    }

    pub fn publish_run_event(&self, event: RunEvent) {
        self.publish(DomainEvent::Run(event));
    }

    pub fn publish_task_event(&self, event: TaskEvent) {
        self.publish(DomainEvent::Task(event));
    }

    pub fn publish_learning_event(&self, event: LearningEvent) {
        self.publish(DomainEvent::Learning(event));
    }

    fn publish(&self, event: DomainEvent) {
        debug!(?event, "Publishing event");
        // Err only means nobody is listening.
        if self.sender.send(event).is_err() {
            debug!("No subscribers listening to event");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Receiver that only yields events belonging to `run_id`.
    pub fn subscribe_run(&self, run_id: RunId) -> RunEventReceiver {
        RunEventReceiver {
            receiver: self.sender.subscribe(),
            run_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Everything currently buffered, without waiting.
    pub fn drain(&mut self) -> Vec<DomainEvent> {
        let mut events = Vec::new();
        loop {
            match self.try_recv() {
                Ok(event) => events.push(event),
                Err(EventBusError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        events
    }
}

pub struct RunEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    run_id: RunId,
}

impl RunEventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.run_id() == self.run_id {
                return Ok(event);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::TaskId;
    use chrono::Utc;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();
        let run_id = RunId::new();

        event_bus.publish_run_event(RunEvent::RunStarted {
            run_id,
            task_count: 4,
            level_count: 3,
            started_at: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            DomainEvent::Run(RunEvent::RunStarted { run_id: id, task_count, .. }) => {
                assert_eq!(id, run_id);
                assert_eq!(task_count, 4);
            }
            other => panic!("Wrong event type received: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_filtering() {
        let event_bus = EventBus::new(10);
        let run_id = RunId::new();
        let mut receiver = event_bus.subscribe_run(run_id);

        event_bus.publish_task_event(TaskEvent::AttemptFailed {
            run_id: RunId::new(),
            task_id: TaskId::new("other"),
            attempt: 1,
            reason: "ignored".to_string(),
        });
        event_bus.publish_task_event(TaskEvent::AttemptFailed {
            run_id,
            task_id: TaskId::new("mine"),
            attempt: 1,
            reason: "kept".to_string(),
        });

        match receiver.recv().await.unwrap() {
            DomainEvent::Task(TaskEvent::AttemptFailed { task_id, .. }) => {
                assert_eq!(task_id, TaskId::new("mine"));
            }
            other => panic!("Wrong event type received: {other:?}"),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let event_bus = EventBus::new(4);
        event_bus.publish_learning_event(LearningEvent::PatternWriteFailed {
            run_id: RunId::new(),
            task_id: TaskId::new("t"),
            error: "index offline".to_string(),
        });
        assert_eq!(event_bus.subscriber_count(), 0);
    }

    #[test]
    fn test_drain_collects_buffered_events() {
        let event_bus = EventBus::new(8);
        let mut receiver = event_bus.subscribe();
        let run_id = RunId::new();
        for level in 0..3 {
            event_bus.publish_run_event(RunEvent::LevelStarted {
                run_id,
                level,
                tasks: Vec::new(),
            });
        }
        assert_eq!(receiver.drain().len(), 3);
        assert!(receiver.drain().is_empty());
    }
}
