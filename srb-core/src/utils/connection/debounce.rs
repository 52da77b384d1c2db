//! Per-actuator debounce bookkeeping.
//!
//! Every change restarts that actuator's timer; a value is settled once its
//! timer runs out without a newer change. The owner decides when to sleep and
//! when to collect, which keeps this type free of tasks and easy to drive from
//! an event loop.

use std::time::Duration;

use hashbrown::HashMap;
use tokio::time::Instant;

use crate::utils::protocol::{ActuatorCommand, ActuatorId, CommandBatch};

#[derive(Debug, Clone, Copy)]
struct Pending {
    angle: i32,
    deadline: Instant,
}

#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<ActuatorId, Pending>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Debouncer {
            window,
            pending: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Record a new target, replacing any pending one for the same actuator
    /// and restarting its timer.
    pub fn touch(
        &mut self,
        cmd: ActuatorCommand,
        now: Instant,
    ) {
        self.pending.insert(
            cmd.id,
            Pending {
                angle: cmd.angle,
                deadline: now + self.window,
            },
        );
    }

    /// Drop the pending target of one actuator, if any.
    pub fn cancel(
        &mut self,
        id: ActuatorId,
    ) {
        self.pending.remove(&id);
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Earliest instant at which some target settles.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Remove and return every target whose timer has run out, ordered by
    /// deadline and then id.
    pub fn take_settled(
        &mut self,
        now: Instant,
    ) -> CommandBatch {
        let mut settled: Vec<(Instant, ActuatorId, i32)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(&id, p)| (p.deadline, id, p.angle))
            .collect();
        settled.sort_unstable_by_key(|&(deadline, id, _)| (deadline, id));

        settled
            .into_iter()
            .map(|(_, id, angle)| {
                self.pending.remove(&id);
                ActuatorCommand { id, angle }
            })
            .collect()
    }
}
