//! Explicit game handle owning the world, the event queue, the log book,
//! and the configuration. All dispatch goes through here: the clock is
//! advanced to each popped event, the event runs, and failures are logged
//! and skipped rather than aborting the run.

use chrono::{DateTime, Duration, Utc};
use contracts::{EnvNode, GameConfig, LogKind, ModelCallFailure, Stage};

use crate::actions;
use crate::error::SchemaError;
use crate::grammar::{self, CommandSpec};
use crate::logbook::LogBook;
use crate::scheduler::{Effect, Event, EventKind, EventQueue};
use crate::turn::{self, ModelCall, ModelClient, TurnStep};
use crate::world::World;

/// One step of the dispatch loop, seen from outside the kernel.
#[derive(Debug)]
pub enum StepOutcome {
    /// The queue is empty.
    Idle,
    /// One event was fully dispatched.
    Completed,
    /// An agent turn is waiting on the model. Send the messages with no
    /// game borrow held, then feed the reply to [`Game::resume_turn`].
    AwaitingModel(ModelCall),
}

#[derive(Debug, Clone)]
pub struct Game {
    config: GameConfig,
    specs: Vec<CommandSpec>,
    world: World,
    queue: EventQueue,
    log: LogBook,
}

impl Game {
    pub fn new(world: World, config: GameConfig) -> Self {
        Self {
            config,
            specs: grammar::default_commands(),
            world,
            queue: EventQueue::new(),
            log: LogBook::new(),
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn log(&self) -> &LogBook {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut LogBook {
        &mut self.log
    }

    pub fn clock(&self) -> DateTime<Utc> {
        self.world.clock()
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    pub fn schedule(&mut self, event: Event) {
        self.queue.enqueue(event);
    }

    /// Give every person an initial turn at the current clock, in the
    /// world's deterministic person order.
    pub fn seed_turns(&mut self) {
        let now = self.world.clock();
        for person in self.world.person_names() {
            self.queue.enqueue(Event {
                time: now,
                kind: EventKind::AgentTurn { person },
            });
        }
        self.world.set_stage(Stage::AgentsActing);
    }

    /// Dispatch up to `max` events. Returns how many actually ran.
    pub fn run_events(&mut self, max: usize, model: &mut dyn ModelClient) -> usize {
        let mut dispatched = 0;
        while dispatched < max && self.step_with(model) {
            dispatched += 1;
        }
        dispatched
    }

    /// Dispatch every event due at or before `deadline`.
    pub fn run_until(&mut self, deadline: DateTime<Utc>, model: &mut dyn ModelClient) -> usize {
        let mut dispatched = 0;
        while self.queue.peek_time().is_some_and(|t| t <= deadline) && self.step_with(model) {
            dispatched += 1;
        }
        dispatched
    }

    /// Drain the queue completely. Unbounded recurring events would make
    /// this spin forever; callers seed those with a count.
    pub fn run_until_empty(&mut self, model: &mut dyn ModelClient) -> usize {
        let mut dispatched = 0;
        while self.step_with(model) {
            dispatched += 1;
        }
        dispatched
    }

    pub fn snapshot(&self) -> Result<EnvNode, SchemaError> {
        self.world.to_node()
    }

    pub fn from_snapshot(node: &EnvNode, config: GameConfig) -> Result<Self, SchemaError> {
        Ok(Self::new(World::from_node(node)?, config))
    }

    /// Pop and dispatch the next event. Agent turns stop at the model
    /// boundary instead of calling the client here; everything else runs
    /// to completion.
    pub fn begin_step(&mut self) -> StepOutcome {
        let Some(event) = self.queue.pop_next() else {
            return StepOutcome::Idle;
        };
        self.world.advance_clock(event.time);
        match event.kind {
            EventKind::AgentTurn { person } => {
                match turn::begin_turn(&self.world, &self.log, &self.config, &self.specs, &person)
                {
                    Ok(call) => return StepOutcome::AwaitingModel(call),
                    Err(e) => tracing::warn!(person = %person, "agent turn skipped: {e}"),
                }
            }
            EventKind::Judge(action) => {
                let now = self.world.clock();
                actions::judge(
                    &mut self.world,
                    &mut self.log,
                    &mut self.queue,
                    &self.config,
                    &action,
                    now,
                );
            }
            EventKind::DelayedEffect(effect) => self.apply_effect(effect),
            EventKind::Recurring {
                interval_secs,
                remaining,
                effect,
            } => {
                self.apply_effect(effect.clone());
                let next_remaining = match remaining {
                    None => Some(None),
                    Some(n) if n > 1 => Some(Some(n - 1)),
                    Some(_) => None,
                };
                if let Some(remaining) = next_remaining {
                    self.queue.enqueue(Event {
                        time: self.world.clock() + Duration::seconds(interval_secs),
                        kind: EventKind::Recurring {
                            interval_secs,
                            remaining,
                            effect,
                        },
                    });
                }
            }
        }
        self.update_stage();
        StepOutcome::Completed
    }

    /// Feed a model reply into an in-flight agent turn started by
    /// [`Game::begin_step`].
    pub fn resume_turn(
        &mut self,
        call: ModelCall,
        reply: Result<String, ModelCallFailure>,
    ) -> StepOutcome {
        let person = call.person().to_string();
        match turn::resume_turn(
            &mut self.world,
            &mut self.queue,
            &mut self.log,
            &self.config,
            &self.specs,
            call,
            reply,
        ) {
            Ok(TurnStep::NeedsModel(next)) => return StepOutcome::AwaitingModel(next),
            Ok(TurnStep::Done) => {}
            Err(e) => tracing::warn!(person = %person, "agent turn skipped: {e}"),
        }
        self.update_stage();
        StepOutcome::Completed
    }

    /// Dispatch one event with the client in hand. `false` when the queue
    /// was already empty.
    fn step_with(&mut self, model: &mut dyn ModelClient) -> bool {
        let mut step = self.begin_step();
        loop {
            match step {
                StepOutcome::Idle => return false,
                StepOutcome::Completed => return true,
                StepOutcome::AwaitingModel(call) => {
                    let reply = model.send(call.messages());
                    step = self.resume_turn(call, reply);
                }
            }
        }
    }

    fn apply_effect(&mut self, effect: Effect) {
        match effect {
            Effect::Notify { target, message } => {
                if self.world.find_object(&target).is_none() {
                    tracing::warn!(target = %target, "notification dropped, target vanished");
                    return;
                }
                self.log
                    .record(self.world.clock(), LogKind::Event, "world", vec![target], message);
            }
        }
    }

    fn update_stage(&mut self) {
        let stage = if self.queue.pending_turns() > 0 {
            Stage::AgentsActing
        } else if self.queue.is_empty() {
            Stage::EffectsApplied
        } else if self.world.stage() == Stage::AgentsActing {
            Stage::AgentsDone
        } else {
            Stage::EffectsApplying
        };
        self.world.set_stage(stage);
    }
}
