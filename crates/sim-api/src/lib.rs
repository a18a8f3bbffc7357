//! Service facade over the kernel: owns open games, a SQLite store, and
//! the flush discipline (snapshot plus log tail after every run). The HTTP
//! surface in [`server`] is a thin layer over [`GameService`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use contracts::{EnvNode, GameConfig, LogEntry, ModelCallFailure, Stage};
use serde::Serialize;
use sim_core::error::SchemaError;
use sim_core::game::{Game, StepOutcome};
use sim_core::turn::{ModelCall, ModelClient};

pub mod model;
pub mod persistence;
pub mod server;

use persistence::{PersistenceError, SqliteGameStore};

#[derive(Debug)]
pub enum ServiceError {
    GameNotFound(String),
    Persistence(PersistenceError),
    Schema(SchemaError),
    LockPoisoned,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GameNotFound(id) => write!(f, "no such game: {id}"),
            Self::Persistence(e) => write!(f, "{e}"),
            Self::Schema(e) => write!(f, "{e}"),
            Self::LockPoisoned => write!(f, "service lock poisoned"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<PersistenceError> for ServiceError {
    fn from(e: PersistenceError) -> Self {
        Self::Persistence(e)
    }
}

impl From<SchemaError> for ServiceError {
    fn from(e: SchemaError) -> Self {
        Self::Schema(e)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GameStatus {
    pub game_id: String,
    pub clock: DateTime<Utc>,
    pub stage: Stage,
    pub pending_events: usize,
    pub log_entries: usize,
}

struct OpenGame {
    game: Game,
    /// How many in-memory log entries have been flushed to the store.
    persisted_logs: usize,
}

pub struct GameService {
    store: SqliteGameStore,
    games: BTreeMap<String, OpenGame>,
    config: GameConfig,
}

impl GameService {
    pub fn new(store: SqliteGameStore) -> Self {
        Self::with_config(store, GameConfig::default())
    }

    pub fn with_config(store: SqliteGameStore, config: GameConfig) -> Self {
        Self {
            store,
            games: BTreeMap::new(),
            config,
        }
    }

    /// Validate the snapshot, build the game, seed the first round of
    /// turns, and persist. Nothing is stored when validation fails.
    pub fn create_game(&mut self, id: &str, node: &EnvNode) -> Result<(), ServiceError> {
        let mut game = Game::from_snapshot(node, self.config.clone())?;
        game.seed_turns();
        self.store.save_game(id, node)?;
        self.games.insert(
            id.to_string(),
            OpenGame {
                game,
                persisted_logs: 0,
            },
        );
        Ok(())
    }

    pub fn list_games(&self) -> Result<Vec<String>, ServiceError> {
        Ok(self.store.list_games()?)
    }

    /// Dispatch up to `max_events` events for the game, then flush the new
    /// snapshot and log tail. A corrupt stored snapshot fails the open and
    /// leaves in-memory state untouched. This holds `&mut self` across the
    /// model calls; callers sharing the service behind a mutex use
    /// [`run_events_shared`] instead.
    pub fn run_events(
        &mut self,
        id: &str,
        max_events: usize,
        model: &mut dyn ModelClient,
    ) -> Result<usize, ServiceError> {
        self.ensure_open(id)?;
        let open = self.games.get_mut(id).ok_or_else(|| game_not_found(id))?;
        let dispatched = open.game.run_events(max_events, model);
        self.flush(id)?;
        Ok(dispatched)
    }

    /// Pop and dispatch the game's next event, stopping at the model
    /// boundary for agent turns.
    pub fn begin_step(&mut self, id: &str) -> Result<StepOutcome, ServiceError> {
        self.ensure_open(id)?;
        let open = self.games.get_mut(id).ok_or_else(|| game_not_found(id))?;
        Ok(open.game.begin_step())
    }

    /// Feed a model reply into a turn started by [`GameService::begin_step`].
    pub fn resume_turn(
        &mut self,
        id: &str,
        call: ModelCall,
        reply: Result<String, ModelCallFailure>,
    ) -> Result<StepOutcome, ServiceError> {
        let open = self.games.get_mut(id).ok_or_else(|| game_not_found(id))?;
        Ok(open.game.resume_turn(call, reply))
    }

    /// Current world snapshot, from memory when the game is open.
    pub fn snapshot(&mut self, id: &str) -> Result<EnvNode, ServiceError> {
        self.ensure_open(id)?;
        let open = self.games.get(id).ok_or_else(|| game_not_found(id))?;
        Ok(open.game.snapshot()?)
    }

    /// Persist the snapshot and any unflushed log entries.
    pub fn save_game(&mut self, id: &str) -> Result<(), ServiceError> {
        if !self.games.contains_key(id) {
            return Err(game_not_found(id));
        }
        self.flush(id)
    }

    /// Log history from the store, newest first. Reads only what has been
    /// flushed; `run_events` and `save_game` flush before returning.
    pub fn query_logs(
        &self,
        id: &str,
        target: Option<&str>,
        limit: usize,
        cursor: Option<u64>,
    ) -> Result<Vec<LogEntry>, ServiceError> {
        if !self.games.contains_key(id) && self.store.load_game(id)?.is_none() {
            return Err(game_not_found(id));
        }
        Ok(self.store.load_logs(id, target, limit, cursor)?)
    }

    pub fn status(&mut self, id: &str) -> Result<GameStatus, ServiceError> {
        self.ensure_open(id)?;
        let open = self.games.get(id).ok_or_else(|| game_not_found(id))?;
        Ok(GameStatus {
            game_id: id.to_string(),
            clock: open.game.clock(),
            stage: open.game.world().stage(),
            pending_events: open.game.pending_events(),
            log_entries: open.game.log().len(),
        })
    }

    /// Load the game from the store if it is not already open. The event
    /// queue is not persisted, so a reopened game gets a fresh round of
    /// seeded turns; log ids continue past the stored history.
    fn ensure_open(&mut self, id: &str) -> Result<(), ServiceError> {
        if self.games.contains_key(id) {
            return Ok(());
        }
        let node = self.store.load_game(id)?.ok_or_else(|| game_not_found(id))?;
        let mut game = Game::from_snapshot(&node, self.config.clone())?;
        game.log_mut().resume_ids_from(self.store.max_log_id(id)? + 1);
        game.seed_turns();
        tracing::debug!(game = %id, "reopened game from store");
        self.games.insert(
            id.to_string(),
            OpenGame {
                game,
                persisted_logs: 0,
            },
        );
        Ok(())
    }

    fn flush(&mut self, id: &str) -> Result<(), ServiceError> {
        let open = self.games.get_mut(id).ok_or_else(|| game_not_found(id))?;
        let node = open.game.snapshot()?;
        self.store.save_game(id, &node)?;
        let tail = open.game.log().since(open.persisted_logs);
        self.store.append_logs(id, tail)?;
        open.persisted_logs = open.game.log().len();
        Ok(())
    }
}

/// Drive up to `max_events` events for a service shared behind a mutex,
/// then flush. The lock is dropped for the duration of every model call,
/// so snapshot and status readers can take it while a call is in flight.
pub fn run_events_shared(
    service: &Mutex<GameService>,
    id: &str,
    max_events: usize,
    model: &mut dyn ModelClient,
) -> Result<usize, ServiceError> {
    let mut dispatched = 0;
    'events: while dispatched < max_events {
        let mut step = lock(service)?.begin_step(id)?;
        loop {
            match step {
                StepOutcome::Idle => break 'events,
                StepOutcome::Completed => {
                    dispatched += 1;
                    break;
                }
                StepOutcome::AwaitingModel(call) => {
                    let reply = model.send(call.messages());
                    step = lock(service)?.resume_turn(id, call, reply)?;
                }
            }
        }
    }
    lock(service)?.save_game(id)?;
    Ok(dispatched)
}

fn lock(service: &Mutex<GameService>) -> Result<MutexGuard<'_, GameService>, ServiceError> {
    service.lock().map_err(|_| ServiceError::LockPoisoned)
}

fn game_not_found(id: &str) -> ServiceError {
    ServiceError::GameNotFound(id.to_string())
}
