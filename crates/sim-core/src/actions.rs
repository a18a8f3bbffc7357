//! Action resolver. Self-only actions mutate only the actor's own state and
//! apply synchronously without touching the clock. World-affecting actions
//! are packaged as judge events; the judge validates against the actor's
//! visible surroundings and either commits or schedules exactly one
//! rejection notification. Shared state is never touched on a failure path.

use chrono::{DateTime, Duration, Utc};
use contracts::{GameConfig, LogKind};

use crate::error::StructureError;
use crate::grammar::Invocation;
use crate::logbook::LogBook;
use crate::scheduler::{Effect, Event, EventKind, PendingAction};
use crate::world::{GameObject, ObjPayload, World};

#[derive(Debug, Clone, PartialEq)]
pub enum ActionCommand {
    Speak { target: String, message: String },
    Think { thought: String },
    Interact { target: String, action: String },
    Move { destination: String },
    Look { target: String },
    Memorize { content: String },
    Note { content: String },
    SetRelation { target: String, relation: String, description: String },
    AddRelationNote { target: String, note: String },
    Relations,
    Recall { filter: String },
}

impl ActionCommand {
    /// Map a parsed invocation from the default command set. `None` for a
    /// name outside the protocol.
    pub fn from_invocation(inv: &Invocation) -> Option<Self> {
        let arg = |i: usize| inv.args.get(i).cloned();
        let cmd = match inv.name.as_str() {
            "speak" => Self::Speak {
                target: arg(0)?,
                message: arg(1)?,
            },
            "think" => Self::Think { thought: arg(0)? },
            "interact" => Self::Interact {
                target: arg(0)?,
                action: arg(1)?,
            },
            "move" => Self::Move {
                destination: arg(0)?,
            },
            "look" => Self::Look { target: arg(0)? },
            "memorize" => Self::Memorize { content: arg(0)? },
            "note" => Self::Note { content: arg(0)? },
            "set-relation" => Self::SetRelation {
                target: arg(0)?,
                relation: arg(1)?,
                description: arg(2)?,
            },
            "add-relation-note" => Self::AddRelationNote {
                target: arg(0)?,
                note: arg(1)?,
            },
            "relations" => Self::Relations,
            "recall" => Self::Recall {
                filter: arg(0).unwrap_or_default(),
            },
            _ => return None,
        };
        Some(cmd)
    }

    /// World-affecting commands go through the judge; everything else is
    /// self-only.
    pub fn is_world_affecting(&self) -> bool {
        matches!(
            self,
            Self::Speak { .. } | Self::Interact { .. } | Self::Move { .. } | Self::Look { .. }
        )
    }

    /// Self-only commands that still write durable state. Pure reads and
    /// private thoughts do not count as acting.
    pub fn writes_state(&self) -> bool {
        matches!(
            self,
            Self::Memorize { .. }
                | Self::Note { .. }
                | Self::SetRelation { .. }
                | Self::AddRelationNote { .. }
        )
    }
}

/// Apply a self-only command for `actor` at the current clock. The clock is
/// not advanced; only the actor's own state and the log change.
pub fn apply_self_only(
    world: &mut World,
    log: &mut LogBook,
    config: &GameConfig,
    actor: &str,
    command: &ActionCommand,
    now: DateTime<Utc>,
) -> Result<(), StructureError> {
    let me = vec![actor.to_string()];
    match command {
        ActionCommand::Think { thought } => {
            log.record(now, LogKind::Player, actor, me, format!("thinks: {thought}"));
        }
        ActionCommand::Memorize { content } => {
            world.person_state_mut(actor)?.remember_long(now, content.clone());
            log.record(
                now,
                LogKind::Player,
                actor,
                me,
                format!("commits to memory: {content}"),
            );
        }
        ActionCommand::Note { content } => {
            world
                .person_state_mut(actor)?
                .remember_short(now, content.clone(), config.short_memory_cap);
            log.record(now, LogKind::Player, actor, me, format!("notes: {content}"));
        }
        ActionCommand::SetRelation {
            target,
            relation,
            description,
        } => {
            world
                .person_state_mut(actor)?
                .set_relation(target, relation, description);
            log.record(
                now,
                LogKind::Player,
                actor,
                me,
                format!("now sees {target} as {relation}"),
            );
        }
        ActionCommand::AddRelationNote { target, note } => {
            world.person_state_mut(actor)?.describe_relation(target, note);
            log.record(
                now,
                LogKind::Player,
                actor,
                me,
                format!("adds about {target}: {note}"),
            );
        }
        ActionCommand::Relations => {
            let state = world
                .person_state(actor)
                .ok_or_else(|| StructureError::UnknownObject(actor.to_string()))?;
            let listing = if state.relations.is_empty() {
                "no one in particular".to_string()
            } else {
                state
                    .relations
                    .iter()
                    .map(|r| format!("{} ({}): {}", r.target, r.relation, r.description))
                    .collect::<Vec<_>>()
                    .join("; ")
            };
            log.record(now, LogKind::System, actor, me, format!("relations: {listing}"));
        }
        ActionCommand::Recall { filter } => {
            let state = world
                .person_state(actor)
                .ok_or_else(|| StructureError::UnknownObject(actor.to_string()))?;
            let memories = state.recall(filter);
            let listing = if memories.is_empty() {
                "nothing comes to mind".to_string()
            } else {
                memories
                    .iter()
                    .map(|m| m.content.clone())
                    .collect::<Vec<_>>()
                    .join("; ")
            };
            log.record(now, LogKind::System, actor, me, format!("recalls: {listing}"));
        }
        other => {
            debug_assert!(other.is_world_affecting());
        }
    }
    Ok(())
}

/// Judge pass for a world-affecting action. On success the action commits
/// (logs, relocations, follow-up events); on any failure exactly one
/// rejection notification is scheduled back to the actor at the current
/// clock and nothing else changes.
pub fn judge(
    world: &mut World,
    log: &mut LogBook,
    queue: &mut crate::scheduler::EventQueue,
    config: &GameConfig,
    action: &PendingAction,
    now: DateTime<Utc>,
) {
    if let Err(reason) = judge_inner(world, log, queue, config, action, now) {
        queue.enqueue(Event {
            time: now,
            kind: EventKind::DelayedEffect(Effect::Notify {
                target: action.actor.clone(),
                message: format!("action rejected: {reason}"),
            }),
        });
    }
}

fn judge_inner(
    world: &mut World,
    log: &mut LogBook,
    queue: &mut crate::scheduler::EventQueue,
    config: &GameConfig,
    action: &PendingAction,
    now: DateTime<Utc>,
) -> Result<(), String> {
    let actor = action.actor.as_str();
    match &action.command {
        ActionCommand::Move { destination } => {
            let dest = world
                .resolve_environment(destination)
                .ok_or_else(|| format!("no such place: {destination}"))?;
            let actor_id = world
                .find_object(actor)
                .ok_or_else(|| format!("{actor} is nowhere to be found"))?
                .id();
            world.move_object(actor_id, dest).map_err(|e| e.to_string())?;
            // The root's path is empty; fall back to the spoken destination.
            let path = match world.path_of(dest) {
                Some(p) if !p.is_empty() => p,
                _ => destination.clone(),
            };
            log.record(
                now,
                LogKind::Event,
                actor,
                vec![actor.to_string()],
                format!("sets out for {path}"),
            );
            queue.enqueue(Event {
                time: now + Duration::seconds(config.travel_secs),
                kind: EventKind::DelayedEffect(Effect::Notify {
                    target: actor.to_string(),
                    message: format!("arrived at {path}"),
                }),
            });
            Ok(())
        }
        ActionCommand::Speak { target, message } => {
            let target_obj = local_object(world, actor, target)
                .ok_or_else(|| format!("{target} is not here"))?;
            if target_obj.as_person().is_none() {
                return Err(format!("{target} cannot be spoken to"));
            }
            log.record(
                now,
                LogKind::Player,
                actor,
                vec![actor.to_string(), target.clone()],
                format!("says to {target}: {message}"),
            );
            // Being spoken to wakes the target for a turn of their own.
            queue.enqueue(Event {
                time: now + Duration::seconds(config.speak_delay_secs),
                kind: EventKind::AgentTurn {
                    person: target.clone(),
                },
            });
            Ok(())
        }
        ActionCommand::Interact { target, action: deed } => {
            let target_obj = local_object(world, actor, target)
                .ok_or_else(|| format!("{target} is not here"))?;
            let mut targets = vec![actor.to_string()];
            if target_obj.as_person().is_some() {
                targets.push(target.clone());
            }
            log.record(
                now,
                LogKind::Event,
                actor,
                targets,
                format!("interacts with {target}: {deed}"),
            );
            Ok(())
        }
        ActionCommand::Look { target } => {
            let target_obj = local_object(world, actor, target)
                .ok_or_else(|| format!("{target} is not here"))?;
            let description = describe_object(target_obj);
            log.record(
                now,
                LogKind::System,
                actor,
                vec![actor.to_string()],
                format!("sees {target}: {description}"),
            );
            Ok(())
        }
        other => Err(format!("not a world-affecting action: {other:?}")),
    }
}

/// An object in the actor's current environment, excluding the actor.
fn local_object<'a>(world: &'a World, actor: &str, name: &str) -> Option<&'a GameObject> {
    if name == actor {
        return None;
    }
    let actor_id = world.find_object(actor)?.id();
    let env_id = world.environment_of(actor_id)?;
    world
        .environment(env_id)?
        .objects()
        .find(|o| o.name() == name)
}

fn describe_object(obj: &GameObject) -> String {
    match obj.payload() {
        ObjPayload::Furniture(attr) => {
            if attr.description.is_empty() {
                format!("a {}", attr.name)
            } else {
                attr.description.clone()
            }
        }
        ObjPayload::Person(state) => format!("{}, {}", state.name(), state.status.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::{FurnitureAttr, HouseAttr, PersonAttr, RoomAttr, SceneAttr};
    use crate::person::PersonState;
    use crate::scheduler::EventQueue;
    use crate::world::EnvPayload;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    struct Fixture {
        world: World,
        log: LogBook,
        queue: EventQueue,
        config: GameConfig,
    }

    fn fixture() -> Fixture {
        let mut world = World::new(
            SceneAttr {
                name: "Riverside".into(),
                description: String::new(),
            },
            t0(),
        );
        let root = world.root_id();
        let house = world
            .add_sub_env(
                root,
                EnvPayload::House(HouseAttr {
                    name: "Old House".into(),
                    ..Default::default()
                }),
            )
            .unwrap();
        let kitchen = world
            .add_sub_env(
                house,
                EnvPayload::Room(RoomAttr {
                    name: "kitchen".into(),
                    ..Default::default()
                }),
            )
            .unwrap();
        world
            .add_sub_env(
                house,
                EnvPayload::Room(RoomAttr {
                    name: "bedroom".into(),
                    ..Default::default()
                }),
            )
            .unwrap();
        world
            .add_static(
                kitchen,
                crate::world::ObjPayload::Furniture(FurnitureAttr {
                    name: "stove".into(),
                    description: "an old gas stove".into(),
                    ..Default::default()
                }),
            )
            .unwrap();
        for name in ["Ada", "Bob"] {
            world
                .add_dynamic(
                    kitchen,
                    crate::world::ObjPayload::Person(PersonState::new(
                        PersonAttr {
                            name: name.into(),
                            ..Default::default()
                        },
                        t0(),
                    )),
                )
                .unwrap();
        }
        Fixture {
            world,
            log: LogBook::new(),
            queue: EventQueue::new(),
            config: GameConfig::default(),
        }
    }

    fn pending(actor: &str, command: ActionCommand) -> PendingAction {
        PendingAction {
            actor: actor.to_string(),
            command,
        }
    }

    #[test]
    fn move_to_unknown_place_schedules_one_rejection_and_nothing_else() {
        let mut fx = fixture();
        let ada = fx.world.find_object("Ada").unwrap().id();
        let before = fx.world.environment_of(ada);

        judge(
            &mut fx.world,
            &mut fx.log,
            &mut fx.queue,
            &fx.config,
            &pending("Ada", ActionCommand::Move { destination: "attic".into() }),
            t0(),
        );

        assert_eq!(fx.world.environment_of(ada), before);
        assert_eq!(fx.queue.len(), 1);
        let event = fx.queue.pop_next().unwrap();
        assert_eq!(event.time, t0());
        match event.kind {
            EventKind::DelayedEffect(Effect::Notify { target, message }) => {
                assert_eq!(target, "Ada");
                assert!(message.contains("rejected"));
            }
            other => panic!("expected rejection notify, got {other:?}"),
        }
        assert!(fx.log.is_empty());
    }

    #[test]
    fn successful_move_relocates_and_schedules_arrival() {
        let mut fx = fixture();
        let ada = fx.world.find_object("Ada").unwrap().id();
        let bedroom = fx.world.resolve_environment("bedroom").unwrap();

        judge(
            &mut fx.world,
            &mut fx.log,
            &mut fx.queue,
            &fx.config,
            &pending("Ada", ActionCommand::Move { destination: "bedroom".into() }),
            t0(),
        );

        assert_eq!(fx.world.environment_of(ada), Some(bedroom));
        let event = fx.queue.pop_next().unwrap();
        assert_eq!(event.time, t0() + Duration::seconds(fx.config.travel_secs));
        match event.kind {
            EventKind::DelayedEffect(Effect::Notify { message, .. }) => {
                assert!(message.contains("Old House->bedroom"));
            }
            other => panic!("expected arrival notify, got {other:?}"),
        }
    }

    #[test]
    fn speak_logs_to_both_and_wakes_the_target() {
        let mut fx = fixture();
        judge(
            &mut fx.world,
            &mut fx.log,
            &mut fx.queue,
            &fx.config,
            &pending(
                "Ada",
                ActionCommand::Speak {
                    target: "Bob".into(),
                    message: "good morning".into(),
                },
            ),
            t0(),
        );

        let entry = &fx.log.entries()[0];
        assert_eq!(entry.kind, LogKind::Player);
        assert!(entry.targets.contains(&"Bob".to_string()));

        let event = fx.queue.pop_next().unwrap();
        assert_eq!(event.time, t0() + Duration::seconds(fx.config.speak_delay_secs));
        assert_eq!(
            event.kind,
            EventKind::AgentTurn { person: "Bob".into() }
        );
    }

    #[test]
    fn speak_to_absent_person_is_rejected() {
        let mut fx = fixture();
        let bedroom = fx.world.resolve_environment("bedroom").unwrap();
        let bob = fx.world.find_object("Bob").unwrap().id();
        fx.world.move_object(bob, bedroom).unwrap();

        judge(
            &mut fx.world,
            &mut fx.log,
            &mut fx.queue,
            &fx.config,
            &pending(
                "Ada",
                ActionCommand::Speak {
                    target: "Bob".into(),
                    message: "hello?".into(),
                },
            ),
            t0(),
        );

        assert!(fx.log.is_empty());
        assert_eq!(fx.queue.len(), 1);
        assert_eq!(fx.queue.pending_turns(), 0);
    }

    #[test]
    fn speak_to_furniture_is_rejected() {
        let mut fx = fixture();
        judge(
            &mut fx.world,
            &mut fx.log,
            &mut fx.queue,
            &fx.config,
            &pending(
                "Ada",
                ActionCommand::Speak {
                    target: "stove".into(),
                    message: "hello".into(),
                },
            ),
            t0(),
        );
        assert_eq!(fx.queue.len(), 1);
        assert!(fx.log.is_empty());
    }

    #[test]
    fn look_describes_a_local_object() {
        let mut fx = fixture();
        judge(
            &mut fx.world,
            &mut fx.log,
            &mut fx.queue,
            &fx.config,
            &pending("Ada", ActionCommand::Look { target: "stove".into() }),
            t0(),
        );
        assert!(fx.queue.is_empty());
        assert!(fx.log.entries()[0].message.contains("an old gas stove"));
    }

    #[test]
    fn self_only_actions_touch_only_the_actor() {
        let mut fx = fixture();
        apply_self_only(
            &mut fx.world,
            &mut fx.log,
            &fx.config,
            "Ada",
            &ActionCommand::Memorize {
                content: "the stove smokes".into(),
            },
            t0(),
        )
        .unwrap();

        assert_eq!(fx.world.person_state("Ada").unwrap().long_memory.len(), 1);
        assert!(fx.world.person_state("Bob").unwrap().long_memory.is_empty());
        assert_eq!(fx.world.clock(), t0());
        assert!(fx.queue.is_empty());
        assert_eq!(fx.log.len(), 1);
    }

    #[test]
    fn recall_logs_matching_memories() {
        let mut fx = fixture();
        fx.world
            .person_state_mut("Ada")
            .unwrap()
            .remember_long(t0(), "the river floods in spring");
        apply_self_only(
            &mut fx.world,
            &mut fx.log,
            &fx.config,
            "Ada",
            &ActionCommand::Recall { filter: "river".into() },
            t0(),
        )
        .unwrap();
        assert!(fx.log.entries()[0].message.contains("floods"));
    }

    #[test]
    fn from_invocation_covers_the_default_protocol() {
        let specs = crate::grammar::default_commands();
        let outcome = crate::grammar::parse_commands(
            &specs,
            "speak Bob hello there\nset-relation Bob friend we met today\nrecall",
        );
        assert!(outcome.failures.is_empty());
        let commands: Vec<ActionCommand> = outcome
            .invocations
            .iter()
            .filter_map(ActionCommand::from_invocation)
            .collect();
        assert_eq!(commands.len(), 3);
        assert!(matches!(commands[0], ActionCommand::Speak { .. }));
        assert!(commands[0].is_world_affecting());
        assert!(commands[1].writes_state());
        assert!(!commands[2].is_world_affecting() && !commands[2].writes_state());
    }
}
