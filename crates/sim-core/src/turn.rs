//! Turn orchestrator. Captures an immutable context for a person, asks the
//! model for a reply through the narrow [`ModelClient`] seam, parses it
//! against the command grammar, and routes the resulting actions. A
//! malformed or empty reply gets one bounded corrective follow-up; a failed
//! retry is recorded as an unacted turn and the simulation moves on.

use chrono::{DateTime, Utc};
use contracts::{ChatMessage, GameConfig, LogKind, ModelCallFailure};

use crate::actions::{self, ActionCommand};
use crate::error::StructureError;
use crate::grammar::{self, CommandSpec};
use crate::logbook::LogBook;
use crate::scheduler::{Event, EventKind, EventQueue, PendingAction};
use crate::world::World;

/// The model boundary. Implementations live outside the kernel; tests use
/// scripted stand-ins.
pub trait ModelClient {
    fn send(&mut self, messages: &[ChatMessage]) -> Result<String, ModelCallFailure>;
}

/// Everything a person knows at the start of their turn, captured before
/// the model call so no world borrow is held across it.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnContext {
    pub person: String,
    pub time: DateTime<Utc>,
    pub location: String,
    pub identity: String,
    pub status: String,
    pub visible: Vec<String>,
    pub scenes: Vec<String>,
    pub relations: Vec<String>,
    pub recent_logs: Vec<String>,
}

impl TurnContext {
    pub fn capture(
        world: &World,
        log: &LogBook,
        config: &GameConfig,
        person: &str,
    ) -> Result<Self, StructureError> {
        let actor = world
            .find_object(person)
            .ok_or_else(|| StructureError::UnknownObject(person.to_string()))?;
        let state = actor
            .as_person()
            .ok_or_else(|| StructureError::NotAPerson(person.to_string()))?;
        let env_id = world
            .environment_of(actor.id())
            .ok_or_else(|| StructureError::UnknownObject(person.to_string()))?;
        let location = world
            .path_of(env_id)
            .ok_or_else(|| StructureError::UnknownEnvironment(person.to_string()))?;

        let mut visible = Vec::new();
        let mut relations = Vec::new();
        if let Some(env) = world.environment(env_id) {
            for obj in env.objects() {
                if obj.id() == actor.id() {
                    continue;
                }
                match obj.as_person() {
                    Some(other) => {
                        visible.push(format!("{} ({})", other.name(), other.status.as_str()));
                        if let Some(rel) = state.relation(other.name()) {
                            relations.push(format!(
                                "{} ({}): {}",
                                rel.target, rel.relation, rel.description
                            ));
                        }
                    }
                    None => visible.push(obj.name().to_string()),
                }
            }
        }

        // Chronological order reads naturally in the prompt; the log serves
        // windows newest first.
        let mut recent_logs: Vec<String> = log
            .recent(person, config.turn_log_window)
            .iter()
            .map(|e| format!("[{}] {}: {}", e.time.format("%Y-%m-%d %H:%M"), e.source, e.message))
            .collect();
        recent_logs.reverse();

        Ok(Self {
            person: person.to_string(),
            time: world.clock(),
            location,
            identity: state.attr.summary(),
            status: state.status.as_str().to_string(),
            visible,
            scenes: world.scene_paths(),
            relations,
            recent_logs,
        })
    }

    /// Three prompts: the rules of the protocol, the world as this person
    /// sees it, and a first-person role reinforcement.
    pub fn to_messages(&self, specs: &[CommandSpec]) -> Vec<ChatMessage> {
        let usage: Vec<String> = specs.iter().map(CommandSpec::usage).collect();
        let system = format!(
            "You control one person in a life simulation. Reply only with \
             commands, one per line, chosen from:\n{}\nEvery reply must \
             include at least one concrete action. Do not explain yourself \
             outside the commands.",
            usage.join("\n")
        );

        let mut data = format!(
            "time: {}\nwho you are:\n{}\nstatus: {}\nlocation: {}\n",
            self.time.format("%Y-%m-%d %H:%M"),
            self.identity,
            self.status,
            self.location,
        );
        if !self.visible.is_empty() {
            data.push_str(&format!("around you: {}\n", self.visible.join(", ")));
        }
        if !self.scenes.is_empty() {
            data.push_str(&format!("places you know:\n{}\n", self.scenes.join("\n")));
        }
        if !self.relations.is_empty() {
            data.push_str(&format!(
                "people here you know:\n{}\n",
                self.relations.join("\n")
            ));
        }
        if !self.recent_logs.is_empty() {
            data.push_str(&format!(
                "what happened recently:\n{}\n",
                self.recent_logs.join("\n")
            ));
        }

        let reinforcement = format!(
            "You are {}. Decide what you do right now, in first person, \
             using only the commands above.",
            self.person
        );

        vec![
            ChatMessage::system(system),
            ChatMessage::user(data),
            ChatMessage::user(reinforcement),
        ]
    }
}

/// An agent turn stopped at the model boundary. Carries the outbound
/// messages and the retry count; no world borrow is held while the call
/// is in flight.
#[derive(Debug, Clone)]
pub struct ModelCall {
    person: String,
    messages: Vec<ChatMessage>,
    attempt: u32,
}

impl ModelCall {
    pub fn person(&self) -> &str {
        &self.person
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }
}

/// What a resumed turn needs next.
#[derive(Debug)]
pub enum TurnStep {
    /// The turn is settled (acted, unacted, or skipped).
    Done,
    /// Send these messages and feed the reply to [`resume_turn`].
    NeedsModel(ModelCall),
}

/// Capture the context for `person` and stop at the model boundary.
/// The returned call borrows nothing, so the caller can drop every lock
/// on the game before sending it.
pub fn begin_turn(
    world: &World,
    log: &LogBook,
    config: &GameConfig,
    specs: &[CommandSpec],
    person: &str,
) -> Result<ModelCall, StructureError> {
    let context = TurnContext::capture(world, log, config, person)?;
    Ok(ModelCall {
        person: person.to_string(),
        messages: context.to_messages(specs),
        attempt: 1,
    })
}

/// Feed a model reply back into an in-flight turn. Returns `NeedsModel`
/// when the reply earns a corrective retry, `Done` once the turn is
/// settled.
pub fn resume_turn(
    world: &mut World,
    queue: &mut EventQueue,
    log: &mut LogBook,
    config: &GameConfig,
    specs: &[CommandSpec],
    mut call: ModelCall,
    reply: Result<String, ModelCallFailure>,
) -> Result<TurnStep, StructureError> {
    let person = call.person.clone();
    let reply = match reply {
        Ok(reply) => reply,
        Err(failure) => {
            tracing::warn!(
                person = %person,
                status = failure.status,
                "model call failed: {}",
                failure.message
            );
            if call.attempt <= config.max_turn_retries {
                call.attempt += 1;
                return Ok(TurnStep::NeedsModel(call));
            }
            log.record(
                world.clock(),
                LogKind::System,
                &person,
                vec![person.clone()],
                "lost in thought and did nothing".to_string(),
            );
            return Ok(TurnStep::Done);
        }
    };

    let outcome = grammar::parse_commands(specs, &reply);
    let commands: Vec<ActionCommand> = outcome
        .invocations
        .iter()
        .filter_map(ActionCommand::from_invocation)
        .collect();
    let meaningful = commands
        .iter()
        .any(|c| c.is_world_affecting() || c.writes_state());

    if outcome.failures.is_empty() && meaningful {
        route(world, queue, log, config, &person, &commands)?;
        return Ok(TurnStep::Done);
    }

    if call.attempt <= config.max_turn_retries {
        let mut complaint = String::new();
        for failure in &outcome.failures {
            complaint.push_str(&format!("- {}: {}\n", failure.kind.describe(), failure.line));
        }
        if !meaningful {
            complaint.push_str("- your reply must include at least one concrete action\n");
        }
        call.messages.push(ChatMessage::assistant(reply));
        call.messages.push(ChatMessage::user(format!(
            "Your reply could not be fully applied:\n{complaint}Answer again, \
             one command per line."
        )));
        call.attempt += 1;
        return Ok(TurnStep::NeedsModel(call));
    }

    // Out of retries: act on whatever parsed if any of it acts, otherwise
    // record the turn as unacted.
    if meaningful {
        route(world, queue, log, config, &person, &commands)?;
    } else {
        log.record(
            world.clock(),
            LogKind::System,
            &person,
            vec![person.clone()],
            format!("made no usable move: {}", reply.trim()),
        );
    }
    Ok(TurnStep::Done)
}

/// Run one agent turn end to end with the client in hand. Single-owner
/// convenience over [`begin_turn`]/[`resume_turn`]; callers that must not
/// hold a lock across the model call drive the split form themselves.
pub fn execute_turn(
    world: &mut World,
    queue: &mut EventQueue,
    log: &mut LogBook,
    config: &GameConfig,
    specs: &[CommandSpec],
    model: &mut dyn ModelClient,
    person: &str,
) -> Result<(), StructureError> {
    let mut call = begin_turn(world, log, config, specs, person)?;
    loop {
        let reply = model.send(call.messages());
        match resume_turn(world, queue, log, config, specs, call, reply)? {
            TurnStep::Done => return Ok(()),
            TurnStep::NeedsModel(next) => call = next,
        }
    }
}

/// Route parsed commands in reply order: self-only ones apply immediately,
/// world-affecting ones become judge events at the current clock. Insertion
/// order keeps same-time judges in reply order.
fn route(
    world: &mut World,
    queue: &mut EventQueue,
    log: &mut LogBook,
    config: &GameConfig,
    actor: &str,
    commands: &[ActionCommand],
) -> Result<(), StructureError> {
    let now = world.clock();
    for command in commands {
        if command.is_world_affecting() {
            queue.enqueue(Event {
                time: now,
                kind: EventKind::Judge(PendingAction {
                    actor: actor.to_string(),
                    command: command.clone(),
                }),
            });
        } else {
            actions::apply_self_only(world, log, config, actor, command, now)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::{PersonAttr, RoomAttr, SceneAttr};
    use crate::person::PersonState;
    use crate::world::{EnvPayload, ObjPayload};

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    struct Scripted {
        replies: Vec<Result<String, ModelCallFailure>>,
        calls: usize,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, ModelCallFailure>>) -> Self {
            Self { replies, calls: 0 }
        }
    }

    impl ModelClient for Scripted {
        fn send(&mut self, _messages: &[ChatMessage]) -> Result<String, ModelCallFailure> {
            self.calls += 1;
            if self.replies.is_empty() {
                return Err(ModelCallFailure::unavailable("script exhausted"));
            }
            self.replies.remove(0)
        }
    }

    struct Fixture {
        world: World,
        queue: EventQueue,
        log: LogBook,
        config: GameConfig,
        specs: Vec<CommandSpec>,
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
        let parlor = world
            .add_sub_env(
                root,
                EnvPayload::Room(RoomAttr {
                    name: "parlor".into(),
                    ..Default::default()
                }),
            )
            .unwrap();
        for name in ["Ada", "Bob"] {
            world
                .add_dynamic(
                    parlor,
                    ObjPayload::Person(PersonState::new(
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
            queue: EventQueue::new(),
            log: LogBook::new(),
            config: GameConfig::default(),
            specs: grammar::default_commands(),
        }
    }

    fn run(fx: &mut Fixture, model: &mut Scripted) {
        execute_turn(
            &mut fx.world,
            &mut fx.queue,
            &mut fx.log,
            &fx.config,
            &fx.specs,
            model,
            "Ada",
        )
        .unwrap();
    }

    #[test]
    fn clean_reply_routes_in_order() {
        let mut fx = fixture();
        let mut model = Scripted::new(vec![Ok(
            "memorize Bob seems cheerful\nspeak Bob good morning".to_string()
        )]);
        run(&mut fx, &mut model);

        assert_eq!(model.calls, 1);
        assert_eq!(fx.world.person_state("Ada").unwrap().long_memory.len(), 1);
        let event = fx.queue.pop_next().unwrap();
        assert!(matches!(event.kind, EventKind::Judge(_)));
        assert_eq!(event.time, t0());
    }

    #[test]
    fn malformed_reply_gets_one_corrective_retry() {
        let mut fx = fixture();
        let mut model = Scripted::new(vec![
            Ok("dance wildly".to_string()),
            Ok("note odd request\nlook Bob".to_string()),
        ]);
        run(&mut fx, &mut model);

        assert_eq!(model.calls, 2);
        assert_eq!(fx.world.person_state("Ada").unwrap().short_memory.len(), 1);
        assert_eq!(fx.queue.len(), 1);
    }

    #[test]
    fn exhausted_retries_record_an_unacted_turn() {
        let mut fx = fixture();
        let mut model = Scripted::new(vec![
            Ok("hello!".to_string()),
            Ok("still chatting".to_string()),
        ]);
        run(&mut fx, &mut model);

        assert_eq!(model.calls, 2);
        assert!(fx.queue.is_empty());
        let last = fx.log.entries().last().unwrap();
        assert!(last.message.contains("no usable move"));
    }

    #[test]
    fn pure_reads_do_not_count_as_acting() {
        let mut fx = fixture();
        let mut model = Scripted::new(vec![
            Ok("think quiet day\nrelations".to_string()),
            Ok("move parlor".to_string()),
        ]);
        run(&mut fx, &mut model);
        // First reply parsed cleanly but contained no meaningful action.
        assert_eq!(model.calls, 2);
        assert_eq!(fx.queue.len(), 1);
    }

    #[test]
    fn model_failure_takes_the_retry_path() {
        let mut fx = fixture();
        let mut model = Scripted::new(vec![
            Err(ModelCallFailure::timeout("deadline")),
            Ok("speak Bob sorry, I drifted off".to_string()),
        ]);
        run(&mut fx, &mut model);
        assert_eq!(model.calls, 2);
        assert_eq!(fx.queue.len(), 1);
    }

    #[test]
    fn model_failure_with_no_retries_left_logs_the_turn() {
        let mut fx = fixture();
        let mut model = Scripted::new(vec![
            Err(ModelCallFailure::unavailable("down")),
            Err(ModelCallFailure::unavailable("down")),
        ]);
        run(&mut fx, &mut model);
        assert_eq!(model.calls, 2);
        let last = fx.log.entries().last().unwrap();
        assert!(last.message.contains("did nothing"));
    }

    #[test]
    fn context_capture_sees_neighbors_and_paths() {
        let fx = fixture();
        let ctx = TurnContext::capture(&fx.world, &fx.log, &fx.config, "Ada").unwrap();
        assert_eq!(ctx.location, "parlor");
        assert_eq!(ctx.visible, vec!["Bob (idle)"]);
        assert_eq!(ctx.scenes, vec!["parlor"]);

        let messages = ctx.to_messages(&fx.specs);
        assert_eq!(messages.len(), 3);
        assert!(messages[0].content.contains("`speak <target> <message>`"));
        assert!(messages[1].content.contains("location: parlor"));
    }

    #[test]
    fn unknown_person_is_a_structural_error() {
        let mut fx = fixture();
        let mut model = Scripted::new(vec![]);
        let err = execute_turn(
            &mut fx.world,
            &mut fx.queue,
            &mut fx.log,
            &fx.config,
            &fx.specs,
            &mut model,
            "Nobody",
        )
        .unwrap_err();
        assert!(matches!(err, StructureError::UnknownObject(_)));
        assert_eq!(model.calls, 0);
    }
}
