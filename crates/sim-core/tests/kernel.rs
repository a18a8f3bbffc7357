//! End-to-end kernel run: a scripted household where speech wakes the
//! listener, movement re-homes the walker, and the whole thing settles
//! with an empty queue and a consistent snapshot.

use chrono::{DateTime, Duration, Utc};
use contracts::{ChatMessage, GameConfig, ModelCallFailure, Stage};

use sim_core::attrs::{FurnitureAttr, HouseAttr, PersonAttr, RoomAttr, SceneAttr};
use sim_core::game::Game;
use sim_core::person::PersonState;
use sim_core::turn::ModelClient;
use sim_core::world::{EnvPayload, ObjPayload, World};

fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
}

/// Answers each person from a fixed script, in call order per person.
struct Script {
    lines: Vec<(&'static str, &'static str)>,
}

impl ModelClient for Script {
    fn send(&mut self, messages: &[ChatMessage]) -> Result<String, ModelCallFailure> {
        // The reinforcement prompt names the person taking the turn.
        let who = messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let pos = self
            .lines
            .iter()
            .position(|(name, _)| who.contains(name))
            .ok_or_else(|| ModelCallFailure::unavailable("no scripted line"))?;
        let (_, reply) = self.lines.remove(pos);
        Ok(reply.to_string())
    }
}

fn build_world() -> World {
    let mut world = World::new(
        SceneAttr {
            name: "Riverside".into(),
            description: "a quiet river town".into(),
        },
        t0(),
    );
    let root = world.root_id();
    let house = world
        .add_sub_env(
            root,
            EnvPayload::House(HouseAttr {
                name: "Old House".into(),
                address: "1 River Lane".into(),
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
    let bedroom = world
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
            ObjPayload::Furniture(FurnitureAttr {
                name: "stove".into(),
                count: 1,
                description: "an old gas stove".into(),
                ..Default::default()
            }),
        )
        .unwrap();
    world
        .add_dynamic(
            kitchen,
            ObjPayload::Person(PersonState::new(
                PersonAttr {
                    name: "Ada".into(),
                    birth_date: "1990-03-14".into(),
                    occupation: "engineer".into(),
                    ..Default::default()
                },
                t0(),
            )),
        )
        .unwrap();
    world
        .add_dynamic(
            bedroom,
            ObjPayload::Person(PersonState::new(
                PersonAttr {
                    name: "Bob".into(),
                    birth_date: "1988-07-02".into(),
                    ..Default::default()
                },
                t0(),
            )),
        )
        .unwrap();
    world
}

#[test]
fn a_morning_in_the_old_house() {
    let mut game = Game::new(build_world(), GameConfig::default());
    game.seed_turns();

    let mut model = Script {
        lines: vec![
            // Ada walks to the bedroom and greets Bob once she is there.
            ("Ada", "move bedroom"),
            // Bob's seeded turn.
            ("Bob", "memorize a quiet start to the day"),
            // Bob's woken turn after Ada speaks to him.
            ("Bob", "speak Ada morning, you are up early"),
            // Ada's extra turn when Bob speaks back.
            ("Ada", "note Bob sounds sleepy"),
        ],
    };

    // Seeded turns only: Ada's move is judged, Bob memorizes.
    let config = game.config().clone();
    game.run_until(t0(), &mut model);

    let ada_id = game.world().find_object("Ada").unwrap().id();
    let bedroom = game.world().resolve_environment("bedroom").unwrap();
    assert_eq!(game.world().environment_of(ada_id), Some(bedroom));
    assert_eq!(game.world().person_state("Bob").unwrap().long_memory.len(), 1);

    // Ada speaks to Bob now that they share a room.
    game.schedule(sim_core::scheduler::Event {
        time: game.clock(),
        kind: sim_core::scheduler::EventKind::Judge(sim_core::scheduler::PendingAction {
            actor: "Ada".into(),
            command: sim_core::actions::ActionCommand::Speak {
                target: "Bob".into(),
                message: "up already?".into(),
            },
        }),
    });
    game.run_until_empty(&mut model);

    // Speech woke Bob, Bob's reply woke Ada, Ada noted it down.
    assert_eq!(game.world().person_state("Ada").unwrap().short_memory.len(), 1);
    assert_eq!(game.world().stage(), Stage::EffectsApplied);

    // Arrival notice landed after the travel delay.
    let arrival = game
        .log()
        .entries()
        .iter()
        .find(|e| e.message.contains("arrived at"))
        .expect("arrival notification");
    assert_eq!(arrival.time, t0() + Duration::seconds(config.travel_secs));

    // The settled world still snapshots and reloads cleanly.
    let node = game.snapshot().unwrap();
    let restored = Game::from_snapshot(&node, config).unwrap();
    assert_eq!(restored.snapshot().unwrap(), node);
}

#[test]
fn speech_between_rooms_is_rejected_with_a_notification() {
    let mut game = Game::new(build_world(), GameConfig::default());
    game.schedule(sim_core::scheduler::Event {
        time: t0(),
        kind: sim_core::scheduler::EventKind::Judge(sim_core::scheduler::PendingAction {
            actor: "Ada".into(),
            command: sim_core::actions::ActionCommand::Speak {
                target: "Bob".into(),
                message: "can you hear me?".into(),
            },
        }),
    });

    let mut model = Script { lines: vec![] };
    game.run_until_empty(&mut model);

    let rejection = game
        .log()
        .entries()
        .iter()
        .find(|e| e.message.contains("rejected"))
        .expect("rejection notification");
    assert!(rejection.targets.contains(&"Ada".to_string()));
    // No extra turn was granted to Bob.
    assert!(game.world().person_state("Bob").unwrap().long_memory.is_empty());
}
