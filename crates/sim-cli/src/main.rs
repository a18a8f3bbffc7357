use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use contracts::EnvNode;
use sim_api::model::HttpModelClient;
use sim_api::persistence::SqliteGameStore;
use sim_api::server::{serve, AppState, ModelSettings};
use sim_api::GameService;
use sim_core::attrs::{FurnitureAttr, HouseAttr, PersonAttr, RoomAttr, SceneAttr};
use sim_core::person::PersonState;
use sim_core::world::{EnvPayload, ObjPayload, World};

fn print_usage() {
    println!("sim-cli <command>");
    println!("commands:");
    println!("  new <db> [game_id]");
    println!("    creates a demo game and persists it");
    println!("  run <db> <game_id> <events> [model_url]");
    println!("    dispatches up to <events> events against the model endpoint");
    println!("  logs <db> <game_id> [limit]");
    println!("  serve <db> [addr]");
    println!("    default addr: 127.0.0.1:8080");
    println!("model endpoint defaults to {}, override with", ModelSettings::default().base_url);
    println!("SIM_MODEL_URL / SIM_MODEL or the [model_url] argument");
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn required<'a>(args: &'a [String], index: usize, label: &str) -> Result<&'a str, String> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| format!("missing {label}"))
}

fn parse_usize(value: Option<&String>, label: &str) -> Result<usize, String> {
    let raw = value.ok_or_else(|| format!("missing {label}"))?;
    raw.parse::<usize>()
        .map_err(|_| format!("invalid {label}: {raw}"))
}

fn parse_socket_addr(value: Option<&String>) -> Result<SocketAddr, String> {
    let raw = value.map(String::as_str).unwrap_or("127.0.0.1:8080");
    raw.parse::<SocketAddr>()
        .map_err(|_| format!("invalid addr: {raw}"))
}

fn model_settings(url_override: Option<&String>) -> ModelSettings {
    let mut settings = ModelSettings::default();
    if let Ok(url) = env::var("SIM_MODEL_URL") {
        if !url.trim().is_empty() {
            settings.base_url = url;
        }
    }
    if let Some(url) = url_override {
        settings.base_url = url.clone();
    }
    if let Ok(model) = env::var("SIM_MODEL") {
        if !model.trim().is_empty() {
            settings.model = model;
        }
    }
    settings
}

fn open_service(db: &str) -> Result<GameService, String> {
    let store = SqliteGameStore::open(db).map_err(|e| format!("failed to open {db}: {e}"))?;
    Ok(GameService::new(store))
}

/// Two people in a two-room house, enough to watch the kernel go around.
fn demo_world_node() -> Result<EnvNode, String> {
    let now = Utc::now();
    let mut world = World::new(
        SceneAttr {
            name: "Riverside".into(),
            description: "A quiet hamlet on the east bank.".into(),
        },
        now,
    );
    let root = world.root_id();
    let house = world
        .add_sub_env(
            root,
            EnvPayload::House(HouseAttr {
                name: "Old House".into(),
                address: "1 Mill Lane".into(),
                area: 120.0,
                layout: "two rooms off a short hallway".into(),
                facing: "south".into(),
                description: "A creaking timber house near the water.".into(),
            }),
        )
        .map_err(|e| e.to_string())?;
    let kitchen = world
        .add_sub_env(
            house,
            EnvPayload::Room(RoomAttr {
                house: "Old House".into(),
                name: "kitchen".into(),
                position: "ground floor, east".into(),
                description: "Smells of woodsmoke and bread.".into(),
            }),
        )
        .map_err(|e| e.to_string())?;
    let bedroom = world
        .add_sub_env(
            house,
            EnvPayload::Room(RoomAttr {
                house: "Old House".into(),
                name: "bedroom".into(),
                position: "ground floor, west".into(),
                description: "A narrow room with a low ceiling.".into(),
            }),
        )
        .map_err(|e| e.to_string())?;
    world
        .add_static(
            kitchen,
            ObjPayload::Furniture(FurnitureAttr {
                room: "kitchen".into(),
                name: "stove".into(),
                count: 1,
                placement: "against the north wall".into(),
                description: "an old gas stove".into(),
            }),
        )
        .map_err(|e| e.to_string())?;
    world
        .add_static(
            bedroom,
            ObjPayload::Furniture(FurnitureAttr {
                room: "bedroom".into(),
                name: "bed".into(),
                count: 1,
                placement: "under the window".into(),
                description: "a wooden bed with a patchwork quilt".into(),
            }),
        )
        .map_err(|e| e.to_string())?;
    world
        .add_dynamic(
            kitchen,
            ObjPayload::Person(PersonState::new(
                PersonAttr {
                    name: "Ada".into(),
                    sex: "female".into(),
                    birth_date: "1994-03-12".into(),
                    occupation: "carpenter".into(),
                    emotion: "calm".into(),
                    personality: vec!["practical".into(), "curious".into()],
                    short_memory_seeds: vec!["woke before dawn to light the stove".into()],
                    ..Default::default()
                },
                now,
            )),
        )
        .map_err(|e| e.to_string())?;
    world
        .add_dynamic(
            bedroom,
            ObjPayload::Person(PersonState::new(
                PersonAttr {
                    name: "Bob".into(),
                    sex: "male".into(),
                    birth_date: "1989-11-02".into(),
                    occupation: "ferryman".into(),
                    emotion: "drowsy".into(),
                    personality: vec!["easygoing".into()],
                    long_memory_seeds: vec!["the river froze solid two winters ago".into()],
                    ..Default::default()
                },
                now,
            )),
        )
        .map_err(|e| e.to_string())?;
    world.to_node().map_err(|e| e.to_string())
}

fn cmd_new(args: &[String]) -> Result<(), String> {
    let db = required(args, 2, "db path")?;
    let game_id = args
        .get(3)
        .cloned()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("game-{}", Utc::now().timestamp_millis()));

    let mut service = open_service(db)?;
    let node = demo_world_node()?;
    service
        .create_game(&game_id, &node)
        .map_err(|e| format!("failed to create game: {e}"))?;
    let status = service.status(&game_id).map_err(|e| e.to_string())?;
    println!(
        "created game_id={} pending_events={} db={}",
        game_id, status.pending_events, db
    );
    Ok(())
}

fn cmd_run(args: &[String]) -> Result<(), String> {
    let db = required(args, 2, "db path")?;
    let game_id = required(args, 3, "game_id")?;
    let events = parse_usize(args.get(4), "events")?;
    if events == 0 {
        return Err("events must be >= 1".to_string());
    }
    let settings = model_settings(args.get(5));

    let mut service = open_service(db)?;
    let mut client = HttpModelClient::new(
        &settings.base_url,
        &settings.model,
        settings.temperature,
        settings.timeout_secs,
    )
    .map_err(|e| format!("model client: {e}"))?;
    let dispatched = service
        .run_events(game_id, events, &mut client)
        .map_err(|e| format!("run failed: {e}"))?;
    let status = service.status(game_id).map_err(|e| e.to_string())?;
    println!(
        "dispatched={} stage={:?} pending_events={} clock={}",
        dispatched, status.stage, status.pending_events, status.clock
    );
    Ok(())
}

fn cmd_logs(args: &[String]) -> Result<(), String> {
    let db = required(args, 2, "db path")?;
    let game_id = required(args, 3, "game_id")?;
    let limit = args
        .get(4)
        .map(|v| parse_usize(Some(v), "limit"))
        .transpose()?
        .unwrap_or(50);

    let store = SqliteGameStore::open(db).map_err(|e| format!("failed to open {db}: {e}"))?;
    let entries = store
        .load_logs(game_id, None, limit, None)
        .map_err(|e| e.to_string())?;
    if entries.is_empty() {
        println!("no log entries for {game_id}");
        return Ok(());
    }
    for entry in &entries {
        println!(
            "#{} [{}] {} {}: {}",
            entry.id,
            entry.time.format("%Y-%m-%d %H:%M:%S"),
            entry.kind.as_str(),
            entry.source,
            entry.message
        );
    }
    Ok(())
}

// `run` talks to the model with a blocking client, so main stays
// synchronous; only `serve` spins up an async runtime.
fn cmd_serve(args: &[String]) -> Result<(), String> {
    let db = required(args, 2, "db path")?;
    let addr = parse_socket_addr(args.get(3))?;
    let service = open_service(db)?;
    let state = Arc::new(AppState::new(service, model_settings(None)));
    let runtime = tokio::runtime::Runtime::new().map_err(|e| format!("runtime: {e}"))?;
    println!("serving api on http://{addr}");
    runtime.block_on(serve(addr, state)).map_err(|e| e.to_string())
}

fn main() {
    init_tracing();
    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str);

    let outcome = match command {
        Some("new") => cmd_new(&args),
        Some("run") => cmd_run(&args),
        Some("logs") => cmd_logs(&args),
        Some("serve") => cmd_serve(&args),
        _ => {
            print_usage();
            return;
        }
    };

    if let Err(err) = outcome {
        eprintln!("error: {err}");
        print_usage();
        std::process::exit(2);
    }
}
