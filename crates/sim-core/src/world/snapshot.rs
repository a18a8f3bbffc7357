//! Serialization boundary between the world tree and the wire form
//! (`EnvNode`/`ObjNode`). Loading re-validates every attribute bag and
//! reports failures as [`SchemaError`] with the path of the offending node.

use chrono::{DateTime, Utc};
use contracts::{EnvNode, MemoryNode, ObjNode, RelationNode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::attrs::{FurnitureAttr, HouseAttr, PersonAttr, RoomAttr, SceneAttr};
use crate::error::{PathSeg, SchemaError};
use crate::person::{Memory, PersonState, PersonStatus};

use super::{EntityId, EnvPayload, Environment, GameObject, ObjPayload, World};

pub const TAG_SCENE: &str = "GameScene";
pub const TAG_HOUSE: &str = "House";
pub const TAG_ROOM: &str = "Room";
pub const TAG_PERSON: &str = "Person";
pub const TAG_FURNITURE: &str = "Furniture";

impl World {
    /// Serialize the whole tree. The root node carries the clock (epoch
    /// millis) and the lifecycle stage.
    pub fn to_node(&self) -> Result<EnvNode, SchemaError> {
        let mut path = Vec::new();
        let mut node = env_to_node(&self.root, &mut path)?;
        node.time = Some(self.clock.timestamp_millis());
        node.stage = Some(self.stage);
        Ok(node)
    }

    /// Rebuild a world from its wire form, assigning fresh entity ids.
    /// In-memory state is only produced if the whole node validates.
    pub fn from_node(node: &EnvNode) -> Result<World, SchemaError> {
        let mut path = Vec::new();
        if node.type_tag != TAG_SCENE {
            return Err(err_at(
                &mut path,
                PathSeg::Key("type".into()),
                format!("root must be {TAG_SCENE}, got {:?}", node.type_tag),
            ));
        }
        let scene: SceneAttr = parse_attr(&node.attr, &mut path)?;
        let clock = match node.time {
            Some(millis) => parse_millis(millis, &mut path, "time")?,
            None => {
                return Err(err_at(
                    &mut path,
                    PathSeg::Key("time".into()),
                    "root node must carry a clock",
                ))
            }
        };
        let mut world = World::new(scene, clock);
        world.stage = node.stage.unwrap_or_default();
        let root_id = world.root_id();
        load_children(&mut world, root_id, node, clock, &mut path)?;
        Ok(world)
    }
}

fn env_to_node(env: &Environment, path: &mut Vec<PathSeg>) -> Result<EnvNode, SchemaError> {
    let (type_tag, attr) = match env.payload() {
        EnvPayload::Scene(a) => (TAG_SCENE, attr_value(a, path)?),
        EnvPayload::House(a) => (TAG_HOUSE, attr_value(a, path)?),
        EnvPayload::Room(a) => (TAG_ROOM, attr_value(a, path)?),
    };
    let mut objs = Vec::with_capacity(env.statics().len());
    for (i, obj) in env.statics().iter().enumerate() {
        path.push(PathSeg::Key("objs".into()));
        path.push(PathSeg::Index(i));
        objs.push(obj_to_node(obj, path)?);
        path.pop();
        path.pop();
    }
    let mut objd = Vec::with_capacity(env.dynamics().len());
    for (i, obj) in env.dynamics().iter().enumerate() {
        path.push(PathSeg::Key("objd".into()));
        path.push(PathSeg::Index(i));
        objd.push(obj_to_node(obj, path)?);
        path.pop();
        path.pop();
    }
    let mut senv = Vec::with_capacity(env.sub_envs().len());
    for (i, sub) in env.sub_envs().iter().enumerate() {
        path.push(PathSeg::Key("senv".into()));
        path.push(PathSeg::Index(i));
        senv.push(env_to_node(sub, path)?);
        path.pop();
        path.pop();
    }
    Ok(EnvNode {
        type_tag: type_tag.to_string(),
        attr,
        objs,
        objd,
        senv,
        time: None,
        stage: None,
    })
}

fn obj_to_node(obj: &GameObject, path: &mut Vec<PathSeg>) -> Result<ObjNode, SchemaError> {
    match obj.payload() {
        ObjPayload::Furniture(attr) => Ok(ObjNode {
            type_tag: TAG_FURNITURE.to_string(),
            attr: attr_value(attr, path)?,
            status: None,
            ltm: None,
            stm: None,
            pr: None,
        }),
        ObjPayload::Person(state) => Ok(ObjNode {
            type_tag: TAG_PERSON.to_string(),
            attr: attr_value(&state.attr, path)?,
            status: Some(state.status.as_str().to_string()),
            ltm: Some(state.long_memory.iter().map(memory_to_node).collect()),
            stm: Some(state.short_memory.iter().map(memory_to_node).collect()),
            pr: Some(
                state
                    .relations
                    .iter()
                    .map(|rel| RelationNode {
                        t: rel.target.clone(),
                        r: rel.relation.clone(),
                        d: rel.description.clone(),
                    })
                    .collect(),
            ),
        }),
    }
}

fn memory_to_node(memory: &Memory) -> MemoryNode {
    MemoryNode {
        t: memory.time.timestamp_millis(),
        c: memory.content.clone(),
    }
}

fn load_children(
    world: &mut World,
    env_id: EntityId,
    node: &EnvNode,
    now: DateTime<Utc>,
    path: &mut Vec<PathSeg>,
) -> Result<(), SchemaError> {
    for (i, obj) in node.objs.iter().enumerate() {
        path.push(PathSeg::Key("objs".into()));
        path.push(PathSeg::Index(i));
        let payload = parse_object(obj, now, path)?;
        world
            .add_static(env_id, payload)
            .map_err(|e| SchemaError::new(path.clone(), e.to_string()))?;
        path.pop();
        path.pop();
    }
    for (i, obj) in node.objd.iter().enumerate() {
        path.push(PathSeg::Key("objd".into()));
        path.push(PathSeg::Index(i));
        let payload = parse_object(obj, now, path)?;
        world
            .add_dynamic(env_id, payload)
            .map_err(|e| SchemaError::new(path.clone(), e.to_string()))?;
        path.pop();
        path.pop();
    }
    for (i, sub) in node.senv.iter().enumerate() {
        path.push(PathSeg::Key("senv".into()));
        path.push(PathSeg::Index(i));
        let payload = match sub.type_tag.as_str() {
            TAG_HOUSE => EnvPayload::House(parse_attr::<HouseAttr>(&sub.attr, path)?),
            TAG_ROOM => EnvPayload::Room(parse_attr::<RoomAttr>(&sub.attr, path)?),
            other => {
                return Err(err_at(
                    path,
                    PathSeg::Key("type".into()),
                    format!("unknown environment type: {other:?}"),
                ))
            }
        };
        let sub_id = world
            .add_sub_env(env_id, payload)
            .map_err(|e| SchemaError::new(path.clone(), e.to_string()))?;
        load_children(world, sub_id, sub, now, path)?;
        path.pop();
        path.pop();
    }
    Ok(())
}

fn parse_object(
    node: &ObjNode,
    now: DateTime<Utc>,
    path: &mut Vec<PathSeg>,
) -> Result<ObjPayload, SchemaError> {
    match node.type_tag.as_str() {
        TAG_FURNITURE => Ok(ObjPayload::Furniture(parse_attr::<FurnitureAttr>(
            &node.attr, path,
        )?)),
        TAG_PERSON => {
            let attr: PersonAttr = parse_attr(&node.attr, path)?;
            if let Err(msg) = attr.validate() {
                return Err(err_at(path, PathSeg::Key("attr".into()), msg));
            }
            let mut state = PersonState::from_attr(attr);
            if let Some(raw) = &node.status {
                state.status = PersonStatus::parse(raw);
            }
            // A node without live memory blocks is a fresh person; their
            // attribute seeds become memories stamped with the load clock.
            match &node.ltm {
                Some(ltm) => state.long_memory = parse_memories(ltm, path, "ltm")?,
                None => {
                    for content in state.attr.long_memory_seeds.clone() {
                        state.long_memory.push(Memory { time: now, content });
                    }
                }
            }
            match &node.stm {
                Some(stm) => state.short_memory = parse_memories(stm, path, "stm")?,
                None => {
                    for content in state.attr.short_memory_seeds.clone() {
                        state.short_memory.push(Memory { time: now, content });
                    }
                }
            }
            if let Some(pr) = &node.pr {
                state.relations = pr
                    .iter()
                    .map(|rel| crate::person::PersonRelation {
                        target: rel.t.clone(),
                        relation: rel.r.clone(),
                        description: rel.d.clone(),
                    })
                    .collect();
            }
            Ok(ObjPayload::Person(state))
        }
        other => Err(err_at(
            path,
            PathSeg::Key("type".into()),
            format!("unknown object type: {other:?}"),
        )),
    }
}

fn parse_memories(
    nodes: &[MemoryNode],
    path: &mut Vec<PathSeg>,
    key: &str,
) -> Result<Vec<Memory>, SchemaError> {
    let mut memories = Vec::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        path.push(PathSeg::Key(key.to_string()));
        path.push(PathSeg::Index(i));
        let time = parse_millis(node.t, path, "t")?;
        memories.push(Memory {
            time,
            content: node.c.clone(),
        });
        path.pop();
        path.pop();
    }
    Ok(memories)
}

fn parse_millis(
    millis: i64,
    path: &mut Vec<PathSeg>,
    key: &str,
) -> Result<DateTime<Utc>, SchemaError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        err_at(
            path,
            PathSeg::Key(key.to_string()),
            format!("timestamp out of range: {millis}"),
        )
    })
}

fn attr_value<T: Serialize>(attr: &T, path: &mut Vec<PathSeg>) -> Result<Value, SchemaError> {
    path.push(PathSeg::Key("attr".into()));
    let value = serde_json::to_value(attr).map_err(|e| SchemaError::new(path.clone(), e.to_string()));
    path.pop();
    value
}

fn parse_attr<T: DeserializeOwned>(attr: &Value, path: &mut Vec<PathSeg>) -> Result<T, SchemaError> {
    path.push(PathSeg::Key("attr".into()));
    let parsed = serde_json::from_value(attr.clone()).map_err(|e| SchemaError::new(path.clone(), e.to_string()));
    path.pop();
    parsed
}

fn err_at(path: &mut Vec<PathSeg>, tail: PathSeg, message: impl Into<String>) -> SchemaError {
    let mut full = path.clone();
    full.push(tail);
    SchemaError::new(full, message)
}
