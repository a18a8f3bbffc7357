//! World entity tree: a single root scene owning houses, rooms, objects,
//! and person agents. The tree is the one source of truth; derived lookups
//! (locations, environment paths, the flattened environment list) are cached
//! and invalidated by a world-level generation counter bumped on every
//! structural mutation.
//!
//! Traversal orders are fixed: object searches are depth-first pre-order
//! (statics before dynamics, then sub-environments in insertion order);
//! the flattened environment list is breadth-first over the descendants,
//! root excluded.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use contracts::Stage;

use crate::attrs::{FurnitureAttr, HouseAttr, RoomAttr, SceneAttr};
use crate::error::StructureError;
use crate::person::PersonState;

mod snapshot;

/// Separator for environment paths rendered below the root, e.g.
/// `Old House->kitchen`. The root itself has an empty path.
pub const PATH_SEPARATOR: &str = "->";

/// Stable handle for an entity, assigned when it is attached to the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum EnvPayload {
    Scene(SceneAttr),
    House(HouseAttr),
    Room(RoomAttr),
}

impl EnvPayload {
    pub fn name(&self) -> &str {
        match self {
            Self::Scene(a) => &a.name,
            Self::House(a) => &a.name,
            Self::Room(a) => &a.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjPayload {
    Person(PersonState),
    Furniture(FurnitureAttr),
}

impl ObjPayload {
    pub fn name(&self) -> &str {
        match self {
            Self::Person(state) => state.name(),
            Self::Furniture(attr) => &attr.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameObject {
    id: EntityId,
    payload: ObjPayload,
}

impl GameObject {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.payload.name()
    }

    pub fn payload(&self) -> &ObjPayload {
        &self.payload
    }

    pub fn as_person(&self) -> Option<&PersonState> {
        match &self.payload {
            ObjPayload::Person(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_person_mut(&mut self) -> Option<&mut PersonState> {
        match &mut self.payload {
            ObjPayload::Person(state) => Some(state),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Environment {
    id: EntityId,
    payload: EnvPayload,
    obj_static: Vec<GameObject>,
    obj_dynamic: Vec<GameObject>,
    sub_envs: Vec<Environment>,
}

impl Environment {
    fn new(id: EntityId, payload: EnvPayload) -> Self {
        Self {
            id,
            payload,
            obj_static: Vec::new(),
            obj_dynamic: Vec::new(),
            sub_envs: Vec::new(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.payload.name()
    }

    pub fn payload(&self) -> &EnvPayload {
        &self.payload
    }

    pub fn statics(&self) -> &[GameObject] {
        &self.obj_static
    }

    pub fn dynamics(&self) -> &[GameObject] {
        &self.obj_dynamic
    }

    pub fn sub_envs(&self) -> &[Environment] {
        &self.sub_envs
    }

    /// Local objects, statics before dynamics.
    pub fn objects(&self) -> impl Iterator<Item = &GameObject> {
        self.obj_static.iter().chain(self.obj_dynamic.iter())
    }

    pub fn contains_object(&self, id: EntityId) -> bool {
        self.objects().any(|o| o.id == id)
    }

    fn env_by_id(&self, id: EntityId) -> Option<&Environment> {
        if self.id == id {
            return Some(self);
        }
        self.sub_envs.iter().find_map(|sub| sub.env_by_id(id))
    }

    fn env_by_id_mut(&mut self, id: EntityId) -> Option<&mut Environment> {
        if self.id == id {
            return Some(self);
        }
        self.sub_envs.iter_mut().find_map(|sub| sub.env_by_id_mut(id))
    }

    fn object_by_id(&self, id: EntityId) -> Option<&GameObject> {
        for obj in self.objects() {
            if obj.id == id {
                return Some(obj);
            }
        }
        self.sub_envs.iter().find_map(|sub| sub.object_by_id(id))
    }

    #[allow(dead_code)]
    fn object_by_name(&self, name: &str) -> Option<&GameObject> {
        for obj in self.objects() {
            if obj.name() == name {
                return Some(obj);
            }
        }
        self.sub_envs.iter().find_map(|sub| sub.object_by_name(name))
    }

    fn object_by_name_mut(&mut self, name: &str) -> Option<&mut GameObject> {
        for obj in self.obj_static.iter_mut().chain(self.obj_dynamic.iter_mut()) {
            if obj.name() == name {
                return Some(obj);
            }
        }
        for sub in &mut self.sub_envs {
            if let Some(found) = sub.object_by_name_mut(name) {
                return Some(found);
            }
        }
        None
    }

    fn detach_object(&mut self, id: EntityId) -> Option<GameObject> {
        if let Some(pos) = self.obj_static.iter().position(|o| o.id == id) {
            return Some(self.obj_static.remove(pos));
        }
        if let Some(pos) = self.obj_dynamic.iter().position(|o| o.id == id) {
            return Some(self.obj_dynamic.remove(pos));
        }
        self.sub_envs.iter_mut().find_map(|sub| sub.detach_object(id))
    }

    fn collect_objects<'a>(&'a self, f: &mut impl FnMut(&'a GameObject)) {
        for obj in self.objects() {
            f(obj);
        }
        for sub in &self.sub_envs {
            sub.collect_objects(f);
        }
    }
}

#[derive(Debug, Clone, Default)]
struct WorldCaches {
    generation: u64,
    primed: bool,
    /// Object id to containing environment id, for every attached object.
    object_env: BTreeMap<EntityId, EntityId>,
    /// Breadth-first descendant environment order, root excluded.
    env_order: Vec<EntityId>,
    env_paths: BTreeMap<EntityId, String>,
    /// Plain environment name to id; first breadth-first match wins.
    env_by_name: BTreeMap<String, EntityId>,
    env_by_path: BTreeMap<String, EntityId>,
}

#[derive(Debug, Clone)]
pub struct World {
    root: Environment,
    clock: DateTime<Utc>,
    stage: Stage,
    next_id: u64,
    generation: u64,
    caches: RefCell<WorldCaches>,
}

impl World {
    pub fn new(scene: SceneAttr, clock: DateTime<Utc>) -> Self {
        Self {
            root: Environment::new(EntityId(1), EnvPayload::Scene(scene)),
            clock,
            stage: Stage::NotStarted,
            next_id: 2,
            generation: 0,
            caches: RefCell::new(WorldCaches::default()),
        }
    }

    pub fn clock(&self) -> DateTime<Utc> {
        self.clock
    }

    /// The clock only moves forward; earlier timestamps are ignored.
    pub fn advance_clock(&mut self, to: DateTime<Utc>) {
        if to > self.clock {
            self.clock = to;
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
    }

    pub fn root(&self) -> &Environment {
        &self.root
    }

    pub fn root_id(&self) -> EntityId {
        self.root.id
    }

    fn alloc_id(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn add_sub_env(
        &mut self,
        parent: EntityId,
        payload: EnvPayload,
    ) -> Result<EntityId, StructureError> {
        let id = self.alloc_id();
        let parent_env = self
            .root
            .env_by_id_mut(parent)
            .ok_or_else(|| StructureError::UnknownEnvironment(format!("#{}", parent.0)))?;
        parent_env.sub_envs.push(Environment::new(id, payload));
        self.generation += 1;
        Ok(id)
    }

    pub fn add_static(
        &mut self,
        env: EntityId,
        payload: ObjPayload,
    ) -> Result<EntityId, StructureError> {
        self.attach_object(env, payload, false)
    }

    pub fn add_dynamic(
        &mut self,
        env: EntityId,
        payload: ObjPayload,
    ) -> Result<EntityId, StructureError> {
        self.attach_object(env, payload, true)
    }

    fn attach_object(
        &mut self,
        env: EntityId,
        payload: ObjPayload,
        dynamic: bool,
    ) -> Result<EntityId, StructureError> {
        // Person names are identities; a second person with the same name
        // would make every name-addressed command ambiguous.
        if let ObjPayload::Person(state) = &payload {
            let name = state.name();
            if self.find_object(name).is_some_and(|o| o.as_person().is_some()) {
                return Err(StructureError::DuplicatePlacement(name.to_string()));
            }
        }
        let id = self.alloc_id();
        let target = self
            .root
            .env_by_id_mut(env)
            .ok_or_else(|| StructureError::UnknownEnvironment(format!("#{}", env.0)))?;
        let list = if dynamic {
            &mut target.obj_dynamic
        } else {
            &mut target.obj_static
        };
        list.push(GameObject { id, payload });
        self.generation += 1;
        Ok(id)
    }

    /// Detach an object and re-home it into the destination's dynamic list.
    /// Nothing is mutated on any failure path.
    pub fn move_object(&mut self, object: EntityId, dest: EntityId) -> Result<(), StructureError> {
        {
            let dest_env = self
                .root
                .env_by_id(dest)
                .ok_or_else(|| StructureError::UnknownEnvironment(format!("#{}", dest.0)))?;
            if dest_env.contains_object(object) {
                return Err(StructureError::DuplicatePlacement(format!("#{}", object.0)));
            }
            if self.root.object_by_id(object).is_none() {
                return Err(StructureError::UnknownObject(format!("#{}", object.0)));
            }
        }
        let obj = match self.root.detach_object(object) {
            Some(obj) => obj,
            None => return Err(StructureError::UnknownObject(format!("#{}", object.0))),
        };
        self.generation += 1;
        match self.root.env_by_id_mut(dest) {
            Some(env) => {
                env.obj_dynamic.push(obj);
                Ok(())
            }
            // Existence was checked above; the tree cannot have changed since.
            None => Err(StructureError::UnknownEnvironment(format!("#{}", dest.0))),
        }
    }

    /// First object satisfying the predicate in depth-first pre-order.
    pub fn find_object_by(&self, pred: impl Fn(&GameObject) -> bool) -> Option<&GameObject> {
        let mut found = None;
        self.root.collect_objects(&mut |obj| {
            if found.is_none() && pred(obj) {
                found = Some(obj);
            }
        });
        found
    }

    /// All objects satisfying the predicate, depth-first pre-order.
    pub fn find_objects_by(&self, pred: impl Fn(&GameObject) -> bool) -> Vec<&GameObject> {
        let mut found = Vec::new();
        self.root.collect_objects(&mut |obj| {
            if pred(obj) {
                found.push(obj);
            }
        });
        found
    }

    /// First object with the given name in depth-first pre-order.
    pub fn find_object(&self, name: &str) -> Option<&GameObject> {
        self.find_object_by(|obj| obj.name() == name)
    }

    /// All objects with the given name, depth-first pre-order.
    pub fn find_objects(&self, name: &str) -> Vec<&GameObject> {
        self.find_objects_by(|obj| obj.name() == name)
    }

    pub fn object_by_id(&self, id: EntityId) -> Option<&GameObject> {
        self.root.object_by_id(id)
    }

    pub fn environment(&self, id: EntityId) -> Option<&Environment> {
        self.root.env_by_id(id)
    }

    /// Environment currently containing the object.
    pub fn environment_of(&self, object: EntityId) -> Option<EntityId> {
        self.ensure_caches();
        self.caches.borrow().object_env.get(&object).copied()
    }

    /// Resolve an environment by its path below the root first, then by
    /// plain name.
    pub fn resolve_environment(&self, name: &str) -> Option<EntityId> {
        self.ensure_caches();
        let caches = self.caches.borrow();
        caches
            .env_by_path
            .get(name)
            .or_else(|| caches.env_by_name.get(name))
            .copied()
    }

    /// Every descendant environment id in breadth-first order. The root is
    /// not in the list.
    pub fn all_environments(&self) -> Vec<EntityId> {
        self.ensure_caches();
        self.caches.borrow().env_order.clone()
    }

    /// Path below the root, segments joined with [`PATH_SEPARATOR`]. The
    /// root's own path is empty.
    pub fn path_of(&self, env: EntityId) -> Option<String> {
        self.ensure_caches();
        self.caches.borrow().env_paths.get(&env).cloned()
    }

    /// All descendant environment paths in breadth-first order.
    pub fn scene_paths(&self) -> Vec<String> {
        self.ensure_caches();
        let caches = self.caches.borrow();
        caches
            .env_order
            .iter()
            .filter_map(|id| caches.env_paths.get(id).cloned())
            .collect()
    }

    pub fn person_state(&self, name: &str) -> Option<&PersonState> {
        self.find_object(name).and_then(GameObject::as_person)
    }

    pub fn person_state_mut(&mut self, name: &str) -> Result<&mut PersonState, StructureError> {
        match self.root.object_by_name_mut(name) {
            Some(obj) => obj
                .as_person_mut()
                .ok_or_else(|| StructureError::NotAPerson(name.to_string())),
            None => Err(StructureError::UnknownObject(name.to_string())),
        }
    }

    /// Names of every person, depth-first pre-order.
    pub fn person_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.root.collect_objects(&mut |obj| {
            if let Some(state) = obj.as_person() {
                names.push(state.name().to_string());
            }
        });
        names
    }

    fn ensure_caches(&self) {
        {
            let caches = self.caches.borrow();
            if caches.primed && caches.generation == self.generation {
                return;
            }
        }
        let mut caches = self.caches.borrow_mut();
        caches.object_env.clear();
        caches.env_order.clear();
        caches.env_paths.clear();
        caches.env_by_name.clear();
        caches.env_by_path.clear();

        // The root is addressable by name but carries an empty path and is
        // not part of the flattened descendant list.
        caches.env_paths.insert(self.root.id, String::new());
        caches.env_by_name.insert(self.root.name().to_string(), self.root.id);
        for obj in self.root.objects() {
            caches.object_env.insert(obj.id, self.root.id);
        }

        let mut frontier = VecDeque::new();
        for sub in &self.root.sub_envs {
            frontier.push_back((sub, sub.name().to_string()));
        }
        while let Some((env, path)) = frontier.pop_front() {
            caches.env_order.push(env.id);
            caches.env_paths.insert(env.id, path.clone());
            caches.env_by_name.entry(env.name().to_string()).or_insert(env.id);
            caches.env_by_path.insert(path.clone(), env.id);
            for obj in env.objects() {
                caches.object_env.insert(obj.id, env.id);
            }
            for sub in &env.sub_envs {
                frontier.push_back((sub, format!("{path}{PATH_SEPARATOR}{}", sub.name())));
            }
        }
        caches.generation = self.generation;
        caches.primed = true;
    }
}
