//! Kernel error types. Structural errors come out of world mutations;
//! schema errors come out of the serialization boundary and carry the
//! path of the offending node.

use std::fmt;

/// A world mutation referenced something the tree does not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureError {
    UnknownEnvironment(String),
    UnknownObject(String),
    NotAPerson(String),
    /// The object is already attached where the caller tried to place it,
    /// or a person with the same name already lives in the tree.
    DuplicatePlacement(String),
}

impl fmt::Display for StructureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownEnvironment(name) => write!(f, "unknown environment: {name}"),
            Self::UnknownObject(name) => write!(f, "unknown object: {name}"),
            Self::NotAPerson(name) => write!(f, "not a person: {name}"),
            Self::DuplicatePlacement(name) => write!(f, "duplicate placement: {name}"),
        }
    }
}

impl std::error::Error for StructureError {}

/// One step of a path into the serialized world form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
    Key(String),
    Index(usize),
}

/// Validation failure while reading or writing the serialized world form.
/// `path` locates the offending node from the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaError {
    pub path: Vec<PathSeg>,
    pub message: String,
}

impl SchemaError {
    pub fn new(path: Vec<PathSeg>, message: impl Into<String>) -> Self {
        Self {
            path,
            message: message.into(),
        }
    }

    /// Renders the path like `senv[0].objd[1].attr`. Empty path renders
    /// as `$` (the root).
    pub fn path_string(&self) -> String {
        if self.path.is_empty() {
            return "$".to_string();
        }
        let mut out = String::new();
        for seg in &self.path {
            match seg {
                PathSeg::Key(key) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(key);
                }
                PathSeg::Index(i) => {
                    out.push('[');
                    out.push_str(&i.to_string());
                    out.push(']');
                }
            }
        }
        out
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "schema violation at {}: {}", self.path_string(), self.message)
    }
}

impl std::error::Error for SchemaError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_string_mixes_keys_and_indices() {
        let err = SchemaError::new(
            vec![
                PathSeg::Key("senv".into()),
                PathSeg::Index(0),
                PathSeg::Key("objd".into()),
                PathSeg::Index(2),
                PathSeg::Key("attr".into()),
            ],
            "bad birth date",
        );
        assert_eq!(err.path_string(), "senv[0].objd[2].attr");
        assert_eq!(
            err.to_string(),
            "schema violation at senv[0].objd[2].attr: bad birth date"
        );
    }

    #[test]
    fn empty_path_renders_as_root() {
        let err = SchemaError::new(vec![], "root must be a scene");
        assert_eq!(err.path_string(), "$");
    }
}
