use std::borrow::Cow;

use derive_more::Display;
use hashlink::LinkedHashMap;
use saphyr::{Scalar, Yaml};
use tracing::{debug, warn};

use crate::filesystem::NodeSpec;

/// One engine call, as read from a request script.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum Request {
    #[display("create {path}")]
    Create { path: String, spec: NodeSpec },
    #[display("mkdir {path}")]
    Mkdir { path: String },
    #[display("read {path}")]
    Read { path: String },
    #[display("update {path}")]
    Update { path: String, content: Vec<u8> },
    #[display("write {path}")]
    Write { path: String, content: Vec<u8> },
    #[display("delete {path}")]
    Delete { path: String, recursive: bool },
    #[display("move {path} -> {to}")]
    Move {
        path: String,
        to: String,
        name: Option<String>,
    },
    #[display("rename {path} -> {name}")]
    Rename { path: String, name: String },
    #[display("list {path}")]
    List { path: String },
    #[display("stat {path}")]
    Stat { path: String },
    #[display("tree {path}")]
    Tree { path: String },
    #[display("snapshot")]
    Snapshot,
}

fn key<'a>(name: &'static str) -> Yaml<'a> {
    Yaml::Value(Scalar::String(Cow::Borrowed(name)))
}

fn string_field(entry: &LinkedHashMap<Yaml, Yaml>, name: &'static str) -> Option<String> {
    match entry.get(&key(name))? {
        Yaml::Value(Scalar::String(value)) => Some(value.to_string()),
        Yaml::Value(Scalar::Integer(value)) => Some(value.to_string()),
        Yaml::Value(Scalar::Boolean(value)) => Some(value.to_string()),
        other => {
            warn!("Ignoring '{}' field with unsupported value {:?}", name, other);
            None
        }
    }
}

fn bool_field(entry: &LinkedHashMap<Yaml, Yaml>, name: &'static str) -> Option<bool> {
    match entry.get(&key(name))? {
        Yaml::Value(Scalar::Boolean(value)) => Some(*value),
        _ => None,
    }
}

fn content_field(entry: &LinkedHashMap<Yaml, Yaml>) -> Vec<u8> {
    string_field(entry, "content")
        .map(String::into_bytes)
        .unwrap_or_default()
}

impl Request {
    /// Builds a request from one script entry. Entries that cannot be
    /// understood are logged and skipped.
    pub fn from_yaml(entry: &LinkedHashMap<Yaml, Yaml>) -> Option<Self> {
        let Some(op) = string_field(entry, "op") else {
            warn!("Skipping request without an 'op' field: {:?}", entry);
            return None;
        };
        if op == "snapshot" {
            return Some(Request::Snapshot);
        }

        let path = string_field(entry, "path").or_else(|| {
            warn!("Skipping '{}' request without a 'path' field", op);
            None
        })?;
        debug!("Parsing '{}' request for {}", op, path);

        let request = match op.as_str() {
            "create" => {
                let spec = match string_field(entry, "kind").as_deref() {
                    Some("directory") | Some("dir") => NodeSpec::Directory,
                    Some("file") | None => NodeSpec::File(content_field(entry)),
                    Some(other) => {
                        warn!("Unknown node kind '{}' for {}. Skipping.", other, path);
                        return None;
                    }
                };
                Request::Create { path, spec }
            }
            "mkdir" => Request::Mkdir { path },
            "read" => Request::Read { path },
            "update" => Request::Update {
                content: content_field(entry),
                path,
            },
            "write" => Request::Write {
                content: content_field(entry),
                path,
            },
            "delete" => Request::Delete {
                recursive: bool_field(entry, "recursive").unwrap_or(false),
                path,
            },
            "move" => {
                let Some(to) = string_field(entry, "to") else {
                    warn!("Skipping move of {} without a 'to' field", path);
                    return None;
                };
                Request::Move {
                    name: string_field(entry, "name"),
                    path,
                    to,
                }
            }
            "rename" => {
                let Some(name) = string_field(entry, "name") else {
                    warn!("Skipping rename of {} without a 'name' field", path);
                    return None;
                };
                Request::Rename { path, name }
            }
            "list" => Request::List { path },
            "stat" => Request::Stat { path },
            "tree" => Request::Tree { path },
            unknown => {
                warn!("Unknown request op '{}' for {}. Skipping.", unknown, path);
                return None;
            }
        };
        Some(request)
    }
}
