use tracing::debug;

use crate::filesystem::{TreeEngine, TreeResult};
use crate::transport::{Body, Request, Response, Status};

/// Runs one request against the engine. Every outcome, including errors, is
/// turned into a [`Response`].
pub fn handle(engine: &TreeEngine, request: &Request) -> Response {
    let response = match dispatch(engine, request) {
        Ok((status, body)) => Response::new(status, body),
        Err(error) => Response::error(&error),
    };
    debug!("{} => {}", request, response.status);
    response
}

fn dispatch(engine: &TreeEngine, request: &Request) -> TreeResult<(Status, Body)> {
    Ok(match request {
        Request::Create { path, spec } => (
            Status::Created,
            Body::Node(engine.create(path, spec.clone())?),
        ),
        Request::Mkdir { path } => (Status::Created, Body::Node(engine.create_dir(path)?)),
        Request::Read { path } => (Status::Ok, Body::Node(engine.read(path)?)),
        Request::Update { path, content } => (
            Status::Ok,
            Body::Node(engine.update(path, content.clone())?),
        ),
        Request::Write { path, content } => {
            (Status::Ok, Body::Node(engine.write(path, content.clone())?))
        }
        Request::Delete { path, recursive } => (
            Status::Deleted,
            Body::Deleted {
                removed: engine.delete(path, *recursive)?,
            },
        ),
        Request::Move { path, to, name } => (
            Status::Ok,
            Body::Node(engine.move_to(path, to, name.as_deref())?),
        ),
        Request::Rename { path, name } => (Status::Ok, Body::Node(engine.rename(path, name)?)),
        Request::List { path } => (Status::Ok, Body::Listing(engine.list(path)?)),
        Request::Stat { path } => (Status::Ok, Body::Node(engine.stat(path)?)),
        Request::Tree { path } => (
            Status::Ok,
            Body::Tree(
                engine
                    .walk(path)?
                    .into_iter()
                    .map(|(path, info)| (path.to_string(), info))
                    .collect(),
            ),
        ),
        Request::Snapshot => {
            let snapshot = engine.snapshot()?;
            let nodes = snapshot.node_count();
            match snapshot.encode() {
                Ok(bytes) => (
                    Status::Ok,
                    Body::Snapshot {
                        nodes,
                        encoded_bytes: bytes.len(),
                    },
                ),
                Err(error) => (Status::Internal, Body::Error(error.to_string())),
            }
        }
    })
}
