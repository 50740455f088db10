//! Dependent queries: a child query parameterized by its parent's result.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::{Gate, KeyPart, QueryClient, QueryDescriptor, QueryError, QueryState};

type Projection = Arc<dyn Fn(&Value) -> Option<KeyPart> + Send + Sync>;
type ChildFactory = Arc<dyn Fn(KeyPart) -> QueryDescriptor + Send + Sync>;

/// The payload shapes a list endpoint is known to answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// `{ "data": [...] }`
    Wrapped,
    /// `[...]`
    Bare,
    /// `null`, or a container whose `data` is null.
    Empty,
    Unrecognized,
}

impl ResponseShape {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ResponseShape::Empty,
            Value::Array(_) => ResponseShape::Bare,
            Value::Object(map) => match map.get("data") {
                Some(Value::Array(_)) => ResponseShape::Wrapped,
                Some(Value::Null) => ResponseShape::Empty,
                _ => ResponseShape::Unrecognized,
            },
            _ => ResponseShape::Unrecognized,
        }
    }
}

/// Reduce a list response to its items.
///
/// Unrecognized payloads become an empty list; the UI renders "no items"
/// for them rather than an error.
pub fn normalize_sequence(value: Value) -> Vec<Value> {
    match ResponseShape::of(&value) {
        ResponseShape::Bare => match value {
            Value::Array(items) => items,
            _ => Vec::new(),
        },
        ResponseShape::Wrapped => match value {
            Value::Object(mut map) => match map.remove("data") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        },
        ResponseShape::Empty => Vec::new(),
        ResponseShape::Unrecognized => {
            let err = QueryError::Shape(shape_name(&value).to_string());
            debug!(error = %err, "Normalized unrecognized response to empty list");
            Vec::new()
        }
    }
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object without a data list",
    }
}

/// A query whose key suffix is projected out of another query's data,
/// e.g. a user's reviews keyed on the id from their profile.
///
/// The child stays disabled, with no entry and no fetch, until the parent
/// is in `Success` and the projection yields a usable value.
#[derive(Clone)]
pub struct DependentQuery {
    parent: QueryDescriptor,
    project: Projection,
    child: ChildFactory,
}

impl DependentQuery {
    pub fn new<P, C>(parent: QueryDescriptor, project: P, child: C) -> Self
    where
        P: Fn(&Value) -> Option<KeyPart> + Send + Sync + 'static,
        C: Fn(KeyPart) -> QueryDescriptor + Send + Sync + 'static,
    {
        Self {
            parent,
            project: Arc::new(project),
            child: Arc::new(child),
        }
    }

    pub fn parent(&self) -> &QueryDescriptor {
        &self.parent
    }

    /// The child descriptor for the parent's current data, if it can be built.
    pub fn resolve(&self, client: &QueryClient) -> Option<QueryDescriptor> {
        let parent = client.peek(&self.parent);
        if !parent.is_success() {
            return None;
        }
        let part = parent
            .data
            .as_ref()
            .and_then(|data| (self.project)(data))
            .filter(KeyPart::is_usable)?;

        let descriptor = (self.child)(part)
            .gate(Gate::Parent(self.parent.key().clone()))
            .map_data(|value| Value::Array(normalize_sequence(value)));
        Some(descriptor)
    }

    /// Read the child. Does not start the parent.
    pub fn read(&self, client: &QueryClient) -> QueryState {
        match self.resolve(client) {
            Some(descriptor) => client.read(&descriptor),
            None => QueryState::disabled(),
        }
    }

    /// Fetch the parent if needed, then the child.
    pub async fn fetch(&self, client: &QueryClient) -> QueryState {
        client.fetch(&self.parent).await;
        match self.resolve(client) {
            Some(descriptor) => client.fetch(&descriptor).await,
            None => QueryState::disabled(),
        }
    }

    /// Decode the child's items. A missing identity and an empty response
    /// both produce an empty list.
    pub fn items<T: DeserializeOwned>(&self, client: &QueryClient) -> Vec<T> {
        let state = self.read(client);
        match state.data_as::<Vec<T>>() {
            Ok(items) => items.unwrap_or_default(),
            Err(e) => {
                debug!(error = %e, key = %self.parent.key(), "Dependent items did not decode");
                Vec::new()
            }
        }
    }
}

impl fmt::Debug for DependentQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependentQuery")
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}
