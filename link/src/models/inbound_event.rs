use serde_json::{Map, Value};

use crate::error::{CollabLinkError, Result};

use super::resource::{MutationAction, Resource};

/// Nested objects that may carry event fields, in lookup order.
const NESTED_KEYS: [&str; 2] = ["data", "payload"];

/// Create/update/delete suffix of a typed event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Body of a legacy `cache_invalidate` envelope, normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheInvalidation {
    pub resource: Resource,
    /// Resource instance identifier, when the mutation targets one row.
    pub id: Option<String>,
    /// `None` when the server omitted the action or sent one we do not know.
    pub action: Option<MutationAction>,
    pub project_id: Option<String>,
    /// ISO-8601 time of the mutation.  Informational only, never used for ordering.
    pub timestamp: Option<String>,
}

/// Server-to-client frame after normalization.
///
/// Field casing differs across server versions (`projectId` vs
/// `project_id`, top level vs nested under `data`/`payload`).  All of that
/// is resolved in [`InboundEvent::parse`]; nothing downstream looks at raw
/// JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    MemberAdded {
        project_id: Option<String>,
    },
    MemberRemoved {
        project_id: Option<String>,
    },
    MessageCreated {
        project_id: Option<String>,
    },
    Task {
        change: ChangeKind,
        project_id: Option<String>,
        task_id: Option<String>,
    },
    Sprint {
        change: ChangeKind,
        project_id: Option<String>,
        sprint_id: Option<String>,
    },
    ProjectUpdated {
        project_id: Option<String>,
    },
    CacheInvalidate(CacheInvalidation),
    /// Server-initiated reconnect notice.  Carries no data change.
    Reconnect,
    HeartbeatAck,
    /// A `type` this client does not know yet.
    Unknown {
        event_type: String,
    },
}

impl InboundEvent {
    /// Parse and normalize a raw text frame.
    ///
    /// Fails with [`CollabLinkError::MalformedFrame`] when the text is not a
    /// JSON object with a string `type`, or when a `cache_invalidate`
    /// envelope has no `resource`.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| CollabLinkError::MalformedFrame(format!("Invalid JSON: {}", e)))?;
        let root = value.as_object().ok_or_else(|| {
            CollabLinkError::MalformedFrame("Frame is not a JSON object".to_string())
        })?;
        let event_type = root
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| CollabLinkError::MalformedFrame("Frame has no `type`".to_string()))?;

        let fields = Fields { root };
        let event = match event_type.to_ascii_lowercase().as_str() {
            "member_added" => Self::MemberAdded {
                project_id: fields.project_id(),
            },
            "member_removed" => Self::MemberRemoved {
                project_id: fields.project_id(),
            },
            "message_created" => Self::MessageCreated {
                project_id: fields.project_id(),
            },
            "task_created" => fields.task(ChangeKind::Created),
            "task_updated" => fields.task(ChangeKind::Updated),
            "task_deleted" => fields.task(ChangeKind::Deleted),
            "sprint_created" => fields.sprint(ChangeKind::Created),
            "sprint_updated" => fields.sprint(ChangeKind::Updated),
            "sprint_deleted" => fields.sprint(ChangeKind::Deleted),
            "project_updated" => Self::ProjectUpdated {
                project_id: fields.project_id(),
            },
            "cache_invalidate" => return fields.cache_invalidation().map(Self::CacheInvalidate),
            "reconnect" => Self::Reconnect,
            "pong" | "heartbeat" | "heartbeat_ack" => Self::HeartbeatAck,
            _ => Self::Unknown {
                event_type: event_type.to_string(),
            },
        };
        Ok(event)
    }

    /// Wire name of the event, for logging.
    pub fn event_type(&self) -> &str {
        match self {
            Self::MemberAdded { .. } => "member_added",
            Self::MemberRemoved { .. } => "member_removed",
            Self::MessageCreated { .. } => "message_created",
            Self::Task { change, .. } => match change {
                ChangeKind::Created => "task_created",
                ChangeKind::Updated => "task_updated",
                ChangeKind::Deleted => "task_deleted",
            },
            Self::Sprint { change, .. } => match change {
                ChangeKind::Created => "sprint_created",
                ChangeKind::Updated => "sprint_updated",
                ChangeKind::Deleted => "sprint_deleted",
            },
            Self::ProjectUpdated { .. } => "project_updated",
            Self::CacheInvalidate(_) => "cache_invalidate",
            Self::Reconnect => "reconnect",
            Self::HeartbeatAck => "heartbeat_ack",
            Self::Unknown { event_type } => event_type,
        }
    }
}

/// Read a non-empty identifier; numeric ids are rendered as strings.
fn id_value(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// camelCase first, snake_case second.
fn cased(map: &Map<String, Value>, camel: &str, snake: &str) -> Option<String> {
    id_value(map, camel).or_else(|| id_value(map, snake))
}

struct Fields<'a> {
    root: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    fn nested(&self) -> impl Iterator<Item = &'a Map<String, Value>> + 'a {
        let root = self.root;
        NESTED_KEYS.iter().filter_map(move |key| root.get(*key).and_then(Value::as_object))
    }

    /// Top-level field, then the same field inside `data` / `payload`.
    fn lookup(&self, camel: &str, snake: &str) -> Option<String> {
        cased(self.root, camel, snake).or_else(|| self.nested().find_map(|m| cased(m, camel, snake)))
    }

    fn project_id(&self) -> Option<String> {
        self.lookup("projectId", "project_id")
    }

    /// Nested `id` is only meaningful inside the payload object.
    fn nested_id(&self, camel: &str, snake: &str) -> Option<String> {
        self.lookup(camel, snake)
            .or_else(|| self.nested().find_map(|m| id_value(m, "id")))
    }

    fn task(&self, change: ChangeKind) -> InboundEvent {
        InboundEvent::Task {
            change,
            project_id: self.project_id(),
            task_id: self.nested_id("taskId", "task_id"),
        }
    }

    fn sprint(&self, change: ChangeKind) -> InboundEvent {
        InboundEvent::Sprint {
            change,
            project_id: self.project_id(),
            sprint_id: self.nested_id("sprintId", "sprint_id"),
        }
    }

    fn cache_invalidation(&self) -> Result<CacheInvalidation> {
        // Older servers put the body at the top level, newer ones nest it.
        let body = self.nested().next().unwrap_or(self.root);
        let raw_resource = body
            .get("resource")
            .or_else(|| self.root.get("resource"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CollabLinkError::MalformedFrame("cache_invalidate without `resource`".to_string())
            })?;
        let resource = Resource::from_wire(raw_resource).ok_or_else(|| {
            CollabLinkError::MalformedFrame(format!("Unknown resource '{}'", raw_resource))
        })?;

        let action = body
            .get("action")
            .and_then(Value::as_str)
            .and_then(MutationAction::from_wire);

        Ok(CacheInvalidation {
            resource,
            id: id_value(body, "id"),
            action,
            project_id: cased(body, "projectId", "project_id").or_else(|| self.project_id()),
            timestamp: body.get("timestamp").and_then(Value::as_str).map(str::to_string),
        })
    }
}
