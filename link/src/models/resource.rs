use std::fmt;

/// Canonical resource tag carried by legacy `cache_invalidate` frames.
///
/// The wire format has used both singular and plural names over time, and
/// membership has appeared as `project_member` and `project_members`.
/// [`Resource::from_wire`] folds every alias into one tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Project,
    Sprint,
    Task,
    ProjectMembers,
    Message,
}

impl Resource {
    /// Parse a wire resource name, accepting plural and legacy aliases.
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "project" | "projects" => Some(Self::Project),
            "sprint" | "sprints" => Some(Self::Sprint),
            "task" | "tasks" => Some(Self::Task),
            "project_member" | "project_members" | "member" | "members" => {
                Some(Self::ProjectMembers)
            },
            "message" | "messages" => Some(Self::Message),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Sprint => "sprint",
            Self::Task => "task",
            Self::ProjectMembers => "project_members",
            Self::Message => "message",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutation that triggered an invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationAction {
    Insert,
    Update,
    Delete,
}

impl MutationAction {
    /// Case-insensitive parse of `INSERT` / `UPDATE` / `DELETE`.
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "INSERT"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}
