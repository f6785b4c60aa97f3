//! Query-cache seam.
//!
//! The client never owns cached data.  It only tells the host application's
//! query cache which entries went stale, through the [`QueryCache`] trait.
//! Keys are ordered segment lists (`["projects", "detail", "p1"]`) and
//! predicates select either one exact key or every key under a prefix.

use std::fmt;
use std::sync::Arc;

/// Ordered list of key segments identifying a cached query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for QueryKey {
    fn from(segments: [S; N]) -> Self {
        Self::new(segments)
    }
}

/// Selects the cache entries an invalidation applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPredicate {
    Exact(QueryKey),
    /// Every key whose leading segments equal the prefix.
    Prefix(QueryKey),
}

impl KeyPredicate {
    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            Self::Exact(expected) => expected == key,
            Self::Prefix(prefix) => key.starts_with(prefix),
        }
    }
}

impl fmt::Display for KeyPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(key) => write!(f, "exact {}", key),
            Self::Prefix(key) => write!(f, "prefix {}", key),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InvalidateOptions {
    /// Refetch matching queries that are currently observed, instead of
    /// only marking them stale.
    pub refetch_active: bool,
}

impl InvalidateOptions {
    pub fn mark_stale() -> Self {
        Self {
            refetch_active: false,
        }
    }

    pub fn refetch_active() -> Self {
        Self {
            refetch_active: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefetchOptions {
    /// Only the exact key, not keys below it.
    pub exact: bool,
}

/// Mutation API of the host application's query cache.
///
/// Calls are made synchronously from the message router and must not block.
pub trait QueryCache: Send + Sync + 'static {
    fn invalidate_queries(&self, predicate: &KeyPredicate, options: InvalidateOptions);

    /// Drop the entry entirely rather than marking it stale.
    fn remove_queries(&self, key: &QueryKey);

    fn refetch_queries(&self, key: &QueryKey, options: RefetchOptions);
}

/// A reference-counted [`QueryCache`].
pub type ArcQueryCache = Arc<dyn QueryCache>;

/// Canonical cache keys used by the collaboration front end.
pub mod keys {
    use super::QueryKey;

    pub fn project_list() -> QueryKey {
        QueryKey::from(["projects", "list"])
    }

    pub fn project_detail(project_id: &str) -> QueryKey {
        QueryKey::from(["projects", "detail", project_id])
    }

    /// Aggregate of a project with its sprints, tasks and members.
    pub fn project_bundle(project_id: &str) -> QueryKey {
        QueryKey::from(["projects", "bundle", project_id])
    }

    pub fn project_members(project_id: &str) -> QueryKey {
        QueryKey::from(["projects", "members", project_id])
    }

    pub fn sprint_list(project_id: &str) -> QueryKey {
        QueryKey::from(["sprints", "list", project_id])
    }

    pub fn sprint_detail(sprint_id: &str) -> QueryKey {
        QueryKey::from(["sprints", "detail", sprint_id])
    }

    pub fn project_tasks(project_id: &str) -> QueryKey {
        QueryKey::from(["tasks", "project", project_id])
    }

    /// Prefix shared by every sprint-scoped task list.
    pub fn sprint_tasks_prefix() -> QueryKey {
        QueryKey::from(["tasks", "sprint"])
    }

    pub fn task_detail(task_id: &str) -> QueryKey {
        QueryKey::from(["tasks", "detail", task_id])
    }

    /// Prefix shared by every user's message list for a project.
    pub fn project_messages_prefix(project_id: &str) -> QueryKey {
        QueryKey::from(["messages", "project", project_id])
    }
}
