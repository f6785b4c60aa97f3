//! Inbound frame routing.
//!
//! Decodes each text frame into an [`InboundEvent`] and translates it into
//! query-cache invalidations.  Routing is synchronous and its only side
//! effects are calls on the [`QueryCache`].  Unparseable frames and unknown
//! event types are logged and dropped; the connection stays up.

use crate::cache::{
    keys, ArcQueryCache, InvalidateOptions, KeyPredicate, QueryKey, RefetchOptions,
};
use crate::models::{CacheInvalidation, ChangeKind, InboundEvent, MutationAction, Resource};

/// Maps server events to cache invalidations.
#[derive(Clone)]
pub struct MessageRouter {
    cache: ArcQueryCache,
}

impl MessageRouter {
    pub fn new(cache: ArcQueryCache) -> Self {
        Self { cache }
    }

    /// Parse a raw frame and apply its invalidations.
    ///
    /// `bound_project` is the project the socket is subscribed to; it is the
    /// last-resort project for events that omit one.
    pub fn handle_message(&self, text: &str, bound_project: Option<&str>) {
        match InboundEvent::parse(text) {
            Ok(event) => self.route(&event, bound_project),
            Err(e) => log::warn!("[collab-link] Dropping inbound frame: {}", e),
        }
    }

    /// Apply the invalidations for an already parsed event.
    pub fn route(&self, event: &InboundEvent, bound_project: Option<&str>) {
        log::debug!("[collab-link] Routing '{}' event", event.event_type());
        match event {
            InboundEvent::MemberAdded { project_id } | InboundEvent::MemberRemoved { project_id } => {
                match project_id.as_deref() {
                    Some(project_id) => {
                        self.invalidate_exact(keys::project_members(project_id));
                        self.invalidate_project_broadly(project_id);
                    },
                    None => self.skip(event, "no project id"),
                }
            },
            InboundEvent::MessageCreated { project_id } => {
                self.invalidate_messages(event, project_id.as_deref().or(bound_project));
            },
            InboundEvent::Task {
                project_id,
                task_id,
                ..
            } => self.invalidate_task(task_id.as_deref(), project_id.as_deref(), true),
            InboundEvent::Sprint {
                change,
                project_id,
                sprint_id,
            } => {
                let Some(project_id) = project_id.as_deref() else {
                    self.skip(event, "no project id");
                    return;
                };
                if let Some(sprint_id) = sprint_id.as_deref() {
                    self.invalidate_exact(keys::sprint_detail(sprint_id));
                }
                if *change == ChangeKind::Created {
                    // New sprints must show up without waiting for a remount.
                    self.refetch_exact(keys::sprint_list(project_id));
                } else {
                    self.invalidate_exact(keys::sprint_list(project_id));
                }
                self.invalidate_exact(keys::project_bundle(project_id));
            },
            InboundEvent::ProjectUpdated { project_id } => match project_id.as_deref() {
                Some(project_id) => self.invalidate_project_broadly(project_id),
                None => self.skip(event, "no project id"),
            },
            InboundEvent::CacheInvalidate(invalidation) => {
                self.apply_legacy(event, invalidation, bound_project)
            },
            InboundEvent::Reconnect => {
                log::info!("[collab-link] Server requested reconnect; cache left untouched");
            },
            InboundEvent::HeartbeatAck => {},
            InboundEvent::Unknown { event_type } => {
                log::debug!("[collab-link] Ignoring unknown event type '{}'", event_type);
            },
        }
    }

    fn apply_legacy(
        &self,
        event: &InboundEvent,
        invalidation: &CacheInvalidation,
        bound_project: Option<&str>,
    ) {
        let id = invalidation.id.as_deref();
        let project_id = invalidation.project_id.as_deref();

        match invalidation.resource {
            Resource::Project => {
                let Some(project_id) = id.or(project_id) else {
                    self.skip(event, "no project id");
                    return;
                };
                self.invalidate_exact(keys::project_detail(project_id));
                self.invalidate_exact(keys::project_list());
                if invalidation.action == Some(MutationAction::Delete) {
                    self.cache.remove_queries(&keys::project_detail(project_id));
                    self.cache.remove_queries(&keys::project_bundle(project_id));
                }
            },
            Resource::Sprint => {
                if let Some(sprint_id) = id {
                    self.invalidate_exact(keys::sprint_detail(sprint_id));
                }
                match project_id {
                    Some(project_id) if invalidation.action == Some(MutationAction::Insert) => {
                        self.refetch_exact(keys::sprint_list(project_id));
                    },
                    Some(project_id) => self.invalidate_exact(keys::sprint_list(project_id)),
                    None => self.skip(event, "no project id for sprint list"),
                }
            },
            Resource::Task => self.invalidate_task(id, project_id, false),
            Resource::ProjectMembers => match project_id {
                Some(project_id) => {
                    self.invalidate_exact(keys::project_members(project_id));
                    self.invalidate_project_broadly(project_id);
                },
                None => self.skip(event, "no project id"),
            },
            Resource::Message => self.invalidate_messages(event, project_id.or(bound_project)),
        }
    }

    /// Every user's message list for the project, refetching open views.
    fn invalidate_messages(&self, event: &InboundEvent, project_id: Option<&str>) {
        match project_id {
            Some(project_id) => self.cache.invalidate_queries(
                &KeyPredicate::Prefix(keys::project_messages_prefix(project_id)),
                InvalidateOptions::refetch_active(),
            ),
            // Never invalidate a blank key: it would match every project.
            None => self.skip(event, "no resolvable project id"),
        }
    }

    /// A task may sit in any sprint, so every sprint-scoped list is
    /// invalidated rather than resolving the exact sprint.
    fn invalidate_task(&self, task_id: Option<&str>, project_id: Option<&str>, with_bundle: bool) {
        if let Some(task_id) = task_id {
            self.invalidate_exact(keys::task_detail(task_id));
        }
        if let Some(project_id) = project_id {
            self.invalidate_exact(keys::project_tasks(project_id));
        }
        self.cache.invalidate_queries(
            &KeyPredicate::Prefix(keys::sprint_tasks_prefix()),
            InvalidateOptions::mark_stale(),
        );
        if let (true, Some(project_id)) = (with_bundle, project_id) {
            self.invalidate_exact(keys::project_bundle(project_id));
        }
    }

    fn invalidate_project_broadly(&self, project_id: &str) {
        self.invalidate_exact(keys::project_detail(project_id));
        self.invalidate_exact(keys::project_bundle(project_id));
        self.invalidate_exact(keys::project_list());
    }

    fn invalidate_exact(&self, key: QueryKey) {
        self.cache
            .invalidate_queries(&KeyPredicate::Exact(key), InvalidateOptions::mark_stale());
    }

    fn refetch_exact(&self, key: QueryKey) {
        self.cache.refetch_queries(&key, RefetchOptions { exact: true });
    }

    fn skip(&self, event: &InboundEvent, why: &str) {
        log::warn!("[collab-link] Skipping '{}' event: {}", event.event_type(), why);
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter").finish_non_exhaustive()
    }
}
