/// The authenticated user on whose behalf actions are performed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
        }
    }
}

/// Source of the current session's actor
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait SessionProvider: Send + Sync {
    /// `None` when no one is signed in or the session has expired
    fn current_actor(&self) -> Option<Actor>;
}

/// Session fixed to a single actor, used by service accounts and tools
#[derive(Debug, Clone)]
pub struct StaticSession {
    actor: Option<Actor>,
}

impl StaticSession {
    pub fn signed_in(actor: Actor) -> Self {
        Self { actor: Some(actor) }
    }

    pub fn anonymous() -> Self {
        Self { actor: None }
    }
}

impl SessionProvider for StaticSession {
    fn current_actor(&self) -> Option<Actor> {
        self.actor.clone()
    }
}
