//! Explicit protocol route table.
//!
//! A connection is in a protocol state (initially `Root`) and each inbound
//! message carries a verb; the pair selects a handler. Every route names the
//! state a handled message leaves the connection in, and the whole table is
//! validated once at startup so an unreachable state or an undeclared
//! next-state is a boot failure, not a latent runtime surprise.

use anyhow::{bail, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Root,
}

/// Initial state of every connection.
pub const INITIAL_STATE: ConnState = ConnState::Root;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Signup,
    ListPeeps,
}

#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub state: ConnState,
    pub verb: &'static str,
    pub handler: HandlerKind,
    /// State after the handler runs. Every current interaction is a single
    /// request/response/close cycle, so all routes stay in `Root`; the field
    /// is what makes future multi-step states possible without redesign.
    pub next: ConnState,
    /// Whether the handler ends the interaction with a terminal message.
    pub terminal: bool,
}

pub struct DispatchTable {
    routes: Vec<Route>,
}

impl DispatchTable {
    /// The current protocol: signup and phonebook endpoints off the root
    /// state.
    pub fn protocol() -> Self {
        DispatchTable {
            routes: vec![
                Route {
                    state: ConnState::Root,
                    verb: "signup",
                    handler: HandlerKind::Signup,
                    next: ConnState::Root,
                    terminal: true,
                },
                Route {
                    state: ConnState::Root,
                    verb: "listPeeps",
                    handler: HandlerKind::ListPeeps,
                    next: ConnState::Root,
                    terminal: true,
                },
            ],
        }
    }

    #[cfg(test)]
    fn with_routes(routes: Vec<Route>) -> Self {
        DispatchTable { routes }
    }

    /// Startup validation: the initial state must be routable, every
    /// next-state must be declared (i.e. some route handles messages in it),
    /// and no `(state, verb)` pair may be claimed twice.
    pub fn validate(&self) -> Result<()> {
        if self.routes.is_empty() {
            bail!("dispatch table declares no routes");
        }

        if !self.routes.iter().any(|r| r.state == INITIAL_STATE) {
            bail!("initial state has no routes");
        }

        for route in &self.routes {
            if !self.routes.iter().any(|r| r.state == route.next) {
                bail!(
                    "route ({:?}, {}) transitions to state {:?} which handles no verbs",
                    route.state,
                    route.verb,
                    route.next
                );
            }

            let claims = self
                .routes
                .iter()
                .filter(|r| r.state == route.state && r.verb == route.verb)
                .count();
            if claims != 1 {
                bail!(
                    "duplicate route for ({:?}, {})",
                    route.state,
                    route.verb
                );
            }
        }

        Ok(())
    }

    pub fn lookup(&self, state: ConnState, verb: &str) -> Option<&Route> {
        self.routes
            .iter()
            .find(|r| r.state == state && r.verb == verb)
    }
}
