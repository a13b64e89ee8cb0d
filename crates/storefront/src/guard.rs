//! Navigation guard: access decisions for route transitions.
//!
//! The decision is a pure function of the target route and the
//! session store's last-synchronized identity. No network call
//! happens here; before the initial identity fetch resolves, an
//! already-authenticated user can still be redirected to the auth
//! page. That cold-start race is inherent to trusting the local
//! mirror.

use tracing::debug;

use crate::session::SessionStore;

/// Well-known route names used in redirect decisions.
pub mod route_names {
    pub const HOME: &str = "home";
    pub const AUTH: &str = "auth";
    pub const ACCOUNT: &str = "account";
}

/// A navigable route and its access requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub name: &'static str,
    pub path: &'static str,
    /// Whether an absent identity redirects to the auth page.
    pub requires_auth: bool,
}

/// The application's route table.
pub const ROUTES: [Route; 3] = [
    Route {
        name: route_names::HOME,
        path: "/",
        requires_auth: true,
    },
    Route {
        name: route_names::AUTH,
        path: "/auth",
        requires_auth: false,
    },
    Route {
        name: route_names::ACCOUNT,
        path: "/account",
        requires_auth: true,
    },
];

impl Route {
    /// Look up a route by name in the route table.
    #[must_use]
    pub fn by_name(name: &str) -> Option<Route> {
        ROUTES.iter().copied().find(|route| route.name == name)
    }
}

/// Outcome of a guard check for one transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavDecision {
    /// Let the transition through.
    Proceed,
    /// Send the navigation to the named route instead.
    Redirect(&'static str),
}

/// Intercepts route transitions and redirects based on the current
/// identity.
#[derive(Clone)]
pub struct NavigationGuard {
    session: SessionStore,
}

impl NavigationGuard {
    #[must_use]
    pub fn new(session: SessionStore) -> Self {
        Self { session }
    }

    /// Decide whether a transition to `target` may proceed.
    ///
    /// Routes that require auth redirect to the auth page when no
    /// identity is present; the auth page itself redirects home when
    /// one is.
    #[must_use]
    pub fn decide(&self, target: &Route) -> NavDecision {
        let signed_in = self.session.identity().is_some();

        if target.requires_auth && !signed_in {
            debug!(route = target.name, "redirecting unauthenticated visitor");
            return NavDecision::Redirect(route_names::AUTH);
        }

        if target.name == route_names::AUTH && signed_in {
            debug!("auth page visited with active session");
            return NavDecision::Redirect(route_names::HOME);
        }

        NavDecision::Proceed
    }
}
