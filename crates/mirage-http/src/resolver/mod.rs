//! Resource resolution.
//!
//! Selects the single configured [`ResourceDefinition`] that best matches an
//! incoming request:
//!
//! 1. Keep definitions whose path equals the request path or its template,
//!    whose method equals the request method, and whose every configured
//!    path/query parameter is present with the same (case-sensitive) value.
//! 2. Prefer definitions that declare path parameters, then those that
//!    declare query parameters.
//! 3. Exactly one left wins. Several left is a configuration ambiguity: a
//!    warning is logged and the first in load order wins.
//!
//! A request path may belong to several templates (`/users/me` and
//! `/users/{id}`); [`resolve_routes`] tries each in turn, literal first.

mod router;

pub use router::{RouteMatch, RouteTable};

use crate::config::ResourceDefinition;
use std::collections::HashMap;
use tracing::warn;

/// The parts of a request the resolver looks at.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub path_template: Option<&'a str>,
    pub path_params: &'a HashMap<String, String>,
    pub query_params: &'a HashMap<String, String>,
}

/// Return the best-matching definition, or `None` so the caller can fall
/// back to a root definition.
pub fn resolve<'a>(
    definitions: &'a [ResourceDefinition],
    request: &ResolveRequest<'_>,
) -> Option<&'a ResourceDefinition> {
    resolve_index(definitions, request).map(|index| &definitions[index])
}

/// Same as [`resolve`], returning the position in `definitions`.
pub fn resolve_index(
    definitions: &[ResourceDefinition],
    request: &ResolveRequest<'_>,
) -> Option<usize> {
    let candidates: Vec<usize> = definitions
        .iter()
        .enumerate()
        .filter(|(_, definition)| is_match(definition, request))
        .map(|(index, _)| index)
        .collect();

    let candidates = narrow(candidates, |i| !definitions[i].path_params.is_empty());
    let candidates = narrow(candidates, |i| !definitions[i].query_params.is_empty());

    match candidates.as_slice() {
        [] => None,
        [only] => Some(*only),
        [first, ..] => {
            warn!(
                "More than one resource matched {} {}; using the first in load order ({}). \
                 Candidates: {}",
                request.method,
                request.path,
                definitions[*first],
                candidates
                    .iter()
                    .map(|i| definitions[*i].to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            Some(*first)
        }
    }
}

/// Resolve against each route the request path belongs to, in order. The
/// first route that yields a definition wins and is returned alongside it.
pub fn resolve_routes<'r>(
    definitions: &[ResourceDefinition],
    method: &str,
    path: &str,
    routes: &'r [RouteMatch],
    query_params: &HashMap<String, String>,
) -> Option<(usize, Option<&'r RouteMatch>)> {
    let routed = routes.iter().find_map(|route| {
        let request = ResolveRequest {
            method,
            path,
            path_template: Some(route.template.as_str()),
            path_params: &route.path_params,
            query_params,
        };
        resolve_index(definitions, &request).map(|index| (index, Some(route)))
    });
    if routed.is_some() {
        return routed;
    }

    let no_params = HashMap::new();
    let request = ResolveRequest {
        method,
        path,
        path_template: None,
        path_params: &no_params,
        query_params,
    };
    resolve_index(definitions, &request).map(|index| (index, None))
}

fn is_match(definition: &ResourceDefinition, request: &ResolveRequest<'_>) -> bool {
    let path_matches = definition.path == request.path
        || request
            .path_template
            .map(|template| definition.path == template)
            .unwrap_or(false);

    path_matches
        && definition.method == request.method
        && params_match(&definition.path_params, request.path_params)
        && params_match(&definition.query_params, request.query_params)
}

/// Every configured param must be present and equal; extra request params are ignored.
fn params_match(configured: &HashMap<String, String>, actual: &HashMap<String, String>) -> bool {
    configured
        .iter()
        .all(|(name, expected)| actual.get(name) == Some(expected))
}

/// Keep the subset satisfying `is_specific`, unless it is empty.
fn narrow(candidates: Vec<usize>, is_specific: impl Fn(usize) -> bool) -> Vec<usize> {
    let specific: Vec<usize> = candidates.iter().copied().filter(|i| is_specific(*i)).collect();
    if specific.is_empty() {
        candidates
    } else {
        specific
    }
}
