//! Route matching
//!
//! Active routes of a tenant are compiled into a [`RouteTable`]: a segment
//! trie for glob patterns plus a list of regex patterns. A lookup gathers
//! every route whose pattern matches the path and whose methods allow the
//! request method, then picks the best one by priority, literal prefix
//! length, creation time and finally id.

use crate::domain::cache_key::CacheKeyTemplate;
use crate::domain::pattern::{split_path, PathPattern, Segment, Tail};
use crate::domain::route::defaults::ANY_METHOD;
use crate::domain::Route;
use crate::gateway::types::{GatewayError, GatewayResult};
use http::Method;
use regex::Regex;
use std::cmp::{Ordering, Reverse};
use std::collections::HashMap;
use std::sync::Arc;

/// A route with its pattern, cache key template and rewrite rule compiled
#[derive(Debug)]
pub struct CompiledRoute {
    pub route: Arc<Route>,
    pub pattern: PathPattern,
    pub cache_key: CacheKeyTemplate,
    rewrite: Option<(Regex, String)>,
    any_method: bool,
    allows_get: bool,
}

impl CompiledRoute {
    pub fn compile(route: Route) -> GatewayResult<Self> {
        let pattern = PathPattern::parse(&route.path_pattern)?;
        let cache_key = CacheKeyTemplate::parse(&route.cache_key_pattern)?;
        let rewrite = match (&route.path_rewrite_pattern, &route.path_rewrite_target) {
            (Some(pattern), Some(target)) => {
                let regex = Regex::new(pattern).map_err(|e| {
                    GatewayError::config(format!("invalid path_rewrite_pattern: {e}"))
                })?;
                Some((regex, target.clone()))
            }
            _ => None,
        };
        let any_method = route.methods.iter().any(|m| m == ANY_METHOD);
        let allows_get = route.methods.iter().any(|m| m == Method::GET.as_str());

        Ok(Self {
            route: Arc::new(route),
            pattern,
            cache_key,
            rewrite,
            any_method,
            allows_get,
        })
    }

    /// `ANY` admits every method; HEAD is admitted wherever GET is
    pub fn allows_method(&self, method: &Method) -> bool {
        self.any_method
            || self.route.methods.iter().any(|m| m == method.as_str())
            || (*method == Method::HEAD && self.allows_get)
    }

    /// Upstream path after applying `path_rewrite_pattern`/`path_rewrite_target`
    pub fn rewrite_path(&self, path: &str) -> String {
        match &self.rewrite {
            Some((regex, target)) => {
                let rewritten = regex.replace(path, target.as_str()).into_owned();
                if rewritten.starts_with('/') {
                    rewritten
                } else {
                    format!("/{rewritten}")
                }
            }
            None => path.to_string(),
        }
    }

    /// Total order used to pick among matching routes; greater wins
    fn rank(&self, other: &Self) -> Ordering {
        let key = |r: &Self| {
            (
                r.route.priority,
                r.pattern.literal_prefix_len(),
                Reverse(r.route.created_at),
                Reverse(r.route.id),
            )
        };
        key(self).cmp(&key(other))
    }
}

#[derive(Debug, Default)]
struct TrieNode {
    literals: HashMap<String, TrieNode>,
    wildcard: Option<Box<TrieNode>>,
    exact: Vec<usize>,
    one_or_more: Vec<usize>,
    zero_or_more: Vec<usize>,
}

impl TrieNode {
    fn insert(&mut self, segments: &[Segment], tail: Tail, index: usize) {
        match segments.split_first() {
            None => match tail {
                Tail::Exact => self.exact.push(index),
                Tail::OneOrMore => self.one_or_more.push(index),
                Tail::ZeroOrMore => self.zero_or_more.push(index),
            },
            Some((Segment::Literal(lit), rest)) => self
                .literals
                .entry(lit.clone())
                .or_default()
                .insert(rest, tail, index),
            Some((Segment::Wildcard, rest)) => self
                .wildcard
                .get_or_insert_with(Box::default)
                .insert(rest, tail, index),
        }
    }

    fn collect(&self, path: &[&str], out: &mut Vec<usize>) {
        out.extend_from_slice(&self.zero_or_more);
        match path.split_first() {
            None => out.extend_from_slice(&self.exact),
            Some((segment, rest)) => {
                out.extend_from_slice(&self.one_or_more);
                if let Some(child) = self.literals.get(*segment) {
                    child.collect(rest, out);
                }
                if let Some(child) = &self.wildcard {
                    child.collect(rest, out);
                }
            }
        }
    }
}

/// Immutable per-tenant route index
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
    trie: TrieNode,
    regexes: Vec<usize>,
}

impl RouteTable {
    /// Index the active routes among `routes`
    pub fn build(routes: impl IntoIterator<Item = CompiledRoute>) -> Self {
        let mut table = Self::default();
        for compiled in routes.into_iter().filter(|c| c.route.is_active) {
            let index = table.routes.len();
            match &compiled.pattern {
                PathPattern::Glob(glob) => table.trie.insert(glob.segments(), glob.tail(), index),
                PathPattern::Regex(_) => table.regexes.push(index),
            }
            table.routes.push(compiled);
        }
        table
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Best route for the request, if any
    pub fn find(&self, method: &Method, path: &str) -> Option<&CompiledRoute> {
        let mut candidates = Vec::new();
        self.trie.collect(&split_path(path), &mut candidates);
        candidates.extend(
            self.regexes
                .iter()
                .copied()
                .filter(|&i| self.routes[i].pattern.matches(path)),
        );

        candidates
            .into_iter()
            .map(|i| &self.routes[i])
            .filter(|c| c.allows_method(method))
            .max_by(|a, b| a.rank(b))
    }

    pub fn routes(&self) -> impl Iterator<Item = &CompiledRoute> {
        self.routes.iter()
    }
}
