//! Segment router with `:name` captures and a per-method handler table.
//!
//! The router is generic over the handler type: the engine decides what a
//! handler is, the router only maps `(method, path)` to one and extracts
//! captures and query pairs as byte ranges into the receive buffer (`base`
//! is the path's offset within that buffer).

use std::ops::Range;
use std::sync::Arc;

use crate::method::Method;

enum Segment {
    Literal(Box<str>),
    Param(Arc<str>),
}

struct Route<H> {
    pattern: Box<str>,
    segments: Vec<Segment>,
    handlers: [Option<H>; Method::COUNT],
}

/// Bitset over [`Method`], used for `Allow` computation on 405.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodSet(u16);

impl MethodSet {
    pub fn insert(&mut self, method: Method) {
        self.0 |= 1 << method.index();
    }

    pub fn contains(&self, method: Method) -> bool {
        self.0 & (1 << method.index()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Method> + '_ {
        (0..Method::COUNT).filter_map(move |i| {
            if self.0 & (1 << i) != 0 {
                Method::from_index(i)
            } else {
                None
            }
        })
    }
}

pub enum Found<'r, H> {
    /// A route matched and carries a handler for the method; captures have
    /// been written to the caller's buffer.
    Route { handler: &'r H },
    /// A route matched the path but not the method.
    MethodNotAllowed { allow: MethodSet },
    NotFound,
}

pub struct Router<H> {
    routes: Vec<Route<H>>,
}

impl<H> Default for Router<H> {
    fn default() -> Self {
        Router { routes: Vec::new() }
    }
}

impl<H> Router<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method` on `pattern`. Patterns are `/`-split
    /// segments; a segment starting with `:` captures. Registering the same
    /// pattern again extends its method table; the last handler per
    /// (pattern, method) wins.
    pub fn route(&mut self, pattern: &str, method: Method, handler: H) -> &mut Self {
        let route = match self.routes.iter_mut().position(|r| &*r.pattern == pattern) {
            Some(i) => &mut self.routes[i],
            None => {
                let segments = segments_of(pattern)
                    .map(|(_, part)| match part.strip_prefix(':') {
                        Some(name) => Segment::Param(Arc::from(name)),
                        None => Segment::Literal(Box::from(part)),
                    })
                    .collect();
                self.routes.push(Route {
                    pattern: Box::from(pattern),
                    segments,
                    handlers: std::array::from_fn(|_| None),
                });
                self.routes.last_mut().expect("route just pushed")
            }
        };
        route.handlers[method.index()] = Some(handler);
        self
    }

    /// Match `path` (located at offset `base` of the receive buffer).
    /// Capture values are appended to `captures` as buffer ranges, at most
    /// `captures_max` of them. First registered matching route wins.
    pub fn find<'r>(
        &'r self,
        path: &str,
        base: usize,
        method: Method,
        captures: &mut Vec<(Arc<str>, Range<usize>)>,
        captures_max: usize,
    ) -> Found<'r, H> {
        for route in &self.routes {
            captures.clear();
            if !match_route(route, path, base, captures, captures_max) {
                continue;
            }
            match &route.handlers[method.index()] {
                Some(handler) => return Found::Route { handler },
                None => {
                    captures.clear();
                    let mut allow = MethodSet::default();
                    for i in 0..Method::COUNT {
                        if route.handlers[i].is_some() {
                            if let Some(m) = Method::from_index(i) {
                                allow.insert(m);
                            }
                        }
                    }
                    return Found::MethodNotAllowed { allow };
                }
            }
        }
        captures.clear();
        Found::NotFound
    }
}

fn match_route<H>(
    route: &Route<H>,
    path: &str,
    base: usize,
    captures: &mut Vec<(Arc<str>, Range<usize>)>,
    captures_max: usize,
) -> bool {
    let mut parts = segments_of(path);
    for segment in &route.segments {
        let Some((offset, part)) = parts.next() else {
            return false;
        };
        match segment {
            Segment::Literal(lit) => {
                if &**lit != part {
                    return false;
                }
            }
            Segment::Param(name) => {
                if captures.len() < captures_max {
                    captures.push((name.clone(), base + offset..base + offset + part.len()));
                }
            }
        }
    }
    parts.next().is_none()
}

/// Non-empty `/`-separated segments with their byte offsets. `//` collapses,
/// so `/a/` and `/a` match the same routes.
fn segments_of(path: &str) -> impl Iterator<Item = (usize, &str)> + '_ {
    let bytes = path.as_bytes();
    let mut pos = 0;
    std::iter::from_fn(move || {
        while pos < bytes.len() && bytes[pos] == b'/' {
            pos += 1;
        }
        if pos >= bytes.len() {
            return None;
        }
        let start = pos;
        while pos < bytes.len() && bytes[pos] != b'/' {
            pos += 1;
        }
        Some((start, &path[start..pos]))
    })
}

/// Split a query string into `(key, value)` buffer ranges, at most `max`
/// pairs. A pair without `=` yields an empty value range at the key's end.
pub fn parse_query(query: &str, base: usize, out: &mut Vec<(Range<usize>, Range<usize>)>, max: usize) {
    let mut pos = 0;
    for pair in query.split('&') {
        let offset = pos;
        pos += pair.len() + 1;
        if pair.is_empty() || out.len() >= max {
            continue;
        }
        let start = base + offset;
        match pair.find('=') {
            Some(i) => out.push((start..start + i, start + i + 1..start + pair.len())),
            None => out.push((start..start + pair.len(), start + pair.len()..start + pair.len())),
        }
    }
}
