//! Path routing on top of [`matchit`].
//!
//! A path can carry several route items, each with its own filter and handler chain. The first item
//! whose filter matches the request wins:
//!
//! ```
//! use micro_chain::router::{get, post, Router};
//! use micro_chain::{handler_fn, RequestContext};
//!
//! let show = handler_fn(|ctx: &mut RequestContext| {
//!     Box::pin(async move {
//!         let id = ctx.param("id").to_string();
//!         ctx.string(id, None)
//!     })
//! });
//! let update = handler_fn(|ctx: &mut RequestContext| Box::pin(async move { ctx.no_content(None) }));
//!
//! let router = Router::builder()
//!     .route("/users/{id}", get(show).name("user"))
//!     .route("/users/{id}", post(update))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(router.at("/users/7").items().len(), 2);
//! ```

use crate::filter::{self, AllFilter, Filter};
use crate::handler::{BoxHandler, Handler};
use crate::RequestContext;
use http::{HeaderValue, Method};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

type InnerRouter = matchit::Router<usize>;

/// Maps paths to route items.
pub struct Router {
    inner_router: InnerRouter,
    entries: Vec<RouteEntry>,
    names: HashMap<String, String>,
}

struct RouteEntry {
    items: Vec<RouterItem>,
    allow: Option<HeaderValue>,
}

/// A filter and the handler chain it guards.
pub struct RouterItem {
    filter: AllFilter,
    method: Option<Method>,
    handlers: Arc<[BoxHandler]>,
}

/// The route items of a matched path and its parameters.
pub struct RouteResult<'router, 'req> {
    entry: Option<&'router RouteEntry>,
    params: Option<matchit::Params<'router, 'req>>,
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("route name '{name}' is used by both '{first}' and '{second}'")]
    DuplicateName { name: String, first: String, second: String },

    #[error("invalid route '{path}': {source}")]
    Insert { path: String, source: matchit::InsertError },
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Matches `path`, an unknown path yields an empty result.
    pub fn at<'router, 'req>(&'router self, path: &'req str) -> RouteResult<'router, 'req> {
        match self.inner_router.at(path) {
            Ok(matched) => RouteResult { entry: self.entries.get(*matched.value), params: Some(matched.params) },
            Err(e) => {
                trace!(path, cause = %e, "no route matched");
                RouteResult::empty()
            }
        }
    }

    /// The path templates of named routes.
    pub fn names(&self) -> &HashMap<String, String> {
        &self.names
    }

    /// Puts `middleware` in front of every route chain.
    pub(crate) fn prepend(&mut self, middleware: &[BoxHandler]) {
        if middleware.is_empty() {
            return;
        }
        for item in self.entries.iter_mut().flat_map(|entry| entry.items.iter_mut()) {
            item.handlers = middleware.iter().chain(item.handlers.iter()).map(Arc::clone).collect();
        }
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router").field("paths", &self.entries.len()).field("names", &self.names).finish()
    }
}

impl RouterItem {
    /// Whether this item handles the request.
    #[inline]
    pub fn matches(&self, ctx: &RequestContext) -> bool {
        self.filter.matches(ctx)
    }

    /// The method this item is restricted to, `None` for items created with [`any`].
    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    pub fn handlers(&self) -> &Arc<[BoxHandler]> {
        &self.handlers
    }
}

impl fmt::Debug for RouterItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterItem")
            .field("method", &self.method)
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for RouteResult<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteResult").field("items", &self.items()).field("params", &self.params).finish()
    }
}

impl<'router, 'req> RouteResult<'router, 'req> {
    fn empty() -> Self {
        Self { entry: None, params: None }
    }

    /// Returns true if no path matched.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }

    pub fn items(&self) -> &'router [RouterItem] {
        self.entry.map(|entry| entry.items.as_slice()).unwrap_or_default()
    }

    /// Iterates over `(name, value)` path parameters.
    pub fn params(&self) -> impl Iterator<Item = (&'router str, &'req str)> + '_ {
        self.params.iter().flat_map(matchit::Params::iter)
    }

    /// The `Allow` header value of the matched path, `None` if an item accepts any method.
    pub fn allow(&self) -> Option<&'router HeaderValue> {
        self.entry.and_then(|entry| entry.allow.as_ref())
    }
}

/// Collects routes and checks them when building.
pub struct RouterBuilder {
    paths: Vec<(String, Vec<RouterItemBuilder>)>,
}

impl RouterBuilder {
    fn new() -> Self {
        Self { paths: Vec::new() }
    }

    pub fn route(mut self, route: impl Into<String>, item_builder: RouterItemBuilder) -> Self {
        let route = route.into();
        match self.paths.iter_mut().find(|(path, _)| *path == route) {
            Some((_, items)) => items.push(item_builder),
            None => self.paths.push((route, vec![item_builder])),
        }
        self
    }

    pub fn build(self) -> Result<Router, RouterError> {
        let mut inner_router = InnerRouter::new();
        let mut entries = Vec::with_capacity(self.paths.len());
        let mut names: HashMap<String, String> = HashMap::new();

        for (path, item_builders) in self.paths {
            for name in item_builders.iter().filter_map(|item| item.name.as_deref()) {
                if let Some(first) = names.get(name) {
                    if *first != path {
                        return Err(RouterError::DuplicateName {
                            name: name.to_string(),
                            first: first.clone(),
                            second: path,
                        });
                    }
                    continue;
                }
                names.insert(name.to_string(), path.clone());
            }

            inner_router
                .insert(path.clone(), entries.len())
                .map_err(|source| RouterError::Insert { path: path.clone(), source })?;

            let items = item_builders.into_iter().map(RouterItemBuilder::build).collect::<Vec<_>>();
            let allow = allow_header(&items);
            entries.push(RouteEntry { items, allow });
        }

        Ok(Router { inner_router, entries, names })
    }
}

impl fmt::Debug for RouterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.paths.iter().map(|(path, _)| path)).finish()
    }
}

fn allow_header(items: &[RouterItem]) -> Option<HeaderValue> {
    let mut methods: Vec<&str> = Vec::with_capacity(items.len());
    for item in items {
        let method = item.method()?.as_str();
        if !methods.contains(&method) {
            methods.push(method);
        }
    }
    HeaderValue::from_str(&methods.join(", ")).ok()
}

macro_rules! method_router_filter {
    ($method:ident, $method_name:ident, $upper_case_method:ident) => {
        #[doc = concat!("Creates a route item for HTTP ", stringify!($upper_case_method), " requests.")]
        pub fn $method<H: Handler + 'static>(handler: H) -> RouterItemBuilder {
            let mut filters = filter::all_filter();
            filters.and(filter::$method_name());
            RouterItemBuilder {
                filters,
                method: Some(Method::$upper_case_method),
                handlers: vec![Arc::new(handler)],
                name: None,
            }
        }
    };
}

method_router_filter!(get, get_method, GET);
method_router_filter!(post, post_method, POST);
method_router_filter!(put, put_method, PUT);
method_router_filter!(delete, delete_method, DELETE);
method_router_filter!(head, head_method, HEAD);
method_router_filter!(options, options_method, OPTIONS);
method_router_filter!(connect, connect_method, CONNECT);
method_router_filter!(patch, patch_method, PATCH);
method_router_filter!(trace, trace_method, TRACE);

/// Creates a route item accepting every method.
pub fn any<H: Handler + 'static>(handler: H) -> RouterItemBuilder {
    RouterItemBuilder { filters: filter::all_filter(), method: None, handlers: vec![Arc::new(handler)], name: None }
}

pub struct RouterItemBuilder {
    filters: AllFilter,
    method: Option<Method>,
    handlers: Vec<BoxHandler>,
    name: Option<String>,
}

impl RouterItemBuilder {
    /// Appends a handler to the chain of this item.
    pub fn and<H: Handler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn with<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.filters.and(filter);
        self
    }

    /// Names the route so [`RequestContext::url`] can build its path.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn build(self) -> RouterItem {
        RouterItem { filter: self.filters, method: self.method, handlers: self.handlers.into() }
    }
}

impl fmt::Debug for RouterItemBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterItemBuilder")
            .field("method", &self.method)
            .field("handlers", &self.handlers.len())
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Fills `{name}` and `{*name}` tokens of a route template with query-escaped values.
pub(crate) fn build_url(template: &str, pairs: &[(&str, &str)]) -> String {
    let mut url = template.to_string();
    for (name, value) in pairs {
        let escaped = url::form_urlencoded::byte_serialize(value.as_bytes()).collect::<String>();
        url = url.replace(&format!("{{{name}}}"), &escaped).replace(&format!("{{*{name}}}"), &escaped);
    }
    url
}
