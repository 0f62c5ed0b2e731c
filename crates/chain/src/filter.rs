//! Composable request predicates.
//!
//! Filters decide which route item of a matched path handles a request (method and header filters)
//! and whether a middleware should step aside for a request, see
//! [`BodyLimitConfig::skipper`](crate::limit::BodyLimitConfig::skipper).
//!
//! ```
//! use micro_chain::filter::{all_filter, get_method, header};
//!
//! let mut filter = all_filter();
//! filter.and(get_method()).and(header("x-api-version", "2").unwrap());
//! ```
//!
//! ## Thread Safety
//!
//! `Filter` requires `Send + Sync`: one filter instance is checked by every request task.

use crate::RequestContext;
use http::{HeaderName, HeaderValue, Method};
use std::fmt;

/// Core trait for request filtering.
pub trait Filter: Send + Sync {
    /// Returns `true` if the request matches this filter's criteria.
    fn matches(&self, ctx: &RequestContext) -> bool;
}

/// A filter that wraps a closure.
struct FnFilter<F>(F);

impl<F: Fn(&RequestContext) -> bool + Send + Sync> Filter for FnFilter<F> {
    fn matches(&self, ctx: &RequestContext) -> bool {
        (self.0)(ctx)
    }
}

/// Creates a new filter from a closure.
///
/// ```
/// use micro_chain::filter::fn_filter;
///
/// let api_only = fn_filter(|ctx| ctx.uri().path().starts_with("/api"));
/// ```
pub fn fn_filter<F>(f: F) -> impl Filter
where
    F: Fn(&RequestContext) -> bool + Send + Sync,
{
    FnFilter(f)
}

/// Creates a filter that always returns true.
pub fn true_filter() -> TrueFilter {
    TrueFilter
}

/// Creates a filter that always returns false.
pub fn false_filter() -> FalseFilter {
    FalseFilter
}

/// A filter that always returns true.
#[derive(Debug, Clone, Copy)]
pub struct TrueFilter;
impl Filter for TrueFilter {
    #[inline]
    fn matches(&self, _ctx: &RequestContext) -> bool {
        true
    }
}

/// A filter that always returns false.
#[derive(Debug, Clone, Copy)]
pub struct FalseFilter;
impl Filter for FalseFilter {
    #[inline]
    fn matches(&self, _ctx: &RequestContext) -> bool {
        false
    }
}

/// Creates a new OR-composed filter chain.
pub fn any_filter() -> AnyFilter {
    AnyFilter::new()
}

/// Compose filters with OR logic.
///
/// An empty filter chain returns true.
pub struct AnyFilter {
    filters: Vec<Box<dyn Filter>>,
}

impl AnyFilter {
    fn new() -> Self {
        Self { filters: vec![] }
    }

    /// Add a new filter to the OR chain.
    pub fn or<F: Filter + 'static>(&mut self, filter: F) -> &mut Self {
        self.filters.push(Box::new(filter));
        self
    }
}

impl fmt::Debug for AnyFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyFilter").field("filters", &self.filters.len()).finish()
    }
}

impl Filter for AnyFilter {
    fn matches(&self, ctx: &RequestContext) -> bool {
        self.filters.is_empty() || self.filters.iter().any(|filter| filter.matches(ctx))
    }
}

/// Creates a new AND-composed filter chain.
pub fn all_filter() -> AllFilter {
    AllFilter::new()
}

/// Compose filters with AND logic.
///
/// An empty filter chain returns true.
pub struct AllFilter {
    filters: Vec<Box<dyn Filter>>,
}

impl AllFilter {
    fn new() -> Self {
        Self { filters: vec![] }
    }

    /// Add a new filter to the AND chain.
    pub fn and<F: Filter + 'static>(&mut self, filter: F) -> &mut Self {
        self.filters.push(Box::new(filter));
        self
    }
}

impl fmt::Debug for AllFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllFilter").field("filters", &self.filters.len()).finish()
    }
}

impl Filter for AllFilter {
    fn matches(&self, ctx: &RequestContext) -> bool {
        self.filters.iter().all(|filter| filter.matches(ctx))
    }
}

/// A filter that matches an HTTP method.
#[derive(Debug, Clone)]
pub struct MethodFilter(Method);

impl MethodFilter {
    pub fn method(&self) -> &Method {
        &self.0
    }
}

impl Filter for MethodFilter {
    fn matches(&self, ctx: &RequestContext) -> bool {
        self.0.eq(ctx.method())
    }
}

macro_rules! method_filter {
    ($method:ident, $upper_case_method:ident) => {
        #[doc = concat!("Creates a filter that matches HTTP ", stringify!($upper_case_method), " requests.")]
        #[inline]
        pub fn $method() -> MethodFilter {
            MethodFilter(Method::$upper_case_method)
        }
    };
}

method_filter!(get_method, GET);
method_filter!(post_method, POST);
method_filter!(put_method, PUT);
method_filter!(delete_method, DELETE);
method_filter!(head_method, HEAD);
method_filter!(options_method, OPTIONS);
method_filter!(connect_method, CONNECT);
method_filter!(patch_method, PATCH);
method_filter!(trace_method, TRACE);

/// Creates a filter that matches a header with exactly the given value.
#[inline]
pub fn header<K, V>(header_name: K, header_value: V) -> Result<HeaderFilter, http::Error>
where
    HeaderName: TryFrom<K>,
    <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
    HeaderValue: TryFrom<V>,
    <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
{
    let name = <HeaderName as TryFrom<K>>::try_from(header_name).map_err(Into::into)?;
    let value = <HeaderValue as TryFrom<V>>::try_from(header_value).map_err(Into::into)?;
    Ok(HeaderFilter(name, value))
}

/// A filter that matches an HTTP header.
#[derive(Debug, Clone)]
pub struct HeaderFilter(HeaderName, HeaderValue);

impl Filter for HeaderFilter {
    fn matches(&self, ctx: &RequestContext) -> bool {
        ctx.headers().get(&self.0).is_some_and(|value| self.1.eq(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;

    fn ctx(method: Method, content_type: Option<&'static str>) -> RequestContext {
        let mut builder = Request::builder().method(method).uri("/api/users");
        if let Some(content_type) = content_type {
            builder = builder.header(http::header::CONTENT_TYPE, content_type);
        }
        RequestContext::new(builder.body(()).unwrap(), vec![])
    }

    #[test]
    fn method_filters() {
        let get = ctx(Method::GET, None);
        assert!(get_method().matches(&get));
        assert!(!post_method().matches(&get));
        assert_eq!(put_method().method(), &Method::PUT);
    }

    #[test]
    fn header_filter() {
        let filter = header(http::header::CONTENT_TYPE, "application/x-www-form-urlencoded").unwrap();
        assert!(filter.matches(&ctx(Method::POST, Some("application/x-www-form-urlencoded"))));
        assert!(!filter.matches(&ctx(Method::POST, Some("application/json"))));
        assert!(!filter.matches(&ctx(Method::POST, None)));
    }

    #[test]
    fn invalid_header_filter() {
        assert!(header("bad header", "value").is_err());
    }

    #[test]
    fn composed_filters() {
        let mut all = all_filter();
        all.and(post_method()).and(fn_filter(|ctx| ctx.uri().path().starts_with("/api")));
        assert!(all.matches(&ctx(Method::POST, None)));
        assert!(!all.matches(&ctx(Method::GET, None)));

        let mut any = any_filter();
        any.or(false_filter()).or(get_method());
        assert!(any.matches(&ctx(Method::GET, None)));
        assert!(!any.matches(&ctx(Method::DELETE, None)));

        assert!(any_filter().matches(&ctx(Method::GET, None)));
        assert!(all_filter().matches(&ctx(Method::GET, None)));
        assert!(true_filter().matches(&ctx(Method::GET, None)));
    }
}
