//! # Request Metrics
//!
//! [`RequestMetrics`] is a per-request collector. It is created for one incoming request
//! (or one outgoing resolution chain), shared via `Arc` with the client and renderer that
//! serve it, and dropped when the response has been emitted. It is never a global.
//!
//! It records
//! - every upstream response (uri, title, max-age, response time),
//! - invocation times of resource methods, grouped by category,
//! - an optional cap for the max-age of the response being built,
//!
//! and derives the overall `max-age` and the debug metadata resource from them.

use crate::config::InvocationAggregation;
use crate::model::{HalResource, Link};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

/// Upper bound for any computed max-age.
pub const MAX_AGE_LIMIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub const RESPONSE_TIMES: &str = "metrics:responseTimes";
pub const INVOCATION_TIMES: &str = "metrics:invocationTimes";
pub const MAX_AGES: &str = "metrics:maxAge";
pub const SOURCE: &str = "via";

/// An upstream response that contributed to the current request.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceResponse {
    pub uri: String,
    pub title: Option<String>,
    pub max_age: Option<u64>,
    pub response_time: Duration,
}

impl SourceResponse {
    fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.uri)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodInvocation {
    pub description: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default)]
struct MetricsState {
    responses: Vec<SourceResponse>,
    invocations: BTreeMap<String, Vec<MethodInvocation>>,
    max_age_cap: Option<Duration>,
}

impl MetricsState {
    fn response_max_age(&self) -> Option<Duration> {
        let upstream = self
            .responses
            .iter()
            .filter_map(|r| r.max_age)
            .min()
            .map(Duration::from_secs);
        match (self.max_age_cap, upstream) {
            (None, None) => None,
            (cap, upstream) => Some(
                cap.unwrap_or(MAX_AGE_LIMIT)
                    .min(upstream.or(cap).unwrap_or(MAX_AGE_LIMIT)),
            ),
        }
    }
}

/// Per-request collector of upstream responses and invocation timings.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    state: Mutex<MetricsState>,
    aggregation: InvocationAggregation,
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_aggregation(aggregation: InvocationAggregation) -> Self {
        Self {
            state: Mutex::default(),
            aggregation,
        }
    }

    pub fn on_response_retrieved(
        &self,
        uri: &str,
        title: Option<String>,
        max_age: Option<u64>,
        response_time: Duration,
    ) {
        self.state.lock().responses.push(SourceResponse {
            uri: uri.to_string(),
            title,
            max_age,
            response_time,
        });
    }

    pub fn on_method_invocation_finished(&self, category: &str, description: String, duration: Duration) {
        self.state
            .lock()
            .invocations
            .entry(category.to_string())
            .or_default()
            .push(MethodInvocation {
                description,
                duration,
            });
    }

    /// Tightens the max-age of the response; the minimum of all calls wins.
    pub fn set_response_max_age(&self, max_age: Duration) {
        let mut state = self.state.lock();
        state.max_age_cap = Some(state.max_age_cap.map_or(max_age, |cap| cap.min(max_age)));
    }

    /// `min(cap or 365 days, min(upstream max-ages) or cap)`; `None` if neither exists.
    pub fn response_max_age(&self) -> Option<Duration> {
        self.state.lock().response_max_age()
    }

    pub fn source_responses(&self) -> Vec<SourceResponse> {
        self.state.lock().responses.clone()
    }

    pub fn invocations(&self, category: &str) -> Vec<MethodInvocation> {
        self.state
            .lock()
            .invocations
            .get(category)
            .cloned()
            .unwrap_or_default()
    }

    /// Builds the debug resource from a point-in-time snapshot of the collected data.
    ///
    /// Responses recorded after this call are not part of the returned resource.
    pub fn create_metadata_resource(&self, request_uri: &str) -> HalResource {
        let snapshot = self.state.lock().clone();
        let responses = &snapshot.responses;

        let sum_of_response_times: Duration = responses.iter().map(|r| r.response_time).sum();
        let max_response_time = responses.iter().map(|r| r.response_time).max();
        let sum_of_invocation_times: Duration = snapshot
            .invocations
            .values()
            .flatten()
            .map(|i| i.duration)
            .sum();

        let mut metadata = HalResource::new();
        let state = json!({
            "title": format!("Metadata for the request to {request_uri}"),
            "upstreamResponseCount": responses.len(),
            "sumOfResponseTimesMs": millis(sum_of_response_times),
            "maxResponseTimeMs": max_response_time.map(millis),
            "sumOfInvocationTimesMs": millis(sum_of_invocation_times),
            "maxAgeSeconds": snapshot.response_max_age().map(|d| d.as_secs()),
        });
        // json! objects always serialize into an object
        let _ = metadata.set_state(state);

        let sources = responses
            .iter()
            .map(|r| Link::new(r.uri.clone()).title(r.label()))
            .collect();
        metadata.add_links(SOURCE, sources);

        metadata.set_embedded(RESPONSE_TIMES, response_times(responses));
        metadata.add_embedded(
            INVOCATION_TIMES,
            invocation_times(&snapshot.invocations, self.aggregation),
        );
        metadata.set_embedded(MAX_AGES, max_ages(responses));
        metadata
    }
}

fn millis(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 1_000_000.0).round() / 1_000.0
}

fn response_times(responses: &[SourceResponse]) -> HalResource {
    let mut sorted: Vec<&SourceResponse> = responses.iter().collect();
    sorted.sort_by(|a, b| b.response_time.cmp(&a.response_time));

    let mut resource = HalResource::new();
    let _ = resource.set_state(json!({
        "title": "Response times of upstream resources, longest first",
    }));
    let links = sorted
        .into_iter()
        .map(|r| Link::new(r.uri.clone()).title(format!("{}ms - {}", millis(r.response_time), r.label())))
        .collect();
    resource.add_links(SOURCE, links);
    resource
}

fn max_ages(responses: &[SourceResponse]) -> HalResource {
    let mut with_max_age: Vec<(&SourceResponse, u64)> = responses
        .iter()
        .filter_map(|r| r.max_age.map(|age| (r, age)))
        .collect();
    with_max_age.sort_by(|a, b| b.1.cmp(&a.1));

    let mut resource = HalResource::new();
    let _ = resource.set_state(json!({
        "title": "Max-age of upstream resources, longest first",
    }));
    let links = with_max_age
        .into_iter()
        .map(|(r, age)| Link::new(r.uri.clone()).title(format!("{age}s - {}", r.label())))
        .collect();
    resource.add_links(SOURCE, links);
    resource
}

fn invocation_times(
    invocations: &BTreeMap<String, Vec<MethodInvocation>>,
    aggregation: InvocationAggregation,
) -> Vec<HalResource> {
    invocations
        .iter()
        .map(|(category, calls)| {
            let mut grouped: Vec<(&str, Duration, usize)> = Vec::new();
            for call in calls {
                match grouped.iter_mut().find(|(d, _, _)| *d == call.description) {
                    Some((_, total, count)) => {
                        *total = match aggregation {
                            InvocationAggregation::Sum => *total + call.duration,
                            InvocationAggregation::Max => (*total).max(call.duration),
                        };
                        *count += 1;
                    }
                    None => grouped.push((call.description.as_str(), call.duration, 1)),
                }
            }
            grouped.sort_by(|a, b| b.1.cmp(&a.1));

            let methods: Vec<_> = grouped
                .into_iter()
                .map(|(method, duration, count)| {
                    json!({ "method": method, "durationMs": millis(duration), "invocations": count })
                })
                .collect();
            let mut resource = HalResource::new();
            let _ = resource.set_state(json!({
                "title": format!("Invocation times of '{category}' methods, longest first"),
                "category": category,
                "methods": methods,
            }));
            resource
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn minimum_max_age_wins_regardless_of_order() {
        let metrics = RequestMetrics::new();
        metrics.set_response_max_age(Duration::from_secs(55));
        metrics.set_response_max_age(Duration::from_secs(123));
        assert_eq!(metrics.response_max_age(), Some(Duration::from_secs(55)));

        let reversed = RequestMetrics::new();
        reversed.set_response_max_age(Duration::from_secs(123));
        reversed.set_response_max_age(Duration::from_secs(55));
        assert_eq!(reversed.response_max_age(), Some(Duration::from_secs(55)));
    }

    #[test]
    fn max_age_is_none_without_inputs() {
        let metrics = RequestMetrics::new();
        assert_eq!(metrics.response_max_age(), None);
        metrics.on_response_retrieved("/a", None, None, ms(3));
        assert_eq!(metrics.response_max_age(), None);
    }

    #[test]
    fn upstream_max_age_limits_the_response() {
        let metrics = RequestMetrics::new();
        metrics.on_response_retrieved("/a", None, Some(120), ms(3));
        metrics.on_response_retrieved("/b", None, Some(30), ms(4));
        assert_eq!(metrics.response_max_age(), Some(Duration::from_secs(30)));

        metrics.set_response_max_age(Duration::from_secs(10));
        assert_eq!(metrics.response_max_age(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn upstream_max_age_is_bounded_by_one_year() {
        let metrics = RequestMetrics::new();
        metrics.on_response_retrieved("/a", None, Some(u64::MAX / 2), ms(1));
        assert_eq!(metrics.response_max_age(), Some(MAX_AGE_LIMIT));
    }

    #[test]
    fn metadata_is_a_point_in_time_snapshot() {
        let metrics = RequestMetrics::new();
        metrics.on_response_retrieved("/slow", Some("Slow".into()), Some(60), ms(200));
        metrics.on_response_retrieved("/fast", None, Some(600), ms(5));

        let metadata = metrics.create_metadata_resource("/request");
        metrics.on_response_retrieved("/late", None, Some(1), ms(999));

        assert_eq!(metadata.property("upstreamResponseCount"), Some(&Value::from(2)));
        assert_eq!(metadata.property("maxAgeSeconds"), Some(&Value::from(60)));
        let sources: Vec<String> = metadata.links(SOURCE).into_iter().map(|l| l.href).collect();
        assert_eq!(sources, vec!["/slow", "/fast"]);
        assert_eq!(metrics.source_responses().len(), 3);
    }

    #[test]
    fn timings_and_max_ages_are_sorted_longest_first() {
        let metrics = RequestMetrics::new();
        metrics.on_response_retrieved("/a", None, Some(10), ms(5));
        metrics.on_response_retrieved("/b", None, Some(300), ms(50));
        metrics.on_response_retrieved("/c", None, None, ms(20));

        let metadata = metrics.create_metadata_resource("/");
        let times: Vec<String> = metadata.embedded(RESPONSE_TIMES)[0]
            .links(SOURCE)
            .into_iter()
            .map(|l| l.href)
            .collect();
        assert_eq!(times, vec!["/b", "/c", "/a"]);

        let ages = metadata.embedded(MAX_AGES)[0].links(SOURCE);
        assert_eq!(ages.len(), 2);
        assert_eq!(ages[0].title.as_deref(), Some("300s - /b"));
    }

    #[test]
    fn invocation_times_are_grouped_by_method() {
        let metrics = RequestMetrics::with_aggregation(InvocationAggregation::Sum);
        metrics.on_method_invocation_finished("server", "Item#state".into(), ms(2));
        metrics.on_method_invocation_finished("server", "Catalog#item".into(), ms(3));
        metrics.on_method_invocation_finished("server", "Item#state".into(), ms(2));

        let metadata = metrics.create_metadata_resource("/");
        let categories = metadata.embedded(INVOCATION_TIMES);
        assert_eq!(categories.len(), 1);
        let methods = categories[0].property("methods").unwrap().as_array().unwrap().clone();
        assert_eq!(methods[0]["method"], "Item#state");
        assert_eq!(methods[0]["durationMs"], 4.0);
        assert_eq!(methods[0]["invocations"], 2);
        assert_eq!(methods[1]["method"], "Catalog#item");
    }

    #[test]
    fn max_aggregation_keeps_the_longest_invocation() {
        let metrics = RequestMetrics::with_aggregation(InvocationAggregation::Max);
        metrics.on_method_invocation_finished("client", "Item#state".into(), ms(2));
        metrics.on_method_invocation_finished("client", "Item#state".into(), ms(7));

        let metadata = metrics.create_metadata_resource("/");
        let methods = metadata.embedded(INVOCATION_TIMES)[0]
            .property("methods")
            .unwrap()
            .clone();
        assert_eq!(methods[0]["durationMs"], 7.0);
    }
}
