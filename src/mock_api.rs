//! In-memory analytics fetcher with scripted responses and a request log.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use serde_json::{json, Value};

use crate::api::{AnalyticsFetcher, Endpoint, EndpointRequest, FetchError, ALL};

#[derive(Debug, Clone)]
enum Scripted {
    Body(Value),
    Failure(String),
}

#[derive(Debug, Clone)]
struct MockRoute {
    reply: Scripted,
    delay: Option<Duration>,
}

/// Routes are keyed by endpoint plus an optional filter value; a route
/// without a filter value answers every request to that endpoint that has no
/// more specific route.
#[derive(Debug, Default)]
pub struct InMemoryMockFetcher {
    routes: RwLock<HashMap<(Endpoint, Option<String>), MockRoute>>,
    calls: Mutex<Vec<EndpointRequest>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Decrements the in-flight count when a request finishes or is dropped.
struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryMockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned job-market figures for running the dashboard offline.
    pub fn demo() -> Self {
        let fetcher = Self::new();
        let work_types = ["Full-Time", "Part-Time", "Intern", "Contract", "Temporary"];
        let qualifications = ["B.Tech", "BBA", "BCA", "M.Tech", "MBA", "PhD"];
        let experience_levels = ["0 to 2 Years", "2 to 5 Years", "5 to 10 Years", "10+ Years"];

        fetcher.set_response(Endpoint::WorkTypes, json!(work_types));
        fetcher.set_response(Endpoint::Qualifications, json!(qualifications));
        fetcher.set_response(Endpoint::ExperienceLevels, json!(experience_levels));

        let work_type_counts = [3_412, 1_187, 905, 764, 402];
        let work_type_rows: Vec<Value> = work_types
            .iter()
            .zip(work_type_counts)
            .map(|(name, count)| json!({ "name": name, "count": count }))
            .collect();
        fetcher.set_filtered_rows(
            Endpoint::WorkTypeDistribution,
            &work_types,
            &work_type_rows,
        );

        let qualification_counts = [2_230, 610, 884, 1_342, 1_051, 176];
        let qualification_rows: Vec<Value> = qualifications
            .iter()
            .zip(qualification_counts)
            .map(|(qualification, count)| json!({ "qualification": qualification, "count": count }))
            .collect();
        fetcher.set_filtered_rows(
            Endpoint::QualificationDistribution,
            &qualifications,
            &qualification_rows,
        );

        let experience_counts = [2_871, 2_105, 1_204, 490];
        let experience_rows: Vec<Value> = experience_levels
            .iter()
            .zip(experience_counts)
            .map(|(level, count)| json!({ "level": level, "count": count }))
            .collect();
        fetcher.set_filtered_rows(
            Endpoint::ExperienceDistribution,
            &experience_levels,
            &experience_rows,
        );

        fetcher.set_response(
            Endpoint::SalaryRangeDistribution,
            json!([
                { "range": "$50K-$70K", "count": 1_420 },
                { "range": "$70K-$90K", "count": 2_016 },
                { "range": "$90K-$110K", "count": 1_733 },
                { "range": "$110K+", "count": 698 },
            ]),
        );
        fetcher.set_response(
            Endpoint::JobPortalDistribution,
            json!([
                { "name": "Idealist", "value": 1_210 },
                { "name": "Indeed", "value": 1_876 },
                { "name": "LinkedIn", "value": 2_034 },
                { "name": "Glassdoor", "value": 947 },
                { "name": "FlexJobs", "value": 603 },
            ]),
        );
        fetcher.set_response(
            Endpoint::JobPostingsTrend,
            json!([
                { "month": "2023-01", "postings": 512 },
                { "month": "2023-02", "postings": 548 },
                { "month": "2023-03", "postings": 601 },
                { "month": "2023-04", "postings": 587 },
                { "month": "2023-05", "postings": 634 },
                { "month": "2023-06", "postings": 659 },
            ]),
        );
        fetcher.set_response(
            Endpoint::Top10Companies,
            json!([
                { "Company": "Northwind Analytics", "Count": 14 },
                { "Company": "Blue Harbor Data", "Count": 11 },
                { "Company": "Quantica Labs", "Count": 9 },
            ]),
        );
        fetcher.set_response(
            Endpoint::CompanySizeVsName,
            json!([
                { "Company": "Ironclad Motors", "Company Size": 42_150 },
                { "Company": "Delta Forge", "Company Size": 18_900 },
            ]),
        );

        fetcher
    }

    pub fn set_response(&self, endpoint: Endpoint, body: Value) {
        self.insert(endpoint, None, Scripted::Body(body));
    }

    pub fn set_response_for(&self, endpoint: Endpoint, filter_value: &str, body: Value) {
        self.insert(endpoint, Some(filter_value.to_string()), Scripted::Body(body));
    }

    /// Every request to `endpoint` fails with a transport error.
    pub fn set_failure(&self, endpoint: Endpoint, message: &str) {
        self.insert(endpoint, None, Scripted::Failure(message.to_string()));
    }

    pub fn set_delay(&self, endpoint: Endpoint, filter_value: Option<&str>, delay: Duration) {
        let key = (endpoint, filter_value.map(str::to_string));
        let mut routes = self
            .routes
            .write()
            .expect("mock route lock should not be poisoned");
        if let Some(route) = routes.get_mut(&key) {
            route.delay = Some(delay);
            return;
        }
        let reply = routes
            .get(&(endpoint, None))
            .map(|route| route.reply.clone())
            .unwrap_or(Scripted::Body(json!([])));
        routes.insert(
            key,
            MockRoute {
                reply,
                delay: Some(delay),
            },
        );
    }

    pub fn calls(&self) -> Vec<EndpointRequest> {
        self.calls
            .lock()
            .expect("mock call log lock should not be poisoned")
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .expect("mock call log lock should not be poisoned")
            .len()
    }

    pub fn calls_to(&self, endpoint: Endpoint) -> usize {
        self.calls
            .lock()
            .expect("mock call log lock should not be poisoned")
            .iter()
            .filter(|call| call.endpoint == endpoint)
            .count()
    }

    /// Highest number of requests that were outstanding at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn reset_peak_in_flight(&self) {
        self.peak_in_flight
            .store(self.in_flight.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    fn set_filtered_rows(&self, endpoint: Endpoint, values: &[&str], rows: &[Value]) {
        self.set_response(endpoint, json!(rows));
        self.set_response_for(endpoint, ALL, json!(rows));
        for (value, row) in values.iter().zip(rows) {
            self.set_response_for(endpoint, value, json!([row]));
        }
    }

    fn insert(&self, endpoint: Endpoint, filter_value: Option<String>, reply: Scripted) {
        let mut routes = self
            .routes
            .write()
            .expect("mock route lock should not be poisoned");
        let delay = routes
            .get(&(endpoint, filter_value.clone()))
            .and_then(|route| route.delay);
        routes.insert((endpoint, filter_value), MockRoute { reply, delay });
    }

    fn route_for(&self, request: &EndpointRequest) -> Option<MockRoute> {
        let routes = self
            .routes
            .read()
            .expect("mock route lock should not be poisoned");
        let specific = request
            .query()
            .and_then(|(_, value)| routes.get(&(request.endpoint, Some(value.to_string()))));
        specific
            .or_else(|| routes.get(&(request.endpoint, None)))
            .cloned()
    }
}

impl AnalyticsFetcher for InMemoryMockFetcher {
    async fn fetch(&self, request: &EndpointRequest) -> Result<Value, FetchError> {
        self.calls
            .lock()
            .expect("mock call log lock should not be poisoned")
            .push(request.clone());

        let outstanding = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(outstanding, Ordering::SeqCst);
        let _in_flight = InFlight {
            counter: &self.in_flight,
        };

        let Some(route) = self.route_for(request) else {
            return Err(FetchError::Status {
                endpoint: request.endpoint,
                status: 404,
            });
        };

        if let Some(delay) = route.delay {
            tokio::time::sleep(delay).await;
        }

        match route.reply {
            Scripted::Body(body) => Ok(body),
            Scripted::Failure(message) => Err(FetchError::Transport {
                endpoint: request.endpoint,
                message,
            }),
        }
    }
}
