//! Job analytics dashboard core.
//!
//! - IST clock and the 15:00-17:00 gate window
//! - analytics API client and an in-memory stand-in
//! - refresh orchestration (full, gated, manual, filter-driven)
//! - dashboard lifecycle and HTTP routes

mod api;
mod dashboard;
mod ist_clock;
mod lifecycle;
mod mock_api;
mod observability;
mod orchestrator;
#[cfg(test)]
mod test_env;

pub use api::{
    api_config_from_env, decode_options, decode_records, retry_with_backoff, AnalyticsApiConfig,
    AnalyticsFetcher, Endpoint, EndpointRequest, FetchError, ReqwestAnalyticsFetcher, ALL,
    DEFAULT_API_BASE_URL,
};
pub use dashboard::{
    dashboard_router, render_dashboard_html, top_roles_adjusted, GATE_CLOSED_NOTICE,
    LOADING_NOTICE, NO_DATA_NOTICE,
};
pub use ist_clock::{
    format_ist_timestamp, format_ist_timestamp_at, is_gate_open, is_gate_open_at, ist_offset,
    to_ist, Clock, FixedClock, SystemClock, GATE_CLOSE_HOUR, GATE_OPEN_HOUR, IST_OFFSET_MINUTES,
};
pub use lifecycle::{
    lifecycle_config_from_env, spawn_full_refresh, spawn_gated_timer, DashboardHandle,
    DashboardSource, LifecycleConfig,
};
pub use mock_api::InMemoryMockFetcher;
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_app_stop, log_source_selected,
    logging_config_from_env, LogFormat, LoggingConfig, LoggingInitError,
};
pub use orchestrator::{
    DashboardSnapshot, DataOrchestrator, Datasets, FilterField, FilterSelection, FilterUpdate,
    GatedFetch, GatedTick, OptionLists, RefreshError, RefreshOutcome, RefreshTicket, SlotStatus,
};
