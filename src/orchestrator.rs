//! Dashboard state and the refresh protocol that fills it.
//!
//! All reads and writes of [`DashboardSnapshot`] go through
//! [`DataOrchestrator`]. Every write is tagged with the generation captured
//! when its request was issued; a write whose generation is no longer current
//! is dropped. A full refresh advances the generation, as does teardown.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{
    decode_options, decode_records, AnalyticsFetcher, Endpoint, EndpointRequest, FetchError, ALL,
};
use crate::ist_clock::{format_ist_timestamp_at, is_gate_open_at, Clock, SystemClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterField {
    WorkType,
    Qualification,
    Experience,
}

impl FilterField {
    pub const ALL_FIELDS: [FilterField; 3] = [
        FilterField::WorkType,
        FilterField::Qualification,
        FilterField::Experience,
    ];

    pub fn distribution_endpoint(self) -> Endpoint {
        match self {
            Self::WorkType => Endpoint::WorkTypeDistribution,
            Self::Qualification => Endpoint::QualificationDistribution,
            Self::Experience => Endpoint::ExperienceDistribution,
        }
    }

    pub fn query_param(self) -> &'static str {
        match self {
            Self::WorkType => "workType",
            Self::Qualification => "qualification",
            Self::Experience => "experience",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSelection {
    pub work_type: String,
    pub qualification: String,
    pub experience: String,
}

impl Default for FilterSelection {
    fn default() -> Self {
        Self {
            work_type: ALL.to_string(),
            qualification: ALL.to_string(),
            experience: ALL.to_string(),
        }
    }
}

impl FilterSelection {
    pub fn get(&self, field: FilterField) -> &str {
        match field {
            FilterField::WorkType => &self.work_type,
            FilterField::Qualification => &self.qualification,
            FilterField::Experience => &self.experience,
        }
    }

    /// Returns whether the selection actually changed.
    pub fn set(&mut self, field: FilterField, value: &str) -> bool {
        let slot = match field {
            FilterField::WorkType => &mut self.work_type,
            FilterField::Qualification => &mut self.qualification,
            FilterField::Experience => &mut self.experience,
        };
        if slot.as_str() == value {
            return false;
        }
        *slot = value.to_string();
        true
    }
}

/// Partial filter change; absent fields keep their current selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterUpdate {
    pub work_type: Option<String>,
    pub qualification: Option<String>,
    pub experience: Option<String>,
}

impl FilterUpdate {
    pub fn single(field: FilterField, value: impl Into<String>) -> Self {
        let mut update = Self::default();
        let value = Some(value.into());
        match field {
            FilterField::WorkType => update.work_type = value,
            FilterField::Qualification => update.qualification = value,
            FilterField::Experience => update.experience = value,
        }
        update
    }

    fn entries(&self) -> impl Iterator<Item = (FilterField, &str)> {
        [
            (FilterField::WorkType, self.work_type.as_deref()),
            (FilterField::Qualification, self.qualification.as_deref()),
            (FilterField::Experience, self.experience.as_deref()),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.map(|value| (field, value)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionLists {
    pub work_types: Vec<String>,
    pub qualifications: Vec<String>,
    pub experience_levels: Vec<String>,
}

impl OptionLists {
    pub fn get(&self, field: FilterField) -> &[String] {
        match field {
            FilterField::WorkType => &self.work_types,
            FilterField::Qualification => &self.qualifications,
            FilterField::Experience => &self.experience_levels,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Datasets {
    pub work_type_distribution: Vec<Value>,
    pub qualification_distribution: Vec<Value>,
    pub experience_distribution: Vec<Value>,
    pub salary_range_distribution: Vec<Value>,
    pub job_portal_distribution: Vec<Value>,
    pub job_postings_trend: Vec<Value>,
    pub top_10_companies: Vec<Value>,
    pub company_size_vs_name: Vec<Value>,
}

impl Datasets {
    pub fn get(&self, endpoint: Endpoint) -> Option<&[Value]> {
        let records = match endpoint {
            Endpoint::WorkTypeDistribution => &self.work_type_distribution,
            Endpoint::QualificationDistribution => &self.qualification_distribution,
            Endpoint::ExperienceDistribution => &self.experience_distribution,
            Endpoint::SalaryRangeDistribution => &self.salary_range_distribution,
            Endpoint::JobPortalDistribution => &self.job_portal_distribution,
            Endpoint::JobPostingsTrend => &self.job_postings_trend,
            Endpoint::Top10Companies => &self.top_10_companies,
            Endpoint::CompanySizeVsName => &self.company_size_vs_name,
            Endpoint::WorkTypes | Endpoint::Qualifications | Endpoint::ExperienceLevels => {
                return None
            }
        };
        Some(records)
    }

    fn slot_mut(&mut self, endpoint: Endpoint) -> Option<&mut Vec<Value>> {
        let records = match endpoint {
            Endpoint::WorkTypeDistribution => &mut self.work_type_distribution,
            Endpoint::QualificationDistribution => &mut self.qualification_distribution,
            Endpoint::ExperienceDistribution => &mut self.experience_distribution,
            Endpoint::SalaryRangeDistribution => &mut self.salary_range_distribution,
            Endpoint::JobPortalDistribution => &mut self.job_portal_distribution,
            Endpoint::JobPostingsTrend => &mut self.job_postings_trend,
            Endpoint::Top10Companies => &mut self.top_10_companies,
            Endpoint::CompanySizeVsName => &mut self.company_size_vs_name,
            Endpoint::WorkTypes | Endpoint::Qualifications | Endpoint::ExperienceLevels => {
                return None
            }
        };
        Some(records)
    }
}

/// Freshness of one state slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotStatus {
    pub last_updated: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub loading: bool,
    pub current_ist_time: String,
    pub gate_open: bool,
    pub filters: FilterSelection,
    pub options: OptionLists,
    pub datasets: Datasets,
    pub statuses: BTreeMap<Endpoint, SlotStatus>,
}

impl DashboardSnapshot {
    fn initial(now: DateTime<Utc>) -> Self {
        let statuses = Endpoint::OPTION_LISTS
            .iter()
            .chain(Endpoint::DATASETS.iter())
            .map(|endpoint| (*endpoint, SlotStatus::default()))
            .collect();

        Self {
            loading: true,
            current_ist_time: format_ist_timestamp_at(now),
            gate_open: is_gate_open_at(now),
            filters: FilterSelection::default(),
            options: OptionLists::default(),
            datasets: Datasets::default(),
            statuses,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Completed,
    /// A newer generation started; this run stopped applying results.
    Superseded,
    /// Manual trigger ignored because a refresh was already loading.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("option lists unavailable: {0}")]
    OptionLists(#[source] FetchError),
    #[error("dataset {endpoint} unavailable: {source}")]
    Dataset {
        endpoint: Endpoint,
        #[source]
        source: FetchError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatedFetch {
    Applied,
    Discarded,
    Failed(FetchError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatedTick {
    pub ist_time: String,
    pub gate_open: bool,
    pub results: Vec<(Endpoint, GatedFetch)>,
}

struct OrchestratorState {
    snapshot: DashboardSnapshot,
    generation: u64,
    in_flight: usize,
}

pub struct DataOrchestrator<F> {
    fetcher: F,
    clock: Arc<dyn Clock>,
    state: Arc<RwLock<OrchestratorState>>,
}

/// Clears the loading flag when the last running full refresh ends, however
/// it ends.
struct LoadingGuard {
    state: Arc<RwLock<OrchestratorState>>,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        let mut state = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.in_flight = state.in_flight.saturating_sub(1);
        state.snapshot.loading = state.in_flight > 0;
    }
}

/// A started full refresh: loading is already set and the generation
/// claimed. Dropping it without running releases the loading flag.
pub struct RefreshTicket {
    generation: u64,
    filters: FilterSelection,
    _loading: LoadingGuard,
}


impl<F: AnalyticsFetcher> DataOrchestrator<F> {
    pub fn new(fetcher: F) -> Self {
        Self::with_clock(fetcher, Arc::new(SystemClock))
    }

    pub fn with_clock(fetcher: F, clock: Arc<dyn Clock>) -> Self {
        let snapshot = DashboardSnapshot::initial(clock.now_utc());
        Self {
            fetcher,
            clock,
            state: Arc::new(RwLock::new(OrchestratorState {
                snapshot,
                generation: 0,
                in_flight: 0,
            })),
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        self.read_state().snapshot.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.read_state().snapshot.loading
    }

    pub fn filters(&self) -> FilterSelection {
        self.read_state().snapshot.filters.clone()
    }

    pub fn generation(&self) -> u64 {
        self.read_state().generation
    }

    /// Fetches option lists, then every dataset, with the current filters.
    pub async fn full_refresh(&self) -> Result<RefreshOutcome, RefreshError> {
        match self.begin_refresh(false) {
            Some(ticket) => self.drive_refresh(ticket).await,
            None => Ok(RefreshOutcome::Skipped),
        }
    }

    /// User-initiated refresh; a no-op while loading.
    pub async fn manual_refresh(&self) -> Result<RefreshOutcome, RefreshError> {
        match self.begin_manual_refresh() {
            Some(ticket) => self.run_ticket(ticket).await,
            None => Ok(RefreshOutcome::Skipped),
        }
    }

    /// Claims a manual refresh without awaiting anything, so callers can
    /// answer "busy" or "accepted" before spawning the work. Returns `None`
    /// while loading.
    pub fn begin_manual_refresh(&self) -> Option<RefreshTicket> {
        let ticket = self.begin_refresh(true);
        if ticket.is_none() {
            info!(component = "orchestrator", event = "refresh.manual.busy");
        }
        ticket
    }

    /// Runs a refresh claimed by [`Self::begin_manual_refresh`].
    pub async fn run_ticket(
        &self,
        ticket: RefreshTicket,
    ) -> Result<RefreshOutcome, RefreshError> {
        self.drive_refresh(ticket).await
    }

    /// Applies `update` to the selection. Returns true when any field changed,
    /// which is the caller's cue to run exactly one full refresh.
    pub fn apply_filter_update(&self, update: &FilterUpdate) -> bool {
        let mut state = self.write_state();
        let mut changed = false;
        for (field, value) in update.entries() {
            changed |= state.snapshot.filters.set(field, value);
        }

        if changed {
            let filters = &state.snapshot.filters;
            info!(
                component = "orchestrator",
                event = "filters.changed",
                work_type = %filters.work_type,
                qualification = %filters.qualification,
                experience = %filters.experience
            );
        }

        changed
    }

    /// Changes the selection and, if it changed, runs one full refresh.
    pub async fn apply_filters(
        &self,
        update: &FilterUpdate,
    ) -> Option<Result<RefreshOutcome, RefreshError>> {
        if !self.apply_filter_update(update) {
            return None;
        }
        Some(self.full_refresh().await)
    }

    pub async fn set_filter(
        &self,
        field: FilterField,
        value: &str,
    ) -> Option<Result<RefreshOutcome, RefreshError>> {
        self.apply_filters(&FilterUpdate::single(field, value)).await
    }

    /// One timer tick: refresh the clock and, inside the gate window, the two
    /// gated datasets.
    pub async fn gated_refresh(&self) -> GatedTick {
        let now = self.clock.now_utc();
        let gate_open = is_gate_open_at(now);
        let ist_time = format_ist_timestamp_at(now);
        let generation = self.record_tick(&ist_time, gate_open);

        debug!(
            component = "orchestrator",
            event = "gated.tick",
            gate_open,
            ist_time = %ist_time
        );

        if !gate_open {
            return GatedTick {
                ist_time,
                gate_open,
                results: Vec::new(),
            };
        }

        let (top_companies, company_sizes) = tokio::join!(
            self.gated_fetch(generation, Endpoint::Top10Companies),
            self.gated_fetch(generation, Endpoint::CompanySizeVsName),
        );

        GatedTick {
            ist_time,
            gate_open,
            results: vec![
                (Endpoint::Top10Companies, top_companies),
                (Endpoint::CompanySizeVsName, company_sizes),
            ],
        }
    }

    /// Advances the generation so every in-flight result is dropped on
    /// arrival.
    pub fn invalidate(&self) -> u64 {
        let mut state = self.write_state();
        state.generation = state.generation.saturating_add(1);
        state.generation
    }

    fn begin_refresh(&self, require_idle: bool) -> Option<RefreshTicket> {
        let now = self.clock.now_utc();
        let mut state = self.write_state();
        if require_idle && state.snapshot.loading {
            return None;
        }

        state.generation = state.generation.saturating_add(1);
        state.in_flight = state.in_flight.saturating_add(1);
        state.snapshot.loading = true;
        state.snapshot.current_ist_time = format_ist_timestamp_at(now);

        Some(RefreshTicket {
            generation: state.generation,
            filters: state.snapshot.filters.clone(),
            _loading: LoadingGuard {
                state: Arc::clone(&self.state),
            },
        })
    }

    async fn drive_refresh(
        &self,
        ticket: RefreshTicket,
    ) -> Result<RefreshOutcome, RefreshError> {
        let generation = ticket.generation;
        info!(
            component = "orchestrator",
            event = "refresh.full.start",
            generation,
            work_type = %ticket.filters.work_type,
            qualification = %ticket.filters.qualification,
            experience = %ticket.filters.experience
        );

        let result = self.run_refresh(generation, &ticket.filters).await;

        match &result {
            Ok(RefreshOutcome::Superseded) => info!(
                component = "orchestrator",
                event = "refresh.superseded",
                generation
            ),
            Ok(_) => info!(
                component = "orchestrator",
                event = "refresh.full.complete",
                generation
            ),
            Err(err) => warn!(
                component = "orchestrator",
                event = "refresh.full.error",
                generation,
                error = %err
            ),
        }

        drop(ticket);
        result
    }

    async fn run_refresh(
        &self,
        generation: u64,
        filters: &FilterSelection,
    ) -> Result<RefreshOutcome, RefreshError> {
        let options = tokio::try_join!(
            self.fetch_options(Endpoint::WorkTypes),
            self.fetch_options(Endpoint::Qualifications),
            self.fetch_options(Endpoint::ExperienceLevels),
        );

        let (work_types, qualifications, experience_levels) = match options {
            Ok(lists) => lists,
            Err(err) => {
                if !self.record_failure(generation, &err) {
                    return Ok(RefreshOutcome::Superseded);
                }
                return Err(RefreshError::OptionLists(err));
            }
        };

        let lists = OptionLists {
            work_types,
            qualifications,
            experience_levels,
        };
        if !self.apply_options(generation, lists) {
            return Ok(RefreshOutcome::Superseded);
        }

        for endpoint in Endpoint::DATASETS {
            let request = dataset_request(endpoint, filters);
            match self.fetch_records(&request).await {
                Ok(records) => {
                    if !self.apply_dataset(generation, endpoint, records) {
                        return Ok(RefreshOutcome::Superseded);
                    }
                }
                Err(err) => {
                    if !self.record_failure(generation, &err) {
                        return Ok(RefreshOutcome::Superseded);
                    }
                    return Err(RefreshError::Dataset {
                        endpoint,
                        source: err,
                    });
                }
            }
        }

        Ok(RefreshOutcome::Completed)
    }

    async fn fetch_options(&self, endpoint: Endpoint) -> Result<Vec<String>, FetchError> {
        let body = self
            .fetcher
            .fetch(&EndpointRequest::plain(endpoint))
            .await?;
        decode_options(endpoint, body)
    }

    async fn fetch_records(&self, request: &EndpointRequest) -> Result<Vec<Value>, FetchError> {
        let body = self.fetcher.fetch(request).await?;
        decode_records(request.endpoint, body)
    }

    async fn gated_fetch(&self, generation: u64, endpoint: Endpoint) -> GatedFetch {
        let request = EndpointRequest::plain(endpoint);
        match self.fetch_records(&request).await {
            Ok(records) => {
                if self.apply_dataset(generation, endpoint, records) {
                    GatedFetch::Applied
                } else {
                    debug!(
                        component = "orchestrator",
                        event = "gated.fetch.discarded",
                        endpoint = %endpoint
                    );
                    GatedFetch::Discarded
                }
            }
            Err(err) => {
                warn!(
                    component = "orchestrator",
                    event = "gated.fetch.error",
                    endpoint = %endpoint,
                    error = %err
                );
                self.record_failure(generation, &err);
                GatedFetch::Failed(err)
            }
        }
    }

    fn record_tick(&self, ist_time: &str, gate_open: bool) -> u64 {
        let mut state = self.write_state();
        state.snapshot.current_ist_time = ist_time.to_string();
        state.snapshot.gate_open = gate_open;
        state.generation
    }

    fn apply_options(&self, generation: u64, lists: OptionLists) -> bool {
        let now = self.clock.now_utc();
        let mut state = self.write_state();
        if state.generation != generation {
            return false;
        }

        state.snapshot.options = lists;
        for endpoint in Endpoint::OPTION_LISTS {
            mark_updated(&mut state.snapshot.statuses, endpoint, now);
        }
        true
    }

    fn apply_dataset(&self, generation: u64, endpoint: Endpoint, records: Vec<Value>) -> bool {
        let now = self.clock.now_utc();
        let mut state = self.write_state();
        if state.generation != generation {
            return false;
        }

        let Some(slot) = state.snapshot.datasets.slot_mut(endpoint) else {
            return false;
        };
        let record_count = records.len();
        *slot = records;
        mark_updated(&mut state.snapshot.statuses, endpoint, now);

        debug!(
            component = "orchestrator",
            event = "dataset.applied",
            endpoint = %endpoint,
            record_count,
            generation
        );
        true
    }

    /// Stores the error on the failing slot. Returns false when the
    /// generation moved on and nothing was recorded.
    fn record_failure(&self, generation: u64, err: &FetchError) -> bool {
        let mut state = self.write_state();
        if state.generation != generation {
            return false;
        }

        if let Some(endpoint) = err.endpoint() {
            let status = state.snapshot.statuses.entry(endpoint).or_default();
            status.last_error = Some(err.to_string());
        }
        true
    }

    fn read_state(&self) -> RwLockReadGuard<'_, OrchestratorState> {
        self.state
            .read()
            .expect("dashboard state lock should not be poisoned")
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, OrchestratorState> {
        self.state
            .write()
            .expect("dashboard state lock should not be poisoned")
    }
}

fn dataset_request(endpoint: Endpoint, filters: &FilterSelection) -> EndpointRequest {
    let filter_value = FilterField::ALL_FIELDS
        .into_iter()
        .find(|field| field.distribution_endpoint() == endpoint)
        .map(|field| filters.get(field).to_string());

    EndpointRequest {
        endpoint,
        filter_value,
    }
}

fn mark_updated(
    statuses: &mut BTreeMap<Endpoint, SlotStatus>,
    endpoint: Endpoint,
    now: DateTime<Utc>,
) {
    let status = statuses.entry(endpoint).or_default();
    status.last_updated = Some(now);
    status.last_error = None;
}
