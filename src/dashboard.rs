//! Dashboard HTTP routes and the HTML page rendered from a snapshot.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::info;

use crate::api::{Endpoint, ALL};
use crate::lifecycle::DashboardSource;
use crate::orchestrator::{DashboardSnapshot, FilterField, FilterUpdate};

pub const GATE_CLOSED_NOTICE: &str = "This chart is only visible between 3 PM IST and 5 PM IST.";
pub const NO_DATA_NOTICE: &str = "No data found for the specified filters.";
pub const LOADING_NOTICE: &str = "Loading analytics data...";

struct Panel {
    endpoint: Endpoint,
    title: &'static str,
    caption: &'static str,
    columns: [&'static str; 2],
}

const PANELS: [Panel; 8] = [
    Panel {
        endpoint: Endpoint::WorkTypeDistribution,
        title: "Work Type Distribution",
        caption: "Distribution of work types, filtered by your selection.",
        columns: ["name", "count"],
    },
    Panel {
        endpoint: Endpoint::SalaryRangeDistribution,
        title: "Salary Range Distribution",
        caption: "Job postings across salary ranges.",
        columns: ["range", "count"],
    },
    Panel {
        endpoint: Endpoint::QualificationDistribution,
        title: "Jobs by Qualification",
        caption: "Job postings per qualification, filtered by your selection.",
        columns: ["qualification", "count"],
    },
    Panel {
        endpoint: Endpoint::JobPortalDistribution,
        title: "Job Portal Distribution",
        caption: "Job postings across job portals.",
        columns: ["name", "value"],
    },
    Panel {
        endpoint: Endpoint::JobPostingsTrend,
        title: "Job Postings Trend Over Time",
        caption: "Monthly job postings.",
        columns: ["month", "postings"],
    },
    Panel {
        endpoint: Endpoint::ExperienceDistribution,
        title: "Experience Level Distribution",
        caption: "Job postings per experience level, filtered by your selection.",
        columns: ["level", "count"],
    },
    Panel {
        endpoint: Endpoint::Top10Companies,
        title: "Top 10 Companies (Data Engineer/Scientist - Filtered)",
        caption: "Top companies for Data Engineer/Scientist roles. Only displayed during the 3 PM to 5 PM IST window.",
        columns: ["Company", "Count"],
    },
    Panel {
        endpoint: Endpoint::CompanySizeVsName,
        title: "Company Size vs. Company Name (Filtered)",
        caption: "Company size for companies matching fixed criteria. Only displayed during the 3 PM to 5 PM IST window.",
        columns: ["Company", "Company Size"],
    },
];

/// Fixed "Top 5 Roles (Interns as Web Developer in 2022)" figures; never fetched.
pub fn top_roles_adjusted() -> Vec<Value> {
    [
        ("Backend Web Developer", 357),
        ("Frontend Web Developer", 353),
        ("Full-Stack Developer", 345),
        ("DevOps Engineer", 300),
        ("UI/UX Designer", 280),
    ]
    .into_iter()
    .map(|(role, count)| json!({ "Role": role, "Count": count }))
    .collect()
}

pub fn dashboard_router(source: Arc<dyn DashboardSource>) -> Router {
    Router::new()
        .route("/dashboard", get(get_dashboard_html))
        .route("/dashboard/snapshot", get(get_dashboard_snapshot))
        .route("/dashboard/refresh", post(post_refresh))
        .route("/dashboard/filters", post(post_filters))
        .with_state(DashboardAppState { source })
}

pub fn render_dashboard_html(snapshot: &DashboardSnapshot) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    out.push_str("<title>Job Analytics Dashboard</title>\n");
    out.push_str("<style>body{margin:0;font-family:\"Inter\",\"Segoe UI\",sans-serif;background:#f3f4f6;color:#1f2937}.shell{max-width:1200px;margin:0 auto;padding:24px 16px}.hero{text-align:center;margin-bottom:24px}.hero h1{margin:0 0 6px;color:#1d4ed8}.hero-meta{display:flex;gap:12px;justify-content:center;align-items:center;flex-wrap:wrap}.grid{display:grid;grid-template-columns:repeat(auto-fit,minmax(420px,1fr));gap:18px}.card{background:#fff;border-radius:12px;box-shadow:0 8px 20px rgba(0,0,0,.08);padding:18px}.card.wide{grid-column:1/-1}table{width:100%;border-collapse:collapse}th,td{padding:6px 8px;border-bottom:1px solid #e5e7eb;text-align:left;font-size:.88rem}.caption{color:#6b7280;font-size:.82rem;margin-top:10px}.notice{padding:12px;border-radius:8px;text-align:center}.notice.gate{background:#eff6ff;color:#1d4ed8}.notice.empty{background:#fefce8;color:#a16207}.stale{color:#b91c1c;font-size:.78rem}.btn-refresh{padding:8px 14px;border:0;border-radius:8px;background:#3b82f6;color:#fff}.btn-refresh[disabled]{opacity:.6}</style>\n");
    out.push_str("</head><body><main class=\"shell\">\n");
    out.push_str("<header class=\"hero\"><h1>Job Analytics Dashboard</h1>");
    out.push_str("<p>Insights from Job Posting Data</p><div class=\"hero-meta\">");
    out.push_str(&format!(
        "<span>Current IST Time: <span id=\"ist-time\">{}</span></span>",
        escape_html(&snapshot.current_ist_time)
    ));
    let (disabled, label) = if snapshot.loading {
        (" disabled", "Refreshing...")
    } else {
        ("", "Refresh Data")
    };
    out.push_str(&format!(
        "<button id=\"refresh-btn\" class=\"btn-refresh\"{disabled}>{label}</button>"
    ));
    out.push_str("</div></header>\n");

    if snapshot.loading {
        out.push_str(&format!(
            "<section class=\"notice\">{}</section>\n",
            escape_html(LOADING_NOTICE)
        ));
    } else {
        out.push_str("<section class=\"grid\">\n");
        render_filters(&mut out, snapshot);
        for panel in PANELS.iter().take(1) {
            render_panel(&mut out, snapshot, panel);
        }
        render_top_roles(&mut out);
        for panel in PANELS.iter().skip(1) {
            render_panel(&mut out, snapshot, panel);
        }
        out.push_str("</section>\n");
    }

    out.push_str(&polling_script(snapshot));
    out.push_str("</main></body></html>\n");
    out
}

/// Browser-side poll: keeps the clock current, reloads when a full refresh
/// lands, and swaps in fresh gated panels whenever the gate flips or a gated
/// dataset is re-fetched.
fn polling_script(snapshot: &DashboardSnapshot) -> String {
    format!(
        "<script>\nvar gateOpen={};\nvar gatedStamp={};\n{}</script>\n",
        snapshot.gate_open,
        gated_stamp(snapshot),
        POLLING_SCRIPT_BODY
    )
}

/// JSON array of the gated slots' `last_updated` values, in the same form the
/// snapshot endpoint serializes them.
fn gated_stamp(snapshot: &DashboardSnapshot) -> String {
    let stamps: Vec<Option<DateTime<Utc>>> = Endpoint::GATED
        .iter()
        .map(|endpoint| {
            snapshot
                .statuses
                .get(endpoint)
                .and_then(|status| status.last_updated)
        })
        .collect();
    let json = serde_json::to_string(&stamps).unwrap_or_else(|_| "[]".to_string());
    serde_json::to_string(&json).unwrap_or_else(|_| "\"[]\"".to_string())
}

const POLLING_SCRIPT_BODY: &str = "(function(){\nvar wasLoading=null;\nfunction stampOf(s){var st=s.statuses||{};return JSON.stringify([(st.top_10_companies||{}).last_updated||null,(st.company_size_vs_name||{}).last_updated||null]);}\nfunction swapGated(){fetch('/dashboard').then(function(r){return r.text();}).then(function(html){var doc=new DOMParser().parseFromString(html,'text/html');document.querySelectorAll('section[data-gated]').forEach(function(el){var next=doc.querySelector('section[data-endpoint=\"'+el.dataset.endpoint+'\"]');if(next){el.replaceWith(next);}});}).catch(function(){});}\nfunction refresh(){fetch('/dashboard/snapshot').then(function(r){return r.json();}).then(function(s){document.getElementById('ist-time').textContent=s.current_ist_time;if(wasLoading===true&&!s.loading){location.reload();return;}wasLoading=s.loading;var stamp=stampOf(s);if(!s.loading&&(s.gate_open!==gateOpen||stamp!==gatedStamp)){gateOpen=s.gate_open;gatedStamp=stamp;swapGated();}}).catch(function(){});}\nsetInterval(refresh, 1000);\nvar btn=document.getElementById('refresh-btn');\nif(btn){btn.addEventListener('click',function(){fetch('/dashboard/refresh',{method:'POST'}).then(refresh);});}\nvar form=document.getElementById('filters-form');\nif(form){form.addEventListener('change',function(){var params=new URLSearchParams(new FormData(form));fetch('/dashboard/filters?'+params.toString(),{method:'POST'}).then(refresh);});}\n})();\n";

fn render_filters(out: &mut String, snapshot: &DashboardSnapshot) {
    out.push_str("<section class=\"card wide\"><h2>Filters</h2><form id=\"filters-form\">");
    for field in FilterField::ALL_FIELDS {
        let (label, all_label) = match field {
            FilterField::WorkType => ("Work Type", "All Work Types"),
            FilterField::Qualification => ("Qualification", "All Qualifications"),
            FilterField::Experience => ("Experience Level", "All Experience Levels"),
        };
        let selected = snapshot.filters.get(field);
        out.push_str(&format!(
            "<label>{}: <select name=\"{}\">",
            escape_html(label),
            field.query_param()
        ));
        push_option(out, ALL, all_label, selected == ALL);
        for option in snapshot.options.get(field) {
            push_option(out, option, option, selected == option);
        }
        out.push_str("</select></label> ");
    }
    out.push_str("</form></section>\n");
}

fn push_option(out: &mut String, value: &str, label: &str, selected: bool) {
    let selected = if selected { " selected" } else { "" };
    out.push_str(&format!(
        "<option value=\"{}\"{}>{}</option>",
        escape_html(value),
        selected,
        escape_html(label)
    ));
}

fn render_panel(out: &mut String, snapshot: &DashboardSnapshot, panel: &Panel) {
    let gated = panel.endpoint.is_gated();
    let (class, gated_attr) = if gated {
        ("card wide", " data-gated=\"true\"")
    } else {
        ("card", "")
    };
    out.push_str(&format!(
        "<section class=\"{class}\" data-endpoint=\"{}\"{gated_attr}><h2>{}</h2>",
        escape_html(panel.endpoint.path()),
        escape_html(panel.title)
    ));

    let records = snapshot.datasets.get(panel.endpoint).unwrap_or_default();
    if gated && !snapshot.gate_open {
        out.push_str(&format!(
            "<div class=\"notice gate\">{}</div>",
            escape_html(GATE_CLOSED_NOTICE)
        ));
    } else if gated && records.is_empty() {
        out.push_str(&format!(
            "<div class=\"notice empty\">{}</div>",
            escape_html(NO_DATA_NOTICE)
        ));
    } else {
        render_table(out, &panel.columns, records);
    }

    if let Some(error) = snapshot
        .statuses
        .get(&panel.endpoint)
        .and_then(|status| status.last_error.as_deref())
    {
        out.push_str(&format!(
            "<p class=\"stale\">Showing last good data: {}</p>",
            escape_html(error)
        ));
    }

    out.push_str(&format!(
        "<p class=\"caption\">{}</p></section>\n",
        escape_html(panel.caption)
    ));
}

fn render_top_roles(out: &mut String) {
    out.push_str("<section class=\"card\"><h2>Top 5 Roles (Interns as Web Developer in 2022)</h2>");
    render_table(out, &["Role", "Count"], &top_roles_adjusted());
    out.push_str("<p class=\"caption\">Top roles for interns with Web Developer job titles in 2022.</p></section>\n");
}

fn render_table(out: &mut String, columns: &[&str], records: &[Value]) {
    out.push_str("<table><thead><tr>");
    for column in columns {
        out.push_str("<th>");
        out.push_str(&escape_html(column));
        out.push_str("</th>");
    }
    out.push_str("</tr></thead><tbody>");
    for record in records {
        out.push_str("<tr>");
        for column in columns {
            out.push_str("<td>");
            out.push_str(&escape_html(&cell_text(record.get(*column))));
            out.push_str("</td>");
        }
        out.push_str("</tr>");
    }
    out.push_str("</tbody></table>");
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "-".to_string(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[derive(Clone)]
struct DashboardAppState {
    source: Arc<dyn DashboardSource>,
}

async fn get_dashboard_html(State(state): State<DashboardAppState>) -> impl IntoResponse {
    let snapshot = state.source.snapshot();
    Html(render_dashboard_html(&snapshot))
}

async fn get_dashboard_snapshot(State(state): State<DashboardAppState>) -> impl IntoResponse {
    let snapshot = state.source.snapshot();
    info!(
        component = "dashboard_server",
        event = "http.snapshot.request",
        loading = snapshot.loading,
        gate_open = snapshot.gate_open
    );
    Json(snapshot)
}

async fn post_refresh(State(state): State<DashboardAppState>) -> impl IntoResponse {
    let accepted = state.source.request_refresh();
    info!(
        component = "dashboard_server",
        event = "http.refresh.request",
        accepted
    );
    if accepted {
        (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" })))
    } else {
        (StatusCode::CONFLICT, Json(json!({ "status": "busy" })))
    }
}

async fn post_filters(
    State(state): State<DashboardAppState>,
    Query(update): Query<FilterUpdate>,
) -> impl IntoResponse {
    let refresh_triggered = state.source.update_filters(update);
    info!(
        component = "dashboard_server",
        event = "http.filters.request",
        refresh_triggered
    );
    (
        StatusCode::ACCEPTED,
        Json(json!({ "refresh_triggered": refresh_triggered })),
    )
}
