//! vidbatch dashboard
//!
//! Terminal interface for watching a running batch. Polls the metrics
//! endpoint (default http://127.0.0.1:2112/metrics; pass another URL as the
//! first argument or set VIDBATCH_METRICS_URL).

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Cell, Chart, Dataset, Gauge, Paragraph, Row, Table, Wrap},
    Frame, Terminal,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashSet, VecDeque},
    io::{self, Stdout},
    time::{Duration, Instant},
};

const DEFAULT_METRICS_URL: &str = "http://127.0.0.1:2112/metrics";
const POLL_INTERVAL_MS: u64 = 500;
const MAX_SAVED_POINTS: usize = 120;
const MAX_EVENT_LOG_ENTRIES: usize = 100;
const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

// ============================================================================
// Data Models (mirroring the engine's metrics types)
// ============================================================================

/// Progress of one in-flight transcode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobGauge {
    pub path: String,
    pub percentage: f64,
    pub elapsed_secs: u64,
    pub remaining_secs: Option<u64>,
}

/// Complete snapshot of a running batch
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub timestamp_unix_ms: i64,
    pub jobs: Vec<JobGauge>,
    pub queue_size: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub space_saved_bytes: i64,
    pub total_transcode_secs: u64,
}

impl MetricsSnapshot {
    /// Share of the batch that has finished either way, in [0, 1].
    pub fn batch_ratio(&self) -> f64 {
        if self.queue_size == 0 {
            return 0.0;
        }
        ((self.completed_jobs + self.failed_jobs) as f64 / self.queue_size as f64).clamp(0.0, 1.0)
    }
}

// ============================================================================
// App State
// ============================================================================

/// Main application state for the TUI dashboard
pub struct App {
    pub metrics: Option<MetricsSnapshot>,
    pub event_log: VecDeque<String>,
    /// (seconds since start, GiB saved)
    pub saved_history: VecDeque<(f64, f64)>,
    pub connected: bool,
    url: String,
    client: reqwest::Client,
    start_time: Instant,
}

impl App {
    pub fn new(url: String) -> Self {
        Self {
            metrics: None,
            event_log: VecDeque::with_capacity(MAX_EVENT_LOG_ENTRIES),
            saved_history: VecDeque::with_capacity(MAX_SAVED_POINTS),
            connected: false,
            url,
            client: reqwest::Client::builder()
                .no_proxy()
                .build()
                .unwrap_or_default(),
            start_time: Instant::now(),
        }
    }

    pub fn log_event(&mut self, event: String) {
        if self.event_log.len() >= MAX_EVENT_LOG_ENTRIES {
            self.event_log.pop_front();
        }
        self.event_log.push_back(event);
    }

    /// Fetch metrics from the endpoint
    pub async fn fetch_metrics(&mut self) {
        match self.client.get(&self.url).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    match response.json::<MetricsSnapshot>().await {
                        Ok(snapshot) => self.apply(snapshot),
                        Err(e) => {
                            self.log_event(format!("JSON parse error: {}", e));
                            self.connected = false;
                        }
                    }
                } else {
                    self.log_event(format!("HTTP error: {}", response.status()));
                    self.connected = false;
                }
            }
            Err(e) => {
                if self.connected {
                    self.log_event(format!("Connection lost: {}", e));
                }
                self.connected = false;
            }
        }
    }

    /// Take a new snapshot, logging jobs that appeared or went away.
    pub fn apply(&mut self, snapshot: MetricsSnapshot) {
        if !self.connected {
            self.log_event(format!("Connected to {}", self.url));
        }
        let previous = self.metrics.take().unwrap_or_default();
        for line in job_changes(&previous, &snapshot) {
            self.log_event(line);
        }

        if self.saved_history.len() >= MAX_SAVED_POINTS {
            self.saved_history.pop_front();
        }
        self.saved_history.push_back((
            self.start_time.elapsed().as_secs_f64(),
            snapshot.space_saved_bytes as f64 / BYTES_PER_GIB,
        ));

        self.metrics = Some(snapshot);
        self.connected = true;
    }
}

/// Event lines for jobs that started or left the table between snapshots.
fn job_changes(previous: &MetricsSnapshot, current: &MetricsSnapshot) -> Vec<String> {
    let before: HashSet<&str> = previous.jobs.iter().map(|j| j.path.as_str()).collect();
    let after: HashSet<&str> = current.jobs.iter().map(|j| j.path.as_str()).collect();

    let mut lines = Vec::new();
    for job in &current.jobs {
        if !before.contains(job.path.as_str()) {
            lines.push(format!("Started {}", job.path));
        }
    }
    for job in &previous.jobs {
        if !after.contains(job.path.as_str()) {
            lines.push(format!("Finished {}", job.path));
        }
    }
    lines
}

// ============================================================================
// Terminal Setup/Teardown
// ============================================================================

fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

// ============================================================================
// Widget Rendering
// ============================================================================

/// Render the table of in-flight jobs
fn render_jobs_table(f: &mut Frame, area: Rect, app: &App) {
    let header_cells = ["File", "Progress %", "Elapsed", "Remaining"].iter().map(|h| {
        Cell::from(*h).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
    });
    let header = Row::new(header_cells).height(1).bottom_margin(1);

    let rows: Vec<Row> = match app.metrics {
        Some(ref metrics) => metrics
            .jobs
            .iter()
            .map(|job| {
                Row::new(vec![
                    Cell::from(file_name(&job.path)),
                    Cell::from(format!("{:.1}%", job.percentage)),
                    Cell::from(format_duration(job.elapsed_secs)),
                    Cell::from(
                        job.remaining_secs
                            .map(format_duration)
                            .unwrap_or_else(|| "-".to_string()),
                    ),
                ])
            })
            .collect(),
        None => vec![],
    };

    let widths = [
        Constraint::Min(30),
        Constraint::Length(12),
        Constraint::Length(10),
        Constraint::Length(10),
    ];

    let title = if app.connected {
        " Transcoding "
    } else {
        " Transcoding (Disconnected) "
    };

    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title));

    f.render_widget(table, area);
}

/// Render the whole-batch progress gauge
fn render_batch_gauge(f: &mut Frame, area: Rect, app: &App) {
    let (ratio, label) = match app.metrics {
        Some(ref m) => (
            m.batch_ratio(),
            format!(
                "{} / {} done",
                m.completed_jobs + m.failed_jobs,
                m.queue_size
            ),
        ),
        None => (0.0, "-".to_string()),
    };

    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" Batch "))
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio(ratio)
        .label(label);

    f.render_widget(gauge, area);
}

/// Render the aggregate counters
fn render_totals(f: &mut Frame, area: Rect, app: &App) {
    let m = app.metrics.clone().unwrap_or_default();
    let rows = vec![
        Row::new(vec![
            Cell::from("Completed"),
            Cell::from(m.completed_jobs.to_string()),
        ]),
        Row::new(vec![
            Cell::from("Failed"),
            Cell::from(m.failed_jobs.to_string()),
        ]),
        Row::new(vec![
            Cell::from("Saved"),
            Cell::from(format!("{:.2} GB", m.space_saved_bytes as f64 / BYTES_PER_GIB)),
        ]),
        Row::new(vec![
            Cell::from("Encode time"),
            Cell::from(format_duration(m.total_transcode_secs)),
        ]),
    ];

    let widths = [Constraint::Length(12), Constraint::Min(10)];
    let table =
        Table::new(rows, widths).block(Block::default().borders(Borders::ALL).title(" Totals "));

    f.render_widget(table, area);
}

/// Render space saved over time
fn render_saved_chart(f: &mut Frame, area: Rect, app: &App) {
    let data: Vec<(f64, f64)> = app.saved_history.iter().cloned().collect();

    if data.is_empty() {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(" Space saved (GB) ");
        f.render_widget(block, area);
        return;
    }

    let max_x = data.last().map(|(x, _)| *x).unwrap_or(60.0).max(1.0);
    let min_x = data.first().map(|(x, _)| *x).unwrap_or(0.0);
    let min_y = data.iter().map(|(_, y)| *y).fold(0.0f64, f64::min);
    let max_y = data.iter().map(|(_, y)| *y).fold(0.0f64, f64::max).max(1.0);

    let datasets = vec![Dataset::default()
        .name("GB saved")
        .marker(symbols::Marker::Braille)
        .style(Style::default().fg(Color::Green))
        .data(&data)];

    let chart = Chart::new(datasets)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Space saved (GB) "),
        )
        .x_axis(
            Axis::default()
                .title("Time (s)")
                .style(Style::default().fg(Color::Gray))
                .bounds([min_x, max_x])
                .labels(vec![
                    Span::raw(format!("{:.0}", min_x)),
                    Span::raw(format!("{:.0}", max_x)),
                ]),
        )
        .y_axis(
            Axis::default()
                .title("GB")
                .style(Style::default().fg(Color::Gray))
                .bounds([min_y, max_y])
                .labels(vec![
                    Span::raw(format!("{:.1}", min_y)),
                    Span::raw(format!("{:.1}", max_y)),
                ]),
        );

    f.render_widget(chart, area);
}

fn render_event_log(f: &mut Frame, area: Rect, app: &App) {
    let events: Vec<Line> = app
        .event_log
        .iter()
        .rev()
        .take((area.height as usize).saturating_sub(2))
        .map(|e| Line::from(e.as_str()))
        .collect();

    let paragraph = Paragraph::new(events)
        .block(Block::default().borders(Borders::ALL).title(" Event Log "))
        .wrap(Wrap { trim: true });

    f.render_widget(paragraph, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let status = match app.metrics {
        Some(ref m) if app.connected => format!(
            " Running: {} | Completed: {} | Failed: {} | Saved: {:.2} GB | Press 'q' to quit ",
            m.jobs.len(),
            m.completed_jobs,
            m.failed_jobs,
            m.space_saved_bytes as f64 / BYTES_PER_GIB
        ),
        _ => format!(" Connecting to {}... | Press 'q' to quit ", app.url),
    };

    let paragraph =
        Paragraph::new(status).style(Style::default().fg(Color::White).bg(Color::DarkGray));

    f.render_widget(paragraph, area);
}

/// `1h 2m`, `3m 4s` or `5s`
fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

fn file_name(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

// ============================================================================
// Main UI Layout
// ============================================================================

fn ui(f: &mut Frame, app: &App) {
    let size = f.area();

    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(size);

    // Left: jobs and events. Right: batch gauge, totals, chart.
    let content_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(main_chunks[0]);

    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(content_chunks[0]);

    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Min(0),
        ])
        .split(content_chunks[1]);

    render_jobs_table(f, left_chunks[0], app);
    render_event_log(f, left_chunks[1], app);
    render_batch_gauge(f, right_chunks[0], app);
    render_totals(f, right_chunks[1], app);
    render_saved_chart(f, right_chunks[2], app);
    render_status_bar(f, main_chunks[1], app);
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn metrics_url() -> String {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("VIDBATCH_METRICS_URL").ok())
        .unwrap_or_else(|| DEFAULT_METRICS_URL.to_string())
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let mut terminal = setup_terminal()?;

    let mut app = App::new(metrics_url());
    app.log_event("vidbatch dashboard started".to_string());

    let result = run_app(&mut terminal, &mut app).await;

    restore_terminal(&mut terminal)?;

    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App,
) -> io::Result<()> {
    let poll_interval = Duration::from_millis(POLL_INTERVAL_MS);
    let mut last_fetch: Option<Instant> = None;

    loop {
        if last_fetch.map_or(true, |t| t.elapsed() >= poll_interval) {
            app.fetch_metrics().await;
            last_fetch = Some(Instant::now());
        }

        terminal.draw(|f| ui(f, app))?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => {
                            return Ok(());
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn job(path: &str, pct: f64) -> JobGauge {
        JobGauge {
            path: path.to_string(),
            percentage: pct,
            elapsed_secs: 10,
            remaining_secs: None,
        }
    }

    #[test]
    fn test_snapshot_parses_engine_json() {
        let json = r#"{
            "timestamp_unix_ms": 1700000000000,
            "jobs": [{"path": "/lib/a.mkv", "percentage": 42.5, "elapsed_secs": 60, "remaining_secs": null}],
            "queue_size": 4,
            "completed_jobs": 1,
            "failed_jobs": 1,
            "space_saved_bytes": -2048,
            "total_transcode_secs": 900
        }"#;
        let snapshot: MetricsSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.jobs[0].remaining_secs, None);
        assert_eq!(snapshot.space_saved_bytes, -2048);
        assert!((snapshot.batch_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_job_changes() {
        let before = MetricsSnapshot {
            jobs: vec![job("/lib/a.mkv", 90.0), job("/lib/b.mkv", 10.0)],
            ..MetricsSnapshot::default()
        };
        let after = MetricsSnapshot {
            jobs: vec![job("/lib/b.mkv", 20.0), job("/lib/c.mkv", 0.0)],
            ..MetricsSnapshot::default()
        };
        assert_eq!(
            job_changes(&before, &after),
            vec!["Started /lib/c.mkv", "Finished /lib/a.mkv"]
        );
    }

    #[test]
    fn test_apply_tracks_history_and_connection() {
        let mut app = App::new(DEFAULT_METRICS_URL.to_string());
        app.apply(MetricsSnapshot {
            jobs: vec![job("/lib/a.mkv", 5.0)],
            space_saved_bytes: (2.0 * BYTES_PER_GIB) as i64,
            ..MetricsSnapshot::default()
        });
        assert!(app.connected);
        assert_eq!(app.saved_history.len(), 1);
        assert!((app.saved_history[0].1 - 2.0).abs() < 1e-9);
        assert!(app.event_log.iter().any(|e| e == "Started /lib/a.mkv"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(5), "5s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(3723), "1h 2m");
        assert_eq!(file_name("/lib/movies/Heat.mkv"), "Heat.mkv");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_batch_ratio_in_unit_range(
            queue in 0u64..1000,
            completed in 0u64..1000,
            failed in 0u64..1000,
        ) {
            let snapshot = MetricsSnapshot {
                queue_size: queue,
                completed_jobs: completed,
                failed_jobs: failed,
                ..MetricsSnapshot::default()
            };
            let ratio = snapshot.batch_ratio();
            prop_assert!((0.0..=1.0).contains(&ratio));
        }
    }
}
