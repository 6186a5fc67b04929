use crate::config::Settings;
use crate::monitor::CycleReport;
use crate::process::{DisplayOptions, ProcessView, format_rates, sort_and_filter};
use crate::resolver::NameResolver;
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
};
use std::sync::Arc;

const PID_WIDTH: usize = 7;
const RATE_WIDTH: usize = 10;
const UNIT_WIDTH: usize = 7;
// pid, two rates, unit and the separators between them
const FIXED_WIDTH: usize = PID_WIDTH + 2 * RATE_WIDTH + UNIT_WIDTH + 4;

pub struct AppState {
    /// Last report that was attributed
    pub report: Option<CycleReport>,
    pub paused: bool,
    pub show_help: bool,
    pub status_message: String,
    pub options: DisplayOptions,
    pub tcp_udp_split: bool,
    pub resolver: Arc<dyn NameResolver>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowKind {
    Process,
    Host,
    More,
}

impl AppState {
    pub fn new(settings: &Settings, resolver: Arc<dyn NameResolver>) -> Self {
        Self {
            report: None,
            paused: false,
            show_help: false,
            status_message: String::from("Waiting for the first refresh..."),
            options: DisplayOptions {
                order: settings.order,
                filter_zero: settings.filter_zero,
                limit_hosts_rows: settings.limit_hosts_rows,
            },
            tcp_udp_split: settings.tcp_udp_split,
            resolver,
        }
    }

    /// Take a new cycle; paused cycles keep the previous view on screen.
    pub fn update(&mut self, report: CycleReport) {
        self.paused = report.paused;
        if report.paused {
            return;
        }
        self.status_message = format!(
            "{} process(es) with open sockets",
            report.processes.len().saturating_sub(1)
        );
        self.report = Some(report);
    }
}

pub fn draw_ui(f: &mut Frame, app: &AppState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4), // Header
            Constraint::Min(5),    // Process list
            Constraint::Length(3), // Status bar
        ])
        .split(f.area());

    draw_header(f, chunks[0], app);
    draw_process_list(f, chunks[1], app);
    draw_status_bar(f, chunks[2], app);

    if app.show_help {
        draw_help_overlay(f, f.area());
    }
}

fn draw_header(f: &mut Frame, area: Rect, app: &AppState) {
    let mut lines = header_lines(app);
    if app.paused {
        lines[0].spans.push(Span::styled(
            "  --- PAUSED ---",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ));
    }

    let header = Paragraph::new(lines)
        .style(Style::default().fg(Color::Cyan))
        .block(Block::default().borders(Borders::ALL));

    f.render_widget(header, area);
}

fn header_lines(app: &AppState) -> Vec<Line<'static>> {
    let title = Span::styled(
        format!("nettop v{}", env!("CARGO_PKG_VERSION")),
        Style::default().add_modifier(Modifier::BOLD),
    );

    let Some(report) = &app.report else {
        return vec![Line::from(title), Line::from("")];
    };

    let cycle = &report.cycle;
    let (recv, sent) = report
        .processes
        .iter()
        .fold((0, 0), |(r, s), p| (r + p.total_recv, s + p.total_sent));
    let (recv_rate, sent_rate, unit) = format_rates(recv, sent, report.elapsed);

    vec![
        Line::from(vec![
            title,
            Span::raw(format!(
                " - {:.1}s window - Packets (total/unattributed/undet/unmap_r/unmap_s): {}/{}/{}/{}/{}",
                report.elapsed.as_secs_f64(),
                cycle.total_pkts,
                cycle.unattributed_pkts(),
                cycle.undet_pkts,
                cycle.unmap_recv_pkts,
                cycle.unmap_send_pkts
            )),
        ]),
        Line::from(format!(
            "Total recv {:.2} sent {:.2} {}",
            recv_rate,
            sent_rate,
            unit.label()
        )),
    ]
}

fn draw_process_list(f: &mut Frame, area: Rect, app: &AppState) {
    let cmd_width = usize::from(area.width.saturating_sub(2)).saturating_sub(FIXED_WIDTH);

    let lines: Vec<Line> = match &app.report {
        Some(report) => {
            let views = sort_and_filter(&report.processes, &app.options);
            build_rows(&views, report, app, cmd_width)
                .into_iter()
                .map(|(kind, text)| match kind {
                    RowKind::Process => Line::styled(text, Style::default().fg(Color::White)),
                    RowKind::Host => Line::styled(text, Style::default().fg(Color::Gray)),
                    RowKind::More => Line::styled(text, Style::default().fg(Color::DarkGray)),
                })
                .collect()
        }
        None => Vec::new(),
    };

    let title = format!(
        "{:>pid$} {:<cmd$} {:>rate$} {:>rate$} {:<unit$}",
        "PID",
        "Command",
        "Recv",
        "Sent",
        "Unit",
        pid = PID_WIDTH,
        cmd = cmd_width,
        rate = RATE_WIDTH,
        unit = UNIT_WIDTH
    );

    let list = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(Span::styled(title, Style::default().add_modifier(Modifier::BOLD))),
    );
    f.render_widget(list, area);
}

fn build_rows(
    views: &[ProcessView<'_>],
    report: &CycleReport,
    app: &AppState,
    cmd_width: usize,
) -> Vec<(RowKind, String)> {
    let mut rows = Vec::new();

    for view in views {
        let stats = view.stats;
        let (recv, sent, unit) = format_rates(stats.total_recv, stats.total_sent, report.elapsed);
        rows.push((
            RowKind::Process,
            format!(
                "{:>pid$} {:<cmd$} {:>rate$.2} {:>rate$.2} {:<unit$}",
                stats.pid,
                truncate(&stats.cmd, cmd_width),
                recv,
                sent,
                unit.label(),
                pid = PID_WIDTH,
                cmd = cmd_width,
                rate = RATE_WIDTH,
                unit = UNIT_WIDTH
            ),
        ));

        for (addr, host) in &view.hosts {
            let mut name = String::new();
            if app.tcp_udp_split {
                if let Some((tcp, udp)) = host.tcp_udp_split() {
                    name.push_str(&format!("[{:>3}%/{:>3}%] ", tcp, udp));
                }
            }
            name.push_str(&addr.to_display_string(Some(app.resolver.as_ref())));

            let (recv, sent, unit) = format_rates(host.recv, host.sent, report.elapsed);
            rows.push((
                RowKind::Host,
                format!(
                    "{:>pid$} {:<cmd$} {:>rate$.2} {:>rate$.2} {:<unit$}",
                    "",
                    truncate(&name, cmd_width),
                    recv,
                    sent,
                    unit.label(),
                    pid = PID_WIDTH,
                    cmd = cmd_width,
                    rate = RATE_WIDTH,
                    unit = UNIT_WIDTH
                ),
            ));
        }

        if view.hidden_hosts > 0 {
            rows.push((
                RowKind::More,
                format!("{:>pid$} ...", "", pid = PID_WIDTH),
            ));
        }
    }

    rows
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    if width <= 3 {
        return text.chars().take(width).collect();
    }
    let mut out: String = text.chars().take(width - 3).collect();
    out.push_str("...");
    out
}

fn draw_status_bar(f: &mut Frame, area: Rect, app: &AppState) {
    let mut spans = vec![];

    for (i, (key, description)) in crate::keybindings::get_status_bar_keybindings()
        .iter()
        .enumerate()
    {
        if i > 0 {
            spans.push(Span::raw("  "));
        }
        spans.push(Span::styled(
            format!("[{}]", key),
            Style::default().fg(Color::Yellow),
        ));
        spans.push(Span::raw(format!(" {}", description)));
    }

    spans.push(Span::raw("  |  "));
    spans.push(Span::styled(
        app.status_message.as_str(),
        Style::default().fg(Color::Gray),
    ));

    let status =
        Paragraph::new(vec![Line::from(spans)]).block(Block::default().borders(Borders::ALL));

    f.render_widget(status, area);
}

fn draw_help_overlay(f: &mut Frame, area: Rect) {
    let mut help_text = vec![
        Line::from(""),
        Line::from(Span::styled(
            "nettop - Keyboard Shortcuts",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];

    for binding in crate::keybindings::get_all_keybindings() {
        help_text.push(Line::from(format!(
            "  {:12} - {}",
            binding.key, binding.description
        )));
    }

    help_text.push(Line::from(""));
    help_text.push(Line::from("Press any key to close..."));

    let help = Paragraph::new(help_text)
        .style(Style::default().bg(Color::Black).fg(Color::White))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Help")
                .style(Style::default().fg(Color::Cyan)),
        );

    let help_area = centered_rect(60, 50, area);
    f.render_widget(Clear, help_area);
    f.render_widget(help, help_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
