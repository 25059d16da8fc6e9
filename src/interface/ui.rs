use ratatui::{
    prelude::*,
    widgets::{Block, Borders, BorderType, Cell, Gauge, List, ListItem, Paragraph, Row, Table, Tabs},
    style::{Color, Modifier, Style},
    text::{Line, Span},
};
use tui_logger::TuiLoggerWidget;

use crate::core::domain::AnomalyCategory;
use crate::interface::state::{AppMode, AppState, WorkerStatus};

// --- Color Palette ---
const COL_FG: Color = Color::White;
const COL_HIGHLIGHT: Color = Color::Yellow;
const COL_ACCENT: Color = Color::Cyan;
const COL_SUCCESS: Color = Color::Green;
const COL_FAIL: Color = Color::Red;
const COL_WARN: Color = Color::LightYellow;
const COL_HEADER: Color = Color::Magenta;

pub fn draw(f: &mut Frame, app: &mut AppState) {
    if f.area().width < 40 || f.area().height < 10 {
        let p = Paragraph::new("Terminal too small.")
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(p, f.area());
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(f.area());

    draw_header(f, app, chunks[0]);

    match app.mode {
        AppMode::Dashboard => draw_dashboard(f, app, chunks[1]),
        AppMode::Records => draw_records(f, app, chunks[1]),
        AppMode::Config => draw_config(f, app, chunks[1]),
    }

    draw_footer(f, app, chunks[2]);
}

fn draw_header(f: &mut Frame, app: &AppState, area: Rect) {
    let titles = vec![" 1:Dash ", " 2:Records ", " 3:Config "];
    let idx = match app.mode {
        AppMode::Dashboard => 0,
        AppMode::Records => 1,
        AppMode::Config => 2,
    };

    let tabs = Tabs::new(titles)
        .block(
            Block::default()
                .borders(Borders::BOTTOM)
                .title(format!(" {} :: {} ", app.config.mlip_name, app.config.benchmark)),
        )
        .select(idx)
        .highlight_style(Style::default().fg(COL_HIGHLIGHT).add_modifier(Modifier::BOLD));

    f.render_widget(tabs, area);
}

fn draw_footer(f: &mut Frame, app: &AppState, area: Rect) {
    let (status_str, color) = match app.worker_status {
        WorkerStatus::Starting => ("STARTING", COL_FG),
        WorkerStatus::Running => ("RUNNING", COL_SUCCESS),
        WorkerStatus::Stopping => ("STOPPING", COL_HIGHLIGHT),
        WorkerStatus::Finished => ("DONE", COL_ACCENT),
        WorkerStatus::Error => ("ERROR", COL_FAIL),
    };

    let text = Line::from(vec![
        Span::styled(format!(" STATUS: {:<8}", status_str), Style::default().fg(color).add_modifier(Modifier::BOLD)),
        Span::raw(" | "),
        Span::raw(format!("{}/{}", app.progress.done(), app.progress.total)),
        Span::raw(" | "),
        Span::raw(format!("Elapsed: {:.0} s", app.elapsed_secs())),
        Span::raw(" | [Q]uit/Stop [1-3]Tabs [J/K]Select"),
    ]);

    let p = Paragraph::new(text)
        .style(Style::default().bg(Color::DarkGray).fg(Color::White));
    f.render_widget(p, area);
}

fn draw_dashboard(f: &mut Frame, app: &AppState, area: Rect) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(area);

    let left_rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Length(9), Constraint::Min(0)])
        .split(cols[0]);

    draw_progress(f, app, left_rows[0]);
    draw_counts(f, app, left_rows[1]);
    draw_events(f, app, left_rows[2]);

    let logger = TuiLoggerWidget::default()
        .block(
            Block::default()
                .title(" Log ")
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded),
        )
        .style_error(Style::default().fg(COL_FAIL))
        .style_warn(Style::default().fg(COL_WARN))
        .style_info(Style::default().fg(Color::Gray))
        .style_debug(Style::default().fg(Color::DarkGray));
    f.render_widget(logger, cols[1]);
}

fn draw_progress(f: &mut Frame, app: &AppState, area: Rect) {
    let p = &app.progress;
    let label = format!(
        "{}/{} structures ({} resumed, {} in checkpoint)",
        p.done(),
        p.total,
        p.resumed,
        p.checkpointed
    );
    let gauge = Gauge::default()
        .block(Block::default().title(" Progress ").borders(Borders::ALL))
        .gauge_style(Style::default().fg(COL_ACCENT).bg(Color::DarkGray))
        .ratio(p.ratio())
        .label(label);
    f.render_widget(gauge, area);
}

fn category_color(category: Option<AnomalyCategory>) -> Color {
    match category {
        Some(AnomalyCategory::Normal) => COL_SUCCESS,
        Some(_) => COL_WARN,
        None => COL_FAIL,
    }
}

fn draw_counts(f: &mut Frame, app: &AppState, area: Rect) {
    let mut rows: Vec<Row> = AnomalyCategory::ALL
        .iter()
        .map(|c| {
            Row::new(vec![
                Cell::from(c.label()).style(Style::default().fg(category_color(Some(*c)))),
                Cell::from(app.counts.get(*c).to_string()),
            ])
        })
        .collect();
    rows.push(Row::new(vec![
        Cell::from("all runs faulted").style(Style::default().fg(COL_FAIL)),
        Cell::from(app.counts.fully_faulted.to_string()),
    ]));

    let t = Table::new(rows, [Constraint::Min(18), Constraint::Length(8)])
        .block(Block::default().title(" Categories ").borders(Borders::ALL));
    f.render_widget(t, area);
}

fn draw_events(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default().title(" Events ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let items: Vec<ListItem> = app.logs.iter().rev().map(|line| {
        let style = if line.contains("Stop") || line.contains("discarded") {
            Style::default().fg(COL_WARN)
        } else if line.contains("exited") {
            Style::default().fg(COL_FAIL)
        } else {
            Style::default().fg(Color::Gray)
        };

        ListItem::new(Line::from(vec![
            Span::styled(">", Style::default().fg(Color::DarkGray)),
            Span::raw(" "),
            Span::raw(line.as_str()),
        ])).style(style)
    }).collect();

    f.render_widget(List::new(items), inner);
}

fn fmt_opt(v: Option<f64>, digits: usize) -> String {
    v.map_or_else(|| "-".to_string(), |x| format!("{:.*}", digits, x))
}

fn draw_records(f: &mut Frame, app: &mut AppState, area: Rect) {
    if app.records.is_empty() {
        f.render_widget(
            Paragraph::new("No structures computed yet.")
                .block(Block::default().borders(Borders::ALL).title(" Records "))
                .alignment(Alignment::Center),
            area,
        );
        return;
    }

    let header_cells = ["#", "Structure", "Category", "E (eV)", "E ref", "Spread", "Disp", "Faults", "Time (s)"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(COL_HEADER)));
    let header = Row::new(header_cells).height(1).bottom_margin(1);

    let rows = app.records.iter().map(|r| {
        let label = r.category.map_or("faulted", |c| c.label());
        Row::new(vec![
            Cell::from((r.index + 1).to_string()),
            Cell::from(r.key.clone()),
            Cell::from(label).style(Style::default().fg(category_color(r.category))),
            Cell::from(fmt_opt(r.representative_energy, 4)),
            Cell::from(format!("{:.4}", r.reference_energy)),
            Cell::from(format!("{:.4}", r.spread)),
            Cell::from(fmt_opt(r.max_displacement, 3)),
            Cell::from(r.faulted_runs.to_string()),
            Cell::from(format!("{:.1}", r.time_secs)),
        ])
    });

    let t = Table::new(rows, [
        Constraint::Length(6),
        Constraint::Min(20),
        Constraint::Length(16),
        Constraint::Length(12),
        Constraint::Length(10),
        Constraint::Length(8),
        Constraint::Length(7),
        Constraint::Length(7),
        Constraint::Length(9),
    ])
    .header(header)
    .block(Block::default().borders(Borders::ALL).title(format!(" Records ({}) ", app.records.len())))
    .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    f.render_stateful_widget(t, area, &mut app.records_state);
}

fn draw_config(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title(" Benchmark Parameters ");
    let inner = block.inner(area);
    f.render_widget(block, area);

    let c = &app.config;

    let kv = |k: &str, v: String| -> ListItem {
        ListItem::new(Line::from(vec![
            Span::styled(format!("{:<30}", k), Style::default().fg(COL_ACCENT)),
            Span::raw(v)
        ]))
    };

    let items = vec![
        kv("Dataset:", app.dataset_path.clone()),
        kv("Output:", c.output_dir().display().to_string()),
        kv("Mode:", format!("{:?}", c.mode)),
        kv("Reproducibility runs:", app.runs.to_string()),
        ListItem::new(Line::from(" ")),
        kv("Optimizer:", format!("{:?}", c.optimizer)),
        kv("f_crit_relax:", format!("{} eV/Å", c.f_crit_relax)),
        kv("n_crit_relax:", c.n_crit_relax.to_string()),
        kv("max_step:", format!("{} Å", c.max_step)),
        kv("damping:", c.damping.to_string()),
        kv("rate:", c.rate.to_string()),
        kv("gas_distance:", format!("{} Å", c.gas_distance)),
        kv("gas_n_crit:", c.gas_n_crit.to_string()),
        ListItem::new(Line::from(" ")),
        kv("disp_thrs:", format!("{} Å", c.disp_thrs)),
        kv("energy_thrs:", format!("{} eV", c.energy_thrs)),
        kv("reproduction_thrs:", format!("{} eV", c.reproduction_thrs)),
        kv("bond_length_change_threshold:", c.bond_length_change_threshold.to_string()),
        kv("chemical_bond_cutoff:", format!("{} Å", c.chemical_bond_cutoff)),
        ListItem::new(Line::from(" ")),
        kv("save_step:", c.save_step.to_string()),
        kv("save_trajectory:", c.save_trajectory.to_string()),
    ];

    let list = List::new(items).block(Block::default().borders(Borders::NONE));
    f.render_widget(list, inner);
}
