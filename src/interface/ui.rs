use ratatui::{
    prelude::*,
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{
        canvas::{Canvas, Circle, Line as CanvasLine},
        Axis, Block, BorderType, Borders, Cell, Chart, Dataset, Gauge, GraphType, List, ListItem,
        Paragraph, Row, Sparkline, Table, Tabs, Wrap,
    },
};
use tui_logger::TuiLoggerWidget;

use crate::core::domain::AtomicStructure;
use crate::interface::state::{AppMode, AppState, WorkerStatus};

// --- Color Palette ---
const COL_BG: Color = Color::Reset;
const COL_FG: Color = Color::White;
const COL_HIGHLIGHT: Color = Color::Yellow;
const COL_ACCENT: Color = Color::Cyan;
const COL_BOND: Color = Color::DarkGray;
const COL_SUCCESS: Color = Color::Green;
const COL_FAIL: Color = Color::Red;
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
        AppMode::Profile => draw_profile_table(f, app, chunks[1]),
        AppMode::TsViewer => draw_fullscreen_viewer(f, app, chunks[1]),
        AppMode::Config => draw_config(f, app, chunks[1]),
    }

    draw_footer(f, app, chunks[2]);
}

fn draw_header(f: &mut Frame, app: &AppState, area: Rect) {
    let titles = vec![" 1:Dash ", " 2:Profile ", " 3:TS Viewer ", " 4:Config "];
    let idx = match app.mode {
        AppMode::Dashboard => 0,
        AppMode::Profile => 1,
        AppMode::TsViewer => 2,
        AppMode::Config => 3,
    };

    let tabs = Tabs::new(titles)
        .block(Block::default().borders(Borders::BOTTOM))
        .select(idx)
        .highlight_style(Style::default().fg(COL_HIGHLIGHT).add_modifier(Modifier::BOLD));

    f.render_widget(tabs, area);
}

fn draw_footer(f: &mut Frame, app: &AppState, area: Rect) {
    let status_str = match app.worker_status {
        WorkerStatus::Running => "RUNNING",
        WorkerStatus::Idle => "IDLE",
        WorkerStatus::Starting => "STARTING",
        WorkerStatus::Finished => "DONE",
        WorkerStatus::Error => "ERROR",
    };

    let color = match app.worker_status {
        WorkerStatus::Running => COL_SUCCESS,
        WorkerStatus::Error => COL_FAIL,
        _ => COL_FG,
    };

    let stage = app
        .stage
        .as_ref()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());

    let text = Line::from(vec![
        Span::styled(
            format!(" STATUS: {:<8}", status_str),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::raw(format!("Cycle {} {}", app.cycle, stage)),
        Span::raw(" | "),
        Span::styled(
            format!("Calls: {}", app.evaluator_calls),
            Style::default().fg(COL_ACCENT),
        ),
        Span::raw(format!(" | {:.0}s", app.start_time.elapsed().as_secs_f64())),
        Span::raw(" | [Q]uit [A]uto-rot [R]eset-View [+/-]Zoom"),
    ]);

    let p = Paragraph::new(text).style(Style::default().bg(Color::DarkGray).fg(Color::White));
    f.render_widget(p, area);
}

fn draw_dashboard(f: &mut Frame, app: &AppState, area: Rect) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(area);

    let left_rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(cols[0]);

    draw_energy_profile(f, app, left_rows[0]);
    draw_force_history(f, app, left_rows[1]);

    let right_rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(55),
            Constraint::Length(3),
            Constraint::Min(0),
        ])
        .split(cols[1]);

    draw_logs(f, right_rows[0]);
    draw_convergence_gauge(f, app, right_rows[1]);
    draw_stats(f, app, right_rows[2]);
}

fn draw_energy_profile(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default()
        .title(" Energy Profile ")
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded);

    let rel = app.relative_energies();
    let points: Vec<(f64, f64)> = rel
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_finite())
        .map(|(i, e)| (i as f64, *e))
        .collect();

    if points.is_empty() {
        f.render_widget(block.title(" Waiting for Data... "), area);
        return;
    }

    let ts_point: Vec<(f64, f64)> = app
        .ts_index
        .and_then(|m| rel.get(m).map(|e| (m as f64, *e)))
        .into_iter()
        .collect();

    let ymin = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let ymax = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    let pad = ((ymax - ymin) * 0.1).max(1e-3);
    let (ylo, yhi) = (ymin - pad, ymax + pad);
    let xmax = (rel.len().max(2) - 1) as f64;

    let datasets = vec![
        Dataset::default()
            .name("E - E0")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(COL_ACCENT))
            .data(&points),
        Dataset::default()
            .name("TS")
            .marker(symbols::Marker::Block)
            .graph_type(GraphType::Scatter)
            .style(Style::default().fg(COL_HIGHLIGHT))
            .data(&ts_point),
    ];

    let chart = Chart::new(datasets)
        .block(block)
        .x_axis(
            Axis::default()
                .title("image")
                .style(Style::default().fg(Color::Gray))
                .bounds([0.0, xmax])
                .labels(vec!["0".to_string(), format!("{}", xmax as usize)]),
        )
        .y_axis(
            Axis::default()
                .title("dE")
                .style(Style::default().fg(Color::Gray))
                .bounds([ylo, yhi])
                .labels(vec![format!("{:.3}", ylo), format!("{:.3}", yhi)]),
        );
    f.render_widget(chart, area);
}

fn draw_force_history(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default().title(" Max Force ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let history = &app.telemetry.fmax_history;
    if history.is_empty() {
        return;
    }

    // log scale, so that late small forces stay visible
    let width = inner.width as usize;
    let logs: Vec<f64> = history
        .iter()
        .rev()
        .take(width)
        .map(|(_, fm)| fm.max(1e-6).log10())
        .collect();
    let lo = logs.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = logs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = (hi - lo).max(0.1);
    let data: Vec<u64> = logs
        .iter()
        .rev()
        .map(|l| (1.0 + 10.0 * (l - lo) / range) as u64)
        .collect();

    let last = history.back().map(|&(_, fm)| fm).unwrap_or(0.0);
    let spark = Sparkline::default()
        .block(
            Block::default()
                .title(format!("fmax per sub-step (last {:.4})", last))
                .borders(Borders::NONE),
        )
        .style(Style::default().fg(COL_ACCENT))
        .data(&data);
    f.render_widget(spark, inner);
}

fn draw_logs(f: &mut Frame, area: Rect) {
    let widget = TuiLoggerWidget::default()
        .block(Block::default().title(" System Log ").borders(Borders::ALL))
        .style_error(Style::default().fg(COL_FAIL))
        .style_warn(Style::default().fg(COL_HIGHLIGHT))
        .style_info(Style::default().fg(Color::Gray))
        .style_debug(Style::default().fg(Color::DarkGray));
    f.render_widget(widget, area);
}

fn draw_convergence_gauge(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default().title(" Convergence ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let target = app.config.fmax;
    let (ratio, label) = match &app.last_cycle {
        Some(c) if c.fmax > 0.0 => (
            (target / c.fmax).clamp(0.0, 1.0),
            format!("fmax {:.4} / target {}", c.fmax, target),
        ),
        Some(c) => (1.0, format!("fmax {:.4}", c.fmax)),
        None => (0.0, format!("target {}", target)),
    };
    let color = if app.converged == Some(true) {
        COL_SUCCESS
    } else {
        COL_ACCENT
    };

    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(color).bg(Color::DarkGray))
        .ratio(ratio)
        .label(label);
    f.render_widget(gauge, inner);
}

fn draw_stats(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default().title(" Statistics ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let kv = |k: &str, v: String, col: Color| -> Line {
        Line::from(vec![
            Span::styled(format!("{:<12}", k), Style::default().fg(Color::Gray)),
            Span::styled(v, Style::default().fg(col)),
        ])
    };

    let barrier = app
        .ts_index
        .and_then(|m| app.relative_energies().get(m).copied())
        .map(|e| format!("{:.5}", e))
        .unwrap_or_else(|| "-".to_string());
    let ts = app
        .ts_index
        .map(|m| m.to_string())
        .unwrap_or_else(|| "-".to_string());

    let mut text = vec![
        kv("Images:", app.energies.len().to_string(), COL_HIGHLIGHT),
        kv("Cycle:", format!("{} / {}", app.cycle, app.config.max_cycles), COL_HIGHLIGHT),
        kv("TS image:", ts, COL_HIGHLIGHT),
        kv("Barrier:", barrier, COL_SUCCESS),
        kv("Calls:", app.evaluator_calls.to_string(), COL_ACCENT),
    ];
    if let Some(err) = &app.error {
        text.push(kv("Error:", err.clone(), COL_FAIL));
    }

    f.render_widget(Paragraph::new(text).wrap(Wrap { trim: true }), inner);
}

fn draw_profile_table(f: &mut Frame, app: &mut AppState, area: Rect) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(area);

    if app.energies.is_empty() {
        f.render_widget(
            Paragraph::new("Waiting for the first evaluation...")
                .block(Block::default().borders(Borders::ALL).title(" Images "))
                .alignment(Alignment::Center),
            cols[0],
        );
    } else {
        let header_cells = ["Image", "Energy", "E - E0", ""]
            .iter()
            .map(|h| Cell::from(*h).style(Style::default().fg(COL_HEADER)));
        let header = Row::new(header_cells).height(1).bottom_margin(1);

        let rel = app.relative_energies();
        let rows = app.energies.iter().zip(&rel).enumerate().map(|(i, (e, r))| {
            let mark = if app.ts_index == Some(i) { "TS" } else { "" };
            let style = if app.ts_index == Some(i) {
                Style::default().fg(COL_HIGHLIGHT)
            } else {
                Style::default()
            };
            Row::new(vec![
                Cell::from(format!("{:02}", i)),
                Cell::from(format!("{:.6}", e)),
                Cell::from(format!("{:.5}", r)),
                Cell::from(mark),
            ])
            .style(style)
            .height(1)
        });

        let t = Table::new(
            rows,
            &[
                Constraint::Length(6),
                Constraint::Length(18),
                Constraint::Length(14),
                Constraint::Min(3),
            ],
        )
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" Images ({}) ", app.energies.len())),
        )
        .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED));

        f.render_stateful_widget(t, cols[0], &mut app.profile_state);
    }

    let items: Vec<ListItem> = app
        .logs
        .iter()
        .rev()
        .map(|line| {
            let style = if line.contains("failed") {
                Style::default().fg(COL_FAIL)
            } else if line.contains(">>>") {
                Style::default().fg(COL_SUCCESS)
            } else {
                Style::default().fg(Color::Gray)
            };
            ListItem::new(Line::from(vec![
                Span::styled(">", Style::default().fg(Color::DarkGray)),
                Span::raw(" "),
                Span::raw(line.as_str()),
            ]))
            .style(style)
        })
        .collect();
    let list = List::new(items).block(Block::default().title(" Stages ").borders(Borders::ALL));
    f.render_widget(list, cols[1]);
}

fn draw_config(f: &mut Frame, app: &AppState, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Run Parameters ");
    let inner = block.inner(area);
    f.render_widget(block, area);

    let c = &app.config;

    let kv = |k: &str, v: String| -> ListItem {
        ListItem::new(Line::from(vec![
            Span::styled(format!("{:<20}", k), Style::default().fg(COL_ACCENT)),
            Span::raw(v),
        ]))
    };

    let items = vec![
        kv("Images:", c.nimages.to_string()),
        kv("Interpolation:", c.interpolation.scheme.to_string()),
        kv("Evaluator:", format!("{:?}", c.evaluator)),
        kv("Batch:", c.batch.to_string()),
        kv("Keep distances:", c.keep_image_distance.to_string()),
        kv("Refine waypoint:", c.refine_through_waypoint.to_string()),
        ListItem::new(Line::from(" ")),
        kv("Target fmax:", format!("{}", c.fmax)),
        kv("Max cycles:", c.max_cycles.to_string()),
        kv("Pairwise:", format!("fmax {} / {} steps", c.pairwise.fmax, c.pairwise.max_steps)),
        kv("TS only:", format!("fmax {} / {} steps", c.ts_only.fmax, c.ts_only.max_steps)),
        kv("Full:", format!("{} steps", c.full_max_steps)),
        kv("Fixed atoms:", format!("{:?}", c.fixed_atoms)),
        ListItem::new(Line::from(" ")),
        kv("FIRE dt / dt_max:", format!("{} / {}", c.fire.dt, c.fire.dt_max)),
        kv("FIRE max disp:", format!("{} Å", c.fire.max_disp)),
    ];

    let list = List::new(items).block(Block::default().borders(Borders::NONE));
    f.render_widget(list, inner);
}

fn draw_fullscreen_viewer(f: &mut Frame, app: &AppState, area: Rect) {
    match &app.ts_image {
        Some(s) => {
            let title = format!(" TS Image {} ", app.ts_index.map(|m| m.to_string()).unwrap_or_default());
            draw_structure_3d(f, app, area, s, &title);
        }
        None => {
            let p = Paragraph::new("No TS image yet.\nIt is published after the first cycle.")
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::ALL));
            f.render_widget(p, area);
        }
    }
}

fn element_color(symbol: &str) -> (Color, f64) {
    match symbol {
        "H" => (Color::White, 0.3),
        "C" => (Color::Gray, 0.5),
        "N" => (Color::LightBlue, 0.5),
        "O" => (Color::LightRed, 0.5),
        "S" => (Color::Yellow, 0.6),
        _ => (COL_ACCENT, 0.6),
    }
}

fn draw_structure_3d(f: &mut Frame, app: &AppState, area: Rect, structure: &AtomicStructure, title: &str) {
    use nalgebra::{Rotation3, Vector3};

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded);

    let inner_area = block.inner(area);
    f.render_widget(block, area);

    if inner_area.width < 1 || inner_area.height < 1 || structure.atoms.is_empty() {
        return;
    }

    // center on the geometric center before rotating
    let n = structure.natoms() as f64;
    let center = structure
        .atoms
        .iter()
        .fold(Vector3::zeros(), |acc, a| acc + a.position.coords)
        / n;

    let rot_y = Rotation3::from_axis_angle(&Vector3::y_axis(), app.viewport.azimuth);
    let rot_x = Rotation3::from_axis_angle(&Vector3::x_axis(), app.viewport.elevation);
    let mut render_atoms: Vec<(f64, f64, f64, Color, f64)> = structure
        .atoms
        .iter()
        .map(|a| {
            let p_rot = rot_x * rot_y * (a.position.coords - center);
            let (color, size) = element_color(&a.symbol);
            (p_rot.x, p_rot.y, p_rot.z, color, size)
        })
        .collect();

    if render_atoms
        .iter()
        .any(|(x, y, z, _, _)| x.is_nan() || y.is_nan() || z.is_nan())
    {
        f.render_widget(
            Paragraph::new("Error: NaN Coordinates").style(Style::default().fg(COL_FAIL)),
            inner_area,
        );
        return;
    }

    let max_coord = render_atoms
        .iter()
        .flat_map(|(x, y, _, _, _)| [x.abs(), y.abs()])
        .fold(0.0, f64::max)
        .max(1.0);
    let bound = max_coord * 1.2;

    render_atoms.sort_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));

    let canvas = Canvas::default()
        .background_color(COL_BG)
        .x_bounds([-bound, bound])
        .y_bounds([-bound, bound])
        .paint(|ctx| {
            let zoom = app.viewport.zoom;
            for i in 0..render_atoms.len() {
                for j in (i + 1)..render_atoms.len() {
                    let a = &render_atoms[i];
                    let b = &render_atoms[j];
                    let d2 = (a.0 - b.0).powi(2) + (a.1 - b.1).powi(2) + (a.2 - b.2).powi(2);
                    // crude bond criterion, 1.8 Å
                    if d2 < 3.24 {
                        let avg_z = (a.2 + b.2) / 2.0;
                        let color = if avg_z < 0.0 { Color::DarkGray } else { COL_BOND };
                        ctx.draw(&CanvasLine {
                            x1: a.0 * zoom,
                            y1: a.1 * zoom,
                            x2: b.0 * zoom,
                            y2: b.1 * zoom,
                            color,
                        });
                    }
                }
            }
            for (x, y, z, col, size) in &render_atoms {
                let perspective = (1.0 + z * 0.05).clamp(0.5, 1.5);
                ctx.draw(&Circle {
                    x: *x * zoom,
                    y: *y * zoom,
                    radius: *size * zoom * perspective,
                    color: *col,
                });
            }
        });

    f.render_widget(canvas, inner_area);

    let rot_status = if app.viewport.auto_rotate {
        "Auto-Rot: ON"
    } else {
        "Auto-Rot: OFF"
    };
    let overlay = Paragraph::new(rot_status)
        .style(Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC));
    let overlay_area = Rect {
        x: inner_area.x + inner_area.width.saturating_sub(14),
        y: inner_area.y,
        width: 14u16.min(inner_area.width),
        height: 1,
    };
    f.render_widget(overlay, overlay_area);
}
