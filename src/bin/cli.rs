use std::io::{self, Write};

use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::{AnyValue, DataFrame};
use task_engine::calendar::CalendarId;
use task_engine::config::EngineConfig;
use task_engine::graph::RelationKind;
use task_engine::logging::init_logging;
use task_engine::metadata::ProjectMetadata;
use task_engine::persistence::{StorageBackend, export_task_list_csv};
use task_engine::table::task_table;
use task_engine::{RecalcReport, Task, TaskId, TaskManager};

fn cell_text(av: &AnyValue) -> String {
    match av {
        AnyValue::Null => String::new(),
        AnyValue::UInt32(v) => v.to_string(),
        AnyValue::Int64(v) => v.to_string(),
        AnyValue::Float64(v) => format!("{v:.2}"),
        AnyValue::Boolean(v) => if *v { "*" } else { "" }.to_string(),
        AnyValue::String(s) => s.to_string(),
        _ => av.to_string(),
    }
}

fn render_df_as_text_table(df: &DataFrame) -> String {
    let columns = df.get_columns();
    let col_names: Vec<String> = columns.iter().map(|c| c.name().to_string()).collect();

    let mut cells: Vec<Vec<String>> = Vec::with_capacity(df.height());
    for row_idx in 0..df.height() {
        let row = columns
            .iter()
            .map(|col| col.get(row_idx).map(|av| cell_text(&av)).unwrap_or_default())
            .collect();
        cells.push(row);
    }

    let mut widths: Vec<usize> = col_names.iter().map(|n| n.len()).collect();
    for row in &cells {
        for (ci, s) in row.iter().enumerate() {
            widths[ci] = widths[ci].max(s.len());
        }
    }

    let mut sep = String::from("+");
    for w in &widths {
        sep.push_str(&"-".repeat(*w + 2));
        sep.push('+');
    }

    let render_row = |values: &[String]| {
        let mut line = String::from("|");
        for (ci, s) in values.iter().enumerate() {
            line.push(' ');
            line.push_str(s);
            line.push_str(&" ".repeat(widths[ci].saturating_sub(s.len())));
            line.push_str(" |");
        }
        line
    };

    let mut out = String::new();
    out.push_str(&sep);
    out.push('\n');
    out.push_str(&render_row(&col_names));
    out.push('\n');
    out.push_str(&sep);
    out.push('\n');
    for row in &cells {
        out.push_str(&render_row(row));
        out.push('\n');
    }
    out.push_str(&sep);
    out.push('\n');
    out
}

fn print_help() {
    println!(
        "Commands:\n  help                                   Show this help\n  show                                   Show the task table\n  tree                                   Show the task outline\n  add <parent> <name> <hours>            Insert a task (parent 0 = top level)\n  remove <id>                            Remove a task and its subtree\n  move <id> <parent> [first|last]        Move a task under another parent\n  link <pred> <succ> [fs|ss|ff|sf] [lag_hours]\n                                         Add a dependency\n  unlink <pred> <succ>                   Remove a dependency\n  work <id> <hours>                      Set requested work\n  block on|off                           Suspend or resume recalculation\n  recalc                                 Force a recalculation pass\n  critical                               Show the critical path\n  holiday <YYYY-MM-DD>                   Mark a date non-working\n  start <YYYY-MM-DD HH:MM>               Set the project start\n  save <json|sqlite> <path>              Persist the project\n  load <json|sqlite> <path>              Load a project\n  export csv <path>                      Export the task list as CSV\n  quit|exit                              Exit"
    );
}

fn parse_id(s: Option<&str>) -> Option<TaskId> {
    s.and_then(|s| s.parse::<u32>().ok()).map(TaskId)
}

fn parse_hours(s: Option<&str>) -> Option<i64> {
    s.and_then(|s| s.parse::<f64>().ok())
        .map(|hours| (hours * 3600.0).round() as i64)
}

fn print_report(label: &str, report: &RecalcReport, manager: &TaskManager) {
    println!(
        "{label}: {} task(s) changed ({})",
        report.changed.len(),
        manager.summary().to_cli_summary()
    );
    for (task, err) in &report.failures {
        println!("  task {task} unschedulable: {err}");
    }
}

fn show(manager: &TaskManager) {
    match task_table(manager) {
        Ok(df) => println!("{}", render_df_as_text_table(&df)),
        Err(e) => println!("Error rendering table: {e}"),
    }
}

fn main() {
    init_logging(None);

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            EngineConfig::default()
        }
    };
    let mut manager = match TaskManager::with_config(config, ProjectMetadata::default()) {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            TaskManager::new()
        }
    };

    println!("Task Engine (CLI) - type 'help' for commands\n");

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let mut parts = input.split_whitespace();
        let cmd = parts.next().unwrap_or("");

        match cmd {
            "help" => print_help(),
            "quit" | "exit" => break,
            "show" => show(&manager),
            "tree" => print!("{}", manager.dump_task_tree()),
            "add" => {
                let parent = parse_id(parts.next());
                let name = parts.next();
                let work = parse_hours(parts.next());
                match (parent, name, work) {
                    (Some(parent), Some(name), Some(work)) => {
                        match manager.insert_task(parent, None, Task::new(name, work)) {
                            Ok(id) => println!("Added task {id}."),
                            Err(e) => println!("Error: {e}"),
                        }
                    }
                    _ => println!("Usage: add <parent> <name> <hours>"),
                }
            }
            "remove" => match parse_id(parts.next()) {
                Some(id) => match manager.remove_task(id) {
                    Ok(removed) => println!("Removed {} task(s).", removed.len()),
                    Err(e) => println!("Error: {e}"),
                },
                None => println!("Usage: remove <id>"),
            },
            "move" => {
                let id = parse_id(parts.next());
                let parent = parse_id(parts.next());
                let first = matches!(parts.next(), Some("first"));
                match (id, parent) {
                    (Some(id), Some(parent)) => match manager.move_task(id, parent, None, first) {
                        Ok(()) => println!("Moved task {id}."),
                        Err(e) => println!("Error: {e}"),
                    },
                    _ => println!("Usage: move <id> <parent> [first|last]"),
                }
            }
            "link" => {
                let pred = parse_id(parts.next());
                let succ = parse_id(parts.next());
                let relation = match parts.next().map(str::parse::<RelationKind>) {
                    None => RelationKind::FinishToStart,
                    Some(Ok(relation)) => relation,
                    Some(Err(e)) => {
                        println!("Error: {e}");
                        continue;
                    }
                };
                let lag = parse_hours(parts.next()).unwrap_or(0);
                match (pred, succ) {
                    (Some(pred), Some(succ)) => {
                        match manager.add_dependency(pred, succ, relation, lag) {
                            Ok(()) => println!("Linked {pred} -> {succ} ({relation})."),
                            Err(e) => println!("Error: {e}"),
                        }
                    }
                    _ => println!("Usage: link <pred> <succ> [fs|ss|ff|sf] [lag_hours]"),
                }
            }
            "unlink" => match (parse_id(parts.next()), parse_id(parts.next())) {
                (Some(pred), Some(succ)) => match manager.remove_dependency(pred, succ) {
                    Ok(_) => println!("Unlinked {pred} -> {succ}."),
                    Err(e) => println!("Error: {e}"),
                },
                _ => println!("Usage: unlink <pred> <succ>"),
            },
            "work" => match (parse_id(parts.next()), parse_hours(parts.next())) {
                (Some(id), Some(work)) => match manager.set_task_work(id, work) {
                    Ok(()) => println!("Work set."),
                    Err(e) => println!("Error: {e}"),
                },
                _ => println!("Usage: work <id> <hours>"),
            },
            "block" => match parts.next() {
                Some("on") => {
                    manager.set_block_scheduling(true);
                    println!("Scheduling blocked.");
                }
                Some("off") => {
                    let report = manager.set_block_scheduling(false);
                    print_report("Scheduling resumed", &report, &manager);
                }
                _ => println!("Usage: block on|off"),
            },
            "recalc" => {
                let report = manager.recalc(true);
                print_report("Recalculated", &report, &manager);
            }
            "critical" => {
                let path = manager
                    .critical_path()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" -> ");
                println!("Critical path: {path}");
            }
            "holiday" => match parts
                .next()
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            {
                Some(date) => {
                    match manager.edit_calendars(|calendars| {
                        calendars.add_holiday(CalendarId::ROOT, date)
                    }) {
                        Ok(()) => println!("Holiday {date} added."),
                        Err(e) => println!("Error: {e}"),
                    }
                }
                None => println!("Usage: holiday <YYYY-MM-DD>"),
            },
            "start" => {
                let rest = parts.collect::<Vec<_>>().join(" ");
                match NaiveDateTime::parse_from_str(&rest, "%Y-%m-%d %H:%M") {
                    Ok(start) => {
                        manager.set_project_start(start);
                        println!("Project start set to {}.", start.format("%Y-%m-%d %H:%M"));
                    }
                    Err(_) => println!("Usage: start <YYYY-MM-DD HH:MM>"),
                }
            }
            "save" | "load" => {
                let backend = match (parts.next(), parts.next()) {
                    (Some(kind), Some(path)) => StorageBackend::from_kind(kind, path),
                    _ => None,
                };
                let Some(backend) = backend else {
                    println!("Usage: {cmd} <json|sqlite> <path>");
                    continue;
                };
                if cmd == "save" {
                    match backend.save(&manager) {
                        Ok(()) => println!("Project saved."),
                        Err(e) => println!("Error saving project: {e}"),
                    }
                } else {
                    match backend.load_into(&mut manager) {
                        Ok(_) => {
                            println!("Project loaded ({}).", manager.summary().to_cli_summary())
                        }
                        Err(e) => println!("Error loading project: {e}"),
                    }
                }
            }
            "export" => match (parts.next(), parts.next()) {
                (Some("csv"), Some(path)) => match export_task_list_csv(&manager, path) {
                    Ok(()) => println!("Task list exported to {path}."),
                    Err(e) => println!("Error exporting: {e}"),
                },
                _ => println!("Usage: export csv <path>"),
            },
            _ => println!("Unknown command '{cmd}'. Type 'help' for commands."),
        }
    }
}
