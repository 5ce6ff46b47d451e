use chrono::TimeDelta;
use trackmove::{Activity, ActivityRef, BackendDiff, DiffEntry, SyncReport, TimeRange};

const MAX_TITLE_WIDTH: usize = 40;

pub fn print_activity_table(activities: &[Activity]) {
    if activities.is_empty() {
        println!("no activities");
        return;
    }

    let title_width = activities
        .iter()
        .map(|a| a.title().chars().count())
        .max()
        .unwrap_or(0)
        .clamp(5, MAX_TITLE_WIDTH);

    for activity in activities {
        let summary = activity.summary();
        let id = activity.id().map(|id| id.as_str()).unwrap_or("-");
        println!(
            "  {}  {:>7}  {:>6}  {:<14}  {:<width$}  {}",
            time_column(summary.map(|s| s.time_range)),
            summary.map_or_else(String::new, |s| format_duration(s.time_range.duration())),
            summary.map_or_else(|| "?".to_owned(), |s| s.point_count.to_string()),
            truncate(activity.what().as_str(), 14),
            truncate(activity.title(), title_width),
            id,
            width = title_width,
        );
    }

    println!("\n{} activities", activities.len());
}

pub fn print_diff(diff: &BackendDiff) {
    println!("< {}\n> {}\n", diff.left_label, diff.right_label);
    for entry in diff.entries() {
        println!("{}", entry_line(&entry));
    }
    println!(
        "\n{} matched, {} only in {}, {} only in {}, {} overlapping",
        diff.matched.len(),
        diff.left_only.len(),
        diff.left_label,
        diff.right_only.len(),
        diff.right_label,
        diff.overlaps.len()
    );
}

pub fn print_sync_report(report: &SyncReport) {
    for planned in &report.planned {
        let verb = if planned.replaces.is_some() { "replace" } else { "copy" };
        println!("  would {verb}  {}", ref_line(&planned.activity));
    }
    for copied in &report.copied {
        println!("  copied  {} as {}", ref_line(&copied.source), copied.target_id);
    }
    for id in &report.removed_from_source {
        println!("  removed {id} from {}", report.source_label);
    }
    for overlap in &report.unresolved {
        println!(
            "  overlap {} / {}",
            ref_line(&overlap.left),
            ref_line(&overlap.right)
        );
    }
    for failure in &report.failed {
        eprintln!("  failed  {failure}");
    }
    println!("{report}");
}

fn entry_line(entry: &DiffEntry<'_>) -> String {
    match entry {
        DiffEntry::Matched(pair) => format!(
            "= {}  ({} / {})",
            ref_line(&pair.left),
            pair.left.id,
            pair.right.id
        ),
        DiffEntry::LeftOnly(a) => format!("< {}  ({})", ref_line(a), a.id),
        DiffEntry::RightOnly(a) => format!("> {}  ({})", ref_line(a), a.id),
        DiffEntry::Overlapping(o) => format!(
            "~ {}  ({}) overlaps {}  ({})",
            ref_line(&o.left),
            o.left.id,
            ref_line(&o.right),
            o.right.id
        ),
    }
}

fn ref_line(activity: &ActivityRef) -> String {
    format!(
        "{} {} {}",
        time_column(activity.time_range),
        activity.point_count,
        truncate(&activity.title, MAX_TITLE_WIDTH)
    )
}

fn time_column(range: Option<TimeRange>) -> String {
    match range {
        Some(range) => range.start.format("%Y-%m-%d %H:%M").to_string(),
        None => format!("{:<16}", "(no points)"),
    }
}

fn format_duration(duration: TimeDelta) -> String {
    let secs = duration.num_seconds().max(0);
    let (hours, minutes, seconds) = (secs / 3600, secs % 3600 / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h{minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m{seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{truncated}…")
    }
}
