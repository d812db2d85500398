//! Result and inventory tables.
//!
//! [`render_results`] turns a stage's result records into the fixed-width
//! report. The listing functions render the profile, multi-profile and
//! template inventories.

use colored::Colorize;
use std::fmt::Write as _;

use crate::error::{Error, Result};
use crate::executor::collector::{HeaderMode, ResultRecord};
use crate::profile::{ProfileRegistry, Profile};
use crate::template::TemplateEntry;

/// Device column label.
pub const DEVICE_LABEL: &str = "device";

/// Built-in value column label.
pub const DEFAULT_VALUE_LABEL: &str = "template operation output";

/// Width of the default result table.
const RESULT_TABLE_WIDTH: usize = 119;

/// Extra width around a custom header label.
const CUSTOM_HEADER_PADDING: usize = 19;

/// Render the result table for `records`.
///
/// A diff record anywhere in the buffer is printed alone. Otherwise text
/// payloads are tabulated sorted by device; structured and empty payloads
/// are skipped. When the last record holds multi-line text the wide
/// free-form layout is used.
pub fn render_results(records: &[ResultRecord], header: &HeaderMode) -> String {
    let mut out = String::new();
    if records.is_empty() {
        return out;
    }

    if let Some(diff) = records.iter().find(|r| r.is_diff()) {
        if let Some(text) = diff.payload.text() {
            let _ = writeln!(out, "{}", text);
        }
        return out;
    }

    let mut rows: Vec<(String, String)> = records
        .iter()
        .filter_map(|r| {
            r.payload
                .text()
                .filter(|t| !t.is_empty())
                .map(|t| (r.id.clone(), t))
        })
        .collect();
    rows.sort();

    let multi_line = records
        .last()
        .and_then(|r| r.payload.text())
        .is_some_and(|t| t.lines().count() > 1);

    let (label, width, show_header) = match header {
        HeaderMode::Default => (DEFAULT_VALUE_LABEL, RESULT_TABLE_WIDTH, true),
        HeaderMode::Custom(h) => (h.as_str(), CUSTOM_HEADER_PADDING + h.chars().count(), true),
        HeaderMode::Suppressed => (DEFAULT_VALUE_LABEL, RESULT_TABLE_WIDTH, false),
    };

    if multi_line {
        let sep = format!("|{}", "-".repeat(width));
        if show_header {
            let _ = writeln!(out, "{}", sep);
            let _ = writeln!(out, "| {:^12} | {:^100} | ", DEVICE_LABEL, label);
            let _ = writeln!(out, "{}", sep);
        }
        for (id, text) in &rows {
            let _ = writeln!(out, "|# {:<12} {:>100}  ", id, text);
            let _ = writeln!(out, "{}", sep);
        }
    } else if *header != HeaderMode::Default {
        let sep = "-".repeat(width);
        if show_header {
            let _ = writeln!(out, "{}", sep);
            let _ = writeln!(out, "| {:^12} | {} | ", DEVICE_LABEL, label);
            let _ = writeln!(out, "{}", sep);
        }
        let pad = match header {
            HeaderMode::Custom(h) => h.chars().count(),
            _ => 0,
        };
        for (id, text) in &rows {
            let _ = writeln!(out, "| {:^12} | {:<pad$} | ", id, text, pad = pad);
            let _ = writeln!(out, "{}", sep);
        }
    } else {
        let sep = "-".repeat(width);
        let _ = writeln!(out, "{}", sep);
        let _ = writeln!(out, "| {:^12} | {:^100} | ", DEVICE_LABEL, label);
        let _ = writeln!(out, "{}", sep);
        for (id, text) in &rows {
            let _ = writeln!(out, "| {:^12} | {:>100} | ", id, text);
            let _ = writeln!(out, "{}", sep);
        }
    }

    out
}

/// `# | name | comment` table of profiles
pub fn list_profiles(registry: &ProfileRegistry) -> String {
    list_table(
        "push profile",
        registry
            .profiles
            .iter()
            .map(|(name, p)| (name.as_str(), p.comment.as_str())),
    )
}

/// `# | name | comment` table of multi-profiles
pub fn list_multi_profiles(registry: &ProfileRegistry) -> String {
    list_table(
        "multi push profile",
        registry
            .multi_profiles
            .iter()
            .map(|(name, m)| (name.as_str(), m.comment.as_str())),
    )
}

fn list_table<'a>(title: &str, rows: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    let sep = "-".repeat(95);
    let mut out = String::new();
    let _ = writeln!(out, "{}", sep);
    let _ = writeln!(
        out,
        "{}",
        format!("| {:>3} | {:^21} |  {:^60} |", "#", title, "comment").bold()
    );
    let _ = writeln!(out, "{}", sep);
    for (nr, (name, comment)) in rows.enumerate() {
        let _ = writeln!(out, "| {:>3} | {:>21} |  {:>60} |", nr + 1, name, comment);
        let _ = writeln!(out, "{}", sep);
    }
    out
}

/// Resolve `all`, a name or a 1-based index against `names`.
fn select<'a>(names: impl Iterator<Item = &'a String>, key: &str) -> Option<Vec<&'a str>> {
    let names: Vec<&str> = names.map(String::as_str).collect();
    if key == "all" {
        return Some(names);
    }
    if let Some(name) = names.iter().find(|n| **n == key) {
        return Some(vec![*name]);
    }
    let index: usize = key.parse().ok()?;
    index
        .checked_sub(1)
        .and_then(|i| names.get(i))
        .map(|name| vec![*name])
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "Y"
    } else {
        "N"
    }
}

fn profile_rows(name: &str, profile: &Profile) -> Vec<[String; 8]> {
    profile
        .device_names()
        .map(|device| {
            let settings = profile.settings(device).unwrap_or_default();
            [
                name.to_string(),
                device.to_string(),
                settings.template_vars.unwrap_or_default(),
                settings.template.unwrap_or_default(),
                settings.input.unwrap_or_default(),
                yes_no(settings.exec.unwrap_or(false)).to_string(),
                settings
                    .eph_inst
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "N".to_string()),
                settings
                    .archive
                    .map(|a| format!("rendered:{}, J2:{}", yes_no(a.rendered), yes_no(a.template)))
                    .unwrap_or_else(|| "N".to_string()),
            ]
        })
        .collect()
}

/// Device settings of one profile, or of all with `all`
pub fn show_profiles(registry: &ProfileRegistry, key: &str) -> Result<String> {
    let selected = select(registry.profiles.keys(), key)
        .ok_or_else(|| Error::ProfileNotFound(key.to_string()))?;

    let sep = "-".repeat(168);
    let mut out = String::new();
    let _ = writeln!(out, "{}", sep);
    let _ = writeln!(
        out,
        "{}",
        format!(
            "| {:^21} | {:^13} | {:^15} | {:^26} | {:^25} | {:>4} | {:^20} | {:^19} |",
            "profile",
            "device",
            "template-vars",
            "template",
            "input",
            "exec",
            "eph-instance:fmt",
            "archival override"
        )
        .bold()
    );

    for name in selected {
        let Some(profile) = registry.profiles.get(name) else {
            continue;
        };
        let _ = writeln!(out, "{}", sep);
        for (i, row) in profile_rows(name, profile).iter().enumerate() {
            let shown = if i == 0 { row[0].as_str() } else { "" };
            let _ = writeln!(
                out,
                "| {:>21} | {:>13} | {:>15} | {:>26} | {:>25} | {:>4} | {:>20} | {:>19} |",
                shown, row[1], row[2], row[3], row[4], row[5], row[6], row[7]
            );
        }
    }
    let _ = writeln!(out, "{}", sep);
    Ok(out)
}

/// Stages of one multi-profile, or of all with `all`
pub fn show_multi_profiles(registry: &ProfileRegistry, key: &str) -> Result<String> {
    let selected = select(registry.multi_profiles.keys(), key)
        .ok_or_else(|| Error::MultiProfileNotFound(key.to_string()))?;

    let delay = |secs: u64| {
        if secs == 0 {
            String::new()
        } else {
            secs.to_string()
        }
    };

    let sep = "-".repeat(83);
    let mut out = String::new();
    let _ = writeln!(out, "{}", sep);
    let _ = writeln!(
        out,
        "{}",
        format!(
            "| {:^21} | {:^21} | {:^14} | {:^14} | ",
            "multi profile", "profile", "pre-delay[s]", "post-delay[s]"
        )
        .bold()
    );

    for name in selected {
        let Some(multi) = registry.multi_profiles.get(name) else {
            continue;
        };
        let _ = writeln!(out, "{}", sep);
        for (i, stage) in multi.stages.iter().enumerate() {
            let shown = if i == 0 { name } else { "" };
            let _ = writeln!(
                out,
                "| {:>21} | {:>21} | {:>14} | {:>14} |",
                shown,
                stage.profile,
                delay(stage.pre_delay),
                delay(stage.post_delay)
            );
        }
    }
    let _ = writeln!(out, "{}", sep);
    Ok(out)
}

/// `# | template | md5` table
pub fn list_templates(root_label: &str, entries: &[TemplateEntry]) -> String {
    let sep = "-".repeat(87);
    let mut out = String::new();
    let _ = writeln!(out, "{}", sep);
    let _ = writeln!(
        out,
        "{}",
        format!(
            "| {:>3} | {:^40} | {:^34} |",
            "#",
            format!("{}/*.j2", root_label),
            "md5"
        )
        .bold()
    );
    let _ = writeln!(out, "{}", sep);
    for (nr, entry) in entries.iter().enumerate() {
        let _ = writeln!(out, "| {:>3} | {:>40} | {:>34} |", nr + 1, entry.name, entry.md5);
        let _ = writeln!(out, "{}", sep);
    }
    out
}
