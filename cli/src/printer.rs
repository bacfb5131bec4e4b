//! Renders sink records for stdout.

use std::io::Write;

use treewatch_directory_watcher::{EventKind, WatchEvent};

/// One human-readable line, without the trailing newline.
///
/// ```text
/// CREATE        /w/a/
/// RENAMED       /w/old.txt -> /w/new.txt
/// ```
pub fn format_line(event: &WatchEvent) -> String {
    let suffix = if event.is_dir && event.kind != EventKind::Overflow {
        "/"
    } else {
        ""
    };
    let path = event.path.display();
    match &event.rename_from {
        Some(from) => format!(
            "{:<13} {}{suffix} -> {path}{suffix}",
            event.kind.as_str(),
            from.display()
        ),
        None => format!("{:<13} {path}{suffix}", event.kind.as_str()),
    }
}

/// Write `event` as a line of text or a JSON object.
pub fn write_event<W: Write>(out: &mut W, event: &WatchEvent, json: bool) -> anyhow::Result<()> {
    if json {
        serde_json::to_writer(&mut *out, event)?;
        writeln!(out)?;
    } else {
        writeln!(out, "{}", format_line(event))?;
    }
    Ok(())
}
