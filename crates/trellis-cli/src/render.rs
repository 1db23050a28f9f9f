use std::io::Write;

use trellis_core::{
    BoardEvent, BoardSnapshot, ColumnSnapshot, FlatPageSnapshot, Item, Notice, Severity,
};
use unicode_width::UnicodeWidthStr;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    #[tracing::instrument(skip_all, fields(version = snapshot.version))]
    pub fn print_board<W: Write>(
        &self,
        mut out: W,
        snapshot: &BoardSnapshot,
    ) -> anyhow::Result<()> {
        for column in &snapshot.columns {
            self.print_column(&mut out, column, &snapshot.pending)?;
            writeln!(out)?;
        }
        if !snapshot.pending.is_empty() {
            let ids: Vec<String> = snapshot.pending.iter().map(ToString::to_string).collect();
            writeln!(out, "saving: {}", ids.join(", "))?;
        }
        Ok(())
    }

    fn print_column<W: Write>(
        &self,
        mut out: W,
        column: &ColumnSnapshot,
        pending: &[trellis_core::ItemId],
    ) -> anyhow::Result<()> {
        let title = format!("{} ({})", column.status, column.total_count);
        writeln!(out, "{}", self.paint(&title, "1"))?;

        let more = if column.is_loading {
            "loading"
        } else if column.has_more {
            "more"
        } else {
            "end"
        };
        writeln!(
            out,
            "page {}/{} [{more}]",
            column.current_page,
            column.total_pages.max(1)
        )?;
        if let Some(err) = &column.last_error {
            writeln!(out, "{}", self.paint(&format!("! {err}"), "31"))?;
        }

        let rows = column
            .items
            .iter()
            .map(|item| {
                let marker = if pending.contains(&item.id) { "*" } else { "" };
                vec![
                    self.paint(&format!("{}{marker}", item.id), "33"),
                    item.priority.to_string(),
                    format!("{}%", item.progress),
                    item.name.clone(),
                ]
            })
            .collect();

        write_table(out, headers(&["ID", "Priority", "Progress", "Name"]), rows)
    }

    #[tracing::instrument(skip_all, fields(page = flat.page))]
    pub fn print_grid<W: Write>(&self, mut out: W, flat: &FlatPageSnapshot) -> anyhow::Result<()> {
        let rows = flat.items.iter().map(|item| self.grid_row(item)).collect();
        write_table(
            &mut out,
            headers(&["ID", "Status", "Priority", "Progress", "Category", "Name"]),
            rows,
        )?;
        writeln!(
            out,
            "page {}/{} ({} items, {} per page)",
            flat.page,
            flat.total_pages.max(1),
            flat.total_count,
            flat.page_size
        )?;
        if let Some(err) = &flat.last_error {
            writeln!(out, "{}", self.paint(&format!("! {err}"), "31"))?;
        }
        Ok(())
    }

    fn grid_row(&self, item: &Item) -> Vec<String> {
        vec![
            self.paint(&item.id.to_string(), "33"),
            item.status.to_string(),
            item.priority.to_string(),
            format!("{}%", item.progress),
            item.category.clone().unwrap_or_default(),
            item.name.clone(),
        ]
    }

    /// One line per event: the notice if there is one, then the event as
    /// JSON.
    pub fn print_event<W: Write>(&self, mut out: W, event: &BoardEvent) -> anyhow::Result<()> {
        if let Some(notice) = event.notice() {
            writeln!(out, "{}", self.notice(&notice))?;
        }
        writeln!(out, "  {}", serde_json::to_string(event)?)?;
        Ok(())
    }

    pub fn notice(&self, notice: &Notice) -> String {
        let (tag, code) = match notice.severity {
            Severity::Success => ("ok", "32"),
            Severity::Info => ("info", "36"),
            Severity::Warning => ("warn", "33"),
            Severity::Error => ("error", "31"),
        };
        format!("{} {}", self.paint(&format!("[{tag}]"), code), notice.message)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if self.color {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }
}

fn headers(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers.iter().map(|header| visible_width(header)).collect();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(visible_width(cell));
        }
    }

    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    write_row(&mut writer, &headers, &widths)?;
    writeln!(writer, "{}", rule.join(" "))?;
    for row in &rows {
        write_row(&mut writer, row, &widths)?;
    }
    Ok(())
}

fn write_row<W: Write>(mut writer: W, cells: &[String], widths: &[usize]) -> anyhow::Result<()> {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| {
            let padding = width.saturating_sub(visible_width(cell));
            format!("{cell}{}", " ".repeat(padding))
        })
        .collect();
    writeln!(writer, "{}", padded.join(" ").trim_end())?;
    Ok(())
}

/// Terminal columns `cell` takes up. Only the SGR sequences `paint` emits
/// are skipped.
fn visible_width(cell: &str) -> usize {
    let mut parts = cell.split('\x1b');
    let lead = parts.next().map_or(0, UnicodeWidthStr::width);
    lead + parts
        .map(|part| part.split_once('m').map_or(0, |(_, text)| text.width()))
        .sum::<usize>()
}

#[cfg(test)]
mod tests {
    use trellis_core::{BoardEvent, BoardState, ItemId, Status};

    use super::{Renderer, visible_width, write_table};

    #[test]
    fn empty_board_lists_every_column() {
        let board = BoardState::initialize(&[Status::Pending, Status::Done], 25);
        let snapshot = board.snapshot(0, vec![]);

        let mut out = Vec::new();
        Renderer::new(false)
            .print_board(&mut out, &snapshot)
            .expect("render");
        let text = String::from_utf8(out).expect("utf8");

        assert!(text.contains("Pending (0)"));
        assert!(text.contains("Done (0)"));
        assert!(text.contains("page 1/1 [more]"));
        assert!(!text.contains("saving:"));
    }

    #[test]
    fn table_pads_by_visible_width() {
        let mut out = Vec::new();
        write_table(
            &mut out,
            vec!["ID".to_string(), "Name".to_string()],
            vec![
                vec!["\x1b[33m7\x1b[0m".to_string(), "Étude".to_string()],
                vec!["120".to_string(), "x".to_string()],
            ],
        )
        .expect("table");
        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ID  Name");
        assert_eq!(lines[1], "--- -----");
        assert_eq!(lines[2], "\x1b[33m7\x1b[0m   Étude");
        assert_eq!(lines[3], "120 x");
    }

    #[test]
    fn painted_text_has_plain_width() {
        assert_eq!(visible_width("\x1b[1mPending (3)\x1b[0m"), 11);
        assert_eq!(visible_width("[ok] Étude"), 10);
        assert_eq!(visible_width(""), 0);
    }

    #[test]
    fn events_print_notice_and_json() {
        let mut out = Vec::new();
        Renderer::new(false)
            .print_event(&mut out, &BoardEvent::MutationRefused { item: ItemId(9) })
            .expect("render");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("[info] Item 9 is still being saved"));
        assert!(text.contains(r#""event":"mutation_refused""#));
    }
}
