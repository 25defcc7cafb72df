// Plain-text table rendering

use common::models::ExecutionDetail;

const HEADERS: [&str; 5] = ["EXECUTED AT", "KIND", "NAME", "URL", "VALUE"];

/// Render executions as a left-aligned table, one row per record
pub fn executions_table(executions: &[ExecutionDetail]) -> String {
    if executions.is_empty() {
        return "No executions recorded\n".to_string();
    }

    let rows: Vec<[String; 5]> = executions
        .iter()
        .map(|e| {
            [
                e.executed_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                e.entity_kind.clone(),
                e.entity_name.clone(),
                e.entity_url.clone(),
                e.observed_value.clone(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_row(&mut out, &HEADERS.map(String::from), &widths);
    for row in &rows {
        push_row(&mut out, row, &widths);
    }
    out
}

fn push_row(out: &mut String, cells: &[String; 5], widths: &[usize; 5]) {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = width))
        .collect::<Vec<_>>()
        .join("  ");
    out.push_str(line.trim_end());
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn detail(name: &str, value: &str) -> ExecutionDetail {
        ExecutionDetail {
            entity_name: name.to_string(),
            entity_url: format!("https://github.com/acme/{}", name),
            entity_kind: "repository".to_string(),
            observed_value: value.to_string(),
            executed_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_empty_table() {
        assert_eq!(executions_table(&[]), "No executions recorded\n");
    }

    #[test]
    fn test_columns_are_aligned() {
        let table = executions_table(&[detail("api", "abc"), detail("frontend", "def456")]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("EXECUTED AT"));

        let url_column = lines[0].find("URL").unwrap();
        assert_eq!(&lines[1][url_column..url_column + 8], "https://");
        assert_eq!(&lines[2][url_column..url_column + 8], "https://");
        assert!(lines[2].ends_with("def456"));
    }
}
