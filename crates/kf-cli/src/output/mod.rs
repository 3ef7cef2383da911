//! Output formatting utilities for the CLI
//!
//! Colored status lines, the confirmation prompt, and the result table of
//! `alpha exec`.

use std::io::{BufRead, Write};
use std::net::IpAddr;

use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use kf_core::KfError;

/// Format per-host command results as an ASCII table
///
/// Failed hosts show the error in place of the output. Long outputs are
/// wrapped to keep the table readable.
pub fn format_exec_results(results: &[(IpAddr, Result<String, KfError>)]) -> String {
    if results.is_empty() {
        return "No hosts matched".to_string();
    }

    #[derive(Tabled)]
    struct ExecRow {
        #[tabled(rename = "HOST")]
        host: String,
        #[tabled(rename = "STATUS")]
        status: &'static str,
        #[tabled(rename = "OUTPUT")]
        output: String,
    }

    let rows: Vec<ExecRow> = results
        .iter()
        .map(|(host, result)| match result {
            Ok(output) => ExecRow {
                host: host.to_string(),
                status: "ok",
                output: output.trim_end().to_string(),
            },
            Err(e) => ExecRow {
                host: host.to_string(),
                status: "failed",
                output: e.root().to_string(),
            },
        })
        .collect();

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(120))
        .to_string()
}

/// Ask a yes/no question on the terminal, defaulting to no
pub fn confirm(prompt: &str) -> bool {
    print!("{} [y/N] ", prompt);
    if std::io::stdout().flush().is_err() {
        return false;
    }

    let mut input = String::new();
    match std::io::stdin().lock().read_line(&mut input) {
        Ok(_) => {
            let answer = input.trim();
            answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
        }
        Err(_) => false,
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
