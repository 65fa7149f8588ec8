pub mod build;
pub mod completions;
pub mod image;
pub mod man_pages;
pub mod run;
pub mod shell;
pub mod start;
pub mod status;
pub mod stop;

use cabin_core::EnvState;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_DECLARATION_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;
pub const EXIT_INTERRUPTED: u8 = 130;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Spinner for human output only.
pub fn maybe_spinner(json: bool, msg: &str) -> Option<ProgressBar> {
    if json {
        None
    } else {
        Some(spinner(msg))
    }
}

pub fn colorize_state(state: EnvState) -> String {
    use console::Style;
    let text = state.to_string();
    match state {
        EnvState::Built => Style::new().green().apply_to(text).to_string(),
        EnvState::Running => Style::new().cyan().bold().apply_to(text).to_string(),
        EnvState::Absent => Style::new().dim().apply_to(text).to_string(),
    }
}

/// Exit status of the `cabin` process for a command's exit status. Codes
/// outside `0..=255` become a plain failure.
pub fn command_exit_code(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(EXIT_FAILURE)
}

/// Exit status for an error message produced by a command.
pub fn error_exit_code(msg: &str) -> u8 {
    if msg.starts_with("definition error:") {
        EXIT_DECLARATION_ERROR
    } else if msg.starts_with("store error:") {
        EXIT_STORE_ERROR
    } else if msg == "interrupted" {
        EXIT_INTERRUPTED
    } else {
        EXIT_FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"name": "dev"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"name\""));
        assert!(result.contains("\"dev\""));
    }

    #[test]
    fn colorize_state_keeps_text() {
        assert!(colorize_state(EnvState::Built).contains("built"));
        assert!(colorize_state(EnvState::Running).contains("running"));
        assert!(colorize_state(EnvState::Absent).contains("absent"));
    }

    #[test]
    fn command_codes_pass_through() {
        assert_eq!(command_exit_code(0), 0);
        assert_eq!(command_exit_code(42), 42);
        assert_eq!(command_exit_code(130), 130);
        assert_eq!(command_exit_code(-1), EXIT_FAILURE);
        assert_eq!(command_exit_code(300), EXIT_FAILURE);
    }

    #[test]
    fn error_messages_map_to_exit_codes() {
        assert_eq!(
            error_exit_code("definition error: unsupported distro 'gentoo'"),
            EXIT_DECLARATION_ERROR
        );
        assert_eq!(
            error_exit_code("store error: no image named 'dev'"),
            EXIT_STORE_ERROR
        );
        assert_eq!(error_exit_code("interrupted"), EXIT_INTERRUPTED);
        assert_eq!(error_exit_code("runtime error: boom"), EXIT_FAILURE);
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_DECLARATION_ERROR);
        assert_ne!(EXIT_DECLARATION_ERROR, EXIT_STORE_ERROR);
    }

    #[test]
    fn spinner_finishes() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
        assert!(maybe_spinner(true, "quiet").is_none());
    }
}
