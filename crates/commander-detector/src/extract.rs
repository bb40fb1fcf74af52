//! Response extraction from captured command output.

/// Strip the echoed command line and the trailing prompt from `text`.
///
/// Looks for the first line containing `command` and returns the lines after
/// it up to (not including) the first prompt line. When the echo is missing,
/// every non-prompt line is returned instead. The result is trimmed.
///
/// # Example
/// ```
/// use commander_detector::extract_response;
///
/// let captured = "list\nrecord-1\nrecord-2\nMy Vault> ";
/// let response = extract_response(captured, "list", |l| l.starts_with("My Vault>"));
/// assert_eq!(response, "record-1\nrecord-2");
/// ```
pub fn extract_response<F>(text: &str, command: &str, is_prompt_line: F) -> String
where
    F: Fn(&str) -> bool,
{
    let lines: Vec<&str> = text.split('\n').map(|l| l.trim_end_matches('\r')).collect();
    let command = command.trim();

    let echo = if command.is_empty() {
        None
    } else {
        lines.iter().position(|line| line.contains(command))
    };

    let selected: Vec<&str> = match echo {
        Some(index) => lines[index + 1..]
            .iter()
            .copied()
            .take_while(|line| !is_prompt_line(*line))
            .collect(),
        None => lines
            .iter()
            .copied()
            .filter(|line| !is_prompt_line(*line))
            .collect(),
    };

    selected.join("\n").trim().to_string()
}
