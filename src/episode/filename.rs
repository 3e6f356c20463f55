use crate::feed::Episode;

/// Maximum length, in characters, of a sanitized name
const MAX_NAME_LENGTH: usize = 100;

/// Extension given to every downloaded episode
pub const AUDIO_EXTENSION: &str = "mp3";

/// Used when nothing of the proposed name survives sanitization
const FALLBACK_NAME: &str = "untitled";

/// Check if a character is allowed in filenames (whitelist approach)
fn is_valid_filename_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ')
}

/// Strip characters that are illegal or awkward in file names.
///
/// Deterministic and idempotent: `sanitize_file_name(sanitize_file_name(x))`
/// equals `sanitize_file_name(x)`. Never returns an empty string, `.` or `..`.
pub fn sanitize_file_name(input: &str) -> String {
    let kept: String = input
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|&c| is_valid_filename_char(c))
        .collect();

    let collapsed = collapse_spaces(&kept);
    let trimmed = trim_edges(&collapsed);
    let truncated: String = trimmed.chars().take(MAX_NAME_LENGTH).collect();
    let name = trim_edges(&truncated);

    if name.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        name.to_string()
    }
}

/// File name for a downloaded episode: sanitized title plus the audio extension
pub fn audio_file_name(episode: &Episode) -> String {
    format!("{}.{}", sanitize_file_name(&episode.title), AUDIO_EXTENSION)
}

/// Leading/trailing dots would hide the file or walk up a directory
fn trim_edges(s: &str) -> &str {
    s.trim_matches(|c: char| c == ' ' || c == '.')
}

/// Collapse runs of spaces into a single space
fn collapse_spaces(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut last_was_space = false;

    for c in s.chars() {
        if c == ' ' {
            if !last_was_space {
                result.push(' ');
            }
            last_was_space = true;
        } else {
            result.push(c);
            last_was_space = false;
        }
    }

    result
}
