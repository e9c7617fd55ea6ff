/// Terminal outcome of a completed AT command exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum AtResult {
    Ok,
    Error,
    CmeError,
    CmsError,
    Timeout,
}

/// A fully parsed AT command response.
#[derive(Debug, Clone)]
pub struct AtResponse {
    pub command: String,
    pub raw_response: String,
    pub result: AtResult,
    pub data_lines: Vec<String>,
    pub error_code: Option<u32>,
    pub error_message: Option<String>,
}

impl AtResponse {
    pub fn is_ok(&self) -> bool {
        self.result == AtResult::Ok
    }
}

/// Recognizes a terminator line, returning the result it signals and, for
/// the `+CME`/`+CMS` cases, the numeric error code.
pub(crate) fn terminal_line(line: &str) -> Option<(AtResult, Option<u32>)> {
    let trimmed = line.trim();
    if trimmed == "OK" {
        return Some((AtResult::Ok, None));
    }
    if trimmed == "ERROR" {
        return Some((AtResult::Error, None));
    }
    if let Some(rest) = trimmed.strip_prefix("+CME ERROR:") {
        return Some((AtResult::CmeError, rest.trim().parse().ok()));
    }
    if let Some(rest) = trimmed.strip_prefix("+CMS ERROR:") {
        return Some((AtResult::CmsError, rest.trim().parse().ok()));
    }
    None
}
