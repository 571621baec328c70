use super::error::ConsoleError;
use crate::job_model::JobModel;

use regex::Regex;

pub(crate) const VALIDATION_REGEX_NOT_BLANK: &str = r"\S";
pub(crate) const VALIDATION_REGEX_SECONDS: &str = r"^\d+$";
pub(crate) const VALIDATION_REGEX_CRON: &str = r"^\S+(\s+\S+){4}$";

/// A projection of the job snapshot that is patched on every refresh tick.
pub(crate) trait SnapshotView {
    fn validate(&self, model: &JobModel) -> Result<(), ConsoleError> {
        if model.is_ready() {
            Ok(())
        } else {
            Err(ConsoleError::NotReady)
        }
    }

    /// Brings the view in line with `model`. Returns how many things changed.
    fn reconcile(&self, model: &JobModel) -> Result<usize, ConsoleError>;
}

/// Fails with a validation error naming `what` unless `value` matches.
pub(crate) fn ensure_matches(pattern: &str, value: &str, what: &str) -> Result<(), ConsoleError> {
    let re = Regex::new(pattern)
        .map_err(|e| ConsoleError::Validation(format!("bad pattern for {}: {}", what, e)))?;
    if re.is_match(value) {
        Ok(())
    } else {
        Err(ConsoleError::Validation(format!(
            "Invalid {} '{}'. Must match '{}'",
            what, value, pattern
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns() {
        assert!(ensure_matches(VALIDATION_REGEX_NOT_BLANK, " x ", "name").is_ok());
        assert!(ensure_matches(VALIDATION_REGEX_NOT_BLANK, "  ", "name").is_err());
        assert!(ensure_matches(VALIDATION_REGEX_SECONDS, "30", "timeout").is_ok());
        assert!(ensure_matches(VALIDATION_REGEX_SECONDS, "-1", "timeout").is_err());
        assert!(ensure_matches(VALIDATION_REGEX_CRON, "0 * * * *", "cron").is_ok());
        assert!(ensure_matches(VALIDATION_REGEX_CRON, "0 * * *", "cron").is_err());
    }
}
