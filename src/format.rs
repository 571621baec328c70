use crate::scheduler::wire::Timestamp;

use serde::Serialize;

/// How a table cell turns a raw task value into what is shown.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Formatter {
    Text,
    Datetime,
    Title,
    StatusClass,
}

impl Formatter {
    pub fn apply(&self, raw: &str) -> String {
        match *self {
            Self::Text => text(raw),
            Self::Datetime => datetime(raw),
            Self::Title => title_case(raw),
            Self::StatusClass => status_class(raw),
        }
    }
}

pub fn text(raw: &str) -> String {
    raw.to_string()
}

/// Local time, medium format. Blank stays blank; unparseable input is shown
/// as sent.
pub fn datetime(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }
    Timestamp(raw.to_string()).local_display()
}

pub fn title_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut word_start = true;
    for c in raw.chars() {
        if c.is_alphanumeric() {
            if word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            word_start = false;
        } else {
            out.push(c);
            word_start = true;
        }
    }
    out
}

pub fn status_class(raw: &str) -> String {
    format!("status-{}", raw.trim().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_case_words() {
        assert_eq!(title_case("running"), "Running");
        assert_eq!(title_case("remote target_host"), "Remote Target_Host");
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn datetime_keeps_what_it_cannot_parse() {
        assert_eq!(datetime(""), "");
        assert_eq!(datetime("soon"), "soon");
        assert!(datetime("2014-01-02T03:04:05Z").contains("2014"));
    }

    #[test]
    fn formatter_dispatch() {
        assert_eq!(Formatter::StatusClass.apply("Failed"), "status-failed");
        assert_eq!(Formatter::Title.apply("complete"), "Complete");
        assert_eq!(Formatter::Text.apply("echo hi"), "echo hi");
    }
}
