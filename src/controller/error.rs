use crate::notice::NoticeKind;
use crate::scheduler::ApiError;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("scheduler call failed")]
    Network(#[from] ApiError),
    #[error("lost contact with the scheduler")]
    LostContact,
    #[error("{0}")]
    Validation(String),
    #[error("change to `{entity}` was not saved")]
    PartialMutation {
        entity: String,
        rolled_back: bool,
        #[source]
        source: ApiError,
    },
    #[error("`{0}` has an unconfirmed edit in flight")]
    Busy(String),
    #[error("job snapshot is not loaded yet")]
    NotReady,
    #[error("rejected job snapshot: {0}")]
    InvalidSnapshot(String),
}

impl ConsoleError {
    pub fn notice_kind(&self) -> NoticeKind {
        match self {
            ConsoleError::LostContact => NoticeKind::Modal,
            ConsoleError::Validation(_) => NoticeKind::Inline,
            _ => NoticeKind::Banner,
        }
    }

    /// Message shown to the user, including the cause when there is one.
    pub fn describe(&self) -> String {
        match self {
            ConsoleError::Network(e) => format!("{}: {}", self, e),
            ConsoleError::PartialMutation {
                source,
                rolled_back,
                ..
            } => {
                let outcome = if *rolled_back {
                    "change undone"
                } else {
                    "refresh to see the scheduler's state"
                };
                format!("{} ({}): {}", self, outcome, source)
            }
            _ => self.to_string(),
        }
    }
}
