use std::collections::HashSet;

use drive_core::DriveError;

use super::invoker::RetryDecision;

/// Reason codes that retrying will not fix.
pub const DEFAULT_TERMINAL_REASONS: &[&str] = &[
    "fileWriterTeamDriveMoveInDisabled",
    "teamDrivesFolderMoveInNotSupported",
    "teamDrivesParentLimit",
    "invalid",
    "badRequest",
    "notFound",
    "insufficientFilePermissions",
    "authError",
];

/// Retry classifier keyed on the first structured reason of an API error.
#[derive(Debug, Clone)]
pub struct ReasonPolicy {
    terminal: HashSet<String>,
}

impl Default for ReasonPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TERMINAL_REASONS.iter().copied())
    }
}

impl ReasonPolicy {
    pub fn new<I, S>(terminal: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            terminal: terminal.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_terminal_reason(&self, reason: &str) -> bool {
        self.terminal.contains(reason)
    }

    pub fn classify(&self, err: &DriveError) -> RetryDecision {
        match err {
            DriveError::Api { .. } => {
                let terminal = err
                    .first_reason()
                    .is_some_and(|reason| self.is_terminal_reason(reason));
                if terminal {
                    RetryDecision::GiveUp
                } else {
                    RetryDecision::Retry
                }
            }
            // Undecodable responses and unbuildable requests are contract errors.
            DriveError::Request(inner) if inner.is_decode() || inner.is_builder() => {
                RetryDecision::GiveUp
            }
            DriveError::Request(_) => RetryDecision::Retry,
            DriveError::Url(_) | DriveError::CannotBeABase => RetryDecision::GiveUp,
        }
    }
}
