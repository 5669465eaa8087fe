//! Error codes and exit status for maintctl

use maint_common::MaintError;

/// Exit code for success
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code for general errors
pub const EXIT_GENERAL_ERROR: i32 = 1;

/// Unknown host or unusable plan
pub const EXIT_RESOLUTION: i32 = 2;

/// CMS rejected the request
pub const EXIT_RPC_REJECTED: i32 = 3;

pub const EXIT_TASK_NOT_FOUND: i32 = 4;

/// Locks stayed pending for the whole poll budget
pub const EXIT_PENDING_TIMEOUT: i32 = 5;

/// Some nodes were not restarted
pub const EXIT_NODES_FAILED: i32 = 6;

/// Exit code when the CMS is unavailable/unreachable
pub const EXIT_CMS_UNAVAILABLE: i32 = 70;

pub const EXIT_INTERRUPTED: i32 = 130;

/// Exit code for a failed invocation
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<MaintError>()
        .map(MaintError::exit_code)
        .unwrap_or(EXIT_GENERAL_ERROR)
}

/// Short error class for the invocation log
pub fn error_code_name(err: &anyhow::Error) -> &'static str {
    match err.downcast_ref::<MaintError>() {
        Some(MaintError::UnknownHost(_)) => "unknown_host",
        Some(MaintError::Planning(_)) => "planning",
        Some(MaintError::RpcTransient(_)) => "cms_unavailable",
        Some(MaintError::RpcPermanent { .. }) => "cms_rejected",
        Some(MaintError::Restart { .. }) => "restart_failed",
        Some(MaintError::TaskNotFound(_)) => "task_not_found",
        Some(MaintError::PendingTimeout { .. }) => "pending_timeout",
        Some(MaintError::Io(_)) | Some(MaintError::Json(_)) | None => "general",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_exit_codes_match_taxonomy() {
        let err = anyhow::Error::from(MaintError::UnknownHost("x".into()));
        assert_eq!(exit_code_for(&err), EXIT_RESOLUTION);

        let err = anyhow::Error::from(MaintError::RpcTransient("down".into()));
        assert_eq!(exit_code_for(&err), EXIT_CMS_UNAVAILABLE);

        let err = anyhow::Error::from(MaintError::PendingTimeout {
            task_uid: "t".into(),
            polls: 3,
        });
        assert_eq!(exit_code_for(&err), EXIT_PENDING_TIMEOUT);
    }

    #[test]
    fn test_context_keeps_exit_code() {
        let err: anyhow::Result<()> = Err(MaintError::TaskNotFound("t".into()))
            .context("refreshing task");
        let err = err.unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_TASK_NOT_FOUND);
        assert_eq!(error_code_name(&err), "task_not_found");
    }

    #[test]
    fn test_other_errors_are_general() {
        let err = anyhow::anyhow!("bad config");
        assert_eq!(exit_code_for(&err), EXIT_GENERAL_ERROR);
        assert_eq!(error_code_name(&err), "general");
    }
}
