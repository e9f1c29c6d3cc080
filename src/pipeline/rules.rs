//! Eligibility rules consulted before the AI call.
//!
//! Pure functions over user state. The processor sends the notice attached to
//! a stop verdict and logs the step; nothing here does I/O.

use crate::config::Notices;
use crate::store::User;
use crate::worker::state::PipelineStep;

/// Why the pipeline stopped for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    LeadLimitReached,
    Canceled,
    Blocked,
    NonCompliant,
}

impl StopReason {
    /// Step under which the stop is logged.
    pub fn step(&self) -> PipelineStep {
        match self {
            Self::LeadLimitReached => PipelineStep::LeadRule,
            Self::Canceled | Self::Blocked | Self::NonCompliant => PipelineStep::BlockRule,
        }
    }

    /// User-facing notice for this stop.
    pub fn notice<'a>(&self, notices: &'a Notices) -> &'a str {
        match self {
            Self::LeadLimitReached => &notices.lead_limit,
            Self::Canceled => &notices.canceled,
            Self::Blocked => &notices.blocked,
            Self::NonCompliant => &notices.non_compliant,
        }
    }

    /// Short description for the step log.
    pub fn details(&self) -> &'static str {
        match self {
            Self::LeadLimitReached => "lead reply limit reached",
            Self::Canceled => "subscription canceled",
            Self::Blocked => "user blocked",
            Self::NonCompliant => "user not compliant",
        }
    }
}

/// Lead quota: a non-client who already received `limit` bot replies is stopped.
///
/// Clients are never subject to the quota.
pub fn check_lead_quota(user: &User, bot_replies: u32, limit: u32) -> Option<StopReason> {
    if user.is_client {
        return None;
    }
    (bot_replies >= limit).then_some(StopReason::LeadLimitReached)
}

/// Account gates, in order: canceled, blocked, not compliant.
///
/// Compliance is tri-state; anything but an explicit `true` stops the user.
pub fn check_eligibility(user: &User) -> Option<StopReason> {
    if user.is_canceled == Some(true) {
        return Some(StopReason::Canceled);
    }
    if user.is_blocked {
        return Some(StopReason::Blocked);
    }
    if user.is_compliant != Some(true) {
        return Some(StopReason::NonCompliant);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead() -> User {
        User {
            id: 1,
            phone: "5511999990000".into(),
            name: None,
            is_client: false,
            is_blocked: false,
            is_compliant: Some(true),
            is_canceled: Some(false),
        }
    }

    #[test]
    fn lead_with_two_replies_proceeds() {
        assert_eq!(check_lead_quota(&lead(), 2, 3), None);
    }

    #[test]
    fn lead_with_three_replies_is_stopped() {
        assert_eq!(
            check_lead_quota(&lead(), 3, 3),
            Some(StopReason::LeadLimitReached)
        );
    }

    #[test]
    fn clients_skip_the_quota() {
        let client = User {
            is_client: true,
            ..lead()
        };
        assert_eq!(check_lead_quota(&client, 50, 3), None);
    }

    #[test]
    fn unset_compliance_is_non_compliant() {
        let user = User {
            is_compliant: None,
            ..lead()
        };
        assert_eq!(check_eligibility(&user), Some(StopReason::NonCompliant));
        let user = User {
            is_compliant: Some(false),
            ..lead()
        };
        assert_eq!(check_eligibility(&user), Some(StopReason::NonCompliant));
    }

    #[test]
    fn gates_apply_in_order() {
        let everything_wrong = User {
            is_canceled: Some(true),
            is_blocked: true,
            is_compliant: None,
            ..lead()
        };
        assert_eq!(check_eligibility(&everything_wrong), Some(StopReason::Canceled));

        let blocked = User {
            is_blocked: true,
            is_compliant: None,
            ..lead()
        };
        assert_eq!(check_eligibility(&blocked), Some(StopReason::Blocked));
    }

    #[test]
    fn unset_cancellation_is_not_canceled() {
        let user = User {
            is_canceled: None,
            ..lead()
        };
        assert_eq!(check_eligibility(&user), None);
    }

    #[test]
    fn stop_reasons_map_to_steps_and_notices() {
        let notices = Notices::default();
        assert_eq!(StopReason::LeadLimitReached.step(), PipelineStep::LeadRule);
        assert_eq!(StopReason::Blocked.step(), PipelineStep::BlockRule);
        assert_eq!(StopReason::Blocked.notice(&notices), notices.blocked);
    }
}
