//! Finite state machine for the deployment lifecycle

use crate::errors::PlatformError;
use crate::models::DeploymentStatus;

/// Lifecycle event
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// Start infrastructure creation
    Provision,

    /// Infrastructure exists, start application setup
    Provisioned,

    /// Application launched
    Deployed,

    /// A lifecycle step failed
    Fail(String),

    /// Infrastructure destroyed
    Delete,
}

/// Compute the successor status for an event, rejecting invalid transitions.
///
/// Failed is reachable from every non-terminal status. Deleted is only
/// reachable through an explicit Delete. Stopped is never entered here;
/// it is assigned directly when importing instances from the cluster.
pub fn transition(
    current: DeploymentStatus,
    event: &LifecycleEvent,
) -> Result<DeploymentStatus, PlatformError> {
    let next = match (current, event) {
        (DeploymentStatus::Pending, LifecycleEvent::Provision) => DeploymentStatus::Provisioning,
        (DeploymentStatus::Provisioning, LifecycleEvent::Provisioned) => {
            DeploymentStatus::Deploying
        }
        (DeploymentStatus::Deploying, LifecycleEvent::Deployed) => DeploymentStatus::Running,

        // Failure is allowed from any non-terminal status
        (current, LifecycleEvent::Fail(_)) if !current.is_terminal() => DeploymentStatus::Failed,

        // Deletion is allowed from any status except deleted itself
        (current, LifecycleEvent::Delete) if current != DeploymentStatus::Deleted => {
            DeploymentStatus::Deleted
        }

        (current, event) => {
            return Err(PlatformError::TransitionError(format!(
                "invalid transition: {} -> {:?}",
                current, event
            )));
        }
    };

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut status = DeploymentStatus::Pending;

        status = transition(status, &LifecycleEvent::Provision).unwrap();
        assert_eq!(status, DeploymentStatus::Provisioning);

        status = transition(status, &LifecycleEvent::Provisioned).unwrap();
        assert_eq!(status, DeploymentStatus::Deploying);

        status = transition(status, &LifecycleEvent::Deployed).unwrap();
        assert_eq!(status, DeploymentStatus::Running);
    }

    #[test]
    fn failure_from_any_non_terminal() {
        for status in [
            DeploymentStatus::Pending,
            DeploymentStatus::Provisioning,
            DeploymentStatus::Deploying,
            DeploymentStatus::Running,
            DeploymentStatus::Stopped,
            DeploymentStatus::Failed,
        ] {
            let next = transition(status, &LifecycleEvent::Fail("boom".to_string())).unwrap();
            assert_eq!(next, DeploymentStatus::Failed);
        }
        assert!(transition(
            DeploymentStatus::Deleted,
            &LifecycleEvent::Fail("boom".to_string())
        )
        .is_err());
    }

    #[test]
    fn delete_only_entered_explicitly() {
        assert_eq!(
            transition(DeploymentStatus::Running, &LifecycleEvent::Delete).unwrap(),
            DeploymentStatus::Deleted
        );
        assert!(transition(DeploymentStatus::Deleted, &LifecycleEvent::Delete).is_err());
    }

    #[test]
    fn skipping_stages_is_rejected() {
        assert!(transition(DeploymentStatus::Pending, &LifecycleEvent::Deployed).is_err());
        assert!(transition(DeploymentStatus::Provisioning, &LifecycleEvent::Deployed).is_err());
        assert!(transition(DeploymentStatus::Running, &LifecycleEvent::Provision).is_err());
    }
}
