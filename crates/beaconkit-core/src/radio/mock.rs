//! In-memory radio collaborator.
//!
//! Records every command in issue order and answers authorization queries
//! with a configurable value. Nothing is transmitted; events have to be fed
//! to the engine by the caller.

use crate::radio::{AdvertisementPayload, RadioCommand, RadioStack};
use crate::types::{Authorization, BeaconRegion, IdentityConstraint};

/// Recording radio stack.
#[derive(Debug, Clone, Default)]
pub struct MockRadio {
    authorization: Authorization,
    commands: Vec<RadioCommand>,
}

impl MockRadio {
    /// Radio that reports [`Authorization::Authorized`].
    #[must_use]
    pub fn authorized() -> Self {
        Self::with_authorization(Authorization::Authorized)
    }

    /// Radio reporting the given authorization.
    #[must_use]
    pub fn with_authorization(authorization: Authorization) -> Self {
        Self {
            authorization,
            commands: Vec::new(),
        }
    }

    /// Change the reported authorization.
    pub fn set_authorization(&mut self, authorization: Authorization) {
        self.authorization = authorization;
    }

    /// All commands issued so far.
    #[must_use]
    pub fn commands(&self) -> &[RadioCommand] {
        &self.commands
    }

    /// Drain recorded commands.
    pub fn take_commands(&mut self) -> Vec<RadioCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Number of authorization requests issued.
    #[must_use]
    pub fn authorization_requests(&self) -> usize {
        self.count(|c| matches!(c, RadioCommand::RequestAuthorization))
    }

    /// Number of recorded commands matching a predicate.
    pub fn count(&self, pred: impl Fn(&RadioCommand) -> bool) -> usize {
        self.commands.iter().filter(|c| pred(c)).count()
    }
}

impl RadioStack for MockRadio {
    fn authorization(&self) -> Authorization {
        self.authorization
    }

    fn request_authorization(&mut self) {
        self.commands.push(RadioCommand::RequestAuthorization);
    }

    fn start_monitoring(&mut self, region: &BeaconRegion) {
        self.commands.push(RadioCommand::StartMonitoring(region.clone()));
    }

    fn stop_monitoring(&mut self, region: &BeaconRegion) {
        self.commands.push(RadioCommand::StopMonitoring(region.clone()));
    }

    fn start_ranging(&mut self, constraint: &IdentityConstraint) {
        self.commands.push(RadioCommand::StartRanging(*constraint));
    }

    fn stop_ranging(&mut self, constraint: &IdentityConstraint) {
        self.commands.push(RadioCommand::StopRanging(*constraint));
    }

    fn start_advertising(&mut self, payload: &AdvertisementPayload) {
        self.commands.push(RadioCommand::StartAdvertising(payload.clone()));
    }

    fn stop_advertising(&mut self) {
        self.commands.push(RadioCommand::StopAdvertising);
    }
}
