//! Device authorization flow (RFC 8628).
//!
//! ```text
//! Init --request device code--> AwaitingUser
//! AwaitingUser --pending / slow_down--> AwaitingUser (after sleeping `interval`)
//! AwaitingUser --token--> Authorized
//! AwaitingUser --any other OAuth error--> Denied
//! AwaitingUser --deadline reached--> Expired
//! ```
//!
//! The flow never persists anything. Displaying the verification URL and
//! user code is left to the caller through the `on_prompt` callback.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::client::{AuthApi, PollOutcome};
use super::token::{ClientCredentials, Credential};
use crate::clock::Clock;
use crate::error::{Error, Result};

/// Extra wait added to the poll interval after a `slow_down` answer.
pub const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);

/// States of a single authorization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Init,
    AwaitingUser,
    Authorized,
    Denied,
    Expired,
}

impl FlowState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FlowState::Authorized | FlowState::Denied | FlowState::Expired
        )
    }
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FlowState::Init => "init",
            FlowState::AwaitingUser => "awaiting_user",
            FlowState::Authorized => "authorized",
            FlowState::Denied => "denied",
            FlowState::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// An authorization waiting for the user, as returned by
/// [`DeviceAuthFlow::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_url: String,
    /// Server-provided wait between polls.
    pub interval: Duration,
    /// Lifetime of the device code in seconds.
    pub expires_in: u64,
    /// Epoch milliseconds at which polling stops.
    pub deadline_ms: i64,
}

/// Drives an [`AuthApi`] through the device authorization state machine.
pub struct DeviceAuthFlow {
    api: Arc<dyn AuthApi>,
    clock: Arc<dyn Clock>,
}

impl DeviceAuthFlow {
    pub fn new(api: Arc<dyn AuthApi>, clock: Arc<dyn Clock>) -> Self {
        Self { api, clock }
    }

    /// Request a device code and compute the polling deadline.
    pub async fn start(
        &self,
        client: &ClientCredentials,
        scope: &str,
    ) -> Result<PendingAuthorization> {
        transition(FlowState::Init, FlowState::AwaitingUser);

        let started_at = self.clock.now_millis();
        let response = self
            .api
            .request_device_code(&client.client_id, scope)
            .await?;

        let lifetime_ms = i64::try_from(response.expires_in)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);

        Ok(PendingAuthorization {
            device_code: response.device_code,
            user_code: response.user_code,
            verification_url: response.verification_url,
            interval: Duration::from_secs(response.interval),
            expires_in: response.expires_in,
            deadline_ms: started_at.saturating_add(lifetime_ms),
        })
    }

    /// Poll until the user approves, refuses, or the device code expires.
    ///
    /// Each poll is preceded by a sleep of the current interval. No poll is
    /// sent once the deadline has been reached.
    pub async fn wait(
        &self,
        client: &ClientCredentials,
        pending: &PendingAuthorization,
    ) -> Result<Credential> {
        let mut interval = pending.interval;
        let mut attempt: u32 = 0;

        loop {
            self.clock.sleep(interval).await;

            if self.clock.now_millis() >= pending.deadline_ms {
                transition(FlowState::AwaitingUser, FlowState::Expired);
                return Err(Error::AuthorizationExpired {
                    expires_in: pending.expires_in,
                });
            }

            attempt += 1;
            let outcome = self
                .api
                .poll_authorization(client, &pending.device_code)
                .await?;

            match outcome {
                PollOutcome::Authorized(credential) => {
                    transition(FlowState::AwaitingUser, FlowState::Authorized);
                    info!(attempt, "Device authorization completed");
                    return Ok(credential);
                }
                PollOutcome::Pending => {
                    debug!(attempt, "Authorization pending, continuing to poll");
                }
                PollOutcome::SlowDown => {
                    interval += SLOW_DOWN_INCREMENT;
                    warn!(?interval, "Server asked to slow down, increasing poll interval");
                }
                PollOutcome::Denied(message) => {
                    transition(FlowState::AwaitingUser, FlowState::Denied);
                    return Err(Error::AuthorizationDenied(message));
                }
            }
        }
    }

    /// Run the whole flow, handing the pending authorization to `on_prompt`
    /// before polling starts.
    pub async fn authorize<F>(
        &self,
        client: &ClientCredentials,
        scope: &str,
        on_prompt: F,
    ) -> Result<Credential>
    where
        F: FnOnce(&PendingAuthorization),
    {
        let pending = self.start(client, scope).await?;
        on_prompt(&pending);
        self.wait(client, &pending).await
    }
}

fn transition(from: FlowState, to: FlowState) {
    debug!(%from, %to, terminal = to.is_terminal(), "Device flow transition");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::oauth::client::{DeviceAuthorization, RefreshedToken};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const START: i64 = 1_700_000_000_000;

    /// Scripted authorization server. Polls past the end of the script
    /// answer `Pending`.
    struct ScriptedAuth {
        clock: Arc<ManualClock>,
        expires_in: u64,
        interval: u64,
        polls: Mutex<VecDeque<Result<PollOutcome>>>,
        poll_times: Mutex<Vec<i64>>,
    }

    impl ScriptedAuth {
        fn new(clock: Arc<ManualClock>, expires_in: u64, interval: u64) -> Self {
            Self {
                clock,
                expires_in,
                interval,
                polls: Mutex::new(VecDeque::new()),
                poll_times: Mutex::new(Vec::new()),
            }
        }

        fn then(self, outcome: Result<PollOutcome>) -> Self {
            self.polls.lock().unwrap().push_back(outcome);
            self
        }

        fn poll_times(&self) -> Vec<i64> {
            self.poll_times.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AuthApi for ScriptedAuth {
        async fn request_device_code(
            &self,
            _client_id: &str,
            _scope: &str,
        ) -> Result<DeviceAuthorization> {
            Ok(DeviceAuthorization {
                device_code: "AH-1Ng".into(),
                user_code: "GQVQ-JKEC".into(),
                verification_url: "https://www.google.com/device".into(),
                expires_in: self.expires_in,
                interval: self.interval,
            })
        }

        async fn poll_authorization(
            &self,
            _client: &ClientCredentials,
            device_code: &str,
        ) -> Result<PollOutcome> {
            assert_eq!(device_code, "AH-1Ng");
            self.poll_times.lock().unwrap().push(self.clock.now_millis());
            self.polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(PollOutcome::Pending))
        }

        async fn refresh(
            &self,
            _client: &ClientCredentials,
            _refresh_token: &str,
        ) -> Result<RefreshedToken> {
            unreachable!("device flow never refreshes")
        }
    }

    fn client() -> ClientCredentials {
        ClientCredentials::new("id", "secret")
    }

    fn credential() -> Credential {
        Credential {
            access_token: "ya29.token".into(),
            refresh_token: "1//refresh".into(),
            expires_at: START + 3_600_000,
        }
    }

    fn flow(api: Arc<ScriptedAuth>, clock: Arc<ManualClock>) -> DeviceAuthFlow {
        DeviceAuthFlow::new(api, clock)
    }

    #[tokio::test]
    async fn test_start_computes_deadline() {
        let clock = Arc::new(ManualClock::new(START));
        let api = Arc::new(ScriptedAuth::new(clock.clone(), 1800, 5));

        let pending = flow(api, clock).start(&client(), "scope").await.unwrap();

        assert_eq!(pending.user_code, "GQVQ-JKEC");
        assert_eq!(pending.interval, Duration::from_secs(5));
        assert_eq!(pending.deadline_ms, START + 1_800_000);
    }

    #[tokio::test]
    async fn test_authorized_after_pending_polls() {
        let clock = Arc::new(ManualClock::new(START));
        let api = Arc::new(
            ScriptedAuth::new(clock.clone(), 1800, 5)
                .then(Ok(PollOutcome::Pending))
                .then(Ok(PollOutcome::Pending))
                .then(Ok(PollOutcome::Authorized(credential()))),
        );

        let mut prompted = None;
        let cred = flow(api.clone(), clock.clone())
            .authorize(&client(), "scope", |p| prompted = Some(p.user_code.clone()))
            .await
            .unwrap();

        assert_eq!(cred, credential());
        assert_eq!(prompted.as_deref(), Some("GQVQ-JKEC"));
        assert_eq!(api.poll_times(), vec![START + 5_000, START + 10_000, START + 15_000]);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5); 3]);
    }

    #[tokio::test]
    async fn test_pending_forever_stops_exactly_at_deadline() {
        let clock = Arc::new(ManualClock::new(START));
        let api = Arc::new(ScriptedAuth::new(clock.clone(), 30, 5));

        let err = flow(api.clone(), clock.clone())
            .authorize(&client(), "scope", |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, Error::AuthorizationExpired { expires_in: 30 }));
        let polls = api.poll_times();
        assert_eq!(polls.len(), 5);
        assert!(polls.iter().all(|t| *t < START + 30_000));
        assert_eq!(clock.now_millis(), START + 30_000);
    }

    #[tokio::test]
    async fn test_slow_down_increases_interval() {
        let clock = Arc::new(ManualClock::new(START));
        let api = Arc::new(
            ScriptedAuth::new(clock.clone(), 1800, 5)
                .then(Ok(PollOutcome::SlowDown))
                .then(Ok(PollOutcome::Pending))
                .then(Ok(PollOutcome::Authorized(credential()))),
        );

        flow(api, clock.clone())
            .authorize(&client(), "scope", |_| {})
            .await
            .unwrap();

        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(10)
            ]
        );
    }

    #[tokio::test]
    async fn test_terminal_error_is_denied() {
        let clock = Arc::new(ManualClock::new(START));
        let api = Arc::new(
            ScriptedAuth::new(clock.clone(), 1800, 5)
                .then(Ok(PollOutcome::Pending))
                .then(Ok(PollOutcome::Denied("access_denied".into()))),
        );

        let err = flow(api.clone(), clock)
            .authorize(&client(), "scope", |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, Error::AuthorizationDenied(ref m) if m == "access_denied"));
        assert_eq!(api.poll_times().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_token_response_is_not_a_denial() {
        let clock = Arc::new(ManualClock::new(START));
        let api = Arc::new(
            ScriptedAuth::new(clock.clone(), 1800, 5).then(Err(Error::Protocol(
                "Authorization server returned an invalid response (missing refresh_token)".into(),
            ))),
        );

        let err = flow(api.clone(), clock)
            .authorize(&client(), "scope", |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Protocol(ref m) if m.contains("refresh_token")), "{err:?}");
        assert_eq!(api.poll_times().len(), 1);
    }

    #[tokio::test]
    async fn test_network_error_propagates_unchanged() {
        let clock = Arc::new(ManualClock::new(START));
        let api = Arc::new(
            ScriptedAuth::new(clock.clone(), 1800, 5)
                .then(Err(Error::TransientNetwork("connection reset".into()))),
        );

        let err = flow(api, clock)
            .authorize(&client(), "scope", |_| {})
            .await
            .unwrap_err();

        assert!(err.is_transient());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!FlowState::Init.is_terminal());
        assert!(!FlowState::AwaitingUser.is_terminal());
        assert!(FlowState::Authorized.is_terminal());
        assert!(FlowState::Denied.is_terminal());
        assert!(FlowState::Expired.is_terminal());
        assert_eq!(FlowState::AwaitingUser.to_string(), "awaiting_user");
    }
}
