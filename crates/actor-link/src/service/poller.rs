//! Create-then-poll provisioning of deliveries and subscriptions.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{Endpoint, ProvisionError, ResourceDescriptor, ResourceKind, ResourceStatus};
use crate::ports::ControlPlane;

use super::shutdown::Shutdown;

/// Default wait between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default overall polling deadline.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(300);

/// Polling cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    /// Wait between consecutive `get` calls.
    pub interval: Duration,
    /// Give up after this long in REQUESTED. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: Some(DEFAULT_POLL_TIMEOUT),
        }
    }
}

/// Drives one resource from creation to a terminal status.
pub struct ResourcePoller<'a, C: ?Sized> {
    control_plane: &'a C,
    settings: PollSettings,
}

impl<'a, C> ResourcePoller<'a, C>
where
    C: ControlPlane + ?Sized,
{
    /// Poller over `control_plane`.
    pub fn new(control_plane: &'a C, settings: PollSettings) -> Self {
        Self {
            control_plane,
            settings,
        }
    }

    /// Create a resource for `selector` and wait until it leaves REQUESTED.
    ///
    /// Returns the CREATED descriptor. Any other terminal status is
    /// [`ProvisionError::ResourceFailed`].
    pub async fn provision(
        &self,
        selector: &str,
        shutdown: &mut Shutdown,
    ) -> Result<ResourceDescriptor, ProvisionError> {
        let kind = self.control_plane.kind();
        info!("[poller] Creating {} for selector '{}'", kind, selector);

        let descriptor = self.control_plane.create(selector).await?;
        observe(kind, &descriptor);

        self.await_ready(descriptor, shutdown).await
    }

    /// Poll an existing descriptor until it leaves REQUESTED.
    pub async fn await_ready(
        &self,
        mut descriptor: ResourceDescriptor,
        shutdown: &mut Shutdown,
    ) -> Result<ResourceDescriptor, ProvisionError> {
        let kind = self.control_plane.kind();
        let started = Instant::now();
        let mut attempts: u32 = 0;

        while descriptor.status.is_pending() {
            if let Some(timeout) = self.settings.timeout {
                if started.elapsed() >= timeout {
                    warn!(
                        kind = %kind,
                        id = %descriptor.id,
                        attempts,
                        "[poller] Gave up waiting for {} {}",
                        kind,
                        descriptor.id
                    );
                    return Err(ProvisionError::PollTimeout {
                        kind,
                        id: descriptor.id,
                        attempts,
                    });
                }
            }

            debug!(
                "[poller] {} {} is {}, checking again in {:?}",
                kind, descriptor.id, descriptor.status, self.settings.interval
            );
            if !shutdown.sleep(self.settings.interval).await {
                info!("[poller] Shutdown requested while waiting for {} {}", kind, descriptor.id);
                return Err(ProvisionError::Interrupted);
            }

            let id = descriptor.id.clone();
            descriptor = self.control_plane.get(&id).await?;
            attempts += 1;
            observe(kind, &descriptor);
        }

        match descriptor.status {
            ResourceStatus::Created => {
                info!(
                    kind = %kind,
                    id = %descriptor.id,
                    polls = attempts,
                    "[poller] {} {} is ready",
                    kind,
                    descriptor.id
                );
                Ok(descriptor)
            }
            status => {
                warn!("[poller] Unable to use {} {}: status {}", kind, descriptor.id, status);
                Err(ProvisionError::ResourceFailed {
                    kind,
                    id: descriptor.id,
                    status,
                })
            }
        }
    }
}

/// First advertised endpoint of a CREATED descriptor, validated for `kind`.
pub fn ready_endpoint(
    kind: ResourceKind,
    descriptor: &ResourceDescriptor,
) -> Result<Endpoint, ProvisionError> {
    match descriptor.first_endpoint(kind.role()) {
        None => Err(ProvisionError::NoEndpoint {
            kind,
            id: descriptor.id.clone(),
        }),
        Some(Err(source)) => Err(ProvisionError::InvalidEndpoint {
            kind,
            id: descriptor.id.clone(),
            source,
        }),
        Some(Ok(endpoint)) => Ok(endpoint),
    }
}

fn observe(kind: ResourceKind, descriptor: &ResourceDescriptor) {
    info!(
        kind = %kind,
        id = %descriptor.id,
        status = %descriptor.status,
        "{} {} status response: {}",
        kind,
        descriptor.id,
        descriptor.to_pretty_json()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ApiError;
    use crate::service::shutdown;
    use crate::test_utils::{descriptor, ScriptedControlPlane};

    fn settings(interval_secs: u64, timeout_secs: Option<u64>) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(interval_secs),
            timeout: timeout_secs.map(Duration::from_secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_requested_requested_created_polls_twice() {
        let api = ScriptedControlPlane::new(ResourceKind::Delivery)
            .respond(Ok(descriptor("d1", "REQUESTED")))
            .respond(Ok(descriptor("d1", "REQUESTED")))
            .respond(Ok(descriptor("d1", "CREATED").with_target("h", 5671, "/t1")));
        let poller = ResourcePoller::new(&api, settings(2, None));
        let start = Instant::now();

        let ready = poller
            .provision("sel", &mut Shutdown::never())
            .await
            .unwrap();

        assert_eq!(ready.status, ResourceStatus::Created);
        assert_eq!(api.create_calls(), 1);
        assert_eq!(api.get_calls(), 2);
        assert_eq!(api.selectors(), vec!["sel".to_string()]);
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_are_spaced_by_interval() {
        let api = ScriptedControlPlane::new(ResourceKind::Subscription)
            .respond(Ok(descriptor("s1", "REQUESTED")))
            .respond(Ok(descriptor("s1", "REQUESTED")))
            .respond(Ok(descriptor("s1", "REQUESTED")))
            .respond(Ok(descriptor("s1", "CREATED").with_source("h", 5671, "/s1")));
        let poller = ResourcePoller::new(&api, settings(3, None));

        poller
            .provision("sel", &mut Shutdown::never())
            .await
            .unwrap();

        let times = api.call_times();
        assert_eq!(times.len(), 4);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(3));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_created_on_first_response_skips_polling() {
        let api = ScriptedControlPlane::new(ResourceKind::Delivery)
            .respond(Ok(descriptor("d1", "CREATED").with_target("h", 5671, "/t1")));
        let poller = ResourcePoller::new(&api, PollSettings::default());

        poller
            .provision("sel", &mut Shutdown::never())
            .await
            .unwrap();
        assert_eq!(api.get_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_is_terminal() {
        let api = ScriptedControlPlane::new(ResourceKind::Delivery)
            .respond(Ok(descriptor("d1", "REQUESTED")))
            .respond(Ok(descriptor("d1", "FAILED")));
        let poller = ResourcePoller::new(&api, settings(2, None));

        let err = poller
            .provision("sel", &mut Shutdown::never())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ProvisionError::ResourceFailed {
                kind: ResourceKind::Delivery,
                id: "d1".into(),
                status: ResourceStatus::Failed,
            }
        );
        assert_eq!(api.get_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_status_is_terminal() {
        let api = ScriptedControlPlane::new(ResourceKind::Subscription)
            .respond(Ok(descriptor("s1", "DELETED")));
        let poller = ResourcePoller::new(&api, settings(2, None));

        let err = poller
            .provision("sel", &mut Shutdown::never())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::ResourceFailed { status, .. }
            if status == ResourceStatus::Other("DELETED".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_timeout() {
        let api = ScriptedControlPlane::new(ResourceKind::Delivery)
            .respond(Ok(descriptor("d1", "REQUESTED")))
            .repeat_last();
        let poller = ResourcePoller::new(&api, settings(2, Some(5)));

        let err = poller
            .provision("sel", &mut Shutdown::never())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ProvisionError::PollTimeout {
                kind: ResourceKind::Delivery,
                id: "d1".into(),
                attempts: 3,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_error_propagates() {
        let api = ScriptedControlPlane::new(ResourceKind::Delivery)
            .respond(Ok(descriptor("d1", "REQUESTED")))
            .respond(Err(ApiError::Status {
                operation: "get delivery".into(),
                status: 503,
                body: "unavailable".into(),
            }));
        let poller = ResourcePoller::new(&api, settings(1, None));

        let err = poller
            .provision("sel", &mut Shutdown::never())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Api(ApiError::Status { status: 503, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_polling() {
        let api = ScriptedControlPlane::new(ResourceKind::Delivery)
            .respond(Ok(descriptor("d1", "REQUESTED")))
            .repeat_last();
        let poller = ResourcePoller::new(&api, settings(30, None));
        let (trigger, mut listener) = shutdown::channel();
        trigger.trigger();

        let err = poller.provision("sel", &mut listener).await.unwrap_err();
        assert_eq!(err, ProvisionError::Interrupted);
        assert_eq!(api.get_calls(), 0);
    }

    #[test]
    fn test_ready_endpoint() {
        let created = descriptor("d1", "CREATED").with_target("h", 5671, "/t1");
        let endpoint = ready_endpoint(ResourceKind::Delivery, &created).unwrap();
        assert_eq!(endpoint.uri(), "amqps://h:5671");
        assert_eq!(endpoint.address(), "/t1");

        let bare = descriptor("d2", "CREATED");
        assert_eq!(
            ready_endpoint(ResourceKind::Delivery, &bare),
            Err(ProvisionError::NoEndpoint {
                kind: ResourceKind::Delivery,
                id: "d2".into()
            })
        );

        // A subscription needs a source, not a target.
        assert!(matches!(
            ready_endpoint(ResourceKind::Subscription, &created),
            Err(ProvisionError::InvalidEndpoint { .. })
        ));
    }
}
