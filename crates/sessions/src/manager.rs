//! The session manager: one live gateway session per channel.
//!
//! Each opened channel gets a dedicated worker task that consumes its
//! [`SessionEvent`] queue in arrival order. All status transitions go
//! through [`SessionManager::set_status`], which persists the channel and
//! broadcasts a [`PipelineEvent::ChannelStatusChanged`] exactly once per
//! transition.

use {
    std::{collections::HashMap, sync::Arc},
    tidechat_common::{ChannelId, TenantId},
    tidechat_pubsub::{PipelineEvent, PubSub},
    tokio::{
        sync::{RwLock, mpsc},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    backoff::ReconnectBackoff,
    events::SessionEvent,
    gateway::GatewayClient,
    store::ChannelStore,
    types::{Channel, ChannelStatus, DisconnectReason},
};

struct ChannelEntry {
    channel: Channel,
    /// Live event queue; `Some` only while a session worker is running.
    tx: Option<mpsc::UnboundedSender<SessionEvent>>,
    worker: Option<JoinHandle<()>>,
    latest_artifact: Option<String>,
}

impl ChannelEntry {
    fn new(channel: Channel) -> Self {
        Self {
            channel,
            tx: None,
            worker: None,
            latest_artifact: None,
        }
    }

    fn has_live_session(&self) -> bool {
        self.tx.is_some()
    }
}

pub struct SessionManager {
    store: Arc<dyn ChannelStore>,
    gateway: Arc<dyn GatewayClient>,
    pubsub: PubSub,
    backoff: ReconnectBackoff,
    channels: RwLock<HashMap<ChannelId, ChannelEntry>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        store: Arc<dyn ChannelStore>,
        gateway: Arc<dyn GatewayClient>,
        pubsub: PubSub,
        backoff: ReconnectBackoff,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            gateway,
            pubsub,
            backoff,
            channels: RwLock::new(HashMap::new()),
        })
    }

    /// Load persisted channels into the manager at startup.
    ///
    /// No sessions survive a restart, so channels stuck in a transient
    /// status come back as `disconnected`. Terminated channels stay
    /// terminated.
    pub async fn restore(&self) -> Result<usize> {
        let stored = self.store.list().await?;
        let count = stored.len();

        let mut channels = self.channels.write().await;
        for mut channel in stored {
            if !channel.status.is_final() && channel.status != ChannelStatus::Disconnected {
                channel.status = ChannelStatus::Disconnected;
                channel.updated_at_ms = tidechat_common::now_ms();
                self.store.save(&channel).await?;
            }
            channels.insert(channel.id, ChannelEntry::new(channel));
        }
        info!(count, "restored channels");
        Ok(count)
    }

    // ── Channel lifecycle ────────────────────────────────────────────────

    /// Create and persist a new channel in the `disconnected` status and
    /// register its instance with the gateway.
    pub async fn create_channel(
        &self,
        tenant_id: TenantId,
        instance: impl Into<String>,
    ) -> Result<Channel> {
        let channel = Channel::new(tenant_id, instance);
        self.gateway
            .create_instance(&channel.external_instance_name)
            .await?;
        self.store.save(&channel).await?;

        self.channels
            .write()
            .await
            .insert(channel.id, ChannelEntry::new(channel.clone()));

        info!(channel_id = %channel.id, instance = %channel.external_instance_name, "channel created");
        self.publish_status(&channel);
        Ok(channel)
    }

    /// Open a session for the channel and start the pairing handshake.
    ///
    /// Rejects the call if a live session already exists or the channel is
    /// terminated.
    pub async fn open(self: &Arc<Self>, channel_id: ChannelId) -> Result<()> {
        let instance = {
            let mut channels = self.channels.write().await;
            let entry = channels
                .get_mut(&channel_id)
                .ok_or(Error::ChannelNotFound { channel_id })?;
            if entry.channel.status.is_final() {
                return Err(Error::Terminated { channel_id });
            }
            if entry.has_live_session() {
                return Err(Error::AlreadyOpen { channel_id });
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let worker = tokio::spawn(Arc::clone(self).run_worker(channel_id, tx.clone(), rx));
            entry.tx = Some(tx);
            entry.worker = Some(worker);
            entry.channel.external_instance_name.clone()
        };

        self.set_status(channel_id, ChannelStatus::Connecting).await?;
        if let Err(e) = self.gateway.connect(&instance).await {
            warn!(%channel_id, error = %e, "initial connect failed");
            if let Err(e) = self.set_status(channel_id, ChannelStatus::Error).await {
                warn!(%channel_id, error = %e, "status update failed");
            }
            self.enqueue(channel_id, SessionEvent::Disconnected(DisconnectReason::GatewayError))
                .await;
        }
        Ok(())
    }

    /// Close the channel's live session without terminating the channel.
    pub async fn close(&self, channel_id: ChannelId) -> Result<()> {
        let instance = self.stop_session(channel_id).await?;
        if let Some(instance) = instance {
            if let Err(e) = self.gateway.logout(&instance).await {
                warn!(%channel_id, error = %e, "logout failed during close");
            }
        }
        self.set_status(channel_id, ChannelStatus::Disconnected).await?;
        Ok(())
    }

    /// Close every live session. Used during shutdown.
    pub async fn close_all(&self) {
        let ids: Vec<ChannelId> = self.channels.read().await.keys().copied().collect();
        for channel_id in ids {
            let live = self
                .channels
                .read()
                .await
                .get(&channel_id)
                .is_some_and(ChannelEntry::has_live_session);
            if !live {
                continue;
            }
            if let Err(e) = self.close(channel_id).await {
                warn!(%channel_id, error = %e, "close failed during shutdown");
            }
        }
    }

    /// Terminate the channel: stop its session, move it to the final
    /// `terminated` status and remove the gateway instance. Idempotent.
    pub async fn terminate(&self, channel_id: ChannelId) -> Result<()> {
        let already_final = self
            .channels
            .read()
            .await
            .get(&channel_id)
            .ok_or(Error::ChannelNotFound { channel_id })?
            .channel
            .status
            .is_final();
        if already_final {
            return Ok(());
        }

        let instance = self.stop_session(channel_id).await?;
        self.set_status(channel_id, ChannelStatus::Terminated).await?;

        if let Some(instance) = instance {
            if let Err(e) = self.gateway.logout(&instance).await {
                debug!(%channel_id, error = %e, "logout failed during terminate");
            }
        }
        let instance = self
            .channels
            .read()
            .await
            .get(&channel_id)
            .map(|e| e.channel.external_instance_name.clone());
        if let Some(instance) = instance {
            if let Err(e) = self.gateway.delete_instance(&instance).await {
                warn!(%channel_id, error = %e, "instance deletion failed during terminate");
            }
        }
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub async fn get(&self, channel_id: ChannelId) -> Result<Channel> {
        self.channels
            .read()
            .await
            .get(&channel_id)
            .map(|e| e.channel.clone())
            .ok_or(Error::ChannelNotFound { channel_id })
    }

    pub async fn status(&self, channel_id: ChannelId) -> Result<ChannelStatus> {
        Ok(self.get(channel_id).await?.status)
    }

    /// The most recent pairing artifact, if one is pending a scan.
    pub async fn pairing_artifact(&self, channel_id: ChannelId) -> Option<String> {
        self.channels
            .read()
            .await
            .get(&channel_id)
            .and_then(|e| e.latest_artifact.clone())
    }

    /// The channel registered for a gateway instance name, if any.
    pub async fn channel_for_instance(&self, instance: &str) -> Option<Channel> {
        self.channels
            .read()
            .await
            .values()
            .find(|e| e.channel.external_instance_name == instance)
            .map(|e| e.channel.clone())
    }

    pub async fn list(&self) -> Vec<Channel> {
        self.channels
            .read()
            .await
            .values()
            .map(|e| e.channel.clone())
            .collect()
    }

    // ── Event ingestion ──────────────────────────────────────────────────

    /// Route a gateway event to the channel registered for `instance`.
    ///
    /// Events for unknown instances, terminated channels or channels with
    /// no live session are logged and dropped.
    pub async fn handle_event(&self, instance: &str, event: SessionEvent) {
        let Some(channel) = self.channel_for_instance(instance).await else {
            warn!(instance, "event for unknown instance dropped");
            return;
        };
        self.enqueue(channel.id, event).await;
    }

    async fn enqueue(&self, channel_id: ChannelId, event: SessionEvent) {
        let channels = self.channels.read().await;
        let Some(entry) = channels.get(&channel_id) else {
            return;
        };
        if entry.channel.status.is_final() {
            debug!(%channel_id, "event for terminated channel dropped");
            return;
        }
        match &entry.tx {
            Some(tx) if tx.send(event).is_ok() => {}
            _ => debug!(%channel_id, "event without live session dropped"),
        }
    }

    // ── Session worker ───────────────────────────────────────────────────

    async fn run_worker(
        self: Arc<Self>,
        channel_id: ChannelId,
        tx: mpsc::UnboundedSender<SessionEvent>,
        mut rx: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        // Reconnect attempts since the last successful connection.
        let mut attempts: u32 = 0;
        while let Some(event) = rx.recv().await {
            if !self.process_event(channel_id, &tx, &mut attempts, event).await {
                break;
            }
        }
        debug!(%channel_id, "session worker stopped");
    }

    /// Process one event. Returns `false` when the session is over and the
    /// worker should exit.
    async fn process_event(
        &self,
        channel_id: ChannelId,
        tx: &mpsc::UnboundedSender<SessionEvent>,
        attempts: &mut u32,
        event: SessionEvent,
    ) -> bool {
        let Ok(channel) = self.get(channel_id).await else {
            return false;
        };
        if channel.status.is_final() {
            return false;
        }

        match event {
            SessionEvent::PairingArtifact(artifact) => {
                {
                    let mut channels = self.channels.write().await;
                    if let Some(entry) = channels.get_mut(&channel_id) {
                        entry.latest_artifact = Some(artifact.clone());
                    }
                }
                if let Err(e) = self.set_status(channel_id, ChannelStatus::AwaitingScan).await {
                    warn!(%channel_id, error = %e, "status update failed");
                }
                self.pubsub.publish(PipelineEvent::PairingArtifact {
                    channel_id,
                    tenant_id: channel.tenant_id,
                    artifact,
                });
                true
            }
            SessionEvent::Connected => {
                *attempts = 0;
                {
                    let mut channels = self.channels.write().await;
                    if let Some(entry) = channels.get_mut(&channel_id) {
                        entry.latest_artifact = None;
                    }
                }
                if let Err(e) = self.set_status(channel_id, ChannelStatus::Connected).await {
                    warn!(%channel_id, error = %e, "status update failed");
                }
                true
            }
            SessionEvent::Disconnected(reason) if reason.is_recoverable() => {
                *attempts += 1;
                let delay = self.backoff.delay(*attempts);
                warn!(%channel_id, ?reason, attempt = *attempts, ?delay, "session lost, reconnecting");
                if let Err(e) = self.set_status(channel_id, ChannelStatus::Reconnecting).await {
                    warn!(%channel_id, error = %e, "status update failed");
                }
                tokio::time::sleep(delay).await;

                // The channel may have been closed or terminated while we
                // were waiting.
                match self.get(channel_id).await {
                    Ok(c) if c.status == ChannelStatus::Reconnecting => {}
                    _ => return false,
                }

                if let Err(e) = self.set_status(channel_id, ChannelStatus::Connecting).await {
                    warn!(%channel_id, error = %e, "status update failed");
                }
                if let Err(e) = self.gateway.connect(&channel.external_instance_name).await {
                    warn!(%channel_id, error = %e, "reconnect failed");
                    if let Err(e) = self.set_status(channel_id, ChannelStatus::Error).await {
                        warn!(%channel_id, error = %e, "status update failed");
                    }
                    let _ = tx.send(SessionEvent::Disconnected(DisconnectReason::GatewayError));
                }
                true
            }
            SessionEvent::Disconnected(reason) => {
                warn!(%channel_id, ?reason, "session ended by terminal disconnect");
                self.clear_session(channel_id).await;
                if let Err(e) = self.set_status(channel_id, ChannelStatus::Disconnected).await {
                    warn!(%channel_id, error = %e, "status update failed");
                }
                false
            }
        }
    }

    // ── Internals ────────────────────────────────────────────────────────

    /// Drop the live session handle so the worker exits once its queue
    /// drains. Returns the instance name if a session was live.
    async fn stop_session(&self, channel_id: ChannelId) -> Result<Option<String>> {
        let mut channels = self.channels.write().await;
        let entry = channels
            .get_mut(&channel_id)
            .ok_or(Error::ChannelNotFound { channel_id })?;
        let was_live = entry.tx.take().is_some();
        entry.worker.take();
        entry.latest_artifact = None;
        Ok(was_live.then(|| entry.channel.external_instance_name.clone()))
    }

    /// Drop session handles without touching the status. Used by the worker
    /// itself on terminal disconnects.
    async fn clear_session(&self, channel_id: ChannelId) {
        let mut channels = self.channels.write().await;
        if let Some(entry) = channels.get_mut(&channel_id) {
            entry.tx.take();
            entry.worker.take();
            entry.latest_artifact = None;
        }
    }

    /// Move the channel to `status`, persist it and broadcast the change.
    ///
    /// No-ops when the status is unchanged; rejects transitions out of a
    /// final status.
    async fn set_status(&self, channel_id: ChannelId, status: ChannelStatus) -> Result<()> {
        let channel = {
            let mut channels = self.channels.write().await;
            let entry = channels
                .get_mut(&channel_id)
                .ok_or(Error::ChannelNotFound { channel_id })?;
            if entry.channel.status == status {
                return Ok(());
            }
            if entry.channel.status.is_final() {
                return Err(Error::Terminated { channel_id });
            }
            entry.channel.status = status;
            entry.channel.updated_at_ms = tidechat_common::now_ms();
            entry.channel.clone()
        };

        self.store.save(&channel).await?;
        info!(%channel_id, status = status.as_str(), "channel status changed");
        self.publish_status(&channel);
        Ok(())
    }

    fn publish_status(&self, channel: &Channel) {
        self.pubsub.publish(PipelineEvent::ChannelStatusChanged {
            channel_id: channel.id,
            tenant_id: channel.tenant_id,
            status: channel.status.as_str().to_string(),
        });
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::store_memory::MemoryChannelStore,
        async_trait::async_trait,
        std::sync::atomic::{AtomicBool, Ordering},
        std::time::Duration,
        tokio::sync::Mutex,
    };

    #[derive(Default)]
    struct FakeGateway {
        connects: Mutex<Vec<String>>,
        logouts: Mutex<Vec<String>>,
        deletes: Mutex<Vec<String>>,
        fail_connect: AtomicBool,
    }

    #[async_trait]
    impl GatewayClient for FakeGateway {
        async fn create_instance(&self, _instance: &str) -> Result<()> {
            Ok(())
        }

        async fn connect(&self, instance: &str) -> Result<()> {
            self.connects.lock().await.push(instance.to_string());
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(Error::session("connect refused"));
            }
            Ok(())
        }

        async fn logout(&self, instance: &str) -> Result<()> {
            self.logouts.lock().await.push(instance.to_string());
            Ok(())
        }

        async fn delete_instance(&self, instance: &str) -> Result<()> {
            self.deletes.lock().await.push(instance.to_string());
            Ok(())
        }

        async fn send_text(&self, _instance: &str, _to: &str, _text: &str) -> Result<String> {
            Ok("ext-1".into())
        }

        async fn send_audio(&self, _instance: &str, _to: &str, _url: &str) -> Result<String> {
            Ok("ext-2".into())
        }
    }

    struct Fixture {
        manager: Arc<SessionManager>,
        gateway: Arc<FakeGateway>,
        pubsub: PubSub,
    }

    fn fixture() -> Fixture {
        let gateway = Arc::new(FakeGateway::default());
        let pubsub = PubSub::default();
        let manager = SessionManager::new(
            Arc::new(MemoryChannelStore::new()),
            Arc::clone(&gateway) as Arc<dyn GatewayClient>,
            pubsub.clone(),
            ReconnectBackoff {
                base: Duration::from_millis(5),
                max: Duration::from_millis(20),
            },
        );
        Fixture {
            manager,
            gateway,
            pubsub,
        }
    }

    async fn next_status(
        rx: &mut tokio::sync::broadcast::Receiver<PipelineEvent>,
    ) -> Option<String> {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .ok()?
                .ok()?;
            if let PipelineEvent::ChannelStatusChanged { status, .. } = event {
                return Some(status);
            }
        }
    }

    #[tokio::test]
    async fn test_open_twice_is_rejected() {
        let fx = fixture();
        let channel = fx
            .manager
            .create_channel(TenantId::new(), "acme-main")
            .await
            .unwrap();

        fx.manager.open(channel.id).await.unwrap();
        let err = fx.manager.open(channel.id).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyOpen { .. }));
    }

    #[tokio::test]
    async fn test_open_unknown_channel() {
        let fx = fixture();
        let err = fx.manager.open(ChannelId::new()).await.unwrap_err();
        assert!(matches!(err, Error::ChannelNotFound { .. }));
    }

    #[tokio::test]
    async fn test_pairing_artifact_replaces_previous() {
        let fx = fixture();
        let channel = fx
            .manager
            .create_channel(TenantId::new(), "acme-main")
            .await
            .unwrap();
        let mut rx = fx.pubsub.subscribe();
        fx.manager.open(channel.id).await.unwrap();

        fx.manager
            .handle_event("acme-main", SessionEvent::PairingArtifact("qr-1".into()))
            .await;
        fx.manager
            .handle_event("acme-main", SessionEvent::PairingArtifact("qr-2".into()))
            .await;

        let mut artifacts = Vec::new();
        while artifacts.len() < 2 {
            match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
                Ok(Ok(PipelineEvent::PairingArtifact { artifact, .. })) => {
                    artifacts.push(artifact);
                }
                Ok(Ok(_)) => {}
                _ => panic!("expected two pairing artifact events"),
            }
        }
        assert_eq!(artifacts, ["qr-1", "qr-2"]);

        // Only the newest artifact is retained.
        assert_eq!(
            fx.manager.pairing_artifact(channel.id).await.as_deref(),
            Some("qr-2")
        );
        assert_eq!(
            fx.manager.status(channel.id).await.unwrap(),
            ChannelStatus::AwaitingScan
        );
    }

    #[tokio::test]
    async fn test_recoverable_disconnect_reconnects() {
        let fx = fixture();
        let channel = fx
            .manager
            .create_channel(TenantId::new(), "acme-main")
            .await
            .unwrap();
        let mut rx = fx.pubsub.subscribe();
        fx.manager.open(channel.id).await.unwrap();
        assert_eq!(next_status(&mut rx).await.as_deref(), Some("connecting"));

        fx.manager
            .handle_event("acme-main", SessionEvent::Connected)
            .await;
        assert_eq!(next_status(&mut rx).await.as_deref(), Some("connected"));

        fx.manager
            .handle_event(
                "acme-main",
                SessionEvent::Disconnected(DisconnectReason::ConnectionLost),
            )
            .await;
        assert_eq!(next_status(&mut rx).await.as_deref(), Some("reconnecting"));
        assert_eq!(next_status(&mut rx).await.as_deref(), Some("connecting"));

        fx.manager
            .handle_event("acme-main", SessionEvent::Connected)
            .await;
        assert_eq!(next_status(&mut rx).await.as_deref(), Some("connected"));

        // Initial open plus one reconnect.
        assert_eq!(fx.gateway.connects.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_marks_error_then_retries() {
        let fx = fixture();
        fx.gateway.fail_connect.store(true, Ordering::SeqCst);
        let channel = fx
            .manager
            .create_channel(TenantId::new(), "acme-main")
            .await
            .unwrap();
        let mut rx = fx.pubsub.subscribe();
        fx.manager.open(channel.id).await.unwrap();

        assert_eq!(next_status(&mut rx).await.as_deref(), Some("connecting"));
        assert_eq!(next_status(&mut rx).await.as_deref(), Some("error"));
        assert_eq!(next_status(&mut rx).await.as_deref(), Some("reconnecting"));
        assert_eq!(next_status(&mut rx).await.as_deref(), Some("connecting"));
        assert_eq!(next_status(&mut rx).await.as_deref(), Some("error"));

        // At least the initial attempt and one retry hit the gateway.
        assert!(fx.gateway.connects.lock().await.len() >= 2);
        fx.manager.terminate(channel.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_terminal_disconnect_ends_session() {
        let fx = fixture();
        let channel = fx
            .manager
            .create_channel(TenantId::new(), "acme-main")
            .await
            .unwrap();
        let mut rx = fx.pubsub.subscribe();
        fx.manager.open(channel.id).await.unwrap();
        assert_eq!(next_status(&mut rx).await.as_deref(), Some("connecting"));

        fx.manager
            .handle_event(
                "acme-main",
                SessionEvent::Disconnected(DisconnectReason::LoggedOut),
            )
            .await;
        assert_eq!(next_status(&mut rx).await.as_deref(), Some("disconnected"));

        // No reconnect attempts beyond the initial connect, and the
        // channel can be opened again later.
        assert_eq!(fx.gateway.connects.lock().await.len(), 1);
        tokio::time::sleep(Duration::from_millis(10)).await;
        fx.manager.open(channel.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_is_final_and_idempotent() {
        let fx = fixture();
        let channel = fx
            .manager
            .create_channel(TenantId::new(), "acme-main")
            .await
            .unwrap();
        fx.manager.open(channel.id).await.unwrap();

        fx.manager.terminate(channel.id).await.unwrap();
        fx.manager.terminate(channel.id).await.unwrap();
        assert_eq!(
            fx.manager.status(channel.id).await.unwrap(),
            ChannelStatus::Terminated
        );
        assert_eq!(fx.gateway.deletes.lock().await.len(), 1);

        // Later events are dropped and the channel cannot be reopened.
        fx.manager
            .handle_event("acme-main", SessionEvent::Connected)
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            fx.manager.status(channel.id).await.unwrap(),
            ChannelStatus::Terminated
        );
        let err = fx.manager.open(channel.id).await.unwrap_err();
        assert!(matches!(err, Error::Terminated { .. }));
    }

    #[tokio::test]
    async fn test_close_logs_out_and_keeps_channel() {
        let fx = fixture();
        let channel = fx
            .manager
            .create_channel(TenantId::new(), "acme-main")
            .await
            .unwrap();
        fx.manager.open(channel.id).await.unwrap();

        fx.manager.close(channel.id).await.unwrap();
        assert_eq!(
            fx.manager.status(channel.id).await.unwrap(),
            ChannelStatus::Disconnected
        );
        assert_eq!(fx.gateway.logouts.lock().await.len(), 1);
        assert!(fx.gateway.deletes.lock().await.is_empty());

        fx.manager.open(channel.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_resets_transient_statuses() {
        let store = Arc::new(MemoryChannelStore::new());
        let mut connected = Channel::new(TenantId::new(), "restore-a");
        connected.status = ChannelStatus::Connected;
        let mut terminated = Channel::new(TenantId::new(), "restore-b");
        terminated.status = ChannelStatus::Terminated;
        store.save(&connected).await.unwrap();
        store.save(&terminated).await.unwrap();

        let manager = SessionManager::new(
            store,
            Arc::new(FakeGateway::default()),
            PubSub::default(),
            ReconnectBackoff::default(),
        );
        assert_eq!(manager.restore().await.unwrap(), 2);
        assert_eq!(
            manager.status(connected.id).await.unwrap(),
            ChannelStatus::Disconnected
        );
        assert_eq!(
            manager.status(terminated.id).await.unwrap(),
            ChannelStatus::Terminated
        );
    }
}
