//! PTP datagram transport over two multicast endpoints

use std::net::{Ipv4Addr, SocketAddrV4};

use serde::{Deserialize, Serialize};

use ptplink_core::{
    PlatformError, PlatformResult, PtpPort, PtpSender, PTP_EVENT_PORT, PTP_GENERAL_PORT,
    PTP_PEER_MULTICAST, PTP_PRIMARY_MULTICAST,
};

use crate::NetworkStack;

/// Transport configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Local port for event messages
    pub event_port: u16,
    /// Local port for general messages
    pub general_port: u16,
    /// Port event messages are sent to
    pub event_dest_port: u16,
    /// Port general messages are sent to
    pub general_dest_port: u16,
    /// Group all outbound traffic goes to
    pub primary_group: Ipv4Addr,
    /// Group reserved for peer delay messages
    pub peer_group: Ipv4Addr,
    /// Local bind address (wildcard by default)
    pub bind_addr: Ipv4Addr,
    /// Send to this unicast address instead of the primary group
    pub unicast_peer: Option<Ipv4Addr>,
    /// Upper bound on datagrams delivered per endpoint per poll
    pub max_datagrams_per_poll: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            event_port: PTP_EVENT_PORT,
            general_port: PTP_GENERAL_PORT,
            event_dest_port: PTP_EVENT_PORT,
            general_dest_port: PTP_GENERAL_PORT,
            primary_group: PTP_PRIMARY_MULTICAST,
            peer_group: PTP_PEER_MULTICAST,
            bind_addr: Ipv4Addr::UNSPECIFIED,
            unicast_peer: None,
            max_datagrams_per_poll: 64,
        }
    }
}

impl TransportConfig {
    /// Ephemeral local ports, for hosts without privileges for 319/320.
    /// Outbound traffic still goes to the well-known ports.
    pub fn ephemeral(bind_addr: Ipv4Addr) -> Self {
        TransportConfig {
            event_port: 0,
            general_port: 0,
            bind_addr,
            ..Self::default()
        }
    }

    /// Local port number configured for `port`
    pub fn port_number(&self, port: PtpPort) -> u16 {
        match port {
            PtpPort::Event => self.event_port,
            PtpPort::General => self.general_port,
        }
    }

    /// Where datagrams sent on `port` go
    pub fn destination(&self, port: PtpPort) -> SocketAddrV4 {
        let dest_port = match port {
            PtpPort::Event => self.event_dest_port,
            PtpPort::General => self.general_dest_port,
        };
        SocketAddrV4::new(self.unicast_peer.unwrap_or(self.primary_group), dest_port)
    }

    pub fn validate(&self) -> PlatformResult<()> {
        if self.event_port != 0 && self.event_port == self.general_port {
            return Err(PlatformError::InvalidConfig(format!(
                "event and general ports must differ (both {})",
                self.event_port
            )));
        }
        if self.event_dest_port == 0 || self.general_dest_port == 0 {
            return Err(PlatformError::InvalidConfig(
                "destination ports must be non-zero".into(),
            ));
        }
        if self.event_dest_port == self.general_dest_port {
            return Err(PlatformError::InvalidConfig(format!(
                "event and general destination ports must differ (both {})",
                self.event_dest_port
            )));
        }
        if let Some(peer) = self.unicast_peer {
            if peer.is_multicast() || peer.is_unspecified() {
                return Err(PlatformError::InvalidConfig(format!(
                    "{peer} is not a unicast address"
                )));
            }
        }
        for group in [self.primary_group, self.peer_group] {
            if !group.is_multicast() {
                return Err(PlatformError::InvalidConfig(format!(
                    "{group} is not a multicast address"
                )));
            }
        }
        if self.max_datagrams_per_poll == 0 {
            return Err(PlatformError::InvalidConfig(
                "max_datagrams_per_poll must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Transport counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub event_datagrams_in: u64,
    pub general_datagrams_in: u64,
    pub bytes_in: u64,
    pub frames_out: u64,
    pub bytes_out: u64,
    pub send_failures: u64,
    pub join_failures: u64,
}

/// The single ingestion entry point both endpoints feed.
///
/// `payload` is only valid for the duration of the call; anything needed
/// later must be copied out. The transport is handed back so the handler
/// can reply synchronously.
pub trait MessageSink<S: NetworkStack> {
    fn ingest(&mut self, payload: &[u8], transport: &mut NetworkTransport<S>);
}

impl<S, F> MessageSink<S> for F
where
    S: NetworkStack,
    F: FnMut(&[u8], &mut NetworkTransport<S>),
{
    fn ingest(&mut self, payload: &[u8], transport: &mut NetworkTransport<S>) {
        self(payload, transport)
    }
}

/// Event and general endpoints over a [`NetworkStack`].
///
/// Either both endpoints are live or neither is.
pub struct NetworkTransport<S: NetworkStack> {
    stack: S,
    config: TransportConfig,
    event: Option<S::Endpoint>,
    general: Option<S::Endpoint>,
    /// Groups successfully joined
    memberships: Vec<Ipv4Addr>,
    stats: TransportStats,
}

impl<S: NetworkStack> NetworkTransport<S> {
    /// Wrap a stack; no endpoints exist until [`NetworkTransport::init`]
    pub fn new(stack: S, config: TransportConfig) -> Self {
        NetworkTransport {
            stack,
            config,
            event: None,
            general: None,
            memberships: Vec::new(),
            stats: TransportStats::default(),
        }
    }

    /// Create and bind both endpoints, then join both multicast groups.
    ///
    /// Endpoint failures are fatal and unwind whatever was already created.
    /// Group join failures are logged and leave the transport usable.
    pub fn init(&mut self) -> PlatformResult<()> {
        if self.is_open() {
            tracing::warn!("transport already initialized");
            return Ok(());
        }
        self.config.validate()?;

        tracing::info!("initializing PTP network layer");

        let event = self.open_endpoint(PtpPort::Event)?;
        let general = match self.open_endpoint(PtpPort::General) {
            Ok(general) => general,
            Err(e) => {
                self.stack.release_endpoint(event);
                return Err(e);
            }
        };

        let interface = self.stack.default_interface();
        for (name, group) in [
            ("primary", self.config.primary_group),
            ("peer", self.config.peer_group),
        ] {
            if self.memberships.contains(&group) {
                continue;
            }
            match self.stack.join_group(interface, group) {
                Ok(()) => {
                    tracing::debug!(%group, %interface, "joined {} multicast group", name);
                    self.memberships.push(group);
                }
                Err(e) => {
                    self.stats.join_failures += 1;
                    tracing::error!(%group, error = %e, "failed to join {} multicast group", name);
                }
            }
        }

        self.event = Some(event);
        self.general = Some(general);
        tracing::info!(
            event_port = self.config.event_port,
            general_port = self.config.general_port,
            "network layer initialized"
        );
        Ok(())
    }

    /// Create one endpoint and bind it; releases it again if the bind fails
    fn open_endpoint(&mut self, port: PtpPort) -> PlatformResult<S::Endpoint> {
        let endpoint = self.stack.create_endpoint().map_err(|e| {
            tracing::error!(%port, error = %e, "failed to create endpoint");
            PlatformError::EndpointCreate {
                port,
                reason: e.to_string(),
            }
        })?;

        let number = self.config.port_number(port);
        let addr = SocketAddrV4::new(self.config.bind_addr, number);
        if let Err(e) = self.stack.bind(endpoint, addr) {
            tracing::error!(%port, number, error = %e, "failed to bind endpoint");
            self.stack.release_endpoint(endpoint);
            return Err(PlatformError::EndpointBind {
                port,
                number,
                reason: e.to_string(),
            });
        }
        Ok(endpoint)
    }

    /// Release both endpoints. Safe to call any number of times.
    pub fn shutdown(&mut self) {
        if let Some(event) = self.event.take() {
            self.stack.release_endpoint(event);
        }
        if let Some(general) = self.general.take() {
            self.stack.release_endpoint(general);
        }
    }

    /// Poll the stack and hand every arrived datagram to `sink`.
    ///
    /// Each datagram is released back to the stack after `sink` returns.
    /// Returns the number of datagrams delivered.
    pub fn poll<K: MessageSink<S>>(&mut self, sink: &mut K) -> usize {
        self.stack.poll_input();

        let mut delivered = 0;
        for port in PtpPort::ALL {
            for _ in 0..self.config.max_datagrams_per_poll {
                let Some(endpoint) = self.endpoint(port) else {
                    break;
                };
                let Some(datagram) = self.stack.recv(endpoint) else {
                    break;
                };

                let len = datagram.as_ref().len();
                match port {
                    PtpPort::Event => self.stats.event_datagrams_in += 1,
                    PtpPort::General => self.stats.general_datagrams_in += 1,
                }
                self.stats.bytes_in += len as u64;
                tracing::trace!(%port, len, "datagram received");

                sink.ingest(datagram.as_ref(), self);
                self.stack.release_datagram(datagram);
                delivered += 1;
            }
        }
        delivered
    }

    /// Run the stack's pending lower-level timers
    pub fn service_timers(&mut self) {
        self.stack.service_timers();
    }

    fn send_packet(&mut self, port: PtpPort, data: &[u8]) -> PlatformResult<usize> {
        let Some(endpoint) = self.endpoint(port) else {
            self.stats.send_failures += 1;
            return Err(PlatformError::EndpointClosed(port));
        };
        let len = data.len();
        let dest = self.config.destination(port);

        let mut buffer = match self.stack.alloc_tx(len) {
            Ok(buffer) => buffer,
            Err(e) => {
                self.stats.send_failures += 1;
                tracing::error!(%port, len, error = %e, "failed to allocate send buffer");
                return Err(PlatformError::BufferAlloc { len });
            }
        };
        if buffer.as_mut().len() != len {
            self.stack.free_tx(buffer);
            self.stats.send_failures += 1;
            tracing::error!(%port, len, "stack returned a send buffer of the wrong size");
            return Err(PlatformError::BufferAlloc { len });
        }

        buffer.as_mut().copy_from_slice(data);
        let result = self.stack.send_to(endpoint, &buffer, dest);
        self.stack.free_tx(buffer);

        match result {
            Ok(()) => {
                self.stats.frames_out += 1;
                self.stats.bytes_out += len as u64;
                Ok(len)
            }
            Err(e) => {
                self.stats.send_failures += 1;
                tracing::error!(%port, %dest, error = %e, "failed to send datagram");
                Err(PlatformError::Transmit {
                    port,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Stack handle of the endpoint serving `port`, while open
    pub fn endpoint(&self, port: PtpPort) -> Option<S::Endpoint> {
        match port {
            PtpPort::Event => self.event,
            PtpPort::General => self.general,
        }
    }

    /// Both endpoints are live
    pub fn is_open(&self) -> bool {
        self.event.is_some() && self.general.is_some()
    }

    /// Number of live endpoints (0 or 2)
    pub fn live_endpoints(&self) -> usize {
        self.event.iter().count() + self.general.iter().count()
    }

    /// Multicast groups joined so far
    pub fn memberships(&self) -> &[Ipv4Addr] {
        &self.memberships
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }
}

impl<S: NetworkStack> PtpSender for NetworkTransport<S> {
    fn send_event(&mut self, data: &[u8]) -> PlatformResult<usize> {
        self.send_packet(PtpPort::Event, data)
    }

    fn send_general(&mut self, data: &[u8]) -> PlatformResult<usize> {
        self.send_packet(PtpPort::General, data)
    }
}
