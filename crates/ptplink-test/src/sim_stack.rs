//! Simulated embedded datagram stack attached to a [`Segment`]

use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddrV4};

use ptplink_transport::{NetworkStack, StackError};

use crate::{Frame, Segment, StationId};

/// Failures to inject into the stack
#[derive(Clone, Debug, Default)]
pub struct StackFaults {
    /// Fail the n-th endpoint creation (0-based)
    pub fail_create_at: Option<usize>,
    /// Refuse to bind this port
    pub fail_bind_port: Option<u16>,
    /// Refuse multicast membership
    pub fail_join: bool,
    /// Send buffer allocation always fails
    pub fail_alloc: bool,
    /// Transmission always fails
    pub fail_transmit: bool,
}

/// Buffer accounting, for leak checks
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferLedger {
    pub tx_allocated: u64,
    pub tx_freed: u64,
    pub rx_delivered: u64,
    pub rx_released: u64,
    /// Frames that arrived for a port with no bound endpoint
    pub rx_unclaimed: u64,
}

impl BufferLedger {
    pub fn outstanding_tx(&self) -> u64 {
        self.tx_allocated - self.tx_freed
    }

    pub fn outstanding_rx(&self) -> u64 {
        self.rx_delivered - self.rx_released
    }
}

/// Endpoint handle issued by [`SimulatedStack`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SimEndpoint(u32);

#[derive(Debug, Default)]
struct EndpointState {
    port: Option<u16>,
    queue: VecDeque<Vec<u8>>,
}

const EPHEMERAL_BASE: u16 = 49152;

/// [`NetworkStack`] over a simulated segment
pub struct SimulatedStack {
    segment: Segment,
    station: StationId,
    address: Ipv4Addr,
    endpoints: HashMap<SimEndpoint, EndpointState>,
    next_id: u32,
    next_ephemeral: u16,
    creates: usize,
    timer_services: u64,
    pub faults: StackFaults,
    ledger: BufferLedger,
}

impl SimulatedStack {
    /// Attach a new station at `address` to `segment`
    pub fn attach(segment: &Segment, address: Ipv4Addr) -> Self {
        let station = segment.attach(address);
        SimulatedStack {
            segment: segment.clone(),
            station,
            address,
            endpoints: HashMap::new(),
            next_id: 0,
            next_ephemeral: EPHEMERAL_BASE,
            creates: 0,
            timer_services: 0,
            faults: StackFaults::default(),
            ledger: BufferLedger::default(),
        }
    }

    pub fn with_faults(mut self, faults: StackFaults) -> Self {
        self.faults = faults;
        self
    }

    pub fn ledger(&self) -> &BufferLedger {
        &self.ledger
    }

    pub fn station(&self) -> StationId {
        self.station
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Endpoints currently allocated, bound or not
    pub fn live_endpoints(&self) -> usize {
        self.endpoints.len()
    }

    /// Ports with a bound endpoint
    pub fn bound_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.endpoints.values().filter_map(|e| e.port).collect();
        ports.sort_unstable();
        ports
    }

    pub fn timer_services(&self) -> u64 {
        self.timer_services
    }

    /// Deliver `payload` to this station as if it arrived from `src`
    pub fn inject(&self, src: SocketAddrV4, dest: SocketAddrV4, payload: &[u8]) {
        self.segment.inject(
            self.station,
            Frame {
                src,
                dest,
                payload: payload.to_vec(),
            },
        );
    }

    fn port_in_use(&self, port: u16) -> bool {
        self.endpoints.values().any(|e| e.port == Some(port))
    }

    fn ephemeral_port(&mut self) -> u16 {
        loop {
            let port = self.next_ephemeral;
            self.next_ephemeral = self.next_ephemeral.checked_add(1).unwrap_or(EPHEMERAL_BASE);
            if !self.port_in_use(port) {
                return port;
            }
        }
    }
}

impl NetworkStack for SimulatedStack {
    type Endpoint = SimEndpoint;
    type Datagram = Vec<u8>;
    type TxBuffer = Vec<u8>;

    fn create_endpoint(&mut self) -> Result<SimEndpoint, StackError> {
        let attempt = self.creates;
        self.creates += 1;
        if self.faults.fail_create_at == Some(attempt) {
            return Err(StackError::OutOfMemory);
        }

        self.next_id += 1;
        let endpoint = SimEndpoint(self.next_id);
        self.endpoints.insert(endpoint, EndpointState::default());
        Ok(endpoint)
    }

    fn bind(&mut self, endpoint: SimEndpoint, addr: SocketAddrV4) -> Result<(), StackError> {
        if !self.endpoints.contains_key(&endpoint) {
            return Err(StackError::UnknownEndpoint);
        }
        let port = match addr.port() {
            0 => self.ephemeral_port(),
            port if self.faults.fail_bind_port == Some(port) || self.port_in_use(port) => {
                return Err(StackError::AddrInUse);
            }
            port => port,
        };
        if let Some(state) = self.endpoints.get_mut(&endpoint) {
            state.port = Some(port);
        }
        Ok(())
    }

    fn release_endpoint(&mut self, endpoint: SimEndpoint) {
        if let Some(state) = self.endpoints.remove(&endpoint) {
            tracing::trace!(?endpoint, dropped = state.queue.len(), "endpoint released");
        }
    }

    fn default_interface(&self) -> Ipv4Addr {
        self.address
    }

    fn join_group(&mut self, interface: Ipv4Addr, group: Ipv4Addr) -> Result<(), StackError> {
        if self.faults.fail_join {
            return Err(StackError::Interface(format!(
                "IGMP join {} refused on {}",
                group, interface
            )));
        }
        self.segment.join(self.station, group);
        Ok(())
    }

    fn alloc_tx(&mut self, len: usize) -> Result<Vec<u8>, StackError> {
        if self.faults.fail_alloc {
            return Err(StackError::OutOfMemory);
        }
        self.ledger.tx_allocated += 1;
        Ok(vec![0; len])
    }

    fn send_to(
        &mut self,
        endpoint: SimEndpoint,
        buffer: &Vec<u8>,
        dest: SocketAddrV4,
    ) -> Result<(), StackError> {
        let port = self
            .endpoints
            .get(&endpoint)
            .ok_or(StackError::UnknownEndpoint)?
            .port
            .ok_or(StackError::Routing)?;
        if self.faults.fail_transmit {
            return Err(StackError::Routing);
        }

        self.segment.transmit(
            self.station,
            Frame {
                src: SocketAddrV4::new(self.address, port),
                dest,
                payload: buffer.clone(),
            },
        );
        Ok(())
    }

    fn free_tx(&mut self, _buffer: Vec<u8>) {
        self.ledger.tx_freed += 1;
    }

    fn poll_input(&mut self) {
        for frame in self.segment.drain_inbox(self.station) {
            let port = frame.dest.port();
            match self.endpoints.values_mut().find(|e| e.port == Some(port)) {
                Some(state) => state.queue.push_back(frame.payload),
                None => self.ledger.rx_unclaimed += 1,
            }
        }
    }

    fn recv(&mut self, endpoint: SimEndpoint) -> Option<Vec<u8>> {
        let datagram = self.endpoints.get_mut(&endpoint)?.queue.pop_front()?;
        self.ledger.rx_delivered += 1;
        Some(datagram)
    }

    fn release_datagram(&mut self, _datagram: Vec<u8>) {
        self.ledger.rx_released += 1;
    }

    fn service_timers(&mut self) {
        self.timer_services += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);

    #[test]
    fn test_create_fault_hits_nth_attempt() {
        let segment = Segment::perfect();
        let mut stack = SimulatedStack::attach(&segment, HOST).with_faults(StackFaults {
            fail_create_at: Some(1),
            ..Default::default()
        });

        assert!(stack.create_endpoint().is_ok());
        assert_eq!(stack.create_endpoint(), Err(StackError::OutOfMemory));
        assert!(stack.create_endpoint().is_ok());
    }

    #[test]
    fn test_duplicate_bind_rejected() {
        let segment = Segment::perfect();
        let mut stack = SimulatedStack::attach(&segment, HOST);
        let a = stack.create_endpoint().unwrap();
        let b = stack.create_endpoint().unwrap();

        stack.bind(a, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 319)).unwrap();
        assert_eq!(
            stack.bind(b, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 319)),
            Err(StackError::AddrInUse)
        );
        stack.bind(b, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        assert_eq!(stack.bound_ports(), vec![319, EPHEMERAL_BASE]);
    }

    #[test]
    fn test_input_demultiplexed_by_port() {
        let segment = Segment::perfect();
        let mut stack = SimulatedStack::attach(&segment, HOST);
        let event = stack.create_endpoint().unwrap();
        stack.bind(event, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 319)).unwrap();

        let src = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 20), 319);
        stack.inject(src, SocketAddrV4::new(HOST, 319), &[7; 44]);
        stack.inject(src, SocketAddrV4::new(HOST, 5000), &[1]);

        assert!(stack.recv(event).is_none());
        stack.poll_input();

        let datagram = stack.recv(event).unwrap();
        assert_eq!(datagram.len(), 44);
        stack.release_datagram(datagram);
        assert_eq!(stack.ledger().rx_unclaimed, 1);
        assert_eq!(stack.ledger().outstanding_rx(), 0);
    }

    #[test]
    fn test_send_reaches_peer_station() {
        let segment = Segment::perfect();
        let mut a = SimulatedStack::attach(&segment, HOST);
        let mut b = SimulatedStack::attach(&segment, Ipv4Addr::new(192, 168, 1, 20));

        let tx = a.create_endpoint().unwrap();
        a.bind(tx, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 320)).unwrap();
        let rx = b.create_endpoint().unwrap();
        b.bind(rx, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 320)).unwrap();
        let group = Ipv4Addr::new(224, 0, 1, 129);
        b.join_group(b.default_interface(), group).unwrap();

        let buffer = a.alloc_tx(64).unwrap();
        a.send_to(tx, &buffer, SocketAddrV4::new(group, 320)).unwrap();
        a.free_tx(buffer);

        b.poll_input();
        assert_eq!(b.recv(rx).map(|d| d.len()), Some(64));
        assert_eq!(a.ledger().outstanding_tx(), 0);
    }
}
