use std::net::Ipv4Addr;

use crate::{EventStream, NetworkEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Platform Wi-Fi (or other) link, observed but not owned by this crate.
pub trait INetworkLink {
    fn state(&self) -> LinkState;
    /// Only meaningful while `state() == Connected`.
    fn ip_address(&self) -> Option<(Ipv4Addr, Ipv4Addr, Ipv4Addr)>;
}

/// Translates `INetworkLink` polls into `NetworkEvent`s on an `EventStream`.
///
/// Poll policy (§4.6): `LinkUp` fires once on the disconnected/failed →
/// connecting/connected edge; `GotIp` fires the first time connected and
/// again whenever the address changes while still connected; `LinkDown`
/// fires once on the drop edge and resets the "ever got an IP" flag so a
/// future reconnect re-emits `GotIp`. Steady-state polls publish nothing.
pub struct NetworkLinkMonitor {
    last_state: LinkState,
    last_ip: Option<(Ipv4Addr, Ipv4Addr, Ipv4Addr)>,
}

impl Default for NetworkLinkMonitor {
    fn default() -> Self {
        Self {
            last_state: LinkState::Disconnected,
            last_ip: None,
        }
    }
}

impl NetworkLinkMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_up(state: LinkState) -> bool {
        matches!(state, LinkState::Connecting | LinkState::Connected)
    }

    pub fn poll(&mut self, link: &dyn INetworkLink, events: &EventStream<NetworkEvent>) {
        let state = link.state();

        let was_up = Self::is_up(self.last_state);
        let now_up = Self::is_up(state);

        if !was_up && now_up {
            events.publish(&NetworkEvent::LinkUp);
        }

        if state == LinkState::Connected {
            if let Some((ip4, netmask, gateway)) = link.ip_address() {
                if self.last_ip != Some((ip4, netmask, gateway)) {
                    self.last_ip = Some((ip4, netmask, gateway));
                    events.publish(&NetworkEvent::GotIp {
                        ip4,
                        netmask,
                        gateway,
                    });
                }
            }
        }

        if was_up && !now_up {
            events.publish(&NetworkEvent::LinkDown);
            self.last_ip = None;
        }

        self.last_state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::{Arc, Mutex};

    struct FakeLink {
        state: Cell<LinkState>,
        ip: Cell<Option<(Ipv4Addr, Ipv4Addr, Ipv4Addr)>>,
    }

    impl INetworkLink for FakeLink {
        fn state(&self) -> LinkState {
            self.state.get()
        }
        fn ip_address(&self) -> Option<(Ipv4Addr, Ipv4Addr, Ipv4Addr)> {
            self.ip.get()
        }
    }

    fn addr(a: u8) -> (Ipv4Addr, Ipv4Addr, Ipv4Addr) {
        (
            Ipv4Addr::new(192, 168, 1, a),
            Ipv4Addr::new(255, 255, 255, 0),
            Ipv4Addr::new(192, 168, 1, 1),
        )
    }

    #[test]
    fn scenario_s6_link_monitor() {
        let link = FakeLink {
            state: Cell::new(LinkState::Disconnected),
            ip: Cell::new(None),
        };
        let events: EventStream<NetworkEvent> = EventStream::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cl = seen.clone();
        events.subscribe(move |e: &NetworkEvent| seen_cl.lock().unwrap().push(*e));

        let mut monitor = NetworkLinkMonitor::new();

        link.state.set(LinkState::Connecting);
        monitor.poll(&link, &events);

        link.state.set(LinkState::Connected);
        link.ip.set(Some(addr(10)));
        monitor.poll(&link, &events);

        monitor.poll(&link, &events);

        {
            let log = seen.lock().unwrap();
            assert_eq!(
                *log,
                vec![
                    NetworkEvent::LinkUp,
                    NetworkEvent::GotIp {
                        ip4: Ipv4Addr::new(192, 168, 1, 10),
                        netmask: Ipv4Addr::new(255, 255, 255, 0),
                        gateway: Ipv4Addr::new(192, 168, 1, 1),
                    },
                ]
            );
        }

        link.ip.set(Some(addr(11)));
        monitor.poll(&link, &events);
        assert_eq!(seen.lock().unwrap().len(), 3);

        link.state.set(LinkState::Disconnected);
        monitor.poll(&link, &events);
        assert_eq!(seen.lock().unwrap().last(), Some(&NetworkEvent::LinkDown));
        assert_eq!(seen.lock().unwrap().len(), 4);
    }

    #[test]
    fn steady_state_publishes_nothing_once_settled() {
        let link = FakeLink {
            state: Cell::new(LinkState::Connected),
            ip: Cell::new(Some(addr(10))),
        };
        let events: EventStream<NetworkEvent> = EventStream::new();
        let count = Arc::new(Mutex::new(0usize));
        let count_cl = count.clone();
        events.subscribe(move |_: &NetworkEvent| *count_cl.lock().unwrap() += 1);

        let mut monitor = NetworkLinkMonitor::new();
        monitor.poll(&link, &events); // LinkUp + GotIp
        let after_first = *count.lock().unwrap();
        assert_eq!(after_first, 2);

        monitor.poll(&link, &events); // unchanged Connected/ip -> nothing
        assert_eq!(*count.lock().unwrap(), after_first);
    }
}
