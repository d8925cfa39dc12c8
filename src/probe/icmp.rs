//! ICMP echo transport backed by surge-ping
//!
//! One raw/datagram ICMP socket per address family, opened on first use
//! and shared by every prober of that family. Replies are demultiplexed
//! by ICMP identifier, so each stream gets its own. Unprivileged datagram
//! sockets lose the identifier to the kernel, so sequence numbers are
//! offset by it as well.

use super::{Echo, EchoFactory};
use crate::machine::AddressKind;
use crate::{Result, TalosmonError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, Pinger, ICMP};
use tracing::debug;

const PAYLOAD: [u8; 56] = [0; 56];

pub struct IcmpEchoFactory {
    v4: Mutex<Option<Client>>,
    v6: Mutex<Option<Client>>,
    next_ident: AtomicU16,
}

impl IcmpEchoFactory {
    pub fn new() -> Self {
        Self {
            v4: Mutex::new(None),
            v6: Mutex::new(None),
            next_ident: AtomicU16::new(std::process::id() as u16),
        }
    }

    fn client(&self, addr: IpAddr) -> Result<Client> {
        let (slot, family) = match addr {
            IpAddr::V4(_) => (&self.v4, ICMP::V4),
            IpAddr::V6(_) => (&self.v6, ICMP::V6),
        };

        let mut slot = slot.lock();
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let config = Config::builder().kind(family).build();
        let client = Client::new(&config).map_err(socket_error)?;

        debug!(addr = %addr, "Opened ICMP socket for address family");
        *slot = Some(client.clone());
        Ok(client)
    }
}

impl Default for IcmpEchoFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EchoFactory for IcmpEchoFactory {
    async fn open(
        &self,
        kind: AddressKind,
        addr: IpAddr,
        timeout: Duration,
    ) -> Result<Box<dyn Echo>> {
        let client = self.client(addr)?;
        let ident = PingIdentifier(self.next_ident.fetch_add(1, Ordering::Relaxed));

        let mut pinger = client.pinger(addr, ident).await;
        pinger.timeout(timeout);

        debug!(kind = %kind, addr = %addr, ident = ident.0, "Opened echo stream");

        Ok(Box::new(IcmpEcho {
            pinger,
            seq_base: ident.0,
        }))
    }
}

fn socket_error(e: io::Error) -> TalosmonError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => TalosmonError::PermissionDenied(format!(
            "cannot open ICMP socket ({}); grant CAP_NET_RAW or widen net.ipv4.ping_group_range",
            e
        )),
        _ => TalosmonError::IoError(e),
    }
}

/// Sequence number put on the wire for the `seq`-th request of a stream.
fn wire_sequence(seq_base: u16, seq: u16) -> PingSequence {
    PingSequence(seq_base.wrapping_add(seq))
}

struct IcmpEcho {
    pinger: Pinger,
    seq_base: u16,
}

#[async_trait]
impl Echo for IcmpEcho {
    async fn echo(&mut self, seq: u16) -> Result<Duration> {
        self.pinger
            .ping(wire_sequence(self.seq_base, seq), &PAYLOAD)
            .await
            .map(|(_, rtt)| rtt)
            .map_err(|e| TalosmonError::TransientIcmp(e.to_string()))
    }
}
