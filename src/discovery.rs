//! Public-address discovery over the raw-datagram side channel.
//!
//! A minimal RFC 8489 binding exchange: the socket sends a binding
//! request to a discovery server and reads its own public address out of
//! the MAPPED-ADDRESS attribute of the response. Discovery traffic
//! carries no LANES magic, so the exchange rides the
//! [`on_unmatched`](crate::LanesSocket::on_unmatched) hook; the handler
//! is uninstalled again on every exit path.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::RngCore;
use rand::rngs::OsRng;
use tokio::sync::oneshot;

use crate::core::{DiscoveryError, LanesResult};
use crate::transport::socket::LanesSocket;

/// Binding request method (RFC 8489 methods registry).
const BINDING_REQUEST: u16 = 0x0001;

/// MAPPED-ADDRESS attribute (RFC 8489 attributes registry).
const ATTR_MAPPED_ADDRESS: u16 = 0x0001;

/// IPv4 address family inside an address attribute.
const FAMILY_IPV4: u8 = 0x01;

/// Message header: method, length, 16 bytes of transaction id.
const HEADER_SIZE: usize = 2 + 2 + 16;

/// Attribute header: type, length.
const ATTR_HEADER_SIZE: usize = 4;

/// Ask `server` for this socket's public address.
///
/// The request is retransmitted on the standard retry schedule; no
/// response within the budget is an
/// [`AckTimeout`](crate::LanesError::AckTimeout). Responses are matched
/// by server address and transaction id; everything else on the side
/// channel is ignored.
pub async fn public_address(socket: &LanesSocket, server: SocketAddr) -> LanesResult<SocketAddr> {
    let mut transaction = [0u8; 16];
    OsRng.fill_bytes(&mut transaction);

    let (tx, rx) = oneshot::channel::<Vec<u8>>();
    let slot = Arc::new(Mutex::new(Some(tx)));
    {
        let slot = slot.clone();
        socket.on_unmatched(move |data, from| {
            if from != server || data.len() < HEADER_SIZE || data[4..HEADER_SIZE] != transaction {
                return;
            }
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(data.to_vec());
            }
        });
    }

    let mut request = [0u8; HEADER_SIZE];
    request[0..2].copy_from_slice(&BINDING_REQUEST.to_be_bytes());
    request[4..HEADER_SIZE].copy_from_slice(&transaction);

    let result = socket.send_raw_with_retry(&request, server, rx).await;
    socket.clear_on_unmatched();

    let response = result?;
    Ok(parse_mapped_address(&response)?)
}

/// Walk the response's attributes for a MAPPED-ADDRESS.
fn parse_mapped_address(response: &[u8]) -> Result<SocketAddr, DiscoveryError> {
    if response.len() < HEADER_SIZE {
        return Err(DiscoveryError::MalformedResponse);
    }

    let message_len = u16::from_be_bytes([response[2], response[3]]) as usize;
    let attributes = response
        .get(HEADER_SIZE..HEADER_SIZE + message_len)
        .ok_or(DiscoveryError::MalformedResponse)?;

    let mut pos = 0;
    while pos + ATTR_HEADER_SIZE <= attributes.len() {
        let attr_type = u16::from_be_bytes([attributes[pos], attributes[pos + 1]]);
        let attr_len = u16::from_be_bytes([attributes[pos + 2], attributes[pos + 3]]) as usize;
        let value = attributes
            .get(pos + ATTR_HEADER_SIZE..pos + ATTR_HEADER_SIZE + attr_len)
            .ok_or(DiscoveryError::MalformedResponse)?;

        if attr_type == ATTR_MAPPED_ADDRESS {
            return parse_address_value(value);
        }

        pos += ATTR_HEADER_SIZE + attr_len;
    }

    Err(DiscoveryError::NoMappedAddress)
}

/// Address attribute value: reserved byte, family, port, address bytes.
fn parse_address_value(value: &[u8]) -> Result<SocketAddr, DiscoveryError> {
    if value.len() < 4 {
        return Err(DiscoveryError::MalformedResponse);
    }

    let family = value[1];
    let port = u16::from_be_bytes([value[2], value[3]]);
    let ip = if family == FAMILY_IPV4 {
        let octets: [u8; 4] = value
            .get(4..8)
            .and_then(|b| b.try_into().ok())
            .ok_or(DiscoveryError::MalformedResponse)?;
        IpAddr::V4(Ipv4Addr::from(octets))
    } else {
        let octets: [u8; 16] = value
            .get(4..20)
            .and_then(|b| b.try_into().ok())
            .ok_or(DiscoveryError::MalformedResponse)?;
        IpAddr::V6(Ipv6Addr::from(octets))
    };

    Ok(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::wire::SocketId;
    use tokio::net::UdpSocket;

    fn response(transaction: &[u8; 16], attributes: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&0x0101u16.to_be_bytes());
        data.extend_from_slice(&(attributes.len() as u16).to_be_bytes());
        data.extend_from_slice(transaction);
        data.extend_from_slice(attributes);
        data
    }

    fn mapped_v4(ip: [u8; 4], port: u16) -> Vec<u8> {
        let mut attr = Vec::new();
        attr.extend_from_slice(&ATTR_MAPPED_ADDRESS.to_be_bytes());
        attr.extend_from_slice(&8u16.to_be_bytes());
        attr.push(0);
        attr.push(FAMILY_IPV4);
        attr.extend_from_slice(&port.to_be_bytes());
        attr.extend_from_slice(&ip);
        attr
    }

    #[test]
    fn test_parse_mapped_address_v4() {
        let txn = [7u8; 16];
        let data = response(&txn, &mapped_v4([203, 0, 113, 9], 54321));
        assert_eq!(
            parse_mapped_address(&data).unwrap(),
            "203.0.113.9:54321".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_parse_skips_foreign_attributes() {
        let txn = [7u8; 16];
        // An unknown attribute precedes the mapped address.
        let mut attrs = Vec::new();
        attrs.extend_from_slice(&0x8022u16.to_be_bytes());
        attrs.extend_from_slice(&4u16.to_be_bytes());
        attrs.extend_from_slice(b"test");
        attrs.extend_from_slice(&mapped_v4([198, 51, 100, 1], 7));

        let data = response(&txn, &attrs);
        assert_eq!(
            parse_mapped_address(&data).unwrap(),
            "198.51.100.1:7".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_parse_without_mapped_address() {
        let data = response(&[0u8; 16], &[]);
        assert_eq!(
            parse_mapped_address(&data),
            Err(DiscoveryError::NoMappedAddress)
        );
    }

    #[test]
    fn test_parse_truncated_response() {
        assert_eq!(
            parse_mapped_address(&[0u8; 4]),
            Err(DiscoveryError::MalformedResponse)
        );

        // Length field claims more attribute bytes than exist.
        let mut data = response(&[0u8; 16], &[]);
        data[3] = 32;
        assert_eq!(
            parse_mapped_address(&data),
            Err(DiscoveryError::MalformedResponse)
        );
    }

    #[tokio::test]
    async fn test_discovery_round_trip() {
        let socket = LanesSocket::new(0x4C414E53, SocketId::generate());
        socket.start("127.0.0.1:0".parse().unwrap()).await.unwrap();

        // A discovery server that echoes a fixed mapped address back.
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, from) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(len, HEADER_SIZE);
            assert_eq!(u16::from_be_bytes([buf[0], buf[1]]), BINDING_REQUEST);

            let mut txn = [0u8; 16];
            txn.copy_from_slice(&buf[4..HEADER_SIZE]);
            let reply = response(&txn, &mapped_v4([192, 0, 2, 44], 40000));
            server.send_to(&reply, from).await.unwrap();
        });

        let public = public_address(&socket, server_addr).await.unwrap();
        assert_eq!(public, "192.0.2.44:40000".parse::<SocketAddr>().unwrap());

        // The side-channel handler must not leak past the exchange.
        assert!(!socket.shared().has_unmatched_handler());
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_ignores_wrong_transaction() {
        let socket = LanesSocket::new(0x4C414E53, SocketId::generate());
        socket.start("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            loop {
                let (_, from) = server.recv_from(&mut buf).await.unwrap();
                // Reply with a transaction id that never matches.
                let reply = response(&[0xEE; 16], &mapped_v4([192, 0, 2, 1], 1));
                server.send_to(&reply, from).await.unwrap();
            }
        });

        let result = public_address(&socket, server_addr).await;
        assert!(matches!(result, Err(crate::LanesError::AckTimeout)));
        assert!(!socket.shared().has_unmatched_handler());
    }
}
