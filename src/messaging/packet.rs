use std::net::SocketAddr;

use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_32_ISCSI};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::messaging::addr::{serialized_len, ser_socket_addr, try_deser_socket_addr};

const CHECKSUM: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Largest datagram we are prepared to receive
pub const MAX_PACKET_SIZE: usize = 64*1024;

/// Largest UDP payload that fits into a single IPv4 datagram
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Header size with both addresses in IPv6 form
pub const MAX_HEADER_SIZE: usize = 4 + 1 + 1 + 4 + 19 + 19;

/// Largest body that a data packet can carry regardless of address families
pub const MAX_BODY_SIZE: usize = MAX_DATAGRAM_SIZE - MAX_HEADER_SIZE;

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum PacketKind {
    Data = 1,
    Ack = 2,
}

/// The header carried by every packet.
///
/// `origin` is the node that created the packet, `destination` is the node it is ultimately
///  meant for. Relays never modify either field, so the pair survives the detour through a relay
///  unchanged, and (sequence, origin) identifies a request network-wide.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RonHeader {
    pub sequence: u32,
    pub kind: PacketKind,
    pub origin: SocketAddr,
    pub destination: SocketAddr,
}

/// Wire layout, all numbers in network byte order (BE):
///
/// ```ascii
///  0: CRC-32 checksum (u32) of the rest of the packet, starting after this field
///  4: protocol version (u8)
///  5: packet kind (u8): 1 = data, 2 = ack
///  6: sequence number (u32)
/// 10: origin address: family (u8, 4 or 6), IP (u32 / u128), port (u16)
///  *: destination address, same encoding
///  *: body - data packets only, ack packets end after the header
/// ```
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RonPacket {
    pub header: RonHeader,
    pub body: Bytes,
}

impl RonPacket {
    pub const PROTOCOL_VERSION_1: u8 = 1;

    pub fn data(sequence: u32, origin: SocketAddr, destination: SocketAddr, body: Bytes) -> RonPacket {
        RonPacket {
            header: RonHeader {
                sequence,
                kind: PacketKind::Data,
                origin,
                destination,
            },
            body,
        }
    }

    pub fn ack(sequence: u32, origin: SocketAddr, destination: SocketAddr) -> RonPacket {
        RonPacket {
            header: RonHeader {
                sequence,
                kind: PacketKind::Ack,
                origin,
                destination,
            },
            body: Bytes::new(),
        }
    }

    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }

    pub fn kind(&self) -> PacketKind {
        self.header.kind
    }

    pub fn serialized_len(&self) -> usize {
        4 + 1 + 1 + 4
            + serialized_len(&self.header.origin)
            + serialized_len(&self.header.destination)
            + self.body.len()
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        let start = buf.len();

        buf.put_u32(0); // placeholder, patched below
        buf.put_u8(Self::PROTOCOL_VERSION_1);
        buf.put_u8(self.header.kind.into());
        buf.put_u32(self.header.sequence);
        ser_socket_addr(&self.header.origin, buf);
        ser_socket_addr(&self.header.destination, buf);
        buf.put_slice(&self.body);

        let checksum = CHECKSUM.checksum(&buf[start+4..]);
        buf[start..start+4].copy_from_slice(&checksum.to_be_bytes());
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.serialized_len());
        self.ser(&mut buf);
        buf.freeze()
    }

    pub fn try_deser(buf: &[u8]) -> anyhow::Result<RonPacket> {
        let mut parse_buf = buf;

        let checksum = parse_buf.try_get_u32()?;
        let actual_checksum = CHECKSUM.checksum(parse_buf);
        if checksum != actual_checksum {
            bail!("checksum mismatch: packet says {:08x}, content has {:08x}", checksum, actual_checksum);
        }

        let protocol_version = parse_buf.try_get_u8()?;
        if protocol_version != Self::PROTOCOL_VERSION_1 {
            bail!("unsupported protocol version {}", protocol_version);
        }

        let kind = PacketKind::try_from_primitive(parse_buf.try_get_u8()?)?;
        let sequence = parse_buf.try_get_u32()?;
        let origin = try_deser_socket_addr(&mut parse_buf)?;
        let destination = try_deser_socket_addr(&mut parse_buf)?;

        if kind == PacketKind::Ack && !parse_buf.is_empty() {
            bail!("ack packet with {} bytes of trailing data", parse_buf.len());
        }

        Ok(RonPacket {
            header: RonHeader {
                sequence,
                kind,
                origin,
                destination,
            },
            body: Bytes::copy_from_slice(parse_buf),
        })
    }
}
