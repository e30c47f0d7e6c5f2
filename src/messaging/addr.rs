use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};

use anyhow::anyhow;
use bytes::{Buf, BufMut};

const DISCRIMINATOR_V4: u8 = 4;
const DISCRIMINATOR_V6: u8 = 6;

/// Writes a socket address as a family discriminator followed by IP and port, all in network
///  byte order. IPv6 flow info and scope id are not transmitted.
pub fn ser_socket_addr(addr: &SocketAddr, buf: &mut impl BufMut) {
    match addr {
        SocketAddr::V4(data) => {
            buf.put_u8(DISCRIMINATOR_V4);
            buf.put_u32(data.ip().to_bits());
            buf.put_u16(data.port());
        }
        SocketAddr::V6(data) => {
            buf.put_u8(DISCRIMINATOR_V6);
            buf.put_u128(data.ip().to_bits());
            buf.put_u16(data.port());
        }
    }
}

pub fn try_deser_socket_addr(buf: &mut impl Buf) -> anyhow::Result<SocketAddr> {
    let addr = match buf.try_get_u8()? {
        DISCRIMINATOR_V4 => {
            let ip = buf.try_get_u32()?;
            let port = buf.try_get_u16()?;
            SocketAddr::V4(SocketAddrV4::new(ip.into(), port))
        }
        DISCRIMINATOR_V6 => {
            let ip = buf.try_get_u128()?;
            let port = buf.try_get_u16()?;
            SocketAddr::V6(SocketAddrV6::new(ip.into(), port, 0, 0))
        }
        n => {
            return Err(anyhow!("invalid socket address discriminator: {}", n));
        }
    };
    Ok(addr)
}

pub fn serialized_len(addr: &SocketAddr) -> usize {
    match addr {
        SocketAddr::V4(_) => 1 + 4 + 2,
        SocketAddr::V6(_) => 1 + 16 + 2,
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use bytes::BytesMut;
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::v4("10.0.0.1:9", b"\x04\x0a\0\0\x01\0\x09")]
    #[case::v4_high_port("127.0.0.1:16385", b"\x04\x7f\0\0\x01\x40\x01")]
    #[case::v6("[::1]:258", b"\x06\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\x01\x01\x02")]
    fn test_ser(#[case] addr: &str, #[case] expected: &[u8]) {
        let addr = SocketAddr::from_str(addr).unwrap();
        let mut buf = BytesMut::new();
        ser_socket_addr(&addr, &mut buf);
        assert_eq!(&buf, expected);
        assert_eq!(buf.len(), serialized_len(&addr));

        let mut parse_buf: &[u8] = &buf;
        assert_eq!(try_deser_socket_addr(&mut parse_buf).unwrap(), addr);
        assert!(parse_buf.is_empty());
    }

    #[rstest]
    #[case::empty(b"")]
    #[case::bad_discriminator(b"\x05\x0a\0\0\x01\0\x09")]
    #[case::truncated_ip(b"\x04\x0a\0")]
    #[case::truncated_port(b"\x04\x0a\0\0\x01\0")]
    #[case::truncated_v6(b"\x06\0\0\0\0\0\0\0\0")]
    fn test_deser_invalid(#[case] mut buf: &[u8]) {
        assert!(try_deser_socket_addr(&mut buf).is_err());
    }
}
