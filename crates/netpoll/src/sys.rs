//! Thin libc wrappers for descriptors and sockets.
//!
//! Everything here returns `nix::errno::Errno` (or `NetError::Os`) instead of
//! raw negative values, so callers can match on `EAGAIN`/`EINTR` directly.

use netpoll_core::error::{NetError, NetResult};

use nix::errno::Errno;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

/// Non-blocking `read(2)`. `Ok(0)` means the peer shut down its side.
#[inline]
pub fn read(fd: RawFd, buf: &mut [u8]) -> Result<usize, Errno> {
    let ret = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    Errno::result(ret).map(|n| n as usize)
}

/// Non-blocking write; may accept fewer bytes than offered.
///
/// Sockets go through `send(MSG_NOSIGNAL)` so a vanished peer yields `EPIPE`
/// instead of `SIGPIPE`; other descriptors fall back to `write(2)`.
#[inline]
pub fn write(fd: RawFd, buf: &[u8]) -> Result<usize, Errno> {
    let ret = unsafe { libc::send(fd, buf.as_ptr() as *const libc::c_void, buf.len(), libc::MSG_NOSIGNAL) };
    match Errno::result(ret) {
        Err(Errno::ENOTSOCK) => {
            let ret = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
            Errno::result(ret).map(|n| n as usize)
        }
        res => res.map(|n| n as usize),
    }
}

pub fn set_nonblocking(fd: RawFd) -> NetResult<()> {
    let flags = Errno::result(unsafe { libc::fcntl(fd, libc::F_GETFL) }).map_err(os)?;
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    Errno::result(unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) })
        .map(drop)
        .map_err(os)
}

/// Pending socket error (`SO_ERROR`), clearing it. `None` if there is none
/// or `fd` is not a socket.
pub fn socket_error(fd: RawFd) -> Option<i32> {
    let mut err: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if ret == 0 && err != 0 {
        Some(err)
    } else {
        None
    }
}

/// Close-on-exec listening socket with SO_REUSEADDR and SO_REUSEPORT set.
///
/// The listener stays blocking so an accept loop can park in `accept`;
/// `shutdown` releases it.
pub fn listen_tcp(addr: &SocketAddr, backlog: i32) -> NetResult<OwnedFd> {
    let family = match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };
    let raw = Errno::result(unsafe {
        libc::socket(family, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0)
    })
    .map_err(os)?;
    // Safety: socket() just returned this descriptor
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    set_flag(raw, libc::SOL_SOCKET, libc::SO_REUSEADDR)?;
    set_flag(raw, libc::SOL_SOCKET, libc::SO_REUSEPORT)?;

    let (storage, len) = to_sockaddr(addr);
    Errno::result(unsafe { libc::bind(raw, &storage as *const _ as *const libc::sockaddr, len) })
        .map_err(os)?;
    Errno::result(unsafe { libc::listen(raw, backlog) }).map_err(os)?;
    Ok(fd)
}

/// `accept4(2)` returning a non-blocking, close-on-exec descriptor.
pub fn accept(listener: RawFd) -> Result<(OwnedFd, SocketAddr), Errno> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let raw = Errno::result(unsafe {
        libc::accept4(
            listener,
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
            libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
        )
    })?;
    // Safety: accept4() just returned this descriptor
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    let _ = set_flag(raw, libc::IPPROTO_TCP, libc::TCP_NODELAY);
    let peer = from_sockaddr(&storage).unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
    Ok((fd, peer))
}

/// Bound address of a socket (`getsockname`).
pub fn local_addr(fd: RawFd) -> NetResult<SocketAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    Errno::result(unsafe {
        libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
    })
    .map_err(os)?;
    from_sockaddr(&storage).ok_or(NetError::Os(libc::EAFNOSUPPORT))
}

/// Peer address of a connected socket (`getpeername`).
pub fn peer_addr(fd: RawFd) -> Option<SocketAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let ret = unsafe { libc::getpeername(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) };
    if ret != 0 {
        return None;
    }
    from_sockaddr(&storage)
}

/// `shutdown(fd, SHUT_RDWR)`; wakes a thread blocked in `accept` on it.
pub fn shutdown(fd: RawFd) {
    unsafe {
        libc::shutdown(fd, libc::SHUT_RDWR);
    }
}

fn set_flag(fd: RawFd, level: libc::c_int, name: libc::c_int) -> NetResult<()> {
    let opt: libc::c_int = 1;
    Errno::result(unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &opt as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    })
    .map(drop)
    .map_err(os)
}

fn to_sockaddr(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let sin = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in) };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let sin6 = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in6) };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_addr.s6_addr = v6.ip().octets();
            sin6.sin6_flowinfo = v6.flowinfo();
            sin6.sin6_scope_id = v6.scope_id();
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}

fn from_sockaddr(storage: &libc::sockaddr_storage) -> Option<SocketAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
            Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
        }
        libc::AF_INET6 => {
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Some(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

#[inline]
fn os(e: Errno) -> NetError {
    NetError::Os(e as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_read_write_would_block() {
        let (a, mut b) = UnixStream::pair().unwrap();
        set_nonblocking(a.as_raw_fd()).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(read(a.as_raw_fd(), &mut buf), Err(Errno::EAGAIN));

        b.write_all(b"abc").unwrap();
        assert_eq!(read(a.as_raw_fd(), &mut buf), Ok(3));
        assert_eq!(&buf[..3], b"abc");

        assert_eq!(write(a.as_raw_fd(), b"xy"), Ok(2));
        let mut got = [0u8; 2];
        b.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"xy");
    }

    #[test]
    fn test_write_to_closed_peer_is_epipe() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(b);
        assert_eq!(write(a.as_raw_fd(), b"z"), Err(Errno::EPIPE));
    }

    #[test]
    fn test_read_eof_after_peer_close() {
        let (a, b) = UnixStream::pair().unwrap();
        set_nonblocking(a.as_raw_fd()).unwrap();
        drop(b);

        let mut buf = [0u8; 16];
        assert_eq!(read(a.as_raw_fd(), &mut buf), Ok(0));
    }

    #[test]
    fn test_listen_accept_addrs() {
        let listener = listen_tcp(&"127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let bound = local_addr(listener.as_raw_fd()).unwrap();
        assert_eq!(bound.ip().to_string(), "127.0.0.1");
        assert_ne!(bound.port(), 0);

        let client = std::net::TcpStream::connect(bound).unwrap();
        let (fd, peer) = accept(listener.as_raw_fd()).unwrap();
        assert_eq!(peer, client.local_addr().unwrap());
        assert_eq!(peer_addr(fd.as_raw_fd()), Some(peer));
        assert_eq!(socket_error(fd.as_raw_fd()), None);
    }
}
