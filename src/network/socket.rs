//! Listening socket setup

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};

use crate::error::NetworkError;

const LISTEN_BACKLOG: i32 = 128;

fn resolve(addr: &str) -> Result<SocketAddr, NetworkError> {
    addr.to_socket_addrs()
        .map_err(|e| NetworkError::BindFailed {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?
        .next()
        .ok_or_else(|| NetworkError::BindFailed {
            addr: addr.to_string(),
            reason: "address resolved to nothing".to_string(),
        })
}

/// Bind a TCP listener with `SO_REUSEADDR`, so a restarted server does not
/// trip over sockets lingering in TIME_WAIT.
pub fn bind_listener(addr: &str) -> Result<TcpListener, NetworkError> {
    let sock_addr = resolve(addr)?;
    let bind_failed = |e: std::io::Error| NetworkError::BindFailed {
        addr: addr.to_string(),
        reason: e.to_string(),
    };

    let socket = Socket::new(Domain::for_address(sock_addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_failed)?;
    socket.set_reuse_address(true).map_err(bind_failed)?;
    socket.bind(&sock_addr.into()).map_err(bind_failed)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_failed)?;

    Ok(socket.into())
}
