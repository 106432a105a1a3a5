use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

#[cfg(unix)]
use std::mem::size_of;
#[cfg(unix)]
use std::os::fd::AsRawFd;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SocketError {
    #[error("System error - {0}")]
    SystemError(#[from] std::io::Error),
    #[error("Address incorrect - {0}")]
    AddressIncorrect(String),
}

#[derive(Debug, Clone, Copy)]
pub enum SocketOptions {
    KeepAlive(bool),
    NoDelay(bool),
    WriteTimeout(Duration),
}

/// Resolves `host:port` and connects to the first address that accepts within `timeout`.
pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, SocketError> {
    let addresses = (host, port)
        .to_socket_addrs()
        .map_err(|error| SocketError::AddressIncorrect(format!("{}:{} ({})", host, port, error)))?;

    let mut last_error = None;
    for address in addresses {
        match TcpStream::connect_timeout(&address, timeout) {
            Ok(stream) => return Ok(stream),
            Err(error) => last_error = Some(error),
        }
    }

    match last_error {
        Some(error) => Err(SocketError::SystemError(error)),
        None => Err(SocketError::AddressIncorrect(format!("{}:{} resolved to nothing", host, port))),
    }
}

#[cfg(unix)]
pub fn set_option(stream: &TcpStream, option: SocketOptions) -> Result<(), SocketError> {
    match option {
        SocketOptions::NoDelay(value) => stream.set_nodelay(value)?,
        SocketOptions::WriteTimeout(timeout) => stream.set_write_timeout(Some(timeout.max(Duration::from_millis(1))))?,
        SocketOptions::KeepAlive(value) => {
            let value: libc::c_int = value as libc::c_int;
            let error = unsafe {
                libc::setsockopt(
                    stream.as_raw_fd(),
                    libc::SOL_SOCKET,
                    libc::SO_KEEPALIVE,
                    &value as *const libc::c_int as *const libc::c_void,
                    size_of::<libc::c_int>() as libc::socklen_t,
                )
            };

            if error != 0 {
                return Err(SocketError::SystemError(std::io::Error::last_os_error()));
            }
        },
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn set_option(stream: &TcpStream, option: SocketOptions) -> Result<(), SocketError> {
    match option {
        SocketOptions::NoDelay(value) => stream.set_nodelay(value)?,
        SocketOptions::WriteTimeout(timeout) => stream.set_write_timeout(Some(timeout.max(Duration::from_millis(1))))?,
        SocketOptions::KeepAlive(_) => (),
    }

    Ok(())
}
