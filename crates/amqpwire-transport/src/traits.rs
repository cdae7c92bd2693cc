use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use tracing::debug;

use crate::error::Result;

/// An owned, type-erased transport.
pub type BoxedTransport = Box<dyn Transport>;

/// A connected duplex byte stream one connection runs over.
///
/// Implemented for `TcpStream` and (on Unix) `UnixStream`. TLS or other wrapped
/// streams implement it by sharing their session between the handles returned
/// from [`Transport::try_clone_transport`].
pub trait Transport: Read + Write + Send + 'static {
    /// Create a second handle to the same underlying stream.
    fn try_clone_transport(&self) -> Result<BoxedTransport>;

    /// Shut down both directions, unblocking any thread parked in `read`.
    fn shutdown(&self) -> Result<()>;

    /// Set read timeout on the underlying stream.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()>;

    /// Set write timeout on the underlying stream.
    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()>;

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn try_clone_transport(&self) -> Result<BoxedTransport> {
        (**self).try_clone_transport()
    }

    fn shutdown(&self) -> Result<()> {
        (**self).shutdown()
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        (**self).set_read_timeout(timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        (**self).set_write_timeout(timeout)
    }

    fn transport_name(&self) -> &'static str {
        (**self).transport_name()
    }
}

impl Transport for TcpStream {
    fn try_clone_transport(&self) -> Result<BoxedTransport> {
        Ok(Box::new(self.try_clone()?))
    }

    fn shutdown(&self) -> Result<()> {
        match TcpStream::shutdown(self, Shutdown::Both) {
            Ok(()) => Ok(()),
            // Already torn down by the peer.
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => {
                debug!("tcp transport already disconnected");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        TcpStream::set_read_timeout(self, timeout).map_err(Into::into)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        TcpStream::set_write_timeout(self, timeout).map_err(Into::into)
    }

    fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

#[cfg(unix)]
impl Transport for std::os::unix::net::UnixStream {
    fn try_clone_transport(&self) -> Result<BoxedTransport> {
        Ok(Box::new(self.try_clone()?))
    }

    fn shutdown(&self) -> Result<()> {
        match std::os::unix::net::UnixStream::shutdown(self, Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => {
                debug!("unix transport already disconnected");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        std::os::unix::net::UnixStream::set_read_timeout(self, timeout).map_err(Into::into)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        std::os::unix::net::UnixStream::set_write_timeout(self, timeout).map_err(Into::into)
    }

    fn transport_name(&self) -> &'static str {
        "unix"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    #[test]
    #[cfg(unix)]
    fn clone_shares_the_stream() {
        let (left, mut right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer: BoxedTransport = Box::new(left);
        let mut reader = writer.try_clone_transport().unwrap();

        writer.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        right.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        right.write_all(b"pong").unwrap();
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[test]
    #[cfg(unix)]
    fn shutdown_unblocks_reader() {
        let (left, _right) = std::os::unix::net::UnixStream::pair().unwrap();
        let transport: BoxedTransport = Box::new(left);
        let mut reader = transport.try_clone_transport().unwrap();

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 1];
            reader.read(&mut buf)
        });

        std::thread::sleep(Duration::from_millis(20));
        transport.shutdown().unwrap();

        let read = handle.join().unwrap().unwrap();
        assert_eq!(read, 0, "shut down stream reads as EOF");
    }

    #[test]
    fn tcp_transport_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).unwrap();
            buf
        });

        let mut client: BoxedTransport = Box::new(TcpStream::connect(addr).unwrap());
        assert_eq!(client.transport_name(), "tcp");
        client.set_write_timeout(Some(Duration::from_secs(1))).unwrap();
        client.write_all(b"hello").unwrap();

        assert_eq!(&server.join().unwrap(), b"hello");
        client.shutdown().unwrap();
    }

    #[test]
    #[cfg(unix)]
    fn read_timeout_applies() {
        let (left, _right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut transport: BoxedTransport = Box::new(left);
        transport
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();

        let mut buf = [0u8; 1];
        let err = transport.read(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        ));
    }
}
