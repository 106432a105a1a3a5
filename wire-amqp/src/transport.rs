use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use wire_library::pipe::{PipeCloser, PipeReader, PipeStream, PipeWriter};

/// Receiving half of a byte stream.
pub trait TransportReader: Send {
    /// Reads at least one byte. `Ok(0)` is end of stream; a timeout is reported
    /// as `ErrorKind::TimedOut` or `ErrorKind::WouldBlock`.
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<usize>;
}

/// Sending half of a byte stream.
pub trait TransportWriter: Send {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Closes both directions; a reader blocked in `read` must return.
    fn shutdown(&mut self);
}

/// An established byte stream the connection can run the protocol over.
pub trait Transport: Send {
    fn split(self: Box<Self>) -> io::Result<(Box<dyn TransportReader>, Box<dyn TransportWriter>)>;
}

pub fn is_timeout(error: &io::Error) -> bool {
    matches!(error.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

struct TcpReader {
    stream: TcpStream,
}

struct TcpWriter {
    stream: TcpStream,
}

impl TransportReader for TcpReader {
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<usize> {
        // a zero timeout is rejected by the socket layer
        self.stream.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        loop {
            match self.stream.read(buffer) {
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                result => return result,
            }
        }
    }
}

impl TransportWriter for TcpWriter {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        Write::write_all(&mut self.stream, data)?;
        self.stream.flush()
    }

    fn shutdown(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl Transport for TcpStream {
    fn split(self: Box<Self>) -> io::Result<(Box<dyn TransportReader>, Box<dyn TransportWriter>)> {
        let reader = self.try_clone()?;
        Ok((Box::new(TcpReader { stream: reader }), Box::new(TcpWriter { stream: *self })))
    }
}

struct PipeTransportReader {
    reader: PipeReader,
}

struct PipeTransportWriter {
    writer: PipeWriter,
    inbound: PipeCloser,
}

impl TransportReader for PipeTransportReader {
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.reader.read(buffer, Some(timeout))
    }
}

impl TransportWriter for PipeTransportWriter {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write(data)
    }

    fn shutdown(&mut self) {
        self.writer.close();
        self.inbound.close();
    }
}

impl Transport for PipeStream {
    fn split(self: Box<Self>) -> io::Result<(Box<dyn TransportReader>, Box<dyn TransportWriter>)> {
        let PipeStream { reader, writer } = *self;
        let inbound = reader.closer();

        Ok((Box::new(PipeTransportReader { reader }), Box::new(PipeTransportWriter { writer, inbound })))
    }
}
