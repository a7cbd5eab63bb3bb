use log::debug;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::thread;

/// Copies `input` into `stream` and `stream` into `output` until both
/// directions reach EOF. The write half of `stream` is shut down once `input`
/// is exhausted. Returns the bytes sent and received.
pub fn relay<R, W>(stream: TcpStream, mut input: R, mut output: W) -> io::Result<(u64, u64)>
where
    R: Read + Send + 'static,
    W: Write,
{
    let mut upstream = stream.try_clone()?;
    let sender = thread::spawn(move || -> io::Result<u64> {
        let sent = io::copy(&mut input, &mut upstream)?;
        upstream.shutdown(Shutdown::Write)?;
        Ok(sent)
    });

    let mut downstream = stream;
    let received = io::copy(&mut downstream, &mut output)?;
    output.flush()?;
    debug!("Relay received {} bytes", received);

    let sent = sender
        .join()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "relay thread panicked"))??;
    debug!("Relay sent {} bytes", sent);
    Ok((sent, received))
}

/// [`relay`] over the process stdin and stdout.
pub fn relay_stdio(stream: TcpStream) -> io::Result<(u64, u64)> {
    relay(stream, io::stdin(), io::stdout().lock())
}
