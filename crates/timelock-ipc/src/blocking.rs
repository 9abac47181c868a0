//! One-shot requests for synchronous callers

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;
use timelock_api::{Command, Request, Response, ResponsePayload, ResponseResult};

use crate::{IpcError, IpcResult};

/// Send a single command over a fresh connection and wait at most `timeout`
/// for each read and write.
///
/// Blocks the calling thread. Meant for trait callbacks that cannot await.
pub fn request_blocking(
    socket_path: impl AsRef<Path>,
    command: Command,
    timeout: Duration,
) -> IpcResult<ResponsePayload> {
    let stream = UnixStream::connect(socket_path)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let request = Request::new(1, command);
    let mut json = serde_json::to_string(&request)?;
    json.push('\n');
    (&stream).write_all(json.as_bytes())?;

    let mut reader = BufReader::new(&stream);
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(IpcError::ConnectionClosed);
        }
        if !line.trim().is_empty() {
            break;
        }
    }

    let response: Response = serde_json::from_str(line.trim())?;
    match response.result {
        ResponseResult::Ok(payload) => Ok(payload),
        ResponseResult::Err(e) => Err(IpcError::Rejected(e)),
    }
}
