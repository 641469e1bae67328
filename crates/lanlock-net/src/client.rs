//! Client side of the lanlockd protocol
//!
//! Used by exam clients and by the integration tests. Responses and pushed
//! events share one connection, so the client sorts incoming lines into the
//! two streams as it reads.

use lanlock_api::{Command, Event, Request, Response};
use std::collections::VecDeque;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::{NetError, NetResult};

/// Client for connecting to lanlockd
pub struct NetClient {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
    next_request_id: u64,
    pending_events: VecDeque<Event>,
}

impl NetClient {
    /// Connect to lanlockd
    pub async fn connect(addr: SocketAddr) -> NetResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_request_id: 1,
            pending_events: VecDeque::new(),
        })
    }

    /// Send a command and wait for its response. Events arriving in between
    /// are queued for `next_event`.
    pub async fn send(&mut self, command: Command) -> NetResult<Response> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let request = Request::new(request_id, command);
        let mut json = serde_json::to_string(&request)?;
        json.push('\n');
        self.writer.write_all(json.as_bytes()).await?;

        loop {
            let line = self.read_line().await?;
            if let Ok(response) = serde_json::from_str::<Response>(&line) {
                if response.request_id == request_id {
                    return Ok(response);
                }
                // A stale response; nothing useful to do with it
                continue;
            }
            if let Ok(event) = serde_json::from_str::<Event>(&line) {
                self.pending_events.push_back(event);
                continue;
            }
            return Err(NetError::InvalidMessage(line));
        }
    }

    /// Wait for the next pushed event
    pub async fn next_event(&mut self) -> NetResult<Event> {
        if let Some(event) = self.pending_events.pop_front() {
            return Ok(event);
        }

        loop {
            let line = self.read_line().await?;
            if let Ok(event) = serde_json::from_str::<Event>(&line) {
                return Ok(event);
            }
            if serde_json::from_str::<Response>(&line).is_ok() {
                // Response to a request nobody is waiting on
                continue;
            }
            return Err(NetError::InvalidMessage(line));
        }
    }

    async fn read_line(&mut self) -> NetResult<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(NetError::ConnectionClosed);
        }
        Ok(line.trim().to_string())
    }
}
