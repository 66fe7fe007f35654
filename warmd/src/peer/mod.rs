//! Peer tool server
//!
//! - `message`: JSON-RPC framing on the peer's stdio
//! - `channel`: owns the child process and correlates replies to requests
//! - `invoker`: one-at-a-time `tools/call` on top of the channel

mod channel;
mod invoker;
pub mod message;

pub use channel::PeerChannel;
pub use invoker::{ToolCaller, ToolInvoker};

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use serde_json::Value;
    use tokio::io::{
        AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
    };

    use super::PeerChannel;

    /// The far end of an in-memory peer channel
    pub struct FakePeer {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakePeer {
        /// Next message written by the channel
        pub async fn recv(&mut self) -> Value {
            let line = self
                .lines
                .next_line()
                .await
                .expect("read from channel")
                .expect("channel closed its input");
            serde_json::from_str(&line).expect("channel wrote invalid JSON")
        }

        /// Next message, or None if nothing arrives within `wait`
        pub async fn try_recv(&mut self, wait: Duration) -> Option<Value> {
            tokio::time::timeout(wait, self.recv()).await.ok()
        }

        pub async fn send(&mut self, msg: &Value) {
            let mut line = serde_json::to_string(msg).unwrap();
            line.push('\n');
            self.send_raw(&line).await;
        }

        pub async fn send_raw(&mut self, raw: &str) {
            self.writer.write_all(raw.as_bytes()).await.unwrap();
            self.writer.flush().await.unwrap();
        }
    }

    /// A channel wired to an in-memory fake peer
    pub fn fake_peer(call_timeout: Duration) -> (PeerChannel, FakePeer) {
        let (near, far) = tokio::io::duplex(64 * 1024);
        let (near_read, near_write) = tokio::io::split(near);
        let channel = PeerChannel::from_streams(near_read, near_write, call_timeout);

        let (far_read, far_write) = tokio::io::split(far);
        let peer = FakePeer {
            lines: BufReader::new(far_read).lines(),
            writer: far_write,
        };
        (channel, peer)
    }
}
