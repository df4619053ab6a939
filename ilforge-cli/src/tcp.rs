//! A board reachable over TCP, e.g. through a serial-to-network bridge.
//!
//! Every packet travels as a Firmata sysex message: `0xF0`, the packet, `0xF7`. Packets are
//! 7-bit clean apart from the static bit of class member kinds, which never reaches the markers.
//! A receiver thread splits the incoming stream into messages. Task and debugger callbacks go
//! to the session's reply handler; everything else answers the command in flight.

use std::{
    io::{Read, Write},
    net::TcpStream,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use anyhow::Context;
use ilforge::{
    protocol::{ExecutorCommand, Reply, ReplyHandler, Transport},
    Error, Result,
};

const START_SYSEX: u8 = 0xF0;
const END_SYSEX: u8 = 0xF7;

pub struct TcpTransport {
    writer: Mutex<TcpStream>,
    replies: Mutex<Receiver<Vec<u8>>>,
    handler: Arc<Mutex<Option<ReplyHandler>>>,
    // the hardware description looks like a task callback and must reach the waiter
    awaiting_hardware: Arc<AtomicBool>,
}

impl TcpTransport {
    pub fn connect(host: &str) -> anyhow::Result<Self> {
        let stream =
            TcpStream::connect(host).with_context(|| format!("failed to connect to {host}"))?;
        stream.set_nodelay(true)?;
        let incoming = stream.try_clone()?;
        log::info!("Connected to {host}");

        let (sender, replies) = mpsc::channel();
        let handler: Arc<Mutex<Option<ReplyHandler>>> = Arc::new(Mutex::new(None));
        let awaiting_hardware = Arc::new(AtomicBool::new(false));
        let reader = Reader {
            sender,
            handler: Arc::clone(&handler),
            awaiting_hardware: Arc::clone(&awaiting_hardware),
        };
        thread::Builder::new()
            .name("ilforge-receiver".to_string())
            .spawn(move || reader.run(incoming))?;

        Ok(TcpTransport {
            writer: Mutex::new(stream),
            replies: Mutex::new(replies),
            handler,
            awaiting_hardware,
        })
    }
}

impl Transport for TcpTransport {
    fn send_and_wait(&self, packet: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        let mut writer = self.writer.lock().map_err(|_| Error::LockError)?;
        let replies = self.replies.lock().map_err(|_| Error::LockError)?;
        // answers to commands that already timed out
        while replies.try_recv().is_ok() {}

        let hardware = packet.get(1) == Some(&ExecutorCommand::QueryHardware.value());
        self.awaiting_hardware.store(hardware, Ordering::SeqCst);

        let mut framed = Vec::with_capacity(packet.len() + 2);
        framed.push(START_SYSEX);
        framed.extend_from_slice(packet);
        framed.push(END_SYSEX);
        writer.write_all(&framed)?;
        writer.flush()?;

        let reply = replies.recv_timeout(timeout);
        self.awaiting_hardware.store(false, Ordering::SeqCst);
        match reply {
            Ok(reply) => Ok(reply),
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout(format!(
                "No reply to {} within {timeout:?}",
                command_label(packet)
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::Transport("Connection closed by the board".to_string()))
            }
        }
    }

    fn set_reply_handler(&self, handler: ReplyHandler) {
        if let Ok(mut slot) = self.handler.lock() {
            *slot = Some(handler);
        }
    }
}

fn command_label(packet: &[u8]) -> String {
    packet
        .get(1)
        .and_then(|c| ExecutorCommand::from_value(*c))
        .map_or_else(|| "unknown command".to_string(), |c| c.to_string())
}

/// Receiving half of the connection, moved onto its own thread.
struct Reader {
    sender: Sender<Vec<u8>>,
    handler: Arc<Mutex<Option<ReplyHandler>>>,
    awaiting_hardware: Arc<AtomicBool>,
}

impl Reader {
    fn run(self, mut stream: TcpStream) {
        let mut buffer = [0u8; 512];
        let mut message: Option<Vec<u8>> = None;
        loop {
            let read = match stream.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(error) => {
                    log::warn!("Connection lost: {error}");
                    break;
                }
            };
            for byte in &buffer[..read] {
                match (*byte, message.as_mut()) {
                    (START_SYSEX, _) => message = Some(Vec::new()),
                    (END_SYSEX, Some(_)) => {
                        if let Some(complete) = message.take() {
                            self.dispatch(complete);
                        }
                    }
                    (byte, Some(data)) => data.push(byte),
                    // plain Firmata traffic outside of sysex messages
                    (_, None) => {}
                }
            }
        }
        log::debug!("Receiver stopped");
    }

    fn dispatch(&self, message: Vec<u8>) {
        let is_callback = matches!(
            Reply::parse(&message),
            Ok(Reply::Task { .. } | Reply::Debug { .. })
        );
        if is_callback && !self.awaiting_hardware.load(Ordering::SeqCst) {
            let handler = self.handler.lock().ok().and_then(|h| h.clone());
            match handler {
                Some(handler) => handler(&message),
                None => log::debug!("Dropped task callback without a session"),
            }
        } else if self.sender.send(message).is_err() {
            log::debug!("Reply after the transport was closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use ilforge::{
        protocol::{encoder, task_reply, SCHEDULER_DATA},
        runtime::MethodState,
    };

    use super::*;

    /// Accepts one connection, waits for a framed packet and answers with `frames`.
    fn board(frames: Vec<Vec<u8>>) -> anyhow::Result<(String, thread::JoinHandle<Vec<u8>>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let address = listener.local_addr()?.to_string();
        let handle = thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else {
                return Vec::new();
            };
            let mut received = Vec::new();
            let mut byte = [0u8; 1];
            while stream.read_exact(&mut byte).is_ok() {
                received.push(byte[0]);
                if byte[0] == END_SYSEX {
                    break;
                }
            }
            // stray Firmata traffic between messages
            let _ = stream.write_all(&[0x90, 0x01, 0x00]);
            for frame in frames {
                let _ = stream.write_all(&[START_SYSEX]);
                let _ = stream.write_all(&frame);
                let _ = stream.write_all(&[END_SYSEX]);
            }
            let _ = stream.flush();
            thread::sleep(Duration::from_millis(200));
            received
        });
        Ok((address, handle))
    }

    #[test]
    fn replies_and_callbacks_are_separated() -> anyhow::Result<()> {
        let packet = encoder::erase_flash();
        let ack = vec![SCHEDULER_DATA, ExecutorCommand::Ack.value(), packet[1], 0];
        let callback = task_reply(3, MethodState::Stopped, 0, &[]);
        let (address, handle) = board(vec![callback.clone(), ack.clone()])?;

        let transport = TcpTransport::connect(&address)?;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        transport.set_reply_handler(Arc::new(move |data: &[u8]| {
            if let Ok(mut seen) = sink.lock() {
                seen.push(data.to_vec());
            }
        }));

        let reply = transport.send_and_wait(&packet, Duration::from_secs(5))?;
        assert_eq!(reply, ack);
        // the callback precedes the ack on the wire
        assert_eq!(*seen.lock().map_err(|_| Error::LockError)?, vec![callback]);

        let received = handle.join().map_err(|_| anyhow::anyhow!("board panicked"))?;
        let mut framed = vec![START_SYSEX];
        framed.extend_from_slice(&packet);
        framed.push(END_SYSEX);
        assert_eq!(received, framed);
        Ok(())
    }

    #[test]
    fn static_member_kinds_pass_the_framing() -> anyhow::Result<()> {
        let packet = vec![
            SCHEDULER_DATA,
            ExecutorCommand::ClassDeclarationEnd.value(),
            0x10,
            0x02 | 0x80,
            0x01,
        ];
        let ack = vec![SCHEDULER_DATA, ExecutorCommand::Ack.value(), packet[1], 0];
        let (address, handle) = board(vec![ack.clone()])?;

        let transport = TcpTransport::connect(&address)?;
        assert_eq!(transport.send_and_wait(&packet, Duration::from_secs(5))?, ack);

        let received = handle.join().map_err(|_| anyhow::anyhow!("board panicked"))?;
        assert_eq!(received[1..received.len() - 1], packet[..]);
        assert_eq!(received[4], 0x82);
        Ok(())
    }

    #[test]
    fn silent_boards_time_out() -> anyhow::Result<()> {
        let (address, _handle) = board(Vec::new())?;
        let transport = TcpTransport::connect(&address)?;

        let result = transport.send_and_wait(&encoder::reset_executor(true), Duration::from_millis(50));
        match result {
            Err(Error::Timeout(message)) => assert!(message.contains("ResetExecutor")),
            other => panic!("expected a timeout, got {other:?}"),
        }
        Ok(())
    }
}
