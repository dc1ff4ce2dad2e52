// ABOUTME: Session runner — drives one accepted TcpStream's bytes through the Fsm
// ABOUTME: Owns the real socket and real timers; the Fsm it wraps never touches either

use std::io;
use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::time::{sleep, Sleep};
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::fsm::{Fsm, Input, Output, Timer, Timers};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection error: {0}")]
    Io(#[from] io::Error),
}

/// One accepted connection, paired with the state machine driving it.
///
/// Mirrors the teacher's `Connection` (buffered reader/writer around a
/// `TcpStream`) but adds the timer races a transport FSM needs: the
/// session owns three optional [`tokio::time::Sleep`] futures and
/// arms/disarms them in response to the Fsm's [`Output::Arm`]/[`Output::Cancel`].
pub struct Session {
    stream: BufWriter<TcpStream>,
    read_buf: BytesMut,
    buffer_cap: usize,
    fsm: Fsm,
    peer: std::net::SocketAddr,
    t1: Option<std::pin::Pin<Box<Sleep>>>,
    t2: Option<std::pin::Pin<Box<Sleep>>>,
    t3: Option<std::pin::Pin<Box<Sleep>>>,
}

impl Session {
    pub fn new(
        stream: TcpStream,
        peer: std::net::SocketAddr,
        timers: Timers,
        buffer_cap: usize,
    ) -> Self {
        Session {
            stream: BufWriter::new(stream),
            read_buf: BytesMut::with_capacity(8 * 1024),
            buffer_cap,
            fsm: Fsm::new(timers),
            peer,
            t1: None,
            t2: None,
            t3: None,
        }
    }

    /// Run the session to completion: read bytes, feed the Fsm, write its
    /// outputs back, dispatch completed messages, until the peer closes the
    /// connection or the Fsm emits [`Output::Close`].
    pub async fn run(mut self, dispatcher: &Dispatcher) -> Result<(), SessionError> {
        info!(peer = %self.peer, "session started");
        loop {
            tokio::select! {
                result = self.stream.get_mut().read_buf(&mut self.read_buf) => {
                    let n = result?;
                    if n == 0 {
                        debug!(peer = %self.peer, "peer closed connection");
                        let outputs = self.fsm.handle(Input::PeerClose);
                        self.apply(outputs, dispatcher).await?;
                        break;
                    }
                    if self.read_buf.len() > self.buffer_cap {
                        warn!(peer = %self.peer, cap = self.buffer_cap, "read buffer exceeded cap, aborting session");
                        let outputs = self.fsm.abort_buffer_overflow();
                        self.apply(outputs, dispatcher).await?;
                        break;
                    }
                    let bytes = self.read_buf.split().freeze();
                    let outputs = self.fsm.handle(Input::Bytes(bytes));
                    if self.apply(outputs, dispatcher).await? {
                        break;
                    }
                }
                _ = sleep_or_pending(&mut self.t1) => {
                    let outputs = self.fsm.handle(Input::TimerExpired(Timer::T1));
                    self.t1 = None;
                    if self.apply(outputs, dispatcher).await? {
                        break;
                    }
                }
                _ = sleep_or_pending(&mut self.t2) => {
                    let outputs = self.fsm.handle(Input::TimerExpired(Timer::T2));
                    self.t2 = None;
                    if self.apply(outputs, dispatcher).await? {
                        break;
                    }
                }
                _ = sleep_or_pending(&mut self.t3) => {
                    let outputs = self.fsm.handle(Input::TimerExpired(Timer::T3));
                    self.t3 = None;
                    if self.apply(outputs, dispatcher).await? {
                        break;
                    }
                }
            }
        }
        self.stream.flush().await.ok();
        info!(peer = %self.peer, "session ended");
        Ok(())
    }

    /// Apply one batch of Fsm outputs. Returns `true` if the session should
    /// close after this batch.
    async fn apply(
        &mut self,
        outputs: Vec<Output>,
        dispatcher: &Dispatcher,
    ) -> Result<bool, SessionError> {
        let mut closing = false;
        for output in outputs {
            match output {
                Output::Send(bytes) => {
                    self.stream.write_all(&bytes).await?;
                    self.stream.flush().await?;
                }
                Output::Arm(timer, duration) => self.arm(timer, duration),
                Output::Cancel(timer) => self.cancel(timer),
                Output::Dispatch(message) => {
                    dispatcher.dispatch(message).await;
                }
                Output::ProtocolError(reason) => {
                    warn!(peer = %self.peer, reason = %reason, "protocol violation, aborting session");
                }
                Output::Close => closing = true,
            }
        }
        Ok(closing)
    }

    fn arm(&mut self, timer: Timer, duration: Duration) {
        let slot = match timer {
            Timer::T1 => &mut self.t1,
            Timer::T2 => &mut self.t2,
            Timer::T3 => &mut self.t3,
        };
        *slot = Some(Box::pin(sleep(duration)));
    }

    fn cancel(&mut self, timer: Timer) {
        let slot = match timer {
            Timer::T1 => &mut self.t1,
            Timer::T2 => &mut self.t2,
            Timer::T3 => &mut self.t3,
        };
        *slot = None;
    }
}

/// Await an armed timer, or never resolve if unarmed — lets `select!` treat
/// a `None` timer slot as an inert branch instead of special-casing it.
async fn sleep_or_pending(slot: &mut Option<std::pin::Pin<Box<Sleep>>>) {
    match slot {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
