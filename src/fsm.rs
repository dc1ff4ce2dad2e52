// ABOUTME: ASTM E1381 transport state machine — idle/establishment/transfer/termination phases
// ABOUTME: Pure `handle(Input) -> Vec<Output>`, no I/O; the session runner is a thin adaptor around it

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::codec::{self, CodecError, DecodeOutcome, ACK, EOT, ENQ, NAK};
use crate::message::Message;
use crate::record::{self, Delimiters, Record};

/// Consecutive NAKs on the same frame before the session is aborted.
pub const MAX_CONSECUTIVE_NAKS: u32 = 6;

/// Cap on the in-progress record buffer assembled across ETB-continued
/// frames. Guards against a peer that keeps sending intermediate frames
/// without ever terminating the record.
pub const MAX_RECORD_LEN: usize = 1024 * 1024;

/// The three transport timers from spec.md §4.3, made configurable per
/// SPEC_FULL.md §6 (resolving spec.md's Open Question about their defaults).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timers {
    /// Response timer — awaiting peer reply during establishment, or after
    /// sending a frame in sender mode.
    pub t1: Duration,
    /// Receive timer — maximum idle gap while a message is in progress.
    pub t2: Duration,
    /// Retry backoff — delay before allowing a retransmission slot after a NAK.
    pub t3: Duration,
}

impl Default for Timers {
    fn default() -> Self {
        Timers {
            t1: Duration::from_secs(15),
            t2: Duration::from_secs(30),
            t3: Duration::from_secs(10),
        }
    }
}

/// Which of the three timers an [`Output::Arm`]/[`Output::Cancel`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    T1,
    T2,
    T3,
}

/// The FSM's phases (spec.md §4.3). `EstablishmentPending` is only entered
/// by the sender role (§4.7); the receiver role never produces it from
/// external input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    EstablishmentPending,
    Transfer,
    Termination,
}

/// The FSM's input alphabet, per the Design Notes' explicit re-architecture
/// from a coroutine event loop to an explicit state machine.
#[derive(Debug, Clone)]
pub enum Input {
    Bytes(Bytes),
    TimerExpired(Timer),
    PeerClose,
}

/// The FSM's output alphabet. The session runner interprets these against
/// the real socket and real timers; the FSM itself never touches either.
#[derive(Debug, Clone)]
pub enum Output {
    Send(Bytes),
    Arm(Timer, Duration),
    Cancel(Timer),
    Dispatch(Message),
    /// A protocol violation was detected and the session is being aborted;
    /// carries a human-readable reason for the session runner to log.
    /// Always accompanied by `Send([EOT])` and `Close` in the same batch.
    ProtocolError(String),
    /// Close the connection (sent after an abort's final bytes).
    Close,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FsmError {
    #[error("frame buffer exceeded maximum size without a terminator")]
    BufferOverflow,
}

struct InProgressMessage {
    delimiters: Delimiters,
    records: Vec<Record>,
    raw_lines: Vec<String>,
}

/// The transport state machine. One instance per session; no state is
/// shared across sessions (spec.md §3 invariant).
pub struct Fsm {
    phase: Phase,
    expected_fn: u8,
    nak_count: u32,
    timers: Timers,
    decode_buf: BytesMut,
    record_buf: Vec<u8>,
    in_progress: Option<InProgressMessage>,
    // Sender-mode bookkeeping (§4.7); unused by the receiver role.
    send_fn: u8,
}

impl Fsm {
    pub fn new(timers: Timers) -> Self {
        Fsm {
            phase: Phase::Idle,
            expected_fn: 0,
            nak_count: 0,
            timers,
            decode_buf: BytesMut::new(),
            record_buf: Vec::new(),
            in_progress: None,
            send_fn: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Drive the FSM with one input, producing the outputs it generates.
    pub fn handle(&mut self, input: Input) -> Vec<Output> {
        match input {
            Input::Bytes(bytes) => self.handle_bytes(bytes),
            Input::TimerExpired(timer) => self.handle_timer(timer),
            Input::PeerClose => self.handle_peer_close(),
        }
    }

    fn handle_bytes(&mut self, bytes: Bytes) -> Vec<Output> {
        self.decode_buf.extend_from_slice(&bytes);
        let mut out = Vec::new();
        loop {
            if self.decode_buf.is_empty() {
                break;
            }
            match self.phase {
                Phase::Idle => {
                    if !self.step_idle(&mut out) {
                        break;
                    }
                }
                Phase::EstablishmentPending => {
                    if !self.step_establishment_pending(&mut out) {
                        break;
                    }
                }
                Phase::Transfer | Phase::Termination => {
                    if !self.step_transfer(&mut out) {
                        break;
                    }
                }
            }
        }
        out
    }

    /// Consume and react to exactly one leading byte/frame. Returns `false`
    /// when there isn't enough buffered data to make progress (caller stops
    /// looping until more bytes arrive).
    fn step_idle(&mut self, out: &mut Vec<Output>) -> bool {
        let b = self.decode_buf[0];
        match b {
            ENQ => {
                self.decode_buf.advance_consumed(1);
                self.expected_fn = 0;
                self.nak_count = 0;
                self.phase = Phase::Transfer;
                out.push(Output::Send(Bytes::from_static(&[ACK])));
                out.push(Output::Arm(Timer::T2, self.timers.t2));
            }
            EOT => {
                self.decode_buf.advance_consumed(1);
                // Ignored per spec.md §4.3.
            }
            _ => {
                self.decode_buf.advance_consumed(1);
                out.push(Output::Send(Bytes::from_static(&[NAK])));
            }
        }
        true
    }

    fn step_establishment_pending(&mut self, out: &mut Vec<Output>) -> bool {
        let b = self.decode_buf[0];
        match b {
            ACK => {
                self.decode_buf.advance_consumed(1);
                self.expected_fn = 0;
                self.phase = Phase::Transfer;
                out.push(Output::Cancel(Timer::T1));
                out.push(Output::Arm(Timer::T2, self.timers.t2));
            }
            NAK => {
                self.decode_buf.advance_consumed(1);
                self.phase = Phase::Idle;
                out.push(Output::Cancel(Timer::T1));
            }
            ENQ => {
                // Simultaneous contention: this gateway always yields.
                self.decode_buf.advance_consumed(1);
                self.phase = Phase::Idle;
                out.push(Output::Cancel(Timer::T1));
            }
            _ => {
                self.decode_buf.advance_consumed(1);
            }
        }
        true
    }

    fn step_transfer(&mut self, out: &mut Vec<Output>) -> bool {
        let b = self.decode_buf[0];
        if b == EOT {
            self.decode_buf.advance_consumed(1);
            self.abort_in_progress();
            self.phase = Phase::Idle;
            out.push(Output::Cancel(Timer::T2));
            return true;
        }

        let (outcome, consumed) = codec::decode_frame(&self.decode_buf);
        if consumed == 0 {
            return false; // NeedMore
        }
        self.decode_buf.advance_consumed(consumed);

        match outcome {
            DecodeOutcome::Frame { fn_, data, terminal } => {
                self.handle_frame(fn_, &data, terminal, out);
            }
            DecodeOutcome::NeedMore => unreachable!("consumed > 0 implies not NeedMore"),
            DecodeOutcome::BadChecksum
            | DecodeOutcome::BadFraming
            | DecodeOutcome::BadFrameNumber => {
                self.on_bad_frame(out);
            }
            DecodeOutcome::Unterminated => {
                self.abort_protocol_violation(CodecError::Unterminated, out);
            }
        }
        true
    }

    fn handle_frame(&mut self, fn_: u8, data: &[u8], terminal: bool, out: &mut Vec<Output>) {
        let prev_fn = (self.expected_fn + 7) % 8;

        if fn_ == self.expected_fn {
            if self.record_buf.len() + data.len() > MAX_RECORD_LEN {
                self.abort_protocol_violation(FsmError::BufferOverflow, out);
                return;
            }
            self.nak_count = 0;
            self.record_buf.extend_from_slice(data);
            if terminal {
                self.finish_record(out);
            }
            self.expected_fn = (self.expected_fn + 1) % 8;
            out.push(Output::Send(Bytes::from_static(&[ACK])));
            out.push(Output::Arm(Timer::T2, self.timers.t2));
        } else if fn_ == prev_fn {
            // Peer retransmit of a frame we already ACKed (our ACK was
            // lost): re-ACK without re-appending the data.
            self.nak_count = 0;
            out.push(Output::Send(Bytes::from_static(&[ACK])));
            out.push(Output::Arm(Timer::T2, self.timers.t2));
        } else {
            self.on_bad_frame(out);
        }
    }

    /// Abort the session for a protocol violation detected inside the Fsm
    /// itself (unterminated scan, oversized record buffer). Emits the same
    /// `EOT` + `Close` sequence `on_bad_frame`'s NAK-storm abort does, plus a
    /// `ProtocolError` carrying `error`'s message for the session to log.
    fn abort_protocol_violation(&mut self, error: impl std::fmt::Display, out: &mut Vec<Output>) {
        self.abort_in_progress();
        self.phase = Phase::Idle;
        self.nak_count = 0;
        out.push(Output::ProtocolError(error.to_string()));
        out.push(Output::Send(Bytes::from_static(&[EOT])));
        out.push(Output::Cancel(Timer::T2));
        out.push(Output::Close);
    }

    /// Abort the session due to a protocol violation detected outside the
    /// Fsm (the session runner's own raw read buffer exceeding its cap
    /// before a frame terminator arrived). Produces the same `EOT` + `Close`
    /// abort sequence as a violation the Fsm detects internally, per
    /// SPEC_FULL.md §4.4's "exceeding it is a protocol violation".
    pub fn abort_buffer_overflow(&mut self) -> Vec<Output> {
        let mut out = Vec::new();
        self.abort_protocol_violation(FsmError::BufferOverflow, &mut out);
        out
    }

    fn on_bad_frame(&mut self, out: &mut Vec<Output>) {
        self.nak_count += 1;
        if self.nak_count >= MAX_CONSECUTIVE_NAKS {
            self.abort_in_progress();
            self.phase = Phase::Idle;
            self.nak_count = 0;
            out.push(Output::Send(Bytes::from_static(&[EOT])));
            out.push(Output::Cancel(Timer::T2));
            out.push(Output::Close);
        } else {
            out.push(Output::Send(Bytes::from_static(&[NAK])));
            out.push(Output::Arm(Timer::T3, self.timers.t3));
        }
    }

    /// A complete record (CR stripped) has been assembled in `record_buf`.
    fn finish_record(&mut self, out: &mut Vec<Output>) {
        let line = String::from_utf8_lossy(&self.record_buf).into_owned();
        let line = line.strip_suffix('\r').unwrap_or(&line).to_string();
        self.record_buf.clear();

        match &mut self.in_progress {
            None => {
                if line.starts_with('H') {
                    let delimiters = Delimiters::discover(&line);
                    let record = record::parse_record(&line, &delimiters)
                        .unwrap_or(Record { fields: Vec::new() });
                    self.in_progress = Some(InProgressMessage {
                        delimiters,
                        records: vec![record],
                        raw_lines: vec![line],
                    });
                    self.phase = Phase::Transfer;
                }
                // A non-H record with no message in progress is orphaned;
                // spec.md's invariant that dispatched messages always start
                // with H means we simply drop it rather than start one.
            }
            Some(msg) => {
                let record = record::parse_record(&line, &msg.delimiters)
                    .unwrap_or(Record { fields: Vec::new() });
                let is_terminator = record.record_type() == Some("L");
                msg.records.push(record);
                msg.raw_lines.push(line);

                if is_terminator {
                    let msg = self.in_progress.take().unwrap();
                    let message = Message {
                        records: msg.records,
                        raw: msg.raw_lines.join("\r"),
                    };
                    out.push(Output::Dispatch(message));
                    self.phase = Phase::Termination;
                }
            }
        }
    }

    fn abort_in_progress(&mut self) {
        self.in_progress = None;
        self.record_buf.clear();
    }

    fn handle_timer(&mut self, timer: Timer) -> Vec<Output> {
        let mut out = Vec::new();
        match timer {
            Timer::T2 if matches!(self.phase, Phase::Transfer | Phase::Termination) => {
                self.abort_in_progress();
                self.phase = Phase::Idle;
                out.push(Output::Cancel(Timer::T2));
            }
            Timer::T1 if self.phase == Phase::EstablishmentPending => {
                self.phase = Phase::Idle;
            }
            _ => {}
        }
        out
    }

    fn handle_peer_close(&mut self) -> Vec<Output> {
        self.abort_in_progress();
        vec![Output::Cancel(Timer::T1), Output::Cancel(Timer::T2), Output::Cancel(Timer::T3)]
    }

    // --- Sender role (spec.md §4.7 / §9's protocol-symmetric extension) ---

    /// Begin a sender-mode transfer: emit ENQ and await the peer's reply.
    pub fn begin_send(&mut self) -> Vec<Output> {
        self.phase = Phase::EstablishmentPending;
        self.send_fn = 0;
        vec![
            Output::Send(Bytes::from_static(&[ENQ])),
            Output::Arm(Timer::T1, self.timers.t1),
        ]
    }

    /// Encode and send one message's records as a sequence of frames. Should
    /// only be called once `phase() == Phase::Transfer`.
    pub fn send_message(&mut self, records: &[String]) -> Vec<Output> {
        let mut out = Vec::new();
        for line in records {
            let mut data = line.as_bytes().to_vec();
            data.push(codec::CR);
            let (frames, next_fn) = codec::encode_message(self.send_fn, &data);
            self.send_fn = next_fn;
            for frame in frames {
                out.push(Output::Send(frame));
            }
        }
        out.push(Output::Arm(Timer::T1, self.timers.t1));
        out
    }

    /// End a sender-mode transfer.
    pub fn end_send(&mut self) -> Vec<Output> {
        self.phase = Phase::Idle;
        vec![Output::Send(Bytes::from_static(&[EOT])), Output::Cancel(Timer::T1)]
    }
}

/// `BytesMut::advance` that reads better at call sites that aren't decoding
/// a `Buf`-style cursor.
trait AdvanceConsumed {
    fn advance_consumed(&mut self, n: usize);
}

impl AdvanceConsumed for BytesMut {
    fn advance_consumed(&mut self, n: usize) {
        let _ = self.split_to(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ascii(s: &[u8]) -> Bytes {
        Bytes::copy_from_slice(s)
    }

    fn frame(fn_: u8, data: &[u8], terminal: bool) -> Bytes {
        codec::encode_frame(fn_, data, terminal)
    }

    fn outputs_contain_dispatch(outputs: &[Output]) -> Option<&Message> {
        outputs.iter().find_map(|o| match o {
            Output::Dispatch(m) => Some(m),
            _ => None,
        })
    }

    fn sent_bytes(outputs: &[Output]) -> Vec<u8> {
        outputs
            .iter()
            .filter_map(|o| match o {
                Output::Send(b) => Some(b.to_vec()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Scenario S1 / property 4: ENQ, frames 0..7..0 carrying H..L, EOT
    /// dispatches exactly one message and returns the FSM to Idle.
    #[test]
    fn s1_minimal_message_dispatches_once_and_returns_to_idle() {
        let mut fsm = Fsm::new(Timers::default());
        let out = fsm.handle(Input::Bytes(ascii(&[ENQ])));
        assert_eq!(sent_bytes(&out), vec![ACK]);
        assert_eq!(fsm.phase(), Phase::Transfer);

        let h = frame(0, b"H|\\^&|||cobas|||||||P|1\r", true);
        let out = fsm.handle(Input::Bytes(h));
        assert_eq!(sent_bytes(&out), vec![ACK]);
        assert!(outputs_contain_dispatch(&out).is_none());

        let p = frame(1, b"P|1\r", true);
        fsm.handle(Input::Bytes(p));

        let l = frame(2, b"L|1|N\r", true);
        let out = fsm.handle(Input::Bytes(l));
        let msg = outputs_contain_dispatch(&out).expect("message dispatched");
        assert_eq!(msg.records.len(), 3);
        assert_eq!(fsm.phase(), Phase::Termination);

        let out = fsm.handle(Input::Bytes(ascii(&[EOT])));
        assert_eq!(fsm.phase(), Phase::Idle);
        assert!(outputs_contain_dispatch(&out).is_none());
    }

    /// Scenario S2: bad checksum -> NAK; retransmit with correct checksum -> ACK, advances.
    #[test]
    fn s2_bad_checksum_then_retransmit() {
        let mut fsm = Fsm::new(Timers::default());
        fsm.handle(Input::Bytes(ascii(&[ENQ])));

        let mut bad = frame(0, b"H|\\^&\r", true).to_vec();
        let len = bad.len();
        bad[len - 4] = if bad[len - 4] == b'0' { b'1' } else { b'0' };
        let out = fsm.handle(Input::Bytes(Bytes::from(bad)));
        assert_eq!(sent_bytes(&out), vec![NAK]);

        let good = frame(0, b"H|\\^&\r", true);
        let out = fsm.handle(Input::Bytes(good));
        assert_eq!(sent_bytes(&out), vec![ACK]);
    }

    /// Scenario S3: after ACKing FN=3, a retransmit of FN=3 gets ACKed again
    /// without re-appending data.
    #[test]
    fn s3_lost_ack_retransmit_does_not_duplicate_data() {
        let mut fsm = Fsm::new(Timers::default());
        fsm.handle(Input::Bytes(ascii(&[ENQ])));
        for n in 0..3 {
            fsm.handle(Input::Bytes(frame(n, b"H|\\^&\r", true)));
        }
        // expected_fn is now 3; re-send frame 2 (already ACKed).
        let out = fsm.handle(Input::Bytes(frame(2, b"H|\\^&\r", true)));
        assert_eq!(sent_bytes(&out), vec![ACK]);
    }

    /// Scenario S4: a record split across an ETB frame and a terminal ETX
    /// frame parses as one record equal to the concatenation.
    #[test]
    fn s4_etb_continuation_concatenates() {
        let mut fsm = Fsm::new(Timers::default());
        fsm.handle(Input::Bytes(ascii(&[ENQ])));
        fsm.handle(Input::Bytes(frame(0, b"H|\\^&\r", true)));
        fsm.handle(Input::Bytes(frame(1, b"P|1|", false)));
        fsm.handle(Input::Bytes(frame(2, b"long-name\r", true)));
        let out = fsm.handle(Input::Bytes(frame(3, b"L|1|N\r", true)));
        let msg = outputs_contain_dispatch(&out).unwrap();
        assert_eq!(msg.records[1].field(2).unwrap().as_str(), Some("long-name"));
    }

    /// Scenario S5: EOT mid-message discards the in-progress buffer, no dispatch.
    #[test]
    fn s5_peer_abort_mid_message_discards() {
        let mut fsm = Fsm::new(Timers::default());
        fsm.handle(Input::Bytes(ascii(&[ENQ])));
        fsm.handle(Input::Bytes(frame(0, b"H|\\^&\r", true)));
        let out = fsm.handle(Input::Bytes(ascii(&[EOT])));
        assert!(outputs_contain_dispatch(&out).is_none());
        assert_eq!(fsm.phase(), Phase::Idle);
    }

    /// Scenario S6: six consecutive NAKs abort the session with EOT + close.
    #[test]
    fn s6_nak_storm_aborts() {
        let mut fsm = Fsm::new(Timers::default());
        fsm.handle(Input::Bytes(ascii(&[ENQ])));
        let mut last = Vec::new();
        for _ in 0..6 {
            let mut bad = frame(0, b"X\r", true).to_vec();
            let len = bad.len();
            bad[len - 4] = if bad[len - 4] == b'0' { b'1' } else { b'0' };
            last = fsm.handle(Input::Bytes(Bytes::from(bad)));
        }
        assert_eq!(sent_bytes(&last), vec![EOT]);
        assert!(last.iter().any(|o| matches!(o, Output::Close)));
        assert_eq!(fsm.phase(), Phase::Idle);
    }

    /// Property 5: a frame with FN == expected_fn - 1 yields ACK and no
    /// dispatch, independent of scenario S3's specific framing.
    #[test]
    fn property_retransmit_of_previous_frame_is_acked_without_dispatch() {
        let mut fsm = Fsm::new(Timers::default());
        fsm.handle(Input::Bytes(ascii(&[ENQ])));
        fsm.handle(Input::Bytes(frame(0, b"H|\\^&\r", true)));
        let out = fsm.handle(Input::Bytes(frame(7, b"whatever\r", true)));
        assert_eq!(sent_bytes(&out), vec![ACK]);
        assert!(outputs_contain_dispatch(&out).is_none());
    }

    /// Property 6: T2 expiry mid-message discards the in-progress message.
    #[test]
    fn property_t2_expiry_discards_in_progress_message() {
        let mut fsm = Fsm::new(Timers::default());
        fsm.handle(Input::Bytes(ascii(&[ENQ])));
        fsm.handle(Input::Bytes(frame(0, b"H|\\^&\r", true)));
        let out = fsm.handle(Input::TimerExpired(Timer::T2));
        assert!(outputs_contain_dispatch(&out).is_none());
        assert_eq!(fsm.phase(), Phase::Idle);
    }

    #[test]
    fn termination_accepts_a_second_message_without_intervening_eot() {
        let mut fsm = Fsm::new(Timers::default());
        fsm.handle(Input::Bytes(ascii(&[ENQ])));
        fsm.handle(Input::Bytes(frame(0, b"H|\\^&\r", true)));
        fsm.handle(Input::Bytes(frame(1, b"L|1|N\r", true)));
        assert_eq!(fsm.phase(), Phase::Termination);

        let out = fsm.handle(Input::Bytes(frame(2, b"H|\\^&\r", true)));
        assert_eq!(fsm.phase(), Phase::Transfer);
        assert_eq!(sent_bytes(&out), vec![ACK]);
    }

    /// A run of garbage past STX with no ETX/ETB within the scan limit
    /// aborts the session with EOT + close instead of looping on NAK.
    #[test]
    fn unterminated_scan_aborts_with_eot_and_close() {
        let mut fsm = Fsm::new(Timers::default());
        fsm.handle(Input::Bytes(ascii(&[ENQ])));

        // Exactly MAX_SCAN_LEN bytes total so the unterminated scan consumes
        // the whole buffer and the loop doesn't keep going on leftover bytes.
        let mut garbage = vec![codec::STX, b'0'];
        garbage.extend(std::iter::repeat(b'x').take(codec::MAX_SCAN_LEN - 2));
        let out = fsm.handle(Input::Bytes(Bytes::from(garbage)));

        assert_eq!(sent_bytes(&out), vec![EOT]);
        assert!(out.iter().any(|o| matches!(o, Output::Close)));
        assert!(out.iter().any(|o| matches!(o, Output::ProtocolError(_))));
        assert_eq!(fsm.phase(), Phase::Idle);
    }

    /// A record assembled across ETB continuations that grows past
    /// `MAX_RECORD_LEN` without ever terminating aborts the session rather
    /// than buffering forever.
    #[test]
    fn oversized_record_buffer_aborts_with_eot_and_close() {
        let mut fsm = Fsm::new(Timers::default());
        fsm.handle(Input::Bytes(ascii(&[ENQ])));

        let chunk = vec![b'x'; codec::MAX_FRAME_DATA_LEN];
        let mut fn_ = 0u8;
        let mut out = Vec::new();
        // Each ETB-continued frame adds MAX_FRAME_DATA_LEN bytes; enough of
        // them push the assembled record past MAX_RECORD_LEN.
        for _ in 0..(MAX_RECORD_LEN / codec::MAX_FRAME_DATA_LEN + 2) {
            out = fsm.handle(Input::Bytes(frame(fn_, &chunk, false)));
            fn_ = (fn_ + 1) % 8;
            if out.iter().any(|o| matches!(o, Output::Close)) {
                break;
            }
        }

        assert_eq!(sent_bytes(&out), vec![EOT]);
        assert!(out.iter().any(|o| matches!(o, Output::ProtocolError(_))));
        assert_eq!(fsm.phase(), Phase::Idle);
    }

    /// The session runner calls this when its own raw read buffer exceeds
    /// its configured cap before a frame terminator arrives; it must abort
    /// with the same EOT + close sequence as an internally detected
    /// violation (SPEC_FULL.md §4.4).
    #[test]
    fn abort_buffer_overflow_sends_eot_and_closes() {
        let mut fsm = Fsm::new(Timers::default());
        fsm.handle(Input::Bytes(ascii(&[ENQ])));
        fsm.handle(Input::Bytes(frame(0, b"H|\\^&\r", true)));

        let out = fsm.abort_buffer_overflow();
        assert_eq!(sent_bytes(&out), vec![EOT]);
        assert!(out.iter().any(|o| matches!(o, Output::Close)));
        assert!(out.iter().any(|o| matches!(o, Output::ProtocolError(_))));
        assert_eq!(fsm.phase(), Phase::Idle);
    }
}
