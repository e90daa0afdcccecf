//! Reader driver (C6): sequences Select -> Authenticate -> Read/Write and
//! interprets tag responses. Generic over the transceiver, trace sink and
//! cooperative-abort signal so callers can plug in the real analog front
//! end or a software loopback for tests.

use crate::cipher;
use crate::codec::{crc8, read_bits, BitWriter};
use crate::config::EngineConfig;
use crate::error::{HitagError, HitagResult, Reason, Status};
use crate::framing::{frame_params, Direction, ProtocolMode};
use crate::io::{FieldControl, FieldRole, ReceiveOutcome, Trace, Transceiver};
use crate::memory::{ConfigPage, PageOp, SELECT_OPCODE};

/// Authentication variant requested of [`ReaderDriver::authenticate`].
#[derive(Clone, Copy, Debug)]
pub enum AuthCommand {
    /// Derive the authenticator from the key and a caller-supplied nonce.
    Key { key: u64, nonce: u32 },
    /// Transmit a caller-captured nonce/authenticator pair verbatim; no
    /// decryption is attempted (the key is unknown).
    Challenge { nr_ar: [u8; 8] },
    /// 82xx-series password-write handshake.
    Password82xx { password: u32 },
    /// No authentication; only valid against an `AUT=0` tag.
    Plain,
}

/// Decrypted password fields recovered from a successful `Key` authenticate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecryptedFields {
    pub con2: u8,
    pub pwdh0: u8,
    pub pwdl0: u8,
    pub pwdl1: u8,
}

/// Per-page outcome of a [`ReaderDriver::read`] call.
#[derive(Clone, Debug)]
pub struct ReadOutcome {
    pub pages: Vec<[u8; 4]>,
    pub reasons: Vec<Option<Reason>>,
}

/// Polled once, after the write data frame is transmitted and before the
/// ACK is awaited, to support fault-injection testing.
pub trait TearOffHook {
    fn poll(&mut self) -> bool;
}

/// A `TearOffHook` that never fires.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTearOff;

impl TearOffHook for NoTearOff {
    fn poll(&mut self) -> bool {
        false
    }
}

/// Owns the transceiver/trace/abort collaborators for one reader session.
pub struct ReaderDriver<T, Tr, F> {
    io: T,
    trace: Tr,
    field: F,
    config: EngineConfig,
    protocol_mode: ProtocolMode,
    cached_config: Option<ConfigPage>,
    max_page: u8,
    key_for_synthesis: Option<u64>,
    decrypted: DecryptedFields,
    /// Count of challenge-style authentications (`Key`/`Challenge`) run in
    /// this session; mirrors the tag-side counter that drives identity
    /// rotation.
    rotate_uid: u32,
}

impl<T, Tr, F> ReaderDriver<T, Tr, F>
where
    T: Transceiver,
    Tr: Trace,
    F: FieldControl,
{
    pub fn new(io: T, trace: Tr, field: F, config: EngineConfig, protocol_mode: ProtocolMode) -> Self {
        ReaderDriver {
            io,
            trace,
            field,
            config,
            protocol_mode,
            cached_config: None,
            max_page: 0,
            key_for_synthesis: None,
            decrypted: DecryptedFields::default(),
            rotate_uid: 0,
        }
    }

    pub fn decrypted(&self) -> DecryptedFields {
        self.decrypted
    }

    pub fn max_page(&self) -> u8 {
        self.max_page
    }

    /// The configuration page recovered by the last successful [`select`](Self::select).
    pub fn config(&self) -> Option<ConfigPage> {
        self.cached_config
    }

    pub fn rotate_uid(&self) -> u32 {
        self.rotate_uid
    }

    fn send(&mut self, w: &BitWriter, direction: Direction) {
        let params = frame_params(self.protocol_mode, direction);
        self.io.send_frame(w.as_bytes(), w.len_bits(), params);
    }

    fn wait_gap(&mut self) {
        self.io.wait_until(self.config.t_wait_sc);
    }

    fn receive(&mut self, buf: &mut [u8], ac_sequence: bool) -> HitagResult<usize> {
        let params = frame_params(self.protocol_mode, Direction::TagToReader { ac_sequence });
        let mut nbits = 0usize;
        let mut start_time = 0u32;
        let outcome = self.io.receive_frame(
            buf,
            &mut nbits,
            &mut start_time,
            self.protocol_mode,
            params.sof_bits,
        );
        match outcome {
            ReceiveOutcome::Ok => {
                self.trace.trace(buf, nbits, start_time, start_time, false);
                Ok(nbits)
            }
            ReceiveOutcome::Timeout | ReceiveOutcome::Overflow => {
                Err(HitagError::status_only(Status::ErfTrans))
            }
        }
    }

    /// Setup the field, anticollide and select a tag, returning its UID.
    pub fn select(&mut self) -> HitagResult<[u8; 4]> {
        self.io.setup_field(FieldRole::Reader, 0);

        let mut w = BitWriter::new();
        w.push_bits(self.protocol_mode.opcode() as u32, 5);
        self.send(&w, Direction::ReaderToTag);
        self.io.wait_until(self.config.t_wait_first);

        let mut uid_buf = [0u8; 4];
        let nbits = self
            .receive(&mut uid_buf, true)
            .map_err(|_| HitagError::new(Status::ErfTrans, Reason::UidTimeout))?;
        if nbits != 32 {
            return Err(HitagError::new(Status::ErfTrans, Reason::UidTimeout));
        }

        self.wait_gap();
        let mut w = BitWriter::new();
        w.push_bits(SELECT_OPCODE as u32, 5);
        w.push_byte_run(&uid_buf, 32);
        w.append_crc();
        self.send(&w, Direction::ReaderToTag);
        self.wait_gap();

        let expected_bits = if self.protocol_mode == ProtocolMode::Std { 32 } else { 40 };
        let mut reply = [0u8; 8];
        let nbits = self
            .receive(&mut reply, false)
            .map_err(|_| HitagError::new(Status::ErfTrans, Reason::SelectMismatch))?;
        if nbits != expected_bits {
            return Err(HitagError::new(Status::ErfTrans, Reason::SelectMismatch));
        }
        if self.protocol_mode != ProtocolMode::Std
            && crc8(&reply, 32) != read_bits(&reply, 32, 8) as u8
        {
            return Err(HitagError::new(Status::ErfTrans, Reason::SelectMismatch));
        }

        let cfg = ConfigPage::from_bytes([reply[0], reply[1], reply[2], reply[3]]);
        self.max_page = cfg.max_page();
        self.cached_config = Some(cfg);
        Ok(uid_buf)
    }

    pub fn authenticate(&mut self, uid: [u8; 4], cmd: AuthCommand) -> HitagResult<()> {
        let cfg = self
            .cached_config
            .ok_or_else(|| HitagError::status_only(Status::ESoft))?;

        match cmd {
            AuthCommand::Plain => {
                if cfg.auth() {
                    return Err(HitagError::new(Status::EInvArg, Reason::PlainOnAuth));
                }
                Ok(())
            }
            AuthCommand::Key { key, nonce } => {
                let mut cs = cipher::init(key, u32::from_be_bytes(uid), nonce);
                let mut authenticator = [0u8; 4];
                for b in authenticator.iter_mut() {
                    *b = cs.next_byte() ^ 0xFF;
                }

                let mut w = BitWriter::new();
                w.push_byte_run(&nonce.to_be_bytes(), 32);
                w.push_byte_run(&authenticator, 32);
                self.send(&w, Direction::ReaderToTag);
                self.wait_gap();

                let expected_bits = if self.protocol_mode == ProtocolMode::Std { 32 } else { 40 };
                let mut reply = [0u8; 8];
                let nbits = self
                    .receive(&mut reply, false)
                    .map_err(|_| HitagError::new(Status::ErfTrans, Reason::AuthReplyLength))?;
                if nbits != expected_bits {
                    return Err(HitagError::new(Status::ErfTrans, Reason::AuthReplyLength));
                }

                let mut plaintext = [0u8; 4];
                for (p, c) in plaintext.iter_mut().zip(reply[..4].iter()) {
                    *p = c ^ cs.next_byte();
                }
                if self.protocol_mode != ProtocolMode::Std {
                    let expected_crc = crc8(&plaintext, 32) ^ cs.next_byte();
                    if expected_crc != reply[4] {
                        return Err(HitagError::new(Status::ErfTrans, Reason::AuthReplyLength));
                    }
                }

                self.decrypted = DecryptedFields {
                    con2: plaintext[0],
                    pwdh0: plaintext[1],
                    pwdl0: plaintext[2],
                    pwdl1: plaintext[3],
                };
                self.key_for_synthesis = Some(key);
                self.rotate_uid = self.rotate_uid.wrapping_add(1);
                Ok(())
            }
            AuthCommand::Challenge { nr_ar } => {
                let mut w = BitWriter::new();
                w.push_byte_run(&nr_ar, 64);
                self.send(&w, Direction::ReaderToTag);
                self.wait_gap();
                let mut reply = [0u8; 8];
                self.receive(&mut reply, false)?;
                self.rotate_uid = self.rotate_uid.wrapping_add(1);
                Ok(())
            }
            AuthCommand::Password82xx { password } => {
                let mut w = BitWriter::new();
                w.push_bits(PageOp::WritePage.nibble() as u32, 4);
                w.push_bits(64, 8);
                w.append_crc();
                self.send(&w, Direction::ReaderToTag);
                self.wait_gap();
                if self.receive_ack()? != 0b01 {
                    return Err(HitagError::new(Status::ErfTrans, Reason::Auth82xxFirstAck));
                }

                let mut w = BitWriter::new();
                w.push_byte_run(&password.to_be_bytes(), 32);
                w.append_crc();
                self.send(&w, Direction::ReaderToTag);
                self.wait_gap();
                if self.receive_ack()? != 0b01 {
                    return Err(HitagError::new(Status::ErfTrans, Reason::Auth82xxSecondAck));
                }
                Ok(())
            }
        }
    }

    fn receive_ack(&mut self) -> HitagResult<u8> {
        let mut buf = [0u8; 1];
        let nbits = self.receive(&mut buf, false)?;
        if nbits != 2 {
            return Ok(0);
        }
        Ok(buf[0] >> 6)
    }

    /// Read `page_count` pages starting at `page` (or up to `max_page` when
    /// `page_count == 0`), collecting a per-page reason on failure rather
    /// than aborting the batch.
    pub fn read(&mut self, page: u8, page_count: u8) -> ReadOutcome {
        let cfg = self.cached_config.unwrap_or(ConfigPage::from_bytes([0; 4]));
        let last = if page_count == 0 {
            self.max_page
        } else {
            page.saturating_add(page_count).saturating_sub(1)
        };

        let mut pages = Vec::new();
        let mut reasons = Vec::new();
        let mut p = page;
        while p <= last {
            if cfg.auth() && cfg.lkp() && (p == 2 || p == 3) {
                if let Some(key) = self.key_for_synthesis {
                    // `key` is the 48-bit value right-aligned in a u64; the
                    // high two bytes of `to_be_bytes()` are always zero.
                    let key_bytes = key.to_be_bytes();
                    let synthesised = if p == 2 {
                        [self.decrypted.pwdl0, self.decrypted.pwdl1, key_bytes[2], key_bytes[3]]
                    } else {
                        [key_bytes[4], key_bytes[5], key_bytes[6], key_bytes[7]]
                    };
                    pages.push(synthesised);
                    reasons.push(None);
                    p += 1;
                    continue;
                } else {
                    pages.push([0; 4]);
                    reasons.push(Some(Reason::PageReadFail));
                    p = 4;
                    continue;
                }
            }

            let mut w = BitWriter::new();
            w.push_bits(PageOp::ReadPage.nibble() as u32, 4);
            w.push_bits(p as u32, 8);
            w.append_crc();
            self.send(&w, Direction::ReaderToTag);
            self.wait_gap();

            let expected_bits = if self.protocol_mode == ProtocolMode::Std { 32 } else { 40 };
            let mut reply = [0u8; 8];
            match self.receive(&mut reply, false) {
                Ok(nbits) if nbits == expected_bits => {
                    pages.push([reply[0], reply[1], reply[2], reply[3]]);
                    reasons.push(None);
                }
                _ => {
                    pages.push([0; 4]);
                    reasons.push(Some(Reason::PageReadFail));
                }
            }
            p += 1;
        }

        ReadOutcome { pages, reasons }
    }

    /// Write one page. A tear-off hook is polled after the data frame is
    /// transmitted and before the ACK is awaited.
    pub fn write_page(
        &mut self,
        page: u8,
        data: [u8; 4],
        tearoff: &mut dyn TearOffHook,
    ) -> HitagResult<()> {
        let mut w = BitWriter::new();
        w.push_bits(PageOp::WritePage.nibble() as u32, 4);
        w.push_bits(page as u32, 8);
        w.append_crc();
        self.send(&w, Direction::ReaderToTag);
        self.wait_gap();
        if self.receive_ack()? != 0b01 {
            return Err(HitagError::new(Status::ErfTrans, Reason::WriteFirstAck));
        }

        // The write-data frame is dispatched by the responder purely on its
        // 40-bit length (32 data + 8 CRC), so the CRC is always present here
        // regardless of protocol mode, unlike the mode-conditional CRC on
        // tag-to-reader response frames.
        let mut w = BitWriter::new();
        w.push_byte_run(&data, 32);
        w.append_crc();
        self.send(&w, Direction::ReaderToTag);

        if self.config.tearoff_enabled && tearoff.poll() {
            return Err(HitagError::status_only(Status::ETearoff));
        }

        self.wait_gap();
        if self.receive_ack()? != 0b01 {
            return Err(HitagError::new(Status::ErfTrans, Reason::WriteSecondAck));
        }
        Ok(())
    }

    /// Iterate a captured set of NrAr challenges via the `CHALLENGE` path,
    /// resetting the tag between attempts. Intended for replay-testing a
    /// sequence of captured authentication attempts against a live tag.
    pub fn challenge_sweep(&mut self, challenges: &[[u8; 8]]) -> Vec<HitagResult<()>> {
        let mut results = Vec::with_capacity(challenges.len());
        for nr_ar in challenges {
            if self.field.abort_requested() {
                break;
            }
            let outcome = self.select().and_then(|uid| {
                self.authenticate(uid, AuthCommand::Challenge { nr_ar: *nr_ar })
            });
            let failed = outcome.is_err();
            results.push(outcome);
            if failed {
                // Force the tag back to READY with a dummy select, then
                // give it time off-field before the next attempt.
                let _ = self.select();
                self.io.teardown_field();
                self.io.wait_until(self.config.t_reset);
                self.io.setup_field(FieldRole::Reader, 0);
            }
        }
        results
    }
}
