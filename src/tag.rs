//! Tag responder state machine (C5): decodes an inbound frame purely by its
//! bit length (there is no length field on the air) and drives page/block
//! write transactions across multiple frames.
//!
//! Key/password placement on the page array, in authentication mode:
//! page 1 byte 3 = PWDH0, page 2 = `[PWDL0, PWDL1, KEY0, KEY1]`, page 3 =
//! `[KEY2, KEY3, KEY4, KEY5]` (48-bit key, big-endian across the six bytes).

use crate::cipher;
use crate::codec::{crc8, read_bits, BitWriter};
use crate::memory::{PageOp, TagImage, CONFIG_PADR, PASSWORD_82XX_PAGE, SELECT_OPCODE};
use crate::framing::ProtocolMode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PState {
    Ready,
    Selected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TState {
    NoOp,
    WritingPageData,
    WritingBlockData,
}

/// A frame the responder wants transmitted back to the reader.
pub struct TagReply {
    pub writer: BitWriter,
    /// Set only for the UID reply to a UID request; the framing selector
    /// uses this to pick the anticollision SOF/line code.
    pub ac_sequence: bool,
}

impl TagReply {
    fn new(writer: BitWriter, ac_sequence: bool) -> Self {
        TagReply { writer, ac_sequence }
    }
}

/// Owns one simulated tag's memory and transaction state.
pub struct TagResponder {
    image: TagImage,
    pstate: PState,
    tstate: TState,
    page_to_be_written: u8,
    block_data_left: u8,
    protocol_mode: Option<ProtocolMode>,
    /// Incremented on every challenge-style authentication; drives identity
    /// rotation when the image enables it.
    rotate_uid: u32,
}

impl TagResponder {
    pub fn new(image: TagImage) -> Self {
        TagResponder {
            image,
            pstate: PState::Ready,
            tstate: TState::NoOp,
            page_to_be_written: 0,
            block_data_left: 0,
            protocol_mode: None,
            rotate_uid: 0,
        }
    }

    pub fn image(&self) -> &TagImage {
        &self.image
    }

    pub fn rotate_uid(&self) -> u32 {
        self.rotate_uid
    }

    fn key(&self) -> u64 {
        let p2 = self.image.page(2);
        let p3 = self.image.page(3);
        let bytes = [p2[2], p2[3], p3[0], p3[1], p3[2], p3[3]];
        bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
    }

    fn pwdh0(&self) -> u8 {
        self.image.page(CONFIG_PADR).get(3).copied().unwrap_or(0xFF)
    }

    /// Dispatch one received frame by its bit length. Returns `None` when
    /// the tag has nothing to say (unknown frame, policy denial, auth
    /// failure, or a frame that doesn't match the current transaction
    /// state).
    pub fn handle_frame(&mut self, rx: &[u8], rxlen: usize) -> Option<TagReply> {
        match rxlen {
            5 => self.handle_uid_request(rx),
            45 => self.handle_select(rx),
            64 => self.handle_authenticate(rx),
            40 => self.handle_write_data(rx),
            20 => self.handle_page_cmd(rx),
            _ => {
                hitag_trace!("discarding frame of unrecognised length {}", rxlen);
                None
            }
        }
    }

    fn handle_uid_request(&mut self, rx: &[u8]) -> Option<TagReply> {
        // Any UID request resets the transaction, including an in-flight write.
        self.pstate = PState::Ready;
        self.tstate = TState::NoOp;
        self.page_to_be_written = 0;
        self.block_data_left = 0;

        let opcode = read_bits(rx, 0, 5) as u8;
        let mode = ProtocolMode::from_opcode(opcode)?;
        self.protocol_mode = Some(mode);

        let mut w = BitWriter::new();
        w.push_byte_run(&self.image.uid(), 32);
        Some(TagReply::new(w, true))
    }

    fn handle_select(&mut self, rx: &[u8]) -> Option<TagReply> {
        let mode = self.protocol_mode?;
        if read_bits(rx, 0, 5) as u8 != SELECT_OPCODE {
            return None;
        }
        if crc8(rx, 37) != read_bits(rx, 37, 8) as u8 {
            return None;
        }
        let requested_uid = read_bits(rx, 5, 32).to_be_bytes();
        if requested_uid != self.image.uid() {
            return None;
        }

        self.pstate = PState::Selected;
        let cfg = self.image.config();
        let mut bytes = cfg.to_bytes();
        if cfg.auth() {
            bytes[3] = 0xFF;
        }

        let mut w = BitWriter::new();
        w.push_byte_run(&bytes, 32);
        if mode != ProtocolMode::Std {
            w.append_crc();
        }
        Some(TagReply::new(w, false))
    }

    fn handle_authenticate(&mut self, rx: &[u8]) -> Option<TagReply> {
        let mode = self.protocol_mode?;
        if self.pstate != PState::Selected {
            return None;
        }
        let nonce = read_bits(rx, 0, 32);
        let authenticator = read_bits(rx, 32, 32).to_be_bytes();
        let uid = u32::from_be_bytes(self.image.uid());

        let mut cs = cipher::init(self.key(), uid, nonce);
        let mut expected = [0u8; 4];
        for b in expected.iter_mut() {
            *b = cs.next_byte() ^ 0xFF;
        }
        if expected != authenticator {
            hitag_debug!("authenticate: authenticator mismatch");
            return None;
        }

        self.rotate_uid = self.rotate_uid.wrapping_add(1);
        self.image.rotate_identity();

        let cfg = self.image.config();
        let p2 = self.image.page(2);
        let plaintext = [cfg.con2, self.pwdh0(), p2[0], p2[1]];
        let mut ciphertext = [0u8; 4];
        for (c, p) in ciphertext.iter_mut().zip(plaintext.iter()) {
            *c = p ^ cs.next_byte();
        }

        let mut w = BitWriter::new();
        w.push_byte_run(&ciphertext, 32);
        if mode != ProtocolMode::Std {
            let crc = crc8(&plaintext, 32) ^ cs.next_byte();
            w.push_bits(crc as u32, 8);
        }
        Some(TagReply::new(w, false))
    }

    fn handle_write_data(&mut self, rx: &[u8]) -> Option<TagReply> {
        let mode = self.protocol_mode?;
        if self.tstate == TState::NoOp {
            return None;
        }
        let data = [rx[0], rx[1], rx[2], rx[3]];

        if self.page_to_be_written == PASSWORD_82XX_PAGE {
            self.tstate = TState::NoOp;
            return match self.image.password_82xx() {
                Some(expected) if expected.to_be_bytes() == data => Some(self.ack(mode)),
                _ => None,
            };
        }

        self.image.set_page(self.page_to_be_written, data);

        match self.tstate {
            TState::WritingPageData => {
                self.tstate = TState::NoOp;
            }
            TState::WritingBlockData => {
                self.block_data_left -= 1;
                self.page_to_be_written += 1;
                if self.block_data_left == 0 {
                    self.tstate = TState::NoOp;
                }
            }
            TState::NoOp => unreachable!(),
        }

        Some(self.ack(mode))
    }

    fn handle_page_cmd(&mut self, rx: &[u8]) -> Option<TagReply> {
        let mode = self.protocol_mode?;
        if crc8(rx, 12) != read_bits(rx, 12, 8) as u8 {
            return None;
        }
        let op = PageOp::from_nibble(read_bits(rx, 0, 4) as u8)?;
        let page = read_bits(rx, 4, 8) as u8;
        let cfg = self.image.config();

        match op {
            PageOp::ReadPage => {
                if page > self.image.max_page() {
                    return None;
                }
                if cfg.auth() && cfg.lkp() && (page == 2 || page == 3) {
                    return None;
                }
                let mut bytes = self.image.page(page);
                if page == CONFIG_PADR && cfg.auth() {
                    bytes[3] = 0xFF;
                }
                let mut w = BitWriter::new();
                w.push_byte_run(&bytes, 32);
                if mode != ProtocolMode::Std {
                    w.append_crc();
                }
                Some(TagReply::new(w, false))
            }
            PageOp::ReadBlock => {
                if page > self.image.max_page() {
                    return None;
                }
                let span = 4 - (page % 4);
                if cfg.auth() && cfg.lkp() && (page..page + span).any(|p| p == 2 || p == 3) {
                    return None;
                }
                let mut w = BitWriter::new();
                for p in page..page + span {
                    w.push_byte_run(&self.image.page(p), 32);
                }
                if mode != ProtocolMode::Std {
                    w.append_crc();
                }
                Some(TagReply::new(w, false))
            }
            PageOp::WritePage => {
                if page == PASSWORD_82XX_PAGE {
                    self.page_to_be_written = page;
                    self.tstate = TState::WritingPageData;
                    return Some(self.ack(mode));
                }
                if page > self.image.max_page() {
                    return None;
                }
                if self.write_locked(&cfg, page) {
                    return None;
                }
                self.page_to_be_written = page;
                self.tstate = TState::WritingPageData;
                Some(self.ack(mode))
            }
            PageOp::WriteBlock => {
                if page > self.image.max_page() {
                    return None;
                }
                if self.write_locked(&cfg, page) {
                    return None;
                }
                self.page_to_be_written = page;
                self.block_data_left = 4 - (page % 4);
                self.tstate = TState::WritingBlockData;
                Some(self.ack(mode))
            }
        }
    }

    fn write_locked(&self, cfg: &crate::memory::ConfigPage, page: u8) -> bool {
        (cfg.lcon() && page == CONFIG_PADR) || (cfg.lkp() && (page == 2 || page == 3))
    }

    fn ack(&self, _mode: ProtocolMode) -> TagReply {
        let mut w = BitWriter::new();
        w.push_bits(0b01, 2);
        TagReply::new(w, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BitWriter;
    use crate::memory::TagImage;

    fn select(responder: &mut TagResponder, uid: [u8; 4]) {
        let mut w = BitWriter::new();
        w.push_bits(0b00110, 5);
        responder.handle_frame(w.as_bytes(), 5).unwrap();

        let mut w = BitWriter::new();
        w.push_bits(SELECT_OPCODE as u32, 5);
        w.push_byte_run(&uid, 32);
        w.append_crc();
        responder.handle_frame(w.as_bytes(), 45).unwrap();
    }

    #[test]
    fn uid_request_resets_and_replies_with_uid() {
        let mut responder = TagResponder::new(TagImage::demo());
        let mut w = BitWriter::new();
        w.push_bits(0b00110, 5);
        let reply = responder.handle_frame(w.as_bytes(), 5).unwrap();
        assert!(reply.ac_sequence);
        assert_eq!(&reply.writer.as_bytes()[..4], &[0x5F, 0xC2, 0x11, 0x84]);
    }

    #[test]
    fn select_rejects_uid_mismatch() {
        let mut responder = TagResponder::new(TagImage::demo());
        let mut w = BitWriter::new();
        w.push_bits(0b00110, 5);
        responder.handle_frame(w.as_bytes(), 5).unwrap();

        let mut w = BitWriter::new();
        w.push_bits(SELECT_OPCODE as u32, 5);
        w.push_byte_run(&[0, 0, 0, 0], 32);
        w.append_crc();
        assert!(responder.handle_frame(w.as_bytes(), 45).is_none());
    }

    #[test]
    fn select_masks_byte3_when_aut() {
        let mut responder = TagResponder::new(TagImage::demo());
        select(&mut responder, [0x5F, 0xC2, 0x11, 0x84]);

        let mut w = BitWriter::new();
        w.push_bits(SELECT_OPCODE as u32, 5);
        w.push_byte_run(&[0x5F, 0xC2, 0x11, 0x84], 32);
        w.append_crc();
        let reply = responder.handle_frame(w.as_bytes(), 45).unwrap();
        assert_eq!(reply.writer.as_bytes()[3], 0xFF);
    }

    #[test]
    fn read_write_page_roundtrip_without_auth() {
        let mut image = TagImage::demo();
        // Clear AUT so page 4 is freely writable for this scenario.
        let mut cfg_bytes = image.page(CONFIG_PADR);
        cfg_bytes[0] &= !0b1000_0000;
        image.set_page(CONFIG_PADR, cfg_bytes);
        let mut responder = TagResponder::new(image);
        select(&mut responder, [0x5F, 0xC2, 0x11, 0x84]);

        let mut w = BitWriter::new();
        w.push_bits(PageOp::WritePage.nibble() as u32, 4);
        w.push_bits(4, 8);
        w.append_crc();
        let reply = responder.handle_frame(w.as_bytes(), 20).unwrap();
        assert_eq!(reply.writer.as_bytes()[0] >> 6, 0b01);

        let mut w = BitWriter::new();
        w.push_byte_run(&[0xDE, 0xAD, 0xBE, 0xEF], 32);
        let reply = responder.handle_frame(w.as_bytes(), 40).unwrap();
        assert_eq!(reply.writer.as_bytes()[0] >> 6, 0b01);

        let mut w = BitWriter::new();
        w.push_bits(PageOp::ReadPage.nibble() as u32, 4);
        w.push_bits(4, 8);
        w.append_crc();
        let reply = responder.handle_frame(w.as_bytes(), 20).unwrap();
        assert_eq!(&reply.writer.as_bytes()[..4], &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn lkp_locks_out_key_pages_when_authenticated() {
        let mut responder = TagResponder::new(TagImage::demo());
        select(&mut responder, [0x5F, 0xC2, 0x11, 0x84]);
        assert!(responder.image().config().auth());
        assert!(responder.image().config().lkp());

        let mut w = BitWriter::new();
        w.push_bits(PageOp::ReadPage.nibble() as u32, 4);
        w.push_bits(2, 8);
        w.append_crc();
        assert!(responder.handle_frame(w.as_bytes(), 20).is_none());

        let mut w = BitWriter::new();
        w.push_bits(PageOp::WritePage.nibble() as u32, 4);
        w.push_bits(3, 8);
        w.append_crc();
        assert!(responder.handle_frame(w.as_bytes(), 20).is_none());
    }

    #[test]
    fn write_block_atomicity() {
        let mut image = TagImage::demo();
        let mut cfg_bytes = image.page(CONFIG_PADR);
        cfg_bytes[0] &= !0b1000_0000;
        image.set_page(CONFIG_PADR, cfg_bytes);
        let mut responder = TagResponder::new(image);
        select(&mut responder, [0x5F, 0xC2, 0x11, 0x84]);

        let mut w = BitWriter::new();
        w.push_bits(PageOp::WriteBlock.nibble() as u32, 4);
        w.push_bits(4, 8);
        w.append_crc();
        responder.handle_frame(w.as_bytes(), 20).unwrap();

        for i in 0..3u8 {
            let mut w = BitWriter::new();
            w.push_byte_run(&[i, i, i, i], 32);
            let reply = responder.handle_frame(w.as_bytes(), 40).unwrap();
            assert_eq!(reply.writer.as_bytes()[0] >> 6, 0b01);
            assert_eq!(responder.tstate, TState::WritingBlockData);
        }

        let mut w = BitWriter::new();
        w.push_byte_run(&[9, 9, 9, 9], 32);
        responder.handle_frame(w.as_bytes(), 40).unwrap();
        assert_eq!(responder.tstate, TState::NoOp);
        assert_eq!(responder.image().page(4), [0, 0, 0, 0]);
        assert_eq!(responder.image().page(7), [9, 9, 9, 9]);
    }

    #[test]
    fn unknown_length_is_discarded() {
        let mut responder = TagResponder::new(TagImage::demo());
        assert!(responder.handle_frame(&[0u8; 4], 17).is_none());
    }

    #[test]
    fn authenticate_decrypts_to_plaintext_fields() {
        let mut image = TagImage::demo();
        // key = 4F 4E 4D 49 4B 52, spread across page 2 bytes 2-3 and page 3.
        let mut p2 = image.page(2);
        p2[2] = 0x4F;
        p2[3] = 0x4E;
        image.set_page(2, p2);
        image.set_page(3, [0x4D, 0x49, 0x4B, 0x52]);
        let mut responder = TagResponder::new(image);
        select(&mut responder, [0x5F, 0xC2, 0x11, 0x84]);

        let key = 0x4F4E4D494B52u64;
        let uid = 0x5FC21184u32; // image.uid() interpreted big-endian
        let nonce = 0x85441274u32;
        let mut cs = cipher::init(key, uid, nonce);
        let mut auth = [0u8; 4];
        for b in auth.iter_mut() {
            *b = cs.next_byte() ^ 0xFF;
        }

        let mut w = BitWriter::new();
        w.push_byte_run(&nonce.to_be_bytes(), 32);
        w.push_byte_run(&auth, 32);
        let reply = responder.handle_frame(w.as_bytes(), 64).unwrap();

        let cfg = responder.image().config();
        let p2 = responder.image().page(2);
        let plaintext = [cfg.con2, responder.image().page(1)[3], p2[0], p2[1]];
        let cipherbytes = &reply.writer.as_bytes()[..4];
        let mut recovered = [0u8; 4];
        for i in 0..4 {
            recovered[i] = cipherbytes[i] ^ cs.next_byte();
        }
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn authenticate_increments_rotate_uid_and_swaps_identity_when_enabled() {
        let mut image = TagImage::demo();
        image.set_alternate_uid([0xAA, 0xBB, 0xCC, 0xDD]);
        image.set_rotate_identities(true);
        let mut responder = TagResponder::new(image);
        select(&mut responder, [0x5F, 0xC2, 0x11, 0x84]);

        let key = responder.key();
        let uid = 0x5FC21184u32;
        let nonce = 0x85441274u32;
        let mut cs = cipher::init(key, uid, nonce);
        let mut auth = [0u8; 4];
        for b in auth.iter_mut() {
            *b = cs.next_byte() ^ 0xFF;
        }

        let mut w = BitWriter::new();
        w.push_byte_run(&nonce.to_be_bytes(), 32);
        w.push_byte_run(&auth, 32);
        responder.handle_frame(w.as_bytes(), 64).unwrap();

        assert_eq!(responder.rotate_uid(), 1);
        assert_eq!(responder.image().uid(), [0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn password_82xx_handshake_accepts_correct_password_only() {
        let mut image = TagImage::demo();
        image.set_password_82xx(Some(0xDEADBEEF));
        let mut responder = TagResponder::new(image);
        select(&mut responder, [0x5F, 0xC2, 0x11, 0x84]);

        let mut w = BitWriter::new();
        w.push_bits(PageOp::WritePage.nibble() as u32, 4);
        w.push_bits(PASSWORD_82XX_PAGE as u32, 8);
        w.append_crc();
        let reply = responder.handle_frame(w.as_bytes(), 20).unwrap();
        assert_eq!(reply.writer.as_bytes()[0] >> 6, 0b01);

        let mut w = BitWriter::new();
        w.push_byte_run(&0xDEADBEEFu32.to_be_bytes(), 32);
        w.append_crc();
        let reply = responder.handle_frame(w.as_bytes(), 40).unwrap();
        assert_eq!(reply.writer.as_bytes()[0] >> 6, 0b01);
    }

    #[test]
    fn password_82xx_handshake_rejects_wrong_password() {
        let mut image = TagImage::demo();
        image.set_password_82xx(Some(0xDEADBEEF));
        let mut responder = TagResponder::new(image);
        select(&mut responder, [0x5F, 0xC2, 0x11, 0x84]);

        let mut w = BitWriter::new();
        w.push_bits(PageOp::WritePage.nibble() as u32, 4);
        w.push_bits(PASSWORD_82XX_PAGE as u32, 8);
        w.append_crc();
        responder.handle_frame(w.as_bytes(), 20).unwrap();

        let mut w = BitWriter::new();
        w.push_byte_run(&0x00000000u32.to_be_bytes(), 32);
        w.append_crc();
        assert!(responder.handle_frame(w.as_bytes(), 40).is_none());
    }
}
